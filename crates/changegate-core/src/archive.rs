//! Downloadable preview of a submission.
//!
//! The archive holds one entry per affected project, named
//! `<project>.git`. Each entry is a JSON [`ProjectBundle`]: the refs that
//! would move and every commit object the submission would make reachable,
//! synthesized merge commits included.
//!
//! Rendering is a pure function of the bundles: entries carry no wall-clock
//! time, so unchanged state always yields identical bytes.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use changegate_state::{BranchKey, Commit, CommitId, ProjectName};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SubmitError};

/// Archive container formats offered by preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewFormat {
    Tar,
    Tgz,
}

impl PreviewFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            PreviewFormat::Tar => "application/x-tar",
            PreviewFormat::Tgz => "application/x-gzip",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            PreviewFormat::Tar => "tar",
            PreviewFormat::Tgz => "tgz",
        }
    }
}

impl fmt::Display for PreviewFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for PreviewFormat {
    type Err = SubmitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tar" => Ok(PreviewFormat::Tar),
            "tgz" | "tar.gz" => Ok(PreviewFormat::Tgz),
            _ => Err(SubmitError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// One ref the submission would move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRef {
    pub branch: String,
    pub old: Option<CommitId>,
    pub new: CommitId,
}

/// Contents of one `<project>.git` archive entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectBundle {
    pub project: ProjectName,
    pub refs: Vec<BundleRef>,
    /// Commits not reachable from any pre-submit branch tip, parents first.
    pub commits: Vec<Commit>,
}

impl ProjectBundle {
    pub fn new(project: ProjectName) -> Self {
        Self {
            project,
            refs: Vec::new(),
            commits: Vec::new(),
        }
    }

    pub fn add_ref(&mut self, branch: &BranchKey, old: Option<CommitId>, new: CommitId) {
        self.refs.push(BundleRef {
            branch: branch.branch.clone(),
            old,
            new,
        });
    }

    /// Archive entry name.
    pub fn entry_name(&self) -> String {
        format!("{}.git", self.project)
    }
}

/// A rendered preview archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewArchive {
    pub format: PreviewFormat,
    pub bytes: Vec<u8>,
}

impl PreviewArchive {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// Pack `bundles` into an archive of the given format.
pub fn build_archive(format: PreviewFormat, bundles: &[ProjectBundle]) -> Result<PreviewArchive> {
    let bytes = match format {
        PreviewFormat::Tar => write_entries(Vec::new(), bundles),
        PreviewFormat::Tgz => write_entries(GzEncoder::new(Vec::new(), Compression::default()), bundles)
            .and_then(GzEncoder::finish),
    }
    .map_err(|e| SubmitError::Archive(e.to_string()))?;
    Ok(PreviewArchive { format, bytes })
}

fn write_entries<W: Write>(writer: W, bundles: &[ProjectBundle]) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    for bundle in bundles {
        let body = serde_json::to_vec_pretty(bundle)?;
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder.append_data(&mut header, bundle.entry_name(), body.as_slice())?;
    }
    builder.into_inner()
}
