//! Error types for changegate-state

use thiserror::Error;

use crate::schema::{BranchKey, ChangeId, CommitId, ProjectName};

/// Errors raised by the commit/ref store and the change store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Commit object not present in the project
    #[error("commit {id} not found in {project}")]
    CommitNotFound { project: ProjectName, id: CommitId },

    /// Project does not exist
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectName),

    /// Change does not exist (or was deleted)
    #[error("change not found: {0}")]
    ChangeNotFound(ChangeId),

    /// Malformed commit id string
    #[error("invalid commit id: {id}")]
    InvalidCommitId { id: String },

    /// Compare-and-swap lost: the ref did not hold the expected value
    #[error("ref {branch} moved: expected {}, found {}", display_tip(.expected), display_tip(.actual))]
    RefConflict {
        branch: BranchKey,
        expected: Option<CommitId>,
        actual: Option<CommitId>,
    },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// I/O error while loading or saving state
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure
    #[error("backend error: {0}")]
    Backend(String),
}

fn display_tip(tip: &Option<CommitId>) -> String {
    match tip {
        Some(id) => id.short().to_string(),
        None => "(none)".to_string(),
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
