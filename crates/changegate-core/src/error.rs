//! Error taxonomy for submissions.
//!
//! Feasibility failures (dependencies, conflicts) are collected into a
//! [`ProblemReport`] so the caller sees every offending change at once.

use std::fmt;

use changegate_state::{BranchKey, ChangeId, ChangeStatus, CommitId, StorageError};
use thiserror::Error;

/// One reason a change in the batch cannot be integrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemKind {
    /// An ancestor belongs to an open change that is not part of the batch.
    NotSubmitted {
        commit: CommitId,
        depends_on: CommitId,
        owner: ChangeId,
    },
    /// An ancestor is an outdated patch set of another change.
    OutdatedPatchSet {
        commit: CommitId,
        depends_on: CommitId,
        owner: ChangeId,
        patch_set: u32,
        latest: u32,
    },
    /// An ancestor has no change the actor can see (deleted, hidden, private).
    NotVisibleOrDeleted {
        commit: CommitId,
        depends_on: CommitId,
    },
    /// The required merge hits paths changed on both sides.
    PathConflict { paths: Vec<String> },
    /// Branch policy demands a fast-forward and none is possible.
    FastForwardRequired,
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NOT_SUBMITTED: &str = "Depends on change that was not submitted.";
        match self {
            ProblemKind::NotSubmitted {
                commit,
                depends_on,
                owner,
            } => write!(
                f,
                "{NOT_SUBMITTED} Commit {commit} depends on commit {depends_on} of change {owner} \
                 which cannot be merged."
            ),
            ProblemKind::OutdatedPatchSet {
                commit,
                depends_on,
                owner,
                patch_set,
                latest,
            } => write!(
                f,
                "{NOT_SUBMITTED} Commit {commit} depends on commit {depends_on}, which is \
                 outdated patch set {patch_set} of change {owner}. The latest patch set is {latest}."
            ),
            ProblemKind::NotVisibleOrDeleted { commit, depends_on } => write!(
                f,
                "{NOT_SUBMITTED} Commit {commit} depends on commit {depends_on} which cannot be \
                 merged. Is the change of this commit not visible or was it deleted?"
            ),
            ProblemKind::PathConflict { .. } => f.write_str(
                "Change could not be merged due to a path conflict. Please rebase the change \
                 locally and upload the rebased commit for review.",
            ),
            ProblemKind::FastForwardRequired => f.write_str(
                "Project policy requires all submissions to be a fast-forward. Please rebase the \
                 change locally and upload again for review.",
            ),
        }
    }
}

/// A problem attributed to one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub change: ChangeId,
    pub kind: ProblemKind,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Change {}: {}", self.change, self.kind)
    }
}

/// Every problem found for one batch, in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemReport {
    /// Number of changes in the batch, not the number of problems.
    pub batch_size: usize,
    pub problems: Vec<Problem>,
}

impl ProblemReport {
    pub fn new(batch_size: usize, problems: Vec<Problem>) -> Self {
        Self {
            batch_size,
            problems,
        }
    }

    pub fn changes(&self) -> impl Iterator<Item = ChangeId> + '_ {
        self.problems.iter().map(|p| p.change)
    }
}

impl fmt::Display for ProblemReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.batch_size == 1 {
            "change"
        } else {
            "changes"
        };
        write!(
            f,
            "Failed to submit {} {noun} due to the following problems:",
            self.batch_size
        )?;
        for problem in &self.problems {
            write!(f, "\n{problem}")?;
        }
        Ok(())
    }
}

/// Errors returned by `submit` and `preview`.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Not found: {change}")]
    NotFound { change: ChangeId },

    #[error("A change to be submitted with {change} is not visible")]
    NotVisible { change: ChangeId },

    #[error("change {change} is {status}")]
    NotOpen {
        change: ChangeId,
        status: ChangeStatus,
    },

    /// One or more unmet dependencies. Nothing was changed.
    #[error("{0}")]
    Dependency(ProblemReport),

    /// A required merge could not be computed. Nothing was changed.
    #[error("{0}")]
    Conflict(ProblemReport),

    /// A branch moved between validation and apply. Safe to retry.
    #[error("branch {branch} was updated concurrently; submit again")]
    ConcurrentModification {
        branch: BranchKey,
        expected: Option<CommitId>,
        actual: Option<CommitId>,
    },

    /// Undoing a partially applied submission failed; manual repair needed.
    #[error("rollback failed at {step}: {source}")]
    RollbackFailed {
        step: String,
        #[source]
        source: StorageError,
    },

    #[error("unsupported preview format: {0}")]
    UnsupportedFormat(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SubmitError {
    /// Whether retrying the whole submission from scratch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::ConcurrentModification { .. })
    }

    /// Itemized report for dependency and conflict failures.
    pub fn report(&self) -> Option<&ProblemReport> {
        match self {
            SubmitError::Dependency(r) | SubmitError::Conflict(r) => Some(r),
            _ => None,
        }
    }

    /// Short machine-friendly label, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SubmitError::NotFound { .. } => "not_found",
            SubmitError::NotVisible { .. } => "not_visible",
            SubmitError::NotOpen { .. } => "not_open",
            SubmitError::Dependency(_) => "dependency",
            SubmitError::Conflict(_) => "conflict",
            SubmitError::ConcurrentModification { .. } => "concurrent_modification",
            SubmitError::RollbackFailed { .. } => "rollback_failed",
            SubmitError::UnsupportedFormat(_) => "unsupported_format",
            SubmitError::Archive(_) => "archive",
            SubmitError::Storage(_) => "storage",
        }
    }
}

/// Result type for submission operations.
pub type Result<T> = std::result::Result<T, SubmitError>;
