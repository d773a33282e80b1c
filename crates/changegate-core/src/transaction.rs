//! Apply-with-compensation for one submission.
//!
//! There is no transaction spanning repositories. Instead every applied
//! mutation is appended to an ordered log together with enough state to
//! invert it; on failure the log is unwound newest first.

use changegate_state::{AccountId, BranchKey, ChangeId, ChangeStore, CommitId, RepoStore, StorageError};
use tracing::{debug, warn};

use crate::error::{Result, SubmitError};

/// A mutation that has been applied and can be inverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedOp {
    /// `branch` moved from `old` to `new`. Inverse: swap back (deleting the
    /// ref when `old` is `None`).
    RefSwap {
        branch: BranchKey,
        old: Option<CommitId>,
        new: CommitId,
    },
    /// A change was marked merged. Inverse: reopen it.
    MarkMerged { change: ChangeId },
}

impl AppliedOp {
    fn describe(&self) -> String {
        match self {
            AppliedOp::RefSwap { branch, .. } => format!("ref {branch}"),
            AppliedOp::MarkMerged { change } => format!("change {change}"),
        }
    }
}

/// Ordered log of applied operations against the stores.
pub struct SubmitTransaction<'a> {
    repos: &'a dyn RepoStore,
    changes: &'a dyn ChangeStore,
    log: Vec<AppliedOp>,
}

impl<'a> SubmitTransaction<'a> {
    pub fn new(repos: &'a dyn RepoStore, changes: &'a dyn ChangeStore) -> Self {
        Self {
            repos,
            changes,
            log: Vec::new(),
        }
    }

    pub fn applied(&self) -> &[AppliedOp] {
        &self.log
    }

    /// Move `branch` from the observed `old` tip to `new`.
    ///
    /// A lost compare-and-swap becomes [`SubmitError::ConcurrentModification`].
    pub async fn swap_ref(
        &mut self,
        branch: &BranchKey,
        old: Option<&CommitId>,
        new: &CommitId,
    ) -> Result<()> {
        match self.repos.compare_and_swap(branch, old, Some(new)).await {
            Ok(()) => {
                debug!(branch = %branch, new = %new.short(), "ref swapped");
                self.log.push(AppliedOp::RefSwap {
                    branch: branch.clone(),
                    old: old.cloned(),
                    new: new.clone(),
                });
                Ok(())
            }
            Err(StorageError::RefConflict {
                branch,
                expected,
                actual,
            }) => Err(SubmitError::ConcurrentModification {
                branch,
                expected,
                actual,
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn mark_merged(
        &mut self,
        change: ChangeId,
        merged_as: &CommitId,
        submitter: AccountId,
    ) -> Result<()> {
        self.changes.mark_merged(change, merged_as, submitter).await?;
        self.log.push(AppliedOp::MarkMerged { change });
        Ok(())
    }

    /// Keep everything applied and hand back the log.
    pub fn commit(self) -> Vec<AppliedOp> {
        self.log
    }

    /// Invert every applied operation, newest first.
    ///
    /// Returns the number of operations undone. Stops at the first inverse
    /// that fails, reporting it as [`SubmitError::RollbackFailed`].
    pub async fn rollback(self) -> Result<usize> {
        let undone = self.log.len();
        for op in self.log.iter().rev() {
            let inverse = match op {
                AppliedOp::RefSwap { branch, old, new } => {
                    self.repos
                        .compare_and_swap(branch, Some(new), old.as_ref())
                        .await
                }
                AppliedOp::MarkMerged { change } => self.changes.reopen(*change).await,
            };
            if let Err(source) = inverse {
                warn!(step = %op.describe(), error = %source, "compensation failed");
                return Err(SubmitError::RollbackFailed {
                    step: op.describe(),
                    source,
                });
            }
        }
        Ok(undone)
    }
}
