//! Collaborator traits consumed by the submission engine
//!
//! - `RepoStore`: commit objects and branch refs, per project
//! - `ChangeStore`: change records and their patch sets
//! - `VisibilityOracle`: may an account see a change?
//! - `EventSink`: post-submit notifications, fire-and-forget
//!
//! All traits are async and backend-agnostic. An in-memory backend lives in
//! the `memory` module; test doubles live in `fakes`.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::events::SubmitEvent;
use crate::schema::{
    Account, AccountId, BranchKey, Change, ChangeId, Commit, CommitId, NewCommit, ProjectName,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// RepoStore: commits and refs
// ---------------------------------------------------------------------------

/// Commit object and branch ref storage.
///
/// Guarantees:
/// - `insert_commit` is idempotent: the same content yields the same id.
/// - `compare_and_swap` is atomic per ref. Nothing is atomic across refs.
#[async_trait]
pub trait RepoStore: Send + Sync {
    /// All known projects, sorted.
    async fn projects(&self) -> StorageResult<Vec<ProjectName>>;

    /// Resolve a commit by id.
    async fn commit(&self, project: &ProjectName, id: &CommitId) -> StorageResult<Commit>;

    /// Parent ids of a commit.
    async fn parents(&self, project: &ProjectName, id: &CommitId) -> StorageResult<Vec<CommitId>> {
        Ok(self.commit(project, id).await?.parents)
    }

    /// Current tip of a branch, `None` if the branch does not exist.
    async fn branch_tip(&self, branch: &BranchKey) -> StorageResult<Option<CommitId>>;

    /// Every branch of a project with its tip, sorted by name.
    async fn branches(&self, project: &ProjectName) -> StorageResult<Vec<(BranchKey, CommitId)>>;

    /// Store a commit object and return its id.
    async fn insert_commit(&self, project: &ProjectName, commit: NewCommit)
        -> StorageResult<CommitId>;

    /// Move `branch` from `expected` to `new`.
    ///
    /// `None` as `expected` means "branch must not exist"; `None` as `new`
    /// deletes the branch. Fails with [`StorageError::RefConflict`] when the
    /// current value is not `expected`.
    async fn compare_and_swap(
        &self,
        branch: &BranchKey,
        expected: Option<&CommitId>,
        new: Option<&CommitId>,
    ) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// ChangeStore: review records
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Resolve a change. `None` when it does not exist or was deleted.
    async fn get(&self, id: ChangeId) -> StorageResult<Option<Change>>;

    /// Changes in `project` with any patch set (current or outdated) at `commit`.
    async fn by_commit(&self, project: &ProjectName, commit: &CommitId)
        -> StorageResult<Vec<Change>>;

    /// Open changes carrying `topic`, across all projects, in id order.
    async fn open_by_topic(&self, topic: &str) -> StorageResult<Vec<Change>>;

    /// Mark a change merged as part of `commit`, recording the submitter.
    async fn mark_merged(
        &self,
        id: ChangeId,
        commit: &CommitId,
        submitter: AccountId,
    ) -> StorageResult<()>;

    /// Undo [`mark_merged`](Self::mark_merged): status back to new, submitter cleared.
    async fn reopen(&self, id: ChangeId) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// VisibilityOracle: read permission
// ---------------------------------------------------------------------------

#[async_trait]
pub trait VisibilityOracle: Send + Sync {
    /// Whether `actor` may see `change` (private, hidden branch, ...).
    async fn is_visible(&self, actor: &Account, change: &Change) -> StorageResult<bool>;
}

// ---------------------------------------------------------------------------
// EventSink: notification bus
// ---------------------------------------------------------------------------

/// Accepts notifications. No acknowledgment; delivery failures are the
/// sink's own business.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: SubmitEvent);
}
