//! Test doubles (testing only)
//!
//! - `RecordingEventSink` keeps every published event for assertions.
//! - `InterferingRepoStore` moves a branch behind the engine's back right
//!   before its compare-and-swap, simulating a concurrent ref update.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::events::{ChangeMergedEvent, RefUpdatedEvent, SubmitEvent};
use crate::schema::*;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// RecordingEventSink
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<SubmitEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SubmitEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn ref_updates(&self) -> Vec<RefUpdatedEvent> {
        self.events()
            .iter()
            .filter_map(|e| e.as_ref_updated().cloned())
            .collect()
    }

    pub fn change_merges(&self) -> Vec<ChangeMergedEvent> {
        self.events()
            .iter()
            .filter_map(|e| e.as_change_merged().cloned())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event: SubmitEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ---------------------------------------------------------------------------
// InterferingRepoStore
// ---------------------------------------------------------------------------

/// Delegates to `inner`, except that the first compare-and-swap on the
/// armed branch is preceded by an out-of-band move of that branch.
pub struct InterferingRepoStore {
    inner: Arc<dyn RepoStore>,
    armed: Mutex<Option<(BranchKey, CommitId)>>,
}

impl InterferingRepoStore {
    pub fn new(inner: Arc<dyn RepoStore>) -> Self {
        Self {
            inner,
            armed: Mutex::new(None),
        }
    }

    /// Move `branch` to `to` just before the engine's next swap of it.
    pub fn interfere_on(&self, branch: BranchKey, to: CommitId) {
        *self.armed.lock().unwrap() = Some((branch, to));
    }
}

#[async_trait]
impl RepoStore for InterferingRepoStore {
    async fn projects(&self) -> StorageResult<Vec<ProjectName>> {
        self.inner.projects().await
    }

    async fn commit(&self, project: &ProjectName, id: &CommitId) -> StorageResult<Commit> {
        self.inner.commit(project, id).await
    }

    async fn branch_tip(&self, branch: &BranchKey) -> StorageResult<Option<CommitId>> {
        self.inner.branch_tip(branch).await
    }

    async fn branches(&self, project: &ProjectName) -> StorageResult<Vec<(BranchKey, CommitId)>> {
        self.inner.branches(project).await
    }

    async fn insert_commit(
        &self,
        project: &ProjectName,
        commit: NewCommit,
    ) -> StorageResult<CommitId> {
        self.inner.insert_commit(project, commit).await
    }

    async fn compare_and_swap(
        &self,
        branch: &BranchKey,
        expected: Option<&CommitId>,
        new: Option<&CommitId>,
    ) -> StorageResult<()> {
        let trigger = {
            let mut armed = self.armed.lock().unwrap();
            match armed.as_ref() {
                Some((target, _)) if target == branch => armed.take(),
                _ => None,
            }
        };
        if let Some((target, to)) = trigger {
            let current = self.inner.branch_tip(&target).await?;
            self.inner
                .compare_and_swap(&target, current.as_ref(), Some(&to))
                .await?;
        }
        self.inner.compare_and_swap(branch, expected, new).await
    }
}
