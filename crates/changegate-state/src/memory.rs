//! In-memory backend for all collaborator traits.
//!
//! Used by tests and by the CLI, which loads and saves the whole world as a
//! JSON [`WorldSnapshot`]. Every store guards its state with a `Mutex`;
//! no lock is held across an `.await`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;
use crate::schema::*;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned lock only means another test thread panicked mid-update.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryRepoStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct ProjectState {
    commits: HashMap<CommitId, Commit>,
    refs: BTreeMap<String, CommitId>,
}

/// Commit objects and refs for any number of projects.
#[derive(Debug, Default)]
pub struct MemoryRepoStore {
    projects: Mutex<BTreeMap<ProjectName, ProjectState>>,
}

impl MemoryRepoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a project whose `master` points at an empty root commit.
    pub fn create_project(&self, name: &str, ident: &PersonIdent) -> CommitId {
        let root = NewCommit {
            parents: vec![],
            tree: Tree::new(),
            author: ident.clone(),
            committer: ident.clone(),
            message: format!("Initial empty repository for {name}"),
        }
        .into_commit();
        let id = root.id.clone();
        let mut state = ProjectState::default();
        state.commits.insert(id.clone(), root);
        state.refs.insert("refs/heads/master".to_string(), id.clone());
        lock(&self.projects).insert(ProjectName::new(name), state);
        id
    }

    /// Store a commit without going through the async trait.
    pub fn put_commit(&self, project: &ProjectName, commit: NewCommit) -> StorageResult<Commit> {
        let mut projects = lock(&self.projects);
        let state = projects
            .get_mut(project)
            .ok_or_else(|| StorageError::ProjectNotFound(project.clone()))?;
        let commit = commit.into_commit();
        state
            .commits
            .entry(commit.id.clone())
            .or_insert_with(|| commit.clone());
        Ok(commit)
    }

    /// Unconditionally point a branch at `tip` (admin-style ref write).
    pub fn set_branch(&self, branch: &BranchKey, tip: CommitId) -> StorageResult<()> {
        let mut projects = lock(&self.projects);
        let state = projects
            .get_mut(&branch.project)
            .ok_or_else(|| StorageError::ProjectNotFound(branch.project.clone()))?;
        state.refs.insert(branch.branch.clone(), tip);
        Ok(())
    }

    /// Synchronous tip lookup.
    pub fn tip(&self, branch: &BranchKey) -> Option<CommitId> {
        lock(&self.projects)
            .get(&branch.project)
            .and_then(|p| p.refs.get(&branch.branch).cloned())
    }

    /// Synchronous commit lookup.
    pub fn get_commit(&self, project: &ProjectName, id: &CommitId) -> Option<Commit> {
        lock(&self.projects)
            .get(project)
            .and_then(|p| p.commits.get(id).cloned())
    }

    /// Number of commit objects stored for `project`.
    pub fn commit_count(&self, project: &ProjectName) -> usize {
        lock(&self.projects)
            .get(project)
            .map(|p| p.commits.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RepoStore for MemoryRepoStore {
    async fn projects(&self) -> StorageResult<Vec<ProjectName>> {
        Ok(lock(&self.projects).keys().cloned().collect())
    }

    async fn commit(&self, project: &ProjectName, id: &CommitId) -> StorageResult<Commit> {
        let projects = lock(&self.projects);
        let state = projects
            .get(project)
            .ok_or_else(|| StorageError::ProjectNotFound(project.clone()))?;
        state
            .commits
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::CommitNotFound {
                project: project.clone(),
                id: id.clone(),
            })
    }

    async fn branch_tip(&self, branch: &BranchKey) -> StorageResult<Option<CommitId>> {
        let projects = lock(&self.projects);
        let state = projects
            .get(&branch.project)
            .ok_or_else(|| StorageError::ProjectNotFound(branch.project.clone()))?;
        Ok(state.refs.get(&branch.branch).cloned())
    }

    async fn branches(&self, project: &ProjectName) -> StorageResult<Vec<(BranchKey, CommitId)>> {
        let projects = lock(&self.projects);
        let state = projects
            .get(project)
            .ok_or_else(|| StorageError::ProjectNotFound(project.clone()))?;
        Ok(state
            .refs
            .iter()
            .map(|(name, tip)| (BranchKey::new(project.as_str(), name), tip.clone()))
            .collect())
    }

    async fn insert_commit(
        &self,
        project: &ProjectName,
        commit: NewCommit,
    ) -> StorageResult<CommitId> {
        Ok(self.put_commit(project, commit)?.id)
    }

    async fn compare_and_swap(
        &self,
        branch: &BranchKey,
        expected: Option<&CommitId>,
        new: Option<&CommitId>,
    ) -> StorageResult<()> {
        let mut projects = lock(&self.projects);
        let state = projects
            .get_mut(&branch.project)
            .ok_or_else(|| StorageError::ProjectNotFound(branch.project.clone()))?;
        let actual = state.refs.get(&branch.branch);
        if actual != expected {
            return Err(StorageError::RefConflict {
                branch: branch.clone(),
                expected: expected.cloned(),
                actual: actual.cloned(),
            });
        }
        if let Some(id) = new {
            if !state.commits.contains_key(id) {
                return Err(StorageError::CommitNotFound {
                    project: branch.project.clone(),
                    id: id.clone(),
                });
            }
        }
        match new {
            Some(id) => {
                state.refs.insert(branch.branch.clone(), id.clone());
            }
            None => {
                state.refs.remove(&branch.branch);
            }
        }
        debug!(branch = %branch, new = ?new.map(CommitId::short), "ref updated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryChangeStore
// ---------------------------------------------------------------------------

/// Change records keyed by id. Deleted changes are removed outright.
#[derive(Debug)]
pub struct MemoryChangeStore {
    changes: Mutex<BTreeMap<ChangeId, Change>>,
    next_id: AtomicU32,
}

impl Default for MemoryChangeStore {
    fn default() -> Self {
        Self {
            changes: Mutex::new(BTreeMap::new()),
            next_id: AtomicU32::new(1),
        }
    }
}

impl MemoryChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next change id (upload order).
    pub fn next_id(&self) -> ChangeId {
        ChangeId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn insert(&self, change: Change) {
        self.next_id.fetch_max(change.id.0 + 1, Ordering::SeqCst);
        lock(&self.changes).insert(change.id, change);
    }

    /// Synchronous lookup.
    pub fn change(&self, id: ChangeId) -> Option<Change> {
        lock(&self.changes).get(&id).cloned()
    }

    /// Apply `f` to a stored change.
    pub fn update<F>(&self, id: ChangeId, f: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Change),
    {
        let mut changes = lock(&self.changes);
        let change = changes
            .get_mut(&id)
            .ok_or(StorageError::ChangeNotFound(id))?;
        f(change);
        Ok(())
    }

    /// Remove a change entirely.
    pub fn delete(&self, id: ChangeId) -> Option<Change> {
        lock(&self.changes).remove(&id)
    }

    pub fn all(&self) -> Vec<Change> {
        lock(&self.changes).values().cloned().collect()
    }
}

#[async_trait]
impl ChangeStore for MemoryChangeStore {
    async fn get(&self, id: ChangeId) -> StorageResult<Option<Change>> {
        Ok(self.change(id))
    }

    async fn by_commit(
        &self,
        project: &ProjectName,
        commit: &CommitId,
    ) -> StorageResult<Vec<Change>> {
        Ok(lock(&self.changes)
            .values()
            .filter(|c| &c.dest.project == project && c.patch_set_for(commit).is_some())
            .cloned()
            .collect())
    }

    async fn open_by_topic(&self, topic: &str) -> StorageResult<Vec<Change>> {
        Ok(lock(&self.changes)
            .values()
            .filter(|c| c.is_open() && c.topic.as_deref() == Some(topic))
            .cloned()
            .collect())
    }

    async fn mark_merged(
        &self,
        id: ChangeId,
        commit: &CommitId,
        submitter: AccountId,
    ) -> StorageResult<()> {
        self.update(id, |c| {
            c.status = ChangeStatus::Merged;
            c.merged_as = Some(commit.clone());
            c.submitter = Some(submitter);
        })
    }

    async fn reopen(&self, id: ChangeId) -> StorageResult<()> {
        self.update(id, |c| {
            c.status = ChangeStatus::New;
            c.merged_as = None;
            c.submitter = None;
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryVisibility
// ---------------------------------------------------------------------------

/// Visibility policy: private changes are owner-only, hidden branches are
/// readable only by the accounts granted on them.
#[derive(Debug, Default)]
pub struct MemoryVisibility {
    hidden: Mutex<BTreeMap<BranchKey, BTreeSet<AccountId>>>,
}

impl MemoryVisibility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block read on `branch` for everyone except `readers`.
    pub fn hide_branch(&self, branch: BranchKey, readers: impl IntoIterator<Item = AccountId>) {
        lock(&self.hidden).insert(branch, readers.into_iter().collect());
    }

    fn can_read(&self, actor: AccountId, branch: &BranchKey) -> bool {
        match lock(&self.hidden).get(branch) {
            Some(readers) => readers.contains(&actor),
            None => true,
        }
    }
}

#[async_trait]
impl VisibilityOracle for MemoryVisibility {
    async fn is_visible(&self, actor: &Account, change: &Change) -> StorageResult<bool> {
        if change.private && change.owner != actor.id {
            return Ok(false);
        }
        Ok(self.can_read(actor.id, &change.dest))
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub name: ProjectName,
    pub commits: Vec<Commit>,
    /// Fully qualified ref name → tip.
    pub branches: BTreeMap<String, CommitId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiddenBranch {
    pub branch: BranchKey,
    #[serde(default)]
    pub readers: Vec<AccountId>,
}

/// Serializable image of a whole [`MemoryWorld`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldSnapshot {
    #[serde(default)]
    pub projects: Vec<ProjectSnapshot>,
    #[serde(default)]
    pub changes: Vec<Change>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub hidden_branches: Vec<HiddenBranch>,
}

/// All in-memory stores plus the account directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorld {
    pub repos: Arc<MemoryRepoStore>,
    pub changes: Arc<MemoryChangeStore>,
    pub visibility: Arc<MemoryVisibility>,
    pub accounts: BTreeMap<AccountId, Account>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&mut self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn from_snapshot(snapshot: WorldSnapshot) -> Self {
        let world = Self::new();
        {
            let mut projects = lock(&world.repos.projects);
            for p in snapshot.projects {
                let state = ProjectState {
                    commits: p.commits.into_iter().map(|c| (c.id.clone(), c)).collect(),
                    refs: p.branches,
                };
                projects.insert(p.name, state);
            }
        }
        for change in snapshot.changes {
            world.changes.insert(change);
        }
        for hidden in snapshot.hidden_branches {
            world.visibility.hide_branch(hidden.branch, hidden.readers);
        }
        let mut world = world;
        for account in snapshot.accounts {
            world.add_account(account);
        }
        world
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        let projects = lock(&self.repos.projects)
            .iter()
            .map(|(name, state)| {
                let mut commits: Vec<Commit> = state.commits.values().cloned().collect();
                commits.sort_by(|a, b| a.id.cmp(&b.id));
                ProjectSnapshot {
                    name: name.clone(),
                    commits,
                    branches: state.refs.clone(),
                }
            })
            .collect();
        let hidden_branches = lock(&self.visibility.hidden)
            .iter()
            .map(|(branch, readers)| HiddenBranch {
                branch: branch.clone(),
                readers: readers.iter().copied().collect(),
            })
            .collect();
        WorldSnapshot {
            projects,
            changes: self.changes.all(),
            accounts: self.accounts.values().cloned().collect(),
            hidden_branches,
        }
    }

    /// Load a snapshot from a JSON file.
    pub async fn load(path: &Path) -> StorageResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: WorldSnapshot = serde_json::from_slice(&bytes)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write the current state as pretty JSON, replacing `path`.
    pub async fn save(&self, path: &Path) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(&self.snapshot())?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
