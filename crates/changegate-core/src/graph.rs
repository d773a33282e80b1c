//! Commit DAG view used while planning a submission.
//!
//! A [`CommitGraph`] fronts the [`RepoStore`] for one submit attempt. It
//! caches every commit it reads, snapshots branch tips the first time a
//! project is touched, and keeps an overlay of commits synthesized during
//! planning (merge commits) that do not exist in the store yet.
//!
//! The snapshot tips are the "expected" values of the later ref swaps, so
//! a graph must never be reused across submit attempts.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use changegate_state::{
    BranchKey, Commit, CommitId, NewCommit, ProjectName, RepoStore, StorageError, StorageResult,
};
use tracing::debug;

#[derive(Debug, Default)]
struct ProjectGraph {
    commits: HashMap<CommitId, Commit>,
    tips: Option<Vec<(BranchKey, CommitId)>>,
    /// Every commit reachable from any observed tip.
    accepted: Option<HashSet<CommitId>>,
    /// Commits synthesized during planning, in creation order.
    created: Vec<NewCommit>,
}

/// Per-submission cache and reachability queries over the commit graph.
pub struct CommitGraph {
    repos: Arc<dyn RepoStore>,
    projects: BTreeMap<ProjectName, ProjectGraph>,
}

impl CommitGraph {
    pub fn new(repos: Arc<dyn RepoStore>) -> Self {
        Self {
            repos,
            projects: BTreeMap::new(),
        }
    }

    fn entry(&mut self, project: &ProjectName) -> &mut ProjectGraph {
        self.projects.entry(project.clone()).or_default()
    }

    /// Resolve a commit, from the overlay, the cache or the store.
    pub async fn commit(&mut self, project: &ProjectName, id: &CommitId) -> StorageResult<&Commit> {
        if !self.entry(project).commits.contains_key(id) {
            let commit = self.repos.commit(project, id).await?;
            self.entry(project).commits.insert(id.clone(), commit);
        }
        self.entry(project)
            .commits
            .get(id)
            .ok_or_else(|| StorageError::CommitNotFound {
                project: project.clone(),
                id: id.clone(),
            })
    }

    pub async fn parents(
        &mut self,
        project: &ProjectName,
        id: &CommitId,
    ) -> StorageResult<Vec<CommitId>> {
        Ok(self.commit(project, id).await?.parents.clone())
    }

    /// Branch tips of `project` as first observed by this graph.
    pub async fn tips(&mut self, project: &ProjectName) -> StorageResult<Vec<(BranchKey, CommitId)>> {
        if self.entry(project).tips.is_none() {
            let tips = self.repos.branches(project).await?;
            debug!(project = %project, branches = tips.len(), "observed branch tips");
            self.entry(project).tips = Some(tips);
        }
        Ok(self.entry(project).tips.clone().unwrap_or_default())
    }

    /// Observed tip of `branch`; `None` for an unborn branch.
    pub async fn tip(&mut self, branch: &BranchKey) -> StorageResult<Option<CommitId>> {
        Ok(self
            .tips(&branch.project)
            .await?
            .into_iter()
            .find(|(b, _)| b == branch)
            .map(|(_, tip)| tip))
    }

    /// Whether `id` is already reachable from some branch of its project.
    pub async fn is_accepted(&mut self, project: &ProjectName, id: &CommitId) -> StorageResult<bool> {
        if self.entry(project).accepted.is_none() {
            let starts: Vec<CommitId> = self
                .tips(project)
                .await?
                .into_iter()
                .map(|(_, tip)| tip)
                .collect();
            let mut seen: HashSet<CommitId> = HashSet::new();
            let mut queue: VecDeque<CommitId> = starts.into();
            while let Some(next) = queue.pop_front() {
                if !seen.insert(next.clone()) {
                    continue;
                }
                queue.extend(self.parents(project, &next).await?);
            }
            self.entry(project).accepted = Some(seen);
        }
        Ok(self
            .entry(project)
            .accepted
            .as_ref()
            .is_some_and(|set| set.contains(id)))
    }

    /// Commits reachable from `starts` that no branch contains yet,
    /// breadth-first, nearest first.
    pub async fn unaccepted_ancestry(
        &mut self,
        project: &ProjectName,
        starts: &[CommitId],
    ) -> StorageResult<Vec<CommitId>> {
        let mut seen: HashSet<CommitId> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<CommitId> = starts.iter().cloned().collect();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) || self.is_accepted(project, &next).await? {
                continue;
            }
            queue.extend(self.parents(project, &next).await?);
            order.push(next);
        }
        Ok(order)
    }

    /// Order `commits` so that every commit follows those of its parents
    /// that are also in `commits`.
    pub async fn parents_first(
        &mut self,
        project: &ProjectName,
        commits: &[CommitId],
    ) -> StorageResult<Vec<CommitId>> {
        let members: HashSet<&CommitId> = commits.iter().collect();
        let mut done: HashSet<CommitId> = HashSet::new();
        let mut order = Vec::with_capacity(commits.len());
        for start in commits {
            let mut stack: Vec<(CommitId, bool)> = vec![(start.clone(), false)];
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    if done.insert(id.clone()) {
                        order.push(id);
                    }
                    continue;
                }
                if done.contains(&id) {
                    continue;
                }
                let parents = self.parents(project, &id).await?;
                stack.push((id, true));
                for parent in parents {
                    if members.contains(&parent) && !done.contains(&parent) {
                        stack.push((parent, false));
                    }
                }
            }
        }
        Ok(order)
    }

    /// Whether `ancestor` is reachable from `descendant` (a commit is its
    /// own ancestor).
    pub async fn is_ancestor(
        &mut self,
        project: &ProjectName,
        ancestor: &CommitId,
        descendant: &CommitId,
    ) -> StorageResult<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        // Nothing behind an accepted commit can be unaccepted.
        let prune = !self.is_accepted(project, ancestor).await?;
        let mut seen: HashSet<CommitId> = HashSet::new();
        let mut queue: VecDeque<CommitId> = VecDeque::from([descendant.clone()]);
        while let Some(next) = queue.pop_front() {
            if &next == ancestor {
                return Ok(true);
            }
            if !seen.insert(next.clone()) {
                continue;
            }
            if prune && self.is_accepted(project, &next).await? {
                continue;
            }
            queue.extend(self.parents(project, &next).await?);
        }
        Ok(false)
    }

    /// Nearest common ancestor of `a` and `b`. With criss-cross history the
    /// first candidate found breadth-first from `b` wins.
    pub async fn merge_base(
        &mut self,
        project: &ProjectName,
        a: &CommitId,
        b: &CommitId,
    ) -> StorageResult<Option<CommitId>> {
        let mut from_a: HashSet<CommitId> = HashSet::new();
        let mut queue: VecDeque<CommitId> = VecDeque::from([a.clone()]);
        while let Some(next) = queue.pop_front() {
            if from_a.insert(next.clone()) {
                queue.extend(self.parents(project, &next).await?);
            }
        }

        let mut seen: HashSet<CommitId> = HashSet::new();
        let mut queue: VecDeque<CommitId> = VecDeque::from([b.clone()]);
        while let Some(next) = queue.pop_front() {
            if from_a.contains(&next) {
                return Ok(Some(next));
            }
            if seen.insert(next.clone()) {
                queue.extend(self.parents(project, &next).await?);
            }
        }
        Ok(None)
    }

    /// Add a synthesized commit to the overlay and return its id.
    pub fn add_commit(&mut self, project: &ProjectName, commit: NewCommit) -> CommitId {
        let stored = commit.clone().into_commit();
        let id = stored.id.clone();
        let entry = self.entry(project);
        if !entry.commits.contains_key(&id) {
            entry.commits.insert(id.clone(), stored);
            entry.created.push(commit);
        }
        id
    }

    /// Synthesized commits of every project, in creation order.
    pub fn created_commits(&self) -> BTreeMap<ProjectName, Vec<NewCommit>> {
        self.projects
            .iter()
            .filter(|(_, g)| !g.created.is_empty())
            .map(|(name, g)| (name.clone(), g.created.clone()))
            .collect()
    }
}
