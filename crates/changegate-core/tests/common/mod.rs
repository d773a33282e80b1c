//! Shared fixture for submission integration tests.
//!
//! Every test gets a fresh in-memory world with two accounts: `admin`, who
//! owns and uploads changes, and `user`, an ordinary account used for
//! visibility checks.

#![allow(dead_code)]

use std::sync::Arc;

use changegate_core::{SubmitConfig, SubmitEngine};
use changegate_state::fakes::RecordingEventSink;
use changegate_state::*;

pub struct Harness {
    pub world: MemoryWorld,
    pub events: Arc<RecordingEventSink>,
    pub admin: Account,
    pub user: Account,
    pub config: SubmitConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SubmitConfig::default())
    }

    pub fn whole_topic(enabled: bool) -> Self {
        Self::with_config(SubmitConfig::default().with_whole_topic(enabled))
    }

    pub fn with_config(config: SubmitConfig) -> Self {
        let mut world = MemoryWorld::new();
        let admin = Account::new(1, "Administrator", "admin@example.com");
        let user = Account::new(2, "User1", "user1@example.com");
        world.add_account(admin.clone());
        world.add_account(user.clone());
        Self {
            world,
            events: Arc::new(RecordingEventSink::new()),
            admin,
            user,
            config,
        }
    }

    pub fn engine(&self) -> SubmitEngine {
        self.engine_with_repos(self.world.repos.clone())
    }

    pub fn engine_with_repos(&self, repos: Arc<dyn RepoStore>) -> SubmitEngine {
        SubmitEngine::new(
            repos,
            self.world.changes.clone(),
            self.world.visibility.clone(),
            self.events.clone(),
            self.config.clone(),
        )
    }

    /// New project with an empty root commit on `master`.
    pub fn project(&self, name: &str) -> CommitId {
        self.world.repos.create_project(name, &self.admin.ident)
    }

    /// Commit on top of `parent`, copying its tree and setting one file.
    pub fn commit(
        &self,
        project: &str,
        parent: &CommitId,
        subject: &str,
        file: &str,
        content: &str,
    ) -> CommitId {
        let project = ProjectName::new(project);
        let mut tree = self
            .world
            .repos
            .get_commit(&project, parent)
            .expect("parent commit")
            .tree;
        tree.insert(file, content);
        self.world
            .repos
            .put_commit(
                &project,
                NewCommit {
                    parents: vec![parent.clone()],
                    tree,
                    author: self.admin.ident.clone(),
                    committer: self.admin.ident.clone(),
                    message: format!("{subject}\n"),
                },
            )
            .expect("commit stored")
            .id
    }

    /// Upload `commit` as a new change for `branch`, owned by admin.
    pub fn upload(&self, project: &str, branch: &str, commit: &CommitId, topic: &str) -> ChangeId {
        let id = self.world.changes.next_id();
        let change = Change::new(
            id,
            BranchKey::new(project, branch),
            self.admin.id,
            commit.clone(),
        )
        .with_topic(topic);
        self.world.changes.insert(change);
        id
    }

    /// Commit plus upload in one step.
    #[allow(clippy::too_many_arguments)]
    pub fn create_change(
        &self,
        project: &str,
        branch: &str,
        parent: &CommitId,
        subject: &str,
        file: &str,
        content: &str,
        topic: &str,
    ) -> (ChangeId, CommitId) {
        let commit = self.commit(project, parent, subject, file, content);
        (self.upload(project, branch, &commit, topic), commit)
    }

    pub fn amend(&self, change: ChangeId, commit: CommitId) {
        let uploader = self.admin.id;
        self.world
            .changes
            .update(change, |c| {
                c.add_patch_set(commit, uploader);
            })
            .expect("change exists");
    }

    pub fn set_private(&self, change: ChangeId) {
        self.world
            .changes
            .update(change, |c| c.private = true)
            .expect("change exists");
    }

    pub fn create_branch(&self, project: &str, branch: &str, at: &CommitId) {
        self.world
            .repos
            .set_branch(&BranchKey::new(project, branch), at.clone())
            .expect("project exists");
    }

    pub fn tip(&self, project: &str, branch: &str) -> CommitId {
        self.world
            .repos
            .tip(&BranchKey::new(project, branch))
            .expect("branch exists")
    }

    pub fn get_commit(&self, project: &str, id: &CommitId) -> Commit {
        self.world
            .repos
            .get_commit(&ProjectName::new(project), id)
            .expect("commit exists")
    }

    pub fn change(&self, id: ChangeId) -> Change {
        self.world.changes.change(id).expect("change exists")
    }

    pub fn assert_new(&self, ids: &[ChangeId]) {
        for id in ids {
            let change = self.change(*id);
            assert_eq!(change.status, ChangeStatus::New, "change {id} should be open");
            assert!(change.submitter.is_none(), "change {id} has a submitter");
        }
    }

    /// `(old, new)` of every ref-updated event, in publish order.
    pub fn ref_updates(&self) -> Vec<(Option<CommitId>, CommitId)> {
        self.events
            .ref_updates()
            .into_iter()
            .map(|e| (e.old, e.new))
            .collect()
    }

    /// `(change, merged_as)` of every change-merged event, in publish order.
    pub fn change_merges(&self) -> Vec<(ChangeId, CommitId)> {
        self.events
            .change_merges()
            .into_iter()
            .map(|e| (e.change, e.merged_as))
            .collect()
    }

    pub fn assert_no_events(&self) {
        assert!(self.events.events().is_empty(), "unexpected events: {:?}", self.events.events());
    }
}

pub fn master(project: &str) -> BranchKey {
    BranchKey::new(project, "master")
}
