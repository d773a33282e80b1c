//! Record types shared by the stores and the submission engine.
//!
//! Commits are content-addressed: a [`CommitId`] is the SHA-256 of the
//! canonical JSON encoding of a [`NewCommit`]. Nothing time-dependent is
//! hashed, so the same parents, tree, identities and message always yield
//! the same id.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// Content address of a commit (SHA-256 hex string).
///
/// The inner field is private so the value is always lowercase hex,
/// produced by hashing or validated through `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitId(String);

impl CommitId {
    /// Hash raw bytes into a commit id.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        CommitId(hex::encode(hasher.finalize()))
    }

    /// Full hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form (first 12 hex chars), for logs.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for CommitId {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidCommitId { id: s });
        }
        Ok(CommitId(s.to_ascii_lowercase()))
    }
}

impl From<CommitId> for String {
    fn from(id: CommitId) -> Self {
        id.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name and email of a commit author or committer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonIdent {
    pub name: String,
    pub email: String,
}

impl PersonIdent {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for PersonIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// File tree snapshot: path → file content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree(BTreeMap<String, String>);

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.0.insert(path.into(), content.into());
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.0.insert(path.into(), content.into());
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.0.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything needed to create a commit object; hashing it yields the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCommit {
    pub parents: Vec<CommitId>,
    pub tree: Tree,
    pub author: PersonIdent,
    pub committer: PersonIdent,
    pub message: String,
}

impl NewCommit {
    /// Content address this commit will be stored under.
    pub fn id(&self) -> CommitId {
        // Serializing plain structs and maps to JSON cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        CommitId::from_bytes(&bytes)
    }

    /// Attach the computed id.
    pub fn into_commit(self) -> Commit {
        let id = self.id();
        Commit {
            id,
            parents: self.parents,
            tree: self.tree,
            author: self.author,
            committer: self.committer,
            message: self.message,
        }
    }
}

/// An immutable commit object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub parents: Vec<CommitId>,
    pub tree: Tree,
    pub author: PersonIdent,
    pub committer: PersonIdent,
    pub message: String,
}

impl Commit {
    /// First line of the message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

// ---------------------------------------------------------------------------
// Repositories and branches
// ---------------------------------------------------------------------------

/// Repository (project) name, e.g. `"platform/build"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectName(String);

impl ProjectName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const HEADS_PREFIX: &str = "refs/heads/";

/// A branch inside a project. Branch names are stored fully qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchKey {
    pub project: ProjectName,
    pub branch: String,
}

impl BranchKey {
    /// `branch` may be short (`"master"`) or qualified (`"refs/heads/master"`).
    pub fn new(project: impl Into<String>, branch: &str) -> Self {
        let branch = if branch.starts_with("refs/") {
            branch.to_string()
        } else {
            format!("{HEADS_PREFIX}{branch}")
        };
        Self {
            project: ProjectName::new(project),
            branch,
        }
    }

    /// Branch name without the `refs/heads/` prefix.
    pub fn short_name(&self) -> &str {
        self.branch
            .strip_prefix(HEADS_PREFIX)
            .unwrap_or(&self.branch)
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.branch)
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user acting on the system (submitter, uploader, owner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub ident: PersonIdent,
}

impl Account {
    pub fn new(id: u32, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: AccountId(id),
            ident: PersonIdent::new(name, email),
        }
    }
}

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

/// Numeric change identifier, assigned in upload order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(pub u32);

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    New,
    Merged,
    Abandoned,
}

impl ChangeStatus {
    pub fn is_open(self) -> bool {
        self == ChangeStatus::New
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeStatus::New => "new",
            ChangeStatus::Merged => "merged",
            ChangeStatus::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// One revision of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    pub number: u32,
    pub commit: CommitId,
    pub uploader: AccountId,
}

/// A reviewable unit targeting one destination branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub dest: BranchKey,
    pub owner: AccountId,
    pub status: ChangeStatus,
    #[serde(default)]
    pub topic: Option<String>,
    /// Ordered by ascending patch set number.
    pub patch_sets: Vec<PatchSet>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub submitter: Option<AccountId>,
    #[serde(default)]
    pub merged_as: Option<CommitId>,
}

impl Change {
    /// A new open change with a single patch set.
    pub fn new(id: ChangeId, dest: BranchKey, owner: AccountId, commit: CommitId) -> Self {
        Self {
            id,
            dest,
            owner,
            status: ChangeStatus::New,
            topic: None,
            patch_sets: vec![PatchSet {
                number: 1,
                commit,
                uploader: owner,
            }],
            private: false,
            submitter: None,
            merged_as: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        self.topic = if topic.is_empty() { None } else { Some(topic) };
        self
    }

    /// The patch set with the highest number.
    pub fn current_patch_set(&self) -> Option<&PatchSet> {
        self.patch_sets.iter().max_by_key(|ps| ps.number)
    }

    /// Commit of the current patch set.
    pub fn current_commit(&self) -> Option<&CommitId> {
        self.current_patch_set().map(|ps| &ps.commit)
    }

    /// The patch set (current or outdated) at `commit`, if any.
    pub fn patch_set_for(&self, commit: &CommitId) -> Option<&PatchSet> {
        self.patch_sets.iter().find(|ps| &ps.commit == commit)
    }

    /// Append a new patch set and return its number.
    pub fn add_patch_set(&mut self, commit: CommitId, uploader: AccountId) -> u32 {
        let number = self.current_patch_set().map(|ps| ps.number + 1).unwrap_or(1);
        self.patch_sets.push(PatchSet {
            number,
            commit,
            uploader,
        });
        number
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}
