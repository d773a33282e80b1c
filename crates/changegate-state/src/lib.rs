//! changegate-state: commit, ref and change storage for changegate
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: content-addressed commits, atomic per-ref compare-and-swap, and
//! change records with their patch set history.
//!
//! ## Key Components
//!
//! - `schema`: `Commit`, `Tree`, `Change`, `PatchSet`, `BranchKey`, ...
//! - `storage_traits`: the collaborator interfaces the engine consumes
//! - `memory`: in-memory backend with JSON snapshot load/save
//! - `fakes`: test doubles (recording sink, interfering ref store)

mod error;
pub mod events;
pub mod fakes;
pub mod memory;
pub mod schema;
pub mod storage_traits;

pub use error::StorageError;
pub use events::{ChangeMergedEvent, RefUpdatedEvent, SubmitEvent, SubmitEventKind};
pub use memory::{
    HiddenBranch, MemoryChangeStore, MemoryRepoStore, MemoryVisibility, MemoryWorld,
    ProjectSnapshot, WorldSnapshot,
};
pub use schema::{
    Account, AccountId, BranchKey, Change, ChangeId, ChangeStatus, Commit, CommitId, NewCommit,
    PatchSet, PersonIdent, ProjectName, Tree,
};
pub use storage_traits::{ChangeStore, EventSink, RepoStore, StorageResult, VisibilityOracle};

/// Result type for changegate-state operations
pub type Result<T> = std::result::Result<T, StorageError>;
