//! changegate-core: the change submission engine
//!
//! Given one requested change, the engine computes the set of changes that
//! must go in with it, checks that every dependency is satisfied, decides per
//! destination branch between fast-forward and a synthesized merge commit,
//! and then either reports the prospective branch tips (preview) or applies
//! every ref update all-or-nothing and publishes events (submit).
//!
//! ## Key Components
//!
//! - `closure`, `batch`: topic expansion, ancestor closure, per-branch ordering
//! - `validate`: itemized dependency problems
//! - `strategy`, `tree_merge`: fast-forward / merge resolution per branch
//! - `executor`, `transaction`: two-phase apply with compensation
//! - `publisher`: post-submit events
//! - `archive`: tar / tgz preview bundles
//! - `engine`: [`SubmitEngine`], tying it all together

pub mod archive;
pub mod batch;
pub mod closure;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod metrics;
pub mod obs;
pub mod publisher;
pub mod strategy;
pub mod telemetry;
pub mod transaction;
pub mod tree_merge;
pub mod validate;

pub use archive::{BundleRef, PreviewArchive, PreviewFormat, ProjectBundle};
pub use batch::{BranchSegment, SubmitBatch};
pub use config::{ConfigError, SubmitConfig, SubmitStrategy};
pub use engine::{Preview, SubmitEngine, SubmitOutcome};
pub use error::{Problem, ProblemKind, ProblemReport, Result, SubmitError};
pub use executor::SubmitPlan;
pub use graph::CommitGraph;
pub use publisher::{BroadcastEventSink, FanoutEventSink, LogEventSink};
pub use strategy::{BranchPlan, BranchState, Resolution};
pub use telemetry::init_tracing;
pub use transaction::{AppliedOp, SubmitTransaction};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
