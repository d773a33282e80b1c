//! Structured observability hooks for the submission lifecycle.
//!
//! This module provides:
//! - A submission-scoped tracing span via [`submit_span`]
//! - Emission functions for key lifecycle events: start, rejection,
//!   branch resolution, apply, rollback
//!
//! Events are emitted at `info!` level unless noted.

use tracing::{info, warn, Span};

/// Span covering one submit or preview call.
///
/// Async callers attach it with [`tracing::Instrument`] so every event of
/// the call carries `submission_id` and `change`:
///
/// ```ignore
/// engine_call().instrument(submit_span(&id.to_string(), 42, false)).await
/// ```
pub fn submit_span(submission_id: &str, change: u32, preview: bool) -> Span {
    tracing::info_span!(
        "changegate.submit",
        submission_id = %submission_id,
        change = change,
        preview = preview
    )
}

/// Submission started for `change` by `actor`.
pub fn emit_submit_started(change: u32, actor: u32, preview: bool) {
    info!(event = "submit.started", change = change, actor = actor, preview = preview);
}

/// Closure computed: `size` changes across `branches` branches.
pub fn emit_closure_computed(size: usize, branches: usize, whole_topic: bool) {
    info!(
        event = "submit.closure",
        size = size,
        branches = branches,
        whole_topic = whole_topic,
    );
}

/// One branch resolved to its prospective tip.
pub fn emit_branch_resolved(branch: &str, resolution: &str, new_tip: &str) {
    info!(event = "submit.branch_resolved", branch = %branch, resolution = %resolution, new_tip = %new_tip);
}

/// Submission rejected before any mutation.
pub fn emit_submit_rejected(kind: &str, error: &dyn std::fmt::Display) {
    info!(event = "submit.rejected", kind = %kind, error = %error);
}

/// Every ref swap and change update applied.
pub fn emit_submit_applied(branches: usize, changes: usize) {
    info!(event = "submit.applied", branches = branches, changes = changes);
}

/// Partially applied submission unwound (warning level).
pub fn emit_rollback(undone: usize, cause: &dyn std::fmt::Display) {
    warn!(event = "submit.rolled_back", undone = undone, cause = %cause);
}
