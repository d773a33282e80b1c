//! Notification records emitted after a successful submission.
//!
//! These are immutable and never stored by the engine; they are handed to an
//! [`EventSink`](crate::storage_traits::EventSink) and forgotten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{AccountId, BranchKey, ChangeId, CommitId};

/// A branch moved from `old` to `new`. `old` is `None` when the branch was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefUpdatedEvent {
    pub branch: BranchKey,
    pub old: Option<CommitId>,
    pub new: CommitId,
}

/// A change was integrated; `merged_as` is the final tip of its branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMergedEvent {
    pub change: ChangeId,
    pub branch: BranchKey,
    pub merged_as: CommitId,
    pub submitter: AccountId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmitEventKind {
    RefUpdated(RefUpdatedEvent),
    ChangeMerged(ChangeMergedEvent),
}

/// Envelope tying an event to the submission that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEvent {
    pub submission_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: SubmitEventKind,
}

impl SubmitEvent {
    pub fn new(submission_id: Uuid, kind: SubmitEventKind) -> Self {
        Self {
            submission_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Stable event name used in logs.
    pub fn name(&self) -> &'static str {
        match self.kind {
            SubmitEventKind::RefUpdated(_) => "ref-updated",
            SubmitEventKind::ChangeMerged(_) => "change-merged",
        }
    }

    pub fn as_ref_updated(&self) -> Option<&RefUpdatedEvent> {
        match &self.kind {
            SubmitEventKind::RefUpdated(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_change_merged(&self) -> Option<&ChangeMergedEvent> {
        match &self.kind {
            SubmitEventKind::ChangeMerged(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_with_type_tag() {
        let event = SubmitEvent::new(
            Uuid::new_v4(),
            SubmitEventKind::ChangeMerged(ChangeMergedEvent {
                change: ChangeId(3),
                branch: BranchKey::new("p", "master"),
                merged_as: CommitId::from_bytes(b"m"),
                submitter: AccountId(1),
            }),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["type"], "change_merged");
        assert_eq!(event.name(), "change-merged");
        assert!(event.as_ref_updated().is_none());
    }
}
