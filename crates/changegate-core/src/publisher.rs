//! Post-submit notifications.
//!
//! [`publish_submission`] turns an applied plan into events: one
//! `RefUpdated` per moved branch (branch order), then one `ChangeMerged` per
//! change (batch order). It is only called once the whole submission has
//! been applied.
//!
//! Sinks shipped here:
//! - [`BroadcastEventSink`]: fans events out to in-process subscribers
//! - [`LogEventSink`]: writes each event as a structured log line
//! - [`FanoutEventSink`]: forwards to several sinks concurrently

use std::sync::Arc;

use async_trait::async_trait;
use changegate_state::{
    AccountId, ChangeMergedEvent, EventSink, RefUpdatedEvent, SubmitEvent, SubmitEventKind,
};
use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::strategy::BranchPlan;

/// Build the events for an applied submission, in publish order.
pub fn submission_events(
    submission_id: Uuid,
    branches: &[BranchPlan],
    submitter: AccountId,
) -> Vec<SubmitEvent> {
    let mut events = Vec::new();
    for plan in branches.iter().filter(|p| p.moves_ref()) {
        if let Some(new) = &plan.new_tip {
            events.push(SubmitEvent::new(
                submission_id,
                SubmitEventKind::RefUpdated(RefUpdatedEvent {
                    branch: plan.branch.clone(),
                    old: plan.old_tip.clone(),
                    new: new.clone(),
                }),
            ));
        }
    }
    for plan in branches {
        let Some(merged_as) = &plan.new_tip else {
            continue;
        };
        for change in &plan.changes {
            events.push(SubmitEvent::new(
                submission_id,
                SubmitEventKind::ChangeMerged(ChangeMergedEvent {
                    change: *change,
                    branch: plan.branch.clone(),
                    merged_as: merged_as.clone(),
                    submitter,
                }),
            ));
        }
    }
    events
}

/// Publish every event of an applied submission to `sink`.
pub async fn publish_submission(
    sink: &dyn EventSink,
    submission_id: Uuid,
    branches: &[BranchPlan],
    submitter: AccountId,
) -> usize {
    let events = submission_events(submission_id, branches, submitter);
    let count = events.len();
    for event in events {
        sink.publish(event).await;
    }
    debug!(submission_id = %submission_id, events = count, "events published");
    count
}

// ---------------------------------------------------------------------------
// BroadcastEventSink
// ---------------------------------------------------------------------------

/// In-process bus. Publishing without subscribers drops the event.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<SubmitEvent>,
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubmitEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: SubmitEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }
}

// ---------------------------------------------------------------------------
// LogEventSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, event: SubmitEvent) {
        match &event.kind {
            SubmitEventKind::RefUpdated(e) => info!(
                event = "ref-updated",
                submission_id = %event.submission_id,
                branch = %e.branch,
                old = %e.old.as_ref().map(|c| c.short()).unwrap_or("(none)"),
                new = %e.new.short(),
            ),
            SubmitEventKind::ChangeMerged(e) => info!(
                event = "change-merged",
                submission_id = %event.submission_id,
                change = %e.change,
                branch = %e.branch,
                merged_as = %e.merged_as.short(),
                submitter = %e.submitter,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// FanoutEventSink
// ---------------------------------------------------------------------------

#[derive(Default, Clone)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl EventSink for FanoutEventSink {
    async fn publish(&self, event: SubmitEvent) {
        join_all(self.sinks.iter().map(|s| s.publish(event.clone()))).await;
    }
}
