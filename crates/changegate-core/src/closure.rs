//! Submit closure: the set of changes one submit request pulls in.
//!
//! Starting from the requested change, the closure grows to a fixpoint by
//! two rules:
//!
//! - open changes on the same destination branch that own a commit in the
//!   not-yet-merged ancestry of a member (any patch set, current or not);
//! - with whole-topic submission, every open change sharing a member's
//!   topic, in any project.
//!
//! Ancestors on other branches, or without any change, are not pulled in;
//! the validator reports them instead.

use std::collections::{BTreeMap, HashSet, VecDeque};

use changegate_state::{Account, Change, ChangeId, ChangeStore, VisibilityOracle};
use futures::future::try_join_all;
use tracing::debug;

use crate::error::{Result, SubmitError};
use crate::graph::CommitGraph;

/// Compute the closure of `requested`, in change id order.
///
/// Fails with [`SubmitError::NotVisible`] naming `requested` when any member
/// is hidden from `actor`.
pub async fn submit_closure(
    graph: &mut CommitGraph,
    changes: &dyn ChangeStore,
    visibility: &dyn VisibilityOracle,
    actor: &Account,
    requested: &Change,
    whole_topic: bool,
) -> Result<Vec<Change>> {
    let mut members: BTreeMap<ChangeId, Change> = BTreeMap::new();
    members.insert(requested.id, requested.clone());
    let mut queue: VecDeque<Change> = VecDeque::from([requested.clone()]);
    let mut expanded_topics: HashSet<String> = HashSet::new();

    while let Some(change) = queue.pop_front() {
        let mut found = Vec::new();

        if let Some(commit) = change.current_commit() {
            let project = &change.dest.project;
            let ancestry = graph
                .unaccepted_ancestry(project, std::slice::from_ref(commit))
                .await?;
            for walked in &ancestry {
                for owner in changes.by_commit(project, walked).await? {
                    if owner.is_open() && owner.dest == change.dest {
                        found.push(owner);
                    }
                }
            }
        }

        if whole_topic {
            if let Some(topic) = &change.topic {
                if expanded_topics.insert(topic.clone()) {
                    found.extend(changes.open_by_topic(topic).await?);
                }
            }
        }

        for candidate in found {
            if !members.contains_key(&candidate.id) {
                debug!(change = %candidate.id, via = %change.id, "closure member added");
                members.insert(candidate.id, candidate.clone());
                queue.push_back(candidate);
            }
        }
    }

    let verdicts = try_join_all(members.values().map(|m| visibility.is_visible(actor, m))).await?;
    if let Some((hidden, _)) = members.keys().zip(verdicts).find(|(_, visible)| !visible) {
        debug!(hidden = %hidden, requested = %requested.id, "closure member not visible");
        return Err(SubmitError::NotVisible {
            change: requested.id,
        });
    }

    Ok(members.into_values().collect())
}
