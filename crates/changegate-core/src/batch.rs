//! Submission orderer: groups the closure by destination branch and orders
//! each group ancestors-first.
//!
//! Within a branch the order is a stable topological sort over the
//! ancestor relation between current commits (Kahn's algorithm); among
//! independent changes the lower change id (earlier upload) goes first.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use changegate_state::{BranchKey, Change, ChangeId, CommitId, StorageResult};

use crate::graph::CommitGraph;

/// The changes targeting one branch, in integration order.
#[derive(Debug, Clone)]
pub struct BranchSegment {
    pub branch: BranchKey,
    pub changes: Vec<Change>,
    /// Changes whose commits are not ancestors of another commit of this
    /// segment, in segment order.
    pub heads: Vec<ChangeId>,
}

impl BranchSegment {
    pub fn head_changes(&self) -> impl Iterator<Item = &Change> + '_ {
        self.changes.iter().filter(|c| self.heads.contains(&c.id))
    }
}

/// Ordered, per-branch view of one submission. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct SubmitBatch {
    /// Sorted by branch.
    pub segments: Vec<BranchSegment>,
}

impl SubmitBatch {
    /// Number of changes across all branches.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.changes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every change in batch order: branch order, then segment order.
    pub fn changes(&self) -> impl Iterator<Item = &Change> + '_ {
        self.segments.iter().flat_map(|s| s.changes.iter())
    }

    pub fn contains(&self, id: ChangeId) -> bool {
        self.changes().any(|c| c.id == id)
    }

    /// Current commits of every batch change.
    pub fn commits(&self) -> HashSet<CommitId> {
        self.changes()
            .filter_map(|c| c.current_commit().cloned())
            .collect()
    }
}

/// Group `changes` by destination branch and order each group.
pub async fn order_batch(graph: &mut CommitGraph, changes: Vec<Change>) -> StorageResult<SubmitBatch> {
    let mut by_branch: BTreeMap<BranchKey, Vec<Change>> = BTreeMap::new();
    for change in changes {
        by_branch.entry(change.dest.clone()).or_default().push(change);
    }

    let mut segments = Vec::with_capacity(by_branch.len());
    for (branch, members) in by_branch {
        segments.push(order_segment(graph, branch, members).await?);
    }
    Ok(SubmitBatch { segments })
}

async fn order_segment(
    graph: &mut CommitGraph,
    branch: BranchKey,
    members: Vec<Change>,
) -> StorageResult<BranchSegment> {
    let project = branch.project.clone();
    let commits: Vec<(ChangeId, Option<CommitId>)> = members
        .iter()
        .map(|c| (c.id, c.current_commit().cloned()))
        .collect();

    // `ancestor → descendants`
    let mut downstream: HashMap<ChangeId, Vec<ChangeId>> = HashMap::new();
    let mut in_degree: HashMap<ChangeId, usize> = commits.iter().map(|(id, _)| (*id, 0)).collect();

    for (a_id, a_commit) in &commits {
        for (d_id, d_commit) in &commits {
            let (Some(a), Some(d)) = (a_commit, d_commit) else {
                continue;
            };
            // Two changes at one commit have no order between them.
            if a_id == d_id || a == d {
                continue;
            }
            if graph.is_ancestor(&project, a, d).await? {
                downstream.entry(*a_id).or_default().push(*d_id);
                *in_degree.entry(*d_id).or_default() += 1;
            }
        }
    }

    let heads: HashSet<ChangeId> = commits
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| downstream.get(id).map_or(true, Vec::is_empty))
        .collect();

    let mut ready: BTreeSet<ChangeId> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut order: Vec<ChangeId> = Vec::with_capacity(members.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for dependent in downstream.get(&next).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(dependent) {
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    let mut by_id: BTreeMap<ChangeId, Change> = members.into_iter().map(|c| (c.id, c)).collect();
    let mut changes: Vec<Change> = order.iter().filter_map(|id| by_id.remove(id)).collect();
    // A DAG cannot leave anything behind; keep leftovers in id order anyway.
    changes.extend(by_id.into_values());

    let heads = changes
        .iter()
        .map(|c| c.id)
        .filter(|id| heads.contains(id))
        .collect();
    Ok(BranchSegment {
        branch,
        changes,
        heads,
    })
}
