//! Merge strategy engine: resolves each branch segment to a prospective tip.
//!
//! Each destination branch moves through
//! `Idle → Resolved(..) → Applied` or ends `Aborted`. Resolution happens
//! entirely against the [`CommitGraph`]; synthesized merge commits live in
//! its overlay until the executor writes them.

use std::collections::HashSet;

use changegate_state::{Account, BranchKey, ChangeId, CommitId, NewCommit, Tree};
use tracing::debug;

use crate::batch::BranchSegment;
use crate::config::{SubmitConfig, SubmitStrategy};
use crate::error::{Problem, ProblemKind, Result};
use crate::graph::CommitGraph;
use crate::tree_merge::merge_trees;

/// How a branch reaches its prospective tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every change is already reachable from the tip; the ref stays put.
    AlreadyMerged,
    /// The ref advances to an existing commit.
    FastForward,
    /// At least one merge commit was synthesized.
    Merge,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::AlreadyMerged => "already-merged",
            Resolution::FastForward => "fast-forward",
            Resolution::Merge => "merge",
        }
    }
}

/// Lifecycle of one destination branch within a submission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BranchState {
    #[default]
    Idle,
    Resolved(Resolution),
    Applied,
    Aborted(Problem),
}

impl BranchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Aborted(_))
    }

    /// `Resolved → Applied`; any other state is left unchanged.
    pub fn mark_applied(&mut self) -> bool {
        if matches!(self, Self::Resolved(_)) {
            *self = Self::Applied;
            true
        } else {
            false
        }
    }
}

/// Resolution of one branch segment.
#[derive(Debug, Clone)]
pub struct BranchPlan {
    pub branch: BranchKey,
    pub strategy: SubmitStrategy,
    /// Tip observed while planning; the expected value of the ref swap.
    pub old_tip: Option<CommitId>,
    /// Prospective tip after integration.
    pub new_tip: Option<CommitId>,
    /// Segment changes, in batch order.
    pub changes: Vec<ChangeId>,
    /// Merge commits synthesized for this branch, oldest first.
    pub merges: Vec<CommitId>,
    pub fast_forwards: usize,
    pub state: BranchState,
}

impl BranchPlan {
    fn new(segment: &BranchSegment, strategy: SubmitStrategy, old_tip: Option<CommitId>) -> Self {
        Self {
            branch: segment.branch.clone(),
            strategy,
            new_tip: old_tip.clone(),
            old_tip,
            changes: segment.changes.iter().map(|c| c.id).collect(),
            merges: Vec::new(),
            fast_forwards: 0,
            state: BranchState::Idle,
        }
    }

    /// Whether applying this plan moves the ref.
    pub fn moves_ref(&self) -> bool {
        self.new_tip.is_some() && self.new_tip != self.old_tip
    }

    pub fn problem(&self) -> Option<&Problem> {
        match &self.state {
            BranchState::Aborted(problem) => Some(problem),
            _ => None,
        }
    }

    fn abort(mut self, change: ChangeId, kind: ProblemKind) -> Self {
        debug!(branch = %self.branch, change = %change, problem = %kind, "branch aborted");
        self.state = BranchState::Aborted(Problem { change, kind });
        self
    }
}

/// Resolve `segment` against its branch's observed tip.
///
/// Heads are integrated in segment order. A head already reachable from the
/// running tip is skipped. A chain always yields at most one merge;
/// independent heads each get their own, chained onto the running tip.
/// Feasibility failures come back as an [`BranchState::Aborted`] plan, not
/// as an error.
pub async fn resolve_branch(
    graph: &mut CommitGraph,
    config: &SubmitConfig,
    actor: &Account,
    segment: &BranchSegment,
) -> Result<BranchPlan> {
    let project = segment.branch.project.clone();
    let strategy = config.strategy_for(&project);
    let old_tip = graph.tip(&segment.branch).await?;
    let mut plan = BranchPlan::new(segment, strategy, old_tip);

    let mut integrated: HashSet<ChangeId> = HashSet::new();
    for head_change in segment.head_changes() {
        let Some(commit) = head_change.current_commit().cloned() else {
            continue;
        };

        let Some(running) = plan.new_tip.clone() else {
            // Unborn branch: created by fast-forward under every strategy.
            plan.new_tip = Some(commit);
            plan.fast_forwards += 1;
            continue;
        };

        if graph.is_ancestor(&project, &commit, &running).await? {
            continue;
        }

        let can_fast_forward = graph.is_ancestor(&project, &running, &commit).await?;
        let fast_forward = match strategy {
            SubmitStrategy::FastForwardOnly if !can_fast_forward => {
                return Ok(plan.abort(head_change.id, ProblemKind::FastForwardRequired));
            }
            SubmitStrategy::FastForwardOnly | SubmitStrategy::MergeIfNecessary => can_fast_forward,
            SubmitStrategy::MergeAlways => false,
        };

        // Segment changes this step brings in, for the merge message.
        let mut covered = Vec::new();
        for change in &segment.changes {
            let Some(c) = change.current_commit() else {
                continue;
            };
            if !integrated.contains(&change.id)
                && graph.is_ancestor(&project, c, &commit).await?
                && !graph.is_ancestor(&project, c, &running).await?
            {
                covered.push((change.id, c.clone()));
            }
        }
        integrated.extend(covered.iter().map(|(id, _)| *id));

        if fast_forward {
            plan.new_tip = Some(commit);
            plan.fast_forwards += 1;
            continue;
        }

        let base = graph.merge_base(&project, &running, &commit).await?;
        let base_tree = match &base {
            Some(b) => graph.commit(&project, b).await?.tree.clone(),
            None => Tree::new(),
        };
        let ours = graph.commit(&project, &running).await?.tree.clone();
        let theirs = graph.commit(&project, &commit).await?.tree.clone();
        let tree = match merge_trees(&base_tree, &ours, &theirs) {
            Ok(tree) => tree,
            Err(paths) => {
                return Ok(plan.abort(head_change.id, ProblemKind::PathConflict { paths }));
            }
        };

        let mut subjects = Vec::with_capacity(covered.len());
        for (id, c) in &covered {
            subjects.push((*id, graph.commit(&project, c).await?.subject().to_string()));
        }
        let merge = NewCommit {
            parents: vec![running, commit],
            tree,
            author: actor.ident.clone(),
            committer: config.server_ident.clone(),
            message: merge_message(&subjects),
        };
        let id = graph.add_commit(&project, merge);
        plan.merges.push(id.clone());
        plan.new_tip = Some(id);
    }

    let resolution = if !plan.merges.is_empty() {
        Resolution::Merge
    } else if plan.moves_ref() {
        Resolution::FastForward
    } else {
        Resolution::AlreadyMerged
    };
    plan.state = BranchState::Resolved(resolution);
    Ok(plan)
}

/// `Merge "<subject>"` for one change, otherwise a `Merge changes` header
/// with one subject per line.
pub fn merge_message(changes: &[(ChangeId, String)]) -> String {
    match changes {
        [(_, subject)] => format!("Merge \"{subject}\""),
        _ => {
            let ids: Vec<String> = changes.iter().map(|(id, _)| id.to_string()).collect();
            let mut message = format!("Merge changes {}\n\n* changes:", ids.join(","));
            for (_, subject) in changes {
                message.push_str("\n  ");
                message.push_str(subject);
            }
            message
        }
    }
}
