//! Submission plan and its all-or-nothing application.
//!
//! A [`SubmitPlan`] is the complete outcome of the compute phase: ordered
//! batch, per-branch resolution and the merge commits to write. Applying it
//! never re-checks feasibility; it only performs the planned writes and
//! unwinds them if any write fails.

use std::collections::BTreeMap;

use changegate_state::{
    Account, BranchKey, ChangeId, ChangeStore, CommitId, NewCommit, ProjectName, RepoStore,
};
use tracing::debug;
use uuid::Uuid;

use crate::batch::SubmitBatch;
use crate::error::Result;
use crate::metrics::METRICS;
use crate::obs;
use crate::strategy::BranchPlan;
use crate::transaction::{AppliedOp, SubmitTransaction};

/// Everything a submission will do, computed without side effects.
#[derive(Debug, Clone)]
pub struct SubmitPlan {
    pub submission_id: Uuid,
    pub requested: ChangeId,
    pub actor: Account,
    pub batch: SubmitBatch,
    /// One plan per destination branch, in branch order.
    pub branches: Vec<BranchPlan>,
    /// Synthesized commits to write before any ref moves.
    pub new_commits: BTreeMap<ProjectName, Vec<NewCommit>>,
}

impl SubmitPlan {
    /// Branch → prospective tip, for every branch that moves.
    pub fn prospective_tips(&self) -> BTreeMap<BranchKey, CommitId> {
        self.branches
            .iter()
            .filter(|p| p.moves_ref())
            .filter_map(|p| p.new_tip.clone().map(|tip| (p.branch.clone(), tip)))
            .collect()
    }

    /// Number of changes in the batch.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Projects with at least one moving branch.
    pub fn affected_projects(&self) -> Vec<ProjectName> {
        let mut projects: Vec<ProjectName> = self
            .branches
            .iter()
            .filter(|p| p.moves_ref())
            .map(|p| p.branch.project.clone())
            .collect();
        projects.dedup();
        projects
    }

    pub fn merge_commit_count(&self) -> usize {
        self.branches.iter().map(|p| p.merges.len()).sum()
    }

    pub fn fast_forward_count(&self) -> usize {
        self.branches.iter().map(|p| p.fast_forwards).sum()
    }
}

/// Apply `plan`: write new commits, swap every moving ref from its observed
/// tip, then mark every change merged as its branch's final tip.
///
/// On failure every applied step is undone before the error is returned.
pub async fn apply_plan(
    repos: &dyn RepoStore,
    changes: &dyn ChangeStore,
    plan: &mut SubmitPlan,
) -> Result<Vec<AppliedOp>> {
    // Unreferenced objects are harmless, so these need no compensation.
    for (project, commits) in &plan.new_commits {
        for commit in commits {
            repos.insert_commit(project, commit.clone()).await?;
        }
    }

    let mut tx = SubmitTransaction::new(repos, changes);
    if let Err(cause) = apply_steps(&mut tx, plan).await {
        let undone = tx.applied().len();
        obs::emit_rollback(undone, &cause);
        METRICS.inc_rollbacks();
        tx.rollback().await?;
        return Err(cause);
    }

    for branch in &mut plan.branches {
        branch.state.mark_applied();
    }
    let log = tx.commit();
    debug!(ops = log.len(), "submission applied");
    Ok(log)
}

async fn apply_steps(tx: &mut SubmitTransaction<'_>, plan: &SubmitPlan) -> Result<()> {
    for branch in plan.branches.iter().filter(|p| p.moves_ref()) {
        if let Some(new) = &branch.new_tip {
            tx.swap_ref(&branch.branch, branch.old_tip.as_ref(), new).await?;
        }
    }
    for branch in &plan.branches {
        let Some(merged_as) = &branch.new_tip else {
            continue;
        };
        for change in &branch.changes {
            tx.mark_merged(*change, merged_as, plan.actor.id).await?;
        }
    }
    Ok(())
}
