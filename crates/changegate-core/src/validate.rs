//! Dependency validator.
//!
//! Every batch change must only depend on commits that are already on a
//! branch, are part of the batch, or are the final patch set of a merged
//! change. Superseded patch sets never satisfy a dependency. The first
//! other ancestor found breadth-first yields one problem for that change.
//! Problems for the whole batch are reported together.

use std::collections::{HashSet, VecDeque};

use changegate_state::{Account, Change, ChangeStatus, ChangeStore, CommitId, VisibilityOracle};
use tracing::debug;

use crate::batch::SubmitBatch;
use crate::error::{Problem, ProblemKind, ProblemReport, Result, SubmitError};
use crate::graph::CommitGraph;

/// Check every change of `batch`, failing with an itemized
/// [`SubmitError::Dependency`] report.
pub async fn validate_batch(
    graph: &mut CommitGraph,
    changes: &dyn ChangeStore,
    visibility: &dyn VisibilityOracle,
    actor: &Account,
    batch: &SubmitBatch,
) -> Result<()> {
    let batch_commits = batch.commits();
    let mut problems = Vec::new();

    for change in batch.changes() {
        if let Some(kind) =
            first_unmet_dependency(graph, changes, visibility, actor, change, &batch_commits).await?
        {
            debug!(change = %change.id, problem = %kind, "unmet dependency");
            problems.push(Problem {
                change: change.id,
                kind,
            });
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(SubmitError::Dependency(ProblemReport::new(batch.len(), problems)))
    }
}

async fn first_unmet_dependency(
    graph: &mut CommitGraph,
    changes: &dyn ChangeStore,
    visibility: &dyn VisibilityOracle,
    actor: &Account,
    change: &Change,
    batch_commits: &HashSet<CommitId>,
) -> Result<Option<ProblemKind>> {
    let Some(own) = change.current_commit() else {
        return Ok(None);
    };
    let project = &change.dest.project;

    let mut seen: HashSet<CommitId> = HashSet::new();
    let mut queue: VecDeque<CommitId> = graph.parents(project, own).await?.into();
    while let Some(walked) = queue.pop_front() {
        if !seen.insert(walked.clone())
            || batch_commits.contains(&walked)
            || graph.is_accepted(project, &walked).await?
        {
            continue;
        }

        let mut owners = changes.by_commit(project, &walked).await?;
        owners.sort_by_key(|c| c.id);
        if owners
            .iter()
            .any(|o| o.status == ChangeStatus::Merged && o.current_commit() == Some(&walked))
        {
            continue;
        }

        let Some(owner) = owners.into_iter().next() else {
            return Ok(Some(ProblemKind::NotVisibleOrDeleted {
                commit: own.clone(),
                depends_on: walked,
            }));
        };
        return Ok(Some(classify(visibility, actor, own, walked, &owner).await?));
    }
    Ok(None)
}

async fn classify(
    visibility: &dyn VisibilityOracle,
    actor: &Account,
    own: &CommitId,
    walked: CommitId,
    owner: &Change,
) -> Result<ProblemKind> {
    if !visibility.is_visible(actor, owner).await? {
        return Ok(ProblemKind::NotVisibleOrDeleted {
            commit: own.clone(),
            depends_on: walked,
        });
    }

    let latest = owner.current_patch_set();
    let outdated = owner
        .patch_set_for(&walked)
        .filter(|ps| latest.is_some_and(|l| l.number != ps.number));
    Ok(match (outdated, latest) {
        (Some(ps), Some(latest)) => ProblemKind::OutdatedPatchSet {
            commit: own.clone(),
            depends_on: walked,
            owner: owner.id,
            patch_set: ps.number,
            latest: latest.number,
        },
        _ => ProblemKind::NotSubmitted {
            commit: own.clone(),
            depends_on: walked,
            owner: owner.id,
        },
    })
}
