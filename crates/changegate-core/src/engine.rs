//! The submission engine.
//!
//! Control flow for one request:
//!
//! 1. resolve the requested change and check it is visible and open
//! 2. grow it into its submit closure (same-branch ancestors, topic)
//! 3. order the closure per destination branch
//! 4. validate dependencies (itemized report on failure)
//! 5. resolve every branch to a prospective tip (fast-forward or merge)
//! 6. preview: return the tips; submit: apply all-or-nothing, then publish
//!
//! Steps 1-5 never mutate anything, so preview and submit on unchanged
//! state agree exactly.

use std::collections::BTreeMap;
use std::sync::Arc;

use changegate_state::{
    Account, BranchKey, ChangeId, ChangeStore, CommitId, EventSink, RepoStore, VisibilityOracle,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::archive::{build_archive, PreviewArchive, PreviewFormat, ProjectBundle};
use crate::batch::order_batch;
use crate::closure::submit_closure;
use crate::config::SubmitConfig;
use crate::error::{ProblemReport, Result, SubmitError};
use crate::executor::{apply_plan, SubmitPlan};
use crate::graph::CommitGraph;
use crate::metrics::METRICS;
use crate::obs;
use crate::publisher::publish_submission;
use crate::strategy::{resolve_branch, BranchState};
use crate::validate::validate_batch;

/// Result of a successful submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub submission_id: Uuid,
    /// Branch → new tip, for every branch that moved.
    pub tips: BTreeMap<BranchKey, CommitId>,
    /// Every change marked merged, in batch order.
    pub merged: Vec<ChangeId>,
}

/// Preview result in the requested shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preview {
    Tips(BTreeMap<BranchKey, CommitId>),
    Archive(PreviewArchive),
}

/// Submits changes through the collaborator stores.
pub struct SubmitEngine {
    repos: Arc<dyn RepoStore>,
    changes: Arc<dyn ChangeStore>,
    visibility: Arc<dyn VisibilityOracle>,
    events: Arc<dyn EventSink>,
    config: SubmitConfig,
}

impl SubmitEngine {
    pub fn new(
        repos: Arc<dyn RepoStore>,
        changes: Arc<dyn ChangeStore>,
        visibility: Arc<dyn VisibilityOracle>,
        events: Arc<dyn EventSink>,
        config: SubmitConfig,
    ) -> Self {
        Self {
            repos,
            changes,
            visibility,
            events,
            config,
        }
    }

    pub fn config(&self) -> &SubmitConfig {
        &self.config
    }

    /// Compute the full plan for submitting `change` as `actor`.
    pub async fn plan(&self, change: ChangeId, actor: &Account) -> Result<SubmitPlan> {
        let mut graph = CommitGraph::new(self.repos.clone());
        self.plan_with(&mut graph, Uuid::new_v4(), change, actor).await
    }

    async fn plan_with(
        &self,
        graph: &mut CommitGraph,
        submission_id: Uuid,
        change: ChangeId,
        actor: &Account,
    ) -> Result<SubmitPlan> {
        let requested = self
            .changes
            .get(change)
            .await?
            .ok_or(SubmitError::NotFound { change })?;
        if !self.visibility.is_visible(actor, &requested).await? {
            return Err(SubmitError::NotVisible { change });
        }
        if !requested.is_open() {
            return Err(SubmitError::NotOpen {
                change,
                status: requested.status,
            });
        }

        let members = submit_closure(
            graph,
            self.changes.as_ref(),
            self.visibility.as_ref(),
            actor,
            &requested,
            self.config.submit_whole_topic,
        )
        .await?;
        let batch = order_batch(graph, members).await?;
        obs::emit_closure_computed(batch.len(), batch.segments.len(), self.config.submit_whole_topic);

        validate_batch(
            graph,
            self.changes.as_ref(),
            self.visibility.as_ref(),
            actor,
            &batch,
        )
        .await?;

        let mut branches = Vec::with_capacity(batch.segments.len());
        let mut problems = Vec::new();
        for segment in &batch.segments {
            let plan = resolve_branch(graph, &self.config, actor, segment).await?;
            match plan.problem() {
                Some(problem) => problems.push(problem.clone()),
                None => {
                    let resolution = match &plan.state {
                        BranchState::Resolved(r) => r.as_str(),
                        _ => "idle",
                    };
                    let tip = plan.new_tip.as_ref().map(|t| t.short()).unwrap_or("(none)");
                    obs::emit_branch_resolved(&plan.branch.to_string(), resolution, tip);
                }
            }
            branches.push(plan);
        }
        if !problems.is_empty() {
            return Err(SubmitError::Conflict(ProblemReport::new(batch.len(), problems)));
        }

        Ok(SubmitPlan {
            submission_id,
            requested: change,
            actor: actor.clone(),
            batch,
            branches,
            new_commits: graph.created_commits(),
        })
    }

    /// Integrate `change` and its closure, all-or-nothing.
    pub async fn submit(&self, change: ChangeId, actor: &Account) -> Result<SubmitOutcome> {
        let submission_id = Uuid::new_v4();
        let span = obs::submit_span(&submission_id.to_string(), change.0, false);
        async {
            METRICS.inc_attempted();
            obs::emit_submit_started(change.0, actor.id.0, false);
            match self.submit_inner(submission_id, change, actor).await {
                Ok(outcome) => {
                    METRICS.inc_succeeded();
                    Ok(outcome)
                }
                Err(e) => {
                    METRICS.inc_rejected();
                    obs::emit_submit_rejected(e.kind(), &e);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn submit_inner(
        &self,
        submission_id: Uuid,
        change: ChangeId,
        actor: &Account,
    ) -> Result<SubmitOutcome> {
        let mut graph = CommitGraph::new(self.repos.clone());
        let mut plan = self.plan_with(&mut graph, submission_id, change, actor).await?;
        apply_plan(self.repos.as_ref(), self.changes.as_ref(), &mut plan).await?;

        METRICS.add_fast_forwards(plan.fast_forward_count() as u64);
        METRICS.add_merge_commits(plan.merge_commit_count() as u64);
        obs::emit_submit_applied(plan.prospective_tips().len(), plan.len());

        publish_submission(
            self.events.as_ref(),
            submission_id,
            &plan.branches,
            actor.id,
        )
        .await;

        Ok(SubmitOutcome {
            submission_id,
            tips: plan.prospective_tips(),
            merged: plan.batch.changes().map(|c| c.id).collect(),
        })
    }

    /// Branch → tip map a submit of `change` would produce right now.
    pub async fn preview(
        &self,
        change: ChangeId,
        actor: &Account,
    ) -> Result<BTreeMap<BranchKey, CommitId>> {
        let submission_id = Uuid::new_v4();
        let span = obs::submit_span(&submission_id.to_string(), change.0, true);
        async {
            obs::emit_submit_started(change.0, actor.id.0, true);
            let mut graph = CommitGraph::new(self.repos.clone());
            let plan = self.plan_with(&mut graph, submission_id, change, actor).await?;
            Ok(plan.prospective_tips())
        }
        .instrument(span)
        .await
    }

    /// Archive of every affected project's prospective refs and new commits.
    pub async fn preview_archive(
        &self,
        change: ChangeId,
        actor: &Account,
        format: PreviewFormat,
    ) -> Result<PreviewArchive> {
        let submission_id = Uuid::new_v4();
        let span = obs::submit_span(&submission_id.to_string(), change.0, true);
        async {
            obs::emit_submit_started(change.0, actor.id.0, true);
            let mut graph = CommitGraph::new(self.repos.clone());
            let plan = self.plan_with(&mut graph, submission_id, change, actor).await?;

            let mut bundles = Vec::new();
            for project in plan.affected_projects() {
                let mut bundle = ProjectBundle::new(project.clone());
                let mut new_tips = Vec::new();
                for branch in plan.branches.iter().filter(|b| b.branch.project == project) {
                    if let (true, Some(new)) = (branch.moves_ref(), &branch.new_tip) {
                        bundle.add_ref(&branch.branch, branch.old_tip.clone(), new.clone());
                        new_tips.push(new.clone());
                    }
                }
                let reachable = graph.unaccepted_ancestry(&project, &new_tips).await?;
                for id in graph.parents_first(&project, &reachable).await? {
                    bundle.commits.push(graph.commit(&project, &id).await?.clone());
                }
                bundles.push(bundle);
            }
            build_archive(format, &bundles)
        }
        .instrument(span)
        .await
    }

    /// Preview with an optional archive format name (`"tar"`, `"tgz"`).
    ///
    /// An unknown format is rejected before anything is computed.
    pub async fn preview_as(
        &self,
        change: ChangeId,
        actor: &Account,
        format: Option<&str>,
    ) -> Result<Preview> {
        match format {
            None => Ok(Preview::Tips(self.preview(change, actor).await?)),
            Some(name) => {
                let format: PreviewFormat = name.parse()?;
                Ok(Preview::Archive(
                    self.preview_archive(change, actor, format).await?,
                ))
            }
        }
    }
}
