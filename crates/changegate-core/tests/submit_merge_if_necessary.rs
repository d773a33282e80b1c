//! End-to-end submissions under the merge-if-necessary strategy.

mod common;

use changegate_core::{ProblemKind, SubmitError};
use changegate_state::{BranchKey, ChangeId, ChangeStatus};
use common::{master, Harness};

#[tokio::test]
async fn submit_with_fast_forward() {
    let h = Harness::new();
    let root = h.project("p");
    let (change, commit) = h.create_change("p", "master", &root, "Change 1", "a.txt", "content", "");

    let outcome = h.engine().submit(change, &h.admin).await.unwrap();

    assert_eq!(h.tip("p", "master"), commit);
    assert_eq!(outcome.tips.get(&master("p")), Some(&commit));
    assert_eq!(outcome.merged, vec![change]);

    let merged = h.change(change);
    assert_eq!(merged.status, ChangeStatus::Merged);
    assert_eq!(merged.submitter, Some(h.admin.id));
    assert_eq!(merged.merged_as, Some(commit.clone()));

    assert_eq!(h.ref_updates(), vec![(Some(root), commit.clone())]);
    assert_eq!(h.change_merges(), vec![(change, commit)]);
}

#[tokio::test]
async fn submit_multiple_changes() {
    let h = Harness::new();
    let root = h.project("p");
    let (change1, _) = h.create_change("p", "master", &root, "Change 1", "a", "a", "");
    let (change2, c2) = h.create_change("p", "master", &root, "Change 2", "b", "b", "");
    let (change3, c3) = h.create_change("p", "master", &root, "Change 3", "c", "c", "");
    let (change4, c4) = h.create_change("p", "master", &c3, "Change 4", "d", "d", "");
    let (change5, c5) = h.create_change("p", "master", &c4, "Change 5", "e", "e", "");

    // change 2 fast-forwards
    h.engine().submit(change2, &h.admin).await.unwrap();
    assert_eq!(h.tip("p", "master"), c2);

    // change 5 needs a merge and drags 3 and 4 along
    let engine = h.engine();
    let previewed = engine.preview(change5, &h.admin).await.unwrap();
    let outcome = engine.submit(change5, &h.admin).await.unwrap();
    assert_eq!(outcome.tips, previewed);
    assert_eq!(outcome.merged, vec![change3, change4, change5]);

    let tip = h.tip("p", "master");
    let merge = h.get_commit("p", &tip);
    assert_eq!(merge.parents, vec![c2.clone(), c5.clone()]);
    assert_eq!(
        merge.message,
        "Merge changes 3,4,5\n\n* changes:\n  Change 3\n  Change 4\n  Change 5"
    );
    assert_eq!(merge.author, h.admin.ident);
    assert_eq!(merge.committer, h.config.server_ident);
    for path in ["b", "c", "d", "e"] {
        assert!(merge.tree.get(path).is_some(), "{path} missing from merge");
    }
    assert!(merge.tree.get("a").is_none());

    h.assert_new(&[change1]);
    for id in [change3, change4, change5] {
        assert_eq!(h.change(id).merged_as, Some(tip.clone()));
    }

    assert_eq!(
        h.ref_updates(),
        vec![(Some(root), c2.clone()), (Some(c2.clone()), tip.clone())]
    );
    assert_eq!(
        h.change_merges(),
        vec![
            (change2, c2),
            (change3, tip.clone()),
            (change4, tip.clone()),
            (change5, tip),
        ]
    );
}

#[tokio::test]
async fn independent_topic_siblings_merge_in_batch_order() {
    let h = Harness::whole_topic(true);
    let root = h.project("p");
    let (upstream, u) = h.create_change("p", "master", &root, "Upstream", "u.txt", "u", "");
    h.engine().submit(upstream, &h.admin).await.unwrap();
    let (s1, s1_commit) = h.create_change("p", "master", &root, "Sibling 1", "a.txt", "a", "t");
    let (s2, s2_commit) = h.create_change("p", "master", &root, "Sibling 2", "b.txt", "b", "t");

    let engine = h.engine();
    let previewed = engine.preview(s1, &h.admin).await.unwrap();
    let outcome = engine.submit(s1, &h.admin).await.unwrap();
    assert_eq!(outcome.tips, previewed);
    assert_eq!(outcome.merged, vec![s1, s2]);

    // one merge per independent head, chained onto the running tip
    let tip = h.tip("p", "master");
    let second = h.get_commit("p", &tip);
    assert_eq!(second.parents.len(), 2);
    assert_eq!(second.parents[1], s2_commit);
    assert_eq!(second.message, "Merge \"Sibling 2\"");
    let first = h.get_commit("p", &second.parents[0]);
    assert_eq!(first.parents, vec![u.clone(), s1_commit]);
    assert_eq!(first.message, "Merge \"Sibling 1\"");
    for path in ["u.txt", "a.txt", "b.txt"] {
        assert!(second.tree.get(path).is_some(), "{path} missing from merge");
    }

    assert_eq!(
        h.ref_updates(),
        vec![(Some(root), u.clone()), (Some(u.clone()), tip.clone())]
    );
    assert_eq!(
        h.change_merges(),
        vec![(upstream, u), (s1, tip.clone()), (s2, tip)]
    );
}

#[tokio::test]
async fn single_change_merge_quotes_subject() {
    let h = Harness::new();
    let root = h.project("p");
    let (first, c1) = h.create_change("p", "master", &root, "First", "a.txt", "a", "");
    let (second, c2) = h.create_change("p", "master", &root, "Second", "b.txt", "b", "");
    h.engine().submit(first, &h.admin).await.unwrap();
    h.engine().submit(second, &h.user).await.unwrap();

    let merge = h.get_commit("p", &h.tip("p", "master"));
    assert_eq!(merge.parents, vec![c1, c2]);
    assert_eq!(merge.message, "Merge \"Second\"");
    assert_eq!(merge.author, h.user.ident);
}

/// Three projects linked by topic:
///
/// - p1: 1a (dependent-topic) ← 1b (topic-to-submit)
/// - p2: 2a (topic-indirect) ← 2b (dependent-topic)
/// - p3: 3 (topic-indirect)
struct AcrossRepos {
    h: Harness,
    ids: [ChangeId; 5],
    commits: [changegate_state::CommitId; 5],
}

fn across_repos(whole_topic: bool) -> AcrossRepos {
    let h = Harness::whole_topic(whole_topic);
    let r1 = h.project("p1");
    let r2 = h.project("p2");
    let r3 = h.project("p3");
    let (id1a, c1a) = h.create_change("p1", "master", &r1, "Change 1a", "a.txt", "1", "dependent-topic");
    let (id1b, c1b) = h.create_change("p1", "master", &c1a, "Change 1b", "a.txt", "2", "topic-to-submit");
    let (id2a, c2a) = h.create_change("p2", "master", &r2, "Change 2a", "b.txt", "1", "topic-indirect");
    let (id2b, c2b) = h.create_change("p2", "master", &c2a, "Change 2b", "b.txt", "2", "dependent-topic");
    let (id3, c3) = h.create_change("p3", "master", &r3, "Change 3", "a.txt", "1", "topic-indirect");
    AcrossRepos {
        h,
        ids: [id1a, id1b, id2a, id2b, id3],
        commits: [c1a, c1b, c2a, c2b, c3],
    }
}

#[tokio::test]
async fn submit_changes_across_repos_with_whole_topic() {
    let AcrossRepos { h, ids, commits } = across_repos(true);
    let [_, c1b, _, c2b, c3] = commits;
    let engine = h.engine();

    let preview = engine.preview(ids[1], &h.admin).await.unwrap();
    assert_eq!(preview.len(), 3);
    assert_eq!(preview[&master("p1")], c1b);
    assert_eq!(preview[&master("p2")], c2b);
    assert_eq!(preview[&master("p3")], c3);

    let outcome = engine.submit(ids[1], &h.admin).await.unwrap();
    assert_eq!(outcome.tips, preview);
    assert_eq!(h.tip("p1", "master"), c1b);
    assert_eq!(h.tip("p2", "master"), c2b);
    assert_eq!(h.tip("p3", "master"), c3);
    for id in ids {
        assert_eq!(h.change(id).status, ChangeStatus::Merged);
    }
    assert_eq!(h.ref_updates().len(), 3);
    assert_eq!(h.change_merges().len(), 5);
}

#[tokio::test]
async fn submit_changes_across_repos_without_whole_topic() {
    let AcrossRepos { h, ids, commits } = across_repos(false);
    let engine = h.engine();

    let preview = engine.preview(ids[1], &h.admin).await.unwrap();
    assert_eq!(preview.len(), 1);
    assert_eq!(preview[&master("p1")], commits[1]);

    engine.submit(ids[1], &h.admin).await.unwrap();
    assert_eq!(h.tip("p1", "master"), commits[1]);
    assert_eq!(h.change(ids[0]).status, ChangeStatus::Merged);
    h.assert_new(&ids[2..]);
}

#[tokio::test]
async fn submit_changes_across_repos_blocked() {
    let AcrossRepos { h, ids, .. } = across_repos(true);
    let r3 = h.tip("p3", "master");
    let (conflicting, _) =
        h.create_change("p3", "master", &r3, "some-subject", "a.txt", "2\n2", "conflicting-topic");
    h.engine().submit(conflicting, &h.admin).await.unwrap();
    h.events.clear();

    let tips_before: Vec<_> = ["p1", "p2", "p3"].iter().map(|p| h.tip(p, "master")).collect();
    let engine = h.engine();

    let err = engine.preview(ids[1], &h.admin).await.unwrap_err();
    let expected = format!(
        "Failed to submit 5 changes due to the following problems:\nChange {}: Change could not \
         be merged due to a path conflict. Please rebase the change locally and upload the \
         rebased commit for review.",
        ids[4]
    );
    assert_eq!(err.to_string(), expected);

    let err = engine.submit(ids[1], &h.admin).await.unwrap_err();
    assert!(matches!(err, SubmitError::Conflict(_)));
    assert_eq!(err.to_string(), expected);
    let report = err.report().unwrap();
    assert!(matches!(
        &report.problems[0].kind,
        ProblemKind::PathConflict { paths } if paths == &vec!["a.txt".to_string()]
    ));

    let tips_after: Vec<_> = ["p1", "p2", "p3"].iter().map(|p| h.tip(p, "master")).collect();
    assert_eq!(tips_before, tips_after);
    h.assert_new(&ids);
    h.assert_no_events();
}

#[tokio::test]
async fn submit_changes_across_repos_blocked_without_whole_topic() {
    let AcrossRepos { h, ids, commits } = across_repos(false);
    let r3 = h.tip("p3", "master");
    let (conflicting, _) =
        h.create_change("p3", "master", &r3, "some-subject", "a.txt", "2\n2", "conflicting-topic");
    h.engine().submit(conflicting, &h.admin).await.unwrap();

    let preview = h.engine().preview(ids[1], &h.admin).await.unwrap();
    assert_eq!(preview.len(), 1);
    h.engine().submit(ids[1], &h.admin).await.unwrap();
    assert_eq!(h.tip("p1", "master"), commits[1]);
}

#[tokio::test]
async fn dependency_on_merged_change_on_other_branch() {
    let h = Harness::new();
    let root = h.project("p");
    let (change1, c1) = h.create_change("p", "master", &root, "first change", "a.txt", "1", "");
    h.engine().submit(change1, &h.admin).await.unwrap();
    h.create_branch("p", "branch", &c1);

    let (change2, c2) = h.create_change("p", "master", &c1, "second change", "b.txt", "2", "");
    h.engine().submit(change2, &h.admin).await.unwrap();

    let (change3, c3) = h.create_change("p", "branch", &c2, "third change", "c.txt", "3", "");
    let outcome = h.engine().submit(change3, &h.admin).await.unwrap();

    assert_eq!(outcome.merged, vec![change3]);
    assert_eq!(h.tip("p", "branch"), c3);
    assert_eq!(h.get_commit("p", &c3).parents, vec![c2.clone()]);
    assert_eq!(h.tip("p", "master"), c2);
}

#[tokio::test]
async fn dependency_on_open_change_on_other_branch() {
    for (whole_topic, count) in [(true, 2), (false, 1)] {
        let h = Harness::whole_topic(whole_topic);
        let root = h.project("p");
        let r3 = h.project("p3");
        let (change1, c1) = h.create_change("p", "master", &root, "first change", "a.txt", "1", "");
        h.engine().submit(change1, &h.admin).await.unwrap();
        h.create_branch("p", "branch", &c1);

        let (change2, c2) = h.create_change("p", "master", &c1, "second change", "b.txt", "2", "");
        let (change3a, c3a) =
            h.create_change("p", "branch", &c2, "third change", "c.txt", "3", "a-topic-here");
        let (change3b, _) =
            h.create_change("p3", "master", &r3, "third change", "c.txt", "3", "a-topic-here");

        let err = h.engine().submit(change3a, &h.admin).await.unwrap_err();
        let noun = if count == 1 { "change" } else { "changes" };
        assert_eq!(
            err.to_string(),
            format!(
                "Failed to submit {count} {noun} due to the following problems:\nChange {change3a}: \
                 Depends on change that was not submitted. Commit {c3a} depends on commit {c2} of \
                 change {change2} which cannot be merged."
            )
        );
        assert!(matches!(err, SubmitError::Dependency(_)));
        h.assert_new(&[change2, change3a, change3b]);
    }
}

#[tokio::test]
async fn dependency_on_outdated_patch_set() {
    let h = Harness::new();
    let root = h.project("p");
    let (change1, c1) = h.create_change("p", "master", &root, "Change 1", "a.txt", "foo", "");
    let (change2, c2) = h.create_change("p", "master", &c1, "Change 2", "b.txt", "bar", "");
    let amended = h.commit("p", &root, "Change 1 amended", "a.txt", "foo");
    h.amend(change1, amended);

    let err = h.engine().submit(change2, &h.admin).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "Failed to submit 2 changes due to the following problems:\nChange {change2}: Depends \
             on change that was not submitted. Commit {c2} depends on commit {c1}, which is \
             outdated patch set 1 of change {change1}. The latest patch set is 2."
        )
    );
    h.assert_new(&[change1, change2]);
}

#[tokio::test]
async fn dependency_on_superseded_patch_set_of_merged_change() {
    let h = Harness::new();
    let root = h.project("p");
    let (change1, c1) = h.create_change("p", "master", &root, "Change 1", "a.txt", "foo", "");
    let (change2, c2) = h.create_change("p", "master", &c1, "Change 2", "b.txt", "bar", "");
    let amended = h.commit("p", &root, "Change 1 amended", "c.txt", "baz");
    h.amend(change1, amended.clone());
    h.engine().submit(change1, &h.admin).await.unwrap();
    assert_eq!(h.tip("p", "master"), amended);

    let err = h.engine().submit(change2, &h.admin).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "Failed to submit 1 change due to the following problems:\nChange {change2}: Depends \
             on change that was not submitted. Commit {c2} depends on commit {c1}, which is \
             outdated patch set 1 of change {change1}. The latest patch set is 2."
        )
    );
    assert_eq!(h.tip("p", "master"), amended);
    assert_eq!(h.get_commit("p", &amended).tree.get("a.txt"), None);
    h.assert_new(&[change2]);
}

#[tokio::test]
async fn dependency_on_deleted_change() {
    let h = Harness::new();
    let root = h.project("p");
    let (change1, c1) = h.create_change("p", "master", &root, "Change 1", "a.txt", "foo", "");
    let (change2, c2) = h.create_change("p", "master", &c1, "Change 2", "b.txt", "bar", "");
    h.world.changes.delete(change1);

    let err = h.engine().submit(change2, &h.admin).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "Failed to submit 1 change due to the following problems:\nChange {change2}: Depends \
             on change that was not submitted. Commit {c2} depends on commit {c1} which cannot \
             be merged. Is the change of this commit not visible or was it deleted?"
        )
    );
    h.assert_new(&[change2]);
}

#[tokio::test]
async fn dependency_on_change_in_hidden_branch() {
    let h = Harness::new();
    let root = h.project("p");
    h.create_branch("p", "secretBranch", &root);
    h.world
        .visibility
        .hide_branch(BranchKey::new("p", "secretBranch"), [h.admin.id]);

    let (change1, c1) = h.create_change("p", "secretBranch", &root, "Change 1", "a.txt", "a", "");
    let (change2, c2) = h.create_change("p", "master", &c1, "Change 2", "b.txt", "b", "");

    let err = h.engine().submit(change2, &h.user).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "Failed to submit 1 change due to the following problems:\nChange {change2}: Depends \
             on change that was not submitted. Commit {c2} depends on commit {c1} which cannot \
             be merged. Is the change of this commit not visible or was it deleted?"
        )
    );

    // admin can see change 1, which is simply not part of the batch
    let err = h.engine().submit(change2, &h.admin).await.unwrap_err();
    assert!(err.to_string().contains(&format!("of change {change1} which cannot be merged.")));
    h.assert_new(&[change1, change2]);
}

#[tokio::test]
async fn private_ancestor_hides_whole_submission() {
    let h = Harness::new();
    let root = h.project("p");
    let (change1, c1) = h.create_change("p", "master", &root, "Change 1", "a.txt", "a", "");
    let (change2, _) = h.create_change("p", "master", &c1, "Change 2", "b.txt", "b", "");
    h.set_private(change1);

    let err = h.engine().submit(change2, &h.user).await.unwrap_err();
    assert!(matches!(err, SubmitError::NotVisible { change } if change == change2));
    assert_eq!(
        err.to_string(),
        format!("A change to be submitted with {change2} is not visible")
    );
    let err = h.engine().preview(change2, &h.user).await.unwrap_err();
    assert!(matches!(err, SubmitError::NotVisible { .. }));
    h.assert_new(&[change1, change2]);
    h.assert_no_events();
}

#[tokio::test]
async fn private_topic_member_hides_whole_submission() {
    let h = Harness::whole_topic(true);
    let r1 = h.project("p1");
    let r2 = h.project("p2");
    let (change1, _) = h.create_change("p1", "master", &r1, "Change 1", "a.txt", "a", "topic-to-submit");
    let (change2a, c2a) = h.create_change("p2", "master", &r2, "Change 2a", "b.txt", "b", "");
    let (change2b, _) =
        h.create_change("p2", "master", &c2a, "Change 2b", "c.txt", "c", "topic-to-submit");
    h.set_private(change2a);

    let err = h.engine().submit(change1, &h.user).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("A change to be submitted with {change1} is not visible")
    );
    h.assert_new(&[change1, change2a, change2b]);
}

#[tokio::test]
async fn merge_commit_change_fast_forwards() {
    let h = Harness::new();
    let root = h.project("p");
    let (change1, c1) = h.create_change("p", "master", &root, "master work", "a.txt", "a", "");
    h.engine().submit(change1, &h.admin).await.unwrap();
    h.create_branch("p", "stable", &root);
    let (fix, c_fix) = h.create_change("p", "stable", &root, "stable fix", "b.txt", "b", "");
    h.engine().submit(fix, &h.admin).await.unwrap();

    // hand-made merge of stable into master, uploaded for review
    let mut tree = h.get_commit("p", &c1).tree;
    tree.insert("b.txt", "b");
    let merge = h
        .world
        .repos
        .put_commit(
            &changegate_state::ProjectName::new("p"),
            changegate_state::NewCommit {
                parents: vec![c1.clone(), c_fix.clone()],
                tree,
                author: h.admin.ident.clone(),
                committer: h.admin.ident.clone(),
                message: "Merge stable\n".to_string(),
            },
        )
        .unwrap()
        .id;
    let change = h.upload("p", "master", &merge, "");

    h.engine().submit(change, &h.admin).await.unwrap();
    assert_eq!(h.tip("p", "master"), merge);
}

#[tokio::test]
async fn submit_rejects_missing_and_closed_changes() {
    let h = Harness::new();
    let root = h.project("p");
    let (change, _) = h.create_change("p", "master", &root, "Change 1", "a.txt", "a", "");

    let err = h.engine().submit(ChangeId(99), &h.admin).await.unwrap_err();
    assert_eq!(err.to_string(), "Not found: 99");

    h.engine().submit(change, &h.admin).await.unwrap();
    let err = h.engine().submit(change, &h.admin).await.unwrap_err();
    assert!(matches!(
        err,
        SubmitError::NotOpen { status: ChangeStatus::Merged, .. }
    ));
}
