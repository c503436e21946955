//! End-to-end review lifecycle scenarios on the in-memory backend.

use git_review::config::Context;
use git_review::hash::ObjectHash;
use git_review::records::comment::Resolution;
use git_review::refs::archive_ref;
use git_review::repo::mem::MemRepo;
use git_review::repo::{Repo, SubmitStrategy};
use git_review::review::lifecycle::{
    self, CommentArgs, RequestArgs, abandon, comment_on_review, rebase, set_verdict, submit,
};
use git_review::review::{Review, ReviewStatus};

fn ctx(email: &str, secs: u64) -> Context {
    Context::for_user(email).with_fixed_timestamp(secs)
}

/// Start with commit A on master, branch u/x with commit B, and an open
/// review of u/x against master.
fn setup_review() -> (MemRepo, ObjectHash) {
    let repo = MemRepo::new("alice@example.com");
    repo.commit_files("refs/heads/master", "A", &[("README.md", "project\n")])
        .unwrap();
    let a = repo.get_commit_hash("refs/heads/master").unwrap();
    repo.set_ref("refs/heads/u/x", &a, None).unwrap();
    repo.commit_files("refs/heads/u/x", "B", &[("widget.rs", "pub struct Widget;\n")])
        .unwrap();
    repo.switch_to_ref("refs/heads/u/x").unwrap();

    let anchor = lifecycle::request_review(
        &repo,
        &ctx("alice@example.com", 100),
        &RequestArgs {
            reviewers: vec!["bob@example.com".to_string()],
            source: None,
            target: "refs/heads/master".to_string(),
            description: "add widget".to_string(),
            allow_uncommitted: false,
        },
        None,
    )
    .unwrap();
    (repo, anchor)
}

#[test]
fn simple_accept_and_fast_forward_submit() {
    let (repo, anchor) = setup_review();
    let b = repo.get_commit_hash("refs/heads/u/x").unwrap();
    assert_eq!(anchor, b, "the only new commit is the anchor");

    // exactly one request note on B
    let review = Review::get_required(&repo, &anchor).unwrap();
    assert_eq!(review.all_requests.len(), 1);
    assert!(review.open());
    assert!(!review.submitted);
    assert_eq!(review.status, ReviewStatus::Pending);

    set_verdict(&repo, &ctx("bob@example.com", 200), &anchor, true, "lgtm", None).unwrap();
    let review = Review::get_required(&repo, &anchor).unwrap();
    assert!(review.open());
    assert_eq!(review.status, ReviewStatus::Accepted);
    assert!(!review.submitted);

    submit(
        &repo,
        &ctx("alice@example.com", 300),
        &anchor,
        Some(SubmitStrategy::FastForward),
        false,
    )
    .unwrap();
    assert_eq!(repo.get_commit_hash("refs/heads/master").unwrap(), b);

    let review = Review::get_required(&repo, &anchor).unwrap();
    assert_eq!(review.status, ReviewStatus::Accepted);
    assert!(review.submitted);
    assert!(!review.open());
}

#[test]
fn thread_downgrade_keeps_review_pending() {
    let (repo, anchor) = setup_review();

    // root LGTM at t1
    let root = set_verdict(&repo, &ctx("bob@example.com", 201), &anchor, true, "lgtm", None)
        .unwrap();
    // reply needs-work at t2
    let nack = comment_on_review(
        &repo,
        &ctx("carol@example.com", 202),
        &anchor,
        &CommentArgs {
            message: "hold on, missing docs".to_string(),
            parent: Some(root),
            resolved: Resolution::Rejected,
            ..CommentArgs::default()
        },
        None,
    )
    .unwrap();
    // reply's reply LGTM at t3
    comment_on_review(
        &repo,
        &ctx("bob@example.com", 203),
        &anchor,
        &CommentArgs {
            message: "docs added".to_string(),
            parent: Some(nack),
            resolved: Resolution::Accepted,
            ..CommentArgs::default()
        },
        None,
    )
    .unwrap();

    // the root never re-affirmed: the review is pending, not accepted
    let review = Review::get_required(&repo, &anchor).unwrap();
    assert_eq!(review.threads.len(), 1);
    assert_eq!(review.status, ReviewStatus::Pending);

    // and submission is refused without force
    let err = submit(&repo, &ctx("alice@example.com", 300), &anchor, None, false).unwrap_err();
    assert!(matches!(err, git_review::errors::ReviewError::IllegalState(_)));
}

#[test]
fn abandon_hides_review_and_blocks_rebase() {
    let (repo, anchor) = setup_review();
    assert_eq!(Review::list_open(&repo).unwrap().len(), 1);

    abandon(
        &repo,
        &ctx("alice@example.com", 400),
        &anchor,
        Some("superseded by another approach"),
        None,
    )
    .unwrap();

    // a new request with an empty target ref, plus an abandonment comment
    let review = Review::get_required(&repo, &anchor).unwrap();
    assert_eq!(review.all_requests.len(), 2);
    assert!(review.request.abandoned());
    assert!(!review.open());
    assert_eq!(review.comments.len(), 1);

    // list omits it; show still reports it
    assert!(Review::list_open(&repo).unwrap().is_empty());
    assert_eq!(Review::list_all(&repo).unwrap().len(), 1);
    let shown = format!("{review}");
    assert!(shown.contains("abandoned"));

    // rebase now fails with a state error
    let err = rebase(&repo, &ctx("alice@example.com", 500), &anchor, None).unwrap_err();
    assert!(matches!(err, git_review::errors::ReviewError::IllegalState(_)));
}

#[test]
fn rebase_preserves_anchor_and_archives_old_head() {
    let (repo, anchor) = setup_review();

    // the target gains commit F so the review must be rebased
    repo.switch_to_ref("refs/heads/master").unwrap();
    repo.commit_files("refs/heads/master", "F", &[("other.rs", "fn other() {}\n")])
        .unwrap();
    repo.switch_to_ref("refs/heads/u/x").unwrap();

    let g = repo.get_commit_hash("refs/heads/u/x").unwrap();
    let g_prime = rebase(&repo, &ctx("alice@example.com", 600), &anchor, None).unwrap();
    assert_ne!(g, g_prime);

    // the review at the anchor is still the only review
    let reviews = Review::list_all(&repo).unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].revision, anchor);

    // the new head is reachable from the review ref, the old head from the
    // archive ref
    assert_eq!(repo.get_commit_hash("refs/heads/u/x").unwrap(), g_prime);
    let archive_tip = repo
        .get_commit_hash(&archive_ref(&anchor.to_string()))
        .unwrap();
    assert!(repo.is_ancestor(&g, &archive_tip).unwrap());

    // the latest request carries the alias
    assert_eq!(
        reviews[0].request.alias.as_deref(),
        Some(g_prime.to_string().as_str())
    );
}

#[test]
fn merge_submit_records_review_in_merge_commit() {
    let (repo, anchor) = setup_review();
    set_verdict(&repo, &ctx("bob@example.com", 200), &anchor, true, "lgtm", None).unwrap();
    // diverge master so a merge commit is required
    repo.switch_to_ref("refs/heads/master").unwrap();
    repo.commit_files("refs/heads/master", "other", &[("o.rs", "")]).unwrap();
    repo.switch_to_ref("refs/heads/u/x").unwrap();
    // the branch no longer fast-forwards; rebase it first, then merge-submit
    rebase(&repo, &ctx("alice@example.com", 250), &anchor, None).unwrap();
    set_verdict(&repo, &ctx("bob@example.com", 260), &anchor, true, "still lgtm", None).unwrap();

    submit(
        &repo,
        &ctx("alice@example.com", 300),
        &anchor,
        Some(SubmitStrategy::Merge),
        false,
    )
    .unwrap();
    let tip = repo.get_commit_hash("refs/heads/master").unwrap();
    let details = repo.commit_details(&tip).unwrap();
    assert_eq!(details.parents.len(), 2);
    assert!(details.message.contains(&anchor.to_string()));

    let review = Review::get_required(&repo, &anchor).unwrap();
    assert!(review.submitted);
}

#[test]
fn reports_attach_to_the_head_commit() {
    use git_review::refs::CI_REF;
    use git_review::review::lifecycle::{attach_analysis_report, attach_ci_report};

    let (repo, anchor) = setup_review();
    let head = repo.get_commit_hash("refs/heads/u/x").unwrap();

    attach_ci_report(
        &repo,
        &ctx("ci@example.com", 500),
        &anchor,
        "https://ci.example.com/run/1",
        "failure",
    )
    .unwrap();
    attach_ci_report(
        &repo,
        &ctx("ci@example.com", 501),
        &anchor,
        "https://ci.example.com/run/2",
        "success",
    )
    .unwrap();
    attach_analysis_report(
        &repo,
        &ctx("lint@example.com", 502),
        &anchor,
        "https://lint.example.com/1.json",
    )
    .unwrap();

    // the notes landed on the head commit, not the anchor's requests ref
    assert_eq!(repo.get_notes(CI_REF, &head).unwrap().len(), 2);

    let review = Review::get_required(&repo, &anchor).unwrap();
    assert_eq!(review.reports.len(), 2);
    assert_eq!(review.latest_report().unwrap().status, "success");
    assert_eq!(
        review.latest_analysis().unwrap().url,
        "https://lint.example.com/1.json"
    );
}

#[test]
fn signed_records_survive_assembly_and_verify() {
    use git_review::sign::test_signer::EchoSigner;

    let repo = MemRepo::new("alice@example.com");
    repo.commit_files("refs/heads/master", "A", &[]).unwrap();
    let a = repo.get_commit_hash("refs/heads/master").unwrap();
    repo.set_ref("refs/heads/u/x", &a, None).unwrap();
    repo.commit_files("refs/heads/u/x", "B", &[]).unwrap();
    repo.switch_to_ref("refs/heads/u/x").unwrap();

    let signer = EchoSigner;
    let signing_ctx = ctx("alice@example.com", 100).with_signing(true);
    let anchor = lifecycle::request_review(
        &repo,
        &signing_ctx,
        &RequestArgs {
            reviewers: vec![],
            source: None,
            target: "refs/heads/master".to_string(),
            description: "signed request".to_string(),
            allow_uncommitted: false,
        },
        Some(&signer),
    )
    .unwrap();

    let review = Review::get_required(&repo, &anchor).unwrap();
    assert!(review.request.signature.is_some());
    assert!(review.verify_signatures(&signer).unwrap().is_empty());

    // a record signed by someone else's tool fails verification but is
    // still present
    struct OtherSigner;
    impl git_review::sign::Signer for OtherSigner {
        fn sign(&self, _p: &[u8]) -> Result<String, git_review::errors::ReviewError> {
            Ok("other".to_string())
        }
        fn verify(&self, _p: &[u8], _s: &str) -> Result<bool, git_review::errors::ReviewError> {
            Ok(false)
        }
    }
    let failures = review.verify_signatures(&OtherSigner).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(Review::list_all(&repo).unwrap().len(), 1);
}
