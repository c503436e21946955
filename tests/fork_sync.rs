//! Cross-replica synchronization scenarios: owner-filtered fork ingestion
//! and coordination-free note merging between clones.

use std::sync::Arc;

use git_review::config::Context;
use git_review::forks::{Fork, add_fork, ingest, list_forks, remove_fork};
use git_review::records::Record as _;
use git_review::records::comment::Comment;
use git_review::records::log::{parse_sorted, record_order};
use git_review::records::request::Request;
use git_review::refs::{ARCHIVES_PATTERN, COMMENTS_REF, NOTES_PATTERN, REQUESTS_REF};
use git_review::repo::Repo;
use git_review::repo::mem::MemRepo;
use git_review::review::Review;
use git_review::review::lifecycle::{self, RequestArgs};

const FORK_URL: &str = "https://example.com/alice-fork.git";

fn request_line(requester: &str, secs: u64) -> String {
    Request::new(
        &secs.to_string(),
        requester,
        vec![],
        "refs/heads/alice/change",
        "refs/heads/master",
        "change from a fork",
    )
    .to_line()
    .unwrap()
}

/// Scenario: repo R, fork F owned by alice. F carries two Request records
/// at commit C: one requester=alice, one requester=bob (both committed by
/// alice). Only the alice record survives ingestion.
#[test]
fn fork_ownership_filter_end_to_end() {
    let upstream = Arc::new(MemRepo::new("owner@example.com"));
    upstream
        .commit_files("refs/heads/master", "base", &[("README.md", "hi\n")])
        .unwrap();

    let fork_repo = MemRepo::new("alice@example.com");
    fork_repo.link_remote("upstream", &upstream);
    fork_repo
        .fetch("upstream", &["+refs/heads/*:refs/heads/*".to_string()])
        .unwrap();
    let base = fork_repo.get_commit_hash("refs/heads/master").unwrap();
    fork_repo.set_ref("refs/heads/alice/change", &base, None).unwrap();
    let c = fork_repo
        .commit_files("refs/heads/alice/change", "C", &[("f.rs", "fn f() {}\n")])
        .unwrap();

    fork_repo
        .append_note(REQUESTS_REF, &c, &request_line("alice@example.com", 11))
        .unwrap();
    fork_repo
        .append_note(REQUESTS_REF, &c, &request_line("bob@example.com", 12))
        .unwrap();

    upstream.link_remote(FORK_URL, &fork_repo);
    add_fork(
        upstream.as_ref(),
        &Fork::new(
            "alice",
            vec![FORK_URL.to_string()],
            vec!["alice@example.com".to_string()],
            vec!["refs/heads/alice/*".to_string()],
        ),
    )
    .unwrap();

    let registered = list_forks(upstream.as_ref()).unwrap();
    assert_eq!(registered.len(), 1);
    let imported = ingest::ingest_forks(Arc::clone(&upstream), registered).unwrap();
    assert_eq!(imported, 1);

    let requests = parse_sorted::<Request>(&upstream.get_notes(REQUESTS_REF, &c).unwrap());
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].value.requester, "alice@example.com");

    // the imported review is visible upstream as an ordinary open review
    let review = Review::get_required(upstream.as_ref(), &c).unwrap();
    assert!(review.open());

    // removing the fork is the remediation path for a polluted namespace
    remove_fork(upstream.as_ref(), "alice").unwrap();
    assert!(list_forks(upstream.as_ref()).unwrap().is_empty());
}

/// Scenario: two clones append distinct comments at the same commit without
/// syncing, then exchange notes. Both comments survive on both sides, with
/// identical (timestamp, id) ordering.
#[test]
fn concurrent_comment_append_merges_as_union() {
    let origin = MemRepo::new("origin@example.com");
    origin
        .commit_files("refs/heads/master", "base", &[("README.md", "hi\n")])
        .unwrap();
    origin.set_ref(
        "refs/heads/u/x",
        &origin.get_commit_hash("refs/heads/master").unwrap(),
        None,
    ).unwrap();
    origin.commit_files("refs/heads/u/x", "B", &[("w.rs", "\n")]).unwrap();
    origin.switch_to_ref("refs/heads/u/x").unwrap();
    let anchor = lifecycle::request_review(
        &origin,
        &Context::for_user("origin@example.com").with_fixed_timestamp(10),
        &RequestArgs {
            reviewers: vec![],
            source: None,
            target: "refs/heads/master".to_string(),
            description: "shared review".to_string(),
            allow_uncommitted: false,
        },
        None,
    )
    .unwrap();

    // two clones of origin
    let clone_a = MemRepo::new("ann@example.com");
    let clone_b = MemRepo::new("ben@example.com");
    for clone in [&clone_a, &clone_b] {
        clone.link_remote("origin", &origin);
        clone
            .fetch("origin", &["+refs/heads/*:refs/heads/*".to_string()])
            .unwrap();
        clone
            .pull_notes_and_archive("origin", NOTES_PATTERN, ARCHIVES_PATTERN)
            .unwrap();
    }

    // both comment independently
    let ca = Comment::new("21", "ann@example.com", "from clone A");
    clone_a
        .append_note(COMMENTS_REF, &anchor, &ca.to_line().unwrap())
        .unwrap();
    let cb = Comment::new("22", "ben@example.com", "from clone B");
    clone_b
        .append_note(COMMENTS_REF, &anchor, &cb.to_line().unwrap())
        .unwrap();

    // both push to origin, then A pulls from B directly as well
    clone_a
        .push_notes_and_archive("origin", NOTES_PATTERN, ARCHIVES_PATTERN)
        .unwrap();
    clone_b
        .push_notes_and_archive("origin", NOTES_PATTERN, ARCHIVES_PATTERN)
        .unwrap();
    clone_a.link_remote("clone-b", &clone_b);
    clone_a
        .pull_notes_and_archive("clone-b", NOTES_PATTERN, ARCHIVES_PATTERN)
        .unwrap();

    let merged = parse_sorted::<Comment>(&clone_a.get_notes(COMMENTS_REF, &anchor).unwrap());
    assert_eq!(merged.len(), 2);
    assert_ne!(merged[0].id(), merged[1].id());
    assert_eq!(merged[0].value.description, "from clone A");
    assert_eq!(merged[1].value.description, "from clone B");

    // pulling again changes nothing
    clone_a
        .pull_notes_and_archive("clone-b", NOTES_PATTERN, ARCHIVES_PATTERN)
        .unwrap();
    assert_eq!(
        parse_sorted::<Comment>(&clone_a.get_notes(COMMENTS_REF, &anchor).unwrap()).len(),
        2
    );

    // the assembled review sees one thread per comment, in record order
    let review = Review::get_required(&clone_a, &anchor).unwrap();
    assert_eq!(review.threads.len(), 2);
    let mut sorted = review.comments.clone();
    sorted.sort_by(record_order);
    assert_eq!(
        sorted.iter().map(|r| r.id()).collect::<Vec<_>>(),
        review.comments.iter().map(|r| r.id()).collect::<Vec<_>>()
    );
}

/// Notes pulled from a replica that already has local notes union rather
/// than overwrite (the append-then-read superset invariant).
#[test]
fn pull_preserves_local_appends() {
    let origin = MemRepo::new("origin@example.com");
    origin.commit_files("refs/heads/master", "base", &[]).unwrap();
    let c = origin.get_commit_hash("refs/heads/master").unwrap();
    origin
        .append_note(COMMENTS_REF, &c, &Comment::new("1", "o@x", "origin note").to_line().unwrap())
        .unwrap();

    let clone = MemRepo::new("clone@example.com");
    clone.link_remote("origin", &origin);
    clone
        .fetch("origin", &["+refs/heads/*:refs/heads/*".to_string()])
        .unwrap();
    clone
        .append_note(COMMENTS_REF, &c, &Comment::new("2", "c@x", "clone note").to_line().unwrap())
        .unwrap();

    clone
        .pull_notes_and_archive("origin", NOTES_PATTERN, ARCHIVES_PATTERN)
        .unwrap();
    let notes = clone.get_notes(COMMENTS_REF, &c).unwrap();
    assert_eq!(parse_sorted::<Comment>(&notes).len(), 2);
}
