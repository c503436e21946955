//! Cross-fork ingestion: fetch a fork's metadata and import only the
//! records its owners are trusted to author.
//!
//! The ownership check is the trust boundary. An abusive fork owner cannot
//! forge records as another user, because records attributed to anyone who
//! is not an owner of the fork are filtered out; a fork can only pollute its
//! own namespace, which is remediated by removing it from the registry.
//!
//! Each fork's fetched notes land in per-fork staging refs; a *filtered*
//! merge copies the records that pass the stream's filter into a per-fork
//! filtered ref and then writes a merge commit whose parents are the
//! previous filtered tip and the fork's notes tip. The ancestry of that
//! merge commit is what makes re-ingestion a no-op.

use std::sync::Arc;
use std::sync::mpsc;

use threadpool::ThreadPool;

use crate::errors::ReviewError;
use crate::forks::Fork;
use crate::hash::ObjectHash;
use crate::records::Record as _;
use crate::records::comment::Comment;
use crate::records::log::missing_lines;
use crate::records::request::Request;
use crate::refs::{COMMENTS_REF, REQUESTS_REF, filtered_fork_ref, fork_staging_ref};
use crate::repo::{Repo, merge_notes};

/// Verdict of a stream filter for one candidate record.
fn accepts_request(repo: &dyn Repo, fork: &Fork, anchor: &ObjectHash, line: &str) -> bool {
    // The anchor must exist locally and have been committed by an owner.
    if !repo.has_commit(anchor).unwrap_or(false) {
        return false;
    }
    let Ok(details) = repo.commit_details(anchor) else {
        return false;
    };
    if !fork.is_owner(&details.committer_email) {
        return false;
    }
    let Ok(request) = Request::parse(line) else {
        return false;
    };
    fork.is_owner(&request.requester)
}

fn accepts_comment(repo: &dyn Repo, fork: &Fork, anchor: &ObjectHash, line: &str) -> bool {
    if !repo.has_commit(anchor).unwrap_or(false) {
        return false;
    }
    let Ok(comment) = Comment::parse(line) else {
        return false;
    };
    // Comment edits from forks are out of scope.
    if comment.is_edit() {
        return false;
    }
    if !fork.is_owner(&comment.author) {
        return false;
    }
    // A located comment must be satisfiable against the local repository.
    if let Some(location) = &comment.location {
        if location.commit.is_empty() {
            return true;
        }
        let Ok(commit) = location.commit.parse::<ObjectHash>() else {
            return false;
        };
        if !repo.has_commit(&commit).unwrap_or(false) {
            return false;
        }
        if let Some(path) = &location.path {
            let Ok(Some(content)) = repo.read_file_at(&commit, path) else {
                return false;
            };
            if let Some(range) = &location.range
                && range.start_line > 0
            {
                let lines = content.iter().filter(|b| **b == b'\n').count() as u32
                    + u32::from(!content.ends_with(b"\n") && !content.is_empty());
                if range.start_line > lines {
                    return false;
                }
            }
        }
    }
    true
}

/// Run one filtered merge: from the fork's fetched notes ref into the
/// per-fork filtered ref for `canonical_ref`.
fn filtered_merge<F>(
    repo: &dyn Repo,
    fork: &Fork,
    canonical_ref: &str,
    filter: F,
) -> Result<usize, ReviewError>
where
    F: Fn(&dyn Repo, &Fork, &ObjectHash, &str) -> bool,
{
    let source_ref = fork_staging_ref(&fork.name, canonical_ref);
    let dest_ref = filtered_fork_ref(&fork.name, canonical_ref);
    if !repo.has_ref(&source_ref)? {
        return Ok(0);
    }
    let source_tip = repo.get_commit_hash(&source_ref)?;
    if repo.has_ref(&dest_ref)? {
        let dest_tip = repo.get_commit_hash(&dest_ref)?;
        if repo.is_ancestor(&source_tip, &dest_tip)? {
            // Everything the fork advertises has been ingested already.
            return Ok(0);
        }
    }

    let source_notes = repo.get_all_notes(&source_ref)?;
    let dest_notes = repo.get_all_notes(&dest_ref)?;
    let mut imported = 0;
    for (anchor, lines) in source_notes {
        let empty = Vec::new();
        let existing = dest_notes.get(&anchor).unwrap_or(&empty);
        for line in missing_lines(&lines, existing) {
            if filter(repo, fork, &anchor, &line) {
                repo.append_note(&dest_ref, &anchor, &line)?;
                imported += 1;
            } else {
                tracing::debug!(fork = %fork.name, anchor = %anchor, "filtered out fork record");
            }
        }
    }

    // Record the ingestion point so the next pull can skip by ancestry.
    repo.join_ref_history(
        &dest_ref,
        &source_tip,
        &format!("ingest {} from fork {}", canonical_ref, fork.name),
    )?;
    Ok(imported)
}

/// Fetch one fork from each of its URLs and run the filtered merges.
/// Returns the number of records imported into the filtered refs.
pub fn ingest_fork(repo: &dyn Repo, fork: &Fork) -> Result<usize, ReviewError> {
    let mut refspecs = Vec::new();
    for pattern in &fork.refs {
        refspecs.push(format!(
            "+{pattern}:{}",
            fork_staging_ref(&fork.name, pattern)
        ));
    }
    refspecs.push(format!(
        "+refs/notes/devtools/*:{}",
        fork_staging_ref(&fork.name, "refs/notes/devtools/*")
    ));

    let mut imported = 0;
    for url in &fork.urls {
        let before = repo.state_hash()?;
        if let Err(e) = repo.fetch(url, &refspecs) {
            tracing::warn!(fork = %fork.name, url = %url, error = %e, "fork fetch failed");
            continue;
        }
        if repo.state_hash()? == before {
            tracing::debug!(fork = %fork.name, url = %url, "nothing fetched; skipping");
            continue;
        }
        imported += filtered_merge(repo, fork, REQUESTS_REF, accepts_request)?;
        imported += filtered_merge(repo, fork, COMMENTS_REF, accepts_comment)?;
    }
    Ok(imported)
}

/// Merge every fork's filtered refs into the canonical notes refs.
pub fn merge_filtered_into_canonical(
    repo: &dyn Repo,
    forks: &[Fork],
) -> Result<(), ReviewError> {
    for fork in forks {
        for canonical in [REQUESTS_REF, COMMENTS_REF] {
            let filtered = filtered_fork_ref(&fork.name, canonical);
            if repo.has_ref(&filtered)? {
                merge_notes(repo, &filtered, canonical)?;
            }
        }
    }
    Ok(())
}

/// Ingest every registered fork, bounded-concurrently, then fold the
/// filtered refs into the canonical notes refs.
///
/// A failing fork is logged and skipped; one bad mirror must not block the
/// rest of a pull. Per-fork ordering is preserved by running both of a
/// fork's streams on the same job.
pub fn ingest_forks<R>(repo: Arc<R>, forks: Vec<Fork>) -> Result<usize, ReviewError>
where
    R: Repo + Send + Sync + 'static,
{
    if forks.is_empty() {
        return Ok(0);
    }
    let workers = forks.len().min(num_cpus::get()).max(1);
    let pool = ThreadPool::new(workers);
    let (tx, rx) = mpsc::channel();
    for fork in forks.clone() {
        let repo = Arc::clone(&repo);
        let tx = tx.clone();
        pool.execute(move || {
            let outcome = ingest_fork(repo.as_ref(), &fork);
            if let Err(e) = &outcome {
                tracing::warn!(fork = %fork.name, error = %e, "fork ingestion failed");
            }
            // The receiver outlives the pool; a send failure means the
            // caller is gone and there is nobody to report to.
            let _ = tx.send(outcome.unwrap_or(0));
        });
    }
    drop(tx);
    let imported = rx.iter().sum();
    pool.join();

    merge_filtered_into_canonical(repo.as_ref(), &forks)?;
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Context;
    use crate::records::log::parse_sorted;
    use crate::repo::mem::MemRepo;
    use crate::review::Review;
    use crate::review::lifecycle::{self, RequestArgs};

    const FORK_URL: &str = "https://example.com/alice.git";

    /// An upstream repo, and alice's fork of it with one extra commit.
    fn setup() -> (Arc<MemRepo>, MemRepo, Fork, ObjectHash) {
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
        let anchor = fork_repo
            .commit_files("refs/heads/alice/change", "change", &[("f.rs", "fn f() {}\n")])
            .unwrap();

        // the upstream needs the fork's objects to validate anchors
        upstream.link_remote(FORK_URL, &fork_repo);

        let fork = Fork::new(
            "alice",
            vec![FORK_URL.to_string()],
            vec!["alice@example.com".to_string()],
            vec!["refs/heads/alice/*".to_string()],
        );
        (upstream, fork_repo, fork, anchor)
    }

    fn request_line(ctx: &Context, requester: &str) -> String {
        use crate::records::Record as _;
        let mut request = Request::new(
            &ctx.timestamp(),
            requester,
            vec![],
            "refs/heads/alice/change",
            "refs/heads/master",
            "please take this",
        );
        request.timestamp = ctx.timestamp();
        request.to_line().unwrap()
    }

    #[test]
    fn test_ownership_filter_drops_forged_requests() {
        let (upstream, fork_repo, fork, anchor) = setup();
        let ctx = Context::for_user("alice@example.com").with_fixed_timestamp(50);

        // one honest record, one forged as bob
        fork_repo
            .append_note(REQUESTS_REF, &anchor, &request_line(&ctx, "alice@example.com"))
            .unwrap();
        fork_repo
            .append_note(REQUESTS_REF, &anchor, &request_line(&ctx, "bob@example.com"))
            .unwrap();

        let imported = ingest_fork(upstream.as_ref(), &fork).unwrap();
        assert_eq!(imported, 1);
        merge_filtered_into_canonical(upstream.as_ref(), &[fork.clone()]).unwrap();

        let canonical = upstream.get_notes(REQUESTS_REF, &anchor).unwrap();
        let requests = parse_sorted::<Request>(&canonical);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].value.requester, "alice@example.com");

        // and the imported review assembles upstream
        let review = Review::get_required(upstream.as_ref(), &anchor).unwrap();
        assert_eq!(review.request.requester, "alice@example.com");
    }

    #[test]
    fn test_request_filter_requires_owner_committed_anchor() {
        let (upstream, fork_repo, fork, anchor) = setup();
        let ctx = Context::for_user("alice@example.com").with_fixed_timestamp(50);
        let line = request_line(&ctx, "alice@example.com");

        // an anchor that does not exist locally drops the record
        let unknown = "1111111111111111111111111111111111111111"
            .parse::<ObjectHash>()
            .unwrap();
        assert!(!accepts_request(upstream.as_ref(), &fork, &unknown, &line));

        // an anchor committed by a non-owner drops the record even though
        // the requester is an owner
        let owner_commit = upstream.get_commit_hash("refs/heads/master").unwrap();
        assert!(!accepts_request(upstream.as_ref(), &fork, &owner_commit, &line));

        // end to end: a request noted on the owner-committed master commit
        // is filtered out during ingestion
        fork_repo
            .append_note(
                REQUESTS_REF,
                &fork_repo.get_commit_hash("refs/heads/master").unwrap(),
                &line,
            )
            .unwrap();
        assert_eq!(ingest_fork(upstream.as_ref(), &fork).unwrap(), 0);
        let _ = anchor;
    }

    #[test]
    fn test_reingestion_is_idempotent_by_ancestry() {
        let (upstream, fork_repo, fork, anchor) = setup();
        let ctx = Context::for_user("alice@example.com").with_fixed_timestamp(50);
        fork_repo
            .append_note(REQUESTS_REF, &anchor, &request_line(&ctx, "alice@example.com"))
            .unwrap();

        assert_eq!(ingest_fork(upstream.as_ref(), &fork).unwrap(), 1);
        // second pull with nothing fetched: skipped via the state hash
        assert_eq!(ingest_fork(upstream.as_ref(), &fork).unwrap(), 0);
        // third pull after unrelated fork activity: the fetch changes the
        // repository state, so the filtered merge runs and skips by
        // ancestry instead
        fork_repo
            .commit_files("refs/heads/alice/extra", "unrelated", &[])
            .unwrap();
        assert_eq!(ingest_fork(upstream.as_ref(), &fork).unwrap(), 0);
        merge_filtered_into_canonical(upstream.as_ref(), &[fork.clone()]).unwrap();
        merge_filtered_into_canonical(upstream.as_ref(), &[fork.clone()]).unwrap();
        assert_eq!(upstream.get_notes(REQUESTS_REF, &anchor).unwrap().len(), 1);
    }

    #[test]
    fn test_comment_filter_rejects_edits_and_foreign_authors() {
        let (upstream, fork_repo, fork, anchor) = setup();
        let ctx = Context::for_user("alice@example.com").with_fixed_timestamp(60);
        fork_repo
            .append_note(REQUESTS_REF, &anchor, &request_line(&ctx, "alice@example.com"))
            .unwrap();

        use crate::records::Record as _;
        let ok = Comment::new("61", "alice@example.com", "self-review note");
        let foreign = Comment::new("62", "mallory@example.com", "as bob");
        let mut edit = Comment::new("63", "alice@example.com", "edited");
        edit.original = "abcd".to_string();
        for comment in [&ok, &foreign, &edit] {
            fork_repo
                .append_note(COMMENTS_REF, &anchor, &comment.to_line().unwrap())
                .unwrap();
        }

        let imported = ingest_fork(upstream.as_ref(), &fork).unwrap();
        // request + one comment
        assert_eq!(imported, 2);
        merge_filtered_into_canonical(upstream.as_ref(), &[fork.clone()]).unwrap();
        let comments = parse_sorted::<Comment>(
            &upstream.get_notes(COMMENTS_REF, &anchor).unwrap(),
        );
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].value.description, "self-review note");
    }

    #[test]
    fn test_located_comment_must_be_satisfiable() {
        let (upstream, fork_repo, fork, anchor) = setup();
        let ctx = Context::for_user("alice@example.com").with_fixed_timestamp(70);
        fork_repo
            .append_note(REQUESTS_REF, &anchor, &request_line(&ctx, "alice@example.com"))
            .unwrap();

        use crate::records::Record as _;
        use crate::records::comment::{Location, Range};
        let good = Comment::new("71", "alice@example.com", "about f")
            .with_location(Location {
                commit: anchor.to_string(),
                path: Some("f.rs".to_string()),
                range: Some(Range { start_line: 1, ..Range::default() }),
            });
        let bad_path = Comment::new("72", "alice@example.com", "about nothing")
            .with_location(Location {
                commit: anchor.to_string(),
                path: Some("missing.rs".to_string()),
                range: None,
            });
        let bad_range = Comment::new("73", "alice@example.com", "way down")
            .with_location(Location {
                commit: anchor.to_string(),
                path: Some("f.rs".to_string()),
                range: Some(Range { start_line: 500, ..Range::default() }),
            });
        for comment in [&good, &bad_path, &bad_range] {
            fork_repo
                .append_note(COMMENTS_REF, &anchor, &comment.to_line().unwrap())
                .unwrap();
        }

        let imported = ingest_fork(upstream.as_ref(), &fork).unwrap();
        assert_eq!(imported, 2); // request + the one satisfiable comment
    }

    #[test]
    fn test_pool_ingestion_matches_serial() {
        let (upstream, fork_repo, fork, anchor) = setup();
        let ctx = Context::for_user("alice@example.com").with_fixed_timestamp(80);
        fork_repo
            .append_note(REQUESTS_REF, &anchor, &request_line(&ctx, "alice@example.com"))
            .unwrap();

        let imported = ingest_forks(Arc::clone(&upstream), vec![fork]).unwrap();
        assert_eq!(imported, 1);
        let review = Review::get_required(upstream.as_ref(), &anchor).unwrap();
        assert_eq!(review.request.requester, "alice@example.com");
    }

    #[test]
    fn test_upstream_can_request_on_own_history_too() {
        // ingestion does not interfere with locally created reviews
        let (upstream, _fork_repo, _fork, _anchor) = setup();
        upstream.set_ref(
            "refs/heads/topic",
            &upstream.get_commit_hash("refs/heads/master").unwrap(),
            None,
        ).unwrap();
        upstream.commit_files("refs/heads/topic", "local", &[]).unwrap();
        upstream.switch_to_ref("refs/heads/topic").unwrap();
        let ctx = Context::for_user("owner@example.com").with_fixed_timestamp(90);
        let anchor = lifecycle::request_review(
            upstream.as_ref(),
            &ctx,
            &RequestArgs {
                reviewers: vec![],
                source: None,
                target: "refs/heads/master".to_string(),
                description: String::new(),
                allow_uncommitted: false,
            },
            None,
        )
        .unwrap();
        assert!(Review::get(upstream.as_ref(), &anchor).unwrap().is_some());
    }
}
