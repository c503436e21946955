//! Review lifecycle operations.
//!
//! Each operation appends records to a notes ref (and, for submit and
//! rebase, moves regular refs). Nothing is ever edited in place: a review
//! is updated by appending a newer Request, a comment is corrected by a new
//! record referencing the old one, and every error raised before the first
//! append leaves the repository untouched.

use std::str::FromStr;

use crate::config::Context;
use crate::errors::ReviewError;
use crate::hash::ObjectHash;
use crate::records::comment::{Comment, Location, Range, Resolution};
use crate::records::report::{AnalysisReport, CiReport};
use crate::records::request::Request;
use crate::records::sign_record;
use crate::records::{Record, Signed};
use crate::refs::{ANALYSES_REF, CI_REF, COMMENTS_REF, REQUESTS_REF, archive_ref};
use crate::repo::{Repo, SubmitStrategy};
use crate::review::threads::forest_contains;
use crate::review::{Review, ReviewStatus, resolve_ref_commit};
use crate::sign::Signer;

/// Arguments to [`request_review`].
#[derive(Debug, Clone)]
pub struct RequestArgs {
    pub reviewers: Vec<String>,
    /// Source ref; the currently checked-out branch when `None`.
    pub source: Option<String>,
    /// Target ref the review intends to merge into.
    pub target: String,
    pub description: String,
    /// Skip the clean-worktree guard.
    pub allow_uncommitted: bool,
}

/// Arguments to [`comment_on_review`].
#[derive(Debug, Clone, Default)]
pub struct CommentArgs {
    pub message: String,
    /// Id of the comment being replied to.
    pub parent: Option<String>,
    /// File the comment is about, relative to the repository root.
    pub path: Option<String>,
    /// One-based line within `path`.
    pub line: Option<u32>,
    pub resolved: Resolution,
}

fn sign_if_requested<T: Record + Signed>(
    record: &mut T,
    ctx: &Context,
    signer: Option<&dyn Signer>,
) -> Result<(), ReviewError> {
    if !ctx.sign {
        return Ok(());
    }
    let signer = signer.ok_or_else(|| {
        ReviewError::Signature("signing requested but no signing tool is configured".to_string())
    })?;
    sign_record(record, signer)
}

/// Create a review: pick the anchor commit, build a Request, and append it
/// to the requests ref. Returns the anchor.
///
/// The anchor is the earliest commit on the source branch past the merge
/// base with the target, so the review's identity survives later amendments
/// to the branch.
pub fn request_review(
    repo: &dyn Repo,
    ctx: &Context,
    args: &RequestArgs,
    signer: Option<&dyn Signer>,
) -> Result<ObjectHash, ReviewError> {
    if !args.allow_uncommitted && repo.has_uncommitted_changes()? {
        return Err(ReviewError::Validation(
            "the working tree has uncommitted changes (commit or stash them first)".to_string(),
        ));
    }
    let source_ref = match &args.source {
        Some(source) => source.clone(),
        None => repo.head_ref()?,
    };
    let source_tip = repo.get_commit_hash(&source_ref)?;
    let target_tip = repo.get_commit_hash(&args.target)?;
    if source_ref == args.target {
        return Err(ReviewError::Validation(
            "source and target refs are the same".to_string(),
        ));
    }

    let base = repo.merge_base(&target_tip, &source_tip)?;
    let candidates = repo.commits_between(base.as_ref(), &source_tip)?;
    let Some(anchor) = candidates.first().copied() else {
        return Err(ReviewError::Validation(format!(
            "{source_ref} has no commits beyond {}",
            args.target
        )));
    };

    let mut request = Request::new(
        &ctx.timestamp(),
        &ctx.user_email,
        args.reviewers.clone(),
        &source_ref,
        &args.target,
        &args.description,
    );
    if let Some(base) = base {
        request.base_commit = base.to_string();
    }
    sign_if_requested(&mut request, ctx, signer)?;
    repo.append_note(REQUESTS_REF, &anchor, &request.to_line()?)?;
    tracing::info!(anchor = %anchor, source = %source_ref, "requested review");
    Ok(anchor)
}

/// Append a comment to the review at `anchor`. Returns the comment id.
pub fn comment_on_review(
    repo: &dyn Repo,
    ctx: &Context,
    anchor: &ObjectHash,
    args: &CommentArgs,
    signer: Option<&dyn Signer>,
) -> Result<String, ReviewError> {
    let review = Review::get_required(repo, anchor)?;

    if args.line.is_some() && args.path.is_none() {
        return Err(ReviewError::Validation(
            "a line number needs a file path".to_string(),
        ));
    }
    if let Some(parent) = &args.parent
        && !forest_contains(&review.threads, parent)
    {
        return Err(ReviewError::Validation(format!(
            "unknown parent comment {parent}"
        )));
    }

    let mut comment = Comment::new(&ctx.timestamp(), &ctx.user_email, &args.message);
    if let Some(parent) = &args.parent {
        comment.parent = parent.clone();
    }
    if let Some(path) = &args.path {
        let content = repo
            .read_file_at(&review.head, path)?
            .ok_or_else(|| {
                ReviewError::Validation(format!("`{path}` does not exist at {}", review.head))
            })?;
        let mut location = Location {
            commit: review.head.to_string(),
            path: Some(path.clone()),
            range: None,
        };
        if let Some(line) = args.line {
            let line_count = content.iter().filter(|b| **b == b'\n').count() as u32
                + u32::from(!content.ends_with(b"\n") && !content.is_empty());
            if line == 0 || line > line_count {
                return Err(ReviewError::Validation(format!(
                    "line {line} is outside `{path}` ({line_count} lines)"
                )));
            }
            location.range = Some(Range {
                start_line: line,
                ..Range::default()
            });
        }
        comment.location = Some(location);
    }
    comment.resolved = args.resolved;
    sign_if_requested(&mut comment, ctx, signer)?;
    let line = comment.to_line()?;
    repo.append_note(COMMENTS_REF, anchor, &line)?;
    Ok(crate::records::record_id(&line))
}

/// Record an accept (LGTM) or needs-work verdict: shorthand for a comment
/// at the review's head commit carrying the verdict.
pub fn set_verdict(
    repo: &dyn Repo,
    ctx: &Context,
    anchor: &ObjectHash,
    accept: bool,
    message: &str,
    signer: Option<&dyn Signer>,
) -> Result<String, ReviewError> {
    let review = Review::get_required(repo, anchor)?;
    let mut comment = Comment::new(&ctx.timestamp(), &ctx.user_email, message)
        .with_location(Location {
            commit: review.head.to_string(),
            path: None,
            range: None,
        })
        .with_resolution(if accept {
            Resolution::Accepted
        } else {
            Resolution::Rejected
        });
    sign_if_requested(&mut comment, ctx, signer)?;
    let line = comment.to_line()?;
    repo.append_note(COMMENTS_REF, anchor, &line)?;
    Ok(crate::records::record_id(&line))
}

/// Abandon the review at `anchor`: append a Request identical to the
/// current one except for an empty target ref, plus an optional farewell
/// comment.
pub fn abandon(
    repo: &dyn Repo,
    ctx: &Context,
    anchor: &ObjectHash,
    message: Option<&str>,
    signer: Option<&dyn Signer>,
) -> Result<(), ReviewError> {
    let review = Review::get_required(repo, anchor)?;
    let mut request = review.request.clone();
    request.timestamp = ctx.timestamp();
    request.target_ref = String::new();
    request.set_signature(None);
    sign_if_requested(&mut request, ctx, signer)?;
    repo.append_note(REQUESTS_REF, anchor, &request.to_line()?)?;

    if let Some(message) = message {
        let mut comment = Comment::new(&ctx.timestamp(), &ctx.user_email, message);
        sign_if_requested(&mut comment, ctx, signer)?;
        repo.append_note(COMMENTS_REF, anchor, &comment.to_line()?)?;
    }
    tracing::info!(anchor = %anchor, "abandoned review");
    Ok(())
}

/// Rebase the review's source branch onto its target.
///
/// The pre-rebase head is archived so it stays reachable for audit, and a
/// new Request carrying the post-rebase head as `alias` is appended; the
/// anchor, and therefore the review's identity, never changes.
pub fn rebase(
    repo: &dyn Repo,
    ctx: &Context,
    anchor: &ObjectHash,
    signer: Option<&dyn Signer>,
) -> Result<ObjectHash, ReviewError> {
    let review = Review::get_required(repo, anchor)?;
    if review.submitted {
        return Err(ReviewError::IllegalState(
            "the review has already been submitted".to_string(),
        ));
    }
    if review.request.abandoned() {
        return Err(ReviewError::IllegalState(
            "the review has been abandoned".to_string(),
        ));
    }
    if review.request.review_ref.is_empty() {
        return Err(ReviewError::IllegalState(
            "a detached review has no source ref to rebase".to_string(),
        ));
    }
    if repo.has_uncommitted_changes()? {
        return Err(ReviewError::Validation(
            "the working tree has uncommitted changes".to_string(),
        ));
    }

    let old_head = resolve_ref_commit(repo, &review.request.review_ref)?;
    repo.archive_commit(&old_head, &archive_ref(&anchor.to_string()))?;

    let target_tip = repo.get_commit_hash(&review.request.target_ref)?;
    let new_head = repo.rebase_ref(&review.request.review_ref, &target_tip)?;

    let mut request = review.request.clone();
    request.timestamp = ctx.timestamp();
    request.alias = Some(new_head.to_string());
    request.set_signature(None);
    sign_if_requested(&mut request, ctx, signer)?;
    repo.append_note(REQUESTS_REF, anchor, &request.to_line()?)?;
    tracing::info!(anchor = %anchor, new_head = %new_head, "rebased review");
    Ok(new_head)
}

/// Land the review on its target ref using the configured (or overridden)
/// submit strategy.
pub fn submit(
    repo: &dyn Repo,
    ctx: &Context,
    anchor: &ObjectHash,
    strategy: Option<SubmitStrategy>,
    force: bool,
) -> Result<(), ReviewError> {
    let review = Review::get_required(repo, anchor)?;
    if review.submitted {
        return Err(ReviewError::IllegalState(
            "the review has already been submitted".to_string(),
        ));
    }
    if review.request.abandoned() {
        return Err(ReviewError::IllegalState(
            "the review has been abandoned".to_string(),
        ));
    }
    if !force && review.status != ReviewStatus::Accepted {
        return Err(ReviewError::IllegalState(format!(
            "the review is {}, not accepted",
            review.status
        )));
    }

    let target_ref = review.request.target_ref.clone();
    let target_tip = repo.get_commit_hash(&target_ref)?;
    if !repo.is_ancestor(&target_tip, &review.head)? {
        return Err(ReviewError::IllegalState(format!(
            "{} is not a descendant of {target_ref}; rebase first",
            review.head
        )));
    }

    let source: String = if review.request.review_ref.is_empty() {
        review.head.to_string()
    } else {
        review.request.review_ref.clone()
    };
    let strategy = strategy.unwrap_or(ctx.submit_strategy);
    let message = format!("Submit review {anchor}");

    match strategy {
        SubmitStrategy::FastForward => {
            repo.switch_to_ref(&target_ref)?;
            repo.merge_ref(&source, true, &message)?;
        }
        SubmitStrategy::Merge => {
            repo.switch_to_ref(&target_ref)?;
            repo.merge_ref(&source, false, &message)?;
        }
        SubmitStrategy::Rebase => {
            let new_tip = repo.rebase_ref(&source, &target_tip)?;
            repo.switch_to_ref(&target_ref)?;
            repo.merge_ref(&new_tip.to_string(), true, &message)?;
        }
    }
    tracing::info!(anchor = %anchor, strategy = %strategy, "submitted review");
    Ok(())
}

/// Record a CI result against a review's current head. This is the write
/// path build tooling uses; the record lands on the head commit, not the
/// anchor, because it describes one concrete built version of the change.
pub fn attach_ci_report(
    repo: &dyn Repo,
    ctx: &Context,
    anchor: &ObjectHash,
    url: &str,
    status: &str,
) -> Result<(), ReviewError> {
    let review = Review::get_required(repo, anchor)?;
    let report = CiReport::new(&ctx.timestamp(), url, status);
    repo.append_note(CI_REF, &review.head, &report.to_line()?)
}

/// Record a static-analysis result document against a review's current
/// head.
pub fn attach_analysis_report(
    repo: &dyn Repo,
    ctx: &Context,
    anchor: &ObjectHash,
    url: &str,
) -> Result<(), ReviewError> {
    let review = Review::get_required(repo, anchor)?;
    let report = AnalysisReport::new(&ctx.timestamp(), url);
    repo.append_note(ANALYSES_REF, &review.head, &report.to_line()?)
}

/// Resolve the anchor a CLI argument names: an explicit revision when
/// given, otherwise the review attached to the current branch.
pub fn resolve_anchor(
    repo: &dyn Repo,
    argument: Option<&str>,
) -> Result<ObjectHash, ReviewError> {
    match argument {
        Some(arg) => {
            if let Ok(hash) = ObjectHash::from_str(arg)
                && repo.has_commit(&hash)?
            {
                return Ok(hash);
            }
            repo.get_commit_hash(arg)
        }
        None => Review::find_current(repo)?
            .map(|review| review.revision)
            .ok_or_else(|| {
                ReviewError::NoReview("the current branch has no review".to_string())
            }),
    }
}
