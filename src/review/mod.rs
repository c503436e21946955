//! Review assembly: turning the records anchored at a commit into one
//! `Review` value.
//!
//! A review is identified by its anchor commit, the commit the Request
//! note lives on, and that identity never changes: rebasing produces a new
//! head commit, but the anchor stays. Everything else about a review is
//! derived on read: the authoritative request is the latest by timestamp,
//! the comment forest and its fold come from [`threads`], submission is an
//! ancestry test against the target ref, and CI/analysis reports hang off
//! the computed head commit.
pub mod lifecycle;
pub mod threads;

use std::str::FromStr;

use crate::errors::ReviewError;
use crate::hash::ObjectHash;
use crate::records::comment::Comment;
use crate::records::log::{StoredRecord, parse_sorted};
use crate::records::report::{AnalysisReport, CiReport};
use crate::records::request::Request;
use crate::records::{Signed as _, verify_record};
use crate::refs::{ANALYSES_REF, CI_REF, COMMENTS_REF, REQUESTS_REF};
use crate::repo::Repo;
use crate::sign::Signer;
pub use threads::{CommentThread, ReviewStatus, ThreadStatus};

/// A review, assembled from the records at one anchor commit.
#[derive(Debug, Clone)]
pub struct Review {
    /// The anchor commit.
    pub revision: ObjectHash,
    /// The authoritative (latest) request.
    pub request: Request,
    /// Every request ever recorded at the anchor, oldest first.
    pub all_requests: Vec<StoredRecord<Request>>,
    /// Every comment recorded at the anchor, oldest first.
    pub comments: Vec<StoredRecord<Comment>>,
    /// The comment forest derived from `comments`.
    pub threads: Vec<CommentThread>,
    /// The fold of all thread folds.
    pub status: ReviewStatus,
    /// Whether the anchor is an ancestor of the current target ref.
    pub submitted: bool,
    /// The commit whose diff, reports, and analyses are currently relevant.
    pub head: ObjectHash,
    /// CI reports recorded against `head`, oldest first.
    pub reports: Vec<StoredRecord<CiReport>>,
    /// Analysis reports recorded against `head`, oldest first.
    pub analyses: Vec<StoredRecord<AnalysisReport>>,
}

impl Review {
    /// Assemble the review at `anchor`, or `None` when no request exists
    /// there.
    pub fn get(repo: &dyn Repo, anchor: &ObjectHash) -> Result<Option<Review>, ReviewError> {
        let request_lines = repo.get_notes(REQUESTS_REF, anchor)?;
        let all_requests = parse_sorted::<Request>(&request_lines);
        let Some(authoritative) = all_requests.last() else {
            return Ok(None);
        };
        let request = authoritative.value.clone();

        let comment_lines = repo.get_notes(COMMENTS_REF, anchor)?;
        let comments = parse_sorted::<Comment>(&comment_lines);
        let threads = threads::build_forest(comments.clone());
        let status = threads::aggregate_status(&threads);

        // A rebase replaces the anchor on the branch with a new commit and
        // records it in `alias`; ancestry tests against the target must use
        // that stand-in or a rebased review could never read as submitted.
        let mut effective = *anchor;
        if let Some(alias) = &request.alias
            && let Ok(alias_hash) = ObjectHash::from_str(alias)
            && repo.has_commit(&alias_hash)?
        {
            effective = alias_hash;
        }

        let submitted = if request.target_ref.is_empty() {
            false
        } else if repo.has_ref(&request.target_ref)? {
            let target_tip = repo.get_commit_hash(&request.target_ref)?;
            repo.is_ancestor(&effective, &target_tip)?
        } else {
            false
        };

        let head = compute_head(repo, &effective, &request, submitted, &comments)?;
        let reports = parse_sorted::<CiReport>(&repo.get_notes(CI_REF, &head)?);
        let analyses = parse_sorted::<AnalysisReport>(&repo.get_notes(ANALYSES_REF, &head)?);

        Ok(Some(Review {
            revision: *anchor,
            request,
            all_requests,
            comments,
            threads,
            status,
            submitted,
            head,
            reports,
            analyses,
        }))
    }

    /// Assemble the review at `anchor`, failing when none exists.
    pub fn get_required(repo: &dyn Repo, anchor: &ObjectHash) -> Result<Review, ReviewError> {
        Review::get(repo, anchor)?.ok_or_else(|| ReviewError::NoReview(anchor.to_string()))
    }

    /// Whether the review is open: not submitted and not abandoned.
    pub fn open(&self) -> bool {
        !self.submitted && !self.request.target_ref.is_empty()
    }

    /// The commit to diff the head against.
    pub fn base_commit(&self, repo: &dyn Repo) -> Result<ObjectHash, ReviewError> {
        if self.submitted {
            if !self.request.base_commit.is_empty() {
                return ObjectHash::from_str(&self.request.base_commit)
                    .map_err(|_| ReviewError::InvalidHashValue(self.request.base_commit.clone()));
            }
            // Recoverable fallback: assume the submitted commit is a merge
            // whose last parent is the feature branch.
            let details = repo.commit_details(&self.revision)?;
            return Ok(details.parents.last().copied().unwrap_or(self.revision));
        }
        let target_tip = repo.get_commit_hash(&self.request.target_ref)?;
        let ours = if self.request.review_ref.is_empty() {
            self.revision
        } else {
            resolve_ref_commit(repo, &self.request.review_ref).unwrap_or(self.revision)
        };
        repo.merge_base(&target_tip, &ours)?.ok_or_else(|| {
            ReviewError::IllegalState(format!(
                "review {} shares no history with {}",
                self.revision, self.request.target_ref
            ))
        })
    }

    /// The most recent CI report for the head commit, when any exists.
    pub fn latest_report(&self) -> Option<&CiReport> {
        self.reports.last().map(|r| &r.value)
    }

    /// The most recent analysis report for the head commit.
    pub fn latest_analysis(&self) -> Option<&AnalysisReport> {
        self.analyses.last().map(|r| &r.value)
    }

    /// Check every signed record against `signer`; returns the ids of
    /// records whose signature did not verify. Unsigned records are not
    /// reported: signature checking flags, it never drops.
    pub fn verify_signatures(&self, signer: &dyn Signer) -> Result<Vec<String>, ReviewError> {
        let mut failures = Vec::new();
        for request in &self.all_requests {
            if request.value.signature().is_some() {
                let mut record = request.value.clone();
                if !verify_record(&mut record, signer)? {
                    failures.push(request.id());
                }
            }
        }
        for comment in &self.comments {
            if comment.value.signature().is_some() {
                let mut record = comment.value.clone();
                if !verify_record(&mut record, signer)? {
                    failures.push(comment.id());
                }
            }
        }
        Ok(failures)
    }

    /// Every review in the repository, ordered by anchor enumeration.
    pub fn list_all(repo: &dyn Repo) -> Result<Vec<Review>, ReviewError> {
        let mut reviews = Vec::new();
        for anchor in repo.list_noted_commits(REQUESTS_REF)? {
            if let Some(review) = Review::get(repo, &anchor)? {
                reviews.push(review);
            }
        }
        reviews.sort_by(|a, b| a.request.timestamp.cmp(&b.request.timestamp));
        Ok(reviews)
    }

    /// Every open review.
    pub fn list_open(repo: &dyn Repo) -> Result<Vec<Review>, ReviewError> {
        Ok(Review::list_all(repo)?.into_iter().filter(Review::open).collect())
    }

    /// The review whose source ref is the currently checked-out branch,
    /// preferring open reviews and then the most recently requested one.
    pub fn find_current(repo: &dyn Repo) -> Result<Option<Review>, ReviewError> {
        let branch = repo.head_ref()?;
        let mut matching: Vec<Review> = Review::list_all(repo)?
            .into_iter()
            .filter(|r| r.request.review_ref == branch)
            .collect();
        if let Some(pos) = matching.iter().rposition(Review::open) {
            return Ok(Some(matching.swap_remove(pos)));
        }
        Ok(matching.pop())
    }
}

impl std::fmt::Display for Review {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "review {}", self.revision)?;
        let state = if self.submitted {
            "submitted".to_string()
        } else if !self.open() {
            "abandoned".to_string()
        } else {
            format!("open, {}", self.status)
        };
        writeln!(f, "  state:     {state}")?;
        writeln!(f, "  requester: {}", self.request.requester)?;
        if !self.request.reviewers.is_empty() {
            writeln!(f, "  reviewers: {}", self.request.reviewers.join(", "))?;
        }
        if !self.request.target_ref.is_empty() {
            writeln!(
                f,
                "  merge:     {} -> {}",
                self.request.review_ref, self.request.target_ref
            )?;
        }
        if !self.request.description.is_empty() {
            writeln!(f, "  {}", self.request.description)?;
        }
        if let Some(report) = self.latest_report() {
            writeln!(f, "  ci:        {} ({})", report.status, report.url)?;
        }
        if let Some(analysis) = self.latest_analysis() {
            writeln!(f, "  analyses:  {}", analysis.url)?;
        }
        if !self.threads.is_empty() {
            writeln!(f, "  comments:")?;
            for thread in &self.threads {
                write_thread(f, thread, 2)?;
            }
        }
        Ok(())
    }
}

fn write_thread(
    f: &mut std::fmt::Formatter<'_>,
    thread: &CommentThread,
    depth: usize,
) -> std::fmt::Result {
    let marker = match thread.comment.resolved {
        crate::records::comment::Resolution::Accepted => "[lgtm]",
        crate::records::comment::Resolution::Rejected => "[needs-work]",
        crate::records::comment::Resolution::Fyi => "[fyi]",
    };
    writeln!(
        f,
        "{:indent$}{marker} {}: {}",
        "",
        thread.comment.author,
        thread.comment.description,
        indent = depth * 2
    )?;
    for child in &thread.children {
        write_thread(f, child, depth + 1)?;
    }
    Ok(())
}

/// Resolve a review ref to its tip, tolerating the ref not existing locally
/// by searching remote-tracking refs for a unique match.
pub fn resolve_ref_commit(repo: &dyn Repo, reference: &str) -> Result<ObjectHash, ReviewError> {
    if repo.has_ref(reference)? {
        return repo.get_commit_hash(reference);
    }
    let Some(short) = reference.strip_prefix("refs/heads/") else {
        return Err(ReviewError::UnknownRef(reference.to_string()));
    };
    let suffix = format!("/{short}");
    let candidates: Vec<ObjectHash> = repo
        .list_refs("refs/remotes/")?
        .into_iter()
        .filter(|(name, _)| name.ends_with(&suffix))
        .map(|(_, hash)| hash)
        .collect();
    match candidates.as_slice() {
        [unique] => Ok(*unique),
        _ => Err(ReviewError::UnknownRef(reference.to_string())),
    }
}

/// Compute the head commit of a review: the anchor for detached reviews,
/// the review ref's tip while the review is open, and the
/// last-commented-upon descendant of the anchor (or its rebase alias) once
/// it has been submitted.
fn compute_head(
    repo: &dyn Repo,
    anchor: &ObjectHash,
    request: &Request,
    submitted: bool,
    comments: &[StoredRecord<Comment>],
) -> Result<ObjectHash, ReviewError> {
    if request.review_ref.is_empty() {
        return Ok(*anchor);
    }
    if !submitted {
        return resolve_ref_commit(repo, &request.review_ref);
    }
    // Submitted: recover the last-commented version. Comments are in
    // timestamp order; advance along ancestry only.
    let mut head = *anchor;
    for comment in comments {
        let Some(location) = &comment.value.location else {
            continue;
        };
        if location.commit.is_empty() {
            continue;
        }
        let Ok(commit) = ObjectHash::from_str(&location.commit) else {
            continue;
        };
        if repo.has_commit(&commit)? && repo.is_ancestor(&head, &commit)? {
            head = commit;
        }
    }
    Ok(head)
}
