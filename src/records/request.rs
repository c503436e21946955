//! The Request record: a review request anchored on a commit.
//!
//! Requests are append-only. Updating a review means appending another
//! Request at the same anchor; the latest timestamp wins as the
//! authoritative request and earlier ones are retained as history. A
//! request whose `target_ref` is empty marks the review abandoned.

use serde::{Deserialize, Serialize};

use crate::records::{Record, Signed};
use crate::utils::normalize_timestamp;

/// A review request anchored on a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Seconds since epoch, zero-padded to at least 10 digits.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    /// Identity (email) of the user asking for review.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub requester: String,
    /// Identities asked to review. Duplicates are allowed but discouraged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviewers: Vec<String>,
    /// Ref of the branch under review; empty when detached.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub review_ref: String,
    /// Ref the review intends to merge into; empty means abandoned.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_ref: String,
    /// The commit the review is based on; may be empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_commit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// After a rebase, the post-rebase head commit standing in for the
    /// anchor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Armored detached signature, when the request is signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Request {
    pub fn new(
        timestamp: &str,
        requester: &str,
        reviewers: Vec<String>,
        review_ref: &str,
        target_ref: &str,
        description: &str,
    ) -> Request {
        Request {
            timestamp: normalize_timestamp(timestamp),
            requester: requester.to_string(),
            reviewers,
            review_ref: review_ref.to_string(),
            target_ref: target_ref.to_string(),
            base_commit: String::new(),
            description: description.to_string(),
            alias: None,
            signature: None,
        }
    }

    /// Whether the review this request describes has been abandoned.
    pub fn abandoned(&self) -> bool {
        self.target_ref.is_empty()
    }
}

impl Record for Request {
    fn normalize(&mut self) {
        self.timestamp = normalize_timestamp(&self.timestamp);
    }

    fn timestamp(&self) -> &str {
        &self.timestamp
    }
}

impl Signed for Request {
    fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    fn set_signature(&mut self, signature: Option<String>) {
        self.signature = signature;
    }
}
