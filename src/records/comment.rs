//! The Comment record: one node of a review discussion.
//!
//! Comments are append-only. A reply carries the `parent` id of the comment
//! it answers; an edit carries the `original` id of the record it
//! supersedes and is not itself a new thread. The `resolved` field is a
//! tri-state (LGTM, needs-work, or plain FYI) represented in memory as
//! [`Resolution`] and on the wire as an optional boolean, the shape other
//! replicas expect.

use serde::{Deserialize, Serialize};

use crate::records::{Record, Signed};
use crate::utils::normalize_timestamp;

/// The reviewer verdict a comment carries.
///
/// A tagged enum rather than a nullable boolean: the thread-status algebra
/// in [`crate::review::threads`] folds over these values and the "absent"
/// state is load-bearing there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    /// LGTM: the author of the comment approves.
    Accepted,
    /// Needs work: the author of the comment objects.
    Rejected,
    /// No verdict, just information.
    #[default]
    Fyi,
}

impl Resolution {
    pub fn is_fyi(&self) -> bool {
        *self == Resolution::Fyi
    }
}

fn resolution_ser<S>(value: &Resolution, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_bool(*value == Resolution::Accepted)
}

fn resolution_de<'de, D>(deserializer: D) -> Result<Resolution, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let approved = bool::deserialize(deserializer)?;
    Ok(if approved {
        Resolution::Accepted
    } else {
        Resolution::Rejected
    })
}

/// Zero-based position range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub start_line: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub start_column: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub end_line: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub end_column: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// What a comment is about: a commit, optionally a file in it, optionally a
/// range in that file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

/// A comment on a review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Seconds since epoch, zero-padded to at least 10 digits.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    /// Identity (email) of the comment author.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    /// Id of the comment this replies to; empty for a thread root.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,
    /// Id of the earlier version this comment edits; empty for a fresh
    /// comment.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// The tri-state verdict; absent on the wire for FYI.
    #[serde(
        default,
        skip_serializing_if = "Resolution::is_fyi",
        serialize_with = "resolution_ser",
        deserialize_with = "resolution_de"
    )]
    pub resolved: Resolution,
    /// Armored detached signature, when the comment is signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Comment {
    pub fn new(timestamp: &str, author: &str, description: &str) -> Comment {
        Comment {
            timestamp: normalize_timestamp(timestamp),
            author: author.to_string(),
            parent: String::new(),
            original: String::new(),
            location: None,
            description: description.to_string(),
            resolved: Resolution::Fyi,
            signature: None,
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Comment {
        self.parent = parent.to_string();
        self
    }

    pub fn with_location(mut self, location: Location) -> Comment {
        self.location = Some(location);
        self
    }

    pub fn with_resolution(mut self, resolved: Resolution) -> Comment {
        self.resolved = resolved;
        self
    }

    /// Whether this record edits an earlier comment.
    pub fn is_edit(&self) -> bool {
        !self.original.is_empty()
    }
}

impl Record for Comment {
    fn normalize(&mut self) {
        self.timestamp = normalize_timestamp(&self.timestamp);
    }

    fn timestamp(&self) -> &str {
        &self.timestamp
    }
}

impl Signed for Comment {
    fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    fn set_signature(&mut self, signature: Option<String>) {
        self.signature = signature;
    }
}
