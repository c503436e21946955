//! Object type enumeration.
//!
//! Each git object type carries a fixed name that participates in the
//! `<type> <len>\0<data>` hashing envelope, so the enum also provides the
//! byte form used by [`ObjectHash::for_object`](crate::hash::ObjectHash::for_object).

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errors::ReviewError;

/// The git object types this crate stores and reads.
///
/// * `Commit`: records a tree, parent commits, author/committer, and a message.
/// * `Tree`: a directory of named blob and subtree entries.
/// * `Blob`: raw file content (note payloads and registry values included).
/// * `Tag`: an annotated tag; accepted when scanning, never written here.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ObjectType::Commit => write!(f, "commit"),
            ObjectType::Tree => write!(f, "tree"),
            ObjectType::Blob => write!(f, "blob"),
            ObjectType::Tag => write!(f, "tag"),
        }
    }
}

impl ObjectType {
    /// The byte form used in the object hashing envelope.
    pub fn to_data(self) -> &'static [u8] {
        match self {
            ObjectType::Commit => b"commit",
            ObjectType::Tree => b"tree",
            ObjectType::Blob => b"blob",
            ObjectType::Tag => b"tag",
        }
    }

    /// Parse an object type name as printed by `git cat-file -t`.
    pub fn from_string(s: &str) -> Result<ObjectType, ReviewError> {
        match s {
            "commit" => Ok(ObjectType::Commit),
            "tree" => Ok(ObjectType::Tree),
            "blob" => Ok(ObjectType::Blob),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(ReviewError::Validation(format!(
                "`{s}` is not a valid git object type"
            ))),
        }
    }
}
