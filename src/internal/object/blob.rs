//! Git Blob object implementation.
//!
//! Blobs carry raw bytes with no structure of their own. In this crate they
//! hold note payloads and the value files of the fork registry tree, where
//! the file name is the hash of the contents so duplicate adds are no-ops.

use std::fmt::Display;

use crate::errors::ReviewError;
use crate::hash::ObjectHash;
use crate::internal::object::GitObject;
use crate::internal::object::types::ObjectType;

/// A git blob: an id plus uninterpreted content bytes.
#[derive(Eq, Debug, Clone)]
pub struct Blob {
    pub id: ObjectHash,
    pub data: Vec<u8>,
}

impl PartialEq for Blob {
    /// Two blobs are equal if their ids match.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "blob {} ({} bytes)", self.id, self.data.len())
    }
}

impl Blob {
    /// Create a blob from content bytes, computing its id.
    pub fn from_content_bytes(data: &[u8]) -> Blob {
        let id = ObjectHash::for_object(ObjectType::Blob, data);
        Blob {
            id,
            data: data.to_vec(),
        }
    }

    /// Create a blob from a string value.
    pub fn from_content(content: &str) -> Blob {
        Blob::from_content_bytes(content.as_bytes())
    }

    /// The content as UTF-8 text.
    pub fn text(&self) -> Result<String, ReviewError> {
        String::from_utf8(self.data.clone())
            .map_err(|e| ReviewError::InvalidBlobObject(format!("invalid UTF-8 content: {e}")))
    }
}

impl GitObject for Blob {
    fn parse(data: &[u8], id: ObjectHash) -> Result<Self, ReviewError> {
        Ok(Blob {
            id,
            data: data.to_vec(),
        })
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn serialize(&self) -> Result<Vec<u8>, ReviewError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, object_format_scope};

    #[test]
    fn test_blob_hash_matches_git() {
        let _scope = object_format_scope(HashKind::Sha1);
        // echo -n "what is up, doc?" | git hash-object --stdin
        let blob = Blob::from_content("what is up, doc?");
        assert_eq!(blob.id.to_string(), "bd9dbf5aae1a3862dd1526723246b20206e5fc37");
        assert_eq!(blob.computed_id().unwrap(), blob.id);
    }

    #[test]
    fn test_blob_round_trip() {
        let _scope = object_format_scope(HashKind::Sha1);
        let blob = Blob::from_content("alice@example.com");
        let data = blob.serialize().unwrap();
        let restored = Blob::parse(&data, blob.id).unwrap();
        assert_eq!(restored, blob);
        assert_eq!(restored.text().unwrap(), "alice@example.com");
    }

    #[test]
    fn test_blob_rejects_binary_as_text() {
        let _scope = object_format_scope(HashKind::Sha1);
        let blob = Blob::from_content_bytes(&[0xFF, 0xFE, 0xFD]);
        assert!(blob.text().is_err());
    }
}
