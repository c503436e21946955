//! Object identifiers for the commits, trees, and blobs that review
//! metadata hangs off of.
//!
//! A repository stores objects under either SHA-1 or SHA-256 ids, and every
//! hash this crate computes for the object store has to use the same
//! algorithm as the repository it targets. The active algorithm is held in
//! thread-local state, configured once when a backend opens a repository
//! (see [`crate::repo::git::GitCliRepo::open`]).
//!
//! Review *record* ids are a separate concern: they are always SHA-1 over
//! canonical line bytes, independent of the repository's object format, and
//! live in [`crate::records`].

use std::cell::Cell;
use std::fmt::Display;
use std::str::FromStr;

use colored::Colorize;
use serde::{Deserialize, Serialize};
use sha1::Digest as _;

use crate::internal::object::types::ObjectType;

/// The object-id algorithm of a repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize, Serialize)]
pub enum HashKind {
    #[default]
    Sha1,
    Sha256,
}

impl HashKind {
    /// Raw digest width in bytes.
    pub const fn size(&self) -> usize {
        match self {
            HashKind::Sha1 => 20,
            HashKind::Sha256 => 32,
        }
    }

    /// Name as printed by `git rev-parse --show-object-format`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            HashKind::Sha1 => "sha1",
            HashKind::Sha256 => "sha256",
        }
    }
}

impl Display for HashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashKind::Sha1),
            "sha256" => Ok(HashKind::Sha256),
            other => Err(format!("unknown object format `{other}`")),
        }
    }
}

thread_local! {
    // Per thread so concurrent fork-ingestion jobs against differently
    // formatted repositories cannot trample each other.
    static OBJECT_FORMAT: Cell<HashKind> = const { Cell::new(HashKind::Sha1) };
}

/// Set this thread's object format; call once when opening a repository.
pub fn set_object_format(kind: HashKind) {
    OBJECT_FORMAT.with(|format| format.set(kind));
}

/// This thread's current object format.
pub fn object_format() -> HashKind {
    OBJECT_FORMAT.with(Cell::get)
}

/// Restores the previous object format when dropped.
pub struct ObjectFormatGuard {
    restore: HashKind,
}

impl Drop for ObjectFormatGuard {
    fn drop(&mut self) {
        set_object_format(self.restore);
    }
}

/// Switch the object format for the lifetime of the returned guard. Tests
/// use this so a SHA-256 case cannot leak into the next test on the same
/// thread.
pub fn object_format_scope(kind: HashKind) -> ObjectFormatGuard {
    let restore = object_format();
    set_object_format(kind);
    ObjectFormatGuard { restore }
}

/// One object id, carrying digest bytes for whichever algorithm produced it.
///
/// Values come from three places: hashing data we are about to store
/// ([`ObjectHash::digest`], [`ObjectHash::for_object`]), parsing hex the
/// backend printed ([`FromStr`]), and decoding the raw id bytes embedded in
/// tree entries ([`ObjectHash::from_raw`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum ObjectHash {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl Default for ObjectHash {
    fn default() -> Self {
        ObjectHash::Sha1([0u8; 20])
    }
}

impl Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.as_ref()))
    }
}

impl AsRef<[u8]> for ObjectHash {
    fn as_ref(&self) -> &[u8] {
        match self {
            ObjectHash::Sha1(bytes) => bytes.as_slice(),
            ObjectHash::Sha256(bytes) => bytes.as_slice(),
        }
    }
}

/// Parse a hex id; the length (40 or 64 digits) selects the algorithm.
impl FromStr for ObjectHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| e.to_string())?;
        match bytes.len() {
            20 => {
                let mut digest = [0u8; 20];
                digest.copy_from_slice(&bytes);
                Ok(ObjectHash::Sha1(digest))
            }
            32 => {
                let mut digest = [0u8; 32];
                digest.copy_from_slice(&bytes);
                Ok(ObjectHash::Sha256(digest))
            }
            other => Err(format!("{other} bytes is not an object id")),
        }
    }
}

impl ObjectHash {
    /// The algorithm that produced this id.
    pub fn kind(&self) -> HashKind {
        match self {
            ObjectHash::Sha1(_) => HashKind::Sha1,
            ObjectHash::Sha256(_) => HashKind::Sha256,
        }
    }

    /// Raw digest width in bytes.
    pub fn size(&self) -> usize {
        self.kind().size()
    }

    /// The all-zero hex id `git update-ref` uses to say "must not exist".
    pub fn zero_hex(kind: HashKind) -> String {
        "0".repeat(kind.size() * 2)
    }

    /// Hash raw data with the thread's object format.
    pub fn digest(data: &[u8]) -> ObjectHash {
        match object_format() {
            HashKind::Sha1 => {
                let mut digest = [0u8; 20];
                digest.copy_from_slice(&sha1::Sha1::digest(data));
                ObjectHash::Sha1(digest)
            }
            HashKind::Sha256 => {
                let mut digest = [0u8; 32];
                digest.copy_from_slice(&sha2::Sha256::digest(data));
                ObjectHash::Sha256(digest)
            }
        }
    }

    /// The id an object of the given type would get in the store: the data
    /// is hashed inside git's `<type> <len>\0` envelope.
    pub fn for_object(object_type: ObjectType, data: &[u8]) -> ObjectHash {
        let mut enveloped = Vec::with_capacity(data.len() + 16);
        enveloped.extend_from_slice(object_type.to_data());
        enveloped.push(b' ');
        enveloped.extend_from_slice(data.len().to_string().as_bytes());
        enveloped.push(b'\0');
        enveloped.extend_from_slice(data);
        ObjectHash::digest(&enveloped)
    }

    /// Decode the raw id bytes a tree entry embeds; the byte count must
    /// match the thread's object format.
    pub fn from_raw(bytes: &[u8]) -> Result<ObjectHash, String> {
        let kind = object_format();
        if bytes.len() != kind.size() {
            return Err(format!(
                "expected {} id bytes for {kind}, got {}",
                kind.size(),
                bytes.len()
            ));
        }
        match kind {
            HashKind::Sha1 => {
                let mut digest = [0u8; 20];
                digest.copy_from_slice(bytes);
                Ok(ObjectHash::Sha1(digest))
            }
            HashKind::Sha256 => {
                let mut digest = [0u8; 32];
                digest.copy_from_slice(bytes);
                Ok(ObjectHash::Sha256(digest))
            }
        }
    }

    /// Hex id highlighted for terminal output.
    pub fn colored_hex(&self) -> String {
        self.to_string().red().bold().to_string()
    }
}
