//! Error types for the Git-Review crate.
//!
//! This module defines a unified error enumeration used across the backend
//! abstraction, record parsing, review assembly, lifecycle operations, and
//! fork ingestion. It integrates with `thiserror` to provide rich `Display`
//! implementations and error source chaining where applicable.
//!
//! Notes:
//! - `Backend` wraps whatever the underlying object store reported, verbatim.
//! - `RefMoved` marks a lost compare-and-set race; callers with a pure
//!   re-readable mutation retry it a bounded number of times.
//! - `Parse` is silently absorbed while reading note logs and only surfaced
//!   during direct record ingestion.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the Git-Review library.
///
/// - Used across the repository backend, record codecs, review lifecycle and
///   fork ingestion.
/// - Implements `std::error::Error` via `thiserror`.
pub enum ReviewError {
    /// The underlying object store failed; the message is surfaced verbatim.
    #[error("backend failure: {0}")]
    Backend(String),

    /// I/O error from a spawned tool or scratch file.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    /// A compare-and-set ref update lost a race with another writer.
    #[error("ref `{reference}` moved: expected {expected}, found {found}")]
    RefMoved {
        reference: String,
        expected: String,
        found: String,
    },

    /// The named ref does not exist.
    #[error("unknown ref: {0}")]
    UnknownRef(String),

    /// The named commit does not exist or is not a commit.
    #[error("unknown commit: {0}")]
    UnknownCommit(String),

    /// User-supplied input is inconsistent; nothing was written.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The requested operation is illegal in the current review state.
    #[error("operation not allowed: {0}")]
    IllegalState(String),

    /// No review exists at the given revision.
    #[error("no review found at {0}")]
    NoReview(String),

    /// A note line was not a valid record of the expected type.
    #[error("malformed record: {0}")]
    Parse(String),

    /// Signing failed, or a signature was requested but cannot be produced.
    #[error("signature failure: {0}")]
    Signature(String),

    /// A fork registry subtree does not conform to the expected layout.
    #[error("malformed fork registry entry: {0}")]
    InvalidForkEntry(String),

    /// Invalid hash formatting or value.
    #[error("the {0} is not a valid hash value")]
    InvalidHashValue(String),

    /// Malformed tree object.
    #[error("not a valid git tree object")]
    InvalidTreeObject,

    /// Invalid tree entry (mode/name/hash).
    #[error("the `{0}` is not a valid git tree item")]
    InvalidTreeItem(String),

    /// Malformed or unsupported blob object encoding.
    #[error("the `{0}` is not a valid git blob object")]
    InvalidBlobObject(String),

    /// Malformed commit object.
    #[error("not a valid git commit object")]
    InvalidCommitObject,

    /// Invalid commit signature line.
    #[error("the `{0}` is not a valid git commit signature")]
    InvalidSignatureType(String),
}
