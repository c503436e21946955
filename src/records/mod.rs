//! Record codecs: the canonical JSON forms of review metadata.
//!
//! Every record is one line of canonical JSON in a note. Canonical means
//! deterministic: struct field order fixes JSON field order, absent optional
//! fields are omitted entirely, and a timestamp that parses as an integer is
//! zero-padded to at least 10 digits before serialization so lexicographic
//! order matches chronological order. Record identifiers, and the
//! `parent`/`original` links between comments, are hex SHA-1 over the line
//! bytes, so identity is content identity and replicas agree without
//! coordination.
pub mod comment;
pub mod log;
pub mod report;
pub mod request;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha1::{Digest, Sha1};

use crate::errors::ReviewError;
use crate::sign::Signer;

/// The placeholder written into the signature field while computing or
/// verifying a detached signature. Its presence makes the signed payload
/// self-describing yet deterministic.
pub const SIGNATURE_PLACEHOLDER: &str = "gpgsig";

/// Identifier of a record line: hex SHA-1 of the exact bytes.
pub fn record_id(line: &str) -> String {
    hex::encode(Sha1::digest(line.as_bytes()))
}

/// Common behavior of all note record types.
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// Reformat the timestamp so lexicographic order matches chronological
    /// order. Runs in constructors and again before hashing; a record hashed
    /// with a raw timestamp would have a different identity on every replica
    /// that normalized it.
    fn normalize(&mut self);

    /// The record's (possibly unnormalized) timestamp string.
    fn timestamp(&self) -> &str;

    /// Parse one note line into this record type.
    fn parse(line: &str) -> Result<Self, ReviewError> {
        let mut record: Self =
            serde_json::from_str(line).map_err(|e| ReviewError::Parse(e.to_string()))?;
        record.normalize();
        Ok(record)
    }

    /// Serialize to the canonical one-line form.
    fn to_line(&self) -> Result<String, ReviewError> {
        let mut canonical = self.clone();
        canonical.normalize();
        serde_json::to_string(&canonical).map_err(|e| ReviewError::Parse(e.to_string()))
    }

    /// The identifier the canonical form would have.
    fn id(&self) -> Result<String, ReviewError> {
        Ok(record_id(&self.to_line()?))
    }
}

/// Records that can carry a detached signature.
pub trait Signed {
    fn signature(&self) -> Option<&str>;
    fn set_signature(&mut self, signature: Option<String>);
}

/// Sign a record in place: blank the signature field with the placeholder,
/// serialize, let the signer produce an armored detached signature over the
/// serialized bytes, and store that signature in the record.
pub fn sign_record<T: Record + Signed>(
    record: &mut T,
    signer: &dyn Signer,
) -> Result<(), ReviewError> {
    record.set_signature(Some(SIGNATURE_PLACEHOLDER.to_string()));
    let payload = record.to_line()?;
    let signature = signer.sign(payload.as_bytes())?;
    record.set_signature(Some(signature));
    Ok(())
}

/// Verify a record's detached signature.
///
/// The current signature is saved, the placeholder substituted, the record
/// serialized, and the saved signature checked against those bytes; the
/// saved signature is restored regardless of the outcome. Returns `false`
/// for an unsigned record.
pub fn verify_record<T: Record + Signed>(
    record: &mut T,
    signer: &dyn Signer,
) -> Result<bool, ReviewError> {
    let Some(saved) = record.signature().map(str::to_string) else {
        return Ok(false);
    };
    record.set_signature(Some(SIGNATURE_PLACEHOLDER.to_string()));
    let payload = record.to_line();
    record.set_signature(Some(saved.clone()));
    let payload = payload?;
    signer.verify(payload.as_bytes(), &saved)
}
