//! The note log: typed views over the newline-delimited record lines of a
//! note.
//!
//! A note on a commit is a *set* of records, each identified by the SHA-1 of
//! its line bytes. Different record types share a notes ref's history on
//! disjoint anchors, and history may contain older-schema records, so
//! parsing silently discards lines that do not parse as the expected schema.
//! Merging two notes for the same commit is the union of their record sets;
//! the union is associative, commutative, and idempotent, which is the
//! property that permits peer-to-peer replication without coordination.

use std::cmp::Ordering;

use crate::records::{Record, record_id};
use crate::utils::timestamp_secs;

/// A parsed record together with the exact line it came from.
///
/// The line is retained because merge identity is the hash of the stored
/// bytes, which for foreign or older-schema lines can differ from the hash
/// of the re-serialized record.
#[derive(Debug, Clone)]
pub struct StoredRecord<T> {
    pub line: String,
    pub value: T,
}

impl<T: Record> StoredRecord<T> {
    /// The record's identity: SHA-1 of the stored line bytes.
    pub fn id(&self) -> String {
        record_id(&self.line)
    }
}

/// Parse note lines into typed records, dropping lines that do not conform.
pub fn parse_lines<T: Record>(lines: &[String]) -> Vec<StoredRecord<T>> {
    let mut records = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match T::parse(trimmed) {
            Ok(value) => records.push(StoredRecord {
                line: trimmed.to_string(),
                value,
            }),
            Err(e) => {
                tracing::debug!(error = %e, "skipping non-conforming note line");
            }
        }
    }
    records
}

/// The canonical in-set order: (normalized timestamp, id) ascending.
///
/// Timestamps compare numerically when both parse and lexicographically
/// otherwise; the id breaks ties so the order is total and identical on
/// every replica.
pub fn record_order<T: Record>(a: &StoredRecord<T>, b: &StoredRecord<T>) -> Ordering {
    let at = a.value.timestamp();
    let bt = b.value.timestamp();
    let by_time = match (timestamp_secs(at), timestamp_secs(bt)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => at.cmp(bt),
    };
    by_time.then_with(|| a.id().cmp(&b.id()))
}

/// Parse and sort the records of one note.
pub fn parse_sorted<T: Record>(lines: &[String]) -> Vec<StoredRecord<T>> {
    let mut records = parse_lines::<T>(lines);
    records.sort_by(record_order);
    records
}

/// The lines of `source` missing from `dest`, by line-hash identity, in
/// source order. This is the record-set difference a filtered merge feeds
/// through its filter.
pub fn missing_lines(source: &[String], dest: &[String]) -> Vec<String> {
    let have: std::collections::HashSet<String> =
        dest.iter().map(|l| record_id(l.trim())).collect();
    let mut seen = std::collections::HashSet::new();
    source
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .filter(|l| !have.contains(&record_id(l)))
        .filter(|l| seen.insert(record_id(l)))
        .map(|l| l.to_string())
        .collect()
}
