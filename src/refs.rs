//! Well-known ref names and the fork ref namespacing scheme.
//!
//! All review metadata lives under a small set of fixed refs so that every
//! replica looks in the same place. Per-fork staging refs are derived from
//! the fork name; notes refs fetched from forks must stay under
//! `refs/notes/` because older tooling refuses to treat anything else as a
//! notes ref.

/// Notes ref carrying review Request records.
pub const REQUESTS_REF: &str = "refs/notes/devtools/reviews";
/// Notes ref carrying Comment records.
pub const COMMENTS_REF: &str = "refs/notes/devtools/discuss";
/// Notes ref carrying CI report records.
pub const CI_REF: &str = "refs/notes/devtools/ci";
/// Notes ref carrying static-analysis report records.
pub const ANALYSES_REF: &str = "refs/notes/devtools/analyses";
/// Commit-backed ref holding the fork registry tree.
pub const FORKS_REF: &str = "refs/devtools/forks";
/// Prefix under which pre-rebase heads are kept reachable.
pub const ARCHIVES_PREFIX: &str = "refs/devtools/archives";

/// Fetch pattern covering every devtools notes ref.
pub const NOTES_PATTERN: &str = "refs/notes/devtools/*";
/// Fetch pattern covering the archive refs.
pub const ARCHIVES_PATTERN: &str = "refs/devtools/archives/*";

/// Archive ref that keeps the given review anchor's old heads reachable.
pub fn archive_ref(anchor: &str) -> String {
    format!("{ARCHIVES_PREFIX}/{anchor}")
}

/// Local staging ref for a ref fetched from a fork.
///
/// Notes refs land under `refs/notes/forks/<name>/...`, everything else
/// under `refs/forks/<name>/...`.
pub fn fork_staging_ref(fork_name: &str, remote_ref: &str) -> String {
    if let Some(rest) = remote_ref.strip_prefix("refs/notes/") {
        format!("refs/notes/forks/{fork_name}/{rest}")
    } else {
        let rest = remote_ref.strip_prefix("refs/").unwrap_or(remote_ref);
        format!("refs/forks/{fork_name}/{rest}")
    }
}

/// Per-fork local ref carrying only the records that passed the ownership
/// filter for the given canonical notes ref.
pub fn filtered_fork_ref(fork_name: &str, canonical_ref: &str) -> String {
    let rest = canonical_ref
        .strip_prefix("refs/notes/")
        .unwrap_or(canonical_ref);
    format!("refs/notes/filteredForks/{fork_name}/{rest}")
}
