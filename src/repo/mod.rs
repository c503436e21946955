//! The repository capability trait.
//!
//! Everything above this module speaks to a [`Repo`]: an abstract
//! content-addressed object store with refs, notes, and ancestry tests.
//! Higher layers never see working-tree state, staging, or file-mode
//! concerns. Two implementations ship with the crate: [`git::GitCliRepo`]
//! shells out to the `git` binary, and [`mem::MemRepo`] keeps everything in
//! memory for tests.
//!
//! Synchronization helpers (`pull_notes_and_archive`, `push_notes_and_archive`,
//! `state_hash`, `archive_commit`) are provided methods written purely in
//! terms of the required operations, so every backend gets them for free.
pub mod git;
pub mod mem;

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use sha1::{Digest, Sha1};

use crate::errors::ReviewError;
use crate::hash::ObjectHash;
use crate::internal::object::tree::TreeItem;

/// How `submit` lands an accepted review on the target ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitStrategy {
    #[default]
    Merge,
    Rebase,
    FastForward,
}

impl Display for SubmitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitStrategy::Merge => write!(f, "merge"),
            SubmitStrategy::Rebase => write!(f, "rebase"),
            SubmitStrategy::FastForward => write!(f, "fast-forward"),
        }
    }
}

impl FromStr for SubmitStrategy {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(SubmitStrategy::Merge),
            "rebase" => Ok(SubmitStrategy::Rebase),
            "fast-forward" | "ff" | "fastforward" => Ok(SubmitStrategy::FastForward),
            _ => Err(ReviewError::Validation(format!(
                "`{s}` is not a valid submit strategy (merge, rebase, fast-forward)"
            ))),
        }
    }
}

/// Structured facts about one commit, as the review layer needs them.
#[derive(Debug, Clone)]
pub struct CommitDetails {
    pub tree: ObjectHash,
    pub parents: Vec<ObjectHash>,
    pub author_email: String,
    pub committer_email: String,
    /// Committer time, seconds since epoch.
    pub time: u64,
    pub message: String,
}

/// Abstract content-addressed repository capability set.
///
/// All operations fail with [`ReviewError::Backend`] when the underlying
/// store fails; `set_ref` fails with [`ReviewError::RefMoved`] when the
/// compare-and-set expectation does not hold.
pub trait Repo {
    // --- configuration -----------------------------------------------------

    /// The configured user identity (email).
    fn user_email(&self) -> Result<String, ReviewError>;

    /// The configured signing key id, when one is set.
    fn signing_key(&self) -> Result<Option<String>, ReviewError>;

    /// The configured submit strategy; defaults to merge.
    fn submit_strategy(&self) -> Result<SubmitStrategy, ReviewError>;

    // --- refs and commits --------------------------------------------------

    fn has_ref(&self, reference: &str) -> Result<bool, ReviewError>;

    /// Resolve a ref (or a hex revision string) to a commit hash.
    fn get_commit_hash(&self, reference: &str) -> Result<ObjectHash, ReviewError>;

    /// Whether the hash names a commit present in the store.
    fn has_commit(&self, hash: &ObjectHash) -> Result<bool, ReviewError>;

    /// All refs whose full name starts with `prefix`, as (name, tip) pairs,
    /// sorted by name.
    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectHash)>, ReviewError>;

    /// The symbolic name HEAD points at (e.g. `refs/heads/master`).
    fn head_ref(&self) -> Result<String, ReviewError>;

    fn switch_to_ref(&self, reference: &str) -> Result<(), ReviewError>;

    /// Atomic compare-and-set ref update. `expected` of `None` requires the
    /// ref to not exist yet.
    fn set_ref(
        &self,
        reference: &str,
        new_hash: &ObjectHash,
        expected: Option<&ObjectHash>,
    ) -> Result<(), ReviewError>;

    fn commit_details(&self, hash: &ObjectHash) -> Result<CommitDetails, ReviewError>;

    /// Whether the working tree has uncommitted changes. Backends without a
    /// working tree report `false`.
    fn has_uncommitted_changes(&self) -> Result<bool, ReviewError>;

    // --- objects -----------------------------------------------------------

    fn read_blob(&self, hash: &ObjectHash) -> Result<Vec<u8>, ReviewError>;

    fn store_blob(&self, data: &[u8]) -> Result<ObjectHash, ReviewError>;

    /// The entries of the tree named by `revision`: a tree hash, a commit
    /// hash, or a ref name (resolved to its commit's root tree).
    fn read_tree(&self, revision: &str) -> Result<Vec<TreeItem>, ReviewError>;

    fn store_tree(&self, items: Vec<TreeItem>) -> Result<ObjectHash, ReviewError>;

    fn create_commit(
        &self,
        tree: &ObjectHash,
        parents: &[ObjectHash],
        message: &str,
    ) -> Result<ObjectHash, ReviewError>;

    /// File content at `commit:path`, or `None` when the path is absent.
    fn read_file_at(
        &self,
        commit: &ObjectHash,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ReviewError>;

    // --- ancestry ----------------------------------------------------------

    fn merge_base(
        &self,
        a: &ObjectHash,
        b: &ObjectHash,
    ) -> Result<Option<ObjectHash>, ReviewError>;

    /// Whether `ancestor` is reachable from `descendant` (a commit is its
    /// own ancestor).
    fn is_ancestor(
        &self,
        ancestor: &ObjectHash,
        descendant: &ObjectHash,
    ) -> Result<bool, ReviewError>;

    /// Commits reachable from `to` but not from `from`, oldest first.
    fn commits_between(
        &self,
        from: Option<&ObjectHash>,
        to: &ObjectHash,
    ) -> Result<Vec<ObjectHash>, ReviewError>;

    // --- notes -------------------------------------------------------------

    /// The note lines attached to `commit` under `notes_ref` (empty when
    /// there is no note).
    fn get_notes(
        &self,
        notes_ref: &str,
        commit: &ObjectHash,
    ) -> Result<Vec<String>, ReviewError>;

    /// Append one line to the note on `commit` under `notes_ref`, creating
    /// the note (and the ref) as needed. Appends are atomic per backend.
    fn append_note(
        &self,
        notes_ref: &str,
        commit: &ObjectHash,
        line: &str,
    ) -> Result<(), ReviewError>;

    /// Every noted commit under `notes_ref` with its note lines.
    fn get_all_notes(
        &self,
        notes_ref: &str,
    ) -> Result<BTreeMap<ObjectHash, Vec<String>>, ReviewError>;

    /// The commits that carry a note under `notes_ref`.
    fn list_noted_commits(&self, notes_ref: &str) -> Result<Vec<ObjectHash>, ReviewError> {
        Ok(self.get_all_notes(notes_ref)?.into_keys().collect())
    }

    // --- history joining ---------------------------------------------------

    /// Advance `reference` to a new commit whose parents are the current tip
    /// (when one exists) and `other_tip`. Only reachability matters: the new
    /// commit's tree is the current tip's tree (or `other_tip`'s when the
    /// ref is unborn).
    fn join_ref_history(
        &self,
        reference: &str,
        other_tip: &ObjectHash,
        message: &str,
    ) -> Result<(), ReviewError>;

    /// Ensure `commit` stays reachable from `archive_ref`.
    fn archive_commit(
        &self,
        commit: &ObjectHash,
        archive_ref: &str,
    ) -> Result<(), ReviewError> {
        if self.has_ref(archive_ref)? {
            let tip = self.get_commit_hash(archive_ref)?;
            if self.is_ancestor(commit, &tip)? {
                return Ok(());
            }
        }
        self.join_ref_history(archive_ref, commit, &format!("archive {commit}"))
    }

    // --- source movement ---------------------------------------------------

    /// Merge `source_ref` into the currently checked-out branch.
    fn merge_ref(
        &self,
        source_ref: &str,
        fast_forward_only: bool,
        message: &str,
    ) -> Result<(), ReviewError>;

    /// Rebase the commits of `source_ref` onto `onto`, move `source_ref`,
    /// and return the new tip.
    fn rebase_ref(
        &self,
        source_ref: &str,
        onto: &ObjectHash,
    ) -> Result<ObjectHash, ReviewError>;

    // --- synchronization ---------------------------------------------------

    /// Fetch the given refspecs (`+src:dst` form) from a remote.
    fn fetch(&self, remote: &str, refspecs: &[String]) -> Result<(), ReviewError>;

    /// Push the given refspecs to a remote.
    fn push(&self, remote: &str, refspecs: &[String]) -> Result<(), ReviewError>;

    /// One hash over every ref in the repository; changes iff some ref
    /// moved. Used to skip fork ingestion cycles that fetched nothing.
    fn state_hash(&self) -> Result<String, ReviewError> {
        let mut hasher = Sha1::new();
        for (name, hash) in self.list_refs("refs/")? {
            hasher.update(hash.to_string().as_bytes());
            hasher.update(b" ");
            hasher.update(name.as_bytes());
            hasher.update(b"\n");
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Fetch notes refs matching `notes_pattern` and archive refs matching
    /// `archive_pattern` from `remote`, then union-merge the notes and join
    /// the archive histories into the local refs.
    fn pull_notes_and_archive(
        &self,
        remote: &str,
        notes_pattern: &str,
        archive_pattern: &str,
    ) -> Result<(), ReviewError> {
        let notes_tmp = remote_staging_pattern(remote, notes_pattern);
        let archive_tmp = remote_staging_pattern(remote, archive_pattern);
        self.fetch(
            remote,
            &[
                format!("+{notes_pattern}:{notes_tmp}"),
                format!("+{archive_pattern}:{archive_tmp}"),
            ],
        )?;

        // Union-merge each fetched notes ref into its local counterpart.
        let notes_tmp_prefix = notes_tmp.trim_end_matches('*').to_string();
        let notes_local_prefix = notes_pattern.trim_end_matches('*').to_string();
        for (name, _) in self.list_refs(&notes_tmp_prefix)? {
            let Some(rest) = name.strip_prefix(&notes_tmp_prefix) else {
                continue;
            };
            let local = format!("{notes_local_prefix}{rest}");
            merge_notes(self, &name, &local)?;
        }

        // Join each fetched archive ref's history into the local archive ref.
        let archive_tmp_prefix = archive_tmp.trim_end_matches('*').to_string();
        let archive_local_prefix = archive_pattern.trim_end_matches('*').to_string();
        for (name, tip) in self.list_refs(&archive_tmp_prefix)? {
            let Some(rest) = name.strip_prefix(&archive_tmp_prefix) else {
                continue;
            };
            let local = format!("{archive_local_prefix}{rest}");
            self.archive_commit(&tip, &local)?;
        }
        Ok(())
    }

    /// Push the devtools notes and archive refs to `remote`.
    fn push_notes_and_archive(
        &self,
        remote: &str,
        notes_pattern: &str,
        archive_pattern: &str,
    ) -> Result<(), ReviewError> {
        self.push(
            remote,
            &[
                format!("+{notes_pattern}:{notes_pattern}"),
                format!("+{archive_pattern}:{archive_pattern}"),
            ],
        )
    }
}

/// Where a remote's refs are staged locally during a metadata pull.
///
/// Notes patterns stay under `refs/notes/` so note tooling keeps working on
/// the staged copies.
pub fn remote_staging_pattern(remote: &str, pattern: &str) -> String {
    if let Some(rest) = pattern.strip_prefix("refs/notes/") {
        format!("refs/notes/remotes/{remote}/{rest}")
    } else {
        let rest = pattern.strip_prefix("refs/").unwrap_or(pattern);
        format!("refs/remotes/{remote}/{rest}")
    }
}

/// Union-merge the note lines of `source_ref` into `dest_ref`.
///
/// For every noted commit, lines present in the source but missing from the
/// destination are appended. The operation is associative, commutative, and
/// idempotent at the record-set level, which is what lets replicas exchange
/// notes in any order without coordination.
pub fn merge_notes<R: Repo + ?Sized>(
    repo: &R,
    source_ref: &str,
    dest_ref: &str,
) -> Result<(), ReviewError> {
    let source = repo.get_all_notes(source_ref)?;
    let dest = repo.get_all_notes(dest_ref)?;
    for (commit, lines) in source {
        let existing = dest.get(&commit);
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let present = existing.is_some_and(|have| have.iter().any(|l| l == &line));
            if !present {
                repo.append_note(dest_ref, &commit, &line)?;
            }
        }
    }
    Ok(())
}
