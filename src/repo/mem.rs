//! In-memory repository backend.
//!
//! `MemRepo` keeps content-addressed maps of blobs, trees, and commits,
//! hashed with the same codecs git uses via [`crate::internal::object`],
//! plus refs and per-ref note maps. It exists so the review and fork layers
//! can be tested hermetically, including clone-to-clone synchronization:
//! two `MemRepo`s linked with [`MemRepo::link_remote`] fetch and push from
//! each other.
//!
//! Note appends advance a synthetic commit chain per notes ref, so the
//! ancestry-based idempotence checks of fork ingestion are observable here
//! exactly as they are against real git.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::ReviewError;
use crate::hash::ObjectHash;
use crate::internal::object::blob::Blob;
use crate::internal::object::commit::Commit;
use crate::internal::object::signature::{Signature, SignatureType};
use crate::internal::object::tree::{Tree, TreeItem, TreeItemMode};
use crate::repo::{CommitDetails, Repo, SubmitStrategy};

#[derive(Debug, Default)]
struct MemState {
    blobs: HashMap<ObjectHash, Vec<u8>>,
    trees: HashMap<ObjectHash, Vec<TreeItem>>,
    commits: HashMap<ObjectHash, Commit>,
    refs: BTreeMap<String, ObjectHash>,
    notes: HashMap<String, BTreeMap<ObjectHash, Vec<String>>>,
    head: String,
    user_email: String,
    user_name: String,
    signing_key: Option<String>,
    submit_strategy: SubmitStrategy,
    dirty: bool,
    clock: u64,
}

impl MemState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn resolve(&self, reference: &str) -> Result<ObjectHash, ReviewError> {
        if reference == "HEAD" {
            return self
                .refs
                .get(&self.head)
                .copied()
                .ok_or_else(|| ReviewError::UnknownRef("HEAD".to_string()));
        }
        if let Some(hash) = self.refs.get(reference) {
            return Ok(*hash);
        }
        if let Ok(hash) = ObjectHash::from_str(reference)
            && self.commits.contains_key(&hash)
        {
            return Ok(hash);
        }
        let qualified = format!("refs/heads/{reference}");
        if let Some(hash) = self.refs.get(&qualified) {
            return Ok(*hash);
        }
        Err(ReviewError::UnknownRef(reference.to_string()))
    }

    fn store_blob(&mut self, data: &[u8]) -> ObjectHash {
        let blob = Blob::from_content_bytes(data);
        let id = blob.id;
        self.blobs.insert(id, blob.data);
        id
    }

    fn store_tree(&mut self, items: Vec<TreeItem>) -> Result<ObjectHash, ReviewError> {
        let tree = Tree::from_tree_items(items)?;
        let id = tree.id;
        self.trees.insert(id, tree.tree_items);
        Ok(id)
    }

    fn create_commit(
        &mut self,
        tree: &ObjectHash,
        parents: &[ObjectHash],
        message: &str,
    ) -> Result<ObjectHash, ReviewError> {
        let time = self.tick() as usize;
        let author = Signature::new(
            SignatureType::Author,
            &self.user_name,
            &self.user_email,
            time,
        );
        let committer = Signature::new(
            SignatureType::Committer,
            &self.user_name,
            &self.user_email,
            time,
        );
        let commit = Commit::new(author, committer, *tree, parents.to_vec(), message)?;
        let id = commit.id;
        self.commits.insert(id, commit);
        Ok(id)
    }

    fn empty_tree(&mut self) -> Result<ObjectHash, ReviewError> {
        self.store_tree(vec![])
    }

    fn ancestors(&self, start: &ObjectHash) -> HashSet<ObjectHash> {
        let mut seen = HashSet::new();
        let mut stack = vec![*start];
        while let Some(hash) = stack.pop() {
            if !seen.insert(hash) {
                continue;
            }
            if let Some(commit) = self.commits.get(&hash) {
                stack.extend(commit.parent_commit_ids.iter().copied());
            }
        }
        seen
    }

    /// Advance the synthetic history chain of a notes ref by one commit.
    fn advance_note_history(&mut self, notes_ref: &str) -> Result<(), ReviewError> {
        let tree = self.empty_tree()?;
        let parents: Vec<ObjectHash> = self.refs.get(notes_ref).copied().into_iter().collect();
        let tip = self.create_commit(&tree, &parents, &format!("notes update on {notes_ref}"))?;
        self.refs.insert(notes_ref.to_string(), tip);
        Ok(())
    }

    fn read_file_in_tree(&self, tree: &ObjectHash, path: &str) -> Option<Vec<u8>> {
        let mut current = *tree;
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(component) = components.next() {
            let items = self.trees.get(&current)?;
            let item = items.iter().find(|i| i.name == component)?;
            if components.peek().is_none() {
                return match item.mode {
                    TreeItemMode::Tree => None,
                    _ => self.blobs.get(&item.id).cloned(),
                };
            }
            if !item.mode.is_tree() {
                return None;
            }
            current = item.id;
        }
        None
    }

    /// Build a nested tree out of (path, content) pairs.
    fn build_tree(&mut self, files: &[(&str, &str)]) -> Result<ObjectHash, ReviewError> {
        #[derive(Default)]
        struct Dir<'a> {
            files: Vec<(&'a str, &'a str)>,
            dirs: BTreeMap<&'a str, Dir<'a>>,
        }
        fn insert<'a>(dir: &mut Dir<'a>, path: &'a str, content: &'a str) {
            match path.split_once('/') {
                Some((head, rest)) => insert(dir.dirs.entry(head).or_default(), rest, content),
                None => dir.files.push((path, content)),
            }
        }
        fn store(state: &mut MemState, dir: &Dir<'_>) -> Result<ObjectHash, ReviewError> {
            let mut items = Vec::new();
            for (name, content) in &dir.files {
                let id = state.store_blob(content.as_bytes());
                items.push(TreeItem::new(TreeItemMode::Blob, id, name.to_string()));
            }
            for (name, sub) in &dir.dirs {
                let id = store(state, sub)?;
                items.push(TreeItem::new(TreeItemMode::Tree, id, name.to_string()));
            }
            state.store_tree(items)
        }

        let mut root = Dir::default();
        for (path, content) in files {
            insert(&mut root, path, content);
        }
        store(self, &root)
    }
}

/// An in-memory repository.
pub struct MemRepo {
    state: Arc<Mutex<MemState>>,
    remotes: Mutex<HashMap<String, Arc<Mutex<MemState>>>>,
}

impl MemRepo {
    /// A fresh repository for the given identity, with HEAD on
    /// `refs/heads/master` (unborn until the first commit).
    pub fn new(user_email: &str) -> MemRepo {
        let name = user_email.split('@').next().unwrap_or(user_email).to_string();
        MemRepo {
            state: Arc::new(Mutex::new(MemState {
                head: "refs/heads/master".to_string(),
                user_email: user_email.to_string(),
                user_name: name,
                clock: 1_700_000_000,
                ..MemState::default()
            })),
            remotes: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().expect("MemRepo lock poisoned")
    }

    /// Make `other` reachable as the remote `name` for fetch/push.
    pub fn link_remote(&self, name: &str, other: &MemRepo) {
        self.remotes
            .lock()
            .expect("MemRepo remotes lock poisoned")
            .insert(name.to_string(), Arc::clone(&other.state));
    }

    /// Configure the signing key id.
    pub fn set_signing_key(&self, key: Option<&str>) {
        self.lock().signing_key = key.map(str::to_string);
    }

    /// Configure the submit strategy.
    pub fn set_submit_strategy(&self, strategy: SubmitStrategy) {
        self.lock().submit_strategy = strategy;
    }

    /// Mark the working tree dirty or clean.
    pub fn set_dirty(&self, dirty: bool) {
        self.lock().dirty = dirty;
    }

    /// Create a commit with the given files on `reference` (creating the
    /// ref as needed) and return its hash. Test scaffolding.
    pub fn commit_files(
        &self,
        reference: &str,
        message: &str,
        files: &[(&str, &str)],
    ) -> Result<ObjectHash, ReviewError> {
        let mut state = self.lock();
        let tree = state.build_tree(files)?;
        let parents: Vec<ObjectHash> = state.refs.get(reference).copied().into_iter().collect();
        let commit = state.create_commit(&tree, &parents, message)?;
        state.refs.insert(reference.to_string(), commit);
        Ok(commit)
    }

    /// Create a commit whose committer is a different identity. Test
    /// scaffolding for the fork ownership filter.
    pub fn commit_files_as(
        &self,
        reference: &str,
        message: &str,
        files: &[(&str, &str)],
        email: &str,
    ) -> Result<ObjectHash, ReviewError> {
        let mut state = self.lock();
        let tree = state.build_tree(files)?;
        let parents: Vec<ObjectHash> = state.refs.get(reference).copied().into_iter().collect();
        let time = state.tick() as usize;
        let name = email.split('@').next().unwrap_or(email);
        let author = Signature::new(SignatureType::Author, name, email, time);
        let committer = Signature::new(SignatureType::Committer, name, email, time);
        let commit = Commit::new(author, committer, tree, parents, message)?;
        let id = commit.id;
        state.commits.insert(id, commit);
        state.refs.insert(reference.to_string(), id);
        Ok(id)
    }

    /// Copy every object from `source` into `dest` (content-addressed, so
    /// the union is always safe), then mirror the matched refs.
    fn copy_between(
        source: &MemState,
        dest: &mut MemState,
        refspecs: &[String],
    ) -> Result<(), ReviewError> {
        for (id, data) in &source.blobs {
            dest.blobs.entry(*id).or_insert_with(|| data.clone());
        }
        for (id, items) in &source.trees {
            dest.trees.entry(*id).or_insert_with(|| items.clone());
        }
        for (id, commit) in &source.commits {
            dest.commits.entry(*id).or_insert_with(|| commit.clone());
        }
        for spec in refspecs {
            let spec = spec.strip_prefix('+').unwrap_or(spec);
            let (src, dst) = spec
                .split_once(':')
                .ok_or_else(|| ReviewError::Validation(format!("bad refspec `{spec}`")))?;
            let matches: Vec<(String, String)> = if let Some(prefix) = src.strip_suffix('*') {
                let dst_prefix = dst.strip_suffix('*').ok_or_else(|| {
                    ReviewError::Validation(format!("bad glob refspec `{spec}`"))
                })?;
                source
                    .refs
                    .range(prefix.to_string()..)
                    .take_while(|(name, _)| name.starts_with(prefix))
                    .map(|(name, _)| {
                        (name.clone(), format!("{dst_prefix}{}", &name[prefix.len()..]))
                    })
                    .collect()
            } else {
                if !source.refs.contains_key(src) {
                    continue;
                }
                vec![(src.to_string(), dst.to_string())]
            };
            for (src_name, dst_name) in matches {
                if let Some(tip) = source.refs.get(&src_name) {
                    dest.refs.insert(dst_name.clone(), *tip);
                }
                if let Some(content) = source.notes.get(&src_name) {
                    dest.notes.insert(dst_name, content.clone());
                }
            }
        }
        Ok(())
    }

    fn remote_state(&self, remote: &str) -> Result<Arc<Mutex<MemState>>, ReviewError> {
        self.remotes
            .lock()
            .expect("MemRepo remotes lock poisoned")
            .get(remote)
            .cloned()
            .ok_or_else(|| ReviewError::Backend(format!("unknown remote `{remote}`")))
    }
}

impl Repo for MemRepo {
    fn user_email(&self) -> Result<String, ReviewError> {
        Ok(self.lock().user_email.clone())
    }

    fn signing_key(&self) -> Result<Option<String>, ReviewError> {
        Ok(self.lock().signing_key.clone())
    }

    fn submit_strategy(&self) -> Result<SubmitStrategy, ReviewError> {
        Ok(self.lock().submit_strategy)
    }

    fn has_ref(&self, reference: &str) -> Result<bool, ReviewError> {
        Ok(self.lock().refs.contains_key(reference))
    }

    fn get_commit_hash(&self, reference: &str) -> Result<ObjectHash, ReviewError> {
        self.lock().resolve(reference)
    }

    fn has_commit(&self, hash: &ObjectHash) -> Result<bool, ReviewError> {
        Ok(self.lock().commits.contains_key(hash))
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectHash)>, ReviewError> {
        let state = self.lock();
        Ok(state
            .refs
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, hash)| (name.clone(), *hash))
            .collect())
    }

    fn head_ref(&self) -> Result<String, ReviewError> {
        Ok(self.lock().head.clone())
    }

    fn switch_to_ref(&self, reference: &str) -> Result<(), ReviewError> {
        let mut state = self.lock();
        let full = if state.refs.contains_key(reference) {
            reference.to_string()
        } else {
            let qualified = format!("refs/heads/{reference}");
            if !state.refs.contains_key(&qualified) {
                return Err(ReviewError::UnknownRef(reference.to_string()));
            }
            qualified
        };
        state.head = full;
        Ok(())
    }

    fn set_ref(
        &self,
        reference: &str,
        new_hash: &ObjectHash,
        expected: Option<&ObjectHash>,
    ) -> Result<(), ReviewError> {
        let mut state = self.lock();
        let current = state.refs.get(reference).copied();
        match (current, expected) {
            (None, None) => {}
            (Some(found), Some(want)) if found == *want => {}
            (found, want) => {
                return Err(ReviewError::RefMoved {
                    reference: reference.to_string(),
                    expected: want.map(|h| h.to_string()).unwrap_or_else(|| "<none>".into()),
                    found: found.map(|h| h.to_string()).unwrap_or_else(|| "<none>".into()),
                });
            }
        }
        state.refs.insert(reference.to_string(), *new_hash);
        Ok(())
    }

    fn commit_details(&self, hash: &ObjectHash) -> Result<CommitDetails, ReviewError> {
        let state = self.lock();
        let commit = state
            .commits
            .get(hash)
            .ok_or_else(|| ReviewError::UnknownCommit(hash.to_string()))?;
        Ok(CommitDetails {
            tree: commit.tree_id,
            parents: commit.parent_commit_ids.clone(),
            author_email: commit.author.email.clone(),
            committer_email: commit.committer.email.clone(),
            time: commit.committer.timestamp as u64,
            message: commit.message.clone(),
        })
    }

    fn has_uncommitted_changes(&self) -> Result<bool, ReviewError> {
        Ok(self.lock().dirty)
    }

    fn read_blob(&self, hash: &ObjectHash) -> Result<Vec<u8>, ReviewError> {
        self.lock()
            .blobs
            .get(hash)
            .cloned()
            .ok_or_else(|| ReviewError::Backend(format!("no blob {hash}")))
    }

    fn store_blob(&self, data: &[u8]) -> Result<ObjectHash, ReviewError> {
        Ok(self.lock().store_blob(data))
    }

    fn read_tree(&self, revision: &str) -> Result<Vec<TreeItem>, ReviewError> {
        let state = self.lock();
        if let Ok(hash) = ObjectHash::from_str(revision)
            && let Some(items) = state.trees.get(&hash)
        {
            return Ok(items.clone());
        }
        let commit_hash = state.resolve(revision)?;
        let commit = state
            .commits
            .get(&commit_hash)
            .ok_or_else(|| ReviewError::UnknownCommit(revision.to_string()))?;
        state
            .trees
            .get(&commit.tree_id)
            .cloned()
            .ok_or_else(|| ReviewError::Backend(format!("no tree {}", commit.tree_id)))
    }

    fn store_tree(&self, items: Vec<TreeItem>) -> Result<ObjectHash, ReviewError> {
        self.lock().store_tree(items)
    }

    fn create_commit(
        &self,
        tree: &ObjectHash,
        parents: &[ObjectHash],
        message: &str,
    ) -> Result<ObjectHash, ReviewError> {
        self.lock().create_commit(tree, parents, message)
    }

    fn read_file_at(
        &self,
        commit: &ObjectHash,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ReviewError> {
        let state = self.lock();
        let commit = state
            .commits
            .get(commit)
            .ok_or_else(|| ReviewError::UnknownCommit(commit.to_string()))?;
        Ok(state.read_file_in_tree(&commit.tree_id, path))
    }

    fn merge_base(
        &self,
        a: &ObjectHash,
        b: &ObjectHash,
    ) -> Result<Option<ObjectHash>, ReviewError> {
        let state = self.lock();
        let ancestors_a = state.ancestors(a);
        let shared: Vec<ObjectHash> = state
            .ancestors(b)
            .into_iter()
            .filter(|h| ancestors_a.contains(h))
            .collect();
        Ok(shared
            .into_iter()
            .max_by_key(|h| state.commits.get(h).map(|c| c.committer.timestamp).unwrap_or(0)))
    }

    fn is_ancestor(
        &self,
        ancestor: &ObjectHash,
        descendant: &ObjectHash,
    ) -> Result<bool, ReviewError> {
        Ok(self.lock().ancestors(descendant).contains(ancestor))
    }

    fn commits_between(
        &self,
        from: Option<&ObjectHash>,
        to: &ObjectHash,
    ) -> Result<Vec<ObjectHash>, ReviewError> {
        let state = self.lock();
        let excluded = from.map(|f| state.ancestors(f)).unwrap_or_default();
        let mut found: Vec<ObjectHash> = state
            .ancestors(to)
            .into_iter()
            .filter(|h| !excluded.contains(h))
            .collect();
        found.sort_by_key(|h| {
            (
                state.commits.get(h).map(|c| c.committer.timestamp).unwrap_or(0),
                h.to_string(),
            )
        });
        Ok(found)
    }

    fn get_notes(
        &self,
        notes_ref: &str,
        commit: &ObjectHash,
    ) -> Result<Vec<String>, ReviewError> {
        Ok(self
            .lock()
            .notes
            .get(notes_ref)
            .and_then(|notes| notes.get(commit))
            .cloned()
            .unwrap_or_default())
    }

    fn append_note(
        &self,
        notes_ref: &str,
        commit: &ObjectHash,
        line: &str,
    ) -> Result<(), ReviewError> {
        let mut state = self.lock();
        if !state.commits.contains_key(commit) {
            return Err(ReviewError::UnknownCommit(commit.to_string()));
        }
        state
            .notes
            .entry(notes_ref.to_string())
            .or_default()
            .entry(*commit)
            .or_default()
            .push(line.to_string());
        state.advance_note_history(notes_ref)
    }

    fn get_all_notes(
        &self,
        notes_ref: &str,
    ) -> Result<BTreeMap<ObjectHash, Vec<String>>, ReviewError> {
        Ok(self.lock().notes.get(notes_ref).cloned().unwrap_or_default())
    }

    fn join_ref_history(
        &self,
        reference: &str,
        other_tip: &ObjectHash,
        message: &str,
    ) -> Result<(), ReviewError> {
        let mut state = self.lock();
        let current = state.refs.get(reference).copied();
        let tree = match current {
            Some(tip) => state
                .commits
                .get(&tip)
                .map(|c| c.tree_id)
                .ok_or_else(|| ReviewError::UnknownCommit(tip.to_string()))?,
            None => state
                .commits
                .get(other_tip)
                .map(|c| c.tree_id)
                .ok_or_else(|| ReviewError::UnknownCommit(other_tip.to_string()))?,
        };
        let parents: Vec<ObjectHash> = current.into_iter().chain([*other_tip]).collect();
        let joined = state.create_commit(&tree, &parents, message)?;
        state.refs.insert(reference.to_string(), joined);
        Ok(())
    }

    fn merge_ref(
        &self,
        source_ref: &str,
        fast_forward_only: bool,
        message: &str,
    ) -> Result<(), ReviewError> {
        let mut state = self.lock();
        let branch = state.head.clone();
        let source = state.resolve(source_ref)?;
        let current = state.refs.get(&branch).copied();
        match current {
            None => {
                state.refs.insert(branch, source);
                Ok(())
            }
            Some(tip) if state.ancestors(&tip).contains(&source) => Ok(()),
            Some(tip) if fast_forward_only => {
                if !state.ancestors(&source).contains(&tip) {
                    return Err(ReviewError::Backend(format!(
                        "cannot fast-forward {branch} to {source_ref}"
                    )));
                }
                state.refs.insert(branch, source);
                Ok(())
            }
            Some(tip) => {
                // --no-ff semantics: always record a merge commit
                let tree = state
                    .commits
                    .get(&source)
                    .map(|c| c.tree_id)
                    .ok_or_else(|| ReviewError::UnknownCommit(source.to_string()))?;
                let merged = state.create_commit(&tree, &[tip, source], message)?;
                state.refs.insert(branch, merged);
                Ok(())
            }
        }
    }

    fn rebase_ref(
        &self,
        source_ref: &str,
        onto: &ObjectHash,
    ) -> Result<ObjectHash, ReviewError> {
        let source_full = {
            let state = self.lock();
            if state.refs.contains_key(source_ref) {
                source_ref.to_string()
            } else {
                format!("refs/heads/{source_ref}")
            }
        };
        let source_tip = self.get_commit_hash(&source_full)?;
        let base = self.merge_base(&source_tip, onto)?;
        let to_replay = self.commits_between(base.as_ref(), &source_tip)?;

        let mut state = self.lock();
        let mut new_tip = *onto;
        for old in to_replay {
            let (tree, message) = {
                let commit = state
                    .commits
                    .get(&old)
                    .ok_or_else(|| ReviewError::UnknownCommit(old.to_string()))?;
                (commit.tree_id, commit.message.clone())
            };
            new_tip = state.create_commit(&tree, &[new_tip], &message)?;
        }
        state.refs.insert(source_full, new_tip);
        Ok(new_tip)
    }

    fn fetch(&self, remote: &str, refspecs: &[String]) -> Result<(), ReviewError> {
        let remote_state = self.remote_state(remote)?;
        let source = remote_state.lock().expect("remote MemRepo lock poisoned");
        let mut dest = self.lock();
        MemRepo::copy_between(&source, &mut dest, refspecs)
    }

    fn push(&self, remote: &str, refspecs: &[String]) -> Result<(), ReviewError> {
        let remote_state = self.remote_state(remote)?;
        let source = self.lock();
        let mut dest = remote_state.lock().expect("remote MemRepo lock poisoned");
        MemRepo::copy_between(&source, &mut dest, refspecs)
    }
}
