//! Repository backend that shells out to the `git` binary.
//!
//! Every operation is one or two plumbing invocations; no libgit2-style
//! bindings are involved, so the backend works against whatever git the
//! user already trusts. Ref updates go through `git update-ref` with an
//! expected old value, which is what gives [`Repo::set_ref`] its
//! compare-and-set semantics.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;

use crate::errors::ReviewError;
use crate::hash::{HashKind, ObjectHash, set_object_format};
use crate::internal::object::tree::{TreeItem, TreeItemMode};
use crate::repo::{CommitDetails, Repo, SubmitStrategy};

/// A repository driven through the `git` command line.
pub struct GitCliRepo {
    /// The root directory of the repository (where .git is).
    root: PathBuf,
}

impl GitCliRepo {
    /// Open the repository containing `path`.
    ///
    /// Also records the repository's object format for this thread, so
    /// in-process object hashing agrees with what git computes.
    pub fn open(path: &Path) -> Result<GitCliRepo, ReviewError> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(path)
            .output()?;
        if !output.status.success() {
            return Err(ReviewError::Backend(format!(
                "`git rev-parse --show-toplevel` failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let root = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        let repo = GitCliRepo { root };
        if let Ok(format) = repo.git_stdout(&["rev-parse", "--show-object-format"])
            && let Ok(kind) = HashKind::from_str(format.trim())
        {
            set_object_format(kind);
        }
        Ok(repo)
    }

    /// Run a git command and return its raw stdout.
    fn git_bytes(&self, args: &[&str]) -> Result<Vec<u8>, ReviewError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(ReviewError::Backend(format!(
                "`git {}` failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Run a git command and return its stdout as text.
    fn git_stdout(&self, args: &[&str]) -> Result<String, ReviewError> {
        Ok(String::from_utf8_lossy(&self.git_bytes(args)?).into_owned())
    }

    /// Run a git command, ignoring output.
    fn git_run(&self, args: &[&str]) -> Result<(), ReviewError> {
        self.git_bytes(args)?;
        Ok(())
    }

    /// Whether a git command succeeds; used for yes/no plumbing queries.
    fn git_succeeds(&self, args: &[&str]) -> Result<bool, ReviewError> {
        let status = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        Ok(status.success())
    }

    /// Run a git command with bytes on stdin, returning stdout as text.
    fn git_with_stdin(&self, args: &[&str], input: &[u8]) -> Result<String, ReviewError> {
        let mut child = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        child
            .stdin
            .take()
            .ok_or_else(|| ReviewError::Backend("git stdin unavailable".to_string()))?
            .write_all(input)?;
        let output = child.wait_with_output()?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(ReviewError::Backend(format!(
                "`git {}` failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn parse_hash(&self, text: &str) -> Result<ObjectHash, ReviewError> {
        ObjectHash::from_str(text.trim()).map_err(|_| ReviewError::InvalidHashValue(text.trim().to_string()))
    }
}

impl Repo for GitCliRepo {
    fn user_email(&self) -> Result<String, ReviewError> {
        let email = self.git_stdout(&["config", "user.email"])?;
        Ok(email.trim().to_string())
    }

    fn signing_key(&self) -> Result<Option<String>, ReviewError> {
        // `git config` exits nonzero when the key is unset.
        match self.git_stdout(&["config", "user.signingKey"]) {
            Ok(key) if !key.trim().is_empty() => Ok(Some(key.trim().to_string())),
            _ => Ok(None),
        }
    }

    fn submit_strategy(&self) -> Result<SubmitStrategy, ReviewError> {
        match self.git_stdout(&["config", "devtools.submitStrategy"]) {
            Ok(value) if !value.trim().is_empty() => value.trim().parse(),
            _ => Ok(SubmitStrategy::default()),
        }
    }

    fn has_ref(&self, reference: &str) -> Result<bool, ReviewError> {
        self.git_succeeds(&["show-ref", "--verify", "--quiet", reference])
    }

    fn get_commit_hash(&self, reference: &str) -> Result<ObjectHash, ReviewError> {
        let spec = format!("{reference}^{{commit}}");
        let out = self
            .git_stdout(&["rev-parse", "--verify", "--quiet", &spec])
            .map_err(|_| ReviewError::UnknownRef(reference.to_string()))?;
        self.parse_hash(&out)
    }

    fn has_commit(&self, hash: &ObjectHash) -> Result<bool, ReviewError> {
        let spec = format!("{hash}^{{commit}}");
        self.git_succeeds(&["cat-file", "-e", &spec])
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectHash)>, ReviewError> {
        let out = self.git_stdout(&[
            "for-each-ref",
            "--format=%(objectname) %(refname)",
            prefix,
        ])?;
        let mut refs = Vec::new();
        for line in out.lines() {
            if let Some((hash, name)) = line.split_once(' ') {
                refs.push((name.to_string(), self.parse_hash(hash)?));
            }
        }
        Ok(refs)
    }

    fn head_ref(&self) -> Result<String, ReviewError> {
        Ok(self.git_stdout(&["symbolic-ref", "HEAD"])?.trim().to_string())
    }

    fn switch_to_ref(&self, reference: &str) -> Result<(), ReviewError> {
        let short = reference.strip_prefix("refs/heads/").unwrap_or(reference);
        self.git_run(&["checkout", short])
    }

    fn set_ref(
        &self,
        reference: &str,
        new_hash: &ObjectHash,
        expected: Option<&ObjectHash>,
    ) -> Result<(), ReviewError> {
        let old = expected
            .map(|h| h.to_string())
            .unwrap_or_else(|| ObjectHash::zero_hex(new_hash.kind()));
        let new = new_hash.to_string();
        match self.git_run(&["update-ref", reference, &new, &old]) {
            Ok(()) => Ok(()),
            Err(_) => {
                let found = self
                    .get_commit_hash(reference)
                    .map(|h| h.to_string())
                    .unwrap_or_else(|_| "<none>".to_string());
                Err(ReviewError::RefMoved {
                    reference: reference.to_string(),
                    expected: expected
                        .map(|h| h.to_string())
                        .unwrap_or_else(|| "<none>".to_string()),
                    found,
                })
            }
        }
    }

    fn commit_details(&self, hash: &ObjectHash) -> Result<CommitDetails, ReviewError> {
        let spec = hash.to_string();
        let out = self.git_stdout(&[
            "show",
            "-s",
            "--format=%T%x00%P%x00%ae%x00%ce%x00%ct%x00%B",
            &spec,
        ])?;
        let mut fields = out.split('\0');
        let tree = fields
            .next()
            .ok_or_else(|| ReviewError::UnknownCommit(spec.clone()))?;
        let parents = fields
            .next()
            .ok_or_else(|| ReviewError::UnknownCommit(spec.clone()))?;
        let author_email = fields
            .next()
            .ok_or_else(|| ReviewError::UnknownCommit(spec.clone()))?;
        let committer_email = fields
            .next()
            .ok_or_else(|| ReviewError::UnknownCommit(spec.clone()))?;
        let time = fields
            .next()
            .ok_or_else(|| ReviewError::UnknownCommit(spec.clone()))?;
        let message = fields.next().unwrap_or("");

        let parents = parents
            .split_whitespace()
            .map(|p| self.parse_hash(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CommitDetails {
            tree: self.parse_hash(tree)?,
            parents,
            author_email: author_email.trim().to_string(),
            committer_email: committer_email.trim().to_string(),
            time: time
                .trim()
                .parse()
                .map_err(|_| ReviewError::Backend(format!("bad commit time `{time}`")))?,
            message: message.trim_end().to_string(),
        })
    }

    fn has_uncommitted_changes(&self) -> Result<bool, ReviewError> {
        let out = self.git_stdout(&["status", "--porcelain"])?;
        Ok(!out.trim().is_empty())
    }

    fn read_blob(&self, hash: &ObjectHash) -> Result<Vec<u8>, ReviewError> {
        let spec = hash.to_string();
        self.git_bytes(&["cat-file", "blob", &spec])
    }

    fn store_blob(&self, data: &[u8]) -> Result<ObjectHash, ReviewError> {
        let out = self.git_with_stdin(&["hash-object", "-w", "--stdin"], data)?;
        self.parse_hash(&out)
    }

    fn read_tree(&self, revision: &str) -> Result<Vec<TreeItem>, ReviewError> {
        let out = self.git_stdout(&["ls-tree", revision])?;
        let mut items = Vec::new();
        for line in out.lines() {
            // `<mode> <type> <hash>\t<name>`
            let (meta, name) = line
                .split_once('\t')
                .ok_or(ReviewError::InvalidTreeObject)?;
            let mut fields = meta.split_whitespace();
            let mode = fields.next().ok_or(ReviewError::InvalidTreeObject)?;
            let _obj_type = fields.next().ok_or(ReviewError::InvalidTreeObject)?;
            let hash = fields.next().ok_or(ReviewError::InvalidTreeObject)?;
            items.push(TreeItem::new(
                TreeItemMode::from_mode_bytes(mode.as_bytes())?,
                self.parse_hash(hash)?,
                name.to_string(),
            ));
        }
        Ok(items)
    }

    fn store_tree(&self, items: Vec<TreeItem>) -> Result<ObjectHash, ReviewError> {
        let mut input = String::new();
        for item in &items {
            let kind = if item.mode.is_tree() { "tree" } else { "blob" };
            input.push_str(&format!("{} {kind} {}\t{}\n", item.mode, item.id, item.name));
        }
        let out = self.git_with_stdin(&["mktree"], input.as_bytes())?;
        self.parse_hash(&out)
    }

    fn create_commit(
        &self,
        tree: &ObjectHash,
        parents: &[ObjectHash],
        message: &str,
    ) -> Result<ObjectHash, ReviewError> {
        let tree = tree.to_string();
        let mut args = vec!["commit-tree".to_string(), tree];
        for parent in parents {
            args.push("-p".to_string());
            args.push(parent.to_string());
        }
        args.push("-m".to_string());
        args.push(message.to_string());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.git_stdout(&arg_refs)?;
        self.parse_hash(&out)
    }

    fn read_file_at(
        &self,
        commit: &ObjectHash,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ReviewError> {
        let spec = format!("{commit}:{path}");
        if !self.git_succeeds(&["cat-file", "-e", &spec])? {
            return Ok(None);
        }
        Ok(Some(self.git_bytes(&["cat-file", "blob", &spec])?))
    }

    fn merge_base(
        &self,
        a: &ObjectHash,
        b: &ObjectHash,
    ) -> Result<Option<ObjectHash>, ReviewError> {
        let (a, b) = (a.to_string(), b.to_string());
        let output = Command::new("git")
            .args(["merge-base", &a, &b])
            .current_dir(&self.root)
            .output()?;
        if output.status.success() {
            Ok(Some(self.parse_hash(&String::from_utf8_lossy(&output.stdout))?))
        } else {
            Ok(None)
        }
    }

    fn is_ancestor(
        &self,
        ancestor: &ObjectHash,
        descendant: &ObjectHash,
    ) -> Result<bool, ReviewError> {
        let (a, d) = (ancestor.to_string(), descendant.to_string());
        self.git_succeeds(&["merge-base", "--is-ancestor", &a, &d])
    }

    fn commits_between(
        &self,
        from: Option<&ObjectHash>,
        to: &ObjectHash,
    ) -> Result<Vec<ObjectHash>, ReviewError> {
        let range = match from {
            Some(from) => format!("{from}..{to}"),
            None => to.to_string(),
        };
        let out = self.git_stdout(&["rev-list", "--reverse", &range])?;
        out.split_whitespace().map(|h| self.parse_hash(h)).collect()
    }

    fn get_notes(
        &self,
        notes_ref: &str,
        commit: &ObjectHash,
    ) -> Result<Vec<String>, ReviewError> {
        let commit = commit.to_string();
        let output = Command::new("git")
            .args(["notes", "--ref", notes_ref, "show", &commit])
            .current_dir(&self.root)
            .output()?;
        if !output.status.success() {
            // No note on this commit (or the ref does not exist yet).
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }

    fn append_note(
        &self,
        notes_ref: &str,
        commit: &ObjectHash,
        line: &str,
    ) -> Result<(), ReviewError> {
        let commit = commit.to_string();
        self.git_run(&["notes", "--ref", notes_ref, "append", "-m", line, &commit])
    }

    fn get_all_notes(
        &self,
        notes_ref: &str,
    ) -> Result<BTreeMap<ObjectHash, Vec<String>>, ReviewError> {
        let output = Command::new("git")
            .args(["notes", "--ref", notes_ref, "list"])
            .current_dir(&self.root)
            .output()?;
        if !output.status.success() {
            return Ok(BTreeMap::new());
        }
        let mut notes = BTreeMap::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let Some((note_obj, commit)) = line.split_once(' ') else {
                continue;
            };
            let note_hash = self.parse_hash(note_obj)?;
            let commit_hash = self.parse_hash(commit)?;
            let content = self.read_blob(&note_hash)?;
            let lines = String::from_utf8_lossy(&content)
                .lines()
                .map(str::to_string)
                .collect();
            notes.insert(commit_hash, lines);
        }
        Ok(notes)
    }

    fn join_ref_history(
        &self,
        reference: &str,
        other_tip: &ObjectHash,
        message: &str,
    ) -> Result<(), ReviewError> {
        let current = self.get_commit_hash(reference).ok();
        let tree_of = current.as_ref().unwrap_or(other_tip);
        let tree = self.commit_details(tree_of)?.tree;
        let parents: Vec<ObjectHash> = current.into_iter().chain([*other_tip]).collect();
        let joined = self.create_commit(&tree, &parents, message)?;
        let new = joined.to_string();
        self.git_run(&["update-ref", reference, &new])
    }

    fn merge_ref(
        &self,
        source_ref: &str,
        fast_forward_only: bool,
        message: &str,
    ) -> Result<(), ReviewError> {
        if fast_forward_only {
            self.git_run(&["merge", "--ff-only", source_ref])
        } else {
            self.git_run(&["merge", "--no-ff", "-m", message, source_ref])
        }
    }

    fn rebase_ref(
        &self,
        source_ref: &str,
        onto: &ObjectHash,
    ) -> Result<ObjectHash, ReviewError> {
        let onto = onto.to_string();
        self.git_run(&["rebase", &onto, source_ref])?;
        self.get_commit_hash("HEAD")
    }

    fn fetch(&self, remote: &str, refspecs: &[String]) -> Result<(), ReviewError> {
        let mut args = vec!["fetch".to_string(), remote.to_string()];
        args.extend(refspecs.iter().cloned());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.git_run(&arg_refs)
    }

    fn push(&self, remote: &str, refspecs: &[String]) -> Result<(), ReviewError> {
        let mut args = vec!["push".to_string(), remote.to_string()];
        args.extend(refspecs.iter().cloned());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.git_run(&arg_refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn scratch_repo() -> Option<(tempfile::TempDir, GitCliRepo)> {
        if !git_available() {
            eprintln!("git unavailable; skipping GitCliRepo test");
            return None;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .expect("git");
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q", "-b", "master"]);
        run(&["config", "user.email", "alice@example.com"]);
        run(&["config", "user.name", "alice"]);
        let repo = GitCliRepo::open(dir.path()).expect("open");
        Some((dir, repo))
    }

    #[test]
    fn test_blob_and_tree_round_trip() {
        let Some((_dir, repo)) = scratch_repo() else {
            return;
        };
        let blob = repo.store_blob(b"alice@example.com").unwrap();
        assert_eq!(repo.read_blob(&blob).unwrap(), b"alice@example.com");

        let items = vec![TreeItem::new(TreeItemMode::Blob, blob, "NAME".to_string())];
        let tree = repo.store_tree(items.clone()).unwrap();
        assert_eq!(repo.read_tree(&tree.to_string()).unwrap(), items);
    }

    #[test]
    fn test_commit_notes_and_ancestry() {
        let Some((_dir, repo)) = scratch_repo() else {
            return;
        };
        let tree = repo.store_tree(vec![]).unwrap();
        let a = repo.create_commit(&tree, &[], "a").unwrap();
        let b = repo.create_commit(&tree, &[a], "b").unwrap();
        repo.set_ref("refs/heads/master", &b, None).unwrap();

        assert!(repo.is_ancestor(&a, &b).unwrap());
        assert_eq!(repo.commits_between(Some(&a), &b).unwrap(), vec![b]);

        repo.append_note("refs/notes/devtools/reviews", &a, "{\"timestamp\":\"1\"}")
            .unwrap();
        let notes = repo.get_notes("refs/notes/devtools/reviews", &a).unwrap();
        assert!(notes.contains(&"{\"timestamp\":\"1\"}".to_string()));
        let all = repo.get_all_notes("refs/notes/devtools/reviews").unwrap();
        assert!(all.contains_key(&a));
    }

    #[test]
    fn test_set_ref_compare_and_set_races() {
        let Some((_dir, repo)) = scratch_repo() else {
            return;
        };
        let tree = repo.store_tree(vec![]).unwrap();
        let a = repo.create_commit(&tree, &[], "a").unwrap();
        let b = repo.create_commit(&tree, &[a], "b").unwrap();
        repo.set_ref("refs/devtools/forks", &a, None).unwrap();
        let err = repo.set_ref("refs/devtools/forks", &b, Some(&b)).unwrap_err();
        assert!(matches!(err, ReviewError::RefMoved { .. }));
        repo.set_ref("refs/devtools/forks", &b, Some(&a)).unwrap();
    }
}
