//! The Commit object records a tree, the parent commits it builds on, the
//! author and committer identities, and a message. Review metadata leans on
//! commits in two ways: every record is anchored on one, and the note refs,
//! archive refs, and fork registry are themselves commit-backed so their
//! history graphs can be merged by reachability alone.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;

use crate::errors::ReviewError;
use crate::hash::ObjectHash;
use crate::internal::object::GitObject;
use crate::internal::object::signature::{Signature, SignatureType};
use crate::internal::object::types::ObjectType;

/// The `Commit` struct is used to represent a commit object.
///
/// - The tree id points to the complete state of the repository at the time
///   of the commit.
/// - The parent commit ids chain commits into the history graph; a merge
///   commit carries more than one.
/// - The author and committer fields contain name, email address, timestamp
///   and timezone; the committer email is what the fork ownership filter
///   trusts.
#[derive(Eq, Debug, Clone)]
pub struct Commit {
    pub id: ObjectHash,
    pub tree_id: ObjectHash,
    pub parent_commit_ids: Vec<ObjectHash>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree: {}", self.tree_id)?;
        for parent in self.parent_commit_ids.iter() {
            writeln!(f, "parent: {parent}")?;
        }
        writeln!(f, "author {}", self.author)?;
        writeln!(f, "committer {}", self.committer)?;
        writeln!(f, "{}", self.message)
    }
}

impl Commit {
    pub fn new(
        author: Signature,
        committer: Signature,
        tree_id: ObjectHash,
        parent_commit_ids: Vec<ObjectHash>,
        message: &str,
    ) -> Result<Commit, ReviewError> {
        let mut commit = Commit {
            id: ObjectHash::default(),
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message: message.to_string(),
        };
        commit.id = commit.computed_id()?;
        Ok(commit)
    }

    /// Build a commit for the given identity at the given epoch second.
    pub fn from_tree_id(
        tree_id: ObjectHash,
        parent_commit_ids: Vec<ObjectHash>,
        name: &str,
        email: &str,
        timestamp: usize,
        message: &str,
    ) -> Result<Commit, ReviewError> {
        let author = Signature::new(SignatureType::Author, name, email, timestamp);
        let committer = Signature::new(SignatureType::Committer, name, email, timestamp);
        Commit::new(author, committer, tree_id, parent_commit_ids, message)
    }

    /// The first meaningful line of the message.
    ///
    /// If the message contains a PGP signature block, returns the first
    /// non-empty line after it.
    pub fn format_message(&self) -> String {
        if let Some(pos) = self
            .message
            .lines()
            .position(|line| line.contains("-----END PGP SIGNATURE-----"))
        {
            return self
                .message
                .lines()
                .skip(pos + 1)
                .find(|line| !line.trim().is_empty())
                .map(|line| line.to_owned())
                .unwrap_or_else(|| self.message.clone());
        }

        self.message
            .lines()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.to_owned())
            .unwrap_or_else(|| self.message.clone())
    }
}

impl GitObject for Commit {
    fn parse(data: &[u8], id: ObjectHash) -> Result<Self, ReviewError> {
        let mut commit = data;

        // Tree line: `tree <hex>\n`
        let tree_end = commit.find_byte(0x0a).ok_or(ReviewError::InvalidCommitObject)?;
        if commit.len() < 5 || &commit[..5] != b"tree " {
            return Err(ReviewError::InvalidCommitObject);
        }
        let tree_hex = commit[5..tree_end]
            .to_str()
            .map_err(|_| ReviewError::InvalidCommitObject)?;
        let tree_id =
            ObjectHash::from_str(tree_hex).map_err(|_| ReviewError::InvalidCommitObject)?;
        let binding = commit[tree_end + 1..].to_vec();
        commit = &binding;

        // Parent lines up to the author line.
        let author_begin = commit
            .find("author")
            .ok_or(ReviewError::InvalidCommitObject)?;
        let mut parent_commit_ids = Vec::new();
        for parent in commit[..author_begin].find_iter("parent") {
            let parent_end = commit[parent..]
                .find_byte(0x0a)
                .ok_or(ReviewError::InvalidCommitObject)?;
            let hex = commit[parent + 7..parent + parent_end]
                .to_str()
                .map_err(|_| ReviewError::InvalidCommitObject)?;
            parent_commit_ids
                .push(ObjectHash::from_str(hex).map_err(|_| ReviewError::InvalidCommitObject)?);
        }
        let binding = commit[author_begin..].to_vec();
        commit = &binding;

        // Author line, then committer line.
        let author_end = commit.find_byte(0x0a).ok_or(ReviewError::InvalidCommitObject)?;
        let author = Signature::from_data(commit[..author_end].to_vec())?;
        let binding = commit[author_end + 1..].to_vec();
        commit = &binding;

        let committer_end = commit.find_byte(0x0a).ok_or(ReviewError::InvalidCommitObject)?;
        let committer = Signature::from_data(commit[..committer_end].to_vec())?;

        // The rest is the message (possibly including a gpgsig block).
        let message = String::from_utf8_lossy(&commit[committer_end + 1..]).to_string();

        Ok(Commit {
            id,
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message,
        })
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    /// [Git-Internals-Git-Objects](https://git-scm.com/book/en/v2/Git-Internals-Git-Objects)
    fn serialize(&self) -> Result<Vec<u8>, ReviewError> {
        let mut data = Vec::new();

        data.extend(b"tree ");
        data.extend(self.tree_id.to_string().as_bytes());
        data.extend(&[0x0a]);

        for parent_tree_id in &self.parent_commit_ids {
            data.extend(b"parent ");
            data.extend(parent_tree_id.to_string().as_bytes());
            data.extend(&[0x0a]);
        }

        data.extend(self.author.to_data()?);
        data.extend(&[0x0a]);
        data.extend(self.committer.to_data()?);
        data.extend(&[0x0a]);
        data.extend(self.message.as_bytes());

        Ok(data)
    }
}
