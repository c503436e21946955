//! Git Tree object implementation.
//!
//! A tree is a flat list of named entries, each pointing at a blob or
//! another tree. The fork registry is persisted as three levels of these
//! trees (first hex digit, second hex digit, remainder of the hashed fork
//! name), so any tree's fanout stays bounded no matter how many forks are
//! registered.
//!
//! The serialized form is git's: `<mode> <name>\0<raw hash bytes>` per
//! entry, entries sorted the way git sorts them (directory names compare as
//! if they had a trailing `/`).

use std::cmp::Ordering;
use std::fmt::Display;

use bstr::ByteSlice;

use crate::errors::ReviewError;
use crate::hash::ObjectHash;
use crate::internal::object::GitObject;
use crate::internal::object::types::ObjectType;

/// File mode of a tree entry.
#[derive(PartialEq, Eq, Debug, Hash, Ord, PartialOrd, Clone, Copy)]
pub enum TreeItemMode {
    Blob,
    BlobExecutable,
    Link,
    Tree,
    Commit,
}

impl TreeItemMode {
    /// The octal mode bytes git writes for this entry kind.
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            TreeItemMode::Blob => b"100644",
            TreeItemMode::BlobExecutable => b"100755",
            TreeItemMode::Link => b"120000",
            TreeItemMode::Tree => b"40000",
            TreeItemMode::Commit => b"160000",
        }
    }

    /// Decode the octal mode field of a stored entry.
    pub fn from_mode_bytes(mode: &[u8]) -> Result<TreeItemMode, ReviewError> {
        Ok(match mode {
            b"40000" | b"040000" => TreeItemMode::Tree,
            b"100644" | b"100664" => TreeItemMode::Blob,
            b"100755" => TreeItemMode::BlobExecutable,
            b"120000" => TreeItemMode::Link,
            b"160000" => TreeItemMode::Commit,
            _ => {
                return Err(ReviewError::InvalidTreeItem(
                    String::from_utf8_lossy(mode).to_string(),
                ));
            }
        })
    }

    pub fn is_tree(self) -> bool {
        self == TreeItemMode::Tree
    }
}

impl Display for TreeItemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.to_bytes()))
    }
}

/// One named entry of a tree.
#[derive(PartialEq, Eq, Debug, Hash, Ord, PartialOrd, Clone)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectHash,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectHash, name: String) -> TreeItem {
        TreeItem { mode, id, name }
    }

    /// Encode to the entry's stored form, `<mode> <name>\0<raw hash>`.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(self.mode.to_bytes());
        data.push(b' ');
        data.extend_from_slice(self.name.as_bytes());
        data.push(b'\0');
        data.extend_from_slice(self.id.as_ref());
        data
    }
}

impl Display for TreeItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.mode, self.id, self.name)
    }
}

/// A git tree: an id plus its entries.
#[derive(Eq, Debug, Clone)]
pub struct Tree {
    pub id: ObjectHash,
    pub tree_items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "tree {}", self.id)?;
        for item in &self.tree_items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}

/// Git's tree-entry ordering: directory names compare as if suffixed with `/`.
fn git_entry_cmp(a: &TreeItem, b: &TreeItem) -> Ordering {
    let a_key: Vec<u8> = {
        let mut k = a.name.as_bytes().to_vec();
        if a.mode.is_tree() {
            k.push(b'/');
        }
        k
    };
    let b_key: Vec<u8> = {
        let mut k = b.name.as_bytes().to_vec();
        if b.mode.is_tree() {
            k.push(b'/');
        }
        k
    };
    a_key.cmp(&b_key)
}

impl Tree {
    /// Build a tree from entries, sorting them and computing the id.
    ///
    /// An empty entry list is allowed: the registry starts life as an empty
    /// tree and grows as forks are added.
    pub fn from_tree_items(mut tree_items: Vec<TreeItem>) -> Result<Tree, ReviewError> {
        tree_items.sort_by(git_entry_cmp);
        let mut tree = Tree {
            id: ObjectHash::default(),
            tree_items,
        };
        tree.id = tree.computed_id()?;
        Ok(tree)
    }

    /// Look up a direct child entry by name.
    pub fn find(&self, name: &str) -> Option<&TreeItem> {
        self.tree_items.iter().find(|item| item.name == name)
    }
}

impl GitObject for Tree {
    fn parse(data: &[u8], id: ObjectHash) -> Result<Self, ReviewError> {
        let hash_len = id.size();
        let mut tree_items = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let mode_end = rest.find_byte(0x20).ok_or(ReviewError::InvalidTreeObject)?;
            let mode = TreeItemMode::from_mode_bytes(&rest[..mode_end])?;
            rest = &rest[mode_end + 1..];

            let name_end = rest.find_byte(0x00).ok_or(ReviewError::InvalidTreeObject)?;
            let name = String::from_utf8_lossy(&rest[..name_end]).to_string();
            rest = &rest[name_end + 1..];

            if rest.len() < hash_len {
                return Err(ReviewError::InvalidTreeObject);
            }
            let entry_id = ObjectHash::from_raw(&rest[..hash_len])
                .map_err(|_| ReviewError::InvalidTreeObject)?;
            rest = &rest[hash_len..];

            tree_items.push(TreeItem { mode, id: entry_id, name });
        }
        Ok(Tree { id, tree_items })
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn serialize(&self) -> Result<Vec<u8>, ReviewError> {
        let mut data = Vec::new();
        for item in &self.tree_items {
            data.extend(item.encode());
        }
        Ok(data)
    }
}
