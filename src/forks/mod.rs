//! The fork registry.
//!
//! Named forks are persisted in a commit-backed ref whose tree encodes each
//! fork under the hex SHA-1 of its name, split into first-digit /
//! second-digit / remainder directories so no tree's fanout grows with the
//! number of forks. A fork's subtree holds a `NAME` blob plus `URLS`,
//! `OWNERS`, and `REFS` directories whose entries are named by the SHA-1 of
//! their contents, so adding the same value twice is a no-op and merging two
//! divergent registries is the union of their trees.
//!
//! Every mutation is a new commit on the registry ref, applied with a
//! compare-and-set; a lost race is retried by re-reading the registry and
//! reapplying the change.
pub mod ingest;

use sha1::{Digest, Sha1};

use crate::errors::ReviewError;
use crate::hash::ObjectHash;
use crate::internal::object::tree::{TreeItem, TreeItemMode};
use crate::refs::FORKS_REF;
use crate::repo::Repo;

const NAME_ENTRY: &str = "NAME";
const URLS_ENTRY: &str = "URLS";
const OWNERS_ENTRY: &str = "OWNERS";
const REFS_ENTRY: &str = "REFS";

/// Bounded retries for losing a compare-and-set race on the registry ref.
const CAS_ATTEMPTS: usize = 3;

/// A registered fork: where to fetch it and whose records to trust from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fork {
    pub name: String,
    pub urls: Vec<String>,
    /// The identities whose records this fork is trusted to carry.
    pub owners: Vec<String>,
    /// Refspec patterns advertised by the fork (its branches).
    pub refs: Vec<String>,
}

impl Fork {
    pub fn new(name: &str, urls: Vec<String>, owners: Vec<String>, refs: Vec<String>) -> Fork {
        Fork {
            name: name.to_string(),
            urls,
            owners,
            refs,
        }
    }

    /// Whether `email` is one of the fork's owners.
    pub fn is_owner(&self, email: &str) -> bool {
        self.owners.iter().any(|o| o.eq_ignore_ascii_case(email.trim()))
    }
}

/// The hashed path of a fork in the registry tree:
/// (first hex digit, second hex digit, remainder).
pub fn fork_path(name: &str) -> (String, String, String) {
    let digest = hex::encode(Sha1::digest(name.as_bytes()));
    (
        digest[0..1].to_string(),
        digest[1..2].to_string(),
        digest[2..].to_string(),
    )
}

fn subtree(repo: &dyn Repo, items: &[TreeItem], name: &str) -> Result<Option<Vec<TreeItem>>, ReviewError> {
    match items.iter().find(|i| i.name == name && i.mode.is_tree()) {
        Some(item) => Ok(Some(repo.read_tree(&item.id.to_string())?)),
        None => Ok(None),
    }
}

/// Store one hash-named value directory: one blob per value, file name the
/// SHA-1 of the value bytes.
fn store_values(repo: &dyn Repo, values: &[String]) -> Result<ObjectHash, ReviewError> {
    let mut items = Vec::new();
    for value in values {
        let id = repo.store_blob(value.as_bytes())?;
        let name = hex::encode(Sha1::digest(value.as_bytes()));
        if items.iter().any(|i: &TreeItem| i.name == name) {
            continue;
        }
        items.push(TreeItem::new(TreeItemMode::Blob, id, name));
    }
    repo.store_tree(items)
}

fn read_values(repo: &dyn Repo, items: &[TreeItem], name: &str) -> Result<Option<Vec<String>>, ReviewError> {
    let Some(entries) = subtree(repo, items, name)? else {
        return Ok(None);
    };
    let mut values = Vec::new();
    for entry in entries {
        if entry.mode.is_tree() {
            continue;
        }
        let bytes = repo.read_blob(&entry.id)?;
        values.push(String::from_utf8_lossy(&bytes).to_string());
    }
    values.sort();
    Ok(Some(values))
}

/// Store the subtree describing one fork.
fn store_fork(repo: &dyn Repo, fork: &Fork) -> Result<ObjectHash, ReviewError> {
    let name_blob = repo.store_blob(fork.name.as_bytes())?;
    let items = vec![
        TreeItem::new(TreeItemMode::Blob, name_blob, NAME_ENTRY.to_string()),
        TreeItem::new(TreeItemMode::Tree, store_values(repo, &fork.urls)?, URLS_ENTRY.to_string()),
        TreeItem::new(
            TreeItemMode::Tree,
            store_values(repo, &fork.owners)?,
            OWNERS_ENTRY.to_string(),
        ),
        TreeItem::new(TreeItemMode::Tree, store_values(repo, &fork.refs)?, REFS_ENTRY.to_string()),
    ];
    repo.store_tree(items)
}

/// Parse one fork subtree; `None` when it does not conform to the layout.
fn parse_fork(repo: &dyn Repo, items: &[TreeItem]) -> Result<Option<Fork>, ReviewError> {
    let Some(name_item) = items.iter().find(|i| i.name == NAME_ENTRY && !i.mode.is_tree()) else {
        return Ok(None);
    };
    let name = String::from_utf8_lossy(&repo.read_blob(&name_item.id)?).to_string();
    let (Some(urls), Some(owners), Some(refs)) = (
        read_values(repo, items, URLS_ENTRY)?,
        read_values(repo, items, OWNERS_ENTRY)?,
        read_values(repo, items, REFS_ENTRY)?,
    ) else {
        return Ok(None);
    };
    Ok(Some(Fork { name, urls, owners, refs }))
}

/// Replace (or remove, with `None`) the entry `name` in `items`.
fn splice(items: &mut Vec<TreeItem>, name: &str, replacement: Option<TreeItem>) {
    items.retain(|i| i.name != name);
    if let Some(item) = replacement {
        items.push(item);
    }
}

/// List every fork in the registry. Subtrees that do not conform to the
/// layout are skipped.
pub fn list_forks(repo: &dyn Repo) -> Result<Vec<Fork>, ReviewError> {
    if !repo.has_ref(FORKS_REF)? {
        return Ok(Vec::new());
    }
    let mut forks = Vec::new();
    let root = repo.read_tree(FORKS_REF)?;
    for first in root.iter().filter(|i| i.mode.is_tree()) {
        let level1 = repo.read_tree(&first.id.to_string())?;
        for second in level1.iter().filter(|i| i.mode.is_tree()) {
            let level2 = repo.read_tree(&second.id.to_string())?;
            for leaf in level2.iter().filter(|i| i.mode.is_tree()) {
                let items = repo.read_tree(&leaf.id.to_string())?;
                match parse_fork(repo, &items)? {
                    Some(fork) => forks.push(fork),
                    None => {
                        tracing::debug!(
                            path = %format!("{}/{}/{}", first.name, second.name, leaf.name),
                            "skipping malformed fork registry entry"
                        );
                    }
                }
            }
        }
    }
    forks.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(forks)
}

/// Look up one fork by name.
pub fn get_fork(repo: &dyn Repo, name: &str) -> Result<Option<Fork>, ReviewError> {
    Ok(list_forks(repo)?.into_iter().find(|f| f.name == name))
}

enum Mutation<'a> {
    Add(&'a Fork),
    Remove(&'a str),
}

fn apply_mutation(repo: &dyn Repo, mutation: &Mutation<'_>) -> Result<(), ReviewError> {
    let (name, message) = match mutation {
        Mutation::Add(fork) => (fork.name.as_str(), format!("Add fork {}", fork.name)),
        Mutation::Remove(name) => (*name, format!("Remove fork {name}")),
    };
    let (d1, d2, rest) = fork_path(name);

    let mut last_err = None;
    for _ in 0..CAS_ATTEMPTS {
        let tip = if repo.has_ref(FORKS_REF)? {
            Some(repo.get_commit_hash(FORKS_REF)?)
        } else {
            None
        };
        let mut root = match tip {
            Some(tip) => repo.read_tree(&tip.to_string())?,
            None => Vec::new(),
        };
        let mut level1 = match subtree(repo, &root, &d1)? {
            Some(items) => items,
            None => Vec::new(),
        };
        let mut level2 = match subtree(repo, &level1, &d2)? {
            Some(items) => items,
            None => Vec::new(),
        };

        let leaf = match mutation {
            Mutation::Add(fork) => {
                let id = store_fork(repo, fork)?;
                Some(TreeItem::new(TreeItemMode::Tree, id, rest.clone()))
            }
            Mutation::Remove(_) => {
                if !level2.iter().any(|i| i.name == rest) {
                    return Err(ReviewError::InvalidForkEntry(format!(
                        "no fork named `{name}` is registered"
                    )));
                }
                None
            }
        };
        splice(&mut level2, &rest, leaf);

        // Prune empty directories on removal so the registry stays tidy.
        let level1_entry = if level2.is_empty() {
            None
        } else {
            let id = repo.store_tree(level2)?;
            Some(TreeItem::new(TreeItemMode::Tree, id, d2.clone()))
        };
        splice(&mut level1, &d2, level1_entry);
        let root_entry = if level1.is_empty() {
            None
        } else {
            let id = repo.store_tree(level1)?;
            Some(TreeItem::new(TreeItemMode::Tree, id, d1.clone()))
        };
        splice(&mut root, &d1, root_entry);

        let new_root = repo.store_tree(root)?;
        let parents: Vec<ObjectHash> = tip.into_iter().collect();
        let commit = repo.create_commit(&new_root, &parents, &message)?;
        match repo.set_ref(FORKS_REF, &commit, tip.as_ref()) {
            Ok(()) => return Ok(()),
            Err(err @ ReviewError::RefMoved { .. }) => {
                tracing::debug!(error = %err, "registry ref moved; retrying");
                last_err = Some(err);
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_err.unwrap_or_else(|| ReviewError::Backend("registry update failed".to_string())))
}

/// Register (or re-register) a fork.
pub fn add_fork(repo: &dyn Repo, fork: &Fork) -> Result<(), ReviewError> {
    if fork.name.is_empty() {
        return Err(ReviewError::Validation("a fork needs a name".to_string()));
    }
    if fork.urls.is_empty() {
        return Err(ReviewError::Validation("a fork needs at least one URL".to_string()));
    }
    if fork.owners.is_empty() {
        return Err(ReviewError::Validation(
            "a fork needs at least one owner".to_string(),
        ));
    }
    apply_mutation(repo, &Mutation::Add(fork))
}

/// Remove a fork from the registry.
pub fn remove_fork(repo: &dyn Repo, name: &str) -> Result<(), ReviewError> {
    apply_mutation(repo, &Mutation::Remove(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::mem::MemRepo;

    fn fork(name: &str) -> Fork {
        Fork::new(
            name,
            vec![format!("https://example.com/{name}.git")],
            vec![format!("{name}@example.com")],
            vec!["refs/heads/*".to_string()],
        )
    }

    #[test]
    fn test_fork_path_shape() {
        let (d1, d2, rest) = fork_path("alice");
        assert_eq!(d1.len(), 1);
        assert_eq!(d2.len(), 1);
        assert_eq!(rest.len(), 38);
        let digest = format!("{d1}{d2}{rest}");
        // sha1("alice")
        assert_eq!(digest, "522b276a356bdf39013dfabea2cd43e141ecc9e8");
    }

    #[test]
    fn test_add_list_remove_round_trip() {
        let repo = MemRepo::new("owner@example.com");
        assert!(list_forks(&repo).unwrap().is_empty());

        add_fork(&repo, &fork("alice")).unwrap();
        add_fork(&repo, &fork("bob")).unwrap();
        let listed = list_forks(&repo).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "alice");
        assert_eq!(listed[1].name, "bob");
        assert_eq!(get_fork(&repo, "alice").unwrap().unwrap(), fork("alice"));

        remove_fork(&repo, "alice").unwrap();
        let listed = list_forks(&repo).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "bob");
    }

    #[test]
    fn test_reregistering_updates_in_place() {
        let repo = MemRepo::new("owner@example.com");
        add_fork(&repo, &fork("alice")).unwrap();
        let mut updated = fork("alice");
        updated.owners.push("alice-alt@example.com".to_string());
        add_fork(&repo, &updated).unwrap();
        let listed = list_forks(&repo).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].owners.len(), 2);
    }

    #[test]
    fn test_duplicate_values_deduplicate() {
        let repo = MemRepo::new("owner@example.com");
        let mut f = fork("alice");
        f.urls.push(f.urls[0].clone());
        add_fork(&repo, &f).unwrap();
        assert_eq!(list_forks(&repo).unwrap()[0].urls.len(), 1);
    }

    #[test]
    fn test_remove_unknown_fork_fails() {
        let repo = MemRepo::new("owner@example.com");
        add_fork(&repo, &fork("alice")).unwrap();
        assert!(remove_fork(&repo, "mallory").is_err());
    }

    #[test]
    fn test_mutations_chain_commits() {
        let repo = MemRepo::new("owner@example.com");
        add_fork(&repo, &fork("alice")).unwrap();
        let first = repo.get_commit_hash(FORKS_REF).unwrap();
        add_fork(&repo, &fork("bob")).unwrap();
        let second = repo.get_commit_hash(FORKS_REF).unwrap();
        assert!(repo.is_ancestor(&first, &second).unwrap());
    }

    #[test]
    fn test_validation_of_new_forks() {
        let repo = MemRepo::new("owner@example.com");
        assert!(add_fork(&repo, &Fork::new("", vec!["u".into()], vec!["o".into()], vec![])).is_err());
        assert!(add_fork(&repo, &Fork::new("x", vec![], vec!["o".into()], vec![])).is_err());
        assert!(add_fork(&repo, &Fork::new("x", vec!["u".into()], vec![], vec![])).is_err());
    }

    #[test]
    fn test_owner_matching_is_case_insensitive() {
        let f = fork("alice");
        assert!(f.is_owner("alice@example.com"));
        assert!(f.is_owner("Alice@Example.COM"));
        assert!(!f.is_owner("mallory@example.com"));
    }
}
