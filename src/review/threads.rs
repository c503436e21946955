//! Comment thread forest and the status-folding algebra.
//!
//! Comments form a forest: a thread is one comment plus its reply threads,
//! ordered by (timestamp, id). Edit records (nonempty `original`) are not
//! threads of their own; they supersede the record they point at, and the
//! newest version is displayed while prior versions are retained.
//!
//! The fold turns a thread into a verdict:
//!
//! - a reply that raises a concern (needs-work) dominates prior approval;
//! - approval bubbles up only when the thread's own comment approves;
//! - a thread whose replies were satisfied but whose own comment never
//!   re-affirmed folds to *unresolved*, which blocks aggregate acceptance.
//!
//! Plain FYI threads carry no verdict and are transparent to the aggregate.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::records::comment::{Comment, Resolution};
use crate::records::log::{StoredRecord, record_order};

/// What a whole thread folds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// No comment in the thread carries a verdict.
    NoVerdict,
    Accepted,
    Rejected,
    /// A verdict exists somewhere, but the thread is not settled: either a
    /// concern is still being discussed or the root never re-affirmed after
    /// its replies were satisfied.
    Unresolved,
}

/// Aggregate review status derived from all thread folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewStatus {
    Accepted,
    Rejected,
    #[default]
    Pending,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::Accepted => write!(f, "accepted"),
            ReviewStatus::Rejected => write!(f, "rejected"),
            ReviewStatus::Pending => write!(f, "pending"),
        }
    }
}

/// One node of the comment forest.
#[derive(Debug, Clone)]
pub struct CommentThread {
    /// Id of the thread's original record; stable across edits, this is
    /// what replies reference.
    pub id: String,
    /// The displayed version: the newest edit, or the original when the
    /// comment was never edited.
    pub comment: Comment,
    /// Superseded versions, oldest first.
    pub edits: Vec<StoredRecord<Comment>>,
    pub children: Vec<CommentThread>,
    pub status: ThreadStatus,
}

impl CommentThread {
    /// Whether `id` names this thread or any reply below it.
    pub fn contains(&self, id: &str) -> bool {
        self.id == id || self.children.iter().any(|c| c.contains(id))
    }
}

/// Whether `id` names any thread in the forest.
pub fn forest_contains(forest: &[CommentThread], id: &str) -> bool {
    forest.iter().any(|t| t.contains(id))
}

fn own_verdict(comment: &Comment) -> ThreadStatus {
    match comment.resolved {
        Resolution::Accepted => ThreadStatus::Accepted,
        Resolution::Rejected => ThreadStatus::Rejected,
        Resolution::Fyi => ThreadStatus::NoVerdict,
    }
}

/// Combine the folds of a thread's children: a rejection dominates, then an
/// unsettled thread, then an acceptance; verdict-free children are
/// transparent.
fn combine_children(children: &[CommentThread]) -> ThreadStatus {
    let mut combined = ThreadStatus::NoVerdict;
    for child in children {
        combined = match (combined, child.status) {
            (_, ThreadStatus::Rejected) | (ThreadStatus::Rejected, _) => ThreadStatus::Rejected,
            (_, ThreadStatus::Unresolved) | (ThreadStatus::Unresolved, _) => {
                ThreadStatus::Unresolved
            }
            (_, ThreadStatus::Accepted) | (ThreadStatus::Accepted, _) => ThreadStatus::Accepted,
            (ThreadStatus::NoVerdict, ThreadStatus::NoVerdict) => ThreadStatus::NoVerdict,
        };
    }
    combined
}

fn fold(thread: &mut CommentThread) {
    for child in &mut thread.children {
        fold(child);
    }
    let children = combine_children(&thread.children);
    thread.status = match children {
        ThreadStatus::NoVerdict => own_verdict(&thread.comment),
        ThreadStatus::Rejected => ThreadStatus::Rejected,
        ThreadStatus::Unresolved => ThreadStatus::Unresolved,
        ThreadStatus::Accepted => {
            if own_verdict(&thread.comment) == ThreadStatus::Accepted {
                ThreadStatus::Accepted
            } else {
                ThreadStatus::Unresolved
            }
        }
    };
}

/// Fold all thread folds into the review's aggregate status.
pub fn aggregate_status(forest: &[CommentThread]) -> ReviewStatus {
    let mut any_accepted = false;
    let mut any_unresolved = false;
    for thread in forest {
        match thread.status {
            ThreadStatus::Rejected => return ReviewStatus::Rejected,
            ThreadStatus::Unresolved => any_unresolved = true,
            ThreadStatus::Accepted => any_accepted = true,
            ThreadStatus::NoVerdict => {}
        }
    }
    if any_accepted && !any_unresolved {
        ReviewStatus::Accepted
    } else {
        ReviewStatus::Pending
    }
}

/// Build the comment-thread forest from the records of one note.
///
/// - Edit records are folded into the record they supersede; the newest
///   (timestamp, id) version is displayed.
/// - A nonempty `parent` must identify a record in the same note; orphans
///   are ignored.
/// - Cycles through `parent` or `original` are broken: the
///   earliest-(timestamp, id) record in a parent cycle becomes a root, and
///   an `original` chain that never terminates is dropped.
pub fn build_forest(mut records: Vec<StoredRecord<Comment>>) -> Vec<CommentThread> {
    records.sort_by(record_order);
    let ids: Vec<String> = records.iter().map(|r| r.id()).collect();
    let index_of: HashMap<String, usize> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), i))
        .collect();

    // Resolve every record to the base (non-edit) record its `original`
    // chain terminates at.
    let mut base_of: HashMap<usize, usize> = HashMap::new();
    for start in 0..records.len() {
        let mut seen = HashSet::new();
        let mut at = start;
        loop {
            if !seen.insert(at) {
                tracing::warn!(id = %ids[start], "comment edit chain forms a cycle; dropping");
                break;
            }
            if !records[at].value.is_edit() {
                base_of.insert(start, at);
                break;
            }
            match index_of.get(&records[at].value.original) {
                Some(&next) => at = next,
                None => {
                    tracing::debug!(id = %ids[start], "comment edits an unknown record; dropping");
                    break;
                }
            }
        }
    }

    // Group edits under their base, newest last; the base itself leads.
    let mut versions: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (record_idx, &base_idx) in &base_of {
        versions.entry(base_idx).or_default().push(*record_idx);
    }
    for chain in versions.values_mut() {
        chain.sort_by(|a, b| record_order(&records[*a], &records[*b]));
    }

    // Resolve each base's parent to a base index; orphans drop out.
    let bases: Vec<usize> = versions.keys().copied().collect();
    let mut parent_of: HashMap<usize, Option<usize>> = HashMap::new();
    for &base in &bases {
        let parent_id = &records[base].value.parent;
        if parent_id.is_empty() {
            parent_of.insert(base, None);
            continue;
        }
        match index_of.get(parent_id).and_then(|idx| base_of.get(idx)) {
            Some(&parent_base) if versions.contains_key(&parent_base) => {
                parent_of.insert(base, Some(parent_base));
            }
            _ => {
                tracing::debug!(
                    id = %ids[base],
                    parent = %parent_id,
                    "comment replies to an unknown record; ignoring"
                );
            }
        }
    }

    // Break parent cycles: the earliest record in a cycle becomes a root.
    let keys: Vec<usize> = parent_of.keys().copied().collect();
    for start in keys {
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let mut at = start;
        while seen.insert(at) {
            path.push(at);
            match parent_of.get(&at) {
                Some(Some(next)) => at = *next,
                _ => {
                    path.clear();
                    break;
                }
            }
        }
        if let Some(cycle_start) = path.iter().position(|&n| n == at) {
            let cycle = &path[cycle_start..];
            // indices are in (timestamp, id) order already
            if let Some(&winner) = cycle.iter().min() {
                tracing::warn!(id = %ids[winner], "comment reply chain forms a cycle; breaking");
                parent_of.insert(winner, None);
            }
        }
    }

    // Assemble children lists in record order and build recursively.
    let mut children_of: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut roots = Vec::new();
    let mut ordered: Vec<usize> = parent_of.keys().copied().collect();
    ordered.sort_unstable();
    for base in ordered {
        match parent_of[&base] {
            Some(parent) => children_of.entry(parent).or_default().push(base),
            None => roots.push(base),
        }
    }

    fn build(
        base: usize,
        records: &[StoredRecord<Comment>],
        ids: &[String],
        versions: &BTreeMap<usize, Vec<usize>>,
        children_of: &BTreeMap<usize, Vec<usize>>,
        parent_of: &HashMap<usize, Option<usize>>,
    ) -> CommentThread {
        let chain = &versions[&base];
        let visible = *chain.last().unwrap_or(&base);
        let edits = chain[..chain.len().saturating_sub(1)]
            .iter()
            .map(|&idx| records[idx].clone())
            .collect();
        let children = children_of
            .get(&base)
            .into_iter()
            .flatten()
            // a child might have been re-rooted by cycle breaking
            .filter(|child| parent_of.get(*child) == Some(&Some(base)))
            .map(|&child| build(child, records, ids, versions, children_of, parent_of))
            .collect();
        CommentThread {
            id: ids[base].clone(),
            comment: records[visible].value.clone(),
            edits,
            children,
            status: ThreadStatus::NoVerdict,
        }
    }

    let mut forest: Vec<CommentThread> = roots
        .into_iter()
        .map(|base| build(base, &records, &ids, &versions, &children_of, &parent_of))
        .collect();
    for thread in &mut forest {
        fold(thread);
    }
    forest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Record as _;

    fn stored(comment: Comment) -> StoredRecord<Comment> {
        StoredRecord {
            line: comment.to_line().unwrap(),
            value: comment,
        }
    }

    fn reply_to(parent: &StoredRecord<Comment>, comment: Comment) -> StoredRecord<Comment> {
        stored(comment.with_parent(&parent.id()))
    }

    #[test]
    fn test_single_accept_folds_accepted() {
        let root = stored(Comment::new("1", "bob@x", "lgtm").with_resolution(Resolution::Accepted));
        let forest = build_forest(vec![root]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].status, ThreadStatus::Accepted);
        assert_eq!(aggregate_status(&forest), ReviewStatus::Accepted);
    }

    #[test]
    fn test_rejection_dominates_approval() {
        let root = stored(Comment::new("1", "bob@x", "lgtm").with_resolution(Resolution::Accepted));
        let nack = reply_to(
            &root,
            Comment::new("2", "carol@x", "wait, this breaks X").with_resolution(Resolution::Rejected),
        );
        let forest = build_forest(vec![root, nack]);
        assert_eq!(forest[0].status, ThreadStatus::Rejected);
        assert_eq!(aggregate_status(&forest), ReviewStatus::Rejected);
    }

    #[test]
    fn test_root_must_reaffirm_after_settled_concern() {
        // root LGTM (t1) <- reply needs-work (t2) <- reply LGTM (t3):
        // the concern was satisfied, but the root never re-affirmed, so the
        // thread is unresolved and the review stays pending.
        let root = stored(Comment::new("1", "bob@x", "lgtm").with_resolution(Resolution::Accepted));
        let nack = reply_to(
            &root,
            Comment::new("2", "carol@x", "needs a test").with_resolution(Resolution::Rejected),
        );
        let ack = reply_to(
            &nack,
            Comment::new("3", "bob@x", "added one, thanks").with_resolution(Resolution::Accepted),
        );
        let forest = build_forest(vec![root, nack, ack]);
        assert_eq!(forest[0].status, ThreadStatus::Unresolved);
        assert_eq!(aggregate_status(&forest), ReviewStatus::Pending);
    }

    #[test]
    fn test_fyi_threads_are_transparent() {
        let fyi = stored(Comment::new("1", "bob@x", "style nit, non-blocking"));
        let lgtm =
            stored(Comment::new("2", "carol@x", "lgtm").with_resolution(Resolution::Accepted));
        let forest = build_forest(vec![fyi, lgtm]);
        assert_eq!(forest[0].status, ThreadStatus::NoVerdict);
        assert_eq!(aggregate_status(&forest), ReviewStatus::Accepted);
    }

    #[test]
    fn test_no_verdicts_is_pending() {
        let fyi = stored(Comment::new("1", "bob@x", "looking"));
        let forest = build_forest(vec![fyi]);
        assert_eq!(aggregate_status(&forest), ReviewStatus::Pending);
    }

    #[test]
    fn test_reply_ordering_is_timestamp_then_id() {
        let root = stored(Comment::new("1", "bob@x", "root"));
        let late = reply_to(&root, Comment::new("3", "dave@x", "second"));
        let early = reply_to(&root, Comment::new("2", "carol@x", "first"));
        let forest = build_forest(vec![root, late, early]);
        let replies: Vec<&str> = forest[0]
            .children
            .iter()
            .map(|t| t.comment.description.as_str())
            .collect();
        assert_eq!(replies, vec!["first", "second"]);
    }

    #[test]
    fn test_orphan_replies_are_ignored() {
        let root = stored(Comment::new("1", "bob@x", "root"));
        let orphan = stored(Comment::new("2", "carol@x", "re").with_parent("deadbeef"));
        let forest = build_forest(vec![root, orphan]);
        assert_eq!(forest.len(), 1);
        assert!(forest[0].children.is_empty());
    }

    #[test]
    fn test_edit_supersedes_original() {
        let root =
            stored(Comment::new("1", "bob@x", "needs work").with_resolution(Resolution::Rejected));
        let mut edited = Comment::new("5", "bob@x", "all good now")
            .with_resolution(Resolution::Accepted);
        edited.original = root.id();
        let edit = stored(edited);

        let forest = build_forest(vec![root.clone(), edit]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].comment.description, "all good now");
        assert_eq!(forest[0].status, ThreadStatus::Accepted);
        assert_eq!(forest[0].edits.len(), 1);
        assert_eq!(forest[0].edits[0].value.description, "needs work");
        // the thread keeps the original record's id
        assert_eq!(forest[0].id, root.id());
    }

    #[test]
    fn test_newest_edit_wins_among_several() {
        let root = stored(Comment::new("1", "bob@x", "v1"));
        let mut e2 = Comment::new("2", "bob@x", "v2");
        e2.original = root.id();
        let mut e3 = Comment::new("3", "bob@x", "v3");
        e3.original = root.id();
        let forest = build_forest(vec![root, stored(e2), stored(e3)]);
        assert_eq!(forest[0].comment.description, "v3");
        assert_eq!(forest[0].edits.len(), 2);
    }

    #[test]
    fn test_reply_to_edited_comment_attaches_to_thread() {
        let root = stored(Comment::new("1", "bob@x", "v1"));
        let mut e2 = Comment::new("2", "bob@x", "v2");
        e2.original = root.id();
        let edit = stored(e2);
        // reply references the edit record, not the original
        let reply = reply_to(&edit, Comment::new("3", "carol@x", "re"));
        let forest = build_forest(vec![root, edit, reply]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].children.len(), 1);
    }

    // A cycle through content-addressed ids cannot be built honestly (it
    // would be a hash cycle), so these tests pair hand-picked line bytes
    // with values that reference each other's line hashes.
    fn fabricated(line: &str, comment: Comment) -> StoredRecord<Comment> {
        StoredRecord {
            line: line.to_string(),
            value: comment,
        }
    }

    #[test]
    fn test_parent_cycle_is_broken_by_earliest() {
        use crate::records::record_id;
        let mut a = Comment::new("1", "bob@x", "a");
        let mut b = Comment::new("2", "carol@x", "b");
        a.parent = record_id("cycle-b");
        b.parent = record_id("cycle-a");
        let forest = build_forest(vec![fabricated("cycle-a", a), fabricated("cycle-b", b)]);
        // the earliest comment becomes a root with the other below it
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].comment.description, "a");
        assert_eq!(forest[0].children.len(), 1);
    }

    #[test]
    fn test_edit_cycle_is_dropped() {
        use crate::records::record_id;
        let mut a = Comment::new("1", "bob@x", "a");
        let mut b = Comment::new("2", "bob@x", "b");
        a.original = record_id("cycle-b");
        b.original = record_id("cycle-a");
        let keeper = stored(Comment::new("3", "carol@x", "still here"));
        let forest = build_forest(vec![
            fabricated("cycle-a", a),
            fabricated("cycle-b", b),
            keeper,
        ]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].comment.description, "still here");
    }

    #[test]
    fn test_fold_is_deterministic() {
        let root = stored(Comment::new("1", "bob@x", "root").with_resolution(Resolution::Accepted));
        let r1 = reply_to(&root, Comment::new("2", "carol@x", "q").with_resolution(Resolution::Rejected));
        let r2 = reply_to(&r1, Comment::new("3", "bob@x", "a").with_resolution(Resolution::Accepted));
        let records = vec![root, r1, r2];
        let a = build_forest(records.clone());
        let b = build_forest(records.into_iter().rev().collect());
        assert_eq!(a[0].status, b[0].status);
        assert_eq!(aggregate_status(&a), aggregate_status(&b));
    }
}
