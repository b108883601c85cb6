//! Size-augmented treap over `(score desc, entity asc)` keys.
//!
//! [`RankIndex`] stores nodes using Struct-of-Arrays layout. Heap order is kept on
//! random `u32` priorities (parent ≥ child); subtree sizes are kept on every node
//! touched by a split, merge, or erase.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Sentinel node id for "no child" / "empty tree".
pub const NIL: u32 = u32::MAX;

/// Order-statistics treap. Contains no duplicate keys; the caller owns the
/// entity → score mapping and guarantees each entity is inserted at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankIndex {
    // SoA: node keys
    pub scores: Vec<i64>,
    pub entities: Vec<String>,
    // SoA: tree structure
    pub priorities: Vec<u32>,
    pub left: Vec<u32>,
    pub right: Vec<u32>,
    pub sizes: Vec<u32>,
    /// Released slots available for reuse.
    pub free: Vec<u32>,
    pub root: u32,
}

impl Default for RankIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Compares a node key against a probe key. `Less` means the node ranks ahead.
#[inline]
fn compare_keys(node_score: i64, node_entity: &str, score: i64, entity: &str) -> Ordering {
    score
        .cmp(&node_score)
        .then_with(|| node_entity.cmp(entity))
}

impl RankIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            scores: Vec::new(),
            entities: Vec::new(),
            priorities: Vec::new(),
            left: Vec::new(),
            right: Vec::new(),
            sizes: Vec::new(),
            free: Vec::new(),
            root: NIL,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.size(self.root) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.root == NIL
    }

    /// Drops every entry and releases the arena.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    #[inline]
    fn size(&self, node: u32) -> u32 {
        if node == NIL {
            0
        } else {
            self.sizes[node as usize]
        }
    }

    #[inline]
    fn update(&mut self, node: u32) {
        let n = node as usize;
        self.sizes[n] = 1 + self.size(self.left[n]) + self.size(self.right[n]);
    }

    #[inline]
    fn cmp_node(&self, node: u32, score: i64, entity: &str) -> Ordering {
        let n = node as usize;
        compare_keys(self.scores[n], &self.entities[n], score, entity)
    }

    fn alloc(&mut self, score: i64, entity: String) -> u32 {
        let priority: u32 = rand::random();
        if let Some(slot) = self.free.pop() {
            let n = slot as usize;
            self.scores[n] = score;
            self.entities[n] = entity;
            self.priorities[n] = priority;
            self.left[n] = NIL;
            self.right[n] = NIL;
            self.sizes[n] = 1;
            slot
        } else {
            let slot = self.scores.len() as u32;
            self.scores.push(score);
            self.entities.push(entity);
            self.priorities.push(priority);
            self.left.push(NIL);
            self.right.push(NIL);
            self.sizes.push(1);
            slot
        }
    }

    fn release(&mut self, node: u32) {
        let n = node as usize;
        self.entities[n] = String::new();
        self.left[n] = NIL;
        self.right[n] = NIL;
        self.sizes[n] = 0;
        self.free.push(node);
    }

    /// Splits `node` into (keys ranking ahead of the probe, keys at or behind it).
    fn split(&mut self, node: u32, score: i64, entity: &str) -> (u32, u32) {
        if node == NIL {
            return (NIL, NIL);
        }
        let n = node as usize;
        if self.cmp_node(node, score, entity) == Ordering::Less {
            let right = self.right[n];
            let (l, r) = self.split(right, score, entity);
            self.right[n] = l;
            self.update(node);
            (node, r)
        } else {
            let left = self.left[n];
            let (l, r) = self.split(left, score, entity);
            self.left[n] = r;
            self.update(node);
            (l, node)
        }
    }

    /// Merges two treaps where every key in `a` ranks ahead of every key in `b`.
    fn merge(&mut self, a: u32, b: u32) -> u32 {
        if a == NIL {
            return b;
        }
        if b == NIL {
            return a;
        }
        if self.priorities[a as usize] > self.priorities[b as usize] {
            let right = self.right[a as usize];
            let merged = self.merge(right, b);
            self.right[a as usize] = merged;
            self.update(a);
            a
        } else {
            let left = self.left[b as usize];
            let merged = self.merge(a, left);
            self.left[b as usize] = merged;
            self.update(b);
            b
        }
    }

    /// Inserts a key and returns its 0-based position. The entity must not
    /// already be present.
    pub fn insert(&mut self, score: i64, entity: String) -> usize {
        let (ahead, behind) = self.split(self.root, score, &entity);
        let rank = self.size(ahead) as usize;
        let node = self.alloc(score, entity);
        let left = self.merge(ahead, node);
        self.root = self.merge(left, behind);
        rank
    }

    /// Removes a key. Returns `false` if it was not present.
    pub fn remove(&mut self, score: i64, entity: &str) -> bool {
        let (root, found) = self.erase(self.root, score, entity);
        self.root = root;
        found
    }

    fn erase(&mut self, node: u32, score: i64, entity: &str) -> (u32, bool) {
        if node == NIL {
            return (NIL, false);
        }
        let n = node as usize;
        match self.cmp_node(node, score, entity) {
            Ordering::Equal => {
                let (l, r) = (self.left[n], self.right[n]);
                let merged = self.merge(l, r);
                self.release(node);
                (merged, true)
            }
            Ordering::Less => {
                let right = self.right[n];
                let (sub, found) = self.erase(right, score, entity);
                self.right[n] = sub;
                if found {
                    self.update(node);
                }
                (node, found)
            }
            Ordering::Greater => {
                let left = self.left[n];
                let (sub, found) = self.erase(left, score, entity);
                self.left[n] = sub;
                if found {
                    self.update(node);
                }
                (node, found)
            }
        }
    }

    /// 0-based position of a key, or `None` if absent.
    pub fn rank_of(&self, score: i64, entity: &str) -> Option<usize> {
        let mut node = self.root;
        let mut ahead = 0usize;
        while node != NIL {
            let n = node as usize;
            match self.cmp_node(node, score, entity) {
                Ordering::Equal => return Some(ahead + self.size(self.left[n]) as usize),
                Ordering::Less => {
                    ahead += self.size(self.left[n]) as usize + 1;
                    node = self.right[n];
                }
                Ordering::Greater => node = self.left[n],
            }
        }
        None
    }

    /// Number of entries with a score strictly greater than `score`.
    pub fn count_above(&self, score: i64) -> usize {
        self.count_where(|s| s > score)
    }

    /// Number of entries with a score greater than or equal to `score`.
    pub fn count_at_least(&self, score: i64) -> usize {
        self.count_where(|s| s >= score)
    }

    /// Counts the prefix of the ordering whose scores satisfy a monotone predicate.
    fn count_where(&self, ahead: impl Fn(i64) -> bool) -> usize {
        let mut node = self.root;
        let mut count = 0usize;
        while node != NIL {
            let n = node as usize;
            if ahead(self.scores[n]) {
                count += self.size(self.left[n]) as usize + 1;
                node = self.right[n];
            } else {
                node = self.left[n];
            }
        }
        count
    }

    /// Entry at a 0-based position.
    pub fn select(&self, position: usize) -> Option<(i64, &str)> {
        let mut node = self.root;
        let mut k = position;
        while node != NIL {
            let n = node as usize;
            let left = self.size(self.left[n]) as usize;
            match k.cmp(&left) {
                Ordering::Less => node = self.left[n],
                Ordering::Equal => return Some((self.scores[n], self.entities[n].as_str())),
                Ordering::Greater => {
                    k -= left + 1;
                    node = self.right[n];
                }
            }
        }
        None
    }

    /// In-order iterator starting at a 0-based position.
    pub fn iter_from(&self, position: usize) -> RankIter<'_> {
        let mut stack = Vec::new();
        let mut node = self.root;
        let mut k = position;
        while node != NIL {
            let n = node as usize;
            let left = self.size(self.left[n]) as usize;
            match k.cmp(&left) {
                Ordering::Less => {
                    stack.push(node);
                    node = self.left[n];
                }
                Ordering::Equal => {
                    stack.push(node);
                    break;
                }
                Ordering::Greater => {
                    k -= left + 1;
                    node = self.right[n];
                }
            }
        }
        RankIter {
            index: self,
            stack,
            next_rank: position,
        }
    }

    /// In-order iterator over all entries.
    pub fn iter(&self) -> RankIter<'_> {
        self.iter_from(0)
    }

    /// Bytes held by the arena, including entity strings.
    pub fn estimate_memory_bytes(&self) -> usize {
        let slots = self.scores.len();
        let per_slot = 8 + 24 + 4 + 4 + 4 + 4;
        let strings: usize = self.entities.iter().map(|e| e.capacity()).sum();
        slots * per_slot + strings + self.free.len() * 4
    }

    /// Validate internal invariants after deserialization.
    ///
    /// Checks parallel array lengths, child bounds, reachability, subtree sizes,
    /// heap order on priorities, and strict key ordering.
    pub fn validate(&self) -> Result<(), String> {
        let slots = self.scores.len();
        for (name, len) in [
            ("entities", self.entities.len()),
            ("priorities", self.priorities.len()),
            ("left", self.left.len()),
            ("right", self.right.len()),
            ("sizes", self.sizes.len()),
        ] {
            if len != slots {
                return Err(format!("{} length {} != slot count {}", name, len, slots));
            }
        }

        let mut is_free = vec![false; slots];
        for &slot in &self.free {
            let s = slot as usize;
            if s >= slots {
                return Err(format!("free slot {} out of bounds ({})", slot, slots));
            }
            if is_free[s] {
                return Err(format!("free slot {} listed twice", slot));
            }
            is_free[s] = true;
        }

        if self.root != NIL && self.root as usize >= slots {
            return Err(format!("root {} out of bounds ({})", self.root, slots));
        }

        // Pre-order walk; every live node must be reached exactly once.
        let mut order = Vec::with_capacity(slots - self.free.len());
        let mut seen = vec![false; slots];
        let mut stack = Vec::new();
        if self.root != NIL {
            stack.push(self.root);
        }
        while let Some(node) = stack.pop() {
            let n = node as usize;
            if seen[n] {
                return Err(format!("node {} reachable twice", node));
            }
            if is_free[n] {
                return Err(format!("free slot {} reachable from root", node));
            }
            seen[n] = true;
            order.push(node);
            for child in [self.left[n], self.right[n]] {
                if child == NIL {
                    continue;
                }
                if child as usize >= slots {
                    return Err(format!("child {} of node {} out of bounds", child, node));
                }
                if self.priorities[child as usize] > self.priorities[n] {
                    return Err(format!("heap order violated at node {}", node));
                }
                stack.push(child);
            }
        }
        if order.len() + self.free.len() != slots {
            return Err(format!(
                "{} reachable + {} free != {} slots",
                order.len(),
                self.free.len(),
                slots
            ));
        }

        // Children appear after parents in pre-order, so a reverse pass sees them first.
        let mut computed = vec![0u32; slots];
        for &node in order.iter().rev() {
            let n = node as usize;
            let sub = |c: u32| if c == NIL { 0 } else { computed[c as usize] };
            computed[n] = 1 + sub(self.left[n]) + sub(self.right[n]);
            if computed[n] != self.sizes[n] {
                return Err(format!(
                    "size of node {} is {} but subtree holds {}",
                    node, self.sizes[n], computed[n]
                ));
            }
        }

        let mut previous: Option<(i64, &str)> = None;
        for (_, entity, score) in self.iter() {
            if let Some((prev_score, prev_entity)) = previous {
                if compare_keys(prev_score, prev_entity, score, entity) != Ordering::Less {
                    return Err(format!(
                        "ordering violated: ({}, {}) before ({}, {})",
                        prev_entity, prev_score, entity, score
                    ));
                }
            }
            previous = Some((score, entity));
        }

        Ok(())
    }
}

/// In-order iterator yielding `(rank, entity, score)`.
pub struct RankIter<'a> {
    index: &'a RankIndex,
    stack: Vec<u32>,
    next_rank: usize,
}

impl<'a> Iterator for RankIter<'a> {
    type Item = (usize, &'a str, i64);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let index = self.index;
        let n = node as usize;
        let mut child = index.right[n];
        while child != NIL {
            self.stack.push(child);
            child = index.left[child as usize];
        }
        let rank = self.next_rank;
        self.next_rank += 1;
        Some((rank, index.entities[n].as_str(), index.scores[n]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn build(entries: &[(&str, i64)]) -> RankIndex {
        let mut index = RankIndex::new();
        for (entity, score) in entries {
            index.insert(*score, entity.to_string());
        }
        index
    }

    fn collect(index: &RankIndex) -> Vec<(String, i64)> {
        index.iter().map(|(_, e, s)| (e.to_string(), s)).collect()
    }

    // ── Basic ordering ─────────────────────────────────────────────────

    #[test]
    fn test_empty_index() {
        let index = RankIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        assert_eq!(index.iter().count(), 0);
        assert!(index.select(0).is_none());
        assert!(index.rank_of(10, "a").is_none());
        assert!(index.validate().is_ok());
    }

    #[test]
    fn test_descending_order_with_tie_break() {
        let index = build(&[("carol", 150), ("bob", 200), ("alice", 150), ("dave", 90)]);
        assert_eq!(
            collect(&index),
            vec![
                ("bob".to_string(), 200),
                ("alice".to_string(), 150),
                ("carol".to_string(), 150),
                ("dave".to_string(), 90),
            ]
        );
    }

    #[test]
    fn test_insert_returns_position() {
        let mut index = RankIndex::new();
        assert_eq!(index.insert(100, "a".into()), 0);
        assert_eq!(index.insert(200, "b".into()), 0);
        assert_eq!(index.insert(150, "c".into()), 1);
        assert_eq!(index.insert(150, "bb".into()), 1);
        assert_eq!(index.insert(-5, "z".into()), 4);
    }

    #[test]
    fn test_rank_of_and_select() {
        let index = build(&[("a", 100), ("b", 200), ("c", 150)]);
        assert_eq!(index.rank_of(200, "b"), Some(0));
        assert_eq!(index.rank_of(150, "c"), Some(1));
        assert_eq!(index.rank_of(100, "a"), Some(2));
        assert_eq!(index.rank_of(100, "zz"), None);
        assert_eq!(index.select(1), Some((150, "c")));
        assert_eq!(index.select(3), None);
    }

    #[test]
    fn test_remove() {
        let mut index = build(&[("a", 1), ("b", 2), ("c", 3)]);
        assert!(index.remove(2, "b"));
        assert!(!index.remove(2, "b"));
        // Wrong score for an existing entity does not match
        assert!(!index.remove(99, "a"));
        assert_eq!(index.len(), 2);
        assert_eq!(collect(&index), vec![("c".into(), 3), ("a".into(), 1)]);
        assert!(index.validate().is_ok());
    }

    #[test]
    fn test_free_slots_are_reused() {
        let mut index = build(&[("a", 1), ("b", 2)]);
        index.remove(1, "a");
        assert_eq!(index.free.len(), 1);
        index.insert(5, "c".into());
        assert!(index.free.is_empty());
        assert_eq!(index.scores.len(), 2);
        assert!(index.validate().is_ok());
    }

    #[test]
    fn test_iter_from_middle_and_past_end() {
        let index = build(&[("a", 5), ("b", 4), ("c", 3), ("d", 2), ("e", 1)]);
        let window: Vec<(usize, &str, i64)> = index.iter_from(2).take(2).collect();
        assert_eq!(window, vec![(2, "c", 3), (3, "d", 2)]);
        assert_eq!(index.iter_from(5).count(), 0);
        assert_eq!(index.iter_from(100).count(), 0);
    }

    #[test]
    fn test_score_counts() {
        let index = build(&[("a", 160), ("b", 200), ("c", 150), ("d", 150)]);
        assert_eq!(index.count_above(160), 1);
        assert_eq!(index.count_at_least(160), 2);
        assert_eq!(index.count_at_least(150), 4);
        assert_eq!(index.count_above(1_000), 0);
        assert_eq!(index.count_at_least(i64::MIN), 4);
    }

    #[test]
    fn test_extreme_scores() {
        let index = build(&[("min", i64::MIN), ("max", i64::MAX), ("zero", 0)]);
        assert_eq!(
            collect(&index),
            vec![("max".into(), i64::MAX), ("zero".into(), 0), ("min".into(), i64::MIN)]
        );
    }

    #[test]
    fn test_clear() {
        let mut index = build(&[("a", 1), ("b", 2)]);
        index.clear();
        assert!(index.is_empty());
        assert!(index.scores.is_empty());
    }

    // ── validate ───────────────────────────────────────────────────────

    #[test]
    fn test_validate_detects_bad_size() {
        let mut index = build(&[("a", 1), ("b", 2), ("c", 3)]);
        let root = index.root as usize;
        index.sizes[root] += 1;
        assert!(index.validate().is_err());
    }

    #[test]
    fn test_validate_detects_length_mismatch() {
        let mut index = build(&[("a", 1)]);
        index.priorities.push(0);
        assert!(index.validate().is_err());
    }

    #[test]
    fn test_validate_detects_out_of_order_keys() {
        let mut index = build(&[("a", 1), ("b", 2), ("c", 3)]);
        let first = index.iter().next().map(|(_, e, _)| e.to_string()).unwrap();
        let pos = index.entities.iter().position(|e| *e == first).unwrap();
        index.scores[pos] = -100;
        assert!(index.validate().is_err());
    }

    #[test]
    fn test_validate_after_serde_roundtrip() {
        let index = build(&[("a", 1), ("b", 2), ("c", 3), ("d", 3)]);
        let bytes = bincode::serialize(&index).unwrap();
        let restored: RankIndex = bincode::deserialize(&bytes).unwrap();
        assert!(restored.validate().is_ok());
        assert_eq!(collect(&restored), collect(&index));
    }

    // ── Model-based properties ─────────────────────────────────────────

    #[derive(Debug, Clone)]
    enum Op {
        Upsert(u8, i64),
        Remove(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0u8..24, -50i64..50).prop_map(|(e, s)| Op::Upsert(e, s)),
            1 => (0u8..24).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_sorted_model(ops in proptest::collection::vec(op_strategy(), 0..200)) {
            let mut index = RankIndex::new();
            let mut model: std::collections::BTreeMap<String, i64> = Default::default();

            for op in ops {
                match op {
                    Op::Upsert(e, s) => {
                        let entity = format!("e{:02}", e);
                        if let Some(old) = model.insert(entity.clone(), s) {
                            prop_assert!(index.remove(old, &entity));
                        }
                        index.insert(s, entity);
                    }
                    Op::Remove(e) => {
                        let entity = format!("e{:02}", e);
                        let expected = model.remove(&entity);
                        let removed = expected.map(|s| index.remove(s, &entity)).unwrap_or(false);
                        prop_assert_eq!(removed, expected.is_some());
                    }
                }
            }

            let mut expected: Vec<(String, i64)> = model.into_iter().collect();
            expected.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            prop_assert_eq!(collect(&index), expected.clone());
            prop_assert!(index.validate().is_ok());

            for (pos, (entity, score)) in expected.iter().enumerate() {
                prop_assert_eq!(index.rank_of(*score, entity), Some(pos));
                prop_assert_eq!(index.select(pos), Some((*score, entity.as_str())));
                let above = expected.iter().filter(|(_, s)| s > score).count();
                prop_assert_eq!(index.count_above(*score), above);
            }
        }
    }
}
