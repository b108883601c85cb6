//! Order-statistics index for board rankings.
//!
//! Entries are ordered by descending score, ties broken by ascending entity id.
//! The index is a size-augmented randomized treap: every node records the size of
//! its subtree, so position lookups (`rank_of`, `select`, `iter_from`) run in
//! O(log n) expected time and a window of `k` entries costs O(log n + k).
//!
//! Nodes live in a Struct-of-Arrays arena addressed by `u32` ids; freed slots are
//! recycled through a free list.

/// Treap arena, split/merge primitives, and ordered iteration.
pub mod tree;

pub use tree::{RankIndex, RankIter, NIL};
