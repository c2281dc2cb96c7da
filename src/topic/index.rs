// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Concurrent trie of topic filters to `(K, V)` data, as described in
//! `spec.md` §3/§4.1. The same structure backs both the subscription
//! registry (filters with wildcards as keys, matched against concrete
//! publish topics) and the retained-message wildcard index (concrete
//! topics as keys, matched against a subscriber's filter).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

use super::filter::{FilterLevel, Topic, TopicFilter};
use crate::error::Error;

#[derive(Debug, Default)]
struct Node<K, V> {
    children: RwLock<HashMap<String, Node<K, V>>>,
    data: RwLock<HashMap<K, V>>,
}

impl<K, V> Node<K, V> {
    fn new() -> Self {
        Self {
            children: RwLock::new(HashMap::new()),
            data: RwLock::new(HashMap::new()),
        }
    }

    fn is_empty(&self) -> bool {
        self.children.read().unwrap().is_empty() && self.data.read().unwrap().is_empty()
    }
}

/// Trie of topic filters to subscriber data. See module docs.
///
/// Invariant (`spec.md` §3): match is stable under concurrent add/remove —
/// readers take a snapshot of each node's maps as they descend, so a
/// concurrent writer can only affect levels the reader has not yet visited.
#[derive(Debug)]
pub struct TopicIndex<K, V> {
    root: Node<K, V>,
}

impl<K, V> Default for TopicIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn level_key(level: &FilterLevel) -> &str {
    match level {
        FilterLevel::Literal(s) => s.as_str(),
        FilterLevel::SingleWildcard => super::filter::SINGLE_WILDCARD,
        FilterLevel::MultiWildcard => super::filter::MULTI_WILDCARD,
    }
}

impl<K, V> TopicIndex<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self { root: Node::new() }
    }

    /// Inserts `(k, v)` at the terminal node of `filter`, creating
    /// intermediate nodes as needed.
    ///
    /// # Errors
    /// Propagates `InvalidTopicFilter` if `filter` was built incorrectly
    /// (callers should already have validated via `TopicFilter::parse`).
    pub fn add(&self, filter: &TopicFilter, k: K, v: V) -> Result<(), Error> {
        Self::add_rec(&self.root, filter.levels(), k, v);
        Ok(())
    }

    fn add_rec(node: &Node<K, V>, levels: &[FilterLevel], k: K, v: V) {
        match levels.split_first() {
            None => {
                node.data.write().unwrap().insert(k, v);
            }
            Some((level, rest)) => {
                let key = level_key(level).to_string();
                let mut children = node.children.write().unwrap();
                let child = children.entry(key).or_insert_with(Node::new);
                // Recurse while still holding the write lock on this
                // level's children map: concurrent readers at this level
                // block briefly, matching the teacher's per-node-lock
                // writer discipline (spec.md §5).
                Self::add_rec(child, rest, k, v);
                drop(children);
            }
        }
    }

    /// Removes `k` from the terminal node of `filter`, then prunes empty
    /// branches bottom-up.
    pub fn remove(&self, filter: &TopicFilter, k: &K) {
        Self::remove_rec(&self.root, filter.levels(), k);
    }

    fn remove_rec(node: &Node<K, V>, levels: &[FilterLevel], k: &K) -> bool {
        if levels.is_empty() {
            node.data.write().unwrap().remove(k);
            return node.is_empty();
        }
        let key = level_key(&levels[0]).to_string();
        let mut children = node.children.write().unwrap();
        let should_prune = if let Some(child) = children.get(&key) {
            Self::remove_rec(child, &levels[1..], k)
        } else {
            false
        };
        if should_prune {
            children.remove(&key);
        }
        node.is_empty() && children.is_empty()
    }

    /// Matches a concrete `topic` against the indexed filters: at each
    /// level, tries the exact child, the `+` child, and the `#` child
    /// (which immediately yields everything in its subtree). Each `(K, V)`
    /// pair appears at most once even if several matching filters share
    /// the same `K`.
    #[must_use]
    pub fn match_topic(&self, topic: &Topic) -> Vec<(K, V)> {
        let mut out: HashMap<K, V> = HashMap::new();
        Self::match_topic_rec(&self.root, topic.levels(), &mut out);
        out.into_iter().collect()
    }

    fn match_topic_rec(node: &Node<K, V>, levels: &[String], out: &mut HashMap<K, V>) {
        if levels.is_empty() {
            for (k, v) in node.data.read().unwrap().iter() {
                out.entry(k.clone()).or_insert_with(|| v.clone());
            }
            // A `#` child also matches the zero-remaining-levels case.
            if let Some(hash_child) = node.children.read().unwrap().get(super::filter::MULTI_WILDCARD) {
                for (k, v) in hash_child.data.read().unwrap().iter() {
                    out.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            return;
        }
        let children = node.children.read().unwrap();
        if let Some(exact) = children.get(&levels[0]) {
            Self::match_topic_rec(exact, &levels[1..], out);
        }
        if let Some(plus) = children.get(super::filter::SINGLE_WILDCARD) {
            Self::match_topic_rec(plus, &levels[1..], out);
        }
        if let Some(hash) = children.get(super::filter::MULTI_WILDCARD) {
            for (k, v) in hash.data.read().unwrap().iter() {
                out.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
    }

    /// Symmetric traversal used to walk a filter (possibly containing
    /// wildcards) against concrete topics stored as keys — e.g. retained
    /// replay on SUBSCRIBE. Wildcards in `query` enumerate candidate
    /// children rather than matching a single edge.
    #[must_use]
    pub fn match_filter(&self, query: &TopicFilter) -> Vec<(K, V)> {
        let mut out: HashMap<K, V> = HashMap::new();
        Self::match_filter_rec(&self.root, query.levels(), &mut out);
        out.into_iter().collect()
    }

    fn match_filter_rec(node: &Node<K, V>, levels: &[FilterLevel], out: &mut HashMap<K, V>) {
        if levels.is_empty() {
            for (k, v) in node.data.read().unwrap().iter() {
                out.entry(k.clone()).or_insert_with(|| v.clone());
            }
            return;
        }
        let children = node.children.read().unwrap();
        match &levels[0] {
            FilterLevel::Literal(lit) => {
                if let Some(child) = children.get(lit.as_str()) {
                    Self::match_filter_rec(child, &levels[1..], out);
                }
            }
            FilterLevel::SingleWildcard => {
                for child in children.values() {
                    Self::match_filter_rec(child, &levels[1..], out);
                }
            }
            FilterLevel::MultiWildcard => {
                Self::collect_subtree(node, out);
            }
        }
    }

    fn collect_subtree(node: &Node<K, V>, out: &mut HashMap<K, V>) {
        for (k, v) in node.data.read().unwrap().iter() {
            out.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for child in node.children.read().unwrap().values() {
            Self::collect_subtree(child, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(raw: &str) -> TopicFilter {
        TopicFilter::parse(raw).unwrap()
    }

    fn topic(raw: &str) -> Topic {
        Topic::parse(raw).unwrap()
    }

    #[test]
    fn wildcard_index_match_from_scenario_6() {
        let index: TopicIndex<&'static str, ()> = TopicIndex::new();
        index.add(&filter("a/+"), "C1", ()).unwrap();
        index.add(&filter("a/b"), "C2", ()).unwrap();
        index.add(&filter("a/#"), "C3", ()).unwrap();

        let mut matched: Vec<&str> = index.match_topic(&topic("a/b")).into_iter().map(|(k, _)| k).collect();
        matched.sort_unstable();
        assert_eq!(matched, vec!["C1", "C2", "C3"]);

        let matched: Vec<&str> = index.match_topic(&topic("a/b/c")).into_iter().map(|(k, _)| k).collect();
        assert_eq!(matched, vec!["C3"]);

        assert!(index.match_topic(&topic("a")).is_empty());
    }

    #[test]
    fn remove_prunes_empty_branches() {
        let index: TopicIndex<&'static str, ()> = TopicIndex::new();
        index.add(&filter("a/b/c"), "C1", ()).unwrap();
        index.remove(&filter("a/b/c"), &"C1");
        assert!(index.match_topic(&topic("a/b/c")).is_empty());
        assert!(index.root.is_empty());
    }

    #[test]
    fn same_subscriber_matched_once_across_overlapping_filters() {
        let index: TopicIndex<&'static str, ()> = TopicIndex::new();
        index.add(&filter("a/+"), "C1", ()).unwrap();
        index.add(&filter("a/#"), "C1", ()).unwrap();
        let matched = index.match_topic(&topic("a/b"));
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn match_filter_enumerates_subsumed_topics() {
        let index: TopicIndex<String, ()> = TopicIndex::new();
        index.add(&filter("sensors/t1"), "sensors/t1".to_string(), ()).unwrap();
        index.add(&filter("sensors/t2"), "sensors/t2".to_string(), ()).unwrap();
        index.add(&filter("other/x"), "other/x".to_string(), ()).unwrap();

        let mut matched: Vec<String> = index
            .match_filter(&filter("sensors/#"))
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        matched.sort();
        assert_eq!(matched, vec!["sensors/t1", "sensors/t2"]);
    }
}
