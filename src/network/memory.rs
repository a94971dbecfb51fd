//! Key-bucketed node memories and pair bookkeeping shared by the binary nodes.
//!
//! Both structures keep insertion order and remove in logarithmic time: every
//! entry is stamped with a sequence number and buckets are ordered maps keyed
//! by that stamp.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use crate::fact::Value;

/// Items bucketed by join key, each bucket in insertion order.
///
/// Nodes without an equality key put everything under `Value::Null`, which
/// degrades to a linear scan over one bucket. The key an item was stored
/// under is remembered so removal never has to recompute it from attributes
/// that may already have changed.
#[derive(Debug, Clone)]
pub struct Memory<T> {
    buckets: HashMap<Value, BTreeMap<u64, T>>,
    keys: HashMap<T, (Value, u64)>,
    next: u64,
}

impl<T: Copy + Eq + Hash> Memory<T> {
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            keys: HashMap::new(),
            next: 0,
        }
    }

    pub fn insert(&mut self, item: T, key: Value) {
        let seq = self.next;
        self.next += 1;
        self.buckets.entry(key.clone()).or_default().insert(seq, item);
        self.keys.insert(item, (key, seq));
    }

    /// Remove an item, returning the key it was stored under.
    pub fn remove(&mut self, item: T) -> Option<Value> {
        let (key, seq) = self.keys.remove(&item)?;
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.remove(&seq);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        Some(key)
    }

    /// Move an item to a new key. It goes to the back of the new bucket
    /// unless the key is unchanged, in which case its position is kept.
    pub fn rekey(&mut self, item: T, key: Value) {
        if self.keys.get(&item).is_some_and(|(k, _)| *k == key) {
            return;
        }
        self.remove(item);
        self.insert(item, key);
    }

    /// Items stored under `key`, oldest first.
    pub fn bucket(&self, key: &Value) -> impl Iterator<Item = T> + '_ {
        self.buckets
            .get(key)
            .into_iter()
            .flat_map(|bucket| bucket.values().copied())
    }

    pub fn contains(&self, item: T) -> bool {
        self.keys.contains_key(&item)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<T: Copy + Eq + Hash> Default for Memory<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A many-to-many relation between left tokens and right elements.
///
/// Each side lists its partners in the order the links were made.
#[derive(Debug, Clone)]
pub struct Links<L, R> {
    by_left: HashMap<L, BTreeMap<u64, R>>,
    by_right: HashMap<R, BTreeMap<u64, L>>,
    stamps: HashMap<(L, R), u64>,
    next: u64,
}

impl<L: Copy + Eq + Hash, R: Copy + Eq + Hash> Links<L, R> {
    pub fn new() -> Self {
        Self {
            by_left: HashMap::new(),
            by_right: HashMap::new(),
            stamps: HashMap::new(),
            next: 0,
        }
    }

    /// Link a pair. Returns `false` if it was already linked.
    pub fn link(&mut self, left: L, right: R) -> bool {
        if self.stamps.contains_key(&(left, right)) {
            return false;
        }
        let seq = self.next;
        self.next += 1;
        self.stamps.insert((left, right), seq);
        self.by_left.entry(left).or_default().insert(seq, right);
        self.by_right.entry(right).or_default().insert(seq, left);
        true
    }

    /// Unlink a pair. Returns `false` if it was not linked.
    pub fn unlink(&mut self, left: L, right: R) -> bool {
        let Some(seq) = self.stamps.remove(&(left, right)) else {
            return false;
        };
        detach(&mut self.by_left, left, seq);
        detach(&mut self.by_right, right, seq);
        true
    }

    /// Drop every link of `left`, returning its partners in link order.
    pub fn unlink_left(&mut self, left: L) -> Vec<R> {
        let partners: Vec<(u64, R)> = self.by_left.remove(&left).unwrap_or_default().into_iter().collect();
        for &(seq, right) in &partners {
            self.stamps.remove(&(left, right));
            detach(&mut self.by_right, right, seq);
        }
        partners.into_iter().map(|(_, right)| right).collect()
    }

    /// Drop every link of `right`, returning its partners in link order.
    pub fn unlink_right(&mut self, right: R) -> Vec<L> {
        let partners: Vec<(u64, L)> = self.by_right.remove(&right).unwrap_or_default().into_iter().collect();
        for &(seq, left) in &partners {
            self.stamps.remove(&(left, right));
            detach(&mut self.by_left, left, seq);
        }
        partners.into_iter().map(|(_, left)| left).collect()
    }

    /// Partners of `left`, in link order.
    pub fn rights_of(&self, left: L) -> Vec<R> {
        self.by_left
            .get(&left)
            .map(|m| m.values().copied().collect())
            .unwrap_or_default()
    }

    /// Partners of `right`, in link order.
    pub fn lefts_of(&self, right: R) -> Vec<L> {
        self.by_right
            .get(&right)
            .map(|m| m.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}

impl<L: Copy + Eq + Hash, R: Copy + Eq + Hash> Default for Links<L, R> {
    fn default() -> Self {
        Self::new()
    }
}

fn detach<K: Eq + Hash, V>(side: &mut HashMap<K, BTreeMap<u64, V>>, key: K, seq: u64) {
    if let Some(partners) = side.get_mut(&key) {
        partners.remove(&seq);
        if partners.is_empty() {
            side.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(mem: &Memory<u32>, key: &str) -> Vec<u32> {
        mem.bucket(&Value::from(key)).collect()
    }

    #[test]
    fn buckets_keep_insertion_order() {
        let mut mem = Memory::new();
        mem.insert(1u32, Value::from("a"));
        mem.insert(2u32, Value::from("b"));
        mem.insert(3u32, Value::from("a"));

        assert_eq!(bucket(&mem, "a"), vec![1, 3]);
        assert_eq!(bucket(&mem, "b"), vec![2]);
        assert!(bucket(&mem, "zzz").is_empty());
        assert_eq!(mem.len(), 3);
    }

    #[test]
    fn remove_reports_stored_key() {
        let mut mem = Memory::new();
        mem.insert(1u32, Value::Int(5));

        assert_eq!(mem.remove(1), Some(Value::Int(5)));
        assert_eq!(mem.remove(1), None);
        assert!(mem.is_empty());
    }

    #[test]
    fn removal_from_the_middle_keeps_order() {
        let mut mem = Memory::new();
        for i in 0..5u32 {
            mem.insert(i, Value::Null);
        }
        mem.remove(2);
        mem.remove(0);
        mem.insert(9, Value::Null);
        assert_eq!(mem.bucket(&Value::Null).collect::<Vec<_>>(), vec![1, 3, 4, 9]);
    }

    #[test]
    fn rekey_moves_between_buckets() {
        let mut mem = Memory::new();
        mem.insert(1u32, Value::from("a"));
        mem.insert(2u32, Value::from("a"));

        mem.rekey(1, Value::from("a"));
        assert_eq!(bucket(&mem, "a"), vec![1, 2]);

        mem.rekey(1, Value::from("b"));
        assert_eq!(bucket(&mem, "a"), vec![2]);
        assert_eq!(bucket(&mem, "b"), vec![1]);
        assert!(mem.contains(1));
    }

    #[test]
    fn links_track_both_sides_in_link_order() {
        let mut links: Links<u32, char> = Links::new();
        assert!(links.link(1, 'a'));
        assert!(links.link(1, 'b'));
        assert!(links.link(2, 'a'));
        assert!(!links.link(1, 'a'));

        assert_eq!(links.rights_of(1), vec!['a', 'b']);
        assert_eq!(links.lefts_of('a'), vec![1, 2]);

        assert!(links.unlink(1, 'a'));
        assert!(!links.unlink(1, 'a'));
        assert_eq!(links.lefts_of('a'), vec![2]);
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn unlinking_one_side_clears_the_other() {
        let mut links: Links<u32, char> = Links::new();
        links.link(1, 'a');
        links.link(2, 'a');
        links.link(2, 'b');

        assert_eq!(links.unlink_right('a'), vec![1, 2]);
        assert!(links.rights_of(1).is_empty());
        assert_eq!(links.rights_of(2), vec!['b']);

        assert_eq!(links.unlink_left(2), vec!['b']);
        assert!(links.is_empty());
        assert!(links.lefts_of('b').is_empty());
    }
}
