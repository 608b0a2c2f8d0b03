use std::hash::Hash;

use ahash::{HashMap, HashMapExt};
use generational_arena::{Arena, Index};

#[derive(Debug)]
struct Node<K> {
  key: K,
  next: Option<Index>,
  prev: Option<Index>,
}

/// A recency list over the keys of one segment.
///
/// The head is the most recently touched key, the tail the least recently
/// touched one. Nodes live in an arena and are addressed through indices, so
/// there are no self-referential pointers to manage. The list is not
/// internally synchronized; the owning segment's lock provides mutual
/// exclusion.
#[derive(Debug)]
pub(crate) struct AccessOrderList<K: Eq + Hash + Clone> {
  nodes: Arena<Node<K>>,
  // O(1) lookup of a key to its node index in the arena.
  lookup: HashMap<K, Index>,
  head: Option<Index>,
  tail: Option<Index>,
}

impl<K: Eq + Hash + Clone> AccessOrderList<K> {
  pub fn new() -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::new(),
      head: None,
      tail: None,
    }
  }

  // Detach a node from the chain without touching the arena or lookup map.
  fn unlink(&mut self, index: Index) {
    let node = &self.nodes[index];
    let prev_idx = node.prev;
    let next_idx = node.next;

    if let Some(prev) = prev_idx {
      self.nodes[prev].next = next_idx;
    } else {
      // We are unlinking the head.
      self.head = next_idx;
    }

    if let Some(next) = next_idx {
      self.nodes[next].prev = prev_idx;
    } else {
      // We are unlinking the tail.
      self.tail = prev_idx;
    }
  }

  fn link_to_head(&mut self, index: Index) {
    let old_head = self.head;
    self.nodes[index].next = old_head;
    self.nodes[index].prev = None;
    self.head = Some(index);

    if let Some(old_head) = old_head {
      self.nodes[old_head].prev = Some(index);
    }

    if self.tail.is_none() {
      self.tail = Some(index);
    }
  }

  pub fn contains(&self, key: &K) -> bool {
    self.lookup.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.lookup.len()
  }

  /// Inserts `key` as the most recently touched. If the key is already
  /// present it is only moved to the head.
  pub fn push_front(&mut self, key: K) {
    if self.lookup.contains_key(&key) {
      self.move_to_front(&key);
      return;
    }
    let index = self.nodes.insert(Node {
      key: key.clone(),
      next: None,
      prev: None,
    });
    self.lookup.insert(key, index);
    self.link_to_head(index);
  }

  pub fn move_to_front(&mut self, key: &K) {
    if let Some(&index) = self.lookup.get(key) {
      if self.head != Some(index) {
        self.unlink(index);
        self.link_to_head(index);
      }
    }
  }

  /// Removes and returns the least recently touched key.
  pub fn pop_back(&mut self) -> Option<K> {
    let tail_index = self.tail?;
    let key = self.nodes[tail_index].key.clone();
    self.remove(&key);
    Some(key)
  }

  pub fn remove(&mut self, key: &K) -> bool {
    if let Some(index) = self.lookup.remove(key) {
      self.unlink(index);
      self.nodes.remove(index);
      true
    } else {
      false
    }
  }

  pub fn clear(&mut self) {
    self.nodes.clear();
    self.lookup.clear();
    self.head = None;
    self.tail = None;
  }

  /// Keys in head-to-tail order, most recently touched first.
  pub fn keys(&self) -> Vec<K> {
    let mut keys = Vec::with_capacity(self.lookup.len());
    let mut current = self.head;
    while let Some(index) = current {
      keys.push(self.nodes[index].key.clone());
      current = self.nodes[index].next;
    }
    keys
  }
}
