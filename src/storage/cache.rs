//! Fixed-Capacity Recency Cache
//!
//! A thread-safe key/value cache that evicts the least recently used entry
//! once it is full.
//!
//! ## Layout
//!
//! ```text
//!   index: HashMap<K, slot>
//!               │
//!               ▼
//!   slots: Vec<Node>   head ⇄ node ⇄ node ⇄ ... ⇄ tail
//!                      (most recent)          (least recent)
//! ```
//!
//! Nodes live in a slab and link to each other by slot index, so moving an
//! entry to the front, inserting and evicting are all O(1). Freed slots are
//! recycled through a free list.
//!
//! Every operation, reads included, takes the same mutex. Cache operations
//! are short, so one lock per instance keeps the recency list and the index
//! trivially consistent.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

/// Sentinel for "no neighbour".
const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// The lock-protected state of a [`RecencyCache`].
#[derive(Debug)]
struct Inner<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone,
{
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn node(&self, slot: usize) -> &Node<K, V> {
        self.slots[slot].as_ref().expect("linked slot is occupied")
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node<K, V> {
        self.slots[slot].as_mut().expect("linked slot is occupied")
    }

    /// Unlinks a slot from the recency list without freeing it.
    fn detach(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.node(slot);
            (node.prev, node.next)
        };

        if prev == NIL {
            self.head = next;
        } else {
            self.node_mut(prev).next = next;
        }

        if next == NIL {
            self.tail = prev;
        } else {
            self.node_mut(next).prev = prev;
        }
    }

    /// Links a detached slot in as the most recently used entry.
    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(slot);
            node.prev = NIL;
            node.next = old_head;
        }

        if old_head == NIL {
            self.tail = slot;
        } else {
            self.node_mut(old_head).prev = slot;
        }
        self.head = slot;
    }

    fn touch(&mut self, slot: usize) {
        if self.head != slot {
            self.detach(slot);
            self.push_front(slot);
        }
    }

    fn allocate(&mut self, node: Node<K, V>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn remove_slot(&mut self, slot: usize) -> Node<K, V> {
        self.detach(slot);
        let node = self.slots[slot].take().expect("linked slot is occupied");
        self.free.push(slot);
        node
    }

    fn evict_lru(&mut self) -> Option<K> {
        if self.tail == NIL {
            return None;
        }
        let node = self.remove_slot(self.tail);
        self.index.remove(&node.key);
        Some(node.key)
    }
}

/// A bounded cache with least-recently-used eviction.
///
/// # Example
///
/// ```
/// use flashstore::storage::RecencyCache;
///
/// let cache = RecencyCache::new(2);
/// cache.put("x", 1);
/// cache.put("y", 2);
/// cache.get(&"x");      // "x" is now the most recent
/// cache.put("z", 3);    // evicts "y"
///
/// assert_eq!(cache.get(&"y"), None);
/// assert_eq!(cache.get(&"x"), Some(1));
/// ```
#[derive(Debug)]
pub struct RecencyCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> RecencyCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a cache that holds at most `capacity` entries.
    ///
    /// A capacity of zero produces a cache that stores nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::new()),
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap()
    }

    /// Returns a clone of the cached value and marks it most recently used.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.lock();
        let slot = *inner.index.get(key)?;
        inner.touch(slot);
        Some(inner.node(slot).value.clone())
    }

    /// Inserts or updates a value, marking it most recently used.
    ///
    /// Inserting a new key into a full cache evicts the least recently used
    /// entry first. Returns the evicted key, if any.
    pub fn put(&self, key: K, value: V) -> Option<K> {
        if self.capacity == 0 {
            return None;
        }

        let mut inner = self.lock();

        if let Some(&slot) = inner.index.get(&key) {
            inner.node_mut(slot).value = value;
            inner.touch(slot);
            return None;
        }

        let evicted = if inner.index.len() >= self.capacity {
            inner.evict_lru()
        } else {
            None
        };

        let slot = inner.allocate(Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        });
        inner.push_front(slot);
        inner.index.insert(key, slot);

        evicted
    }

    /// Removes an entry. Absent keys are ignored.
    ///
    /// Returns `true` if an entry was removed.
    pub fn erase<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.lock();
        match inner.index.remove(key) {
            Some(slot) => {
                inner.remove_slot(slot);
                true
            }
            None => false,
        }
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        *inner = Inner::new();
    }

    /// Current number of entries.
    pub fn size(&self) -> usize {
        self.lock().index.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if `key` is cached, without changing its recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().index.contains_key(key)
    }

    /// Snapshot of the cached keys. The order carries no meaning.
    pub fn keys(&self) -> Vec<K> {
        self.lock().index.keys().cloned().collect()
    }
}
