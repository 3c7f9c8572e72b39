use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Weak;

use crate::key::{self, Key, KeyCell};

// A node in a bucket chain.
//
// Everything but the value is immutable once the node is published. Removing
// a node copies the part of the chain in front of it, so readers walking an
// old chain always see a consistent list.
pub struct Node<K, V> {
    // Weak handle to the key, the node is dead once this can't be upgraded.
    pub key: Weak<KeyCell<K>>,
    // The precomputed hash of the key.
    pub hash: u64,
    // The boxed value, null once the node has been unlinked.
    pub value: AtomicPtr<V>,
    // The next node in the bucket.
    pub next: *mut Node<K, V>,
}

impl<K, V> Node<K, V> {
    // Allocate a node holding the given value pointer.
    pub fn alloc(
        key: Weak<KeyCell<K>>,
        hash: u64,
        value: *mut V,
        next: *mut Node<K, V>,
    ) -> *mut Node<K, V> {
        Box::into_raw(Box::new(Node {
            key,
            hash,
            value: AtomicPtr::new(value),
            next,
        }))
    }

    // Allocate a copy of this node in front of `next`.
    //
    // The copy takes over the value. The original must only be retired,
    // never freed along with its value.
    pub fn copy(&self, next: *mut Node<K, V>) -> *mut Node<K, V> {
        Node::alloc(
            self.key.clone(),
            self.hash,
            self.value.load(Ordering::Relaxed),
            next,
        )
    }

    // Returns `true` if the key of this node has been dropped.
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.key.strong_count() == 0
    }

    // Returns a strong handle to the key if it is still alive.
    #[inline]
    pub fn upgrade(&self) -> Option<Key<K>> {
        Key::upgrade(&self.key)
    }

    // Returns `true` if this node belongs to the key with the given identity.
    #[inline]
    pub fn is(&self, identity: usize) -> bool {
        key::identity(self.key.as_ptr()) == identity
    }
}

// A bucket array.
pub struct Table<K, V> {
    buckets: Box<[AtomicPtr<Node<K, V>>]>,
}

impl<K, V> Table<K, V> {
    // Allocate an empty table with the provided length.
    pub fn alloc(len: usize) -> *mut Table<K, V> {
        assert!(len.is_power_of_two());

        let buckets = (0..len).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        Box::into_raw(Box::new(Table { buckets }))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    // Returns the bucket index of a hash.
    #[inline]
    pub fn index(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    // Returns the head of the bucket a hash maps to.
    #[inline]
    pub fn bucket(&self, hash: u64) -> &AtomicPtr<Node<K, V>> {
        &self.buckets[self.index(hash)]
    }

    #[inline]
    pub fn buckets(&self) -> &[AtomicPtr<Node<K, V>>] {
        &self.buckets
    }
}

// Free every node and value reachable from the table, and the table itself.
//
// # Safety
//
// The table and its chains must not be reachable by anyone else, and must not
// be accessed after this call.
pub unsafe fn drop_table<K, V>(table: *mut Table<K, V>) {
    // Safety: Guaranteed by the caller.
    let table = unsafe { Box::from_raw(table) };

    for bucket in table.buckets.iter() {
        let mut node = bucket.load(Ordering::Relaxed);

        while !node.is_null() {
            // Safety: Every node reachable from the current table is owned by it.
            let owned = unsafe { Box::from_raw(node) };

            let value = owned.value.load(Ordering::Relaxed);
            if !value.is_null() {
                // Safety: Live nodes own their value.
                drop(unsafe { Box::from_raw(value) });
            }

            node = owned.next;
        }
    }
}
