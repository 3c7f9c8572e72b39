mod alloc;
mod segment;
pub mod utils;

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::slice;
use std::sync::atomic::{AtomicPtr, Ordering};

use parking_lot::MutexGuard;
use seize::{Collector, Guard};

use self::alloc::{Node, Table};
use self::segment::{Segment, Writer};
use self::utils::{log2, CachePadded};
use crate::key::Key;

pub use self::segment::{Insert, MAXIMUM_CAPACITY};

/// The default initial capacity of a map.
pub const DEFAULT_CAPACITY: usize = 16;

/// The default load factor of a segment.
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;

/// The default number of segments.
pub const DEFAULT_CONCURRENCY_LEVEL: usize = 16;

/// The maximum number of segments.
pub const MAX_SEGMENTS: usize = 1 << 16;

/// The number of unlocked attempts at `len` and `contains_value` before
/// locking every segment.
const RETRIES_BEFORE_LOCK: usize = 2;

// A concurrent hash map with weakly held keys, striped across segments.
pub struct HashMap<K, V, S> {
    segments: Box<[CachePadded<Segment<K, V>>]>,
    segment_shift: u32,
    segment_mask: usize,
    pub hasher: S,
    collector: Collector,
    // Nodes are shared across threads through raw pointers.
    _nodes: PhantomData<*mut Node<K, V>>,
}

impl<K, V, S> HashMap<K, V, S> {
    /// Creates a map with the given configuration.
    ///
    /// The load factor must be positive and finite.
    pub fn new(
        capacity: usize,
        load_factor: f32,
        concurrency_level: usize,
        hasher: S,
        collector: Collector,
    ) -> HashMap<K, V, S> {
        debug_assert!(load_factor.is_finite() && load_factor > 0.0);

        let segments = concurrency_level.clamp(1, MAX_SEGMENTS).next_power_of_two();

        // Split the capacity evenly, with at least one bucket per segment.
        let capacity = capacity
            .min(MAXIMUM_CAPACITY)
            .div_ceil(segments)
            .max(1)
            .next_power_of_two();

        HashMap {
            segments: (0..segments)
                .map(|_| CachePadded::new(Segment::new(capacity, load_factor)))
                .collect(),
            segment_shift: (u64::BITS as usize - log2!(segments)) as u32,
            segment_mask: segments - 1,
            hasher,
            collector,
            _nodes: PhantomData,
        }
    }

    /// Returns a reference to the collector.
    #[inline]
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Panics if the guard was not created by this map's collector.
    #[inline]
    pub fn verify(&self, guard: &impl Guard) {
        assert_eq!(
            *guard.collector(),
            self.collector,
            "Attempted to access map with incorrect guard"
        );
    }

    /// Returns the segment a hash belongs to.
    ///
    /// Segments are selected by the high bits of the hash, buckets by the low bits.
    #[inline]
    fn segment_for(&self, hash: u64) -> &Segment<K, V> {
        let index = hash.checked_shr(self.segment_shift).unwrap_or(0) as usize;
        &self.segments[index & self.segment_mask]
    }

    /// Lock every segment in index order.
    ///
    /// The returned guards are released in the same order when dropped.
    fn lock_all(&self) -> Vec<MutexGuard<'_, Writer>> {
        self.segments.iter().map(|segment| segment.lock()).collect()
    }

    /// Returns the number of entries in the map.
    ///
    /// Entries of dropped keys are counted until their segment is drained.
    pub fn len(&self) -> usize {
        let mut mod_counts = vec![0; self.segments.len()];

        for _ in 0..RETRIES_BEFORE_LOCK {
            let mut sum = 0;
            for (segment, mod_count) in self.segments.iter().zip(mod_counts.iter_mut()) {
                *mod_count = segment.mod_count();
                sum += segment.count();
            }

            // The sum is consistent if no segment changed while we were counting.
            let unchanged = self
                .segments
                .iter()
                .zip(mod_counts.iter())
                .all(|(segment, &mod_count)| segment.mod_count() == mod_count);

            if unchanged {
                return sum;
            }
        }

        tracing::trace!("len contended, locking all segments");

        let _writers = self.lock_all();
        self.segments.iter().map(|segment| segment.count()).sum()
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        let mut mod_counts = vec![0; self.segments.len()];
        let mut sum = 0;

        for (segment, mod_count) in self.segments.iter().zip(mod_counts.iter_mut()) {
            if segment.count() != 0 {
                return false;
            }

            *mod_count = segment.mod_count();
            sum += *mod_count;
        }

        // A segment may have been filled and emptied while we were looking at
        // the others, so check that nothing changed.
        if sum != 0 {
            for (segment, &mod_count) in self.segments.iter().zip(mod_counts.iter()) {
                if segment.count() != 0 || segment.mod_count() != mod_count {
                    return false;
                }
            }
        }

        true
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Returns the entry for a key.
    ///
    /// # Safety
    ///
    /// The guard must have been verified.
    #[inline]
    pub unsafe fn get<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<(Key<K>, &'g V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hasher.hash_one(key);
        self.segment_for(hash).get(hash, |k| k.borrow() == key, guard)
    }

    /// Inserts a value for a key.
    ///
    /// # Safety
    ///
    /// The guard must have been verified.
    #[inline]
    pub unsafe fn insert<'g>(
        &self,
        key: &Key<K>,
        value: V,
        replace: bool,
        guard: &'g impl Guard,
    ) -> Insert<'g, V> {
        let hash = self.hasher.hash_one(key.get());
        self.segment_for(hash).insert(key, hash, value, !replace, guard)
    }

    /// Returns the value for a key, inserting the result of `f` if absent.
    ///
    /// # Safety
    ///
    /// The guard must have been verified.
    #[inline]
    pub unsafe fn compute_if_absent<'g, F>(&self, key: &Key<K>, f: F, guard: &'g impl Guard) -> &'g V
    where
        F: FnOnce(&K) -> V,
    {
        let hash = self.hasher.hash_one(key.get());
        self.segment_for(hash).compute_if_absent(key, hash, f, guard)
    }

    /// Removes the entry for a key if `check` accepts its value.
    ///
    /// # Safety
    ///
    /// The guard must have been verified.
    #[inline]
    pub unsafe fn remove<'g, Q, F>(&self, key: &Q, check: F, guard: &'g impl Guard) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> bool,
    {
        let hash = self.hasher.hash_one(key);
        self.segment_for(hash).remove(hash, |k| k.borrow() == key, check, guard)
    }

    /// Replaces the value for a key if `check` accepts the current value.
    ///
    /// # Safety
    ///
    /// The guard must have been verified.
    #[inline]
    pub unsafe fn replace<'g, Q, F>(
        &self,
        key: &Q,
        check: F,
        value: V,
        guard: &'g impl Guard,
    ) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> bool,
    {
        let hash = self.hasher.hash_one(key);
        self.segment_for(hash).replace(hash, |k| k.borrow() == key, check, value, guard)
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Returns `true` if any live entry holds `value`.
    ///
    /// # Safety
    ///
    /// The guard must have been verified.
    pub unsafe fn contains_value(&self, value: &V, guard: &impl Guard) -> bool
    where
        V: PartialEq,
    {
        let mut mod_counts = vec![0; self.segments.len()];

        for _ in 0..RETRIES_BEFORE_LOCK {
            for (segment, mod_count) in self.segments.iter().zip(mod_counts.iter_mut()) {
                *mod_count = segment.mod_count();

                if segment.contains_value(value, guard) {
                    return true;
                }
            }

            let unchanged = self
                .segments
                .iter()
                .zip(mod_counts.iter())
                .all(|(segment, &mod_count)| segment.mod_count() == mod_count);

            if unchanged {
                return false;
            }
        }

        tracing::trace!("contains_value contended, locking all segments");

        let _writers = self.lock_all();
        self.segments
            .iter()
            .any(|segment| segment.contains_value(value, guard))
    }

    /// Removes every entry, one segment at a time.
    ///
    /// # Safety
    ///
    /// The guard must have been verified.
    pub unsafe fn clear(&self, guard: &impl Guard) {
        for segment in self.segments.iter() {
            segment.clear(guard);
        }
    }

    /// Removes the entries of every dropped key.
    ///
    /// # Safety
    ///
    /// The guard must have been verified.
    pub unsafe fn purge(&self, guard: &impl Guard) {
        for segment in self.segments.iter() {
            segment.purge(guard);
        }
    }

    /// Returns the total number of buckets.
    ///
    /// # Safety
    ///
    /// The guard must have been verified.
    pub unsafe fn capacity(&self, guard: &impl Guard) -> usize {
        self.segments
            .iter()
            .map(|segment| segment.capacity(guard))
            .sum()
    }

    /// Returns an iterator over the live entries of the map.
    ///
    /// # Safety
    ///
    /// The guard must have been verified.
    #[inline]
    pub unsafe fn iter<'g, G: Guard>(&'g self, guard: &'g G) -> Iter<'g, K, V, G> {
        let buckets: &[AtomicPtr<Node<K, V>>] = Default::default();

        Iter {
            segments: self.segments.iter(),
            buckets: buckets.iter(),
            node: std::ptr::null_mut(),
            guard,
        }
    }
}

impl<K, V, S> Drop for HashMap<K, V, S> {
    fn drop(&mut self) {
        // Free everything that was retired before the segments free their
        // current tables.
        //
        // Safety: We have unique access to the collector.
        unsafe { self.collector.reclaim_all() };
    }
}

// An iterator over the live entries of a map.
//
// Walks segments in index order, then buckets, then chains. Nodes whose key
// was dropped, or whose value was detached by a concurrent removal, are skipped.
pub struct Iter<'g, K, V, G> {
    segments: slice::Iter<'g, CachePadded<Segment<K, V>>>,
    buckets: slice::Iter<'g, AtomicPtr<Node<K, V>>>,
    node: *mut Node<K, V>,
    guard: &'g G,
}

impl<'g, K: 'g, V: 'g, G> Iterator for Iter<'g, K, V, G>
where
    G: Guard,
{
    type Item = (Key<K>, &'g V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while !self.node.is_null() {
                // Safety: The node was reached through a table protected by our guard.
                let node = unsafe { &*self.node };
                self.node = node.next;

                if let Some(key) = node.upgrade() {
                    let value = self.guard.protect(&node.value, Ordering::Acquire);

                    if !value.is_null() {
                        // Safety: Values reachable through a protected node stay
                        // valid while the guard is held.
                        return Some((key, unsafe { &*value }));
                    }
                }
            }

            if let Some(bucket) = self.buckets.next() {
                self.node = self.guard.protect(bucket, Ordering::Acquire);
                continue;
            }

            let segment = self.segments.next()?;
            let table: &'g Table<K, V> = segment.table(self.guard);
            self.buckets = table.buckets().iter();
        }
    }
}

impl<K, V, G> Clone for Iter<'_, K, V, G> {
    fn clone(&self) -> Self {
        Iter {
            segments: self.segments.clone(),
            buckets: self.buckets.clone(),
            node: self.node,
            guard: self.guard,
        }
    }
}
