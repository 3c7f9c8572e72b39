use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use seize::{reclaim, Guard};

use super::alloc::{drop_table, Node, Table};
use crate::key::{Key, ReclaimQueue};

/// The maximum bucket array length of a single segment.
pub const MAXIMUM_CAPACITY: usize = 1 << 30;

/// An independently locked partition of the map.
///
/// Readers traverse the current bucket array without locking. Writers hold
/// `lock` for the whole operation, so the bucket array, the chains and the
/// counters only ever change under it.
pub struct Segment<K, V> {
    /// The current bucket array.
    table: AtomicPtr<Table<K, V>>,

    /// The number of nodes reachable from `table`, including dead ones that
    /// have not been drained yet.
    count: AtomicUsize,

    /// Bumped on every change to `count`, used to validate lock-free sums.
    mod_count: AtomicUsize,

    /// Writer lock, guarding the resize threshold.
    lock: Mutex<Writer>,

    /// The fill ratio above which the bucket array is doubled.
    load_factor: f32,

    /// Notices of dead keys, drained by writers.
    queue: Arc<ReclaimQueue>,
}

/// State owned by the writer holding the segment lock.
pub struct Writer {
    threshold: usize,
}

/// The result of an insert.
pub enum Insert<'g, V> {
    /// Inserted a new entry.
    Inserted(&'g V),

    /// Replaced the value of an existing entry.
    Replaced(&'g V),

    /// The key was present and the insert only applied to absent keys.
    Occupied { current: &'g V, not_inserted: V },
}

// Nodes unlinked during an operation, retired once they are unreachable.
struct Retired<K, V> {
    // Unlinked nodes whose value lives on in a copy.
    nodes: Vec<*mut Node<K, V>>,
    // Unlinked nodes that own their value.
    entries: Vec<*mut Node<K, V>>,
}

impl<K, V> Retired<K, V> {
    fn new() -> Self {
        Retired {
            nodes: Vec::new(),
            entries: Vec::new(),
        }
    }

    // Retire everything that was collected.
    //
    // # Safety
    //
    // The nodes must be unreachable from the segment for new readers.
    unsafe fn retire(self, guard: &impl Guard) {
        for node in self.nodes {
            // Safety: Guaranteed by the caller. The value was taken over by a copy.
            unsafe { guard.defer_retire(node, reclaim::boxed::<Node<K, V>>) };
        }

        for node in self.entries {
            // Safety: Guaranteed by the caller.
            unsafe { retire_entry(node, guard) };
        }
    }
}

// Retire an unlinked node along with its value.
//
// # Safety
//
// The node must be unreachable from the segment for new readers and must own
// its value.
unsafe fn retire_entry<K, V>(node: *mut Node<K, V>, guard: &impl Guard) {
    // Detach the value, readers that still reach the node fall back to the lock.
    //
    // Safety: The node is valid until it is retired below.
    let value = unsafe { (*node).value.swap(ptr::null_mut(), Ordering::AcqRel) };

    if !value.is_null() {
        // Safety: The node owned its value.
        unsafe { guard.defer_retire(value, reclaim::boxed::<V>) };
    }

    // Safety: Guaranteed by the caller.
    unsafe { guard.defer_retire(node, reclaim::boxed::<Node<K, V>>) };
}

impl<K, V> Segment<K, V> {
    /// Creates a segment with a bucket array of `capacity` buckets.
    pub fn new(capacity: usize, load_factor: f32) -> Segment<K, V> {
        Segment {
            table: AtomicPtr::new(Table::alloc(capacity)),
            count: AtomicUsize::new(0),
            mod_count: AtomicUsize::new(0),
            lock: Mutex::new(Writer {
                threshold: threshold(capacity, load_factor),
            }),
            load_factor,
            queue: Arc::new(ReclaimQueue::new()),
        }
    }

    /// Acquire the writer lock.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, Writer> {
        self.lock.lock()
    }

    /// Returns the number of nodes in the segment.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns the modification counter.
    #[inline]
    pub fn mod_count(&self) -> usize {
        self.mod_count.load(Ordering::Acquire)
    }

    /// Returns the length of the current bucket array.
    pub fn capacity(&self, guard: &impl Guard) -> usize {
        // Safety: The table is never null and protected by the guard.
        unsafe { (*guard.protect(&self.table, Ordering::Acquire)).len() }
    }

    /// Returns the current bucket array.
    #[inline]
    pub fn table<'g>(&self, guard: &'g impl Guard) -> &'g Table<K, V> {
        // Safety: The table is never null, and a retired table stays valid
        // for as long as the guard is held.
        unsafe { &*guard.protect(&self.table, Ordering::Acquire) }
    }

    /// Returns the bucket array while holding the lock.
    #[inline]
    fn locked_table(&self, _writer: &mut Writer) -> &Table<K, V> {
        // Safety: The table is only replaced by writers, and we hold the lock.
        unsafe { &*self.table.load(Ordering::Acquire) }
    }

    /// Publish a new node count.
    #[inline]
    fn set_count(&self, count: usize) {
        self.count.store(count, Ordering::Release);
        self.mod_count.fetch_add(1, Ordering::Release);
    }
}

impl<K, V> Segment<K, V> {
    /// Returns the value of the first live key in the hash's chain that
    /// satisfies `eq`.
    pub fn get<'g, G: Guard>(
        &self,
        hash: u64,
        eq: impl Fn(&K) -> bool,
        guard: &'g G,
    ) -> Option<(Key<K>, &'g V)> {
        if self.count() == 0 {
            return None;
        }

        let table = self.table(guard);
        let mut node = guard.protect(table.bucket(hash), Ordering::Acquire);

        while !node.is_null() {
            // Safety: Nodes reachable from a protected table are valid while
            // the guard is held.
            let current = unsafe { &*node };

            if current.hash == hash {
                if let Some(key) = current.upgrade().filter(|key| eq(key.get())) {
                    let value = guard.protect(&current.value, Ordering::Acquire);

                    // The node was unlinked by a concurrent writer, ask again under the lock.
                    if value.is_null() {
                        return self.get_locked(hash, eq, guard);
                    }

                    // Safety: A value observed through a protected node is
                    // retired no earlier than the node, and stays valid for
                    // as long as the guard is held.
                    return Some((key, unsafe { &*value }));
                }
            }

            node = current.next;
        }

        None
    }

    /// Slow path of `get`, racing with a concurrent removal.
    #[cold]
    fn get_locked<'g, G: Guard>(
        &self,
        hash: u64,
        eq: impl Fn(&K) -> bool,
        guard: &'g G,
    ) -> Option<(Key<K>, &'g V)> {
        let mut writer = self.lock();
        self.drain(&mut writer, guard);

        let table = self.locked_table(&mut writer);
        let (node, key) = find(table, hash, &eq)?;

        // Safety: We hold the lock, so the node is linked and owns a value.
        Some((key, unsafe { &*(*node).value.load(Ordering::Acquire) }))
    }

    /// Returns `true` if a live node holds a value equal to `value`.
    ///
    /// This is a lock-free scan, callers validate it with `mod_count`.
    pub fn contains_value(&self, value: &V, guard: &impl Guard) -> bool
    where
        V: PartialEq,
    {
        if self.count() == 0 {
            return false;
        }

        let table = self.table(guard);

        for bucket in table.buckets() {
            let mut node = guard.protect(bucket, Ordering::Acquire);

            while !node.is_null() {
                // Safety: Protected by the guard, see `get`.
                let current = unsafe { &*node };

                if !current.is_dead() {
                    let found = guard.protect(&current.value, Ordering::Acquire);

                    // Safety: Protected by the guard, see `get`.
                    if !found.is_null() && unsafe { &*found } == value {
                        return true;
                    }
                }

                node = current.next;
            }
        }

        false
    }

    /// Insert a value for `key`, replacing any existing value unless `only_if_absent`.
    pub fn insert<'g, G: Guard>(
        &self,
        key: &Key<K>,
        hash: u64,
        value: V,
        only_if_absent: bool,
        guard: &'g G,
    ) -> Insert<'g, V>
    where
        K: Eq,
    {
        let mut writer = self.lock();
        self.drain(&mut writer, guard);

        let table = self.locked_table(&mut writer);

        if let Some((node, _)) = find(table, hash, &|k: &K| k == key.get()) {
            // Safety: We hold the lock, so the node is linked and owns a value.
            let node = unsafe { &*node };

            if only_if_absent {
                return Insert::Occupied {
                    // Safety: The value is not retired while the guard is held.
                    current: unsafe { &*node.value.load(Ordering::Acquire) },
                    not_inserted: value,
                };
            }

            let new = Box::into_raw(Box::new(value));
            let old = node.value.swap(new, Ordering::AcqRel);

            // Safety: The old value was owned by the node and is now unreachable
            // for new readers.
            unsafe { guard.defer_retire(old, reclaim::boxed::<V>) };

            // Safety: Retired values stay valid while the guard is held.
            return Insert::Replaced(unsafe { &*old });
        }

        Insert::Inserted(self.link(&mut writer, key, hash, value, guard))
    }

    /// Returns the value for `key`, inserting the result of `f` if it is absent.
    ///
    /// `f` runs under the segment lock, so racing callers for the same key
    /// compute at most once.
    pub fn compute_if_absent<'g, G: Guard>(
        &self,
        key: &Key<K>,
        hash: u64,
        f: impl FnOnce(&K) -> V,
        guard: &'g G,
    ) -> &'g V
    where
        K: Eq,
    {
        let mut writer = self.lock();
        self.drain(&mut writer, guard);

        let table = self.locked_table(&mut writer);

        if let Some((node, _)) = find(table, hash, &|k: &K| k == key.get()) {
            // Safety: We hold the lock, so the node is linked and owns a value.
            return unsafe { &*(*node).value.load(Ordering::Acquire) };
        }

        let value = f(key.get());
        self.link(&mut writer, key, hash, value, guard)
    }

    /// Link a new node for a key known to be absent, resizing if needed.
    fn link<'g>(
        &self,
        writer: &mut Writer,
        key: &Key<K>,
        hash: u64,
        value: V,
        guard: &'g impl Guard,
    ) -> &'g V {
        let mut count = self.count.load(Ordering::Relaxed) + 1;

        if count > writer.threshold {
            count -= self.rehash(writer, guard);
        }

        let table = self.locked_table(writer);
        let bucket = table.bucket(hash);

        key.watch(&self.queue, hash);

        let value = Box::into_raw(Box::new(value));
        let node = Node::alloc(key.downgrade(), hash, value, bucket.load(Ordering::Acquire));
        bucket.store(node, Ordering::Release);

        self.set_count(count);

        // Safety: The value is owned by a linked node, and is not retired while
        // the guard is held.
        unsafe { &*value }
    }

    /// Remove the live entry matching `eq` if `check` accepts its value,
    /// returning the removed value.
    pub fn remove<'g, G: Guard>(
        &self,
        hash: u64,
        eq: impl Fn(&K) -> bool,
        check: impl FnOnce(&V) -> bool,
        guard: &'g G,
    ) -> Option<&'g V> {
        let mut writer = self.lock();
        self.drain(&mut writer, guard);

        let table = self.locked_table(&mut writer);
        let (node, _key) = find(table, hash, &eq)?;

        // Safety: We hold the lock, so the node is linked and owns a value.
        let value = unsafe { &*(*node).value.load(Ordering::Acquire) };
        if !check(value) {
            return None;
        }

        let removed = self.unlink(&mut writer, hash, node, guard);
        self.set_count(self.count.load(Ordering::Relaxed) - removed);

        // Safety: The value was retired after we loaded it, so it stays valid
        // while the guard is held.
        Some(value)
    }

    /// Replace the value of the live entry matching `eq` if `check` accepts
    /// the current value, returning the replaced value.
    pub fn replace<'g, G: Guard>(
        &self,
        hash: u64,
        eq: impl Fn(&K) -> bool,
        check: impl FnOnce(&V) -> bool,
        value: V,
        guard: &'g G,
    ) -> Option<&'g V> {
        let mut writer = self.lock();
        self.drain(&mut writer, guard);

        let table = self.locked_table(&mut writer);
        let (node, _key) = find(table, hash, &eq)?;

        // Safety: We hold the lock, so the node is linked and owns a value.
        let node = unsafe { &*node };

        // Safety: See above.
        if !check(unsafe { &*node.value.load(Ordering::Acquire) }) {
            return None;
        }

        let new = Box::into_raw(Box::new(value));
        let old = node.value.swap(new, Ordering::AcqRel);

        // Safety: The old value was owned by the node and is now unreachable
        // for new readers.
        unsafe { guard.defer_retire(old, reclaim::boxed::<V>) };

        // Safety: Retired values stay valid while the guard is held.
        Some(unsafe { &*old })
    }

    /// Unlink `target` from the chain of `hash`, dropping any dead nodes in
    /// front of it. Returns the number of nodes removed.
    ///
    /// Nodes are immutable, so the prefix of the chain is copied in front of
    /// the target's successor.
    fn unlink(
        &self,
        writer: &mut Writer,
        hash: u64,
        target: *mut Node<K, V>,
        guard: &impl Guard,
    ) -> usize {
        let table = self.locked_table(writer);
        let bucket = table.bucket(hash);

        let mut retired = Retired::new();
        let mut removed = 1;

        // Safety: We hold the lock, every node in the chain is valid.
        let mut head = unsafe { (*target).next };
        let mut node = bucket.load(Ordering::Acquire);

        while node != target {
            // Safety: See above.
            let current = unsafe { &*node };

            if current.is_dead() {
                removed += 1;
                retired.entries.push(node);
            } else {
                head = current.copy(head);
                retired.nodes.push(node);
            }

            node = current.next;
        }

        bucket.store(head, Ordering::Release);
        retired.entries.push(target);

        // Safety: The old prefix and the target are no longer reachable from the bucket.
        unsafe { retired.retire(guard) };

        removed
    }

    /// Double the bucket array, dropping dead nodes from copied chains.
    /// Returns the number of nodes dropped.
    ///
    /// The tail of each chain that maps to a single new bucket is reused as
    /// is, the nodes in front of it are copied.
    fn rehash(&self, writer: &mut Writer, guard: &impl Guard) -> usize {
        let old = self.table.load(Ordering::Acquire);

        // Safety: We hold the lock, the table is valid.
        let old_table = unsafe { &*old };
        let old_capacity = old_table.len();

        // Keep chaining, the segment is as large as it gets.
        if old_capacity >= MAXIMUM_CAPACITY {
            return 0;
        }

        let new_capacity = old_capacity << 1;
        let new = Table::<K, V>::alloc(new_capacity);

        // Safety: The table is not yet shared.
        let new_table = unsafe { &*new };

        let mut retired = Retired::new();
        let mut dropped = 0;

        for bucket in old_table.buckets() {
            let first = bucket.load(Ordering::Acquire);
            if first.is_null() {
                continue;
            }

            // Safety: We hold the lock, every node in the chain is valid.
            let first_node = unsafe { &*first };
            let index = new_table.index(first_node.hash);

            // Single node chain, reuse it.
            if first_node.next.is_null() {
                new_table.buckets()[index].store(first, Ordering::Relaxed);
                continue;
            }

            // Find the trailing run of nodes that all land in the same bucket.
            let mut last_run = first;
            let mut last_index = index;
            let mut node = first_node.next;

            while !node.is_null() {
                // Safety: See above.
                let current = unsafe { &*node };
                let index = new_table.index(current.hash);

                if index != last_index {
                    last_index = index;
                    last_run = node;
                }

                node = current.next;
            }

            new_table.buckets()[last_index].store(last_run, Ordering::Relaxed);

            // Copy the nodes in front of the run.
            let mut node = first;
            while node != last_run {
                // Safety: See above.
                let current = unsafe { &*node };

                if current.is_dead() {
                    dropped += 1;
                    retired.entries.push(node);
                } else {
                    let bucket = &new_table.buckets()[new_table.index(current.hash)];
                    bucket.store(
                        current.copy(bucket.load(Ordering::Relaxed)),
                        Ordering::Relaxed,
                    );
                    retired.nodes.push(node);
                }

                node = current.next;
            }
        }

        writer.threshold = threshold(new_capacity, self.load_factor);
        self.table.store(new, Ordering::Release);

        // Safety: The old table and the copied nodes are unreachable from the
        // new table.
        unsafe {
            guard.defer_retire(old, reclaim::boxed::<Table<K, V>>);
            retired.retire(guard);
        }

        tracing::debug!(old_capacity, new_capacity, dropped, "resized segment");

        dropped
    }

    /// Remove the entries of every key that was reported dead.
    fn drain(&self, writer: &mut Writer, guard: &impl Guard) {
        if self.queue.is_empty() {
            return;
        }

        let mut expunged = 0;

        for notice in self.queue.take() {
            let table = self.locked_table(writer);
            let mut node = table.bucket(notice.hash).load(Ordering::Acquire);

            while !node.is_null() {
                // Safety: We hold the lock, every node in the chain is valid.
                let current = unsafe { &*node };

                // Only dead nodes are expunged.
                if current.is(notice.key) && current.is_dead() {
                    expunged += self.unlink(writer, notice.hash, node, guard);
                    break;
                }

                node = current.next;
            }
        }

        if expunged > 0 {
            self.set_count(self.count.load(Ordering::Relaxed) - expunged);
            tracing::trace!(expunged, "drained reclaimed keys");
        }
    }

    /// Drain pending reclamation notices.
    pub fn purge(&self, guard: &impl Guard) {
        let mut writer = self.lock();
        self.drain(&mut writer, guard);
    }

    /// Remove every entry.
    pub fn clear(&self, guard: &impl Guard) {
        if self.count() == 0 {
            return;
        }

        let mut writer = self.lock();
        let table = self.locked_table(&mut writer);

        let mut retired = Retired::new();

        for bucket in table.buckets() {
            let mut node = bucket.swap(ptr::null_mut(), Ordering::AcqRel);

            while !node.is_null() {
                retired.entries.push(node);

                // Safety: We hold the lock, every node in the chain is valid.
                node = unsafe { (*node).next };
            }
        }

        // Every pending notice refers to an entry that is now gone.
        drop(self.queue.take());

        self.set_count(0);

        // Safety: Every bucket was emptied.
        unsafe { retired.retire(guard) };
    }
}

impl<K, V> Drop for Segment<K, V> {
    fn drop(&mut self) {
        // Safety: We have unique access to the segment, and the map reclaimed
        // all retired objects first, so the current table owns its chains.
        unsafe { drop_table(*self.table.get_mut()) };
    }
}

/// Find the first live node in the hash's chain whose key satisfies `eq`.
fn find<K, V>(
    table: &Table<K, V>,
    hash: u64,
    eq: &impl Fn(&K) -> bool,
) -> Option<(*mut Node<K, V>, Key<K>)> {
    let mut node = table.bucket(hash).load(Ordering::Acquire);

    while !node.is_null() {
        // Safety: Only called while holding the lock, every node in the chain is valid.
        let current = unsafe { &*node };

        if current.hash == hash {
            if let Some(key) = current.upgrade().filter(|key| eq(key.get())) {
                return Some((node, key));
            }
        }

        node = current.next;
    }

    None
}

/// The resize threshold for a bucket array of the given length.
#[inline]
fn threshold(capacity: usize, load_factor: f32) -> usize {
    (capacity as f32 * load_factor) as usize
}
