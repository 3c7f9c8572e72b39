use crate::key::Key;
use crate::raw::{self, Insert};
use seize::{Collector, Guard, LocalGuard, OwnedGuard};

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::error::Error;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

/// A concurrent hash map with weakly held keys.
///
/// Keys are inserted through [`Key`] handles, and the map only keeps a weak
/// reference to them. Once every handle to a key is dropped, its entry
/// disappears from lookups and iteration, and is physically removed by the next
/// write to its segment (or by [`purge`](WeakHashMap::purge)).
///
/// The map is split into independently locked segments. Reads never block,
/// while writes only contend with writes to the same segment.
///
/// Most operations require a [`Guard`](crate::Guard), which can be acquired through
/// [`WeakHashMap::guard`] or using the [`WeakHashMap::pin`] API. See the [crate-level
/// documentation](crate#usage) for details.
///
/// # Examples
///
/// ```
/// use weakseg::{Key, WeakHashMap};
///
/// let map = WeakHashMap::new();
/// let (a, b) = (Key::new("a"), Key::new("b"));
///
/// let m = map.pin();
/// m.insert(&a, 1);
/// m.insert(&b, 2);
/// assert_eq!(m.get("a"), Some(&1));
///
/// drop(b);
/// assert_eq!(m.get("b"), None);
/// ```
pub struct WeakHashMap<K, V, S = RandomState> {
    raw: raw::HashMap<K, V, S>,
}

// Safety: Keys are shared with any thread holding a handle, and values are
// shared by reference and dropped by whichever thread reclaims them.
unsafe impl<K, V, S> Send for WeakHashMap<K, V, S>
where
    K: Send + Sync,
    V: Send + Sync,
    S: Send,
{
}

unsafe impl<K, V, S> Sync for WeakHashMap<K, V, S>
where
    K: Send + Sync,
    V: Send + Sync,
    S: Sync,
{
}

/// An error returned by [`WeakHashMap::builder`] for an invalid configuration.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum BuildError {
    /// The load factor was zero, negative, or not finite.
    #[error("load factor must be positive and finite, got {0}")]
    InvalidLoadFactor(f32),

    /// The concurrency level was zero.
    #[error("concurrency level must be at least 1")]
    InvalidConcurrencyLevel,
}

/// A builder for a [`WeakHashMap`].
///
/// # Examples
///
/// ```rust
/// use weakseg::WeakHashMap;
/// use seize::Collector;
/// use std::collections::hash_map::RandomState;
///
/// let map: WeakHashMap<i32, i32> = WeakHashMap::builder()
///     // Set the initial capacity.
///     .capacity(2048)
///     // Set the load factor of each segment.
///     .load_factor(0.5)
///     // Set the number of concurrent writers to plan for.
///     .concurrency_level(32)
///     // Set the hasher.
///     .hasher(RandomState::new())
///     // Set a custom garbage collector.
///     .collector(Collector::new().batch_size(128))
///     // Construct the hash map.
///     .build()
///     .unwrap();
/// ```
pub struct WeakHashMapBuilder<K, V, S = RandomState> {
    hasher: S,
    capacity: usize,
    load_factor: f32,
    concurrency_level: usize,
    collector: Collector,
    _kv: PhantomData<(K, V)>,
}

impl<K, V> WeakHashMapBuilder<K, V> {
    /// Set the hash builder used to hash keys.
    ///
    /// Warning: `hash_builder` is normally randomly generated, and is designed
    /// to allow maps to be resistant to attacks that cause many collisions
    /// and very poor performance. Setting it manually using this function can
    /// expose a DoS attack vector.
    pub fn hasher<S>(self, hasher: S) -> WeakHashMapBuilder<K, V, S> {
        WeakHashMapBuilder {
            hasher,
            capacity: self.capacity,
            load_factor: self.load_factor,
            concurrency_level: self.concurrency_level,
            collector: self.collector,
            _kv: PhantomData,
        }
    }
}

impl<K, V, S> WeakHashMapBuilder<K, V, S> {
    /// Set the initial capacity of the map.
    ///
    /// The capacity is split evenly across segments, each of which holds at
    /// least one bucket.
    pub fn capacity(self, capacity: usize) -> Self {
        WeakHashMapBuilder { capacity, ..self }
    }

    /// Set the load factor of each segment.
    ///
    /// A segment doubles its bucket array once it holds more than
    /// `load_factor` entries per bucket. Must be positive and finite.
    pub fn load_factor(self, load_factor: f32) -> Self {
        WeakHashMapBuilder {
            load_factor,
            ..self
        }
    }

    /// Set the estimated number of concurrently writing threads.
    ///
    /// This is rounded up to a power of two and determines the number of
    /// segments, up to a maximum of 65536. Must be at least 1.
    pub fn concurrency_level(self, concurrency_level: usize) -> Self {
        WeakHashMapBuilder {
            concurrency_level,
            ..self
        }
    }

    /// Set the [`seize::Collector`] used for garbage collection.
    ///
    /// Note that all `Guard` references used to access the map must be produced by
    /// the provided `collector`.
    pub fn collector(self, collector: Collector) -> Self {
        WeakHashMapBuilder { collector, ..self }
    }

    /// Construct a [`WeakHashMap`] from the builder, using the configured options.
    pub fn build(self) -> Result<WeakHashMap<K, V, S>, BuildError> {
        if !(self.load_factor.is_finite() && self.load_factor > 0.0) {
            return Err(BuildError::InvalidLoadFactor(self.load_factor));
        }

        if self.concurrency_level == 0 {
            return Err(BuildError::InvalidConcurrencyLevel);
        }

        Ok(WeakHashMap {
            raw: raw::HashMap::new(
                self.capacity,
                self.load_factor,
                self.concurrency_level,
                self.hasher,
                self.collector,
            ),
        })
    }
}

impl<K, V, S> fmt::Debug for WeakHashMapBuilder<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHashMapBuilder")
            .field("capacity", &self.capacity)
            .field("load_factor", &self.load_factor)
            .field("concurrency_level", &self.concurrency_level)
            .field("collector", &self.collector)
            .finish()
    }
}

impl<K, V> WeakHashMap<K, V> {
    /// Creates an empty `WeakHashMap`.
    ///
    /// The map is created with a capacity of 16, a load factor of 0.75, and
    /// 16 segments.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::WeakHashMap;
    /// let map: WeakHashMap<&str, i32> = WeakHashMap::new();
    /// ```
    pub fn new() -> WeakHashMap<K, V> {
        WeakHashMap::with_capacity_and_hasher(raw::DEFAULT_CAPACITY, RandomState::new())
    }

    /// Creates an empty `WeakHashMap` with the specified capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::WeakHashMap;
    /// let map: WeakHashMap<&str, i32> = WeakHashMap::with_capacity(10);
    /// ```
    pub fn with_capacity(capacity: usize) -> WeakHashMap<K, V> {
        WeakHashMap::with_capacity_and_hasher(capacity, RandomState::new())
    }

    /// Returns a builder for a `WeakHashMap`.
    ///
    /// The builder can be used for more complex configuration, such as the
    /// load factor, the number of segments, or a custom [`Collector`].
    pub fn builder() -> WeakHashMapBuilder<K, V> {
        WeakHashMapBuilder {
            capacity: raw::DEFAULT_CAPACITY,
            load_factor: raw::DEFAULT_LOAD_FACTOR,
            concurrency_level: raw::DEFAULT_CONCURRENCY_LEVEL,
            hasher: RandomState::default(),
            collector: Collector::new(),
            _kv: PhantomData,
        }
    }
}

impl<K, V, S> Default for WeakHashMap<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        WeakHashMap::with_hasher(S::default())
    }
}

impl<K, V, S> WeakHashMap<K, V, S> {
    /// Creates an empty `WeakHashMap` which will use the given hash builder to hash
    /// keys.
    ///
    /// Warning: `hash_builder` is normally randomly generated, and is designed
    /// to allow maps to be resistant to attacks that cause many collisions
    /// and very poor performance. Setting it manually using this function can
    /// expose a DoS attack vector.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    /// use std::hash::RandomState;
    ///
    /// let s = RandomState::new();
    /// let map = WeakHashMap::with_hasher(s);
    /// let key = Key::new(1);
    /// map.pin().insert(&key, 2);
    /// ```
    pub fn with_hasher(hash_builder: S) -> WeakHashMap<K, V, S> {
        WeakHashMap::with_capacity_and_hasher(raw::DEFAULT_CAPACITY, hash_builder)
    }

    /// Creates an empty `WeakHashMap` with at least the specified capacity, using
    /// `hash_builder` to hash the keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    /// use std::hash::RandomState;
    ///
    /// let s = RandomState::new();
    /// let map = WeakHashMap::with_capacity_and_hasher(10, s);
    /// let key = Key::new(1);
    /// map.pin().insert(&key, 2);
    /// ```
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> WeakHashMap<K, V, S> {
        WeakHashMap {
            raw: raw::HashMap::new(
                capacity,
                raw::DEFAULT_LOAD_FACTOR,
                raw::DEFAULT_CONCURRENCY_LEVEL,
                hash_builder,
                Collector::new(),
            ),
        }
    }

    /// Returns a pinned reference to the map.
    ///
    /// The returned reference manages a guard internally, preventing garbage collection
    /// for as long as it is held. See the [crate-level documentation](crate#usage) for details.
    #[inline]
    pub fn pin(&self) -> WeakHashMapRef<'_, K, V, S, LocalGuard<'_>> {
        WeakHashMapRef {
            guard: self.guard(),
            map: self,
        }
    }

    /// Returns a pinned reference to the map.
    ///
    /// Unlike [`WeakHashMap::pin`], the returned reference implements `Send` and `Sync`,
    /// allowing it to be held across `.await` points in work-stealing schedulers.
    /// This is especially useful for iterators.
    #[inline]
    pub fn pin_owned(&self) -> WeakHashMapRef<'_, K, V, S, OwnedGuard<'_>> {
        WeakHashMapRef {
            guard: self.owned_guard(),
            map: self,
        }
    }

    /// Returns a guard for use with this map.
    ///
    /// Note that holding on to a guard prevents garbage collection.
    /// See the [crate-level documentation](crate#usage) for details.
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.raw.collector().enter()
    }

    /// Returns an owned guard for use with this map.
    ///
    /// Owned guards implement `Send` and `Sync`, allowing them to be held across
    /// `.await` points in work-stealing schedulers.
    #[inline]
    pub fn owned_guard(&self) -> OwnedGuard<'_> {
        self.raw.collector().enter_owned()
    }

    /// Returns the number of entries in the map.
    ///
    /// Entries of dropped keys are counted until their segment next drains its
    /// reclamation queue, which happens on every write to the segment or on
    /// [`purge`](WeakHashMap::purge).
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// let (a, b) = (Key::new(1), Key::new(2));
    ///
    /// map.pin().insert(&a, "a");
    /// map.pin().insert(&b, "b");
    /// assert!(map.len() == 2);
    ///
    /// drop(a);
    /// map.pin().purge();
    /// assert!(map.len() == 1);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the map is empty. Otherwise returns `false`.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// assert!(map.is_empty());
    ///
    /// let key = Key::new("a");
    /// map.pin().insert(&key, ());
    /// assert!(!map.is_empty());
    /// ```
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Returns the total number of buckets across all segments.
    #[inline]
    pub fn capacity(&self, guard: &impl Guard) -> usize {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        unsafe { self.raw.capacity(guard) }
    }

    /// Returns `true` if the map holds `value` for any live key.
    ///
    /// This may lock every segment if the map is being modified concurrently.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// let key = Key::new(1);
    /// map.pin().insert(&key, "a");
    /// assert!(map.pin().contains_value(&"a"));
    /// assert!(!map.pin().contains_value(&"b"));
    /// ```
    #[inline]
    pub fn contains_value(&self, value: &V, guard: &impl Guard) -> bool
    where
        V: PartialEq,
    {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        unsafe { self.raw.contains_value(value, guard) }
    }

    /// Clears the map, removing all key-value pairs.
    ///
    /// Segments are cleared one at a time, so concurrent inserts into already
    /// cleared segments may be retained.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// let key = Key::new(1);
    ///
    /// map.pin().insert(&key, "a");
    /// map.pin().clear();
    /// assert!(map.pin().is_empty());
    /// ```
    #[inline]
    pub fn clear(&self, guard: &impl Guard) {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        unsafe { self.raw.clear(guard) }
    }

    /// Removes the entries of keys that have been dropped.
    ///
    /// Dropped keys are never visible through lookups or iteration, but their
    /// entries are only physically removed by the next write to their segment.
    /// This method removes them eagerly, locking every segment in turn.
    #[inline]
    pub fn purge(&self, guard: &impl Guard) {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        unsafe { self.raw.purge(guard) }
    }

    /// An iterator visiting all live key-value pairs in arbitrary order.
    ///
    /// The iterator is weakly consistent: it never fails because of concurrent
    /// modification, and reflects some of the changes made after its creation.
    /// Every yielded key is a strong handle, so it stays alive for as long as
    /// the caller holds it.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let keys = [Key::new("a"), Key::new("b"), Key::new("c")];
    /// let map = WeakHashMap::new();
    /// for (i, key) in keys.iter().enumerate() {
    ///     map.pin().insert(key, i);
    /// }
    ///
    /// for (key, val) in map.pin().iter() {
    ///     println!("key: {key:?} val: {val}");
    /// }
    /// ```
    #[inline]
    pub fn iter<'g, G>(&'g self, guard: &'g G) -> Iter<'g, K, V, G>
    where
        G: Guard,
    {
        self.raw.verify(guard);

        Iter {
            // Safety: Verified the guard above.
            raw: unsafe { self.raw.iter(guard) },
        }
    }

    /// An iterator visiting all live keys in arbitrary order.
    #[inline]
    pub fn keys<'g, G>(&'g self, guard: &'g G) -> Keys<'g, K, V, G>
    where
        G: Guard,
    {
        Keys {
            iter: self.iter(guard),
        }
    }

    /// An iterator visiting the values of all live keys in arbitrary order.
    #[inline]
    pub fn values<'g, G>(&'g self, guard: &'g G) -> Values<'g, K, V, G>
    where
        G: Guard,
    {
        Values {
            iter: self.iter(guard),
        }
    }
}

impl<K, V, S> WeakHashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Returns `true` if the map contains a live entry for the specified key.
    ///
    /// The key may be any borrowed form of the map's key type, but
    /// [`Hash`] and [`Eq`] on the borrowed form *must* match those for
    /// the key type.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// let key = Key::new(1);
    /// map.pin().insert(&key, "a");
    /// assert_eq!(map.pin().contains_key(&1), true);
    /// assert_eq!(map.pin().contains_key(&2), false);
    /// ```
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q, guard: &impl Guard) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key, guard).is_some()
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// Returns `None` if the key was never inserted, was removed, or every
    /// handle to it has been dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// let key = Key::new(1);
    /// map.pin().insert(&key, "a");
    /// assert_eq!(map.pin().get(&1), Some(&"a"));
    /// assert_eq!(map.pin().get(&2), None);
    /// ```
    #[inline]
    pub fn get<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        unsafe { self.raw.get(key, guard) }.map(|(_, value)| value)
    }

    /// Returns a handle to the stored key and a reference to its value.
    ///
    /// The stored key is the one that created the entry, which may be a
    /// different allocation than an equal key later used to update it.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// let key = Key::new(1);
    /// map.pin().insert(&key, "a");
    ///
    /// let (stored, value) = map.pin().get_key_value(&1).map(|(k, v)| (k, *v)).unwrap();
    /// assert!(Key::ptr_eq(&stored, &key));
    /// assert_eq!(value, "a");
    /// ```
    #[inline]
    pub fn get_key_value<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<(Key<K>, &'g V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        unsafe { self.raw.get(key, guard) }
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the map did not have this key present, [`None`] is returned.
    ///
    /// If the map did have this key present, the value is updated, and the old
    /// value is returned. The key is not updated: the entry keeps tracking the
    /// handle that created it.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// let key = Key::new(37);
    /// assert_eq!(map.pin().insert(&key, "a"), None);
    /// assert_eq!(map.pin().is_empty(), false);
    ///
    /// map.pin().insert(&key, "b");
    /// assert_eq!(map.pin().insert(&key, "c"), Some(&"b"));
    /// assert_eq!(map.pin().get(&37), Some(&"c"));
    /// ```
    #[inline]
    pub fn insert<'g>(&self, key: &Key<K>, value: V, guard: &'g impl Guard) -> Option<&'g V> {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        match unsafe { self.raw.insert(key, value, true, guard) } {
            Insert::Inserted(_) => None,
            Insert::Replaced(value) => Some(value),
            Insert::Occupied { .. } => unreachable!(),
        }
    }

    /// Tries to insert a key-value pair into the map, and returns
    /// a reference to the value that was inserted.
    ///
    /// If the map already had a live entry for this key, nothing is updated, and
    /// an error containing the existing value is returned. Of several threads
    /// racing to insert equal keys, exactly one succeeds.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// let key = Key::new(37);
    /// let map = map.pin();
    ///
    /// assert_eq!(map.try_insert(&key, "a").unwrap(), &"a");
    ///
    /// let err = map.try_insert(&key, "b").unwrap_err();
    /// assert_eq!(err.current, &"a");
    /// assert_eq!(err.not_inserted, "b");
    /// ```
    #[inline]
    pub fn try_insert<'g>(
        &self,
        key: &Key<K>,
        value: V,
        guard: &'g impl Guard,
    ) -> Result<&'g V, OccupiedError<'g, V>> {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        match unsafe { self.raw.insert(key, value, false, guard) } {
            Insert::Inserted(value) => Ok(value),
            Insert::Occupied {
                current,
                not_inserted,
            } => Err(OccupiedError {
                current,
                not_inserted,
            }),
            Insert::Replaced(_) => unreachable!(),
        }
    }

    /// Returns a reference to the value corresponding to the key, or inserts
    /// the value computed by `f`.
    ///
    /// `f` runs while holding the lock of the key's segment, so it is called at
    /// most once per absent key even when many threads race on it. It should
    /// be short and must not access the map.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// let key = Key::new("abc");
    ///
    /// assert_eq!(map.pin().compute_if_absent(&key, |k| k.len()), &3);
    /// assert_eq!(map.pin().compute_if_absent(&key, |_| 0), &3);
    /// ```
    #[inline]
    pub fn compute_if_absent<'g, F>(&self, key: &Key<K>, f: F, guard: &'g impl Guard) -> &'g V
    where
        F: FnOnce(&K) -> V,
    {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        unsafe { self.raw.compute_if_absent(key, f, guard) }
    }

    /// Removes a key from the map, returning the value at the key if the key
    /// was previously in the map.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// let key = Key::new(1);
    /// map.pin().insert(&key, "a");
    /// assert_eq!(map.pin().remove(&1), Some(&"a"));
    /// assert_eq!(map.pin().remove(&1), None);
    /// ```
    #[inline]
    pub fn remove<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        unsafe { self.raw.remove(key, |_| true, guard) }
    }

    /// Removes a key from the map only if it currently maps to `value`.
    ///
    /// Returns `true` if the entry was removed.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// let key = Key::new(1);
    /// map.pin().insert(&key, "a");
    /// assert!(!map.pin().remove_if(&1, &"b"));
    /// assert!(map.pin().remove_if(&1, &"a"));
    /// ```
    #[inline]
    pub fn remove_if<Q>(&self, key: &Q, value: &V, guard: &impl Guard) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        unsafe { self.raw.remove(key, |current| current == value, guard) }.is_some()
    }

    /// Replaces the value of a key only if it is present, returning the
    /// previous value.
    ///
    /// # Examples
    ///
    /// ```
    /// use weakseg::{Key, WeakHashMap};
    ///
    /// let map = WeakHashMap::new();
    /// assert_eq!(map.pin().replace(&1, "a"), None);
    ///
    /// let key = Key::new(1);
    /// map.pin().insert(&key, "a");
    /// assert_eq!(map.pin().replace(&1, "b"), Some(&"a"));
    /// assert_eq!(map.pin().get(&1), Some(&"b"));
    /// ```
    #[inline]
    pub fn replace<'g, Q>(&self, key: &Q, value: V, guard: &'g impl Guard) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        unsafe { self.raw.replace(key, |_| true, value, guard) }
    }

    /// Replaces the value of a key only if it currently maps to `current`.
    ///
    /// Returns `true` if the value was replaced.
    #[inline]
    pub fn replace_if<Q>(&self, key: &Q, current: &V, value: V, guard: &impl Guard) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        self.raw.verify(guard);

        // Safety: Verified the guard above.
        unsafe { self.raw.replace(key, |found| found == current, value, guard) }.is_some()
    }
}

impl<K, V, S> PartialEq for WeakHashMap<K, V, S>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        let (guard1, guard2) = (&self.guard(), &other.guard());

        // Lengths may include dropped keys, so compare both directions instead.
        self.iter(guard1)
            .all(|(key, value)| other.get(key.get(), guard2) == Some(value))
            && other
                .iter(guard2)
                .all(|(key, _)| self.contains_key(key.get(), guard1))
    }
}

impl<K, V, S> Eq for WeakHashMap<K, V, S>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
{
}

impl<K, V, S> fmt::Debug for WeakHashMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.guard();
        f.debug_map().entries(self.iter(&guard)).finish()
    }
}

impl<'a, K, V, S> Extend<(&'a Key<K>, V)> for &WeakHashMap<K, V, S>
where
    K: Hash + Eq + 'a,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = (&'a Key<K>, V)>>(&mut self, iter: T) {
        let guard = self.guard();

        for (key, value) in iter {
            self.insert(key, value, &guard);
        }
    }
}

/// A pinned reference to a [`WeakHashMap`].
///
/// This type is created with [`WeakHashMap::pin`] and can be used to easily access a
/// [`WeakHashMap`] without explicitly managing a guard. See the [crate-level
/// documentation](crate#usage) for details.
pub struct WeakHashMapRef<'map, K, V, S, G> {
    guard: G,
    map: &'map WeakHashMap<K, V, S>,
}

impl<'map, K, V, S, G> WeakHashMapRef<'map, K, V, S, G>
where
    G: Guard,
{
    /// Returns a reference to the inner [`WeakHashMap`].
    #[inline]
    pub fn map(&self) -> &'map WeakHashMap<K, V, S> {
        self.map
    }

    /// Returns the number of entries in the map.
    ///
    /// See [`WeakHashMap::len`] for details.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the map is empty. Otherwise returns `false`.
    ///
    /// See [`WeakHashMap::is_empty`] for details.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the total number of buckets.
    ///
    /// See [`WeakHashMap::capacity`] for details.
    #[inline]
    pub fn capacity(&self) -> usize {
        // Safety: `self.guard` was created from our map.
        unsafe { self.map.raw.capacity(&self.guard) }
    }

    /// Returns `true` if the map holds `value` for any live key.
    ///
    /// See [`WeakHashMap::contains_value`] for details.
    #[inline]
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        // Safety: `self.guard` was created from our map.
        unsafe { self.map.raw.contains_value(value, &self.guard) }
    }

    /// Clears the map, removing all key-value pairs.
    ///
    /// See [`WeakHashMap::clear`] for details.
    #[inline]
    pub fn clear(&self) {
        // Safety: `self.guard` was created from our map.
        unsafe { self.map.raw.clear(&self.guard) }
    }

    /// Removes the entries of keys that have been dropped.
    ///
    /// See [`WeakHashMap::purge`] for details.
    #[inline]
    pub fn purge(&self) {
        // Safety: `self.guard` was created from our map.
        unsafe { self.map.raw.purge(&self.guard) }
    }

    /// An iterator visiting all live key-value pairs in arbitrary order.
    ///
    /// See [`WeakHashMap::iter`] for details.
    #[inline]
    pub fn iter(&self) -> Iter<'_, K, V, G> {
        Iter {
            // Safety: `self.guard` was created from our map.
            raw: unsafe { self.map.raw.iter(&self.guard) },
        }
    }

    /// An iterator visiting all live keys in arbitrary order.
    ///
    /// See [`WeakHashMap::keys`] for details.
    #[inline]
    pub fn keys(&self) -> Keys<'_, K, V, G> {
        Keys { iter: self.iter() }
    }

    /// An iterator visiting the values of all live keys in arbitrary order.
    ///
    /// See [`WeakHashMap::values`] for details.
    #[inline]
    pub fn values(&self) -> Values<'_, K, V, G> {
        Values { iter: self.iter() }
    }
}

impl<'map, K, V, S, G> WeakHashMapRef<'map, K, V, S, G>
where
    K: Hash + Eq,
    S: BuildHasher,
    G: Guard,
{
    /// Returns `true` if the map contains a live entry for the specified key.
    ///
    /// See [`WeakHashMap::contains_key`] for details.
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// See [`WeakHashMap::get`] for details.
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        // Safety: `self.guard` was created from our map.
        match unsafe { self.map.raw.get(key, &self.guard) } {
            Some((_, value)) => Some(value),
            None => None,
        }
    }

    /// Returns a handle to the stored key and a reference to its value.
    ///
    /// See [`WeakHashMap::get_key_value`] for details.
    #[inline]
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(Key<K>, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        // Safety: `self.guard` was created from our map.
        unsafe { self.map.raw.get(key, &self.guard) }
    }

    /// Inserts a key-value pair into the map.
    ///
    /// See [`WeakHashMap::insert`] for details.
    #[inline]
    pub fn insert(&self, key: &Key<K>, value: V) -> Option<&V> {
        // Safety: `self.guard` was created from our map.
        match unsafe { self.map.raw.insert(key, value, true, &self.guard) } {
            Insert::Inserted(_) => None,
            Insert::Replaced(value) => Some(value),
            Insert::Occupied { .. } => unreachable!(),
        }
    }

    /// Tries to insert a key-value pair into the map, and returns
    /// a reference to the value that was inserted.
    ///
    /// See [`WeakHashMap::try_insert`] for details.
    #[inline]
    pub fn try_insert(&self, key: &Key<K>, value: V) -> Result<&V, OccupiedError<'_, V>> {
        // Safety: `self.guard` was created from our map.
        match unsafe { self.map.raw.insert(key, value, false, &self.guard) } {
            Insert::Inserted(value) => Ok(value),
            Insert::Occupied {
                current,
                not_inserted,
            } => Err(OccupiedError {
                current,
                not_inserted,
            }),
            Insert::Replaced(_) => unreachable!(),
        }
    }

    /// Returns a reference to the value corresponding to the key, or inserts
    /// the value computed by `f`.
    ///
    /// See [`WeakHashMap::compute_if_absent`] for details.
    #[inline]
    pub fn compute_if_absent<F>(&self, key: &Key<K>, f: F) -> &V
    where
        F: FnOnce(&K) -> V,
    {
        // Safety: `self.guard` was created from our map.
        unsafe { self.map.raw.compute_if_absent(key, f, &self.guard) }
    }

    /// Removes a key from the map, returning the value at the key if the key
    /// was previously in the map.
    ///
    /// See [`WeakHashMap::remove`] for details.
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        // Safety: `self.guard` was created from our map.
        unsafe { self.map.raw.remove(key, |_| true, &self.guard) }
    }

    /// Removes a key from the map only if it currently maps to `value`.
    ///
    /// See [`WeakHashMap::remove_if`] for details.
    #[inline]
    pub fn remove_if<Q>(&self, key: &Q, value: &V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        // Safety: `self.guard` was created from our map.
        unsafe { self.map.raw.remove(key, |current| current == value, &self.guard) }.is_some()
    }

    /// Replaces the value of a key only if it is present.
    ///
    /// See [`WeakHashMap::replace`] for details.
    #[inline]
    pub fn replace<Q>(&self, key: &Q, value: V) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        // Safety: `self.guard` was created from our map.
        unsafe { self.map.raw.replace(key, |_| true, value, &self.guard) }
    }

    /// Replaces the value of a key only if it currently maps to `current`.
    ///
    /// See [`WeakHashMap::replace_if`] for details.
    #[inline]
    pub fn replace_if<Q>(&self, key: &Q, current: &V, value: V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        // Safety: `self.guard` was created from our map.
        unsafe {
            self.map
                .raw
                .replace(key, |found| found == current, value, &self.guard)
        }
        .is_some()
    }
}

impl<K, V, S, G> fmt::Debug for WeakHashMapRef<'_, K, V, S, G>
where
    K: fmt::Debug,
    V: fmt::Debug,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K, V, S, G> IntoIterator for &'a WeakHashMapRef<'_, K, V, S, G>
where
    G: Guard,
{
    type Item = (Key<K>, &'a V);
    type IntoIter = Iter<'a, K, V, G>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over a map's live entries.
///
/// This struct is created by the [`iter`](WeakHashMap::iter) method on [`WeakHashMap`].
/// See its documentation for details.
///
/// Entries are yielded by reference. To update or remove the current entry,
/// call [`replace`](WeakHashMap::replace) or [`remove`](WeakHashMap::remove)
/// with the yielded key, neither invalidates the iterator.
pub struct Iter<'g, K, V, G> {
    raw: raw::Iter<'g, K, V, G>,
}

impl<'g, K: 'g, V: 'g, G> Iterator for Iter<'g, K, V, G>
where
    G: Guard,
{
    type Item = (Key<K>, &'g V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.raw.next()
    }
}

impl<K, V, G> fmt::Debug for Iter<'_, K, V, G>
where
    K: fmt::Debug,
    V: fmt::Debug,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(Iter {
                raw: self.raw.clone(),
            })
            .finish()
    }
}

// Safety: An iterator holds a shared reference to the map and guard, and
// yields shared references to values along with new key handles.
unsafe impl<K, V, G> Send for Iter<'_, K, V, G>
where
    K: Send + Sync,
    V: Sync,
    G: Sync,
{
}

unsafe impl<K, V, G> Sync for Iter<'_, K, V, G>
where
    K: Send + Sync,
    V: Sync,
    G: Sync,
{
}

/// An iterator over a map's live keys.
///
/// This struct is created by the [`keys`](WeakHashMap::keys) method on [`WeakHashMap`].
/// See its documentation for details.
pub struct Keys<'g, K, V, G> {
    iter: Iter<'g, K, V, G>,
}

impl<'g, K: 'g, V: 'g, G> Iterator for Keys<'g, K, V, G>
where
    G: Guard,
{
    type Item = Key<K>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let (key, _) = self.iter.next()?;
        Some(key)
    }
}

impl<K, V, G> fmt::Debug for Keys<'_, K, V, G>
where
    K: fmt::Debug,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(Keys {
                iter: Iter {
                    raw: self.iter.raw.clone(),
                },
            })
            .finish()
    }
}

/// An iterator over the values of a map's live keys.
///
/// This struct is created by the [`values`](WeakHashMap::values) method on [`WeakHashMap`].
/// See its documentation for details.
pub struct Values<'g, K, V, G> {
    iter: Iter<'g, K, V, G>,
}

impl<'g, K: 'g, V: 'g, G> Iterator for Values<'g, K, V, G>
where
    G: Guard,
{
    type Item = &'g V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let (_, value) = self.iter.next()?;
        Some(value)
    }
}

impl<K, V, G> fmt::Debug for Values<'_, K, V, G>
where
    V: fmt::Debug,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(Values {
                iter: Iter {
                    raw: self.iter.raw.clone(),
                },
            })
            .finish()
    }
}

/// An error returned by [`try_insert`](WeakHashMap::try_insert) when the key already exists.
///
/// Contains the existing value, and the value that was not inserted.
#[derive(Debug, PartialEq, Eq)]
pub struct OccupiedError<'a, V: 'a> {
    /// The value in the map that was already present.
    pub current: &'a V,
    /// The value which was not inserted, because the entry was already occupied.
    pub not_inserted: V,
}

impl<V: fmt::Debug> fmt::Display for OccupiedError<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to insert {:?}, key occupied with value {:?}",
            self.not_inserted, self.current
        )
    }
}

impl<V: fmt::Debug> Error for OccupiedError<'_, V> {}
