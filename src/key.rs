use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::raw::utils::Stack;

/// A strong handle to a key of a [`WeakHashMap`](crate::WeakHashMap).
///
/// The map itself only holds weak references to its keys. An entry stays
/// visible for as long as at least one `Key` handle to its key is alive, and
/// is reclaimed once the last handle is dropped (or [released](Key::release)).
///
/// Cloning a `Key` is cheap and produces another handle to the same key.
/// Equality and hashing are delegated to the wrapped value.
///
/// # Examples
///
/// ```
/// use weakseg::{Key, WeakHashMap};
///
/// let map = WeakHashMap::new();
/// let key = Key::new("listener");
///
/// map.pin().insert(&key, 1);
/// assert_eq!(map.pin().get("listener"), Some(&1));
///
/// drop(key);
/// assert_eq!(map.pin().get("listener"), None);
/// ```
pub struct Key<K>(Arc<KeyCell<K>>);

/// The shared allocation behind a [`Key`].
pub struct KeyCell<K> {
    key: K,

    /// Segments that hold an entry for this key and want to hear about its death.
    watchers: Mutex<Vec<Watcher>>,
}

/// A registration of a key with a segment's reclamation queue.
struct Watcher {
    queue: Weak<ReclaimQueue>,
    hash: u64,
    // The address of the shared allocation, taken while it is still in place.
    key: usize,
}

/// A report that a key has become unreachable.
///
/// `key` is the address of the dead key cell. It is only compared against
/// the weak handles still stored in the segment, never dereferenced.
#[derive(Clone, Copy, Debug)]
pub struct Notice {
    pub hash: u64,
    pub key: usize,
}

/// The per-segment channel through which dead keys report themselves.
pub type ReclaimQueue = Stack<Notice>;

impl<K> Key<K> {
    /// Wraps `key` in a new strong handle.
    pub fn new(key: K) -> Key<K> {
        Key(Arc::new(KeyCell {
            key,
            watchers: Mutex::new(Vec::new()),
        }))
    }

    /// Returns a reference to the wrapped key.
    #[inline]
    pub fn get(&self) -> &K {
        &self.0.key
    }

    /// Releases this handle.
    ///
    /// This is equivalent to dropping the handle. Returns `true` if it was the
    /// last strong handle, in which case every map holding the key has been
    /// notified and the key itself has been dropped.
    pub fn release(self) -> bool {
        Arc::into_inner(self.0).is_some()
    }

    /// Returns the number of strong handles to this key.
    pub fn strong_count(this: &Key<K>) -> usize {
        Arc::strong_count(&this.0)
    }

    /// Returns `true` if both handles refer to the same key allocation.
    pub fn ptr_eq(this: &Key<K>, other: &Key<K>) -> bool {
        Arc::ptr_eq(&this.0, &other.0)
    }

    /// Creates the weak handle stored by map entries.
    pub(crate) fn downgrade(&self) -> Weak<KeyCell<K>> {
        Arc::downgrade(&self.0)
    }

    /// Upgrades a weak handle stored by an entry.
    #[inline]
    pub(crate) fn upgrade(weak: &Weak<KeyCell<K>>) -> Option<Key<K>> {
        weak.upgrade().map(Key)
    }

    /// Asks for a notice on `queue` once this key becomes unreachable.
    ///
    /// Registrations are deduplicated per queue and hash, and registrations
    /// for queues that no longer exist are pruned.
    pub(crate) fn watch(&self, queue: &Arc<ReclaimQueue>, hash: u64) {
        let mut watchers = self.0.watchers.lock();

        watchers.retain(|watcher| watcher.queue.strong_count() > 0);

        let registered = watchers
            .iter()
            .any(|watcher| watcher.hash == hash && watcher.queue.as_ptr() == Arc::as_ptr(queue));

        if !registered {
            watchers.push(Watcher {
                queue: Arc::downgrade(queue),
                hash,
                key: identity(Arc::as_ptr(&self.0)),
            });
        }
    }
}

/// Returns the identity used to match notices against entries.
#[inline]
pub(crate) fn identity<K>(cell: *const KeyCell<K>) -> usize {
    cell.cast::<()>() as usize
}

impl<K> Drop for KeyCell<K> {
    fn drop(&mut self) {
        // `self` may have been moved out of its allocation by `Key::release`,
        // so the identity recorded at registration is reported.
        for watcher in self.watchers.get_mut().drain(..) {
            // The map owning the queue may already be gone.
            if let Some(queue) = watcher.queue.upgrade() {
                queue.push(Notice {
                    hash: watcher.hash,
                    key: watcher.key,
                });
            }
        }
    }
}

impl<K> Clone for Key<K> {
    fn clone(&self) -> Self {
        Key(self.0.clone())
    }
}

impl<K> Deref for Key<K> {
    type Target = K;

    #[inline]
    fn deref(&self) -> &K {
        &self.0.key
    }
}

impl<K> AsRef<K> for Key<K> {
    fn as_ref(&self) -> &K {
        &self.0.key
    }
}

impl<K> Borrow<K> for Key<K> {
    fn borrow(&self) -> &K {
        &self.0.key
    }
}

impl<K: PartialEq> PartialEq for Key<K> {
    fn eq(&self, other: &Self) -> bool {
        self.0.key == other.0.key
    }
}

impl<K: Eq> Eq for Key<K> {}

impl<K: Hash> Hash for Key<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.key.hash(state)
    }
}

impl<K: fmt::Debug> fmt::Debug for Key<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.key.fmt(f)
    }
}

impl<K> From<K> for Key<K> {
    fn from(key: K) -> Self {
        Key::new(key)
    }
}
