use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::collections::hash_map::RandomState;
use std::fmt::{self, Formatter};
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

use crate::{Guard, Key, WeakHashMap, WeakHashMapRef};

/// A deserialized [`WeakHashMap`], along with the handles that keep its keys alive.
///
/// A map only holds its keys weakly, so deserializing one on its own would
/// produce a map whose entries are immediately unreachable. Dropping `keys`
/// (or some of them) releases the corresponding entries.
///
/// # Examples
///
/// ```
/// use weakseg::{Key, Restored, WeakHashMap};
///
/// let map = WeakHashMap::new();
/// let key = Key::new(String::from("a"));
/// map.pin().insert(&key, 1);
///
/// let json = serde_json::to_string(&map).unwrap();
/// let restored: Restored<String, i32> = serde_json::from_str(&json).unwrap();
///
/// assert_eq!(restored.keys.len(), 1);
/// assert_eq!(restored.map.pin().get("a"), Some(&1));
/// ```
pub struct Restored<K, V, S = RandomState> {
    /// Strong handles to every deserialized key.
    pub keys: Vec<Key<K>>,

    /// The deserialized map.
    pub map: WeakHashMap<K, V, S>,
}

impl<K, V, S> fmt::Debug for Restored<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Restored")
            .field("keys", &self.keys)
            .field("map", &self.map)
            .finish()
    }
}

impl<K: Serialize> Serialize for Key<K> {
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        self.get().serialize(serializer)
    }
}

impl<'de, K: Deserialize<'de>> Deserialize<'de> for Key<K> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        K::deserialize(deserializer).map(Key::new)
    }
}

impl<K, V, S, G> Serialize for WeakHashMapRef<'_, K, V, S, G>
where
    K: Serialize,
    V: Serialize,
    G: Guard,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        serializer.collect_map(self)
    }
}

impl<K, V, S> Serialize for WeakHashMap<K, V, S>
where
    K: Serialize,
    V: Serialize,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        self.pin().serialize(serializer)
    }
}

struct RestoredVisitor<K, V, S> {
    _marker: PhantomData<Restored<K, V, S>>,
}

impl<'de, K, V, S> Deserialize<'de> for Restored<K, V, S>
where
    K: Deserialize<'de> + Hash + Eq,
    V: Deserialize<'de>,
    S: Default + BuildHasher,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(RestoredVisitor::new())
    }
}

impl<K, V, S> RestoredVisitor<K, V, S> {
    pub(crate) fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<'de, K, V, S> Visitor<'de> for RestoredVisitor<K, V, S>
where
    K: Deserialize<'de> + Hash + Eq,
    V: Deserialize<'de>,
    S: Default + BuildHasher,
{
    type Value = Restored<K, V, S>;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a map")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let (map, mut keys) = match access.size_hint() {
            Some(size) => (
                WeakHashMap::with_capacity_and_hasher(size, S::default()),
                Vec::with_capacity(size),
            ),
            None => (WeakHashMap::default(), Vec::new()),
        };

        {
            let map = map.pin();
            while let Some((key, value)) = access.next_entry()? {
                let key = Key::new(key);
                map.insert(&key, value);
                keys.push(key);
            }
        }

        Ok(Restored { keys, map })
    }
}
