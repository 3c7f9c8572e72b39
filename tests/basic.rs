mod common;

use common::keys;
use weakseg::{BuildError, Key, OccupiedError, WeakHashMap};

use std::hash::{BuildHasher, BuildHasherDefault, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn with_map<K, V>(test: impl Fn(WeakHashMap<K, V>)) {
    common::with_map(|map| test(map()));
}

#[test]
fn new() {
    with_map::<usize, usize>(|map| drop(map));
}

#[test]
fn clear() {
    with_map::<usize, usize>(|map| {
        let keys = keys(5);
        let guard = map.guard();
        {
            for key in &keys {
                map.insert(key, 1, &guard);
            }
        }
        map.clear(&guard);
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        for key in &keys {
            assert!(map.get(key.get(), &guard).is_none());
        }
    });
}

#[test]
fn insert() {
    with_map::<usize, usize>(|map| {
        let key = Key::new(42);
        let guard = map.guard();
        let old = map.insert(&key, 0, &guard);
        assert!(old.is_none());
    });
}

#[test]
fn get_empty() {
    with_map::<usize, usize>(|map| {
        let guard = map.guard();
        let e = map.get(&42, &guard);
        assert!(e.is_none());
    });
}

#[test]
fn get_key_value_empty() {
    with_map::<usize, usize>(|map| {
        let guard = map.guard();
        let e = map.get_key_value(&42, &guard);
        assert!(e.is_none());
    });
}

#[test]
fn remove_empty() {
    with_map::<usize, usize>(|map| {
        let guard = map.guard();
        let old = map.remove(&42, &guard);
        assert!(old.is_none());
    });
}

#[test]
fn insert_and_remove() {
    with_map::<usize, usize>(|map| {
        let key = Key::new(42);
        let guard = map.guard();
        map.insert(&key, 0, &guard);
        let old = map.remove(&42, &guard).unwrap();
        assert_eq!(old, &0);
        assert!(map.get(&42, &guard).is_none());
        assert_eq!(map.len(), 0);
    });
}

#[test]
fn insert_and_get() {
    with_map::<usize, usize>(|map| {
        let key = Key::new(42);
        map.insert(&key, 0, &map.guard());

        {
            let guard = map.guard();
            let e = map.get(&42, &guard).unwrap();
            assert_eq!(e, &0);
        }
    });
}

#[test]
fn insert_and_get_key_value() {
    with_map::<usize, usize>(|map| {
        let key = Key::new(42);
        map.insert(&key, 0, &map.guard());

        {
            let guard = map.guard();
            let (k, v) = map.get_key_value(&42, &guard).unwrap();
            assert!(Key::ptr_eq(&k, &key));
            assert_eq!((*k, v), (42, &0));
        }
    });
}

#[test]
fn reinsert() {
    with_map::<usize, usize>(|map| {
        let key = Key::new(42);
        let guard = map.guard();
        map.insert(&key, 0, &guard);
        let old = map.insert(&key, 1, &guard);
        assert_eq!(old, Some(&0));
        {
            let guard = map.guard();
            let e = map.get(&42, &guard).unwrap();
            assert_eq!(e, &1);
        }
        assert_eq!(map.len(), 1);
    });
}

#[test]
fn reinsert_with_equal_key() {
    with_map::<usize, usize>(|map| {
        let (first, second) = (Key::new(42), Key::new(42));
        let guard = map.guard();

        map.insert(&first, 0, &guard);
        assert_eq!(map.insert(&second, 1, &guard), Some(&0));

        // The entry keeps tracking the key that created it.
        let (stored, value) = map.get_key_value(&42, &guard).unwrap();
        assert!(Key::ptr_eq(&stored, &first));
        assert_eq!(value, &1);
        drop(stored);

        drop(first);
        assert_eq!(map.get(&42, &guard), None);
    });
}

#[test]
fn replace() {
    with_map::<usize, usize>(|map| {
        let key = Key::new(42);
        let guard = map.guard();
        map.insert(&key, 0, &guard);
        let old = map.replace(&42, 1, &guard);
        assert_eq!(old, Some(&0));
        assert_eq!(map.get(&42, &guard), Some(&1));
    });
}

#[test]
fn replace_empty() {
    with_map::<usize, usize>(|map| {
        let guard = map.guard();
        let old = map.replace(&42, 1, &guard);
        assert!(old.is_none());
        assert!(map.get(&42, &guard).is_none());
        assert!(map.is_empty());
    });
}

#[test]
fn replace_if() {
    with_map::<usize, usize>(|map| {
        let key = Key::new(42);
        let map = map.pin();
        map.insert(&key, 0);

        assert!(!map.replace_if(&42, &1, 2));
        assert_eq!(map.get(&42), Some(&0));

        assert!(map.replace_if(&42, &0, 2));
        assert_eq!(map.get(&42), Some(&2));

        assert!(!map.replace_if(&43, &0, 2));
    });
}

#[test]
fn remove_if() {
    with_map::<usize, usize>(|map| {
        let key = Key::new(42);
        let map = map.pin();
        map.insert(&key, 0);

        assert!(!map.remove_if(&42, &1));
        assert_eq!(map.get(&42), Some(&0));

        assert!(map.remove_if(&42, &0));
        assert_eq!(map.get(&42), None);
        assert!(!map.remove_if(&42, &0));
    });
}

#[test]
fn try_insert() {
    with_map::<usize, usize>(|map| {
        let key = Key::new(42);
        let guard = map.guard();

        assert_eq!(map.try_insert(&key, 1, &guard), Ok(&1));
        assert_eq!(
            map.try_insert(&key, 2, &guard),
            Err(OccupiedError {
                current: &1,
                not_inserted: 2
            })
        );
        assert_eq!(map.get(&42, &guard), Some(&1));

        // A dead entry does not occupy its key.
        drop(key);
        let key = Key::new(42);
        assert_eq!(map.try_insert(&key, 3, &guard), Ok(&3));
        assert_eq!(map.len(), 1);
    });
}

#[test]
fn occupied_error_display() {
    let error = OccupiedError {
        current: &1,
        not_inserted: 2,
    };

    assert_eq!(
        error.to_string(),
        "failed to insert 2, key occupied with value 1"
    );
}

#[test]
fn compute_if_absent() {
    with_map::<usize, usize>(|map| {
        let key = Key::new(7);
        let calls = AtomicUsize::new(0);
        let map = map.pin();

        let compute = |k: &usize| {
            calls.fetch_add(1, Ordering::Relaxed);
            k * 2
        };

        assert_eq!(map.compute_if_absent(&key, compute), &14);
        assert_eq!(map.compute_if_absent(&key, compute), &14);
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        map.remove(&7);
        assert_eq!(map.compute_if_absent(&key, compute), &14);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    });
}

#[test]
fn compute_if_absent_panic() {
    with_map::<usize, usize>(|map| {
        let key = Key::new(7);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            map.pin().compute_if_absent(&key, |_| panic!("compute failed"));
        }));
        assert!(result.is_err());

        // The segment stays usable.
        assert_eq!(map.pin().get(&7), None);
        assert_eq!(map.pin().compute_if_absent(&key, |_| 1), &1);
    });
}

#[test]
fn contains_value() {
    with_map::<usize, usize>(|map| {
        let keys = keys(16);
        let map = map.pin();

        for key in &keys {
            map.insert(key, **key * 10);
        }

        assert!(map.contains_value(&0));
        assert!(map.contains_value(&150));
        assert!(!map.contains_value(&5));

        map.remove(&15);
        assert!(!map.contains_value(&150));
    });
}

#[test]
fn concurrent_insert() {
    with_map::<usize, usize>(|map| {
        let keys = keys(64);

        thread::scope(|s| {
            s.spawn(|| {
                for key in &keys {
                    map.insert(key, 0, &map.guard());
                }
            });

            s.spawn(|| {
                for key in &keys {
                    map.insert(key, 1, &map.guard());
                }
            });
        });

        let guard = map.guard();
        for i in 0..64 {
            let v = map.get(&i, &guard).unwrap();
            assert!(v == &0 || v == &1);

            let (k, v) = map.get_key_value(&i, &guard).unwrap();
            assert!(Key::ptr_eq(&k, &keys[i]));
            assert!(v == &0 || v == &1);
        }

        assert_eq!(map.len(), 64);
    });
}

#[test]
fn concurrent_remove() {
    with_map::<usize, usize>(|map| {
        let keys = keys(64);

        {
            let guard = map.guard();
            for key in &keys {
                map.insert(key, **key, &guard);
            }
        }

        let removed = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    let guard = map.guard();
                    for i in 0..64 {
                        if let Some(v) = map.remove(&i, &guard) {
                            assert_eq!(v, &i);
                            removed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        // after joining the threads, the map should be empty
        assert_eq!(removed.load(Ordering::Relaxed), 64);
        let guard = map.guard();
        for i in 0..64 {
            assert!(map.get(&i, &guard).is_none());
        }
        assert!(map.is_empty());
    });
}

#[test]
fn concurrent_replace() {
    with_map::<usize, usize>(|map| {
        let keys = keys(64);

        {
            let guard = map.guard();
            for key in &keys {
                map.insert(key, **key, &guard);
            }
        }

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    let guard = map.guard();
                    for i in 0..64 {
                        loop {
                            let current = *map.get(&i, &guard).unwrap();
                            if map.replace_if(&i, &current, current + 1, &guard) {
                                assert!(current == i || current == i + 1);
                                break;
                            }
                        }
                    }
                });
            }
        });

        let guard = map.guard();
        for i in 0..64 {
            assert_eq!(map.get(&i, &guard), Some(&(i + 2)));
        }
    });
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_resize_and_get() {
    with_map::<usize, usize>(|map| {
        let keys = keys(1 << 13);

        {
            let guard = map.guard();
            for key in &keys[..1024] {
                map.insert(key, **key, &guard);
            }
        }

        thread::scope(|s| {
            // t1 is inserting to trigger a bunch of resizes
            s.spawn(|| {
                let guard = map.guard();
                for key in &keys[1024..] {
                    map.insert(key, **key, &guard);
                }
            });

            // t2 is retrieving existing keys a lot, attempting to race with a resize
            s.spawn(|| {
                let guard = map.guard();
                for _ in 0..32 {
                    for i in 0..1024 {
                        let v = map.get(&i, &guard).unwrap();
                        assert_eq!(v, &i);
                    }
                }
            });
        });

        // make sure all the entries still exist after all the resizes
        {
            let guard = map.guard();

            for i in 0..keys.len() {
                let v = map.get(&i, &guard).unwrap();
                assert_eq!(v, &i);
            }
        }

        assert_eq!(map.len(), keys.len());
    });
}

#[test]
fn current_kv_dropped() {
    let dropped = Arc::new(0);

    with_map::<usize, Arc<usize>>(|map| {
        let key = Key::new(0);
        map.insert(&key, dropped.clone(), &map.guard());
        map.insert(&key, dropped.clone(), &map.guard());

        // The map never holds a key strongly.
        assert_eq!(Key::strong_count(&key), 1);

        drop(map);

        // dropping the map should immediately drop (not deferred) all values
        assert_eq!(Arc::strong_count(&dropped), 1);
    });
}

#[test]
fn empty_maps_equal() {
    with_map::<usize, usize>(|map1| {
        with_map::<usize, usize>(|map2| {
            assert_eq!(map1, map2);
            assert_eq!(map2, map1);
        });
    });
}

#[test]
fn different_size_maps_not_equal() {
    with_map::<usize, usize>(|map1| {
        with_map::<usize, usize>(|map2| {
            let keys = keys(3);
            {
                let guard1 = map1.guard();
                let guard2 = map2.guard();

                map1.insert(&keys[1], 0, &guard1);
                map1.insert(&keys[2], 0, &guard1);

                map2.insert(&keys[1], 0, &guard2);
                map2.insert(&keys[2], 0, &guard2);
                map2.insert(&keys[0], 0, &guard2);
            }

            assert_ne!(map1, map2);
            assert_ne!(map2, map1);
        });
    });
}

#[test]
fn same_values_equal() {
    with_map::<usize, usize>(|map1| {
        with_map::<usize, usize>(|map2| {
            let key = Key::new(1);
            {
                map1.pin().insert(&key, 0);
                map2.pin().insert(&key, 0);
            }

            assert_eq!(map1, map2);
            assert_eq!(map2, map1);
        });
    });
}

#[test]
fn different_values_not_equal() {
    with_map::<usize, usize>(|map1| {
        with_map::<usize, usize>(|map2| {
            let key = Key::new(1);
            {
                map1.pin().insert(&key, 0);
                map2.pin().insert(&key, 1);
            }

            assert_ne!(map1, map2);
            assert_ne!(map2, map1);
        });
    });
}

#[test]
fn dead_entries_ignored_by_eq() {
    with_map::<usize, usize>(|map1| {
        with_map::<usize, usize>(|map2| {
            let keys = keys(2);
            map1.pin().insert(&keys[0], 0);
            map2.pin().insert(&keys[0], 0);

            let dead = Key::new(5);
            map1.pin().insert(&dead, 5);
            drop(dead);

            assert_eq!(map1, map2);
            assert_eq!(map2, map1);
        });
    });
}

#[test]
fn default() {
    let map: WeakHashMap<usize, usize> = WeakHashMap::default();
    let key = Key::new(42);

    let guard = map.guard();
    map.insert(&key, 0, &guard);

    assert_eq!(map.get(&42, &guard), Some(&0));
}

#[test]
fn debug() {
    with_map::<usize, usize>(|map| {
        let key = Key::new(42);
        let guard = map.guard();
        map.insert(&key, 0, &guard);

        assert_eq!(format!("{:?}", map), "{42: 0}");
        assert_eq!(format!("{:?}", map.pin()), "{42: 0}");
        assert_eq!(format!("{:?}", map.keys(&guard)), "[42]");
        assert_eq!(format!("{:?}", map.values(&guard)), "[0]");
    });
}

#[test]
fn builder_debug() {
    let builder = WeakHashMap::<usize, usize>::builder()
        .capacity(32)
        .concurrency_level(2);

    let debug = format!("{builder:?}");
    assert!(debug.starts_with("WeakHashMapBuilder { capacity: 32, load_factor: 0.75, concurrency_level: 2"));
}

#[test]
fn extend() {
    with_map::<usize, usize>(|map| {
        let keys = keys(10);
        let mut entries: Vec<(&Key<usize>, usize)> = Vec::new();
        for key in &keys {
            entries.push((key, **key * 10));
        }

        (&map).extend(entries);

        let guard = map.guard();
        assert_eq!(map.len(), 10);
        for i in 0..10 {
            assert_eq!(map.get(&i, &guard), Some(&(i * 10)));
        }
    });
}

#[test]
fn len() {
    with_map::<usize, usize>(|map| {
        let len = if cfg!(miri) { 100 } else { 10_000 };
        let keys = keys(len);
        for key in &keys {
            map.pin().insert(key, **key + 1);
        }
        assert_eq!(map.len(), len);
        assert_eq!(map.pin().len(), len);
        assert!(!map.is_empty());
    });
}

#[test]
fn iter() {
    with_map::<usize, usize>(|map| {
        let len = if cfg!(miri) { 100 } else { 10_000 };
        let keys = keys(len);
        for key in &keys {
            assert_eq!(map.pin().insert(key, **key + 1), None);
        }

        let v: Vec<_> = (0..len).map(|i| (i, i + 1)).collect();
        let mut got: Vec<_> = map.pin().iter().map(|(k, &v)| (*k, v)).collect();
        got.sort();
        assert_eq!(v, got);
    });
}

#[test]
fn keys_and_values() {
    with_map::<usize, usize>(|map| {
        let keys = keys(100);
        for key in &keys {
            map.pin().insert(key, **key * 2);
        }

        let pinned = map.pin();

        let mut got: Vec<_> = pinned.keys().map(|k| *k).collect();
        got.sort();
        assert_eq!(got, (0..100).collect::<Vec<_>>());

        let mut got: Vec<_> = pinned.values().copied().collect();
        got.sort();
        assert_eq!(got, (0..100).map(|i| i * 2).collect::<Vec<_>>());

        let mut got: Vec<_> = (&pinned).into_iter().map(|(k, _)| *k).collect();
        got.sort();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
    });
}

#[test]
fn update_while_iterating() {
    with_map::<usize, usize>(|map| {
        let keys = keys(64);
        for key in &keys {
            map.pin().insert(key, **key);
        }

        let pinned = map.pin();
        for (key, value) in pinned.iter() {
            assert_eq!(*key, *value);

            if *key % 2 == 0 {
                assert_eq!(pinned.remove(&*key), Some(value));
            } else {
                assert_eq!(pinned.replace(&*key, *key + 100), Some(value));
            }
        }

        assert_eq!(pinned.len(), 32);
        for i in 0..64 {
            let expected = (i % 2 == 1).then_some(i + 100);
            assert_eq!(pinned.get(&i).copied(), expected);
        }
    });
}

#[test]
fn mixed() {
    const LEN: usize = if cfg!(miri) { 48 } else { 1024 };
    with_map::<usize, usize>(|map| {
        let keys = keys(LEN * 2);

        assert!(map.pin().get(&100).is_none());
        map.pin().insert(&keys[100], 101);
        assert_eq!(map.pin().get(&100), Some(&101));
        map.pin().replace(&100, 102);
        assert_eq!(map.pin().get(&100), Some(&102));

        assert!(map.pin().get(&200).is_none());
        map.pin().insert(&keys[200], 202);
        assert_eq!(map.pin().get(&200), Some(&202));

        assert!(map.pin().get(&300).is_none());

        assert_eq!(map.pin().remove(&100), Some(&102));
        assert_eq!(map.pin().remove(&200), Some(&202));
        assert!(map.pin().remove(&300).is_none());

        assert!(map.pin().get(&100).is_none());
        assert!(map.pin().get(&200).is_none());
        assert!(map.pin().get(&300).is_none());

        for key in &keys[..LEN] {
            assert_eq!(map.pin().insert(key, **key + 1), None);
        }

        for i in 0..LEN {
            assert_eq!(map.pin().get(&i), Some(&(i + 1)));
        }

        for i in 0..LEN {
            assert_eq!(map.pin().replace(&i, i + 2), Some(&(i + 1)));
        }

        for i in 0..LEN {
            assert_eq!(map.pin().get(&i), Some(&(i + 2)));
        }

        for i in 0..LEN {
            assert_eq!(map.pin().remove(&i), Some(&(i + 2)));
        }

        for i in 0..LEN {
            assert_eq!(map.pin().get(&i), None);
        }

        for key in &keys {
            assert_eq!(map.pin().insert(key, **key + 1), None);
        }

        for i in 0..(LEN * 2) {
            assert_eq!(map.pin().get(&i), Some(&(i + 1)));
        }
    });
}

#[test]
fn segment_scenario() {
    let map: WeakHashMap<String, String> = WeakHashMap::builder()
        .capacity(16)
        .load_factor(0.75)
        .concurrency_level(4)
        .build()
        .unwrap();

    let keys: Vec<_> = (1..=20).map(|i| Key::new(format!("K{i}"))).collect();

    {
        let map = map.pin();
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(map.insert(key, format!("V{}", i + 1)), None);
        }
    }

    assert_eq!(map.len(), 20);
    assert_eq!(map.pin().get("K5").map(String::as_str), Some("V5"));

    assert_eq!(map.pin().remove("K5").map(String::as_str), Some("V5"));
    assert_eq!(map.pin().get("K5"), None);
    assert_eq!(map.len(), 19);
}

#[test]
fn resize_preserves_entries() {
    let map: WeakHashMap<usize, usize> = WeakHashMap::builder()
        .capacity(1)
        .concurrency_level(1)
        .build()
        .unwrap();

    let len = if cfg!(miri) { 100 } else { 10_000 };
    let keys = keys(len);
    let guard = map.guard();

    assert_eq!(map.capacity(&guard), 1);

    for key in &keys {
        map.insert(key, **key, &guard);
    }

    assert!(map.capacity(&guard) as f32 * 0.75 >= len as f32);
    assert!(map.capacity(&guard).is_power_of_two());

    for i in 0..len {
        assert_eq!(map.get(&i, &guard), Some(&i));
    }
    assert_eq!(map.len(), len);
}

#[test]
fn capacity() {
    let map: WeakHashMap<usize, usize> = WeakHashMap::builder()
        .capacity(64)
        .concurrency_level(4)
        .build()
        .unwrap();
    assert_eq!(map.pin().capacity(), 64);

    // Every segment holds at least one bucket.
    let map: WeakHashMap<usize, usize> = WeakHashMap::builder()
        .capacity(0)
        .concurrency_level(3)
        .build()
        .unwrap();
    assert_eq!(map.pin().capacity(), 4);

    let map: WeakHashMap<usize, usize> = WeakHashMap::with_capacity(1000);
    assert_eq!(map.pin().capacity(), 16 * 64);
}

#[test]
fn builder_errors() {
    for load_factor in [0.0, -1.0, f32::INFINITY] {
        let result = WeakHashMap::<usize, usize>::builder()
            .load_factor(load_factor)
            .build();
        assert_eq!(result.err(), Some(BuildError::InvalidLoadFactor(load_factor)));
    }

    let result = WeakHashMap::<usize, usize>::builder()
        .load_factor(f32::NAN)
        .build();
    assert!(matches!(result, Err(BuildError::InvalidLoadFactor(lf)) if lf.is_nan()));

    let result = WeakHashMap::<usize, usize>::builder()
        .concurrency_level(0)
        .build();
    assert_eq!(result.err(), Some(BuildError::InvalidConcurrencyLevel));

    assert_eq!(
        BuildError::InvalidConcurrencyLevel.to_string(),
        "concurrency level must be at least 1"
    );
    assert_eq!(
        BuildError::InvalidLoadFactor(0.0).to_string(),
        "load factor must be positive and finite, got 0"
    );
}

#[test]
fn large_concurrency_level() {
    let map: WeakHashMap<usize, usize> = WeakHashMap::builder()
        .capacity(1)
        .concurrency_level(usize::MAX)
        .build()
        .unwrap();

    let keys = keys(100);
    for key in &keys {
        map.pin().insert(key, **key);
    }

    assert_eq!(map.len(), 100);
    assert_eq!(map.pin().iter().count(), 100);
}

#[test]
#[should_panic(expected = "Attempted to access map with incorrect guard")]
fn foreign_guard() {
    let map: WeakHashMap<usize, usize> = WeakHashMap::new();
    let other: WeakHashMap<usize, usize> = WeakHashMap::new();
    map.get(&1, &other.guard());
}

// run tests with hashers that place every key in the same segment and bucket
mod hasher {
    use super::*;

    fn check<S: BuildHasher + Default>() {
        let range = if cfg!(miri) { 0..16 } else { 0..100 };

        for concurrency_level in [1, 4, 16] {
            let map: WeakHashMap<i32, i32, S> = WeakHashMap::builder()
                .hasher(S::default())
                .concurrency_level(concurrency_level)
                .build()
                .unwrap();

            let keys: Vec<_> = range.clone().map(Key::new).collect();
            let guard = map.guard();
            for key in &keys {
                map.insert(key, **key, &guard);
            }

            assert!(!map.contains_key(&i32::MIN, &guard));
            assert!(!map.contains_key(&(range.start - 1), &guard));
            for i in range.clone() {
                assert!(map.contains_key(&i, &guard));
            }
            assert!(!map.contains_key(&range.end, &guard));
            assert!(!map.contains_key(&i32::MAX, &guard));

            // Remove from the middle of the shared chain.
            for i in range.clone().step_by(3) {
                assert_eq!(map.remove(&i, &guard), Some(&i));
            }
            for i in range.clone() {
                assert_eq!(map.contains_key(&i, &guard), i % 3 != 0);
            }
        }
    }

    #[test]
    fn test_zero_hasher() {
        #[derive(Default)]
        pub struct ZeroHasher;

        impl Hasher for ZeroHasher {
            fn finish(&self) -> u64 {
                0
            }

            fn write(&mut self, _: &[u8]) {}
        }

        check::<BuildHasherDefault<ZeroHasher>>();
    }

    #[test]
    fn test_max_hasher() {
        #[derive(Default)]
        struct MaxHasher;

        impl Hasher for MaxHasher {
            fn finish(&self) -> u64 {
                u64::MAX
            }

            fn write(&mut self, _: &[u8]) {}
        }

        check::<BuildHasherDefault<MaxHasher>>();
    }
}
