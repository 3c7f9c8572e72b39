#![allow(dead_code)]

use weakseg::{Key, WeakHashMap};

// Run the test on different configurations of a `WeakHashMap`.
pub fn with_map<K, V>(mut test: impl FnMut(&dyn Fn() -> WeakHashMap<K, V>)) {
    // A single segment, so every writer contends on the same lock.
    if !cfg!(weakseg_stress) {
        test(&(|| WeakHashMap::builder().concurrency_level(1).build().unwrap()));
    }

    // Small segments that start with a single bucket and resize often.
    test(
        &(|| {
            WeakHashMap::builder()
                .capacity(1)
                .concurrency_level(4)
                .build()
                .unwrap()
        }),
    );

    // The default configuration.
    test(&(|| WeakHashMap::new()));
}

// Returns strong handles to the keys `0..n`.
pub fn keys(n: usize) -> Vec<Key<usize>> {
    (0..n).map(Key::new).collect()
}

// Prints a log message if `RUST_LOG=debug` is set.
#[macro_export]
macro_rules! debug {
    ($($x:tt)*) => {
        if std::env::var("RUST_LOG").as_deref() == Ok("debug") {
            println!($($x)*);
        }
    };
}

// Returns the number of threads to use for stress testing.
pub fn threads() -> usize {
    if cfg!(miri) {
        2
    } else {
        num_cpus::get_physical().next_power_of_two()
    }
}
