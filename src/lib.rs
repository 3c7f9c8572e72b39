#![doc = include_str!("../README.md")]

mod key;
mod map;
mod raw;

#[cfg(feature = "serde")]
mod serde_impls;

pub use key::Key;
pub use map::{
    BuildError, Iter, Keys, OccupiedError, Values, WeakHashMap, WeakHashMapBuilder, WeakHashMapRef,
};
pub use seize::{Guard, LocalGuard, OwnedGuard};

#[cfg(feature = "serde")]
pub use serde_impls::Restored;
