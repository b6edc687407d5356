//! Shared environment store.
//!
//! The only state shared between loops. Array flags are keyed by owner (loop
//! id); scalar keys carry an optional value. Read-then-write evaluations run
//! inside [`EnvironmentStore::transact`] so no other writer interleaves.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use parking_lot::Mutex;

/// Per-owner boolean flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    /// Set by a loop's own safety monitor.
    InternalOvertemp,
    /// Set by components outside the CPU loops.
    ExternalOvertemp,
}

/// Single-valued keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKey {
    /// Present while some processor runs without calibration data.
    SystemUncalibrated,
}

impl fmt::Display for ArrayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InternalOvertemp => f.write_str("internal-overtemp"),
            Self::ExternalOvertemp => f.write_str("external-overtemp"),
        }
    }
}

/// Environment contents. Also the snapshot type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    arrays: HashMap<ArrayKey, BTreeMap<u32, bool>>,
    scalars: HashMap<ScalarKey, u32>,
}

impl Environment {
    pub fn get(&self, key: ScalarKey) -> Option<u32> {
        self.scalars.get(&key).copied()
    }

    pub fn set(&mut self, key: ScalarKey, value: u32) {
        self.scalars.insert(key, value);
    }

    pub fn clear(&mut self, key: ScalarKey) -> Option<u32> {
        self.scalars.remove(&key)
    }

    /// Set one owner's flag. Returns true when the value changed.
    pub fn set_array_flag(&mut self, key: ArrayKey, owner: u32, value: bool) -> bool {
        let flags = self.arrays.entry(key).or_default();
        let previous = flags.insert(owner, value).unwrap_or(false);
        previous != value
    }

    /// True when any owner holds the flag.
    pub fn array_flag_anywhere(&self, key: ArrayKey) -> bool {
        self.arrays
            .get(&key)
            .is_some_and(|flags| flags.values().any(|&v| v))
    }

    pub fn array_flag_for_owner(&self, key: ArrayKey, owner: u32) -> bool {
        self.arrays
            .get(&key)
            .and_then(|flags| flags.get(&owner).copied())
            .unwrap_or(false)
    }
}

/// Synchronized environment shared by every loop of a group.
#[derive(Debug, Default)]
pub struct EnvironmentStore {
    inner: Mutex<Environment>,
}

impl EnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: ScalarKey) -> Option<u32> {
        self.inner.lock().get(key)
    }

    pub fn set(&self, key: ScalarKey, value: u32) {
        self.inner.lock().set(key, value);
    }

    pub fn clear(&self, key: ScalarKey) -> Option<u32> {
        self.inner.lock().clear(key)
    }

    pub fn set_array_flag(&self, key: ArrayKey, owner: u32, value: bool) -> bool {
        self.inner.lock().set_array_flag(key, owner, value)
    }

    pub fn array_flag_anywhere(&self, key: ArrayKey) -> bool {
        self.inner.lock().array_flag_anywhere(key)
    }

    pub fn array_flag_for_owner(&self, key: ArrayKey, owner: u32) -> bool {
        self.inner.lock().array_flag_for_owner(key, owner)
    }

    /// Consistent copy of the whole environment.
    pub fn snapshot(&self) -> Environment {
        self.inner.lock().clone()
    }

    /// Run `f` with exclusive access to the environment.
    pub fn transact<R>(&self, f: impl FnOnce(&mut Environment) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}
