//! Per-key async mutexes serializing mutations of one user or one session.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A map of lazily created async mutexes.
///
/// `lock(key)` serializes all critical sections sharing that key while
/// leaving other keys untouched. Guards are owned, so they can be held
/// across awaits.
#[derive(Debug, Default)]
pub struct KeyedLock<K: Eq + Hash> {
	slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
	pub fn new() -> Self {
		KeyedLock { slots: Mutex::new(HashMap::new()) }
	}

	pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
		let slot = {
			let mut slots = self.slots.lock();
			slots.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
		};
		slot.lock_owned().await
	}

	/// Drops slots nobody is waiting on. Called by the periodic sweeps so
	/// the map stays bounded by the working set.
	pub fn prune(&self) {
		self.slots.lock().retain(|_, slot| Arc::strong_count(slot) > 1);
	}
}


// vim: ts=4
