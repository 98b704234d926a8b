//! Named process locks and operator process flags.

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Name of the batch liquidity securing process.
pub const SECURE_LIQUIDITY: &str = "secure_liquidity";

#[derive(Debug, Clone, Copy)]
struct LockEntry {
	generation: u64,
	acquired_at: Instant,
}

/// In-process named locks with an expiry.
///
/// A holder that outlives the timeout is presumed stuck and its lock can be
/// taken over. The stale guard's later drop leaves the new holder's lock in
/// place.
#[derive(Default)]
pub struct LockRegistry {
	locks: Arc<DashMap<String, LockEntry>>,
	generation: AtomicU64,
}

impl LockRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn try_acquire(&self, name: &str, timeout: Duration) -> Option<LockGuard> {
		let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
		let fresh = LockEntry {
			generation,
			acquired_at: Instant::now(),
		};

		match self.locks.entry(name.to_string()) {
			Entry::Occupied(mut held) => {
				let age = held.get().acquired_at.elapsed();
				if age < timeout {
					return None;
				}
				warn!(lock = name, age_secs = age.as_secs(), "Taking over expired process lock");
				held.insert(fresh);
			}
			Entry::Vacant(vacant) => {
				vacant.insert(fresh);
			}
		}

		Some(LockGuard {
			locks: self.locks.clone(),
			name: name.to_string(),
			generation,
		})
	}

	pub fn is_locked(&self, name: &str) -> bool {
		self.locks.contains_key(name)
	}
}

/// Held lock. Released on drop.
pub struct LockGuard {
	locks: Arc<DashMap<String, LockEntry>>,
	name: String,
	generation: u64,
}

impl Drop for LockGuard {
	fn drop(&mut self) {
		self.locks
			.remove_if(&self.name, |_, entry| entry.generation == self.generation);
	}
}

/// Operator switches for named processes. All processes start enabled
/// unless listed.
pub struct ProcessFlags {
	disabled: ArcSwap<HashSet<String>>,
}

impl ProcessFlags {
	pub fn new<I, S>(disabled: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			disabled: ArcSwap::from_pointee(
				disabled.into_iter().map(Into::into).collect::<HashSet<String>>(),
			),
		}
	}

	pub fn is_enabled(&self, process: &str) -> bool {
		!self.disabled.load().contains(process)
	}

	pub fn disable(&self, process: &str) {
		self.disabled.rcu(|current| {
			let mut next = HashSet::clone(current);
			next.insert(process.to_string());
			next
		});
	}

	pub fn enable(&self, process: &str) {
		self.disabled.rcu(|current| {
			let mut next = HashSet::clone(current);
			next.remove(process);
			next
		});
	}
}

impl Default for ProcessFlags {
	fn default() -> Self {
		Self::new(Vec::<String>::new())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_lock_is_exclusive_until_dropped() {
		let locks = LockRegistry::new();
		let guard = locks
			.try_acquire(SECURE_LIQUIDITY, Duration::from_secs(60))
			.unwrap();
		assert!(locks
			.try_acquire(SECURE_LIQUIDITY, Duration::from_secs(60))
			.is_none());
		assert!(locks.try_acquire("other", Duration::from_secs(60)).is_some());

		drop(guard);
		assert!(!locks.is_locked(SECURE_LIQUIDITY));
		assert!(locks
			.try_acquire(SECURE_LIQUIDITY, Duration::from_secs(60))
			.is_some());
	}

	#[test]
	fn test_expired_lock_is_taken_over() {
		let locks = LockRegistry::new();
		let stale = locks.try_acquire(SECURE_LIQUIDITY, Duration::ZERO).unwrap();
		let current = locks.try_acquire(SECURE_LIQUIDITY, Duration::ZERO).unwrap();

		// the stale holder must not release the new holder's lock
		drop(stale);
		assert!(locks.is_locked(SECURE_LIQUIDITY));
		drop(current);
		assert!(!locks.is_locked(SECURE_LIQUIDITY));
	}

	#[test]
	fn test_process_flags() {
		let flags = ProcessFlags::new(["reporting"]);
		assert!(flags.is_enabled(SECURE_LIQUIDITY));
		assert!(!flags.is_enabled("reporting"));

		flags.disable(SECURE_LIQUIDITY);
		assert!(!flags.is_enabled(SECURE_LIQUIDITY));
		flags.enable(SECURE_LIQUIDITY);
		assert!(flags.is_enabled(SECURE_LIQUIDITY));
	}
}
