//! Nonce serialization for a single chain account.
//!
//! Swaps from one account must carry strictly increasing nonces. The node's
//! pending transaction count lags behind submissions that are still in the
//! mempool, so the manager caches the last nonce it handed out and uses
//! `max(on_chain, cached)`. The cache only advances once a submission has
//! been accepted.

use tokio::sync::{Mutex, MutexGuard};

/// Owns the cached nonce of one account.
#[derive(Debug, Default)]
pub struct NonceManager {
	next: Mutex<Option<u64>>,
}

/// Exclusive right to submit the next transaction of an account.
///
/// Dropping the lease without calling `commit` leaves the cache untouched,
/// so a failed submission does not burn a nonce.
pub struct NonceLease<'a> {
	next: MutexGuard<'a, Option<u64>>,
}

impl NonceManager {
	pub fn new() -> Self {
		Self::default()
	}

	/// Waits for exclusive access to the account.
	pub async fn lease(&self) -> NonceLease<'_> {
		NonceLease {
			next: self.next.lock().await,
		}
	}
}

impl NonceLease<'_> {
	/// Nonce to use given the account's current on-chain transaction count.
	pub fn nonce(&self, on_chain: u64) -> u64 {
		self.next.map_or(on_chain, |cached| cached.max(on_chain))
	}

	/// Records that `used` was accepted by the chain.
	pub fn commit(mut self, used: u64) {
		*self.next = Some(used + 1);
	}
}
