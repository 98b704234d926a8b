//! Registry for managing chain adapters.
//!
//! The `ChainRegistry` holds the adapter of every configured blockchain. It is
//! filled once at startup and shared read-only afterwards; the adapters
//! themselves are `Arc`ed so strategies can keep a handle to theirs.

use crate::{ChainError, ChainInterface};
use liquidity_types::Blockchain;
use std::{collections::HashMap, sync::Arc};
use tracing::info;

#[derive(Default)]
pub struct ChainRegistry {
	adapters: HashMap<Blockchain, Arc<dyn ChainInterface>>,
}

impl ChainRegistry {
	/// Creates a new empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a chain adapter.
	///
	/// # Errors
	///
	/// Returns an error if an adapter for the same blockchain is already registered.
	pub fn register(&mut self, adapter: Arc<dyn ChainInterface>) -> Result<(), ChainError> {
		let blockchain = adapter.blockchain();
		info!(%blockchain, "Registering chain adapter");

		if self.adapters.contains_key(&blockchain) {
			return Err(ChainError::Configuration(format!(
				"Chain {} already registered",
				blockchain
			)));
		}

		self.adapters.insert(blockchain, adapter);
		Ok(())
	}

	pub fn get(&self, blockchain: Blockchain) -> Option<Arc<dyn ChainInterface>> {
		self.adapters.get(&blockchain).cloned()
	}

	/// Retrieves the adapter of a blockchain, returning an error if not found.
	pub fn get_required(&self, blockchain: Blockchain) -> Result<Arc<dyn ChainInterface>, ChainError> {
		self.get(blockchain).ok_or_else(|| {
			ChainError::Configuration(format!("Chain {} not configured", blockchain))
		})
	}

	/// Registered blockchains in stable order.
	pub fn blockchains(&self) -> Vec<Blockchain> {
		let mut chains: Vec<Blockchain> = self.adapters.keys().copied().collect();
		chains.sort();
		chains
	}
}
