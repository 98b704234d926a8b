//! Storage module for the liquidity engine.
//!
//! This module provides abstractions for persistent storage of liquidity
//! orders and purchase batches, supporting file-based and in-memory backends.
//! Records live in namespaces; a namespace can be scanned to support the
//! find-by-status queries of the ledger and batch repositories.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs when the backend configuration is invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the low-level interface for storage backends.
///
/// Keys have the form `namespace:id`. Implementations must return every
/// live value of a namespace from `scan`.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes, replacing any previous value.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key. Deleting a missing
	/// key succeeds.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Returns the raw values stored under a namespace, in no particular order.
	async fn scan(&self, namespace: &str) -> Result<Vec<Vec<u8>>, StorageError>;
}

/// High-level storage service that provides typed operations.
///
/// Wraps a low-level backend and serializes values to JSON.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	/// Stores a serializable value.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&Self::key(namespace, id), bytes).await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Retrieves and deserializes every value of a namespace.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<T>, StorageError> {
		self.backend
			.scan(namespace)
			.await?
			.iter()
			.map(|bytes| {
				serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
			})
			.collect()
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}
}

/// Creates a storage backend by implementation name.
///
/// Supported implementations: `file`, `memory`.
pub fn create_storage(
	implementation: &str,
	config: &toml::Value,
) -> Result<Box<dyn StorageInterface>, StorageError> {
	match implementation {
		"file" => implementations::file::create_storage(config),
		"memory" => Ok(implementations::memory::create_storage(config)),
		other => Err(StorageError::Configuration(format!(
			"Unknown storage implementation: {}",
			other
		))),
	}
}
