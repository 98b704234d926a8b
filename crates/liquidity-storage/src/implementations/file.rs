//! File-based storage backend.
//!
//! Each namespace is a directory under the base path and each record a JSON
//! file inside it. Writes go to a temporary file first and are renamed into
//! place so a crash never leaves a truncated record behind.
//!
//! Key parts made only of `[A-Za-z0-9._-]` (and not starting with a dot) are
//! used as file names verbatim. Any other part is written as `~` followed by
//! the hex encoding of its bytes, so distinct keys never share a file.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use liquidity_types::{ConfigSchema, Field, FieldType, Schema, ValidationError};
use std::path::PathBuf;
use tokio::fs;

/// File-based storage implementation.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
}

impl FileStorage {
	/// Creates a new FileStorage instance with the specified base path.
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	fn encode(part: &str) -> String {
		let verbatim = !part.is_empty()
			&& !part.starts_with('.')
			&& part
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
		if verbatim {
			part.to_string()
		} else {
			format!("~{}", hex::encode(part))
		}
	}

	/// Maps `namespace:id` to `<base>/<namespace>/<id>.json`.
	fn get_file_path(&self, key: &str) -> PathBuf {
		match key.split_once(':') {
			Some((namespace, id)) => self
				.base_path
				.join(Self::encode(namespace))
				.join(format!("{}.json", Self::encode(id))),
			None => self.base_path.join(format!("{}.json", Self::encode(key))),
		}
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![Field::new("storage_path", FieldType::String)]).validate(config)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key);

		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn scan(&self, namespace: &str) -> Result<Vec<Vec<u8>>, StorageError> {
		let dir = self.base_path.join(Self::encode(namespace));
		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut values = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
				continue;
			}
			let data = fs::read(&path)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
			values.push(data);
		}

		Ok(values)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/storage")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");
	tracing::debug!(storage_path, "Using file storage");

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}
