//! Batch repository.

use liquidity_storage::{StorageError, StorageService};
use liquidity_types::{BatchStatus, BuyCryptoBatch};
use std::sync::Arc;

const NAMESPACE: &str = "batches";

pub struct BatchRepository {
	storage: Arc<StorageService>,
}

impl BatchRepository {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	pub async fn save(&self, batch: &BuyCryptoBatch) -> Result<(), StorageError> {
		self.storage.store(NAMESPACE, &batch.id, batch).await
	}

	pub async fn get(&self, id: &str) -> Result<BuyCryptoBatch, StorageError> {
		self.storage.retrieve(NAMESPACE, id).await
	}

	/// Batches in `status`, oldest first.
	pub async fn find_by_status(
		&self,
		status: BatchStatus,
	) -> Result<Vec<BuyCryptoBatch>, StorageError> {
		let mut batches: Vec<BuyCryptoBatch> = self
			.storage
			.retrieve_all::<BuyCryptoBatch>(NAMESPACE)
			.await?
			.into_iter()
			.filter(|b| b.status == status)
			.collect();
		batches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
		Ok(batches)
	}
}
