//! Liquidity order ledger.
//!
//! The orders of one `(context, correlation_id)` pair are kept together in a
//! single `liquidity_orders` record, so every lookup the coordination service
//! makes reads exactly one pair. Completed orders that still hold liquidity
//! are mirrored into `liquidity_commitments`, which is the only namespace the
//! ledger ever scans.

use crate::error::DexError;
use liquidity_storage::{StorageError, StorageService};
use liquidity_types::{Asset, LiquidityOrder, LiquidityOrderContext};
use rust_decimal::Decimal;
use std::sync::Arc;

const ORDERS: &str = "liquidity_orders";
const COMMITMENTS: &str = "liquidity_commitments";

fn pair_id(context: LiquidityOrderContext, correlation_id: &str) -> String {
	format!("{}:{}", context, correlation_id)
}

pub struct LiquidityOrderLedger {
	storage: Arc<StorageService>,
}

impl LiquidityOrderLedger {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Inserts or replaces `order` in its pair's record. Callers serialize
	/// writes per pair.
	pub async fn save(&self, order: &LiquidityOrder) -> Result<(), StorageError> {
		let mut orders = self
			.find_by_correlation(order.context, &order.correlation_id)
			.await?;
		match orders.iter_mut().find(|o| o.id == order.id) {
			Some(existing) => *existing = order.clone(),
			None => orders.push(order.clone()),
		}
		self.storage
			.store(ORDERS, &pair_id(order.context, &order.correlation_id), &orders)
			.await?;

		if order.is_committed() {
			self.storage.store(COMMITMENTS, &order.id, order).await
		} else {
			self.storage.remove(COMMITMENTS, &order.id).await
		}
	}

	/// Orders of a `(context, correlation_id)` pair, oldest first.
	pub async fn find_by_correlation(
		&self,
		context: LiquidityOrderContext,
		correlation_id: &str,
	) -> Result<Vec<LiquidityOrder>, StorageError> {
		let mut orders: Vec<LiquidityOrder> = match self
			.storage
			.retrieve(ORDERS, &pair_id(context, correlation_id))
			.await
		{
			Ok(orders) => orders,
			Err(StorageError::NotFound) => Vec::new(),
			Err(e) => return Err(e),
		};
		orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
		Ok(orders)
	}

	/// The non-terminal order of a pair, if any.
	pub async fn find_active(
		&self,
		context: LiquidityOrderContext,
		correlation_id: &str,
	) -> Result<Option<LiquidityOrder>, StorageError> {
		Ok(self
			.find_by_correlation(context, correlation_id)
			.await?
			.into_iter()
			.rev()
			.find(|o| !o.is_terminal()))
	}

	/// The most recently updated order of a pair, i.e. its latest attempt.
	pub async fn find_latest(
		&self,
		context: LiquidityOrderContext,
		correlation_id: &str,
	) -> Result<Option<LiquidityOrder>, StorageError> {
		Ok(self
			.find_by_correlation(context, correlation_id)
			.await?
			.into_iter()
			.max_by(|a, b| a.updated_at.cmp(&b.updated_at)))
	}

	/// Total of `asset` held for other pairs by completed, unreleased orders.
	pub async fn committed_amount(
		&self,
		asset: &Asset,
		exclude: (LiquidityOrderContext, &str),
	) -> Result<Decimal, DexError> {
		let (context, correlation_id) = exclude;
		self.storage
			.retrieve_all::<LiquidityOrder>(COMMITMENTS)
			.await?
			.iter()
			.filter(|o| o.is_committed() && o.target_asset.is_same(asset))
			.filter(|o| !(o.context == context && o.correlation_id == correlation_id))
			.filter_map(|o| o.target_amount)
			.try_fold(Decimal::ZERO, |total, amount| total.checked_add(amount))
			.ok_or_else(|| {
				DexError::Execution(format!("committed {} liquidity overflows", asset.unique_name()))
			})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use liquidity_storage::implementations::memory::MemoryStorage;
	use liquidity_types::{Blockchain, LiquidityRequest};

	fn storage() -> Arc<StorageService> {
		Arc::new(StorageService::new(Box::new(MemoryStorage::new())))
	}

	fn request(correlation_id: &str) -> LiquidityRequest {
		LiquidityRequest {
			context: LiquidityOrderContext::BuyCrypto,
			correlation_id: correlation_id.to_string(),
			reference_asset: Asset::token("USDT", Blockchain::Ethereum),
			reference_amount: Decimal::from(100),
			target_asset: Asset::token("USDT", Blockchain::Ethereum),
			max_slippage: None,
		}
	}

	#[tokio::test]
	async fn test_active_and_latest() {
		let ledger = LiquidityOrderLedger::new(storage());
		let mut failed = LiquidityOrder::reservation(&request("1"));
		failed.fail("not enough").unwrap();
		ledger.save(&failed).await.unwrap();
		assert!(ledger
			.find_active(LiquidityOrderContext::BuyCrypto, "1")
			.await
			.unwrap()
			.is_none());

		let purchase = LiquidityOrder::purchase(&request("1"));
		ledger.save(&purchase).await.unwrap();

		let active = ledger
			.find_active(LiquidityOrderContext::BuyCrypto, "1")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(active.id, purchase.id);
		let latest = ledger
			.find_latest(LiquidityOrderContext::BuyCrypto, "1")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(latest.id, purchase.id);
		assert!(ledger
			.find_latest(LiquidityOrderContext::Trading, "1")
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn test_pairs_are_stored_apart() {
		let ledger = LiquidityOrderLedger::new(storage());
		let first = LiquidityOrder::reservation(&request("a"));
		let second = LiquidityOrder::reservation(&request("a:b"));
		ledger.save(&first).await.unwrap();
		ledger.save(&second).await.unwrap();

		let mut updated = first.clone();
		updated.fail("superseded").unwrap();
		ledger.save(&updated).await.unwrap();

		let orders = ledger
			.find_by_correlation(LiquidityOrderContext::BuyCrypto, "a")
			.await
			.unwrap();
		assert_eq!(orders.len(), 1);
		assert_eq!(orders[0], updated);
		assert_eq!(
			ledger
				.find_by_correlation(LiquidityOrderContext::BuyCrypto, "a:b")
				.await
				.unwrap(),
			vec![second]
		);
	}

	#[tokio::test]
	async fn test_committed_amount_excludes_own_and_released_orders() {
		let storage = storage();
		let ledger = LiquidityOrderLedger::new(storage.clone());
		let usdt = Asset::token("USDT", Blockchain::Ethereum);

		for (id, amount) in [("1", 30), ("2", 45)] {
			let mut order = LiquidityOrder::reservation(&request(id));
			order.reserved(Decimal::from(amount)).unwrap();
			ledger.save(&order).await.unwrap();
		}
		let mut released = LiquidityOrder::reservation(&request("3"));
		released.reserved(Decimal::from(500)).unwrap();
		ledger.save(&released).await.unwrap();
		released.release();
		ledger.save(&released).await.unwrap();

		let committed = ledger
			.committed_amount(&usdt, (LiquidityOrderContext::BuyCrypto, "2"))
			.await
			.unwrap();
		assert_eq!(committed, Decimal::from(30));

		// released orders leave the commitment index
		let index: Vec<LiquidityOrder> = storage.retrieve_all(COMMITMENTS).await.unwrap();
		assert_eq!(index.len(), 2);
	}
}
