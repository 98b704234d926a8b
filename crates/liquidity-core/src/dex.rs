//! Liquidity coordination service.
//!
//! Mediates between callers and strategies. Every operation on a
//! `(context, correlation_id)` pair runs under that pair's lock, which is what
//! keeps at most one non-terminal order per pair and makes repeated purchase
//! calls submit a single swap. Failed attempts that never reached the chain
//! are reopened on retry, so a pair that keeps failing does not grow the
//! ledger.

use crate::error::DexError;
use crate::ledger::LiquidityOrderLedger;
use crate::registry::StrategyRegistry;
use dashmap::DashMap;
use liquidity_strategy::{LiquidityStrategy, StrategyError};
use liquidity_types::{
	AssetAmount, CheckLiquidityRequest, LiquidityOrder, LiquidityOrderContext,
	LiquidityOrderState, LiquidityOrderType, LiquidityRequest, LiquidityTransactionResult,
	SellLiquidityRequest, SwapSubmission,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

type PairKey = (LiquidityOrderContext, String);

/// Held pair lock. Dropping it unlocks the pair and forgets its mutex once
/// nobody else is waiting on it.
struct PairGuard<'a> {
	locks: &'a DashMap<PairKey, Arc<Mutex<()>>>,
	key: PairKey,
	guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PairGuard<'_> {
	fn drop(&mut self) {
		self.guard.take();
		self.locks
			.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
	}
}

pub struct DexService {
	registry: Arc<StrategyRegistry>,
	ledger: Arc<LiquidityOrderLedger>,
	locks: DashMap<PairKey, Arc<Mutex<()>>>,
}

impl DexService {
	pub fn new(registry: Arc<StrategyRegistry>, ledger: Arc<LiquidityOrderLedger>) -> Self {
		Self {
			registry,
			ledger,
			locks: DashMap::new(),
		}
	}

	pub fn ledger(&self) -> &Arc<LiquidityOrderLedger> {
		&self.ledger
	}

	async fn lock_pair(&self, context: LiquidityOrderContext, correlation_id: &str) -> PairGuard<'_> {
		let key = (context, correlation_id.to_string());
		let lock = self.locks.entry(key.clone()).or_default().clone();
		PairGuard {
			locks: &self.locks,
			key,
			guard: Some(lock.lock_owned().await),
		}
	}

	/// Sets aside on-hand liquidity for the request and returns the reserved
	/// target amount. Chain state is never touched.
	///
	/// Returns zero without checking while a purchase for the pair is still in
	/// flight, so the caller falls through to the (no-op) purchase path.
	pub async fn reserve_liquidity(&self, request: &LiquidityRequest) -> Result<Decimal, DexError> {
		validate_amount(request.reference_amount, &request.correlation_id)?;
		let strategy = self.registry.resolve_for(&request.target_asset)?;

		let _pair = self.lock_pair(request.context, &request.correlation_id).await;

		let orders = self
			.ledger
			.find_by_correlation(request.context, &request.correlation_id)
			.await?;
		if let Some(committed) = orders.iter().rev().find(|o| o.is_committed()) {
			debug!(correlation_id = %request.correlation_id, order_id = %committed.id, "Liquidity already reserved");
			return Ok(committed.target_amount.unwrap_or(Decimal::ZERO));
		}

		let mut order = match orders.iter().rev().find(|o| !o.is_terminal()) {
			Some(order) if order.order_type == LiquidityOrderType::Reservation => order.clone(),
			Some(order) => {
				debug!(correlation_id = %request.correlation_id, order_id = %order.id, state = %order.state, "Liquidity order in flight, nothing to reserve");
				return Ok(Decimal::ZERO);
			}
			None => {
				let order = reopen_or(&orders, LiquidityOrder::reservation(request))?;
				self.ledger.save(&order).await?;
				order
			}
		};

		let committed = self
			.ledger
			.committed_amount(
				&request.target_asset,
				(request.context, &request.correlation_id),
			)
			.await?;
		let check = CheckLiquidityRequest::from_request(request, committed);
		let result = match strategy.check_liquidity(&check).await {
			Ok(result) => result,
			Err(e) => {
				self.fail_order(&mut order, &e.to_string()).await?;
				return Err(DexError::from_strategy(&request.correlation_id, e));
			}
		};

		if result.is_slippage_detected {
			let message = format!(
				"quote for {} {} into {} deviates from the oracle price",
				request.reference_amount, request.reference_asset.name, request.target_asset.name
			);
			self.fail_order(&mut order, &message).await?;
			return Err(DexError::PriceSlippage {
				correlation_id: request.correlation_id.clone(),
				message,
			});
		}

		if !result.is_enough_available_liquidity {
			self.fail_order(&mut order, "not enough available liquidity")
				.await?;
			return Err(DexError::NotEnoughLiquidity {
				correlation_id: request.correlation_id.clone(),
				asset: request.target_asset.unique_name(),
				available: result.available_amount,
				required: result.target_amount,
			});
		}

		order.reserved(result.target_amount)?;
		self.ledger.save(&order).await?;
		info!(
			correlation_id = %request.correlation_id,
			asset = %request.target_asset.unique_name(),
			amount = %result.target_amount,
			committed = %committed,
			"Reserved liquidity"
		);
		Ok(result.target_amount)
	}

	/// Submits a purchase swap for the request. A no-op while another order
	/// of the pair is in flight.
	pub async fn purchase_liquidity(&self, request: &LiquidityRequest) -> Result<(), DexError> {
		validate_amount(request.reference_amount, &request.correlation_id)?;
		let strategy = self.registry.resolve_for(&request.target_asset)?;

		let _pair = self.lock_pair(request.context, &request.correlation_id).await;

		let Some(orders) = self
			.take_over_pair(request.context, &request.correlation_id)
			.await?
		else {
			return Ok(());
		};

		let mut order = reopen_or(&orders, LiquidityOrder::purchase(request))?;
		self.ledger.save(&order).await?;

		let outcome = strategy.purchase_liquidity(&order).await;
		self.record_submission(&mut order, outcome).await
	}

	/// Submits a sale of `sell_asset` back into its strategy's swap asset.
	pub async fn sell_liquidity(&self, request: &SellLiquidityRequest) -> Result<(), DexError> {
		validate_amount(request.sell_amount, &request.correlation_id)?;
		let strategy = self.registry.resolve_for(&request.sell_asset)?;

		let _pair = self.lock_pair(request.context, &request.correlation_id).await;

		let Some(orders) = self
			.take_over_pair(request.context, &request.correlation_id)
			.await?
		else {
			return Ok(());
		};

		let mut order = reopen_or(&orders, LiquidityOrder::sale(request))?;
		self.ledger.save(&order).await?;

		let outcome = strategy.sell_liquidity(&order).await;
		self.record_submission(&mut order, outcome).await
	}

	/// Polls the latest order of the pair and returns its realized amounts
	/// once the chain transaction has confirmed.
	pub async fn fetch_liquidity_transaction_result(
		&self,
		context: LiquidityOrderContext,
		correlation_id: &str,
	) -> Result<LiquidityTransactionResult, DexError> {
		let _pair = self.lock_pair(context, correlation_id).await;

		let mut order = self
			.ledger
			.find_latest(context, correlation_id)
			.await?
			.ok_or_else(|| DexError::OrderNotFound {
				context,
				correlation_id: correlation_id.to_string(),
			})?;
		let strategy = self.registry.resolve_for(&order.target_asset)?;

		match order.state {
			LiquidityOrderState::Complete => return Ok(transaction_result(&order, strategy.as_ref())),
			LiquidityOrderState::Failed => {
				return Err(DexError::OrderFailed {
					correlation_id: correlation_id.to_string(),
					reason: order
						.error_message
						.clone()
						.unwrap_or_else(|| "unknown".to_string()),
				})
			}
			LiquidityOrderState::Created | LiquidityOrderState::InProgress => {}
		}

		let Some(tx_id) = order.chain_tx_id.clone() else {
			if order.order_type != LiquidityOrderType::Reservation {
				warn!(correlation_id, order_id = %order.id, "Swap order in flight without a transaction id");
			}
			return Err(DexError::OrderNotReady {
				correlation_id: correlation_id.to_string(),
			});
		};

		match strategy.is_transaction_complete(&tx_id).await {
			Ok(true) => {}
			Ok(false) => {
				debug!(correlation_id, %tx_id, "Liquidity transaction not confirmed yet");
				return Err(DexError::OrderNotReady {
					correlation_id: correlation_id.to_string(),
				});
			}
			Err(e @ StrategyError::TransactionFailed { .. }) => {
				warn!(correlation_id, %tx_id, error = %e, "Liquidity transaction failed on chain");
				self.fail_order(&mut order, &e.to_string()).await?;
				return Err(DexError::from_strategy(correlation_id, e));
			}
			Err(e) => return Err(DexError::from_strategy(correlation_id, e)),
		}

		let settled = match order.order_type {
			LiquidityOrderType::Purchase => strategy.add_purchase_data(&order).await,
			LiquidityOrderType::Sale => strategy.add_sell_data(&order).await,
			LiquidityOrderType::Reservation => {
				return Err(DexError::Execution(format!(
					"reservation {} carries a chain transaction",
					order.id
				)))
			}
		}
		.map_err(|e| DexError::from_strategy(correlation_id, e))?;

		order.settled(settled)?;
		self.ledger.save(&order).await?;
		info!(
			correlation_id,
			%tx_id,
			order_type = %order.order_type,
			amount = ?order.target_amount,
			fee = ?order.fee_amount,
			"Liquidity transaction settled"
		);
		Ok(transaction_result(&order, strategy.as_ref()))
	}

	/// Releases the liquidity held by the pair's completed orders. Returns
	/// the number of orders released.
	pub async fn complete_orders(
		&self,
		context: LiquidityOrderContext,
		correlation_id: &str,
	) -> Result<usize, DexError> {
		let _pair = self.lock_pair(context, correlation_id).await;

		let mut released = 0;
		for mut order in self
			.ledger
			.find_by_correlation(context, correlation_id)
			.await?
		{
			if order.release() {
				self.ledger.save(&order).await?;
				released += 1;
			}
		}
		if released > 0 {
			info!(%context, correlation_id, released, "Released committed liquidity");
		}
		Ok(released)
	}

	/// Fails the pair's in-flight order after an operator confirmed that its
	/// swap never reached the chain. Orders with a recorded transaction are
	/// left to confirmation. Returns false when nothing was in flight.
	pub async fn abandon_order(
		&self,
		context: LiquidityOrderContext,
		correlation_id: &str,
		reason: &str,
	) -> Result<bool, DexError> {
		let _pair = self.lock_pair(context, correlation_id).await;

		let Some(mut order) = self.ledger.find_active(context, correlation_id).await? else {
			return Ok(false);
		};
		if let Some(tx_id) = &order.chain_tx_id {
			return Err(DexError::InvalidRequest(format!(
				"order {} has transaction {}; it settles through confirmation",
				order.id, tx_id
			)));
		}

		warn!(%context, correlation_id, order_id = %order.id, order_type = %order.order_type, reason, "Abandoning liquidity order");
		self.fail_order(&mut order, &format!("abandoned: {}", reason))
			.await?;
		Ok(true)
	}

	/// Prepares the pair for a new swap order and returns its orders. Returns
	/// `None` when an order with a swap in flight already exists. A leftover
	/// unchecked reservation is failed so it cannot shadow the new order.
	async fn take_over_pair(
		&self,
		context: LiquidityOrderContext,
		correlation_id: &str,
	) -> Result<Option<Vec<LiquidityOrder>>, DexError> {
		let mut orders = self
			.ledger
			.find_by_correlation(context, correlation_id)
			.await?;
		if let Some(active) = orders.iter_mut().rev().find(|o| !o.is_terminal()) {
			if active.order_type != LiquidityOrderType::Reservation {
				debug!(
					%context,
					correlation_id,
					order_id = %active.id,
					tx_id = ?active.chain_tx_id,
					"Liquidity order already in flight"
				);
				return Ok(None);
			}
			active.fail("superseded by swap order")?;
			self.ledger.save(active).await?;
		}
		Ok(Some(orders))
	}

	/// Records the strategy's answer to a swap submission. An unknown outcome
	/// leaves the order in flight without a transaction id, which blocks the
	/// pair until an operator abandons it.
	async fn record_submission(
		&self,
		order: &mut LiquidityOrder,
		outcome: Result<SwapSubmission, StrategyError>,
	) -> Result<(), DexError> {
		match outcome {
			Ok(submission) => {
				let tx_id = submission.tx_id.clone();
				order.submitted(submission)?;
				self.ledger.save(order).await?;
				info!(
					correlation_id = %order.correlation_id,
					order_type = %order.order_type,
					asset = %order.target_asset.unique_name(),
					amount = %order.reference_amount,
					%tx_id,
					"Swap submitted"
				);
				Ok(())
			}
			Err(e @ StrategyError::SubmissionUnknown(_)) => {
				error!(
					correlation_id = %order.correlation_id,
					order_id = %order.id,
					error = %e,
					"Swap submission outcome unknown, order kept in flight"
				);
				Err(DexError::from_strategy(&order.correlation_id, e))
			}
			Err(e) => {
				self.fail_order(order, &e.to_string()).await?;
				Err(DexError::from_strategy(&order.correlation_id, e))
			}
		}
	}

	async fn fail_order(&self, order: &mut LiquidityOrder, message: &str) -> Result<(), DexError> {
		order.fail(message)?;
		self.ledger.save(order).await?;
		Ok(())
	}
}

/// Reopens the latest failed attempt matching `fresh` that never reached the
/// chain, or returns `fresh` when there is none.
fn reopen_or(orders: &[LiquidityOrder], fresh: LiquidityOrder) -> Result<LiquidityOrder, DexError> {
	let previous = orders
		.iter()
		.filter(|o| {
			o.state == LiquidityOrderState::Failed
				&& o.chain_tx_id.is_none()
				&& o.order_type == fresh.order_type
				&& o.reference_amount == fresh.reference_amount
				&& o.reference_asset.is_same(&fresh.reference_asset)
				&& o.target_asset.is_same(&fresh.target_asset)
		})
		.max_by(|a, b| a.updated_at.cmp(&b.updated_at));

	let Some(previous) = previous else {
		return Ok(fresh);
	};
	let mut order = previous.clone();
	order.retry()?;
	order.max_slippage = fresh.max_slippage;
	Ok(order)
}

fn validate_amount(amount: Decimal, correlation_id: &str) -> Result<(), DexError> {
	if amount <= Decimal::ZERO {
		return Err(DexError::InvalidRequest(format!(
			"amount {} for {} must be positive",
			amount, correlation_id
		)));
	}
	Ok(())
}

fn transaction_result(
	order: &LiquidityOrder,
	strategy: &dyn LiquidityStrategy,
) -> LiquidityTransactionResult {
	let target_asset = match (order.order_type, &order.swap_asset) {
		(LiquidityOrderType::Sale, Some(received)) => received.clone(),
		_ => order.target_asset.clone(),
	};
	let fee_asset = order
		.fee_asset
		.clone()
		.unwrap_or_else(|| strategy.fee_asset().clone());

	LiquidityTransactionResult {
		target: AssetAmount::new(target_asset, order.target_amount.unwrap_or(Decimal::ZERO)),
		fee: AssetAmount::new(fee_asset, order.fee_amount.unwrap_or(Decimal::ZERO)),
	}
}
