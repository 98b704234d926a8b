//! Request and result value objects exchanged with liquidity strategies.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Asset, LiquidityOrderContext};

/// Request to reserve or purchase liquidity of `target_asset` worth
/// `reference_amount` of `reference_asset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityRequest {
	pub context: LiquidityOrderContext,
	/// Caller-defined idempotency key, e.g. the batch id.
	pub correlation_id: String,
	pub reference_asset: Asset,
	pub reference_amount: Decimal,
	pub target_asset: Asset,
	/// Overrides the strategy's default slippage tolerance for the swap.
	pub max_slippage: Option<Decimal>,
}

/// Request to sell `sell_amount` of `sell_asset` back into the strategy's
/// swap asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellLiquidityRequest {
	pub context: LiquidityOrderContext,
	pub correlation_id: String,
	pub sell_asset: Asset,
	pub sell_amount: Decimal,
	pub max_slippage: Option<Decimal>,
}

/// Read-only liquidity check handed to a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckLiquidityRequest {
	pub context: LiquidityOrderContext,
	pub correlation_id: String,
	pub reference_asset: Asset,
	pub reference_amount: Decimal,
	pub target_asset: Asset,
	pub max_slippage: Option<Decimal>,
	/// Amount of `target_asset` already committed to other correlation ids.
	/// It is excluded from the on-hand balance.
	pub committed_amount: Decimal,
}

impl CheckLiquidityRequest {
	pub fn from_request(request: &LiquidityRequest, committed_amount: Decimal) -> Self {
		Self {
			context: request.context,
			correlation_id: request.correlation_id.clone(),
			reference_asset: request.reference_asset.clone(),
			reference_amount: request.reference_amount,
			target_asset: request.target_asset.clone(),
			max_slippage: request.max_slippage,
			committed_amount,
		}
	}
}

/// Outcome of a liquidity check. Transient, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckLiquidityResult {
	/// Deliverable amount of the target asset the request asks for.
	pub target_amount: Decimal,
	/// Amount obtainable from on-hand balance, capped at `target_amount`.
	pub available_amount: Decimal,
	/// Amount of the target asset the strategy could buy with its swap asset.
	pub max_purchasable_amount: Decimal,
	pub is_enough_available_liquidity: bool,
	pub is_slippage_detected: bool,
	pub fee_amount: Decimal,
	pub fee_asset: Asset,
}

/// Returned by a strategy once an on-chain swap has been submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapSubmission {
	pub tx_id: String,
	/// Asset spent (purchase) or received (sale).
	pub swap_asset: Asset,
	/// Amount of `swap_asset` sent into the swap, or the sold amount for sales.
	pub swap_amount: Decimal,
}

/// Realized amounts of a confirmed swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledAmounts {
	pub target_amount: Decimal,
	pub fee_amount: Decimal,
	pub fee_asset: Asset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetAmount {
	pub asset: Asset,
	pub amount: Decimal,
}

impl AssetAmount {
	pub fn new(asset: Asset, amount: Decimal) -> Self {
		Self { asset, amount }
	}
}

/// Result of a confirmed liquidity transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityTransactionResult {
	pub target: AssetAmount,
	pub fee: AssetAmount,
}
