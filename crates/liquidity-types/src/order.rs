//! Liquidity order ledger entries.
//!
//! A `LiquidityOrder` records one reservation, purchase or sale attempt for a
//! `(context, correlation_id)` pair. Orders are never deleted; they move
//! through `Created -> InProgress -> Complete` or end in `Failed`. At most one
//! non-terminal order may exist per pair, which the coordination service
//! enforces before creating a new one.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::{Asset, LiquidityRequest, SellLiquidityRequest, SettledAmounts, SwapSubmission};

/// Business process that requested the liquidity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityOrderContext {
	BuyCrypto,
	Trading,
	LiquidityManagement,
}

impl fmt::Display for LiquidityOrderContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			LiquidityOrderContext::BuyCrypto => "buy_crypto",
			LiquidityOrderContext::Trading => "trading",
			LiquidityOrderContext::LiquidityManagement => "liquidity_management",
		};
		f.write_str(name)
	}
}

impl FromStr for LiquidityOrderContext {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"buy_crypto" => Ok(LiquidityOrderContext::BuyCrypto),
			"trading" => Ok(LiquidityOrderContext::Trading),
			"liquidity_management" => Ok(LiquidityOrderContext::LiquidityManagement),
			other => Err(format!("unknown liquidity order context: {}", other)),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityOrderType {
	Reservation,
	Purchase,
	Sale,
}

impl fmt::Display for LiquidityOrderType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LiquidityOrderType::Reservation => f.write_str("reservation"),
			LiquidityOrderType::Purchase => f.write_str("purchase"),
			LiquidityOrderType::Sale => f.write_str("sale"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityOrderState {
	Created,
	InProgress,
	Complete,
	Failed,
}

impl LiquidityOrderState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, LiquidityOrderState::Complete | LiquidityOrderState::Failed)
	}
}

impl fmt::Display for LiquidityOrderState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			LiquidityOrderState::Created => "created",
			LiquidityOrderState::InProgress => "in_progress",
			LiquidityOrderState::Complete => "complete",
			LiquidityOrderState::Failed => "failed",
		};
		f.write_str(name)
	}
}

/// Rejected state transition on a liquidity order.
#[derive(Debug, Error, PartialEq)]
#[error("Cannot {action} liquidity order {order_id} in state {state}")]
pub struct OrderTransitionError {
	pub order_id: String,
	pub state: LiquidityOrderState,
	pub action: &'static str,
}

/// One liquidity action attempt.
///
/// For reservations and purchases `target_asset` is the asset being acquired.
/// For sales it is the asset being sold, `reference_amount` is the sold
/// amount and `target_amount` the realized amount of `swap_asset` received.
/// Strategy resolution always uses `target_asset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityOrder {
	pub id: String,
	pub context: LiquidityOrderContext,
	pub correlation_id: String,
	pub order_type: LiquidityOrderType,
	pub state: LiquidityOrderState,
	pub target_asset: Asset,
	pub reference_asset: Asset,
	pub reference_amount: Decimal,
	pub target_amount: Option<Decimal>,
	pub max_slippage: Option<Decimal>,
	pub swap_asset: Option<Asset>,
	pub swap_amount: Option<Decimal>,
	pub fee_amount: Option<Decimal>,
	pub fee_asset: Option<Asset>,
	pub chain_tx_id: Option<String>,
	pub error_message: Option<String>,
	/// Set once the liquidity held for this order has been consumed downstream.
	pub released_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl LiquidityOrder {
	#[allow(clippy::too_many_arguments)]
	fn from_parts(
		context: LiquidityOrderContext,
		correlation_id: String,
		order_type: LiquidityOrderType,
		state: LiquidityOrderState,
		target_asset: Asset,
		reference_asset: Asset,
		reference_amount: Decimal,
		max_slippage: Option<Decimal>,
	) -> Self {
		let now = Utc::now();
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			context,
			correlation_id,
			order_type,
			state,
			target_asset,
			reference_asset,
			reference_amount,
			target_amount: None,
			max_slippage,
			swap_asset: None,
			swap_amount: None,
			fee_amount: None,
			fee_asset: None,
			chain_tx_id: None,
			error_message: None,
			released_at: None,
			created_at: now,
			updated_at: now,
		}
	}

	/// Creates a reservation order in `Created` state.
	pub fn reservation(request: &LiquidityRequest) -> Self {
		Self::from_parts(
			request.context,
			request.correlation_id.clone(),
			LiquidityOrderType::Reservation,
			LiquidityOrderState::Created,
			request.target_asset.clone(),
			request.reference_asset.clone(),
			request.reference_amount,
			request.max_slippage,
		)
	}

	/// Creates a purchase order in `InProgress` state.
	pub fn purchase(request: &LiquidityRequest) -> Self {
		Self::from_parts(
			request.context,
			request.correlation_id.clone(),
			LiquidityOrderType::Purchase,
			LiquidityOrderState::InProgress,
			request.target_asset.clone(),
			request.reference_asset.clone(),
			request.reference_amount,
			request.max_slippage,
		)
	}

	/// Creates a sale order in `InProgress` state.
	pub fn sale(request: &SellLiquidityRequest) -> Self {
		Self::from_parts(
			request.context,
			request.correlation_id.clone(),
			LiquidityOrderType::Sale,
			LiquidityOrderState::InProgress,
			request.sell_asset.clone(),
			request.sell_asset.clone(),
			request.sell_amount,
			request.max_slippage,
		)
	}

	pub fn is_terminal(&self) -> bool {
		self.state.is_terminal()
	}

	/// Whether the order still holds on-hand liquidity for its correlation id.
	pub fn is_committed(&self) -> bool {
		self.state == LiquidityOrderState::Complete
			&& matches!(
				self.order_type,
				LiquidityOrderType::Reservation | LiquidityOrderType::Purchase
			)
			&& self.released_at.is_none()
	}

	fn rejected(&self, action: &'static str) -> OrderTransitionError {
		OrderTransitionError {
			order_id: self.id.clone(),
			state: self.state,
			action,
		}
	}

	/// Completes a reservation with the amount set aside.
	pub fn reserved(&mut self, target_amount: Decimal) -> Result<(), OrderTransitionError> {
		if self.order_type != LiquidityOrderType::Reservation
			|| self.state != LiquidityOrderState::Created
		{
			return Err(self.rejected("reserve"));
		}
		self.target_amount = Some(target_amount);
		self.state = LiquidityOrderState::Complete;
		self.touch();
		Ok(())
	}

	/// Records the chain transaction of a submitted swap.
	///
	/// A transaction id is recorded at most once; an order that already
	/// carries one is never resubmitted.
	pub fn submitted(&mut self, submission: SwapSubmission) -> Result<(), OrderTransitionError> {
		if self.state != LiquidityOrderState::InProgress || self.chain_tx_id.is_some() {
			return Err(self.rejected("record submission of"));
		}
		self.chain_tx_id = Some(submission.tx_id);
		self.swap_asset = Some(submission.swap_asset);
		self.swap_amount = Some(submission.swap_amount);
		self.touch();
		Ok(())
	}

	/// Completes a confirmed purchase or sale with its realized amounts.
	pub fn settled(&mut self, amounts: SettledAmounts) -> Result<(), OrderTransitionError> {
		if self.state != LiquidityOrderState::InProgress || self.chain_tx_id.is_none() {
			return Err(self.rejected("settle"));
		}
		self.target_amount = Some(amounts.target_amount);
		self.fee_amount = Some(amounts.fee_amount);
		self.fee_asset = Some(amounts.fee_asset);
		self.state = LiquidityOrderState::Complete;
		self.touch();
		Ok(())
	}

	pub fn fail(&mut self, message: impl Into<String>) -> Result<(), OrderTransitionError> {
		if self.is_terminal() {
			return Err(self.rejected("fail"));
		}
		self.error_message = Some(message.into());
		self.state = LiquidityOrderState::Failed;
		self.touch();
		Ok(())
	}

	/// Reopens a failed order that never reached the chain, so a retry reuses
	/// it instead of adding another ledger entry.
	pub fn retry(&mut self) -> Result<(), OrderTransitionError> {
		if self.state != LiquidityOrderState::Failed || self.chain_tx_id.is_some() {
			return Err(self.rejected("retry"));
		}
		self.state = match self.order_type {
			LiquidityOrderType::Reservation => LiquidityOrderState::Created,
			LiquidityOrderType::Purchase | LiquidityOrderType::Sale => LiquidityOrderState::InProgress,
		};
		self.error_message = None;
		self.touch();
		Ok(())
	}

	/// Marks committed liquidity as consumed. Returns false if nothing changed.
	pub fn release(&mut self) -> bool {
		if !self.is_committed() {
			return false;
		}
		self.released_at = Some(Utc::now());
		self.touch();
		true
	}

	fn touch(&mut self) {
		self.updated_at = Utc::now();
	}
}
