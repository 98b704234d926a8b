//! Chain capability adapters for the liquidity engine.
//!
//! This crate provides a unified interface for the on-chain primitives the
//! liquidity strategies rely on: balance queries, swap quotes, swap
//! execution and transaction confirmation. Each adapter instance owns one
//! chain account, including the nonce state of that account.
//!
//! # Architecture
//!
//! - `registry`: holds one adapter per blockchain, built once at startup
//! - `nonce`: serializes nonces of transactions submitted from one account
//! - `implementations`: the `simulated` in-process chain and the HTTP `gateway`

use async_trait::async_trait;
use liquidity_types::{Asset, Blockchain};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod nonce;
pub mod registry;

pub mod implementations {
	pub mod gateway;
	pub mod simulated;
}

pub use nonce::NonceManager;
pub use registry::ChainRegistry;

/// Errors raised by chain adapters.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChainError {
	#[error("No swap route from {from} to {to}")]
	NoRouteFound { from: String, to: String },
	#[error("Insufficient liquidity: {0}")]
	InsufficientLiquidity(String),
	#[error("Slippage exceeded: {0}")]
	SlippageExceeded(String),
	#[error("Transaction {tx_id} failed: {reason}")]
	TransactionFailed { tx_id: String, reason: String },
	#[error("Transaction {0} not found")]
	TransactionNotFound(String),
	#[error("Transaction {0} is not confirmed yet")]
	NotConfirmed(String),
	#[error("Network error: {0}")]
	Network(String),
	#[error("Gateway returned {status}: {message}")]
	Gateway { status: u16, message: String },
	#[error("Transaction {tx_id} delivered no {asset}")]
	MissingOutput { tx_id: String, asset: String },
	#[error("Swap submission outcome unknown: {0}")]
	SubmissionUnknown(String),
	#[error("Invalid amount: {0}")]
	InvalidAmount(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Result of a read-only swap quote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwapQuote {
	/// Amount of the target asset the swap would deliver.
	pub target_amount: Decimal,
	/// Estimated network fee, in the chain's native coin.
	pub fee_amount: Decimal,
}

/// Contract between the liquidity strategies and one blockchain account.
///
/// `execute_swap` is irreversible once it returns a transaction id; callers
/// must never retry the same logical swap without recording that id first.
#[async_trait]
pub trait ChainInterface: Send + Sync {
	/// Blockchain this adapter is connected to.
	fn blockchain(&self) -> Blockchain;

	/// Balance of `asset` held by the adapter's account.
	async fn get_balance(&self, asset: &Asset) -> Result<Decimal, ChainError>;

	/// Quotes a swap without submitting anything. Fails with `NoRouteFound`
	/// when no path from `source` to `target` exists.
	async fn quote_swap(
		&self,
		source: &Asset,
		source_amount: Decimal,
		target: &Asset,
		max_slippage: Decimal,
	) -> Result<SwapQuote, ChainError>;

	/// Submits a swap and returns its transaction id.
	async fn execute_swap(
		&self,
		source: &Asset,
		source_amount: Decimal,
		target: &Asset,
		max_slippage: Decimal,
	) -> Result<String, ChainError>;

	/// Non-blocking confirmation poll. Returns `Ok(false)` while pending and
	/// `TransactionFailed` when the transaction reverted.
	async fn is_transaction_complete(&self, tx_id: &str) -> Result<bool, ChainError>;

	/// Amount of `asset` delivered to the account by a confirmed transaction.
	async fn get_swap_result(&self, tx_id: &str, asset: &Asset) -> Result<Decimal, ChainError>;

	/// Fee paid by a confirmed transaction, in the chain's native coin.
	async fn get_transaction_fee(&self, tx_id: &str) -> Result<Decimal, ChainError>;
}

/// Creates a chain adapter by implementation name.
///
/// Supported implementations: `simulated`, `gateway`.
pub fn create_chain(
	implementation: &str,
	blockchain: Blockchain,
	config: &toml::Value,
) -> Result<Arc<dyn ChainInterface>, ChainError> {
	match implementation {
		"simulated" => implementations::simulated::create_chain(blockchain, config),
		"gateway" => implementations::gateway::create_chain(blockchain, config),
		other => Err(ChainError::Configuration(format!(
			"Unknown chain implementation '{}' for {}",
			other, blockchain
		))),
	}
}
