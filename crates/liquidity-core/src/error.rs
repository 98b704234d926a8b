use liquidity_pricing::PricingError;
use liquidity_storage::StorageError;
use liquidity_strategy::StrategyError;
use liquidity_types::{BatchError, LiquidityOrderContext, OrderTransitionError};
use rust_decimal::Decimal;
use thiserror::Error;

/// How the securing loop reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// Expected steady-state condition. Retried next tick, no alert.
	Transient,
	/// Market moved. Operators are notified, retried next tick.
	Slippage,
	/// Setup problem. Logged loudly, never fixed by retrying alone.
	Configuration,
	/// Chain or infrastructure failure. Logged with context, retried next tick.
	Execution,
	/// A swap may be on chain without a recorded tx id. Operators are
	/// notified and the pair stays blocked until they resolve it.
	Unresolved,
}

/// Errors of the liquidity coordination service.
#[derive(Error, Debug)]
pub enum DexError {
	#[error("Not enough liquidity for {correlation_id}: {available} of {required} {asset} available")]
	NotEnoughLiquidity {
		correlation_id: String,
		asset: String,
		available: Decimal,
		required: Decimal,
	},

	#[error("Price slippage for {correlation_id}: {message}")]
	PriceSlippage {
		correlation_id: String,
		message: String,
	},

	#[error("Liquidity order for {correlation_id} is not ready")]
	OrderNotReady { correlation_id: String },

	#[error("Insufficient swap liquidity for {correlation_id}: {message}")]
	InsufficientLiquidity {
		correlation_id: String,
		message: String,
	},

	#[error("No strategy found for {0}")]
	NoStrategyFound(String),

	#[error("No liquidity order for {context}/{correlation_id}")]
	OrderNotFound {
		context: LiquidityOrderContext,
		correlation_id: String,
	},

	#[error("Liquidity order for {correlation_id} failed: {reason}")]
	OrderFailed {
		correlation_id: String,
		reason: String,
	},

	#[error("Swap submission for {correlation_id} has an unknown outcome: {message}")]
	SubmissionUnknown {
		correlation_id: String,
		message: String,
	},

	#[error("Not supported: {0}")]
	NotSupported(String),

	#[error("Invalid request: {0}")]
	InvalidRequest(String),

	#[error("Execution error: {0}")]
	Execution(String),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Pricing error: {0}")]
	Pricing(#[from] PricingError),

	#[error("Order state error: {0}")]
	Transition(#[from] OrderTransitionError),
}

impl DexError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			DexError::NotEnoughLiquidity { .. }
			| DexError::OrderNotReady { .. }
			| DexError::InsufficientLiquidity { .. } => ErrorKind::Transient,
			DexError::PriceSlippage { .. } => ErrorKind::Slippage,
			DexError::NoStrategyFound(_)
			| DexError::NotSupported(_)
			| DexError::InvalidRequest(_) => ErrorKind::Configuration,
			DexError::OrderNotFound { .. }
			| DexError::OrderFailed { .. }
			| DexError::Execution(_)
			| DexError::Storage(_)
			| DexError::Pricing(_)
			| DexError::Transition(_) => ErrorKind::Execution,
			DexError::SubmissionUnknown { .. } => ErrorKind::Unresolved,
		}
	}

	/// Translates a strategy failure for the order of `correlation_id`.
	pub(crate) fn from_strategy(correlation_id: &str, error: StrategyError) -> Self {
		let correlation_id = correlation_id.to_string();
		match error {
			StrategyError::PriceSlippage(message) => DexError::PriceSlippage {
				correlation_id,
				message,
			},
			StrategyError::InsufficientLiquidity(message) => DexError::InsufficientLiquidity {
				correlation_id,
				message,
			},
			StrategyError::TransactionFailed { tx_id, reason } => DexError::OrderFailed {
				correlation_id,
				reason: format!("transaction {} failed: {}", tx_id, reason),
			},
			StrategyError::SubmissionUnknown(message) => DexError::SubmissionUnknown {
				correlation_id,
				message,
			},
			e @ StrategyError::NotSupported { .. } => DexError::NotSupported(e.to_string()),
			StrategyError::InvalidRequest(message) => DexError::InvalidRequest(message),
			StrategyError::Configuration(message) => DexError::InvalidRequest(message),
			StrategyError::Pricing(e) => DexError::Pricing(e),
			e @ (StrategyError::NoRouteFound(_) | StrategyError::Chain(_)) => {
				DexError::Execution(e.to_string())
			}
		}
	}
}

/// Errors of the core services outside the coordination path.
#[derive(Error, Debug)]
pub enum CoreError {
	#[error("Configuration error: {0}")]
	Configuration(String),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Batch error: {0}")]
	Batch(#[from] BatchError),

	#[error("Liquidity error: {0}")]
	Dex(#[from] DexError),

	#[error("Pricing error: {0}")]
	Pricing(#[from] PricingError),

	#[error("Shutdown error: {0}")]
	Shutdown(String),
}
