//! Liquidity strategies.
//!
//! A strategy knows how to check, buy and sell liquidity for one group of
//! assets, identified by a `StrategyKey` of blockchain, asset type and asset
//! category. Every variant is a flat implementation of `LiquidityStrategy`;
//! the coordination service picks one through the strategy registry.

use async_trait::async_trait;
use liquidity_chain::{ChainError, ChainRegistry};
use liquidity_pricing::{PricingError, PricingService};
use liquidity_types::{
	Asset, AssetCategory, AssetType, Blockchain, CheckLiquidityRequest, CheckLiquidityResult,
	LiquidityOrder, SettledAmounts, SwapSubmission,
};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod implementations {
	pub mod dex_swap;
	pub mod non_purchasable;
}

/// Lookup key of a strategy. `None` fields are wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrategyKey {
	pub blockchain: Blockchain,
	pub asset_type: Option<AssetType>,
	pub asset_category: Option<AssetCategory>,
}

impl StrategyKey {
	pub fn new(
		blockchain: Blockchain,
		asset_type: Option<AssetType>,
		asset_category: Option<AssetCategory>,
	) -> Self {
		Self {
			blockchain,
			asset_type,
			asset_category,
		}
	}

	/// Keys to try for an asset, most specific first: exact match, then
	/// category wildcard, then type and category wildcard.
	pub fn candidates(
		blockchain: Blockchain,
		asset_type: AssetType,
		asset_category: Option<AssetCategory>,
	) -> Vec<StrategyKey> {
		let mut keys = Vec::with_capacity(3);
		if asset_category.is_some() {
			keys.push(Self::new(blockchain, Some(asset_type), asset_category));
		}
		keys.push(Self::new(blockchain, Some(asset_type), None));
		keys.push(Self::new(blockchain, None, None));
		keys
	}
}

impl fmt::Display for StrategyKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let asset_type = self.asset_type.map(|t| t.to_string());
		let category = self.asset_category.map(|c| c.to_string());
		write!(
			f,
			"{}/{}/{}",
			self.blockchain,
			asset_type.as_deref().unwrap_or("*"),
			category.as_deref().unwrap_or("*")
		)
	}
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StrategyError {
	#[error("{operation} is not supported on {blockchain}")]
	NotSupported {
		operation: &'static str,
		blockchain: Blockchain,
	},
	#[error("Insufficient liquidity: {0}")]
	InsufficientLiquidity(String),
	#[error("Price slippage: {0}")]
	PriceSlippage(String),
	#[error("No route: {0}")]
	NoRouteFound(String),
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	#[error("Transaction {tx_id} failed: {reason}")]
	TransactionFailed { tx_id: String, reason: String },
	/// A swap may have been broadcast without its tx id being returned.
	#[error("Submission outcome unknown: {0}")]
	SubmissionUnknown(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
	#[error("Chain error: {0}")]
	Chain(ChainError),
	#[error("Pricing error: {0}")]
	Pricing(#[from] PricingError),
}

impl From<ChainError> for StrategyError {
	fn from(error: ChainError) -> Self {
		match error {
			ChainError::InsufficientLiquidity(message) => StrategyError::InsufficientLiquidity(message),
			ChainError::SlippageExceeded(message) => StrategyError::PriceSlippage(message),
			ChainError::NoRouteFound { from, to } => {
				StrategyError::NoRouteFound(format!("{} -> {}", from, to))
			}
			ChainError::TransactionFailed { tx_id, reason } => {
				StrategyError::TransactionFailed { tx_id, reason }
			}
			ChainError::SubmissionUnknown(message) => StrategyError::SubmissionUnknown(message),
			other => StrategyError::Chain(other),
		}
	}
}

/// Check, purchase and sell capabilities of one asset group.
///
/// `check_liquidity` must only read. `purchase_liquidity` and
/// `sell_liquidity` return once the swap is submitted, not once it confirms;
/// the realized amounts are collected later through `add_purchase_data` and
/// `add_sell_data`.
#[async_trait]
pub trait LiquidityStrategy: Send + Sync {
	fn name(&self) -> &str;

	fn key(&self) -> StrategyKey;

	/// Asset in which this strategy's chain fees are paid.
	fn fee_asset(&self) -> &Asset;

	async fn check_liquidity(
		&self,
		request: &CheckLiquidityRequest,
	) -> Result<CheckLiquidityResult, StrategyError>;

	async fn purchase_liquidity(&self, order: &LiquidityOrder)
		-> Result<SwapSubmission, StrategyError>;

	async fn sell_liquidity(&self, order: &LiquidityOrder) -> Result<SwapSubmission, StrategyError>;

	/// Polls the chain transaction of a submitted order.
	async fn is_transaction_complete(&self, tx_id: &str) -> Result<bool, StrategyError>;

	async fn add_purchase_data(&self, order: &LiquidityOrder)
		-> Result<SettledAmounts, StrategyError>;

	async fn add_sell_data(&self, order: &LiquidityOrder) -> Result<SettledAmounts, StrategyError>;
}

/// Creates a strategy from one `[[strategies]]` entry.
///
/// Supported implementations: `dex_swap`, `non_purchasable`.
pub fn create_strategy(
	config: &toml::Value,
	chains: &ChainRegistry,
	pricing: Arc<PricingService>,
) -> Result<Arc<dyn LiquidityStrategy>, StrategyError> {
	let implementation = config
		.get("implementation")
		.and_then(|v| v.as_str())
		.ok_or_else(|| StrategyError::Configuration("implementation is required".to_string()))?;

	match implementation {
		"dex_swap" => implementations::dex_swap::create_strategy(config, chains, pricing),
		"non_purchasable" => implementations::non_purchasable::create_strategy(config, chains),
		other => Err(StrategyError::Configuration(format!(
			"Unknown strategy implementation: {}",
			other
		))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_candidates_most_specific_first() {
		let keys = StrategyKey::candidates(
			Blockchain::Ethereum,
			AssetType::Token,
			Some(AssetCategory::Stock),
		);
		assert_eq!(keys.len(), 3);
		assert_eq!(keys[0].asset_category, Some(AssetCategory::Stock));
		assert_eq!(keys[1].to_string(), "ethereum/token/*");
		assert_eq!(keys[2].to_string(), "ethereum/*/*");

		let uncategorized = StrategyKey::candidates(Blockchain::Bitcoin, AssetType::Coin, None);
		assert_eq!(uncategorized.len(), 2);
	}

	#[test]
	fn test_chain_errors_are_classified() {
		assert!(matches!(
			StrategyError::from(ChainError::SlippageExceeded("4%".to_string())),
			StrategyError::PriceSlippage(_)
		));
		assert!(matches!(
			StrategyError::from(ChainError::Network("timeout".to_string())),
			StrategyError::Chain(_)
		));
		assert!(matches!(
			StrategyError::from(ChainError::SubmissionUnknown("read timed out".to_string())),
			StrategyError::SubmissionUnknown(_)
		));
	}
}
