//! Strategy registry.
//!
//! Maps a `(blockchain, asset type, asset category)` tuple to the strategy
//! responsible for it. Built once at startup and immutable afterwards, so
//! lookups need no locking.

use crate::error::{CoreError, DexError};
use liquidity_strategy::{LiquidityStrategy, StrategyKey};
use liquidity_types::{Asset, AssetCategory, AssetType, Blockchain};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct StrategyRegistry {
	strategies: HashMap<StrategyKey, Arc<dyn LiquidityStrategy>>,
}

impl StrategyRegistry {
	/// Builds the registry. Two strategies with the same key are a
	/// configuration error.
	pub fn new(strategies: Vec<Arc<dyn LiquidityStrategy>>) -> Result<Self, CoreError> {
		let mut map: HashMap<StrategyKey, Arc<dyn LiquidityStrategy>> = HashMap::new();
		for strategy in strategies {
			let key = strategy.key();
			if let Some(existing) = map.get(&key) {
				return Err(CoreError::Configuration(format!(
					"Strategies {} and {} share key {}",
					existing.name(),
					strategy.name(),
					key
				)));
			}
			info!(strategy = strategy.name(), %key, "Registered liquidity strategy");
			map.insert(key, strategy);
		}
		Ok(Self { strategies: map })
	}

	/// Resolves the most specific strategy: exact match, then category
	/// wildcard, then type wildcard.
	pub fn resolve(
		&self,
		blockchain: Blockchain,
		asset_type: AssetType,
		asset_category: Option<AssetCategory>,
	) -> Result<Arc<dyn LiquidityStrategy>, DexError> {
		StrategyKey::candidates(blockchain, asset_type, asset_category)
			.iter()
			.find_map(|key| self.strategies.get(key).cloned())
			.ok_or_else(|| {
				DexError::NoStrategyFound(
					StrategyKey::new(blockchain, Some(asset_type), asset_category).to_string(),
				)
			})
	}

	pub fn resolve_for(&self, asset: &Asset) -> Result<Arc<dyn LiquidityStrategy>, DexError> {
		self.resolve(asset.blockchain, asset.asset_type, asset.category)
	}

	pub fn len(&self) -> usize {
		self.strategies.len()
	}

	pub fn is_empty(&self) -> bool {
		self.strategies.is_empty()
	}

	/// Registered strategy names, sorted.
	pub fn names(&self) -> Vec<String> {
		let mut names: Vec<String> = self
			.strategies
			.values()
			.map(|s| s.name().to_string())
			.collect();
		names.sort();
		names
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use liquidity_chain::implementations::simulated::SimulatedChain;
	use liquidity_strategy::implementations::non_purchasable::{
		NonPurchasableSettings, NonPurchasableStrategy,
	};

	fn strategy(
		asset_type: Option<AssetType>,
		asset_category: Option<AssetCategory>,
	) -> Arc<dyn LiquidityStrategy> {
		Arc::new(NonPurchasableStrategy::new(
			NonPurchasableSettings {
				blockchain: Blockchain::Ethereum,
				asset_type,
				asset_category,
				fee_asset: Asset::coin("ETH", Blockchain::Ethereum),
			},
			Arc::new(SimulatedChain::new(Blockchain::Ethereum)),
		))
	}

	fn registry() -> StrategyRegistry {
		StrategyRegistry::new(vec![
			strategy(None, None),
			strategy(Some(AssetType::Token), None),
			strategy(Some(AssetType::Token), Some(AssetCategory::Stock)),
		])
		.unwrap()
	}

	#[test]
	fn test_most_specific_strategy_wins() {
		let registry = registry();

		let stock = registry
			.resolve(Blockchain::Ethereum, AssetType::Token, Some(AssetCategory::Stock))
			.unwrap();
		assert_eq!(stock.name(), "non_purchasable:ethereum/token/stock");

		let public = registry
			.resolve(Blockchain::Ethereum, AssetType::Token, Some(AssetCategory::Public))
			.unwrap();
		assert_eq!(public.name(), "non_purchasable:ethereum/token/*");

		let coin = registry
			.resolve(Blockchain::Ethereum, AssetType::Coin, None)
			.unwrap();
		assert_eq!(coin.name(), "non_purchasable:ethereum/*/*");
	}

	#[test]
	fn test_resolution_is_deterministic() {
		let registry = registry();
		let first = registry
			.resolve(Blockchain::Ethereum, AssetType::Token, None)
			.unwrap();
		let second = registry
			.resolve(Blockchain::Ethereum, AssetType::Token, None)
			.unwrap();
		assert!(Arc::ptr_eq(&first, &second));
	}

	#[test]
	fn test_missing_and_duplicate_strategies() {
		let registry = registry();
		assert!(matches!(
			registry.resolve(Blockchain::Bitcoin, AssetType::Coin, None),
			Err(DexError::NoStrategyFound(_))
		));

		assert!(matches!(
			StrategyRegistry::new(vec![strategy(None, None), strategy(None, None)]),
			Err(CoreError::Configuration(_))
		));
	}
}
