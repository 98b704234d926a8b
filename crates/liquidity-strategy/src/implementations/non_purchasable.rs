//! Check-only strategy for chains without a swap path, e.g. Lightning.
//!
//! Liquidity on such chains is topped up by operators. The strategy only
//! reports on-hand balance; purchases and sales are rejected as not
//! supported, which callers must treat as permanent.

use crate::{LiquidityStrategy, StrategyError, StrategyKey};
use async_trait::async_trait;
use liquidity_chain::{ChainInterface, ChainRegistry};
use liquidity_types::{
	Asset, AssetCategory, AssetType, Blockchain, CheckLiquidityRequest, CheckLiquidityResult,
	ConfigSchema, Field, FieldType, LiquidityOrder, Schema, SettledAmounts, SwapSubmission,
	ValidationError,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct NonPurchasableSettings {
	pub blockchain: Blockchain,
	#[serde(default)]
	pub asset_type: Option<AssetType>,
	#[serde(default)]
	pub asset_category: Option<AssetCategory>,
	pub fee_asset: Asset,
}

pub struct NonPurchasableStrategy {
	name: String,
	settings: NonPurchasableSettings,
	chain: Arc<dyn ChainInterface>,
}

impl NonPurchasableStrategy {
	pub fn new(settings: NonPurchasableSettings, chain: Arc<dyn ChainInterface>) -> Self {
		let name = format!(
			"non_purchasable:{}",
			StrategyKey::new(
				settings.blockchain,
				settings.asset_type,
				settings.asset_category
			)
		);
		Self {
			name,
			settings,
			chain,
		}
	}

	fn not_supported(&self, operation: &'static str) -> StrategyError {
		StrategyError::NotSupported {
			operation,
			blockchain: self.settings.blockchain,
		}
	}
}

#[async_trait]
impl LiquidityStrategy for NonPurchasableStrategy {
	fn name(&self) -> &str {
		&self.name
	}

	fn key(&self) -> StrategyKey {
		StrategyKey::new(
			self.settings.blockchain,
			self.settings.asset_type,
			self.settings.asset_category,
		)
	}

	fn fee_asset(&self) -> &Asset {
		&self.settings.fee_asset
	}

	async fn check_liquidity(
		&self,
		request: &CheckLiquidityRequest,
	) -> Result<CheckLiquidityResult, StrategyError> {
		// no conversion path, so the request must already be denominated in the target
		if request.reference_asset.name != request.target_asset.name {
			return Err(StrategyError::InvalidRequest(format!(
				"{} liquidity can only be referenced in {}, got {}",
				self.settings.blockchain, request.target_asset.name, request.reference_asset.name
			)));
		}

		let target_amount = request.reference_amount;
		let balance = self.chain.get_balance(&request.target_asset).await?;
		let on_hand = balance
			.checked_sub(request.committed_amount)
			.ok_or_else(|| StrategyError::InvalidRequest("on-hand balance overflows".to_string()))?
			.max(Decimal::ZERO);

		Ok(CheckLiquidityResult {
			target_amount,
			available_amount: on_hand.min(target_amount),
			max_purchasable_amount: Decimal::ZERO,
			is_enough_available_liquidity: on_hand >= target_amount,
			is_slippage_detected: false,
			fee_amount: Decimal::ZERO,
			fee_asset: self.settings.fee_asset.clone(),
		})
	}

	async fn purchase_liquidity(
		&self,
		_order: &LiquidityOrder,
	) -> Result<SwapSubmission, StrategyError> {
		Err(self.not_supported("purchase"))
	}

	async fn sell_liquidity(&self, _order: &LiquidityOrder) -> Result<SwapSubmission, StrategyError> {
		Err(self.not_supported("sell"))
	}

	async fn is_transaction_complete(&self, _tx_id: &str) -> Result<bool, StrategyError> {
		Err(self.not_supported("transaction tracking"))
	}

	async fn add_purchase_data(
		&self,
		_order: &LiquidityOrder,
	) -> Result<SettledAmounts, StrategyError> {
		Err(self.not_supported("purchase"))
	}

	async fn add_sell_data(&self, _order: &LiquidityOrder) -> Result<SettledAmounts, StrategyError> {
		Err(self.not_supported("sell"))
	}
}

pub struct NonPurchasableSchema;

impl ConfigSchema for NonPurchasableSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![
				Field::new("blockchain", FieldType::String),
				Field::new("fee_asset", FieldType::Table),
			],
			vec![
				Field::new("asset_type", FieldType::String),
				Field::new("asset_category", FieldType::String),
			],
		)
		.validate(config)
	}
}

pub fn create_strategy(
	config: &toml::Value,
	chains: &ChainRegistry,
) -> Result<Arc<dyn LiquidityStrategy>, StrategyError> {
	NonPurchasableSchema
		.validate(config)
		.map_err(|e| StrategyError::Configuration(e.to_string()))?;
	let settings: NonPurchasableSettings = config
		.clone()
		.try_into()
		.map_err(|e| StrategyError::Configuration(e.to_string()))?;
	let chain = chains
		.get_required(settings.blockchain)
		.map_err(|e| StrategyError::Configuration(e.to_string()))?;

	Ok(Arc::new(NonPurchasableStrategy::new(settings, chain)))
}
