//! DEX swap strategy.
//!
//! Holds liquidity in the chain account and tops it up by swapping the
//! configured swap asset (usually the native coin) into the target asset on
//! the chain's DEX. Quotes are compared with the price oracle; a quote worse
//! than the oracle by more than `price_tolerance` counts as slippage.

use crate::{LiquidityStrategy, StrategyError, StrategyKey};
use async_trait::async_trait;
use liquidity_chain::{ChainError, ChainInterface, ChainRegistry};
use liquidity_pricing::{PricingError, PricingService};
use liquidity_types::{
	parse_decimal, Asset, AssetCategory, AssetType, Blockchain, CheckLiquidityRequest,
	CheckLiquidityResult, ConfigSchema, Field, FieldType, LiquidityOrder, Schema, SettledAmounts,
	SwapSubmission, ValidationError, AMOUNT_DECIMALS,
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct DexSwapSettings {
	pub blockchain: Blockchain,
	#[serde(default)]
	pub asset_type: Option<AssetType>,
	#[serde(default)]
	pub asset_category: Option<AssetCategory>,
	pub fee_asset: Asset,
	pub swap_asset: Asset,
	/// Slippage allowed on submitted swaps when the request carries none.
	#[serde(default = "default_max_slippage")]
	pub max_slippage: Decimal,
	/// Allowed deviation of a quote from the oracle price.
	#[serde(default = "default_price_tolerance")]
	pub price_tolerance: Decimal,
	#[serde(default)]
	pub sell_enabled: bool,
}

fn default_max_slippage() -> Decimal {
	Decimal::new(5, 3)
}

fn default_price_tolerance() -> Decimal {
	Decimal::new(3, 2)
}

fn overflow(what: &str) -> StrategyError {
	StrategyError::InvalidRequest(format!("{} overflows", what))
}

pub struct DexSwapStrategy {
	name: String,
	settings: DexSwapSettings,
	chain: Arc<dyn ChainInterface>,
	pricing: Arc<PricingService>,
}

impl DexSwapStrategy {
	pub fn new(
		settings: DexSwapSettings,
		chain: Arc<dyn ChainInterface>,
		pricing: Arc<PricingService>,
	) -> Self {
		let name = format!(
			"dex_swap:{}",
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
			pricing,
		}
	}

	fn slippage(&self, requested: Option<Decimal>) -> Decimal {
		requested.unwrap_or(self.settings.max_slippage)
	}

	/// Whether `quoted` units of `target` for `amount` of `source` fall short
	/// of the oracle price by more than the tolerance. Without an oracle
	/// price there is nothing to compare against.
	async fn is_slippage(
		&self,
		source: &Asset,
		amount: Decimal,
		target: &Asset,
		quoted: Decimal,
	) -> Result<bool, StrategyError> {
		match self.pricing.get_price(source, target).await {
			Ok(price) => {
				let reference = amount
					.checked_mul(price)
					.ok_or_else(|| overflow("oracle reference amount"))?;
				let floor = reference
					.checked_mul(Decimal::ONE - self.settings.price_tolerance)
					.ok_or_else(|| overflow("slippage floor"))?;
				if quoted < floor {
					warn!(
						source = %source,
						target = %target,
						%quoted,
						%reference,
						"Swap quote deviates from oracle price"
					);
				}
				Ok(quoted < floor)
			}
			Err(PricingError::PriceNotFound { .. }) => {
				debug!(source = %source, target = %target, "No oracle price, skipping slippage check");
				Ok(false)
			}
			Err(e) => Err(e.into()),
		}
	}

	/// Amount of `target` the request asks for, plus whether pricing it on
	/// the DEX showed slippage.
	async fn requested_amount(
		&self,
		reference: &Asset,
		reference_amount: Decimal,
		target: &Asset,
		max_slippage: Decimal,
	) -> Result<(Decimal, bool), StrategyError> {
		if reference.is_same(target) {
			return Ok((reference_amount, false));
		}

		if reference.blockchain == self.settings.blockchain {
			match self
				.chain
				.quote_swap(reference, reference_amount, target, max_slippage)
				.await
			{
				Ok(quote) => {
					let slippage = self
						.is_slippage(reference, reference_amount, target, quote.target_amount)
						.await?;
					return Ok((quote.target_amount, slippage));
				}
				Err(ChainError::NoRouteFound { .. }) => {}
				Err(e) => return Err(e.into()),
			}
		}

		let amount = self
			.pricing
			.convert(reference_amount, reference, target)
			.await?;
		Ok((amount, false))
	}

	/// Largest amount of `target` the swap asset balance could buy, with the
	/// network fee of such a swap.
	async fn purchasable(&self, target: &Asset) -> Result<(Decimal, Decimal), StrategyError> {
		let swap_asset = &self.settings.swap_asset;
		if swap_asset.is_same(target) {
			return Ok((Decimal::ZERO, Decimal::ZERO));
		}
		let balance = self.chain.get_balance(swap_asset).await?;
		if balance <= Decimal::ZERO {
			return Ok((Decimal::ZERO, Decimal::ZERO));
		}
		match self
			.chain
			.quote_swap(swap_asset, balance, target, self.settings.max_slippage)
			.await
		{
			Ok(quote) => Ok((quote.target_amount, quote.fee_amount)),
			Err(ChainError::NoRouteFound { .. }) => Ok((Decimal::ZERO, Decimal::ZERO)),
			Err(e) => Err(e.into()),
		}
	}

	fn require_tx<'a>(&self, order: &'a LiquidityOrder) -> Result<&'a str, StrategyError> {
		order.chain_tx_id.as_deref().ok_or_else(|| {
			StrategyError::InvalidRequest(format!("order {} has no chain transaction", order.id))
		})
	}

	fn check_blockchain(&self, asset: &Asset) -> Result<(), StrategyError> {
		if asset.blockchain != self.settings.blockchain {
			return Err(StrategyError::InvalidRequest(format!(
				"{} is not on {}",
				asset, self.settings.blockchain
			)));
		}
		Ok(())
	}

	async fn settle(
		&self,
		order: &LiquidityOrder,
		received: &Asset,
	) -> Result<SettledAmounts, StrategyError> {
		let tx_id = self.require_tx(order)?;
		let target_amount = self.chain.get_swap_result(tx_id, received).await?;
		let fee_amount = self.chain.get_transaction_fee(tx_id).await?;

		Ok(SettledAmounts {
			target_amount,
			fee_amount,
			fee_asset: self.settings.fee_asset.clone(),
		})
	}
}

#[async_trait]
impl LiquidityStrategy for DexSwapStrategy {
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
		let target = &request.target_asset;
		self.check_blockchain(target)?;
		let max_slippage = self.slippage(request.max_slippage);

		let (target_amount, is_slippage_detected) = self
			.requested_amount(
				&request.reference_asset,
				request.reference_amount,
				target,
				max_slippage,
			)
			.await?;

		let balance = self.chain.get_balance(target).await?;
		let on_hand = balance
			.checked_sub(request.committed_amount)
			.ok_or_else(|| overflow("on-hand balance"))?
			.max(Decimal::ZERO);
		let (max_purchasable_amount, fee_amount) = self.purchasable(target).await?;

		debug!(
			correlation_id = %request.correlation_id,
			asset = %target,
			%target_amount,
			%balance,
			committed = %request.committed_amount,
			"Checked liquidity"
		);

		Ok(CheckLiquidityResult {
			target_amount,
			available_amount: on_hand.min(target_amount),
			max_purchasable_amount,
			is_enough_available_liquidity: on_hand >= target_amount,
			is_slippage_detected,
			fee_amount,
			fee_asset: self.settings.fee_asset.clone(),
		})
	}

	async fn purchase_liquidity(
		&self,
		order: &LiquidityOrder,
	) -> Result<SwapSubmission, StrategyError> {
		let target = &order.target_asset;
		let swap_asset = &self.settings.swap_asset;
		self.check_blockchain(target)?;
		if swap_asset.is_same(target) {
			return Err(StrategyError::InvalidRequest(format!(
				"{} is the swap asset and cannot be bought with itself",
				target
			)));
		}
		let max_slippage = self.slippage(order.max_slippage);

		let (target_amount, _) = self
			.requested_amount(
				&order.reference_asset,
				order.reference_amount,
				target,
				max_slippage,
			)
			.await?;

		// pay for the worst accepted execution price
		let swap_amount = self
			.pricing
			.convert(target_amount, target, swap_asset)
			.await?
			.checked_mul(Decimal::ONE + max_slippage)
			.ok_or_else(|| overflow("swap amount"))?
			.round_dp_with_strategy(AMOUNT_DECIMALS, RoundingStrategy::AwayFromZero);

		let balance = self.chain.get_balance(swap_asset).await?;
		if balance < swap_amount {
			return Err(StrategyError::InsufficientLiquidity(format!(
				"{} {} needed to buy {} {}, {} available",
				swap_amount, swap_asset.name, target_amount, target.name, balance
			)));
		}

		let quote = self
			.chain
			.quote_swap(swap_asset, swap_amount, target, max_slippage)
			.await?;
		if self
			.is_slippage(swap_asset, swap_amount, target, quote.target_amount)
			.await?
		{
			return Err(StrategyError::PriceSlippage(format!(
				"quote of {} {} for {} {} is outside tolerance {}",
				quote.target_amount,
				target.name,
				swap_amount,
				swap_asset.name,
				self.settings.price_tolerance
			)));
		}

		let tx_id = self
			.chain
			.execute_swap(swap_asset, swap_amount, target, max_slippage)
			.await?;
		info!(
			correlation_id = %order.correlation_id,
			asset = %target,
			%tx_id,
			amount = %swap_amount,
			"Purchase swap submitted"
		);

		Ok(SwapSubmission {
			tx_id,
			swap_asset: swap_asset.clone(),
			swap_amount,
		})
	}

	async fn sell_liquidity(&self, order: &LiquidityOrder) -> Result<SwapSubmission, StrategyError> {
		if !self.settings.sell_enabled {
			return Err(StrategyError::NotSupported {
				operation: "sell",
				blockchain: self.settings.blockchain,
			});
		}
		let sell_asset = &order.target_asset;
		let swap_asset = &self.settings.swap_asset;
		self.check_blockchain(sell_asset)?;
		if swap_asset.is_same(sell_asset) {
			return Err(StrategyError::InvalidRequest(format!(
				"{} is the swap asset and cannot be sold into itself",
				sell_asset
			)));
		}
		let amount = order.reference_amount;
		let max_slippage = self.slippage(order.max_slippage);

		let balance = self.chain.get_balance(sell_asset).await?;
		if balance < amount {
			return Err(StrategyError::InsufficientLiquidity(format!(
				"{} {} to sell, {} available",
				amount, sell_asset.name, balance
			)));
		}

		let quote = self
			.chain
			.quote_swap(sell_asset, amount, swap_asset, max_slippage)
			.await?;
		if self
			.is_slippage(sell_asset, amount, swap_asset, quote.target_amount)
			.await?
		{
			return Err(StrategyError::PriceSlippage(format!(
				"quote of {} {} for {} {} is outside tolerance {}",
				quote.target_amount,
				swap_asset.name,
				amount,
				sell_asset.name,
				self.settings.price_tolerance
			)));
		}

		let tx_id = self
			.chain
			.execute_swap(sell_asset, amount, swap_asset, max_slippage)
			.await?;
		info!(
			correlation_id = %order.correlation_id,
			asset = %sell_asset,
			%tx_id,
			%amount,
			"Sell swap submitted"
		);

		Ok(SwapSubmission {
			tx_id,
			swap_asset: swap_asset.clone(),
			swap_amount: amount,
		})
	}

	async fn is_transaction_complete(&self, tx_id: &str) -> Result<bool, StrategyError> {
		Ok(self.chain.is_transaction_complete(tx_id).await?)
	}

	async fn add_purchase_data(
		&self,
		order: &LiquidityOrder,
	) -> Result<SettledAmounts, StrategyError> {
		self.settle(order, &order.target_asset).await
	}

	async fn add_sell_data(&self, order: &LiquidityOrder) -> Result<SettledAmounts, StrategyError> {
		self.settle(order, &self.settings.swap_asset).await
	}
}

pub struct DexSwapSchema;

impl ConfigSchema for DexSwapSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let fraction = |value: &toml::Value| -> Result<(), String> {
			let number = parse_decimal("fraction", value).map_err(|e| e.to_string())?;
			if number >= Decimal::ONE {
				return Err(format!("{} must be below 1", number));
			}
			Ok(())
		};

		Schema::new(
			vec![
				Field::new("blockchain", FieldType::String),
				Field::new("fee_asset", FieldType::Table),
				Field::new("swap_asset", FieldType::Table),
			],
			vec![
				Field::new("asset_type", FieldType::String),
				Field::new("asset_category", FieldType::String),
				Field::new(
					"max_slippage",
					FieldType::Decimal {
						min: Some(Decimal::ZERO),
					},
				)
				.with_validator(fraction),
				Field::new(
					"price_tolerance",
					FieldType::Decimal {
						min: Some(Decimal::ZERO),
					},
				)
				.with_validator(fraction),
				Field::new("sell_enabled", FieldType::Boolean),
			],
		)
		.validate(config)
	}
}

/// Factory function to create a DEX swap strategy from a `[[strategies]]` entry.
///
/// Configuration parameters:
/// - `blockchain`: chain whose adapter executes the swaps
/// - `asset_type`, `asset_category`: lookup key, omitted means wildcard
/// - `fee_asset`, `swap_asset`: asset tables (`name`, `blockchain`, `asset_type`)
/// - `max_slippage`: default slippage for swaps (default: 0.005)
/// - `price_tolerance`: allowed quote deviation from the oracle (default: 0.03)
/// - `sell_enabled`: whether excess liquidity can be sold (default: false)
pub fn create_strategy(
	config: &toml::Value,
	chains: &ChainRegistry,
	pricing: Arc<PricingService>,
) -> Result<Arc<dyn LiquidityStrategy>, StrategyError> {
	DexSwapSchema
		.validate(config)
		.map_err(|e| StrategyError::Configuration(e.to_string()))?;
	let settings: DexSwapSettings = config
		.clone()
		.try_into()
		.map_err(|e| StrategyError::Configuration(e.to_string()))?;

	let chain = chains
		.get_required(settings.blockchain)
		.map_err(|e| StrategyError::Configuration(e.to_string()))?;
	Ok(Arc::new(DexSwapStrategy::new(settings, chain, pricing)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use liquidity_chain::implementations::simulated::SimulatedChain;
	use liquidity_pricing::implementations::fixed::FixedPricing;
	use liquidity_types::{LiquidityOrderContext, LiquidityRequest, SellLiquidityRequest};
	use std::str::FromStr;

	fn d(value: &str) -> Decimal {
		Decimal::from_str(value).unwrap()
	}

	fn eth() -> Asset {
		Asset::coin("ETH", Blockchain::Ethereum)
	}

	fn usdt() -> Asset {
		Asset::token("USDT", Blockchain::Ethereum)
	}

	fn settings() -> DexSwapSettings {
		DexSwapSettings {
			blockchain: Blockchain::Ethereum,
			asset_type: Some(AssetType::Token),
			asset_category: None,
			fee_asset: eth(),
			swap_asset: eth(),
			max_slippage: Decimal::ZERO,
			price_tolerance: d("0.03"),
			sell_enabled: true,
		}
	}

	fn pricing() -> Arc<PricingService> {
		Arc::new(PricingService::new(Box::new(
			FixedPricing::new("USD")
				.with_rate("ETH", "USD", d("2000"))
				.with_rate("USDT", "USD", d("1"))
				.with_rate("EUR", "USD", d("1.25")),
		)))
	}

	fn dex_swap(chain: Arc<SimulatedChain>) -> DexSwapStrategy {
		DexSwapStrategy::new(settings(), chain, pricing())
	}

	fn request(reference: Asset, amount: &str) -> LiquidityRequest {
		LiquidityRequest {
			context: LiquidityOrderContext::BuyCrypto,
			correlation_id: "batch-1".to_string(),
			reference_asset: reference,
			reference_amount: d(amount),
			target_asset: usdt(),
			max_slippage: None,
		}
	}

	fn check(reference: Asset, amount: &str, committed: &str) -> CheckLiquidityRequest {
		CheckLiquidityRequest::from_request(&request(reference, amount), d(committed))
	}

	#[tokio::test]
	async fn test_check_counts_committed_liquidity() {
		let chain = Arc::new(
			SimulatedChain::new(Blockchain::Ethereum)
				.with_balance("USDT", d("150"))
				.with_balance("ETH", d("1"))
				.with_rate("ETH", "USDT", d("2000")),
		);
		let strategy = dex_swap(chain);

		let free = strategy.check_liquidity(&check(usdt(), "100", "0")).await.unwrap();
		assert!(free.is_enough_available_liquidity);
		assert_eq!(free.available_amount, d("100"));
		assert_eq!(free.max_purchasable_amount, d("2000"));

		let busy = strategy.check_liquidity(&check(usdt(), "100", "80")).await.unwrap();
		assert!(!busy.is_enough_available_liquidity);
		assert_eq!(busy.available_amount, d("70"));
		assert_eq!(busy.target_amount, d("100"));
	}

	#[tokio::test]
	async fn test_check_prices_foreign_reference_with_oracle() {
		let chain = Arc::new(SimulatedChain::new(Blockchain::Ethereum).with_balance("USDT", d("10")));
		let strategy = dex_swap(chain);
		let eur = Asset::token("EUR", Blockchain::Base);

		let result = strategy.check_liquidity(&check(eur, "100", "0")).await.unwrap();
		assert_eq!(result.target_amount, d("125"));
		assert!(!result.is_slippage_detected);
		assert_eq!(result.available_amount, d("10"));
	}

	#[tokio::test]
	async fn test_check_flags_quote_slippage() {
		let chain = Arc::new(
			SimulatedChain::new(Blockchain::Ethereum)
				.with_balance("USDT", d("10000"))
				.with_rate("ETH", "USDT", d("1950")),
		);
		let strategy = dex_swap(chain);

		let result = strategy.check_liquidity(&check(eth(), "1", "0")).await.unwrap();
		assert_eq!(result.target_amount, d("1950"));
		assert!(!result.is_slippage_detected);

		let chain = Arc::new(
			SimulatedChain::new(Blockchain::Ethereum)
				.with_balance("USDT", d("10000"))
				.with_rate("ETH", "USDT", d("1800")),
		);
		let result = dex_swap(chain).check_liquidity(&check(eth(), "1", "0")).await.unwrap();
		assert!(result.is_slippage_detected);
	}

	#[tokio::test]
	async fn test_oversized_request_is_rejected() {
		let chain = Arc::new(SimulatedChain::new(Blockchain::Ethereum).with_balance("USDT", d("10")));
		let eur = Asset::token("EUR", Blockchain::Base);
		let huge = Decimal::MAX.to_string();

		assert!(matches!(
			dex_swap(chain).check_liquidity(&check(eur, &huge, "0")).await,
			Err(StrategyError::Pricing(PricingError::Overflow { .. }))
		));
	}

	#[tokio::test]
	async fn test_purchase_submits_swap_and_settles() {
		let chain = Arc::new(
			SimulatedChain::new(Blockchain::Ethereum)
				.with_balance("ETH", d("1"))
				.with_rate("ETH", "USDT", d("2000"))
				.with_fee(d("0.5"))
				.with_confirmation_polls(0),
		);
		let strategy = dex_swap(chain.clone());
		let mut order = LiquidityOrder::purchase(&request(usdt(), "100"));

		let submission = strategy.purchase_liquidity(&order).await.unwrap();
		assert_eq!(submission.swap_amount, d("0.05"));
		assert_eq!(chain.submitted_swaps().await, 1);
		order.submitted(submission.clone()).unwrap();

		assert!(strategy.is_transaction_complete(&submission.tx_id).await.unwrap());
		let settled = strategy.add_purchase_data(&order).await.unwrap();
		assert_eq!(settled.target_amount, d("100"));
		assert_eq!(settled.fee_amount, d("0.5"));
		assert_eq!(settled.fee_asset, eth());
	}

	#[tokio::test]
	async fn test_purchase_rejections() {
		let poor = Arc::new(
			SimulatedChain::new(Blockchain::Ethereum)
				.with_balance("ETH", d("0.01"))
				.with_rate("ETH", "USDT", d("2000")),
		);
		let order = LiquidityOrder::purchase(&request(usdt(), "100"));
		assert!(matches!(
			dex_swap(poor.clone()).purchase_liquidity(&order).await,
			Err(StrategyError::InsufficientLiquidity(_))
		));

		let moved = Arc::new(
			SimulatedChain::new(Blockchain::Ethereum)
				.with_balance("ETH", d("1"))
				.with_rate("ETH", "USDT", d("1800")),
		);
		assert!(matches!(
			dex_swap(moved.clone()).purchase_liquidity(&order).await,
			Err(StrategyError::PriceSlippage(_))
		));
		assert_eq!(poor.submitted_swaps().await + moved.submitted_swaps().await, 0);
	}

	#[tokio::test]
	async fn test_sell_returns_swap_asset() {
		let chain = Arc::new(
			SimulatedChain::new(Blockchain::Ethereum)
				.with_balance("USDT", d("500"))
				.with_rate("ETH", "USDT", d("2000"))
				.with_confirmation_polls(0),
		);
		let strategy = dex_swap(chain.clone());
		let mut order = LiquidityOrder::sale(&SellLiquidityRequest {
			context: LiquidityOrderContext::LiquidityManagement,
			correlation_id: "rebalance-1".to_string(),
			sell_asset: usdt(),
			sell_amount: d("200"),
			max_slippage: None,
		});

		let submission = strategy.sell_liquidity(&order).await.unwrap();
		order.submitted(submission.clone()).unwrap();
		assert!(strategy.is_transaction_complete(&submission.tx_id).await.unwrap());
		let settled = strategy.add_sell_data(&order).await.unwrap();
		assert_eq!(settled.target_amount, d("0.1"));
		assert_eq!(chain.balance("USDT").await, d("300"));
	}

	#[tokio::test]
	async fn test_sell_disabled_is_not_supported() {
		let chain = Arc::new(SimulatedChain::new(Blockchain::Ethereum));
		let strategy = DexSwapStrategy::new(
			DexSwapSettings {
				sell_enabled: false,
				..settings()
			},
			chain,
			pricing(),
		);
		let order = LiquidityOrder::sale(&SellLiquidityRequest {
			context: LiquidityOrderContext::LiquidityManagement,
			correlation_id: "rebalance-2".to_string(),
			sell_asset: usdt(),
			sell_amount: d("1"),
			max_slippage: None,
		});
		assert!(matches!(
			strategy.sell_liquidity(&order).await,
			Err(StrategyError::NotSupported { .. })
		));
	}

	#[test]
	fn test_create_strategy_from_config() {
		let mut chains = ChainRegistry::new();
		chains
			.register(Arc::new(SimulatedChain::new(Blockchain::Ethereum)))
			.unwrap();
		let config = toml::Value::Table(
			toml::from_str(
				r#"
implementation = "dex_swap"
blockchain = "ethereum"
asset_type = "token"
fee_asset = { name = "ETH", blockchain = "ethereum", asset_type = "coin" }
swap_asset = { name = "ETH", blockchain = "ethereum", asset_type = "coin" }
max_slippage = "0.01"
"#,
			)
			.unwrap(),
		);

		let strategy = create_strategy(&config, &chains, pricing()).unwrap();
		assert_eq!(
			strategy.key(),
			StrategyKey::new(Blockchain::Ethereum, Some(AssetType::Token), None)
		);
		assert_eq!(strategy.name(), "dex_swap:ethereum/token/*");

		let mut missing_chain = config.clone();
		if let Some(table) = missing_chain.as_table_mut() {
			table.insert(
				"blockchain".to_string(),
				toml::Value::String("polygon".to_string()),
			);
		}
		assert!(matches!(
			create_strategy(&missing_chain, &chains, pricing()),
			Err(StrategyError::Configuration(_))
		));
	}
}
