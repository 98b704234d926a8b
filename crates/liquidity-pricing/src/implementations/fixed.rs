//! Fixed rate table.
//!
//! Rates are configured as `"FROM/TO" = "rate"`. A missing pair is resolved
//! through its inverse, then through the pivot asset (`FROM/pivot` times
//! `pivot/TO`, each leg direct or inverse).

use crate::{PricingError, PricingInterface};
use async_trait::async_trait;
use liquidity_types::{
	parse_decimal, Asset, ConfigSchema, Field, FieldType, Schema, ValidationError,
};
use rust_decimal::Decimal;
use std::collections::HashMap;

pub struct FixedPricing {
	pivot: String,
	rates: HashMap<(String, String), Decimal>,
}

impl FixedPricing {
	pub fn new(pivot: impl Into<String>) -> Self {
		Self {
			pivot: pivot.into(),
			rates: HashMap::new(),
		}
	}

	pub fn with_rate(mut self, from: &str, to: &str, rate: Decimal) -> Self {
		self.rates.insert((from.to_string(), to.to_string()), rate);
		self
	}

	fn leg(&self, from: &str, to: &str) -> Option<Decimal> {
		if from == to {
			return Some(Decimal::ONE);
		}
		if let Some(rate) = self.rates.get(&(from.to_string(), to.to_string())) {
			return Some(*rate);
		}
		self.rates
			.get(&(to.to_string(), from.to_string()))
			.and_then(|rate| Decimal::ONE.checked_div(*rate))
	}

	fn resolve(&self, from: &str, to: &str) -> Option<Decimal> {
		self.leg(from, to).or_else(|| {
			let to_pivot = self.leg(from, &self.pivot)?;
			let from_pivot = self.leg(&self.pivot, to)?;
			to_pivot.checked_mul(from_pivot)
		})
	}
}

#[async_trait]
impl PricingInterface for FixedPricing {
	async fn get_price(&self, from: &Asset, to: &Asset) -> Result<Decimal, PricingError> {
		self.resolve(&from.name, &to.name)
			.ok_or_else(|| PricingError::PriceNotFound {
				from: from.name.clone(),
				to: to.name.clone(),
			})
	}
}

pub struct FixedPricingSchema;

impl ConfigSchema for FixedPricingSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![],
			vec![
				Field::new("pivot", FieldType::String),
				Field::new("rates", FieldType::DecimalTable),
			],
		)
		.validate(config)
	}
}

/// Factory function to create a fixed rate table.
///
/// Configuration parameters:
/// - `pivot`: asset used to bridge missing pairs (default: "USD")
/// - `rates`: table of `"FROM/TO"` to rate
pub fn create_pricing(config: &toml::Value) -> Result<Box<dyn PricingInterface>, PricingError> {
	FixedPricingSchema
		.validate(config)
		.map_err(|e| PricingError::Configuration(e.to_string()))?;

	let pivot = config.get("pivot").and_then(|v| v.as_str()).unwrap_or("USD");
	let mut pricing = FixedPricing::new(pivot);

	if let Some(rates) = config.get("rates").and_then(|v| v.as_table()) {
		for (pair, rate) in rates {
			let (from, to) = pair.split_once('/').ok_or_else(|| {
				PricingError::Configuration(format!("rate key '{}' must look like FROM/TO", pair))
			})?;
			let rate =
				parse_decimal(pair, rate).map_err(|e| PricingError::Configuration(e.to_string()))?;
			pricing = pricing.with_rate(from, to, rate);
		}
	}

	Ok(Box::new(pricing))
}

#[cfg(test)]
mod tests {
	use super::*;
	use liquidity_types::Blockchain;
	use std::str::FromStr;

	fn d(value: &str) -> Decimal {
		Decimal::from_str(value).unwrap()
	}

	fn asset(name: &str) -> Asset {
		Asset::token(name, Blockchain::Ethereum)
	}

	fn pricing() -> FixedPricing {
		FixedPricing::new("USD")
			.with_rate("ETH", "USD", d("2000"))
			.with_rate("EUR", "USD", d("1.25"))
	}

	#[tokio::test]
	async fn test_direct_inverse_and_pivot() {
		let pricing = pricing();
		assert_eq!(pricing.get_price(&asset("ETH"), &asset("USD")).await.unwrap(), d("2000"));
		assert_eq!(pricing.get_price(&asset("USD"), &asset("EUR")).await.unwrap(), d("0.8"));
		assert_eq!(pricing.get_price(&asset("ETH"), &asset("EUR")).await.unwrap(), d("1600"));
	}

	#[tokio::test]
	async fn test_unknown_pair() {
		assert!(matches!(
			pricing().get_price(&asset("BTC"), &asset("ETH")).await,
			Err(PricingError::PriceNotFound { .. })
		));
	}

	#[test]
	fn test_create_pricing_rejects_malformed_pairs() {
		let config = toml::Value::Table(toml::from_str("[rates]\nETHUSD = \"2000\"").unwrap());
		assert!(matches!(
			create_pricing(&config),
			Err(PricingError::Configuration(_))
		));
	}
}
