//! Price oracle for the liquidity engine.
//!
//! The securing service converts realized purchase fees into a batch's
//! reference asset, and strategies compare swap quotes against a reference
//! price. Both go through `PricingService`.

use async_trait::async_trait;
use liquidity_types::Asset;
use rust_decimal::Decimal;
use thiserror::Error;

pub mod implementations {
	pub mod fixed;
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PricingError {
	#[error("No price available for {from}/{to}")]
	PriceNotFound { from: String, to: String },
	#[error("Invalid price for {pair}: {message}")]
	InvalidPrice { pair: String, message: String },
	#[error("Converting {amount} {from} into {to} overflows")]
	Overflow {
		from: String,
		to: String,
		amount: Decimal,
	},
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Source of exchange rates between assets.
#[async_trait]
pub trait PricingInterface: Send + Sync {
	/// Price of one unit of `from` expressed in units of `to`.
	async fn get_price(&self, from: &Asset, to: &Asset) -> Result<Decimal, PricingError>;
}

pub struct PricingService {
	implementation: Box<dyn PricingInterface>,
}

impl PricingService {
	pub fn new(implementation: Box<dyn PricingInterface>) -> Self {
		Self { implementation }
	}

	pub async fn get_price(&self, from: &Asset, to: &Asset) -> Result<Decimal, PricingError> {
		if from.name == to.name {
			return Ok(Decimal::ONE);
		}
		let price = self.implementation.get_price(from, to).await?;
		if price <= Decimal::ZERO {
			return Err(PricingError::InvalidPrice {
				pair: format!("{}/{}", from.name, to.name),
				message: format!("price {} is not positive", price),
			});
		}
		tracing::debug!(from = %from.name, to = %to.name, %price, "Resolved price");
		Ok(price)
	}

	/// Converts `amount` of `from` into `to`.
	pub async fn convert(
		&self,
		amount: Decimal,
		from: &Asset,
		to: &Asset,
	) -> Result<Decimal, PricingError> {
		if amount.is_zero() {
			return Ok(Decimal::ZERO);
		}
		let price = self.get_price(from, to).await?;
		amount
			.checked_mul(price)
			.ok_or_else(|| PricingError::Overflow {
				from: from.name.clone(),
				to: to.name.clone(),
				amount,
			})
	}
}

/// Creates a price oracle by implementation name.
///
/// Supported implementations: `fixed`.
pub fn create_pricing(
	implementation: &str,
	config: &toml::Value,
) -> Result<Box<dyn PricingInterface>, PricingError> {
	match implementation {
		"fixed" => implementations::fixed::create_pricing(config),
		other => Err(PricingError::Configuration(format!(
			"Unknown pricing implementation: {}",
			other
		))),
	}
}
