//! In-process simulated chain.
//!
//! Keeps account balances and swap rates in memory and confirms submitted
//! swaps after a configurable number of polls. Used for local runs and for
//! driving the securing scenarios in tests without a live network.

use crate::{ChainError, ChainInterface, NonceManager, SwapQuote};
use async_trait::async_trait;
use liquidity_types::{
	parse_decimal, Asset, Blockchain, ConfigSchema, Field, FieldType, Schema, ValidationError,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
enum SimulatedStatus {
	/// Number of polls still answered with "not confirmed".
	Pending(u32),
	Confirmed,
	Reverted,
}

#[derive(Debug, Clone)]
struct SimulatedTransaction {
	source: String,
	source_amount: Decimal,
	target: String,
	target_amount: Decimal,
	fee: Decimal,
	status: SimulatedStatus,
	revert: bool,
}

#[derive(Debug, Default)]
struct SimulatedState {
	balances: HashMap<String, Decimal>,
	rates: HashMap<(String, String), Decimal>,
	transactions: HashMap<String, SimulatedTransaction>,
	/// Confirmed or reverted transactions, i.e. the account's on-chain nonce.
	settled_count: u64,
	submitted_count: usize,
	revert_next: bool,
	lose_next_response: bool,
}

impl SimulatedState {
	fn rate(&self, source: &str, target: &str) -> Option<Decimal> {
		if source == target {
			return Some(Decimal::ONE);
		}
		let direct = self.rates.get(&(source.to_string(), target.to_string()));
		let inverse = self
			.rates
			.get(&(target.to_string(), source.to_string()))
			.and_then(|rate| Decimal::ONE.checked_div(*rate));
		direct.copied().or(inverse)
	}

	fn balance(&self, asset: &str) -> Decimal {
		self.balances.get(asset).copied().unwrap_or(Decimal::ZERO)
	}
}

/// Simulated chain account.
pub struct SimulatedChain {
	blockchain: Blockchain,
	state: Mutex<SimulatedState>,
	nonces: NonceManager,
	fee_per_swap: Decimal,
	price_impact: Decimal,
	confirmation_polls: u32,
}

impl SimulatedChain {
	pub fn new(blockchain: Blockchain) -> Self {
		Self {
			blockchain,
			state: Mutex::new(SimulatedState::default()),
			nonces: NonceManager::new(),
			fee_per_swap: Decimal::ZERO,
			price_impact: Decimal::ZERO,
			confirmation_polls: 0,
		}
	}

	pub fn with_balance(mut self, asset: &str, amount: Decimal) -> Self {
		self.state
			.get_mut()
			.balances
			.insert(asset.to_string(), amount);
		self
	}

	/// Sets the rate of `source` in units of `target`. The inverse direction is
	/// derived unless set explicitly.
	pub fn with_rate(mut self, source: &str, target: &str, rate: Decimal) -> Self {
		self.state
			.get_mut()
			.rates
			.insert((source.to_string(), target.to_string()), rate);
		self
	}

	/// Native-coin fee charged by every swap.
	pub fn with_fee(mut self, fee: Decimal) -> Self {
		self.fee_per_swap = fee;
		self
	}

	/// Fraction by which executed swaps undershoot the nominal rate.
	pub fn with_price_impact(mut self, impact: Decimal) -> Self {
		self.price_impact = impact;
		self
	}

	/// Number of polls a submitted swap stays unconfirmed.
	pub fn with_confirmation_polls(mut self, polls: u32) -> Self {
		self.confirmation_polls = polls;
		self
	}

	pub async fn set_balance(&self, asset: &str, amount: Decimal) {
		self.state
			.lock()
			.await
			.balances
			.insert(asset.to_string(), amount);
	}

	pub async fn balance(&self, asset: &str) -> Decimal {
		self.state.lock().await.balance(asset)
	}

	/// Makes the next submitted swap revert when it is confirmed.
	pub async fn revert_next_swap(&self) {
		self.state.lock().await.revert_next = true;
	}

	/// Accepts the next swap on chain but reports its outcome as unknown, as
	/// when the submission response is lost.
	pub async fn lose_next_swap_response(&self) {
		self.state.lock().await.lose_next_response = true;
	}

	/// Number of swaps accepted since creation.
	pub async fn submitted_swaps(&self) -> usize {
		self.state.lock().await.submitted_count
	}

	fn quoted_amount(&self, rate: Decimal, source_amount: Decimal) -> Result<Decimal, ChainError> {
		source_amount
			.checked_mul(rate)
			.and_then(|amount| amount.checked_mul(Decimal::ONE - self.price_impact))
			.ok_or_else(|| {
				ChainError::InvalidAmount(format!("swap of {} at rate {} overflows", source_amount, rate))
			})
	}
}

#[async_trait]
impl ChainInterface for SimulatedChain {
	fn blockchain(&self) -> Blockchain {
		self.blockchain
	}

	async fn get_balance(&self, asset: &Asset) -> Result<Decimal, ChainError> {
		Ok(self.state.lock().await.balance(&asset.name))
	}

	async fn quote_swap(
		&self,
		source: &Asset,
		source_amount: Decimal,
		target: &Asset,
		_max_slippage: Decimal,
	) -> Result<SwapQuote, ChainError> {
		let state = self.state.lock().await;
		let rate = state
			.rate(&source.name, &target.name)
			.ok_or_else(|| ChainError::NoRouteFound {
				from: source.name.clone(),
				to: target.name.clone(),
			})?;

		Ok(SwapQuote {
			target_amount: self.quoted_amount(rate, source_amount)?,
			fee_amount: self.fee_per_swap,
		})
	}

	async fn execute_swap(
		&self,
		source: &Asset,
		source_amount: Decimal,
		target: &Asset,
		max_slippage: Decimal,
	) -> Result<String, ChainError> {
		let lease = self.nonces.lease().await;
		let mut state = self.state.lock().await;

		let rate = state
			.rate(&source.name, &target.name)
			.ok_or_else(|| ChainError::NoRouteFound {
				from: source.name.clone(),
				to: target.name.clone(),
			})?;
		if self.price_impact > max_slippage {
			return Err(ChainError::SlippageExceeded(format!(
				"price impact {} above allowed {}",
				self.price_impact, max_slippage
			)));
		}
		let available = state.balance(&source.name);
		if available < source_amount {
			return Err(ChainError::InsufficientLiquidity(format!(
				"{} {} requested, {} available",
				source_amount, source.name, available
			)));
		}

		let target_amount = self.quoted_amount(rate, source_amount)?;

		let nonce = lease.nonce(state.settled_count);
		let tx_id = format!("{}-sim-{}", self.blockchain, nonce);
		state
			.balances
			.insert(source.name.clone(), available - source_amount);
		let revert = std::mem::take(&mut state.revert_next);
		let transaction = SimulatedTransaction {
			source: source.name.clone(),
			source_amount,
			target: target.name.clone(),
			target_amount,
			fee: self.fee_per_swap,
			status: SimulatedStatus::Pending(self.confirmation_polls),
			revert,
		};
		state.transactions.insert(tx_id.clone(), transaction);
		state.submitted_count += 1;
		lease.commit(nonce);

		if std::mem::take(&mut state.lose_next_response) {
			warn!(%tx_id, nonce, "Simulated swap accepted, response dropped");
			return Err(ChainError::SubmissionUnknown(format!(
				"response for nonce {} lost",
				nonce
			)));
		}

		info!(%tx_id, nonce, source = %source.name, target = %target.name, amount = %source_amount, "Simulated swap submitted");
		Ok(tx_id)
	}

	async fn is_transaction_complete(&self, tx_id: &str) -> Result<bool, ChainError> {
		let mut state = self.state.lock().await;
		let transaction = state
			.transactions
			.get(tx_id)
			.cloned()
			.ok_or_else(|| ChainError::TransactionNotFound(tx_id.to_string()))?;

		match transaction.status {
			SimulatedStatus::Confirmed => Ok(true),
			SimulatedStatus::Reverted => Err(ChainError::TransactionFailed {
				tx_id: tx_id.to_string(),
				reason: "execution reverted".to_string(),
			}),
			SimulatedStatus::Pending(remaining) if remaining > 0 => {
				if let Some(entry) = state.transactions.get_mut(tx_id) {
					entry.status = SimulatedStatus::Pending(remaining - 1);
				}
				debug!(tx_id, remaining, "Simulated transaction still pending");
				Ok(false)
			}
			SimulatedStatus::Pending(_) => {
				let (credited_asset, credited_amount) = if transaction.revert {
					(&transaction.source, transaction.source_amount)
				} else {
					(&transaction.target, transaction.target_amount)
				};
				let credited = state
					.balance(credited_asset)
					.checked_add(credited_amount)
					.ok_or_else(|| {
						ChainError::InvalidAmount(format!("{} balance overflows", credited_asset))
					})?;
				state.balances.insert(credited_asset.clone(), credited);
				state.settled_count += 1;

				if transaction.revert {
					if let Some(entry) = state.transactions.get_mut(tx_id) {
						entry.status = SimulatedStatus::Reverted;
					}
					return Err(ChainError::TransactionFailed {
						tx_id: tx_id.to_string(),
						reason: "execution reverted".to_string(),
					});
				}

				if let Some(entry) = state.transactions.get_mut(tx_id) {
					entry.status = SimulatedStatus::Confirmed;
				}
				debug!(tx_id, "Simulated transaction confirmed");
				Ok(true)
			}
		}
	}

	async fn get_swap_result(&self, tx_id: &str, asset: &Asset) -> Result<Decimal, ChainError> {
		let state = self.state.lock().await;
		let transaction = state
			.transactions
			.get(tx_id)
			.ok_or_else(|| ChainError::TransactionNotFound(tx_id.to_string()))?;
		if transaction.status != SimulatedStatus::Confirmed {
			return Err(ChainError::NotConfirmed(tx_id.to_string()));
		}

		if transaction.target == asset.name {
			Ok(transaction.target_amount)
		} else {
			Err(ChainError::MissingOutput {
				tx_id: tx_id.to_string(),
				asset: asset.name.clone(),
			})
		}
	}

	async fn get_transaction_fee(&self, tx_id: &str) -> Result<Decimal, ChainError> {
		let state = self.state.lock().await;
		state
			.transactions
			.get(tx_id)
			.map(|transaction| transaction.fee)
			.ok_or_else(|| ChainError::TransactionNotFound(tx_id.to_string()))
	}
}

/// Configuration schema for the simulated chain.
pub struct SimulatedChainSchema;

impl ConfigSchema for SimulatedChainSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("balances", FieldType::DecimalTable),
				Field::new("rates", FieldType::DecimalTable).with_validator(|value| {
					let table = value.as_table().ok_or("rates must be a table")?;
					match table.keys().find(|pair| pair.split_once('/').is_none()) {
						Some(pair) => Err(format!("rate key '{}' must look like SOURCE/TARGET", pair)),
						None => Ok(()),
					}
				}),
				Field::new(
					"fee_per_swap",
					FieldType::Decimal {
						min: Some(Decimal::ZERO),
					},
				),
				Field::new(
					"price_impact",
					FieldType::Decimal {
						min: Some(Decimal::ZERO),
					},
				),
				Field::new(
					"confirmation_polls",
					FieldType::Integer {
						min: Some(0),
						max: Some(1000),
					},
				),
			],
		);
		schema.validate(config)
	}
}

fn config_error(e: ValidationError) -> ChainError {
	ChainError::Configuration(e.to_string())
}

/// Factory function to create a simulated chain from configuration.
///
/// Configuration parameters:
/// - `balances`: table of asset name to starting balance
/// - `rates`: table of `"SOURCE/TARGET"` to rate
/// - `fee_per_swap`: native fee charged per swap (default: 0)
/// - `price_impact`: fraction lost on every swap (default: 0)
/// - `confirmation_polls`: polls before a swap confirms (default: 1)
pub fn create_chain(
	blockchain: Blockchain,
	config: &toml::Value,
) -> Result<Arc<dyn ChainInterface>, ChainError> {
	SimulatedChainSchema.validate(config).map_err(config_error)?;

	let mut chain = SimulatedChain::new(blockchain).with_confirmation_polls(1);
	if let Some(balances) = config.get("balances").and_then(|v| v.as_table()) {
		for (asset, amount) in balances {
			let amount = parse_decimal(asset, amount).map_err(config_error)?;
			chain = chain.with_balance(asset, amount);
		}
	}
	if let Some(rates) = config.get("rates").and_then(|v| v.as_table()) {
		for (pair, rate) in rates {
			let rate = parse_decimal(pair, rate).map_err(config_error)?;
			if let Some((source, target)) = pair.split_once('/') {
				chain = chain.with_rate(source, target, rate);
			}
		}
	}
	if let Some(fee) = config.get("fee_per_swap") {
		chain = chain.with_fee(parse_decimal("fee_per_swap", fee).map_err(config_error)?);
	}
	if let Some(impact) = config.get("price_impact") {
		chain = chain.with_price_impact(parse_decimal("price_impact", impact).map_err(config_error)?);
	}
	if let Some(polls) = config.get("confirmation_polls").and_then(|v| v.as_integer()) {
		chain = chain.with_confirmation_polls(polls as u32);
	}

	Ok(Arc::new(chain))
}
