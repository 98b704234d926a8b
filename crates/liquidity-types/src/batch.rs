//! Customer purchase batches.
//!
//! A batch groups the customer purchase transactions that share one
//! `(output_asset, output_reference_asset)` pair. The securing service moves a
//! batch from `Created` to `Secured`, either directly when on-hand liquidity
//! covers it or through `PendingLiquidity` while a purchase swap confirms.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{Asset, AMOUNT_DECIMALS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
	Created,
	PendingLiquidity,
	Secured,
}

impl fmt::Display for BatchStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			BatchStatus::Created => "created",
			BatchStatus::PendingLiquidity => "pending_liquidity",
			BatchStatus::Secured => "secured",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Error, PartialEq)]
pub enum BatchError {
	#[error("Cannot {action} batch {batch_id} in status {status}")]
	InvalidTransition {
		batch_id: String,
		status: BatchStatus,
		action: &'static str,
	},
	#[error("Negative {field} {value} for batch {batch_id}")]
	NegativeAmount {
		batch_id: String,
		field: &'static str,
		value: Decimal,
	},
	#[error("Batch {0} has no transactions")]
	Empty(String),
	#[error("Amounts of batch {batch_id} overflow while computing the {field}")]
	Overflow {
		batch_id: String,
		field: &'static str,
	},
}

/// A single customer purchase inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTransaction {
	pub id: String,
	/// Requested amount expressed in the batch's reference asset.
	pub output_reference_amount: Decimal,
	/// Share of the secured amount, in the batch's output asset.
	pub output_amount: Option<Decimal>,
	/// Share of the purchase fee, in the batch's reference asset.
	pub fee: Option<Decimal>,
}

impl BatchTransaction {
	pub fn new(id: impl Into<String>, output_reference_amount: Decimal) -> Self {
		Self {
			id: id.into(),
			output_reference_amount,
			output_amount: None,
			fee: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyCryptoBatch {
	pub id: String,
	pub status: BatchStatus,
	pub output_asset: Asset,
	pub output_reference_asset: Asset,
	pub output_reference_amount: Decimal,
	/// Secured amount in `output_asset`.
	pub output_amount: Option<Decimal>,
	/// Purchase fee in `output_reference_asset`.
	pub fee: Option<Decimal>,
	pub transactions: Vec<BatchTransaction>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl BuyCryptoBatch {
	/// Creates a batch whose requested reference amount is the sum of its
	/// transactions.
	pub fn new(
		id: impl Into<String>,
		output_asset: Asset,
		output_reference_asset: Asset,
		transactions: Vec<BatchTransaction>,
	) -> Result<Self, BatchError> {
		let id = id.into();
		if transactions.is_empty() {
			return Err(BatchError::Empty(id));
		}
		let output_reference_amount = transactions
			.iter()
			.try_fold(Decimal::ZERO, |total, tx| {
				total.checked_add(tx.output_reference_amount)
			})
			.ok_or_else(|| BatchError::Overflow {
				batch_id: id.clone(),
				field: "reference amount",
			})?;
		let now = Utc::now();

		Ok(Self {
			id,
			status: BatchStatus::Created,
			output_asset,
			output_reference_asset,
			output_reference_amount,
			output_amount: None,
			fee: None,
			transactions,
			created_at: now,
			updated_at: now,
		})
	}

	fn rejected(&self, action: &'static str) -> BatchError {
		BatchError::InvalidTransition {
			batch_id: self.id.clone(),
			status: self.status,
			action,
		}
	}

	/// Marks the batch as waiting for a submitted purchase to confirm.
	pub fn pending(&mut self) -> Result<(), BatchError> {
		if self.status != BatchStatus::Created {
			return Err(self.rejected("mark pending"));
		}
		self.status = BatchStatus::PendingLiquidity;
		self.updated_at = Utc::now();
		Ok(())
	}

	/// Returns a pending batch to `Created` after its purchase failed.
	pub fn reset(&mut self) -> Result<(), BatchError> {
		if self.status != BatchStatus::PendingLiquidity {
			return Err(self.rejected("reset"));
		}
		self.status = BatchStatus::Created;
		self.updated_at = Utc::now();
		Ok(())
	}

	/// Secures the batch with `amount` of the output asset and `fee` in the
	/// reference asset, splitting both across the transactions pro rata.
	pub fn secure(&mut self, amount: Decimal, fee: Decimal) -> Result<(), BatchError> {
		if self.status == BatchStatus::Secured {
			return Err(self.rejected("secure"));
		}
		if amount < Decimal::ZERO {
			return Err(BatchError::NegativeAmount {
				batch_id: self.id.clone(),
				field: "output amount",
				value: amount,
			});
		}
		if fee < Decimal::ZERO {
			return Err(BatchError::NegativeAmount {
				batch_id: self.id.clone(),
				field: "fee",
				value: fee,
			});
		}

		let amounts = self.split(amount, "output amount")?;
		let fees = self.split(fee, "fee")?;
		for ((tx, amount), fee) in self.transactions.iter_mut().zip(amounts).zip(fees) {
			tx.output_amount = Some(amount);
			tx.fee = Some(fee);
		}

		self.output_amount = Some(amount);
		self.fee = Some(fee);
		self.status = BatchStatus::Secured;
		self.updated_at = Utc::now();
		Ok(())
	}

	/// Splits `total` by reference-amount weight. Shares are rounded toward
	/// zero and the last transaction takes the remainder, so the parts always
	/// sum to `total` and none is negative.
	fn split(&self, total: Decimal, field: &'static str) -> Result<Vec<Decimal>, BatchError> {
		let overflow = || BatchError::Overflow {
			batch_id: self.id.clone(),
			field,
		};
		let count = self.transactions.len();
		let weight = self.output_reference_amount;
		let mut parts = Vec::with_capacity(count);
		let mut assigned = Decimal::ZERO;

		for tx in self.transactions.iter().take(count.saturating_sub(1)) {
			let part = if weight.is_zero() {
				Decimal::ZERO
			} else {
				total
					.checked_mul(tx.output_reference_amount)
					.and_then(|share| share.checked_div(weight))
					.ok_or_else(overflow)?
					.round_dp_with_strategy(AMOUNT_DECIMALS, RoundingStrategy::ToZero)
			};
			assigned = assigned.checked_add(part).ok_or_else(overflow)?;
			parts.push(part);
		}
		parts.push(total.checked_sub(assigned).ok_or_else(overflow)?);
		Ok(parts)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Blockchain;
	use std::str::FromStr;

	fn d(value: &str) -> Decimal {
		Decimal::from_str(value).unwrap()
	}

	fn batch() -> BuyCryptoBatch {
		BuyCryptoBatch::new(
			"7",
			Asset::token("USDT", Blockchain::Ethereum),
			Asset::coin("ETH", Blockchain::Ethereum),
			vec![
				BatchTransaction::new("a", d("1")),
				BatchTransaction::new("b", d("1")),
				BatchTransaction::new("c", d("1")),
			],
		)
		.unwrap()
	}

	#[test]
	fn test_reference_amount_is_sum_of_transactions() {
		assert_eq!(batch().output_reference_amount, d("3"));
		assert!(matches!(
			BuyCryptoBatch::new(
				"8",
				Asset::token("USDT", Blockchain::Ethereum),
				Asset::coin("ETH", Blockchain::Ethereum),
				vec![]
			),
			Err(BatchError::Empty(_))
		));
	}

	#[test]
	fn test_secure_distributes_exactly() {
		let mut batch = batch();
		batch.secure(d("100"), d("0.5")).unwrap();

		let amounts: Vec<Decimal> = batch
			.transactions
			.iter()
			.map(|tx| tx.output_amount.unwrap())
			.collect();
		assert_eq!(amounts[0], d("33.33333333"));
		assert_eq!(amounts.iter().copied().sum::<Decimal>(), d("100"));

		let fees: Decimal = batch.transactions.iter().map(|tx| tx.fee.unwrap()).sum();
		assert_eq!(fees, d("0.5"));
		assert_eq!(batch.status, BatchStatus::Secured);
	}

	#[test]
	fn test_secure_only_once() {
		let mut batch = batch();
		batch.pending().unwrap();
		batch.secure(d("10"), Decimal::ZERO).unwrap();
		assert!(matches!(
			batch.secure(d("10"), Decimal::ZERO),
			Err(BatchError::InvalidTransition { .. })
		));
	}

	#[test]
	fn test_secure_rejects_negative_amounts() {
		let mut batch = batch();
		assert!(matches!(
			batch.secure(d("-1"), Decimal::ZERO),
			Err(BatchError::NegativeAmount { .. })
		));
		assert!(matches!(
			batch.secure(d("1"), d("-0.1")),
			Err(BatchError::NegativeAmount { .. })
		));
		assert_eq!(batch.status, BatchStatus::Created);
	}

	#[test]
	fn test_overflowing_amounts_are_rejected() {
		let huge = Decimal::MAX;
		let usdt = Asset::token("USDT", Blockchain::Ethereum);
		assert!(matches!(
			BuyCryptoBatch::new(
				"9",
				usdt.clone(),
				usdt.clone(),
				vec![BatchTransaction::new("a", huge), BatchTransaction::new("b", huge)],
			),
			Err(BatchError::Overflow { .. })
		));

		let mut batch = BuyCryptoBatch::new(
			"10",
			usdt.clone(),
			usdt,
			vec![BatchTransaction::new("a", d("60")), BatchTransaction::new("b", d("40"))],
		)
		.unwrap();
		assert!(matches!(
			batch.secure(huge, Decimal::ZERO),
			Err(BatchError::Overflow { .. })
		));
		assert_eq!(batch.status, BatchStatus::Created);
		assert!(batch.transactions.iter().all(|tx| tx.output_amount.is_none()));
	}

	#[test]
	fn test_reset_requires_pending() {
		let mut batch = batch();
		assert!(batch.reset().is_err());
		batch.pending().unwrap();
		batch.reset().unwrap();
		assert_eq!(batch.status, BatchStatus::Created);
	}
}
