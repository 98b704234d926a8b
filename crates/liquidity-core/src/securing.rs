//! Batch liquidity securing.
//!
//! One `tick` walks every pending and every created batch sequentially.
//! Pending batches are polled for their purchase result, created batches are
//! served from on-hand liquidity or get a purchase submitted. A batch's error
//! never leaves its own iteration: it is classified, logged, and the batch is
//! retried on the next tick from whatever state was last persisted.
//!
//! A purchase whose submission outcome is unknown still moves its batch to
//! pending: the swap may be on chain, so the batch waits on the order until
//! an operator abandons it.

use crate::batch::BatchRepository;
use crate::dex::DexService;
use crate::error::{CoreError, DexError, ErrorKind};
use liquidity_notification::NotificationService;
use liquidity_pricing::PricingService;
use liquidity_types::{
	BatchStatus, BuyCryptoBatch, LiquidityOrderContext, LiquidityRequest,
	LiquidityTransactionResult,
};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

const SLIPPAGE_SUBJECT: &str = "Price slippage detected while securing batch liquidity";
const UNRESOLVED_SUBJECT: &str =
	"Liquidity purchase submission outcome unknown, manual check required";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
	Secured,
	Pending,
	Unchanged,
	/// Purchase failed on chain, batch returned to `Created`.
	Reset,
	Failed,
}

impl fmt::Display for BatchOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			BatchOutcome::Secured => "secured",
			BatchOutcome::Pending => "pending",
			BatchOutcome::Unchanged => "unchanged",
			BatchOutcome::Reset => "reset",
			BatchOutcome::Failed => "failed",
		};
		f.write_str(name)
	}
}

/// Per-tick tally of batch outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecuringReport {
	pub secured: usize,
	pub pending: usize,
	pub unchanged: usize,
	pub reset: usize,
	pub failed: usize,
}

impl SecuringReport {
	fn record(&mut self, outcome: BatchOutcome) {
		match outcome {
			BatchOutcome::Secured => self.secured += 1,
			BatchOutcome::Pending => self.pending += 1,
			BatchOutcome::Unchanged => self.unchanged += 1,
			BatchOutcome::Reset => self.reset += 1,
			BatchOutcome::Failed => self.failed += 1,
		}
	}

	pub fn total(&self) -> usize {
		self.secured + self.pending + self.unchanged + self.reset + self.failed
	}
}

impl fmt::Display for SecuringReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} batches: {} secured, {} pending, {} unchanged, {} reset, {} failed",
			self.total(),
			self.secured,
			self.pending,
			self.unchanged,
			self.reset,
			self.failed
		)
	}
}

pub struct BatchSecuringService {
	dex: Arc<DexService>,
	batches: Arc<BatchRepository>,
	pricing: Arc<PricingService>,
	notifications: Arc<NotificationService>,
}

impl BatchSecuringService {
	pub fn new(
		dex: Arc<DexService>,
		batches: Arc<BatchRepository>,
		pricing: Arc<PricingService>,
		notifications: Arc<NotificationService>,
	) -> Self {
		Self {
			dex,
			batches,
			pricing,
			notifications,
		}
	}

	/// Runs one securing pass. Fails only when the batches cannot be loaded.
	pub async fn tick(&self) -> Result<SecuringReport, CoreError> {
		let started = Instant::now();
		let pending = self
			.batches
			.find_by_status(BatchStatus::PendingLiquidity)
			.await?;
		let created = self.batches.find_by_status(BatchStatus::Created).await?;
		let mut report = SecuringReport::default();

		for mut batch in pending {
			let outcome = match self.check_pending(&mut batch).await {
				Ok(outcome) => outcome,
				Err(e) => {
					error!(batch_id = %batch.id, asset = %batch.output_asset, error = %e, "Failed to check pending batch");
					BatchOutcome::Failed
				}
			};
			log_outcome(&batch, outcome);
			report.record(outcome);
		}

		for mut batch in created {
			let outcome = match self.secure_created(&mut batch).await {
				Ok(outcome) => outcome,
				Err(e) => {
					error!(
						batch_id = %batch.id,
						asset = %batch.output_asset,
						amount = %batch.output_reference_amount,
						reference_asset = %batch.output_reference_asset,
						error = %e,
						"Failed to secure batch"
					);
					BatchOutcome::Failed
				}
			};
			log_outcome(&batch, outcome);
			report.record(outcome);
		}

		info!(
			secured = report.secured,
			pending = report.pending,
			unchanged = report.unchanged,
			reset = report.reset,
			failed = report.failed,
			elapsed_ms = started.elapsed().as_millis() as u64,
			"Liquidity securing tick finished"
		);
		Ok(report)
	}

	async fn check_pending(&self, batch: &mut BuyCryptoBatch) -> Result<BatchOutcome, CoreError> {
		let result = match self
			.dex
			.fetch_liquidity_transaction_result(LiquidityOrderContext::BuyCrypto, &batch.id)
			.await
		{
			Ok(result) => result,
			Err(e @ DexError::OrderFailed { .. }) => {
				warn!(batch_id = %batch.id, error = %e, "Liquidity purchase failed, batch returns to created");
				batch.reset()?;
				self.batches.save(batch).await?;
				return Ok(BatchOutcome::Reset);
			}
			Err(e) => return self.unsecured(batch, e).await,
		};

		let fee = self.reference_fee(batch, &result).await?;
		batch.secure(result.target.amount, fee)?;
		self.batches.save(batch).await?;
		Ok(BatchOutcome::Secured)
	}

	async fn secure_created(&self, batch: &mut BuyCryptoBatch) -> Result<BatchOutcome, CoreError> {
		let request = LiquidityRequest {
			context: LiquidityOrderContext::BuyCrypto,
			correlation_id: batch.id.clone(),
			reference_asset: batch.output_reference_asset.clone(),
			reference_amount: batch.output_reference_amount,
			target_asset: batch.output_asset.clone(),
			max_slippage: None,
		};

		let reserved = match self.dex.reserve_liquidity(&request).await {
			Ok(amount) => amount,
			Err(DexError::NotEnoughLiquidity {
				available,
				required,
				..
			}) => {
				debug!(batch_id = %batch.id, %available, %required, "Not enough liquidity on hand, purchasing");
				Decimal::ZERO
			}
			Err(e) => return self.unsecured(batch, e).await,
		};

		if !reserved.is_zero() {
			batch.secure(reserved, Decimal::ZERO)?;
			self.batches.save(batch).await?;
			return Ok(BatchOutcome::Secured);
		}

		match self.dex.purchase_liquidity(&request).await {
			Ok(()) => {}
			Err(e) if e.kind() == ErrorKind::Unresolved => {
				error!(batch_id = %batch.id, error = %e, "Liquidity purchase outcome unknown");
				self.alert(batch, UNRESOLVED_SUBJECT, &e).await;
			}
			Err(e) => return self.unsecured(batch, e).await,
		}
		batch.pending()?;
		self.batches.save(batch).await?;
		Ok(BatchOutcome::Pending)
	}

	/// Applies the error taxonomy to a batch that could not advance.
	async fn unsecured(
		&self,
		batch: &BuyCryptoBatch,
		error: DexError,
	) -> Result<BatchOutcome, CoreError> {
		match error.kind() {
			ErrorKind::Transient => {
				debug!(batch_id = %batch.id, reason = %error, "Batch liquidity not ready");
				Ok(BatchOutcome::Unchanged)
			}
			ErrorKind::Slippage => {
				warn!(batch_id = %batch.id, error = %error, "Price slippage while securing batch");
				self.alert(batch, SLIPPAGE_SUBJECT, &error).await;
				Ok(BatchOutcome::Unchanged)
			}
			ErrorKind::Unresolved => {
				error!(batch_id = %batch.id, error = %error, "Liquidity order needs manual resolution");
				self.alert(batch, UNRESOLVED_SUBJECT, &error).await;
				Ok(BatchOutcome::Unchanged)
			}
			ErrorKind::Configuration | ErrorKind::Execution => Err(error.into()),
		}
	}

	async fn alert(&self, batch: &BuyCryptoBatch, subject: &str, error: &DexError) {
		let detail: &(dyn fmt::Display + Sync) = error;
		self.notifications
			.send_non_recoverable_error(&batch.id, subject, Some(detail))
			.await;
	}

	/// The batch's fee in its own reference asset. A conversion failure
	/// blocks securing for this tick.
	async fn reference_fee(
		&self,
		batch: &BuyCryptoBatch,
		result: &LiquidityTransactionResult,
	) -> Result<Decimal, CoreError> {
		if !result.target.asset.is_same(&batch.output_asset) {
			return Err(CoreError::Configuration(format!(
				"batch {} expects {} but liquidity was secured in {}",
				batch.id, batch.output_asset, result.target.asset
			)));
		}
		let fee = self
			.pricing
			.convert(
				result.fee.amount,
				&result.fee.asset,
				&batch.output_reference_asset,
			)
			.await?;
		Ok(fee)
	}
}

fn log_outcome(batch: &BuyCryptoBatch, outcome: BatchOutcome) {
	info!(
		batch_id = %batch.id,
		asset = %batch.output_asset,
		status = %batch.status,
		amount = ?batch.output_amount,
		fee = ?batch.fee,
		%outcome,
		"Batch processed"
	);
}
