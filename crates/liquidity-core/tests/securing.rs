//! End-to-end securing scenarios over the simulated chain.

use async_trait::async_trait;
use liquidity_chain::implementations::simulated::SimulatedChain;
use liquidity_chain::{ChainError, ChainInterface, SwapQuote};
use liquidity_core::{
	BatchRepository, BatchSecuringService, DexService, LiquidityOrderLedger, LockRegistry,
	ProcessFlags, Scheduler, SecuringReport, StrategyRegistry, TickOutcome, SECURE_LIQUIDITY,
};
use liquidity_notification::{Notification, NotificationError, NotificationInterface, NotificationService};
use liquidity_pricing::implementations::fixed::FixedPricing;
use liquidity_pricing::PricingService;
use liquidity_storage::implementations::memory::MemoryStorage;
use liquidity_storage::StorageService;
use liquidity_strategy::implementations::dex_swap::{DexSwapSettings, DexSwapStrategy};
use liquidity_types::{
	Asset, AssetType, BatchStatus, BatchTransaction, Blockchain, BuyCryptoBatch, LiquidityOrder,
	LiquidityOrderContext, LiquidityOrderState, LiquidityOrderType, LiquidityRequest,
	SettledAmounts, SwapSubmission,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn d(value: &str) -> Decimal {
	Decimal::from_str(value).unwrap()
}

fn eth() -> Asset {
	Asset::coin("ETH", Blockchain::Ethereum)
}

fn usdt() -> Asset {
	Asset::token("USDT", Blockchain::Ethereum)
}

#[derive(Clone, Default)]
struct RecordingSink {
	sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSink {
	fn count(&self) -> usize {
		self.sent.lock().unwrap().len()
	}
}

#[async_trait]
impl NotificationInterface for RecordingSink {
	async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
		self.sent.lock().unwrap().push(notification.clone());
		Ok(())
	}
}

/// Delays balance reads so a tick stays in flight.
struct SlowChain {
	inner: SimulatedChain,
	delay: Duration,
}

#[async_trait]
impl ChainInterface for SlowChain {
	fn blockchain(&self) -> Blockchain {
		self.inner.blockchain()
	}

	async fn get_balance(&self, asset: &Asset) -> Result<Decimal, ChainError> {
		tokio::time::sleep(self.delay).await;
		self.inner.get_balance(asset).await
	}

	async fn quote_swap(
		&self,
		source: &Asset,
		source_amount: Decimal,
		target: &Asset,
		max_slippage: Decimal,
	) -> Result<SwapQuote, ChainError> {
		self.inner
			.quote_swap(source, source_amount, target, max_slippage)
			.await
	}

	async fn execute_swap(
		&self,
		source: &Asset,
		source_amount: Decimal,
		target: &Asset,
		max_slippage: Decimal,
	) -> Result<String, ChainError> {
		self.inner
			.execute_swap(source, source_amount, target, max_slippage)
			.await
	}

	async fn is_transaction_complete(&self, tx_id: &str) -> Result<bool, ChainError> {
		self.inner.is_transaction_complete(tx_id).await
	}

	async fn get_swap_result(&self, tx_id: &str, asset: &Asset) -> Result<Decimal, ChainError> {
		self.inner.get_swap_result(tx_id, asset).await
	}

	async fn get_transaction_fee(&self, tx_id: &str) -> Result<Decimal, ChainError> {
		self.inner.get_transaction_fee(tx_id).await
	}
}

struct Harness {
	scheduler: Arc<Scheduler>,
	dex: Arc<DexService>,
	batches: Arc<BatchRepository>,
	sink: RecordingSink,
}

impl Harness {
	fn new(chain: Arc<dyn ChainInterface>) -> Self {
		Self::with_fee_asset(chain, eth())
	}

	fn with_fee_asset(chain: Arc<dyn ChainInterface>, fee_asset: Asset) -> Self {
		let pricing = Arc::new(PricingService::new(Box::new(
			FixedPricing::new("USD")
				.with_rate("ETH", "USD", d("2000"))
				.with_rate("USDT", "USD", d("1"))
				.with_rate("EUR", "USD", d("2")),
		)));
		let strategy = DexSwapStrategy::new(
			DexSwapSettings {
				blockchain: Blockchain::Ethereum,
				asset_type: Some(AssetType::Token),
				asset_category: None,
				fee_asset,
				swap_asset: eth(),
				max_slippage: Decimal::ZERO,
				price_tolerance: d("0.03"),
				sell_enabled: false,
			},
			chain,
			pricing.clone(),
		);
		let registry = Arc::new(StrategyRegistry::new(vec![Arc::new(strategy)]).unwrap());
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let dex = Arc::new(DexService::new(
			registry,
			Arc::new(LiquidityOrderLedger::new(storage.clone())),
		));
		let batches = Arc::new(BatchRepository::new(storage));
		let sink = RecordingSink::default();
		let notifications = Arc::new(NotificationService::new(Box::new(sink.clone())));

		let service = Arc::new(BatchSecuringService::new(
			dex.clone(),
			batches.clone(),
			pricing,
			notifications,
		));
		let scheduler = Arc::new(Scheduler::new(
			service,
			Arc::new(LockRegistry::new()),
			Arc::new(ProcessFlags::default()),
			Duration::from_secs(60),
			Duration::from_secs(1800),
		));

		Self {
			scheduler,
			dex,
			batches,
			sink,
		}
	}

	async fn add_batch(&self, id: &str) -> BuyCryptoBatch {
		self.add_batch_of(id, usdt(), ["60", "40"]).await
	}

	async fn add_batch_of(&self, id: &str, reference: Asset, amounts: [&str; 2]) -> BuyCryptoBatch {
		let batch = BuyCryptoBatch::new(
			id,
			usdt(),
			reference,
			vec![
				BatchTransaction::new(format!("{id}-1"), d(amounts[0])),
				BatchTransaction::new(format!("{id}-2"), d(amounts[1])),
			],
		)
		.unwrap();
		self.batches.save(&batch).await.unwrap();
		batch
	}

	async fn orders(&self, id: &str) -> Vec<LiquidityOrder> {
		self.dex
			.ledger()
			.find_by_correlation(LiquidityOrderContext::BuyCrypto, id)
			.await
			.unwrap()
	}

	async fn batch(&self, id: &str) -> BuyCryptoBatch {
		self.batches.get(id).await.unwrap()
	}

	async fn tick(&self) -> SecuringReport {
		match self.scheduler.run_tick().await {
			TickOutcome::Completed(report) => report,
			other => panic!("tick did not complete: {other:?}"),
		}
	}
}

fn chain() -> SimulatedChain {
	SimulatedChain::new(Blockchain::Ethereum)
		.with_balance("ETH", d("1"))
		.with_rate("ETH", "USDT", d("2000"))
		.with_fee(d("0.5"))
		.with_confirmation_polls(1)
}

#[tokio::test]
async fn test_on_hand_liquidity_secures_in_same_tick() {
	let chain = Arc::new(chain().with_balance("USDT", d("150")));
	let harness = Harness::new(chain.clone());
	harness.add_batch("a").await;

	let report = harness.tick().await;
	assert_eq!(report.secured, 1);

	let batch = harness.batch("a").await;
	assert_eq!(batch.status, BatchStatus::Secured);
	assert_eq!(batch.output_amount, Some(d("100")));
	assert_eq!(batch.fee, Some(Decimal::ZERO));
	assert_eq!(batch.transactions[0].output_amount, Some(d("60")));
	assert_eq!(batch.transactions[1].output_amount, Some(d("40")));
	assert_eq!(chain.submitted_swaps().await, 0);
}

#[tokio::test]
async fn test_purchase_secures_after_confirmation() {
	let chain = Arc::new(chain());
	let harness = Harness::new(chain.clone());
	harness.add_batch("b").await;

	let first = harness.tick().await;
	assert_eq!(first.pending, 1);
	assert_eq!(harness.batch("b").await.status, BatchStatus::PendingLiquidity);
	assert_eq!(chain.submitted_swaps().await, 1);

	let second = harness.tick().await;
	assert_eq!(second.unchanged, 1);
	assert_eq!(harness.batch("b").await.status, BatchStatus::PendingLiquidity);

	let third = harness.tick().await;
	assert_eq!(third.secured, 1);
	let batch = harness.batch("b").await;
	assert_eq!(batch.status, BatchStatus::Secured);
	assert_eq!(batch.output_amount, Some(d("100")));
	// 0.5 ETH of gas at 2000 USDT per ETH
	assert_eq!(batch.fee, Some(d("1000")));
	assert_eq!(batch.transactions[0].fee, Some(d("600")));

	let result = harness
		.dex
		.fetch_liquidity_transaction_result(LiquidityOrderContext::BuyCrypto, "b")
		.await
		.unwrap();
	assert_eq!(result.fee.amount, d("0.5"));
	assert_eq!(result.fee.asset, eth());

	// later ticks leave the secured batch alone
	assert_eq!(harness.tick().await.total(), 0);
	assert_eq!(chain.submitted_swaps().await, 1);
}

#[tokio::test]
async fn test_price_slippage_notifies_and_keeps_batch_created() {
	let chain = Arc::new(chain().with_price_impact(d("0.1")));
	let harness = Harness::new(chain.clone());
	harness.add_batch("c").await;

	let report = harness.tick().await;
	assert_eq!(report.unchanged, 1);
	assert_eq!(harness.sink.count(), 1);
	assert_eq!(harness.batch("c").await.status, BatchStatus::Created);
	assert_eq!(chain.submitted_swaps().await, 0);

	let ledger = harness.dex.ledger();
	assert!(ledger
		.find_active(LiquidityOrderContext::BuyCrypto, "c")
		.await
		.unwrap()
		.is_none());
	let latest = ledger
		.find_latest(LiquidityOrderContext::BuyCrypto, "c")
		.await
		.unwrap()
		.unwrap();
	assert_eq!(latest.state, LiquidityOrderState::Failed);

	// one notification per occurrence
	harness.tick().await;
	assert_eq!(harness.sink.count(), 2);
}

#[tokio::test]
async fn test_overlapping_ticks_are_skipped() {
	let chain = Arc::new(SlowChain {
		inner: chain().with_balance("USDT", d("150")),
		delay: Duration::from_millis(200),
	});
	let harness = Harness::new(chain);
	harness.add_batch("d").await;

	let (first, second) = tokio::join!(harness.scheduler.run_tick(), harness.scheduler.run_tick());
	assert!(matches!(first, TickOutcome::Completed(ref report) if report.secured == 1));
	assert_eq!(second, TickOutcome::Skipped);

	// the lock is released once the tick finishes
	assert!(matches!(harness.scheduler.run_tick().await, TickOutcome::Completed(_)));
}

#[tokio::test]
async fn test_disabled_process_does_not_tick() {
	let harness = Harness::new(Arc::new(chain().with_balance("USDT", d("150"))));
	harness.add_batch("e").await;

	harness.scheduler.flags().disable(SECURE_LIQUIDITY);
	assert_eq!(harness.scheduler.run_tick().await, TickOutcome::Disabled);
	assert_eq!(harness.batch("e").await.status, BatchStatus::Created);

	harness.scheduler.flags().enable(SECURE_LIQUIDITY);
	assert_eq!(harness.tick().await.secured, 1);
}

#[tokio::test]
async fn test_reverted_purchase_resets_batch() {
	let chain = Arc::new(chain());
	let harness = Harness::new(chain.clone());
	harness.add_batch("f").await;

	chain.revert_next_swap().await;
	assert_eq!(harness.tick().await.pending, 1);
	assert_eq!(harness.tick().await.unchanged, 1);
	assert_eq!(harness.tick().await.reset, 1);
	assert_eq!(harness.batch("f").await.status, BatchStatus::Created);
	assert_eq!(chain.balance("ETH").await, d("1"));

	// the next tick buys again
	assert_eq!(harness.tick().await.pending, 1);
	assert_eq!(chain.submitted_swaps().await, 2);
}

#[tokio::test]
async fn test_one_failing_batch_does_not_block_others() {
	let chain = Arc::new(chain().with_balance("USDT", d("150")));
	let harness = Harness::new(chain);

	// no strategy serves bitcoin
	let btc = Asset::coin("BTC", Blockchain::Bitcoin);
	let orphan = BuyCryptoBatch::new(
		"orphan",
		btc.clone(),
		btc,
		vec![BatchTransaction::new("orphan-1", d("1"))],
	)
	.unwrap();
	harness.batches.save(&orphan).await.unwrap();
	harness.add_batch("g").await;

	let report = harness.tick().await;
	assert_eq!(report.failed, 1);
	assert_eq!(report.secured, 1);
	assert_eq!(harness.batch("orphan").await.status, BatchStatus::Created);
	assert_eq!(harness.batch("g").await.status, BatchStatus::Secured);
}

#[tokio::test]
async fn test_tick_runs_on_spawned_task() {
	let harness = Harness::new(Arc::new(chain().with_balance("USDT", d("150"))));
	harness.add_batch("spawned").await;

	let scheduler = harness.scheduler.clone();
	let outcome = tokio::spawn(async move { scheduler.run_tick().await })
		.await
		.unwrap();
	assert!(matches!(outcome, TickOutcome::Completed(ref report) if report.secured == 1));
}

#[tokio::test]
async fn test_slippage_on_reservation_notifies_and_keeps_batch_created() {
	let chain = Arc::new(
		chain()
			.with_balance("USDT", d("150"))
			.with_price_impact(d("0.1")),
	);
	let harness = Harness::new(chain.clone());
	harness.add_batch_of("quoted", eth(), ["0.03", "0.02"]).await;

	for notified in 1..=2 {
		let report = harness.tick().await;
		assert_eq!(report.unchanged, 1);
		assert_eq!(harness.sink.count(), notified);
		assert_eq!(harness.batch("quoted").await.status, BatchStatus::Created);
	}

	// the reservation is retried in place and nothing reaches the chain
	let orders = harness.orders("quoted").await;
	assert_eq!(orders.len(), 1);
	assert_eq!(orders[0].order_type, LiquidityOrderType::Reservation);
	assert_eq!(orders[0].state, LiquidityOrderState::Failed);
	assert_eq!(chain.submitted_swaps().await, 0);
}

#[tokio::test]
async fn test_unpriced_fee_keeps_batch_pending() {
	let gas = Asset::coin("GAS", Blockchain::Ethereum);
	let chain = Arc::new(chain());
	let harness = Harness::with_fee_asset(chain.clone(), gas);
	harness.add_batch("gas").await;

	assert_eq!(harness.tick().await.pending, 1);
	assert_eq!(harness.tick().await.unchanged, 1);
	for _ in 0..2 {
		assert_eq!(harness.tick().await.failed, 1);
		let batch = harness.batch("gas").await;
		assert_eq!(batch.status, BatchStatus::PendingLiquidity);
		assert_eq!(batch.output_amount, None);
	}
	assert_eq!(chain.submitted_swaps().await, 1);
}

#[tokio::test]
async fn test_liquidity_in_wrong_asset_is_refused() {
	let harness = Harness::new(Arc::new(chain()));
	let mut batch = harness.add_batch("mismatch").await;
	batch.pending().unwrap();
	harness.batches.save(&batch).await.unwrap();

	let dai = Asset::token("DAI", Blockchain::Ethereum);
	let mut order = LiquidityOrder::purchase(&LiquidityRequest {
		context: LiquidityOrderContext::BuyCrypto,
		correlation_id: "mismatch".to_string(),
		reference_asset: usdt(),
		reference_amount: d("100"),
		target_asset: dai.clone(),
		max_slippage: None,
	});
	order
		.submitted(SwapSubmission {
			tx_id: "0xdai".to_string(),
			swap_asset: eth(),
			swap_amount: d("0.05"),
		})
		.unwrap();
	order
		.settled(SettledAmounts {
			target_amount: d("100"),
			fee_amount: d("0.01"),
			fee_asset: eth(),
		})
		.unwrap();
	harness.dex.ledger().save(&order).await.unwrap();

	assert_eq!(harness.tick().await.failed, 1);
	let batch = harness.batch("mismatch").await;
	assert_eq!(batch.status, BatchStatus::PendingLiquidity);
	assert_eq!(batch.output_amount, None);
}

#[tokio::test]
async fn test_overflowing_batch_fails_alone() {
	let harness = Harness::new(Arc::new(chain().with_balance("USDT", d("150"))));
	let eur = Asset::token("EUR", Blockchain::Ethereum);
	harness
		.add_batch_of("huge", eur, ["20000000000000000000000000000", "20000000000000000000000000000"])
		.await;
	harness.add_batch("normal").await;

	let report = harness.tick().await;
	assert_eq!(report.failed, 1);
	assert_eq!(report.secured, 1);
	assert_eq!(harness.batch("huge").await.status, BatchStatus::Created);
	assert_eq!(harness.batch("normal").await.status, BatchStatus::Secured);
}

#[tokio::test]
async fn test_unknown_submission_alerts_and_waits_for_operator() {
	let chain = Arc::new(chain());
	let harness = Harness::new(chain.clone());
	harness.add_batch("lost").await;

	chain.lose_next_swap_response().await;
	assert_eq!(harness.tick().await.pending, 1);
	assert_eq!(harness.sink.count(), 1);
	assert_eq!(harness.batch("lost").await.status, BatchStatus::PendingLiquidity);

	// blocked while the order has no transaction id
	assert_eq!(harness.tick().await.unchanged, 1);
	assert_eq!(chain.submitted_swaps().await, 1);
	let orders = harness.orders("lost").await;
	assert_eq!(orders.len(), 1);
	assert_eq!(orders[0].state, LiquidityOrderState::InProgress);
	assert_eq!(orders[0].chain_tx_id, None);

	assert!(harness
		.dex
		.abandon_order(LiquidityOrderContext::BuyCrypto, "lost", "swap not found on chain")
		.await
		.unwrap());
	assert_eq!(harness.tick().await.reset, 1);
	assert_eq!(harness.tick().await.pending, 1);
	assert_eq!(chain.submitted_swaps().await, 2);
	assert_eq!(harness.sink.count(), 1);
}
