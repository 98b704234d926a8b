//! Builds the engine components from configuration.

use anyhow::{Context, Result};
use liquidity_chain::{create_chain, ChainRegistry};
use liquidity_config::LiquidityConfig;
use liquidity_core::{
	BatchRepository, BatchSecuringService, DexService, LiquidityOrderLedger, LockRegistry,
	ProcessFlags, Scheduler, StrategyRegistry,
};
use liquidity_notification::{create_notification, NotificationService};
use liquidity_pricing::{create_pricing, PricingService};
use liquidity_storage::{create_storage, StorageService};
use liquidity_strategy::create_strategy;
use liquidity_types::Blockchain;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Fully wired engine.
pub struct Engine {
	pub scheduler: Arc<Scheduler>,
	pub dex: Arc<DexService>,
	pub strategies: Vec<String>,
	pub chains: Vec<Blockchain>,
}

pub fn build_engine(config: &LiquidityConfig) -> Result<Engine> {
	let backend = create_storage(&config.storage.implementation, &config.storage.settings())
		.context("Failed to create storage")?;
	let storage = Arc::new(StorageService::new(backend));

	let oracle = create_pricing(&config.pricing.implementation, &config.pricing.settings())
		.context("Failed to create price oracle")?;
	let pricing = Arc::new(PricingService::new(oracle));

	let sink = create_notification(
		&config.notification.implementation,
		&config.notification.settings(),
	)
	.context("Failed to create notification sink")?;
	let notifications = Arc::new(NotificationService::new(sink));

	let mut chains = ChainRegistry::new();
	for (blockchain, chain_config) in config.chains()? {
		let adapter = create_chain(&chain_config.implementation, blockchain, &chain_config.settings())
			.with_context(|| format!("Failed to create {} chain adapter", blockchain))?;
		chains.register(adapter)?;
		info!(%blockchain, implementation = %chain_config.implementation, "Chain adapter ready");
	}

	let strategies = config
		.strategies
		.iter()
		.enumerate()
		.map(|(index, strategy)| {
			create_strategy(strategy, &chains, pricing.clone())
				.with_context(|| format!("Failed to create strategies[{}]", index))
		})
		.collect::<Result<Vec<_>>>()?;
	let registry = Arc::new(StrategyRegistry::new(strategies)?);

	let ledger = Arc::new(LiquidityOrderLedger::new(storage.clone()));
	let dex = Arc::new(DexService::new(registry.clone(), ledger));
	let batches = Arc::new(BatchRepository::new(storage));
	let securing = Arc::new(BatchSecuringService::new(
		dex.clone(),
		batches,
		pricing,
		notifications,
	));

	let scheduler = Arc::new(Scheduler::new(
		securing,
		Arc::new(LockRegistry::new()),
		Arc::new(ProcessFlags::new(
			config.scheduler.disabled_processes.iter().cloned(),
		)),
		Duration::from_secs(config.scheduler.tick_interval_secs),
		Duration::from_secs(config.scheduler.lock_timeout_secs),
	));

	Ok(Engine {
		scheduler,
		dex,
		strategies: registry.names(),
		chains: chains.blockchains(),
	})
}
