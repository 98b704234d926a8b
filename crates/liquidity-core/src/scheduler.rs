//! Periodic trigger for the securing process.
//!
//! Ticks fire on a fixed interval. Each tick runs under the
//! `secure_liquidity` process lock, so a trigger that fires while the previous
//! tick is still working is skipped rather than queued.

use crate::process::{LockRegistry, ProcessFlags, SECURE_LIQUIDITY};
use crate::securing::{BatchSecuringService, SecuringReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
	Completed(SecuringReport),
	/// Another tick held the process lock.
	Skipped,
	/// Paused by an operator flag.
	Disabled,
	Failed(String),
}

pub struct Scheduler {
	service: Arc<BatchSecuringService>,
	locks: Arc<LockRegistry>,
	flags: Arc<ProcessFlags>,
	interval: Duration,
	lock_timeout: Duration,
	shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
	pub fn new(
		service: Arc<BatchSecuringService>,
		locks: Arc<LockRegistry>,
		flags: Arc<ProcessFlags>,
		interval: Duration,
		lock_timeout: Duration,
	) -> Self {
		let (shutdown_tx, _) = broadcast::channel(4);
		Self {
			service,
			locks,
			flags,
			interval,
			lock_timeout,
			shutdown_tx,
		}
	}

	pub fn flags(&self) -> &Arc<ProcessFlags> {
		&self.flags
	}

	/// Runs one tick unless the process is paused or already running.
	pub async fn run_tick(&self) -> TickOutcome {
		if !self.flags.is_enabled(SECURE_LIQUIDITY) {
			debug!(process = SECURE_LIQUIDITY, "Process disabled, skipping tick");
			return TickOutcome::Disabled;
		}
		let Some(_guard) = self.locks.try_acquire(SECURE_LIQUIDITY, self.lock_timeout) else {
			warn!(process = SECURE_LIQUIDITY, "Previous tick still running, skipping");
			return TickOutcome::Skipped;
		};

		match self.service.tick().await {
			Ok(report) => TickOutcome::Completed(report),
			Err(e) => {
				error!(process = SECURE_LIQUIDITY, error = %e, "Liquidity securing tick failed");
				TickOutcome::Failed(e.to_string())
			}
		}
	}

	/// Fires ticks until `shutdown` is called. Each tick runs on its own task
	/// so a slow tick never delays the trigger; overlap is resolved by the
	/// process lock.
	pub async fn run(self: Arc<Self>) {
		let mut shutdown = self.shutdown_tx.subscribe();
		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
		info!(
			interval_secs = self.interval.as_secs(),
			lock_timeout_secs = self.lock_timeout.as_secs(),
			"Scheduler started"
		);

		loop {
			tokio::select! {
				_ = ticker.tick() => {
					let scheduler = self.clone();
					tokio::spawn(async move {
						if let TickOutcome::Completed(report) = scheduler.run_tick().await {
							debug!(%report, "Tick completed");
						}
					});
				}
				_ = shutdown.recv() => {
					info!("Scheduler stopping");
					break;
				}
			}
		}

		// let a running tick persist its batches before returning
		if self.locks.is_locked(SECURE_LIQUIDITY) {
			info!("Waiting for running tick to finish");
			while self.locks.is_locked(SECURE_LIQUIDITY) {
				tokio::time::sleep(Duration::from_millis(100)).await;
			}
		}
		info!("Scheduler stopped");
	}

	pub fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());
	}
}
