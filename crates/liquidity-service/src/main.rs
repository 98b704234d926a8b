use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use liquidity_config::{ConfigLoader, LiquidityConfig, LogFormat};
use liquidity_core::TickOutcome;
use liquidity_types::LiquidityOrderContext;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod factory;

#[derive(Parser)]
#[command(name = "liquidity-engine")]
#[command(about = "Batch liquidity securing engine", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/local.toml")]
	config: PathBuf,

	/// Overrides `service.log_level` from the configuration
	#[arg(long, env = "LIQUIDITY_LOG_LEVEL")]
	log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
	/// Run the securing scheduler until interrupted
	Start,
	/// Validate the configuration file
	Validate,
	/// Run a single securing tick and exit
	Tick,
	/// Release the liquidity held for a correlation id once it is consumed
	Release {
		#[arg(long)]
		context: LiquidityOrderContext,
		#[arg(long)]
		correlation_id: String,
	},
	/// Fail an in-flight order whose swap was confirmed to never reach the chain
	Abandon {
		#[arg(long)]
		context: LiquidityOrderContext,
		#[arg(long)]
		correlation_id: String,
		#[arg(long)]
		reason: String,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

	let log_level = cli
		.log_level
		.clone()
		.unwrap_or_else(|| config.service.log_level.clone());
	setup_tracing(&log_level, config.service.log_format)?;

	match cli.command {
		Some(Commands::Start) | None => start_service(config).await,
		Some(Commands::Validate) => validate_config(&cli, config),
		Some(Commands::Tick) => run_single_tick(config).await,
		Some(Commands::Release {
			context,
			correlation_id,
		}) => release_liquidity(config, context, &correlation_id).await,
		Some(Commands::Abandon {
			context,
			correlation_id,
			reason,
		}) => abandon_order(config, context, &correlation_id, &reason).await,
	}
}

async fn start_service(config: LiquidityConfig) -> Result<()> {
	info!(name = %config.service.name, "Starting liquidity engine");

	let engine = factory::build_engine(&config).context("Failed to build engine")?;
	info!(
		chains = engine.chains.len(),
		strategies = engine.strategies.len(),
		tick_interval_secs = config.scheduler.tick_interval_secs,
		"Engine ready"
	);

	let scheduler = engine.scheduler.clone();
	let handle = tokio::spawn(scheduler.clone().run());

	shutdown_signal().await;
	info!("Shutdown signal received, stopping scheduler...");

	scheduler.shutdown();
	handle.await.context("Scheduler task failed")?;

	info!("Liquidity engine stopped");
	Ok(())
}

fn validate_config(cli: &Cli, config: LiquidityConfig) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let engine = factory::build_engine(&config).context("Failed to build engine")?;

	info!("Configuration is valid");
	info!("Service name: {}", config.service.name);
	info!("Storage: {}", config.storage.implementation);
	info!("Price oracle: {}", config.pricing.implementation);
	info!("Notifications: {}", config.notification.implementation);
	for (blockchain, chain) in config.chains()? {
		info!("  Chain: {} ({})", blockchain, chain.implementation);
	}
	for name in &engine.strategies {
		info!("  Strategy: {}", name);
	}
	for process in &config.scheduler.disabled_processes {
		warn!("  Disabled process: {}", process);
	}

	Ok(())
}

async fn run_single_tick(config: LiquidityConfig) -> Result<()> {
	let engine = factory::build_engine(&config).context("Failed to build engine")?;

	match engine.scheduler.run_tick().await {
		TickOutcome::Completed(report) => {
			info!("Tick completed: {}", report);
			Ok(())
		}
		TickOutcome::Skipped => {
			warn!("Tick skipped, another tick is running");
			Ok(())
		}
		TickOutcome::Disabled => {
			warn!("Tick skipped, the securing process is disabled");
			Ok(())
		}
		TickOutcome::Failed(reason) => anyhow::bail!("Tick failed: {}", reason),
	}
}

async fn release_liquidity(
	config: LiquidityConfig,
	context: LiquidityOrderContext,
	correlation_id: &str,
) -> Result<()> {
	let engine = factory::build_engine(&config).context("Failed to build engine")?;
	let released = engine
		.dex
		.complete_orders(context, correlation_id)
		.await
		.with_context(|| format!("Failed to release {}/{}", context, correlation_id))?;

	if released == 0 {
		warn!(%context, correlation_id, "No committed liquidity to release");
	} else {
		info!(%context, correlation_id, released, "Liquidity released");
	}
	Ok(())
}

async fn abandon_order(
	config: LiquidityConfig,
	context: LiquidityOrderContext,
	correlation_id: &str,
	reason: &str,
) -> Result<()> {
	let engine = factory::build_engine(&config).context("Failed to build engine")?;
	let abandoned = engine
		.dex
		.abandon_order(context, correlation_id, reason)
		.await
		.with_context(|| format!("Failed to abandon {}/{}", context, correlation_id))?;

	if abandoned {
		info!(%context, correlation_id, "Liquidity order abandoned");
	} else {
		warn!(%context, correlation_id, "No liquidity order in flight");
	}
	Ok(())
}

fn setup_tracing(log_level: &str, format: LogFormat) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
		.with_context(|| format!("Invalid log level '{}'", log_level))?;

	let registry = tracing_subscriber::registry().with(env_filter);
	match format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
	}
	.context("Failed to initialize tracing")?;

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!(error = %e, "Failed to listen for Ctrl+C");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(e) => {
				error!(error = %e, "Failed to install SIGTERM handler");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
