//! Configuration loading for the liquidity engine.

use liquidity_types::Blockchain;
use regex::Regex;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

mod types;

pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

impl LiquidityConfig {
	/// Configured chain adapters with their parsed blockchains, sorted.
	pub fn chains(&self) -> Result<Vec<(Blockchain, &ImplementationConfig)>, ConfigError> {
		let mut chains = self
			.chains
			.iter()
			.map(|(name, config)| {
				name.parse::<Blockchain>()
					.map(|blockchain| (blockchain, config))
					.map_err(|e| ConfigError::ValidationError(format!("chains.{}: {}", name, e)))
			})
			.collect::<Result<Vec<_>, _>>()?;
		chains.sort_by_key(|(blockchain, _)| blockchain.as_str());
		Ok(chains)
	}
}

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "LIQUIDITY_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<LiquidityConfig, ConfigError> {
		let Some(file_path) = &self.file_path else {
			return Err(ConfigError::FileNotFound(
				"No configuration file specified".to_string(),
			));
		};
		let mut config = self.load_from_file(file_path).await?;

		self.apply_env_overrides(&mut config)?;
		validate_config(&config)?;

		Ok(config)
	}

	async fn load_from_file(&self, file_path: &str) -> Result<LiquidityConfig, ConfigError> {
		if !Path::new(file_path).exists() {
			return Err(ConfigError::FileNotFound(file_path.to_string()));
		}
		let content = tokio::fs::read_to_string(file_path).await?;
		let substituted = substitute_env_vars(&content)?;

		toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))
	}

	fn apply_env_overrides(&self, config: &mut LiquidityConfig) -> Result<(), ConfigError> {
		if let Ok(log_level) = env::var(format!("{}LOG_LEVEL", self.env_prefix)) {
			debug!(%log_level, "Overriding log level from environment");
			config.service.log_level = log_level;
		}

		if let Ok(interval) = env::var(format!("{}TICK_INTERVAL_SECS", self.env_prefix)) {
			config.scheduler.tick_interval_secs = interval.parse().map_err(|e| {
				ConfigError::ValidationError(format!("Invalid tick interval '{}': {}", interval, e))
			})?;
		}

		Ok(())
	}
}

/// Replaces `${VAR}` with the variable's value. Unset variables are an error.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
	let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::ParseError(e.to_string()))?;
	let mut result = content.to_string();

	for cap in re.captures_iter(content) {
		let var_name = &cap[1];
		let value =
			env::var(var_name).map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
		result = result.replace(&cap[0], &value);
	}

	Ok(result)
}

fn validate_config(config: &LiquidityConfig) -> Result<(), ConfigError> {
	if config.scheduler.tick_interval_secs == 0 {
		return Err(ConfigError::ValidationError(
			"scheduler.tick_interval_secs must be positive".to_string(),
		));
	}
	if config.scheduler.lock_timeout_secs < config.scheduler.tick_interval_secs {
		return Err(ConfigError::ValidationError(format!(
			"scheduler.lock_timeout_secs ({}) must not be shorter than the tick interval ({})",
			config.scheduler.lock_timeout_secs, config.scheduler.tick_interval_secs
		)));
	}

	let chains: Vec<Blockchain> = config.chains()?.into_iter().map(|(bc, _)| bc).collect();
	if config.strategies.is_empty() {
		return Err(ConfigError::ValidationError(
			"At least one strategy must be configured".to_string(),
		));
	}

	for (index, strategy) in config.strategies.iter().enumerate() {
		if strategy.get("implementation").and_then(|v| v.as_str()).is_none() {
			return Err(ConfigError::ValidationError(format!(
				"strategies[{}] is missing 'implementation'",
				index
			)));
		}
		let blockchain = strategy
			.get("blockchain")
			.and_then(|v| v.as_str())
			.ok_or_else(|| {
				ConfigError::ValidationError(format!("strategies[{}] is missing 'blockchain'", index))
			})?
			.parse::<Blockchain>()
			.map_err(|e| ConfigError::ValidationError(format!("strategies[{}]: {}", index, e)))?;
		if !chains.contains(&blockchain) {
			return Err(ConfigError::ValidationError(format!(
				"strategies[{}] uses {} but no chain adapter is configured for it",
				index, blockchain
			)));
		}
	}

	Ok(())
}
