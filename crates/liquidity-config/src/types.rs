//! Configuration types for the liquidity engine.

use serde::Deserialize;
use std::collections::HashMap;

/// Complete engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LiquidityConfig {
	#[serde(default)]
	pub service: ServiceConfig,
	pub storage: ImplementationConfig,
	#[serde(default)]
	pub scheduler: SchedulerConfig,
	pub pricing: ImplementationConfig,
	#[serde(default = "default_notification")]
	pub notification: ImplementationConfig,
	/// Chain adapters keyed by lowercase blockchain name
	#[serde(default)]
	pub chains: HashMap<String, ImplementationConfig>,
	/// Strategy sections, each validated by its implementation
	#[serde(default)]
	pub strategies: Vec<toml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
	#[serde(default = "default_name")]
	pub name: String,
	#[serde(default = "default_log_level")]
	pub log_level: String,
	#[serde(default)]
	pub log_format: LogFormat,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			name: default_name(),
			log_level: default_log_level(),
			log_format: LogFormat::default(),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	#[default]
	Pretty,
	Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
	#[serde(default = "default_tick_interval")]
	pub tick_interval_secs: u64,
	/// Age after which a held process lock is presumed stuck
	#[serde(default = "default_lock_timeout")]
	pub lock_timeout_secs: u64,
	#[serde(default)]
	pub disabled_processes: Vec<String>,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			tick_interval_secs: default_tick_interval(),
			lock_timeout_secs: default_lock_timeout(),
			disabled_processes: Vec::new(),
		}
	}
}

/// A pluggable section: `implementation` plus free-form settings passed to
/// the implementation's factory.
#[derive(Debug, Clone, Deserialize)]
pub struct ImplementationConfig {
	pub implementation: String,
	#[serde(flatten)]
	pub settings: toml::Table,
}

impl ImplementationConfig {
	pub fn new(implementation: impl Into<String>) -> Self {
		Self {
			implementation: implementation.into(),
			settings: toml::Table::new(),
		}
	}

	/// Settings as a TOML value for the implementation factories.
	pub fn settings(&self) -> toml::Value {
		toml::Value::Table(self.settings.clone())
	}
}

fn default_name() -> String {
	"liquidity-engine".to_string()
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_tick_interval() -> u64 {
	60
}

fn default_lock_timeout() -> u64 {
	1800
}

fn default_notification() -> ImplementationConfig {
	ImplementationConfig::new("log")
}
