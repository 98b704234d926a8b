//! Operator notifications.
//!
//! Conditions that need human judgement, such as price slippage on a
//! purchase, are reported through a `NotificationInterface` sink. Sending is
//! fire-and-forget: `NotificationService` logs sink failures and never
//! returns them to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;
use tracing::warn;

pub mod implementations {
	pub mod log;
	pub mod webhook;
}

#[derive(Debug, Error)]
pub enum NotificationError {
	#[error("Delivery failed: {0}")]
	Delivery(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	Warning,
	NonRecoverable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
	pub severity: Severity,
	/// Entity the notification is about, e.g. a batch id.
	pub correlation_id: String,
	pub message: String,
	pub error: Option<String>,
	pub created_at: DateTime<Utc>,
}

impl Notification {
	pub fn non_recoverable(
		correlation_id: impl Into<String>,
		message: impl Into<String>,
		error: Option<String>,
	) -> Self {
		Self {
			severity: Severity::NonRecoverable,
			correlation_id: correlation_id.into(),
			message: message.into(),
			error,
			created_at: Utc::now(),
		}
	}
}

#[async_trait]
pub trait NotificationInterface: Send + Sync {
	async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

pub struct NotificationService {
	sink: Box<dyn NotificationInterface>,
}

impl NotificationService {
	pub fn new(sink: Box<dyn NotificationInterface>) -> Self {
		Self { sink }
	}

	/// Alerts operators about a condition that retrying will not resolve.
	pub async fn send_non_recoverable_error(
		&self,
		correlation_id: &str,
		message: &str,
		error: Option<&(dyn Display + Sync)>,
	) {
		let notification = Notification::non_recoverable(
			correlation_id,
			message,
			error.map(|e| e.to_string()),
		);
		if let Err(e) = self.sink.send(&notification).await {
			warn!(correlation_id, error = %e, "Failed to send notification");
		}
	}
}

/// Creates a notification sink by implementation name.
///
/// Supported implementations: `log`, `webhook`.
pub fn create_notification(
	implementation: &str,
	config: &toml::Value,
) -> Result<Box<dyn NotificationInterface>, NotificationError> {
	match implementation {
		"log" => Ok(implementations::log::create_notification(config)),
		"webhook" => implementations::webhook::create_notification(config),
		other => Err(NotificationError::Configuration(format!(
			"Unknown notification implementation: {}",
			other
		))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	struct FailingSink {
		attempts: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl NotificationInterface for FailingSink {
		async fn send(&self, _notification: &Notification) -> Result<(), NotificationError> {
			self.attempts.fetch_add(1, Ordering::SeqCst);
			Err(NotificationError::Delivery("smtp down".to_string()))
		}
	}

	#[tokio::test]
	async fn test_sink_failure_is_swallowed() {
		let attempts = Arc::new(AtomicUsize::new(0));
		let service = NotificationService::new(Box::new(FailingSink {
			attempts: attempts.clone(),
		}));

		let error = "slippage 4%";
		service
			.send_non_recoverable_error("batch-1", "Purchase rejected", Some(&error))
			.await;
		assert_eq!(attempts.load(Ordering::SeqCst), 1);
	}
}
