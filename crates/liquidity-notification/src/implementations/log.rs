//! Notification sink writing to the service log.

use crate::{Notification, NotificationError, NotificationInterface, Severity};
use async_trait::async_trait;
use tracing::{error, warn};

pub struct LogNotification;

#[async_trait]
impl NotificationInterface for LogNotification {
	async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
		let detail = notification.error.as_deref().unwrap_or("-");
		match notification.severity {
			Severity::NonRecoverable => error!(
				correlation_id = %notification.correlation_id,
				error = detail,
				"Non-recoverable error: {}",
				notification.message
			),
			Severity::Warning => warn!(
				correlation_id = %notification.correlation_id,
				error = detail,
				"{}",
				notification.message
			),
		}
		Ok(())
	}
}

/// Factory function for the log sink. It takes no settings.
pub fn create_notification(_config: &toml::Value) -> Box<dyn NotificationInterface> {
	Box::new(LogNotification)
}
