//! Notification sink posting JSON to an HTTP endpoint, e.g. a chat or paging
//! integration.

use crate::{Notification, NotificationError, NotificationInterface};
use async_trait::async_trait;
use liquidity_types::{http_url, ConfigSchema, Field, FieldType, Schema, ValidationError};
use reqwest::Client;
use std::time::Duration;

pub struct WebhookNotification {
	url: String,
	client: Client,
}

impl WebhookNotification {
	pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
		let client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| NotificationError::Configuration(e.to_string()))?;
		Ok(Self {
			url: url.into(),
			client,
		})
	}
}

#[async_trait]
impl NotificationInterface for WebhookNotification {
	async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
		let response = self
			.client
			.post(&self.url)
			.json(notification)
			.send()
			.await
			.map_err(|e| NotificationError::Delivery(e.to_string()))?;

		if !response.status().is_success() {
			return Err(NotificationError::Delivery(format!(
				"webhook returned {}",
				response.status()
			)));
		}
		Ok(())
	}
}

pub struct WebhookNotificationSchema;

impl ConfigSchema for WebhookNotificationSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![Field::new("url", FieldType::String).with_validator(http_url)],
			vec![Field::new(
				"timeout_secs",
				FieldType::Integer {
					min: Some(1),
					max: Some(300),
				},
			)],
		)
		.validate(config)
	}
}

/// Factory function to create a webhook sink.
///
/// Configuration parameters:
/// - `url`: endpoint receiving the notification JSON (required)
/// - `timeout_secs`: request timeout (default: 10)
pub fn create_notification(
	config: &toml::Value,
) -> Result<Box<dyn NotificationInterface>, NotificationError> {
	WebhookNotificationSchema
		.validate(config)
		.map_err(|e| NotificationError::Configuration(e.to_string()))?;

	let url = config
		.get("url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| NotificationError::Configuration("url is required".to_string()))?;
	let timeout = config
		.get("timeout_secs")
		.and_then(|v| v.as_integer())
		.unwrap_or(10) as u64;

	Ok(Box::new(WebhookNotification::new(
		url,
		Duration::from_secs(timeout),
	)?))
}
