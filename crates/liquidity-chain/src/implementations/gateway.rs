//! HTTP gateway chain adapter.
//!
//! Talks to a wallet gateway that owns the chain account's keys and RPC
//! connection. The gateway exposes:
//!
//! - `GET  /balances/{asset}` -> `{ "amount": "..." }`
//! - `POST /quotes` -> `{ "target_amount": "...", "fee_amount": "..." }`, 404 when no route exists
//! - `GET  /accounts/nonce` -> `{ "nonce": n }`
//! - `POST /swaps` -> `{ "tx_id": "..." }`, 409 with `{ "code", "message" }` on rejection
//! - `GET  /transactions/{id}` -> `{ "status": "pending" | "confirmed" | "failed", ... }`
//!
//! Read-only calls are retried with exponential backoff. Swap submission is
//! never retried. A submission that may have reached the gateway without
//! returning a tx id fails with `SubmissionUnknown`.

use crate::{ChainError, ChainInterface, NonceManager, SwapQuote};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use liquidity_types::{
	http_url, Asset, Blockchain, ConfigSchema, Field, FieldType, Schema, ValidationError,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct SwapBody<'a> {
	source: &'a str,
	target: &'a str,
	amount: Decimal,
	max_slippage: Decimal,
	#[serde(skip_serializing_if = "Option::is_none")]
	nonce: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
	amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct NonceResponse {
	nonce: u64,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
	tx_id: String,
}

#[derive(Debug, Deserialize)]
struct RejectionResponse {
	code: String,
	#[serde(default)]
	message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum GatewayTxStatus {
	Pending,
	Confirmed,
	Failed,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
	status: GatewayTxStatus,
	#[serde(default)]
	fee_amount: Option<Decimal>,
	#[serde(default)]
	outputs: HashMap<String, Decimal>,
	#[serde(default)]
	error: Option<String>,
}

/// Gateway-backed chain account.
pub struct GatewayChain {
	blockchain: Blockchain,
	base_url: String,
	api_key: Option<String>,
	client: Client,
	nonces: NonceManager,
	retry: ExponentialBackoff,
}

impl GatewayChain {
	pub fn new(blockchain: Blockchain, base_url: impl Into<String>) -> Result<Self, ChainError> {
		let client = Client::builder()
			.timeout(Duration::from_secs(30))
			.build()
			.map_err(|e| ChainError::Configuration(e.to_string()))?;

		Ok(Self {
			blockchain,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			api_key: None,
			client,
			nonces: NonceManager::new(),
			retry: ExponentialBackoff {
				initial_interval: Duration::from_millis(200),
				max_elapsed_time: Some(Duration::from_secs(30)),
				..Default::default()
			},
		})
	}

	pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
		self.api_key = Some(api_key.into());
		self
	}

	/// Upper bound on the time spent retrying a read-only call.
	pub fn with_retry_window(mut self, window: Duration) -> Self {
		self.retry.max_elapsed_time = Some(window);
		self
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.base_url, path)
	}

	fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
		match &self.api_key {
			Some(key) => request.bearer_auth(key),
			None => request,
		}
	}

	/// Sends a read-only request, retrying network failures and 5xx answers.
	/// Returns `None` on 404.
	async fn read<T, F>(&self, build: F) -> Result<Option<T>, ChainError>
	where
		T: DeserializeOwned,
		F: Fn() -> RequestBuilder,
	{
		backoff::future::retry_notify(
			self.retry.clone(),
			|| {
				let request = self.authorized(build());
				async move { Self::send_read::<T>(request).await }
			},
			|error: ChainError, delay: Duration| {
				warn!(blockchain = %self.blockchain, %error, ?delay, "Gateway read failed, retrying");
			},
		)
		.await
	}

	async fn send_read<T: DeserializeOwned>(
		request: RequestBuilder,
	) -> Result<Option<T>, backoff::Error<ChainError>> {
		let response = request
			.send()
			.await
			.map_err(|e| backoff::Error::transient(ChainError::Network(e.to_string())))?;

		let status = response.status();
		if status == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		if status.is_server_error() {
			return Err(backoff::Error::transient(gateway_error(response).await));
		}
		if !status.is_success() {
			return Err(backoff::Error::permanent(gateway_error(response).await));
		}

		response
			.json::<T>()
			.await
			.map(Some)
			.map_err(|e| backoff::Error::permanent(ChainError::Network(e.to_string())))
	}

	async fn transaction(&self, tx_id: &str) -> Result<TransactionResponse, ChainError> {
		let url = self.url(&format!("/transactions/{}", tx_id));
		self.read(|| self.client.get(&url))
			.await?
			.ok_or_else(|| ChainError::TransactionNotFound(tx_id.to_string()))
	}

	async fn confirmed_transaction(&self, tx_id: &str) -> Result<TransactionResponse, ChainError> {
		let transaction = self.transaction(tx_id).await?;
		match transaction.status {
			GatewayTxStatus::Confirmed => Ok(transaction),
			GatewayTxStatus::Pending => Err(ChainError::NotConfirmed(tx_id.to_string())),
			GatewayTxStatus::Failed => Err(failed(tx_id, transaction.error)),
		}
	}
}

async fn gateway_error(response: reqwest::Response) -> ChainError {
	let status = response.status().as_u16();
	let message = response.text().await.unwrap_or_default();
	ChainError::Gateway { status, message }
}

fn failed(tx_id: &str, reason: Option<String>) -> ChainError {
	ChainError::TransactionFailed {
		tx_id: tx_id.to_string(),
		reason: reason.unwrap_or_else(|| "reverted".to_string()),
	}
}

#[async_trait]
impl ChainInterface for GatewayChain {
	fn blockchain(&self) -> Blockchain {
		self.blockchain
	}

	async fn get_balance(&self, asset: &Asset) -> Result<Decimal, ChainError> {
		let url = self.url(&format!("/balances/{}", asset.name));
		let balance: Option<BalanceResponse> = self.read(|| self.client.get(&url)).await?;
		Ok(balance.map(|b| b.amount).unwrap_or(Decimal::ZERO))
	}

	async fn quote_swap(
		&self,
		source: &Asset,
		source_amount: Decimal,
		target: &Asset,
		max_slippage: Decimal,
	) -> Result<SwapQuote, ChainError> {
		let url = self.url("/quotes");
		let body = SwapBody {
			source: &source.name,
			target: &target.name,
			amount: source_amount,
			max_slippage,
			nonce: None,
		};
		self.read(|| self.client.post(&url).json(&body))
			.await?
			.ok_or_else(|| ChainError::NoRouteFound {
				from: source.name.clone(),
				to: target.name.clone(),
			})
	}

	async fn execute_swap(
		&self,
		source: &Asset,
		source_amount: Decimal,
		target: &Asset,
		max_slippage: Decimal,
	) -> Result<String, ChainError> {
		let lease = self.nonces.lease().await;
		let nonce_url = self.url("/accounts/nonce");
		let on_chain: NonceResponse = self
			.read(|| self.client.get(&nonce_url))
			.await?
			.ok_or_else(|| ChainError::Gateway {
				status: 404,
				message: "account nonce unavailable".to_string(),
			})?;
		let nonce = lease.nonce(on_chain.nonce);

		let body = SwapBody {
			source: &source.name,
			target: &target.name,
			amount: source_amount,
			max_slippage,
			nonce: Some(nonce),
		};
		// past this point the gateway may have broadcast the swap, so any
		// failure without a tx id is reported as an unknown outcome
		let response = self
			.authorized(self.client.post(self.url("/swaps")).json(&body))
			.send()
			.await
			.map_err(|e| {
				if e.is_connect() {
					ChainError::Network(e.to_string())
				} else {
					ChainError::SubmissionUnknown(format!("no response to swap request: {}", e))
				}
			})?;

		match response.status() {
			status if status.is_success() => {
				let swap: SwapResponse = response.json().await.map_err(|e| {
					ChainError::SubmissionUnknown(format!("unreadable swap response: {}", e))
				})?;
				lease.commit(nonce);
				info!(blockchain = %self.blockchain, tx_id = %swap.tx_id, nonce, "Swap submitted to gateway");
				Ok(swap.tx_id)
			}
			StatusCode::NOT_FOUND => Err(ChainError::NoRouteFound {
				from: source.name.clone(),
				to: target.name.clone(),
			}),
			StatusCode::CONFLICT => {
				let rejection: RejectionResponse =
					response.json().await.map_err(|e| ChainError::Gateway {
						status: StatusCode::CONFLICT.as_u16(),
						message: e.to_string(),
					})?;
				Err(match rejection.code.as_str() {
					"insufficient_liquidity" => ChainError::InsufficientLiquidity(rejection.message),
					"slippage_exceeded" => ChainError::SlippageExceeded(rejection.message),
					_ => ChainError::Gateway {
						status: StatusCode::CONFLICT.as_u16(),
						message: format!("{}: {}", rejection.code, rejection.message),
					},
				})
			}
			status if status.is_server_error() => {
				let error = gateway_error(response).await;
				Err(ChainError::SubmissionUnknown(error.to_string()))
			}
			_ => Err(gateway_error(response).await),
		}
	}

	async fn is_transaction_complete(&self, tx_id: &str) -> Result<bool, ChainError> {
		let transaction = self.transaction(tx_id).await?;
		debug!(tx_id, status = ?transaction.status, "Polled gateway transaction");
		match transaction.status {
			GatewayTxStatus::Pending => Ok(false),
			GatewayTxStatus::Confirmed => Ok(true),
			GatewayTxStatus::Failed => Err(failed(tx_id, transaction.error)),
		}
	}

	async fn get_swap_result(&self, tx_id: &str, asset: &Asset) -> Result<Decimal, ChainError> {
		let transaction = self.confirmed_transaction(tx_id).await?;
		transaction
			.outputs
			.get(&asset.name)
			.copied()
			.ok_or_else(|| ChainError::MissingOutput {
				tx_id: tx_id.to_string(),
				asset: asset.name.clone(),
			})
	}

	async fn get_transaction_fee(&self, tx_id: &str) -> Result<Decimal, ChainError> {
		let transaction = self.confirmed_transaction(tx_id).await?;
		Ok(transaction.fee_amount.unwrap_or(Decimal::ZERO))
	}
}

/// Configuration schema for the gateway adapter.
pub struct GatewayChainSchema;

impl ConfigSchema for GatewayChainSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("base_url", FieldType::String).with_validator(http_url)],
			vec![
				Field::new("api_key", FieldType::String),
				Field::new(
					"retry_window_secs",
					FieldType::Integer {
						min: Some(0),
						max: Some(3600),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a gateway adapter from configuration.
///
/// Configuration parameters:
/// - `base_url`: gateway endpoint (required)
/// - `api_key`: bearer token sent with every request
/// - `retry_window_secs`: time budget for retrying reads (default: 30)
pub fn create_chain(
	blockchain: Blockchain,
	config: &toml::Value,
) -> Result<Arc<dyn ChainInterface>, ChainError> {
	GatewayChainSchema
		.validate(config)
		.map_err(|e| ChainError::Configuration(e.to_string()))?;

	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| ChainError::Configuration("base_url is required".to_string()))?;

	let mut chain = GatewayChain::new(blockchain, base_url)?;
	if let Some(key) = config.get("api_key").and_then(|v| v.as_str()) {
		chain = chain.with_api_key(key);
	}
	if let Some(secs) = config.get("retry_window_secs").and_then(|v| v.as_integer()) {
		chain = chain.with_retry_window(Duration::from_secs(secs as u64));
	}

	Ok(Arc::new(chain))
}
