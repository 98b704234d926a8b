//! Asset and blockchain types.
//!
//! Assets are identified by their name on a given blockchain. The asset type
//! (native coin or token) and the optional category are used to select the
//! liquidity strategy responsible for the asset.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Blockchains the engine can hold liquidity on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blockchain {
	Ethereum,
	Polygon,
	Optimism,
	Arbitrum,
	Base,
	Bitcoin,
	Lightning,
}

impl Blockchain {
	/// Returns the lowercase name used in configuration and storage keys.
	pub fn as_str(&self) -> &'static str {
		match self {
			Blockchain::Ethereum => "ethereum",
			Blockchain::Polygon => "polygon",
			Blockchain::Optimism => "optimism",
			Blockchain::Arbitrum => "arbitrum",
			Blockchain::Base => "base",
			Blockchain::Bitcoin => "bitcoin",
			Blockchain::Lightning => "lightning",
		}
	}
}

impl fmt::Display for Blockchain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for Blockchain {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"ethereum" => Ok(Blockchain::Ethereum),
			"polygon" => Ok(Blockchain::Polygon),
			"optimism" => Ok(Blockchain::Optimism),
			"arbitrum" => Ok(Blockchain::Arbitrum),
			"base" => Ok(Blockchain::Base),
			"bitcoin" => Ok(Blockchain::Bitcoin),
			"lightning" => Ok(Blockchain::Lightning),
			other => Err(format!("Unknown blockchain: {}", other)),
		}
	}
}

/// Whether an asset is the chain's native coin or a token contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
	Coin,
	Token,
}

impl fmt::Display for AssetType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AssetType::Coin => f.write_str("coin"),
			AssetType::Token => f.write_str("token"),
		}
	}
}

/// Optional asset classification used to override strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
	Public,
	Private,
	PoolPair,
	Stock,
}

impl fmt::Display for AssetCategory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			AssetCategory::Public => "public",
			AssetCategory::Private => "private",
			AssetCategory::PoolPair => "pool_pair",
			AssetCategory::Stock => "stock",
		};
		f.write_str(name)
	}
}

/// A tradable asset on a specific blockchain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
	/// Ticker-style name, e.g. "ETH" or "USDT".
	pub name: String,
	/// The blockchain the asset lives on.
	pub blockchain: Blockchain,
	/// Native coin or token.
	pub asset_type: AssetType,
	/// Optional category override.
	#[serde(default)]
	pub category: Option<AssetCategory>,
	/// Contract address or other chain-level identifier for tokens.
	#[serde(default)]
	pub chain_id: Option<String>,
}

impl Asset {
	pub fn new(name: impl Into<String>, blockchain: Blockchain, asset_type: AssetType) -> Self {
		Self {
			name: name.into(),
			blockchain,
			asset_type,
			category: None,
			chain_id: None,
		}
	}

	pub fn coin(name: impl Into<String>, blockchain: Blockchain) -> Self {
		Self::new(name, blockchain, AssetType::Coin)
	}

	pub fn token(name: impl Into<String>, blockchain: Blockchain) -> Self {
		Self::new(name, blockchain, AssetType::Token)
	}

	pub fn with_category(mut self, category: AssetCategory) -> Self {
		self.category = Some(category);
		self
	}

	pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
		self.chain_id = Some(chain_id.into());
		self
	}

	/// Two assets are the same when they share blockchain and name.
	///
	/// Category and contract metadata may be missing on copies carried by
	/// external entities, so they are not part of the identity.
	pub fn is_same(&self, other: &Asset) -> bool {
		self.blockchain == other.blockchain && self.name == other.name
	}

	/// Storage- and log-friendly identifier, e.g. `ethereum/USDT`.
	pub fn unique_name(&self) -> String {
		format!("{}/{}", self.blockchain, self.name)
	}
}

impl fmt::Display for Asset {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.blockchain, self.name)
	}
}
