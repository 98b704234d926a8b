//! Shared types for the liquidity orchestration engine.
//!
//! This crate defines the domain model used by every other crate in the
//! workspace: assets and blockchains, liquidity orders and their lifecycle,
//! customer purchase batches, the request/result value objects exchanged
//! with liquidity strategies, and the configuration schema helpers used to
//! validate pluggable implementations.

pub mod asset;
pub mod batch;
pub mod liquidity;
pub mod order;
pub mod validation;

pub use asset::*;
pub use batch::*;
pub use liquidity::*;
pub use order::*;
pub use validation::*;

/// Number of decimal places kept when splitting amounts across transactions.
pub const AMOUNT_DECIMALS: u32 = 8;
