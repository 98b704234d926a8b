//! Liquidity orchestration core.
//!
//! Wires strategies, the order ledger and the batch repository into the
//! coordination service and the scheduled securing process.

pub mod batch;
pub mod dex;
pub mod error;
pub mod ledger;
pub mod process;
pub mod registry;
pub mod scheduler;
pub mod securing;

pub use batch::BatchRepository;
pub use dex::DexService;
pub use error::{CoreError, DexError, ErrorKind};
pub use ledger::LiquidityOrderLedger;
pub use process::{LockGuard, LockRegistry, ProcessFlags, SECURE_LIQUIDITY};
pub use registry::StrategyRegistry;
pub use scheduler::{Scheduler, TickOutcome};
pub use securing::{BatchOutcome, BatchSecuringService, SecuringReport};
