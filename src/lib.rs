//! Auction Trader Library
//!
//! Value-area and order-flow feature engine, acceptance state machine and
//! deterministic replay simulator. Binaries under `src/bin` are thin wrappers
//! around [`auction`].

pub mod auction;

pub use auction::config::TraderConfig;
pub use auction::error::{TraderError, TraderResult};
