//! Point-in-time holder snapshots for sidechain tokens, and the airdrop
//! that pays those holders back.
//!
//! The snapshot side merges spot, staked, order-book and withdrawal balances
//! into one fixed-point total per account. The airdrop side checks the
//! treasury can cover the snapshot total, then sends each transfer with
//! bounded retries and an append-only audit log.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod models;
pub mod planner;
pub mod quantize;
pub mod rpc;
pub mod runner;
pub mod snapshot;
pub mod source;
pub mod wallet;

pub use error::{Error, Result};
