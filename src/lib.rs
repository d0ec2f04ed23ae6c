//! Wallet session and chain synchronisation engine for a treasury bonding and
//! staking protocol.
//!
//! [`session::ConnectionSession`] owns the wallet connection and reports
//! account and network changes. [`sync::SyncPipeline`] refreshes protocol
//! metrics, account balances and bond quotes into [`store::SyncStore`],
//! where generation tags keep only the newest result per slot. Writes go
//! through [`bond::BondEngine`] and [`stake::StakeEngine`], each admitted by
//! the [`pending::PendingOperationTracker`].
//!
//! Applications usually build a [`client::BondClient`] from a
//! [`config::ClientConfig`] and drive everything through it.

pub mod address_book;
pub mod bond;
pub mod client;
pub mod config;
pub mod contracts;
pub mod error;
pub mod logging;
pub mod network;
pub mod oracle;
pub mod pending;
pub mod protocol;
pub mod session;
pub mod stake;
pub mod store;
pub mod sync;
pub mod units;

pub use client::{BondClient, SyncStatus};
pub use config::ClientConfig;
pub use error::ClientError;
