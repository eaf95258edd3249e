//! Core NFT marketplace ledger
//!
//! An embeddable marketplace ledger: collections, minted tokens, fixed-price
//! listings, purchase settlement with marketplace fees and creator royalties,
//! and escrowed proceeds with withdrawals. State is durable in RocksDB and
//! every mutation is recorded in an append-only event log.
//!
//! # Architecture
//!
//! - **Single-writer actor**: all mutations flow through one actor task with
//!   an mpsc mailbox, so operations are strictly serialized and there are no
//!   lock hierarchies or re-entrancy hazards.
//! - **Atomic commits**: each operation stages its writes into a single
//!   RocksDB `WriteBatch`, so observers only ever see pre- or post-operation
//!   state.
//! - **Transfer gateway**: outbound value (refunds, withdrawals) leaves
//!   through the [`gateway::TransferGateway`] trait; the ledger itself only
//!   tracks balances.
//! - **Event log**: settlement and lifecycle events carry gapless sequence
//!   numbers for downstream indexers.
//!
//! # Invariants
//!
//! - Fee and royalty percentages never exceed 10% (1000 basis points).
//! - A purchase conserves value: fee + royalty + seller proceeds equal the
//!   listing price exactly, with the seller absorbing rounding remainders.
//! - Collection names are unique and returned in creation order.
//! - Token and listing ids are assigned from monotonic counters starting
//!   at 1 and survive restarts.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod actor;
pub mod config;
pub mod error;
pub mod gateway;
pub mod marketplace;
pub mod metrics;
pub mod settlement;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use marketplace::Marketplace;
pub use storage::Storage;
pub use types::{
    AccountId, Amount, BasisPoints, Collection, EventRecord, Listing, MarketplaceEvent,
    PurchaseReceipt, Token, BPS_DENOMINATOR, DEFAULT_FEE_BPS, MAX_BPS,
};
