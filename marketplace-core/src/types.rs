//! Core types for the marketplace ledger
//!
//! All persisted types derive serde for deterministic bincode encoding.
//! Amounts are indivisible integer value units; percentages are expressed
//! in basis points out of 10_000.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Integer value units (indivisible, like wei)
pub type Amount = u128;

/// Basis points (1 bp = 0.01%)
pub type BasisPoints = u16;

/// Denominator for basis-point arithmetic
pub const BPS_DENOMINATOR: Amount = 10_000;

/// Ceiling for royalty and marketplace fee percentages (10.00%)
pub const MAX_BPS: BasisPoints = 1_000;

/// Marketplace fee at first open (2.5%)
pub const DEFAULT_FEE_BPS: BasisPoints = 250;

/// Account identifier (opaque identity key)
///
/// The ledger never interprets the contents; signing and identity
/// verification belong to the host environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Creator-owned, name-keyed collection of tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    /// Unique name (case-sensitive, immutable)
    pub name: String,

    /// Identity that created the collection (immutable)
    pub creator: AccountId,

    /// Free-form description (immutable)
    pub description: String,

    /// Verification flag, toggled only by the administrator
    pub verified: bool,
}

/// Unique token with royalty metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Sequential id assigned at mint (first id = 1)
    pub token_id: u64,

    /// Current owner; changes only through purchase settlement
    pub owner: AccountId,

    /// Original creator (immutable)
    pub creator: AccountId,

    /// Resale royalty in basis points, at most [`MAX_BPS`]
    pub royalty_bps: BasisPoints,

    /// Opaque metadata reference; the asset itself is stored off-ledger
    pub uri: String,

    /// Collection this token was minted into (immutable)
    pub collection_name: String,
}

/// Fixed-price offer to sell a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Sequential id assigned at creation (first id = 1)
    pub listing_id: u64,

    /// Token on offer
    pub token_id: u64,

    /// Token owner at listing time; only the seller may cancel
    pub seller: AccountId,

    /// Asking price, always positive
    pub price: Amount,

    /// Starts true; becomes false exactly once, on cancel or purchase
    pub active: bool,

    /// Denormalized copy of the token's collection
    pub collection_name: String,
}

/// Observable state-change notification, consumed by external indexers
///
/// Uses serde's default external tagging: internal tagging needs a
/// self-describing format and cannot round-trip through bincode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketplaceEvent {
    /// A collection was registered
    CollectionCreated {
        /// Collection name
        name: String,
        /// Creating identity
        creator: AccountId,
    },

    /// The administrator toggled a collection's verified flag
    CollectionVerified {
        /// Collection name
        name: String,
        /// New flag value
        verified: bool,
    },

    /// A token was minted into a collection
    TokenMinted {
        /// Assigned token id
        token_id: u64,
        /// Minting identity (collection creator)
        creator: AccountId,
        /// Metadata reference
        uri: String,
        /// Target collection
        collection_name: String,
    },

    /// A listing went live
    ListingCreated {
        /// Assigned listing id
        listing_id: u64,
        /// Listed token
        token_id: u64,
        /// Seller identity
        seller: AccountId,
        /// Asking price
        price: Amount,
    },

    /// A seller cancelled their listing
    ListingCancelled {
        /// Listing id
        listing_id: u64,
        /// Listed token
        token_id: u64,
        /// Seller identity
        seller: AccountId,
    },

    /// A listing was purchased and settled
    TokenPurchased {
        /// Listing id
        listing_id: u64,
        /// Purchased token
        token_id: u64,
        /// Buying identity (new owner)
        buyer: AccountId,
        /// Selling identity
        seller: AccountId,
        /// Sale price
        price: Amount,
    },

    /// Royalty credited to the token creator during settlement
    RoyaltyPaid {
        /// Token sold
        token_id: u64,
        /// Creator receiving the royalty
        creator: AccountId,
        /// Royalty amount
        amount: Amount,
    },

    /// Marketplace fee credited to the administrator during settlement
    MarketplaceFeePaid {
        /// Administrator identity
        recipient: AccountId,
        /// Fee amount
        amount: Amount,
    },
}

/// Persisted event-log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Gapless sequence number, assigned in commit order
    pub seq: u64,

    /// Unique event ID (UUIDv7 for time-ordering)
    pub event_id: Uuid,

    /// Commit timestamp
    pub timestamp: DateTime<Utc>,

    /// The event payload
    pub event: MarketplaceEvent,
}

/// Settlement breakdown returned by a successful purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    /// Purchased listing
    pub listing_id: u64,

    /// Purchased token
    pub token_id: u64,

    /// Sale price (splits are computed from this, never from the payment)
    pub price: Amount,

    /// Portion credited to the administrator
    pub marketplace_fee: Amount,

    /// Portion credited to the token creator
    pub royalty_fee: Amount,

    /// Portion credited to the seller
    pub seller_amount: Amount,

    /// Excess payment returned to the buyer
    pub refund: Amount,
}
