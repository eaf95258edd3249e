//! Error types for the marketplace ledger

use thiserror::Error;

/// Result type for marketplace operations
pub type Result<T> = std::result::Result<T, Error>;

/// Marketplace errors
///
/// Every validation failure rejects the whole operation; no partial state
/// change survives a rejection.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller lacks the required role
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Referenced collection does not exist
    #[error("Collection does not exist: {0}")]
    CollectionNotFound(String),

    /// Referenced token does not exist
    #[error("Token not found: {0}")]
    TokenNotFound(u64),

    /// Referenced listing does not exist
    #[error("Listing not found: {0}")]
    ListingNotFound(u64),

    /// Collection name already registered
    #[error("Collection name already exists: {0}")]
    DuplicateName(String),

    /// Royalty percentage exceeds the 10% ceiling
    #[error("Royalty percentage cannot exceed 10%: {0} bps")]
    InvalidRoyalty(u16),

    /// Marketplace fee exceeds the 10% ceiling
    #[error("Fee cannot exceed 10%: {0} bps")]
    InvalidFee(u16),

    /// Listing price is zero
    #[error("Price must be greater than zero")]
    InvalidPrice,

    /// Token already has an active listing
    #[error("Token already has an active listing: {0}")]
    AlreadyListed(u64),

    /// Purchase targets a listing that is no longer active
    #[error("Listing is not active: {0}")]
    InactiveListing(u64),

    /// Cancellation targets a listing that is already inactive
    #[error("Listing is already inactive: {0}")]
    AlreadyInactive(u64),

    /// Payment below the listing price
    #[error("Insufficient payment: required {required}, provided {provided}")]
    InsufficientPayment {
        /// Listing price
        required: u128,
        /// Payment offered
        provided: u128,
    },

    /// Withdrawal attempted with a zero balance
    #[error("No balance to withdraw: {0}")]
    NoBalance(String),

    /// Balance restore failed after a rejected withdrawal transfer; the
    /// escrowed amount needs manual reconciliation
    #[error("Balance restore failed for {account}: {amount} units need reconciliation: {cause}")]
    LostEscrow {
        /// Account whose balance could not be restored
        account: String,
        /// Amount that was zeroed and not restored
        amount: u128,
        /// Underlying storage error
        cause: String,
    },

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Outbound value transfer failed
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}
