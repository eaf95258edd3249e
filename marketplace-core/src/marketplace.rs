//! Main marketplace orchestration layer
//!
//! Ties together storage, settlement, the transfer gateway and the actor
//! into a high-level API. Mutations are routed through the single-writer
//! actor; reads hit committed storage directly.
//!
//! # Example
//!
//! ```no_run
//! use marketplace_core::{AccountId, Config, Marketplace};
//!
//! #[tokio::main]
//! async fn main() -> marketplace_core::Result<()> {
//!     let config = Config::default();
//!     let marketplace = Marketplace::open(config, AccountId::new("operator")).await?;
//!
//!     let creator = AccountId::new("creator-1");
//!     marketplace
//!         .create_collection(creator.clone(), "Art Collection".into(), "Digital art".into())
//!         .await?;
//!     let token_id = marketplace
//!         .mint_nft(creator, "ipfs://metadata/1".into(), 500, "Art Collection".into())
//!         .await?;
//!     println!("minted token {}", token_id);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_marketplace_actor, MarketplaceHandle},
    gateway::{NullGateway, TransferGateway},
    metrics::Metrics,
    types::{AccountId, Amount, BasisPoints, Collection, EventRecord, Listing, PurchaseReceipt},
    Config, Result, Storage,
};
use std::sync::Arc;

/// Main marketplace interface
pub struct Marketplace {
    /// Actor handle for mutations
    handle: MarketplaceHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Metrics collector (shared with the actor)
    metrics: Metrics,

    /// Administrator identity, fixed at first open
    admin: AccountId,

    /// Configuration
    config: Config,
}

impl Marketplace {
    /// Open marketplace with configuration; outbound transfers are no-ops
    pub async fn open(config: Config, admin: AccountId) -> Result<Self> {
        Self::open_with_gateway(config, admin, Arc::new(NullGateway)).await
    }

    /// Open marketplace with an explicit transfer gateway
    ///
    /// The `admin` argument only matters at first open; a previously
    /// recorded administrator always wins.
    pub async fn open_with_gateway(
        config: Config,
        admin: AccountId,
        gateway: Arc<dyn TransferGateway>,
    ) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let admin = storage.init_meta(&admin)?;

        let metrics = Metrics::new()?;
        // Gauges restart at zero; reload the persisted active count
        metrics
            .active_listings
            .set(storage.active_listing_ids()?.len() as i64);

        let handle = spawn_marketplace_actor(storage.clone(), gateway, metrics.clone());

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            admin = %admin,
            "Marketplace open"
        );

        Ok(Self {
            handle,
            storage,
            metrics,
            admin,
            config,
        })
    }

    /// Metrics collector, for wiring up an exporter
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Administrator identity
    pub fn admin(&self) -> &AccountId {
        &self.admin
    }

    /// Configuration this instance was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    // Mutations (serialized through the actor)

    /// Register a new collection owned by `caller`
    pub async fn create_collection(
        &self,
        caller: AccountId,
        name: String,
        description: String,
    ) -> Result<()> {
        self.handle.create_collection(caller, name, description).await
    }

    /// Set a collection's verified flag (administrator only)
    pub async fn verify_collection(
        &self,
        caller: AccountId,
        name: String,
        verified: bool,
    ) -> Result<()> {
        self.handle.verify_collection(caller, name, verified).await
    }

    /// Mint a token into a collection (collection creator only); returns
    /// the assigned token id
    pub async fn mint_nft(
        &self,
        caller: AccountId,
        uri: String,
        royalty_bps: BasisPoints,
        collection_name: String,
    ) -> Result<u64> {
        self.handle
            .mint_nft(caller, uri, royalty_bps, collection_name)
            .await
    }

    /// Update a token's royalty percentage (token creator only)
    pub async fn update_royalty_percentage(
        &self,
        caller: AccountId,
        token_id: u64,
        royalty_bps: BasisPoints,
    ) -> Result<()> {
        self.handle.update_royalty(caller, token_id, royalty_bps).await
    }

    /// List a token for sale (token owner only); returns the assigned
    /// listing id
    pub async fn create_listing(
        &self,
        caller: AccountId,
        token_id: u64,
        price: Amount,
    ) -> Result<u64> {
        self.handle.create_listing(caller, token_id, price).await
    }

    /// Cancel an active listing (seller only)
    pub async fn cancel_listing(&self, caller: AccountId, listing_id: u64) -> Result<()> {
        self.handle.cancel_listing(caller, listing_id).await
    }

    /// Purchase an active listing, settling fees, royalty and seller
    /// proceeds and refunding any overpayment
    pub async fn purchase_nft(
        &self,
        caller: AccountId,
        listing_id: u64,
        payment: Amount,
    ) -> Result<PurchaseReceipt> {
        self.handle.purchase_nft(caller, listing_id, payment).await
    }

    /// Withdraw the caller's entire escrowed balance
    pub async fn withdraw_balance(&self, caller: AccountId) -> Result<Amount> {
        self.handle.withdraw_balance(caller).await
    }

    /// Update the marketplace fee (administrator only)
    pub async fn update_marketplace_fee(
        &self,
        caller: AccountId,
        fee_bps: BasisPoints,
    ) -> Result<()> {
        self.handle.update_marketplace_fee(caller, fee_bps).await
    }

    // Reads (committed state)

    /// Get collection by name
    pub fn get_collection(&self, name: &str) -> Result<Collection> {
        self.storage.get_collection(name)
    }

    /// All collection names in creation order
    pub fn collection_names(&self) -> Result<Vec<String>> {
        self.storage.collection_names()
    }

    /// Token ids minted into a collection, in mint order
    pub fn collection_tokens(&self, name: &str) -> Result<Vec<u64>> {
        self.storage.collection_tokens(name)
    }

    /// Current owner of a token
    pub fn owner_of(&self, token_id: u64) -> Result<AccountId> {
        Ok(self.storage.get_token(token_id)?.owner)
    }

    /// A token's royalty percentage in basis points
    pub fn token_royalty_percentage(&self, token_id: u64) -> Result<BasisPoints> {
        Ok(self.storage.get_token(token_id)?.royalty_bps)
    }

    /// A token's original creator
    pub fn token_creator(&self, token_id: u64) -> Result<AccountId> {
        Ok(self.storage.get_token(token_id)?.creator)
    }

    /// The collection a token was minted into
    pub fn token_collection(&self, token_id: u64) -> Result<String> {
        Ok(self.storage.get_token(token_id)?.collection_name)
    }

    /// Get listing by id
    pub fn get_listing(&self, listing_id: u64) -> Result<Listing> {
        self.storage.get_listing(listing_id)
    }

    /// Currently active listing ids, in creation order
    pub fn active_listing_ids(&self) -> Result<Vec<u64>> {
        self.storage.active_listing_ids()
    }

    /// Escrowed balance for an account; unknown accounts hold zero
    pub fn user_balance(&self, account: &AccountId) -> Result<Amount> {
        self.storage.balance(account)
    }

    /// Current marketplace fee in basis points
    pub fn marketplace_fee_bps(&self) -> Result<BasisPoints> {
        self.storage.fee_bps()
    }

    /// Event records with sequence number `>= from_seq` (for indexers)
    pub fn events_since(&self, from_seq: u64) -> Result<Vec<EventRecord>> {
        self.storage.events_since(from_seq)
    }

    /// Shutdown marketplace
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{FailingGateway, RecordingGateway};
    use crate::types::{DEFAULT_FEE_BPS, MAX_BPS};
    use crate::Error;

    const PRICE: Amount = 1_500_000_000_000_000_000; // 1.5 units at 18 decimals

    fn operator() -> AccountId {
        AccountId::new("operator")
    }

    fn creator1() -> AccountId {
        AccountId::new("creator-1")
    }

    fn creator2() -> AccountId {
        AccountId::new("creator-2")
    }

    fn buyer1() -> AccountId {
        AccountId::new("buyer-1")
    }

    fn buyer2() -> AccountId {
        AccountId::new("buyer-2")
    }

    async fn create_test_marketplace() -> (Marketplace, tempfile::TempDir) {
        create_with_gateway(Arc::new(NullGateway)).await
    }

    async fn create_with_gateway(
        gateway: Arc<dyn TransferGateway>,
    ) -> (Marketplace, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let marketplace = Marketplace::open_with_gateway(config, operator(), gateway)
            .await
            .unwrap();
        (marketplace, temp_dir)
    }

    /// Collection + minted token, ready for listing
    async fn with_minted_token(marketplace: &Marketplace) -> u64 {
        marketplace
            .create_collection(
                creator1(),
                "Art Collection".to_string(),
                "Digital art collection".to_string(),
            )
            .await
            .unwrap();
        marketplace
            .mint_nft(
                creator1(),
                "ipfs://metadata/1".to_string(),
                500,
                "Art Collection".to_string(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (marketplace, _temp) = create_test_marketplace().await;

        assert_eq!(marketplace.admin(), &operator());
        assert_eq!(marketplace.marketplace_fee_bps().unwrap(), DEFAULT_FEE_BPS);
        assert!(marketplace.collection_names().unwrap().is_empty());
        assert!(marketplace.active_listing_ids().unwrap().is_empty());

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_collection() {
        let (marketplace, _temp) = create_test_marketplace().await;

        marketplace
            .create_collection(
                creator1(),
                "Art Collection".to_string(),
                "Digital art collection".to_string(),
            )
            .await
            .unwrap();

        let collection = marketplace.get_collection("Art Collection").unwrap();
        assert_eq!(collection.creator, creator1());
        assert_eq!(collection.name, "Art Collection");
        assert_eq!(collection.description, "Digital art collection");
        assert!(!collection.verified);

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_collection_name_rejected() {
        let (marketplace, _temp) = create_test_marketplace().await;

        marketplace
            .create_collection(
                creator1(),
                "Art Collection".to_string(),
                "Digital art collection".to_string(),
            )
            .await
            .unwrap();

        let result = marketplace
            .create_collection(
                creator2(),
                "Art Collection".to_string(),
                "Another collection".to_string(),
            )
            .await;
        assert!(matches!(result, Err(Error::DuplicateName(_))));

        // First creation is untouched
        let collection = marketplace.get_collection("Art Collection").unwrap();
        assert_eq!(collection.creator, creator1());
        assert_eq!(collection.description, "Digital art collection");
        assert_eq!(marketplace.collection_names().unwrap().len(), 1);

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_collection() {
        let (marketplace, _temp) = create_test_marketplace().await;

        marketplace
            .create_collection(creator1(), "Art Collection".to_string(), String::new())
            .await
            .unwrap();

        marketplace
            .verify_collection(operator(), "Art Collection".to_string(), true)
            .await
            .unwrap();
        assert!(marketplace.get_collection("Art Collection").unwrap().verified);

        // Non-administrators may not verify
        let result = marketplace
            .verify_collection(creator2(), "Art Collection".to_string(), true)
            .await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));

        // Unknown collection
        let result = marketplace
            .verify_collection(operator(), "Nope".to_string(), true)
            .await;
        assert!(matches!(result, Err(Error::CollectionNotFound(_))));

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_collection_names_in_creation_order() {
        let (marketplace, _temp) = create_test_marketplace().await;

        marketplace
            .create_collection(creator1(), "Art Collection".to_string(), String::new())
            .await
            .unwrap();
        marketplace
            .create_collection(creator2(), "Music Collection".to_string(), String::new())
            .await
            .unwrap();

        assert_eq!(
            marketplace.collection_names().unwrap(),
            vec!["Art Collection", "Music Collection"]
        );

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mint_nft() {
        let (marketplace, _temp) = create_test_marketplace().await;
        let token_id = with_minted_token(&marketplace).await;

        assert_eq!(token_id, 1);
        assert_eq!(marketplace.owner_of(1).unwrap(), creator1());
        assert_eq!(marketplace.token_royalty_percentage(1).unwrap(), 500);
        assert_eq!(marketplace.token_creator(1).unwrap(), creator1());
        assert_eq!(marketplace.token_collection(1).unwrap(), "Art Collection");
        assert_eq!(
            marketplace.collection_tokens("Art Collection").unwrap(),
            vec![1]
        );

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mint_into_unknown_collection() {
        let (marketplace, _temp) = create_test_marketplace().await;

        let result = marketplace
            .mint_nft(
                creator1(),
                "ipfs://metadata/1".to_string(),
                500,
                "Non-existent Collection".to_string(),
            )
            .await;
        assert!(matches!(result, Err(Error::CollectionNotFound(_))));

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mint_requires_collection_creator() {
        let (marketplace, _temp) = create_test_marketplace().await;

        marketplace
            .create_collection(creator1(), "Art Collection".to_string(), String::new())
            .await
            .unwrap();

        let result = marketplace
            .mint_nft(
                creator2(),
                "ipfs://metadata/1".to_string(),
                500,
                "Art Collection".to_string(),
            )
            .await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mint_royalty_ceiling() {
        let (marketplace, _temp) = create_test_marketplace().await;

        marketplace
            .create_collection(creator1(), "Art Collection".to_string(), String::new())
            .await
            .unwrap();

        let result = marketplace
            .mint_nft(
                creator1(),
                "ipfs://metadata/1".to_string(),
                1100,
                "Art Collection".to_string(),
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidRoyalty(1100))));

        // Exactly at the ceiling is allowed
        let token_id = marketplace
            .mint_nft(
                creator1(),
                "ipfs://metadata/1".to_string(),
                MAX_BPS,
                "Art Collection".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(
            marketplace.token_royalty_percentage(token_id).unwrap(),
            MAX_BPS
        );

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_royalty_percentage() {
        let (marketplace, _temp) = create_test_marketplace().await;
        let token_id = with_minted_token(&marketplace).await;

        marketplace
            .update_royalty_percentage(creator1(), token_id, 700)
            .await
            .unwrap();
        assert_eq!(marketplace.token_royalty_percentage(token_id).unwrap(), 700);

        let result = marketplace
            .update_royalty_percentage(creator2(), token_id, 700)
            .await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));

        let result = marketplace
            .update_royalty_percentage(creator1(), token_id, 1100)
            .await;
        assert!(matches!(result, Err(Error::InvalidRoyalty(1100))));

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_listing() {
        let (marketplace, _temp) = create_test_marketplace().await;
        let token_id = with_minted_token(&marketplace).await;

        let listing_id = marketplace
            .create_listing(creator1(), token_id, PRICE)
            .await
            .unwrap();
        assert_eq!(listing_id, 1);

        let listing = marketplace.get_listing(1).unwrap();
        assert_eq!(listing.listing_id, 1);
        assert_eq!(listing.token_id, token_id);
        assert_eq!(listing.seller, creator1());
        assert_eq!(listing.price, PRICE);
        assert!(listing.active);
        assert_eq!(listing.collection_name, "Art Collection");

        assert_eq!(marketplace.active_listing_ids().unwrap(), vec![1]);

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_listing_requires_token_owner() {
        let (marketplace, _temp) = create_test_marketplace().await;
        let token_id = with_minted_token(&marketplace).await;

        let result = marketplace.create_listing(creator2(), token_id, PRICE).await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_listing_rejects_zero_price() {
        let (marketplace, _temp) = create_test_marketplace().await;
        let token_id = with_minted_token(&marketplace).await;

        let result = marketplace.create_listing(creator1(), token_id, 0).await;
        assert!(matches!(result, Err(Error::InvalidPrice)));

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_listing() {
        let (marketplace, _temp) = create_test_marketplace().await;
        let token_id = with_minted_token(&marketplace).await;
        let listing_id = marketplace
            .create_listing(creator1(), token_id, PRICE)
            .await
            .unwrap();

        marketplace
            .cancel_listing(creator1(), listing_id)
            .await
            .unwrap();

        assert!(!marketplace.get_listing(listing_id).unwrap().active);
        assert!(marketplace.active_listing_ids().unwrap().is_empty());

        // Cancelling again fails with a distinct error
        let result = marketplace.cancel_listing(creator1(), listing_id).await;
        assert!(matches!(result, Err(Error::AlreadyInactive(_))));

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_requires_seller() {
        let (marketplace, _temp) = create_test_marketplace().await;
        let token_id = with_minted_token(&marketplace).await;
        let listing_id = marketplace
            .create_listing(creator1(), token_id, PRICE)
            .await
            .unwrap();

        let result = marketplace.cancel_listing(creator2(), listing_id).await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));
        assert!(marketplace.get_listing(listing_id).unwrap().active);

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_listing_for_same_token_rejected() {
        let (marketplace, _temp) = create_test_marketplace().await;
        let token_id = with_minted_token(&marketplace).await;

        let first = marketplace
            .create_listing(creator1(), token_id, PRICE)
            .await
            .unwrap();

        // A second active listing would leave a stale offer once the first
        // one sells
        let result = marketplace.create_listing(creator1(), token_id, 2 * PRICE).await;
        assert!(matches!(result, Err(Error::AlreadyListed(_))));
        assert_eq!(marketplace.active_listing_ids().unwrap(), vec![first]);

        // Cancelling frees the token for a fresh listing
        marketplace.cancel_listing(creator1(), first).await.unwrap();
        let second = marketplace
            .create_listing(creator1(), token_id, 2 * PRICE)
            .await
            .unwrap();

        // After a sale the new owner can list again
        marketplace
            .purchase_nft(buyer1(), second, 2 * PRICE)
            .await
            .unwrap();
        marketplace
            .create_listing(buyer1(), token_id, PRICE)
            .await
            .unwrap();

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_purchase_settlement() {
        let (marketplace, _temp) = create_test_marketplace().await;
        let token_id = with_minted_token(&marketplace).await;
        let listing_id = marketplace
            .create_listing(creator1(), token_id, PRICE)
            .await
            .unwrap();

        let receipt = marketplace
            .purchase_nft(buyer1(), listing_id, PRICE)
            .await
            .unwrap();

        let marketplace_fee = PRICE * 250 / 10_000; // 2.5%
        let royalty_fee = PRICE * 500 / 10_000; // 5%
        let seller_amount = PRICE - marketplace_fee - royalty_fee;

        assert_eq!(receipt.marketplace_fee, marketplace_fee);
        assert_eq!(receipt.royalty_fee, royalty_fee);
        assert_eq!(receipt.seller_amount, seller_amount);
        assert_eq!(receipt.refund, 0);

        // Ownership transferred, listing deactivated
        assert_eq!(marketplace.owner_of(token_id).unwrap(), buyer1());
        assert!(!marketplace.get_listing(listing_id).unwrap().active);
        assert!(marketplace.active_listing_ids().unwrap().is_empty());

        // Creator is also the seller here, so both credits land together
        assert_eq!(
            marketplace.user_balance(&creator1()).unwrap(),
            seller_amount + royalty_fee
        );
        assert_eq!(
            marketplace.user_balance(&operator()).unwrap(),
            marketplace_fee
        );

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_purchase_inactive_listing() {
        let (marketplace, _temp) = create_test_marketplace().await;
        let token_id = with_minted_token(&marketplace).await;
        let listing_id = marketplace
            .create_listing(creator1(), token_id, PRICE)
            .await
            .unwrap();
        marketplace
            .cancel_listing(creator1(), listing_id)
            .await
            .unwrap();

        let result = marketplace.purchase_nft(buyer1(), listing_id, PRICE).await;
        assert!(matches!(result, Err(Error::InactiveListing(_))));

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_purchase_insufficient_payment() {
        let (marketplace, _temp) = create_test_marketplace().await;
        let token_id = with_minted_token(&marketplace).await;
        let listing_id = marketplace
            .create_listing(creator1(), token_id, PRICE)
            .await
            .unwrap();

        let result = marketplace
            .purchase_nft(buyer1(), listing_id, PRICE - 1)
            .await;
        assert!(matches!(result, Err(Error::InsufficientPayment { .. })));

        // Nothing settled
        assert_eq!(marketplace.owner_of(token_id).unwrap(), creator1());
        assert!(marketplace.get_listing(listing_id).unwrap().active);
        assert_eq!(marketplace.user_balance(&creator1()).unwrap(), 0);

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_purchase_refunds_excess() {
        let gateway = Arc::new(RecordingGateway::new());
        let (marketplace, _temp) = create_with_gateway(gateway.clone()).await;
        let token_id = with_minted_token(&marketplace).await;
        let listing_id = marketplace
            .create_listing(creator1(), token_id, PRICE)
            .await
            .unwrap();

        let excess: Amount = 500_000_000_000_000_000;
        let receipt = marketplace
            .purchase_nft(buyer1(), listing_id, PRICE + excess)
            .await
            .unwrap();

        assert_eq!(receipt.refund, excess);
        assert_eq!(gateway.total_for(&buyer1()), excess);

        // Splits are computed from the price, never from the payment
        assert_eq!(
            receipt.marketplace_fee + receipt.royalty_fee + receipt.seller_amount,
            PRICE
        );

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_refund_aborts_purchase() {
        let (marketplace, _temp) = create_with_gateway(Arc::new(FailingGateway)).await;
        let token_id = with_minted_token(&marketplace).await;
        let listing_id = marketplace
            .create_listing(creator1(), token_id, PRICE)
            .await
            .unwrap();

        let result = marketplace
            .purchase_nft(buyer1(), listing_id, PRICE + 1)
            .await;
        assert!(matches!(result, Err(Error::Transfer(_))));

        // No partial settlement: owner, listing, index and balances intact
        assert_eq!(marketplace.owner_of(token_id).unwrap(), creator1());
        assert!(marketplace.get_listing(listing_id).unwrap().active);
        assert_eq!(marketplace.active_listing_ids().unwrap(), vec![listing_id]);
        assert_eq!(marketplace.user_balance(&creator1()).unwrap(), 0);
        assert_eq!(marketplace.user_balance(&operator()).unwrap(), 0);

        // Exact payment needs no refund and settles normally
        marketplace
            .purchase_nft(buyer1(), listing_id, PRICE)
            .await
            .unwrap();
        assert_eq!(marketplace.owner_of(token_id).unwrap(), buyer1());

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_withdraw_balance() {
        let gateway = Arc::new(RecordingGateway::new());
        let (marketplace, _temp) = create_with_gateway(gateway.clone()).await;
        let token_id = with_minted_token(&marketplace).await;
        let listing_id = marketplace
            .create_listing(creator1(), token_id, PRICE)
            .await
            .unwrap();
        marketplace
            .purchase_nft(buyer1(), listing_id, PRICE)
            .await
            .unwrap();

        let balance = marketplace.user_balance(&creator1()).unwrap();
        assert!(balance > 0);

        let withdrawn = marketplace.withdraw_balance(creator1()).await.unwrap();
        assert_eq!(withdrawn, balance);
        assert_eq!(gateway.total_for(&creator1()), balance);
        assert_eq!(marketplace.user_balance(&creator1()).unwrap(), 0);

        // Second consecutive withdrawal fails
        let result = marketplace.withdraw_balance(creator1()).await;
        assert!(matches!(result, Err(Error::NoBalance(_))));

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_withdraw_with_zero_balance() {
        let (marketplace, _temp) = create_test_marketplace().await;

        let result = marketplace.withdraw_balance(creator1()).await;
        assert!(matches!(result, Err(Error::NoBalance(_))));

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_withdrawal_restores_balance() {
        let (marketplace, _temp) = create_with_gateway(Arc::new(FailingGateway)).await;
        let token_id = with_minted_token(&marketplace).await;
        let listing_id = marketplace
            .create_listing(creator1(), token_id, PRICE)
            .await
            .unwrap();
        marketplace
            .purchase_nft(buyer1(), listing_id, PRICE)
            .await
            .unwrap();

        let balance = marketplace.user_balance(&creator1()).unwrap();
        let result = marketplace.withdraw_balance(creator1()).await;
        assert!(matches!(result, Err(Error::Transfer(_))));
        assert_eq!(marketplace.user_balance(&creator1()).unwrap(), balance);

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_marketplace_fee() {
        let (marketplace, _temp) = create_test_marketplace().await;

        marketplace
            .update_marketplace_fee(operator(), 300)
            .await
            .unwrap();
        assert_eq!(marketplace.marketplace_fee_bps().unwrap(), 300);

        let result = marketplace.update_marketplace_fee(creator1(), 300).await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));

        let result = marketplace.update_marketplace_fee(operator(), 1100).await;
        assert!(matches!(result, Err(Error::InvalidFee(1100))));

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_multiple_collections_and_purchases() {
        let (marketplace, _temp) = create_test_marketplace().await;

        marketplace
            .create_collection(creator1(), "Art Collection".to_string(), String::new())
            .await
            .unwrap();
        marketplace
            .create_collection(creator2(), "Music Collection".to_string(), String::new())
            .await
            .unwrap();

        marketplace
            .mint_nft(creator1(), "ipfs://metadata/1".to_string(), 500, "Art Collection".to_string())
            .await
            .unwrap();
        marketplace
            .mint_nft(creator1(), "ipfs://metadata/2".to_string(), 300, "Art Collection".to_string())
            .await
            .unwrap();
        marketplace
            .mint_nft(creator2(), "ipfs://metadata/3".to_string(), 700, "Music Collection".to_string())
            .await
            .unwrap();

        assert_eq!(
            marketplace.collection_tokens("Art Collection").unwrap(),
            vec![1, 2]
        );
        assert_eq!(
            marketplace.collection_tokens("Music Collection").unwrap(),
            vec![3]
        );

        marketplace.create_listing(creator1(), 1, PRICE).await.unwrap();
        marketplace
            .create_listing(creator1(), 2, 2 * PRICE)
            .await
            .unwrap();
        marketplace
            .create_listing(creator2(), 3, 3 * PRICE)
            .await
            .unwrap();
        assert_eq!(marketplace.active_listing_ids().unwrap(), vec![1, 2, 3]);

        marketplace.purchase_nft(buyer1(), 1, PRICE).await.unwrap();
        marketplace
            .purchase_nft(buyer2(), 3, 3 * PRICE)
            .await
            .unwrap();

        assert_eq!(marketplace.owner_of(1).unwrap(), buyer1());
        assert_eq!(marketplace.owner_of(2).unwrap(), creator1());
        assert_eq!(marketplace.owner_of(3).unwrap(), buyer2());
        assert_eq!(marketplace.active_listing_ids().unwrap(), vec![2]);

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        {
            let marketplace = Marketplace::open(config.clone(), operator()).await.unwrap();
            with_minted_token(&marketplace).await;
            marketplace
                .update_marketplace_fee(operator(), 300)
                .await
                .unwrap();
            marketplace.shutdown().await.unwrap();
        }

        // Reopen with a different admin argument; the recorded one wins
        let marketplace = Marketplace::open(config, AccountId::new("impostor"))
            .await
            .unwrap();
        assert_eq!(marketplace.admin(), &operator());
        assert_eq!(marketplace.marketplace_fee_bps().unwrap(), 300);
        assert_eq!(marketplace.owner_of(1).unwrap(), creator1());
        assert_eq!(
            marketplace.collection_tokens("Art Collection").unwrap(),
            vec![1]
        );

        // Counters continue where they left off
        let token_id = marketplace
            .mint_nft(
                creator1(),
                "ipfs://metadata/2".to_string(),
                500,
                "Art Collection".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(token_id, 2);

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_active_listings_gauge_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        {
            let marketplace = Marketplace::open(config.clone(), operator()).await.unwrap();
            marketplace
                .create_collection(creator1(), "Art Collection".to_string(), String::new())
                .await
                .unwrap();
            for i in 1..=2u64 {
                let token_id = marketplace
                    .mint_nft(
                        creator1(),
                        format!("ipfs://metadata/{}", i),
                        500,
                        "Art Collection".to_string(),
                    )
                    .await
                    .unwrap();
                marketplace
                    .create_listing(creator1(), token_id, PRICE)
                    .await
                    .unwrap();
            }
            assert_eq!(marketplace.metrics().active_listings.get(), 2);
            marketplace.shutdown().await.unwrap();
        }

        let marketplace = Marketplace::open(config, operator()).await.unwrap();
        assert_eq!(marketplace.metrics().active_listings.get(), 2);

        marketplace.purchase_nft(buyer1(), 1, PRICE).await.unwrap();
        assert_eq!(marketplace.metrics().active_listings.get(), 1);

        marketplace.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_event_log_mirrors_operations() {
        let (marketplace, _temp) = create_test_marketplace().await;
        let token_id = with_minted_token(&marketplace).await;
        let listing_id = marketplace
            .create_listing(creator1(), token_id, PRICE)
            .await
            .unwrap();
        marketplace
            .purchase_nft(buyer1(), listing_id, PRICE)
            .await
            .unwrap();

        let records = marketplace.events_since(0).unwrap();
        // create + mint + list + (purchase, royalty, fee)
        assert_eq!(records.len(), 6);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.seq, i as u64);
        }
        assert!(matches!(
            records[3].event,
            crate::types::MarketplaceEvent::TokenPurchased { .. }
        ));
        assert!(matches!(
            records[4].event,
            crate::types::MarketplaceEvent::RoyaltyPaid { .. }
        ));
        assert!(matches!(
            records[5].event,
            crate::types::MarketplaceEvent::MarketplaceFeePaid { .. }
        ));

        marketplace.shutdown().await.unwrap();
    }
}
