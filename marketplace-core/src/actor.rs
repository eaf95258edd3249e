//! Actor-based concurrency for the marketplace ledger
//!
//! This module implements the single-writer pattern using a Tokio actor:
//! one logical writer task executes every state-mutating operation to
//! completion before picking up the next, so operations are totally ordered
//! and never interleave mid-execution. Reads go straight to storage and
//! only ever observe committed state.
//!
//! The actor also owns the transfer gateway. Refunds run before the
//! purchase batch commits, and withdrawals zero the escrowed balance before
//! paying out, so a misbehaving gateway can never observe or exploit stale
//! internal state.

use crate::{
    gateway::TransferGateway,
    metrics::Metrics,
    settlement::compute_split,
    types::{
        AccountId, Amount, BasisPoints, Collection, EventRecord, Listing, MarketplaceEvent,
        PurchaseReceipt, Token, MAX_BPS,
    },
    Error, Result, Storage,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the marketplace actor
pub enum MarketplaceMessage {
    /// Register a new collection
    CreateCollection {
        /// Calling identity (becomes the collection creator)
        caller: AccountId,
        /// Collection name
        name: String,
        /// Collection description
        description: String,
        /// Response channel
        response: oneshot::Sender<Result<()>>,
    },

    /// Toggle a collection's verified flag (administrator only)
    VerifyCollection {
        /// Calling identity
        caller: AccountId,
        /// Collection name
        name: String,
        /// New flag value
        verified: bool,
        /// Response channel
        response: oneshot::Sender<Result<()>>,
    },

    /// Mint a token into a collection (collection creator only)
    MintNft {
        /// Calling identity
        caller: AccountId,
        /// Metadata reference
        uri: String,
        /// Royalty in basis points
        royalty_bps: BasisPoints,
        /// Target collection
        collection_name: String,
        /// Response channel carrying the assigned token id
        response: oneshot::Sender<Result<u64>>,
    },

    /// Update a token's royalty percentage (token creator only)
    UpdateRoyalty {
        /// Calling identity
        caller: AccountId,
        /// Token id
        token_id: u64,
        /// New royalty in basis points
        royalty_bps: BasisPoints,
        /// Response channel
        response: oneshot::Sender<Result<()>>,
    },

    /// List a token for sale (token owner only)
    CreateListing {
        /// Calling identity
        caller: AccountId,
        /// Token to list
        token_id: u64,
        /// Asking price
        price: Amount,
        /// Response channel carrying the assigned listing id
        response: oneshot::Sender<Result<u64>>,
    },

    /// Cancel an active listing (seller only)
    CancelListing {
        /// Calling identity
        caller: AccountId,
        /// Listing id
        listing_id: u64,
        /// Response channel
        response: oneshot::Sender<Result<()>>,
    },

    /// Purchase an active listing
    PurchaseNft {
        /// Calling identity (the buyer)
        caller: AccountId,
        /// Listing id
        listing_id: u64,
        /// Value sent with the purchase
        payment: Amount,
        /// Response channel carrying the settlement receipt
        response: oneshot::Sender<Result<PurchaseReceipt>>,
    },

    /// Withdraw the caller's entire escrowed balance
    WithdrawBalance {
        /// Calling identity
        caller: AccountId,
        /// Response channel carrying the amount withdrawn
        response: oneshot::Sender<Result<Amount>>,
    },

    /// Update the marketplace fee (administrator only)
    UpdateMarketplaceFee {
        /// Calling identity
        caller: AccountId,
        /// New fee in basis points
        fee_bps: BasisPoints,
        /// Response channel
        response: oneshot::Sender<Result<()>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes marketplace messages
pub struct MarketplaceActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Outbound value transfer primitive
    gateway: Arc<dyn TransferGateway>,

    /// Metrics collector
    metrics: Metrics,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<MarketplaceMessage>,
}

impl MarketplaceActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        gateway: Arc<dyn TransferGateway>,
        metrics: Metrics,
        mailbox: mpsc::Receiver<MarketplaceMessage>,
    ) -> Self {
        Self {
            storage,
            gateway,
            metrics,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if matches!(msg, MarketplaceMessage::Shutdown) {
                break;
            }
            self.handle_message(msg);
        }

        tracing::debug!("Marketplace actor stopped");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: MarketplaceMessage) {
        match msg {
            MarketplaceMessage::CreateCollection {
                caller,
                name,
                description,
                response,
            } => {
                let result = self.create_collection(caller, name, description);
                let _ = response.send(result);
            }

            MarketplaceMessage::VerifyCollection {
                caller,
                name,
                verified,
                response,
            } => {
                let result = self.verify_collection(caller, name, verified);
                let _ = response.send(result);
            }

            MarketplaceMessage::MintNft {
                caller,
                uri,
                royalty_bps,
                collection_name,
                response,
            } => {
                let result = self.mint_nft(caller, uri, royalty_bps, collection_name);
                let _ = response.send(result);
            }

            MarketplaceMessage::UpdateRoyalty {
                caller,
                token_id,
                royalty_bps,
                response,
            } => {
                let result = self.update_royalty(caller, token_id, royalty_bps);
                let _ = response.send(result);
            }

            MarketplaceMessage::CreateListing {
                caller,
                token_id,
                price,
                response,
            } => {
                let result = self.create_listing(caller, token_id, price);
                let _ = response.send(result);
            }

            MarketplaceMessage::CancelListing {
                caller,
                listing_id,
                response,
            } => {
                let result = self.cancel_listing(caller, listing_id);
                let _ = response.send(result);
            }

            MarketplaceMessage::PurchaseNft {
                caller,
                listing_id,
                payment,
                response,
            } => {
                let result = self.purchase_nft(caller, listing_id, payment);
                let _ = response.send(result);
            }

            MarketplaceMessage::WithdrawBalance { caller, response } => {
                let result = self.withdraw_balance(caller);
                let _ = response.send(result);
            }

            MarketplaceMessage::UpdateMarketplaceFee {
                caller,
                fee_bps,
                response,
            } => {
                let result = self.update_marketplace_fee(caller, fee_bps);
                let _ = response.send(result);
            }

            MarketplaceMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    fn ensure_admin(&self, caller: &AccountId, action: &str) -> Result<AccountId> {
        let admin = self.storage.admin()?;
        if caller != &admin {
            return Err(Error::Unauthorized(format!(
                "only the administrator can {}",
                action
            )));
        }
        Ok(admin)
    }

    fn log_records(&self, records: &[EventRecord]) {
        for record in records {
            let json = serde_json::to_string(&record.event).unwrap_or_default();
            tracing::info!(seq = record.seq, event = %json, "Marketplace event");
        }
    }

    // Operations

    fn create_collection(
        &mut self,
        caller: AccountId,
        name: String,
        description: String,
    ) -> Result<()> {
        if self.storage.collection_exists(&name)? {
            return Err(Error::DuplicateName(name));
        }

        let collection = Collection {
            name: name.clone(),
            creator: caller.clone(),
            description,
            verified: false,
        };

        let record = self.storage.insert_collection(
            &collection,
            MarketplaceEvent::CollectionCreated {
                name,
                creator: caller,
            },
        )?;

        self.log_records(std::slice::from_ref(&record));
        self.metrics.collections_created.inc();

        Ok(())
    }

    fn verify_collection(&mut self, caller: AccountId, name: String, verified: bool) -> Result<()> {
        self.ensure_admin(&caller, "verify collections")?;

        let mut collection = self.storage.get_collection(&name)?;
        collection.verified = verified;

        let record = self.storage.update_collection(
            &collection,
            MarketplaceEvent::CollectionVerified { name, verified },
        )?;

        self.log_records(std::slice::from_ref(&record));

        Ok(())
    }

    fn mint_nft(
        &mut self,
        caller: AccountId,
        uri: String,
        royalty_bps: BasisPoints,
        collection_name: String,
    ) -> Result<u64> {
        let collection = self.storage.get_collection(&collection_name)?;

        if caller != collection.creator {
            return Err(Error::Unauthorized(
                "only the collection creator can mint to this collection".to_string(),
            ));
        }

        if royalty_bps > MAX_BPS {
            return Err(Error::InvalidRoyalty(royalty_bps));
        }

        let token_id = self.storage.next_token_id()?;
        let token = Token {
            token_id,
            owner: caller.clone(),
            creator: caller.clone(),
            royalty_bps,
            uri: uri.clone(),
            collection_name: collection_name.clone(),
        };

        let record = self.storage.insert_token(
            &token,
            MarketplaceEvent::TokenMinted {
                token_id,
                creator: caller,
                uri,
                collection_name,
            },
        )?;

        self.log_records(std::slice::from_ref(&record));
        self.metrics.tokens_minted.inc();

        Ok(token_id)
    }

    fn update_royalty(
        &mut self,
        caller: AccountId,
        token_id: u64,
        royalty_bps: BasisPoints,
    ) -> Result<()> {
        let mut token = self.storage.get_token(token_id)?;

        if caller != token.creator {
            return Err(Error::Unauthorized(
                "only the token creator can update the royalty".to_string(),
            ));
        }

        if royalty_bps > MAX_BPS {
            return Err(Error::InvalidRoyalty(royalty_bps));
        }

        token.royalty_bps = royalty_bps;
        self.storage.update_token(&token)
    }

    fn create_listing(&mut self, caller: AccountId, token_id: u64, price: Amount) -> Result<u64> {
        let token = self.storage.get_token(token_id)?;

        if caller != token.owner {
            return Err(Error::Unauthorized(
                "only the token owner can create a listing".to_string(),
            ));
        }

        if price == 0 {
            return Err(Error::InvalidPrice);
        }

        // One active listing per token; a second would let a sale through
        // the first leave a stale offer behind
        if self.storage.active_listing_for_token(token_id)?.is_some() {
            return Err(Error::AlreadyListed(token_id));
        }

        let listing_id = self.storage.next_listing_id()?;
        let listing = Listing {
            listing_id,
            token_id,
            seller: caller.clone(),
            price,
            active: true,
            collection_name: token.collection_name.clone(),
        };

        let record = self.storage.insert_listing(
            &listing,
            MarketplaceEvent::ListingCreated {
                listing_id,
                token_id,
                seller: caller,
                price,
            },
        )?;

        self.log_records(std::slice::from_ref(&record));
        self.metrics.listings_created.inc();
        self.metrics.active_listings.inc();

        Ok(listing_id)
    }

    fn cancel_listing(&mut self, caller: AccountId, listing_id: u64) -> Result<()> {
        let mut listing = self.storage.get_listing(listing_id)?;

        if caller != listing.seller {
            return Err(Error::Unauthorized(
                "only the seller can cancel this listing".to_string(),
            ));
        }

        if !listing.active {
            return Err(Error::AlreadyInactive(listing_id));
        }

        listing.active = false;

        let record = self.storage.deactivate_listing(
            &listing,
            MarketplaceEvent::ListingCancelled {
                listing_id,
                token_id: listing.token_id,
                seller: caller,
            },
        )?;

        self.log_records(std::slice::from_ref(&record));
        self.metrics.active_listings.dec();

        Ok(())
    }

    fn purchase_nft(
        &mut self,
        caller: AccountId,
        listing_id: u64,
        payment: Amount,
    ) -> Result<PurchaseReceipt> {
        let mut listing = self.storage.get_listing(listing_id)?;

        if !listing.active {
            return Err(Error::InactiveListing(listing_id));
        }

        if payment < listing.price {
            return Err(Error::InsufficientPayment {
                required: listing.price,
                provided: payment,
            });
        }

        let mut token = self.storage.get_token(listing.token_id)?;

        // A listing whose seller no longer owns the token cannot settle
        if token.owner != listing.seller {
            return Err(Error::InactiveListing(listing_id));
        }

        let fee_bps = self.storage.fee_bps()?;
        let admin = self.storage.admin()?;
        let split = compute_split(listing.price, fee_bps, token.royalty_bps);

        // Credits on the same identity are additive (seller may also be the
        // creator, or the administrator)
        let mut credits: Vec<(AccountId, Amount)> = Vec::with_capacity(3);
        for (account, delta) in [
            (admin.clone(), split.marketplace_fee),
            (token.creator.clone(), split.royalty_fee),
            (listing.seller.clone(), split.seller_amount),
        ] {
            match credits.iter_mut().find(|(a, _)| *a == account) {
                Some(entry) => entry.1 += delta,
                None => credits.push((account, delta)),
            }
        }

        let mut new_balances = Vec::with_capacity(credits.len());
        for (account, delta) in credits {
            let current = self.storage.balance(&account)?;
            new_balances.push((account, current + delta));
        }

        let seller = listing.seller.clone();
        let creator = token.creator.clone();
        let token_id = token.token_id;
        let price = listing.price;
        let refund = payment - price;

        token.owner = caller.clone();
        listing.active = false;

        // Refund runs first: if it fails, nothing below commits and the
        // purchase is a no-op
        if refund > 0 {
            self.gateway.transfer(&caller, refund)?;
        }

        let events = [
            MarketplaceEvent::TokenPurchased {
                listing_id,
                token_id,
                buyer: caller,
                seller,
                price,
            },
            MarketplaceEvent::RoyaltyPaid {
                token_id,
                creator,
                amount: split.royalty_fee,
            },
            MarketplaceEvent::MarketplaceFeePaid {
                recipient: admin,
                amount: split.marketplace_fee,
            },
        ];

        let records = self
            .storage
            .commit_purchase(&token, &listing, &new_balances, &events)?;

        self.log_records(&records);
        self.metrics.purchases.inc();
        self.metrics.active_listings.dec();

        Ok(PurchaseReceipt {
            listing_id,
            token_id,
            price,
            marketplace_fee: split.marketplace_fee,
            royalty_fee: split.royalty_fee,
            seller_amount: split.seller_amount,
            refund,
        })
    }

    fn withdraw_balance(&mut self, caller: AccountId) -> Result<Amount> {
        let amount = self.storage.balance(&caller)?;
        if amount == 0 {
            return Err(Error::NoBalance(caller.to_string()));
        }

        // Zero the balance before paying out (checks-effects-interactions)
        self.storage.set_balance(&caller, 0)?;

        if let Err(err) = self.gateway.transfer(&caller, amount) {
            // Restore the escrowed balance; the withdrawal is a no-op
            if let Err(restore_err) = self.storage.set_balance(&caller, amount) {
                tracing::error!(
                    account = %caller,
                    amount,
                    error = %restore_err,
                    "Balance restore failed after rejected withdrawal; manual reconciliation required"
                );
                return Err(Error::LostEscrow {
                    account: caller.to_string(),
                    amount,
                    cause: restore_err.to_string(),
                });
            }
            tracing::warn!(account = %caller, amount, "Withdrawal transfer failed, balance restored");
            return Err(err);
        }

        self.metrics.withdrawals.inc();
        tracing::info!(account = %caller, amount, "Balance withdrawn");

        Ok(amount)
    }

    fn update_marketplace_fee(&mut self, caller: AccountId, fee_bps: BasisPoints) -> Result<()> {
        self.ensure_admin(&caller, "update the marketplace fee")?;

        if fee_bps > MAX_BPS {
            return Err(Error::InvalidFee(fee_bps));
        }

        self.storage.set_fee_bps(fee_bps)
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct MarketplaceHandle {
    sender: mpsc::Sender<MarketplaceMessage>,
}

impl MarketplaceHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<MarketplaceMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        rx: oneshot::Receiver<Result<T>>,
        send: impl std::future::Future<Output = std::result::Result<(), mpsc::error::SendError<MarketplaceMessage>>>,
    ) -> Result<T> {
        send.await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Register a new collection
    pub async fn create_collection(
        &self,
        caller: AccountId,
        name: String,
        description: String,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let send = self.sender.send(MarketplaceMessage::CreateCollection {
            caller,
            name,
            description,
            response: tx,
        });
        self.request(rx, send).await
    }

    /// Toggle a collection's verified flag
    pub async fn verify_collection(
        &self,
        caller: AccountId,
        name: String,
        verified: bool,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let send = self.sender.send(MarketplaceMessage::VerifyCollection {
            caller,
            name,
            verified,
            response: tx,
        });
        self.request(rx, send).await
    }

    /// Mint a token into a collection
    pub async fn mint_nft(
        &self,
        caller: AccountId,
        uri: String,
        royalty_bps: BasisPoints,
        collection_name: String,
    ) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        let send = self.sender.send(MarketplaceMessage::MintNft {
            caller,
            uri,
            royalty_bps,
            collection_name,
            response: tx,
        });
        self.request(rx, send).await
    }

    /// Update a token's royalty percentage
    pub async fn update_royalty(
        &self,
        caller: AccountId,
        token_id: u64,
        royalty_bps: BasisPoints,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let send = self.sender.send(MarketplaceMessage::UpdateRoyalty {
            caller,
            token_id,
            royalty_bps,
            response: tx,
        });
        self.request(rx, send).await
    }

    /// List a token for sale
    pub async fn create_listing(
        &self,
        caller: AccountId,
        token_id: u64,
        price: Amount,
    ) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        let send = self.sender.send(MarketplaceMessage::CreateListing {
            caller,
            token_id,
            price,
            response: tx,
        });
        self.request(rx, send).await
    }

    /// Cancel an active listing
    pub async fn cancel_listing(&self, caller: AccountId, listing_id: u64) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let send = self.sender.send(MarketplaceMessage::CancelListing {
            caller,
            listing_id,
            response: tx,
        });
        self.request(rx, send).await
    }

    /// Purchase an active listing
    pub async fn purchase_nft(
        &self,
        caller: AccountId,
        listing_id: u64,
        payment: Amount,
    ) -> Result<PurchaseReceipt> {
        let (tx, rx) = oneshot::channel();
        let send = self.sender.send(MarketplaceMessage::PurchaseNft {
            caller,
            listing_id,
            payment,
            response: tx,
        });
        self.request(rx, send).await
    }

    /// Withdraw the caller's entire escrowed balance
    pub async fn withdraw_balance(&self, caller: AccountId) -> Result<Amount> {
        let (tx, rx) = oneshot::channel();
        let send = self
            .sender
            .send(MarketplaceMessage::WithdrawBalance { caller, response: tx });
        self.request(rx, send).await
    }

    /// Update the marketplace fee
    pub async fn update_marketplace_fee(
        &self,
        caller: AccountId,
        fee_bps: BasisPoints,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let send = self.sender.send(MarketplaceMessage::UpdateMarketplaceFee {
            caller,
            fee_bps,
            response: tx,
        });
        self.request(rx, send).await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(MarketplaceMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the marketplace actor
pub fn spawn_marketplace_actor(
    storage: Arc<Storage>,
    gateway: Arc<dyn TransferGateway>,
    metrics: Metrics,
) -> MarketplaceHandle {
    let (tx, rx) = mpsc::channel(1024); // Bounded channel for backpressure
    let actor = MarketplaceActor::new(storage, gateway, metrics, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    MarketplaceHandle::new(tx)
}
