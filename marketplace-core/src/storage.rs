//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `collections` - Collection records (key: name)
//! - `tokens` - Token records (key: token id, big-endian)
//! - `listings` - Listing records (key: listing id, big-endian)
//! - `balances` - Escrowed balances (key: account)
//! - `events` - Append-only event log (key: event sequence, big-endian)
//! - `indices` - Secondary indexes (insertion order, membership)
//! - `meta` - Scalars: administrator, fee, id counters
//!
//! Every mutating operation goes through a single `WriteBatch`, so a state
//! transition and its events and index updates commit atomically or not at
//! all.

use crate::{
    error::{Error, Result},
    types::{
        AccountId, Amount, BasisPoints, Collection, EventRecord, Listing, MarketplaceEvent, Token,
        DEFAULT_FEE_BPS,
    },
    Config,
};
use chrono::Utc;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_COLLECTIONS: &str = "collections";
const CF_TOKENS: &str = "tokens";
const CF_LISTINGS: &str = "listings";
const CF_BALANCES: &str = "balances";
const CF_EVENTS: &str = "events";
const CF_INDICES: &str = "indices";
const CF_META: &str = "meta";

/// Meta keys
const META_ADMIN: &[u8] = b"admin";
const META_FEE_BPS: &[u8] = b"fee_bps";
const META_NEXT_TOKEN_ID: &[u8] = b"next_token_id";
const META_NEXT_LISTING_ID: &[u8] = b"next_listing_id";
const META_NEXT_EVENT_SEQ: &[u8] = b"next_event_seq";
const META_NEXT_NAME_SEQ: &[u8] = b"next_name_seq";

/// Index key prefixes
const IDX_COLLECTION_NAMES: &[u8] = b"cn";
const IDX_COLLECTION_TOKENS: &[u8] = b"ct";
const IDX_ACTIVE_LISTINGS: &[u8] = b"al";
const IDX_TOKEN_LISTING: &[u8] = b"tl";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_COLLECTIONS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_TOKENS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_LISTINGS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_EVENTS, Self::cf_options_events()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_META, Self::cf_options_state()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "Opened RocksDB");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // Frequently read records, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_events() -> Options {
        let mut opts = Options::default();
        // Append-only log, favor compression ratio
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Key helpers

    fn id_key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn name_index_key(seq: u64) -> Vec<u8> {
        let mut key = IDX_COLLECTION_NAMES.to_vec();
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    /// Prefix for one collection's token index.
    ///
    /// The name is length-prefixed so a name that extends another cannot
    /// alias its index range.
    fn collection_tokens_prefix(name: &str) -> Vec<u8> {
        let mut key = IDX_COLLECTION_TOKENS.to_vec();
        key.extend_from_slice(&(name.len() as u32).to_be_bytes());
        key.extend_from_slice(name.as_bytes());
        key
    }

    fn collection_token_key(name: &str, token_id: u64) -> Vec<u8> {
        let mut key = Self::collection_tokens_prefix(name);
        key.extend_from_slice(&token_id.to_be_bytes());
        key
    }

    fn active_listing_key(listing_id: u64) -> Vec<u8> {
        let mut key = IDX_ACTIVE_LISTINGS.to_vec();
        key.extend_from_slice(&listing_id.to_be_bytes());
        key
    }

    fn token_listing_key(token_id: u64) -> Vec<u8> {
        let mut key = IDX_TOKEN_LISTING.to_vec();
        key.extend_from_slice(&token_id.to_be_bytes());
        key
    }

    // Meta scalars

    fn read_counter(&self, key: &[u8], default: u64) -> Result<u64> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt counter value".to_string()))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(default),
        }
    }

    /// Record administrator, fee and counters on first open.
    ///
    /// The administrator stored at first open is authoritative; later opens
    /// keep it regardless of the argument.
    pub fn init_meta(&self, admin: &AccountId) -> Result<AccountId> {
        let cf = self.cf_handle(CF_META)?;

        if let Some(bytes) = self.db.get_cf(cf, META_ADMIN)? {
            let stored: AccountId = bincode::deserialize(&bytes)?;
            if &stored != admin {
                tracing::warn!(
                    stored = %stored,
                    requested = %admin,
                    "Administrator already recorded; keeping stored identity"
                );
            }
            return Ok(stored);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(cf, META_ADMIN, bincode::serialize(admin)?);
        batch.put_cf(cf, META_FEE_BPS, bincode::serialize(&DEFAULT_FEE_BPS)?);
        batch.put_cf(cf, META_NEXT_TOKEN_ID, 1u64.to_be_bytes());
        batch.put_cf(cf, META_NEXT_LISTING_ID, 1u64.to_be_bytes());
        batch.put_cf(cf, META_NEXT_EVENT_SEQ, 0u64.to_be_bytes());
        batch.put_cf(cf, META_NEXT_NAME_SEQ, 0u64.to_be_bytes());
        self.db.write(batch)?;

        tracing::info!(admin = %admin, fee_bps = DEFAULT_FEE_BPS, "Marketplace state initialized");

        Ok(admin.clone())
    }

    /// Administrator identity
    pub fn admin(&self) -> Result<AccountId> {
        let cf = self.cf_handle(CF_META)?;
        let bytes = self
            .db
            .get_cf(cf, META_ADMIN)?
            .ok_or_else(|| Error::Storage("Administrator not initialized".to_string()))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Current marketplace fee in basis points
    pub fn fee_bps(&self) -> Result<BasisPoints> {
        let cf = self.cf_handle(CF_META)?;
        let bytes = self
            .db
            .get_cf(cf, META_FEE_BPS)?
            .ok_or_else(|| Error::Storage("Fee not initialized".to_string()))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Update the marketplace fee
    pub fn set_fee_bps(&self, bps: BasisPoints) -> Result<()> {
        let cf = self.cf_handle(CF_META)?;
        self.db.put_cf(cf, META_FEE_BPS, bincode::serialize(&bps)?)?;
        Ok(())
    }

    /// Next token id to be assigned
    pub fn next_token_id(&self) -> Result<u64> {
        self.read_counter(META_NEXT_TOKEN_ID, 1)
    }

    /// Next listing id to be assigned
    pub fn next_listing_id(&self) -> Result<u64> {
        self.read_counter(META_NEXT_LISTING_ID, 1)
    }

    // Event staging

    /// Stage events into `batch` with consecutive sequence numbers.
    fn stage_events(
        &self,
        batch: &mut WriteBatch,
        events: &[MarketplaceEvent],
    ) -> Result<Vec<EventRecord>> {
        let cf_events = self.cf_handle(CF_EVENTS)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let first_seq = self.read_counter(META_NEXT_EVENT_SEQ, 0)?;
        let mut records = Vec::with_capacity(events.len());

        for (offset, event) in events.iter().enumerate() {
            let record = EventRecord {
                seq: first_seq + offset as u64,
                event_id: Uuid::now_v7(),
                timestamp: Utc::now(),
                event: event.clone(),
            };
            batch.put_cf(cf_events, Self::id_key(record.seq), bincode::serialize(&record)?);
            records.push(record);
        }

        let next_seq = first_seq + events.len() as u64;
        batch.put_cf(cf_meta, META_NEXT_EVENT_SEQ, next_seq.to_be_bytes());

        Ok(records)
    }

    // Collection operations

    /// Whether a collection with this name exists
    pub fn collection_exists(&self, name: &str) -> Result<bool> {
        let cf = self.cf_handle(CF_COLLECTIONS)?;
        Ok(self.db.get_cf(cf, name.as_bytes())?.is_some())
    }

    /// Get collection by name
    pub fn get_collection(&self, name: &str) -> Result<Collection> {
        let cf = self.cf_handle(CF_COLLECTIONS)?;
        let bytes = self
            .db
            .get_cf(cf, name.as_bytes())?
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Insert a new collection, appending its name to the name index (atomic)
    pub fn insert_collection(
        &self,
        collection: &Collection,
        event: MarketplaceEvent,
    ) -> Result<EventRecord> {
        let cf_collections = self.cf_handle(CF_COLLECTIONS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let name_seq = self.read_counter(META_NEXT_NAME_SEQ, 0)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            cf_collections,
            collection.name.as_bytes(),
            bincode::serialize(collection)?,
        );
        batch.put_cf(
            cf_indices,
            Self::name_index_key(name_seq),
            collection.name.as_bytes(),
        );
        batch.put_cf(cf_meta, META_NEXT_NAME_SEQ, (name_seq + 1).to_be_bytes());

        let mut records = self.stage_events(&mut batch, std::slice::from_ref(&event))?;
        self.db.write(batch)?;

        Ok(records.remove(0))
    }

    /// Overwrite an existing collection record (atomic with its event)
    pub fn update_collection(
        &self,
        collection: &Collection,
        event: MarketplaceEvent,
    ) -> Result<EventRecord> {
        let cf = self.cf_handle(CF_COLLECTIONS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf, collection.name.as_bytes(), bincode::serialize(collection)?);

        let mut records = self.stage_events(&mut batch, std::slice::from_ref(&event))?;
        self.db.write(batch)?;

        Ok(records.remove(0))
    }

    /// All collection names in insertion order
    pub fn collection_names(&self) -> Result<Vec<String>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let mut names = Vec::new();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(IDX_COLLECTION_NAMES, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(IDX_COLLECTION_NAMES) {
                break;
            }
            let name = String::from_utf8(value.to_vec())
                .map_err(|_| Error::Storage("Corrupt collection name index".to_string()))?;
            names.push(name);
        }

        Ok(names)
    }

    /// Token ids minted into a collection, in mint order
    pub fn collection_tokens(&self, name: &str) -> Result<Vec<u64>> {
        if !self.collection_exists(name)? {
            return Err(Error::CollectionNotFound(name.to_string()));
        }

        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = Self::collection_tokens_prefix(name);
        let mut token_ids = Vec::new();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id_bytes: [u8; 8] = key[key.len() - 8..]
                .try_into()
                .map_err(|_| Error::Storage("Corrupt collection token index".to_string()))?;
            token_ids.push(u64::from_be_bytes(id_bytes));
        }

        Ok(token_ids)
    }

    // Token operations

    /// Get token by id
    pub fn get_token(&self, token_id: u64) -> Result<Token> {
        let cf = self.cf_handle(CF_TOKENS)?;
        let bytes = self
            .db
            .get_cf(cf, Self::id_key(token_id))?
            .ok_or(Error::TokenNotFound(token_id))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Insert a newly minted token, appending it to its collection's token
    /// index and advancing the token id counter (atomic)
    pub fn insert_token(&self, token: &Token, event: MarketplaceEvent) -> Result<EventRecord> {
        let cf_tokens = self.cf_handle(CF_TOKENS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_tokens, Self::id_key(token.token_id), bincode::serialize(token)?);
        batch.put_cf(
            cf_indices,
            Self::collection_token_key(&token.collection_name, token.token_id),
            b"",
        );
        batch.put_cf(
            cf_meta,
            META_NEXT_TOKEN_ID,
            (token.token_id + 1).to_be_bytes(),
        );

        let mut records = self.stage_events(&mut batch, std::slice::from_ref(&event))?;
        self.db.write(batch)?;

        Ok(records.remove(0))
    }

    /// Overwrite an existing token record (royalty update; no event)
    pub fn update_token(&self, token: &Token) -> Result<()> {
        let cf = self.cf_handle(CF_TOKENS)?;
        self.db
            .put_cf(cf, Self::id_key(token.token_id), bincode::serialize(token)?)?;
        Ok(())
    }

    // Listing operations

    /// Get listing by id
    pub fn get_listing(&self, listing_id: u64) -> Result<Listing> {
        let cf = self.cf_handle(CF_LISTINGS)?;
        let bytes = self
            .db
            .get_cf(cf, Self::id_key(listing_id))?
            .ok_or(Error::ListingNotFound(listing_id))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Insert a new listing, adding it to the active index and advancing the
    /// listing id counter (atomic)
    pub fn insert_listing(&self, listing: &Listing, event: MarketplaceEvent) -> Result<EventRecord> {
        let cf_listings = self.cf_handle(CF_LISTINGS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            cf_listings,
            Self::id_key(listing.listing_id),
            bincode::serialize(listing)?,
        );
        batch.put_cf(cf_indices, Self::active_listing_key(listing.listing_id), b"");
        batch.put_cf(
            cf_indices,
            Self::token_listing_key(listing.token_id),
            Self::id_key(listing.listing_id),
        );
        batch.put_cf(
            cf_meta,
            META_NEXT_LISTING_ID,
            (listing.listing_id + 1).to_be_bytes(),
        );

        let mut records = self.stage_events(&mut batch, std::slice::from_ref(&event))?;
        self.db.write(batch)?;

        Ok(records.remove(0))
    }

    /// Mark a listing inactive and drop it from the active index (atomic)
    pub fn deactivate_listing(
        &self,
        listing: &Listing,
        event: MarketplaceEvent,
    ) -> Result<EventRecord> {
        let cf_listings = self.cf_handle(CF_LISTINGS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            cf_listings,
            Self::id_key(listing.listing_id),
            bincode::serialize(listing)?,
        );
        batch.delete_cf(cf_indices, Self::active_listing_key(listing.listing_id));
        batch.delete_cf(cf_indices, Self::token_listing_key(listing.token_id));

        let mut records = self.stage_events(&mut batch, std::slice::from_ref(&event))?;
        self.db.write(batch)?;

        Ok(records.remove(0))
    }

    /// Active listing id for a token, if one exists
    ///
    /// At most one listing per token is active at a time; the entry is
    /// dropped atomically with listing deactivation.
    pub fn active_listing_for_token(&self, token_id: u64) -> Result<Option<u64>> {
        let cf = self.cf_handle(CF_INDICES)?;
        match self.db.get_cf(cf, Self::token_listing_key(token_id))? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt token listing index".to_string()))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Currently active listing ids, in insertion order
    pub fn active_listing_ids(&self) -> Result<Vec<u64>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let mut ids = Vec::new();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(IDX_ACTIVE_LISTINGS, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(IDX_ACTIVE_LISTINGS) {
                break;
            }
            let id_bytes: [u8; 8] = key[key.len() - 8..]
                .try_into()
                .map_err(|_| Error::Storage("Corrupt active listing index".to_string()))?;
            ids.push(u64::from_be_bytes(id_bytes));
        }

        Ok(ids)
    }

    // Balance operations

    /// Escrowed balance for an account; unknown accounts hold zero
    pub fn balance(&self, account: &AccountId) -> Result<Amount> {
        let cf = self.cf_handle(CF_BALANCES)?;
        match self.db.get_cf(cf, account.as_str().as_bytes())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(0),
        }
    }

    /// Overwrite an account's balance; zero removes the entry
    pub fn set_balance(&self, account: &AccountId, amount: Amount) -> Result<()> {
        let cf = self.cf_handle(CF_BALANCES)?;
        if amount == 0 {
            self.db.delete_cf(cf, account.as_str().as_bytes())?;
        } else {
            self.db
                .put_cf(cf, account.as_str().as_bytes(), bincode::serialize(&amount)?)?;
        }
        Ok(())
    }

    /// Commit a purchase settlement: ownership transfer, listing
    /// deactivation, balance credits and the three settlement events, all
    /// in one write
    pub fn commit_purchase(
        &self,
        token: &Token,
        listing: &Listing,
        new_balances: &[(AccountId, Amount)],
        events: &[MarketplaceEvent],
    ) -> Result<Vec<EventRecord>> {
        let cf_tokens = self.cf_handle(CF_TOKENS)?;
        let cf_listings = self.cf_handle(CF_LISTINGS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let cf_balances = self.cf_handle(CF_BALANCES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_tokens, Self::id_key(token.token_id), bincode::serialize(token)?);
        batch.put_cf(
            cf_listings,
            Self::id_key(listing.listing_id),
            bincode::serialize(listing)?,
        );
        batch.delete_cf(cf_indices, Self::active_listing_key(listing.listing_id));
        batch.delete_cf(cf_indices, Self::token_listing_key(listing.token_id));

        for (account, amount) in new_balances {
            batch.put_cf(
                cf_balances,
                account.as_str().as_bytes(),
                bincode::serialize(amount)?,
            );
        }

        let records = self.stage_events(&mut batch, events)?;
        self.db.write(batch)?;

        Ok(records)
    }

    // Event log

    /// Event records with sequence number `>= from_seq`, in commit order
    pub fn events_since(&self, from_seq: u64) -> Result<Vec<EventRecord>> {
        let cf = self.cf_handle(CF_EVENTS)?;
        let start = Self::id_key(from_seq);
        let mut records = Vec::new();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));
        for item in iter {
            let (_, value) = item?;
            let record: EventRecord = bincode::deserialize(&value)?;
            records.push(record);
        }

        Ok(records)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}
