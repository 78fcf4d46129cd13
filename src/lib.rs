//! Ordwallet: non-custodial wallet state engine for ordinals
//!
//! This crate holds the keys, tracks the UTXOs and builds the transactions
//! of a wallet that owns both plain satoshis and 1-sat inscriptions.
//!
//! # Architecture
//!
//! - **KeyVault**: BIP39 seed, role-separated BIP32 derivation, encryption at rest
//! - **Tagged derivation**: deterministic keys from application-supplied tags
//! - **SessionLock**: unlocked/locked state with an inactivity timeout
//! - **UtxoLedger**: local UTXO cache, merge with indexer data, reservations
//! - **TxBuilder**: payments, ordinal transfers, listings, inscriptions
//! - **BroadcastCoordinator**: one submit per build, ledger settled by outcome
//!
//! # Example
//!
//! ```ignore
//! use ordwallet::{OsEntropy, Wallet, WalletConfig};
//!
//! let wallet = Wallet::from_config(WalletConfig::from_env())?;
//! let mnemonic = wallet.create("correct horse", &mut OsEntropy)?;
//!
//! wallet.refresh_payments().await?;
//! let txid = wallet.send_payment("mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn", 3_000).await?;
//! ```

// Public modules
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod error;
pub mod indexer;
pub mod keys;
pub mod ledger;
pub mod request;
pub mod session;
pub mod storage;
pub mod tx;
pub mod wallet;

// Re-exports for convenience
pub use broadcast::{BroadcastCoordinator, PendingBroadcast, Resolution};
pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use config::WalletConfig;
pub use error::{ErrorKind, StorageError, WalletError};
pub use indexer::{Broadcaster, HttpIndexer, Indexer, MarketListing, SubmitResponse, UtxoRecord};
pub use keys::{
    DerivationTag, DerivedKey, EncryptedKeyBlob, EntropySource, KdfParams, KeyRef, KeyRole,
    KeyVault, OsEntropy, SeedMaterial, TaggedKey,
};
pub use ledger::{
    AssetFilter, AssetKind, LedgerDelta, Listing, LockMeta, OrdinalMeta, ReservationId, Selection,
    TokenMeta, TrackedUtxo, UtxoLedger,
};
pub use request::{WalletRequest, WalletResponse};
pub use session::{SessionLock, SessionState};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use tx::{AddressBook, BuiltTransaction, FeePolicy, SignedTransaction, TxBuilder};
pub use wallet::Wallet;

// Common result type
pub type Result<T> = std::result::Result<T, WalletError>;
