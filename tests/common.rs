//! Common test utilities for wallet integration tests
//!
//! This module provides shared test infrastructure including:
//! - An in-process indexer mock on an ephemeral port
//! - Wallet setup over a temp-dir file store and a manual clock
//! - Funding and transaction inspection helpers
//! - An indexer wrapper that can lag behind the mock or fail on demand

#![allow(dead_code)]

use async_trait::async_trait;
use bitcoin::{Address, OutPoint, Transaction, Txid};
use indexer_mock::{BroadcastMode, MockState, SharedState};
use ordwallet::{
    AssetFilter, FeePolicy, FileStore, HttpIndexer, Indexer, KdfParams, ManualClock, Millis, UtxoRecord, Wallet,
    WalletConfig, WalletError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const PASSWORD: &str = "correct horse battery staple";
/// Testnet P2PKH address that the test wallet does not own
pub const OTHER_ADDRESS: &str = "mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn";
pub const START: Millis = 1_700_000_000_000;
pub const INACTIVITY_LIMIT: Duration = Duration::from_secs(20 * 60);
pub const FIXED_FEE: u64 = 150;

pub fn init_logging() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init()
        .ok();
}

/// Indexer in front of the mock whose reads can be frozen or failed
pub struct ControlledIndexer {
    inner: HttpIndexer,
    lagging: AtomicBool,
    fail_unspent: AtomicBool,
    fail_content: AtomicBool,
    last_seen: Mutex<HashMap<String, Vec<UtxoRecord>>>,
}

impl ControlledIndexer {
    pub fn new(inner: HttpIndexer) -> Self {
        Self {
            inner,
            lagging: AtomicBool::new(false),
            fail_unspent: AtomicBool::new(false),
            fail_content: AtomicBool::new(false),
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Keep answering unspent queries with the last answer seen
    pub fn set_lagging(&self, on: bool) {
        self.lagging.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_unspent(&self, on: bool) {
        self.fail_unspent.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_content(&self, on: bool) {
        self.fail_content.store(on, Ordering::SeqCst);
    }

    async fn unspent(
        &self,
        key: String,
        fetch: impl std::future::Future<Output = Result<Vec<UtxoRecord>, WalletError>>,
    ) -> Result<Vec<UtxoRecord>, WalletError> {
        if self.fail_unspent.load(Ordering::SeqCst) {
            return Err(WalletError::Network("indexer unreachable".into()));
        }
        if self.lagging.load(Ordering::SeqCst) {
            let seen = self.last_seen.lock().unwrap().get(&key).cloned();
            if let Some(seen) = seen {
                return Ok(seen);
            }
        }
        let fresh = fetch.await?;
        self.last_seen.lock().unwrap().insert(key, fresh.clone());
        Ok(fresh)
    }
}

#[async_trait]
impl Indexer for ControlledIndexer {
    async fn get_unspent_outputs(
        &self,
        address: &Address,
        filter: &AssetFilter,
    ) -> Result<Vec<UtxoRecord>, WalletError> {
        let key = format!("{}:{:?}", address, filter);
        self.unspent(key, self.inner.get_unspent_outputs(address, filter)).await
    }

    async fn get_locked_outputs(&self, address: &Address) -> Result<Vec<UtxoRecord>, WalletError> {
        let key = format!("{}:locks", address);
        self.unspent(key, self.inner.get_locked_outputs(address)).await
    }

    async fn get_output_by_outpoint(&self, outpoint: &OutPoint) -> Result<Option<UtxoRecord>, WalletError> {
        self.inner.get_output_by_outpoint(outpoint).await
    }

    async fn get_spent_status(&self, outpoints: &[OutPoint]) -> Result<Vec<Option<Txid>>, WalletError> {
        self.inner.get_spent_status(outpoints).await
    }

    async fn get_content_by_origin(&self, origin: &OutPoint) -> Result<Vec<u8>, WalletError> {
        if self.fail_content.load(Ordering::SeqCst) {
            return Err(WalletError::Network("content endpoint unreachable".into()));
        }
        self.inner.get_content_by_origin(origin).await
    }
}

/// Test environment with automatic cleanup
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub mock: SharedState,
    pub base_url: String,
    pub indexer: Arc<ControlledIndexer>,
    pub clock: Arc<ManualClock>,
    pub config: WalletConfig,
    pub wallet: Wallet,
}

impl TestEnvironment {
    /// Wallet restored from `TEST_MNEMONIC` and unlocked, against a fresh mock
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_mock(MockState::shared(bitcoin::Network::Testnet)).await
    }

    /// Same as `new`, but sharing the chain state of another environment,
    /// like a second device restoring the same wallet.
    pub async fn with_mock(mock: SharedState) -> anyhow::Result<Self> {
        init_logging();

        let addr = indexer_mock::spawn_server(mock.clone()).await?;
        let base_url = format!("http://{}", addr);

        let temp_dir = TempDir::new()?;
        log::info!("Test directory: {:?}", temp_dir.path());

        let clock = Arc::new(ManualClock::new(START));
        let config = WalletConfig {
            network: bitcoin::Network::Testnet,
            indexer_url: base_url.clone(),
            inactivity_limit: INACTIVITY_LIMIT,
            lock_poll_interval: Duration::from_millis(10),
            fee_policy: FeePolicy::Fixed(FIXED_FEE),
            dust_limit: 546,
            spent_grace: Duration::from_secs(30 * 60),
            network_timeout: Duration::from_secs(2),
            kdf: KdfParams::fast(),
        };

        let indexer = Arc::new(ControlledIndexer::new(HttpIndexer::new(
            config.indexer_url.clone(),
            config.network_timeout,
        )?));
        let wallet = open_wallet(&config, &temp_dir, &clock, &indexer)?;
        wallet.restore(TEST_MNEMONIC, PASSWORD)?;

        Ok(Self {
            temp_dir,
            mock,
            base_url,
            indexer,
            clock,
            config,
            wallet,
        })
    }

    /// A second wallet over the same files, as after a host restart
    pub fn reopen(&self) -> anyhow::Result<Wallet> {
        open_wallet(&self.config, &self.temp_dir, &self.clock, &self.indexer)
    }

    /// Credit a plain output to the payment address and refresh
    pub async fn fund_payment(&self, satoshis: u64) -> anyhow::Result<OutPoint> {
        let address = self.wallet.addresses()?.payment.address.to_string();
        let outpoint = self.mock.write().await.fund(&address, satoshis)?;
        self.wallet.refresh_payments().await?;
        Ok(outpoint)
    }

    /// Inscribe at the ordinal address and refresh
    pub async fn inscribe_ordinal(&self, content_type: &str, content: &[u8]) -> anyhow::Result<OutPoint> {
        let address = self.wallet.addresses()?.ordinal.address.to_string();
        let outpoint = self
            .mock
            .write()
            .await
            .inscribe(&address, content_type, content.to_vec(), None)?;
        self.wallet.refresh_ordinals().await?;
        Ok(outpoint)
    }

    pub async fn set_broadcast_mode(&self, mode: BroadcastMode) {
        self.mock.write().await.set_mode(mode);
    }

    /// A transaction the mock accepted
    pub async fn transaction(&self, txid: &Txid) -> anyhow::Result<Transaction> {
        let raw = self
            .mock
            .read()
            .await
            .raw_transaction(txid)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| anyhow::anyhow!("mock never accepted {}", txid))?;
        Ok(bitcoin::consensus::deserialize(&raw)?)
    }
}

fn open_wallet(
    config: &WalletConfig,
    temp_dir: &TempDir,
    clock: &Arc<ManualClock>,
    indexer: &Arc<ControlledIndexer>,
) -> anyhow::Result<Wallet> {
    let http = Arc::new(HttpIndexer::new(config.indexer_url.clone(), config.network_timeout)?);
    let store = Arc::new(FileStore::new_with_base_dir(temp_dir.path().to_path_buf()));
    Ok(Wallet::new(config.clone(), store, clock.clone(), indexer.clone(), http)?)
}
