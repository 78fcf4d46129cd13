//! Wallet configuration from environment variables
//!
//! Controls the Bitcoin network type, indexer endpoint, lock timeout and
//! transaction policy. Defaults to Testnet for development safety.

use std::env;
use std::time::Duration;

use crate::keys::KdfParams;
use crate::tx::FeePolicy;

#[derive(Clone, Debug)]
pub struct WalletConfig {
    /// Bitcoin network type (address prefixes, key versions)
    pub network: bitcoin::Network,
    /// Indexer/broadcast API base URL
    pub indexer_url: String,
    /// Inactivity period after which the session locks
    pub inactivity_limit: Duration,
    /// Interval of the lock watchdog
    pub lock_poll_interval: Duration,
    /// Fee policy used by every transaction builder
    pub fee_policy: FeePolicy,
    /// Minimum value of any newly valued output (payment and change)
    pub dust_limit: u64,
    /// How long locally spent or locally synthesized entries survive a refresh
    /// that contradicts them
    pub spent_grace: Duration,
    /// Upper bound on every network call
    pub network_timeout: Duration,
    /// Key derivation parameters for the encrypted key blob
    pub kdf: KdfParams,
}

impl WalletConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `WALLET_NETWORK`: "testnet" (default), "mainnet" or "regtest"
    /// - `INDEXER_URL`: indexer API endpoint (optional, has sensible defaults)
    /// - `INACTIVITY_LIMIT_SECS`: lock timeout (default 1200)
    /// - `LOCK_POLL_SECS`: watchdog interval (default 5)
    /// - `FEE_RATE_SAT_PER_KB`: fee rate (default 50)
    /// - `DUST_LIMIT_SATS`: dust floor (default 546)
    /// - `SPENT_GRACE_SECS`: grace window for unconfirmed local state (default 1800)
    /// - `NETWORK_TIMEOUT_SECS`: network call bound (default 30)
    pub fn from_env() -> Self {
        let network_str = env::var("WALLET_NETWORK")
            .unwrap_or_else(|_| "testnet".to_string())
            .to_lowercase();

        let network = match network_str.as_str() {
            "mainnet" | "main" => {
                log::info!("Using MAINNET network");
                bitcoin::Network::Bitcoin
            }
            "regtest" => {
                log::info!("Using REGTEST network");
                bitcoin::Network::Regtest
            }
            "testnet" | "test" | "" => {
                log::info!("Using TESTNET network");
                bitcoin::Network::Testnet
            }
            other => {
                log::warn!("Unknown network '{}', defaulting to Testnet", other);
                bitcoin::Network::Testnet
            }
        };

        let indexer_url = env::var("INDEXER_URL").unwrap_or_else(|_| {
            let default_url = match network {
                bitcoin::Network::Bitcoin => "https://ordinals.gorillapool.io",
                bitcoin::Network::Regtest => "http://localhost:3000",
                _ => "https://testnet.ordinals.gorillapool.io",
            };
            log::info!("Indexer URL: {} (default)", default_url);
            default_url.to_string()
        });

        let defaults = Self::default();

        Self {
            network,
            indexer_url,
            inactivity_limit: secs_from_env("INACTIVITY_LIMIT_SECS")
                .unwrap_or(defaults.inactivity_limit),
            lock_poll_interval: secs_from_env("LOCK_POLL_SECS")
                .unwrap_or(defaults.lock_poll_interval),
            fee_policy: u64_from_env("FEE_RATE_SAT_PER_KB")
                .map(FeePolicy::PerKb)
                .unwrap_or(defaults.fee_policy),
            dust_limit: u64_from_env("DUST_LIMIT_SATS").unwrap_or(defaults.dust_limit),
            spent_grace: secs_from_env("SPENT_GRACE_SECS").unwrap_or(defaults.spent_grace),
            network_timeout: secs_from_env("NETWORK_TIMEOUT_SECS")
                .unwrap_or(defaults.network_timeout),
            kdf: defaults.kdf,
        }
    }

    /// Get the BIP44 coin type used by the wallet derivation paths
    pub fn coin_type(&self) -> u32 {
        crate::keys::COIN_TYPE
    }
}

impl Default for WalletConfig {
    /// Default configuration (Testnet)
    fn default() -> Self {
        Self {
            network: bitcoin::Network::Testnet,
            indexer_url: "https://testnet.ordinals.gorillapool.io".to_string(),
            inactivity_limit: Duration::from_secs(20 * 60),
            lock_poll_interval: Duration::from_secs(5),
            fee_policy: FeePolicy::PerKb(50),
            dust_limit: 546,
            spent_grace: Duration::from_secs(30 * 60),
            network_timeout: Duration::from_secs(30),
            kdf: KdfParams::default(),
        }
    }
}

fn u64_from_env(key: &str) -> Option<u64> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring non-numeric {}='{}'", key, raw);
            None
        }
    }
}

fn secs_from_env(key: &str) -> Option<Duration> {
    u64_from_env(key).map(Duration::from_secs)
}
