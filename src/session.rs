//! Session lock
//!
//! Gates access to seed material behind a password and an inactivity
//! timeout. Elapsed time is always computed from the persisted
//! `lastActiveTime`, so restarting the host does not reset the timeout.

use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::clock::{Clock, Millis};
use crate::error::WalletError;
use crate::keys::{EncryptedKeyBlob, KdfParams, KeyVault, SeedMaterial};
use crate::storage::{self, keys, KeyValueStore};

/// Snapshot of the lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub locked: bool,
    pub last_active_at: Option<Millis>,
}

pub struct SessionLock {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    vault: KeyVault,
    timeout: Duration,
    seed: RwLock<Option<Arc<SeedMaterial>>>,
}

impl SessionLock {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        vault: KeyVault,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            vault,
            timeout,
            seed: RwLock::new(None),
        }
    }

    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    /// Whether an encrypted key blob has been persisted
    pub fn has_wallet(&self) -> Result<bool, WalletError> {
        Ok(self.store.get(&[keys::ENCRYPTED_KEYS])?.contains_key(keys::ENCRYPTED_KEYS))
    }

    /// Encrypt and persist freshly created or restored seed material, and
    /// start an unlocked session with it.
    pub fn install(&self, seed: SeedMaterial, password: &str, kdf: &KdfParams) -> Result<Arc<SeedMaterial>, WalletError> {
        let blob = self.vault.encrypt(&seed, password, kdf)?;
        storage::save_json(self.store.as_ref(), keys::ENCRYPTED_KEYS, &blob)?;

        let seed = Arc::new(seed);
        self.hold(Some(seed.clone()))?;
        self.record_activity(self.clock.now_millis())?;
        log::info!("Wallet keys stored, session unlocked");
        Ok(seed)
    }

    /// Locked -> Unlocked. Only a successful decryption unlocks.
    pub fn unlock(&self, password: &str) -> Result<(), WalletError> {
        let blob: EncryptedKeyBlob = storage::load_required(self.store.as_ref(), keys::ENCRYPTED_KEYS)?
            .ok_or(WalletError::NoWallet)?;

        let seed = match self.vault.decrypt(&blob, password) {
            Ok(seed) => seed,
            Err(e) => {
                log::warn!("Unlock attempt failed: {}", e);
                return Err(e);
            }
        };

        self.hold(Some(Arc::new(seed)))?;
        self.record_activity(self.clock.now_millis())?;
        log::info!("Session unlocked");
        Ok(())
    }

    /// Unlocked -> Locked. Drops this session's reference to the seed and
    /// back-dates the persisted activity so a restarted host also sees it
    /// as locked.
    pub fn lock(&self) -> Result<(), WalletError> {
        self.hold(None)?;
        let expired = self.clock.now_millis() - self.timeout_millis() - 1;
        self.record_activity(expired)?;
        log::info!("Session locked");
        Ok(())
    }

    /// Refresh the activity timestamp. No-op while locked.
    pub fn touch(&self) -> Result<(), WalletError> {
        if self.held()?.is_some() && !self.expired()? {
            self.record_activity(self.clock.now_millis())?;
        }
        Ok(())
    }

    /// Enforce the timeout. Returns `true` when this call performed the
    /// Unlocked -> Locked transition.
    pub fn check(&self) -> Result<bool, WalletError> {
        if self.held()?.is_none() {
            return Ok(false);
        }
        if self.expired()? {
            log::info!("Inactivity limit reached");
            self.lock()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn state(&self) -> Result<SessionState, WalletError> {
        let locked = self.held()?.is_none() || self.expired()?;
        Ok(SessionState {
            locked,
            last_active_at: self.last_active()?,
        })
    }

    /// Key access for one operation. A build that obtained the seed keeps it
    /// until it finishes, even if the session locks meanwhile.
    pub fn seed(&self) -> Result<Arc<SeedMaterial>, WalletError> {
        let seed = self.held()?.ok_or(WalletError::LockedWallet)?;
        if self.expired()? {
            self.lock()?;
            return Err(WalletError::LockedWallet);
        }
        Ok(seed)
    }

    /// Poll `check` on a fixed interval. `on_lock` runs after every timeout
    /// transition.
    pub fn spawn_watchdog<F>(self: Arc<Self>, period: Duration, on_lock: F) -> JoinHandle<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match self.check() {
                    Ok(true) => on_lock(),
                    Ok(false) => {}
                    Err(e) => log::error!("Lock check failed: {}", e),
                }
            }
        })
    }

    fn timeout_millis(&self) -> Millis {
        self.timeout.as_millis() as Millis
    }

    fn last_active(&self) -> Result<Option<Millis>, WalletError> {
        storage::load_required(self.store.as_ref(), keys::LAST_ACTIVE_TIME)
    }

    fn expired(&self) -> Result<bool, WalletError> {
        match self.last_active()? {
            Some(last) => Ok(self.clock.now_millis() - last > self.timeout_millis()),
            None => Ok(true),
        }
    }

    fn record_activity(&self, at: Millis) -> Result<(), WalletError> {
        storage::save_json(self.store.as_ref(), keys::LAST_ACTIVE_TIME, &at)?;
        Ok(())
    }

    fn held(&self) -> Result<Option<Arc<SeedMaterial>>, WalletError> {
        self.seed
            .read()
            .map(|s| s.clone())
            .map_err(|_| WalletError::State("session lock poisoned".into()))
    }

    fn hold(&self, seed: Option<Arc<SeedMaterial>>) -> Result<(), WalletError> {
        let mut slot = self
            .seed
            .write()
            .map_err(|_| WalletError::State("session lock poisoned".into()))?;
        *slot = seed;
        Ok(())
    }
}
