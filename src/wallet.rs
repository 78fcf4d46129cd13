//! Wallet facade
//!
//! Composes key vault, session lock, ledger, builder and broadcast
//! coordinator behind one API. Every operation returns a `WalletError`
//! value on failure; nothing here talks to a UI.

use bitcoin::{OutPoint, Txid};
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use crate::broadcast::{BroadcastCoordinator, Resolution};
use crate::clock::{Clock, SystemClock};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::indexer::{Broadcaster, HttpIndexer, Indexer, MarketListing, UtxoRecord};
use crate::keys::{
    base64_decode, base64_encode, ecies, DerivationTag, EntropySource, KeyRef, KeyVault,
    SeedMaterial, TaggedKey, TAG_CONTENT_TYPE,
};
use crate::ledger::{AssetFilter, TrackedUtxo, UtxoLedger};
use crate::request::{
    parse_outpoint_arg, Addresses, SignedMessage, WalletRequest, WalletResponse, WhitelistedApp,
};
use crate::session::{SessionLock, SessionState};
use crate::storage::{self, keys, FileStore, KeyValueStore};
use crate::tx::{script, AddressBook, BuiltTransaction, TxBuilder};

pub struct Wallet {
    config: WalletConfig,
    store: Arc<dyn KeyValueStore>,
    vault: KeyVault,
    session: Arc<SessionLock>,
    ledger: Arc<UtxoLedger>,
    builder: TxBuilder,
    coordinator: BroadcastCoordinator,
    indexer: Arc<dyn Indexer>,
}

impl Wallet {
    pub fn new(
        config: WalletConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        indexer: Arc<dyn Indexer>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<Self, WalletError> {
        let vault = KeyVault::new(config.network);
        let session = Arc::new(SessionLock::new(
            store.clone(),
            clock.clone(),
            vault.clone(),
            config.inactivity_limit,
        ));
        let ledger = Arc::new(UtxoLedger::load(store.clone(), clock, config.spent_grace)?);
        let builder = TxBuilder::new(vault.clone(), config.fee_policy, config.dust_limit);
        let coordinator = BroadcastCoordinator::new(broadcaster, config.network_timeout);

        log::info!("Wallet initialized on {:?}", config.network);
        Ok(Self {
            config,
            store,
            vault,
            session,
            ledger,
            builder,
            coordinator,
            indexer,
        })
    }

    /// Wallet with a file store, wall clock and HTTP indexer
    pub fn from_config(config: WalletConfig) -> Result<Self, WalletError> {
        let http = Arc::new(HttpIndexer::new(config.indexer_url.clone(), config.network_timeout)?);
        Self::new(
            config,
            Arc::new(FileStore::new()),
            Arc::new(SystemClock),
            http.clone(),
            http,
        )
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn ledger(&self) -> &UtxoLedger {
        &self.ledger
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn has_wallet(&self) -> Result<bool, WalletError> {
        self.session.has_wallet()
    }

    /// Create a new wallet and return its mnemonic for backup
    pub fn create(&self, password: &str, entropy: &mut dyn EntropySource) -> Result<Zeroizing<String>, WalletError> {
        self.ensure_empty()?;
        let seed = self.vault.create(entropy)?;
        let mnemonic = Zeroizing::new(seed.mnemonic().to_string());
        self.session.install(seed, password, &self.config.kdf)?;
        log::info!("Created new wallet");
        Ok(mnemonic)
    }

    /// Import a wallet from its mnemonic
    pub fn restore(&self, mnemonic: &str, password: &str) -> Result<(), WalletError> {
        self.ensure_empty()?;
        let seed = self.vault.restore(mnemonic)?;
        self.session.install(seed, password, &self.config.kdf)?;
        log::info!("Restored wallet from mnemonic");
        Ok(())
    }

    /// Remove every persisted trace of the wallet
    pub fn reset(&self) -> Result<(), WalletError> {
        self.session.lock()?;
        self.ledger.clear()?;
        self.store.remove(&[
            keys::ENCRYPTED_KEYS,
            keys::LAST_ACTIVE_TIME,
            keys::DERIVATION_TAGS,
            keys::WHITELIST,
        ])?;
        log::info!("Wallet data removed");
        Ok(())
    }

    fn ensure_empty(&self) -> Result<(), WalletError> {
        if self.session.has_wallet()? {
            return Err(WalletError::State("a wallet already exists; reset it first".into()));
        }
        Ok(())
    }

    pub fn unlock(&self, password: &str) -> Result<(), WalletError> {
        self.session.unlock(password)?;
        self.ledger.restore_payment_snapshot()
    }

    pub fn lock(&self) -> Result<(), WalletError> {
        self.session.lock()?;
        self.ledger.clear_payment_snapshot()
    }

    /// Record user activity
    pub fn touch(&self) -> Result<(), WalletError> {
        self.session.touch()
    }

    /// Enforce the inactivity timeout now. Returns `true` if it locked.
    pub fn check_lock(&self) -> Result<bool, WalletError> {
        let locked = self.session.check()?;
        if locked {
            self.ledger.clear_payment_snapshot()?;
        }
        Ok(locked)
    }

    /// Run `check_lock` on the configured interval
    pub fn spawn_lock_watchdog(&self) -> JoinHandle<()> {
        let ledger = self.ledger.clone();
        self.session
            .clone()
            .spawn_watchdog(self.config.lock_poll_interval, move || {
                if let Err(e) = ledger.clear_payment_snapshot() {
                    log::error!("Failed to clear payment snapshot: {}", e);
                }
            })
    }

    pub fn session_state(&self) -> Result<SessionState, WalletError> {
        self.session.state()
    }

    /// Seed for one operation; counts as activity
    fn seed(&self) -> Result<Arc<SeedMaterial>, WalletError> {
        match self.session.seed() {
            Ok(seed) => {
                self.session.touch()?;
                Ok(seed)
            }
            Err(WalletError::LockedWallet) => {
                self.ledger.clear_payment_snapshot()?;
                Err(WalletError::LockedWallet)
            }
            Err(e) => Err(e),
        }
    }

    fn address_book(&self, seed: &SeedMaterial) -> Result<AddressBook, WalletError> {
        Ok(AddressBook {
            payment: self.vault.derive_address(seed, KeyRef::payment(0))?,
            ordinal: self.vault.derive_address(seed, KeyRef::ordinal(0))?,
            identity: self.vault.derive_address(seed, KeyRef::identity(0))?,
        })
    }

    // ========================================================================
    // Addresses and balances
    // ========================================================================

    pub fn addresses(&self) -> Result<AddressBook, WalletError> {
        let seed = self.seed()?;
        self.address_book(&seed)
    }

    pub async fn refresh_payments(&self) -> Result<Vec<TrackedUtxo>, WalletError> {
        let book = self.addresses()?;
        self.ledger
            .refresh(self.indexer.as_ref(), &book.payment.address, book.payment.key, AssetFilter::Payment)
            .await
    }

    pub async fn refresh_ordinals(&self) -> Result<Vec<TrackedUtxo>, WalletError> {
        let book = self.addresses()?;
        self.ledger
            .refresh(self.indexer.as_ref(), &book.ordinal.address, book.ordinal.key, AssetFilter::Ordinals)
            .await
    }

    pub async fn refresh_tokens(&self, token_id: &str) -> Result<Vec<TrackedUtxo>, WalletError> {
        let book = self.addresses()?;
        self.ledger
            .refresh(
                self.indexer.as_ref(),
                &book.ordinal.address,
                book.ordinal.key,
                AssetFilter::Token(token_id.to_string()),
            )
            .await
    }

    /// Time-locked coins sit at the identity address
    pub async fn refresh_locks(&self) -> Result<Vec<TrackedUtxo>, WalletError> {
        let book = self.addresses()?;
        self.ledger
            .refresh(self.indexer.as_ref(), &book.identity.address, book.identity.key, AssetFilter::Locked)
            .await
    }

    /// Look up any output on the indexer, tracked or not
    pub async fn lookup_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoRecord>, WalletError> {
        self.indexer.get_output_by_outpoint(outpoint).await
    }

    /// Price and terms of a listed ordinal, ours or anyone's
    pub async fn market_listing(&self, outpoint: &OutPoint) -> Result<MarketListing, WalletError> {
        let record = self
            .indexer
            .get_output_by_outpoint(outpoint)
            .await?
            .ok_or_else(|| WalletError::OrdinalNotFound(outpoint.to_string()))?;
        let meta = record
            .ordinal
            .ok_or_else(|| WalletError::OrdinalNotFound(outpoint.to_string()))?;

        let listing = meta
            .listing
            .or_else(|| script::parse_listing(&record.script).map(|(listing, _)| listing))
            .ok_or_else(|| WalletError::State(format!("{} is not listed", outpoint)))?;

        Ok(MarketListing {
            outpoint: record.outpoint,
            origin: meta.origin,
            listing,
            script: record.script,
        })
    }

    /// Purge locally spent entries the indexer reports as spent
    pub async fn reconcile(&self) -> Result<Vec<OutPoint>, WalletError> {
        self.ledger.reconcile_spent(self.indexer.as_ref()).await
    }

    pub fn balance(&self) -> Result<u64, WalletError> {
        self.ledger.balance(&AssetFilter::Payment)
    }

    pub fn locked_balance(&self) -> Result<u64, WalletError> {
        self.ledger.balance(&AssetFilter::Locked)
    }

    pub fn token_balance(&self, token_id: &str) -> Result<u64, WalletError> {
        self.ledger.token_balance(token_id)
    }

    pub fn ordinals(&self) -> Result<Vec<TrackedUtxo>, WalletError> {
        self.ledger.unspent(&AssetFilter::Ordinals)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub async fn send_payment(&self, destination: &str, satoshis: u64) -> Result<Txid, WalletError> {
        let seed = self.seed()?;
        let book = self.address_book(&seed)?;
        let built = self
            .builder
            .build_payment(&self.ledger, &seed, &book, destination, satoshis)?;
        self.submit(built).await
    }

    pub async fn transfer_ordinal(&self, outpoint: &OutPoint, destination: &str) -> Result<Txid, WalletError> {
        let seed = self.seed()?;
        let book = self.address_book(&seed)?;
        let built = self
            .builder
            .build_ordinal_transfer(&self.ledger, &seed, &book, outpoint, destination)?;
        self.submit(built).await
    }

    pub async fn list_ordinal(&self, outpoint: &OutPoint, price: u64) -> Result<Txid, WalletError> {
        let seed = self.seed()?;
        let book = self.address_book(&seed)?;
        let built = self
            .builder
            .build_listing(&self.ledger, &seed, &book, outpoint, price)?;
        self.submit(built).await
    }

    pub async fn cancel_listing(&self, outpoint: &OutPoint) -> Result<Txid, WalletError> {
        let seed = self.seed()?;
        let book = self.address_book(&seed)?;
        let built = self
            .builder
            .build_cancel_listing(&self.ledger, &seed, &book, outpoint)?;
        self.submit(built).await
    }

    async fn submit(&self, built: BuiltTransaction) -> Result<Txid, WalletError> {
        self.coordinator.submit(&self.ledger, built).await
    }

    /// Transactions whose broadcast outcome is unknown
    pub fn pending_broadcasts(&self) -> Result<Vec<Txid>, WalletError> {
        self.coordinator.pending()
    }

    pub async fn resolve_pending(&self) -> Result<Vec<(Txid, Resolution)>, WalletError> {
        self.coordinator
            .resolve_pending(&self.ledger, self.indexer.as_ref())
            .await
    }

    // ========================================================================
    // Tagged keys
    // ========================================================================

    pub fn derivation_tags(&self) -> Result<Vec<TaggedKey>, WalletError> {
        Ok(storage::load_required(self.store.as_ref(), keys::DERIVATION_TAGS)?.unwrap_or_default())
    }

    /// Derive the key for `tag`. A tag seen for the first time is also
    /// inscribed, encrypted to the identity key, so a restored wallet can
    /// find it again.
    pub async fn generate_tagged_keys(&self, tag: &DerivationTag) -> Result<TaggedKey, WalletError> {
        let seed = self.seed()?;
        let tagged = self.vault.derive_for_tag(&seed, tag)?;

        let mut known = self.derivation_tags()?;
        if known.iter().any(|k| k.tag == *tag) {
            return Ok(tagged);
        }

        let book = self.address_book(&seed)?;
        let sealed = self.vault.seal_tag(&seed, tag)?;
        let built = self
            .builder
            .build_inscription(&self.ledger, &seed, &book, TAG_CONTENT_TYPE, &sealed)?;
        let txid = self.submit(built).await?;
        log::info!("Inscribed derivation tag '{}' in {}", tag.label, txid);

        known.push(tagged.clone());
        storage::save_json(self.store.as_ref(), keys::DERIVATION_TAGS, &known)?;
        Ok(tagged)
    }

    /// Add the tags inscribed at the identity address to the known list.
    /// Returns the full list.
    pub async fn sync_derivation_tags(&self) -> Result<Vec<TaggedKey>, WalletError> {
        let seed = self.seed()?;
        let book = self.address_book(&seed)?;

        let inscriptions = self
            .ledger
            .refresh(
                self.indexer.as_ref(),
                &book.identity.address,
                book.identity.key,
                AssetFilter::Ordinals,
            )
            .await?;

        let origins: Vec<OutPoint> = inscriptions
            .iter()
            .filter_map(|u| u.ordinal())
            .filter(|meta| meta.content_type.as_deref() == Some(TAG_CONTENT_TYPE))
            .map(|meta| meta.origin)
            .collect();

        // Fetch failures propagate; only undecryptable payloads are skipped
        let fetched = join_all(origins.iter().map(|origin| self.indexer.get_content_by_origin(origin))).await;
        let payloads: Vec<Vec<u8>> = fetched
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|content| !content.is_empty())
            .collect();

        let recovered = self.vault.recover_tags_from_chain(&seed, &payloads)?;

        let mut known = self.derivation_tags()?;
        let before = known.len();
        for tagged in recovered {
            if !known.iter().any(|k| k.tag == tagged.tag) {
                known.push(tagged);
            }
        }
        if known.len() > before {
            log::info!("Recovered {} derivation tags from chain", known.len() - before);
            storage::save_json(self.store.as_ref(), keys::DERIVATION_TAGS, &known)?;
        }
        Ok(known)
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Sign with the identity key, or with the tag's key when given
    pub fn sign_message(&self, message: &str, tag: Option<&DerivationTag>) -> Result<SignedMessage, WalletError> {
        let seed = self.seed()?;
        let (private_key, address, pub_key) = match tag {
            Some(tag) => {
                let tagged = self.vault.derive_for_tag(&seed, tag)?;
                (self.vault.tagged_private_key(&seed, tag)?, tagged.address, tagged.pub_key)
            }
            None => {
                let identity = self.vault.derive_address(&seed, KeyRef::identity(0))?;
                (
                    self.vault.private_key(&seed, KeyRef::identity(0))?,
                    identity.address.to_string(),
                    identity.public_key.to_string(),
                )
            }
        };

        Ok(SignedMessage {
            address,
            pub_key,
            sig: self.vault.sign_message_with(&private_key, message),
            message: message.to_string(),
            derivation_tag: tag.cloned(),
        })
    }

    /// ECIES-encrypt `message` once per recipient (hex public keys), or to
    /// the identity key when no recipient is given. Returns base64.
    pub fn encrypt(&self, message: &str, pub_keys: &[String]) -> Result<Vec<String>, WalletError> {
        let seed = self.seed()?;
        let recipients = if pub_keys.is_empty() {
            vec![self.vault.derive_address(&seed, KeyRef::identity(0))?.public_key.inner]
        } else {
            pub_keys
                .iter()
                .map(|k| {
                    k.parse::<secp256k1::PublicKey>()
                        .map_err(|e| WalletError::InvalidDestination(format!("public key {}: {}", k, e)))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        recipients
            .iter()
            .map(|pk| ecies::encrypt(pk, message.as_bytes()).map(|c| base64_encode(&c)))
            .collect()
    }

    /// Decrypt base64 ECIES payloads addressed to the identity key
    pub fn decrypt(&self, messages: &[String]) -> Result<Vec<String>, WalletError> {
        let seed = self.seed()?;
        let identity = self.vault.private_key(&seed, KeyRef::identity(0))?;

        messages
            .iter()
            .map(|m| {
                let payload = base64_decode(m).ok_or_else(|| WalletError::Crypto("message is not base64".into()))?;
                let plain = ecies::decrypt(&identity.inner, &payload)?;
                String::from_utf8(plain).map_err(|_| WalletError::Crypto("plaintext is not UTF-8".into()))
            })
            .collect()
    }

    // ========================================================================
    // Connected applications
    // ========================================================================

    pub fn whitelist(&self) -> Result<Vec<WhitelistedApp>, WalletError> {
        Ok(storage::load_required(self.store.as_ref(), keys::WHITELIST)?.unwrap_or_default())
    }

    pub fn is_whitelisted(&self, domain: &str) -> Result<bool, WalletError> {
        Ok(self.whitelist()?.iter().any(|app| app.domain == domain))
    }

    fn connect(&self, app: WhitelistedApp) -> Result<String, WalletError> {
        let seed = self.seed()?;
        let mut apps = self.whitelist()?;
        if !apps.iter().any(|a| a.domain == app.domain) {
            log::info!("Connected app {} ({})", app.app_name, app.domain);
            apps.push(app);
            storage::save_json(self.store.as_ref(), keys::WHITELIST, &apps)?;
        }
        Ok(self
            .vault
            .derive_address(&seed, KeyRef::identity(0))?
            .public_key
            .to_string())
    }

    /// Dispatch one application request
    pub async fn handle(&self, request: WalletRequest) -> Result<WalletResponse, WalletError> {
        match request {
            WalletRequest::Connect {
                app_name,
                domain,
                icon_url,
            } => {
                let identity_pub_key = self.connect(WhitelistedApp {
                    domain,
                    app_name,
                    icon_url,
                })?;
                Ok(WalletResponse::Connected { identity_pub_key })
            }
            WalletRequest::GetAddresses => {
                let book = self.addresses()?;
                Ok(WalletResponse::Addresses(Addresses {
                    payment_address: book.payment.address.to_string(),
                    ordinal_address: book.ordinal.address.to_string(),
                    identity_address: book.identity.address.to_string(),
                    payment_pub_key: book.payment.public_key.to_string(),
                    ordinal_pub_key: book.ordinal.public_key.to_string(),
                    identity_pub_key: book.identity.public_key.to_string(),
                }))
            }
            WalletRequest::GetBalance => {
                self.session.touch()?;
                Ok(WalletResponse::Balance {
                    satoshis: self.balance()?,
                })
            }
            WalletRequest::SendBsv { address, satoshis } => {
                let txid = self.send_payment(&address, satoshis).await?;
                Ok(WalletResponse::Broadcast {
                    txid: txid.to_string(),
                })
            }
            WalletRequest::TransferOrdinal { outpoint, address } => {
                let txid = self
                    .transfer_ordinal(&parse_outpoint_arg(&outpoint)?, &address)
                    .await?;
                Ok(WalletResponse::Broadcast {
                    txid: txid.to_string(),
                })
            }
            WalletRequest::ListOrdinal { outpoint, price } => {
                let txid = self.list_ordinal(&parse_outpoint_arg(&outpoint)?, price).await?;
                Ok(WalletResponse::Broadcast {
                    txid: txid.to_string(),
                })
            }
            WalletRequest::CancelListing { outpoint } => {
                let txid = self.cancel_listing(&parse_outpoint_arg(&outpoint)?).await?;
                Ok(WalletResponse::Broadcast {
                    txid: txid.to_string(),
                })
            }
            WalletRequest::SignMessage { message, tag } => {
                Ok(WalletResponse::Signed(self.sign_message(&message, tag.as_ref())?))
            }
            WalletRequest::GenerateTaggedKeys { tag } => {
                Ok(WalletResponse::TaggedKey(self.generate_tagged_keys(&tag).await?))
            }
            WalletRequest::Encrypt { message, pub_keys } => Ok(WalletResponse::Encrypted {
                messages: self.encrypt(&message, &pub_keys)?,
            }),
            WalletRequest::Decrypt { messages } => Ok(WalletResponse::Decrypted {
                messages: self.decrypt(&messages)?,
            }),
        }
    }
}
