//! UTXO ledger
//!
//! Tracks the outputs the wallet owns, both plain payment coins and
//! inscribed outputs, keyed by outpoint. The cached set is reconciled
//! against indexer responses, updated synchronously from our own
//! broadcasts, and persisted after every mutation.
//!
//! Reservations are in-memory holds placed while a transaction is being
//! built and broadcast, so two concurrent builds never select the same
//! entry.
//!
//! Locking the wallet hides the unspent payment entries from queries and
//! selection without dropping them: they are still persisted and come back
//! on unlock, so change we synthesized ourselves survives a lock cycle.

mod types;

pub use types::{
    AssetFilter, AssetKind, LedgerDelta, Listing, LockMeta, OrdinalMeta, OwnedOutput,
    ReservationId, Selection, TokenMeta, TrackedUtxo,
};

use bitcoin::{Address, OutPoint, Txid};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::{Clock, Millis};
use crate::error::WalletError;
use crate::indexer::{Indexer, UtxoRecord};
use crate::keys::KeyRef;
use crate::storage::{self, keys, KeyValueStore};
use crate::tx::{FeePolicy, TxShape};

const SPENT_STATUS_CHUNK: usize = 50;

/// Persisted form of the ledger
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerDocument {
    utxos: Vec<TrackedUtxo>,
    #[serde(default)]
    applied_txids: Vec<Txid>,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: BTreeMap<OutPoint, TrackedUtxo>,
    reserved: HashMap<OutPoint, ReservationId>,
    /// Payment entries set aside while the wallet is locked
    hidden: BTreeMap<OutPoint, TrackedUtxo>,
    applied: BTreeSet<Txid>,
    next_reservation: u64,
}

impl LedgerState {
    fn reserve(&mut self, outpoints: &[OutPoint]) -> ReservationId {
        self.next_reservation += 1;
        let id = ReservationId(self.next_reservation);
        for outpoint in outpoints {
            self.reserved.insert(*outpoint, id);
        }
        id
    }

    fn is_available(&self, utxo: &TrackedUtxo) -> bool {
        !utxo.spent && !self.reserved.contains_key(&utxo.outpoint())
    }

    /// Put hidden entries back, without overriding anything newer
    fn unhide(&mut self) -> usize {
        let hidden = std::mem::take(&mut self.hidden);
        let count = hidden.len();
        for (outpoint, utxo) in hidden {
            self.entries.entry(outpoint).or_insert(utxo);
        }
        count
    }

    fn purge(&mut self, outpoint: &OutPoint) {
        self.entries.remove(outpoint);
        self.hidden.remove(outpoint);
        if let Some(id) = self.reserved.remove(outpoint) {
            log::debug!("Dropped {:?} hold on purged {}", id, outpoint);
        }
    }
}

pub struct UtxoLedger {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    grace: Duration,
    state: Mutex<LedgerState>,
}

impl UtxoLedger {
    /// Load the persisted ledger, or start empty.
    ///
    /// Fails with `Corrupted` if the stored document can't be trusted.
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        grace: Duration,
    ) -> Result<Self, WalletError> {
        let document: LedgerDocument =
            storage::load_required(store.as_ref(), keys::TRACKED_UTXOS)?.unwrap_or_default();

        let mut state = LedgerState::default();
        for utxo in document.utxos {
            if state.entries.insert(utxo.outpoint(), utxo).is_some() {
                log::error!("Persisted ledger contains duplicate outpoints");
                return Err(WalletError::Corrupted(
                    "duplicate outpoint in tracked utxos".into(),
                ));
            }
        }
        state.applied = document.applied_txids.into_iter().collect();

        log::debug!("Loaded {} tracked utxos", state.entries.len());
        Ok(Self {
            store,
            clock,
            grace,
            state: Mutex::new(state),
        })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, LedgerState>, WalletError> {
        self.state
            .lock()
            .map_err(|_| WalletError::State("ledger mutex poisoned".into()))
    }

    fn persist(&self, state: &LedgerState) -> Result<(), WalletError> {
        let document = LedgerDocument {
            utxos: state
                .entries
                .values()
                .chain(
                    state
                        .hidden
                        .iter()
                        .filter(|(outpoint, _)| !state.entries.contains_key(outpoint))
                        .map(|(_, utxo)| utxo),
                )
                .cloned()
                .collect(),
            applied_txids: state.applied.iter().copied().collect(),
        };
        storage::save_json(self.store.as_ref(), keys::TRACKED_UTXOS, &document)?;
        Ok(())
    }

    fn within_grace(&self, since: Millis, now: Millis) -> bool {
        now - since <= self.grace.as_millis() as Millis
    }

    /// Re-query the indexer for `address` and merge the response into the
    /// cached set. On network failure the cache is left untouched.
    pub async fn refresh(
        &self,
        indexer: &dyn Indexer,
        address: &Address,
        owner: KeyRef,
        filter: AssetFilter,
    ) -> Result<Vec<TrackedUtxo>, WalletError> {
        let records = match &filter {
            AssetFilter::Locked => indexer.get_locked_outputs(address).await?,
            _ => indexer.get_unspent_outputs(address, &filter).await?,
        };
        log::debug!(
            "Indexer returned {} outputs for {} ({:?})",
            records.len(),
            address,
            filter
        );
        self.merge(&address.to_string(), owner, &filter, records)
    }

    /// Merge an indexer response for one address and asset slice.
    ///
    /// - A returned entry wins for its own outpoint, unless we spent it
    ///   locally within the grace period.
    /// - A locally spent entry missing from the response is purged.
    /// - A locally synthesized entry missing from the response survives
    ///   until its grace period ends.
    pub fn merge(
        &self,
        address: &str,
        owner: KeyRef,
        filter: &AssetFilter,
        records: Vec<UtxoRecord>,
    ) -> Result<Vec<TrackedUtxo>, WalletError> {
        let now = self.clock.now_millis();
        let mut state = self.lock_state()?;

        // Fresh data for this slice supersedes whatever a lock set aside
        let returning: Vec<OutPoint> = state
            .hidden
            .values()
            .filter(|u| u.address == address && filter.matches(&u.asset))
            .map(TrackedUtxo::outpoint)
            .collect();
        for outpoint in returning {
            if let Some(utxo) = state.hidden.remove(&outpoint) {
                state.entries.entry(outpoint).or_insert(utxo);
            }
        }

        let mut incoming: BTreeMap<OutPoint, TrackedUtxo> = BTreeMap::new();
        for record in records {
            let asset = match (record.ordinal, record.lock) {
                (Some(meta), _) => AssetKind::Ordinal(meta),
                (None, Some(lock)) => AssetKind::Locked(lock),
                (None, None) => AssetKind::Payment,
            };
            // Inscribed outputs at a payment address are never coins
            if !filter.matches(&asset) {
                continue;
            }
            incoming.insert(
                record.outpoint,
                TrackedUtxo {
                    txid: record.outpoint.txid,
                    vout: record.outpoint.vout,
                    satoshis: record.satoshis,
                    script: record.script,
                    spent: false,
                    spent_at: 0,
                    address: address.to_string(),
                    owner,
                    asset,
                    synthesized_at: None,
                },
            );
        }

        let in_scope: Vec<OutPoint> = state
            .entries
            .values()
            .filter(|u| u.address == address && filter.matches(&u.asset))
            .map(TrackedUtxo::outpoint)
            .collect();

        for outpoint in in_scope {
            if incoming.contains_key(&outpoint) {
                continue;
            }
            let Some(existing) = state.entries.get(&outpoint) else {
                continue;
            };
            let keep = match existing.synthesized_at {
                Some(at) if !existing.spent => self.within_grace(at, now),
                _ => false,
            };
            if keep {
                log::debug!("Keeping unconfirmed local output {}", outpoint);
            } else {
                log::debug!(
                    "Purging {} ({})",
                    outpoint,
                    if existing.spent { "spent confirmed" } else { "no longer reported" }
                );
                state.purge(&outpoint);
            }
        }

        for (outpoint, fresh) in incoming {
            match state.entries.get_mut(&outpoint) {
                Some(existing) if existing.spent && self.within_grace(existing.spent_at, now) => {
                    log::debug!("Keeping {} spent until the network catches up", outpoint);
                }
                Some(existing) => *existing = fresh,
                None => {
                    state.entries.insert(outpoint, fresh);
                }
            }
        }

        self.persist(&state)?;

        Ok(state
            .entries
            .values()
            .filter(|u| !u.spent && u.address == address && filter.matches(&u.asset))
            .cloned()
            .collect())
    }

    /// Record the effect of a successfully broadcast transaction. Applying
    /// the same txid twice is a no-op; returns whether anything changed.
    pub fn apply_broadcast_delta(&self, delta: &LedgerDelta) -> Result<bool, WalletError> {
        let now = self.clock.now_millis();
        let mut state = self.lock_state()?;

        if state.applied.contains(&delta.txid) {
            log::debug!("Delta for {} already applied", delta.txid);
            return Ok(false);
        }

        for outpoint in &delta.consumed {
            if let Some(utxo) = state.hidden.remove(outpoint) {
                state.entries.insert(*outpoint, utxo);
            }
        }

        for outpoint in &delta.consumed {
            if state.entries.get(outpoint).is_some_and(|u| u.spent) {
                return Err(WalletError::State(format!(
                    "{} is already spent",
                    outpoint
                )));
            }
        }

        for outpoint in &delta.consumed {
            state.reserved.remove(outpoint);
            match state.entries.get_mut(outpoint) {
                Some(utxo) => {
                    utxo.spent = true;
                    utxo.spent_at = now;
                }
                None => log::debug!("Consumed {} was not tracked", outpoint),
            }
        }

        for output in &delta.created {
            let utxo = TrackedUtxo {
                txid: delta.txid,
                vout: output.vout,
                satoshis: output.satoshis,
                script: output.script.clone(),
                spent: false,
                spent_at: 0,
                address: output.address.clone(),
                owner: output.owner,
                asset: output.asset.clone(),
                synthesized_at: Some(now),
            };
            state.entries.insert(utxo.outpoint(), utxo);
        }

        state.applied.insert(delta.txid);
        self.persist(&state)?;

        log::info!(
            "Applied {}: {} inputs spent, {} outputs added",
            delta.txid,
            delta.consumed.len(),
            delta.created.len()
        );
        Ok(true)
    }

    pub fn is_applied(&self, txid: &Txid) -> Result<bool, WalletError> {
        Ok(self.lock_state()?.applied.contains(txid))
    }

    /// Pick payment entries covering `target` plus the fee for the resulting
    /// transaction, and reserve them.
    ///
    /// Largest value first, ties broken by outpoint, so the choice is
    /// deterministic for a given snapshot. Spent and reserved entries are
    /// never offered.
    pub fn select_for_amount(
        &self,
        target: u64,
        policy: &FeePolicy,
        shape: &TxShape,
    ) -> Result<Selection, WalletError> {
        let mut state = self.lock_state()?;

        let mut candidates: Vec<&TrackedUtxo> = state
            .entries
            .values()
            .filter(|u| u.is_payment() && state.is_available(u))
            .collect();
        candidates.sort_by(|a, b| {
            b.satoshis
                .cmp(&a.satoshis)
                .then_with(|| a.outpoint().cmp(&b.outpoint()))
        });

        let mut selected = Vec::new();
        let mut total = 0u64;
        let mut fee = shape.fee(policy, 0);

        for utxo in candidates {
            if total >= target.saturating_add(fee) && !selected.is_empty() {
                break;
            }
            selected.push(utxo.clone());
            total += utxo.satoshis;
            fee = shape.fee(policy, selected.len());
        }

        let needed = target.saturating_add(fee);
        if selected.is_empty() || total < needed {
            return Err(WalletError::InsufficientFunds(format!(
                "need {} sats (incl. {} fee), have {} available",
                needed, fee, total
            )));
        }

        let outpoints: Vec<OutPoint> = selected.iter().map(TrackedUtxo::outpoint).collect();
        let reservation = state.reserve(&outpoints);
        log::debug!(
            "Reserved {} inputs ({} sats) as {:?}",
            outpoints.len(),
            total,
            reservation
        );

        Ok(Selection {
            reservation,
            utxos: selected,
            total,
            fee,
        })
    }

    /// Reserve one ordinal entry for a transfer, listing or cancel
    pub fn reserve_ordinal(&self, outpoint: &OutPoint) -> Result<(ReservationId, TrackedUtxo), WalletError> {
        let mut state = self.lock_state()?;
        let utxo = state
            .entries
            .get(outpoint)
            .filter(|u| u.ordinal().is_some())
            .cloned()
            .ok_or_else(|| WalletError::OrdinalNotFound(outpoint.to_string()))?;

        if utxo.spent {
            return Err(WalletError::State(format!("{} is already spent", outpoint)));
        }
        if state.reserved.contains_key(outpoint) {
            return Err(WalletError::State(format!("{} is reserved by another build", outpoint)));
        }

        let id = state.reserve(&[*outpoint]);
        log::debug!("Reserved ordinal {} as {:?}", outpoint, id);
        Ok((id, utxo))
    }

    /// Drop a reservation after a failed build or rejected broadcast
    pub fn release(&self, id: ReservationId) -> Result<(), WalletError> {
        let mut state = self.lock_state()?;
        let before = state.reserved.len();
        state.reserved.retain(|_, held| *held != id);
        log::debug!("Released {:?} ({} entries)", id, before - state.reserved.len());
        Ok(())
    }

    /// Sum of unspent satoshis matching `filter`
    pub fn balance(&self, filter: &AssetFilter) -> Result<u64, WalletError> {
        let state = self.lock_state()?;
        Ok(state
            .entries
            .values()
            .filter(|u| !u.spent && filter.matches(&u.asset))
            .map(|u| u.satoshis)
            .sum())
    }

    /// Sum of unspent token amounts for a token id
    pub fn token_balance(&self, token_id: &str) -> Result<u64, WalletError> {
        let state = self.lock_state()?;
        Ok(state
            .entries
            .values()
            .filter(|u| !u.spent)
            .filter_map(|u| u.ordinal()?.token.as_ref())
            .filter(|t| t.id == token_id)
            .map(|t| t.amount)
            .sum())
    }

    pub fn unspent(&self, filter: &AssetFilter) -> Result<Vec<TrackedUtxo>, WalletError> {
        let state = self.lock_state()?;
        Ok(state
            .entries
            .values()
            .filter(|u| !u.spent && filter.matches(&u.asset))
            .cloned()
            .collect())
    }

    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<TrackedUtxo>, WalletError> {
        Ok(self.lock_state()?.entries.get(outpoint).cloned())
    }

    /// Hide the unspent payment snapshot after a lock.
    ///
    /// Spent and reserved entries stay visible so a resumed session cannot
    /// re-offer them. Hidden entries are still persisted.
    pub fn clear_payment_snapshot(&self) -> Result<(), WalletError> {
        let mut state = self.lock_state()?;
        let LedgerState {
            entries,
            reserved,
            hidden,
            ..
        } = &mut *state;

        let cleared: Vec<OutPoint> = entries
            .values()
            .filter(|u| u.is_payment() && !u.spent && !reserved.contains_key(&u.outpoint()))
            .map(TrackedUtxo::outpoint)
            .collect();
        for outpoint in &cleared {
            if let Some(utxo) = entries.remove(outpoint) {
                hidden.insert(*outpoint, utxo);
            }
        }
        log::debug!("Cleared {} cached payment utxos", cleared.len());
        Ok(())
    }

    /// Bring back the payment snapshot hidden by the last lock
    pub fn restore_payment_snapshot(&self) -> Result<(), WalletError> {
        let restored = self.lock_state()?.unhide();
        if restored > 0 {
            log::debug!("Restored {} cached payment utxos", restored);
        }
        Ok(())
    }

    /// Drop every entry, reservation and applied txid, in memory and on disk
    pub fn clear(&self) -> Result<(), WalletError> {
        let mut state = self.lock_state()?;
        *state = LedgerState::default();
        self.store.remove(&[keys::TRACKED_UTXOS])?;
        Ok(())
    }

    /// Ask the indexer about every locally spent entry and purge the ones it
    /// confirms as spent. Returns the purged outpoints.
    pub async fn reconcile_spent(&self, indexer: &dyn Indexer) -> Result<Vec<OutPoint>, WalletError> {
        let pending: Vec<OutPoint> = {
            let state = self.lock_state()?;
            state
                .entries
                .values()
                .filter(|u| u.spent)
                .map(TrackedUtxo::outpoint)
                .collect()
        };

        let mut confirmed = Vec::new();
        for chunk in pending.chunks(SPENT_STATUS_CHUNK) {
            let statuses = indexer.get_spent_status(chunk).await?;
            confirmed.extend(
                chunk
                    .iter()
                    .zip(statuses)
                    .filter(|(_, spender)| spender.is_some())
                    .map(|(outpoint, _)| *outpoint),
            );
        }

        if !confirmed.is_empty() {
            let mut state = self.lock_state()?;
            for outpoint in &confirmed {
                state.purge(outpoint);
            }
            self.persist(&state)?;
            log::debug!("Purged {} confirmed-spent entries", confirmed.len());
        }
        Ok(confirmed)
    }
}
