//! Broadcast coordination
//!
//! Submits a signed transaction once, classifies the outcome and applies
//! or unwinds the ledger effect:
//!
//! - accepted: the delta is applied before `submit` returns
//! - rejected or never sent: reservations are released, ledger untouched
//! - indeterminate: reservations stay held and the build is remembered
//!   until `resolve_pending` can tell what happened

use bitcoin::Txid;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::WalletError;
use crate::indexer::{Broadcaster, Indexer, SubmitResponse};
use crate::ledger::{LedgerDelta, ReservationId, UtxoLedger};
use crate::tx::{BuiltTransaction, SignedTransaction};

/// A broadcast whose outcome is unknown
#[derive(Debug, Clone)]
pub struct PendingBroadcast {
    pub delta: LedgerDelta,
    pub reservations: Vec<ReservationId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Inputs were spent by this transaction; delta applied
    Applied,
    /// Transaction never landed or lost to a conflict; reservations released
    Released,
    /// Indexer state is still inconclusive
    StillPending,
}

pub struct BroadcastCoordinator {
    broadcaster: Arc<dyn Broadcaster>,
    timeout: Duration,
    pending: Mutex<HashMap<Txid, PendingBroadcast>>,
}

impl BroadcastCoordinator {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, timeout: Duration) -> Self {
        Self {
            broadcaster,
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Submit `tx` to the network without touching any ledger.
    ///
    /// Never retries. A timeout is `Indeterminate`, since the transaction
    /// may have reached the network.
    pub async fn broadcast(&self, tx: SignedTransaction) -> Result<Txid, WalletError> {
        let txid = tx.txid();
        log::info!("Broadcasting {} ({} bytes)", txid, tx.raw().len());

        let outcome = tokio::time::timeout(self.timeout, self.broadcaster.submit_raw_transaction(tx.raw())).await;

        match outcome {
            Err(_) => {
                log::warn!("Broadcast of {} timed out after {:?}", txid, self.timeout);
                Err(WalletError::Indeterminate(format!(
                    "no answer within {:?}",
                    self.timeout
                )))
            }
            Ok(Err(e)) => {
                log::warn!("Broadcast of {} failed: {}", txid, e);
                Err(e)
            }
            Ok(Ok(SubmitResponse::Rejected(message))) => {
                log::warn!("Broadcast of {} rejected: {}", txid, message);
                Err(WalletError::Rejected(message))
            }
            Ok(Ok(SubmitResponse::Accepted(remote))) if remote != txid => {
                log::warn!("Broadcast of {} acknowledged as {}", txid, remote);
                Err(WalletError::Indeterminate(format!(
                    "network acknowledged {} instead of {}",
                    remote, txid
                )))
            }
            Ok(Ok(SubmitResponse::Accepted(_))) => {
                log::info!("Broadcast accepted: {}", txid);
                Ok(txid)
            }
        }
    }

    /// Broadcast a build and settle its ledger effect
    pub async fn submit(&self, ledger: &UtxoLedger, built: BuiltTransaction) -> Result<Txid, WalletError> {
        let BuiltTransaction {
            signed,
            delta,
            reservations,
            ..
        } = built;

        match self.broadcast(signed).await {
            Ok(txid) => {
                ledger.apply_broadcast_delta(&delta)?;
                for id in reservations {
                    ledger.release(id)?;
                }
                Ok(txid)
            }
            Err(WalletError::Indeterminate(reason)) => {
                log::warn!("Holding inputs of {} until its outcome is known", delta.txid);
                self.lock_pending()?.insert(
                    delta.txid,
                    PendingBroadcast {
                        delta,
                        reservations,
                    },
                );
                Err(WalletError::Indeterminate(reason))
            }
            Err(e) => {
                for id in reservations {
                    ledger.release(id)?;
                }
                Err(e)
            }
        }
    }

    pub fn pending(&self) -> Result<Vec<Txid>, WalletError> {
        Ok(self.lock_pending()?.keys().copied().collect())
    }

    /// Settle every indeterminate broadcast from the inputs' spent status
    pub async fn resolve_pending(
        &self,
        ledger: &UtxoLedger,
        indexer: &dyn Indexer,
    ) -> Result<Vec<(Txid, Resolution)>, WalletError> {
        let pending: Vec<PendingBroadcast> = self.lock_pending()?.values().cloned().collect();
        let mut results = Vec::new();

        for entry in pending {
            let txid = entry.delta.txid;
            let spenders = indexer.get_spent_status(&entry.delta.consumed).await?;

            let ours = spenders.iter().filter(|s| **s == Some(txid)).count();
            let unspent = spenders.iter().filter(|s| s.is_none()).count();

            let resolution = if ours == spenders.len() {
                ledger.apply_broadcast_delta(&entry.delta)?;
                for id in &entry.reservations {
                    ledger.release(*id)?;
                }
                Resolution::Applied
            } else if ours == 0 {
                // Nothing spent by us: never landed, or a conflicting spend won
                for id in &entry.reservations {
                    ledger.release(*id)?;
                }
                Resolution::Released
            } else {
                log::debug!("{}: {} of {} inputs unspent", txid, unspent, spenders.len());
                Resolution::StillPending
            };

            if resolution != Resolution::StillPending {
                self.lock_pending()?.remove(&txid);
            }
            log::info!("Pending broadcast {} resolved as {:?}", txid, resolution);
            results.push((txid, resolution));
        }
        Ok(results)
    }

    fn lock_pending(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Txid, PendingBroadcast>>, WalletError> {
        self.pending
            .lock()
            .map_err(|_| WalletError::State("pending broadcast map poisoned".into()))
    }
}
