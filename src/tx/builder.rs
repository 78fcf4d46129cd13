use bitcoin::absolute::LockTime;
use bitcoin::address::NetworkUnchecked;
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use std::fmt;

use super::fee::{output_size, FeePolicy, TxShape, P2PKH_INPUT_SIZE, P2PKH_OUTPUT_SIZE};
use super::script;
use crate::error::WalletError;
use crate::keys::{DerivedKey, KeyRef, KeyVault, SeedMaterial};
use crate::ledger::{
    AssetKind, LedgerDelta, Listing, OrdinalMeta, OwnedOutput, ReservationId, TrackedUtxo, UtxoLedger,
};

/// A fully signed transaction, ready for broadcast.
///
/// Not `Clone`: it is handed to the broadcast coordinator by value and
/// submitted at most once.
pub struct SignedTransaction {
    tx: Transaction,
    raw: Vec<u8>,
    txid: Txid,
}

impl SignedTransaction {
    pub(crate) fn from_transaction(tx: Transaction) -> Self {
        let raw = serialize(&tx);
        let txid = tx.compute_txid();
        Self { tx, raw, txid }
    }

    pub fn txid(&self) -> Txid {
        self.txid
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn raw_hex(&self) -> String {
        hex::encode(&self.raw)
    }

    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }
}

impl fmt::Debug for SignedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedTransaction")
            .field("txid", &self.txid)
            .field("size", &self.raw.len())
            .finish()
    }
}

/// Result of a build: the transaction, the ledger effect to apply once it
/// is accepted, and the reservations held until then.
#[derive(Debug)]
pub struct BuiltTransaction {
    pub signed: SignedTransaction,
    pub delta: LedgerDelta,
    pub reservations: Vec<ReservationId>,
    pub fee: u64,
}

/// The wallet's own receive addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBook {
    pub payment: DerivedKey,
    pub ordinal: DerivedKey,
    pub identity: DerivedKey,
}

/// An output the builder must emit, and whether the wallet will own it
struct PlannedOutput {
    txout: TxOut,
    owned: Option<(KeyRef, String, AssetKind)>,
}

/// Inputs fixed before funding, with the reservations already taken
struct Plan {
    fixed_inputs: Vec<TrackedUtxo>,
    outputs: Vec<PlannedOutput>,
    held: Vec<ReservationId>,
    /// Marks output 0 as a new inscription whose origin is this transaction
    new_origin: bool,
}

pub struct TxBuilder {
    vault: KeyVault,
    policy: FeePolicy,
    dust_limit: u64,
}

impl TxBuilder {
    pub fn new(vault: KeyVault, policy: FeePolicy, dust_limit: u64) -> Self {
        Self {
            vault,
            policy,
            dust_limit,
        }
    }

    pub fn policy(&self) -> FeePolicy {
        self.policy
    }

    fn network(&self) -> Network {
        self.vault.network()
    }

    /// Parse and network-check a destination address
    pub fn parse_destination(&self, destination: &str) -> Result<Address, WalletError> {
        destination
            .trim()
            .parse::<Address<NetworkUnchecked>>()
            .map_err(|e| WalletError::InvalidDestination(format!("{}: {}", destination, e)))?
            .require_network(self.network())
            .map_err(|e| WalletError::InvalidDestination(format!("{}: {}", destination, e)))
    }

    /// Pay `amount` to `destination`, change back to the payment address.
    pub fn build_payment(
        &self,
        ledger: &UtxoLedger,
        seed: &SeedMaterial,
        addresses: &AddressBook,
        destination: &str,
        amount: u64,
    ) -> Result<BuiltTransaction, WalletError> {
        let destination = self.parse_destination(destination)?;
        if amount < self.dust_limit {
            return Err(WalletError::InvalidAmount(format!(
                "{} sats is below the dust limit of {}",
                amount, self.dust_limit
            )));
        }

        let owned = (destination == addresses.payment.address).then(|| {
            (
                addresses.payment.key,
                addresses.payment.address.to_string(),
                AssetKind::Payment,
            )
        });

        self.fund_and_sign(
            ledger,
            seed,
            addresses,
            Plan {
                fixed_inputs: vec![],
                outputs: vec![PlannedOutput {
                    txout: TxOut {
                        value: Amount::from_sat(amount),
                        script_pubkey: destination.script_pubkey(),
                    },
                    owned,
                }],
                held: vec![],
                new_origin: false,
            },
        )
    }

    /// Move an ordinal to `destination` as output 0, fees paid from payment
    /// coins. The inscription envelope and the output value are carried
    /// over unchanged.
    pub fn build_ordinal_transfer(
        &self,
        ledger: &UtxoLedger,
        seed: &SeedMaterial,
        addresses: &AddressBook,
        outpoint: &OutPoint,
        destination: &str,
    ) -> Result<BuiltTransaction, WalletError> {
        let destination = self.parse_destination(destination)?;
        let (reservation, source) = ledger.reserve_ordinal(outpoint)?;

        let (_, envelope) = script::split_envelope(&source.script);
        let script_pubkey = script::inscribe(&destination.script_pubkey(), envelope);
        let owned = (destination == addresses.ordinal.address).then(|| {
            (
                addresses.ordinal.key,
                addresses.ordinal.address.to_string(),
                unlisted(&source),
            )
        });

        self.fund_and_sign(
            ledger,
            seed,
            addresses,
            Plan {
                outputs: vec![PlannedOutput {
                    txout: TxOut {
                        value: Amount::from_sat(source.satoshis),
                        script_pubkey,
                    },
                    owned,
                }],
                fixed_inputs: vec![source],
                held: vec![reservation],
                new_origin: false,
            },
        )
    }

    /// Relock an ordinal under an ordlock listing script, payable to the
    /// payment address.
    pub fn build_listing(
        &self,
        ledger: &UtxoLedger,
        seed: &SeedMaterial,
        addresses: &AddressBook,
        outpoint: &OutPoint,
        price: u64,
    ) -> Result<BuiltTransaction, WalletError> {
        if price == 0 {
            return Err(WalletError::InvalidAmount("listing price must be positive".into()));
        }
        let (reservation, source) = ledger.reserve_ordinal(outpoint)?;

        if listing_of(&source).is_some() {
            ledger.release(reservation)?;
            return Err(WalletError::State(format!("{} is already listed", outpoint)));
        }

        let listing = Listing {
            price,
            payout: addresses.payment.address.script_pubkey(),
        };
        let lock = script::listing_lock(&addresses.ordinal.address.script_pubkey(), &listing)?;
        let (_, envelope) = script::split_envelope(&source.script);
        let script_pubkey = script::inscribe(&lock, envelope);

        let mut asset = unlisted(&source);
        if let AssetKind::Ordinal(meta) = &mut asset {
            meta.listing = Some(listing);
        }

        self.fund_and_sign(
            ledger,
            seed,
            addresses,
            Plan {
                outputs: vec![PlannedOutput {
                    txout: TxOut {
                        value: Amount::from_sat(source.satoshis),
                        script_pubkey,
                    },
                    owned: Some((
                        addresses.ordinal.key,
                        addresses.ordinal.address.to_string(),
                        asset,
                    )),
                }],
                fixed_inputs: vec![source],
                held: vec![reservation],
                new_origin: false,
            },
        )
    }

    /// Spend a listed ordinal back to the ordinal address
    pub fn build_cancel_listing(
        &self,
        ledger: &UtxoLedger,
        seed: &SeedMaterial,
        addresses: &AddressBook,
        outpoint: &OutPoint,
    ) -> Result<BuiltTransaction, WalletError> {
        let (reservation, source) = ledger.reserve_ordinal(outpoint)?;

        if listing_of(&source).is_none() {
            ledger.release(reservation)?;
            return Err(WalletError::State(format!("{} is not listed", outpoint)));
        }

        let (_, envelope) = script::split_envelope(&source.script);
        let script_pubkey = script::inscribe(&addresses.ordinal.address.script_pubkey(), envelope);

        self.fund_and_sign(
            ledger,
            seed,
            addresses,
            Plan {
                outputs: vec![PlannedOutput {
                    txout: TxOut {
                        value: Amount::from_sat(source.satoshis),
                        script_pubkey,
                    },
                    owned: Some((
                        addresses.ordinal.key,
                        addresses.ordinal.address.to_string(),
                        unlisted(&source),
                    )),
                }],
                fixed_inputs: vec![source],
                held: vec![reservation],
                new_origin: false,
            },
        )
    }

    /// Inscribe `content` in a new 1-sat output at the identity address
    pub fn build_inscription(
        &self,
        ledger: &UtxoLedger,
        seed: &SeedMaterial,
        addresses: &AddressBook,
        content_type: &str,
        content: &[u8],
    ) -> Result<BuiltTransaction, WalletError> {
        let envelope = script::inscription_envelope(content_type, content)?;
        let script_pubkey = script::inscribe(&addresses.identity.address.script_pubkey(), envelope.as_bytes());

        let meta = OrdinalMeta {
            // Replaced with (txid, 0) once the transaction is signed
            origin: OutPoint::null(),
            content_type: Some(content_type.to_string()),
            listing: None,
            token: None,
        };

        self.fund_and_sign(
            ledger,
            seed,
            addresses,
            Plan {
                fixed_inputs: vec![],
                outputs: vec![PlannedOutput {
                    txout: TxOut {
                        value: Amount::from_sat(1),
                        script_pubkey,
                    },
                    owned: Some((
                        addresses.identity.key,
                        addresses.identity.address.to_string(),
                        AssetKind::Ordinal(meta),
                    )),
                }],
                held: vec![],
                new_origin: true,
            },
        )
    }

    /// Select payment inputs for the plan, add change, sign every input.
    /// Every reservation is released again if anything fails.
    fn fund_and_sign(
        &self,
        ledger: &UtxoLedger,
        seed: &SeedMaterial,
        addresses: &AddressBook,
        mut plan: Plan,
    ) -> Result<BuiltTransaction, WalletError> {
        let result = self.try_fund_and_sign(ledger, seed, addresses, &mut plan);
        if result.is_err() {
            for id in &plan.held {
                ledger.release(*id)?;
            }
        }
        result
    }

    fn try_fund_and_sign(
        &self,
        ledger: &UtxoLedger,
        seed: &SeedMaterial,
        addresses: &AddressBook,
        plan: &mut Plan,
    ) -> Result<BuiltTransaction, WalletError> {
        let fixed_in: u64 = plan.fixed_inputs.iter().map(|u| u.satoshis).sum();
        let fixed_out: u64 = plan.outputs.iter().map(|o| o.txout.value.to_sat()).sum();
        let target = fixed_out.saturating_sub(fixed_in);

        let mut output_sizes: Vec<usize> = plan
            .outputs
            .iter()
            .map(|o| output_size(o.txout.script_pubkey.len()))
            .collect();
        output_sizes.push(P2PKH_OUTPUT_SIZE);
        let shape = TxShape::new(vec![P2PKH_INPUT_SIZE; plan.fixed_inputs.len()], output_sizes);

        let selection = ledger.select_for_amount(target, &self.policy, &shape)?;
        plan.held.push(selection.reservation);

        let change = selection.total + fixed_in - fixed_out - selection.fee;

        let inputs: Vec<TrackedUtxo> = plan
            .fixed_inputs
            .iter()
            .chain(selection.utxos.iter())
            .cloned()
            .collect();

        let mut outputs: Vec<TxOut> = plan.outputs.iter().map(|o| o.txout.clone()).collect();
        let change_vout = if change >= self.dust_limit {
            outputs.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: addresses.payment.address.script_pubkey(),
            });
            Some(outputs.len() as u32 - 1)
        } else {
            if change > 0 {
                log::debug!("Change of {} sats below dust, left to fee", change);
            }
            None
        };

        let unsigned = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: inputs
                .iter()
                .map(|u| TxIn {
                    previous_output: u.outpoint(),
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs,
        };

        let signed = SignedTransaction::from_transaction(self.sign_inputs(seed, unsigned, &inputs)?);
        let txid = signed.txid();

        let mut created = Vec::new();
        for (vout, planned) in plan.outputs.iter().enumerate() {
            if let Some((owner, address, asset)) = &planned.owned {
                let mut asset = asset.clone();
                if plan.new_origin && vout == 0 {
                    if let AssetKind::Ordinal(meta) = &mut asset {
                        meta.origin = OutPoint::new(txid, 0);
                    }
                }
                created.push(OwnedOutput {
                    vout: vout as u32,
                    satoshis: planned.txout.value.to_sat(),
                    script: planned.txout.script_pubkey.clone(),
                    address: address.clone(),
                    owner: *owner,
                    asset,
                });
            }
        }
        if let Some(vout) = change_vout {
            created.push(OwnedOutput {
                vout,
                satoshis: change,
                script: addresses.payment.address.script_pubkey(),
                address: addresses.payment.address.to_string(),
                owner: addresses.payment.key,
                asset: AssetKind::Payment,
            });
        }

        let fee = selection.total + fixed_in - signed.transaction().output.iter().map(|o| o.value.to_sat()).sum::<u64>();
        log::info!(
            "Built {} ({} inputs, {} outputs, fee {} sats)",
            txid,
            inputs.len(),
            signed.transaction().output.len(),
            fee
        );

        Ok(BuiltTransaction {
            delta: LedgerDelta {
                txid,
                consumed: inputs.iter().map(TrackedUtxo::outpoint).collect(),
                created,
            },
            signed,
            reservations: plan.held.clone(),
            fee,
        })
    }

    /// Sign every input with the key recorded against its tracked output
    fn sign_inputs(
        &self,
        seed: &SeedMaterial,
        tx: Transaction,
        inputs: &[TrackedUtxo],
    ) -> Result<Transaction, WalletError> {
        let mut signed_tx = tx.clone();
        let cache = SighashCache::new(&tx);

        for (input_index, utxo) in inputs.iter().enumerate() {
            let sighash = cache
                .legacy_signature_hash(input_index, &utxo.script, EcdsaSighashType::All.to_u32())
                .map_err(|e| WalletError::Bitcoin(e.to_string()))?;

            let signature = self.vault.sign(seed, utxo.owner, &sighash.to_byte_array())?;
            let public_key = self.vault.derive_address(seed, utxo.owner)?.public_key;

            let mut sig_with_hashtype = signature.serialize_der().to_vec();
            sig_with_hashtype.push(EcdsaSighashType::All.to_u32() as u8);

            signed_tx.input[input_index].script_sig = Builder::new()
                .push_slice(
                    PushBytesBuf::try_from(sig_with_hashtype)
                        .map_err(|e| WalletError::Bitcoin(e.to_string()))?,
                )
                .push_key(&public_key)
                .into_script();
        }

        Ok(signed_tx)
    }
}

fn listing_of(utxo: &TrackedUtxo) -> Option<Listing> {
    utxo.ordinal()
        .and_then(|meta| meta.listing.clone())
        .or_else(|| script::parse_listing(&utxo.script).map(|(listing, _)| listing))
}

/// The source's ordinal metadata with any listing removed
fn unlisted(utxo: &TrackedUtxo) -> AssetKind {
    match &utxo.asset {
        AssetKind::Ordinal(meta) => AssetKind::Ordinal(OrdinalMeta {
            listing: None,
            ..meta.clone()
        }),
        other => other.clone(),
    }
}
