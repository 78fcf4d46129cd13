//! In-memory output set behind the mock API
//!
//! Accepted transactions spend their inputs and add their outputs, so a
//! wallet talking to the mock sees its own broadcasts on the next refresh.
//! Inscription origins follow 1-sat outputs: the n-th 1-sat output inherits
//! the origin of the n-th 1-sat inscribed input, and a fresh envelope on a
//! 1-sat output without an inherited origin starts a new one.

use base64::{engine::general_purpose::STANDARD, Engine};
use bitcoin::address::NetworkUnchecked;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::opcodes::all::{OP_DROP, OP_ENDIF, OP_IF, OP_PUSHNUM_1};
use bitcoin::opcodes::OP_FALSE;
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::{Address, Network, OutPoint, Script, ScriptBuf, Transaction, Txid};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::*;

pub type SharedState = Arc<RwLock<MockState>>;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("txn-mempool-conflict: {0} already spent")]
    DoubleSpend(String),
}

/// How POST /api/tx answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastMode {
    /// Apply and return the txid
    Accept,
    /// Return 400 with this message, state untouched
    Reject(String),
    /// Return 500, state untouched
    Drop,
    /// Apply, then return 500 as if the reply was lost
    Lost,
    /// Never answer
    Hang,
}

#[derive(Debug, Clone)]
struct MockTxo {
    satoshis: u64,
    script: ScriptBuf,
    owner: Option<String>,
    spend: Option<Txid>,
    origin: Option<OutPoint>,
    listing: Option<(u64, Vec<u8>)>,
    bsv20: Option<Bsv20Data>,
    /// Unlock height of time-locked coins
    lock: Option<u32>,
}

#[derive(Debug, Clone)]
struct Inscription {
    content_type: String,
    content: Vec<u8>,
}

pub struct MockState {
    network: Network,
    txos: BTreeMap<OutPoint, MockTxo>,
    inscriptions: HashMap<OutPoint, Inscription>,
    transactions: HashMap<Txid, Vec<u8>>,
    mode: BroadcastMode,
    counter: u64,
}

impl MockState {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            txos: BTreeMap::new(),
            inscriptions: HashMap::new(),
            transactions: HashMap::new(),
            mode: BroadcastMode::Accept,
            counter: 0,
        }
    }

    pub fn shared(network: Network) -> SharedState {
        Arc::new(RwLock::new(Self::new(network)))
    }

    pub fn mode(&self) -> BroadcastMode {
        self.mode.clone()
    }

    pub fn set_mode(&mut self, mode: BroadcastMode) {
        log::info!("Broadcast mode set to {:?}", mode);
        self.mode = mode;
    }

    fn next_txid(&mut self) -> Txid {
        self.counter += 1;
        let mut seed = b"indexer-mock".to_vec();
        seed.extend_from_slice(&self.counter.to_le_bytes());
        Txid::from_raw_hash(sha256d::Hash::hash(&seed))
    }

    fn lock_for(&self, address: &str) -> Result<ScriptBuf, StateError> {
        let parsed = address
            .parse::<Address<NetworkUnchecked>>()
            .map_err(|e| StateError::InvalidAddress(format!("{}: {}", address, e)))?
            .require_network(self.network)
            .map_err(|e| StateError::InvalidAddress(format!("{}: {}", address, e)))?;
        Ok(parsed.script_pubkey())
    }

    fn owner_of(&self, script: &Script) -> Option<String> {
        let lock = owner_lock(script)?;
        Address::from_script(&lock, self.network)
            .ok()
            .map(|a| a.to_string())
    }

    /// Credit `satoshis` to `address` from a synthetic funding transaction
    pub fn fund(&mut self, address: &str, satoshis: u64) -> Result<OutPoint, StateError> {
        let script = self.lock_for(address)?;
        let outpoint = OutPoint::new(self.next_txid(), 0);
        self.txos.insert(
            outpoint,
            MockTxo {
                satoshis,
                script,
                owner: Some(address.to_string()),
                spend: None,
                origin: None,
                listing: None,
                bsv20: None,
                lock: None,
            },
        );
        log::info!("Funded {} with {} sats at {}", address, satoshis, outpoint);
        Ok(outpoint)
    }

    /// Lock `satoshis` for `address` until block height `until`
    pub fn lock(&mut self, address: &str, satoshis: u64, until: u32) -> Result<OutPoint, StateError> {
        let script = self.lock_for(address)?;
        let outpoint = OutPoint::new(self.next_txid(), 0);
        self.txos.insert(
            outpoint,
            MockTxo {
                satoshis,
                script,
                owner: Some(address.to_string()),
                spend: None,
                origin: None,
                listing: None,
                bsv20: None,
                lock: Some(until),
            },
        );
        log::info!("Locked {} sats for {} until {} at {}", satoshis, address, until, outpoint);
        Ok(outpoint)
    }

    /// Create a 1-sat inscription owned by `address`
    pub fn inscribe(
        &mut self,
        address: &str,
        content_type: &str,
        content: Vec<u8>,
        bsv20: Option<Bsv20Data>,
    ) -> Result<OutPoint, StateError> {
        let script = envelope_script(&self.lock_for(address)?, content_type, &content)?;
        let outpoint = OutPoint::new(self.next_txid(), 0);
        self.inscriptions.insert(
            outpoint,
            Inscription {
                content_type: content_type.to_string(),
                content,
            },
        );
        self.txos.insert(
            outpoint,
            MockTxo {
                satoshis: 1,
                script,
                owner: Some(address.to_string()),
                spend: None,
                origin: Some(outpoint),
                listing: None,
                bsv20,
                lock: None,
            },
        );
        log::info!("Inscribed {} for {} at {}", content_type, address, outpoint);
        Ok(outpoint)
    }

    /// Apply a raw transaction. Resubmitting a known transaction is a no-op.
    pub fn accept(&mut self, raw: &[u8]) -> Result<Txid, StateError> {
        let tx: Transaction = bitcoin::consensus::deserialize(raw)
            .map_err(|e| StateError::InvalidTransaction(e.to_string()))?;
        let txid = tx.compute_txid();
        if self.transactions.contains_key(&txid) {
            return Ok(txid);
        }

        let mut carried = VecDeque::new();
        for input in &tx.input {
            let prev = self
                .txos
                .get(&input.previous_output)
                .ok_or_else(|| StateError::MissingInput(input.previous_output.to_string()))?;
            if prev.spend.is_some() {
                return Err(StateError::DoubleSpend(input.previous_output.to_string()));
            }
            if prev.satoshis == 1 {
                if let Some(origin) = prev.origin {
                    carried.push_back(origin);
                }
            }
        }

        for input in &tx.input {
            if let Some(prev) = self.txos.get_mut(&input.previous_output) {
                prev.spend = Some(txid);
            }
        }

        for (vout, output) in tx.output.iter().enumerate() {
            let outpoint = OutPoint::new(txid, vout as u32);
            let satoshis = output.value.to_sat();
            let script = output.script_pubkey.clone();

            let origin = if satoshis == 1 {
                carried.pop_front().or_else(|| {
                    let (content_type, content) = parse_envelope(&script)?;
                    self.inscriptions.insert(
                        outpoint,
                        Inscription {
                            content_type,
                            content,
                        },
                    );
                    Some(outpoint)
                })
            } else {
                None
            };

            let owner = self.owner_of(&script);
            let listing = listing_terms(&script).map(|(price, payout, _)| (price, payout));
            self.txos.insert(
                outpoint,
                MockTxo {
                    satoshis,
                    script,
                    owner,
                    spend: None,
                    origin,
                    listing,
                    bsv20: None,
                    lock: None,
                },
            );
        }

        self.transactions.insert(txid, raw.to_vec());
        log::info!(
            "Accepted {} ({} inputs, {} outputs)",
            txid,
            tx.input.len(),
            tx.output.len()
        );
        Ok(txid)
    }

    pub fn raw_transaction(&self, txid: &Txid) -> Option<&[u8]> {
        self.transactions.get(txid).map(Vec::as_slice)
    }

    pub fn unspent_for(&self, address: &str) -> Vec<TxoResponse> {
        self.txos
            .iter()
            .filter(|(_, txo)| {
                txo.spend.is_none() && txo.lock.is_none() && txo.owner.as_deref() == Some(address)
            })
            .map(|(outpoint, txo)| self.response(outpoint, txo))
            .collect()
    }

    pub fn locks_for(&self, address: &str) -> Vec<TxoResponse> {
        self.txos
            .iter()
            .filter(|(_, txo)| {
                txo.spend.is_none() && txo.lock.is_some() && txo.owner.as_deref() == Some(address)
            })
            .map(|(outpoint, txo)| self.response(outpoint, txo))
            .collect()
    }

    pub fn tokens_for(&self, address: &str, id: &str) -> Vec<TxoResponse> {
        self.txos
            .iter()
            .filter(|(_, txo)| {
                txo.spend.is_none()
                    && txo.owner.as_deref() == Some(address)
                    && txo.bsv20.as_ref().is_some_and(|t| t.id == id)
            })
            .map(|(outpoint, txo)| self.response(outpoint, txo))
            .collect()
    }

    /// One output, spent or not
    pub fn output(&self, outpoint: &OutPoint) -> Option<TxoResponse> {
        self.txos.get(outpoint).map(|txo| self.response(outpoint, txo))
    }

    /// Spending txid per `txid_vout` key, empty when unspent or unknown
    pub fn spends(&self, keys: &[String]) -> Vec<String> {
        keys.iter()
            .map(|key| {
                parse_outpoint(key)
                    .and_then(|outpoint| self.txos.get(&outpoint))
                    .and_then(|txo| txo.spend)
                    .map(|txid| txid.to_string())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Content type and bytes of the inscription at `origin`
    pub fn content(&self, origin: &OutPoint) -> Option<(String, Vec<u8>)> {
        self.inscriptions
            .get(origin)
            .map(|i| (i.content_type.clone(), i.content.clone()))
    }

    fn response(&self, outpoint: &OutPoint, txo: &MockTxo) -> TxoResponse {
        let list = txo.listing.as_ref().map(|(price, payout)| ListData {
            price: *price,
            payout: STANDARD.encode(payout),
        });
        let lock = txo.lock.map(|until| LockData { until });
        let data = (list.is_some() || txo.bsv20.is_some() || lock.is_some()).then(|| TxoData {
            insc: None,
            list,
            bsv20: txo.bsv20.clone(),
            lock,
        });

        TxoResponse {
            txid: outpoint.txid.to_string(),
            vout: outpoint.vout,
            outpoint: format_outpoint(outpoint),
            satoshis: txo.satoshis,
            script: STANDARD.encode(txo.script.as_bytes()),
            owner: txo.owner.clone(),
            spend: txo.spend.map(|t| t.to_string()),
            origin: txo.origin.map(|origin| OriginResponse {
                outpoint: format_outpoint(&origin),
                data: self.inscriptions.get(&origin).map(|i| TxoData {
                    insc: Some(InscriptionData {
                        file: FileData {
                            content_type: i.content_type.clone(),
                            size: i.content.len() as u64,
                        },
                    }),
                    ..Default::default()
                }),
            }),
            data,
        }
    }
}

pub fn format_outpoint(outpoint: &OutPoint) -> String {
    format!("{}_{}", outpoint.txid, outpoint.vout)
}

pub fn parse_outpoint(s: &str) -> Option<OutPoint> {
    let (txid, vout) = s.split_once('_')?;
    Some(OutPoint::new(txid.parse().ok()?, vout.parse().ok()?))
}

/// Price, payout script and owner-lock offset of an ordlock listing
fn listing_terms(script: &Script) -> Option<(u64, Vec<u8>, usize)> {
    let mut instructions = script.instruction_indices();

    match instructions.next()?.ok()? {
        (_, Instruction::PushBytes(tag)) if tag.as_bytes() == b"ordlock" => {}
        _ => return None,
    }
    match instructions.next()?.ok()? {
        (_, Instruction::Op(op)) if op == OP_DROP => {}
        _ => return None,
    }
    let terms = match instructions.next()?.ok()? {
        (_, Instruction::PushBytes(terms)) if terms.len() >= 8 => terms.as_bytes().to_vec(),
        _ => return None,
    };
    let start = match instructions.next()?.ok()? {
        (index, Instruction::Op(op)) if op == OP_DROP => index + 1,
        _ => return None,
    };

    let mut price = [0u8; 8];
    price.copy_from_slice(&terms[..8]);
    Some((u64::from_le_bytes(price), terms[8..].to_vec(), start))
}

/// The P2PKH template that owns an output, ahead of any envelope
fn owner_lock(script: &Script) -> Option<ScriptBuf> {
    let start = listing_terms(script).map(|(_, _, start)| start).unwrap_or(0);
    let lock = Script::from_bytes(script.as_bytes().get(start..start + 25)?);
    lock.is_p2pkh().then(|| lock.to_owned())
}

/// `lock` followed by an inscription envelope for `content`
fn envelope_script(lock: &Script, content_type: &str, content: &[u8]) -> Result<ScriptBuf, StateError> {
    let push = |data: &[u8]| {
        PushBytesBuf::try_from(data.to_vec()).map_err(|e| StateError::InvalidTransaction(e.to_string()))
    };

    let mut builder = Builder::from(lock.to_bytes())
        .push_opcode(OP_FALSE)
        .push_opcode(OP_IF)
        .push_slice(push(b"ord")?)
        .push_opcode(OP_PUSHNUM_1)
        .push_slice(push(content_type.as_bytes())?)
        .push_opcode(OP_FALSE);
    for chunk in content.chunks(520) {
        builder = builder.push_slice(push(chunk)?);
    }
    Ok(builder.push_opcode(OP_ENDIF).into_script())
}

fn parse_envelope(script: &Script) -> Option<(String, Vec<u8>)> {
    let instructions: Vec<Instruction> = script.instructions().collect::<Result<_, _>>().ok()?;

    let start = instructions.windows(3).position(|w| {
        matches!(
            (&w[0], &w[1], &w[2]),
            (Instruction::PushBytes(f), Instruction::Op(op), Instruction::PushBytes(tag))
                if f.is_empty() && *op == OP_IF && tag.as_bytes() == b"ord"
        )
    })?;
    let mut rest = instructions[start + 3..].iter();

    match rest.next()? {
        Instruction::Op(op) if *op == OP_PUSHNUM_1 => {}
        _ => return None,
    }
    let content_type = match rest.next()? {
        Instruction::PushBytes(ct) => String::from_utf8(ct.as_bytes().to_vec()).ok()?,
        _ => return None,
    };
    match rest.next()? {
        Instruction::PushBytes(sep) if sep.is_empty() => {}
        _ => return None,
    }

    let mut content = Vec::new();
    for instruction in rest {
        match instruction {
            Instruction::PushBytes(data) => content.extend_from_slice(data.as_bytes()),
            Instruction::Op(op) if *op == OP_ENDIF => return Some((content_type, content)),
            Instruction::Op(_) => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn";

    #[test]
    fn test_fund_is_listed_until_spent() {
        let mut state = MockState::new(Network::Testnet);
        let outpoint = state.fund(ADDRESS, 10_000).unwrap();

        let unspent = state.unspent_for(ADDRESS);
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].satoshis, 10_000);
        assert!(unspent[0].origin.is_none());

        assert_eq!(state.spends(&[format_outpoint(&outpoint)]), vec![String::new()]);
    }

    #[test]
    fn test_inscription_has_origin_and_content() {
        let mut state = MockState::new(Network::Testnet);
        let outpoint = state
            .inscribe(ADDRESS, "text/plain", b"hello".to_vec(), None)
            .unwrap();

        let unspent = state.unspent_for(ADDRESS);
        assert_eq!(unspent[0].origin.as_ref().unwrap().outpoint, format_outpoint(&outpoint));
        assert_eq!(state.content(&outpoint).unwrap().1, b"hello".to_vec());

        let script = state.txos[&outpoint].script.clone();
        assert_eq!(owner_lock(&script).unwrap(), state.lock_for(ADDRESS).unwrap());
        assert_eq!(
            parse_envelope(&script),
            Some(("text/plain".to_string(), b"hello".to_vec()))
        );
    }

    #[test]
    fn test_locked_coins_are_listed_apart() {
        let mut state = MockState::new(Network::Testnet);
        state.fund(ADDRESS, 10_000).unwrap();
        state.lock(ADDRESS, 5_000, 900_000).unwrap();

        let unspent = state.unspent_for(ADDRESS);
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].satoshis, 10_000);

        let locks = state.locks_for(ADDRESS);
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].data.as_ref().unwrap().lock.as_ref().unwrap().until, 900_000);
    }

    #[test]
    fn test_rejects_wrong_network_address() {
        let mut state = MockState::new(Network::Bitcoin);
        assert!(matches!(
            state.fund(ADDRESS, 1),
            Err(StateError::InvalidAddress(_))
        ));
    }
}
