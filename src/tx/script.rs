//! Output scripts: P2PKH locks, inscription envelopes and ordlock listings
//!
//! An inscribed output script is a lock followed by an envelope:
//!
//! ```text
//! <lock> OP_FALSE OP_IF "ord" OP_1 <content-type> OP_0 <content> OP_ENDIF
//! ```
//!
//! A listing replaces the plain lock with
//!
//! ```text
//! "ordlock" OP_DROP <price:8 LE || payout script> OP_DROP <owner P2PKH>
//! ```
//!
//! Every push in the listing prefix is dropped, so the owner spends it with
//! the same `<sig> <pubkey>` scriptSig as a plain P2PKH output.

use bitcoin::opcodes::all::{OP_DROP, OP_ENDIF, OP_IF, OP_PUSHNUM_1};
use bitcoin::opcodes::OP_FALSE;
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::{Script, ScriptBuf};

use crate::error::WalletError;
use crate::ledger::Listing;

const ORD_TAG: &[u8] = b"ord";
const ORDLOCK_TAG: &[u8] = b"ordlock";
const MAX_PUSH: usize = 520;

fn push_bytes(data: &[u8]) -> Result<PushBytesBuf, WalletError> {
    PushBytesBuf::try_from(data.to_vec()).map_err(|e| WalletError::Bitcoin(e.to_string()))
}

/// Build the inscription envelope for `content`
pub fn inscription_envelope(content_type: &str, content: &[u8]) -> Result<ScriptBuf, WalletError> {
    let mut builder = Builder::new()
        .push_opcode(OP_FALSE)
        .push_opcode(OP_IF)
        .push_slice(push_bytes(ORD_TAG)?)
        .push_opcode(OP_PUSHNUM_1)
        .push_slice(push_bytes(content_type.as_bytes())?)
        .push_opcode(OP_FALSE);
    for chunk in content.chunks(MAX_PUSH) {
        builder = builder.push_slice(push_bytes(chunk)?);
    }
    Ok(builder.push_opcode(OP_ENDIF).into_script())
}

/// Lock script followed by an envelope
pub fn inscribe(lock: &Script, envelope: &[u8]) -> ScriptBuf {
    let mut bytes = lock.as_bytes().to_vec();
    bytes.extend_from_slice(envelope);
    ScriptBuf::from_bytes(bytes)
}

/// Split an output script into (lock, envelope). The envelope is empty when
/// the script carries no inscription.
pub fn split_envelope(script: &Script) -> (&[u8], &[u8]) {
    let bytes = script.as_bytes();
    let mut previous_false: Option<usize> = None;

    for item in script.instruction_indices() {
        let Ok((index, instruction)) = item else {
            break;
        };
        match instruction {
            Instruction::Op(op) if op == OP_IF => {
                if let Some(start) = previous_false {
                    return bytes.split_at(start);
                }
                previous_false = None;
            }
            Instruction::PushBytes(data) if data.is_empty() => previous_false = Some(index),
            _ => previous_false = None,
        }
    }
    (bytes, &[])
}

/// Content type and content of an envelope, if the script carries one
pub fn parse_inscription(script: &Script) -> Option<(String, Vec<u8>)> {
    let (_, envelope) = split_envelope(script);
    if envelope.is_empty() {
        return None;
    }
    let mut instructions = Script::from_bytes(envelope).instructions().skip(2);

    match instructions.next()? {
        Ok(Instruction::PushBytes(tag)) if tag.as_bytes() == ORD_TAG => {}
        _ => return None,
    }
    match instructions.next()? {
        Ok(Instruction::Op(op)) if op == OP_PUSHNUM_1 => {}
        _ => return None,
    }
    let content_type = match instructions.next()? {
        Ok(Instruction::PushBytes(ct)) => String::from_utf8(ct.as_bytes().to_vec()).ok()?,
        _ => return None,
    };
    match instructions.next()? {
        Ok(Instruction::PushBytes(sep)) if sep.is_empty() => {}
        _ => return None,
    }

    let mut content = Vec::new();
    for instruction in instructions {
        match instruction.ok()? {
            Instruction::PushBytes(data) => content.extend_from_slice(data.as_bytes()),
            Instruction::Op(op) if op == OP_ENDIF => return Some((content_type, content)),
            Instruction::Op(_) => return None,
        }
    }
    None
}

/// Build a listing lock: sale terms ahead of the owner's P2PKH template
pub fn listing_lock(owner: &Script, listing: &Listing) -> Result<ScriptBuf, WalletError> {
    let mut terms = listing.price.to_le_bytes().to_vec();
    terms.extend_from_slice(listing.payout.as_bytes());

    let prefix = Builder::new()
        .push_slice(push_bytes(ORDLOCK_TAG)?)
        .push_opcode(OP_DROP)
        .push_slice(push_bytes(&terms)?)
        .push_opcode(OP_DROP)
        .into_script();

    Ok(inscribe(&prefix, owner.as_bytes()))
}

/// Parse sale terms from a listing script. Returns the terms and the
/// owner lock (without any envelope).
pub fn parse_listing(script: &Script) -> Option<(Listing, ScriptBuf)> {
    let mut instructions = script.instruction_indices();

    match instructions.next()?.ok()? {
        (_, Instruction::PushBytes(tag)) if tag.as_bytes() == ORDLOCK_TAG => {}
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
    let owner_start = match instructions.next()?.ok()? {
        (index, Instruction::Op(op)) if op == OP_DROP => index + 1,
        _ => return None,
    };

    let mut price = [0u8; 8];
    price.copy_from_slice(&terms[..8]);
    let listing = Listing {
        price: u64::from_le_bytes(price),
        payout: ScriptBuf::from_bytes(terms[8..].to_vec()),
    };

    let (lock, _) = split_envelope(script);
    let owner = lock.get(owner_start..)?.to_vec();
    Some((listing, ScriptBuf::from_bytes(owner)))
}
