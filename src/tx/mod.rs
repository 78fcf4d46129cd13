//! Transaction assembly
//!
//! - Fee policy and size estimation
//! - Output scripts (P2PKH, inscriptions, listings)
//! - Builders for payments, ordinal transfers, listings and inscriptions

mod builder;
mod fee;
pub mod script;

pub use builder::{AddressBook, BuiltTransaction, SignedTransaction, TxBuilder};
pub use fee::{output_size, FeePolicy, TxShape, P2PKH_INPUT_SIZE, P2PKH_OUTPUT_SIZE, TX_OVERHEAD};
