//! Ordinals Indexer Mock Library
//!
//! This crate provides both a standalone binary and library components
//! for mocking the ordinals indexer and broadcast API with an in-memory
//! output set.

pub mod handlers;
pub mod server;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use server::{create_router, run_server, spawn_server};
pub use state::{BroadcastMode, MockState, SharedState, StateError};
pub use types::*;
