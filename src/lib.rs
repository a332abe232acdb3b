//! ChainSync - a proof-of-work ledger kept in step between two peers
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`block`] - Block structure, hashing and proof-of-work
//! - [`chain`] - Genesis, append rules, mining templates, difficulty retargeting
//! - [`events`] - Chain-changed notifications
//!
//! ## Mining
//! - [`miner`] - Cancellable mining loop
//!
//! ## Networking
//! - [`wire`] - Versioned wire schema and length-prefixed framing
//! - [`network`] - Loopback listener, connector and peer links
//! - [`sync`] - Periodic whole-chain exchange with the peer
//!
//! ## Orchestration & Utilities
//! - [`node`] - Wires chain, miner and sync loop together
//! - [`shutdown`] - Cancellation shared by the loops
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod block;
pub mod chain;
pub mod events;

// ============================================================================
// Mining
// ============================================================================
pub mod miner;

// ============================================================================
// Networking
// ============================================================================
pub mod network;
pub mod sync;
pub mod wire;

// ============================================================================
// Orchestration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod node;
pub mod shutdown;

pub use block::Block;
pub use chain::{Blockchain, ChainParams, SharedChain};
pub use error::{ChainError, Result};
pub use events::{BlockStatus, ChainEvent};
