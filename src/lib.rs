//! Lock→mint bridge relay - library interface
//!
//! Watches a source chain for bridge `Lock` events, waits for confirmation
//! depth, and submits one mint per unique nonce on the destination chain.
//! Re-exports internal modules for use in integration tests.

pub mod api;
pub mod chain;
pub mod config;
pub mod cursor;
pub mod decoder;
pub mod metrics;
pub mod orchestrator;
pub mod poller;
pub mod queue;
pub mod submitter;
pub mod types;
