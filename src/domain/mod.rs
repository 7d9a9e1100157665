//! Core domain types and orchestration logic.

pub mod asset_pair;
pub mod candle;
pub mod chunking;
pub mod cleanup;
pub mod error;
pub mod migration;
pub mod migration_engine;
pub mod registry;
pub mod retention;
pub mod settings;
pub mod snapshot;
