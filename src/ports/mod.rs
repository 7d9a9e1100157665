//! Port traits: the contracts the orchestration core requires from its
//! collaborators.

pub mod asset_metadata;
pub mod candle_sink;
pub mod cleanup_task;
pub mod config_port;
pub mod history_provider;
pub mod snapshot_backend;
