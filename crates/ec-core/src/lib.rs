//! ec-core: Conversation session and configuration for the Energy Coach
//! client, plus the `enercoach` CLI binary.

pub mod config;
pub mod session;
