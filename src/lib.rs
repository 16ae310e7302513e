//! Souls Burn Stats
//!
//! Aggregates burn statistics for a source/derived NFT collection pair and
//! serves them over HTTP. The binary in `main.rs` wires these modules together.

pub mod api;
pub mod config;
pub mod extract;
pub mod middleware;
pub mod models;
pub mod reference;
pub mod scrapers;
pub mod stats;
