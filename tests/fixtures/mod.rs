//! Test fixtures for flood-eaul.
//!
//! Provides:
//! - A five-node road network with a flood-prone main road, a detour and a
//!   spur that floods at high return periods
//! - An in-process routing engine that contracts and routes that network

pub mod flood_network;
pub mod toy_engine;

pub use flood_network::*;
pub use toy_engine::*;
