//! flood-eaul: expected annual user loss of flooding on a road network, and
//! the loss each road upgrade avoids.
//!
//! Routing goes through the [`engine::RoutingEngine`] trait; [`osrm_tools`]
//! provides the OSRM implementation.

pub mod config;
pub mod cost_table;
pub mod criticality;
pub mod eaul;
pub mod engine;
pub mod error;
pub mod exclusion;
pub mod flood;
pub mod inputs;
pub mod logging;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod osrm;
pub mod osrm_tools;
pub mod scenario;
pub mod traffic;
