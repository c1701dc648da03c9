//! evap-replay
//!
//! Replays recorded evaporator sensor readings to a scoring service over a
//! WebSocket, one row per tick, and keeps a live view of the recommended
//! settings the service streams back.

pub mod classifier;
pub mod config;
pub mod connection;
pub mod controller;
pub mod dataset;
pub mod models;
pub mod normalize;
pub mod replay;

pub use config::ReplayConfig;
pub use controller::{Command, ControllerOptions, ReplayController, ViewState};
