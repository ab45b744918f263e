//! Types shared between the session core and its HTTP surface: station
//! records, browse state, published snapshots, configuration and paths.

pub mod browse;
pub mod config;
pub mod platform;
pub mod protocol;
pub mod state;
pub mod station;
