pub mod config;
pub mod error;
pub mod mii;
pub mod telemetry;
