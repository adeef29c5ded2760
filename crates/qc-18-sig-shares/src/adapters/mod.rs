//! Adapters for the Signature Shares subsystem.
//!
//! - `config`: configuration providers (static, TOML file)
//! - `time`: wall-clock `TimeSource`

pub mod config;
pub mod time;

pub use config::{StaticConfigProvider, TomlConfigProvider};
pub use time::SystemTimeSource;
