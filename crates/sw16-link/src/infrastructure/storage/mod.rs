//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the TOML config file and turns
//! it into the runtime [`ConnectionConfig`](crate::ConnectionConfig).

pub mod config;
