//! Configuration system for the Gather session server and client.
//!
//! Settings persist to disk as RON files, accept CLI overrides via clap, and
//! serialize forward/backward compatibly (missing sections take defaults,
//! unknown fields are ignored).

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{ClientConfig, Config, DebugConfig, ServerConfig, default_config_dir};
pub use error::ConfigError;
