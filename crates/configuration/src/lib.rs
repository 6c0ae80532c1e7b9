//! # Paper Ledger Configuration
//!
//! Typed settings for every component of the service, loaded from an optional
//! `config.toml` and layered with `APP__`-prefixed environment variables
//! (`APP__SERVER__PORT=9000` overrides `[server] port`). `DATABASE_URL`, when
//! present, always wins over `database.url`.
//!
//! The crate also owns logging initialization so that the binary and the
//! standalone web server set up `tracing` identically.

use crate::error::ConfigError;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{DatabaseSettings, LoggingSettings, ServerSettings, Settings, TradingSettings};

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Command-line flags shared by every binary that loads settings.
#[cfg(feature = "clap")]
#[derive(Debug, Clone, clap::Args)]
pub struct ConfigArgs {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: std::path::PathBuf,
}

/// Loads the application configuration.
///
/// The file is optional: a missing file yields the built-in defaults, still
/// subject to environment overrides.
pub fn load_config(path: &Path) -> Result<Settings, ConfigError> {
    let builder = config::Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?;

    build(builder)
}

fn build(builder: ConfigBuilder<DefaultState>) -> Result<Settings, ConfigError> {
    // Attempt to deserialize the entire configuration into our `Settings` struct
    let settings = builder.build()?.try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}
