//! The `config` module loads settings for the broker connection, session
//! timeouts, game namespace, relay server and logging.
//!
//! Sources, lowest precedence first: built-in defaults, an optional
//! `config/default` file, then `CANNON_*` environment variables (a `.env`
//! file is loaded into the environment first). Nested keys use `__`, for
//! example `CANNON_BROKER__URL` or `CANNON_SESSION__OPERATION_TIMEOUT_MS`.

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, GameSettings, LogSettings, ServerSettings, SessionSettings, Settings,
};

/// Loads the configuration from the default file and environment variables
/// and merges it with default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("CANNON")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}

#[cfg(test)]
mod tests;
