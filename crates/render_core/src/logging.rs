//! Logging setup
//!
//! The crate logs through the `log` facade. Applications install whatever
//! backend they like; [`init_logging`] wires up `env_logger` with the level
//! from [`EngineConfig`] as a default that `RUST_LOG` can override.

use crate::config::{ConfigError, EngineConfig};

/// Install `env_logger` as the global logger
///
/// Returns `Ok(false)` if another logger was already installed.
pub fn init_logging(config: &EngineConfig) -> Result<bool, ConfigError> {
    let level = config.level_filter()?;
    let installed = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init()
        .is_ok();

    if installed {
        log::debug!("Logging initialised at level {level}");
    }
    Ok(installed)
}
