//! Configuration loading and logging setup for a command invocation.

use std::path::{Path, PathBuf};

use beamxfer_config::{BeamlineConfig, ConfigLoader};
use beamxfer_telemetry::{LogFormat, LoggingConfig};
use tracing::info;

use crate::error::{AppError, AppResult};

/// Build identifier baked in at compile time, `dev` otherwise.
const BUILD_SHA: &str = match option_env!("BEAMXFER_BUILD_SHA") {
    Some(sha) => sha,
    None => "dev",
};

/// Load `base` and then every overlay, later layers winning.
///
/// # Errors
///
/// Returns [`AppError::Config`] when no layer is given or the merged document is invalid.
pub fn load_config(base: Option<&Path>, overlays: &[PathBuf]) -> AppResult<BeamlineConfig> {
    let loader = base
        .into_iter()
        .chain(overlays.iter().map(PathBuf::as_path))
        .fold(ConfigLoader::new(), ConfigLoader::with_layer);
    loader
        .load()
        .map_err(|source| AppError::config("load_config", source))
}

/// Install the tracing subscriber described by the `logging` section.
///
/// # Errors
///
/// Returns [`AppError::Telemetry`] when a global subscriber is already installed.
pub fn init_logging(config: &BeamlineConfig) -> AppResult<()> {
    let logging = LoggingConfig {
        level: &config.logging.level,
        format: LogFormat::from_name(config.logging.format.as_deref()),
        build_sha: BUILD_SHA,
    };
    beamxfer_telemetry::init_logging(&logging)
        .map_err(|source| AppError::telemetry("init_logging", source))?;
    info!(
        beamline_id = %config.beamline_id,
        endpoints = config.endpoints.len(),
        build_sha = BUILD_SHA,
        "beamxfer starting"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamxfer_test_support::fixtures::SAMPLE_CONFIG;

    #[test]
    fn overlays_apply_after_the_base() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("base.yml");
        let overlay = dir.path().join("overlay.yml");
        std::fs::write(&base, SAMPLE_CONFIG)?;
        std::fs::write(&overlay, "logging:\n  level: debug\n")?;

        let config = load_config(Some(&base), &[overlay])?;
        assert_eq!(config.beamline_id, "832");
        assert_eq!(config.logging.level, "debug");
        Ok(())
    }

    #[test]
    fn no_layers_is_a_configuration_error() {
        assert!(matches!(
            load_config(None, &[]),
            Err(AppError::Config {
                operation: "load_config",
                ..
            })
        ));
    }
}
