//! Layered YAML loading.
//!
//! # Design
//! - Layers are deep-merged in order; later mappings override earlier keys.
//! - Interpolation runs once on the merged document, before schema decoding.
//! - The environment lookup is injectable so tests never touch process state.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::expand::expand_env_vars;
use crate::model::{BeamlineConfig, ConfigDocument};

/// Environment variable naming the base configuration file.
pub const CONFIG_PATH_ENV: &str = "BEAMXFER_CONFIG";

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Builder that reads, merges and validates configuration layers.
pub struct ConfigLoader {
    layers: Vec<PathBuf>,
    env: EnvLookup,
}

impl fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader with no layers that reads variables from the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            env: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Loader seeded with the file named by [`CONFIG_PATH_ENV`], when set.
    #[must_use]
    pub fn from_env() -> Self {
        let loader = Self::new();
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => loader.with_layer(path),
            None => loader,
        }
    }

    /// Append a layer.
    #[must_use]
    pub fn with_layer(mut self, path: impl Into<PathBuf>) -> Self {
        self.layers.push(path.into());
        self
    }

    /// Replace the environment lookup used for interpolation.
    #[must_use]
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(lookup);
        self
    }

    /// Configured layers, in merge order.
    #[must_use]
    pub fn layers(&self) -> &[PathBuf] {
        &self.layers
    }

    /// Read every layer, merge, interpolate and validate.
    ///
    /// # Errors
    ///
    /// Returns an error when no layer is configured, a file cannot be read or parsed, or the
    /// merged document fails validation.
    pub fn load(&self) -> ConfigResult<BeamlineConfig> {
        if self.layers.is_empty() {
            return Err(ConfigError::NoLayers);
        }
        let mut merged = Value::Null;
        for path in &self.layers {
            merge_layer(&mut merged, read_layer(path)?);
        }
        let expanded = expand_env_vars(merged, &*self.env)?;
        let document: ConfigDocument =
            serde_yaml::from_value(expanded).map_err(|source| ConfigError::Schema { source })?;
        let config = document.resolve()?;
        debug!(
            layers = self.layers.len(),
            endpoints = config.endpoints.len(),
            beamline_id = %config.beamline_id,
            "configuration loaded"
        );
        Ok(config)
    }
}

fn read_layer(path: &Path) -> ConfigResult<Value> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn merge_layer(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_layer(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, overlay) => *slot = overlay,
    }
}
