// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Validates checkpoint settings at boot-up time.
//! Any invalid field results in a ConfigError that prevents checkpointing
//! from being armed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, CrestError, CrestResult};

/// Raw checkpoint section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawCheckpointConfig {
    #[serde(default)]
    checkpoint_to: Option<String>,
    #[serde(default)]
    restore_from: Option<String>,
    #[serde(default = "default_engine")]
    engine: String,
    #[serde(default)]
    engine_dir: Option<String>,
    #[serde(default)]
    ignore_failures: bool,
    #[serde(default)]
    heap_dump_on_failure: bool,
    #[serde(default)]
    print_resources: bool,
    #[serde(default)]
    skip_engine: bool,
    #[serde(default)]
    trace_startup_time: bool,
}

fn default_engine() -> String {
    "criuengine".to_string()
}

impl Default for RawCheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_to: None,
            restore_from: None,
            engine: default_engine(),
            engine_dir: None,
            ignore_failures: false,
            heap_dump_on_failure: false,
            print_resources: false,
            skip_engine: false,
            trace_startup_time: false,
        }
    }
}

/// Raw runtime section.
#[derive(Debug, Default, Deserialize)]
struct RawRuntimeConfig {
    #[serde(default)]
    classpath: String,
    #[serde(default)]
    boot_classpath: String,
    #[serde(default)]
    extension_dirs: String,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    checkpoint: Option<RawCheckpointConfig>,
    #[serde(default)]
    runtime: Option<RawRuntimeConfig>,
}

/// Validated checkpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Image directory for checkpoints. `None` disables the feature.
    pub checkpoint_to: Option<PathBuf>,
    /// Image directory the restore half hands to the engine.
    pub restore_from: Option<PathBuf>,
    /// Engine executable: absolute path, or a name under `engine_dir`.
    pub engine: String,
    /// Installation directory for relative engine names.
    pub engine_dir: Option<PathBuf>,
    /// Proceed with a real checkpoint even when descriptors are unrestorable.
    pub ignore_failures: bool,
    pub heap_dump_on_failure: bool,
    /// Log every descriptor decision at info level.
    pub print_resources: bool,
    /// Classify but never invoke the engine.
    pub skip_engine: bool,
    pub trace_startup_time: bool,
}

impl CheckpointConfig {
    /// Settings with checkpointing disabled.
    pub fn disabled() -> Self {
        Self {
            checkpoint_to: None,
            restore_from: None,
            engine: default_engine(),
            engine_dir: None,
            ignore_failures: false,
            heap_dump_on_failure: false,
            print_resources: false,
            skip_engine: false,
            trace_startup_time: false,
        }
    }

    /// Settings checkpointing into `dir` with the given engine.
    pub fn new(dir: impl Into<PathBuf>, engine: impl Into<String>) -> Self {
        Self {
            checkpoint_to: Some(dir.into()),
            engine: engine.into(),
            ..Self::disabled()
        }
    }

    /// Whether the checkpoint feature is configured at all.
    pub fn enabled(&self) -> bool {
        self.checkpoint_to.is_some()
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Inputs for the standalone runtime: what a managed runtime would otherwise
/// report about its class path and system properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub classpath: String,
    pub boot_classpath: String,
    pub extension_dirs: String,
    pub properties: BTreeMap<String, String>,
}

/// Complete validated configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub checkpoint: CheckpointConfig,
    pub runtime: RuntimeConfig,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> CrestResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(CrestError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CrestError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> CrestResult<Config> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| CrestError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Ok(Config {
            checkpoint: Self::validate_checkpoint(raw.checkpoint.unwrap_or_default())?,
            runtime: Self::validate_runtime(raw.runtime.unwrap_or_default())?,
        })
    }

    fn validate_checkpoint(raw: RawCheckpointConfig) -> Result<CheckpointConfig, ConfigError> {
        let checkpoint_to = Self::optional_dir("checkpoint_to", raw.checkpoint_to)?;
        let restore_from = Self::optional_dir("restore_from", raw.restore_from)?;

        if raw.engine.is_empty() {
            return Err(ConfigError::MissingRequiredField {
                field: "engine",
                context: "checkpoint section".to_string(),
            });
        }
        if raw.engine.contains('\0') {
            return Err(ConfigError::InvalidFieldValue {
                field: "engine",
                value: raw.engine.replace('\0', "\\0"),
                reason: "Engine path cannot contain NUL".to_string(),
            });
        }

        let engine_dir = match raw.engine_dir {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                if !dir.is_absolute() {
                    return Err(ConfigError::InvalidFieldValue {
                        field: "engine_dir",
                        value: dir.display().to_string(),
                        reason: "Engine directory must be an absolute path".to_string(),
                    });
                }
                Some(dir)
            }
            None => None,
        };

        Ok(CheckpointConfig {
            checkpoint_to,
            restore_from,
            engine: raw.engine,
            engine_dir,
            ignore_failures: raw.ignore_failures,
            heap_dump_on_failure: raw.heap_dump_on_failure,
            print_resources: raw.print_resources,
            skip_engine: raw.skip_engine,
            trace_startup_time: raw.trace_startup_time,
        })
    }

    fn optional_dir(
        field: &'static str,
        value: Option<String>,
    ) -> Result<Option<PathBuf>, ConfigError> {
        match value {
            Some(dir) if dir.is_empty() => Err(ConfigError::InvalidFieldValue {
                field,
                value: dir,
                reason: "Directory cannot be empty".to_string(),
            }),
            Some(dir) => Ok(Some(PathBuf::from(dir))),
            None => Ok(None),
        }
    }

    fn validate_runtime(raw: RawRuntimeConfig) -> Result<RuntimeConfig, ConfigError> {
        for key in raw.properties.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(ConfigError::InvalidFieldValue {
                    field: "properties",
                    value: key.clone(),
                    reason: "Property names must be non-empty and contain no '=' or NUL"
                        .to_string(),
                });
            }
        }
        for value in raw.properties.values() {
            if value.contains('\0') {
                return Err(ConfigError::InvalidFieldValue {
                    field: "properties",
                    value: value.replace('\0', "\\0"),
                    reason: "Property values cannot contain NUL".to_string(),
                });
            }
        }

        Ok(RuntimeConfig {
            classpath: raw.classpath,
            boot_classpath: raw.boot_classpath,
            extension_dirs: raw.extension_dirs,
            properties: raw.properties,
        })
    }
}
