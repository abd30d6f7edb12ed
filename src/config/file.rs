// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! File-based configuration provider implementation.

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use super::ConfigError;
use super::ConfigProvider;

/// Supported file formats for emulator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// JSON format (.json)
    Json,
    /// TOML format (.toml)
    Toml,
    /// YAML format (.yaml, .yml)
    Yaml,
}

impl FileFormat {
    /// Detect the file format from the file extension.
    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension().and_then(|ext| {
            match ext.to_string_lossy().to_lowercase().as_str() {
                "json" => Some(FileFormat::Json),
                "toml" => Some(FileFormat::Toml),
                "yaml" | "yml" => Some(FileFormat::Yaml),
                _ => None,
            }
        })
    }
}

/// Settings read from a single JSON, TOML or YAML file.
#[derive(Debug)]
pub struct FileConfigProvider {
    path: PathBuf,
    data: Map<String, Value>,
}

impl FileConfigProvider {
    /// Read and parse the file at `path`.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let path_buf = PathBuf::from(path);
        let format = FileFormat::from_extension(&path_buf)
            .ok_or_else(|| ConfigError::provider_error("file", "unsupported file format"))?;

        let content = fs::read_to_string(&path_buf).map_err(|e| {
            ConfigError::provider_error("file", format!("failed to read {path}: {e}"))
        })?;
        let data = Self::parse(&content, format)?;

        Ok(Self {
            path: path_buf,
            data,
        })
    }

    /// Path the settings were read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(content: &str, format: FileFormat) -> Result<Map<String, Value>, ConfigError> {
        let value = match format {
            FileFormat::Json => serde_json::from_str::<Value>(content)
                .map_err(|e| ConfigError::provider_error("file", format!("invalid JSON: {e}")))?,
            FileFormat::Toml => {
                let toml_value: toml::Value = toml::from_str(content).map_err(|e| {
                    ConfigError::provider_error("file", format!("invalid TOML: {e}"))
                })?;
                serde_json::to_value(toml_value).map_err(|e| {
                    ConfigError::provider_error("file", format!("failed to convert TOML: {e}"))
                })?
            }
            FileFormat::Yaml => {
                let yaml_value: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| {
                    ConfigError::provider_error("file", format!("invalid YAML: {e}"))
                })?;
                serde_json::to_value(yaml_value).map_err(|e| {
                    ConfigError::provider_error("file", format!("failed to convert YAML: {e}"))
                })?
            }
        };

        match value {
            Value::Object(map) => Ok(map),
            _ => Err(ConfigError::provider_error(
                "file",
                "root configuration must be an object",
            )),
        }
    }

    /// Walk a dot-separated key path through nested objects.
    fn get_nested_value(&self, key_path: &str) -> Option<&Value> {
        let mut parts = key_path.split('.');
        let mut current = self.data.get(parts.next()?)?;

        for part in parts {
            current = current.get(part)?;
        }

        Some(current)
    }
}

impl ConfigProvider for FileConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.get_nested_value(key).is_some()
    }

    fn provider_name(&self) -> &str {
        "file"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.get_nested_value(key).cloned())
    }
}
