// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Emulator configuration subsystem
//!
//! Settings come from an ordered list of [`ConfigProvider`]s; later providers
//! override earlier ones. The binary stacks them like this:
//!
//! 1. `FileConfigProvider` – `swa.{toml,json,yaml}` named by `SWA_CONFIG_FILE`
//! 2. `EnvConfigProvider`  – `SWA__EMULATOR__API_URI=http://localhost:7071`
//!
//! When several providers hold an object under the same key the objects are
//! merged field by field, so a single environment override leaves the rest
//! of a section intact.
//!
//! | key | type | default | description |
//! |-----|------|---------|-------------|
//! | `server.host`               | string | `127.0.0.1` | Bind address of both listeners |
//! | `server.port`               | u16    | `4280`      | Emulator entry point          |
//! | `server.auth_port`          | u16    | `4242`      | Auth mini-server              |
//! | `emulator.output_location`  | path   | `.`         | Static output directory       |
//! | `emulator.app_location`     | path   | output      | Rules document search root    |
//! | `emulator.app_uri`          | url    | –           | App dev server                |
//! | `emulator.api_uri`          | url    | –           | API backend                   |
//! | `emulator.api_prefix`       | string | `api`       | API path segment              |
//! | `emulator.timeout_secs`     | u64    | `30`        | Upstream timeout              |
//! | `logging`                   | object | –           | See `LoggingConfig`           |

mod emulator;
mod env;
pub mod error;
mod file;


pub use emulator::{EmulatorConfig, ServerConfig};
pub use env::EnvConfigProvider;
pub use error::ConfigError;
pub use file::{FileConfigProvider, FileFormat};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// Core configuration provider trait that all configuration sources must implement.
/// This trait is object-safe since it doesn't contain generic methods.
pub trait ConfigProvider: Debug + Send + Sync {
    /// Check if the configuration provider has a value for the given key.
    fn has(&self, key: &str) -> bool;

    /// Get the name of the configuration provider for debugging purposes.
    fn provider_name(&self) -> &str;

    /// Get a raw configuration value by key.
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError>;
}

/// Typed access on top of a single provider.
pub trait ConfigProviderExt: ConfigProvider {
    /// Get a configuration value by key and deserialize it to the specified type.
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                ConfigError::ParseError(format!("failed to deserialize '{key}': {e}"))
            }),
            None => Ok(None),
        }
    }
}

impl<T: ConfigProvider> ConfigProviderExt for T {}

/// Builder for the configuration system.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration provider.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Add a provider that is already shared.
    pub fn with_shared_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Config {
        Config {
            providers: self.providers,
        }
    }
}

/// Holds all providers and resolves keys across them.
#[derive(Debug, Clone)]
pub struct Config {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Resolve a key, letting later providers override earlier ones and
    /// merging object values.
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        let mut resolved: Option<Value> = None;

        for provider in &self.providers {
            if !provider.has(key) {
                continue;
            }
            if let Some(value) = provider.get_raw(key)? {
                resolved = Some(match resolved {
                    Some(base) => merge_values(base, value),
                    None => value,
                });
            }
        }

        Ok(resolved)
    }

    /// Get a configuration value by key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get_raw(key)? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                ConfigError::ParseError(format!("failed to deserialize '{key}': {e}"))
            }),
            None => Ok(None),
        }
    }

    /// Get a configuration value by key with a default fallback value.
    pub fn get_or_default<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.get(key)? {
            Some(value) => Ok(value),
            None => Ok(default),
        }
    }

    /// Configuration backed by a single settings file.
    pub fn default_file(file_path: &str) -> Result<Self, ConfigError> {
        let provider = FileConfigProvider::new(file_path)?;
        Ok(Self::builder().with_provider(provider).build())
    }

    /// Configuration backed by the `SWA__` environment variables only.
    pub fn from_env() -> Self {
        Self::builder()
            .with_provider(EnvConfigProvider::default())
            .build()
    }
}

/// Merge `overlay` into `base`. Objects merge per field, anything else is replaced.
fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}
