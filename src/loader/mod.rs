// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level entry point.
//!
//! The [`EmulatorLoader`] consumes configuration, discovers and compiles the
//! rules document and returns an [`Emulator`] holding both listeners, ready
//! to [`start`](Emulator::start).


use std::sync::Arc;
use thiserror::Error;

use crate::auth::AuthService;
use crate::config::{
    Config, ConfigError, ConfigProvider, EmulatorConfig, EnvConfigProvider, FileConfigProvider,
    ServerConfig,
};
use crate::core::{ProxyCore, ProxyError};
use crate::logging::config::LoggingConfig;
use crate::rules::{RulesDocument, load_rules};
use crate::server::ProxyServer;
use crate::{info_fmt, logging};

/// Errors that can occur while starting the emulator.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Proxy error
    #[error("proxy error: {0}")]
    ProxyError(#[from] ProxyError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Builder for an [`Emulator`].
///
/// Providers are layered file, then custom providers, then environment, so
/// `SWA__` variables always have the last word.
#[derive(Debug, Default)]
pub struct EmulatorLoader {
    config: Option<Config>,
    config_file_path: Option<String>,
    use_env_vars: bool,
    env_prefix: Option<String>,
    providers: Vec<Arc<dyn ConfigProvider>>,
    rules: Option<RulesDocument>,
}

impl EmulatorLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a ready-made configuration; file, provider and env settings are ignored.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Load settings from a JSON, TOML or YAML file.
    pub fn with_config_file(mut self, file_path: &str) -> Self {
        self.config_file_path = Some(file_path.to_string());
        self
    }

    /// Layer the `SWA__` environment variables on top.
    pub fn with_env_vars(mut self) -> Self {
        self.use_env_vars = true;
        self
    }

    /// Layer environment variables with a custom prefix on top.
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.use_env_vars = true;
        self
    }

    /// Add a custom configuration provider.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Skip discovery and enforce this rules document.
    pub fn with_rules(mut self, document: RulesDocument) -> Self {
        self.rules = Some(document);
        self
    }

    fn build_config(&mut self) -> Result<Config, LoaderError> {
        if let Some(config) = self.config.take() {
            return Ok(config);
        }

        let mut builder = Config::builder();
        if let Some(path) = &self.config_file_path {
            builder = builder.with_provider(FileConfigProvider::new(path)?);
        }
        for provider in self.providers.drain(..) {
            builder = builder.with_shared_provider(provider);
        }
        if self.use_env_vars {
            builder = match &self.env_prefix {
                Some(prefix) => builder.with_provider(EnvConfigProvider::new(prefix)),
                None => builder.with_provider(EnvConfigProvider::default()),
            };
        }
        Ok(builder.build())
    }

    /// Resolve configuration, load the rules and wire both listeners.
    pub async fn build(mut self) -> Result<Emulator, LoaderError> {
        let config = Arc::new(self.build_config()?);

        match config.get::<LoggingConfig>("logging")? {
            Some(logging_config) => logging::init_with_config(&logging_config),
            None => logging::init(None),
        }

        let server_config: ServerConfig = config.get_or_default("server", ServerConfig::default())?;
        let emulator_config: EmulatorConfig =
            config.get_or_default("emulator", EmulatorConfig::default())?;
        let emulator_config = Arc::new(emulator_config);

        let document = match self.rules.take() {
            Some(document) => document,
            None => load_rules(&emulator_config.app_location()).await,
        };

        info_fmt!(
            "Loader",
            "Serving {} (api: {}, app dev server: {})",
            emulator_config.output_location,
            emulator_config.api_uri.as_deref().unwrap_or("none"),
            emulator_config.app_uri.as_deref().unwrap_or("none")
        );

        let core = Arc::new(ProxyCore::new(
            emulator_config.clone(),
            server_config.auth_uri(),
            Arc::new(document),
        )?);

        let server = ProxyServer::new(
            "Emulator",
            server_config.host.clone(),
            server_config.port,
            core.clone(),
        );
        let auth_server = ProxyServer::new(
            "AuthServer",
            server_config.host.clone(),
            server_config.auth_port,
            Arc::new(AuthService::new()),
        );

        Ok(Emulator {
            config,
            core,
            server,
            auth_server,
        })
    }
}

/// A fully wired emulator: the dispatcher listener plus the auth listener.
#[derive(Debug, Clone)]
pub struct Emulator {
    config: Arc<Config>,
    core: Arc<ProxyCore>,
    server: ProxyServer,
    auth_server: ProxyServer,
}

impl Emulator {
    pub fn loader() -> EmulatorLoader {
        EmulatorLoader::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn core(&self) -> &Arc<ProxyCore> {
        &self.core
    }

    pub fn server(&self) -> &ProxyServer {
        &self.server
    }

    pub fn auth_server(&self) -> &ProxyServer {
        &self.auth_server
    }

    /// Bind both listeners, then serve until shutdown.
    pub async fn start(&self) -> Result<(), LoaderError> {
        let auth_listener = self.auth_server.bind().await?;
        let listener = self.server.bind().await?;

        tokio::try_join!(
            self.auth_server.serve(auth_listener),
            self.server.serve(listener)
        )?;
        info_fmt!("Emulator", "Stopped");
        Ok(())
    }

    /// Ask both listeners to drain and stop.
    pub fn shutdown(&self) {
        self.server.shutdown();
        self.auth_server.shutdown();
    }
}
