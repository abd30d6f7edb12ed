// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! swa-emu - a local emulator for static-site-plus-API hosting
//!
//! A single reverse proxy sits in front of the static app, the API backend
//! and an authentication emulator. Every request is run through the same
//! declarative routing rules (`staticwebapp.config.json`) the hosting
//! platform enforces, so redirects, headers, access control, fallback
//! routing and error overrides behave locally as they do in production.
//!
//! # Configuration
//!
//! Settings are layered from a JSON, TOML or YAML file and `SWA__`
//! environment variables (later providers win, objects merge):
//!
//! ```toml
//! [server]
//! port = 4280
//! auth_port = 4242
//!
//! [emulator]
//! output_location = "./dist"
//! api_uri = "http://localhost:7071"
//! ```
//!
//! # Starting the emulator
//!
//! ```rust,no_run
//! use swa_emu::Emulator;
//!
//! # async fn run() -> Result<(), swa_emu::LoaderError> {
//! let emulator = Emulator::loader()
//!     .with_config_file("swa.toml")
//!     .with_env_vars()
//!     .build()
//!     .await?;
//! emulator.start().await
//! # }
//! ```
//!
//! # Custom rules
//!
//! The built-in evaluators are [`Rule`]s; a [`RulesPipeline`] can be
//! assembled from any mix of them:
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use swa_emu::{ProxyError, ProxyRequest, ResponseContext, Rule, RulesPipeline};
//!
//! #[derive(Debug)]
//! struct PoweredBy;
//!
//! #[async_trait]
//! impl Rule for PoweredBy {
//!     fn name(&self) -> &str {
//!         "poweredBy"
//!     }
//!
//!     async fn evaluate(
//!         &self,
//!         _request: &mut ProxyRequest,
//!         response: &mut ResponseContext,
//!     ) -> Result<(), ProxyError> {
//!         response.set_header("x-powered-by", "swa-emu");
//!         Ok(())
//!     }
//! }
//!
//! let rules: Vec<Arc<dyn Rule>> = vec![Arc::new(PoweredBy)];
//! let pipeline = RulesPipeline::from_rules(rules);
//! ```

pub mod auth;
pub mod config;
pub mod core;
pub mod loader;
pub mod logging;
pub mod rules;
pub mod server;
pub mod session;

pub use auth::AuthService;
pub use config::{
    Config, ConfigError, ConfigProvider, ConfigProviderExt, EmulatorConfig, EnvConfigProvider,
    FileConfigProvider, ServerConfig,
};
pub use self::core::{ProxyCore, ProxyError, ProxyRequest, ProxyResponse, ResponseContext};
pub use loader::{Emulator, EmulatorLoader, LoaderError};
pub use rules::{Rule, RulesDocument, RulesPipeline, load_rules, parse_rules};
pub use server::{ProxyServer, RequestHandler};
pub use session::{ClientPrincipal, SessionError};
