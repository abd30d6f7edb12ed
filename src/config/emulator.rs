// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed configuration sections for the listeners and the dispatcher.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Listener configuration, read from the `server` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host to bind both listeners to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the emulator entry point.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Port of the auth mini-server.
    #[serde(default = "default_auth_port")]
    pub auth_port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4280
}

fn default_auth_port() -> u16 {
    4242
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_port: default_auth_port(),
        }
    }
}

impl ServerConfig {
    /// Base URL requests under `/.auth` are forwarded to.
    pub fn auth_uri(&self) -> String {
        format!("http://{}:{}", self.host, self.auth_port)
    }
}

/// Locations and upstream targets, read from the `emulator` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmulatorConfig {
    /// Directory static assets and error page overrides are served from.
    #[serde(default = "default_output_location")]
    pub output_location: String,

    /// Directory scanned for the rules document. Falls back to `output_location`.
    #[serde(default)]
    pub app_location: Option<String>,

    /// Dev server the app is proxied to instead of serving files.
    #[serde(default)]
    pub app_uri: Option<String>,

    /// API backend.
    #[serde(default)]
    pub api_uri: Option<String>,

    /// First path segment routed to the API backend.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_output_location() -> String {
    ".".to_string()
}

fn default_api_prefix() -> String {
    "api".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            output_location: default_output_location(),
            app_location: None,
            app_uri: None,
            api_uri: None,
            api_prefix: default_api_prefix(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmulatorConfig {
    /// Directory the rules document is discovered in.
    pub fn app_location(&self) -> PathBuf {
        PathBuf::from(
            self.app_location
                .as_deref()
                .unwrap_or(&self.output_location),
        )
    }

    /// Root of the static output.
    pub fn output_location(&self) -> PathBuf {
        PathBuf::from(&self.output_location)
    }

    /// Path prefix of API requests, e.g. `/api`.
    pub fn api_path_prefix(&self) -> String {
        format!("/{}", self.api_prefix.trim_matches('/'))
    }

    /// Upstream timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
