// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration for logging.

use crate::logging::structured::{LogFormat, LoggerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Logging configuration, read from the `logging` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Whether to use structured (slog) logging
    #[serde(default)]
    pub structured: bool,

    /// Log format (terminal or json)
    #[serde(default = "default_format")]
    pub format: String,

    /// Log level
    #[serde(default = "default_level")]
    pub level: String,

    /// Static fields to include in all logs
    #[serde(default)]
    pub static_fields: HashMap<String, String>,
}

fn default_format() -> String {
    "terminal".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            structured: false,
            format: default_format(),
            level: default_level(),
            static_fields: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Convert to logger config
    pub fn to_logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            format: match self.format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Terminal,
            },
            level: match self.level.to_lowercase().as_str() {
                "trace" => slog::Level::Trace,
                "debug" => slog::Level::Debug,
                "info" => slog::Level::Info,
                "warn" => slog::Level::Warning,
                "error" => slog::Level::Error,
                "critical" => slog::Level::Critical,
                _ => slog::Level::Info,
            },
            static_fields: self
                .static_fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// The `log` level filter matching the configured level.
    pub fn level_filter(&self) -> log::LevelFilter {
        match self.level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "warn" => log::LevelFilter::Warn,
            "error" | "critical" => log::LevelFilter::Error,
            "off" => log::LevelFilter::Off,
            _ => log::LevelFilter::Info,
        }
    }
}
