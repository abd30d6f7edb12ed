// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structured logging implementation.
//!
//! Builds a `slog` root logger (terminal or JSON) and carries the per-request
//! information the dispatcher logs when a request completes.

use slog::{Drain, Logger, o};
use slog_async::Async;
use slog_json::Json;
use slog_term::{FullFormat, TermDecorator};
use std::io;
use std::time::Instant;
use uuid::Uuid;

/// Structured logging format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable terminal output
    Terminal,
    /// JSON formatted output
    Json,
}

/// Structured logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Output format (Terminal or JSON)
    pub format: LogFormat,
    /// Log level
    pub level: slog::Level,
    /// Additional static key-value pairs to include in all logs
    pub static_fields: Vec<(String, String)>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Terminal,
            level: slog::Level::Info,
            static_fields: Vec::new(),
        }
    }
}

/// Create a structured logger with the given configuration
pub fn create_logger(config: &LoggerConfig) -> Logger {
    let logger = match config.format {
        LogFormat::Terminal => {
            let decorator = TermDecorator::new().build();
            let drain = FullFormat::new(decorator).build().fuse();
            let drain = drain.filter_level(config.level).fuse();
            let drain = Async::new(drain).build().fuse();
            Logger::root(drain, o!())
        }
        LogFormat::Json => {
            let drain = Json::new(io::stdout()).add_default_keys().build().fuse();
            let drain = drain.filter_level(config.level).fuse();
            let drain = Async::new(drain).build().fuse();
            Logger::root(drain, o!())
        }
    };

    with_static_fields(logger, &config.static_fields)
}

fn with_static_fields(mut logger: Logger, fields: &[(String, String)]) -> Logger {
    for (key, value) in fields {
        // slog keys must be 'static; these live for the whole process anyway
        let key_str: &'static str = Box::leak(key.clone().into_boxed_str());
        logger = logger.new(o!(key_str => value.clone()));
    }
    logger
}

/// Generate a new request correlation id
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Request information for logging context
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Correlation id, forwarded to the API backend
    pub request_id: String,
    /// HTTP method
    pub method: String,
    /// Request URL as received (path and query)
    pub url: String,
    /// Remote address
    pub remote_addr: String,
    started: Instant,
}

impl RequestInfo {
    /// Create a new RequestInfo with a fresh correlation id.
    pub fn new(method: String, url: String, remote_addr: String) -> Self {
        Self {
            request_id: generate_request_id(),
            method,
            url,
            remote_addr,
            started: Instant::now(),
        }
    }

    /// Elapsed time since the request was received.
    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}

/// Global logger guard that keeps the logger alive
pub struct LoggerGuard {
    _guard: slog_scope::GlobalLoggerGuard,
}

/// Initialize the global structured logger
pub fn init_global_logger(config: &LoggerConfig) -> LoggerGuard {
    let logger = create_logger(config);
    let guard = slog_scope::set_global_logger(logger);

    LoggerGuard { _guard: guard }
}
