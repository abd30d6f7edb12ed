// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging utilities.
//!
//! Everything logs through the `log` facade. By default `env_logger` is the
//! backend; when the `logging.structured` flag is set, a `slog` logger is
//! installed instead and `slog_stdlog` bridges the facade into it.

pub mod config;
pub mod structured;
mod wrapper;


use log::LevelFilter;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::logging::config::LoggingConfig;
use crate::logging::structured::{LoggerGuard, init_global_logger};

static INIT: Once = Once::new();
static USING_STRUCTURED: AtomicBool = AtomicBool::new(false);
static STRUCTURED_GUARD: Mutex<Option<LoggerGuard>> = Mutex::new(None);

fn level_name(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Trace => "trace",
        LevelFilter::Debug => "debug",
        LevelFilter::Info => "info",
        LevelFilter::Warn => "warn",
        LevelFilter::Error => "error",
        LevelFilter::Off => "off",
    }
}

/// Initialize `env_logger` with the specified level.
///
/// This function ensures logging is only initialized once; `RUST_LOG` still
/// takes precedence over `level`.
pub fn init(level: Option<LevelFilter>) {
    INIT.call_once(|| {
        let env = env_logger::Env::default()
            .filter_or("RUST_LOG", level.map_or("info", level_name));

        // try_init: a test harness may already own the global logger
        let _ = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_target(true)
            .try_init();

        log::info!("Logging initialized at level: {}", log::max_level());
    });
}

/// Initialize logging from a [`LoggingConfig`].
///
/// Structured logging installs a global slog logger and bridges `log` into
/// it; otherwise this falls back to [`init`].
pub fn init_with_config(config: &LoggingConfig) {
    let level = config.level_filter();

    if !config.structured {
        init(Some(level));
        return;
    }

    INIT.call_once(|| {
        let guard = init_global_logger(&config.to_logger_config());
        if slog_stdlog::init().is_ok() {
            log::set_max_level(level);
            USING_STRUCTURED.store(true, Ordering::SeqCst);
        }
        if let Ok(mut slot) = STRUCTURED_GUARD.lock() {
            *slot = Some(guard);
        }
        log::info!("Structured logging initialized at level: {}", level_name(level));
    });
}

/// Whether the structured (slog) backend is active.
pub fn is_structured() -> bool {
    USING_STRUCTURED.load(Ordering::SeqCst)
}
