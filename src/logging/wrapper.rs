// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging wrapper macros that route all messages to the standard `log` facade.
//! The `slog_stdlog` bridge (installed by [`crate::logging::init_with_config`])
//! forwards to `slog` when structured logging is enabled.
//!
//! Every macro takes a short context tag first, so lines read
//! `[CustomRoutes] matched rule /admin/*`.

/// Macro to log an error message with context.
#[macro_export]
macro_rules! error_fmt {
    ($context:expr, $($arg:tt)+) => {
        log::error!("[{}] {}", $context, format_args!($($arg)+))
    };
}

/// Macro to log a warning message with context.
#[macro_export]
macro_rules! warn_fmt {
    ($context:expr, $($arg:tt)+) => {
        log::warn!("[{}] {}", $context, format_args!($($arg)+))
    };
}

/// Macro to log an info message with context.
#[macro_export]
macro_rules! info_fmt {
    ($context:expr, $($arg:tt)+) => {
        log::info!("[{}] {}", $context, format_args!($($arg)+))
    };
}

/// Macro to log a debug message with context.
#[macro_export]
macro_rules! debug_fmt {
    ($context:expr, $($arg:tt)+) => {
        log::debug!("[{}] {}", $context, format_args!($($arg)+))
    };
}

/// Macro to log a trace message with context.
#[macro_export]
macro_rules! trace_fmt {
    ($context:expr, $($arg:tt)+) => {
        log::trace!("[{}] {}", $context, format_args!($($arg)+))
    };
}
