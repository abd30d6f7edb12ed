// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the configuration module.

use std::fmt;
use std::io;
use thiserror::Error;

/// Errors raised while reading or deserializing emulator settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A value was present but could not be deserialized into the requested type.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Reading a settings file failed.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// A specific provider rejected its input.
    #[error("provider error: {provider}: {message}")]
    ProviderError { provider: String, message: String },
}

impl ConfigError {
    /// Create a new provider error.
    pub fn provider_error<P: fmt::Display, M: fmt::Display>(provider: P, message: M) -> Self {
        Self::ProviderError {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }
}
