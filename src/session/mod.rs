// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session token codec
//!
//! The emulated identity provider issues a cookie named
//! [`SESSION_COOKIE`] whose value is a base64-encoded JSON
//! [`ClientPrincipal`]. Nothing about it is signed; it is a local
//! development convenience, not a security boundary.

#[cfg(test)]
mod tests;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::{DecodePaddingMode, general_purpose};
use base64::Engine as _;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trace_fmt;

/// Cookie carrying the encoded principal.
pub const SESSION_COOKIE: &str = "StaticWebAppsAuthCookie";

/// Roles every signed-in principal carries.
pub const DEFAULT_ROLES: [&str; 2] = ["anonymous", "authenticated"];

/// Lenient decoder: the cookie may arrive with or without padding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Errors raised while reading a session token.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The `Cookie` header is not UTF-8.
    #[error("session header is not a valid string")]
    InvalidHeader,

    /// The cookie value is not base64.
    #[error("session token is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The decoded bytes are not a JSON principal.
    #[error("session token is not a valid principal: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Decoded identity of the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPrincipal {
    #[serde(default)]
    pub identity_provider: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_details: String,
    #[serde(default)]
    pub user_roles: Vec<String>,
}

impl ClientPrincipal {
    /// Whether the principal holds any of `roles`.
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles
            .iter()
            .any(|role| self.user_roles.iter().any(|r| r == role.as_ref()))
    }

    /// Append the default roles that are missing.
    pub fn with_default_roles(mut self) -> Self {
        for role in DEFAULT_ROLES {
            if !self.user_roles.iter().any(|r| r == role) {
                self.user_roles.push(role.to_string());
            }
        }
        self
    }
}

/// Split a `Cookie` header into name/value pairs.
///
/// The first occurrence of a name wins, surrounding quotes are dropped and
/// percent-encoded values are decoded when possible.
pub fn parse_cookies(header: &str) -> Vec<(String, String)> {
    let mut cookies: Vec<(String, String)> = Vec::new();

    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || cookies.iter().any(|(n, _)| n == name) {
            continue;
        }

        let mut value = value.trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }
        let value = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());

        cookies.push((name.to_string(), value));
    }

    cookies
}

fn session_value(header: &str) -> Option<String> {
    parse_cookies(header)
        .into_iter()
        .find(|(name, _)| name == SESSION_COOKIE)
        .map(|(_, value)| value)
}

/// True when the header carries a non-empty session cookie.
pub fn is_valid_session(header: &str) -> bool {
    session_value(header).is_some_and(|value| !value.is_empty())
}

/// Read a raw header value as text. Only bytes that are not UTF-8 are rejected.
fn header_text(header: &HeaderValue) -> Result<&str, SessionError> {
    std::str::from_utf8(header.as_bytes()).map_err(|_| SessionError::InvalidHeader)
}

/// [`is_valid_session`] on a raw header value; non-UTF-8 headers are rejected.
pub fn is_valid_session_header(header: &HeaderValue) -> Result<bool, SessionError> {
    Ok(is_valid_session(header_text(header)?))
}

/// All `Cookie` fields of a request joined into one list.
///
/// HTTP/2 clients may split cookies over several fields.
pub fn cookie_header(headers: &HeaderMap) -> Result<Option<String>, SessionError> {
    let mut joined: Option<String> = None;
    for value in headers.get_all(COOKIE) {
        let text = header_text(value)?;
        joined = Some(match joined {
            Some(list) => format!("{list}; {text}"),
            None => text.to_string(),
        });
    }
    Ok(joined)
}

/// Decode the principal from a `Cookie` header.
///
/// Returns `Ok(None)` when no session cookie is present and an error when the
/// cookie is present but does not hold a base64 JSON principal.
pub fn decode_session(header: &str) -> Result<Option<ClientPrincipal>, SessionError> {
    let Some(value) = session_value(header) else {
        trace_fmt!("Session", "No '{}' cookie found", SESSION_COOKIE);
        return Ok(None);
    };

    let bytes = LENIENT.decode(value.trim())?;
    trace_fmt!(
        "Session",
        "Decoded '{}': {}",
        SESSION_COOKIE,
        String::from_utf8_lossy(&bytes)
    );
    let principal = serde_json::from_slice::<ClientPrincipal>(&bytes)?;
    Ok(Some(principal))
}

/// Decode the principal carried by the request headers, if any.
pub fn principal_from_headers(
    headers: &HeaderMap,
) -> Result<Option<ClientPrincipal>, SessionError> {
    let Some(cookie) = cookie_header(headers)? else {
        return Ok(None);
    };
    if !is_valid_session(&cookie) {
        return Ok(None);
    }
    decode_session(&cookie)
}

/// Encode a principal the way the identity provider does.
pub fn encode_principal(principal: &ClientPrincipal) -> Result<String, SessionError> {
    let json = serde_json::to_vec(principal)?;
    Ok(general_purpose::STANDARD.encode(json))
}
