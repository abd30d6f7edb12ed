// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identity provider emulation.
//!
//! Runs on its own listener; the dispatcher forwards every `/.auth/*`
//! request here. Login is a form where the developer types the identity they
//! want, and the result is stored unsigned in the session cookie.
//!
//! | route                               | response                              |
//! |-------------------------------------|---------------------------------------|
//! | `/.auth/login/{provider}`           | login form                            |
//! | `/.auth/login/{provider}/callback`  | 302 + `Set-Cookie` with the principal |
//! | `/.auth/me`                         | `{ "clientPrincipal": … }`            |
//! | `/.auth/logout`                     | 302 + expired cookie                  |
//! | `/.auth/purge/{provider}`           | 302 + expired cookie                  |


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    HeaderMap, HeaderValue, ORIGIN, SET_COOKIE,
};
use reqwest::Method;
use serde_json::json;

use crate::core::{AUTH_PREFIX, ProxyError, ProxyRequest, ProxyResponse};
use crate::server::RequestHandler;
use crate::session::{ClientPrincipal, SESSION_COOKIE, encode_principal, principal_from_headers};
use crate::{debug_fmt, warn_fmt};

const JSON: &str = "application/json";

/// Stateless handler for the `/.auth` routes.
#[derive(Debug, Clone, Default)]
pub struct AuthService;

impl AuthService {
    pub fn new() -> Self {
        Self
    }

    /// Answer one auth request. Never fails; unknown routes get a JSON 404.
    pub fn respond(&self, request: &ProxyRequest) -> ProxyResponse {
        let mut response = if request.method == Method::OPTIONS {
            ProxyResponse::with_body(204, JSON, "")
        } else {
            self.route(request)
        };

        apply_cors(&mut response.headers, request);
        debug_fmt!(
            "AuthService",
            "{} {} -> {}",
            request.method,
            request.url(),
            response.status
        );
        response
    }

    fn route(&self, request: &ProxyRequest) -> ProxyResponse {
        let Some(route) = request.path.strip_prefix(AUTH_PREFIX) else {
            return not_found(&request.path);
        };
        let segments: Vec<&str> = route.split('/').filter(|s| !s.is_empty()).collect();
        let query = parse_query(request.query.as_deref().unwrap_or(""));

        match segments.as_slice() {
            ["login", provider] => login_form(provider, &query),
            ["login", provider, "callback"] => login_callback(provider, &query),
            ["me"] => me(request),
            ["logout"] | ["purge", _] => logout(&query),
            _ => not_found(&request.path),
        }
    }
}

#[async_trait]
impl RequestHandler for AuthService {
    async fn handle(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        Ok(self.respond(&request))
    }
}

/// Decode `a=1&b=two+words` into pairs, first occurrence first.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(name), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    urlencoding::decode(&raw)
        .map(|v| v.into_owned())
        .unwrap_or(raw)
}

fn query_value<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

/// Split a role list typed by hand, e.g. `admin, editor reader`.
pub fn split_roles(roles: &str) -> Vec<String> {
    roles
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect()
}

fn login_form(provider: &str, query: &[(String, String)]) -> ProxyResponse {
    let redirect = query_value(query, "post_login_redirect_uri").unwrap_or("/");
    let provider = escape_html(provider);
    let body = format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>Sign in with {provider}</title>
  </head>
  <body>
    <h1>Sign in with {provider}</h1>
    <form method="get" action="{AUTH_PREFIX}/login/{provider}/callback">
      <label>User ID <input name="userId" /></label>
      <label>Username <input name="userDetails" /></label>
      <label>Roles <input name="userRoles" placeholder="admin, editor" /></label>
      <input type="hidden" name="post_login_redirect_uri" value="{redirect}" />
      <button type="submit">Login</button>
    </form>
  </body>
</html>
"#,
        redirect = escape_html(redirect),
    );
    ProxyResponse::with_body(200, "text/html", body)
}

fn login_callback(provider: &str, query: &[(String, String)]) -> ProxyResponse {
    let principal = ClientPrincipal {
        identity_provider: provider.to_string(),
        user_id: query_value(query, "userId")
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
        user_details: query_value(query, "userDetails").unwrap_or_default().to_string(),
        user_roles: split_roles(query_value(query, "userRoles").unwrap_or_default()),
    }
    .with_default_roles();

    let redirect = query_value(query, "post_login_redirect_uri").unwrap_or("/");
    let mut response = ProxyResponse::redirect(302, redirect);

    match encode_principal(&principal) {
        Ok(token) => {
            debug_fmt!(
                "AuthService",
                "Signed in '{}' via {} with roles {:?}",
                principal.user_details,
                provider,
                principal.user_roles
            );
            insert_cookie(&mut response.headers, &format!("{SESSION_COOKIE}={token}; Path=/"));
        }
        Err(e) => warn_fmt!("AuthService", "Cannot encode principal: {}", e),
    }
    response
}

fn me(request: &ProxyRequest) -> ProxyResponse {
    let principal = match principal_from_headers(&request.headers) {
        Ok(principal) => principal.map(ClientPrincipal::with_default_roles),
        Err(e) => {
            warn_fmt!("AuthService", "Ignoring malformed session: {}", e);
            None
        }
    };
    let body = json!({ "clientPrincipal": principal });
    ProxyResponse::with_body(200, JSON, body.to_string())
}

fn logout(query: &[(String, String)]) -> ProxyResponse {
    let redirect = query_value(query, "post_logout_redirect_uri").unwrap_or("/");
    let mut response = ProxyResponse::redirect(302, redirect);

    let expires = DateTime::<Utc>::from_timestamp(0, 0)
        .map(|epoch| epoch.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_default();
    insert_cookie(
        &mut response.headers,
        &format!("{SESSION_COOKIE}=deleted; Path=/; Expires={expires}"),
    );
    response
}

fn not_found(path: &str) -> ProxyResponse {
    let body = json!({ "error": "Not Found", "path": path });
    ProxyResponse::with_body(404, JSON, body.to_string())
}

fn insert_cookie(headers: &mut HeaderMap, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(e) => warn_fmt!("AuthService", "Invalid cookie value: {}", e),
    }
}

fn apply_cors(headers: &mut HeaderMap, request: &ProxyRequest) {
    let origin = request
        .headers
        .get(ORIGIN)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
