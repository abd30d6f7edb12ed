// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core primitives – requests, responses & the dispatcher.
//!
//! Everything that physically moves through the emulator is defined in this
//! module. The rules engine mutates a [`ProxyRequest`] / [`ResponseContext`]
//! pair; [`ProxyCore`] then decides which backend answers: the auth
//! mini-server, the API, the app dev server or the static output folder.

#[cfg(test)]
mod tests;
mod static_files;

pub use static_files::{ErrorPage, StaticFiles, content_type_for};

use reqwest::header::{
    AUTHORIZATION, CONTENT_TYPE, HOST, HeaderMap, HeaderName, HeaderValue, LOCATION,
};
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;

use crate::config::EmulatorConfig;
use crate::rules::{
    CONFIG_FILE, LEGACY_CONFIG_FILE, ResponseOverridesRule, Rule, RulesDocument, RulesPipeline,
};
use crate::session::{SessionError, encode_principal, principal_from_headers};
use crate::{debug_fmt, trace_fmt, warn_fmt};

/// Prefix of every auth route.
pub const AUTH_PREFIX: &str = "/.auth";

/// Scheme marking a URL rewritten by a response override.
pub const CUSTOM_URL_SCHEME: &str = "swa://";

/// Correlation header sent to the API backend.
pub const REQUEST_ID_HEADER: &str = "x-ms-request-id";

/// Principal header sent to the API backend.
pub const CLIENT_PRINCIPAL_HEADER: &str = "x-ms-client-principal";

/// Errors that can occur while handling a request.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Upstream could not be reached or answered garbage
    #[error("HTTP client error: {0}")]
    ClientError(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Upstream did not answer in time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed session token
    #[error("session error: {0}")]
    SessionError(#[from] SessionError),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<crate::config::error::ConfigError> for ProxyError {
    fn from(err: crate::config::error::ConfigError) -> Self {
        ProxyError::ConfigError(err.to_string())
    }
}

/// Per-request data that is not part of the HTTP message.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id, forwarded to the API backend
    pub request_id: String,
    /// The original client's IP address
    pub client_ip: Option<String>,
    /// The start time of the request
    pub start_time: Instant,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            request_id: crate::logging::structured::generate_request_id(),
            client_ip: None,
            start_time: Instant::now(),
        }
    }
}

/// An inbound request as seen by the rules engine and the dispatcher.
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: reqwest::Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: reqwest::Body,
    pub context: RequestContext,
}

impl ProxyRequest {
    /// Build a body-less request from a raw URL (path plus optional query).
    pub fn new(method: reqwest::Method, url: &str) -> Self {
        let mut request = Self {
            method,
            path: String::new(),
            query: None,
            headers: HeaderMap::new(),
            body: reqwest::Body::from(""),
            context: RequestContext::default(),
        };
        request.set_url(url);
        request
    }

    /// Path plus query string, the way the client sent it.
    pub fn url(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Replace path and query from a raw URL.
    pub fn set_url(&mut self, url: &str) {
        match url.split_once('?') {
            Some((path, query)) => {
                self.path = path.to_string();
                self.query = Some(query.to_string());
            }
            None => {
                self.path = url.to_string();
                self.query = None;
            }
        }
    }
}

/// Response state accumulated by the rules engine before any backend answers.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    /// Status code decided so far
    pub status: u16,
    /// Headers to set on the final response
    pub headers: HeaderMap,
    /// Headers to strip from the final response
    pub removed: Vec<HeaderName>,
    /// A rule already produced the whole response (redirect)
    pub finished: bool,
}

impl Default for ResponseContext {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            removed: Vec::new(),
            finished: false,
        }
    }
}

impl ResponseContext {
    /// Set (overwrite) a header. Invalid names or values are skipped.
    pub fn set_header(&mut self, name: &str, value: &str) -> bool {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            warn_fmt!("Rules", "Ignoring invalid header '{}: {}'", name, value);
            return false;
        };
        self.removed.retain(|removed| *removed != name);
        self.headers.insert(name, value);
        true
    }

    /// Remove a header, including any value a backend would set later.
    pub fn remove_header(&mut self, name: &str) -> bool {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn_fmt!("Rules", "Ignoring invalid header name '{}'", name);
            return false;
        };
        self.headers.remove(&name);
        if !self.removed.contains(&name) {
            self.removed.push(name);
        }
        true
    }

    /// The `Location` header, if any rule set one.
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// Whether the accumulated state describes a redirect.
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.location().is_some()
    }

    /// Copy the accumulated headers onto a backend response.
    pub fn apply_to(&self, headers: &mut HeaderMap) {
        for name in &self.removed {
            headers.remove(name);
        }
        for name in self.headers.keys() {
            headers.remove(name);
            for value in self.headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }
}

/// A response on its way back to the client.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: reqwest::Body,
}

impl ProxyResponse {
    /// A response with the given body and content type.
    pub fn with_body(status: u16, content_type: &str, body: impl Into<reqwest::Body>) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// A plain text response.
    pub fn text(status: u16, message: impl Into<String>) -> Self {
        Self::with_body(status, "text/plain; charset=utf-8", message.into())
    }

    /// An empty redirect response.
    pub fn redirect(status: u16, location: &str) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(location) {
            headers.insert(LOCATION, value);
        }
        Self {
            status,
            headers,
            body: reqwest::Body::from(""),
        }
    }
}

/// The dispatcher: runs the rules and hands the request to a backend.
#[derive(Debug)]
pub struct ProxyCore {
    config: Arc<EmulatorConfig>,
    auth_uri: String,
    client: reqwest::Client,
    document: Arc<RulesDocument>,
    pipeline: RulesPipeline,
    overrides: ResponseOverridesRule,
    static_files: StaticFiles,
}

impl ProxyCore {
    /// Create a dispatcher for an already loaded rules document.
    pub fn new(
        config: Arc<EmulatorConfig>,
        auth_uri: impl Into<String>,
        document: Arc<RulesDocument>,
    ) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ProxyError::ClientError)?;

        let pipeline = RulesPipeline::new(&document, config.clone());
        let overrides = ResponseOverridesRule::new(
            document.response_overrides.clone(),
            config.clone(),
        );
        let static_files = StaticFiles::new(config.output_location());

        Ok(Self {
            config,
            auth_uri: auth_uri.into(),
            client,
            document,
            pipeline,
            overrides,
            static_files,
        })
    }

    /// The rules document this dispatcher enforces.
    pub fn document(&self) -> &RulesDocument {
        &self.document
    }

    /// Run the rules against a request and produce the response.
    ///
    /// A malformed session token yields the unauthorized page; upstream
    /// failures are returned as errors for the server to map.
    pub async fn process_request(
        &self,
        mut request: ProxyRequest,
    ) -> Result<ProxyResponse, ProxyError> {
        let overall_start = Instant::now();
        let method = request.method.clone();
        let url = request.url();
        let mut response = ResponseContext::default();

        let result = match self.dispatch(&mut request, &mut response).await {
            Err(ProxyError::SessionError(e)) => {
                warn_fmt!("Dispatcher", "Rejecting {} {}: {}", method, url, e);
                let mut response = ResponseContext {
                    status: 401,
                    ..ResponseContext::default()
                };
                self.error_page(&mut request, &mut response).await
            }
            other => other,
        };

        if let Ok(resp) = &result {
            debug_fmt!(
                "Dispatcher",
                "{} {} -> {} | total={:?}",
                method,
                url,
                resp.status,
                overall_start.elapsed()
            );
        }
        result
    }

    async fn dispatch(
        &self,
        request: &mut ProxyRequest,
        response: &mut ResponseContext,
    ) -> Result<ProxyResponse, ProxyError> {
        self.pipeline.evaluate(request, response).await?;

        if response.finished {
            let location = response.location().unwrap_or("/").to_string();
            let mut resp = ProxyResponse::redirect(response.status, &location);
            response.apply_to(&mut resp.headers);
            return Ok(resp);
        }

        if matches!(response.status, 401 | 403 | 404) {
            return self.error_page(request, response).await;
        }

        if response.is_redirect() {
            let location = response.location().unwrap_or("/").to_string();
            let mut resp = ProxyResponse::redirect(response.status, &location);
            response.apply_to(&mut resp.headers);
            return Ok(resp);
        }

        let mut resp = if request.path.starts_with(AUTH_PREFIX) {
            trace_fmt!("Dispatcher", "Forwarding {} to the auth server", request.path);
            self.forward(request, &self.auth_uri).await?
        } else if request.path.starts_with(&self.config.api_path_prefix()) {
            self.forward_api(request).await?
        } else if is_rules_document_url(&request.path) {
            response.status = 404;
            return self.error_page(request, response).await;
        } else {
            match self.serve_app(request, response).await? {
                Some(resp) => resp,
                None => {
                    response.status = 404;
                    return self.error_page(request, response).await;
                }
            }
        };

        response.apply_to(&mut resp.headers);
        Ok(resp)
    }

    /// Serve the unauthorized or not-found page for the current status,
    /// honouring a response override for that status first.
    async fn error_page(
        &self,
        request: &mut ProxyRequest,
        response: &mut ResponseContext,
    ) -> Result<ProxyResponse, ProxyError> {
        let page = if response.status == 404 {
            ErrorPage::NotFound
        } else {
            ErrorPage::Unauthorized
        };

        self.overrides.evaluate(request, response).await?;

        if response.is_redirect() {
            let location = response.location().unwrap_or("/").to_string();
            let mut resp = ProxyResponse::redirect(response.status, &location);
            response.apply_to(&mut resp.headers);
            return Ok(resp);
        }

        if let Some(custom) = request.path.strip_prefix(CUSTOM_URL_SCHEME) {
            let custom = format!("/{custom}");
            if let Some(mut resp) = self
                .static_files
                .serve(&custom, response.status, &self.document.mime_types)
                .await?
            {
                response.apply_to(&mut resp.headers);
                return Ok(resp);
            }
            warn_fmt!("Dispatcher", "Override page '{}' not found", custom);
        }

        let mut resp = page.response(response.status);
        response.apply_to(&mut resp.headers);
        resp.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        Ok(resp)
    }

    async fn forward_api(&self, request: &mut ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let Some(api_uri) = self.config.api_uri.clone() else {
            warn_fmt!("Dispatcher", "No API backend configured for {}", request.path);
            return Ok(ProxyResponse::text(502, "Bad Gateway"));
        };

        if let Some(principal) = principal_from_headers(&request.headers)? {
            let encoded = encode_principal(&principal)?;
            if let (Ok(principal_value), Ok(bearer)) = (
                HeaderValue::from_str(&encoded),
                HeaderValue::from_str(&format!("Bearer {encoded}")),
            ) {
                request
                    .headers
                    .insert(HeaderName::from_static(CLIENT_PRINCIPAL_HEADER), principal_value);
                request.headers.insert(AUTHORIZATION, bearer);
            }
        }

        if let Ok(request_id) = HeaderValue::from_str(&request.context.request_id) {
            request
                .headers
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), request_id);
        }
        if let Some(host) = request.headers.get(HOST).cloned() {
            request
                .headers
                .insert(HeaderName::from_static("x-forwarded-host"), host);
        }
        request.headers.insert(
            HeaderName::from_static("x-forwarded-proto"),
            HeaderValue::from_static("http"),
        );

        self.forward(request, &api_uri).await
    }

    async fn serve_app(
        &self,
        request: &mut ProxyRequest,
        response: &ResponseContext,
    ) -> Result<Option<ProxyResponse>, ProxyError> {
        if let Some(custom) = request.path.strip_prefix(CUSTOM_URL_SCHEME) {
            let custom = format!("/{custom}");
            return self
                .static_files
                .serve(&custom, response.status, &self.document.mime_types)
                .await;
        }

        if let Some(app_uri) = &self.config.app_uri {
            let mut resp = self.forward(request, app_uri).await?;
            if response.status != 200 {
                resp.status = response.status;
            }
            return Ok(Some(resp));
        }

        self.static_files
            .serve(&request.path, response.status, &self.document.mime_types)
            .await
    }

    /// Stream the request to `base_url` and stream the answer back.
    async fn forward(
        &self,
        request: &mut ProxyRequest,
        base_url: &str,
    ) -> Result<ProxyResponse, ProxyError> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), request.url());
        let outbound_body = mem::replace(&mut request.body, reqwest::Body::from(""));

        let mut headers = request.headers.clone();
        headers.remove(HOST);

        let builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers)
            .body(outbound_body);

        let timeout_dur = self.config.timeout();
        let upstream_start = Instant::now();
        let resp = timeout(timeout_dur, builder.send())
            .await
            .map_err(|_| ProxyError::Timeout(timeout_dur))?
            .map_err(ProxyError::ClientError)?;

        trace_fmt!(
            "Dispatcher",
            "{} {} -> {} upstream={:?}",
            request.method,
            url,
            resp.status(),
            upstream_start.elapsed()
        );

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = reqwest::Body::wrap_stream(resp.bytes_stream());

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

/// The rules document itself is never served.
fn is_rules_document_url(path: &str) -> bool {
    path.ends_with(&format!("/{CONFIG_FILE}")) || path.ends_with(&format!("/{LEGACY_CONFIG_FILE}"))
}
