// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use std::sync::Arc;

use super::Rule;
use super::document::RouteRule;
use super::pattern::RoutePattern;
use crate::config::EmulatorConfig;
use crate::core::{AUTH_PREFIX, ProxyError, ProxyRequest, ResponseContext};
use crate::session::principal_from_headers;
use crate::{debug_fmt, trace_fmt};

/// A route rule paired with its compiled pattern.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub rule: RouteRule,
    pub pattern: RoutePattern,
}

impl CompiledRoute {
    pub fn new(rule: RouteRule) -> Self {
        let pattern = RoutePattern::compile(&rule.route);
        Self { rule, pattern }
    }
}

/// The `routes` section: first match wins.
#[derive(Debug, Clone)]
pub struct CustomRoutesRule {
    routes: Vec<CompiledRoute>,
    is_legacy: bool,
    config: Arc<EmulatorConfig>,
}

impl CustomRoutesRule {
    pub fn new(routes: &[RouteRule], is_legacy: bool, config: Arc<EmulatorConfig>) -> Self {
        Self {
            routes: routes.iter().cloned().map(CompiledRoute::new).collect(),
            is_legacy,
            config,
        }
    }

    /// Legacy `routes.json` files use `/*` as an SPA catch-all that must not
    /// swallow API, auth, file or dev-server socket requests.
    fn legacy_catch_all_skips(&self, path: &str) -> bool {
        path.starts_with(&self.config.api_path_prefix())
            || path.starts_with(AUTH_PREFIX)
            || path.contains('.')
            || path.contains("sockjs")
    }

    /// First route whose pattern matches `path`.
    pub fn find_match(&self, path: &str) -> Option<&RouteRule> {
        self.routes
            .iter()
            .find(|compiled| {
                if self.is_legacy
                    && compiled.rule.route == "/*"
                    && self.legacy_catch_all_skips(path)
                {
                    return false;
                }
                compiled.pattern.is_match(path)
            })
            .map(|compiled| &compiled.rule)
    }

    /// Apply the first matching route. Fails only on a malformed session token.
    pub fn apply(
        &self,
        request: &mut ProxyRequest,
        response: &mut ResponseContext,
    ) -> Result<(), ProxyError> {
        let Some(rule) = self.find_match(&request.path) else {
            trace_fmt!("CustomRoutes", "No route matches {}", request.path);
            return Ok(());
        };
        debug_fmt!("CustomRoutes", "{} matched route '{}'", request.path, rule.route);

        if let Some(headers) = &rule.headers {
            for (name, value) in headers.iter() {
                response.set_header(name, value);
            }
        }

        if let Some(methods) = &rule.methods {
            let method = request.method.as_str();
            if !methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
                trace_fmt!("CustomRoutes", "Method {} not in {:?}", method, methods);
                response.status = 405;
            }
        }

        if let Some(allowed_roles) = &rule.allowed_roles {
            let principal = principal_from_headers(&request.headers)?;
            let authorized = principal.is_some_and(|p| p.has_any_role(allowed_roles.as_slice()));
            trace_fmt!(
                "CustomRoutes",
                "Roles {:?} required, authorized: {}",
                allowed_roles,
                authorized
            );
            response.status = if authorized { 200 } else { 403 };
        }

        if let (Some(code), None) = (rule.status_code, &rule.serve) {
            response.status = code;
        }

        if let Some(rewrite) = &rule.rewrite {
            trace_fmt!("CustomRoutes", "Rewrote {} to {}", request.url(), rewrite);
            request.set_url(rewrite);
        }

        if let Some(target) = rule.serve.as_ref().or(rule.redirect.as_ref()) {
            if *target != request.url() {
                let status = rule.status_code.unwrap_or(302);
                debug_fmt!("CustomRoutes", "Redirecting {} to {} ({})", request.url(), target, status);
                response.status = status;
                response.set_header("location", target);
                response.finished = true;
            } else {
                trace_fmt!("CustomRoutes", "Skipping redirect of {} to itself", target);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Rule for CustomRoutesRule {
    fn name(&self) -> &str {
        "customRoutes"
    }

    async fn evaluate(
        &self,
        request: &mut ProxyRequest,
        response: &mut ResponseContext,
    ) -> Result<(), ProxyError> {
        self.apply(request, response)
    }
}
