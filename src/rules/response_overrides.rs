// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use std::sync::Arc;

use super::{OrderedMap, ResponseOverride, Rule};
use crate::config::EmulatorConfig;
use crate::core::{AUTH_PREFIX, CUSTOM_URL_SCHEME, ProxyError, ProxyRequest, ResponseContext};
use crate::trace_fmt;

/// Status codes a response override may react to.
pub const OVERRIDABLE_STATUS_CODES: [u16; 4] = [400, 401, 403, 404];

/// Apply the `responseOverrides` entry for the current status, if any.
///
/// Only 400, 401, 403 and 404 are ever overridden. A `rewrite` turns the URL
/// into an internal `swa://` lookup of a user page; rewrites pointing at the
/// auth or API routes are ignored.
pub fn apply_response_overrides(
    request: &mut ProxyRequest,
    response: &mut ResponseContext,
    overrides: &OrderedMap<ResponseOverride>,
    config: &EmulatorConfig,
) {
    let status = response.status;
    if !OVERRIDABLE_STATUS_CODES.contains(&status) {
        return;
    }

    let Some(rule) = overrides.get(&status.to_string()) else {
        trace_fmt!("ResponseOverrides", "No override for {}", status);
        return;
    };

    if let Some(code) = rule.status_code {
        trace_fmt!("ResponseOverrides", "Status {} -> {}", status, code);
        response.status = code;
    }

    if let Some(redirect) = &rule.redirect {
        trace_fmt!("ResponseOverrides", "Location: {}", redirect);
        response.set_header("location", redirect);
    }

    if let Some(rewrite) = &rule.rewrite {
        if *rewrite == request.url() {
            return;
        }
        if rewrite.starts_with(AUTH_PREFIX) || rewrite.starts_with(&config.api_path_prefix()) {
            trace_fmt!("ResponseOverrides", "Ignoring rewrite to {}", rewrite);
            return;
        }

        let target = rewrite.strip_prefix('/').unwrap_or(rewrite);
        request.set_url(&format!("{CUSTOM_URL_SCHEME}{target}"));
        trace_fmt!("ResponseOverrides", "Rewrote to {}", request.url());
    }
}

/// Rule form of [`apply_response_overrides`].
#[derive(Debug, Clone)]
pub struct ResponseOverridesRule {
    overrides: OrderedMap<ResponseOverride>,
    config: Arc<EmulatorConfig>,
}

impl ResponseOverridesRule {
    pub fn new(overrides: OrderedMap<ResponseOverride>, config: Arc<EmulatorConfig>) -> Self {
        Self { overrides, config }
    }
}

#[async_trait]
impl Rule for ResponseOverridesRule {
    fn name(&self) -> &str {
        "responseOverrides"
    }

    async fn evaluate(
        &self,
        request: &mut ProxyRequest,
        response: &mut ResponseContext,
    ) -> Result<(), ProxyError> {
        apply_response_overrides(request, response, &self.overrides, &self.config);
        Ok(())
    }
}
