// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Routing rules engine.
//!
//! A [`RulesDocument`] is discovered and parsed once at startup, then turned
//! into a [`RulesPipeline`]: five [`Rule`]s evaluated in a fixed order
//! against every request.
//!
//! | order | rule                  | effect                                         |
//! |-------|-----------------------|------------------------------------------------|
//! | 1     | `globalHeaders`       | set / remove response headers                  |
//! | 2     | `mimeTypes`           | `Content-Type` by file extension               |
//! | 3     | `responseOverrides`   | react to 400/401/403/404                       |
//! | 4     | `navigationFallback`  | SPA rewrite to the entry document              |
//! | 5     | `customRoutes`        | headers, methods, roles, status, rewrite, redirect |
//!
//! # Custom rules
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use swa_emu::{ProxyError, ProxyRequest, ResponseContext, Rule};
//!
//! #[derive(Debug)]
//! struct NoCache;
//!
//! #[async_trait]
//! impl Rule for NoCache {
//!     fn name(&self) -> &str {
//!         "noCache"
//!     }
//!
//!     async fn evaluate(
//!         &self,
//!         _request: &mut ProxyRequest,
//!         response: &mut ResponseContext,
//!     ) -> Result<(), ProxyError> {
//!         response.set_header("cache-control", "no-store");
//!         Ok(())
//!     }
//! }
//! ```

mod custom_routes;
pub mod document;
mod global_headers;
mod loader;
mod mime_types;
mod navigation_fallback;
pub mod pattern;
mod response_overrides;


pub use custom_routes::{CompiledRoute, CustomRoutesRule};
pub use document::{NavigationFallback, OrderedMap, ResponseOverride, RouteRule, RulesDocument};
pub use global_headers::{GlobalHeadersRule, apply_global_headers};
pub use loader::{
    CONFIG_FILE, LEGACY_CONFIG_FILE, RulesError, RulesFile, find_rules_file, load_rules,
    parse_rules,
};
pub use mime_types::{MimeTypesRule, apply_mime_types};
pub use navigation_fallback::NavigationFallbackRule;
pub use response_overrides::{
    OVERRIDABLE_STATUS_CODES, ResponseOverridesRule, apply_response_overrides,
};

use std::fmt;
use std::sync::Arc;

use crate::config::EmulatorConfig;
use crate::core::{ProxyError, ProxyRequest, ResponseContext};
use crate::trace_fmt;

/// One stage of the rules pipeline.
#[async_trait::async_trait]
pub trait Rule: fmt::Debug + Send + Sync {
    /// Name of the document section this rule enforces.
    fn name(&self) -> &str;

    /// Inspect and mutate the request / response pair.
    async fn evaluate(
        &self,
        request: &mut ProxyRequest,
        response: &mut ResponseContext,
    ) -> Result<(), ProxyError>;
}

/// The five rules in evaluation order.
#[derive(Debug, Clone)]
pub struct RulesPipeline {
    rules: Vec<Arc<dyn Rule>>,
}

impl RulesPipeline {
    /// Build the fixed pipeline for a document.
    pub fn new(document: &RulesDocument, config: Arc<EmulatorConfig>) -> Self {
        let fallback = document.navigation_fallback.clone().unwrap_or_default();

        let rules: Vec<Arc<dyn Rule>> = vec![
            Arc::new(GlobalHeadersRule::new(document.global_headers.clone())),
            Arc::new(MimeTypesRule::new(document.mime_types.clone())),
            Arc::new(ResponseOverridesRule::new(
                document.response_overrides.clone(),
                config.clone(),
            )),
            Arc::new(NavigationFallbackRule::new(&fallback, config.clone())),
            Arc::new(CustomRoutesRule::new(
                &document.routes,
                document.is_legacy_config_file,
                config,
            )),
        ];

        Self { rules }
    }

    /// A pipeline made of arbitrary rules, evaluated in the given order.
    pub fn from_rules(rules: Vec<Arc<dyn Rule>>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    /// Run every rule; stops early once a rule finished the response.
    pub async fn evaluate(
        &self,
        request: &mut ProxyRequest,
        response: &mut ResponseContext,
    ) -> Result<(), ProxyError> {
        for rule in &self.rules {
            rule.evaluate(request, response).await?;
            trace_fmt!(
                "RulesPipeline",
                "after {}: url={} status={}",
                rule.name(),
                request.url(),
                response.status
            );
            if response.finished {
                break;
            }
        }
        Ok(())
    }
}
