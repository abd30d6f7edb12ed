// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::Rule;
use super::document::NavigationFallback;
use super::pattern::ExcludePattern;
use crate::config::EmulatorConfig;
use crate::core::{AUTH_PREFIX, ProxyError, ProxyRequest, ResponseContext};
use crate::trace_fmt;

/// `navigationFallback` with its exclude patterns compiled.
#[derive(Debug, Clone)]
pub struct NavigationFallbackRule {
    rewrite: Option<String>,
    exclude: Vec<ExcludePattern>,
    config: Arc<EmulatorConfig>,
}

impl NavigationFallbackRule {
    pub fn new(fallback: &NavigationFallback, config: Arc<EmulatorConfig>) -> Self {
        let rewrite = fallback
            .rewrite
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(|r| {
                if r.starts_with('/') {
                    r.to_string()
                } else {
                    format!("/{r}")
                }
            });

        Self {
            rewrite,
            exclude: fallback
                .exclude
                .iter()
                .map(|p| ExcludePattern::compile(p))
                .collect(),
            config,
        }
    }

    /// Whether the path matches at least one exclude pattern.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude.iter().any(|pattern| {
            let matched = pattern.is_match(path);
            trace_fmt!(
                "NavigationFallback",
                "exclude '{}' vs {}: {}",
                pattern.source(),
                path,
                matched
            );
            matched
        })
    }

    /// Rewrite the request to the fallback document unless it is excluded.
    ///
    /// Auth and API requests are never touched. Whether the file exists on
    /// disk is looked up and logged but does not change the outcome.
    pub async fn apply(&self, request: &mut ProxyRequest) {
        let path = request.path.clone();
        if path.starts_with(AUTH_PREFIX) || path.starts_with(&self.config.api_path_prefix()) {
            return;
        }

        let Some(rewrite) = &self.rewrite else {
            return;
        };

        let exists = exists_on_disk(&self.config.output_location(), &path).await;
        trace_fmt!(
            "NavigationFallback",
            "{} (exists on disk: {})",
            path,
            exists
        );

        if self.exclude.is_empty() || !self.is_excluded(&path) {
            trace_fmt!("NavigationFallback", "Rewrote {} to {}", path, rewrite);
            request.set_url(rewrite);
        }
    }
}

async fn exists_on_disk(root: &Path, url_path: &str) -> bool {
    let relative = url_path.trim_start_matches('/');
    let file = if url_path.ends_with('/') {
        root.join(relative).join("index.html")
    } else {
        root.join(relative)
    };
    tokio::fs::try_exists(&file).await.unwrap_or(false)
}

#[async_trait]
impl Rule for NavigationFallbackRule {
    fn name(&self) -> &str {
        "navigationFallback"
    }

    async fn evaluate(
        &self,
        request: &mut ProxyRequest,
        _response: &mut ResponseContext,
    ) -> Result<(), ProxyError> {
        self.apply(request).await;
        Ok(())
    }
}
