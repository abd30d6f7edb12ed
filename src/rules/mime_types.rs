// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;

use super::{OrderedMap, Rule};
use crate::core::{ProxyError, ProxyRequest, ResponseContext};
use crate::trace_fmt;

/// Set `Content-Type` from `mimeTypes`, keyed by the text after the last `.`
/// of the path.
pub fn apply_mime_types(
    request: &ProxyRequest,
    response: &mut ResponseContext,
    mime_types: &OrderedMap<String>,
) {
    let Some((_, extension)) = request.path.rsplit_once('.') else {
        return;
    };

    if let Some(content_type) = mime_types.get(&format!(".{extension}")) {
        trace_fmt!(
            "MimeTypes",
            "{} served as '{}'",
            request.path,
            content_type
        );
        response.set_header("content-type", content_type);
    }
}

/// Rule form of [`apply_mime_types`].
#[derive(Debug, Clone)]
pub struct MimeTypesRule {
    mime_types: OrderedMap<String>,
}

impl MimeTypesRule {
    pub fn new(mime_types: OrderedMap<String>) -> Self {
        Self { mime_types }
    }
}

#[async_trait]
impl Rule for MimeTypesRule {
    fn name(&self) -> &str {
        "mimeTypes"
    }

    async fn evaluate(
        &self,
        request: &mut ProxyRequest,
        response: &mut ResponseContext,
    ) -> Result<(), ProxyError> {
        apply_mime_types(request, response, &self.mime_types);
        Ok(())
    }
}
