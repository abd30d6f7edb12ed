// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;

use super::{OrderedMap, Rule};
use crate::core::{ProxyError, ProxyRequest, ResponseContext};
use crate::trace_fmt;

/// Apply `globalHeaders`: an empty value removes the header, anything else sets it.
pub fn apply_global_headers(response: &mut ResponseContext, headers: &OrderedMap<String>) {
    for (name, value) in headers.iter() {
        if value.is_empty() {
            trace_fmt!("GlobalHeaders", "Removing header '{}'", name);
            response.remove_header(name);
        } else {
            trace_fmt!("GlobalHeaders", "Setting header '{}: {}'", name, value);
            response.set_header(name, value);
        }
    }
}

/// Rule form of [`apply_global_headers`].
#[derive(Debug, Clone)]
pub struct GlobalHeadersRule {
    headers: OrderedMap<String>,
}

impl GlobalHeadersRule {
    pub fn new(headers: OrderedMap<String>) -> Self {
        Self { headers }
    }
}

#[async_trait]
impl Rule for GlobalHeadersRule {
    fn name(&self) -> &str {
        "globalHeaders"
    }

    async fn evaluate(
        &self,
        _request: &mut ProxyRequest,
        response: &mut ResponseContext,
    ) -> Result<(), ProxyError> {
        apply_global_headers(response, &self.headers);
        Ok(())
    }
}
