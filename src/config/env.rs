// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Environment variable-based configuration provider implementation.

use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::env;

use super::ConfigError;
use super::ConfigProvider;

/// Separator between nesting levels in variable names.
const NESTING_SEPARATOR: &str = "__";

/// Configuration provider that reads `SWA__SECTION__FIELD` style variables.
///
/// `SWA__SERVER__PORT=4280` is exposed as `server.port`. Asking for a parent
/// key such as `server` yields an object assembled from every variable below it.
#[derive(Debug)]
pub struct EnvConfigProvider {
    prefix: String,
    /// Dotted, lowercased key to raw variable value.
    cache: HashMap<String, String>,
}

impl EnvConfigProvider {
    /// Create a provider reading variables that start with `prefix`.
    pub fn new(prefix: &str) -> Self {
        let mut provider = Self {
            prefix: prefix.to_string(),
            cache: HashMap::new(),
        };

        provider.refresh_cache();

        provider
    }

    /// Re-read the process environment.
    pub fn refresh_cache(&mut self) {
        self.cache.clear();

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(&self.prefix) {
                if stripped.is_empty() {
                    continue;
                }
                let config_key = stripped
                    .to_lowercase()
                    .split(NESTING_SEPARATOR)
                    .collect::<Vec<_>>()
                    .join(".");

                self.cache.insert(config_key, value);
            }
        }
    }

    /// Interpret a raw variable as JSON, a boolean, a number, or a plain string.
    fn parse_value_to_json(value: &str) -> Value {
        if let Ok(json_value) = serde_json::from_str(value) {
            return json_value;
        }

        if value.eq_ignore_ascii_case("true") {
            return json!(true);
        } else if value.eq_ignore_ascii_case("false") {
            return json!(false);
        }

        if let Ok(int_val) = value.parse::<i64>() {
            return json!(int_val);
        }

        if let Ok(float_val) = value.parse::<f64>() {
            return json!(float_val);
        }

        json!(value)
    }

    /// Build an object from every cached key nested below `key`.
    fn collect_children(&self, key: &str) -> Option<Value> {
        let prefix = format!("{key}.");
        let mut root = Map::new();

        'keys: for (full_key, raw) in &self.cache {
            let Some(rest) = full_key.strip_prefix(&prefix) else {
                continue;
            };

            let mut parts: Vec<&str> = rest.split('.').collect();
            let Some(leaf) = parts.pop() else {
                continue;
            };

            let mut node = &mut root;
            for part in parts {
                let entry = node
                    .entry(part.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                let Value::Object(map) = entry else {
                    continue 'keys;
                };
                node = map;
            }
            node.insert(leaf.to_string(), Self::parse_value_to_json(raw));
        }

        if root.is_empty() {
            None
        } else {
            Some(Value::Object(root))
        }
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new("SWA__")
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(Self::parse_value_to_json(value)));
        }
        Ok(self.collect_children(key))
    }

    fn has(&self, key: &str) -> bool {
        let prefix = format!("{key}.");
        self.cache.contains_key(key) || self.cache.keys().any(|k| k.starts_with(&prefix))
    }

    fn provider_name(&self) -> &str {
        "env"
    }
}
