// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed form of `staticwebapp.config.json` (and the legacy `routes.json`).

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

use crate::warn_fmt;

/// A JSON object whose entries keep document order.
///
/// Duplicate keys keep the position of their first occurrence and the value
/// of their last one.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = OrderedMap::new();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            map.insert(key, value);
        }
        Ok(map)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(OrderedMap::new())
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(OrderedMapVisitor(PhantomData))
    }
}

/// Accepts `418`, `"418"` or nothing. Anything else is dropped with a warning.
fn status_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u16>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    let code = match &value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
        Some(_) => None,
    };

    match code {
        Some(code) if (100..=999).contains(&code) => Ok(Some(code)),
        _ => {
            warn_fmt!(
                "RulesDocument",
                "Ignoring invalid statusCode {}",
                value.unwrap_or(Value::Null)
            );
            Ok(None)
        }
    }
}

/// One entry of `routes`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    /// Path pattern, `*` wildcards and `{a,b}` alternation allowed
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub headers: Option<OrderedMap<String>>,
    #[serde(default)]
    pub methods: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_roles: Option<Vec<String>>,
    #[serde(default, deserialize_with = "status_code")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub serve: Option<String>,
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default)]
    pub rewrite: Option<String>,
}

/// The `navigationFallback` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NavigationFallback {
    #[serde(default)]
    pub rewrite: Option<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// One value of `responseOverrides`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseOverride {
    #[serde(default, deserialize_with = "status_code")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default)]
    pub rewrite: Option<String>,
}

/// The user's routing rules. Loaded once, then shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesDocument {
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    #[serde(default)]
    pub global_headers: OrderedMap<String>,
    #[serde(default)]
    pub mime_types: OrderedMap<String>,
    #[serde(default)]
    pub navigation_fallback: Option<NavigationFallback>,
    #[serde(default)]
    pub response_overrides: OrderedMap<ResponseOverride>,
    /// Read from `routes.json` rather than `staticwebapp.config.json`
    #[serde(skip)]
    pub is_legacy_config_file: bool,
}

impl RulesDocument {
    /// Sections a file must contain at least one of to count as a rules document.
    pub const KNOWN_KEYS: [&'static str; 5] = [
        "routes",
        "globalHeaders",
        "mimeTypes",
        "navigationFallback",
        "responseOverrides",
    ];

    /// Whether a parsed JSON value looks like a rules document.
    pub fn is_rules_document(value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|obj| Self::KNOWN_KEYS.iter().any(|key| obj.contains_key(*key)))
    }
}
