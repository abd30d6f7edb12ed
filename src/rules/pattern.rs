// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Route and exclude pattern compilation.
//!
//! Both kinds are compiled once when the rules are built. A pattern that
//! fails to compile is logged and never matches.

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;

use crate::{trace_fmt, warn_fmt};

/// Translate a route pattern into an anchored regular expression.
///
/// `*` matches anything (including `/`), `{a,b}` is an alternation and every
/// other regex metacharacter is literal.
pub fn route_pattern_to_regex(pattern: &str) -> String {
    let mut regex_pattern = "^".to_string();
    let mut in_group = false;

    let chars: Vec<char> = pattern.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '*' => regex_pattern.push_str(".*"),
            '{' if !in_group && chars[i + 1..].contains(&'}') => {
                in_group = true;
                regex_pattern.push_str("(?:");
            }
            '}' if in_group => {
                in_group = false;
                regex_pattern.push(')');
            }
            ',' if in_group => regex_pattern.push('|'),
            '.' | '^' | '$' | '|' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '\\' => {
                regex_pattern.push('\\');
                regex_pattern.push(c);
            }
            _ => regex_pattern.push(c),
        }
    }

    regex_pattern.push('$');
    regex_pattern
}

/// A compiled `routes[].route`.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    source: String,
    regex: Option<Regex>,
}

impl RoutePattern {
    pub fn compile(route: &str) -> Self {
        let regex = if route.is_empty() {
            None
        } else {
            let expr = route_pattern_to_regex(route);
            match Regex::new(&expr) {
                Ok(regex) => {
                    trace_fmt!("RoutePattern", "Compiled '{}' to {}", route, expr);
                    Some(regex)
                }
                Err(e) => {
                    warn_fmt!("RoutePattern", "Route '{}' will never match: {}", route, e);
                    None
                }
            }
        };

        Self {
            source: route.to_string(),
            regex,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Match against a URL path (no query string).
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.as_ref().is_some_and(|r| r.is_match(path))
    }
}

#[derive(Debug, Clone)]
enum ExcludeMatcher {
    Exact(String),
    Glob { base: String, matcher: GlobMatcher },
    Never,
}

/// A compiled `navigationFallback.exclude` entry.
///
/// The first `/*` is widened to `/**/*` so `/images/*.png` also covers
/// nested folders. The static part before the first wildcard is the base a
/// path must start with; the rest is matched as a glob against whatever
/// follows that base.
#[derive(Debug, Clone)]
pub struct ExcludePattern {
    source: String,
    matcher: ExcludeMatcher,
}

impl ExcludePattern {
    pub fn compile(pattern: &str) -> Self {
        let widened = pattern.replacen("/*", "/**/*", 1);

        let matcher = match widened.find(['*', '?', '[', '{']) {
            None => ExcludeMatcher::Exact(pattern.to_string()),
            Some(first_glob) => {
                let split = widened[..first_glob].rfind('/');
                let (base, glob) = match split {
                    Some(idx) => (&widened[..idx], &widened[idx + 1..]),
                    None => ("", widened.as_str()),
                };

                match GlobBuilder::new(glob).literal_separator(true).build() {
                    Ok(glob) => ExcludeMatcher::Glob {
                        base: base.to_string(),
                        matcher: glob.compile_matcher(),
                    },
                    Err(e) => {
                        warn_fmt!("ExcludePattern", "Exclude '{}' will never match: {}", pattern, e);
                        ExcludeMatcher::Never
                    }
                }
            }
        };

        Self {
            source: pattern.to_string(),
            matcher,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, path: &str) -> bool {
        match &self.matcher {
            ExcludeMatcher::Exact(exact) => path == exact,
            ExcludeMatcher::Glob { base, matcher } => {
                let Some(rest) = path.strip_prefix(base.as_str()) else {
                    return false;
                };
                if !rest.is_empty() && !rest.starts_with('/') && !base.is_empty() {
                    return false;
                }
                matcher.is_match(rest.strip_prefix('/').unwrap_or(rest))
            }
            ExcludeMatcher::Never => false,
        }
    }
}
