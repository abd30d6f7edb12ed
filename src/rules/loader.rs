// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Discovery and parsing of the rules document.

use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::RulesDocument;
use super::response_overrides::OVERRIDABLE_STATUS_CODES;
use crate::{debug_fmt, info_fmt, warn_fmt};

/// Current rules file name.
pub const CONFIG_FILE: &str = "staticwebapp.config.json";

/// Deprecated rules file name.
pub const LEGACY_CONFIG_FILE: &str = "routes.json";

/// Larger documents still load but are rejected by the hosted platform.
const MAX_DOCUMENT_SIZE_KB: u64 = 20;

/// Folders never searched for a rules document.
const SKIPPED_DIRS: [&str; 2] = ["node_modules", ".git"];

/// Errors raised while reading a rules document.
#[derive(Error, Debug)]
pub enum RulesError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Valid JSON without any rules section, e.g. a framework's own `routes.json`
    #[error("no routing sections found")]
    NotRulesDocument,
}

/// A discovered rules document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesFile {
    pub path: PathBuf,
    pub is_legacy: bool,
}

/// Parse a rules document from its JSON text.
pub fn parse_rules(content: &str, is_legacy: bool) -> Result<RulesDocument, RulesError> {
    let value: Value = serde_json::from_str(content)?;
    if !RulesDocument::is_rules_document(&value) {
        return Err(RulesError::NotRulesDocument);
    }

    let mut document: RulesDocument = serde_json::from_value(value)?;
    document.is_legacy_config_file = is_legacy;

    for key in document.response_overrides.keys() {
        let applicable = key
            .parse::<u16>()
            .is_ok_and(|code| OVERRIDABLE_STATUS_CODES.contains(&code));
        if !applicable {
            warn_fmt!(
                "RulesLoader",
                "responseOverrides '{}' will never apply (only {:?} can be overridden)",
                key,
                OVERRIDABLE_STATUS_CODES
            );
        }
    }

    Ok(document)
}

async fn is_valid_candidate(path: &Path) -> bool {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return false;
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(value) if RulesDocument::is_rules_document(&value) => true,
        _ => {
            debug_fmt!("RulesLoader", "Ignoring {}: not a rules document", path.display());
            false
        }
    }
}

/// Search `root` breadth first for a rules document.
///
/// `staticwebapp.config.json` wins over `routes.json` wherever they are;
/// between files of the same name the shallowest wins.
pub async fn find_rules_file(root: &Path) -> Option<RulesFile> {
    let mut queue = VecDeque::from([root.to_path_buf()]);
    let mut legacy: Option<PathBuf> = None;

    while let Some(dir) = queue.pop_front() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if file_type.is_dir() {
                if !SKIPPED_DIRS.contains(&name.as_str()) {
                    dirs.push(entry.path());
                }
            } else if name == CONFIG_FILE || name == LEGACY_CONFIG_FILE {
                files.push((name, entry.path()));
            }
        }
        files.sort();
        dirs.sort();

        for (name, path) in files {
            if !is_valid_candidate(&path).await {
                continue;
            }
            if name == CONFIG_FILE {
                return Some(RulesFile {
                    path,
                    is_legacy: false,
                });
            }
            legacy.get_or_insert(path);
        }
        queue.extend(dirs);
    }

    legacy.map(|path| RulesFile {
        path,
        is_legacy: true,
    })
}

/// Discover and parse the rules document below `app_location`.
///
/// Every failure degrades to the empty document.
pub async fn load_rules(app_location: &Path) -> RulesDocument {
    if !tokio::fs::try_exists(app_location).await.unwrap_or(false) {
        warn_fmt!(
            "RulesLoader",
            "App location {} does not exist; no routing rules applied",
            app_location.display()
        );
        return RulesDocument::default();
    }

    let Some(file) = find_rules_file(app_location).await else {
        info_fmt!(
            "RulesLoader",
            "No {} found below {}",
            CONFIG_FILE,
            app_location.display()
        );
        return RulesDocument::default();
    };

    info_fmt!("RulesLoader", "Found configuration file {}", file.path.display());
    if file.is_legacy {
        warn_fmt!(
            "RulesLoader",
            "Functionality defined in {} is deprecated, use {} instead",
            LEGACY_CONFIG_FILE,
            CONFIG_FILE
        );
    }

    let content = match tokio::fs::read_to_string(&file.path).await {
        Ok(content) => content,
        Err(e) => {
            warn_fmt!("RulesLoader", "Cannot read {}: {}", file.path.display(), e);
            return RulesDocument::default();
        }
    };

    let size_kb = content.len() as u64 / 1024;
    if size_kb > MAX_DOCUMENT_SIZE_KB {
        warn_fmt!(
            "RulesLoader",
            "{} is {} KB; the hosted limit is {} KB",
            file.path.display(),
            size_kb,
            MAX_DOCUMENT_SIZE_KB
        );
    }

    match parse_rules(&content, file.is_legacy) {
        Ok(document) => {
            debug_fmt!(
                "RulesLoader",
                "Loaded {} route(s), {} global header(s), {} override(s)",
                document.routes.len(),
                document.global_headers.len(),
                document.response_overrides.len()
            );
            document
        }
        Err(e) => {
            warn_fmt!(
                "RulesLoader",
                "Invalid {}: {}; continuing without routing rules",
                file.path.display(),
                e
            );
            RulesDocument::default()
        }
    }
}
