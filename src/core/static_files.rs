// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static file serving from the output folder, plus the built-in error pages.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use super::{ProxyError, ProxyResponse};
use crate::rules::OrderedMap;
use crate::trace_fmt;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

static MIME_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (".html", "text/html"),
        (".htm", "text/html"),
        (".css", "text/css"),
        (".js", "application/javascript"),
        (".mjs", "application/javascript"),
        (".map", "application/json"),
        (".json", "application/json"),
        (".webmanifest", "application/manifest+json"),
        (".xml", "application/xml"),
        (".txt", "text/plain"),
        (".md", "text/markdown"),
        (".csv", "text/csv"),
        (".png", "image/png"),
        (".jpg", "image/jpeg"),
        (".jpeg", "image/jpeg"),
        (".gif", "image/gif"),
        (".svg", "image/svg+xml"),
        (".ico", "image/x-icon"),
        (".webp", "image/webp"),
        (".avif", "image/avif"),
        (".woff", "font/woff"),
        (".woff2", "font/woff2"),
        (".ttf", "font/ttf"),
        (".otf", "font/otf"),
        (".eot", "application/vnd.ms-fontobject"),
        (".wasm", "application/wasm"),
        (".pdf", "application/pdf"),
        (".zip", "application/zip"),
        (".mp4", "video/mp4"),
        (".webm", "video/webm"),
        (".mp3", "audio/mpeg"),
        (".wav", "audio/wav"),
    ])
});

/// Content type of a file, preferring the user's `mimeTypes` entries.
pub fn content_type_for(path: &Path, overrides: &OrderedMap<String>) -> String {
    let Some(extension) = path.extension().map(|ext| ext.to_string_lossy()) else {
        return DEFAULT_MIME_TYPE.to_string();
    };
    let key = format!(".{extension}");

    if let Some(custom) = overrides.get(&key) {
        return custom.clone();
    }

    MIME_TYPES
        .get(key.to_lowercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

/// The pages served for 401/403 and 404 outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPage {
    NotFound,
    Unauthorized,
}

impl ErrorPage {
    pub fn body(&self) -> &'static str {
        match self {
            ErrorPage::NotFound => include_str!("../../public/404.html"),
            ErrorPage::Unauthorized => include_str!("../../public/unauthorized.html"),
        }
    }

    pub fn response(&self, status: u16) -> ProxyResponse {
        ProxyResponse::with_body(status, "text/html", self.body())
    }
}

/// Serves files below a root directory.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a URL path onto a file below the root.
    ///
    /// Directories resolve to their `index.html`; an extension-less path that
    /// does not exist is retried with `.html`. Returns `None` when nothing
    /// matches or the path tries to escape the root.
    pub async fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        let decoded = urlencoding::decode(url_path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| url_path.to_string());
        let relative = Path::new(decoded.trim_start_matches('/'));

        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            trace_fmt!("StaticFiles", "Refusing path outside the root: {}", url_path);
            return None;
        }

        let candidate = self.root.join(relative);
        if is_dir(&candidate).await {
            let index = candidate.join("index.html");
            return is_file(&index).await.then_some(index);
        }
        if is_file(&candidate).await {
            return Some(candidate);
        }
        if candidate.extension().is_none() && !decoded.ends_with('/') {
            let mut with_html = candidate.into_os_string();
            with_html.push(".html");
            let with_html = PathBuf::from(with_html);
            if is_file(&with_html).await {
                return Some(with_html);
            }
        }
        None
    }

    /// Serve `url_path` with the given status, or `None` when it does not exist.
    pub async fn serve(
        &self,
        url_path: &str,
        status: u16,
        mime_overrides: &OrderedMap<String>,
    ) -> Result<Option<ProxyResponse>, ProxyError> {
        let Some(file) = self.resolve(url_path).await else {
            trace_fmt!("StaticFiles", "No file for {}", url_path);
            return Ok(None);
        };

        let content = match tokio::fs::read(&file).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProxyError::IoError(e)),
        };

        trace_fmt!(
            "StaticFiles",
            "Serving {} ({} bytes)",
            file.display(),
            content.len()
        );
        let content_type = content_type_for(&file, mime_overrides);
        Ok(Some(ProxyResponse::with_body(status, &content_type, content)))
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
