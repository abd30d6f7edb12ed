// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common test utilities and helpers for the emulator integration tests.

use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use swa_emu::config::{Config, ConfigError, ConfigProvider};
use swa_emu::session::{ClientPrincipal, SESSION_COOKIE, encode_principal};
use swa_emu::{Emulator, RulesDocument};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Test configuration provider backed by a JSON object, with dotted key lookup.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct TestConfigProvider {
    values: Value,
    name: String,
}

#[allow(dead_code)]
impl TestConfigProvider {
    pub fn from_json(values: Value) -> Self {
        Self {
            values,
            name: "test".to_string(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .try_fold(&self.values, |current, part| current.get(part))
    }
}

impl ConfigProvider for TestConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    fn provider_name(&self) -> &str {
        &self.name
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.lookup(key).cloned())
    }
}

/// Write `files` (relative path, contents) below a fresh temporary directory.
#[allow(dead_code)]
pub fn create_site(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    for (relative, contents) in files {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write fixture");
    }
    dir
}

#[allow(dead_code)]
pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Cookie header value carrying a session for `roles`.
#[allow(dead_code)]
pub fn session_cookie(user: &str, roles: &[&str]) -> String {
    let principal = ClientPrincipal {
        identity_provider: "github".to_string(),
        user_id: format!("{user}-id"),
        user_details: user.to_string(),
        user_roles: roles.iter().map(|r| r.to_string()).collect(),
    };
    format!(
        "{SESSION_COOKIE}={}",
        encode_principal(&principal).expect("encode principal")
    )
}

/// Client that never follows redirects, so 3xx answers can be inspected.
#[allow(dead_code)]
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client")
}

/// An emulator serving on ephemeral ports.
#[allow(dead_code)]
pub struct RunningEmulator {
    pub emulator: Emulator,
    pub base_url: String,
    pub auth_url: String,
    handles: Vec<JoinHandle<()>>,
}

#[allow(dead_code)]
impl RunningEmulator {
    pub async fn stop(self) {
        self.emulator.shutdown();
        for handle in self.handles {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
        }
    }
}

/// Build an emulator from `settings` and serve both listeners on free ports.
///
/// The `server` section is overridden with the bound ports so the dispatcher
/// forwards `/.auth` to the auth listener started here.
#[allow(dead_code)]
pub async fn start_emulator(settings: Value, rules: Option<RulesDocument>) -> RunningEmulator {
    let auth_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind auth");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind emulator");
    let auth_port = auth_listener.local_addr().expect("auth addr").port();
    let port = listener.local_addr().expect("addr").port();

    let config = Config::builder()
        .with_provider(TestConfigProvider::from_json(settings))
        .with_provider(
            TestConfigProvider::from_json(json!({
                "server": { "host": "127.0.0.1", "port": port, "auth_port": auth_port }
            }))
            .named("ports"),
        )
        .build();

    let mut loader = Emulator::loader().with_config(config);
    if let Some(document) = rules {
        loader = loader.with_rules(document);
    }
    let emulator = loader.build().await.expect("emulator builds");

    let auth_server = emulator.auth_server().clone();
    let server = emulator.server().clone();
    let handles = vec![
        tokio::spawn(async move {
            auth_server.serve(auth_listener).await.expect("auth server");
        }),
        tokio::spawn(async move {
            server.serve(listener).await.expect("emulator server");
        }),
    ];

    RunningEmulator {
        emulator,
        base_url: format!("http://127.0.0.1:{port}"),
        auth_url: format!("http://127.0.0.1:{auth_port}"),
        handles,
    }
}
