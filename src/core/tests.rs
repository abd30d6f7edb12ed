// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[cfg(test)]
mod tests {
    use crate::config::EmulatorConfig;
    use crate::core::{
        CLIENT_PRINCIPAL_HEADER, ErrorPage, ProxyCore, ProxyError, ProxyRequest, ProxyResponse,
        ResponseContext, StaticFiles, content_type_for,
    };
    use crate::rules::{OrderedMap, RulesDocument, parse_rules};
    use crate::session::{ClientPrincipal, SESSION_COOKIE, decode_session, encode_principal};
    use http_body_util::BodyExt;
    use reqwest::Method;
    use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, HeaderValue};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // Output folder with an index page, a nested page and a custom 404 page.
    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(dir.path().join("about.html"), "<h1>about</h1>").unwrap();
        fs::write(dir.path().join("custom-404.html"), "<h1>custom missing</h1>").unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/index.html"), "<h1>docs</h1>").unwrap();
        fs::write(dir.path().join("data.json"), "{}").unwrap();
        dir
    }

    fn dispatcher(root: &Path, rules: &str, configure: impl FnOnce(&mut EmulatorConfig)) -> ProxyCore {
        let mut config = EmulatorConfig {
            output_location: root.to_string_lossy().to_string(),
            ..EmulatorConfig::default()
        };
        configure(&mut config);
        let document = if rules.is_empty() {
            RulesDocument::default()
        } else {
            parse_rules(rules, false).unwrap()
        };
        ProxyCore::new(Arc::new(config), "http://127.0.0.1:9", Arc::new(document)).unwrap()
    }

    async fn body_text(response: ProxyResponse) -> String {
        let bytes = response.body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn session_cookie(roles: &[&str]) -> HeaderValue {
        let principal = ClientPrincipal {
            identity_provider: "github".to_string(),
            user_id: "42".to_string(),
            user_details: "octocat".to_string(),
            user_roles: roles.iter().map(|r| r.to_string()).collect(),
        };
        let token = encode_principal(&principal).unwrap();
        HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}")).unwrap()
    }

    #[test]
    fn test_request_url() {
        let mut request = ProxyRequest::new(Method::GET, "/a/b?x=1&y=2");
        assert_eq!(request.path, "/a/b");
        assert_eq!(request.query.as_deref(), Some("x=1&y=2"));
        assert_eq!(request.url(), "/a/b?x=1&y=2");

        request.set_url("/index.html");
        assert_eq!(request.path, "/index.html");
        assert!(request.query.is_none());
        assert!(!request.context.request_id.is_empty());
    }

    #[test]
    fn test_response_context_headers() {
        let mut context = ResponseContext::default();
        assert_eq!(context.status, 200);
        assert!(!context.set_header("bad header", "x"));
        assert!(!context.set_header("x-ok", "line\nbreak"));

        context.remove_header("server");
        context.set_header("x-frame-options", "DENY");
        context.set_header("location", "/elsewhere");
        assert!(!context.is_redirect());
        context.status = 307;
        assert!(context.is_redirect());
        assert_eq!(context.location(), Some("/elsewhere"));

        let mut upstream = HeaderMap::new();
        upstream.insert("server", HeaderValue::from_static("upstream"));
        upstream.insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));
        upstream.insert("etag", HeaderValue::from_static("\"abc\""));
        context.apply_to(&mut upstream);

        assert!(upstream.get("server").is_none());
        assert_eq!(upstream.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(upstream.get("etag").unwrap(), "\"abc\"");
    }

    #[test]
    fn test_set_header_revokes_removal() {
        let mut context = ResponseContext::default();
        context.remove_header("server");
        context.set_header("server", "emulator");

        let mut upstream = HeaderMap::new();
        upstream.insert("server", HeaderValue::from_static("upstream"));
        context.apply_to(&mut upstream);
        assert_eq!(upstream.get("server").unwrap(), "emulator");
    }

    #[test]
    fn test_content_type_for() {
        let overrides: OrderedMap<String> =
            [(".json", "text/json".to_string())].into_iter().collect();
        assert_eq!(content_type_for(Path::new("a/b.json"), &overrides), "text/json");
        assert_eq!(content_type_for(Path::new("a/b.CSS"), &overrides), "text/css");
        assert_eq!(
            content_type_for(Path::new("a/b.unknown"), &overrides),
            "application/octet-stream"
        );
        assert_eq!(
            content_type_for(Path::new("LICENSE"), &overrides),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_static_resolution() {
        let dir = site();
        let files = StaticFiles::new(dir.path());

        assert_eq!(files.resolve("/").await, Some(dir.path().join("index.html")));
        assert_eq!(
            files.resolve("/docs").await,
            Some(dir.path().join("docs/index.html"))
        );
        assert_eq!(files.resolve("/about").await, Some(dir.path().join("about.html")));
        assert_eq!(files.resolve("/nope").await, None);
        assert_eq!(files.resolve("/../etc/passwd").await, None);
        assert_eq!(files.resolve("/%2e%2e/secret").await, None);
    }

    #[tokio::test]
    async fn test_static_serve() {
        let dir = site();
        let files = StaticFiles::new(dir.path());

        let response = files
            .serve("/index.html", 200, &OrderedMap::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("content-type").unwrap(), "text/html");
        assert_eq!(body_text(response).await, "<h1>home</h1>");

        assert!(files
            .serve("/missing.css", 200, &OrderedMap::new())
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_error_pages() {
        let response = ErrorPage::NotFound.response(404);
        assert_eq!(response.status, 404);
        assert!(ErrorPage::NotFound.body().contains("404"));
        assert!(ErrorPage::Unauthorized.body().contains("Unauthorized"));
    }

    #[tokio::test]
    async fn test_serves_static_files_with_global_headers() {
        let dir = site();
        let core = dispatcher(
            dir.path(),
            r#"{ "globalHeaders": { "x-powered-by": "swa", "content-type": "" } }"#,
            |_| {},
        );

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("x-powered-by").unwrap(), "swa");
        assert!(response.headers.get("content-type").is_none());
        assert_eq!(body_text(response).await, "<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_missing_file_serves_not_found_page() {
        let dir = site();
        let core = dispatcher(dir.path(), "", |_| {});

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/missing"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.headers.get("content-type").unwrap(), "text/html");
        assert_eq!(body_text(response).await, ErrorPage::NotFound.body());
    }

    #[tokio::test]
    async fn test_not_found_override_serves_custom_page() {
        let dir = site();
        let core = dispatcher(
            dir.path(),
            r#"{ "responseOverrides": { "404": { "rewrite": "/custom-404.html" } } }"#,
            |_| {},
        );

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/missing"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(body_text(response).await, "<h1>custom missing</h1>");
    }

    #[tokio::test]
    async fn test_unauthorized_override_redirects_to_login() {
        let dir = site();
        let core = dispatcher(
            dir.path(),
            r#"{
                "routes": [{ "route": "/admin/*", "allowedRoles": ["admin"] }],
                "responseOverrides": { "403": { "statusCode": 302, "redirect": "/.auth/login/github" } }
            }"#,
            |_| {},
        );

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/admin/panel"))
            .await
            .unwrap();
        assert_eq!(response.status, 302);
        assert_eq!(
            response.headers.get("location").unwrap(),
            "/.auth/login/github"
        );
    }

    #[tokio::test]
    async fn test_forbidden_route_serves_unauthorized_page() {
        let dir = site();
        let core = dispatcher(
            dir.path(),
            r#"{ "routes": [{ "route": "/admin/*", "allowedRoles": ["admin"] }] }"#,
            |_| {},
        );

        let mut request = ProxyRequest::new(Method::GET, "/admin/panel");
        request.headers.insert(COOKIE, session_cookie(&["authenticated"]));
        let response = core.process_request(request).await.unwrap();
        assert_eq!(response.status, 403);
        assert_eq!(body_text(response).await, ErrorPage::Unauthorized.body());
    }

    #[tokio::test]
    async fn test_malformed_session_is_unauthorized() {
        let dir = site();
        let core = dispatcher(
            dir.path(),
            r#"{ "routes": [{ "route": "/admin/*", "allowedRoles": ["admin"] }] }"#,
            |_| {},
        );

        let mut request = ProxyRequest::new(Method::GET, "/admin/panel");
        request.headers.insert(
            COOKIE,
            HeaderValue::from_static("StaticWebAppsAuthCookie=%%%not-base64"),
        );
        let response = core.process_request(request).await.unwrap();
        assert_eq!(response.status, 401);
    }

    #[tokio::test]
    async fn test_route_redirect() {
        let dir = site();
        let core = dispatcher(
            dir.path(),
            r#"{
                "globalHeaders": { "x-powered-by": "swa" },
                "routes": [{ "route": "/old", "redirect": "/about", "statusCode": 301 }]
            }"#,
            |_| {},
        );

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/old"))
            .await
            .unwrap();
        assert_eq!(response.status, 301);
        assert_eq!(response.headers.get("location").unwrap(), "/about");
        assert_eq!(response.headers.get("x-powered-by").unwrap(), "swa");
    }

    #[tokio::test]
    async fn test_route_rewrite() {
        let dir = site();
        let core = dispatcher(
            dir.path(),
            r#"{ "routes": [{ "route": "/home", "rewrite": "/about.html" }] }"#,
            |_| {},
        );

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/home"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(body_text(response).await, "<h1>about</h1>");
    }

    #[tokio::test]
    async fn test_navigation_fallback() {
        let dir = site();
        let core = dispatcher(
            dir.path(),
            r#"{ "navigationFallback": { "rewrite": "/index.html", "exclude": ["/*.json"] } }"#,
            |_| {},
        );

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/client/side/route"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(body_text(response).await, "<h1>home</h1>");

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/data.json"))
            .await
            .unwrap();
        assert_eq!(response.headers.get("content-type").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_rules_document_is_never_served() {
        let dir = site();
        fs::write(dir.path().join("staticwebapp.config.json"), "{}").unwrap();
        let core = dispatcher(dir.path(), "", |_| {});

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/staticwebapp.config.json"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_api_without_backend_is_bad_gateway() {
        let dir = site();
        let core = dispatcher(dir.path(), "", |_| {});

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/api/users"))
            .await
            .unwrap();
        assert_eq!(response.status, 502);
    }

    #[tokio::test]
    async fn test_api_forwarding_injects_principal() {
        let api = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/users"))
            .and(header_exists(CLIENT_PRINCIPAL_HEADER))
            .and(header_exists("x-ms-request-id"))
            .and(header("x-forwarded-proto", "http"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-upstream", "api")
                    .set_body_string("created"),
            )
            .expect(1)
            .mount(&api)
            .await;

        let dir = site();
        let api_uri = api.uri();
        let core = dispatcher(
            dir.path(),
            r#"{ "globalHeaders": { "x-powered-by": "swa" } }"#,
            |config| config.api_uri = Some(api_uri),
        );

        let mut request = ProxyRequest::new(Method::POST, "/api/users?page=2");
        request.headers.insert(COOKIE, session_cookie(&["authenticated"]));
        request.body = reqwest::Body::from("{\"name\":\"x\"}");
        let response = core.process_request(request).await.unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.headers.get("x-upstream").unwrap(), "api");
        assert_eq!(response.headers.get("x-powered-by").unwrap(), "swa");
        assert_eq!(body_text(response).await, "created");

        let received = api.received_requests().await.unwrap();
        let forwarded = &received[0];
        assert_eq!(forwarded.url.query(), Some("page=2"));
        let principal = forwarded
            .headers
            .get(CLIENT_PRINCIPAL_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let bearer = forwarded.headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert_eq!(bearer, format!("Bearer {principal}"));

        let decoded = decode_session(&format!("{SESSION_COOKIE}={principal}"))
            .unwrap()
            .unwrap();
        assert_eq!(decoded.user_details, "octocat");
    }

    #[tokio::test]
    async fn test_auth_requests_go_to_auth_server() {
        let auth = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.auth/me"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"clientPrincipal\":null}"))
            .expect(1)
            .mount(&auth)
            .await;

        let dir = site();
        let config = EmulatorConfig {
            output_location: dir.path().to_string_lossy().to_string(),
            ..EmulatorConfig::default()
        };
        let core = ProxyCore::new(
            Arc::new(config),
            auth.uri(),
            Arc::new(RulesDocument::default()),
        )
        .unwrap();

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/.auth/me"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(body_text(response).await, "{\"clientPrincipal\":null}");
    }

    #[tokio::test]
    async fn test_app_dev_server_keeps_rule_status() {
        let app = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("dev server"))
            .mount(&app)
            .await;

        let dir = site();
        let app_uri = app.uri();
        let core = dispatcher(
            dir.path(),
            r#"{ "routes": [{ "route": "/teapot", "statusCode": 418 }] }"#,
            |config| config.app_uri = Some(app_uri),
        );

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/teapot"))
            .await
            .unwrap();
        assert_eq!(response.status, 418);
        assert_eq!(body_text(response).await, "dev server");

        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/anything"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_an_error() {
        let dir = site();
        let core = dispatcher(dir.path(), "", |config| {
            config.api_uri = Some("http://127.0.0.1:9".to_string())
        });

        let result = core
            .process_request(ProxyRequest::new(Method::GET, "/api/x"))
            .await;
        assert!(matches!(result, Err(ProxyError::ClientError(_))));
    }
}
