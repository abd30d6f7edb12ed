// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[cfg(test)]
mod tests {
    use crate::core::{ProxyError, ProxyRequest, ProxyResponse};
    use crate::server::{ProxyServer, RequestHandler, convert_proxy_response, error_response};
    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use hyper::StatusCode;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    // Echoes method, URL, request id and body back as text.
    #[derive(Debug)]
    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
            if request.path == "/slow" {
                return Err(ProxyError::Timeout(Duration::from_secs(1)));
            }
            if request.path == "/broken" {
                return Err(ProxyError::Other("boom".to_string()));
            }

            let method = request.method.clone();
            let url = request.url();
            let client_ip = request.context.client_ip.clone().unwrap_or_default();
            let request_id = request.context.request_id.clone();

            let body = request
                .body
                .collect()
                .await
                .map_err(ProxyError::ClientError)?
                .to_bytes();
            let text = format!(
                "{} {} {} {}",
                method,
                url,
                client_ip,
                String::from_utf8_lossy(&body)
            );
            let mut response = ProxyResponse::text(200, text);
            response.headers.insert(
                "x-request-id",
                request_id.parse().map_err(|_| {
                    ProxyError::Other("request id is not a header value".to_string())
                })?,
            );
            Ok(response)
        }
    }

    async fn running_server() -> (ProxyServer, String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ProxyServer::new("TestServer", "127.0.0.1", addr.port(), Arc::new(EchoHandler));

        let running = server.clone();
        let handle = tokio::spawn(async move {
            running.serve(listener).await.unwrap();
        });
        (server, format!("http://{addr}"), handle)
    }

    #[test]
    fn test_error_response_mapping() {
        let timeout = error_response(&ProxyError::Timeout(Duration::from_secs(3)));
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);

        let other = error_response(&ProxyError::Other("x".to_string()));
        assert_eq!(other.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let config = error_response(&ProxyError::ConfigError("x".to_string()));
        assert_eq!(config.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_convert_proxy_response() {
        let mut resp = ProxyResponse::text(201, "created");
        resp.headers
            .insert("x-custom", "yes".parse().unwrap());
        let converted = convert_proxy_response(resp).unwrap();
        assert_eq!(converted.status(), StatusCode::CREATED);
        assert_eq!(converted.headers().get("x-custom").unwrap(), "yes");

        let invalid = ProxyResponse::text(42, "");
        assert!(convert_proxy_response(invalid).is_err());
    }

    #[tokio::test]
    async fn test_serves_requests_and_streams_bodies() {
        let (server, base, handle) = running_server().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/echo/path?x=1"))
            .body("hello")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let request_id = response
            .headers()
            .get("x-request-id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(request_id.len(), 36);
        assert_eq!(
            response.text().await.unwrap(),
            "POST /echo/path?x=1 127.0.0.1 hello"
        );

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_handler_errors_become_status_codes() {
        let (server, base, handle) = running_server().await;
        let client = reqwest::Client::new();

        let slow = client.get(format!("{base}/slow")).send().await.unwrap();
        assert_eq!(slow.status(), 504);

        let broken = client.get(format!("{base}/broken")).send().await.unwrap();
        assert_eq!(broken.status(), 500);
        assert_eq!(broken.text().await.unwrap(), "Internal Server Error");

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_serve_is_not_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = ProxyServer::new("Early", "127.0.0.1", port, Arc::new(EchoHandler));
        assert_eq!(server.name(), "Early");

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), server.serve(listener))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_host() {
        let server = ProxyServer::new("Bad", "not a host", 0, Arc::new(EchoHandler));
        assert!(matches!(server.bind().await, Err(ProxyError::Other(_))));
    }
}
