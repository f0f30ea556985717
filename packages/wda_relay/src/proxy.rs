//! Reverse proxy to the WebDriverAgent backend
//!
//! Method, path, query, headers and body go through unmodified apart from
//! hop-by-hop headers. The backend's CORS headers are dropped so the relay's
//! own permissive policy is the only one the browser sees.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, header},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::ProxyError;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Clone)]
pub struct ReverseProxy {
    client: reqwest::Client,
    base_url: String,
    max_body_bytes: usize,
}

impl ReverseProxy {
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Forward one request and stream the backend's answer back.
    pub async fn forward(&self, req: Request) -> Result<Response, ProxyError> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base_url, path_and_query);

        let body = read_body(body, self.max_body_bytes).await?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        // recomputed from the buffered body
        headers.remove(header::CONTENT_LENGTH);

        debug!("Proxying {} {}", parts.method, url);
        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        strip_cors(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Buffer a request body, telling an oversized body apart from a broken one.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    let mut frames = body.into_data_stream();
    let mut buf = BytesMut::new();
    while let Some(frame) = frames.next().await {
        let frame = frame.map_err(|e| ProxyError::RequestBody(e.to_string()))?;
        if buf.len() + frame.len() > limit {
            return Err(ProxyError::BodyTooLarge { limit });
        }
        buf.extend_from_slice(&frame);
    }
    Ok(buf.freeze())
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in Connection are hop-by-hop too
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn strip_cors(headers: &mut HeaderMap) {
    let cors: Vec<_> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("access-control-"))
        .cloned()
        .collect();
    for name in cors {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        http::{Method, StatusCode},
        routing::{any, get},
    };
    use std::time::Duration;

    /// Backend that echoes what it received as JSON.
    async fn echo(req: Request) -> Json<serde_json::Value> {
        let (parts, body) = req.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        Json(serde_json::json!({
            "method": parts.method.as_str(),
            "uri": parts.uri.to_string(),
            "x_session": parts.headers.get("x-session").and_then(|v| v.to_str().ok()),
            "has_dropped": parts.headers.contains_key("x-dropped"),
            "body": String::from_utf8_lossy(&body),
        }))
    }

    async fn spawn_backend() -> String {
        let app = Router::new()
            .route(
                "/teapot",
                get(|| async {
                    (
                        StatusCode::IM_A_TEAPOT,
                        [
                            ("x-backend", "wda"),
                            ("access-control-allow-origin", "http://elsewhere"),
                        ],
                        "short and stout",
                    )
                }),
            )
            .route(
                "/moved",
                get(|| async { (StatusCode::FOUND, [("location", "/elsewhere")], "") }),
            )
            .route("/{*path}", any(echo));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn proxy_for(base_url: String, max_body_bytes: usize) -> ReverseProxy {
        ReverseProxy::new(&BackendConfig {
            base_url,
            request_timeout: Duration::from_secs(5),
            max_body_bytes,
        })
        .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn forwards_method_path_query_headers_and_body() {
        let proxy = proxy_for(spawn_backend().await, 1024);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/session/abc/element?using=id")
            .header("x-session", "abc")
            .header("connection", "x-dropped")
            .header("x-dropped", "1")
            .body(Body::from(r#"{"value":"btn"}"#))
            .unwrap();

        let resp = proxy.forward(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["method"], "POST");
        assert_eq!(json["uri"], "/session/abc/element?using=id");
        assert_eq!(json["x_session"], "abc");
        assert_eq!(json["has_dropped"], false);
        assert_eq!(json["body"], r#"{"value":"btn"}"#);
    }

    #[tokio::test]
    async fn returns_backend_status_and_headers() {
        let proxy = proxy_for(spawn_backend().await, 1024);
        let req = Request::builder()
            .uri("/teapot")
            .body(Body::empty())
            .unwrap();

        let resp = proxy.forward(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(resp.headers()["x-backend"], "wda");
        assert!(!resp.headers().contains_key("access-control-allow-origin"));
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"short and stout");
    }

    #[tokio::test]
    async fn redirects_are_passed_through() {
        let proxy = proxy_for(spawn_backend().await, 1024);
        let req = Request::builder()
            .uri("/moved")
            .body(Body::empty())
            .unwrap();

        let resp = proxy.forward(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()["location"], "/elsewhere");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let proxy = proxy_for(spawn_backend().await, 4);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .body(Body::from("far too long"))
            .unwrap();

        let err = proxy.forward(req).await.unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn body_at_the_limit_is_forwarded() {
        let proxy = proxy_for(spawn_backend().await, 4);
        let req = Request::builder()
            .method(Method::PUT)
            .uri("/upload")
            .body(Body::from("four"))
            .unwrap();

        let json = body_json(proxy.forward(req).await.unwrap()).await;
        assert_eq!(json["body"], "four");
    }

    #[tokio::test]
    async fn broken_request_body_is_not_reported_as_too_large() {
        let proxy = proxy_for(spawn_backend().await, 1024);
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            )),
        ];
        let req = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .unwrap();

        let err = proxy.forward(req).await.unwrap_err();
        assert!(matches!(err, ProxyError::RequestBody(_)), "got {:?}", err);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unreachable_backend_is_bad_gateway() {
        let proxy = proxy_for("http://127.0.0.1:1".into(), 1024);
        let req = Request::builder()
            .uri("/status")
            .body(Body::empty())
            .unwrap();

        let err = proxy.forward(req).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn strips_hop_by_hop_and_connection_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive, x-private".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert("x-private", "1".parse().unwrap());
        headers.insert("x-public", "1".parse().unwrap());
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-public"));
    }
}
