//! Reverse proxy to live backends.

use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, Method, header};
use axum::response::Response;
use tracing::debug;

use crate::error::RouterError;

/// HTTP client for upstream requests. Redirects are passed through to the
/// client untouched.
pub fn upstream_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// Join a backend base URL and a request path without doubling or dropping
/// the separating slash.
pub fn join_upstream_url(base: &str, path_and_query: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path_and_query.trim_start_matches('/')
    )
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn forward_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        if key == header::HOST || key == header::CONTENT_LENGTH || is_hop_by_hop(key) {
            continue;
        }
        forwarded.append(key.clone(), value.clone());
    }
    forwarded
}

/// Forward a request to `base` and mirror the upstream response.
pub async fn forward(
    client: &reqwest::Client,
    base: &str,
    request: Request,
    max_body_bytes: usize,
) -> Result<Response, RouterError> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = join_upstream_url(base, path_and_query);
    debug!(method = %parts.method, url = %url, "Proxying request");

    let mut upstream = client
        .request(parts.method.clone(), &url)
        .headers(forward_headers(&parts.headers));
    if parts.method != Method::GET && parts.method != Method::HEAD {
        let bytes = axum::body::to_bytes(body, max_body_bytes)
            .await
            .map_err(|_| RouterError::PayloadTooLarge)?;
        upstream = upstream.body(bytes);
    }

    let response = upstream
        .send()
        .await
        .map_err(|e| RouterError::Upstream(format!("{}: {e}", url)))?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| RouterError::Upstream(format!("{}: {e}", url)))?;

    let mut mirrored = Response::new(Body::from(body));
    *mirrored.status_mut() = status;
    for (key, value) in &headers {
        if !is_hop_by_hop(key) {
            mirrored.headers_mut().append(key.clone(), value.clone());
        }
    }
    Ok(mirrored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_join_upstream_url() {
        assert_eq!(
            join_upstream_url("http://backend.local/", "/api/items?x=1"),
            "http://backend.local/api/items?x=1"
        );
        assert_eq!(
            join_upstream_url("http://backend.local", "api"),
            "http://backend.local/api"
        );
        assert_eq!(join_upstream_url("http://backend.local//", "/"), "http://backend.local/");
    }

    #[test]
    fn test_forward_headers_drops_host_and_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("site.example"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        headers.append("x-multi", HeaderValue::from_static("a"));
        headers.append("x-multi", HeaderValue::from_static("b"));

        let forwarded = forward_headers(&headers);
        assert!(forwarded.get(header::HOST).is_none());
        assert!(forwarded.get(header::CONNECTION).is_none());
        assert_eq!(forwarded.get(header::AUTHORIZATION).unwrap(), "Bearer t");
        assert_eq!(forwarded.get_all("x-multi").iter().count(), 2);
    }
}
