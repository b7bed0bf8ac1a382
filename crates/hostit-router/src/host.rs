//! Subdomain extraction from the request host.

use axum::http::{HeaderMap, Uri, header};

/// The request's host: the `Host` header, or the URI authority for
/// absolute-form requests.
pub fn request_host<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> Option<&'a str> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.host())
}

/// First DNS label of `host`, lowercased, with any port removed.
///
/// Hosts without a parent domain have no subdomain.
pub fn subdomain(host: &str) -> Option<String> {
    let host = host.trim();
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    let (label, rest) = host.split_once('.')?;
    if label.is_empty() || rest.is_empty() {
        return None;
    }
    Some(label.to_ascii_lowercase())
}
