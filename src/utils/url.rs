//! URL utilities for consistent endpoint construction
//!
//! Tool servers are configured as host/port pairs; everything the bridge
//! sends goes to an endpoint derived from that pair. Centralizing the
//! construction prevents double-slash and trailing-slash mistakes.

use crate::core::config::data::ServerDescriptor;

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use toolbridge::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://10.0.0.5:8080"), "http://10.0.0.5:8080");
/// assert_eq!(normalize_base_url("http://10.0.0.5:8080/"), "http://10.0.0.5:8080");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Construct a complete endpoint URL from a base URL and endpoint path
///
/// # Examples
///
/// ```
/// use toolbridge::utils::url::construct_endpoint_url;
///
/// assert_eq!(
///     construct_endpoint_url("http://10.0.0.5:8080/", "sse"),
///     "http://10.0.0.5:8080/sse"
/// );
/// ```
pub fn construct_endpoint_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Base URL for a configured tool server.
pub fn server_base_url(server: &ServerDescriptor) -> String {
    format!("http://{}:{}", server.host.trim_end_matches('/'), server.port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("http://example.com:8080"),
            "http://example.com:8080"
        );
        assert_eq!(
            normalize_base_url("http://example.com:8080///"),
            "http://example.com:8080"
        );
    }

    #[test]
    fn test_construct_endpoint_url() {
        assert_eq!(
            construct_endpoint_url("http://example.com:8080", "/messages"),
            "http://example.com:8080/messages"
        );
        assert_eq!(
            construct_endpoint_url("http://example.com:8080/", "tools"),
            "http://example.com:8080/tools"
        );
    }

    #[test]
    fn test_server_base_url() {
        let server = ServerDescriptor {
            id: "alpha".to_string(),
            display_name: "Alpha".to_string(),
            host: "172.16.16.54".to_string(),
            port: 8080,
        };
        assert_eq!(server_base_url(&server), "http://172.16.16.54:8080");
    }
}
