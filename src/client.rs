use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::connection_pool::PoolConfig;
use crate::utils::parse_headers_with_escapes;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Configuration for building the HTTP client shared by every query task.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Sent as the `api-key` header on every request
    pub api_key: Option<String>,
    pub skip_tls_verify: bool,
    /// `hostname:ip:port`
    pub resolve_target_addr: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    /// `Name:Value` pairs separated by commas; `\,` escapes a comma
    pub custom_headers: Option<String>,
    pub pool_config: PoolConfig,
    /// Transport timeout per request; None leaves requests unbounded
    pub request_timeout: Option<Duration>,
}

/// Result of building the client, includes the default headers for logging.
pub struct ClientBuildResult {
    pub client: reqwest::Client,
    pub default_headers: HeaderMap,
}

/// Builds a reqwest HTTP client with the specified configuration.
pub fn build_client(config: &ClientConfig) -> Result<ClientBuildResult, BoxError> {
    let mut client_builder = reqwest::Client::builder();

    if let Some(resolve_str) = config.resolve_target_addr.as_deref() {
        if resolve_str.is_empty() {
            warn!("RESOLVE_TARGET_ADDR is set but empty, no DNS override applied");
        } else {
            let (hostname, socket_addr) = parse_dns_override(resolve_str)?;
            info!(hostname = %hostname, addr = %socket_addr, "DNS override configured");
            client_builder = client_builder.resolve(&hostname, socket_addr);
        }
    }

    if let Some(identity) = load_identity(
        config.client_cert_path.as_deref(),
        config.client_key_path.as_deref(),
    )? {
        client_builder = client_builder.identity(identity);
        info!("mTLS client identity configured");
    }

    let mut default_headers = parse_custom_headers(config.custom_headers.as_deref())?;
    if let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
        let mut value = HeaderValue::from_str(api_key)
            .map_err(|e| format!("SEARCH_API_KEY is not a valid header value: {}", e))?;
        value.set_sensitive(true);
        default_headers.insert(HeaderName::from_static("api-key"), value);
    }
    if !default_headers.is_empty() {
        client_builder = client_builder.default_headers(default_headers.clone());
    }

    client_builder = config.pool_config.apply_to_builder(client_builder);
    info!(
        connection_limit = config.pool_config.connection_limit,
        idle_timeout = ?config.pool_config.idle_timeout,
        "Connection pool configured"
    );

    if let Some(timeout) = config.request_timeout {
        client_builder = client_builder.timeout(timeout);
    }

    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder = client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    Ok(ClientBuildResult {
        client: client_builder.build()?,
        default_headers,
    })
}

/// Parses `hostname:ip:port` into the host to override and its address.
pub fn parse_dns_override(resolve_str: &str) -> Result<(String, SocketAddr), BoxError> {
    let parts: Vec<&str> = resolve_str.split(':').map(str::trim).collect();
    let [hostname, ip, port] = parts.as_slice() else {
        return Err(format!(
            "RESOLVE_TARGET_ADDR ('{}') is not in the expected format 'hostname:ip:port'",
            resolve_str
        )
        .into());
    };

    if hostname.is_empty() || ip.is_empty() || port.is_empty() {
        return Err(format!(
            "RESOLVE_TARGET_ADDR ('{}') has an empty part. Format: 'hostname:ip:port'",
            resolve_str
        )
        .into());
    }

    let port: u16 = port
        .parse()
        .map_err(|e| format!("Invalid port '{}' in RESOLVE_TARGET_ADDR: {}", port, e))?;
    let socket_addr: SocketAddr = format!("{}:{}", ip, port)
        .parse()
        .map_err(|e| format!("Invalid IP '{}' in RESOLVE_TARGET_ADDR: {}", ip, e))?;

    Ok((hostname.to_string(), socket_addr))
}

/// Loads a PEM certificate and PKCS#8 key pair into a client identity.
fn load_identity(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<Option<reqwest::Identity>, BoxError> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (Some(cert), Some(key)) => (cert, key),
        (Some(_), None) => {
            return Err("CLIENT_CERT_PATH is set, but CLIENT_KEY_PATH is missing for mTLS.".into())
        }
        (None, Some(_)) => {
            return Err("CLIENT_KEY_PATH is set, but CLIENT_CERT_PATH is missing for mTLS.".into())
        }
        (None, None) => return Ok(None),
    };

    let cert_pem = fs::read(cert_path)
        .map_err(|e| format!("Failed to read client certificate '{}': {}", cert_path, e))?;
    let key_pem = fs::read(key_path)
        .map_err(|e| format!("Failed to read client key '{}': {}", key_path, e))?;

    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_pem.as_slice()).collect();
    if certs.is_empty() {
        return Err(format!("No PEM certificates found in '{}'", cert_path).into());
    }
    if let Some(Err(e)) = certs.into_iter().find(|c| c.is_err()) {
        return Err(format!("Failed to parse PEM certificates from '{}': {}", cert_path, e).into());
    }

    let keys: Vec<_> = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_slice()).collect();
    if keys.is_empty() {
        return Err(format!("No PKCS#8 private keys found in '{}'", key_path).into());
    }
    if let Some(Err(e)) = keys.into_iter().find(|k| k.is_err()) {
        return Err(format!("Failed to parse PKCS#8 key from '{}': {}", key_path, e).into());
    }

    let mut combined = cert_pem;
    if !combined.ends_with(b"\n") {
        combined.push(b'\n');
    }
    combined.extend_from_slice(&key_pem);

    let identity = reqwest::Identity::from_pem(&combined)
        .map_err(|e| format!("Failed to build client identity from PEM: {}", e))?;
    Ok(Some(identity))
}

/// Parses `CUSTOM_HEADERS` into a header map.
pub fn parse_custom_headers(custom_headers: Option<&str>) -> Result<HeaderMap, BoxError> {
    let mut headers = HeaderMap::new();
    let Some(headers_str) = custom_headers.filter(|s| !s.is_empty()) else {
        return Ok(headers);
    };

    for pair in parse_headers_with_escapes(headers_str) {
        let pair = pair.trim();
        let (name, value) = pair.split_once(':').ok_or_else(|| {
            format!(
                "Invalid header format in CUSTOM_HEADERS: '{}'. Expected 'Name:Value'.",
                pair
            )
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("Header name cannot be empty in '{}'", pair).into());
        }

        let header_name = HeaderName::from_str(name)
            .map_err(|e| format!("Invalid header name '{}': {}", name, e))?;
        let header_value = HeaderValue::from_str(value.trim())
            .map_err(|e| format!("Invalid header value for '{}': {}", name, e))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_override_parses() {
        let (host, addr) = parse_dns_override("svc.search.windows.net:10.0.0.5:443").unwrap();
        assert_eq!(host, "svc.search.windows.net");
        assert_eq!(addr, "10.0.0.5:443".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn dns_override_rejects_bad_input() {
        assert!(parse_dns_override("svc:10.0.0.5").is_err());
        assert!(parse_dns_override(":10.0.0.5:443").is_err());
        assert!(parse_dns_override("svc:10.0.0.5:http").is_err());
        assert!(parse_dns_override("svc:not-an-ip:443").is_err());
    }

    #[test]
    fn custom_headers_parse() {
        let headers =
            parse_custom_headers(Some("x-ms-client-request-id:abc,Prefer:a\\,b")).unwrap();
        assert_eq!(headers.get("x-ms-client-request-id").unwrap(), "abc");
        assert_eq!(headers.get("prefer").unwrap(), "a,b");
    }

    #[test]
    fn custom_headers_reject_missing_colon() {
        assert!(parse_custom_headers(Some("no-colon-here")).is_err());
        assert!(parse_custom_headers(None).unwrap().is_empty());
    }

    #[test]
    fn mtls_requires_both_paths() {
        assert!(load_identity(Some("cert.pem"), None).is_err());
        assert!(load_identity(None, Some("key.pem")).is_err());
        assert!(load_identity(None, None).unwrap().is_none());
    }

    #[test]
    fn api_key_becomes_default_header() {
        let config = ClientConfig {
            api_key: Some("secret".to_string()),
            custom_headers: Some("x-extra:1".to_string()),
            ..Default::default()
        };
        let built = build_client(&config).unwrap();
        assert_eq!(built.default_headers.get("api-key").unwrap(), "secret");
        assert_eq!(built.default_headers.get("x-extra").unwrap(), "1");
    }
}
