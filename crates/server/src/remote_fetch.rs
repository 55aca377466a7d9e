//! SSRF-safe remote image download.
//!
//! Every URL — the one the caller supplied and every redirect hop — must
//! use http/https on a standard port and must not point at a private,
//! loopback, link-local, multicast, or otherwise non-public address,
//! whether written as a literal IP or resolved through DNS. Downloads are
//! size-capped both by the declared Content-Length and by the streamed
//! byte count.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::redirect;
use url::Url;

use visiontag_core::{imaging, DetectError};

const BLOCKED_HOSTS: [&str; 2] = ["localhost", "localhost.localdomain"];
const ALLOWED_PORTS: [u16; 2] = [80, 443];
const MAX_REDIRECTS: usize = 3;
const USER_AGENT: &str = concat!("visiontag/", env!("CARGO_PKG_VERSION"), " (+remote-image-fetch)");

/// Validate scheme, host, port, and literal-IP policy for one URL.
pub fn validate_remote_image_url(url: &Url) -> Result<(), DetectError> {
    match url.scheme() {
        "http" | "https" => {}
        _ => {
            return Err(DetectError::InvalidInput(
                "URL must use http or https".to_string(),
            ))
        }
    }

    let Some(host) = url.host_str() else {
        return Err(DetectError::InvalidInput("URL has no host".to_string()));
    };
    let host = host.trim().to_lowercase();
    if host.is_empty() {
        return Err(DetectError::InvalidInput("URL has no host".to_string()));
    }

    if let Some(port) = url.port() {
        if !ALLOWED_PORTS.contains(&port) {
            return Err(DetectError::InvalidInput(
                "port not allowed for remote downloads".to_string(),
            ));
        }
    }

    if BLOCKED_HOSTS.contains(&host.as_str()) || host.ends_with(".local") {
        return Err(DetectError::InvalidInput(
            "host blocked by security policy".to_string(),
        ));
    }

    // Bracketed IPv6 literals arrive as "[::1]"; strip for parsing.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_forbidden_ip(ip) {
            return Err(DetectError::InvalidInput(
                "IP address not allowed by security policy".to_string(),
            ));
        }
    }

    Ok(())
}

/// Addresses that must never be fetched from, regardless of how the
/// caller spelled them.
fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_multicast()
                || v4.is_unspecified()
                // Carrier-grade NAT, 100.64.0.0/10.
                || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
                // "This network", 0.0.0.0/8.
                || octets[0] == 0
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                // Unique local, fc00::/7.
                || (segments[0] & 0xfe00) == 0xfc00
                // Link local, fe80::/10.
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Resolve the URL's host through DNS and reject any non-public address.
///
/// Literal IPs are checked directly. A host that resolves to even one
/// forbidden address is rejected outright — DNS rebinding gets no
/// partial credit.
async fn ensure_public_resolution(url: &Url) -> Result<(), DetectError> {
    let Some(host) = url.host_str() else {
        return Err(DetectError::InvalidInput("URL has no host".to_string()));
    };
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_forbidden_ip(ip) {
            return Err(DetectError::InvalidInput(
                "IP address not allowed by security policy".to_string(),
            ));
        }
        return Ok(());
    }

    let addrs: Vec<_> = tokio::net::lookup_host((bare, url.port_or_known_default().unwrap_or(80)))
        .await
        .map_err(|_| DetectError::InvalidInput("could not resolve the URL host".to_string()))?
        .collect();
    if addrs.is_empty() {
        return Err(DetectError::InvalidInput(
            "host has no resolvable address".to_string(),
        ));
    }
    for addr in addrs {
        if is_forbidden_ip(addr.ip()) {
            return Err(DetectError::InvalidInput(
                "host resolves to an address not allowed by security policy".to_string(),
            ));
        }
    }
    Ok(())
}

/// Download a remote image with full SSRF validation and size caps.
pub async fn fetch_remote_image(
    raw_url: &str,
    timeout: Duration,
    max_bytes: usize,
) -> Result<Vec<u8>, DetectError> {
    let url = Url::parse(raw_url)
        .map_err(|_| DetectError::InvalidInput("invalid URL".to_string()))?;
    validate_remote_image_url(&url)?;
    ensure_public_resolution(&url).await?;

    // Every redirect hop goes through the same URL policy before it is
    // followed.
    let redirect_policy = redirect::Policy::custom(|attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match validate_remote_image_url(attempt.url()) {
            Ok(()) => attempt.follow(),
            Err(e) => attempt.error(e.to_string()),
        }
    });

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(redirect_policy)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| DetectError::Internal(format!("failed to build HTTP client: {e}")))?;

    let mut response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DetectError::InvalidInput("timed out downloading the remote image".to_string())
        } else {
            DetectError::InvalidInput("network failure reaching the URL".to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(DetectError::InvalidInput(format!(
            "remote download failed (status {})",
            response.status().as_u16()
        )));
    }

    // Redirects may have landed somewhere new; re-check the final URL and
    // where it resolves.
    validate_remote_image_url(response.url())?;
    ensure_public_resolution(response.url()).await?;

    if let Some(declared) = response.content_length() {
        if declared as usize > max_bytes {
            return Err(DetectError::PayloadTooLarge(
                "remote image exceeds the size limit".to_string(),
            ));
        }
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if !imaging::is_allowed_content_type(content_type.as_deref()) {
        return Err(DetectError::UnsupportedMediaType(
            "the URL did not return a supported image format".to_string(),
        ));
    }

    let mut data = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|_| {
        DetectError::InvalidInput("network failure while downloading the image".to_string())
    })? {
        data.extend_from_slice(&chunk);
        if data.len() > max_bytes {
            return Err(DetectError::PayloadTooLarge(
                "remote image exceeds the size limit".to_string(),
            ));
        }
    }

    if data.is_empty() {
        return Err(DetectError::InvalidInput(
            "the URL returned no content".to_string(),
        ));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(url: &str) -> Result<(), DetectError> {
        validate_remote_image_url(&Url::parse(url).unwrap())
    }

    #[test]
    fn accepts_public_http_and_https() {
        assert!(check("https://example.com/cat.jpg").is_ok());
        assert!(check("http://example.com:80/cat.jpg").is_ok());
        assert!(check("https://93.184.216.34/cat.jpg").is_ok());
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(check("ftp://example.com/cat.jpg").is_err());
        assert!(check("file:///etc/passwd").is_err());
    }

    #[test]
    fn rejects_non_standard_ports() {
        assert!(check("http://example.com:8080/cat.jpg").is_err());
        assert!(check("https://example.com:6379/cat.jpg").is_err());
    }

    #[test]
    fn rejects_blocked_hostnames() {
        assert!(check("http://localhost/cat.jpg").is_err());
        assert!(check("http://LOCALHOST/cat.jpg").is_err());
        assert!(check("http://printer.local/cat.jpg").is_err());
    }

    #[test]
    fn rejects_private_and_special_ipv4_literals() {
        for url in [
            "http://127.0.0.1/x.jpg",
            "http://10.1.2.3/x.jpg",
            "http://172.16.0.1/x.jpg",
            "http://192.168.1.1/x.jpg",
            "http://169.254.169.254/x.jpg",
            "http://100.64.0.1/x.jpg",
            "http://0.0.0.0/x.jpg",
        ] {
            assert!(check(url).is_err(), "{url} should be rejected");
        }
    }

    #[test]
    fn rejects_forbidden_ipv6_literals() {
        assert!(check("http://[::1]/x.jpg").is_err());
        assert!(check("http://[fe80::1]/x.jpg").is_err());
        assert!(check("http://[fc00::1]/x.jpg").is_err());
    }

    #[test]
    fn forbidden_ip_classification() {
        assert!(is_forbidden_ip("127.0.0.1".parse().unwrap()));
        assert!(is_forbidden_ip("192.168.0.10".parse().unwrap()));
        assert!(is_forbidden_ip("::1".parse().unwrap()));
        assert!(!is_forbidden_ip("93.184.216.34".parse().unwrap()));
        assert!(!is_forbidden_ip("2606:2800:220:1:248:1893:25c8:1946".parse().unwrap()));
    }
}
