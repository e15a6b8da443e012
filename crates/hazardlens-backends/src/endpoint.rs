//! Cloud endpoint hardening
//!
//! The cloud vision endpoint comes from configuration, so it is checked
//! before any session is created: HTTPS only, and no loopback, private,
//! link-local or metadata-service hosts.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Reasons an endpoint is refused
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("scheme '{0}' is not allowed, endpoints must use HTTPS")]
    InvalidScheme(String),

    #[error("host '{0}' is blocked: internal addresses are not allowed")]
    BlockedHost(String),

    #[error("endpoint URL has no host")]
    MissingHost,
}

/// Hostnames that never serve a vision API
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "metadata.google.internal",
    "metadata.goog",
    "169.254.169.254",
    "fd00:ec2::254",
];

/// Which relaxations apply when validating an endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointPolicy {
    /// Permit plain HTTP (test rigs only)
    #[serde(default)]
    pub allow_http: bool,

    /// Permit loopback hosts (test rigs only)
    #[serde(default)]
    pub allow_localhost: bool,

    #[serde(default)]
    pub allow_private_ips: bool,

    /// When set, only these domains and their subdomains are accepted
    #[serde(default)]
    pub allowed_domains: Option<Vec<String>>,
}

impl EndpointPolicy {
    /// Policy for local mock servers
    pub fn insecure_local() -> Self {
        Self {
            allow_http: true,
            allow_localhost: true,
            allow_private_ips: true,
            allowed_domains: None,
        }
    }
}

/// Parse and check a cloud endpoint
pub fn validate_endpoint(endpoint: &str, policy: &EndpointPolicy) -> Result<Url, EndpointError> {
    let url = Url::parse(endpoint)?;

    match url.scheme() {
        "https" => {}
        "http" if policy.allow_http => {}
        scheme => return Err(EndpointError::InvalidScheme(scheme.to_string())),
    }

    let host = url.host_str().ok_or(EndpointError::MissingHost)?;
    let host_lower = host.trim_start_matches('[').trim_end_matches(']').to_lowercase();

    if !policy.allow_localhost
        && BLOCKED_HOSTNAMES
            .iter()
            .any(|blocked| host_lower == *blocked || host_lower.ends_with(&format!(".{blocked}")))
    {
        return Err(EndpointError::BlockedHost(host.to_string()));
    }

    if let Ok(ip) = host_lower.parse::<IpAddr>() {
        if !policy.allow_localhost && ip.is_loopback() {
            return Err(EndpointError::BlockedHost(host.to_string()));
        }
        if !policy.allow_private_ips && is_private(&ip) {
            return Err(EndpointError::BlockedHost(host.to_string()));
        }
        if is_link_local(&ip) {
            return Err(EndpointError::BlockedHost(host.to_string()));
        }
    }

    if let Some(allowed) = &policy.allowed_domains {
        let permitted = allowed.iter().any(|domain| {
            let domain = domain.to_lowercase();
            host_lower == domain || host_lower.ends_with(&format!(".{domain}"))
        });
        if !permitted {
            return Err(EndpointError::BlockedHost(format!(
                "{host} is not in the allowed domains list"
            )));
        }
    }

    Ok(url)
}

/// RFC 1918, carrier-grade NAT, this-network, and IPv6 unique-local ranges
fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            v4.is_private() || (o[0] == 100 && (o[1] & 0xC0) == 64) || o[0] == 0
        }
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}
