//! Relay URL safety checks.
//!
//! Relay URLs are consumed from user-influenced sources (kind 10002 events,
//! seed files, third-party directory APIs) and later become the target of
//! outgoing WebSocket connections. Any URL that resolves to a loopback,
//! private, link-local, or otherwise reserved address is rejected before it
//! ever reaches the relay client.

use std::net::IpAddr;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlSafetyError {
    #[error("unparseable relay url: {0}")]
    Unparseable(String),

    #[error("unsupported scheme: {0} (only ws:// and wss:// are accepted)")]
    UnsupportedScheme(String),

    #[error("relay url has no hostname")]
    MissingHost,

    #[error("hostname {0} resolves to a disallowed address")]
    DisallowedAddress(String),

    #[error("hostname {0} is blocklisted")]
    Blocklisted(String),
}

/// Validate a candidate relay URL before it is persisted or dialed.
///
/// Only `ws://` and `wss://` schemes are accepted. IP-literal hostnames are
/// checked against loopback/private/link-local/reserved ranges; hostnames
/// that are plain DNS names are not resolved here (resolution happens at
/// connect time, inside the relay client, which must re-check the resolved
/// address — this function only catches the cheap, common case of an
/// attacker supplying a bare IP literal).
pub fn validate_relay_url(raw: &str, blocklist: &[String]) -> Result<Url, UrlSafetyError> {
    let url = Url::parse(raw).map_err(|_| UrlSafetyError::Unparseable(raw.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(UrlSafetyError::UnsupportedScheme(other.to_string())),
    }

    let host = url.host_str().ok_or(UrlSafetyError::MissingHost)?;

    if blocklist.iter().any(|b| b.eq_ignore_ascii_case(host)) {
        return Err(UrlSafetyError::Blocklisted(host.to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_disallowed_address(ip) {
            return Err(UrlSafetyError::DisallowedAddress(host.to_string()));
        }
    }
    // Non-IP hostnames (including `.onion`) are accepted here; DNS
    // resolution and the accompanying address re-check happen in the
    // relay client immediately before dialing.

    Ok(url)
}

fn is_disallowed_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || is_cgnat(v4)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || is_unique_local_v6(v6)
                || is_link_local_v6(v6)
        }
    }
}

/// 100.64.0.0/10, carrier-grade NAT space — not covered by `is_private`.
fn is_cgnat(v4: std::net::Ipv4Addr) -> bool {
    let octets = v4.octets();
    octets[0] == 100 && (octets[1] & 0b1100_0000) == 0b0100_0000
}

/// fc00::/7
fn is_unique_local_v6(v6: std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

/// fe80::/10
fn is_link_local_v6(v6: std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xffc0) == 0xfe80
}
