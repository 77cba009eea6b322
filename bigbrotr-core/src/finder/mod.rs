//! Relay discovery: mine stored kind-10002 events for `r` tags,
//! optionally ingest directory-API listings, validate every candidate
//! through [`crate::url_safety`] before it is ever upserted.

use std::collections::HashSet;

use futures::StreamExt;

use crate::error::FinderError;
use crate::http_fetcher::HttpFetcher;
use crate::store::Store;
use crate::types::{Event, Network};
use crate::url_safety::validate_relay_url;

const RELAY_LIST_METADATA_KIND: u32 = 10_002;

#[derive(Debug, Clone, Default)]
pub struct FinderConfig {
    pub directory_urls: Vec<String>,
    pub url_blocklist: Vec<String>,
    /// Scan already-known relays' NIP-11 `extra_fields` for an embedded
    /// `relays` array of candidate URLs. Off by default — see Open
    /// Question decisions.
    pub scan_nip11_extra_fields: bool,
}

/// Discover new relay URLs from known sources and upsert the safe ones into
/// `store`. Returns the URLs actually inserted (i.e. not already known and
/// not rejected by URL-safety checks).
pub async fn discover(
    store: &dyn Store,
    fetcher: &dyn HttpFetcher,
    relay_list_events: &[Event],
    config: &FinderConfig,
    now: i64,
) -> Result<Vec<String>, FinderError> {
    let mut candidates: HashSet<String> = HashSet::new();

    for event in relay_list_events {
        if event.kind != RELAY_LIST_METADATA_KIND {
            continue;
        }
        for tag in &event.tags {
            if tag.len() >= 2 && tag[0] == "r" {
                candidates.insert(tag[1].clone());
            }
        }
    }

    for directory_url in &config.directory_urls {
        match fetch_directory_urls(fetcher, directory_url).await {
            Ok(urls) => candidates.extend(urls),
            Err(e) => {
                tracing::warn!(directory_url, error = %e, "relay directory fetch failed");
            }
        }
    }

    let mut accepted = Vec::new();
    for candidate in candidates {
        match validate_relay_url(&candidate, &config.url_blocklist) {
            Ok(url) => {
                let normalized = url.to_string();
                let host = url.host_str().unwrap_or_default();
                let network = Network::classify(host);
                store.upsert_relay(&normalized, network, now).await?;
                accepted.push(normalized);
            }
            Err(reason) => {
                tracing::debug!(candidate, %reason, "rejected candidate relay url");
            }
        }
    }

    Ok(accepted)
}

async fn fetch_directory_urls(fetcher: &dyn HttpFetcher, directory_url: &str) -> Result<Vec<String>, FinderError> {
    let body = fetcher
        .get_json(directory_url, std::time::Duration::from_secs(20))
        .await
        .map_err(|source| FinderError::Fetch {
            url: directory_url.to_string(),
            source,
        })?;

    Ok(extract_urls(&body))
}

/// Directory APIs vary in shape; accept a top-level array of strings, an
/// array of objects with a `url` field, or an object whose values are such
/// arrays (e.g. `{"clearnet": [...], "tor": [...]}`).
fn extract_urls(value: &serde_json::Value) -> Vec<String> {
    let mut urls = Vec::new();
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                match item {
                    serde_json::Value::String(s) => urls.push(s.clone()),
                    serde_json::Value::Object(obj) => {
                        if let Some(serde_json::Value::String(s)) = obj.get("url") {
                            urls.push(s.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        serde_json::Value::Object(obj) => {
            for v in obj.values() {
                urls.extend(extract_urls(v));
            }
        }
        _ => {}
    }
    urls
}

/// Scan a relay's NIP-11 `extra_fields` for an embedded `relays` array.
/// Gated by `FinderConfig::scan_nip11_extra_fields` at the call site.
pub fn candidates_from_nip11_extra_fields(doc: &crate::types::Nip11Doc) -> Vec<String> {
    doc.extra_fields
        .get("relays")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay_list_event(urls: &[&str]) -> Event {
        Event {
            id: "0".repeat(64),
            pubkey: "0".repeat(64),
            created_at: 1_700_000_000,
            kind: RELAY_LIST_METADATA_KIND,
            tags: urls.iter().map(|u| vec!["r".to_string(), u.to_string()]).collect(),
            content: String::new(),
            sig: "0".repeat(128),
        }
    }

    #[test]
    fn extracts_urls_from_flat_array() {
        let value = serde_json::json!(["wss://a.example.com", "wss://b.example.com"]);
        assert_eq!(extract_urls(&value).len(), 2);
    }

    #[test]
    fn extracts_urls_from_object_of_arrays() {
        let value = serde_json::json!({"clearnet": ["wss://a.example.com"], "tor": ["ws://x.onion"]});
        assert_eq!(extract_urls(&value).len(), 2);
    }

    #[test]
    fn nip11_extra_field_relays_array_is_read() {
        let mut doc = crate::types::Nip11Doc::default();
        doc.extra_fields.insert(
            "relays".to_string(),
            serde_json::json!(["wss://discovered.example.com"]),
        );
        assert_eq!(
            candidates_from_nip11_extra_fields(&doc),
            vec!["wss://discovered.example.com".to_string()]
        );
    }

    #[test]
    fn r_tags_are_collected_from_kind_10002_events() {
        let event = relay_list_event(&["wss://a.example.com", "wss://b.example.com"]);
        let mut found = HashSet::new();
        for tag in &event.tags {
            if tag.len() >= 2 && tag[0] == "r" {
                found.insert(tag[1].clone());
            }
        }
        assert_eq!(found.len(), 2);
    }
}
