//! Domain entities: Relay, Event, EventOnRelay, Nip11Doc, Nip66Result,
//! RelayMetadataSnapshot, ServiceState.

use serde::{Deserialize, Serialize};

/// The two network types a relay URL can resolve over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Clearnet,
    Tor,
}

impl Network {
    /// `network = tor` iff the host ends in `.onion`.
    pub fn classify(host: &str) -> Self {
        if host.ends_with(".onion") {
            Network::Tor
        } else {
            Network::Clearnet
        }
    }
}

/// A Nostr relay, identified by its normalized WebSocket URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    pub url: String,
    pub network: Network,
    pub inserted_at: i64,
}

/// A signed Nostr event. `id` and `sig` are lowercase hex as delivered on
/// the wire; validation happens in [`crate::events::validate_event`] before
/// a value of this type is ever constructed from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// An event's provenance at a relay: when we first saw it there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOnRelay {
    pub event_id: String,
    pub relay_url: String,
    pub seen_at: i64,
}

/// Structured `limitation` object of a NIP-11 document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nip11Limitation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_subscriptions: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_filters: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_subid_length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_event_tags: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_content_length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_pow_difficulty: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_required: Option<bool>,
}

/// A NIP-11 relay information document. Identity is the SHA-256 of its
/// canonical JSON encoding, so two relays serving byte-identical
/// documents share one row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nip11Doc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_nips: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limitation: Option<Nip11Limitation>,
    /// Fields present in the document that are outside the canonical set
    /// above. Preserved rather than discarded.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra_fields: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of a single NIP-66 reachability test. `None` means "not tested",
/// `Some(false)` means "tested and failed" — the two must never be
/// coalesced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nip66Result {
    pub openable: Option<bool>,
    pub readable: Option<bool>,
    pub writable: Option<bool>,
    pub rtt_open: Option<i64>,
    pub rtt_read: Option<i64>,
    pub rtt_write: Option<i64>,
}

/// A point-in-time metadata observation for one relay. Snapshots are
/// append-only; `nip11_id`/`nip66_id` reference content-addressed rows that
/// may be shared across many snapshots and relays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMetadataSnapshot {
    pub relay_url: String,
    pub generated_at: i64,
    pub nip11: Option<Nip11Doc>,
    pub nip66: Option<Nip66Result>,
}

/// Per-service persisted cursor/state, overwritten in place between
/// iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    pub service_name: String,
    pub state: serde_json::Value,
    pub updated_at: i64,
}
