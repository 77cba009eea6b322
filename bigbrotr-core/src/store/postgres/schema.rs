//! Embedded schema DDL, applied once by the `initializer` service.

/// Applied in order. Kept as one string per statement group so the
/// initializer can log which group failed.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("relays", RELAYS),
    ("events", EVENTS),
    ("events_relays", EVENTS_RELAYS),
    ("nip11", NIP11),
    ("nip66", NIP66),
    ("relay_metadata_snapshots", RELAY_METADATA_SNAPSHOTS),
    ("service_state", SERVICE_STATE),
];

const RELAYS: &str = r#"
CREATE TABLE IF NOT EXISTS relays (
    url TEXT PRIMARY KEY,
    network TEXT NOT NULL CHECK (network IN ('clearnet', 'tor')),
    inserted_at BIGINT NOT NULL
);
"#;

const EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    pubkey TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    kind INTEGER NOT NULL,
    tags JSONB NOT NULL,
    content TEXT NOT NULL,
    sig TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS events_pubkey_created_at_idx ON events (pubkey, created_at DESC);
CREATE INDEX IF NOT EXISTS events_kind_idx ON events (kind);
"#;

const EVENTS_RELAYS: &str = r#"
CREATE TABLE IF NOT EXISTS events_relays (
    event_id TEXT NOT NULL REFERENCES events (id) ON DELETE CASCADE,
    relay_url TEXT NOT NULL REFERENCES relays (url) ON DELETE CASCADE,
    seen_at BIGINT NOT NULL,
    PRIMARY KEY (event_id, relay_url)
);
CREATE INDEX IF NOT EXISTS events_relays_relay_event_idx ON events_relays (relay_url, event_id);
CREATE INDEX IF NOT EXISTS events_relays_relay_seen_idx ON events_relays (relay_url, seen_at DESC);
"#;

const NIP11: &str = r#"
CREATE TABLE IF NOT EXISTS nip11 (
    id TEXT PRIMARY KEY,
    document JSONB NOT NULL
);
"#;

const NIP66: &str = r#"
CREATE TABLE IF NOT EXISTS nip66 (
    id TEXT PRIMARY KEY,
    result JSONB NOT NULL
);
"#;

const RELAY_METADATA_SNAPSHOTS: &str = r#"
CREATE TABLE IF NOT EXISTS relay_metadata_snapshots (
    relay_url TEXT NOT NULL REFERENCES relays (url) ON DELETE CASCADE,
    generated_at BIGINT NOT NULL,
    nip11_id TEXT REFERENCES nip11 (id),
    nip66_id TEXT REFERENCES nip66 (id),
    PRIMARY KEY (relay_url, generated_at)
);
CREATE INDEX IF NOT EXISTS relay_metadata_snapshots_url_generated_idx
    ON relay_metadata_snapshots (relay_url, generated_at DESC);
-- partial index backing list_relays_for_sync's `readable = true` filter;
-- readability lives inside the nip66 JSONB payload, so this is a functional
-- index over the join rather than a plain column index.
CREATE INDEX IF NOT EXISTS relay_metadata_snapshots_generated_idx
    ON relay_metadata_snapshots (generated_at DESC);
"#;

const SERVICE_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS service_state (
    service_name TEXT PRIMARY KEY,
    state JSONB NOT NULL,
    updated_at BIGINT NOT NULL
);
"#;
