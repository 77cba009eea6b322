//! The [`Store`] trait: the only gate to persisted state.
//!
//! Every write the sync engine, monitor probe, finder and scheduler perform
//! goes through this trait. Concrete backends (currently only
//! [`postgres::PostgresStore`]) own their own connection pool and never
//! share it across process boundaries.

pub mod postgres;

use futures::stream::BoxStream;

use crate::error::StoreError;
use crate::types::{Event, Network, RelayMetadataSnapshot};

/// Page size used by all cursor-based `list_*` queries.
pub const DEFAULT_PAGE_SIZE: i64 = 1_000;

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Idempotent relay insertion.
    async fn upsert_relay(&self, url: &str, network: Network, inserted_at: i64) -> Result<(), StoreError>;

    /// Atomic three-way upsert: event row, relay row (idempotent), and the
    /// event-relay link. Primary-key collisions on any of the three are
    /// no-ops, not errors.
    async fn upsert_event(&self, event: &Event, relay_url: &str, seen_at: i64) -> Result<(), StoreError>;

    /// Same as `upsert_event` but for a whole batch in a single transaction.
    /// Any constraint failure that is not a primary-key collision aborts the
    /// whole batch.
    async fn upsert_events_batch(
        &self,
        events: &[Event],
        relay_url: &str,
        seen_at: i64,
    ) -> Result<(), StoreError>;

    /// Computes and stores content hashes for the snapshot's `nip11`/`nip66`
    /// payloads (inserting them only if new), then inserts the snapshot row.
    async fn upsert_relay_metadata(&self, snapshot: &RelayMetadataSnapshot) -> Result<(), StoreError>;

    /// Relays eligible for the sync scheduler's working set: readable
    /// (latest NIP-66 `readable = true`) within `freshness_cutoff`,
    /// optionally shuffled. Streams rather than materializing the full
    /// result set.
    fn list_relays_for_sync<'a>(
        &'a self,
        freshness_cutoff: i64,
        readable_only: bool,
        shuffle: bool,
    ) -> BoxStream<'a, Result<crate::types::Relay, StoreError>>;

    /// Relays eligible for a metadata probe: those whose latest snapshot
    /// predates `freshness_cutoff`, or that have never been probed.
    fn list_relays_for_metadata<'a>(
        &'a self,
        freshness_cutoff: i64,
    ) -> BoxStream<'a, Result<crate::types::Relay, StoreError>>;

    /// The max `created_at` of any event linked to `relay_url`, the sync
    /// resume point.
    async fn get_last_seen_created_at(&self, relay_url: &str) -> Result<Option<i64>, StoreError>;

    /// Stored events of a given `kind`, streamed. Used by the finder to mine
    /// kind-10002 relay-list events for `r` tags.
    fn list_events_by_kind<'a>(&'a self, kind: u32) -> BoxStream<'a, Result<Event, StoreError>>;

    async fn load_service_state(&self, service_name: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn save_service_state(
        &self,
        service_name: &str,
        state: &serde_json::Value,
        updated_at: i64,
    ) -> Result<(), StoreError>;

    /// Remove events with zero remaining `EventOnRelay` links. Returns the
    /// number of rows removed.
    async fn delete_orphan_events(&self) -> Result<u64, StoreError>;

    /// Remove `nip11` rows no longer referenced by any snapshot.
    async fn delete_orphan_nip11(&self) -> Result<u64, StoreError>;

    /// Remove `nip66` rows no longer referenced by any snapshot.
    async fn delete_orphan_nip66(&self) -> Result<u64, StoreError>;
}
