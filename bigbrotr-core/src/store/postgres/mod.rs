//! PostgreSQL implementation of [`Store`].
//!
//! A `PgPool` wrapped in a thin struct, `.map_err` into a typed error at
//! every call site, and batch writes chunked inside one transaction.
//! Queries use runtime `sqlx::query`/`query_as` rather than the `query!`
//! macro family: the macros need either a live database or a checked-in
//! offline cache at build time, neither of which this workspace carries.

mod schema;

use std::time::Duration;

use async_stream::try_stream;
use futures::stream::BoxStream;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::types::{Event, Network, Relay, RelayMetadataSnapshot};

use super::{Store, DEFAULT_PAGE_SIZE};

const EVENT_BATCH_CHUNK_SIZE: usize = 200;

#[derive(Debug, Clone)]
pub struct PostgresStoreConfig {
    pub database_url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

impl Default for PostgresStoreConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            min_connections: 2,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(60),
        }
    }
}

/// One `PostgresStore` per worker process; the pool it owns is never shared
/// across process boundaries.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(config: &PostgresStoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(StoreError::classify)?;
        Ok(Self { pool })
    }

    /// Applies the embedded schema. Called once by the `initializer`
    /// service, never by sync/monitor/finder workers.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        for (name, ddl) in schema::MIGRATIONS {
            sqlx::raw_sql(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    tracing::error!(migration = name, error = %e, "schema migration failed");
                    StoreError::classify(e)
                })?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Wraps an already-connected pool. Used by integration tests that get
    /// their pool from `#[sqlx::test]` rather than a `database_url`.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn relay_from_row(row: &PgRow) -> Result<Relay, StoreError> {
    let url: String = row.try_get("url").map_err(StoreError::classify)?;
    let network_str: String = row.try_get("network").map_err(StoreError::classify)?;
    let inserted_at: i64 = row.try_get("inserted_at").map_err(StoreError::classify)?;
    let network = match network_str.as_str() {
        "tor" => Network::Tor,
        _ => Network::Clearnet,
    };
    Ok(Relay {
        url,
        network,
        inserted_at,
    })
}

fn event_from_row(row: &PgRow) -> Result<Event, StoreError> {
    let id: String = row.try_get("id").map_err(StoreError::classify)?;
    let pubkey: String = row.try_get("pubkey").map_err(StoreError::classify)?;
    let created_at: i64 = row.try_get("created_at").map_err(StoreError::classify)?;
    let kind: i32 = row.try_get("kind").map_err(StoreError::classify)?;
    let tags: serde_json::Value = row.try_get("tags").map_err(StoreError::classify)?;
    let content: String = row.try_get("content").map_err(StoreError::classify)?;
    let sig: String = row.try_get("sig").map_err(StoreError::classify)?;
    let tags: Vec<Vec<String>> = serde_json::from_value(tags)?;
    Ok(Event {
        id,
        pubkey,
        created_at,
        kind: kind as u32,
        tags,
        content,
        sig,
    })
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn upsert_relay(&self, url: &str, network: Network, inserted_at: i64) -> Result<(), StoreError> {
        let network_str = match network {
            Network::Clearnet => "clearnet",
            Network::Tor => "tor",
        };
        crate::retry::RetryPolicy::default()
            .run(|| async {
                sqlx::query(
                    "INSERT INTO relays (url, network, inserted_at) VALUES ($1, $2, $3)
                     ON CONFLICT (url) DO NOTHING",
                )
                .bind(url)
                .bind(network_str)
                .bind(inserted_at)
                .execute(&self.pool)
                .await
                .map_err(StoreError::classify)?;
                Ok(())
            })
            .await
    }

    async fn upsert_event(&self, event: &Event, relay_url: &str, seen_at: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::classify)?;
        ensure_relay_exists(&mut tx, relay_url, seen_at).await?;
        insert_event_in_transaction(&mut tx, event).await?;
        link_event_to_relay(&mut tx, &event.id, relay_url, seen_at).await?;
        tx.commit().await.map_err(StoreError::classify)?;
        Ok(())
    }

    async fn upsert_events_batch(
        &self,
        events: &[Event],
        relay_url: &str,
        seen_at: i64,
    ) -> Result<(), StoreError> {
        for chunk in events.chunks(EVENT_BATCH_CHUNK_SIZE) {
            let mut tx = self.pool.begin().await.map_err(StoreError::classify)?;
            ensure_relay_exists(&mut tx, relay_url, seen_at).await?;
            for event in chunk {
                insert_event_in_transaction(&mut tx, event).await?;
                link_event_to_relay(&mut tx, &event.id, relay_url, seen_at).await?;
            }
            tx.commit().await.map_err(StoreError::classify)?;
        }
        Ok(())
    }

    async fn upsert_relay_metadata(&self, snapshot: &RelayMetadataSnapshot) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::classify)?;

        let nip11_id = match &snapshot.nip11 {
            Some(doc) => {
                let id = crate::dedup::nip11_id(doc)?;
                let payload = serde_json::to_value(doc)?;
                sqlx::query("INSERT INTO nip11 (id, document) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
                    .bind(&id)
                    .bind(payload)
                    .execute(&mut *tx)
                    .await
                    .map_err(StoreError::classify)?;
                Some(id)
            }
            None => None,
        };

        let nip66_id = match &snapshot.nip66 {
            Some(result) => {
                let id = crate::dedup::nip66_id(result)?;
                let payload = serde_json::to_value(result)?;
                sqlx::query("INSERT INTO nip66 (id, result) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
                    .bind(&id)
                    .bind(payload)
                    .execute(&mut *tx)
                    .await
                    .map_err(StoreError::classify)?;
                Some(id)
            }
            None => None,
        };

        sqlx::query(
            "INSERT INTO relay_metadata_snapshots (relay_url, generated_at, nip11_id, nip66_id)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (relay_url, generated_at) DO NOTHING",
        )
        .bind(&snapshot.relay_url)
        .bind(snapshot.generated_at)
        .bind(&nip11_id)
        .bind(&nip66_id)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::classify)?;

        tx.commit().await.map_err(StoreError::classify)?;
        Ok(())
    }

    fn list_relays_for_sync<'a>(
        &'a self,
        freshness_cutoff: i64,
        readable_only: bool,
        shuffle: bool,
    ) -> BoxStream<'a, Result<Relay, StoreError>> {
        let pool = self.pool.clone();
        Box::pin(try_stream! {
            let mut last_url = String::new();
            loop {
                let rows = sqlx::query(
                    "SELECT r.url AS url, r.network AS network, r.inserted_at AS inserted_at
                     FROM (
                         SELECT DISTINCT ON (s.relay_url) s.relay_url, n66.result AS nip66_result
                         FROM relay_metadata_snapshots s
                         LEFT JOIN nip66 n66 ON n66.id = s.nip66_id
                         WHERE s.generated_at > $1
                         ORDER BY s.relay_url, s.generated_at DESC
                     ) latest
                     JOIN relays r ON r.url = latest.relay_url
                     WHERE latest.relay_url > $2
                       AND ($3 = false OR (latest.nip66_result->>'readable')::boolean = true)
                     ORDER BY latest.relay_url
                     LIMIT $4",
                )
                .bind(freshness_cutoff)
                .bind(&last_url)
                .bind(readable_only)
                .bind(DEFAULT_PAGE_SIZE)
                .fetch_all(&pool)
                .await
                .map_err(StoreError::classify)?;

                if rows.is_empty() {
                    break;
                }

                let mut page: Vec<Relay> = Vec::with_capacity(rows.len());
                for row in &rows {
                    page.push(relay_from_row(row)?);
                }
                last_url = page.last().map(|r| r.url.clone()).unwrap_or(last_url);

                if shuffle {
                    use rand::seq::SliceRandom;
                    page.shuffle(&mut rand::rng());
                }

                for relay in page {
                    yield relay;
                }
            }
        })
    }

    fn list_relays_for_metadata<'a>(
        &'a self,
        freshness_cutoff: i64,
    ) -> BoxStream<'a, Result<Relay, StoreError>> {
        let pool = self.pool.clone();
        Box::pin(try_stream! {
            let mut last_url = String::new();
            loop {
                let rows = sqlx::query(
                    "SELECT r.url AS url, r.network AS network, r.inserted_at AS inserted_at
                     FROM relays r
                     LEFT JOIN LATERAL (
                         SELECT s.generated_at
                         FROM relay_metadata_snapshots s
                         WHERE s.relay_url = r.url
                         ORDER BY s.generated_at DESC
                         LIMIT 1
                     ) latest ON true
                     WHERE r.url > $1
                       AND (latest.generated_at IS NULL OR latest.generated_at <= $2)
                     ORDER BY r.url
                     LIMIT $3",
                )
                .bind(&last_url)
                .bind(freshness_cutoff)
                .bind(DEFAULT_PAGE_SIZE)
                .fetch_all(&pool)
                .await
                .map_err(StoreError::classify)?;

                if rows.is_empty() {
                    break;
                }

                for row in &rows {
                    let relay = relay_from_row(row)?;
                    last_url = relay.url.clone();
                    yield relay;
                }
            }
        })
    }

    async fn get_last_seen_created_at(&self, relay_url: &str) -> Result<Option<i64>, StoreError> {
        let row: Option<(Option<i64>,)> = sqlx::query_as(
            "SELECT MAX(e.created_at)
             FROM events_relays er
             JOIN events e ON e.id = er.event_id
             WHERE er.relay_url = $1",
        )
        .bind(relay_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(row.and_then(|(v,)| v))
    }

    fn list_events_by_kind<'a>(&'a self, kind: u32) -> BoxStream<'a, Result<Event, StoreError>> {
        let pool = self.pool.clone();
        Box::pin(try_stream! {
            let mut last_id = String::new();
            loop {
                let rows = sqlx::query(
                    "SELECT id, pubkey, created_at, kind, tags, content, sig
                     FROM events
                     WHERE kind = $1 AND id > $2
                     ORDER BY id
                     LIMIT $3",
                )
                .bind(kind as i32)
                .bind(&last_id)
                .bind(DEFAULT_PAGE_SIZE)
                .fetch_all(&pool)
                .await
                .map_err(StoreError::classify)?;

                if rows.is_empty() {
                    break;
                }

                for row in &rows {
                    let event = event_from_row(row)?;
                    last_id = event.id.clone();
                    yield event;
                }
            }
        })
    }

    async fn load_service_state(&self, service_name: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT state FROM service_state WHERE service_name = $1")
                .bind(service_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::classify)?;
        Ok(row.map(|(v,)| v))
    }

    async fn save_service_state(
        &self,
        service_name: &str,
        state: &serde_json::Value,
        updated_at: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO service_state (service_name, state, updated_at) VALUES ($1, $2, $3)
             ON CONFLICT (service_name) DO UPDATE SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at",
        )
        .bind(service_name)
        .bind(state)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(())
    }

    async fn delete_orphan_events(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM events e
             WHERE NOT EXISTS (SELECT 1 FROM events_relays er WHERE er.event_id = e.id)",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(result.rows_affected())
    }

    async fn delete_orphan_nip11(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM nip11 n
             WHERE NOT EXISTS (
                 SELECT 1 FROM relay_metadata_snapshots s WHERE s.nip11_id = n.id
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(result.rows_affected())
    }

    async fn delete_orphan_nip66(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM nip66 n
             WHERE NOT EXISTS (
                 SELECT 1 FROM relay_metadata_snapshots s WHERE s.nip66_id = n.id
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(result.rows_affected())
    }
}

/// Ensures the relay row backing an `events_relays` foreign key exists.
/// Part of `upsert_event`'s three-way atomic write: the relay side
/// is idempotent and never overwrites an existing `inserted_at`.
async fn ensure_relay_exists(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    relay_url: &str,
    inserted_at: i64,
) -> Result<(), StoreError> {
    let network = url::Url::parse(relay_url)
        .ok()
        .and_then(|u| u.host_str().map(Network::classify))
        .unwrap_or(Network::Clearnet);
    let network_str = match network {
        Network::Clearnet => "clearnet",
        Network::Tor => "tor",
    };
    sqlx::query(
        "INSERT INTO relays (url, network, inserted_at) VALUES ($1, $2, $3)
         ON CONFLICT (url) DO NOTHING",
    )
    .bind(relay_url)
    .bind(network_str)
    .bind(inserted_at)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::classify)?;
    Ok(())
}

async fn insert_event_in_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &Event,
) -> Result<(), StoreError> {
    let tags = serde_json::to_value(&event.tags)?;
    sqlx::query(
        "INSERT INTO events (id, pubkey, created_at, kind, tags, content, sig)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(&event.id)
    .bind(&event.pubkey)
    .bind(event.created_at)
    .bind(event.kind as i32)
    .bind(tags)
    .bind(&event.content)
    .bind(&event.sig)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::classify)?;
    Ok(())
}

async fn link_event_to_relay(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_id: &str,
    relay_url: &str,
    seen_at: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO events_relays (event_id, relay_url, seen_at) VALUES ($1, $2, $3)
         ON CONFLICT (event_id, relay_url) DO NOTHING",
    )
    .bind(event_id)
    .bind(relay_url)
    .bind(seen_at)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::classify)?;
    Ok(())
}
