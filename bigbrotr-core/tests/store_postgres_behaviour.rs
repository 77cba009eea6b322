use anyhow::Result;
use bigbrotr_core::store::postgres::PostgresStore;
use bigbrotr_core::store::Store;
use bigbrotr_core::types::{Event, Network, Nip11Doc, Nip66Result, RelayMetadataSnapshot};
use sqlx::PgPool;

const RELAY_URL: &str = "wss://relay.example.com";

fn fixture_event(id_byte: u8) -> Event {
    Event {
        id: hex::encode([id_byte; 32]),
        pubkey: hex::encode([0xABu8; 32]),
        created_at: 1_700_000_000,
        kind: 1,
        tags: vec![],
        content: "orphan cleanup fixture".to_string(),
        sig: hex::encode([0xCDu8; 64]),
    }
}

#[sqlx::test]
async fn orphan_events_cleanup_removes_unlinked_event_and_is_idempotent(pool: PgPool) -> Result<()> {
    let store = PostgresStore::from_pool(pool.clone());
    store.run_migrations().await?;

    let event = fixture_event(0x11);
    store.upsert_event(&event, RELAY_URL, 1_700_000_100).await?;

    let stored: (i64,) = sqlx::query_as("SELECT count(*) FROM events WHERE id = $1")
        .bind(&event.id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(stored.0, 1);

    // The event's only `events_relays` link is removed, making it an orphan.
    sqlx::query("DELETE FROM events_relays WHERE event_id = $1")
        .bind(&event.id)
        .execute(&pool)
        .await?;

    let removed = store.delete_orphan_events().await?;
    assert_eq!(removed, 1);

    let stored: (i64,) = sqlx::query_as("SELECT count(*) FROM events WHERE id = $1")
        .bind(&event.id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(stored.0, 0);

    let removed_again = store.delete_orphan_events().await?;
    assert_eq!(removed_again, 0);

    Ok(())
}

#[sqlx::test]
async fn orphan_events_cleanup_leaves_linked_events_alone(pool: PgPool) -> Result<()> {
    let store = PostgresStore::from_pool(pool.clone());
    store.run_migrations().await?;

    let event = fixture_event(0x22);
    store.upsert_event(&event, RELAY_URL, 1_700_000_100).await?;

    let removed = store.delete_orphan_events().await?;
    assert_eq!(removed, 0);

    let stored: (i64,) = sqlx::query_as("SELECT count(*) FROM events WHERE id = $1")
        .bind(&event.id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(stored.0, 1);

    Ok(())
}

#[sqlx::test]
async fn orphan_nip11_and_nip66_cleanup_removes_unreferenced_rows(pool: PgPool) -> Result<()> {
    let store = PostgresStore::from_pool(pool.clone());
    store.run_migrations().await?;
    store.upsert_relay(RELAY_URL, Network::Clearnet, 1_700_000_000).await?;

    let snapshot = RelayMetadataSnapshot {
        relay_url: RELAY_URL.to_string(),
        generated_at: 1_700_000_100,
        nip11: Some(Nip11Doc {
            name: Some("orphan-test relay".to_string()),
            ..Default::default()
        }),
        nip66: Some(Nip66Result {
            openable: Some(true),
            ..Default::default()
        }),
    };
    store.upsert_relay_metadata(&snapshot).await?;

    let nip11_count: (i64,) = sqlx::query_as("SELECT count(*) FROM nip11").fetch_one(&pool).await?;
    let nip66_count: (i64,) = sqlx::query_as("SELECT count(*) FROM nip66").fetch_one(&pool).await?;
    assert_eq!(nip11_count.0, 1);
    assert_eq!(nip66_count.0, 1);

    // Nothing is orphaned while the snapshot referencing them still exists.
    assert_eq!(store.delete_orphan_nip11().await?, 0);
    assert_eq!(store.delete_orphan_nip66().await?, 0);

    sqlx::query("DELETE FROM relay_metadata_snapshots WHERE relay_url = $1")
        .bind(RELAY_URL)
        .execute(&pool)
        .await?;

    assert_eq!(store.delete_orphan_nip11().await?, 1);
    assert_eq!(store.delete_orphan_nip66().await?, 1);

    // Re-running after the referencing rows are already gone is a no-op.
    assert_eq!(store.delete_orphan_nip11().await?, 0);
    assert_eq!(store.delete_orphan_nip66().await?, 0);

    Ok(())
}
