//! The monitor probe: NIP-11 fetch plus a NIP-66 reachability/RTT
//! test, producing one [`RelayMetadataSnapshot`] per relay.

use std::time::{Duration, Instant};

use nostr::{EventBuilder, Keys};

use crate::relay_client::{Filter, RelayClient, RelayMessage};
use crate::types::{Nip66Result, RelayMetadataSnapshot};

/// Probe `relay_url`, producing a snapshot. Never returns an error for a
/// single failed stage — a failed stage is recorded as `false`/`null` on the
/// snapshot, not a `ProbeError` (those are reserved for failures that
/// prevent producing a snapshot at all, which this function has none of).
pub async fn probe(relay_client: &dyn RelayClient, relay_url: &str, request_timeout: Duration) -> RelayMetadataSnapshot {
    let generated_at = crate::events::unix_now();

    let nip11 = relay_client
        .fetch_nip11(relay_url, request_timeout)
        .await
        .unwrap_or(None);

    let nip66 = probe_nip66(relay_client, relay_url, request_timeout).await;

    RelayMetadataSnapshot {
        relay_url: relay_url.to_string(),
        generated_at,
        nip11,
        nip66: Some(nip66),
    }
}

/// Three-stage reachability test: open, read (REQ/EOSE round trip), write
/// (publish an ephemeral kind-1 event and await OK/NOTICE). A failed stage
/// short-circuits the remaining ones with `false`/`null`.
async fn probe_nip66(relay_client: &dyn RelayClient, relay_url: &str, request_timeout: Duration) -> Nip66Result {
    let mut result = Nip66Result::default();

    let open_started = Instant::now();
    let conn = match relay_client.open(relay_url, request_timeout).await {
        Ok(conn) => conn,
        Err(_) => {
            result.openable = Some(false);
            return result;
        }
    };
    result.openable = Some(true);
    result.rtt_open = Some(open_started.elapsed().as_millis() as i64);

    let mut conn = conn;

    let read_started = Instant::now();
    let read_ok = tokio::time::timeout(request_timeout, read_probe(conn.as_mut())).await;
    match read_ok {
        Ok(Ok(())) => {
            result.readable = Some(true);
            result.rtt_read = Some(read_started.elapsed().as_millis() as i64);
        }
        _ => {
            result.readable = Some(false);
            return result;
        }
    }

    let write_started = Instant::now();
    let write_ok = tokio::time::timeout(request_timeout, write_probe(conn.as_mut())).await;
    match write_ok {
        Ok(Ok(())) => {
            result.writable = Some(true);
            result.rtt_write = Some(write_started.elapsed().as_millis() as i64);
        }
        _ => {
            result.writable = Some(false);
        }
    }

    result
}

async fn read_probe(conn: &mut dyn crate::relay_client::RelayConnection) -> Result<(), ()> {
    let filter = Filter {
        limit: Some(1),
        ..Default::default()
    };
    let mut stream = conn.subscribe(filter).await.map_err(|_| ())?;
    loop {
        match futures::StreamExt::next(&mut stream).await {
            Some(RelayMessage::EndOfStoredEvents) => return Ok(()),
            Some(RelayMessage::Event(_)) => continue,
            Some(_) => continue,
            None => return Err(()),
        }
    }
}

async fn write_probe(conn: &mut dyn crate::relay_client::RelayConnection) -> Result<(), ()> {
    let keys = Keys::generate();
    let builder = EventBuilder::text_note("bigbrotr reachability probe");
    let signed = builder.sign_with_keys(&keys).map_err(|_| ())?;

    let event = crate::types::Event {
        id: signed.id.to_hex(),
        pubkey: signed.pubkey.to_hex(),
        created_at: signed.created_at.as_u64() as i64,
        kind: signed.kind.as_u16() as u32,
        tags: vec![],
        content: signed.content.clone(),
        sig: signed.sig.to_string(),
    };

    match conn.publish(&event).await {
        Ok(RelayMessage::Ok { accepted: true, .. }) => Ok(()),
        Ok(RelayMessage::Ok { accepted: false, .. }) => Ok(()),
        _ => Err(()),
    }
}
