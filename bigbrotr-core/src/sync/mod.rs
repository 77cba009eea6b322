//! The relay-synchronization engine: window-stack algorithm with
//! adaptive splitting.
//!
//! A single `REQ(since, until, limit=batch_cap)` may be truncated by the
//! relay when more than `batch_cap` matching events exist in the window.
//! This engine maintains a stack of pending `until` boundaries and a
//! rolling `cursor_since`, narrowing the window by timestamp whenever a
//! batch comes back full, until every sub-interval has been swept.

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::SyncError;
use crate::events::validate_event;
use crate::relay_client::{Filter as WireFilter, RelayClient, RelayMessage};
use crate::store::Store;
use crate::types::Event;

/// Default floor on `filter.limit`.
pub const DEFAULT_MIN_LIMIT: u32 = 10;
/// Default bound on pagination iterations before declaring `stuck`.
pub const DEFAULT_MAX_ITERATIONS: u32 = 200;

#[derive(Debug, Clone)]
pub struct SyncFilter {
    pub since: i64,
    pub until: i64,
    pub kinds: Option<Vec<u32>>,
    pub authors: Option<Vec<String>>,
    pub ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCause {
    Completed,
    Deadline,
    Stuck { since: i64, until: i64 },
    FatalRelayError(String),
}

impl Default for TerminalCause {
    fn default() -> Self {
        TerminalCause::Completed
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub relay_url: String,
    pub events_seen: u64,
    pub events_new: u64,
    pub warnings: Vec<String>,
    pub terminal_cause: TerminalCause,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub min_limit: u32,
    pub max_iterations: u32,
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_limit: DEFAULT_MIN_LIMIT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// One batch of events read from a single `REQ`/`EOSE` round trip.
struct Batch {
    events: Vec<Event>,
    min_created_at: i64,
    max_created_at: i64,
    overflowed: bool,
}

/// Run the sync engine against `relay_url` for the given filter window.
/// Opens its own relay connection (the scoped-acquisition model from
/// the caller never sees or manages a connection handle) and guarantees the
/// connection is dropped — and thus closed — on every exit path, including
/// deadline expiry.
pub async fn sync(
    relay_client: &dyn RelayClient,
    store: &dyn Store,
    relay_url: &str,
    filter: SyncFilter,
    batch_cap: u32,
    deadline: Duration,
    config: &SyncConfig,
) -> SyncReport {
    let started = Instant::now();
    let deadline_instant = started + deadline;
    let mut report = SyncReport {
        relay_url: relay_url.to_string(),
        ..Default::default()
    };

    let conn_result = relay_client.open(relay_url, config.request_timeout).await;
    let mut conn = match conn_result {
        Ok(conn) => conn,
        Err(e) => {
            report.terminal_cause = TerminalCause::FatalRelayError(e.to_string());
            report.duration = started.elapsed();
            return report;
        }
    };

    let mut written_ids: HashSet<String> = HashSet::new();
    // Stack of pending `until` boundaries, narrowed from the right whenever
    // a batch comes back full.
    let mut until_stack: Vec<i64> = vec![filter.until];
    let mut cursor_since = filter.since;
    let mut iterations: u32 = 0;

    'outer: while let Some(&current_until) = until_stack.last() {
        iterations += 1;
        if iterations > config.max_iterations {
            report.terminal_cause = TerminalCause::Stuck {
                since: cursor_since,
                until: current_until,
            };
            break;
        }
        if cursor_since > current_until {
            until_stack.pop();
            continue;
        }

        let remaining = deadline_instant.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            report.terminal_cause = TerminalCause::Deadline;
            break;
        }

        let wire_filter = WireFilter {
            since: Some(cursor_since),
            until: Some(current_until),
            limit: Some(batch_cap),
            kinds: filter.kinds.clone(),
            authors: filter.authors.clone(),
            ids: filter.ids.clone(),
        };

        let batch = match tokio::time::timeout(remaining, read_batch(conn.as_mut(), wire_filter, batch_cap)).await {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => {
                report.warnings.push(format!("relay_misbehavior: {e}"));
                report.terminal_cause = TerminalCause::FatalRelayError(e.to_string());
                break 'outer;
            }
            Err(_) => {
                report.terminal_cause = TerminalCause::Deadline;
                break 'outer;
            }
        };

        if batch.overflowed {
            report.warnings.push("batch_overflow".to_string());
        }

        let now = crate::events::unix_now();
        let mut valid_events = Vec::with_capacity(batch.events.len());
        for event in &batch.events {
            match validate_event(event, now) {
                Ok(()) => valid_events.push(event.clone()),
                Err(reason) => report.warnings.push(format!("invalid_event: {reason}")),
            }
        }
        report.events_seen += batch.events.len() as u64;

        let count = batch.events.len() as u32;

        if count == 0 {
            // Empty batch: nothing exists in [cursor_since, current_until].
            // If this was the sole pending window (no narrowing in
            // progress), advance cursor_since past it; if it was a narrowed
            // sub-window pushed during a prior full-batch split, the outer
            // window already accounts for everything above it, so just
            // fall back to the restored outer `until` with cursor_since
            // unchanged.
            let was_sole_entry = until_stack.len() == 1;
            until_stack.pop();
            if was_sole_entry {
                cursor_since = current_until + 1;
            }
            continue;
        }

        if count < batch_cap {
            // Short batch: the relay served everything in this window.
            write_new_events(store, relay_url, &valid_events, now, &mut written_ids, &mut report).await;
            until_stack.pop();
            cursor_since = current_until + 1;
            continue;
        }

        // Full batch: the relay likely truncated.
        if batch.min_created_at < batch.max_created_at {
            let complete: Vec<Event> = valid_events
                .into_iter()
                .filter(|e| e.created_at < batch.max_created_at)
                .collect();
            write_new_events(store, relay_url, &complete, now, &mut written_ids, &mut report).await;
            until_stack.push(batch.max_created_at - 1);
            // cursor_since is not advanced; the narrowed window is swept next.
        } else {
            // Timestamp plateau: cannot split by time.
            write_new_events(store, relay_url, &valid_events, now, &mut written_ids, &mut report).await;
            report.warnings.push(format!(
                "timestamp_plateau: {} events at created_at={}",
                valid_events.len(),
                batch.max_created_at
            ));
            until_stack.pop();
            cursor_since = batch.max_created_at + 1;
        }
    }

    report.duration = started.elapsed();
    info!(
        relay_url,
        events_seen = report.events_seen,
        events_new = report.events_new,
        warnings = report.warnings.len(),
        terminal_cause = ?report.terminal_cause,
        duration_ms = report.duration.as_millis() as u64,
        "sync iteration complete"
    );
    report
}

/// Read one full batch: consume messages until `EOSE`, `CLOSED`, or the
/// stream ends, deduplicating by event id (relays can return duplicates,
///1 step 2), and hard-capping collection at `batch_cap`.
async fn read_batch(
    conn: &mut dyn crate::relay_client::RelayConnection,
    filter: WireFilter,
    batch_cap: u32,
) -> Result<Batch, SyncError> {
    let mut stream = conn
        .subscribe(filter)
        .await
        .map_err(|e| SyncError::RelayMisbehavior(e.to_string()))?;

    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut events: Vec<Event> = Vec::new();
    let mut overflowed = false;

    while let Some(message) = futures::StreamExt::next(&mut stream).await {
        match message {
            RelayMessage::Event(event) => {
                if events.len() >= batch_cap as usize {
                    overflowed = true;
                    continue;
                }
                if seen_ids.insert(event.id.clone()) {
                    events.push(event);
                }
            }
            RelayMessage::EndOfStoredEvents => break,
            RelayMessage::Closed(reason) => {
                if events.is_empty() {
                    return Err(SyncError::RelayMisbehavior(format!("closed before EOSE: {reason}")));
                }
                break;
            }
            RelayMessage::Notice(_) | RelayMessage::Ok { .. } => continue,
        }
    }

    let min_created_at = events.iter().map(|e| e.created_at).min().unwrap_or(0);
    let max_created_at = events.iter().map(|e| e.created_at).max().unwrap_or(0);

    Ok(Batch {
        events,
        min_created_at,
        max_created_at,
        overflowed,
    })
}

async fn write_new_events(
    store: &dyn Store,
    relay_url: &str,
    events: &[Event],
    seen_at: i64,
    written_ids: &mut HashSet<String>,
    report: &mut SyncReport,
) {
    if events.is_empty() {
        return;
    }
    match store.upsert_events_batch(events, relay_url, seen_at).await {
        Ok(()) => {
            for event in events {
                if written_ids.insert(event.id.clone()) {
                    report.events_new += 1;
                }
            }
        }
        Err(e) => {
            warn!(relay_url, error = %e, "failed to write event batch");
            report.warnings.push(format!("store_error: {e}"));
        }
    }
}
