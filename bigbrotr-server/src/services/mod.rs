//! Concrete [`ServiceKind`] wiring for `sync`, `priority-sync`, and
//! `monitor`; a standalone driver for `finder` (whose unit of work is the
//! whole relay-list/directory set, not one relay at a time, so it does not
//! fit the `ServiceKind` per-relay shape); and the one-shot `initializer`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bigbrotr_config::Config;
use bigbrotr_core::error::StoreError;
use bigbrotr_core::finder::{self, FinderConfig};
use bigbrotr_core::http_fetcher::HttpFetcher;
use bigbrotr_core::monitor;
use bigbrotr_core::relay_client::RelayClient;
use bigbrotr_core::scheduler::ServiceKind;
use bigbrotr_core::shutdown::ShutdownWatch;
use bigbrotr_core::store::postgres::PostgresStore;
use bigbrotr_core::store::Store;
use bigbrotr_core::sync::{self, SyncConfig, SyncFilter};
use bigbrotr_core::types::{Network, Relay};
use futures::stream::BoxStream;

const RELAY_LIST_METADATA_KIND: u32 = 10_002;
/// Events requested per `REQ` round trip; large enough that most relays
/// never hit the truncation path in one sync pass.
const SYNC_BATCH_CAP: u32 = 500;

pub struct SyncServiceKind {
    pub relay_client: Arc<dyn RelayClient>,
    pub freshness_cutoff_secs: i64,
    pub request_timeout: Duration,
    pub relay_deadline: Duration,
    pub max_iterations: u32,
    pub min_limit: u32,
}

#[async_trait]
impl ServiceKind for SyncServiceKind {
    fn name(&self) -> &str {
        "sync"
    }

    fn working_set<'a>(&'a self, store: &'a dyn Store) -> BoxStream<'a, Result<Relay, StoreError>> {
        let cutoff = bigbrotr_core::events::unix_now() - self.freshness_cutoff_secs;
        store.list_relays_for_sync(cutoff, true, true)
    }

    async fn process_one(&self, store: &dyn Store, relay: &Relay) -> anyhow::Result<()> {
        run_sync_for_relay(
            self.relay_client.as_ref(),
            store,
            relay,
            SYNC_BATCH_CAP,
            self.relay_deadline,
            &SyncConfig {
                min_limit: self.min_limit,
                max_iterations: self.max_iterations,
                request_timeout: self.request_timeout,
            },
        )
        .await
    }
}

/// Syncs only the operator-configured priority relay list rather than
/// `Store::list_relays_for_sync`'s general working set.
pub struct PrioritySyncServiceKind {
    pub relay_client: Arc<dyn RelayClient>,
    pub relay_urls: Vec<String>,
    pub request_timeout: Duration,
    pub relay_deadline: Duration,
    pub max_iterations: u32,
    pub min_limit: u32,
}

#[async_trait]
impl ServiceKind for PrioritySyncServiceKind {
    fn name(&self) -> &str {
        "priority-sync"
    }

    fn working_set<'a>(&'a self, _store: &'a dyn Store) -> BoxStream<'a, Result<Relay, StoreError>> {
        let now = bigbrotr_core::events::unix_now();
        let relays: Vec<Result<Relay, StoreError>> = self
            .relay_urls
            .iter()
            .map(|url| {
                let host = url::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string));
                let network = host.as_deref().map(Network::classify).unwrap_or(Network::Clearnet);
                Ok(Relay {
                    url: url.clone(),
                    network,
                    inserted_at: now,
                })
            })
            .collect();
        Box::pin(futures::stream::iter(relays))
    }

    async fn process_one(&self, store: &dyn Store, relay: &Relay) -> anyhow::Result<()> {
        run_sync_for_relay(
            self.relay_client.as_ref(),
            store,
            relay,
            SYNC_BATCH_CAP,
            self.relay_deadline,
            &SyncConfig {
                min_limit: self.min_limit,
                max_iterations: self.max_iterations,
                request_timeout: self.request_timeout,
            },
        )
        .await
    }
}

async fn run_sync_for_relay(
    relay_client: &dyn RelayClient,
    store: &dyn Store,
    relay: &Relay,
    batch_cap: u32,
    relay_deadline: Duration,
    config: &SyncConfig,
) -> anyhow::Result<()> {
    let since = store.get_last_seen_created_at(&relay.url).await?.map(|t| t + 1).unwrap_or(0);
    let until = bigbrotr_core::events::unix_now();
    let filter = SyncFilter {
        since,
        until,
        kinds: None,
        authors: None,
        ids: None,
    };
    let report = sync::sync(relay_client, store, &relay.url, filter, batch_cap, relay_deadline, config).await;
    if let sync::TerminalCause::FatalRelayError(reason) = &report.terminal_cause {
        anyhow::bail!("relay {}: {}", relay.url, reason);
    }
    Ok(())
}

pub struct MonitorServiceKind {
    pub relay_client: Arc<dyn RelayClient>,
    pub freshness_cutoff_secs: i64,
    pub request_timeout: Duration,
}

#[async_trait]
impl ServiceKind for MonitorServiceKind {
    fn name(&self) -> &str {
        "monitor"
    }

    fn working_set<'a>(&'a self, store: &'a dyn Store) -> BoxStream<'a, Result<Relay, StoreError>> {
        let cutoff = bigbrotr_core::events::unix_now() - self.freshness_cutoff_secs;
        store.list_relays_for_metadata(cutoff)
    }

    async fn process_one(&self, store: &dyn Store, relay: &Relay) -> anyhow::Result<()> {
        let snapshot = monitor::probe(self.relay_client.as_ref(), &relay.url, self.request_timeout).await;
        store.upsert_relay_metadata(&snapshot).await?;
        Ok(())
    }
}

/// Runs the finder on its own timer rather than through `run_service`: its
/// unit of work is the entire stored kind-10002 set plus the configured
/// directory URLs, not one relay at a time.
pub async fn run_finder_service(
    store: Arc<dyn Store>,
    fetcher: Arc<dyn HttpFetcher>,
    config: FinderConfig,
    loop_interval: Duration,
    mut shutdown: ShutdownWatch,
) {
    use futures::StreamExt;

    while !shutdown.is_triggered() {
        let now = bigbrotr_core::events::unix_now();
        let mut relay_list_events = Vec::new();
        let mut stream = store.list_events_by_kind(RELAY_LIST_METADATA_KIND);
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => relay_list_events.push(event),
                Err(e) => {
                    tracing::warn!(error = %e, "failed reading stored relay-list events");
                    break;
                }
            }
        }
        drop(stream);

        match finder::discover(store.as_ref(), fetcher.as_ref(), &relay_list_events, &config, now).await {
            Ok(accepted) => tracing::info!(count = accepted.len(), "finder iteration complete"),
            Err(e) => tracing::warn!(error = %e, "finder iteration failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(loop_interval) => {}
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Applies schema migrations and seeds the relay table from
/// `config.initializer.seed_file`, if configured. Runs once at startup,
/// never on the scheduler's repeating loop.
pub async fn run_initializer(store: &PostgresStore, config: &Config) -> anyhow::Result<()> {
    store.run_migrations().await?;

    let Some(seed_file) = &config.initializer.seed_file else {
        return Ok(());
    };

    let contents = std::fs::read_to_string(seed_file)?;
    let now = bigbrotr_core::events::unix_now();
    let mut seeded = 0u32;
    for line in contents.lines() {
        let url = line.trim();
        if url.is_empty() || url.starts_with('#') {
            continue;
        }
        match bigbrotr_core::url_safety::validate_relay_url(url, &config.finder.url_blocklist) {
            Ok(parsed) => {
                let host = parsed.host_str().unwrap_or_default();
                let network = Network::classify(host);
                store.upsert_relay(&parsed.to_string(), network, now).await?;
                seeded += 1;
            }
            Err(reason) => {
                tracing::warn!(url, %reason, "rejected seed relay url");
            }
        }
    }
    tracing::info!(seeded, seed_file, "relay table seeded");
    Ok(())
}
