//! CLI entrypoint: parses the service subcommand, loads and validates
//! configuration, wires up the store/relay-client/fetcher collaborators, and
//! dispatches to the requested service.

mod health;
mod services;

use std::sync::Arc;

use anyhow::Context;
use bigbrotr_config::{Cli, Service};
use bigbrotr_core::finder::FinderConfig;
use bigbrotr_core::http_fetcher::ReqwestFetcher;
use bigbrotr_core::relay_client::ws::{WsRelayClient, WsRelayClientConfig};
use bigbrotr_core::relay_client::RelayClient;
use bigbrotr_core::scheduler::{run_service, SchedulerConfig};
use bigbrotr_core::shutdown::Shutdown;
use bigbrotr_core::store::postgres::{PostgresStore, PostgresStoreConfig};
use bigbrotr_core::store::Store;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const USER_AGENT: &str = concat!("bigbrotr/", env!("CARGO_PKG_VERSION"));

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bigbrotr_server=info,bigbrotr_core=info,bigbrotr_config=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = bigbrotr_config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let warnings = bigbrotr_config::validate(&config).context("configuration failed guard-rail validation")?;
    for warning in &warnings {
        tracing::warn!("{}", warning.0);
    }

    let shutdown = Shutdown::new();
    shutdown.install_signal_handlers().context("failed to install signal handlers")?;

    let store = PostgresStore::connect(&PostgresStoreConfig {
        database_url: config.database.url.clone(),
        min_connections: config.database.min_connections,
        max_connections: config.database.max_connections,
        acquire_timeout: config.database.acquire_timeout,
        statement_timeout: config.database.statement_timeout,
    })
    .await
    .context("failed to connect to the database")?;

    if cli.service == Service::Initializer {
        services::run_initializer(&store, &config).await?;
        tracing::info!("initializer complete");
        return Ok(());
    }

    let readiness = health::Readiness::new();
    readiness.mark_db_connected();

    let relay_client: Arc<dyn RelayClient> = Arc::new(
        WsRelayClient::new(WsRelayClientConfig {
            socks5_proxy: config.socks5_proxy.clone(),
            url_blocklist: config.finder.url_blocklist.clone(),
            user_agent: USER_AGENT.to_string(),
        })
        .context("failed to build relay client")?,
    );
    let fetcher: Arc<dyn bigbrotr_core::http_fetcher::HttpFetcher> =
        Arc::new(ReqwestFetcher::new(config.socks5_proxy.as_deref()).context("failed to build HTTP fetcher")?);

    let health_router = health::router(readiness.clone(), config.health.bearer_token.clone());
    let health_listener = tokio::net::TcpListener::bind(&config.health.bind_address)
        .await
        .with_context(|| format!("failed to bind health endpoint on {}", config.health.bind_address))?;
    let mut health_shutdown = shutdown.watch();
    let health_handle = tokio::spawn(async move {
        let serve = axum::serve(health_listener, health_router).with_graceful_shutdown(async move {
            health_shutdown.cancelled().await;
        });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "health endpoint server failed");
        }
    });

    let store: Arc<dyn Store> = Arc::new(store);

    match cli.service {
        Service::Initializer => unreachable!("handled above"),
        Service::Sync => {
            readiness.mark_enqueued();
            let kind = Arc::new(services::SyncServiceKind {
                relay_client,
                freshness_cutoff_secs: config.sync.freshness_cutoff_secs,
                request_timeout: config.sync.request_timeout,
                relay_deadline: config.sync.relay_deadline,
                max_iterations: config.sync.max_iterations,
                min_limit: config.sync.min_limit,
            });
            run_service(kind, store, scheduler_config(&config), shutdown.watch()).await;
        }
        Service::PrioritySync => {
            readiness.mark_enqueued();
            let kind = Arc::new(services::PrioritySyncServiceKind {
                relay_client,
                relay_urls: config.priority_sync.relay_urls.clone(),
                request_timeout: config.sync.request_timeout,
                relay_deadline: config.sync.relay_deadline,
                max_iterations: config.sync.max_iterations,
                min_limit: config.sync.min_limit,
            });
            run_service(kind, store, scheduler_config(&config), shutdown.watch()).await;
        }
        Service::Monitor => {
            readiness.mark_enqueued();
            let kind = Arc::new(services::MonitorServiceKind {
                relay_client,
                freshness_cutoff_secs: config.monitor.freshness_cutoff_secs,
                request_timeout: config.monitor.request_timeout,
            });
            let scheduler_config = SchedulerConfig {
                worker_count: config.monitor.worker_count,
                worker_concurrency: config.monitor.worker_concurrency,
                channel_capacity: config.monitor.worker_count.max(1) * config.monitor.worker_concurrency.max(1),
                task_deadline: config.monitor.probe_deadline,
                loop_interval: config.monitor.loop_interval,
            };
            run_service(kind, store, scheduler_config, shutdown.watch()).await;
        }
        Service::Finder => {
            readiness.mark_enqueued();
            services::run_finder_service(
                store,
                fetcher,
                FinderConfig {
                    directory_urls: config.finder.directory_urls.clone(),
                    url_blocklist: config.finder.url_blocklist.clone(),
                    scan_nip11_extra_fields: config.finder.scan_nip11_extra_fields,
                },
                config.finder.loop_interval,
                shutdown.watch(),
            )
            .await;
        }
    }

    shutdown.trigger();
    let _ = health_handle.await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn scheduler_config(config: &bigbrotr_config::Config) -> SchedulerConfig {
    SchedulerConfig {
        worker_count: config.sync.worker_count,
        worker_concurrency: config.sync.worker_concurrency,
        channel_capacity: config.sync.worker_count.max(1) * config.sync.worker_concurrency.max(1),
        task_deadline: config.sync.relay_deadline,
        loop_interval: config.sync.loop_interval,
    }
}
