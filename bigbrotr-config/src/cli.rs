//! CLI surface: one binary, one subcommand per
//! service name, an optional `--config` path.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "bigbrotr", about = "BigBrotr relay network archiver", version)]
pub struct Cli {
    /// Path to a YAML config file. Falls back to environment-only
    /// configuration if omitted.
    #[arg(long, global = true, env = "BIGBROTR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub service: Service,
}

#[derive(Debug, Subcommand, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Applies schema migrations and seeds the relay table, then exits.
    Initializer,
    /// Syncs historical and live events from the general relay pool.
    Sync,
    /// Syncs events from the operator-configured priority relay list.
    PrioritySync,
    /// Probes relay NIP-11/NIP-66 metadata.
    Monitor,
    /// Discovers new relay URLs.
    Finder,
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Service::Initializer => "initializer",
            Service::Sync => "sync",
            Service::PrioritySync => "priority-sync",
            Service::Monitor => "monitor",
            Service::Finder => "finder",
        }
    }
}
