//! Configuration loading and CLI parsing for BigBrotr: layered env > YAML >
//! defaults, guard-rail validation, and the `clap` CLI surface.

pub mod cli;
pub mod loader;
pub mod model;
pub mod validation;

pub use cli::{Cli, Service};
pub use loader::{load, ConfigLoadError};
pub use model::Config;
pub use validation::{validate, ConfigGuardRailError, ConfigWarning};
