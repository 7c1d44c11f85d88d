//! CLI command implementations.

mod cache;
mod config;
mod list;
mod packages;
mod query;
mod search;
mod stats;
mod update;

pub use cache::CacheCmd;
pub use config::ConfigCmd;
pub use list::ListCmd;
pub use packages::PackagesCmd;
pub use query::QueryCmd;
pub use search::SearchCmd;
pub use stats::StatsCmd;
pub use update::UpdateCmd;

use anyhow::{Context, Result};
use pkgmeta::{ManagerConfig, RepositoryManager};

/// Load config and descriptors, reporting rejected descriptors on stderr.
async fn open_manager() -> Result<RepositoryManager> {
    let config = ManagerConfig::load()?;
    let manager = RepositoryManager::initialize(config)
        .await
        .context("Failed to initialize repository manager")?;

    for error in manager.config_errors() {
        eprintln!("warning: {}", error);
    }
    Ok(manager)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}
