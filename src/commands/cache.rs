//! Cache command - inspect and prune the metadata cache.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use pkgmeta::ManagerConfig;
use pkgmeta::cache::RepositoryCache;

#[derive(Args)]
pub struct CacheCmd {
    #[command(subcommand)]
    pub command: CacheSubCmd,
}

#[derive(Subcommand)]
pub enum CacheSubCmd {
    /// Remove expired entries
    Cleanup,

    /// Remove every entry, or one repository's entries
    Clear {
        /// Only this repository
        repository: Option<String>,
    },

    /// Show entry counts
    Show,
}

impl CacheCmd {
    pub async fn run(&self) -> Result<()> {
        let config = ManagerConfig::load()?;
        let dir = config
            .resolved_cache_dir()
            .context("Could not determine cache directory")?;
        let cache = RepositoryCache::persistent(dir.clone());
        cache.load().await.context("Failed to load cache")?;

        match &self.command {
            CacheSubCmd::Cleanup => {
                let removed = cache.cleanup_expired().await?;
                println!("Removed {} expired entries.", removed);
            }
            CacheSubCmd::Clear { repository: Some(repo) } => {
                let removed = cache.invalidate_repository(repo).await?;
                println!("Removed {} entries for {}.", removed, repo);
            }
            CacheSubCmd::Clear { repository: None } => {
                cache.clear().await?;
                println!("Cache cleared: {}", dir.display());
            }
            CacheSubCmd::Show => {
                let stats = cache.stats().await;
                println!("Cache: {}", dir.display());
                println!();
                println!("entries:    {}", stats.entries);
                println!("valid:      {}", stats.valid);
                println!("expired:    {}", stats.expired);
                println!("packages:   {}", stats.packages);
            }
        }
        Ok(())
    }
}
