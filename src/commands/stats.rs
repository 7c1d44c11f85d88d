//! Stats command - per-repository health.

use anyhow::Result;
use clap::Args;

use super::{open_manager, print_json};

#[derive(Args)]
pub struct StatsCmd {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl StatsCmd {
    pub async fn run(&self) -> Result<()> {
        let manager = open_manager().await?;
        let health = manager.get_statistics().await;

        if self.json {
            return print_json(&health);
        }

        for repo in &health {
            let count = repo
                .package_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            let updated = repo
                .last_updated
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<32} {:<10} {:>4} {:>8} {:>16}  {}",
                repo.name, repo.provider, repo.priority, count, updated, repo.status
            );
        }

        let cache = manager.cache().stats().await;
        println!();
        println!("Cache:");
        println!("  Entries:   {} ({} valid, {} expired)", cache.entries, cache.valid, cache.expired);
        println!("  Packages:  {}", cache.packages);

        Ok(())
    }
}
