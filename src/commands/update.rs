//! Update command - refresh repository indexes.

use anyhow::Result;
use clap::Args;
use pkgmeta::manager::{RefreshOptions, RefreshOutcome};

use super::open_manager;

#[derive(Args)]
pub struct UpdateCmd {
    /// Repositories to refresh (default: every bulk repository)
    pub repositories: Vec<String>,

    /// Download even when the cached index is still valid
    #[arg(long, short = 'f')]
    pub force: bool,

    /// Include end-of-life repositories
    #[arg(long)]
    pub include_eol: bool,
}

impl UpdateCmd {
    pub async fn run(&self) -> Result<()> {
        let manager = open_manager().await?;

        if !self.repositories.is_empty() {
            for name in &self.repositories {
                match manager.refresh_repository(name).await {
                    Ok(list) if list.is_api() => println!("{}: api repository, nothing to refresh", name),
                    Ok(list) => println!("{}: {} packages", name, list.packages.len()),
                    Err(e) => println!("{}: failed ({})", name, e),
                }
            }
            return Ok(());
        }

        let summaries = manager
            .update_all(RefreshOptions {
                include_eol: self.include_eol,
                force: self.force,
            })
            .await;

        let mut failed = 0;
        for summary in &summaries {
            let line = match &summary.outcome {
                RefreshOutcome::Fetched { packages } => format!("{} packages", packages),
                RefreshOutcome::Cached { packages } => format!("{} packages (cached)", packages),
                RefreshOutcome::Stale { packages, reason } => {
                    format!("{} packages (stale: {})", packages, reason)
                }
                RefreshOutcome::Failed { reason } => {
                    failed += 1;
                    format!("failed ({})", reason)
                }
            };
            println!("{:<32} {}", summary.repository, line);
        }

        println!("\n{} repositories, {} failed", summaries.len(), failed);
        Ok(())
    }
}
