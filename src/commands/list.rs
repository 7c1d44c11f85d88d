//! List command - list configured repositories.

use anyhow::{Result, bail};
use clap::Args;
use pkgmeta::manager::RepositoryFilter;
use pkgmeta::types::QueryType;

use super::open_manager;

#[derive(Args)]
pub struct ListCmd {
    /// Filter by provider (apt, dnf, apk, pypi, ...)
    #[arg(long, short = 'p')]
    pub provider: Option<String>,

    /// Filter by operating system
    #[arg(long)]
    pub os: Option<String>,

    /// Filter by query type (bulk_download, api)
    #[arg(long, short = 't')]
    pub query_type: Option<String>,

    /// Hide end-of-life repositories
    #[arg(long)]
    pub no_eol: bool,

    /// Show only repository names
    #[arg(long)]
    pub names_only: bool,
}

impl ListCmd {
    pub async fn run(&self) -> Result<()> {
        let query_type = match self.query_type.as_deref() {
            None => None,
            Some("bulk_download" | "bulk") => Some(QueryType::BulkDownload),
            Some("api") => Some(QueryType::Api),
            Some(other) => bail!("Invalid query type: {}. Use: bulk_download, api", other),
        };

        let manager = open_manager().await?;
        let repositories = manager.list_repositories(&RepositoryFilter {
            provider: self.provider.clone(),
            os: self.os.clone(),
            query_type,
            exclude_eol: self.no_eol,
        });

        if repositories.is_empty() {
            println!("No repositories match.");
            return Ok(());
        }

        for repo in &repositories {
            if self.names_only {
                println!("{}", repo.name);
                continue;
            }
            let eol = if repo.eol { " [eol]" } else { "" };
            let systems = if repo.distribution.is_empty() {
                "*".to_string()
            } else {
                repo.distribution.join(",")
            };
            println!(
                "{:<32} {:<8} {:<14} {:<14} {:>4}{}",
                repo.name, repo.provider, systems, repo.query_type, repo.priority, eol
            );
        }

        if !self.names_only {
            println!("\n{} repositories", repositories.len());
        }
        Ok(())
    }
}
