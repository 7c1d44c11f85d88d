//! Packages command - dump one repository's package list.

use anyhow::Result;
use clap::Args;
use pkgmeta::types::Freshness;

use super::{open_manager, print_json};

#[derive(Args)]
pub struct PackagesCmd {
    /// Repository name
    pub repository: String,

    /// Download even when the cached index is still valid
    #[arg(long, short = 'f')]
    pub refresh: bool,

    /// Print JSON instead of name/version lines
    #[arg(long)]
    pub json: bool,
}

impl PackagesCmd {
    pub async fn run(&self) -> Result<()> {
        let manager = open_manager().await?;
        let list = if self.refresh {
            manager.refresh_repository(&self.repository).await?
        } else {
            manager.get_packages(&self.repository).await?
        };

        if self.json {
            return print_json(&list);
        }

        match &list.freshness {
            Freshness::NotApplicable => {
                println!(
                    "{} is an API repository; use `pkgmeta query` to look up packages.",
                    self.repository
                );
                return Ok(());
            }
            Freshness::Stale(reason) => eprintln!("warning: serving stale index ({})", reason),
            Freshness::Fresh | Freshness::Cached => {}
        }

        for package in &list.packages {
            println!("{} {}", package.name, package.version);
        }
        println!("\n{} packages", list.packages.len());
        Ok(())
    }
}
