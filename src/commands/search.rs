//! Search command - search packages by name and description.

use anyhow::Result;
use clap::Args;

use super::{open_manager, print_json};

#[derive(Args)]
pub struct SearchCmd {
    /// Search query
    pub query: String,

    /// Repositories to search (default: all but end-of-life)
    #[arg(long = "repo", short = 'r')]
    pub repositories: Vec<String>,

    /// Maximum number of results
    #[arg(long, short = 'l', default_value = "20")]
    pub limit: usize,

    /// Print JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchCmd {
    pub async fn run(&self) -> Result<()> {
        let manager = open_manager().await?;
        let scope = (!self.repositories.is_empty()).then_some(self.repositories.as_slice());
        let mut results = manager.search_packages(&self.query, scope).await;
        results.hits.truncate(self.limit);

        if self.json {
            return print_json(&results);
        }

        for (repo, reason) in &results.errors {
            eprintln!("warning: {} not searched ({})", repo, reason);
        }

        if results.hits.is_empty() {
            println!("No results found.");
            return Ok(());
        }

        for hit in &results.hits {
            let p = &hit.package;
            println!("{} {} [{}]", p.name, p.version, p.repository);
            if let Some(description) = &p.description {
                println!("    {}", description);
            }
        }
        Ok(())
    }
}
