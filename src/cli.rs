//! CLI argument definitions.

use clap::{Parser, Subcommand};

use crate::commands::{CacheCmd, ConfigCmd, ListCmd, PackagesCmd, QueryCmd, SearchCmd, StatsCmd, UpdateCmd};

#[derive(Parser)]
#[command(name = "pkgmeta")]
#[command(about = "pkgmeta - package metadata from any repository")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Refresh repository indexes
    Update(UpdateCmd),

    /// Show per-repository health
    Stats(StatsCmd),

    /// List configured repositories
    List(ListCmd),

    /// List the packages of one repository
    Packages(PackagesCmd),

    /// Look up a package for a provider / OS / version
    Query(QueryCmd),

    /// Search packages by name and description
    Search(SearchCmd),

    /// Manage the metadata cache
    Cache(CacheCmd),

    /// Show configuration
    Config(ConfigCmd),
}

impl Command {
    pub async fn execute(&self) -> anyhow::Result<()> {
        match self {
            Command::Update(cmd) => cmd.run().await,
            Command::Stats(cmd) => cmd.run().await,
            Command::List(cmd) => cmd.run().await,
            Command::Packages(cmd) => cmd.run().await,
            Command::Query(cmd) => cmd.run().await,
            Command::Search(cmd) => cmd.run().await,
            Command::Cache(cmd) => cmd.run().await,
            Command::Config(cmd) => cmd.run().await,
        }
    }
}
