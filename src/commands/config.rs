//! Config command - show configuration and descriptor problems.

use anyhow::Result;
use clap::{Args, Subcommand};
use pkgmeta::ManagerConfig;

use super::open_manager;

#[derive(Args)]
pub struct ConfigCmd {
    #[command(subcommand)]
    pub command: ConfigSubCmd,
}

#[derive(Subcommand)]
pub enum ConfigSubCmd {
    /// Show current configuration
    Show,

    /// Validate descriptors and list rejected entries
    Check,

    /// Add a descriptor directory
    AddDir {
        /// Directory scanned for *.yaml / *.yml descriptor files
        path: std::path::PathBuf,
    },
}

impl ConfigCmd {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            ConfigSubCmd::Show => {
                let config = ManagerConfig::load()?;
                println!("Config: {}", ManagerConfig::config_path()?.display());
                println!();
                println!("include_builtin:         {}", config.include_builtin);
                println!("persist_cache:           {}", config.persist_cache);
                println!("max_concurrent_fetches:  {}", config.max_concurrent_fetches);
                println!("user_agent:              {}", config.user_agent);
                match config.resolved_cache_dir() {
                    Some(dir) => println!("cache_dir:               {}", dir.display()),
                    None => println!("cache_dir:               (none)"),
                }
                if config.descriptor_dirs.is_empty() {
                    println!("descriptor_dirs:         (none)");
                }
                for dir in &config.descriptor_dirs {
                    println!("descriptor_dir:          {}", dir.display());
                }
            }
            ConfigSubCmd::Check => {
                // open_manager prints each rejected entry
                let manager = open_manager().await?;
                let loaded = manager.list_repositories(&Default::default()).len();
                println!("{} repositories loaded, {} rejected", loaded, manager.config_errors().len());
            }
            ConfigSubCmd::AddDir { path } => {
                let mut config = ManagerConfig::load()?;
                if !config.descriptor_dirs.contains(path) {
                    config.descriptor_dirs.push(path.clone());
                    config.save()?;
                }
                println!("Descriptor directory added: {}", path.display());
            }
        }
        Ok(())
    }
}
