//! Query command - look up packages for a provider / OS / version.

use anyhow::Result;
use clap::Args;
use pkgmeta::QueryContext;
use pkgmeta::types::Package;

use super::{open_manager, print_json};

#[derive(Args)]
pub struct QueryCmd {
    /// Package names
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Package manager (apt, dnf, apk, pypi, npm, ...)
    #[arg(long, short = 'p')]
    pub provider: String,

    /// Operating system (ubuntu, debian, fedora, ...)
    #[arg(long)]
    pub os: Option<String>,

    /// Operating system release (22.04, 12, 40, ...)
    #[arg(long, requires = "os")]
    pub os_version: Option<String>,

    /// Print JSON
    #[arg(long)]
    pub json: bool,
}

impl QueryCmd {
    pub async fn run(&self) -> Result<()> {
        let manager = open_manager().await?;

        let mut ctx = QueryContext::new(&self.provider);
        if let Some(os) = &self.os {
            ctx = ctx.with_os(os, self.os_version.clone());
        }

        if let [name] = self.names.as_slice() {
            let package = manager.query_package(name, &ctx).await?;
            return if self.json { print_json(&package) } else { print_package(&package) };
        }

        let mut results: Vec<_> = manager.query_packages_batch(&self.names, &ctx).await.into_iter().collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));

        if self.json {
            let found: Vec<&Package> = results.iter().filter_map(|(_, r)| r.as_ref().ok()).collect();
            return print_json(&found);
        }

        for (name, result) in &results {
            match result {
                Ok(p) => println!("{:<32} {:<24} {}", name, p.version, p.repository),
                Err(e) => println!("{:<32} {}", name, e),
            }
        }
        Ok(())
    }
}

fn print_package(p: &Package) -> Result<()> {
    println!("{} {}", p.name, p.version);
    println!("  repository:   {}", p.repository);
    let optional = [
        ("description", p.description.as_deref()),
        ("homepage", p.homepage.as_deref()),
        ("license", p.license.as_deref()),
        ("maintainer", p.maintainer.as_deref()),
        ("category", p.category.as_deref()),
        ("architecture", p.architecture.as_deref()),
        ("checksum", p.checksum.as_deref()),
    ];
    for (label, value) in optional {
        if let Some(value) = value {
            println!("  {:<13} {}", format!("{}:", label), value);
        }
    }
    if let Some(size) = p.size_bytes {
        println!("  size:         {} bytes", size);
    }
    Ok(())
}
