//! pkgmeta - package metadata from any repository.
//!
//! Repositories are described declaratively (YAML descriptors) and consulted
//! either by downloading their full index (APT, RPM, Alpine) or by querying
//! a per-package API (language registries). [`RepositoryManager`] is the
//! entry point.

pub mod api;
pub mod cache;
pub mod config;
pub mod decompress;
pub mod descriptor;
pub mod fetch;
pub mod manager;
pub mod parsers;
pub mod types;

pub use config::ManagerConfig;
pub use manager::{QueryContext, RepositoryError, RepositoryManager};
