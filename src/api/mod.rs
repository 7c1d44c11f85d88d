//! On-demand queries against `api` repositories (language registries and
//! other per-package endpoints).

mod client;
mod error;
mod rate_limit;

pub use client::ApiClient;
pub use error::ApiError;
pub use rate_limit::{RateLimiter, RatePermit};
