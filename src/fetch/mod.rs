//! Network access shared by the bulk fetcher and the API client.

mod auth;
pub mod bulk;
mod error;
mod http;
mod retry;

pub use auth::Credentials;
pub use bulk::BulkFetcher;
pub use error::FetchError;
pub use http::{DEFAULT_USER_AGENT, Fetched, HttpClient};
pub use retry::RetryPolicy;
