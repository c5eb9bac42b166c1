//! Article persistence + retrying HTTP fetch utilities for the pipeline.

pub mod http;
pub mod retry;
pub mod store;

pub use http::{
    classify_reqwest_error, classify_status, FetchError, HttpClientConfig, HttpFetcher,
    RateLimitPolicy,
};
pub use retry::{RetryDisposition, RetryExecutor, RetryPolicy};
pub use store::{ArticleStore, InsertOutcome, StatusCounts, StoreError};
