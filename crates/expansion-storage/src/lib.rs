//! Persistence contract, store implementations and HTTP fetch utilities.

mod http;
mod memory;
mod postgres;
mod store;

use sha2::{Digest, Sha256};

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::EngineStore;

pub const CRATE_NAME: &str = "expansion-storage";

/// Hex SHA-256 of `bytes`, used as the content hash of stored articles.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
