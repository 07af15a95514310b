//! Cross-worker coordination state: the ingestion flag and per-artifact
//! progress counters.
//!
//! Everything here goes through a [`CoordinationStore`], so callers never
//! read-then-write shared state themselves.

mod lock;
mod memory;
mod progress;
mod surreal;

pub use lock::LockGuard;
pub use memory::MemoryCoordinationStore;
pub use progress::ProgressTracker;
pub use surreal::SurrealCoordinationStore;

use async_trait::async_trait;

use crate::error::AppError;

pub const INGESTION_FLAG_KEY: &str = "ingestion:loading";

pub fn artifact_progress_key(artifact_id: &str) -> String {
    format!("artifact:{artifact_id}:progress")
}

/// Shared key-value store reachable by every worker.
///
/// Implementations must make each call a single atomic operation against the
/// underlying store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Sets `key` to `new` only if it currently holds `expected`; a missing
    /// flag reads as `false`. Returns whether the swap happened.
    async fn compare_and_set_flag(
        &self,
        key: &str,
        expected: bool,
        new: bool,
    ) -> Result<bool, AppError>;

    async fn set_flag(&self, key: &str, value: bool) -> Result<(), AppError>;

    async fn get_flag(&self, key: &str) -> Result<bool, AppError>;

    async fn set_counter(&self, key: &str, value: u64) -> Result<(), AppError>;

    /// Adds `by` to the counter and returns the new value; a missing counter
    /// starts at zero.
    async fn increment_counter(&self, key: &str, by: u64) -> Result<u64, AppError>;

    async fn get_counter(&self, key: &str) -> Result<u64, AppError>;
}
