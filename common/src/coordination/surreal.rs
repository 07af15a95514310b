use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::debug;

use super::CoordinationStore;
use crate::{error::AppError, storage::db::SurrealDbClient};

const FLAG_TABLE: &str = "coordination_flag";
const COUNTER_TABLE: &str = "coordination_counter";
const CONFLICT_RETRIES: usize = 12;

/// Coordination state kept in SurrealDB, shared by every process pointed at
/// the same database.
#[derive(Clone)]
pub struct SurrealCoordinationStore {
    db: Arc<SurrealDbClient>,
}

impl SurrealCoordinationStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    /// One compare-and-set attempt. The read and the conditional write sit in
    /// a single statement, so they commit as one transaction.
    async fn try_compare_and_set(
        &self,
        key: &str,
        expected: bool,
        new: bool,
    ) -> Result<bool, surrealdb::Error> {
        const CAS_QUERY: &str = r#"
            RETURN {
                LET $swap = ((SELECT VALUE value FROM type::thing($table, $key))[0] ?? false) = $expected;
                IF $swap {
                    UPSERT type::thing($table, $key) SET value = $new, updated_at = time::now();
                };
                RETURN $swap;
            };
        "#;

        let swapped: Option<bool> = self
            .db
            .client
            .query(CAS_QUERY)
            .bind(("table", FLAG_TABLE))
            .bind(("key", key.to_string()))
            .bind(("expected", expected))
            .bind(("new", new))
            .await?
            .take(0)?;
        Ok(swapped.unwrap_or(false))
    }
}

/// Optimistic transactions that lost a race surface as retryable conflicts.
fn is_transaction_conflict(err: &surrealdb::Error) -> bool {
    let message = err.to_string();
    message.contains("conflict") || message.contains("can be retried")
}

/// Re-runs `op` while it fails with a transaction conflict. A conflicting
/// transaction commits nothing, so a retry observes the winner's write.
async fn retry_on_conflict<T, F, Fut>(key: &str, op: F) -> Result<T, surrealdb::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, surrealdb::Error>>,
{
    let strategy = ExponentialBackoff::from_millis(2)
        .max_delay(Duration::from_millis(100))
        .map(jitter)
        .take(CONFLICT_RETRIES);

    RetryIf::spawn(strategy, op, |err: &surrealdb::Error| {
        let retry = is_transaction_conflict(err);
        if retry {
            debug!(key, "coordination write conflicted, retrying");
        }
        retry
    })
    .await
}

fn to_db_count(value: u64) -> Result<i64, AppError> {
    i64::try_from(value)
        .map_err(|_| AppError::Validation(format!("counter value {value} out of range")))
}

fn from_db_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[async_trait]
impl CoordinationStore for SurrealCoordinationStore {
    async fn compare_and_set_flag(
        &self,
        key: &str,
        expected: bool,
        new: bool,
    ) -> Result<bool, AppError> {
        let swapped =
            retry_on_conflict(key, move || self.try_compare_and_set(key, expected, new)).await?;
        Ok(swapped)
    }

    async fn set_flag(&self, key: &str, value: bool) -> Result<(), AppError> {
        retry_on_conflict(key, move || async move {
            self.db
                .client
                .query("UPSERT type::thing($table, $key) SET value = $value, updated_at = time::now()")
                .bind(("table", FLAG_TABLE))
                .bind(("key", key.to_string()))
                .bind(("value", value))
                .await?
                .check()?;
            Ok::<(), surrealdb::Error>(())
        })
        .await?;
        Ok(())
    }

    async fn get_flag(&self, key: &str) -> Result<bool, AppError> {
        let value: Option<bool> = self
            .db
            .client
            .query("SELECT VALUE value FROM type::thing($table, $key)")
            .bind(("table", FLAG_TABLE))
            .bind(("key", key.to_string()))
            .await?
            .take(0)?;
        Ok(value.unwrap_or(false))
    }

    async fn set_counter(&self, key: &str, value: u64) -> Result<(), AppError> {
        self.db
            .client
            .query("UPSERT type::thing($table, $key) SET value = $value, updated_at = time::now()")
            .bind(("table", COUNTER_TABLE))
            .bind(("key", key.to_string()))
            .bind(("value", to_db_count(value)?))
            .await?
            .check()?;
        Ok(())
    }

    async fn increment_counter(&self, key: &str, by: u64) -> Result<u64, AppError> {
        const INCREMENT_QUERY: &str = r#"
            UPSERT type::thing($table, $key)
            SET value = (value ?? 0) + $by,
                updated_at = time::now()
            RETURN VALUE value;
        "#;

        let by = to_db_count(by)?;
        let value: Option<i64> = retry_on_conflict(key, move || async move {
            self.db
                .client
                .query(INCREMENT_QUERY)
                .bind(("table", COUNTER_TABLE))
                .bind(("key", key.to_string()))
                .bind(("by", by))
                .await?
                .take::<Option<i64>>(0)
        })
        .await?;

        value.map(from_db_count).ok_or_else(|| {
            AppError::InternalError(format!("counter {key} missing after increment"))
        })
    }

    async fn get_counter(&self, key: &str) -> Result<u64, AppError> {
        let value: Option<i64> = self
            .db
            .client
            .query("SELECT VALUE value FROM type::thing($table, $key)")
            .bind(("table", COUNTER_TABLE))
            .bind(("key", key.to_string()))
            .await?
            .take(0)?;
        Ok(value.map_or(0, from_db_count))
    }
}
