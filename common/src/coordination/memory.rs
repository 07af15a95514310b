use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use super::CoordinationStore;
use crate::error::AppError;

#[derive(Debug, Default)]
struct Entries {
    flags: HashMap<String, bool>,
    counters: HashMap<String, u64>,
}

/// In-process store with the same atomic contract as the shared one.
#[derive(Debug, Default)]
pub struct MemoryCoordinationStore {
    entries: Mutex<Entries>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> Result<T, AppError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| AppError::InternalError("coordination store mutex poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn compare_and_set_flag(
        &self,
        key: &str,
        expected: bool,
        new: bool,
    ) -> Result<bool, AppError> {
        self.with_entries(|entries| {
            let current = entries.flags.entry(key.to_string()).or_insert(false);
            if *current == expected {
                *current = new;
                true
            } else {
                false
            }
        })
    }

    async fn set_flag(&self, key: &str, value: bool) -> Result<(), AppError> {
        self.with_entries(|entries| {
            entries.flags.insert(key.to_string(), value);
        })
    }

    async fn get_flag(&self, key: &str) -> Result<bool, AppError> {
        self.with_entries(|entries| entries.flags.get(key).copied().unwrap_or(false))
    }

    async fn set_counter(&self, key: &str, value: u64) -> Result<(), AppError> {
        self.with_entries(|entries| {
            entries.counters.insert(key.to_string(), value);
        })
    }

    async fn increment_counter(&self, key: &str, by: u64) -> Result<u64, AppError> {
        self.with_entries(|entries| {
            let counter = entries.counters.entry(key.to_string()).or_insert(0);
            *counter = counter.saturating_add(by);
            *counter
        })
    }

    async fn get_counter(&self, key: &str) -> Result<u64, AppError> {
        self.with_entries(|entries| entries.counters.get(key).copied().unwrap_or(0))
    }
}
