//! Per-thread async locks. An entry lives only while someone holds or
//! waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

use crate::bot::error::{BotError, Result};

pub type ThreadLock = Arc<AsyncMutex<()>>;

#[derive(Default)]
pub struct ThreadLocks {
    table: Mutex<HashMap<String, ThreadLock>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `thread_id`, created on first use. Hand it back through
    /// `release` once any guard taken from it is dropped.
    pub fn get(&self, thread_id: &str) -> Result<ThreadLock> {
        let mut table = self
            .table
            .lock()
            .map_err(|_| BotError::Store("thread lock table poisoned".into()))?;
        Ok(table
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    /// True while a guard is held for `thread_id`. Never adds an entry.
    pub fn is_locked(&self, thread_id: &str) -> bool {
        self.table
            .lock()
            .ok()
            .and_then(|table| table.get(thread_id).map(|lock| lock.try_lock().is_err()))
            .unwrap_or(false)
    }

    /// Drop our handle and forget the entry if nobody else has one.
    pub fn release(&self, thread_id: &str, lock: ThreadLock) {
        drop(lock);
        if let Ok(mut table) = self.table.lock()
            && table.get(thread_id).is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(thread_id);
        }
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.table.lock().map(|table| table.len()).unwrap_or(0)
    }
}
