use std::sync::Arc;

use crate::ledger::TableId;
use crate::round::TableState;

use super::{get_json, set_json, CacheError, KeyValueStore};

pub fn state_key(table_id: TableId) -> String {
    format!("table:{table_id}:state")
}

/// Cached [`TableState`] per table. Only the round controller writes it.
#[derive(Clone)]
pub struct TableStateCache {
    store: Arc<dyn KeyValueStore>,
}

impl TableStateCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// A value that fails to parse is reported as [`CacheError::Corrupt`],
    /// never treated as a miss.
    pub async fn get(&self, table_id: TableId) -> Result<Option<TableState>, CacheError> {
        get_json(self.store.as_ref(), &state_key(table_id)).await
    }

    pub async fn put(&self, state: &TableState) -> Result<(), CacheError> {
        set_json(self.store.as_ref(), &state_key(state.table_id), state, None).await
    }

    pub async fn invalidate(&self, table_id: TableId) -> Result<(), CacheError> {
        self.store.del(&state_key(table_id)).await?;
        Ok(())
    }
}
