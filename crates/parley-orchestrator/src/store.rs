//! Whole-document trigger persistence boundary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use parley_core::{Trigger, TriggerId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("trigger not found: {0}")]
    NotFound(TriggerId),

    #[error("trigger storage failed: {0}")]
    Backend(String),
}

/// Load and save triggers as whole documents. Implementations live with the
/// host (files, a database); the scheduler only reads and writes through this.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn load(&self) -> Result<Vec<Trigger>, StoreError>;

    async fn get(&self, id: &TriggerId) -> Result<Option<Trigger>, StoreError>;

    /// Insert or replace.
    async fn save(&self, trigger: &Trigger) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryTriggerStore {
    triggers: RwLock<BTreeMap<TriggerId, Trigger>>,
}

impl InMemoryTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_triggers(triggers: impl IntoIterator<Item = Trigger>) -> Self {
        let store = Self::new();
        {
            let mut map = store.triggers.write();
            for t in triggers {
                map.insert(t.id.clone(), t);
            }
        }
        store
    }

    pub fn remove(&self, id: &TriggerId) -> Result<Trigger, StoreError> {
        self.triggers
            .write()
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    pub fn len(&self) -> usize {
        self.triggers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.read().is_empty()
    }
}

#[async_trait]
impl TriggerStore for InMemoryTriggerStore {
    async fn load(&self) -> Result<Vec<Trigger>, StoreError> {
        Ok(self.triggers.read().values().cloned().collect())
    }

    async fn get(&self, id: &TriggerId) -> Result<Option<Trigger>, StoreError> {
        Ok(self.triggers.read().get(id).cloned())
    }

    async fn save(&self, trigger: &Trigger) -> Result<(), StoreError> {
        self.triggers
            .write()
            .insert(trigger.id.clone(), trigger.clone());
        Ok(())
    }
}
