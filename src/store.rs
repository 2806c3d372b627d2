//! Local persistence contract for replication items.
//!
//! One collection, queryable by machine id and vault, supporting
//! partial-field updates. The store has no write authority over status
//! fields; reconciliation overwrites them from remote truth.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{MigrateError, MigrateResult};
use crate::types::ReplicationItem;

/// Mutator applied under the store's lock for partial updates.
pub type ItemMutator = Box<dyn FnOnce(&mut ReplicationItem) + Send>;

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn insert(&self, item: ReplicationItem) -> MigrateResult<()>;
    /// Full-record overwrite keyed by item id.
    async fn save(&self, item: ReplicationItem) -> MigrateResult<()>;
    /// Partial update; returns the updated record, or `None` when absent.
    async fn update(
        &self,
        id: &str,
        mutator: ItemMutator,
    ) -> MigrateResult<Option<ReplicationItem>>;
    async fn get(&self, id: &str) -> MigrateResult<Option<ReplicationItem>>;
    /// The at-most-one non-terminal item for a machine.
    async fn active_for_machine(
        &self,
        machine_id: &str,
    ) -> MigrateResult<Option<ReplicationItem>>;
    async fn list(&self) -> MigrateResult<Vec<ReplicationItem>>;
    async fn list_active(&self) -> MigrateResult<Vec<ReplicationItem>>;
    async fn remove(&self, id: &str) -> MigrateResult<bool>;
}

/// In-process store backing tests and single-node deployments.
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, ReplicationItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut items: Vec<ReplicationItem>) -> Vec<ReplicationItem> {
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        items
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert(&self, item: ReplicationItem) -> MigrateResult<()> {
        let mut items = self.items.write().await;
        if items.contains_key(&item.id) {
            return Err(MigrateError::validation(format!(
                "replication item '{}' already exists",
                item.id
            )));
        }
        items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn save(&self, item: ReplicationItem) -> MigrateResult<()> {
        self.items.write().await.insert(item.id.clone(), item);
        Ok(())
    }

    async fn update(
        &self,
        id: &str,
        mutator: ItemMutator,
    ) -> MigrateResult<Option<ReplicationItem>> {
        let mut items = self.items.write().await;
        match items.get_mut(id) {
            Some(item) => {
                mutator(item);
                item.touch();
                Ok(Some(item.clone()))
            }
            None => Ok(None),
        }
    }

    async fn get(&self, id: &str) -> MigrateResult<Option<ReplicationItem>> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn active_for_machine(
        &self,
        machine_id: &str,
    ) -> MigrateResult<Option<ReplicationItem>> {
        Ok(self
            .items
            .read()
            .await
            .values()
            .find(|i| i.machine_id == machine_id && !i.is_terminal())
            .cloned())
    }

    async fn list(&self) -> MigrateResult<Vec<ReplicationItem>> {
        Ok(Self::sorted(
            self.items.read().await.values().cloned().collect(),
        ))
    }

    async fn list_active(&self) -> MigrateResult<Vec<ReplicationItem>> {
        Ok(Self::sorted(
            self.items
                .read()
                .await
                .values()
                .filter(|i| !i.is_terminal())
                .cloned()
                .collect(),
        ))
    }

    async fn remove(&self, id: &str) -> MigrateResult<bool> {
        Ok(self.items.write().await.remove(id).is_some())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MigrationStatus, TargetConfig, TopologyCache};

    fn item(machine: &str) -> ReplicationItem {
        ReplicationItem::new(
            machine,
            format!("vm-{machine}"),
            &TopologyCache {
                vault_name: "vault1".into(),
                ..Default::default()
            },
            TargetConfig::default(),
        )
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = MemoryStore::new();
        let i = item("m-1");
        let id = i.id.clone();
        store.insert(i).await.unwrap();
        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.machine_id, "m-1");
    }

    #[tokio::test]
    async fn double_insert_rejected() {
        let store = MemoryStore::new();
        let i = item("m-1");
        store.insert(i.clone()).await.unwrap();
        assert!(store.insert(i).await.is_err());
    }

    #[tokio::test]
    async fn active_for_machine_skips_terminal() {
        let store = MemoryStore::new();
        let mut done = item("m-1");
        done.status = MigrationStatus::Cancelled;
        store.insert(done).await.unwrap();
        assert!(store.active_for_machine("m-1").await.unwrap().is_none());

        store.insert(item("m-1")).await.unwrap();
        let active = store.active_for_machine("m-1").await.unwrap().unwrap();
        assert_eq!(active.status, MigrationStatus::Enabling);
    }

    #[tokio::test]
    async fn update_applies_mutator_and_touches() {
        let store = MemoryStore::new();
        let i = item("m-1");
        let id = i.id.clone();
        let before = i.updated_at;
        store.insert(i).await.unwrap();

        let updated = store
            .update(
                &id,
                Box::new(|it| it.status = MigrationStatus::Replicating),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, MigrationStatus::Replicating);
        assert!(updated.updated_at >= before);
    }

    #[tokio::test]
    async fn update_missing_is_none() {
        let store = MemoryStore::new();
        let out = store.update("nope", Box::new(|_| {})).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn list_active_filters_terminal() {
        let store = MemoryStore::new();
        store.insert(item("m-1")).await.unwrap();
        let mut gone = item("m-2");
        gone.status = MigrationStatus::MigrationCompleted;
        store.insert(gone).await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 2);
        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].machine_id, "m-1");
    }

    #[tokio::test]
    async fn remove_reports_presence() {
        let store = MemoryStore::new();
        let i = item("m-1");
        let id = i.id.clone();
        store.insert(i).await.unwrap();
        assert!(store.remove(&id).await.unwrap());
        assert!(!store.remove(&id).await.unwrap());
    }
}
