//! Remote/local state reconciliation.
//!
//! The remote service is the authority on replication state. Each pass
//! lists migration items per vault, overwrites the matching local records,
//! and materializes local records for remote items nobody tracks. A vault
//! that fails to list is skipped for the pass; its local items keep their
//! last known state rather than being marked failed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::api::SiteRecoveryApi;
use crate::error::MigrateResult;
use crate::remote::{MigrationItem, MigrationItemProperties};
use crate::store::ItemStore;
use crate::types::{
    HealthError, MigrationStatus, ReplicationItem, TargetConfig, TestMigrateState, TopologyCache,
};

// ─── State mapping ──────────────────────────────────────────────────

/// Canonical status from the newer migration-state vocabulary.
fn from_migration_state(state: &str) -> MigrationStatus {
    match state {
        "EnableMigrationInProgress" => MigrationStatus::Enabling,
        "EnableMigrationFailed" => MigrationStatus::AzureEnableFailed,
        "InitialSeedingInProgress" => MigrationStatus::InitialReplication,
        "InitialSeedingFailed" => MigrationStatus::Failed,
        "Replicating" => MigrationStatus::Replicating,
        "MigrationInProgress" => MigrationStatus::MigrationInProgress,
        "MigrationSucceeded" | "MigrationCompletedWithInformation" => {
            MigrationStatus::MigrationCompleted
        }
        "MigrationFailed" => MigrationStatus::Failed,
        "ResyncInProgress" | "ResyncRequired" | "ResumeInProgress" => MigrationStatus::Resyncing,
        "DisableMigrationInProgress" | "DisableMigrationFailed" => {
            MigrationStatus::Other(state.to_string())
        }
        other => {
            warn!("unmapped migration state '{}' passed through verbatim", other);
            MigrationStatus::Other(other.to_string())
        }
    }
}

/// Canonical status from the older protection-state vocabulary.
fn from_protection_state(state: &str) -> MigrationStatus {
    match state {
        "EnablingProtection" => MigrationStatus::Enabling,
        "EnablingFailed" => MigrationStatus::AzureEnableFailed,
        "InitialReplicationInProgress" => MigrationStatus::InitialReplication,
        "Replicating" => MigrationStatus::Replicating,
        "Protected" => MigrationStatus::Protected,
        "PlannedFailoverInProgress" => MigrationStatus::PlannedFailoverInProgress,
        "FailedOver" | "FailoverCompleted" => MigrationStatus::FailedOver,
        "ProtectionFailed" => MigrationStatus::Failed,
        other => {
            warn!("unmapped protection state '{}' passed through verbatim", other);
            MigrationStatus::Other(other.to_string())
        }
    }
}

/// Canonical status for a remote item: migration state when present,
/// protection state otherwise.
pub fn canonical_status(props: &MigrationItemProperties) -> MigrationStatus {
    if let Some(state) = props.migration_state.as_deref().filter(|s| !s.is_empty()) {
        return from_migration_state(state);
    }
    if let Some(state) = props.protection_state.as_deref().filter(|s| !s.is_empty()) {
        return from_protection_state(state);
    }
    MigrationStatus::Other(String::new())
}

fn parse_test_state(state: Option<&str>) -> TestMigrateState {
    match state.unwrap_or_default() {
        "TestMigrationInProgress" => TestMigrateState::InProgress,
        "TestMigrationSucceeded" => TestMigrateState::Succeeded,
        "TestMigrationFailed" => TestMigrateState::Failed,
        "TestMigrationCleanupInProgress" => TestMigrateState::CleanupInProgress,
        "TestMigrationCleanupSucceeded" => TestMigrateState::CleanupCompleted,
        _ => TestMigrateState::None,
    }
}

fn progress_of(props: &MigrationItemProperties) -> Option<f64> {
    props.migration_progress_percentage.or(props
        .provider_specific_details
        .initial_seeding_progress_percentage)
}

fn last_sync_of(props: &MigrationItemProperties) -> Option<DateTime<Utc>> {
    props
        .provider_specific_details
        .last_recovery_point_received
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

// ─── Reconciler ─────────────────────────────────────────────────────

pub struct Reconciler {
    api: Arc<dyn SiteRecoveryApi>,
    store: Arc<dyn ItemStore>,
}

impl Reconciler {
    pub fn new(api: Arc<dyn SiteRecoveryApi>, store: Arc<dyn ItemStore>) -> Self {
        Self { api, store }
    }

    /// One full reconciliation pass over every vault that owns a
    /// non-terminal item. Returns the number of items updated or
    /// materialized.
    pub async fn pass(&self) -> MigrateResult<usize> {
        let active = self.store.list_active().await?;
        let mut vaults: Vec<String> = active.iter().map(|i| i.vault_name.clone()).collect();
        vaults.sort();
        vaults.dedup();

        let mut touched = 0usize;
        for vault in vaults {
            match self.api.list_migration_items(&vault).await {
                Ok(remote_items) => {
                    touched += self.reconcile_vault(&vault, &active, remote_items).await?;
                }
                Err(e) => {
                    warn!(
                        "vault '{}' listing failed; keeping local state for its items: {}",
                        vault, e
                    );
                }
            }
        }
        debug!("reconciliation pass touched {} item(s)", touched);
        Ok(touched)
    }

    async fn reconcile_vault(
        &self,
        vault: &str,
        active: &[ReplicationItem],
        remote_items: Vec<MigrationItem>,
    ) -> MigrateResult<usize> {
        let mut touched = 0usize;
        for remote in remote_items {
            // Exact remote-id correlation wins; display-name matching is
            // only a fallback for items that never got their id backfilled.
            let in_vault = || active.iter().filter(|i| i.vault_name == vault);
            let local = in_vault()
                .find(|i| i.remote_item_id.as_deref() == Some(remote.name.as_str()))
                .or_else(|| {
                    in_vault().find(|i| {
                        i.remote_item_id.is_none()
                            && (remote
                                .properties
                                .machine_name
                                .as_deref()
                                .is_some_and(|n| n == i.machine_name)
                                || i.machine_name == remote.name)
                    })
                });
            match local {
                Some(item) => {
                    self.apply_remote(item, &remote).await?;
                    touched += 1;
                }
                None => {
                    self.materialize_orphan(vault, remote).await?;
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    /// Overwrite a local record with remote truth. Target configuration is
    /// locally owned and never touched here.
    async fn apply_remote(&self, item: &ReplicationItem, remote: &MigrationItem) -> MigrateResult<()> {
        let status = canonical_status(&remote.properties);
        let was_steady = item.status.is_steady();
        if !was_steady && status.is_steady() {
            info!(
                "machine '{}' is now protected and ready to migrate",
                item.machine_name
            );
        }

        let health = remote.properties.health.clone().unwrap_or_default();
        let health_errors: Vec<HealthError> = remote
            .properties
            .health_errors
            .iter()
            .map(|e| HealthError {
                code: e.error_code.clone().unwrap_or_default(),
                message: e.error_message.clone().unwrap_or_default(),
            })
            .collect();
        let progress = progress_of(&remote.properties);
        let last_sync = last_sync_of(&remote.properties);
        let test_state = parse_test_state(remote.properties.test_migrate_state.as_deref());
        let remote_name = remote.name.clone();

        self.store
            .update(
                &item.id,
                Box::new(move |it| {
                    it.status = status;
                    it.health = health;
                    it.health_errors = health_errors;
                    if let Some(p) = progress {
                        it.progress_percent = p;
                    }
                    if last_sync.is_some() {
                        it.last_sync_time = last_sync;
                    }
                    it.test_migrate_state = test_state;
                    if it.remote_item_id.is_none() {
                        it.remote_item_id = Some(remote_name);
                    }
                }),
            )
            .await?;
        Ok(())
    }

    /// A remote item with no local record: someone enabled replication
    /// outside this process. Track it instead of ignoring it.
    async fn materialize_orphan(&self, vault: &str, remote: MigrationItem) -> MigrateResult<()> {
        let (fabric, container) = fabric_and_container(&remote.id);
        let machine_name = remote
            .properties
            .machine_name
            .clone()
            .unwrap_or_else(|| remote.name.clone());
        info!(
            "materializing untracked remote item '{}' in vault '{}'",
            remote.name, vault
        );

        let topology = TopologyCache {
            vault_name: vault.to_string(),
            fabric_name: fabric,
            container_name: container,
            ..Default::default()
        };
        let mut target = TargetConfig::default();
        if let Some(rg) = remote
            .properties
            .provider_specific_details
            .target_resource_group_id
            .clone()
        {
            target.resource_group = rg;
        }
        if let Some(region) = remote
            .properties
            .provider_specific_details
            .target_location
            .clone()
        {
            target.target_region = region;
        }

        let mut item = ReplicationItem::new(remote.id.clone(), machine_name, &topology, target);
        item.remote_item_id = Some(remote.name.clone());
        item.status = canonical_status(&remote.properties);
        item.health = remote.properties.health.clone().unwrap_or_default();
        if let Some(p) = progress_of(&remote.properties) {
            item.progress_percent = p;
        }
        item.last_sync_time = last_sync_of(&remote.properties);
        item.test_migrate_state = parse_test_state(remote.properties.test_migrate_state.as_deref());
        self.store.insert(item).await
    }
}

/// Fabric and container names out of a migration item's ARM id.
fn fabric_and_container(arm_id: &str) -> (String, String) {
    let mut fabric = String::new();
    let mut container = String::new();
    let segments: Vec<&str> = arm_id.split('/').collect();
    for pair in segments.windows(2) {
        match pair[0] {
            "replicationFabrics" => fabric = pair[1].to_string(),
            "replicationProtectionContainers" => container = pair[1].to_string(),
            _ => {}
        }
    }
    (fabric, container)
}

// ─── Background loop ────────────────────────────────────────────────

/// Periodic reconciliation driver. One instance supervises at most one
/// running task; `start` while running is a no-op. The loop stops itself
/// once every tracked item is terminal, and unconditionally after
/// `max_runtime` so a forgotten caller cannot poll forever.
pub struct ReconcileLoop {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    max_runtime: Duration,
    store: Arc<dyn ItemStore>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
}

impl ReconcileLoop {
    pub fn new(
        reconciler: Arc<Reconciler>,
        store: Arc<dyn ItemStore>,
        interval: Duration,
        max_runtime: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            reconciler,
            interval,
            max_runtime,
            store,
            handle: Mutex::new(None),
            stop_tx,
        }
    }

    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("reconciliation loop already running");
            return;
        }
        let _ = self.stop_tx.send(false);
        let mut stop_rx = self.stop_tx.subscribe();
        let reconciler = self.reconciler.clone();
        let store = self.store.clone();
        let interval = self.interval;
        let max_runtime = self.max_runtime;

        info!(
            "starting reconciliation loop (interval {:?}, max runtime {:?})",
            interval, max_runtime
        );
        *handle = Some(tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            info!("reconciliation loop stopped");
                            return;
                        }
                    }
                }
                if let Err(e) = reconciler.pass().await {
                    warn!("reconciliation pass failed: {}", e);
                }
                match store.list_active().await {
                    Ok(active) if active.is_empty() => {
                        info!("no non-terminal items left; reconciliation loop exiting");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("store listing failed: {}", e),
                }
                if started.elapsed() >= max_runtime {
                    warn!("reconciliation loop hit max runtime; exiting");
                    return;
                }
            }
        }));
    }

    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let mut handle = self.handle.lock().await;
        if let Some(h) = handle.take() {
            let _ = h.await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
