//! Service façade over discovery, enablement, reconciliation and the
//! migration lifecycle. This is the one type embedders construct.

use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::api::{SiteRecoveryApi, SrsGateway};
use crate::auth::Credentials;
use crate::client::SrsClient;
use crate::enablement::{EnablementWorkflow, MachineEnableSpec};
use crate::error::{MigrateError, MigrateResult};
use crate::inventory::{InventoryApi, MachineDetails, SiteInventoryGateway};
use crate::lifecycle::LifecycleWorkflow;
use crate::reconcile::{canonical_status, ReconcileLoop, Reconciler};
use crate::remote::{Job, OperationHandle};
use crate::store::{ItemStore, MemoryStore};
use crate::topology::TopologyResolver;
use crate::types::{
    EnableOutcome, HealthError, LiveSnapshot, MachineGroup, ReplicationItem, ReplicationView,
    TopologyCache,
};

const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MAX_LOOP_RUNTIME: Duration = Duration::from_secs(12 * 60 * 60);

pub struct MigrationService {
    api: Arc<dyn SiteRecoveryApi>,
    inventory: Arc<dyn InventoryApi>,
    store: Arc<dyn ItemStore>,
    topology: Arc<TopologyResolver>,
    enablement: EnablementWorkflow,
    lifecycle: LifecycleWorkflow,
    reconcile_loop: ReconcileLoop,
}

impl MigrationService {
    /// Production wiring: ARM gateways over a shared authenticated client
    /// and an in-process item store.
    pub fn new(client: Arc<SrsClient>) -> Self {
        let api: Arc<dyn SiteRecoveryApi> = Arc::new(SrsGateway::new(client.clone()));
        let inventory: Arc<dyn InventoryApi> = Arc::new(SiteInventoryGateway::new(client));
        let store: Arc<dyn ItemStore> = Arc::new(MemoryStore::new());
        Self::with_parts(api, inventory, store)
    }

    /// Explicit wiring; embedders supply their own gateways or store.
    pub fn with_parts(
        api: Arc<dyn SiteRecoveryApi>,
        inventory: Arc<dyn InventoryApi>,
        store: Arc<dyn ItemStore>,
    ) -> Self {
        let topology = Arc::new(TopologyResolver::new(api.clone()));
        let enablement = EnablementWorkflow::new(
            api.clone(),
            inventory.clone(),
            topology.clone(),
            store.clone(),
        );
        let lifecycle = LifecycleWorkflow::new(api.clone(), store.clone());
        let reconciler = Arc::new(Reconciler::new(api.clone(), store.clone()));
        let reconcile_loop = ReconcileLoop::new(
            reconciler,
            store.clone(),
            DEFAULT_RECONCILE_INTERVAL,
            DEFAULT_MAX_LOOP_RUNTIME,
        );
        Self {
            api,
            inventory,
            store,
            topology,
            enablement,
            lifecycle,
            reconcile_loop,
        }
    }

    // ─── Configuration / discovery ──────────────────────────────────

    pub fn configure(client: &SrsClient, credentials: Credentials) -> MigrateResult<()> {
        if !credentials.is_complete() {
            return Err(MigrateError::configuration(
                "service principal credentials are incomplete",
            ));
        }
        client.set_credentials(credentials);
        Ok(())
    }

    pub async fn discover_infrastructure(&self) -> MigrateResult<TopologyCache> {
        self.topology.resolve().await
    }

    pub async fn infrastructure(&self) -> Option<TopologyCache> {
        self.topology.cached().await
    }

    pub async fn clear_infrastructure_cache(&self) {
        self.topology.invalidate().await;
    }

    /// Machines the appliance has discovered on the source site.
    pub async fn list_source_machines(&self) -> MigrateResult<Vec<MachineDetails>> {
        let topology = self.topology.get().await?;
        if topology.source_site_id.is_empty() {
            return Err(MigrateError::configuration(
                "no source site discovered; is the appliance registered?",
            ));
        }
        self.inventory
            .list_discovered_machines(&topology.source_site_id)
            .await
    }

    // ─── Enablement ─────────────────────────────────────────────────

    pub async fn enable_machines(
        &self,
        specs: Vec<MachineEnableSpec>,
    ) -> MigrateResult<EnableOutcome> {
        let outcome = self.enablement.enable_machines(specs).await?;
        if !outcome.items.is_empty() {
            self.reconcile_loop.start().await;
        }
        Ok(outcome)
    }

    pub async fn enable_for_group(
        &self,
        group: &mut MachineGroup,
        specs: Vec<MachineEnableSpec>,
    ) -> MigrateResult<EnableOutcome> {
        let outcome = self.enablement.enable_for_group(group, specs).await?;
        if !outcome.items.is_empty() {
            self.reconcile_loop.start().await;
        }
        Ok(outcome)
    }

    // ─── Reads ──────────────────────────────────────────────────────

    /// All tracked items, freshly reconciled. A failed reconciliation
    /// degrades to last known state instead of failing the read.
    pub async fn get_all(&self) -> MigrateResult<Vec<ReplicationItem>> {
        if let Err(e) = Reconciler::new(self.api.clone(), self.store.clone())
            .pass()
            .await
        {
            warn!("reconciliation before read failed: {}", e);
        }
        self.store.list().await
    }

    /// One item with, where reachable, a live remote snapshot. The local
    /// record stays authoritative; the overlay is best-effort.
    pub async fn get(&self, item_id: &str) -> MigrateResult<ReplicationView> {
        let item = self
            .store
            .get(item_id)
            .await?
            .ok_or_else(|| MigrateError::not_found(format!("replication item '{}'", item_id)))?;
        let live = self.live_snapshot(&item).await;
        Ok(ReplicationView { item, live })
    }

    async fn live_snapshot(&self, item: &ReplicationItem) -> Option<LiveSnapshot> {
        let remote_name = item.remote_item_id.as_deref()?;
        let remote = match self
            .api
            .get_migration_item(
                &item.vault_name,
                &item.fabric_name,
                &item.container_name,
                remote_name,
            )
            .await
        {
            Ok(found) => found?,
            Err(e) => {
                warn!("live snapshot unavailable for '{}': {}", item.machine_name, e);
                return None;
            }
        };
        let props = &remote.properties;
        Some(LiveSnapshot {
            migration_state: canonical_status(props).to_string(),
            migration_state_description: props
                .migration_state_description
                .clone()
                .unwrap_or_default(),
            progress_percent: props.migration_progress_percentage,
            allowed_operations: props.allowed_operations.clone(),
            health_errors: props
                .health_errors
                .iter()
                .map(|e| HealthError {
                    code: e.error_code.clone().unwrap_or_default(),
                    message: e.error_message.clone().unwrap_or_default(),
                })
                .collect(),
        })
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    pub async fn test_migrate(
        &self,
        item_id: &str,
        network_id: Option<&str>,
        subnet_name: Option<&str>,
    ) -> MigrateResult<ReplicationItem> {
        self.lifecycle
            .test_migrate(item_id, network_id, subnet_name)
            .await
    }

    pub async fn test_migrate_cleanup(
        &self,
        item_id: &str,
        comments: &str,
    ) -> MigrateResult<ReplicationItem> {
        self.lifecycle.test_migrate_cleanup(item_id, comments).await
    }

    pub async fn migrate(
        &self,
        item_id: &str,
        perform_shutdown: bool,
    ) -> MigrateResult<ReplicationItem> {
        self.lifecycle.migrate(item_id, perform_shutdown).await
    }

    pub async fn complete_migration(&self, item_id: &str) -> MigrateResult<ReplicationItem> {
        self.lifecycle.complete_migration(item_id).await
    }

    pub async fn resync(&self, item_id: &str) -> MigrateResult<ReplicationItem> {
        self.lifecycle.resync(item_id).await
    }

    pub async fn cancel(&self, item_id: &str) -> MigrateResult<ReplicationItem> {
        self.lifecycle.cancel(item_id).await
    }

    // ─── Jobs ───────────────────────────────────────────────────────

    pub async fn restart_job(&self, vault: &str, job_id: &str) -> MigrateResult<OperationHandle> {
        self.api.restart_job(vault, job_id).await
    }

    pub async fn get_job(&self, vault: &str, job_id: &str) -> MigrateResult<Option<Job>> {
        self.api.get_job(vault, job_id).await
    }

    // ─── Reconciliation loop ────────────────────────────────────────

    pub async fn start_reconciliation(&self) {
        self.reconcile_loop.start().await;
    }

    pub async fn stop_reconciliation(&self) {
        self.reconcile_loop.stop().await;
    }

    pub async fn is_reconciling(&self) -> bool {
        self.reconcile_loop.is_running().await
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
