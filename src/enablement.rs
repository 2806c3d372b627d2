//! Enable-replication workflow.
//!
//! Batch entry point for starting replication of source machines. The
//! batch is never all-or-nothing: machines are processed sequentially and
//! each failure is recorded without aborting the rest. Inventory is the
//! authority on disk identity; caller-supplied disk overrides are paired
//! with inventory disks by position only.

use std::sync::Arc;

use log::{info, warn};

use crate::api::SiteRecoveryApi;
use crate::error::{MigrateError, MigrateResult};
use crate::inventory::{InventoryApi, MachineDetails};
use crate::remote::{
    CbtDiskInput, CbtEnableDetails, EnableMigrationProperties, EnableMigrationRequest,
    CBT_INSTANCE_TYPE,
};
use crate::store::ItemStore;
use crate::topology::TopologyResolver;
use crate::types::{
    DiskConfig, DiskOverride, EnableOutcome, MachineGroup, MigrationStatus, ReplicationItem,
    TargetConfig, TopologyCache, GROUP_STATUS_REPLICATING,
};

const GIB: u64 = 1024 * 1024 * 1024;
const DEFAULT_DISK_TYPE: &str = "Standard_LRS";

/// One machine in an enablement batch.
#[derive(Debug, Clone)]
pub struct MachineEnableSpec {
    pub machine_id: String,
    pub target: TargetConfig,
    pub disk_overrides: Vec<DiskOverride>,
}

pub struct EnablementWorkflow {
    api: Arc<dyn SiteRecoveryApi>,
    inventory: Arc<dyn InventoryApi>,
    topology: Arc<TopologyResolver>,
    store: Arc<dyn ItemStore>,
}

impl EnablementWorkflow {
    pub fn new(
        api: Arc<dyn SiteRecoveryApi>,
        inventory: Arc<dyn InventoryApi>,
        topology: Arc<TopologyResolver>,
        store: Arc<dyn ItemStore>,
    ) -> Self {
        Self {
            api,
            inventory,
            topology,
            store,
        }
    }

    /// Enable replication for a batch of machines. The topology cache is
    /// invalidated up front so a stale policy or staging account never
    /// feeds a new batch.
    pub async fn enable_machines(
        &self,
        specs: Vec<MachineEnableSpec>,
    ) -> MigrateResult<EnableOutcome> {
        self.topology.invalidate().await;
        let topology = self.topology.resolve().await?;
        if !topology.is_provision_ready() {
            return Err(MigrateError::configuration(
                "replication infrastructure has no policy mapping; cannot enable replication",
            ));
        }

        let mut outcome = EnableOutcome::default();
        let (mut enabled, mut skipped, mut failed) = (0usize, 0usize, 0usize);
        for spec in specs {
            if let Some(existing) = self.store.active_for_machine(&spec.machine_id).await? {
                info!(
                    "machine '{}' already has active item '{}' ({}); skipping",
                    spec.machine_id, existing.id, existing.status
                );
                outcome.items.push(existing);
                skipped += 1;
                continue;
            }
            let machine_id = spec.machine_id.clone();
            let target = spec.target.clone();
            match self.enable_one(&topology, spec).await {
                Ok(item) => {
                    if item.status == MigrationStatus::Enabling {
                        enabled += 1;
                    } else {
                        let message = item
                            .health_errors
                            .first()
                            .map(|e| e.message.clone())
                            .unwrap_or_else(|| "enable replication rejected".into());
                        outcome
                            .errors
                            .push(format!("{}: {}", item.machine_name, message));
                        failed += 1;
                    }
                    outcome.items.push(item);
                }
                Err(e) => {
                    warn!("enablement failed for '{}': {}", machine_id, e);
                    let item = self
                        .record_failure(&topology, &machine_id, target, &e)
                        .await?;
                    outcome.errors.push(format!("{}: {}", machine_id, e));
                    outcome.items.push(item);
                    failed += 1;
                }
            }
        }
        info!(
            "enablement batch done: {} enabled, {} skipped, {} failed",
            enabled, skipped, failed
        );
        Ok(outcome)
    }

    /// Batch entry that also flips the group status once any machine in
    /// the group starts replicating.
    pub async fn enable_for_group(
        &self,
        group: &mut MachineGroup,
        specs: Vec<MachineEnableSpec>,
    ) -> MigrateResult<EnableOutcome> {
        let outcome = self.enable_machines(specs).await?;
        if outcome
            .items
            .iter()
            .any(|i| i.status == MigrationStatus::Enabling || i.status.is_steady())
        {
            group.status = GROUP_STATUS_REPLICATING.into();
        }
        Ok(outcome)
    }

    /// A machine that failed before any remote submission still leaves a
    /// terminal `AzureEnableFailed` record behind, so the attempt is
    /// visible and the machine can be retried.
    async fn record_failure(
        &self,
        topology: &TopologyCache,
        machine_id: &str,
        target: TargetConfig,
        error: &MigrateError,
    ) -> MigrateResult<ReplicationItem> {
        let name = machine_id.rsplit('/').next().unwrap_or(machine_id).to_string();
        let mut item = ReplicationItem::new(machine_id, name, topology, target);
        item.status = MigrationStatus::AzureEnableFailed;
        item.health_errors = vec![crate::types::HealthError::from_message(error.to_string())];
        self.store.insert(item.clone()).await?;
        Ok(item)
    }

    async fn enable_one(
        &self,
        topology: &TopologyCache,
        spec: MachineEnableSpec,
    ) -> MigrateResult<ReplicationItem> {
        let machine = self
            .inventory
            .get_machine_details(&spec.machine_id)
            .await?
            .ok_or_else(|| {
                MigrateError::not_found(format!(
                    "machine '{}' not present in site inventory",
                    spec.machine_id
                ))
            })?;
        if machine.disks.is_empty() {
            return Err(MigrateError::validation(format!(
                "machine '{}' reports no disks",
                machine.name
            )));
        }

        let mut target = spec.target;
        if target.target_region.is_empty() {
            target.target_region = topology.target_region.clone();
        }
        let staging = self.staging_account(topology, &target).await?;

        let disks = resolve_disks(&machine, &spec.disk_overrides);
        let request = build_enable_request(topology, &machine, &target, &disks, &staging);

        let mut item = ReplicationItem::new(
            machine.machine_id.clone(),
            machine.name.clone(),
            topology,
            target,
        );
        self.store.insert(item.clone()).await?;

        match self
            .api
            .enable_replication(
                &topology.vault_name,
                &topology.fabric_name,
                &topology.container_name,
                &machine.name,
                &request,
            )
            .await
        {
            Ok(_) => {
                item = self
                    .store
                    .update(
                        &item.id,
                        Box::new({
                            let remote_name = machine.name.clone();
                            move |it| it.remote_item_id = Some(remote_name)
                        }),
                    )
                    .await?
                    .unwrap_or(item);
                info!("replication enabling for machine '{}'", machine.name);
                Ok(item)
            }
            Err(e) => {
                let message = e.to_string();
                item = self
                    .store
                    .update(
                        &item.id,
                        Box::new(move |it| {
                            it.status = MigrationStatus::AzureEnableFailed;
                            it.health_errors =
                                vec![crate::types::HealthError::from_message(message.clone())];
                        }),
                    )
                    .await?
                    .unwrap_or(item);
                warn!("enable call rejected for machine '{}': {}", machine.name, e);
                Ok(item)
            }
        }
    }

    /// Staging storage account for replication log uploads. An account in
    /// the wrong region is never used. Resolution order: the explicitly
    /// requested account when its region matches, the cached discovery
    /// result when its region matches, then a search of the subscription
    /// for a region-matching account. Only a fruitless search fails the
    /// machine, with the region named.
    async fn staging_account(
        &self,
        topology: &TopologyCache,
        target: &TargetConfig,
    ) -> MigrateResult<StagingAccount> {
        let accounts = self.api.list_storage_accounts().await?;

        if let Some(requested) = target
            .cache_storage_account_id
            .as_ref()
            .filter(|id| !id.is_empty())
        {
            match accounts.iter().find(|a| &a.id == requested) {
                Some(acct) if acct.location.eq_ignore_ascii_case(&target.target_region) => {
                    return Ok(StagingAccount {
                        id: acct.id.clone(),
                        sas_secret_name: format!("{}-cacheSas", acct.name),
                    });
                }
                Some(acct) => warn!(
                    "requested staging account '{}' is in '{}', not '{}'; ignoring it",
                    acct.name, acct.location, target.target_region
                ),
                None => warn!(
                    "requested staging account '{}' does not exist; ignoring it",
                    requested
                ),
            }
        }

        if !topology.cache_storage_account_id.is_empty() {
            match accounts
                .iter()
                .find(|a| a.id == topology.cache_storage_account_id)
            {
                Some(acct) if !acct.location.eq_ignore_ascii_case(&target.target_region) => {
                    warn!(
                        "cached staging account '{}' is in '{}', not '{}'; searching for a local one",
                        acct.name, acct.location, target.target_region
                    );
                }
                // Region verified, or the account is not visible in the
                // subscription listing; use the cached id as resolved.
                _ => {
                    return Ok(StagingAccount {
                        id: topology.cache_storage_account_id.clone(),
                        sas_secret_name: topology.cache_storage_sas_secret_name.clone(),
                    });
                }
            }
        }

        accounts
            .iter()
            .find(|a| a.location.eq_ignore_ascii_case(&target.target_region))
            .map(|a| StagingAccount {
                id: a.id.clone(),
                sas_secret_name: format!("{}-cacheSas", a.name),
            })
            .ok_or_else(|| {
                MigrateError::configuration(format!(
                    "no staging storage account exists in target region '{}'",
                    target.target_region
                ))
            })
    }
}

struct StagingAccount {
    id: String,
    sas_secret_name: String,
}

/// Pair inventory disks with caller overrides by position. Disk identity
/// always comes from inventory; the first disk is the OS disk. Target size
/// never shrinks below the source size rounded up to a whole GiB.
fn resolve_disks(machine: &MachineDetails, overrides: &[DiskOverride]) -> Vec<DiskConfig> {
    machine
        .disks
        .iter()
        .enumerate()
        .map(|(idx, disk)| {
            let ov = overrides.get(idx);
            let source_gb = disk.size_bytes.div_ceil(GIB).max(1);
            let target_size_gb = ov
                .and_then(|o| o.target_size_gb)
                .map_or(source_gb, |requested| requested.max(source_gb));
            DiskConfig {
                disk_id: disk.disk_id.clone(),
                is_os_disk: idx == 0,
                disk_type: ov
                    .and_then(|o| o.disk_type.clone())
                    .unwrap_or_else(|| DEFAULT_DISK_TYPE.into()),
                target_size_gb,
            }
        })
        .collect()
}

fn build_enable_request(
    topology: &TopologyCache,
    machine: &MachineDetails,
    target: &TargetConfig,
    disks: &[DiskConfig],
    staging: &StagingAccount,
) -> EnableMigrationRequest {
    let disks_to_include = disks
        .iter()
        .map(|d| CbtDiskInput {
            disk_id: d.disk_id.clone(),
            is_os_disk: if d.is_os_disk { "true" } else { "false" }.into(),
            disk_size_in_bytes: (d.target_size_gb * GIB).to_string(),
            log_storage_account_id: staging.id.clone(),
            log_storage_account_sas_secret_name: staging.sas_secret_name.clone(),
            disk_type: d.disk_type.clone(),
        })
        .collect();
    EnableMigrationRequest {
        properties: EnableMigrationProperties {
            policy_id: topology.policy_id.clone(),
            provider_specific_details: CbtEnableDetails {
                instance_type: CBT_INSTANCE_TYPE.into(),
                vmware_machine_id: machine.machine_id.clone(),
                disks_to_include,
                data_mover_run_as_account_id: topology.data_mover_run_as_account_id.clone(),
                snapshot_run_as_account_id: topology.snapshot_run_as_account_id.clone(),
                target_resource_group_id: target.resource_group.clone(),
                target_network_id: target.virtual_network_id.clone(),
                target_subnet_name: target.subnet_name.clone(),
                target_vm_name: machine.name.clone(),
                target_vm_size: target.vm_size.clone(),
                perform_auto_resync: "true".into(),
                target_availability_zone: target.availability_zone.clone(),
                target_availability_set_id: target.availability_set_id.clone(),
                license_type: target.license_type.clone(),
                target_vm_tags: target.tags.clone(),
            },
        },
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
