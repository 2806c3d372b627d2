//! Wire types for the Azure Site Recovery / Azure Migrate REST surface.
//!
//! Shapes follow the ARM conventions: a `value` list wrapper, camelCase
//! properties bags, and `#[serde(default)]` on every remote field so a
//! missing property never fails deserialization. Several request fields are
//! stringly typed ("true"/"false", decimal byte counts) because the remote
//! schema demands string-encoded booleans and sizes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Common ─────────────────────────────────────────────────────────

/// Generic ARM list wrapper (`value` array with optional `nextLink`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ArmList<T> {
    #[serde(default)]
    pub value: Vec<T>,
    #[serde(default)]
    pub next_link: Option<String>,
}

/// Handle returned for 202/Accepted responses; `operation_url` points at
/// the asynchronous-operation status endpoint for callers tracking
/// long-running work.
#[derive(Debug, Clone, Default)]
pub struct OperationHandle {
    pub operation_url: Option<String>,
    pub body: Option<Value>,
}

// ─── Vault / fabric / container ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Fabric {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: FabricProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FabricProperties {
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub custom_details: FabricCustomDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FabricCustomDetails {
    /// Provider-type marker, e.g. "VMwareV2" for the VMware source fabric.
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub vmware_site_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionContainer {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMapping {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: ContainerMappingProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMappingProperties {
    #[serde(default)]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub target_protection_container_id: Option<String>,
    #[serde(default)]
    pub provider_specific_details: MappingProviderDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MappingProviderDetails {
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub target_location: Option<String>,
    #[serde(default)]
    pub key_vault_id: Option<String>,
    #[serde(default)]
    pub storage_account_id: Option<String>,
    #[serde(default)]
    pub storage_account_sas_secret_name: Option<String>,
}

// ─── Run-as accounts ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunAsAccount {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: RunAsAccountProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunAsAccountProperties {
    #[serde(default)]
    pub display_name: Option<String>,
    /// "VMwareFabric" for site-management credentials, "VMware" for
    /// guest-OS credentials.
    #[serde(default)]
    pub credential_type: Option<String>,
}

impl RunAsAccount {
    pub fn is_site_management(&self) -> bool {
        self.properties
            .credential_type
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case("VMwareFabric"))
            .unwrap_or(false)
    }
}

// ─── Migration items ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MigrationItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: MigrationItemProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MigrationItemProperties {
    #[serde(default)]
    pub machine_name: Option<String>,
    /// Newer migration-state vocabulary.
    #[serde(default)]
    pub migration_state: Option<String>,
    #[serde(default)]
    pub migration_state_description: Option<String>,
    /// Older protection-state vocabulary, still emitted for some items.
    #[serde(default)]
    pub protection_state: Option<String>,
    #[serde(default)]
    pub test_migrate_state: Option<String>,
    #[serde(default)]
    pub health: Option<String>,
    #[serde(default)]
    pub health_errors: Vec<RemoteHealthError>,
    #[serde(default)]
    pub migration_progress_percentage: Option<f64>,
    #[serde(default)]
    pub last_successful_migrate_time: Option<String>,
    #[serde(default)]
    pub allowed_operations: Vec<String>,
    #[serde(default)]
    pub provider_specific_details: MigrationItemProviderDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteHealthError {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MigrationItemProviderDetails {
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub target_location: Option<String>,
    #[serde(default)]
    pub target_resource_group_id: Option<String>,
    #[serde(default)]
    pub initial_seeding_progress_percentage: Option<f64>,
    #[serde(default)]
    pub last_recovery_point_received: Option<String>,
    #[serde(default)]
    pub data_mover_run_as_account_id: Option<String>,
    #[serde(default)]
    pub snapshot_run_as_account_id: Option<String>,
    #[serde(default)]
    pub protected_disks: Vec<ProtectedDisk>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedDisk {
    #[serde(default)]
    pub disk_id: Option<String>,
    #[serde(default)]
    pub is_os_disk: Option<String>,
    #[serde(default)]
    pub log_storage_account_id: Option<String>,
    #[serde(default)]
    pub capacity_in_bytes: Option<u64>,
}

// ─── Recovery points / jobs ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPoint {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: RecoveryPointProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPointProperties {
    #[serde(default)]
    pub recovery_point_time: Option<String>,
    #[serde(default)]
    pub recovery_point_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: JobProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobProperties {
    #[serde(default)]
    pub scenario_name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub state_description: Option<String>,
    #[serde(default)]
    pub target_object_name: Option<String>,
}

// ─── Supporting ARM resources ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccount {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroup {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
}

// ─── Request payloads ───────────────────────────────────────────────

/// Enable-replication request (VMware CBT provider).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableMigrationRequest {
    pub properties: EnableMigrationProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableMigrationProperties {
    pub policy_id: String,
    pub provider_specific_details: CbtEnableDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CbtEnableDetails {
    pub instance_type: String,
    pub vmware_machine_id: String,
    pub disks_to_include: Vec<CbtDiskInput>,
    pub data_mover_run_as_account_id: String,
    pub snapshot_run_as_account_id: String,
    pub target_resource_group_id: String,
    pub target_network_id: String,
    pub target_subnet_name: String,
    pub target_vm_name: String,
    pub target_vm_size: String,
    /// "true"/"false"; the remote schema wants a string here.
    pub perform_auto_resync: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_availability_set_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_type: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub target_vm_tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CbtDiskInput {
    pub disk_id: String,
    /// "true"/"false", string-encoded boolean.
    #[serde(rename = "isOSDisk")]
    pub is_os_disk: String,
    /// Decimal byte count, string-encoded.
    pub disk_size_in_bytes: String,
    pub log_storage_account_id: String,
    pub log_storage_account_sas_secret_name: String,
    pub disk_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMigrateRequest {
    pub properties: TestMigrateProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMigrateProperties {
    pub provider_specific_details: TestMigrateProviderDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMigrateProviderDetails {
    pub instance_type: String,
    pub recovery_point_id: String,
    pub network_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateRequest {
    pub properties: MigrateProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateProperties {
    pub provider_specific_details: MigrateProviderDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateProviderDetails {
    pub instance_type: String,
    /// "true"/"false", string-encoded boolean.
    pub perform_shutdown: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePolicyRequest {
    pub properties: CreatePolicyProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePolicyProperties {
    pub provider_specific_input: CbtPolicyInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CbtPolicyInput {
    pub instance_type: String,
    pub recovery_point_history_in_minutes: u32,
    pub crash_consistent_frequency_in_minutes: u32,
    pub app_consistent_frequency_in_minutes: u32,
}

impl CreatePolicyRequest {
    /// Default migration policy: 1 h recovery-point history, 4 h
    /// app-consistent frequency, as provisioned by the original console.
    pub fn default_migration_policy() -> Self {
        Self {
            properties: CreatePolicyProperties {
                provider_specific_input: CbtPolicyInput {
                    instance_type: "VMwareCbtPolicyCreationInput".into(),
                    recovery_point_history_in_minutes: 60,
                    crash_consistent_frequency_in_minutes: 60,
                    app_consistent_frequency_in_minutes: 240,
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMappingRequest {
    pub properties: CreateMappingProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMappingProperties {
    /// "Microsoft Azure" for a to-Azure mapping.
    pub target_protection_container_id: String,
    pub policy_id: String,
    pub provider_specific_input: Value,
}

// ─── Constants ──────────────────────────────────────────────────────

/// Azure management base URL.
pub const ARM_BASE: &str = "https://management.azure.com";

/// Provider instance type for VMware-to-Azure migration.
pub const CBT_INSTANCE_TYPE: &str = "VMwareCbt";

pub mod api_versions {
    pub const SITE_RECOVERY: &str = "2022-05-01";
    pub const MIGRATE_SITES: &str = "2020-01-01";
    pub const STORAGE: &str = "2023-05-01";
    pub const RESOURCES: &str = "2024-03-01";
}

// ─── Tests ──────────────────────────────────────────────────────────
