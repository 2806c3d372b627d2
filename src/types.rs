//! Local data model: canonical migration status, replication items,
//! target configuration, discovered topology.
//!
//! The local store is a best-effort, self-correcting cache of remote state
//! plus locally-only target configuration. Status fields are owned by the
//! remote service; reconciliation overwrites them without conflict
//! resolution.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Canonical migration status ─────────────────────────────────────

/// Canonical migration status, independent of the remote service's
/// vocabulary. Unmapped remote values are preserved in `Other` so they are
/// flagged rather than dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MigrationStatus {
    Enabling,
    InitialReplication,
    Replicating,
    Protected,
    PlannedFailoverInProgress,
    FailedOver,
    Failed,
    AzureEnableFailed,
    Cancelled,
    Resyncing,
    MigrationInProgress,
    MigrationCompleted,
    /// Remote value with no canonical mapping (forward-compatible passthrough).
    Other(String),
}

impl MigrationStatus {
    /// Terminal statuses are never reconciled again and do not block a new
    /// enablement for the same machine.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FailedOver
                | Self::Failed
                | Self::AzureEnableFailed
                | Self::Cancelled
                | Self::MigrationCompleted
        )
    }

    /// Steady replication state ("protected"): the machine is fully seeded
    /// and delta-syncing.
    pub fn is_steady(&self) -> bool {
        matches!(self, Self::Replicating | Self::Protected)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Enabling => "Enabling",
            Self::InitialReplication => "InitialReplication",
            Self::Replicating => "Replicating",
            Self::Protected => "Protected",
            Self::PlannedFailoverInProgress => "PlannedFailoverInProgress",
            Self::FailedOver => "FailedOver",
            Self::Failed => "Failed",
            Self::AzureEnableFailed => "AzureEnableFailed",
            Self::Cancelled => "Cancelled",
            Self::Resyncing => "Resyncing",
            Self::MigrationInProgress => "MigrationInProgress",
            Self::MigrationCompleted => "MigrationCompleted",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for MigrationStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Enabling" => Self::Enabling,
            "InitialReplication" => Self::InitialReplication,
            "Replicating" => Self::Replicating,
            "Protected" => Self::Protected,
            "PlannedFailoverInProgress" => Self::PlannedFailoverInProgress,
            "FailedOver" => Self::FailedOver,
            "Failed" => Self::Failed,
            "AzureEnableFailed" => Self::AzureEnableFailed,
            "Cancelled" => Self::Cancelled,
            "Resyncing" => Self::Resyncing,
            "MigrationInProgress" => Self::MigrationInProgress,
            "MigrationCompleted" => Self::MigrationCompleted,
            _ => Self::Other(s),
        }
    }
}

impl From<MigrationStatus> for String {
    fn from(s: MigrationStatus) -> String {
        s.as_str().to_string()
    }
}

// ─── Test-migrate sub-state ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TestMigrateState {
    #[default]
    None,
    InProgress,
    Succeeded,
    Failed,
    CleanupInProgress,
    CleanupCompleted,
}

// ─── Replication item ───────────────────────────────────────────────

/// Health error surfaced by the remote service for one item.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl HealthError {
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            code: String::new(),
            message: message.into(),
        }
    }
}

/// One migration attempt of one source machine.
///
/// Created by the enablement workflow, or materialized by reconciliation
/// when an orphan remote item is found. Invariant: at most one non-terminal
/// item per source machine id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationItem {
    pub id: String,
    pub machine_id: String,
    pub machine_name: String,

    // Remote correlation.
    pub vault_name: String,
    pub fabric_name: String,
    pub container_name: String,
    /// Remote migration-item id; absent until the enable call succeeds.
    pub remote_item_id: Option<String>,

    pub target: TargetConfig,

    pub status: MigrationStatus,
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub health_errors: Vec<HealthError>,
    /// Replication progress 0–100.
    #[serde(default)]
    pub progress_percent: f64,
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub test_migrate_state: TestMigrateState,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReplicationItem {
    pub fn new(
        machine_id: impl Into<String>,
        machine_name: impl Into<String>,
        topology: &TopologyCache,
        target: TargetConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            machine_id: machine_id.into(),
            machine_name: machine_name.into(),
            vault_name: topology.vault_name.clone(),
            fabric_name: topology.fabric_name.clone(),
            container_name: topology.container_name.clone(),
            remote_item_id: None,
            target,
            status: MigrationStatus::Enabling,
            health: String::new(),
            health_errors: Vec::new(),
            progress_percent: 0.0,
            last_sync_time: None,
            test_migrate_state: TestMigrateState::None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh `updated_at` after any mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ─── Target configuration ───────────────────────────────────────────

/// Where and how the machine lands in Azure. Locally owned; reconciliation
/// never touches these fields.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub resource_group: String,
    pub virtual_network_id: String,
    pub subnet_name: String,
    pub vm_size: String,
    pub target_region: String,
    #[serde(default)]
    pub storage_account_id: Option<String>,
    /// Explicit staging storage account; used only when it matches the
    /// target region.
    #[serde(default)]
    pub cache_storage_account_id: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub availability_set_id: Option<String>,
    #[serde(default)]
    pub license_type: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

// ─── Disks ──────────────────────────────────────────────────────────

/// Resolved per-disk configuration for an enable-replication request.
/// `disk_id` always comes from the inventory system's machine record;
/// caller-supplied ids may be placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiskConfig {
    pub disk_id: String,
    pub is_os_disk: bool,
    pub disk_type: String,
    pub target_size_gb: u64,
}

/// Caller-supplied disk override, paired with inventory disks by position.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiskOverride {
    /// Ignored for matching; may be a UI placeholder.
    #[serde(default)]
    pub disk_id: Option<String>,
    #[serde(default)]
    pub disk_type: Option<String>,
    #[serde(default)]
    pub target_size_gb: Option<u64>,
}

// ─── Topology cache ─────────────────────────────────────────────────

/// Discovered chain of remote resources required to submit any replication
/// request. Either fully populated or absent; partial topology is never
/// served. `policy_id` may legitimately be empty, which means
/// "infrastructure present but not provisioning-ready".
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopologyCache {
    pub vault_name: String,
    pub fabric_name: String,
    pub container_name: String,
    pub policy_id: String,
    /// Run-as account used by the data-mover role.
    pub data_mover_run_as_account_id: String,
    /// Run-as account used for snapshot operations. Mirrors the external
    /// console: the same site-management credential as the data mover, not
    /// a guest-OS credential.
    pub snapshot_run_as_account_id: String,
    pub source_site_id: String,
    pub cache_storage_account_id: String,
    pub cache_storage_sas_secret_name: String,
    pub target_region: String,
}

impl TopologyCache {
    pub fn is_provision_ready(&self) -> bool {
        !self.policy_id.is_empty()
    }
}

// ─── Machine groups ─────────────────────────────────────────────────

/// Group status marker set once at least one machine in a batch starts
/// replicating.
pub const GROUP_STATUS_REPLICATING: &str = "Replicating";

/// A user-defined group of machines migrated together.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineGroup {
    pub id: String,
    pub name: String,
    pub machine_ids: Vec<String>,
    #[serde(default)]
    pub status: String,
}

// ─── Batch result ───────────────────────────────────────────────────

/// Result of an enablement batch: per-machine outcomes plus per-machine
/// error messages. Never all-or-nothing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnableOutcome {
    pub items: Vec<ReplicationItem>,
    pub errors: Vec<String>,
}

// ─── Live overlay ───────────────────────────────────────────────────

/// Best-effort snapshot of the remote item, distinct from the
/// authoritative local record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot {
    pub migration_state: String,
    #[serde(default)]
    pub migration_state_description: String,
    #[serde(default)]
    pub progress_percent: Option<f64>,
    #[serde(default)]
    pub allowed_operations: Vec<String>,
    #[serde(default)]
    pub health_errors: Vec<HealthError>,
}

/// A replication item plus, where reachable, its live remote overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationView {
    pub item: ReplicationItem,
    #[serde(default)]
    pub live: Option<LiveSnapshot>,
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> TopologyCache {
        TopologyCache {
            vault_name: "migratevault".into(),
            fabric_name: "fabric1".into(),
            container_name: "container1".into(),
            policy_id: "/policies/default".into(),
            data_mover_run_as_account_id: "acct-1".into(),
            snapshot_run_as_account_id: "acct-1".into(),
            source_site_id: "site-1".into(),
            cache_storage_account_id: "/storageAccounts/cache1".into(),
            cache_storage_sas_secret_name: "cache1-sas".into(),
            target_region: "westeurope".into(),
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(MigrationStatus::Cancelled.is_terminal());
        assert!(MigrationStatus::Failed.is_terminal());
        assert!(MigrationStatus::FailedOver.is_terminal());
        assert!(MigrationStatus::AzureEnableFailed.is_terminal());
        assert!(MigrationStatus::MigrationCompleted.is_terminal());
        assert!(!MigrationStatus::Enabling.is_terminal());
        assert!(!MigrationStatus::Replicating.is_terminal());
        assert!(!MigrationStatus::Resyncing.is_terminal());
    }

    #[test]
    fn steady_statuses() {
        assert!(MigrationStatus::Replicating.is_steady());
        assert!(MigrationStatus::Protected.is_steady());
        assert!(!MigrationStatus::InitialReplication.is_steady());
        assert!(!MigrationStatus::MigrationInProgress.is_steady());
    }

    #[test]
    fn status_string_round_trip() {
        let s: MigrationStatus = String::from("Replicating").into();
        assert_eq!(s, MigrationStatus::Replicating);
        let back: String = s.into();
        assert_eq!(back, "Replicating");
    }

    #[test]
    fn unknown_status_passes_through() {
        let s: MigrationStatus = String::from("SomeFutureState").into();
        assert_eq!(s, MigrationStatus::Other("SomeFutureState".into()));
        assert_eq!(s.as_str(), "SomeFutureState");
        assert!(!s.is_terminal());
    }

    #[test]
    fn status_serde_as_string() {
        let json = serde_json::to_string(&MigrationStatus::Enabling).unwrap();
        assert_eq!(json, "\"Enabling\"");
        let s: MigrationStatus = serde_json::from_str("\"MigrationInProgress\"").unwrap();
        assert_eq!(s, MigrationStatus::MigrationInProgress);
    }

    #[test]
    fn new_item_starts_enabling() {
        let item = ReplicationItem::new("m-1", "web01", &topology(), TargetConfig::default());
        assert_eq!(item.status, MigrationStatus::Enabling);
        assert_eq!(item.vault_name, "migratevault");
        assert!(item.remote_item_id.is_none());
        assert!(!item.is_terminal());
        assert_eq!(item.test_migrate_state, TestMigrateState::None);
    }

    #[test]
    fn touch_advances_updated_at() {
        let mut item = ReplicationItem::new("m-1", "web01", &topology(), TargetConfig::default());
        let before = item.updated_at;
        item.touch();
        assert!(item.updated_at >= before);
    }

    #[test]
    fn topology_provision_ready() {
        let mut t = topology();
        assert!(t.is_provision_ready());
        t.policy_id.clear();
        assert!(!t.is_provision_ready());
    }

    #[test]
    fn item_serde_round_trip() {
        let item = ReplicationItem::new("m-9", "db01", &topology(), TargetConfig::default());
        let json = serde_json::to_string(&item).unwrap();
        let d: ReplicationItem = serde_json::from_str(&json).unwrap();
        assert_eq!(d.machine_id, "m-9");
        assert_eq!(d.status, MigrationStatus::Enabling);
    }

    #[test]
    fn disk_override_defaults_empty() {
        let o = DiskOverride::default();
        assert!(o.disk_id.is_none());
        assert!(o.disk_type.is_none());
        assert!(o.target_size_gb.is_none());
    }
}
