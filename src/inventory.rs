//! Source-machine inventory collaborator.
//!
//! The inventory system (Azure Migrate discovered-machine store) is the
//! source of truth for machine disk identity and size. Disk ids supplied by
//! callers may be UI placeholders; everything submitted to the replication
//! service uses inventory disk ids.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::SrsClient;
use crate::error::MigrateResult;
use crate::remote::api_versions;

// ─── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredMachine {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: DiscoveredMachineProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredMachineProperties {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub disks: Vec<InventoryDisk>,
    #[serde(default)]
    pub operating_system_details: OperatingSystemDetails,
    #[serde(default)]
    pub network_adapters: Vec<NetworkAdapter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InventoryDisk {
    /// Authoritative unique disk identifier.
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Byte-accurate source size.
    #[serde(default)]
    pub max_size_in_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystemDetails {
    #[serde(default)]
    pub os_type: Option<String>,
    #[serde(default)]
    pub os_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAdapter {
    #[serde(default)]
    pub ip_address_list: Vec<String>,
}

// ─── Domain shape ───────────────────────────────────────────────────

/// Flattened machine record handed to the enablement workflow.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineDetails {
    pub machine_id: String,
    pub name: String,
    pub os_type: String,
    pub ip_addresses: Vec<String>,
    /// Positional order as reported by the hypervisor; OS disk first.
    pub disks: Vec<SourceDisk>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceDisk {
    pub disk_id: String,
    pub label: String,
    pub size_bytes: u64,
}

impl From<DiscoveredMachine> for MachineDetails {
    fn from(machine: DiscoveredMachine) -> Self {
        let name = machine
            .properties
            .display_name
            .clone()
            .unwrap_or_else(|| machine.name.clone());
        let ip_addresses = machine
            .properties
            .network_adapters
            .iter()
            .flat_map(|a| a.ip_address_list.iter().cloned())
            .collect();
        let disks = machine
            .properties
            .disks
            .into_iter()
            .map(|d| SourceDisk {
                disk_id: d.uuid,
                label: d.label.unwrap_or_default(),
                size_bytes: d.max_size_in_bytes,
            })
            .collect();
        Self {
            machine_id: machine.id,
            name,
            os_type: machine
                .properties
                .operating_system_details
                .os_type
                .unwrap_or_default(),
            ip_addresses,
            disks,
        }
    }
}

// ─── API seam ───────────────────────────────────────────────────────

#[async_trait]
pub trait InventoryApi: Send + Sync {
    /// Machines discovered on a source site (`site_id` is a full ARM id).
    async fn list_discovered_machines(&self, site_id: &str)
        -> MigrateResult<Vec<MachineDetails>>;
    /// Full machine record, `None` when inventory has not discovered it.
    async fn get_machine_details(
        &self,
        machine_id: &str,
    ) -> MigrateResult<Option<MachineDetails>>;
}

/// ARM-backed inventory gateway.
pub struct SiteInventoryGateway {
    client: std::sync::Arc<SrsClient>,
}

impl SiteInventoryGateway {
    pub fn new(client: std::sync::Arc<SrsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InventoryApi for SiteInventoryGateway {
    async fn list_discovered_machines(
        &self,
        site_id: &str,
    ) -> MigrateResult<Vec<MachineDetails>> {
        let url = SrsClient::arm_url(&format!(
            "{}/machines?api-version={}",
            site_id,
            api_versions::MIGRATE_SITES
        ));
        let machines: Vec<DiscoveredMachine> = self.client.get_all_pages(&url).await?;
        Ok(machines.into_iter().map(MachineDetails::from).collect())
    }

    async fn get_machine_details(
        &self,
        machine_id: &str,
    ) -> MigrateResult<Option<MachineDetails>> {
        let url = SrsClient::arm_url(&format!(
            "{}?api-version={}",
            machine_id,
            api_versions::MIGRATE_SITES
        ));
        let machine: Option<DiscoveredMachine> = self.client.get_optional(&url).await?;
        Ok(machine.map(MachineDetails::from))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
