//! Typed surface over the Site Recovery / Migrate REST API.
//!
//! `SiteRecoveryApi` is the seam the orchestration components depend on;
//! `SrsGateway` is the production implementation building vault-scoped ARM
//! URLs over `SrsClient`. Tests substitute mock implementations.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::json;

use crate::client::SrsClient;
use crate::error::MigrateResult;
use crate::remote::{
    api_versions, ContainerMapping, CreateMappingRequest, CreatePolicyRequest,
    EnableMigrationRequest, Fabric, Job, MigrateRequest, MigrationItem, OperationHandle,
    ProtectionContainer, RecoveryPoint, ResourceGroup, RunAsAccount, StorageAccount,
    TestMigrateRequest, Vault,
};

/// Remote operations required by topology discovery, enablement,
/// reconciliation and the lifecycle state machine.
#[async_trait]
pub trait SiteRecoveryApi: Send + Sync {
    // Topology discovery.
    async fn list_vaults(&self) -> MigrateResult<Vec<Vault>>;
    async fn list_fabrics(&self, vault: &str) -> MigrateResult<Vec<Fabric>>;
    async fn list_containers(
        &self,
        vault: &str,
        fabric: &str,
    ) -> MigrateResult<Vec<ProtectionContainer>>;
    async fn list_container_mappings(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
    ) -> MigrateResult<Vec<ContainerMapping>>;
    async fn list_vault_mappings(&self, vault: &str) -> MigrateResult<Vec<ContainerMapping>>;
    async fn create_policy(
        &self,
        vault: &str,
        name: &str,
        request: &CreatePolicyRequest,
    ) -> MigrateResult<OperationHandle>;
    async fn create_container_mapping(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        name: &str,
        request: &CreateMappingRequest,
    ) -> MigrateResult<OperationHandle>;
    /// Run-as accounts registered against a source site (`site_id` is a
    /// full ARM resource id).
    async fn list_run_as_accounts(&self, site_id: &str) -> MigrateResult<Vec<RunAsAccount>>;
    async fn list_storage_accounts(&self) -> MigrateResult<Vec<StorageAccount>>;
    async fn get_resource_group(&self, name: &str) -> MigrateResult<Option<ResourceGroup>>;
    /// Staging storage account recorded in the migrate project's solution
    /// configuration, when present.
    async fn get_solution_cache_storage(&self) -> MigrateResult<Option<String>>;

    // Migration items.
    async fn list_migration_items(&self, vault: &str) -> MigrateResult<Vec<MigrationItem>>;
    async fn get_migration_item(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
    ) -> MigrateResult<Option<MigrationItem>>;
    async fn enable_replication(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
        request: &EnableMigrationRequest,
    ) -> MigrateResult<OperationHandle>;

    // Lifecycle.
    async fn list_recovery_points(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
    ) -> MigrateResult<Vec<RecoveryPoint>>;
    async fn test_migrate(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
        request: &TestMigrateRequest,
    ) -> MigrateResult<OperationHandle>;
    async fn test_migrate_cleanup(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
        comments: &str,
    ) -> MigrateResult<OperationHandle>;
    async fn migrate(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
        request: &MigrateRequest,
    ) -> MigrateResult<OperationHandle>;
    async fn resync(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
    ) -> MigrateResult<OperationHandle>;
    /// Finalize a migrated item (complete migration).
    async fn delete_migration_item(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
    ) -> MigrateResult<OperationHandle>;
    /// Force-remove an item regardless of its replication state (cancel).
    async fn disable_replication(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
    ) -> MigrateResult<OperationHandle>;

    // Jobs.
    async fn restart_job(&self, vault: &str, job_id: &str) -> MigrateResult<OperationHandle>;
    async fn get_job(&self, vault: &str, job_id: &str) -> MigrateResult<Option<Job>>;
}

// ─── Production gateway ─────────────────────────────────────────────

/// ARM-backed implementation of `SiteRecoveryApi`.
pub struct SrsGateway {
    client: Arc<SrsClient>,
}

impl SrsGateway {
    pub fn new(client: Arc<SrsClient>) -> Self {
        Self { client }
    }

    fn item_path(fabric: &str, container: &str, item: &str) -> String {
        format!(
            "/replicationFabrics/{}/replicationProtectionContainers/{}/replicationMigrationItems/{}",
            fabric, container, item
        )
    }

    fn item_url(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
        action: &str,
    ) -> MigrateResult<String> {
        self.client.vault_url(
            vault,
            &format!(
                "{}{}?api-version={}",
                Self::item_path(fabric, container, item),
                action,
                api_versions::SITE_RECOVERY
            ),
        )
    }
}

#[async_trait]
impl SiteRecoveryApi for SrsGateway {
    async fn list_vaults(&self) -> MigrateResult<Vec<Vault>> {
        let url = self.client.subscription_url(&format!(
            "/providers/Microsoft.RecoveryServices/vaults?api-version={}",
            api_versions::SITE_RECOVERY
        ))?;
        self.client.get_all_pages(&url).await
    }

    async fn list_fabrics(&self, vault: &str) -> MigrateResult<Vec<Fabric>> {
        let url = self.client.vault_url(
            vault,
            &format!(
                "/replicationFabrics?api-version={}",
                api_versions::SITE_RECOVERY
            ),
        )?;
        self.client.get_all_pages(&url).await
    }

    async fn list_containers(
        &self,
        vault: &str,
        fabric: &str,
    ) -> MigrateResult<Vec<ProtectionContainer>> {
        let url = self.client.vault_url(
            vault,
            &format!(
                "/replicationFabrics/{}/replicationProtectionContainers?api-version={}",
                fabric,
                api_versions::SITE_RECOVERY
            ),
        )?;
        self.client.get_all_pages(&url).await
    }

    async fn list_container_mappings(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
    ) -> MigrateResult<Vec<ContainerMapping>> {
        let url = self.client.vault_url(
            vault,
            &format!(
                "/replicationFabrics/{}/replicationProtectionContainers/{}/replicationProtectionContainerMappings?api-version={}",
                fabric, container,
                api_versions::SITE_RECOVERY
            ),
        )?;
        self.client.get_all_pages(&url).await
    }

    async fn list_vault_mappings(&self, vault: &str) -> MigrateResult<Vec<ContainerMapping>> {
        let url = self.client.vault_url(
            vault,
            &format!(
                "/replicationProtectionContainerMappings?api-version={}",
                api_versions::SITE_RECOVERY
            ),
        )?;
        self.client.get_all_pages(&url).await
    }

    async fn create_policy(
        &self,
        vault: &str,
        name: &str,
        request: &CreatePolicyRequest,
    ) -> MigrateResult<OperationHandle> {
        let url = self.client.vault_url(
            vault,
            &format!(
                "/replicationPolicies/{}?api-version={}",
                name,
                api_versions::SITE_RECOVERY
            ),
        )?;
        debug!("create_policy({}) → {}", name, url);
        self.client.put_accepted(&url, request).await
    }

    async fn create_container_mapping(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        name: &str,
        request: &CreateMappingRequest,
    ) -> MigrateResult<OperationHandle> {
        let url = self.client.vault_url(
            vault,
            &format!(
                "/replicationFabrics/{}/replicationProtectionContainers/{}/replicationProtectionContainerMappings/{}?api-version={}",
                fabric, container, name,
                api_versions::SITE_RECOVERY
            ),
        )?;
        debug!("create_container_mapping({}) → {}", name, url);
        self.client.put_accepted(&url, request).await
    }

    async fn list_run_as_accounts(&self, site_id: &str) -> MigrateResult<Vec<RunAsAccount>> {
        let url = SrsClient::arm_url(&format!(
            "{}/runAsAccounts?api-version={}",
            site_id,
            api_versions::MIGRATE_SITES
        ));
        self.client.get_all_pages(&url).await
    }

    async fn list_storage_accounts(&self) -> MigrateResult<Vec<StorageAccount>> {
        let url = self.client.subscription_url(&format!(
            "/providers/Microsoft.Storage/storageAccounts?api-version={}",
            api_versions::STORAGE
        ))?;
        self.client.get_all_pages(&url).await
    }

    async fn get_resource_group(&self, name: &str) -> MigrateResult<Option<ResourceGroup>> {
        let url = self.client.subscription_url(&format!(
            "/resourceGroups/{}?api-version={}",
            name,
            api_versions::RESOURCES
        ))?;
        self.client.get_optional(&url).await
    }

    async fn get_solution_cache_storage(&self) -> MigrateResult<Option<String>> {
        // The migrate project's server-migration solution records the
        // staging storage account under extendedDetails.
        let rg = self.client.resource_group()?;
        let url = self.client.subscription_url(&format!(
            "/resourceGroups/{}/providers/Microsoft.Migrate/migrateProjects?api-version={}",
            rg,
            api_versions::MIGRATE_SITES
        ))?;
        let projects: Vec<serde_json::Value> = self.client.get_all_pages(&url).await?;
        for project in &projects {
            let Some(name) = project.get("name").and_then(|n| n.as_str()) else {
                continue;
            };
            let solution_url = self.client.subscription_url(&format!(
                "/resourceGroups/{}/providers/Microsoft.Migrate/migrateProjects/{}/solutions/Servers-Migration-ServerMigration?api-version={}",
                rg, name,
                api_versions::MIGRATE_SITES
            ))?;
            let solution: Option<serde_json::Value> =
                self.client.get_optional(&solution_url).await?;
            let account = solution
                .as_ref()
                .and_then(|s| s.pointer("/properties/details/extendedDetails/replicationStorageAccountId"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if account.is_some() {
                return Ok(account);
            }
        }
        Ok(None)
    }

    async fn list_migration_items(&self, vault: &str) -> MigrateResult<Vec<MigrationItem>> {
        let url = self.client.vault_url(
            vault,
            &format!(
                "/replicationMigrationItems?api-version={}",
                api_versions::SITE_RECOVERY
            ),
        )?;
        self.client.get_all_pages(&url).await
    }

    async fn get_migration_item(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
    ) -> MigrateResult<Option<MigrationItem>> {
        let url = self.item_url(vault, fabric, container, item, "")?;
        self.client.get_optional(&url).await
    }

    async fn enable_replication(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
        request: &EnableMigrationRequest,
    ) -> MigrateResult<OperationHandle> {
        let url = self.item_url(vault, fabric, container, item, "")?;
        debug!("enable_replication({}) → {}", item, url);
        self.client.put_accepted(&url, request).await
    }

    async fn list_recovery_points(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
    ) -> MigrateResult<Vec<RecoveryPoint>> {
        let url = self.item_url(vault, fabric, container, item, "/migrationRecoveryPoints")?;
        self.client.get_all_pages(&url).await
    }

    async fn test_migrate(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
        request: &TestMigrateRequest,
    ) -> MigrateResult<OperationHandle> {
        let url = self.item_url(vault, fabric, container, item, "/testMigrate")?;
        debug!("test_migrate({}) → {}", item, url);
        self.client.post_accepted(&url, Some(request)).await
    }

    async fn test_migrate_cleanup(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
        comments: &str,
    ) -> MigrateResult<OperationHandle> {
        let url = self.item_url(vault, fabric, container, item, "/testMigrateCleanup")?;
        debug!("test_migrate_cleanup({}) → {}", item, url);
        let body = json!({ "properties": { "comments": comments } });
        self.client.post_accepted(&url, Some(&body)).await
    }

    async fn migrate(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
        request: &MigrateRequest,
    ) -> MigrateResult<OperationHandle> {
        let url = self.item_url(vault, fabric, container, item, "/migrate")?;
        debug!("migrate({}) → {}", item, url);
        self.client.post_accepted(&url, Some(request)).await
    }

    async fn resync(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
    ) -> MigrateResult<OperationHandle> {
        let url = self.item_url(vault, fabric, container, item, "/resync")?;
        debug!("resync({}) → {}", item, url);
        let body = json!({
            "properties": {
                "providerSpecificDetails": { "instanceType": crate::remote::CBT_INSTANCE_TYPE }
            }
        });
        self.client.post_accepted(&url, Some(&body)).await
    }

    async fn delete_migration_item(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
    ) -> MigrateResult<OperationHandle> {
        let url = self.item_url(vault, fabric, container, item, "")?;
        debug!("delete_migration_item({}) → {}", item, url);
        self.client.delete_accepted(&url).await
    }

    async fn disable_replication(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
        item: &str,
    ) -> MigrateResult<OperationHandle> {
        let url = self.client.vault_url(
            vault,
            &format!(
                "{}?deleteOption=ForceDelete&api-version={}",
                Self::item_path(fabric, container, item),
                api_versions::SITE_RECOVERY
            ),
        )?;
        debug!("disable_replication({}) → {}", item, url);
        self.client.delete_accepted(&url).await
    }

    async fn restart_job(&self, vault: &str, job_id: &str) -> MigrateResult<OperationHandle> {
        let url = self.client.vault_url(
            vault,
            &format!(
                "/replicationJobs/{}/restart?api-version={}",
                job_id,
                api_versions::SITE_RECOVERY
            ),
        )?;
        debug!("restart_job({}) → {}", job_id, url);
        self.client.post_accepted::<serde_json::Value>(&url, None).await
    }

    async fn get_job(&self, vault: &str, job_id: &str) -> MigrateResult<Option<Job>> {
        let url = self.client.vault_url(
            vault,
            &format!(
                "/replicationJobs/{}?api-version={}",
                job_id,
                api_versions::SITE_RECOVERY
            ),
        )?;
        self.client.get_optional(&url).await
    }
}

// ─── Test double ────────────────────────────────────────────────────


// ─── Tests ──────────────────────────────────────────────────────────
