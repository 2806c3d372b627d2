//! Replication infrastructure discovery.
//!
//! Walks the chain vault → fabric → container → policy mapping → run-as
//! accounts → staging storage → target region and caches the result. The
//! cache is either fully populated or absent; a partially discovered
//! topology is never served. An empty `policy_id` is a valid cached state
//! meaning "infrastructure present but not provisioning-ready".

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::RwLock;

use crate::api::SiteRecoveryApi;
use crate::error::{MigrateError, MigrateResult};
use crate::remote::{ContainerMapping, MigrationItem, CBT_INSTANCE_TYPE};
use crate::remote::CreatePolicyRequest;
use crate::remote::{CreateMappingProperties, CreateMappingRequest};
use crate::types::TopologyCache;

/// Name given to a policy and mapping provisioned on demand.
const DEFAULT_POLICY_NAME: &str = "migration-default-policy";

/// Substrings that mark a storage account as a plausible replication cache
/// when nothing more authoritative identifies one.
const CACHE_NAME_HINTS: &[&str] = &["cache", "migrate", "cloudlift"];

pub struct TopologyResolver {
    api: Arc<dyn SiteRecoveryApi>,
    cache: RwLock<Option<TopologyCache>>,
}

impl TopologyResolver {
    pub fn new(api: Arc<dyn SiteRecoveryApi>) -> Self {
        Self {
            api,
            cache: RwLock::new(None),
        }
    }

    /// Cached topology without touching the remote side.
    pub async fn cached(&self) -> Option<TopologyCache> {
        self.cache.read().await.clone()
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
        debug!("topology cache invalidated");
    }

    /// Cached topology, discovering it on first use.
    pub async fn get(&self) -> MigrateResult<TopologyCache> {
        if let Some(cached) = self.cache.read().await.clone() {
            return Ok(cached);
        }
        self.resolve().await
    }

    /// Full discovery pass; replaces whatever was cached.
    pub async fn resolve(&self) -> MigrateResult<TopologyCache> {
        let vaults = self.api.list_vaults().await?;
        let vault = vaults
            .iter()
            .find(|v| v.name.to_lowercase().contains("migrate"))
            .or_else(|| vaults.first())
            .ok_or_else(|| MigrateError::configuration("no Recovery Services vault found"))?
            .clone();

        let fabrics = self.api.list_fabrics(&vault.name).await?;
        // Provider-type marker first, fabric name second, first fabric last.
        let fabric = fabrics
            .iter()
            .find(|f| {
                f.properties
                    .custom_details
                    .instance_type
                    .to_lowercase()
                    .contains("vmware")
            })
            .or_else(|| fabrics.iter().find(|f| f.name.to_lowercase().contains("vmware")))
            .or_else(|| fabrics.first())
            .ok_or_else(|| {
                MigrateError::configuration(format!(
                    "vault '{}' has no replication fabric",
                    vault.name
                ))
            })?
            .clone();
        let source_site_id = fabric
            .properties
            .custom_details
            .vmware_site_id
            .clone()
            .unwrap_or_default();
        if source_site_id.is_empty() {
            warn!(
                "fabric '{}' carries no source site id; run-as account discovery will be skipped",
                fabric.name
            );
        }

        let containers = self.api.list_containers(&vault.name, &fabric.name).await?;
        let container = containers.first().cloned().ok_or_else(|| {
            MigrateError::configuration(format!(
                "fabric '{}' has no protection container",
                fabric.name
            ))
        })?;

        let mapping = self
            .resolve_mapping(&vault.name, &fabric.name, &container.name)
            .await;
        let policy_id = mapping
            .as_ref()
            .and_then(|m| m.properties.policy_id.clone())
            .unwrap_or_default();
        if policy_id.is_empty() {
            warn!(
                "no replication policy mapped to container '{}'; topology is not provisioning-ready",
                container.name
            );
        }

        let (data_mover_id, snapshot_id) = self.resolve_run_as_accounts(&source_site_id).await;

        // Existing items feed both the cache-storage and target-region
        // lookups; one listing covers both.
        let items = match self.api.list_migration_items(&vault.name).await {
            Ok(items) => items,
            Err(e) => {
                warn!("migration item listing failed during discovery: {}", e);
                Vec::new()
            }
        };

        let (cache_storage_account_id, cache_storage_sas_secret_name) =
            self.resolve_cache_storage(&items, mapping.as_ref()).await;

        let target_region = self
            .resolve_target_region(&items, mapping.as_ref(), &vault.location)
            .await;

        let topology = TopologyCache {
            vault_name: vault.name,
            fabric_name: fabric.name,
            container_name: container.name,
            policy_id,
            data_mover_run_as_account_id: data_mover_id.clone(),
            snapshot_run_as_account_id: snapshot_id,
            source_site_id,
            cache_storage_account_id,
            cache_storage_sas_secret_name,
            target_region,
        };
        info!(
            "topology resolved: vault='{}' fabric='{}' container='{}' provision_ready={}",
            topology.vault_name,
            topology.fabric_name,
            topology.container_name,
            topology.is_provision_ready()
        );

        *self.cache.write().await = Some(topology.clone());
        Ok(topology)
    }

    /// Mapping carrying the replication policy: container-scoped listing
    /// first, vault-wide listing next, on-demand provisioning last. Returns
    /// `None` when every avenue fails; the caller degrades to an empty
    /// policy id rather than failing discovery.
    async fn resolve_mapping(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
    ) -> Option<ContainerMapping> {
        match self.api.list_container_mappings(vault, fabric, container).await {
            Ok(mappings) if !mappings.is_empty() => return mappings.into_iter().next(),
            Ok(_) => {}
            Err(e) => warn!("container mapping listing failed: {}", e),
        }

        match self.api.list_vault_mappings(vault).await {
            Ok(mappings) if !mappings.is_empty() => return mappings.into_iter().next(),
            Ok(_) => {}
            Err(e) => warn!("vault-wide mapping listing failed: {}", e),
        }

        debug!("no container mapping found; provisioning default policy");
        self.provision_default_mapping(vault, fabric, container)
            .await
    }

    async fn provision_default_mapping(
        &self,
        vault: &str,
        fabric: &str,
        container: &str,
    ) -> Option<ContainerMapping> {
        let policy = CreatePolicyRequest::default_migration_policy();
        let handle = match self
            .api
            .create_policy(vault, DEFAULT_POLICY_NAME, &policy)
            .await
        {
            Ok(h) => h,
            Err(e) => {
                warn!("default policy creation failed: {}", e);
                return None;
            }
        };
        let policy_id = handle
            .body
            .as_ref()
            .and_then(|b| b.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let Some(policy_id) = policy_id else {
            warn!("policy creation returned no resource id; leaving container unmapped");
            return None;
        };

        let request = CreateMappingRequest {
            properties: CreateMappingProperties {
                target_protection_container_id: "Microsoft Azure".into(),
                policy_id: policy_id.clone(),
                provider_specific_input: json!({ "instanceType": CBT_INSTANCE_TYPE }),
            },
        };
        if let Err(e) = self
            .api
            .create_container_mapping(vault, fabric, container, DEFAULT_POLICY_NAME, &request)
            .await
        {
            warn!("container mapping creation failed: {}", e);
            return None;
        }

        // Re-read for the authoritative mapping; synthesize one from the
        // created policy if the listing has not caught up yet.
        match self.api.list_container_mappings(vault, fabric, container).await {
            Ok(mappings) if !mappings.is_empty() => mappings.into_iter().next(),
            _ => {
                let mut mapping = ContainerMapping::default();
                mapping.name = DEFAULT_POLICY_NAME.into();
                mapping.properties.policy_id = Some(policy_id);
                Some(mapping)
            }
        }
    }

    /// First site-management credential covers both the data-mover and
    /// snapshot roles; guest-OS credentials are never used here.
    async fn resolve_run_as_accounts(&self, site_id: &str) -> (String, String) {
        if site_id.is_empty() {
            return (String::new(), String::new());
        }
        match self.api.list_run_as_accounts(site_id).await {
            Ok(accounts) => {
                let site_mgmt = accounts.iter().find(|a| a.is_site_management());
                match site_mgmt {
                    Some(acct) => (acct.id.clone(), acct.id.clone()),
                    None => {
                        warn!("site '{}' has no site-management run-as account", site_id);
                        (String::new(), String::new())
                    }
                }
            }
            Err(e) => {
                warn!("run-as account listing failed: {}", e);
                (String::new(), String::new())
            }
        }
    }

    /// Staging storage account and its SAS secret name, most authoritative
    /// source first: an already-protected item's log storage, the container
    /// mapping, the migrate project's solution configuration, then a name
    /// scan. The secret name travels with the mapping only when the account
    /// does too; every other source derives it by convention.
    async fn resolve_cache_storage(
        &self,
        items: &[MigrationItem],
        mapping: Option<&ContainerMapping>,
    ) -> (String, String) {
        let from_item = items.iter().find_map(|i| {
            i.properties
                .provider_specific_details
                .protected_disks
                .iter()
                .find_map(|d| d.log_storage_account_id.clone())
        });
        if let Some(id) = from_item {
            debug!("cache storage taken from already-protected item");
            let sas = sas_secret_for(&id);
            return (id, sas);
        }

        if let Some(id) = mapping
            .and_then(|m| m.properties.provider_specific_details.storage_account_id.clone())
            .filter(|id| !id.is_empty())
        {
            let sas = mapping
                .and_then(|m| {
                    m.properties
                        .provider_specific_details
                        .storage_account_sas_secret_name
                        .clone()
                })
                .unwrap_or_else(|| sas_secret_for(&id));
            return (id, sas);
        }

        match self.api.get_solution_cache_storage().await {
            Ok(Some(id)) if !id.is_empty() => {
                let sas = sas_secret_for(&id);
                return (id, sas);
            }
            Ok(_) => {}
            Err(e) => warn!("solution configuration lookup failed: {}", e),
        }

        match self.api.list_storage_accounts().await {
            Ok(accounts) => {
                let hinted = accounts.iter().find(|a| {
                    let name = a.name.to_lowercase();
                    CACHE_NAME_HINTS.iter().any(|h| name.contains(h))
                });
                match hinted {
                    Some(acct) => (acct.id.clone(), sas_secret_for(&acct.id)),
                    None => {
                        warn!("no staging storage account identified; enablement will fail until one exists");
                        (String::new(), String::new())
                    }
                }
            }
            Err(e) => {
                warn!("storage account listing failed: {}", e);
                (String::new(), String::new())
            }
        }
    }

    /// Target region, most specific signal first: an existing item's target
    /// location, the region of an existing item's target resource group,
    /// the mapping's target location, the vault's own region last.
    async fn resolve_target_region(
        &self,
        items: &[MigrationItem],
        mapping: Option<&ContainerMapping>,
        vault_location: &str,
    ) -> String {
        let from_item = items.iter().find_map(|i| {
            i.properties
                .provider_specific_details
                .target_location
                .clone()
                .filter(|l| !l.is_empty())
        });
        if let Some(region) = from_item {
            return region;
        }

        let target_rg = items.iter().find_map(|i| {
            i.properties
                .provider_specific_details
                .target_resource_group_id
                .clone()
                .filter(|id| !id.is_empty())
        });
        if let Some(rg_id) = target_rg {
            let rg_name = rg_id.rsplit('/').next().unwrap_or_default();
            match self.api.get_resource_group(rg_name).await {
                Ok(Some(rg)) if !rg.location.is_empty() => return rg.location,
                Ok(_) => {}
                Err(e) => warn!("target resource group lookup failed: {}", e),
            }
        }

        if let Some(region) = mapping
            .and_then(|m| m.properties.provider_specific_details.target_location.clone())
            .filter(|l| !l.is_empty())
        {
            return region;
        }

        warn!(
            "falling back to vault region '{}' for target placement",
            vault_location
        );
        vault_location.to_string()
    }
}

/// Secret-name convention for the staging account's SAS key.
fn sas_secret_for(storage_account_id: &str) -> String {
    let name = storage_account_id.rsplit('/').next().unwrap_or_default();
    if name.is_empty() {
        String::new()
    } else {
        format!("{}-cacheSas", name)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockApi;
    use crate::remote::{
        ContainerMappingProperties, Fabric, FabricCustomDetails, FabricProperties,
        MappingProviderDetails, MigrationItemProperties, MigrationItemProviderDetails,
        ProtectedDisk, ProtectionContainer, ResourceGroup, RunAsAccount, RunAsAccountProperties,
        StorageAccount, Vault,
    };

    fn vault(name: &str, location: &str) -> Vault {
        Vault {
            id: format!("/vaults/{name}"),
            name: name.into(),
            location: location.into(),
            ..Default::default()
        }
    }

    fn vmware_fabric(name: &str, site: &str) -> Fabric {
        Fabric {
            id: format!("/fabrics/{name}"),
            name: name.into(),
            properties: FabricProperties {
                friendly_name: None,
                custom_details: FabricCustomDetails {
                    instance_type: "VMwareV2".into(),
                    vmware_site_id: Some(site.into()),
                },
            },
        }
    }

    fn mapping_with_policy(policy: &str) -> ContainerMapping {
        ContainerMapping {
            id: "/mappings/m1".into(),
            name: "m1".into(),
            properties: ContainerMappingProperties {
                policy_id: Some(policy.into()),
                target_protection_container_id: None,
                provider_specific_details: MappingProviderDetails {
                    instance_type: "VMwareCbt".into(),
                    target_location: Some("westeurope".into()),
                    key_vault_id: None,
                    storage_account_id: Some("/storageAccounts/lsacache1".into()),
                    storage_account_sas_secret_name: Some("lsacache1-cacheSas".into()),
                },
            },
        }
    }

    fn site_account(id: &str) -> RunAsAccount {
        RunAsAccount {
            id: id.into(),
            name: "vcenter-admin".into(),
            properties: RunAsAccountProperties {
                display_name: None,
                credential_type: Some("VMwareFabric".into()),
            },
        }
    }

    fn full_mock() -> MockApi {
        let mut api = MockApi::default();
        api.vaults = vec![vault("other-vault", "eastus"), vault("migratevault1", "westeurope")];
        api.fabrics = vec![vmware_fabric("fab1", "/sites/s1")];
        api.containers = vec![ProtectionContainer {
            id: "/containers/c1".into(),
            name: "cont1".into(),
        }];
        api.container_mappings = vec![mapping_with_policy("/policies/p1")];
        api.run_as_accounts = vec![site_account("/accounts/a1")];
        api
    }

    #[tokio::test]
    async fn resolves_full_chain_and_prefers_migrate_vault() {
        let api = Arc::new(full_mock());
        let resolver = TopologyResolver::new(api);
        let t = resolver.resolve().await.unwrap();
        assert_eq!(t.vault_name, "migratevault1");
        assert_eq!(t.fabric_name, "fab1");
        assert_eq!(t.container_name, "cont1");
        assert_eq!(t.policy_id, "/policies/p1");
        assert_eq!(t.source_site_id, "/sites/s1");
        assert!(t.is_provision_ready());
    }

    #[tokio::test]
    async fn same_account_for_both_roles() {
        let api = Arc::new(full_mock());
        let resolver = TopologyResolver::new(api);
        let t = resolver.resolve().await.unwrap();
        assert_eq!(t.data_mover_run_as_account_id, "/accounts/a1");
        assert_eq!(t.snapshot_run_as_account_id, "/accounts/a1");
    }

    #[tokio::test]
    async fn guest_credentials_are_ignored() {
        let mut api = full_mock();
        api.run_as_accounts = vec![RunAsAccount {
            id: "/accounts/guest".into(),
            name: "guest".into(),
            properties: RunAsAccountProperties {
                display_name: None,
                credential_type: Some("VMware".into()),
            },
        }];
        let resolver = TopologyResolver::new(Arc::new(api));
        let t = resolver.resolve().await.unwrap();
        assert!(t.data_mover_run_as_account_id.is_empty());
    }

    #[tokio::test]
    async fn no_vault_is_configuration_error() {
        let resolver = TopologyResolver::new(Arc::new(MockApi::default()));
        let err = resolver.resolve().await.unwrap_err();
        assert_eq!(err.kind, crate::error::MigrateErrorKind::Configuration);
    }

    #[tokio::test]
    async fn missing_mapping_yields_empty_policy_not_error() {
        let mut api = full_mock();
        api.container_mappings.clear();
        // Policy provisioning cannot complete without a created-policy id.
        let resolver = TopologyResolver::new(Arc::new(api));
        let t = resolver.resolve().await.unwrap();
        assert!(t.policy_id.is_empty());
        assert!(!t.is_provision_ready());
    }

    #[tokio::test]
    async fn provisions_default_policy_when_unmapped() {
        let mut api = full_mock();
        api.container_mappings.clear();
        api.created_policy_id = Some("/policies/created".into());
        let api = Arc::new(api);
        let resolver = TopologyResolver::new(api.clone());
        let t = resolver.resolve().await.unwrap();
        assert_eq!(t.policy_id, "/policies/created");
        let calls = api.calls();
        assert!(calls.iter().any(|c| c.starts_with("create_policy:")));
        assert!(calls
            .iter()
            .any(|c| c.starts_with("create_container_mapping:")));
    }

    #[tokio::test]
    async fn cache_storage_from_mapping_wins_over_name_scan() {
        let mut api = full_mock();
        api.storage_accounts = vec![StorageAccount {
            id: "/storageAccounts/othercache".into(),
            name: "othercache".into(),
            location: "westeurope".into(),
            ..Default::default()
        }];
        let resolver = TopologyResolver::new(Arc::new(api));
        let t = resolver.resolve().await.unwrap();
        assert_eq!(t.cache_storage_account_id, "/storageAccounts/lsacache1");
        assert_eq!(t.cache_storage_sas_secret_name, "lsacache1-cacheSas");
    }

    #[tokio::test]
    async fn cache_storage_name_scan_fallback() {
        let mut api = full_mock();
        api.container_mappings = vec![{
            let mut m = mapping_with_policy("/policies/p1");
            m.properties.provider_specific_details.storage_account_id = None;
            m.properties
                .provider_specific_details
                .storage_account_sas_secret_name = None;
            m
        }];
        api.storage_accounts = vec![
            StorageAccount {
                id: "/storageAccounts/appdata".into(),
                name: "appdata".into(),
                ..Default::default()
            },
            StorageAccount {
                id: "/storageAccounts/migratecache9".into(),
                name: "migratecache9".into(),
                ..Default::default()
            },
        ];
        let resolver = TopologyResolver::new(Arc::new(api));
        let t = resolver.resolve().await.unwrap();
        assert_eq!(t.cache_storage_account_id, "/storageAccounts/migratecache9");
        assert_eq!(t.cache_storage_sas_secret_name, "migratecache9-cacheSas");
    }

    #[tokio::test]
    async fn cache_storage_from_existing_item_beats_mapping() {
        let mut api = full_mock();
        api.items_by_vault.insert(
            "migratevault1".into(),
            vec![MigrationItem {
                id: "/items/i1".into(),
                name: "i1".into(),
                properties: MigrationItemProperties {
                    provider_specific_details: MigrationItemProviderDetails {
                        protected_disks: vec![ProtectedDisk {
                            log_storage_account_id: Some("/storageAccounts/itemcache".into()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    },
                    ..Default::default()
                },
            }],
        );
        let resolver = TopologyResolver::new(Arc::new(api));
        let t = resolver.resolve().await.unwrap();
        assert_eq!(t.cache_storage_account_id, "/storageAccounts/itemcache");
        // The SAS secret derives from the chosen account, not the mapping's.
        assert_eq!(t.cache_storage_sas_secret_name, "itemcache-cacheSas");
    }

    #[tokio::test]
    async fn target_region_from_existing_items_resource_group() {
        let mut api = full_mock();
        api.items_by_vault.insert(
            "migratevault1".into(),
            vec![MigrationItem {
                id: "/items/i1".into(),
                name: "i1".into(),
                properties: MigrationItemProperties {
                    provider_specific_details: MigrationItemProviderDetails {
                        target_resource_group_id: Some(
                            "/subscriptions/s/resourceGroups/rg9".into(),
                        ),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            }],
        );
        api.resource_groups.insert(
            "rg9".into(),
            ResourceGroup {
                id: "/resourceGroups/rg9".into(),
                name: "rg9".into(),
                location: "northeurope".into(),
            },
        );
        let resolver = TopologyResolver::new(Arc::new(api));
        let t = resolver.resolve().await.unwrap();
        // The item's target resource group outranks the mapping's region.
        assert_eq!(t.target_region, "northeurope");
    }

    #[tokio::test]
    async fn target_region_from_mapping_when_no_items_exist() {
        let mut api = full_mock();
        api.container_mappings = vec![{
            let mut m = mapping_with_policy("/policies/p1");
            m.properties.provider_specific_details.target_location = Some("northeurope".into());
            m
        }];
        api.resource_groups.insert(
            "rg1".into(),
            ResourceGroup {
                id: "/resourceGroups/rg1".into(),
                name: "rg1".into(),
                location: "eastus".into(),
            },
        );
        let resolver = TopologyResolver::new(Arc::new(api));
        let t = resolver.resolve().await.unwrap();
        // With no existing items, the mapping decides; no resource group
        // is consulted.
        assert_eq!(t.target_region, "northeurope");
    }

    #[tokio::test]
    async fn target_region_falls_back_to_vault_location() {
        let mut api = full_mock();
        api.container_mappings = vec![{
            let mut m = mapping_with_policy("/policies/p1");
            m.properties.provider_specific_details.target_location = None;
            m
        }];
        let resolver = TopologyResolver::new(Arc::new(api));
        let t = resolver.resolve().await.unwrap();
        assert_eq!(t.target_region, "westeurope");
    }

    #[tokio::test]
    async fn get_serves_cache_without_second_discovery() {
        let api = Arc::new(full_mock());
        let resolver = TopologyResolver::new(api.clone());
        resolver.get().await.unwrap();
        let before = api.calls().len();
        resolver.get().await.unwrap();
        assert_eq!(api.calls().len(), before);
    }

    #[tokio::test]
    async fn invalidate_forces_rediscovery() {
        let api = Arc::new(full_mock());
        let resolver = TopologyResolver::new(api.clone());
        resolver.get().await.unwrap();
        resolver.invalidate().await;
        assert!(resolver.cached().await.is_none());
        let before = api.calls().len();
        resolver.get().await.unwrap();
        assert!(api.calls().len() > before);
    }
}
