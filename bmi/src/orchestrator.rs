// Copyright (c) 2023 Yan Ka, Chiu.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions, and the following disclaimer,
//    without modification, immediately at the beginning of the file.
// 2. The name of the author may not be used to endorse or promote products
//    derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE AUTHOR AND CONTRIBUTORS ``AS IS'' AND
// ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
// IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
// ARE DISCLAIMED. IN NO EVENT SHALL THE AUTHOR OR CONTRIBUTORS BE LIABLE FOR
// ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
// DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS
// OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION)
// HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT
// LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY
// OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF
// SUCH DAMAGE.

//! The provisioning state machine (spec component C6): composes the
//! catalog, block store, iSCSI gateway, fabric, and boot-artifact writer
//! with compensation on failure. See the module-level docs on each
//! capability trait for what each step does; this module only sequences
//! them and unwinds on failure.

use crate::blockstore::{BlockStore, BlockStoreFactory};
use crate::boot::BootArtifacts;
use crate::cancellation::CancellationToken;
use crate::catalog::{Catalog, ImageKind};
use crate::clock::Clock;
use crate::credential::Credential;
use crate::error::{BlockError, LeakedResource, OrchError};
use crate::fabric::{Fabric, FabricFactory, MacAddress};
use crate::iscsi::{IscsiAction, IscsiGateway};
use crate::naming::{self, SENTINEL};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct ProvisionRequest {
    pub node: String,
    pub project: String,
    pub image_name: String,
    pub network: String,
    pub channel: String,
    pub nic: String,
}

#[derive(Clone, Debug)]
pub struct ProvisionOutcome {
    pub clone_image_id: i64,
    pub storage_name: String,
    pub mac: MacAddress,
    pub ipxe_filename: String,
}

pub struct OrchestratorConfig {
    pub pool: String,
    pub identity: String,
    pub key_ring: String,
    pub admin_password: String,
    pub iqn_prefix: String,
    /// Quiescence enforced before a fabric detach runs as part of
    /// compensation, so the fabric's port state has settled. Configurable
    /// per design note §9 rather than a hardcoded 30s sleep.
    pub fabric_settle: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> OrchestratorConfig {
        OrchestratorConfig {
            pool: "rbd".to_string(),
            identity: "bmi".to_string(),
            key_ring: String::new(),
            admin_password: String::new(),
            iqn_prefix: "iqn.2023-01.org.bmi".to_string(),
            fabric_settle: Duration::from_secs(30),
        }
    }
}

/// One completed forward transition's undo action, pushed as the
/// orchestrator makes progress and drained in reverse on failure.
enum CompensationStep {
    DetachFabric {
        node: String,
        network: String,
        nic: String,
        cred: Credential,
    },
    DeleteCatalogImage {
        name: String,
        project_id: i64,
    },
    RemoveBlock {
        storage_name: String,
    },
    DeleteIscsi {
        storage_name: String,
    },
    DeleteBootFiles {
        ipxe_path: std::path::PathBuf,
        mac_path: std::path::PathBuf,
    },
}

impl CompensationStep {
    fn label(&self) -> String {
        match self {
            CompensationStep::DetachFabric { node, network, .. } => {
                format!("fabric.detach({node}, {network})")
            }
            CompensationStep::DeleteCatalogImage { name, .. } => format!("catalog.delete({name})"),
            CompensationStep::RemoveBlock { storage_name } => format!("block.remove({storage_name})"),
            CompensationStep::DeleteIscsi { storage_name } => format!("iscsi.delete({storage_name})"),
            CompensationStep::DeleteBootFiles { ipxe_path, .. } => {
                format!("boot.delete({})", ipxe_path.display())
            }
        }
    }
}

async fn retry3<F, Fut>(mut f: F) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    let mut last = String::new();
    for _ in 0..3 {
        match f().await {
            Ok(()) => return Ok(()),
            Err(e) => last = e,
        }
    }
    Err(last)
}

pub struct Orchestrator {
    catalog: Arc<dyn Catalog>,
    block_factory: Arc<dyn BlockStoreFactory>,
    iscsi: Arc<dyn IscsiGateway>,
    fabric_factory: Arc<dyn FabricFactory>,
    boot: Arc<BootArtifacts>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    node_locks: std::sync::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        block_factory: Arc<dyn BlockStoreFactory>,
        iscsi: Arc<dyn IscsiGateway>,
        fabric_factory: Arc<dyn FabricFactory>,
        boot: Arc<BootArtifacts>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Orchestrator {
        Orchestrator {
            catalog,
            block_factory,
            iscsi,
            fabric_factory,
            boot,
            clock,
            config,
            node_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn node_lock(&self, node: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.node_locks.lock().unwrap();
        locks
            .entry(node.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn project_id(&self, project: &str) -> Result<i64, OrchError> {
        self.catalog
            .project_id_by_name(project)
            .ok_or_else(|| OrchError::Fabric(crate::error::FabricError::NotFound(project.to_string())))
    }

    /// Runs completed compensation steps in reverse, each retried up to 3
    /// times, best-effort. A fabric detach is preceded by the configured
    /// settle delay. Failures are logged, not propagated, except that a
    /// step which exhausts its retries is recorded as a leaked resource.
    async fn compensate(&self, mut steps: Vec<CompensationStep>) -> Vec<LeakedResource> {
        let mut leaked = Vec::new();
        while let Some(step) = steps.pop() {
            let label = step.label();
            warn!(step = %label, "running compensation");
            if matches!(step, CompensationStep::DetachFabric { .. }) {
                self.clock.sleep(self.config.fabric_settle).await;
            }
            let result = match &step {
                CompensationStep::DetachFabric { node, network, nic, cred } => {
                    retry3(|| async {
                        let fabric = self
                            .fabric_factory
                            .open(cred)
                            .await
                            .map_err(|e| e.to_string())?;
                        fabric
                            .detach_node_from_project_network(node, network, nic)
                            .await
                            .map_err(|e| e.to_string())
                    })
                    .await
                }
                CompensationStep::DeleteCatalogImage { name, project_id } => {
                    retry3(|| async {
                        self.catalog
                            .delete_image_by_name_in_project(name, *project_id)
                            .map_err(|e| e.to_string())
                    })
                    .await
                }
                CompensationStep::RemoveBlock { storage_name } => {
                    retry3(|| async {
                        let block = self.block_factory.open().await.map_err(|e| e.to_string())?;
                        block.remove(storage_name).await.map_err(|e| e.to_string())
                    })
                    .await
                }
                CompensationStep::DeleteIscsi { storage_name } => {
                    retry3(|| async {
                        self.iscsi
                            .apply(
                                IscsiAction::Delete,
                                &self.config.pool,
                                &self.config.identity,
                                storage_name,
                                &self.config.key_ring,
                                &self.config.admin_password,
                            )
                            .await
                            .map_err(|e| e.to_string())
                    })
                    .await
                }
                CompensationStep::DeleteBootFiles { ipxe_path, mac_path } => {
                    retry3(|| async {
                        std::fs::remove_file(ipxe_path).ok();
                        std::fs::remove_file(mac_path).ok();
                        Ok(())
                    })
                    .await
                }
            };
            if let Err(detail) = result {
                error!(step = %label, error = %detail, "compensation step exhausted retries");
                leaked.push(LeakedResource { step: label, detail });
            }
        }
        leaked
    }

    fn into_orch_err(&self, forward_err: OrchError, leaked: Vec<LeakedResource>) -> OrchError {
        if leaked.is_empty() {
            forward_err
        } else {
            OrchError::CompensationIncomplete(leaked)
        }
    }

    /// Runs `provision` with a cancellation token that never fires; for
    /// callers that don't carry a per-request deadline.
    pub async fn provision_uncancellable(
        &self,
        req: ProvisionRequest,
        cred: &Credential,
    ) -> Result<ProvisionOutcome, OrchError> {
        self.provision(req, cred, &CancellationToken::new()).await
    }

    pub async fn provision(
        &self,
        req: ProvisionRequest,
        cred: &Credential,
        cancel: &CancellationToken,
    ) -> Result<ProvisionOutcome, OrchError> {
        debug!(node = %req.node, project = %req.project, image = %req.image_name, "provision requested");
        let project_id = self.project_id(&req.project)?;
        let _guard = self.node_lock(&req.node).lock_owned().await;
        let mut steps: Vec<CompensationStep> = Vec::new();

        let result: Result<ProvisionOutcome, OrchError> = async {
            if cancel.is_cancelled() {
                return Err(OrchError::Cancelled);
            }
            // S0 -> S1
            let fabric = self.fabric_factory.open(cred).await?;
            fabric
                .attach_node_to_project_network(&req.node, &req.network, &req.channel, &req.nic)
                .await?;
            info!(node = %req.node, network = %req.network, "attached node to network");
            steps.push(CompensationStep::DetachFabric {
                node: req.node.clone(),
                network: req.network.clone(),
                nic: req.nic.clone(),
                cred: cred.clone(),
            });

            if cancel.is_cancelled() {
                return Err(OrchError::Cancelled);
            }
            // S1 -> S2
            let parent_id = self
                .catalog
                .image_id_by_name_in_project(&req.image_name, project_id)
                .ok_or_else(|| BlockError::ImageNotFound(req.image_name.clone()))?;
            let clone_id = self.catalog.insert_image(
                &req.node,
                project_id,
                ImageKind::ProvisionClone,
                Some(parent_id),
                false,
            )?;
            steps.push(CompensationStep::DeleteCatalogImage {
                name: req.node.clone(),
                project_id,
            });

            if cancel.is_cancelled() {
                return Err(OrchError::Cancelled);
            }
            // S2 -> S3
            let parent_storage = naming::storage_name(parent_id);
            let clone_storage = naming::storage_name(clone_id);
            let block = self.block_factory.open().await?;
            block.clone(&parent_storage, SENTINEL, &clone_storage).await?;
            info!(parent = %parent_storage, clone = %clone_storage, "cloned block image");
            steps.push(CompensationStep::RemoveBlock {
                storage_name: clone_storage.clone(),
            });

            if cancel.is_cancelled() {
                return Err(OrchError::Cancelled);
            }
            // S3 -> S4
            self.iscsi
                .apply(
                    IscsiAction::Create,
                    &self.config.pool,
                    &self.config.identity,
                    &clone_storage,
                    &self.config.key_ring,
                    &self.config.admin_password,
                )
                .await?;
            steps.push(CompensationStep::DeleteIscsi {
                storage_name: clone_storage.clone(),
            });

            if cancel.is_cancelled() {
                return Err(OrchError::Cancelled);
            }
            // S4 -> S5
            let mac = fabric.node_mac(&req.node).await?;
            let lun_target = format!("{}:{}", self.config.iqn_prefix, clone_storage);
            let ipxe_filename = self.boot.write_ipxe(&req.node, &lun_target)?;
            let mac_path = self.boot.write_mac_file(&clone_storage, &ipxe_filename, &mac)?;
            steps.push(CompensationStep::DeleteBootFiles {
                ipxe_path: self.boot_ipxe_path(&req.node),
                mac_path,
            });

            Ok(ProvisionOutcome {
                clone_image_id: clone_id,
                storage_name: clone_storage,
                mac,
                ipxe_filename,
            })
        }
        .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let leaked = self.compensate(steps).await;
                Err(self.into_orch_err(err, leaked))
            }
        }
    }

    fn boot_ipxe_path(&self, node: &str) -> std::path::PathBuf {
        // Mirrors BootArtifacts::write_ipxe's own path construction; kept in
        // sync so compensation can find the file it wrote.
        self.boot.ipxe_path(node)
    }

    /// Runs `deprovision` with a cancellation token that never fires.
    pub async fn deprovision_uncancellable(
        &self,
        node: &str,
        project: &str,
        nic: &str,
        cred: &Credential,
    ) -> Result<(), OrchError> {
        self.deprovision(node, project, nic, cred, &CancellationToken::new()).await
    }

    pub async fn deprovision(
        &self,
        node: &str,
        project: &str,
        nic: &str,
        cred: &Credential,
        cancel: &CancellationToken,
    ) -> Result<(), OrchError> {
        debug!(node, project, "deprovision requested");
        let project_id = self.project_id(project)?;
        let _guard = self.node_lock(node).lock_owned().await;

        if cancel.is_cancelled() {
            return Err(OrchError::Cancelled);
        }

        let image_id = self
            .catalog
            .image_id_by_name_in_project(node, project_id)
            .ok_or_else(|| BlockError::ImageNotFound(node.to_string()))?;
        let storage_name = naming::storage_name(image_id);

        let fabric = self.fabric_factory.open(cred).await?;
        let network = self
            .catalog
            .project_by_id(project_id)
            .map(|p| p.provision_network)
            .ok_or_else(|| crate::error::FabricError::NotFound(project.to_string()))?;
        fabric
            .detach_node_from_project_network(node, &network, nic)
            .await?;

        if cancel.is_cancelled() {
            return Err(OrchError::Cancelled);
        }

        self.iscsi
            .apply(
                IscsiAction::Delete,
                &self.config.pool,
                &self.config.identity,
                &storage_name,
                &self.config.key_ring,
                &self.config.admin_password,
            )
            .await?;

        self.catalog.delete_image_by_name_in_project(node, project_id)?;
        let block = self.block_factory.open().await?;
        block.remove(&storage_name).await?;

        // boot files intentionally left in place (open question, spec §9)
        Ok(())
    }

    pub async fn create_snapshot(
        &self,
        parent_image_name: &str,
        snap_name: &str,
        cred: &Credential,
    ) -> Result<(), OrchError> {
        let project_id = self.project_id(&cred.project)?;
        let fabric = self.fabric_factory.open(cred).await?;
        fabric.validate_project(&cred.project).await?;

        let parent_id = self
            .catalog
            .image_id_by_name_in_project(parent_image_name, project_id)
            .ok_or_else(|| BlockError::ImageNotFound(parent_image_name.to_string()))?;
        let parent_storage = naming::storage_name(parent_id);

        let block = self.block_factory.open().await?;
        block.protect_parent_sentinel(&parent_storage).await?;

        let snap_id_result = self.catalog.insert_image(
            snap_name,
            project_id,
            ImageKind::Snapshot,
            Some(parent_id),
            false,
        );
        let snap_id = match snap_id_result {
            Ok(id) => id,
            Err(e) => {
                // undo the sentinel we just created on the parent
                block.snap_unprotect(&parent_storage, SENTINEL).await.ok();
                block.snap_remove(&parent_storage, SENTINEL).await.ok();
                return Err(e.into());
            }
        };
        let snap_storage = naming::storage_name(snap_id);

        let rest: Result<(), OrchError> = block
            .clone_from_protected_sentinel(&parent_storage, &snap_storage)
            .await
            .map_err(OrchError::from);

        if let Err(err) = rest {
            self.catalog
                .delete_image_by_name_in_project(snap_name, project_id)
                .ok();
            block.remove(&snap_storage).await.ok();
            block.snap_unprotect(&parent_storage, SENTINEL).await.ok();
            block.snap_remove(&parent_storage, SENTINEL).await.ok();
            return Err(err);
        }

        Ok(())
    }

    pub async fn remove_image(&self, image_name: &str, cred: &Credential) -> Result<(), OrchError> {
        let project_id = self.project_id(&cred.project)?;
        let fabric = self.fabric_factory.open(cred).await?;
        fabric.validate_project(&cred.project).await?;

        let image_id = self
            .catalog
            .image_id_by_name_in_project(image_name, project_id)
            .ok_or_else(|| BlockError::ImageNotFound(image_name.to_string()))?;
        let storage_name = naming::storage_name(image_id);

        let block = self.block_factory.open().await?;
        block.snap_unprotect(&storage_name, SENTINEL).await.ok();
        block.snap_remove(&storage_name, SENTINEL).await.ok();
        block.remove(&storage_name).await?;
        self.catalog.delete_image_by_name_in_project(image_name, project_id)?;
        Ok(())
    }

    pub async fn list_images(&self, cred: &Credential) -> Result<Vec<String>, OrchError> {
        let project_id = self.project_id(&cred.project)?;
        let fabric = self.fabric_factory.open(cred).await?;
        fabric.validate_project(&cred.project).await?;
        Ok(self.catalog.images_in_project(project_id)?)
    }

    pub async fn list_snapshots(&self, cred: &Credential) -> Result<Vec<String>, OrchError> {
        let project_id = self.project_id(&cred.project)?;
        let fabric = self.fabric_factory.open(cred).await?;
        fabric.validate_project(&cred.project).await?;
        Ok(self.catalog.snapshots_in_project(project_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn orchestrator_with(
        catalog: Arc<FakeCatalog>,
        block: Arc<FakeBlockStore>,
        iscsi: Arc<FakeIscsiGateway>,
        fabric: Arc<FakeFabric>,
        boot_dir: &std::path::Path,
    ) -> Orchestrator {
        Orchestrator::new(
            catalog,
            Arc::new(FakeBlockStoreFactory::new(block)),
            iscsi,
            Arc::new(FakeFabricFactory::new(fabric)),
            Arc::new(BootArtifacts::new(boot_dir, boot_dir)),
            Arc::new(FakeClock::new()),
            OrchestratorConfig::default(),
        )
    }

    fn test_cred(project: &str) -> Credential {
        Credential {
            project: project.to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
        }
    }

    fn setup_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("bmi-orch-test-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn provision_e1_happy_path() {
        let catalog = Arc::new(FakeCatalog::new());
        let block = Arc::new(FakeBlockStore::new());
        let iscsi = Arc::new(FakeIscsiGateway::new());
        let fabric = Arc::new(FakeFabric::new());
        let dir = setup_dir("e1");

        let pid = catalog.insert_project("bmi_infra", "bmi-provision").unwrap();
        let parent_id = catalog
            .insert_image("hadoopMaster.img", pid, ImageKind::UserUpload, None, false)
            .unwrap();
        let parent_storage = naming::storage_name(parent_id);
        block.seed_image(&parent_storage);
        block.snap_create_unchecked(&parent_storage, SENTINEL).await.unwrap();
        block.snap_protect(&parent_storage, SENTINEL).await.unwrap();
        fabric.set_mac("cisco-27", "aa:bb:cc:dd:ee:ff");
        fabric.add_member("bmi_infra", "u");

        let orch = orchestrator_with(catalog.clone(), block.clone(), iscsi, fabric.clone(), &dir);
        let req = ProvisionRequest {
            node: "cisco-27".to_string(),
            project: "bmi_infra".to_string(),
            image_name: "hadoopMaster.img".to_string(),
            network: "vlan/native".to_string(),
            channel: "bmi-provision".to_string(),
            nic: "enp130s0f0".to_string(),
        };
        let outcome = orch.provision_uncancellable(req, &test_cred("bmi_infra")).await.unwrap();

        assert!(block.has_image(&outcome.storage_name));
        assert!(fabric.is_attached("cisco-27", "vlan/native"));
        assert!(catalog.image_id_by_name_in_project("cisco-27", pid).is_some());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn provision_e2_missing_image_compensates_fabric_attach() {
        let catalog = Arc::new(FakeCatalog::new());
        let block = Arc::new(FakeBlockStore::new());
        let iscsi = Arc::new(FakeIscsiGateway::new());
        let fabric = Arc::new(FakeFabric::new());
        let dir = setup_dir("e2");

        let pid = catalog.insert_project("bmi_infra", "bmi-provision").unwrap();
        fabric.set_mac("cisco-27", "aa:bb:cc:dd:ee:ff");

        let orch = orchestrator_with(catalog.clone(), block, iscsi, fabric.clone(), &dir);
        let req = ProvisionRequest {
            node: "cisco-27".to_string(),
            project: "bmi_infra".to_string(),
            image_name: "i12".to_string(),
            network: "vlan/native".to_string(),
            channel: "bmi-provision".to_string(),
            nic: "enp130s0f0".to_string(),
        };
        let err = orch.provision_uncancellable(req, &test_cred("bmi_infra")).await.unwrap_err();
        assert!(matches!(err, OrchError::Block(BlockError::ImageNotFound(_))));
        assert!(!fabric.is_attached("cisco-27", "vlan/native"));
        assert!(catalog.image_id_by_name_in_project("cisco-27", pid).is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn create_snapshot_then_remove_restores_parent() {
        let catalog = Arc::new(FakeCatalog::new());
        let block = Arc::new(FakeBlockStore::new());
        let iscsi = Arc::new(FakeIscsiGateway::new());
        let fabric = Arc::new(FakeFabric::new());
        let dir = setup_dir("snap");

        let pid = catalog.insert_project("bmi_infra", "bmi-provision").unwrap();
        let parent_id = catalog
            .insert_image("hadoopMaster.img", pid, ImageKind::UserUpload, None, false)
            .unwrap();
        let parent_storage = naming::storage_name(parent_id);
        block.seed_image(&parent_storage);
        fabric.add_member("bmi_infra", "u");

        let orch = orchestrator_with(catalog.clone(), block.clone(), iscsi, fabric, &dir);
        orch.create_snapshot("hadoopMaster.img", "blblb1", &test_cred("bmi_infra"))
            .await
            .unwrap();

        assert!(catalog.image_id_by_name_in_project("blblb1", pid).is_some());
        assert_eq!(block.snapshot_count(&parent_storage), 0);

        orch.remove_image("blblb1", &test_cred("bmi_infra")).await.unwrap();
        assert!(catalog.image_id_by_name_in_project("blblb1", pid).is_none());
        assert_eq!(block.snapshot_count(&parent_storage), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn create_snapshot_duplicate_name_fails_without_leftover_sentinel() {
        let catalog = Arc::new(FakeCatalog::new());
        let block = Arc::new(FakeBlockStore::new());
        let iscsi = Arc::new(FakeIscsiGateway::new());
        let fabric = Arc::new(FakeFabric::new());
        let dir = setup_dir("snapdup");

        let pid = catalog.insert_project("bmi_infra", "bmi-provision").unwrap();
        let parent_id = catalog
            .insert_image("hadoopMaster.img", pid, ImageKind::UserUpload, None, false)
            .unwrap();
        let parent_storage = naming::storage_name(parent_id);
        block.seed_image(&parent_storage);
        fabric.add_member("bmi_infra", "u");

        let orch = orchestrator_with(catalog.clone(), block.clone(), iscsi, fabric, &dir);
        orch.create_snapshot("hadoopMaster.img", "blblb1", &test_cred("bmi_infra"))
            .await
            .unwrap();
        let err = orch
            .create_snapshot("hadoopMaster.img", "blblb1", &test_cred("bmi_infra"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchError::Catalog(crate::error::CatalogError::UniqueViolation(_))));
        assert_eq!(block.snapshot_count(&parent_storage), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn provision_pre_cancelled_token_unwinds_nothing_and_returns_cancelled() {
        let catalog = Arc::new(FakeCatalog::new());
        let block = Arc::new(FakeBlockStore::new());
        let iscsi = Arc::new(FakeIscsiGateway::new());
        let fabric = Arc::new(FakeFabric::new());
        let dir = setup_dir("cancel-pre");

        catalog.insert_project("bmi_infra", "bmi-provision").unwrap();
        fabric.set_mac("cisco-27", "aa:bb:cc:dd:ee:ff");
        fabric.add_member("bmi_infra", "u");

        let orch = orchestrator_with(catalog, block, iscsi, fabric.clone(), &dir);
        let req = ProvisionRequest {
            node: "cisco-27".to_string(),
            project: "bmi_infra".to_string(),
            image_name: "hadoopMaster.img".to_string(),
            network: "vlan/native".to_string(),
            channel: "bmi-provision".to_string(),
            nic: "enp130s0f0".to_string(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orch.provision(req, &test_cred("bmi_infra"), &cancel).await.unwrap_err();

        assert!(matches!(err, OrchError::Cancelled));
        assert!(!fabric.is_attached("cisco-27", "vlan/native"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn deprovision_pre_cancelled_token_aborts_before_fabric_detach() {
        let catalog = Arc::new(FakeCatalog::new());
        let block = Arc::new(FakeBlockStore::new());
        let iscsi = Arc::new(FakeIscsiGateway::new());
        let fabric = Arc::new(FakeFabric::new());
        let dir = setup_dir("cancel-deprov");

        let pid = catalog.insert_project("bmi_infra", "vlan/native").unwrap();
        let parent_id = catalog
            .insert_image("hadoopMaster.img", pid, ImageKind::UserUpload, None, false)
            .unwrap();
        let parent_storage = naming::storage_name(parent_id);
        block.seed_image(&parent_storage);
        block.snap_create_unchecked(&parent_storage, SENTINEL).await.unwrap();
        block.snap_protect(&parent_storage, SENTINEL).await.unwrap();
        fabric.set_mac("cisco-27", "aa:bb:cc:dd:ee:ff");
        fabric.add_member("bmi_infra", "u");

        let orch = orchestrator_with(catalog.clone(), block, iscsi, fabric.clone(), &dir);
        let req = ProvisionRequest {
            node: "cisco-27".to_string(),
            project: "bmi_infra".to_string(),
            image_name: "hadoopMaster.img".to_string(),
            network: "vlan/native".to_string(),
            channel: "bmi-provision".to_string(),
            nic: "enp130s0f0".to_string(),
        };
        orch.provision_uncancellable(req, &test_cred("bmi_infra")).await.unwrap();

        // deprovision's first cancellation check runs before the fabric
        // detach, so a pre-cancelled token aborts before anything happens.
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orch
            .deprovision("cisco-27", "bmi_infra", "enp130s0f0", &test_cred("bmi_infra"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchError::Cancelled));
        assert!(catalog.image_id_by_name_in_project("cisco-27", pid).is_some());
        assert!(fabric.is_attached("cisco-27", "vlan/native"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
