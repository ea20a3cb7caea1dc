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

//! End-to-end scenarios driven through the [`bmid::Bmi`] facade, wiring the
//! in-memory fakes into a real `Orchestrator` so every assertion is against
//! the `{ statusCode, message }` boundary envelope a caller would actually
//! see, not the internal `OrchError`.

use bmi::blockstore::BlockStore;
use bmi::boot::BootArtifacts;
use bmi::cancellation::CancellationToken;
use bmi::catalog::{Catalog, ImageKind};
use bmi::credential::Credential;
use bmi::iscsi::{IscsiAction, IscsiGateway};
use bmi::naming::{self, SENTINEL};
use bmi::orchestrator::{Orchestrator, OrchestratorConfig, ProvisionRequest};
use bmi::testutil::*;
use bmid::Bmi;
use std::sync::Arc;

struct Harness {
    bmi: Bmi,
    catalog: Arc<FakeCatalog>,
    block: Arc<FakeBlockStore>,
    iscsi: Arc<FakeIscsiGateway>,
    fabric: Arc<FakeFabric>,
    dir: std::path::PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}

fn harness(tag: &str) -> Harness {
    let catalog = Arc::new(FakeCatalog::new());
    let block = Arc::new(FakeBlockStore::new());
    let iscsi = Arc::new(FakeIscsiGateway::new());
    let fabric = Arc::new(FakeFabric::new());
    let dir = std::env::temp_dir().join(format!("bmid-e2e-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let orchestrator = Orchestrator::new(
        catalog.clone() as Arc<dyn Catalog>,
        Arc::new(FakeBlockStoreFactory::new(block.clone())),
        iscsi.clone(),
        Arc::new(FakeFabricFactory::new(fabric.clone())),
        Arc::new(BootArtifacts::new(&dir, &dir)),
        Arc::new(FakeClock::new()),
        OrchestratorConfig::default(),
    );
    let bmi = Bmi::new(orchestrator, catalog.clone());

    Harness {
        bmi,
        catalog,
        block,
        iscsi,
        fabric,
        dir,
    }
}

fn cred(project: &str) -> Credential {
    Credential {
        project: project.to_string(),
        username: "u".to_string(),
        password: "p".to_string(),
    }
}

fn seed_project_with_image(h: &Harness, project: &str, network: &str, image_name: &str) -> (i64, i64) {
    let pid = h.catalog.insert_project(project, network).unwrap();
    let parent_id = h
        .catalog
        .insert_image(image_name, pid, ImageKind::UserUpload, None, false)
        .unwrap();
    let parent_storage = naming::storage_name(parent_id);
    h.block.seed_image(&parent_storage);
    (pid, parent_id)
}

fn base_request(node: &str, project: &str, image_name: &str, network: &str) -> ProvisionRequest {
    ProvisionRequest {
        node: node.to_string(),
        project: project.to_string(),
        image_name: image_name.to_string(),
        network: network.to_string(),
        channel: "bmi-provision".to_string(),
        nic: "enp130s0f0".to_string(),
    }
}

#[tokio::test]
async fn e1_happy_path_provision() {
    let h = harness("e1");
    seed_project_with_image(&h, "bmi_infra", "vlan/native", "hadoopMaster.img");
    let parent_storage = naming::storage_name(2);
    h.block.snap_create_unchecked(&parent_storage, SENTINEL).await.unwrap();
    h.block.snap_protect(&parent_storage, SENTINEL).await.unwrap();
    h.fabric.set_mac("cisco-27", "aa:bb:cc:dd:ee:ff");
    h.fabric.add_member("bmi_infra", "u");

    let req = base_request("cisco-27", "bmi_infra", "hadoopMaster.img", "vlan/native");
    let outcome = h.bmi.provision(req, &cred("bmi_infra"), &CancellationToken::new()).await.unwrap();

    assert!(h.block.has_image(&outcome.storage_name));
    assert!(h.fabric.is_attached("cisco-27", "vlan/native"));
    assert_eq!(outcome.mac.dashed_lowercase(), "01-aa-bb-cc-dd-ee-ff");
    assert!(h.catalog.image_id_by_name_in_project("cisco-27", 1).is_some());
}

#[tokio::test]
async fn e2_missing_image_returns_404_with_no_leftovers() {
    let h = harness("e2");
    h.catalog.insert_project("bmi_infra", "vlan/native").unwrap();
    h.fabric.set_mac("cisco-27", "aa:bb:cc:dd:ee:ff");

    let req = base_request("cisco-27", "bmi_infra", "doesNotExist.img", "vlan/native");
    let err = h.bmi.provision(req, &cred("bmi_infra"), &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.status_code, 404);
    assert!(!h.fabric.is_attached("cisco-27", "vlan/native"));
    assert!(h.catalog.image_id_by_name_in_project("cisco-27", 1).is_none());
}

#[tokio::test]
async fn e3_duplicate_provision_on_same_node_conflicts_and_detaches() {
    let h = harness("e3");
    seed_project_with_image(&h, "bmi_infra", "vlan/native", "hadoopMaster.img");
    let parent_storage = naming::storage_name(2);
    h.block.snap_create_unchecked(&parent_storage, SENTINEL).await.unwrap();
    h.block.snap_protect(&parent_storage, SENTINEL).await.unwrap();
    h.fabric.set_mac("cisco-27", "aa:bb:cc:dd:ee:ff");
    h.fabric.add_member("bmi_infra", "u");

    let first = base_request("cisco-27", "bmi_infra", "hadoopMaster.img", "vlan/native");
    h.bmi.provision(first, &cred("bmi_infra"), &CancellationToken::new()).await.unwrap();

    let second = base_request("cisco-27", "bmi_infra", "hadoopMaster.img", "vlan/native");
    let err = h.bmi.provision(second, &cred("bmi_infra"), &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.status_code, 409);
    // the duplicate attempt's own fabric attach is unwound by compensation
    assert!(!h.fabric.is_attached("cisco-27", "vlan/native"));
    // the first successful provision's catalog row is untouched
    assert!(h.catalog.image_id_by_name_in_project("cisco-27", 1).is_some());
}

#[tokio::test]
async fn e4_deprovision_detaches_and_cleans_up() {
    let h = harness("e4");
    seed_project_with_image(&h, "bmi_infra", "vlan/native", "hadoopMaster.img");
    let parent_storage = naming::storage_name(2);
    h.block.snap_create_unchecked(&parent_storage, SENTINEL).await.unwrap();
    h.block.snap_protect(&parent_storage, SENTINEL).await.unwrap();
    h.fabric.set_mac("cisco-27", "aa:bb:cc:dd:ee:ff");
    h.fabric.add_member("bmi_infra", "u");

    let req = base_request("cisco-27", "bmi_infra", "hadoopMaster.img", "vlan/native");
    let outcome = h.bmi.provision(req, &cred("bmi_infra"), &CancellationToken::new()).await.unwrap();

    h.bmi
        .deprovision("cisco-27", "bmi_infra", "enp130s0f0", &cred("bmi_infra"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!h.fabric.is_attached("cisco-27", "vlan/native"));
    assert!(h.catalog.image_id_by_name_in_project("cisco-27", 1).is_none());
    assert!(!h.block.has_image(&outcome.storage_name));
}

#[tokio::test]
async fn e5_deprovision_with_already_unmapped_iscsi_session() {
    let h = harness("e5");
    seed_project_with_image(&h, "bmi_infra", "vlan/native", "hadoopMaster.img");
    let parent_storage = naming::storage_name(2);
    h.block.snap_create_unchecked(&parent_storage, SENTINEL).await.unwrap();
    h.block.snap_protect(&parent_storage, SENTINEL).await.unwrap();
    h.fabric.set_mac("cisco-27", "aa:bb:cc:dd:ee:ff");
    h.fabric.add_member("bmi_infra", "u");

    let req = base_request("cisco-27", "bmi_infra", "hadoopMaster.img", "vlan/native");
    h.bmi.provision(req, &cred("bmi_infra"), &CancellationToken::new()).await.unwrap();

    // Simulate the iSCSI session already having been torn down out of band
    // (e.g. by a prior deprovision attempt whose reply was lost).
    h.iscsi
        .apply(IscsiAction::Delete, "rbd", "bmi", &naming::storage_name(2), "", "")
        .await
        .unwrap();

    let err = h
        .bmi
        .deprovision("cisco-27", "bmi_infra", "enp130s0f0", &cred("bmi_infra"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.status_code, 500);
    assert!(err.message.contains("already unmapped"));
}

#[tokio::test]
async fn e6_create_snapshot_succeeds() {
    let h = harness("e6");
    seed_project_with_image(&h, "bmi_infra", "vlan/native", "hadoopMaster.img");
    h.fabric.add_member("bmi_infra", "u");

    h.bmi
        .create_snapshot("hadoopMaster.img", "blblb1", &cred("bmi_infra"))
        .await
        .unwrap();

    assert!(h.catalog.image_id_by_name_in_project("blblb1", 1).is_some());
    let parent_storage = naming::storage_name(2);
    assert_eq!(h.block.snapshot_count(&parent_storage), 0);
}

#[tokio::test]
async fn e7_duplicate_snapshot_name_conflicts_without_leftover_sentinel() {
    let h = harness("e7");
    seed_project_with_image(&h, "bmi_infra", "vlan/native", "hadoopMaster.img");
    h.fabric.add_member("bmi_infra", "u");

    h.bmi
        .create_snapshot("hadoopMaster.img", "blblb1", &cred("bmi_infra"))
        .await
        .unwrap();
    let err = h
        .bmi
        .create_snapshot("hadoopMaster.img", "blblb1", &cred("bmi_infra"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code, 409);
    let parent_storage = naming::storage_name(2);
    assert_eq!(h.block.snapshot_count(&parent_storage), 0);
}

#[tokio::test]
async fn e8_list_snapshots_against_unknown_project_is_404() {
    let h = harness("e8");

    let err = h.bmi.list_snapshots(&cred("no_such_project")).await.unwrap_err();

    assert_eq!(err.status_code, 404);
}
