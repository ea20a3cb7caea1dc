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

//! In-memory fakes for the four capability traits plus the clock, shared
//! between this crate's own unit tests and `bmid`'s integration tests.
//! Gated behind `cfg(test)` or the `test-util` feature the way tokio gates
//! its own `test-util` helpers.

use crate::blockstore::{BlockStore, BlockStoreFactory};
use crate::catalog::{Catalog, Image, ImageKind, Project};
use crate::clock::Clock;
use crate::credential::Credential;
use crate::error::{BlockError, CatalogError, FabricError, IscsiError};
use crate::fabric::{Fabric, FabricFactory, MacAddress};
use crate::iscsi::{IscsiAction, IscsiGateway};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct FakeCatalog {
    next_id: AtomicI64,
    projects: Mutex<HashMap<i64, (String, String)>>,
    images: Mutex<HashMap<i64, Image>>,
}

impl FakeCatalog {
    pub fn new() -> FakeCatalog {
        FakeCatalog {
            next_id: AtomicI64::new(1),
            projects: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
        }
    }

    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Catalog for FakeCatalog {
    fn insert_project(&self, name: &str, provision_network: &str) -> Result<i64, CatalogError> {
        let mut projects = self.projects.lock().unwrap();
        if projects.values().any(|(n, _)| n == name) {
            return Err(CatalogError::UniqueViolation(name.to_string()));
        }
        let id = self.alloc_id();
        projects.insert(id, (name.to_string(), provision_network.to_string()));
        Ok(id)
    }

    fn delete_project_by_name(&self, name: &str) -> Result<(), CatalogError> {
        let mut projects = self.projects.lock().unwrap();
        let id = projects
            .iter()
            .find(|(_, (n, _))| n == name)
            .map(|(id, _)| *id);
        if let Some(id) = id {
            projects.remove(&id);
            self.images.lock().unwrap().retain(|_, img| img.project_id != id);
        }
        Ok(())
    }

    fn project_id_by_name(&self, name: &str) -> Option<i64> {
        self.projects
            .lock()
            .unwrap()
            .iter()
            .find(|(_, (n, _))| n == name)
            .map(|(id, _)| *id)
    }

    fn project_by_id(&self, id: i64) -> Option<Project> {
        self.projects.lock().unwrap().get(&id).map(|(name, network)| Project {
            id,
            name: name.clone(),
            provision_network: network.clone(),
        })
    }

    fn insert_image(
        &self,
        name: &str,
        project_id: i64,
        kind: ImageKind,
        parent_id: Option<i64>,
        public_snapshot: bool,
    ) -> Result<i64, CatalogError> {
        if !self.projects.lock().unwrap().contains_key(&project_id) {
            return Err(CatalogError::FkViolation(format!("no such project {project_id}")));
        }
        if let Some(parent) = parent_id {
            if !self.images.lock().unwrap().contains_key(&parent) {
                return Err(CatalogError::FkViolation(format!("no such parent {parent}")));
            }
        }
        let mut images = self.images.lock().unwrap();
        if images
            .values()
            .any(|img| img.project_id == project_id && img.name == name)
        {
            return Err(CatalogError::UniqueViolation(name.to_string()));
        }
        let id = self.alloc_id();
        images.insert(
            id,
            Image {
                id,
                name: name.to_string(),
                project_id,
                kind,
                parent_id,
                public_snapshot,
            },
        );
        Ok(id)
    }

    fn image_id_by_name_in_project(&self, name: &str, project_id: i64) -> Option<i64> {
        self.images
            .lock()
            .unwrap()
            .values()
            .find(|img| img.project_id == project_id && img.name == name)
            .map(|img| img.id)
    }

    fn image_name_by_id(&self, id: i64) -> Option<String> {
        self.images.lock().unwrap().get(&id).map(|img| img.name.clone())
    }

    fn delete_image_by_name_in_project(&self, name: &str, project_id: i64) -> Result<(), CatalogError> {
        let mut images = self.images.lock().unwrap();
        let id = images
            .values()
            .find(|img| img.project_id == project_id && img.name == name)
            .map(|img| img.id);
        if let Some(id) = id {
            images.remove(&id);
        }
        Ok(())
    }

    fn images_in_project(&self, project_id: i64) -> Result<Vec<String>, CatalogError> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .values()
            .filter(|img| img.project_id == project_id)
            .map(|img| img.name.clone())
            .collect())
    }

    fn snapshots_in_project(&self, project_id: i64) -> Result<Vec<String>, CatalogError> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .values()
            .filter(|img| img.project_id == project_id && img.kind == ImageKind::Snapshot)
            .map(|img| img.name.clone())
            .collect())
    }
}

#[derive(Default)]
struct FakeBlockStoreState {
    images: HashMap<String, HashSet<String>>,
    protected: HashSet<(String, String)>,
}

#[derive(Default)]
pub struct FakeBlockStore {
    state: Mutex<FakeBlockStoreState>,
}

impl FakeBlockStore {
    pub fn new() -> FakeBlockStore {
        FakeBlockStore::default()
    }

    pub fn seed_image(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .images
            .entry(name.to_string())
            .or_default();
    }

    pub fn has_image(&self, name: &str) -> bool {
        self.state.lock().unwrap().images.contains_key(name)
    }

    pub fn snapshot_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .images
            .get(name)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl BlockStore for FakeBlockStore {
    async fn list_images(&self) -> Result<Vec<String>, BlockError> {
        Ok(self.state.lock().unwrap().images.keys().cloned().collect())
    }

    async fn create_image(&self, name: &str, _size_bytes: u64) -> Result<(), BlockError> {
        let mut state = self.state.lock().unwrap();
        if state.images.contains_key(name) {
            return Err(BlockError::ImageExists(name.to_string()));
        }
        state.images.insert(name.to_string(), HashSet::new());
        Ok(())
    }

    async fn clone(&self, parent_name: &str, parent_snap: &str, child_name: &str) -> Result<(), BlockError> {
        let mut state = self.state.lock().unwrap();
        if !state
            .protected
            .contains(&(parent_name.to_string(), parent_snap.to_string()))
        {
            return Err(BlockError::ImageNotFound(parent_snap.to_string()));
        }
        if state.images.contains_key(child_name) {
            return Err(BlockError::ImageExists(child_name.to_string()));
        }
        state.images.insert(child_name.to_string(), HashSet::new());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), BlockError> {
        let mut state = self.state.lock().unwrap();
        let snaps = state
            .images
            .get(name)
            .ok_or_else(|| BlockError::ImageNotFound(name.to_string()))?;
        if !snaps.is_empty() {
            return Err(BlockError::ImageHasSnapshots(name.to_string()));
        }
        state.images.remove(name);
        Ok(())
    }

    async fn write(&self, name: &str, _data: &[u8], _offset: u64) -> Result<(), BlockError> {
        if !self.state.lock().unwrap().images.contains_key(name) {
            return Err(BlockError::ImageNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn read(&self, name: &str, _length: usize, _offset: u64) -> Result<Vec<u8>, BlockError> {
        if !self.state.lock().unwrap().images.contains_key(name) {
            return Err(BlockError::ImageNotFound(name.to_string()));
        }
        Ok(Vec::new())
    }

    async fn snap_create_unchecked(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        let mut state = self.state.lock().unwrap();
        let snaps = state
            .images
            .get_mut(name)
            .ok_or_else(|| BlockError::ImageNotFound(name.to_string()))?;
        snaps.insert(snap.to_string());
        Ok(())
    }

    async fn snap_list(&self, name: &str) -> Result<Vec<String>, BlockError> {
        let state = self.state.lock().unwrap();
        let snaps = state
            .images
            .get(name)
            .ok_or_else(|| BlockError::ImageNotFound(name.to_string()))?;
        Ok(snaps.iter().cloned().collect())
    }

    async fn snap_remove(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        let mut state = self.state.lock().unwrap();
        if state.protected.contains(&(name.to_string(), snap.to_string())) {
            return Err(BlockError::ImageBusy(snap.to_string()));
        }
        let snaps = state
            .images
            .get_mut(name)
            .ok_or_else(|| BlockError::ImageNotFound(name.to_string()))?;
        snaps.remove(snap);
        Ok(())
    }

    async fn snap_protect(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        let mut state = self.state.lock().unwrap();
        if !state
            .images
            .get(name)
            .map(|s| s.contains(snap))
            .unwrap_or(false)
        {
            return Err(BlockError::ImageNotFound(snap.to_string()));
        }
        state.protected.insert((name.to_string(), snap.to_string()));
        Ok(())
    }

    async fn snap_unprotect(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        self.state
            .lock()
            .unwrap()
            .protected
            .remove(&(name.to_string(), snap.to_string()));
        Ok(())
    }

    async fn flatten(&self, name: &str) -> Result<(), BlockError> {
        if !self.state.lock().unwrap().images.contains_key(name) {
            return Err(BlockError::ImageNotFound(name.to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeBlockStoreFactory {
    pub store: std::sync::Arc<FakeBlockStore>,
}

impl FakeBlockStoreFactory {
    pub fn new(store: std::sync::Arc<FakeBlockStore>) -> FakeBlockStoreFactory {
        FakeBlockStoreFactory { store }
    }
}

#[async_trait]
impl BlockStoreFactory for FakeBlockStoreFactory {
    async fn open(&self) -> Result<Box<dyn BlockStore>, BlockError> {
        Ok(Box::new(FakeBlockStoreHandle(self.store.clone())))
    }
}

/// A thin per-session handle over the shared fake store, so dropping it
/// simulates session teardown without actually discarding the data.
pub struct FakeBlockStoreHandle(std::sync::Arc<FakeBlockStore>);

#[async_trait]
impl BlockStore for FakeBlockStoreHandle {
    async fn list_images(&self) -> Result<Vec<String>, BlockError> {
        self.0.list_images().await
    }
    async fn create_image(&self, name: &str, size_bytes: u64) -> Result<(), BlockError> {
        self.0.create_image(name, size_bytes).await
    }
    async fn clone(&self, parent_name: &str, parent_snap: &str, child_name: &str) -> Result<(), BlockError> {
        BlockStore::clone(self.0.as_ref(), parent_name, parent_snap, child_name).await
    }
    async fn remove(&self, name: &str) -> Result<(), BlockError> {
        self.0.remove(name).await
    }
    async fn write(&self, name: &str, data: &[u8], offset: u64) -> Result<(), BlockError> {
        self.0.write(name, data, offset).await
    }
    async fn read(&self, name: &str, length: usize, offset: u64) -> Result<Vec<u8>, BlockError> {
        self.0.read(name, length, offset).await
    }
    async fn snap_create_unchecked(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        self.0.snap_create_unchecked(name, snap).await
    }
    async fn snap_list(&self, name: &str) -> Result<Vec<String>, BlockError> {
        self.0.snap_list(name).await
    }
    async fn snap_remove(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        self.0.snap_remove(name, snap).await
    }
    async fn snap_protect(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        self.0.snap_protect(name, snap).await
    }
    async fn snap_unprotect(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        self.0.snap_unprotect(name, snap).await
    }
    async fn flatten(&self, name: &str) -> Result<(), BlockError> {
        self.0.flatten(name).await
    }
}

#[derive(Default)]
struct FakeIscsiState {
    mapped: HashSet<String>,
}

#[derive(Default)]
pub struct FakeIscsiGateway {
    state: Mutex<FakeIscsiState>,
}

impl FakeIscsiGateway {
    pub fn new() -> FakeIscsiGateway {
        FakeIscsiGateway::default()
    }
}

#[async_trait]
impl IscsiGateway for FakeIscsiGateway {
    async fn apply(
        &self,
        action: IscsiAction,
        _pool: &str,
        _identity: &str,
        storage_name: &str,
        _key_ring: &str,
        _admin_password: &str,
    ) -> Result<(), IscsiError> {
        let mut state = self.state.lock().unwrap();
        match action {
            IscsiAction::Create => {
                if !state.mapped.insert(storage_name.to_string()) {
                    return Err(IscsiError::NodeInUse);
                }
                Ok(())
            }
            IscsiAction::Delete => {
                if !state.mapped.remove(storage_name) {
                    return Err(IscsiError::NodeAlreadyUnmapped);
                }
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct FakeFabricState {
    attached: HashSet<(String, String)>,
    macs: HashMap<String, String>,
    members: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
pub struct FakeFabric {
    state: Mutex<FakeFabricState>,
}

impl FakeFabric {
    pub fn new() -> FakeFabric {
        FakeFabric::default()
    }

    pub fn set_mac(&self, node: &str, mac: &str) {
        self.state.lock().unwrap().macs.insert(node.to_string(), mac.to_string());
    }

    pub fn add_member(&self, project: &str, user: &str) {
        self.state
            .lock()
            .unwrap()
            .members
            .entry(project.to_string())
            .or_default()
            .insert(user.to_string());
    }

    pub fn is_attached(&self, node: &str, network: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .attached
            .contains(&(node.to_string(), network.to_string()))
    }
}

#[async_trait]
impl Fabric for FakeFabric {
    async fn attach_node_to_project_network(
        &self,
        node: &str,
        network: &str,
        _channel: &str,
        _nic: &str,
    ) -> Result<(), FabricError> {
        self.state
            .lock()
            .unwrap()
            .attached
            .insert((node.to_string(), network.to_string()));
        Ok(())
    }

    async fn detach_node_from_project_network(
        &self,
        node: &str,
        network: &str,
        _nic: &str,
    ) -> Result<(), FabricError> {
        self.state
            .lock()
            .unwrap()
            .attached
            .remove(&(node.to_string(), network.to_string()));
        Ok(())
    }

    async fn node_mac(&self, node: &str) -> Result<MacAddress, FabricError> {
        self.state
            .lock()
            .unwrap()
            .macs
            .get(node)
            .cloned()
            .map(MacAddress)
            .ok_or_else(|| FabricError::NotFound(node.to_string()))
    }

    async fn validate_project(&self, name: &str) -> Result<(), FabricError> {
        let state = self.state.lock().unwrap();
        match state.members.get(name) {
            Some(members) if !members.is_empty() => Ok(()),
            _ => Err(FabricError::Unauthorized(name.to_string())),
        }
    }
}

#[derive(Default)]
pub struct FakeFabricFactory {
    pub fabric: std::sync::Arc<FakeFabric>,
}

impl FakeFabricFactory {
    pub fn new(fabric: std::sync::Arc<FakeFabric>) -> FakeFabricFactory {
        FakeFabricFactory { fabric }
    }
}

#[async_trait]
impl FabricFactory for FakeFabricFactory {
    async fn open(&self, _cred: &Credential) -> Result<Box<dyn Fabric>, FabricError> {
        Ok(Box::new(FakeFabricHandle(self.fabric.clone())))
    }
}

pub struct FakeFabricHandle(std::sync::Arc<FakeFabric>);

#[async_trait]
impl Fabric for FakeFabricHandle {
    async fn attach_node_to_project_network(&self, node: &str, network: &str, channel: &str, nic: &str) -> Result<(), FabricError> {
        self.0.attach_node_to_project_network(node, network, channel, nic).await
    }
    async fn detach_node_from_project_network(&self, node: &str, network: &str, nic: &str) -> Result<(), FabricError> {
        self.0.detach_node_from_project_network(node, network, nic).await
    }
    async fn node_mac(&self, node: &str) -> Result<MacAddress, FabricError> {
        self.0.node_mac(node).await
    }
    async fn validate_project(&self, name: &str) -> Result<(), FabricError> {
        self.0.validate_project(name).await
    }
}

#[derive(Default)]
pub struct FakeClock {
    pub requested: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> FakeClock {
        FakeClock::default()
    }
}

#[async_trait]
impl Clock for FakeClock {
    async fn sleep(&self, duration: Duration) {
        self.requested.lock().unwrap().push(duration);
    }
}
