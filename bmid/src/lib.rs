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

//! Wires the concrete capability implementations (sqlite catalog, rbd
//! block store, shelled-out iSCSI gateway, HTTP fabric client) into a
//! `bmi::Orchestrator` and exposes the request-level [`Bmi`] facade. The
//! HTTP/IPC request surface itself is out of scope here; `xmain` brings the
//! daemon up and then idles until told to stop.

pub mod auth;
pub mod blockstore_rbd;
pub mod catalog_sqlite;
pub mod config;
pub mod fabric_http;
pub mod iscsi_shell;

use bmi::catalog::Catalog;
use bmi::clock::RealClock;
use bmi::credential::Credential;
use bmi::error::{to_boundary, BoundaryError};
use bmi::orchestrator::{Orchestrator, OrchestratorConfig, ProvisionOutcome, ProvisionRequest};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::blockstore_rbd::{RbdBlockStoreFactory, RbdConfig};
use crate::catalog_sqlite::SqliteCatalog;
use crate::config::{BmidConfig, BmidConfigArg};
use crate::fabric_http::HttpFabricFactory;
use crate::iscsi_shell::IscsiShellGateway;

/// Request-level facade analogous to `ims.einstein.operations.BMI`: every
/// method returns the `{ statusCode, message }` boundary envelope on
/// failure, with block-layer storage names already rewritten to the
/// catalog's user-visible image names.
pub struct Bmi {
    orchestrator: Orchestrator,
    catalog: Arc<dyn Catalog>,
}

impl Bmi {
    pub fn new(orchestrator: Orchestrator, catalog: Arc<dyn Catalog>) -> Bmi {
        Bmi { orchestrator, catalog }
    }

    /// Runs provision with the caller's request deadline: `cancel` is
    /// checked between each state-machine step and any cancellation
    /// arriving there surfaces as `ORCH.CANCELLED` once the compensation
    /// chain for whatever completed has run.
    pub async fn provision(
        &self,
        req: ProvisionRequest,
        cred: &Credential,
        cancel: &bmi::CancellationToken,
    ) -> Result<ProvisionOutcome, BoundaryError> {
        self.orchestrator
            .provision(req, cred, cancel)
            .await
            .map_err(|e| to_boundary(&e, self.catalog.as_ref()))
    }

    pub async fn deprovision(
        &self,
        node: &str,
        project: &str,
        nic: &str,
        cred: &Credential,
        cancel: &bmi::CancellationToken,
    ) -> Result<(), BoundaryError> {
        self.orchestrator
            .deprovision(node, project, nic, cred, cancel)
            .await
            .map_err(|e| to_boundary(&e, self.catalog.as_ref()))
    }

    pub async fn create_snapshot(
        &self,
        parent_image_name: &str,
        snap_name: &str,
        cred: &Credential,
    ) -> Result<(), BoundaryError> {
        self.orchestrator
            .create_snapshot(parent_image_name, snap_name, cred)
            .await
            .map_err(|e| to_boundary(&e, self.catalog.as_ref()))
    }

    pub async fn remove_image(&self, image_name: &str, cred: &Credential) -> Result<(), BoundaryError> {
        self.orchestrator
            .remove_image(image_name, cred)
            .await
            .map_err(|e| to_boundary(&e, self.catalog.as_ref()))
    }

    pub async fn list_images(&self, cred: &Credential) -> Result<Vec<String>, BoundaryError> {
        self.orchestrator
            .list_images(cred)
            .await
            .map_err(|e| to_boundary(&e, self.catalog.as_ref()))
    }

    pub async fn list_snapshots(&self, cred: &Credential) -> Result<Vec<String>, BoundaryError> {
        self.orchestrator
            .list_snapshots(cred)
            .await
            .map_err(|e| to_boundary(&e, self.catalog.as_ref()))
    }
}

fn build_bmi(config: &BmidConfig) -> anyhow::Result<Bmi> {
    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::open(&config.catalog_db)?);

    let block_factory = Arc::new(RbdBlockStoreFactory::new(RbdConfig {
        executable: config.block_tool_path.clone(),
        conffile: config.block_conffile.clone(),
        id: config.block_client_id.clone(),
        pool: config.pool.clone(),
    }));

    let iscsi = Arc::new(IscsiShellGateway::new(config.iscsi_tool_path.clone()));
    let fabric_factory = Arc::new(HttpFabricFactory::new(config.fabric_base_url.clone()));
    let boot = Arc::new(bmi::boot::BootArtifacts::new(
        config.ipxe_dir.clone(),
        config.pxelinux_dir.clone(),
    ));

    let orch_config = OrchestratorConfig {
        pool: config.pool.clone(),
        identity: config.block_client_id.clone(),
        key_ring: config.key_ring.clone(),
        admin_password: config.admin_password.clone(),
        iqn_prefix: config.iqn_prefix.clone(),
        fabric_settle: Duration::from_secs(config.fabric_settle_secs),
    };

    let orchestrator = Orchestrator::new(
        catalog.clone(),
        block_factory,
        iscsi,
        fabric_factory,
        boot,
        Arc::new(RealClock),
        orch_config,
    );

    Ok(Bmi::new(orchestrator, catalog))
}

pub async fn xmain() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let args = BmidConfigArg::parse();

    let config_path = &args.config_path;
    info!("loading configuration from {config_path:?}");
    let config_file = std::fs::OpenOptions::new().read(true).open(config_path)?;
    let mut config: BmidConfig = serde_yaml::from_reader(config_file)?;
    config.merge(args);
    info!("config: {config:#?}");
    config.prepare()?;

    let bmi = build_bmi(&config)?;
    info!("bmid ready");

    // The HTTP/IPC request surface is out of scope; the daemon just stays
    // up until signalled so the facade above is reachable by whatever
    // in-process caller wires it in (tests, or a future request layer).
    let _ = &bmi;
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    Ok(())
}

#[cfg(test)]
mod tests {}
