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

use crate::credential::Credential;
use crate::error::FabricError;
use async_trait::async_trait;

/// Canonical colon-separated hex MAC address, e.g. `"de:ad:be:ef:00:01"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MacAddress(pub String);

impl MacAddress {
    /// `"01-" + replace(mac, ":", "-")`, lowercased, as used for the
    /// PXELINUX per-MAC boot filename.
    pub fn dashed_lowercase(&self) -> String {
        format!("01-{}", self.0.to_lowercase().replace(':', "-"))
    }
}

/// Cluster-fabric controller client: attaches/detaches a node NIC to a
/// project network, looks up a node's MAC, and validates project
/// membership. All operations fail with `FabricError` kinds; the caller
/// retries only on `Transient`, never on a semantic failure.
#[async_trait]
pub trait Fabric: Send + Sync {
    async fn attach_node_to_project_network(
        &self,
        node: &str,
        network: &str,
        channel: &str,
        nic: &str,
    ) -> Result<(), FabricError>;

    async fn detach_node_from_project_network(
        &self,
        node: &str,
        network: &str,
        nic: &str,
    ) -> Result<(), FabricError>;

    async fn node_mac(&self, node: &str) -> Result<MacAddress, FabricError>;

    /// Fails with `Unauthorized` when the authenticated principal is not a
    /// member of `name`.
    async fn validate_project(&self, name: &str) -> Result<(), FabricError>;
}

/// Opens a [`Fabric`] session scoped to one request's credentials, mirroring
/// the per-request `BlockStore`/`Catalog` session model.
#[async_trait]
pub trait FabricFactory: Send + Sync {
    async fn open(&self, cred: &Credential) -> Result<Box<dyn Fabric>, FabricError>;
}
