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

use crate::catalog::Catalog;
use crate::naming;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("no such row")]
    NotFound,
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("foreign key constraint violated: {0}")]
    FkViolation(String),
    #[error("catalog engine error: {0}")]
    EngineError(#[source] anyhow::Error),
}

impl CatalogError {
    pub fn status_code(&self) -> u16 {
        match self {
            CatalogError::NotFound => 404,
            CatalogError::UniqueViolation(_) => 409,
            CatalogError::FkViolation(_) => 409,
            CatalogError::EngineError(_) => 500,
        }
    }
}

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("image already exists: {0}")]
    ImageExists(String),
    #[error("image busy: {0}")]
    ImageBusy(String),
    #[error("image has snapshots: {0}")]
    ImageHasSnapshots(String),
    #[error("function unsupported")]
    FunctionUnsupported,
    #[error("argument out of range")]
    ArgOutOfRange,
    #[error("block store config missing: {0}")]
    ConfigMissing(String),
    #[error("block store config invalid: {0}")]
    ConfigInvalid(String),
}

impl BlockError {
    pub fn status_code(&self) -> u16 {
        match self {
            BlockError::ImageNotFound(_) => 404,
            BlockError::ImageExists(_) => 471,
            BlockError::ImageBusy(_) => 409,
            BlockError::ImageHasSnapshots(_) => 409,
            BlockError::FunctionUnsupported => 500,
            BlockError::ArgOutOfRange => 400,
            BlockError::ConfigMissing(_) => 500,
            BlockError::ConfigInvalid(_) => 500,
        }
    }
}

#[derive(Error, Debug)]
pub enum IscsiError {
    #[error("node already in use")]
    NodeInUse,
    #[error("node already unmapped")]
    NodeAlreadyUnmapped,
    #[error("iscsi tool error: {0}")]
    ToolError(String),
}

impl IscsiError {
    pub fn status_code(&self) -> u16 {
        match self {
            IscsiError::NodeInUse => 500,
            IscsiError::NodeAlreadyUnmapped => 500,
            IscsiError::ToolError(_) => 500,
        }
    }
}

#[derive(Error, Debug)]
pub enum FabricError {
    #[error("project unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient fabric error: {0}")]
    Transient(String),
    #[error("fabric protocol error: {0}")]
    Protocol(String),
}

impl FabricError {
    pub fn status_code(&self) -> u16 {
        match self {
            FabricError::Unauthorized(_) => 401,
            FabricError::NotFound(_) => 404,
            FabricError::Transient(_) => 503,
            FabricError::Protocol(_) => 502,
        }
    }
}

#[derive(Error, Debug)]
pub enum BootError {
    #[error("boot template missing: {0}")]
    TemplateMissing(String),
    #[error("boot artifact io error: {0}")]
    IoError(#[source] std::io::Error),
}

impl BootError {
    pub fn status_code(&self) -> u16 {
        match self {
            BootError::TemplateMissing(_) => 500,
            BootError::IoError(_) => 500,
        }
    }
}

/// A single compensating action that failed to complete even after its
/// retry budget was exhausted. Surfaced to the caller so a human can clean
/// the resource up by hand; never silently dropped.
#[derive(Debug, Clone)]
pub struct LeakedResource {
    pub step: String,
    pub detail: String,
}

#[derive(Error, Debug)]
pub enum OrchError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Iscsi(#[from] IscsiError),
    #[error(transparent)]
    Fabric(#[from] FabricError),
    #[error(transparent)]
    Boot(#[from] BootError),
    #[error("request cancelled")]
    Cancelled,
    #[error("compensation incomplete, {} resource(s) may need manual cleanup", .0.len())]
    CompensationIncomplete(Vec<LeakedResource>),
}

impl OrchError {
    pub fn status_code(&self) -> u16 {
        match self {
            OrchError::Catalog(e) => e.status_code(),
            OrchError::Block(e) => e.status_code(),
            OrchError::Iscsi(e) => e.status_code(),
            OrchError::Fabric(e) => e.status_code(),
            OrchError::Boot(e) => e.status_code(),
            OrchError::Cancelled => 499,
            OrchError::CompensationIncomplete(_) => 500,
        }
    }

    /// True for the error families produced by the block store, whose
    /// messages carry storage-layer tokens (`img<id>`) that need rewriting
    /// to user-visible image names at the boundary.
    fn is_block_layer(&self) -> bool {
        matches!(self, OrchError::Block(_))
    }
}

/// The `{ statusCode, message }` shape returned at the system boundary on
/// failure. Constructed only here, from an `OrchError`; `rewrite_storage_names`
/// never runs anywhere else.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BoundaryError {
    pub status_code: u16,
    pub message: String,
}

pub fn to_boundary(err: &OrchError, catalog: &dyn Catalog) -> BoundaryError {
    let message = if err.is_block_layer() {
        rewrite_storage_names(&err.to_string(), catalog)
    } else {
        err.to_string()
    };
    BoundaryError {
        status_code: err.status_code(),
        message,
    }
}

/// For each whitespace-separated token beginning with `img` followed by
/// digits, substitute the user-visible image name via the catalog, leaving
/// unknown tokens unchanged. Identity on messages with no storage tokens;
/// idempotent on any message (a rewritten name never itself parses as a
/// storage name, since catalog names aren't constrained to match `imgNNN`
/// but are never produced by this function in a form that would).
pub fn rewrite_storage_names(msg: &str, catalog: &dyn Catalog) -> String {
    let mut cache: BTreeMap<i64, Option<String>> = BTreeMap::new();
    msg.split(' ')
        .map(|token| match naming::parse_storage_name(token) {
            None => token.to_string(),
            Some(id) => {
                let name = cache
                    .entry(id)
                    .or_insert_with(|| catalog.image_name_by_id(id));
                name.clone().unwrap_or_else(|| token.to_string())
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeCatalog;

    #[test]
    fn identity_on_message_without_storage_tokens() {
        let catalog = FakeCatalog::new();
        let msg = "project bmi_infra not found";
        assert_eq!(rewrite_storage_names(msg, &catalog), msg);
    }

    #[test]
    fn rewrites_known_tokens_and_is_idempotent() {
        let mut catalog = FakeCatalog::new();
        let pid = catalog.insert_project("bmi_infra", "vlan/native").unwrap();
        let id = catalog
            .insert_image("hadoopMaster.img", pid, crate::catalog::ImageKind::UserUpload, None, false)
            .unwrap();
        let storage = naming::storage_name(id);
        let msg = format!("{storage} not found");
        let once = rewrite_storage_names(&msg, &catalog);
        assert_eq!(once, "hadoopMaster.img not found");
        let twice = rewrite_storage_names(&once, &catalog);
        assert_eq!(once, twice);
    }

    #[test]
    fn leaves_unknown_storage_tokens_unchanged() {
        let catalog = FakeCatalog::new();
        let msg = "img999999 not found";
        assert_eq!(rewrite_storage_names(msg, &catalog), msg);
    }
}
