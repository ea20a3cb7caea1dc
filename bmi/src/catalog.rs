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

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageKind {
    UserUpload,
    ProvisionClone,
    Snapshot,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub provision_network: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub name: String,
    pub project_id: i64,
    pub kind: ImageKind,
    pub parent_id: Option<i64>,
    pub public_snapshot: bool,
}

/// Persists projects and images; enforces uniqueness and referential
/// integrity. Every operation is a single round-trip commit: a failing
/// call leaves the store unchanged.
pub trait Catalog: Send + Sync {
    fn insert_project(
        &self,
        name: &str,
        provision_network: &str,
    ) -> Result<i64, CatalogError>;

    /// Idempotent; cascades to the project's images.
    fn delete_project_by_name(&self, name: &str) -> Result<(), CatalogError>;

    fn project_id_by_name(&self, name: &str) -> Option<i64>;

    fn project_by_id(&self, id: i64) -> Option<Project>;

    fn insert_image(
        &self,
        name: &str,
        project_id: i64,
        kind: ImageKind,
        parent_id: Option<i64>,
        public_snapshot: bool,
    ) -> Result<i64, CatalogError>;

    fn image_id_by_name_in_project(&self, name: &str, project_id: i64) -> Option<i64>;

    fn image_name_by_id(&self, id: i64) -> Option<String>;

    /// Idempotent.
    fn delete_image_by_name_in_project(
        &self,
        name: &str,
        project_id: i64,
    ) -> Result<(), CatalogError>;

    fn images_in_project(&self, project_id: i64) -> Result<Vec<String>, CatalogError>;

    fn snapshots_in_project(&self, project_id: i64) -> Result<Vec<String>, CatalogError>;
}
