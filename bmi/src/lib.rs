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

//! Domain model and orchestration core for the bare-metal imaging service.
//!
//! This crate has no knowledge of SQLite, HTTP, or subprocess plumbing: it
//! defines the capability traits (`Catalog`, `BlockStore`, `IscsiGateway`,
//! `Fabric`, `Clock`) the orchestrator is generic over, the error taxonomy,
//! and the provisioning/snapshot state machines built purely in terms of
//! those traits. Concrete implementations live in the `bmid` crate.

pub mod blockstore;
pub mod boot;
pub mod cancellation;
pub mod catalog;
pub mod clock;
pub mod credential;
pub mod error;
pub mod fabric;
pub mod iscsi;
pub mod naming;
pub mod orchestrator;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

pub use cancellation::CancellationToken;
pub use catalog::{Catalog, Image, ImageKind, Project};
pub use error::{BoundaryError, OrchError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, ProvisionRequest};
