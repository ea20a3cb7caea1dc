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

use crate::error::BlockError;
use crate::naming::SENTINEL;
use async_trait::async_trait;

/// A scoped block-store session: one cluster handle and one I/O context,
/// opened by a [`BlockStoreFactory`] and torn down when the session value
/// is dropped. Handles must not escape the scope in which they were
/// opened; callers get a session, use it for one request, and let it go.
#[async_trait]
pub trait BlockStore: Send {
    async fn list_images(&self) -> Result<Vec<String>, BlockError>;

    async fn create_image(&self, name: &str, size_bytes: u64) -> Result<(), BlockError>;

    /// Requires `parent_snap` to be protected.
    async fn clone(
        &self,
        parent_name: &str,
        parent_snap: &str,
        child_name: &str,
    ) -> Result<(), BlockError>;

    async fn remove(&self, name: &str) -> Result<(), BlockError>;

    async fn write(&self, name: &str, data: &[u8], offset: u64) -> Result<(), BlockError>;

    async fn read(&self, name: &str, length: usize, offset: u64) -> Result<Vec<u8>, BlockError>;

    /// Emulates at-most-once snapshot creation: implementations MUST reject
    /// a duplicate name before calling into the lower layer, which is known
    /// to leave broken state when handed an existing snapshot name.
    async fn snap_create(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        let existing = self.snap_list(name).await?;
        if existing.iter().any(|s| s == snap) {
            return Err(BlockError::ImageExists(snap.to_string()));
        }
        self.snap_create_unchecked(name, snap).await
    }

    /// The raw primitive `snap_create` is built on top of. Implementations
    /// provide this; callers use `snap_create`.
    async fn snap_create_unchecked(&self, name: &str, snap: &str) -> Result<(), BlockError>;

    async fn snap_list(&self, name: &str) -> Result<Vec<String>, BlockError>;

    /// Fails with `ImageBusy` if the snapshot is still protected.
    async fn snap_remove(&self, name: &str, snap: &str) -> Result<(), BlockError>;

    async fn snap_protect(&self, name: &str, snap: &str) -> Result<(), BlockError>;

    async fn snap_unprotect(&self, name: &str, snap: &str) -> Result<(), BlockError>;

    /// Decouples a clone from its parent snapshot.
    async fn flatten(&self, name: &str) -> Result<(), BlockError>;

    /// Steps 1-2 of the safe clone-from-live-image algorithm (component
    /// design §4.2): snapshots and protects the parent under the
    /// well-known sentinel name. Split out from the clone half below so a
    /// caller that needs to allocate the child's storage name in between
    /// (e.g. from a catalog-assigned id, only known once the parent side
    /// has already succeeded) can still get both halves for free.
    async fn protect_parent_sentinel(&self, parent: &str) -> Result<(), BlockError> {
        self.snap_create(parent, SENTINEL).await?;
        self.snap_protect(parent, SENTINEL).await?;
        Ok(())
    }

    /// Steps 3-8: clones the protected parent sentinel into `child`,
    /// flattens it free of the parent, gives the child its own protected
    /// sentinel, and releases the parent's. Flattening the child first
    /// severs the parent dependency so the parent's sentinel can be
    /// released immediately, leaving the parent free of snapshot debt
    /// while the child keeps its own protected sentinel for future clones.
    /// Requires [`protect_parent_sentinel`] to have already run against
    /// `parent`.
    ///
    /// On failure the caller is responsible for compensating whatever
    /// steps did complete; this method does not unwind itself, it returns
    /// as soon as a step fails so the orchestrator can decide.
    async fn clone_from_protected_sentinel(&self, parent: &str, child: &str) -> Result<(), BlockError> {
        self.clone(parent, SENTINEL, child).await?;
        self.flatten(child).await?;
        self.snap_create(child, SENTINEL).await?;
        self.snap_protect(child, SENTINEL).await?;
        self.snap_unprotect(parent, SENTINEL).await?;
        self.snap_remove(parent, SENTINEL).await?;
        Ok(())
    }
}

/// Opens a scoped [`BlockStore`] session against the configured pool and
/// identity. One factory instance lives for the daemon's lifetime; each
/// request opens its own session and drops it on the way out.
#[async_trait]
pub trait BlockStoreFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BlockStore>, BlockError>;
}
