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

//! [`IscsiGateway`] over a site-specific shell tool, invoked with the six
//! positional arguments `(keyRing, id, pool, storageName, action,
//! adminPassword)` and read for the `SUCCESS`/`FAILURE` sentinel substrings
//! on stdout.

use async_trait::async_trait;
use bmi::error::IscsiError;
use bmi::iscsi::{IscsiAction, IscsiGateway};
use std::path::PathBuf;
use std::process::Command;

const SUCCESS_SENTINEL: &str = "SUCCESS";
const FAILURE_SENTINEL: &str = "FAILURE";

pub struct IscsiShellGateway {
    tool_path: PathBuf,
}

impl IscsiShellGateway {
    pub fn new(tool_path: impl Into<PathBuf>) -> IscsiShellGateway {
        IscsiShellGateway {
            tool_path: tool_path.into(),
        }
    }
}

fn action_arg(action: IscsiAction) -> &'static str {
    match action {
        IscsiAction::Create => "CREATE",
        IscsiAction::Delete => "DELETE",
    }
}

/// Pure so the sentinel logic can be unit-tested without spawning a process.
fn interpret(action: IscsiAction, stdout: &str) -> Result<(), IscsiError> {
    if stdout.contains(SUCCESS_SENTINEL) {
        return Ok(());
    }
    if stdout.contains(FAILURE_SENTINEL) {
        return Err(match action {
            IscsiAction::Create => IscsiError::NodeInUse,
            IscsiAction::Delete => IscsiError::NodeAlreadyUnmapped,
        });
    }
    Err(IscsiError::ToolError(stdout.to_string()))
}

#[async_trait]
impl IscsiGateway for IscsiShellGateway {
    async fn apply(
        &self,
        action: IscsiAction,
        pool: &str,
        identity: &str,
        storage_name: &str,
        key_ring: &str,
        admin_password: &str,
    ) -> Result<(), IscsiError> {
        let tool_path = self.tool_path.clone();
        let key_ring = key_ring.to_string();
        let identity = identity.to_string();
        let pool = pool.to_string();
        let storage_name = storage_name.to_string();
        let admin_password = admin_password.to_string();

        let output = tokio::task::spawn_blocking(move || {
            Command::new(&tool_path)
                .arg(&key_ring)
                .arg(&identity)
                .arg(&pool)
                .arg(&storage_name)
                .arg(action_arg(action))
                .arg(&admin_password)
                .output()
        })
        .await
        .expect("iscsi update task panicked")
        .map_err(|e| IscsiError::ToolError(format!("failed to spawn iscsi update tool: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        interpret(action, &stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_sentinel_is_ok() {
        assert!(interpret(IscsiAction::Create, "mapping created\nSUCCESS\n").is_ok());
    }

    #[test]
    fn failure_sentinel_on_create_is_node_in_use() {
        let err = interpret(IscsiAction::Create, "FAILURE: node already mapped").unwrap_err();
        assert!(matches!(err, IscsiError::NodeInUse));
    }

    #[test]
    fn failure_sentinel_on_delete_is_already_unmapped() {
        let err = interpret(IscsiAction::Delete, "FAILURE: nothing to remove").unwrap_err();
        assert!(matches!(err, IscsiError::NodeAlreadyUnmapped));
    }

    #[test]
    fn unrecognized_output_is_tool_error() {
        let err = interpret(IscsiAction::Create, "permission denied").unwrap_err();
        assert!(matches!(err, IscsiError::ToolError(_)));
    }
}
