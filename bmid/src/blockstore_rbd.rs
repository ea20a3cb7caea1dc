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

//! [`BlockStore`] over a configurable `rbd`-compatible CLI tool, shelled out
//! to with `std::process::Command` the way `freebsd::fs::zfs::ZfsHandle`
//! shells out to `zfs`. `BlockStore` is async but `Command` is not, so every
//! call runs on `spawn_blocking`.

use async_trait::async_trait;
use bmi::blockstore::{BlockStore, BlockStoreFactory};
use bmi::error::BlockError;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
enum RbdError {
    #[error("fail to spawn rbd process: {0}")]
    SpawnError(std::io::Error),
    #[error("rbd command failed with {0}: {1}")]
    Generic(ExitStatus, String),
}

impl From<RbdError> for BlockError {
    fn from(err: RbdError) -> BlockError {
        match &err {
            RbdError::SpawnError(_) => BlockError::ConfigInvalid(err.to_string()),
            RbdError::Generic(_, stderr) => classify_stderr(stderr, err.to_string()),
        }
    }
}

/// `rbd`'s own error text is the only signal this wrapper gets back; these
/// substrings are the ones observed in practice for the cases the trait
/// distinguishes.
fn classify_stderr(stderr: &str, fallback: String) -> BlockError {
    let lower = stderr.to_lowercase();
    if lower.contains("no such file or directory") || lower.contains("not found") {
        BlockError::ImageNotFound(fallback)
    } else if lower.contains("file exists") || lower.contains("already exists") {
        BlockError::ImageExists(fallback)
    } else if lower.contains("has snapshots") {
        BlockError::ImageHasSnapshots(fallback)
    } else if lower.contains("busy") || lower.contains("in use") {
        BlockError::ImageBusy(fallback)
    } else if lower.contains("argument") || lower.contains("out of range") {
        BlockError::ArgOutOfRange
    } else {
        BlockError::FunctionUnsupported
    }
}

#[derive(Clone, Debug)]
pub struct RbdConfig {
    pub executable: PathBuf,
    pub conffile: PathBuf,
    pub id: String,
    pub pool: String,
}

fn qualified(pool: &str, name: &str) -> String {
    format!("{pool}/{name}")
}

fn qualified_snap(pool: &str, name: &str, snap: &str) -> String {
    format!("{pool}/{name}@{snap}")
}

fn run(config: &RbdConfig, args: &[&str]) -> Result<Vec<u8>, RbdError> {
    let mut command = Command::new(&config.executable);
    command
        .arg("-c")
        .arg(&config.conffile)
        .arg("--id")
        .arg(&config.id)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for arg in args {
        command.arg(arg);
    }
    let output = command.output().map_err(RbdError::SpawnError)?;
    if output.status.success() {
        Ok(output.stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        Err(RbdError::Generic(output.status, stderr))
    }
}

/// Parses `rbd snap ls`'s table output, skipping the `SNAPID` header row and
/// taking the second whitespace-separated column (`NAME`).
fn parse_snap_names(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim_start().starts_with("SNAPID"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|s| s.to_string())
        .collect()
}

pub struct RbdBlockStore {
    config: RbdConfig,
}

impl RbdBlockStore {
    pub fn new(config: RbdConfig) -> RbdBlockStore {
        RbdBlockStore { config }
    }

    async fn run_blocking(&self, args: Vec<String>) -> Result<Vec<u8>, BlockError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = args.iter().map(String::as_str).collect();
            run(&config, &refs)
        })
        .await
        .expect("rbd blocking task panicked")
        .map_err(BlockError::from)
    }
}

#[async_trait]
impl BlockStore for RbdBlockStore {
    async fn list_images(&self) -> Result<Vec<String>, BlockError> {
        let out = self.run_blocking(vec!["ls".into(), self.config.pool.clone()]).await?;
        Ok(String::from_utf8_lossy(&out)
            .lines()
            .map(|s| s.to_string())
            .collect())
    }

    async fn create_image(&self, name: &str, size_bytes: u64) -> Result<(), BlockError> {
        let size_mb = (size_bytes / (1024 * 1024)).max(1).to_string();
        self.run_blocking(vec![
            "create".into(),
            "--size".into(),
            size_mb,
            qualified(&self.config.pool, name),
        ])
        .await?;
        Ok(())
    }

    async fn clone(&self, parent_name: &str, parent_snap: &str, child_name: &str) -> Result<(), BlockError> {
        self.run_blocking(vec![
            "clone".into(),
            qualified_snap(&self.config.pool, parent_name, parent_snap),
            qualified(&self.config.pool, child_name),
        ])
        .await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), BlockError> {
        self.run_blocking(vec!["rm".into(), qualified(&self.config.pool, name)])
            .await?;
        Ok(())
    }

    async fn write(&self, _name: &str, _data: &[u8], _offset: u64) -> Result<(), BlockError> {
        Err(BlockError::FunctionUnsupported)
    }

    async fn read(&self, _name: &str, _length: usize, _offset: u64) -> Result<Vec<u8>, BlockError> {
        Err(BlockError::FunctionUnsupported)
    }

    async fn snap_create_unchecked(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        self.run_blocking(vec![
            "snap".into(),
            "create".into(),
            qualified_snap(&self.config.pool, name, snap),
        ])
        .await?;
        Ok(())
    }

    async fn snap_list(&self, name: &str) -> Result<Vec<String>, BlockError> {
        let out = self
            .run_blocking(vec!["snap".into(), "ls".into(), qualified(&self.config.pool, name)])
            .await?;
        Ok(parse_snap_names(&out))
    }

    async fn snap_remove(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        self.run_blocking(vec![
            "snap".into(),
            "rm".into(),
            qualified_snap(&self.config.pool, name, snap),
        ])
        .await?;
        Ok(())
    }

    async fn snap_protect(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        self.run_blocking(vec![
            "snap".into(),
            "protect".into(),
            qualified_snap(&self.config.pool, name, snap),
        ])
        .await?;
        Ok(())
    }

    async fn snap_unprotect(&self, name: &str, snap: &str) -> Result<(), BlockError> {
        self.run_blocking(vec![
            "snap".into(),
            "unprotect".into(),
            qualified_snap(&self.config.pool, name, snap),
        ])
        .await?;
        Ok(())
    }

    async fn flatten(&self, name: &str) -> Result<(), BlockError> {
        self.run_blocking(vec!["flatten".into(), qualified(&self.config.pool, name)])
            .await?;
        Ok(())
    }
}

pub struct RbdBlockStoreFactory {
    config: RbdConfig,
}

impl RbdBlockStoreFactory {
    pub fn new(config: RbdConfig) -> RbdBlockStoreFactory {
        RbdBlockStoreFactory { config }
    }
}

#[async_trait]
impl BlockStoreFactory for RbdBlockStoreFactory {
    async fn open(&self) -> Result<Box<dyn BlockStore>, BlockError> {
        Ok(Box::new(RbdBlockStore::new(self.config.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snap_names_skipping_header() {
        let stdout = b"SNAPID NAME SIZE PROTECTED TIMESTAMP\n4 sentinel 10GiB yes Mon Jan  1\n";
        assert_eq!(parse_snap_names(stdout), vec!["sentinel".to_string()]);
    }

    #[test]
    fn classifies_not_found_stderr() {
        let err = classify_stderr("rbd: error opening image foo: (2) No such file or directory", "x".into());
        assert!(matches!(err, BlockError::ImageNotFound(_)));
    }

    #[test]
    fn classifies_has_snapshots_stderr() {
        let err = classify_stderr("rbd: image has snapshots, use --force", "x".into());
        assert!(matches!(err, BlockError::ImageHasSnapshots(_)));
    }
}
