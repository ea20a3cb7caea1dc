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

use anyhow::{bail, Context};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

fn default_catalog_db() -> PathBuf {
    PathBuf::from("/var/db/bmi/catalog.sqlite3")
}

fn default_block_tool_path() -> PathBuf {
    PathBuf::from("/usr/local/bin/rbd")
}

fn default_block_conffile() -> PathBuf {
    PathBuf::from("/etc/ceph/ceph.conf")
}

fn default_block_client_id() -> String {
    "bmi".to_string()
}

fn default_pool() -> String {
    "rbd".to_string()
}

fn default_iscsi_tool_path() -> PathBuf {
    PathBuf::from("/usr/local/libexec/bmi-iscsi-update")
}

fn default_iqn_prefix() -> String {
    "iqn.2023-01.org.bmi".to_string()
}

fn default_fabric_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_ipxe_dir() -> PathBuf {
    PathBuf::from("/var/bmi/ipxe")
}

fn default_pxelinux_dir() -> PathBuf {
    PathBuf::from("/var/bmi/pxelinux")
}

fn default_fabric_settle_secs() -> u64 {
    30
}

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct BmidConfigArg {
    /// Sqlite database tracking projects and images
    #[arg(long = "catalog-db")]
    pub catalog_db: Option<PathBuf>,

    /// Path to the rbd-compatible block-store tool
    #[arg(long = "block-tool-path")]
    pub block_tool_path: Option<PathBuf>,

    /// Cluster config file passed to the block-store tool
    #[arg(long = "block-conffile")]
    pub block_conffile: Option<PathBuf>,

    /// Client identity used to open block-store sessions
    #[arg(long = "block-client-id")]
    pub block_client_id: Option<String>,

    /// Pool holding provisioned images
    #[arg(long = "pool")]
    pub pool: Option<String>,

    /// Path to the iSCSI mapping update tool
    #[arg(long = "iscsi-tool-path")]
    pub iscsi_tool_path: Option<PathBuf>,

    /// Key ring passed through to the iSCSI update tool
    #[arg(long = "key-ring")]
    pub key_ring: Option<String>,

    /// Admin password passed through to the iSCSI update tool
    #[arg(long = "admin-password")]
    pub admin_password: Option<String>,

    /// IQN prefix used to build LUN target names
    #[arg(long = "iqn-prefix")]
    pub iqn_prefix: Option<String>,

    /// Base URL of the fabric (HaaS) controller
    #[arg(long = "fabric-base-url")]
    pub fabric_base_url: Option<String>,

    /// Directory iPXE scripts are written to
    #[arg(long = "ipxe-dir")]
    pub ipxe_dir: Option<PathBuf>,

    /// Directory per-MAC PXELINUX files are written to
    #[arg(long = "pxelinux-dir")]
    pub pxelinux_dir: Option<PathBuf>,

    /// Seconds to wait before a compensating fabric detach
    #[arg(long = "fabric-settle-secs")]
    pub fabric_settle_secs: Option<u64>,

    /// warn instead of bail during configuration sanity check
    #[arg(long = "warn-only", action)]
    pub warn_only: Option<bool>,

    #[arg(default_value = "/usr/local/etc/bmid.conf")]
    pub config_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BmidConfig {
    #[serde(default = "default_catalog_db")]
    pub catalog_db: PathBuf,

    #[serde(default = "default_block_tool_path")]
    pub block_tool_path: PathBuf,

    #[serde(default = "default_block_conffile")]
    pub block_conffile: PathBuf,

    #[serde(default = "default_block_client_id")]
    pub block_client_id: String,

    #[serde(default = "default_pool")]
    pub pool: String,

    #[serde(default = "default_iscsi_tool_path")]
    pub iscsi_tool_path: PathBuf,

    #[serde(default)]
    pub key_ring: String,

    #[serde(default)]
    pub admin_password: String,

    #[serde(default = "default_iqn_prefix")]
    pub iqn_prefix: String,

    #[serde(default = "default_fabric_base_url")]
    pub fabric_base_url: String,

    #[serde(default = "default_ipxe_dir")]
    pub ipxe_dir: PathBuf,

    #[serde(default = "default_pxelinux_dir")]
    pub pxelinux_dir: PathBuf,

    #[serde(default = "default_fabric_settle_secs")]
    pub fabric_settle_secs: u64,

    #[serde(default)]
    pub warn_only: bool,
}

impl BmidConfig {
    pub fn prepare(&self) -> anyhow::Result<()> {
        macro_rules! wb {
            ($($t:tt)*) => {
                if self.warn_only {
                    warn!($($t)*);
                } else {
                    bail!($($t)*);
                }
            }
        }

        macro_rules! mkdir {
            ($e:expr) => {
                if !$e.exists() {
                    std::fs::create_dir_all(&$e)
                        .with_context(|| format!("error creating {:?}", &$e))?;
                }
            };
        }

        if !self.block_conffile.exists() {
            wb!(
                "block store cluster config {:?} does not exist",
                &self.block_conffile
            );
        }

        if !self.block_tool_path.exists() {
            wb!(
                "block store tool {:?} does not exist",
                &self.block_tool_path
            );
        }

        if !self.iscsi_tool_path.exists() {
            wb!("iscsi update tool {:?} does not exist", &self.iscsi_tool_path);
        }

        mkdir!(self.ipxe_dir);
        mkdir!(self.pxelinux_dir);
        if let Some(parent) = self.catalog_db.parent() {
            mkdir!(parent.to_path_buf());
        }

        Ok(())
    }

    pub fn merge(&mut self, arg: BmidConfigArg) {
        macro_rules! x {
            ($field:ident) => {
                if let Some($field) = arg.$field {
                    self.$field = $field;
                }
            };
            ($($fields:ident,)*) => {
                $(
                    x!($fields);
                )*
            }
        }
        x!(
            catalog_db,
            block_tool_path,
            block_conffile,
            block_client_id,
            pool,
            iscsi_tool_path,
            key_ring,
            admin_password,
            iqn_prefix,
            fabric_base_url,
            ipxe_dir,
            pxelinux_dir,
            fabric_settle_secs,
            warn_only,
        );
    }
}
