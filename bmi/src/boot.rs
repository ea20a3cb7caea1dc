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

//! Per-MAC PXE and per-node iPXE boot file generation. Two template-driven
//! writes, both atomic (temp file + rename) so a partial write never leaves
//! a corrupt boot entry.

use crate::error::BootError;
use crate::fabric::MacAddress;
use std::path::{Path, PathBuf};

const IPXE_TEMPLATE: &str = include_str!("templates/ipxe.temp");
const MAC_TEMPLATE: &str = include_str!("templates/mac.temp");

const IPXE_TARGET_PLACEHOLDER: &str = "{{IPXE_TARGET_NAME}}";
const MAC_IMG_PLACEHOLDER: &str = "{{MAC_IMG_NAME}}";
const MAC_IPXE_PLACEHOLDER: &str = "{{MAC_IPXE_NAME}}";

pub struct BootArtifacts {
    ipxe_dir: PathBuf,
    pxelinux_dir: PathBuf,
}

impl BootArtifacts {
    pub fn new(ipxe_dir: impl Into<PathBuf>, pxelinux_dir: impl Into<PathBuf>) -> BootArtifacts {
        BootArtifacts {
            ipxe_dir: ipxe_dir.into(),
            pxelinux_dir: pxelinux_dir.into(),
        }
    }

    /// Writes `<ipxeDir>/<nodeName>.ipxe` at mode 0755, returning its
    /// filename (not the full path) for use in the MAC file.
    pub fn write_ipxe(&self, node_name: &str, lun_target: &str) -> Result<String, BootError> {
        let contents = IPXE_TEMPLATE.replace(IPXE_TARGET_PLACEHOLDER, lun_target);
        let path = self.ipxe_path(node_name);
        write_atomic(&path, contents.as_bytes(), 0o755)?;
        Ok(format!("{node_name}.ipxe"))
    }

    /// The path `write_ipxe` writes to, exposed so callers that need to
    /// clean up a partially-provisioned node can find the file again.
    pub fn ipxe_path(&self, node_name: &str) -> PathBuf {
        self.ipxe_dir.join(format!("{node_name}.ipxe"))
    }

    /// Writes `<pxelinuxDir>/01-<mac-dashed-lowercase>` at mode 0644.
    pub fn write_mac_file(
        &self,
        storage_name: &str,
        ipxe_filename: &str,
        mac: &MacAddress,
    ) -> Result<PathBuf, BootError> {
        let contents = MAC_TEMPLATE
            .replace(MAC_IMG_PLACEHOLDER, storage_name)
            .replace(MAC_IPXE_PLACEHOLDER, ipxe_filename);
        let path = self.pxelinux_dir.join(mac.dashed_lowercase());
        write_atomic(&path, contents.as_bytes(), 0o644)?;
        Ok(path)
    }
}

#[cfg(unix)]
fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), BootError> {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let tmp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp_path).map_err(BootError::IoError)?;
    file.write_all(contents).map_err(BootError::IoError)?;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
        .map_err(BootError::IoError)?;
    drop(file);
    std::fs::rename(&tmp_path, path).map_err(BootError::IoError)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_atomic(path: &Path, contents: &[u8], _mode: u32) -> Result<(), BootError> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents).map_err(BootError::IoError)?;
    std::fs::rename(&tmp_path, path).map_err(BootError::IoError)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_ipxe_with_target_substituted() {
        let dir = std::env::temp_dir().join(format!("bmi-boot-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let artifacts = BootArtifacts::new(dir.clone(), dir.clone());
        let filename = artifacts.write_ipxe("cisco-27", "iqn.2023-01.org.bmi:img42").unwrap();
        assert_eq!(filename, "cisco-27.ipxe");
        let written = std::fs::read_to_string(dir.join(&filename)).unwrap();
        assert!(written.contains("iqn.2023-01.org.bmi:img42"));
        assert!(!written.contains(IPXE_TARGET_PLACEHOLDER));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn mac_file_name_is_dashed_and_lowercased() {
        let dir = std::env::temp_dir().join(format!("bmi-boot-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let artifacts = BootArtifacts::new(dir.clone(), dir.clone());
        let mac = MacAddress("DE:AD:BE:EF:00:01".to_string());
        let path = artifacts.write_mac_file("img42", "cisco-27.ipxe", &mac).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "01-de-ad-be-ef-00-01");
        std::fs::remove_dir_all(&dir).ok();
    }
}
