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

//! The storage-layer name of an image is a deterministic function of its
//! catalog id: `"img" + id`. Stable across renames because names mutate,
//! ids do not.

pub const STORAGE_NAME_PREFIX: &str = "img";

/// The well-known snapshot name every clone is sourced from.
pub const SENTINEL: &str = "sentinel";

pub fn storage_name(id: i64) -> String {
    format!("{STORAGE_NAME_PREFIX}{id}")
}

/// Inverse of [`storage_name`]: strips the prefix and parses the decimal id.
/// Returns `None` for anything that isn't `"img" + <non-negative integer>`.
pub fn parse_storage_name(name: &str) -> Option<i64> {
    let rest = name.strip_prefix(STORAGE_NAME_PREFIX)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bijection_over_a_range_of_ids() {
        for id in 0..10_000i64 {
            let name = storage_name(id);
            assert_eq!(parse_storage_name(&name), Some(id));
        }
    }

    #[test]
    fn rejects_non_storage_tokens() {
        assert_eq!(parse_storage_name("hadoopMaster.img"), None);
        assert_eq!(parse_storage_name("img"), None);
        assert_eq!(parse_storage_name("img12x"), None);
        assert_eq!(parse_storage_name("imga"), None);
    }
}
