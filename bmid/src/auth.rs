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

//! Decodes the `base64(user:pass)` credential carried at the request
//! boundary into a [`bmi::Credential`]. The project a request is scoped to
//! is a routing concern handled above this module; this module only turns
//! the auth token into username/password.

use bmi::credential::Credential;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("credential is not valid base64: {0}")]
    NotBase64(base64::DecodeError),
    #[error("decoded credential is not valid utf-8")]
    NotUtf8,
    #[error("credential is missing the ':' separator")]
    MissingSeparator,
}

/// Splits on the *first* colon only, matching the upstream behavior this
/// was distilled from: a password containing `:` is preserved verbatim,
/// it just can't itself contain the separator used to find it.
pub fn decode_credential(project: &str, token: &str) -> Result<Credential, AuthError> {
    let raw = base64::decode(token).map_err(AuthError::NotBase64)?;
    let text = String::from_utf8(raw).map_err(|_| AuthError::NotUtf8)?;
    let mut parts = text.splitn(2, ':');
    let username = parts.next().ok_or(AuthError::MissingSeparator)?;
    let password = parts.next().ok_or(AuthError::MissingSeparator)?;
    Ok(Credential {
        project: project.to_string(),
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(s: &str) -> String {
        base64::encode(s)
    }

    #[test]
    fn decodes_username_and_password() {
        let token = encode("alice:s3cret");
        let cred = decode_credential("bmi_infra", &token).unwrap();
        assert_eq!(cred.project, "bmi_infra");
        assert_eq!(cred.username, "alice");
        assert_eq!(cred.password, "s3cret");
    }

    #[test]
    fn password_containing_colon_is_preserved_whole() {
        let token = encode("alice:s3:cret");
        let cred = decode_credential("bmi_infra", &token).unwrap();
        assert_eq!(cred.username, "alice");
        assert_eq!(cred.password, "s3:cret");
    }

    #[test]
    fn rejects_missing_separator() {
        let token = encode("aliceonly");
        let err = decode_credential("bmi_infra", &token).unwrap_err();
        assert!(matches!(err, AuthError::MissingSeparator));
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = decode_credential("bmi_infra", "not valid base64!!").unwrap_err();
        assert!(matches!(err, AuthError::NotBase64(_)));
    }
}
