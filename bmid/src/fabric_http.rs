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

//! [`Fabric`] client against a HaaS-style REST controller: `POST
//! /node/<node>/nic/<nic>/connect`, `.../detach`, `GET /node/<node>`, `GET
//! /project/<project>`. Basic auth credentials are carried per request
//! (scoped by [`FabricFactory::open`]) rather than fixed at construction,
//! since each request authenticates as the project's own principal.

use async_trait::async_trait;
use bmi::credential::Credential;
use bmi::error::FabricError;
use bmi::fabric::{Fabric, FabricFactory, MacAddress};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct ConnectBody<'a> {
    network: &'a str,
    channel: &'a str,
}

#[derive(Serialize)]
struct DetachBody<'a> {
    network: &'a str,
}

#[derive(Deserialize)]
struct NicInfo {
    #[serde(rename = "macAddr")]
    mac_addr: String,
}

#[derive(Deserialize)]
struct NodeResponse {
    #[serde(default)]
    nics: Vec<NicInfo>,
}

#[derive(Deserialize)]
struct ProjectResponse {
    #[serde(default)]
    users: Vec<String>,
}

fn map_transport_error(err: reqwest::Error) -> FabricError {
    if err.is_timeout() || err.is_connect() {
        FabricError::Transient(err.to_string())
    } else {
        FabricError::Protocol(err.to_string())
    }
}

fn map_status(status: reqwest::StatusCode, body: String) -> FabricError {
    match status.as_u16() {
        404 => FabricError::NotFound(body),
        401 | 403 => FabricError::Unauthorized(body),
        503 | 502 | 504 => FabricError::Transient(body),
        _ => FabricError::Protocol(format!("{status}: {body}")),
    }
}

pub struct HttpFabricFactory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpFabricFactory {
    pub fn new(base_url: impl Into<String>) -> HttpFabricFactory {
        HttpFabricFactory {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl FabricFactory for HttpFabricFactory {
    async fn open(&self, cred: &Credential) -> Result<Box<dyn Fabric>, FabricError> {
        Ok(Box::new(HttpFabric {
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            username: cred.username.clone(),
            password: cred.password.clone(),
        }))
    }
}

struct HttpFabric {
    base_url: String,
    client: reqwest::Client,
    username: String,
    password: String,
}

impl HttpFabric {
    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.password))
    }
}

#[async_trait]
impl Fabric for HttpFabric {
    async fn attach_node_to_project_network(
        &self,
        node: &str,
        network: &str,
        channel: &str,
        nic: &str,
    ) -> Result<(), FabricError> {
        let url = format!("{}/node/{node}/nic/{nic}/connect", self.base_url);
        let req = self
            .authed(self.client.post(&url))
            .json(&ConnectBody { network, channel });
        let resp = req.send().await.map_err(map_transport_error)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(map_status(status, body))
        }
    }

    async fn detach_node_from_project_network(
        &self,
        node: &str,
        network: &str,
        nic: &str,
    ) -> Result<(), FabricError> {
        let url = format!("{}/node/{node}/nic/{nic}/detach", self.base_url);
        let req = self.authed(self.client.post(&url)).json(&DetachBody { network });
        let resp = req.send().await.map_err(map_transport_error)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(map_status(status, body))
        }
    }

    async fn node_mac(&self, node: &str) -> Result<MacAddress, FabricError> {
        let url = format!("{}/node/{node}", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(map_transport_error)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }
        let parsed: NodeResponse = resp
            .json()
            .await
            .map_err(|e| FabricError::Protocol(e.to_string()))?;
        parsed
            .nics
            .into_iter()
            .next()
            .map(|nic| MacAddress(nic.mac_addr))
            .ok_or_else(|| FabricError::Protocol(format!("node {node} has no NICs")))
    }

    async fn validate_project(&self, name: &str) -> Result<(), FabricError> {
        let url = format!("{}/project/{name}", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(map_transport_error)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }
        let parsed: ProjectResponse = resp
            .json()
            .await
            .map_err(|e| FabricError::Protocol(e.to_string()))?;
        if parsed.users.iter().any(|u| u == &self.username) {
            Ok(())
        } else {
            Err(FabricError::Unauthorized(name.to_string()))
        }
    }
}
