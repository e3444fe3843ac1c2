//! IPFS node RPC client
//!
//! Wraps the IPFS HTTP API (`/api/v0/*`) exposed by a local or remote node.
//! All endpoints are POST per the RPC convention.

use futures::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::IpfsConfig;

use super::{BackendError, ContentBackend, NodeInfo};

/// IPFS HTTP RPC client
#[derive(Clone)]
pub struct IpfsClient {
    http: reqwest::Client,
    api_url: String,
    timeout_secs: u64,
}

impl IpfsClient {
    /// Create a new client from configuration
    pub async fn new(config: &IpfsConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let client = Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            timeout_secs: config.timeout_secs,
        };

        // Probe the node so a misconfigured endpoint shows up at startup
        match client.version().await {
            Ok(version) => {
                tracing::info!("Connected to IPFS node {} at {}", version, client.api_url);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not reach IPFS node at {}: {}. Will attempt operations anyway.",
                    client.api_url,
                    e
                );
            }
        }

        Ok(client)
    }

    /// Node version string
    pub async fn version(&self) -> Result<String, BackendError> {
        let response = self
            .http
            .post(format!("{}/api/v0/version", self.api_url))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "version returned {}",
                response.status()
            )));
        }

        let version: VersionResponse =
            response.json().await.map_err(|e| self.map_error(e))?;
        Ok(version.version)
    }

    async fn node_id(&self) -> Result<IdResponse, BackendError> {
        let response = self
            .http
            .post(format!("{}/api/v0/id", self.api_url))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "id returned {}",
                response.status()
            )));
        }

        response.json().await.map_err(|e| self.map_error(e))
    }

    async fn repo_stat(&self) -> Result<RepoStatResponse, BackendError> {
        let response = self
            .http
            .post(format!("{}/api/v0/repo/stat", self.api_url))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "repo/stat returned {}",
                response.status()
            )));
        }

        response.json().await.map_err(|e| self.map_error(e))
    }

    fn map_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout_secs)
        } else {
            BackendError::Unavailable(e.to_string())
        }
    }
}

#[async_trait::async_trait]
impl ContentBackend for IpfsClient {
    async fn add_object(
        &self,
        data: Vec<u8>,
        size_hint: u64,
        mime_type: &str,
    ) -> Result<String, BackendError> {
        let part = reqwest::multipart::Part::bytes(data)
            .file_name("blob")
            .mime_str(mime_type)
            .map_err(|e| BackendError::Unavailable(format!("invalid mime type: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/api/v0/add", self.api_url))
            .query(&[("cid-version", "1")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "add returned {}",
                response.status()
            )));
        }

        let added: AddResponse = response.json().await.map_err(|e| self.map_error(e))?;

        tracing::debug!(cid = %added.hash, size = size_hint, "Object added to IPFS");

        Ok(added.hash)
    }

    async fn resolve(&self, cid: &str) -> Result<Vec<u8>, BackendError> {
        let response = self
            .http
            .post(format!("{}/api/v0/cat", self.api_url))
            .query(&[("arg", cid)])
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(cid.to_string()));
        }
        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "cat returned {}",
                response.status()
            )));
        }

        let mut stream = response.bytes_stream();
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.map_error(e))?;
            data.extend_from_slice(&chunk);
        }

        Ok(data)
    }

    async fn node_info(&self) -> Result<NodeInfo, BackendError> {
        let (id, repo) = tokio::try_join!(self.node_id(), self.repo_stat())?;

        Ok(NodeInfo {
            peer_id: id.id,
            version: id.agent_version,
            addresses: id.addresses,
            repo_objects: repo.num_objects,
            repo_size: repo.repo_size,
        })
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Deserialize)]
struct VersionResponse {
    #[serde(rename = "Version")]
    version: String,
}

#[derive(Deserialize)]
struct IdResponse {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "AgentVersion", default)]
    agent_version: String,
    #[serde(rename = "Addresses", default)]
    addresses: Vec<String>,
}

#[derive(Deserialize)]
struct RepoStatResponse {
    #[serde(rename = "NumObjects")]
    num_objects: u64,
    #[serde(rename = "RepoSize")]
    repo_size: u64,
}
