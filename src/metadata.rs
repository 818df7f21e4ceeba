use anyhow::{Context, Result};
use reqwest::{StatusCode, header};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata request to {url} failed")]
    Transport { url: String },
    #[error("metadata request to {url} returned {status}")]
    Status { status: StatusCode, url: String },
    #[error("metadata response from {url} is not valid json")]
    Decode { url: String },
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(default)]
    data: Vec<WallItem>,
}

#[derive(Debug, Deserialize)]
struct WallItem {
    #[serde(default)]
    picture: Option<String>,
}

/// Client for the items endpoint listing the wall's pictures.
#[derive(Clone)]
pub struct MetadataClient {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl MetadataClient {
    pub fn new(url: String, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wall-renderer/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build metadata http client")?;
        Ok(Self { client, url, token })
    }

    /// Picture identifiers in the order the API lists them, one per item.
    /// Items without a picture yield an empty identifier so they still take a
    /// grid cell.
    pub async fn picture_ids(&self) -> Result<Vec<String>> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = self.token.as_deref() {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = request.send().await.map_err(|err| {
            anyhow::Error::new(err).context(MetadataError::Transport {
                url: self.url.clone(),
            })
        })?;
        if response.status() != StatusCode::OK {
            return Err(MetadataError::Status {
                status: response.status(),
                url: self.url.clone(),
            }
            .into());
        }
        let body = response.bytes().await.map_err(|err| {
            anyhow::Error::new(err).context(MetadataError::Transport {
                url: self.url.clone(),
            })
        })?;
        let ids = parse_picture_ids(&body).map_err(|err| {
            err.context(MetadataError::Decode {
                url: self.url.clone(),
            })
        })?;
        debug!(url = %self.url, count = ids.len(), "fetched wall metadata");
        Ok(ids)
    }
}

fn parse_picture_ids(body: &[u8]) -> Result<Vec<String>> {
    let parsed: ItemsResponse = serde_json::from_slice(body).context("parse items response")?;
    Ok(parsed
        .data
        .into_iter()
        .map(|item| item.picture.unwrap_or_default())
        .collect())
}
