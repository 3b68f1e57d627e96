use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use url::Url;

use crate::core::config::Config;
use crate::core::state::DraftPatch;

/// Remote store holding the canonical draft record.
#[async_trait]
pub trait DraftStore: Send + Sync + Debug {
    /// Applies a partial update to the record. Fields absent from the patch
    /// are left untouched on the remote, an explicit null clears the field.
    async fn update_record(&self, draft_id: &str, patch: &DraftPatch) -> Result<()>;

    /// Reads the record's current lifecycle status.
    async fn read_status(&self, draft_id: &str) -> Result<String>;
}

pub fn create_draft_store(config: &Config) -> Result<Arc<dyn DraftStore>> {
    match config.remote.provider.as_str() {
        "http" => Ok(Arc::new(HttpDraftStore::new(
            &config.remote.base_url,
            config.remote.api_key.clone(),
        )?)),
        other => Err(anyhow!("Unknown draft store provider: {}", other)),
    }
}

pub struct HttpDraftStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl Debug for HttpDraftStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDraftStore")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpDraftStore {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("Invalid draft store url: {base_url}"))?;
        Ok(HttpDraftStore {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        })
    }
}

#[derive(Deserialize, Debug)]
struct StatusResponse {
    status: String,
}

#[async_trait]
impl DraftStore for HttpDraftStore {
    async fn update_record(&self, draft_id: &str, patch: &DraftPatch) -> Result<()> {
        let url = format!("{}/drafts/{}", self.base_url, draft_id);
        let mut request = self.client.patch(&url).json(patch);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await.context("Draft store request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("Draft store error {}: {}", status, error_text));
        }
        Ok(())
    }

    async fn read_status(&self, draft_id: &str) -> Result<String> {
        let url = format!("{}/drafts/{}/status", self.base_url, draft_id);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await.context("Draft store request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("Draft store error {}: {}", status, error_text));
        }

        let parsed: StatusResponse = resp
            .json()
            .await
            .context("Failed to parse status response")?;
        Ok(parsed.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_response_parses() {
        let parsed: StatusResponse = serde_json::from_str("{\"status\":\"completed\"}").unwrap();
        assert_eq!(parsed.status, "completed");
        let with_extras: StatusResponse =
            serde_json::from_str("{\"status\":\"draft\",\"updatedAt\":123}").unwrap();
        assert_eq!(with_extras.status, "draft");
    }

    #[test]
    fn new_rejects_malformed_urls() {
        assert!(HttpDraftStore::new("not a url", None).is_err());
        let store = HttpDraftStore::new("http://localhost:3000/api/", None).unwrap();
        assert_eq!(store.base_url, "http://localhost:3000/api");
    }

    #[test]
    fn factory_rejects_unknown_providers() {
        let mut config = Config::default();
        config.remote.provider = "carrier-pigeon".to_string();
        let err = create_draft_store(&config).unwrap_err();
        assert!(err.to_string().contains("Unknown draft store provider"));
    }

    #[test]
    fn factory_builds_http_store() {
        let config = Config::default();
        assert!(create_draft_store(&config).is_ok());
    }
}
