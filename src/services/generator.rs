use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use url::Url;

use crate::core::config::Config;
use crate::core::state::{Character, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    PageIllustration,
    CharacterThumbnail,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRequest {
    pub item_id: String,
    pub kind: ArtifactKind,
    pub prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reference_urls: Vec<String>,
}

impl ArtifactRequest {
    pub fn for_page(page: &Page) -> Self {
        ArtifactRequest {
            item_id: page.id.clone(),
            kind: ArtifactKind::PageIllustration,
            prompt: page.prompt.clone(),
            reference_urls: vec![],
        }
    }

    pub fn for_character(character: &Character) -> Self {
        let prompt = if character.description.es.trim().is_empty() {
            character.description.en.clone()
        } else {
            character.description.es.clone()
        };
        ArtifactRequest {
            item_id: character.id.clone(),
            kind: ArtifactKind::CharacterThumbnail,
            prompt: format!("{}: {}", character.name, prompt),
            reference_urls: character.reference_urls.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedArtifact {
    #[serde(alias = "image_url", alias = "imageUrl")]
    pub url: String,
}

/// Backend that renders one illustration per request. Implementations are
/// fanned out over by the bulk generator, so they must tolerate concurrent
/// calls up to `max_concurrency`.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync + Debug {
    async fn generate(&self, request: &ArtifactRequest) -> Result<GeneratedArtifact>;

    fn max_concurrency(&self) -> usize {
        5
    }
}

pub fn create_artifact_generator(config: &Config) -> Result<Arc<dyn ArtifactGenerator>> {
    match config.generator.provider.as_str() {
        "http" => Ok(Arc::new(HttpArtifactGenerator::new(
            &config.generator.base_url,
            config.generator.api_key.clone(),
            config.generator.max_concurrency,
        )?)),
        other => Err(anyhow!("Unknown artifact generator provider: {}", other)),
    }
}

pub struct HttpArtifactGenerator {
    base_url: String,
    api_key: Option<String>,
    max_concurrency: usize,
    client: reqwest::Client,
}

impl Debug for HttpArtifactGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpArtifactGenerator")
            .field("base_url", &self.base_url)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl HttpArtifactGenerator {
    pub fn new(base_url: &str, api_key: Option<String>, max_concurrency: usize) -> Result<Self> {
        Url::parse(base_url)
            .with_context(|| format!("Invalid artifact generator url: {base_url}"))?;
        Ok(HttpArtifactGenerator {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_concurrency: max_concurrency.max(1),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl ArtifactGenerator for HttpArtifactGenerator {
    async fn generate(&self, request: &ArtifactRequest) -> Result<GeneratedArtifact> {
        let url = format!("{}/generate", self.base_url);
        let mut req = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.context("Artifact generator request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!(
                "Artifact generator error {}: {}",
                status,
                error_text
            ));
        }

        let artifact: GeneratedArtifact = resp
            .json()
            .await
            .context("Failed to parse generated artifact")?;
        Ok(artifact)
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}
