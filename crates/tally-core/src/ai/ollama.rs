//! Ollama backend implementation
//!
//! HTTP client for the Ollama API. Generation goes through `/api/generate`
//! with the configured model; embeddings go through `/api/embeddings` with a
//! dedicated embedding model (generation models produce poor vectors).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::AIBackend;

/// Ollama backend
///
/// # Configuration
///
/// Environment variables:
/// - `OLLAMA_HOST`: Server URL (required)
/// - `OLLAMA_MODEL`: Generation model (default: llama3.2)
/// - `OLLAMA_EMBEDDING_MODEL`: Embedding model (default: nomic-embed-text)
#[derive(Clone)]
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            embedding_model: "nomic-embed-text".to_string(),
        }
    }

    /// Create a new instance with a different generation model
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            http_client: self.http_client.clone(),
            base_url: self.base_url.clone(),
            model: model.to_string(),
            embedding_model: self.embedding_model.clone(),
        }
    }

    /// Set the embedding model
    pub fn with_embedding_model(mut self, embedding_model: &str) -> Self {
        self.embedding_model = embedding_model.to_string();
        self
    }

    /// Create from environment variables
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
        let embedding_model = std::env::var("OLLAMA_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "nomic-embed-text".to_string());
        Some(Self::new(&host, &model).with_embedding_model(&embedding_model))
    }

    /// Embedding model name
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }
}

/// Request to Ollama generate API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

/// Response from Ollama generate API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Request to Ollama embeddings API
#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

/// Response from Ollama embeddings API
#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl AIBackend for OllamaBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Http(response.error_for_status().unwrap_err()));
        }

        let ollama_response: OllamaResponse = response.json().await?;
        debug!(
            model = %self.model,
            chars = ollama_response.response.len(),
            "Ollama generation complete"
        );

        Ok(ollama_response.response)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: self.embedding_model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .http_client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Http(response.error_for_status().unwrap_err()));
        }

        let embedding_response: OllamaEmbeddingResponse = response.json().await?;
        if embedding_response.embedding.is_empty() {
            return Err(Error::InvalidData(
                "Ollama returned an empty embedding".into(),
            ));
        }

        Ok(embedding_response.embedding)
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
