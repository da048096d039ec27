//! Embedding provider capability.
//!
//! Providers turn batches of chunk text into fixed-dimension vectors. The
//! trait carries metadata; the actual embedding call is a free async
//! function dispatching on the configured provider name. Credentials come
//! from the process environment only — the config file never holds secrets.
//!
//! Retry strategy for API-backed providers: HTTP 429 and 5xx retry with
//! exponential backoff (1s, 2s, 4s, … capped at 2^5); other 4xx fail
//! immediately; network errors retry.

use std::time::Duration;

use anyhow::Result;

use crate::config::ConfigFile;
use crate::error::RagError;

/// Embedding settings resolved from `[embedding]` in the store config.
#[derive(Debug, Clone)]
pub struct EmbedConfig {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl EmbedConfig {
    pub fn from_store(config: &ConfigFile) -> Self {
        Self {
            provider: config.get("embedding.provider", "none"),
            model: config.get("embedding.model", "text-embedding-3-small"),
            dimensions: config.get_usize("embedding.dimensions", 1536),
            max_retries: 5,
            timeout_secs: 30,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider != "none"
    }
}

/// Metadata surface of an embedding backend.
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality.
    fn dimensions(&self) -> usize;
}

/// Sentinel provider for `embedding.provider = none`; any embed attempt
/// fails with `ProviderUnavailable` and callers degrade.
pub struct NoneProvider;

impl EmbeddingProvider for NoneProvider {
    fn model_name(&self) -> &str {
        "none"
    }
    fn dimensions(&self) -> usize {
        0
    }
}

pub struct OpenAiProvider {
    model: String,
    dimensions: usize,
}

impl OpenAiProvider {
    pub fn new(config: &EmbedConfig) -> Result<Self> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(
                RagError::ProviderUnavailable("OPENAI_API_KEY not set".to_string()).into(),
            );
        }
        Ok(Self {
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

pub struct OllamaProvider {
    model: String,
    dimensions: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbedConfig) -> Self {
        Self {
            model: config.model.clone(),
            dimensions: config.dimensions,
        }
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Instantiate the configured provider; unknown names are refused.
pub fn create_provider(config: &EmbedConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "none" => Ok(Box::new(NoneProvider)),
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config))),
        other => Err(RagError::ProviderUnavailable(format!(
            "unknown embedding provider '{}'",
            other
        ))
        .into()),
    }
}

/// Embed a batch of texts with the configured provider, in input order.
pub async fn embed_texts(config: &EmbedConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    match config.provider.as_str() {
        "openai" => embed_openai(config, texts).await,
        "ollama" => embed_ollama(config, texts).await,
        "none" => {
            Err(RagError::ProviderUnavailable("embedding provider is none".to_string()).into())
        }
        other => Err(RagError::ProviderUnavailable(format!(
            "unknown embedding provider '{}'",
            other
        ))
        .into()),
    }
}

/// Embed a single query text.
pub async fn embed_query(config: &EmbedConfig, text: &str) -> Result<Vec<f32>> {
    let mut vectors = embed_texts(config, &[text.to_string()]).await?;
    if vectors.is_empty() {
        return Err(RagError::ProviderFailure("empty embedding response".to_string()).into());
    }
    Ok(vectors.remove(0))
}

async fn embed_openai(config: &EmbedConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| RagError::ProviderUnavailable("OPENAI_API_KEY not set".to_string()))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| RagError::ProviderFailure(e.to_string()))?;

    let body = serde_json::json!({
        "model": config.model,
        "input": texts,
    });

    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: serde_json::Value = response
                        .json()
                        .await
                        .map_err(|e| RagError::ProviderFailure(e.to_string()))?;
                    return parse_openai_embeddings(&json);
                }
                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(
                        RagError::ProviderFailure(format!("openai {}: {}", status, body_text))
                            .into(),
                    );
                    continue;
                }
                return Err(RagError::ProviderFailure(format!(
                    "openai {}: {}",
                    status, body_text
                ))
                .into());
            }
            Err(e) => {
                last_err = Some(RagError::ProviderFailure(e.to_string()).into());
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| RagError::ProviderFailure("embedding retries exhausted".into()).into()))
}

fn parse_openai_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::ProviderFailure("missing data array in response".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::ProviderFailure("missing embedding in response".into()))?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(embeddings)
}

async fn embed_ollama(config: &EmbedConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let url = std::env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| RagError::ProviderFailure(e.to_string()))?;

    let body = serde_json::json!({
        "model": config.model,
        "input": texts,
    });

    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/api/embed", url))
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: serde_json::Value = response
                        .json()
                        .await
                        .map_err(|e| RagError::ProviderFailure(e.to_string()))?;
                    return parse_ollama_embeddings(&json);
                }
                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(
                        RagError::ProviderFailure(format!("ollama {}: {}", status, body_text))
                            .into(),
                    );
                    continue;
                }
                return Err(RagError::ProviderFailure(format!(
                    "ollama {}: {}",
                    status, body_text
                ))
                .into());
            }
            Err(e) => {
                last_err = Some(
                    RagError::ProviderFailure(format!(
                        "ollama connection error (is it running at {}?): {}",
                        url, e
                    ))
                    .into(),
                );
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| RagError::ProviderFailure("embedding retries exhausted".into()).into()))
}

fn parse_ollama_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| RagError::ProviderFailure("missing embeddings array".to_string()))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vector: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| RagError::ProviderFailure("embedding is not an array".to_string()))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vector);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_provider_metadata() {
        let p = NoneProvider;
        assert_eq!(p.model_name(), "none");
        assert_eq!(p.dimensions(), 0);
    }

    #[test]
    fn test_factory_refuses_unknown() {
        let config = EmbedConfig {
            provider: "mystery".to_string(),
            model: "m".to_string(),
            dimensions: 4,
            max_retries: 0,
            timeout_secs: 1,
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_factory_none() {
        let config = EmbedConfig {
            provider: "none".to_string(),
            model: String::new(),
            dimensions: 0,
            max_retries: 0,
            timeout_secs: 1,
        };
        let p = create_provider(&config).unwrap();
        assert_eq!(p.model_name(), "none");
    }

    #[tokio::test]
    async fn test_embed_none_is_unavailable() {
        let config = EmbedConfig {
            provider: "none".to_string(),
            model: String::new(),
            dimensions: 0,
            max_retries: 0,
            timeout_secs: 1,
        };
        let err = embed_texts(&config, &["x".to_string()]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::ProviderUnavailable(_))
        ));
    }

    #[test]
    fn test_parse_openai_shape() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2] },
                { "embedding": [0.3, 0.4] }
            ]
        });
        let vectors = parse_openai_embeddings(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1].len(), 2);
    }

    #[test]
    fn test_parse_ollama_shape() {
        let json = serde_json::json!({ "embeddings": [[1.0, 0.0], [0.0, 1.0]] });
        let vectors = parse_ollama_embeddings(&json).unwrap();
        assert_eq!(vectors.len(), 2);
    }
}
