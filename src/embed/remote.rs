//! Remote embedding client for the Gemini-style batch embedding API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

use super::{EmbeddingClient, TaskType};

/// Characters per text sent to the API. The model context is far larger,
/// but chunks are already capped well below this; the guard only matters
/// for pathological single-line content.
const MAX_EMBED_CHARS: usize = 10_000;

pub struct RemoteEmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    task_type: String,
}

#[derive(Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl RemoteEmbeddingClient {
    pub fn new(http: reqwest::Client, config: &EmbeddingConfig, api_key: String) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
        }
    }
}

#[async_trait]
impl EmbeddingClient for RemoteEmbeddingClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String], task: TaskType) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/v1beta/models/{}:batchEmbedContents",
            self.base_url, self.model
        );

        let req = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: format!("models/{}", self.model),
                    content: EmbedContent {
                        parts: vec![EmbedPart {
                            text: truncate_on_char_boundary(text, MAX_EMBED_CHARS).to_string(),
                        }],
                    },
                    task_type: task.as_str().to_string(),
                })
                .collect(),
        };

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => RagError::RateLimited { retry_after },
                401 | 403 => RagError::unauthorized(format!("embedding API: {body}")),
                s if s >= 500 => {
                    RagError::upstream(format!("embedding API returned {status}: {body}"))
                }
                _ => RagError::upstream(format!("embedding API returned {status}: {body}")),
            });
        }

        let body: BatchEmbedResponse = resp
            .json()
            .await
            .map_err(|e| RagError::upstream(format!("malformed embedding response: {e}")))?;

        Ok(body.embeddings.into_iter().map(|e| e.values).collect())
    }
}

fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
