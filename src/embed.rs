//! Embedding batcher.
//!
//! Sends texts to the remote embedding service in fixed-size batches,
//! restores the service's possibly out-of-order results to input order,
//! and retries rate-limited batches with the shared exponential backoff.
//! The HTTP transport sits behind [`EmbeddingClient`] so the batching and
//! ordering logic is testable without a network.
//!
//! Also provides the BLOB codecs used to persist vectors in SQLite:
//! [`vec_to_blob`] and [`blob_to_vec`] (little-endian f32 bytes).

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::config::EmbeddingConfig;

/// One embedding vector with the index the service reported for it.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexedEmbedding {
    pub index: usize,
    pub embedding: Vec<f32>,
}

/// Transport-level embedding failure.
#[derive(Debug)]
pub enum EmbedError {
    /// The service signalled a rate limit; the batch may be retried.
    RateLimited(String),
    Failed(String),
}

impl std::fmt::Display for EmbedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedError::RateLimited(m) => write!(f, "embedding rate limited: {}", m),
            EmbedError::Failed(m) => write!(f, "embedding failed: {}", m),
        }
    }
}

impl std::error::Error for EmbedError {}

/// A transport that can embed one batch of texts.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed_batch(
        &self,
        model: &str,
        texts: &[String],
    ) -> Result<Vec<IndexedEmbedding>, EmbedError>;
}

/// HTTP transport against an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<IndexedEmbedding>,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed_batch(
        &self,
        model: &str,
        texts: &[String],
    ) -> Result<Vec<IndexedEmbedding>, EmbedError> {
        let body = serde_json::json!({
            "model": model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Failed(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let text = response.text().await.unwrap_or_default();
            return Err(EmbedError::RateLimited(text));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EmbedError::Failed(format!(
                "embedding API error {}: {}",
                status, text
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Failed(format!("invalid embedding response: {}", e)))?;
        Ok(parsed.data)
    }
}

/// Truncate a text to the per-text character cap before submission.
fn truncate_for_embedding(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Embed `texts`, returning one vector per input in input order.
///
/// Batches are submitted sequentially. A rate-limited batch is retried
/// with exponential backoff (1s, 2s, 4s, ...) up to the configured
/// ceiling; any other failure propagates immediately. Each batch response
/// is sorted by its reported index before appending, so shuffled service
/// responses still map back to their inputs.
pub async fn get_embeddings(
    client: &dyn EmbeddingClient,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let prepared: Vec<String> = texts
        .iter()
        .map(|t| truncate_for_embedding(t, config.max_chars))
        .collect();

    let backoff = BackoffPolicy::new(Duration::from_secs(1));
    let mut results: Vec<Vec<f32>> = Vec::with_capacity(prepared.len());

    for batch in prepared.chunks(config.batch_size) {
        let mut attempt = 0u32;
        let mut data = loop {
            match client.embed_batch(&config.model, batch).await {
                Ok(data) => break data,
                Err(EmbedError::RateLimited(msg)) if attempt < config.max_retries => {
                    let delay = backoff.delay(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, reason = %msg, "embedding batch rate limited, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => bail!("{}", e),
            }
        };

        if data.len() != batch.len() {
            bail!(
                "embedding service returned {} vectors for a batch of {}",
                data.len(),
                batch.len()
            );
        }

        // The service may return batch entries out of order; its reported
        // index is authoritative.
        data.sort_by_key(|d| d.index);
        results.extend(data.into_iter().map(|d| d.embedding));
    }

    debug!(texts = texts.len(), "embedded all batches");
    Ok(results)
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns each batch's embeddings with indices reversed, simulating a
    /// service that reports results out of order.
    struct ShuffledClient;

    #[async_trait]
    impl EmbeddingClient for ShuffledClient {
        async fn embed_batch(
            &self,
            _model: &str,
            texts: &[String],
        ) -> Result<Vec<IndexedEmbedding>, EmbedError> {
            let mut out: Vec<IndexedEmbedding> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| IndexedEmbedding {
                    index: i,
                    embedding: vec![t.len() as f32],
                })
                .collect();
            out.reverse();
            Ok(out)
        }
    }

    /// Rate-limits the first `fail_count` calls, then succeeds.
    struct FlakyClient {
        calls: AtomicUsize,
        fail_count: usize,
    }

    #[async_trait]
    impl EmbeddingClient for FlakyClient {
        async fn embed_batch(
            &self,
            _model: &str,
            texts: &[String],
        ) -> Result<Vec<IndexedEmbedding>, EmbedError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_count {
                return Err(EmbedError::RateLimited("slow down".to_string()));
            }
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, _)| IndexedEmbedding {
                    index: i,
                    embedding: vec![1.0],
                })
                .collect())
        }
    }

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size: 2,
            max_retries: 3,
            max_chars: 20,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn order_restored_from_shuffled_response() {
        let texts = vec!["a".to_string(), "bb".to_string(), "ccc".to_string()];
        let vectors = get_embeddings(&ShuffledClient, &test_config(), &texts)
            .await
            .unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vec![1.0]);
        assert_eq!(vectors[1], vec![2.0]);
        assert_eq!(vectors[2], vec![3.0]);
    }

    #[tokio::test]
    async fn empty_input_is_empty_output() {
        let vectors = get_embeddings(&ShuffledClient, &test_config(), &[])
            .await
            .unwrap();
        assert!(vectors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retried_with_backoff() {
        let client = FlakyClient {
            calls: AtomicUsize::new(0),
            fail_count: 2,
        };
        let texts = vec!["one".to_string()];
        let vectors = get_embeddings(&client, &test_config(), &texts).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_ceiling_propagates_failure() {
        let client = FlakyClient {
            calls: AtomicUsize::new(0),
            fail_count: usize::MAX,
        };
        let texts = vec!["one".to_string()];
        let err = get_embeddings(&client, &test_config(), &texts)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
        // max_retries backoffs plus the final failing attempt.
        assert_eq!(client.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn texts_truncated_before_submission() {
        struct CaptureClient;

        #[async_trait]
        impl EmbeddingClient for CaptureClient {
            async fn embed_batch(
                &self,
                _model: &str,
                texts: &[String],
            ) -> Result<Vec<IndexedEmbedding>, EmbedError> {
                assert!(texts.iter().all(|t| t.chars().count() <= 20));
                Ok(texts
                    .iter()
                    .enumerate()
                    .map(|(i, _)| IndexedEmbedding {
                        index: i,
                        embedding: vec![0.0],
                    })
                    .collect())
            }
        }

        let texts = vec!["x".repeat(500)];
        let vectors = get_embeddings(&CaptureClient, &test_config(), &texts)
            .await
            .unwrap();
        assert_eq!(vectors.len(), 1);
    }

    #[test]
    fn blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }
}
