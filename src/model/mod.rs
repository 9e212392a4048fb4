//! Generative model capability and the handle that owns it.
//!
//! A model is split into a [`TextTokenizer`] (prompt text to token ids and
//! back) and a [`Decoder`] (input ids to output ids under a
//! [`DecodingConfig`]). [`ModelHandle`] binds the two, is loaded once, and is
//! shared by reference between generator calls.

pub mod beam;
pub mod remote;
pub mod tokenizer;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{DecodingConfig, ModelConfig};
use crate::error::Result;

pub use beam::{BeamSearchDecoder, StepScorer};
pub use remote::HttpDecoder;
pub use tokenizer::HfTokenizer;

/// Converts between text and token ids.
pub trait TextTokenizer: Send + Sync {
    /// Encode text into token ids, including any special tokens the
    /// tokenizer appends.
    fn tokenize(&self, text: &str) -> Result<Vec<u32>>;

    /// Encode text into at most `max_length` token ids, keeping the head of
    /// the content. Special tokens the tokenizer appends should survive.
    fn tokenize_truncated(&self, text: &str, max_length: usize) -> Result<Vec<u32>> {
        let mut ids = self.tokenize(text)?;
        truncate_tokens(&mut ids, max_length);
        Ok(ids)
    }

    /// Decode token ids into text.
    fn detokenize(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String>;
}

/// Produces output token ids from input token ids.
#[async_trait]
pub trait Decoder: Send + Sync {
    async fn decode(&self, input_ids: &[u32], config: &DecodingConfig) -> Result<Vec<u32>>;
}

/// Truncate `ids` to at most `max_length` tokens, keeping the head.
///
/// Returns whether anything was dropped.
pub fn truncate_tokens(ids: &mut Vec<u32>, max_length: usize) -> bool {
    if ids.len() <= max_length {
        return false;
    }
    ids.truncate(max_length);
    true
}

/// A loaded generative model.
///
/// Decoding is not assumed to be reentrant: a handle runs at most one decode
/// at a time. Share the handle behind an `Arc` and load it once.
pub struct ModelHandle {
    model_id: String,
    tokenizer: Box<dyn TextTokenizer>,
    decoder: Box<dyn Decoder>,
    decode_lock: Mutex<()>,
}

impl ModelHandle {
    pub fn new(
        model_id: impl Into<String>,
        tokenizer: impl TextTokenizer + 'static,
        decoder: impl Decoder + 'static,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            tokenizer: Box::new(tokenizer),
            decoder: Box::new(decoder),
            decode_lock: Mutex::new(()),
        }
    }

    /// Load the tokenizer and connect the decoder described by `config`.
    ///
    /// Fails with `ModelLoad`; there is no retry since a bad model
    /// identifier will not become valid.
    pub async fn load(config: &ModelConfig) -> Result<Self> {
        info!(model = %config.model_id, "Loading model");

        let tokenizer = match &config.tokenizer_path {
            Some(path) => HfTokenizer::from_file(path)?,
            None => HfTokenizer::from_pretrained(&config.model_id, &config.cache_dir).await?,
        };
        let decoder = HttpDecoder::connect(&config.decoder_endpoint, &config.model_id).await?;

        Ok(Self::new(config.model_id.clone(), tokenizer, decoder))
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Tokenize `prompt`, truncating to `max_length` tokens from the tail.
    pub fn tokenize(&self, prompt: &str, max_length: usize) -> Result<Vec<u32>> {
        let ids = self.tokenizer.tokenize_truncated(prompt, max_length)?;
        if ids.len() == max_length {
            debug!(max_length, "Prompt at input limit, tail may be truncated");
        }
        Ok(ids)
    }

    pub async fn decode(&self, input_ids: &[u32], config: &DecodingConfig) -> Result<Vec<u32>> {
        let _guard = self.decode_lock.lock().await;
        self.decoder.decode(input_ids, config).await
    }

    /// Detokenize with special tokens stripped.
    pub fn detokenize(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer.detokenize(ids, true)
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        debug!(model = %self.model_id, "Releasing model handle");
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CharTokenizer;

    impl TextTokenizer for CharTokenizer {
        fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.chars().map(|c| c as u32).collect())
        }

        fn detokenize(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
            Ok(ids
                .iter()
                .filter(|&&id| !(skip_special_tokens && id < 32))
                .filter_map(|&id| char::from_u32(id))
                .collect())
        }
    }

    /// Echoes the input, tracking how many decodes overlap.
    #[derive(Default)]
    struct OverlapDecoder {
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Decoder for OverlapDecoder {
        async fn decode(&self, input_ids: &[u32], _config: &DecodingConfig) -> Result<Vec<u32>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(input_ids.to_vec())
        }
    }

    fn write_tokenizer(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("tokenizer.json");
        std::fs::write(
            &path,
            r#"{
                "version": "1.0",
                "truncation": null,
                "padding": null,
                "added_tokens": [],
                "normalizer": null,
                "pre_tokenizer": {"type": "Whitespace"},
                "post_processor": null,
                "decoder": null,
                "model": {"type": "WordLevel", "vocab": {"<unk>": 0, "khan": 1}, "unk_token": "<unk>"}
            }"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_truncate_tokens() {
        let mut ids: Vec<u32> = (0..10).collect();
        assert!(truncate_tokens(&mut ids, 4));
        assert_eq!(ids, vec![0, 1, 2, 3]);

        let mut short = vec![1, 2];
        assert!(!truncate_tokens(&mut short, 4));
        assert_eq!(short, vec![1, 2]);
    }

    #[test]
    fn test_tokenize_truncates_deterministically() {
        let handle = ModelHandle::new("char", CharTokenizer, OverlapDecoder::default());
        let prompt = "x".repeat(600);

        let first = handle.tokenize(&prompt, 512).unwrap();
        let second = handle.tokenize(&prompt, 512).unwrap();
        assert_eq!(first.len(), 512);
        assert_eq!(first, second);
    }

    #[test]
    fn test_detokenize_skips_special_tokens() {
        let handle = ModelHandle::new("char", CharTokenizer, OverlapDecoder::default());
        assert_eq!(handle.detokenize(&[0, 'o' as u32, 'k' as u32, 1]).unwrap(), "ok");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_decodes_are_serialized_per_handle() {
        let decoder = OverlapDecoder::default();
        let max_active = Arc::clone(&decoder.max_active);
        let handle = Arc::new(ModelHandle::new("char", CharTokenizer, decoder));

        let mut tasks = Vec::new();
        for i in 0..8u32 {
            let handle = Arc::clone(&handle);
            tasks.push(tokio::spawn(async move {
                handle.decode(&[i], &DecodingConfig::default()).await
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap().unwrap(), vec![i as u32]);
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_fails_on_missing_tokenizer() {
        let config = ModelConfig {
            tokenizer_path: Some("/nonexistent/tokenizer.json".into()),
            ..ModelConfig::default()
        };
        let err = ModelHandle::load(&config).await.unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_load_fails_when_decoder_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tokenizer(dir.path());

        let config = ModelConfig {
            tokenizer_path: Some(path),
            decoder_endpoint: "http://127.0.0.1:1".to_string(),
            ..ModelConfig::default()
        };
        let err = ModelHandle::load(&config).await.unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad(_)));
    }

    #[tokio::test]
    async fn test_load_connects_to_ready_decoder() {
        let mut server = mockito::Server::new_async().await;
        let health = server
            .mock("GET", "/health")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = write_tokenizer(dir.path());

        let config = ModelConfig {
            tokenizer_path: Some(path),
            decoder_endpoint: server.url(),
            ..ModelConfig::default()
        };
        let handle = ModelHandle::load(&config).await.unwrap();
        health.assert_async().await;
        assert_eq!(handle.tokenize("khan", 8).unwrap(), vec![1]);
    }
}
