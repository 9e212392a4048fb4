//! Hugging Face `tokenizers` backend.
//!
//! Tokenizer definitions are read from a local `tokenizer.json` or fetched
//! once from the Hugging Face hub into a cache directory.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tokenizers::utils::truncation::TruncationDirection;
use tokenizers::{PostProcessor, Tokenizer};
use tracing::{debug, info};

use super::{TextTokenizer, truncate_tokens};
use crate::error::{PipelineError, Result};

const HUB_BASE_URL: &str = "https://huggingface.co";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Tokenizer loaded from a `tokenizer.json` definition.
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = Tokenizer::from_file(path).map_err(|e| {
            PipelineError::model_load(format!(
                "Failed to load tokenizer {}: {}",
                path.display(),
                e
            ))
        })?;
        debug!(path = %path.display(), "Tokenizer loaded");
        Ok(Self { inner })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let inner = Tokenizer::from_str(json)
            .map_err(|e| PipelineError::model_load(format!("Invalid tokenizer definition: {}", e)))?;
        Ok(Self { inner })
    }

    /// Load the tokenizer of a hub model, downloading it on first use.
    pub async fn from_pretrained(model_id: &str, cache_dir: &Path) -> Result<Self> {
        let path = cached_tokenizer_path(cache_dir, model_id);
        if !path.exists() {
            download_tokenizer(HUB_BASE_URL, model_id, &path).await?;
        }
        Self::from_file(&path)
    }
}

impl TextTokenizer for HfTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| PipelineError::decode(format!("Tokenize: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Truncates the content tokens, then lets the post-processor append
    /// its special tokens so a trailing `</s>` survives.
    fn tokenize_truncated(&self, text: &str, max_length: usize) -> Result<Vec<u32>> {
        let mut encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| PipelineError::decode(format!("Tokenize: {}", e)))?;
        let reserved = self
            .inner
            .get_post_processor()
            .map_or(0, |processor| processor.added_tokens(false));

        encoding.truncate(max_length.saturating_sub(reserved), 0, TruncationDirection::Right);
        let encoding = self
            .inner
            .post_process(encoding, None, true)
            .map_err(|e| PipelineError::decode(format!("Tokenize: {}", e)))?;

        let mut ids = encoding.get_ids().to_vec();
        truncate_tokens(&mut ids, max_length);
        Ok(ids)
    }

    fn detokenize(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| PipelineError::decode(format!("Detokenize: {}", e)))
    }
}

fn cached_tokenizer_path(cache_dir: &Path, model_id: &str) -> PathBuf {
    cache_dir
        .join("models")
        .join(model_id.replace('/', "--"))
        .join(TOKENIZER_FILE)
}

async fn download_tokenizer(base_url: &str, model_id: &str, cache_path: &Path) -> Result<()> {
    let url = format!("{}/{}/resolve/main/{}", base_url, model_id, TOKENIZER_FILE);
    info!(%url, "Downloading tokenizer");

    let response = reqwest::get(&url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| PipelineError::model_load(format!("Download {}: {}", url, e)))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| PipelineError::model_load(format!("Read body of {}: {}", url, e)))?;

    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            PipelineError::model_load(format!("Create cache dir {}: {}", parent.display(), e))
        })?;
    }
    std::fs::write(cache_path, &bytes).map_err(|e| {
        PipelineError::model_load(format!("Write cache {}: {}", cache_path.display(), e))
    })
}
