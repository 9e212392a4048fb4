use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Generative model settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Pretrained model identifier
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Local tokenizer.json; downloaded from the hub when absent
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
    /// Base URL of the model runtime serving `/decode`
    #[serde(default = "default_decoder_endpoint")]
    pub decoder_endpoint: String,
    /// Directory used to cache downloaded tokenizer files
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_model_id() -> String {
    "google/flan-t5-base".to_string()
}

fn default_decoder_endpoint() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_cache_dir() -> PathBuf {
    let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(base).join(".cache").join("grounded-qa")
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            tokenizer_path: None,
            decoder_endpoint: default_decoder_endpoint(),
            cache_dir: default_cache_dir(),
        }
    }
}

/// Decoding policy. Fixed per deployment, never overridden per request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DecodingConfig {
    /// Number of beams kept during beam search
    #[serde(default = "default_num_beams")]
    pub num_beams: usize,
    /// Exponent applied to hypothesis length; values above 1.0 favor longer answers
    #[serde(default = "default_length_penalty")]
    pub length_penalty: f32,
    /// Stop as soon as `num_beams` hypotheses are finished
    #[serde(default = "default_early_stopping")]
    pub early_stopping: bool,
    /// Maximum decoder length in tokens
    #[serde(default = "default_max_output_length")]
    pub max_output_length: usize,
    /// Prompts are truncated to this many tokens, dropping the tail
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,
}

fn default_num_beams() -> usize {
    4
}

fn default_length_penalty() -> f32 {
    2.0
}

fn default_early_stopping() -> bool {
    true
}

fn default_max_output_length() -> usize {
    128
}

fn default_max_input_length() -> usize {
    512
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            num_beams: default_num_beams(),
            length_penalty: default_length_penalty(),
            early_stopping: default_early_stopping(),
            max_output_length: default_max_output_length(),
            max_input_length: default_max_input_length(),
        }
    }
}

/// Retrieval settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Number of passages retrieved per question
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Directory of .txt/.md documents indexed in memory
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Base URL of a remote retriever serving `/query`
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Maximum characters per indexed chunk
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

fn default_top_k() -> usize {
    3
}

fn default_max_chunk_chars() -> usize {
    1000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            data_dir: None,
            endpoint: None,
            max_chunk_chars: default_max_chunk_chars(),
        }
    }
}

/// Query log settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Directory holding the daily JSONL files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
        }
    }
}

/// Test suite settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluationConfig {
    /// JSON array of test cases
    #[serde(default = "default_test_cases")]
    pub test_cases: PathBuf,
    /// Optional local path to store suite results as JSON
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    /// Maximum length difference (characters) between two generations
    #[serde(default = "default_length_tolerance")]
    pub length_tolerance: usize,
}

fn default_test_cases() -> PathBuf {
    PathBuf::from("tests/test_inputs.json")
}

fn default_length_tolerance() -> usize {
    50
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            test_cases: default_test_cases(),
            storage_path: None,
            length_tolerance: default_length_tolerance(),
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub decoding: DecodingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }
}
