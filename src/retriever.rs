//! Retrieval capability and the retrievers shipped with the crate.
//!
//! Anything implementing [`Retriever`] can back a generator: the in-memory
//! term-overlap index, a remote retrieval service, or a test double.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::RetrievalConfig;
use crate::error::{PipelineError, Result};
use crate::models::Passage;

/// Returns passages for a query, most relevant first.
///
/// The returned order is final: callers must not re-sort it.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Passage>>;
}

/// Join passage texts with newlines, preserving their order.
pub fn join_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the retriever described by `config`, if any.
///
/// A remote endpoint takes precedence over a local data directory.
pub fn from_config(config: &RetrievalConfig) -> Result<Option<Arc<dyn Retriever>>> {
    if let Some(endpoint) = &config.endpoint {
        return Ok(Some(Arc::new(HttpRetriever::new(endpoint)?)));
    }
    match &config.data_dir {
        Some(dir) => {
            let retriever = InMemoryRetriever::new(config.max_chunk_chars);
            let added = retriever.add_directory(dir)?;
            info!(dir = %dir.display(), chunks = added, "Indexed documents");
            Ok(Some(Arc::new(retriever)))
        }
        None => Ok(None),
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Split text on blank lines, packing paragraphs into chunks of at most
/// `max_chars` characters. Oversized paragraphs become their own chunk.
fn chunk_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let would_be = if current.is_empty() {
            paragraph.chars().count()
        } else {
            current.chars().count() + 2 + paragraph.chars().count()
        };
        if would_be > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

struct IndexedChunk {
    id: String,
    text: String,
    terms: HashSet<String>,
}

/// Brute-force term overlap index held in memory.
///
/// A chunk's score is the fraction of distinct query terms it contains.
/// Chunks sharing no term with the query are not returned; ties keep
/// insertion order.
pub struct InMemoryRetriever {
    max_chunk_chars: usize,
    chunks: RwLock<Vec<IndexedChunk>>,
}

impl InMemoryRetriever {
    pub fn new(max_chunk_chars: usize) -> Self {
        Self {
            max_chunk_chars: max_chunk_chars.max(1),
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// Index a document, returning the number of chunks added.
    pub fn add_document(&self, document_id: &str, text: &str) -> usize {
        let new_chunks: Vec<IndexedChunk> = chunk_paragraphs(text, self.max_chunk_chars)
            .into_iter()
            .enumerate()
            .map(|(index, text)| IndexedChunk {
                id: format!("{}#{}", document_id, index),
                terms: terms(&text),
                text,
            })
            .collect();
        let added = new_chunks.len();

        let mut chunks = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        chunks.extend(new_chunks);
        added
    }

    /// Index every `.txt` and `.md` file under `dir`, in path order.
    pub fn add_directory(&self, dir: &Path) -> Result<usize> {
        let mut added = 0;
        let walker = WalkDir::new(dir).sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| {
                PipelineError::retrieval(format!("Failed to walk {}: {}", dir.display(), e))
            })?;
            let path = entry.path();
            let indexable = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("txt") | Some("md")
            );
            if !entry.file_type().is_file() || !indexable {
                continue;
            }
            let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
            let document_id = path.strip_prefix(dir).unwrap_or(path).display().to_string();
            added += self.add_document(&document_id, &text);
        }
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.chunks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Passage>> {
        let query_terms = terms(text);
        if query_terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        let mut scored: Vec<Passage> = chunks
            .iter()
            .filter_map(|chunk| {
                let shared = query_terms.intersection(&chunk.terms).count();
                (shared > 0).then(|| {
                    Passage::new(chunk.text.clone(), shared as f32 / query_terms.len() as f32)
                        .with_id(chunk.id.clone())
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        debug!(k, returned = scored.len(), "In-memory retrieval");
        Ok(scored)
    }
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    text: &'a str,
    k: usize,
}

/// Retriever backed by `POST {endpoint}/query`, returning a JSON array of
/// passages.
pub struct HttpRetriever {
    client: Client,
    query_url: Url,
}

impl HttpRetriever {
    pub fn new(endpoint: &str) -> Result<Self> {
        let query_url = Url::parse(endpoint)
            .and_then(|base| base.join("query"))
            .map_err(|e| {
                PipelineError::config(format!("Invalid retriever endpoint {}: {}", endpoint, e))
            })?;
        Ok(Self {
            client: Client::new(),
            query_url,
        })
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Passage>> {
        let response = self
            .client
            .post(self.query_url.clone())
            .json(&QueryRequest { text, k })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::retrieval(format!("Query request failed: {}", e)))?;

        response
            .json()
            .await
            .map_err(|e| PipelineError::retrieval(format!("Invalid query response: {}", e)))
    }
}
