use std::sync::Arc;

use tracing::debug;

use crate::config::DecodingConfig;
use crate::error::Result;
use crate::model::ModelHandle;
use crate::models::Passage;
use crate::prompt::build_prompt;
use crate::retriever::{Retriever, join_passages};

/// Answers questions from retrieved context with a loaded model.
///
/// A generator is only constructed from a ready [`ModelHandle`]; model load
/// failures surface from [`ModelHandle::load`], never from a call here.
/// Generation has no side effects: logging the trace is up to the caller.
pub struct Generator {
    model: Arc<ModelHandle>,
    retriever: Option<Arc<dyn Retriever>>,
    decoding: DecodingConfig,
}

impl Generator {
    /// Create a generator without a retriever
    pub fn new(model: Arc<ModelHandle>, decoding: DecodingConfig) -> Self {
        Self {
            model,
            retriever: None,
            decoding,
        }
    }

    /// Attach the retriever used when no explicit context is given
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Generate an answer for `question`.
    ///
    /// Without an explicit `context`, the top `k` passages from the retriever
    /// are joined with newlines in the order returned. With neither a context
    /// nor a retriever the context is empty. Prompts longer than
    /// `max_input_length` tokens lose their tail, which can drop retrieved
    /// context. Retrieval errors are returned as is.
    pub async fn generate_answer(
        &self,
        question: &str,
        context: Option<&str>,
        k: usize,
    ) -> Result<String> {
        let context = self.resolve_context(question, context, k).await?;
        let prompt = build_prompt(&context, question);
        self.answer_prompt(&prompt).await
    }

    /// Run an already built prompt through the model
    pub async fn answer_prompt(&self, prompt: &str) -> Result<String> {
        let input_ids = self.model.tokenize(prompt, self.decoding.max_input_length)?;
        let output_ids = self.model.decode(&input_ids, &self.decoding).await?;
        let answer = self.model.detokenize(&output_ids)?;

        debug!(
            input_tokens = input_ids.len(),
            output_tokens = output_ids.len(),
            "Generated answer"
        );
        Ok(answer)
    }

    /// Resolve the context a question is answered from
    async fn resolve_context(
        &self,
        question: &str,
        context: Option<&str>,
        k: usize,
    ) -> Result<String> {
        if let Some(context) = context {
            return Ok(context.to_string());
        }
        let passages = self.retrieve(question, k).await?;
        Ok(join_passages(&passages))
    }

    /// Top `k` passages for `question`, or none without a retriever
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<Passage>> {
        match &self.retriever {
            Some(retriever) => {
                let passages = retriever.query(question, k).await?;
                debug!(k, retrieved = passages.len(), "Retrieved passages");
                Ok(passages)
            }
            None => Ok(Vec::new()),
        }
    }
}
