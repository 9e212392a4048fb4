//! Deterministic beam search over a next-token scoring capability.
//!
//! Hypotheses are ranked by `sum_logprobs / generated_len ^ length_penalty`,
//! so a penalty above 1.0 favors longer answers. With early stopping the
//! search ends as soon as `num_beams` hypotheses have emitted the end token.
//! Ties between equal scores are broken by beam index and then by the lower
//! token id, which makes the output a pure function of the scorer.

use async_trait::async_trait;
use std::sync::Arc;

use super::Decoder;
use crate::config::DecodingConfig;
use crate::error::{PipelineError, Result};

/// Scores the next decoder token for an encoder input and decoder prefix.
pub trait StepScorer: Send + Sync {
    /// Token that starts every decoder sequence.
    fn decoder_start_token_id(&self) -> u32;

    /// Token that ends a hypothesis.
    fn eos_token_id(&self) -> u32;

    /// Log-probabilities over the vocabulary, indexed by token id.
    fn next_token_logprobs(&self, input_ids: &[u32], prefix: &[u32]) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone)]
struct Hypothesis {
    tokens: Vec<u32>,
    score: f32,
}

struct Candidate {
    beam: usize,
    token: u32,
    score: f32,
}

fn normalized_score(score: f32, generated_len: usize, length_penalty: f32) -> f32 {
    score / (generated_len.max(1) as f32).powf(length_penalty)
}

/// The `k` best tokens of a distribution, highest log-probability first.
fn top_tokens(logprobs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut ranked: Vec<(u32, f32)> = logprobs
        .iter()
        .enumerate()
        .filter(|(_, lp)| !lp.is_nan())
        .map(|(id, &lp)| (id as u32, lp))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(k);
    ranked
}

/// Finished hypotheses, best first, capped at `num_beams`.
struct FinishedPool {
    capacity: usize,
    hypotheses: Vec<(Vec<u32>, f32)>,
}

impl FinishedPool {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            hypotheses: Vec::with_capacity(capacity + 1),
        }
    }

    fn add(&mut self, tokens: Vec<u32>, normalized: f32) {
        let position = self
            .hypotheses
            .iter()
            .position(|(_, s)| normalized > *s)
            .unwrap_or(self.hypotheses.len());
        self.hypotheses.insert(position, (tokens, normalized));
        self.hypotheses.truncate(self.capacity);
    }

    fn is_full(&self) -> bool {
        self.hypotheses.len() >= self.capacity
    }

    fn worst(&self) -> Option<f32> {
        self.hypotheses.last().map(|(_, s)| *s)
    }

    fn into_best(self) -> Option<Vec<u32>> {
        self.hypotheses.into_iter().next().map(|(tokens, _)| tokens)
    }
}

/// Run beam search and return the best sequence, starting with the decoder
/// start token and ending with the end token when one was produced.
pub fn beam_search<S: StepScorer + ?Sized>(
    scorer: &S,
    input_ids: &[u32],
    config: &DecodingConfig,
) -> Result<Vec<u32>> {
    let num_beams = config.num_beams.max(1);
    let eos = scorer.eos_token_id();
    let mut beams = vec![Hypothesis {
        tokens: vec![scorer.decoder_start_token_id()],
        score: 0.0,
    }];
    let mut finished = FinishedPool::new(num_beams);

    while !beams.is_empty() && beams[0].tokens.len() < config.max_output_length {
        let mut candidates = Vec::new();
        for (beam, hypothesis) in beams.iter().enumerate() {
            let logprobs = scorer.next_token_logprobs(input_ids, &hypothesis.tokens)?;
            for (token, logprob) in top_tokens(&logprobs, 2 * num_beams) {
                candidates.push(Candidate {
                    beam,
                    token,
                    score: hypothesis.score + logprob,
                });
            }
        }
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.beam.cmp(&b.beam))
                .then(a.token.cmp(&b.token))
        });

        let mut next = Vec::with_capacity(num_beams);
        for (rank, candidate) in candidates.into_iter().enumerate() {
            let mut tokens = beams[candidate.beam].tokens.clone();
            tokens.push(candidate.token);
            if candidate.token == eos {
                // An end token ranked below the beam width would have been pruned.
                if rank < num_beams {
                    let generated = tokens.len() - 1;
                    finished.add(
                        tokens,
                        normalized_score(candidate.score, generated, config.length_penalty),
                    );
                }
            } else {
                next.push(Hypothesis {
                    tokens,
                    score: candidate.score,
                });
            }
            if next.len() == num_beams {
                break;
            }
        }
        beams = next;

        if finished.is_full() {
            if config.early_stopping {
                break;
            }
            let best_running = beams.first().map(|h| {
                normalized_score(h.score, h.tokens.len() - 1, config.length_penalty)
            });
            match (best_running, finished.worst()) {
                (Some(running), Some(worst)) if running > worst => {}
                _ => break,
            }
        }
    }

    if !finished.is_full() {
        for hypothesis in beams {
            let generated = hypothesis.tokens.len() - 1;
            finished.add(
                hypothesis.tokens,
                normalized_score(hypothesis.score, generated, config.length_penalty),
            );
        }
    }

    Ok(finished
        .into_best()
        .unwrap_or_else(|| vec![scorer.decoder_start_token_id()]))
}

/// A [`Decoder`] running beam search locally over a [`StepScorer`].
///
/// The search runs on the blocking thread pool since scoring is CPU bound.
pub struct BeamSearchDecoder<S> {
    scorer: Arc<S>,
}

impl<S: StepScorer + 'static> BeamSearchDecoder<S> {
    pub fn new(scorer: S) -> Self {
        Self {
            scorer: Arc::new(scorer),
        }
    }
}

#[async_trait]
impl<S: StepScorer + 'static> Decoder for BeamSearchDecoder<S> {
    async fn decode(&self, input_ids: &[u32], config: &DecodingConfig) -> Result<Vec<u32>> {
        let scorer = Arc::clone(&self.scorer);
        let input_ids = input_ids.to_vec();
        let config = config.clone();

        tokio::task::spawn_blocking(move || beam_search(scorer.as_ref(), &input_ids, &config))
            .await
            .map_err(|e| PipelineError::decode(format!("Beam search task failed: {}", e)))?
    }
}
