use std::sync::Arc;

use grounded_qa::config::{Config, DecodingConfig, RetrievalConfig};
use grounded_qa::evaluation::{Evaluator, load_test_cases};
use grounded_qa::generator::Generator;
use grounded_qa::logger::QueryLogger;
use grounded_qa::model::{BeamSearchDecoder, ModelHandle, StepScorer, TextTokenizer};
use grounded_qa::models::QueryLogEntry;
use grounded_qa::retriever;
use grounded_qa::runner::SuiteRunner;
use grounded_qa::{PipelineError, Result};
use tempfile::tempdir;
use uuid::Uuid;

const START: u32 = 0;
const EOS: u32 = 1;
const OFFSET: u32 = 2;
const VOCAB: usize = 256 + OFFSET as usize;

/// Byte-level tokenizer with ids 0 and 1 reserved as special tokens.
struct ByteTokenizer;

impl TextTokenizer for ByteTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(|b| b as u32 + OFFSET).collect())
    }

    fn detokenize(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        let bytes: Vec<u8> = ids
            .iter()
            .filter(|&&id| !(skip_special_tokens && id < OFFSET))
            .map(|&id| id.saturating_sub(OFFSET) as u8)
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Strongly prefers copying the first context line of the prompt, then
/// ending the sequence.
struct ContextCopier;

fn first_context_line(input_ids: &[u32]) -> &[u32] {
    let header: Vec<u32> = b"Context: ".iter().map(|&b| b as u32 + OFFSET).collect();
    let body = input_ids.strip_prefix(header.as_slice()).unwrap_or(&[]);
    let newline = b'\n' as u32 + OFFSET;
    let end = body.iter().position(|&id| id == newline).unwrap_or(body.len());
    &body[..end]
}

impl StepScorer for ContextCopier {
    fn decoder_start_token_id(&self) -> u32 {
        START
    }

    fn eos_token_id(&self) -> u32 {
        EOS
    }

    fn next_token_logprobs(&self, input_ids: &[u32], prefix: &[u32]) -> Result<Vec<f32>> {
        let line = first_context_line(input_ids);
        let target = line.get(prefix.len() - 1).copied().unwrap_or(EOS);
        let mut logprobs = vec![-20.0; VOCAB];
        logprobs[EOS as usize] = f32::NEG_INFINITY;
        logprobs[target as usize] = -0.01;
        Ok(logprobs)
    }
}

fn model() -> Arc<ModelHandle> {
    Arc::new(ModelHandle::new(
        "context-copier",
        ByteTokenizer,
        BeamSearchDecoder::new(ContextCopier),
    ))
}

fn write_corpus(dir: &std::path::Path) {
    std::fs::write(
        dir.join("imran.txt"),
        "Imran Khan is a former Prime Minister of Pakistan.\n\nHe founded the Pakistan Tehreek-e-Insaf party.",
    )
    .unwrap();
    std::fs::write(dir.join("cricket.md"), "Cricket is played with a bat and ball.").unwrap();
}

fn generator_over(data_dir: &std::path::Path) -> Generator {
    let retrieval = RetrievalConfig {
        data_dir: Some(data_dir.to_path_buf()),
        max_chunk_chars: 60,
        ..RetrievalConfig::default()
    };
    let retriever = retriever::from_config(&retrieval).unwrap().unwrap();
    Generator::new(model(), DecodingConfig::default()).with_retriever(retriever)
}

#[tokio::test]
async fn test_answer_is_grounded_in_retrieved_context() {
    let data = tempdir().unwrap();
    write_corpus(data.path());
    let generator = generator_over(data.path());

    let question = "What are the key points about Imran Khan?";
    let passages = generator.retrieve(question, 3).await.unwrap();
    assert_eq!(passages.len(), 2);
    assert_eq!(passages[0].id.as_deref(), Some("imran.txt#0"));
    assert_eq!(passages[1].id.as_deref(), Some("imran.txt#1"));

    let answer = generator.generate_answer(question, None, 3).await.unwrap();
    assert!(answer.contains("Pakistan"));

    let context = grounded_qa::retriever::join_passages(&passages);
    assert!(Evaluator::new(50).check_grounding(&answer, &context));
}

#[tokio::test]
async fn test_repeated_answers_are_consistent() {
    let generator = Generator::new(model(), DecodingConfig::default());
    let context = "Imran Khan served as Prime Minister of Pakistan from 2018 to 2022.";

    let first = generator
        .generate_answer("Who is Imran Khan?", Some(context), 3)
        .await
        .unwrap();
    let second = generator
        .generate_answer("Who is Imran Khan?", Some(context), 3)
        .await
        .unwrap();

    assert_eq!(first, context);
    let report =
        Evaluator::new(50).check_consistency(&first, &second, &["Pakistan".to_string()]);
    assert!(report.consistent);
    assert!(report.length_difference < 50);
}

#[tokio::test]
async fn test_long_prompt_truncation_is_deterministic() {
    let generator = Generator::new(model(), DecodingConfig::default());
    let context = "Pakistan ".repeat(120);

    let first = generator.generate_answer("Q", Some(&context), 3).await.unwrap();
    let second = generator.generate_answer("Q", Some(&context), 3).await.unwrap();

    assert_eq!(first, second);
    // Decoder output is capped, start token included
    assert_eq!(first.len(), 127);
}

#[tokio::test]
async fn test_generation_without_context() {
    let generator = Generator::new(model(), DecodingConfig::default());
    let answer = generator.generate_answer("Q", None, 3).await.unwrap();
    assert_eq!(answer, "");
}

#[tokio::test]
async fn test_log_round_trip() {
    let logs = tempdir().unwrap();
    let logger = QueryLogger::new(logs.path());
    let group_id = Uuid::new_v4();

    let entry = QueryLogEntry::new(
        "Who is Imran Khan?",
        vec!["Imran Khan is a former Prime Minister of Pakistan.".to_string()],
        "Context: Imran Khan is a former Prime Minister of Pakistan.\nQuestion: Who is Imran Khan?\nAnswer:",
        "Imran Khan is a former Prime Minister of Pakistan.",
    )
    .with_group_id(group_id);
    logger.log_query(entry.clone()).unwrap();

    let records = logger.get_recent_logs(1).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].group_id, group_id);
    assert_eq!(records[0].question, entry.question);
    assert_eq!(records[0].generated_answer, entry.generated_answer);
}

#[tokio::test]
async fn test_suite_end_to_end() {
    let data = tempdir().unwrap();
    write_corpus(data.path());
    let work = tempdir().unwrap();

    let cases_path = work.path().join("test_inputs.json");
    std::fs::write(
        &cases_path,
        r#"[
            {"question": "What are the key points about Imran Khan?", "expected_answer_contains": ["Pakistan"], "description": "public figure"},
            {"question": "Tell me about Imran Khan and Pakistan", "expected_answer_contains": ["prime minister"]}
        ]"#,
    )
    .unwrap();

    let mut config = Config::default();
    config.logging.log_dir = work.path().join("logs");
    config.evaluation.storage_path = Some(work.path().join("results.json"));

    let logger = Arc::new(QueryLogger::new(&config.logging.log_dir));
    let runner = SuiteRunner::new(generator_over(data.path()), Arc::clone(&logger), &config);
    let cases = load_test_cases(&cases_path).unwrap();
    let results = runner.run_suite(&cases).await.unwrap();

    assert_eq!(results.summary.total, 2);
    assert_eq!(results.summary.passed, 2);
    for result in &results.results {
        assert!(result.grounded);
        assert!(result.consistency.consistent);
        assert_eq!(result.answer, result.repeat_answer);
    }

    let records = logger.get_recent_logs(10).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.group_id == results.group_id));
    assert!(work.path().join("results.json").exists());
}

#[tokio::test]
async fn test_missing_tokenizer_is_fatal() {
    let mut config = Config::default();
    config.model.tokenizer_path = Some("/nonexistent/tokenizer.json".into());

    let err = ModelHandle::load(&config.model).await.unwrap_err();
    assert!(matches!(err, PipelineError::ModelLoad(_)));
    assert!(err.is_fatal());
}
