use crate::config::Config;
use crate::evaluation::Evaluator;
use crate::generator::Generator;
use crate::logger::QueryLogger;
use crate::models::{CaseResult, QueryLogEntry, SuiteResults, TestCase};
use crate::prompt::build_prompt;
use crate::retriever::join_passages;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs a test suite through the full pipeline and checks every answer
pub struct SuiteRunner {
    generator: Generator,
    logger: Arc<QueryLogger>,
    evaluator: Evaluator,
    /// Passages retrieved per question
    top_k: usize,
    /// Where suite results are written, if anywhere
    storage_path: Option<PathBuf>,
}

impl SuiteRunner {
    /// Create a new runner with the given configuration
    pub fn new(generator: Generator, logger: Arc<QueryLogger>, config: &Config) -> Self {
        Self {
            generator,
            logger,
            evaluator: Evaluator::new(config.evaluation.length_tolerance),
            top_k: config.retrieval.top_k,
            storage_path: config.evaluation.storage_path.clone(),
        }
    }

    /// Run every case and aggregate the results.
    ///
    /// All log records written during one run share a group id. A failed
    /// log append is reported and the run continues; generation and
    /// retrieval failures abort the run.
    pub async fn run_suite(&self, cases: &[TestCase]) -> Result<SuiteResults> {
        let group_id = Uuid::new_v4();
        let total = cases.len();
        info!(%group_id, total, "Running test suite");

        let mut results = Vec::with_capacity(total);
        for (index, case) in cases.iter().enumerate() {
            debug!(case = index + 1, total, question = %case.question, "Processing case");
            let result = self
                .run_case(case, group_id)
                .await
                .with_context(|| format!("Failed to evaluate case: {}", case.question))?;
            results.push(result);
        }

        let summary = self.evaluator.summarize(&results);
        info!(
            passed = summary.passed,
            total = summary.total,
            "Test suite finished"
        );

        let suite_results = SuiteResults {
            group_id,
            summary,
            results,
        };
        self.store_results_if_configured(&suite_results)?;

        Ok(suite_results)
    }

    /// Answer one case twice, log the first trace and run the checks
    async fn run_case(&self, case: &TestCase, group_id: Uuid) -> Result<CaseResult> {
        let passages = self
            .generator
            .retrieve(&case.question, self.top_k)
            .await
            .context("Failed to retrieve passages")?;
        let context = join_passages(&passages);
        let prompt = build_prompt(&context, &case.question);

        let answer = self
            .generator
            .generate_answer(&case.question, Some(&context), self.top_k)
            .await
            .context("Failed to generate answer")?;
        let repeat_answer = self
            .generator
            .generate_answer(&case.question, None, self.top_k)
            .await
            .context("Failed to generate repeat answer")?;

        let entry = QueryLogEntry::from_passages(&case.question, &passages, prompt, &answer)
            .with_group_id(group_id);
        if let Err(e) = self.logger.log_query(entry) {
            warn!(error = %e, question = %case.question, "Failed to log query");
        }

        let expected = &case.expected_answer_contains;
        let contains_expected = self.evaluator.contains_expected_terms(&answer, expected);
        let grounding_overlap = self.evaluator.grounding_overlap(&answer, &context);
        let grounded = !grounding_overlap.is_empty();
        let consistency = self
            .evaluator
            .check_consistency(&answer, &repeat_answer, expected);
        let passed = contains_expected && grounded && consistency.consistent;

        Ok(CaseResult {
            question: case.question.clone(),
            description: case.description.clone(),
            expected_terms: expected.clone(),
            answer,
            repeat_answer,
            context,
            contains_expected,
            grounding_overlap,
            grounded,
            consistency,
            passed,
        })
    }

    /// Store results if storage path is configured
    fn store_results_if_configured(&self, results: &SuiteResults) -> Result<()> {
        if let Some(storage_path) = &self.storage_path {
            debug!(path = %storage_path.display(), "Storing suite results");
            self.store_results(results, storage_path)?;
        }
        Ok(())
    }

    /// Store results to a JSON file
    fn store_results(&self, results: &SuiteResults, path: &Path) -> Result<()> {
        let json_content = self.serialize_results(results)?;
        self.ensure_directory_exists(path)?;
        self.write_results_file(path, &json_content)?;
        info!(path = %path.display(), "Results stored");

        Ok(())
    }

    /// Serialize results to JSON
    fn serialize_results(&self, results: &SuiteResults) -> Result<String> {
        serde_json::to_string_pretty(results).context("Failed to serialize results to JSON")
    }

    /// Ensure the directory for the results file exists
    fn ensure_directory_exists(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        Ok(())
    }

    /// Write results to file
    fn write_results_file(&self, path: &Path, content: &str) -> Result<()> {
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write results to: {}", path.display()))
    }
}
