use crate::error::{PipelineError, Result};
use crate::models::{CaseResult, ConsistencyReport, SuiteSummary, TestCase};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

/// Oracle checks applied to generated answers
pub struct Evaluator {
    /// Maximum character length difference between two generations
    length_tolerance: usize,
}

impl Evaluator {
    /// Create a new evaluator
    pub fn new(length_tolerance: usize) -> Self {
        Self { length_tolerance }
    }

    pub fn length_tolerance(&self) -> usize {
        self.length_tolerance
    }

    /// Lowercased whitespace-separated words of `text`
    pub fn word_set(text: &str) -> BTreeSet<String> {
        text.split_whitespace().map(str::to_lowercase).collect()
    }

    /// Words shared by the answer and the context, sorted
    pub fn grounding_overlap(&self, answer: &str, context: &str) -> Vec<String> {
        let context_words = Self::word_set(context);
        Self::word_set(answer)
            .into_iter()
            .filter(|word| context_words.contains(word))
            .collect()
    }

    /// An answer is grounded when it shares at least one word with the context
    pub fn check_grounding(&self, answer: &str, context: &str) -> bool {
        !self.grounding_overlap(answer, context).is_empty()
    }

    /// Whether every expected term appears in `answer`, ignoring case
    pub fn contains_expected_terms(&self, answer: &str, expected: &[String]) -> bool {
        let answer = answer.to_lowercase();
        expected
            .iter()
            .all(|term| answer.contains(&term.to_lowercase()))
    }

    /// Compare two generations for the same question.
    ///
    /// Consistent when their character lengths differ by less than the
    /// tolerance and every expected term shows up in at least one of them.
    pub fn check_consistency(
        &self,
        first: &str,
        second: &str,
        expected: &[String],
    ) -> ConsistencyReport {
        let length_difference = first.chars().count().abs_diff(second.chars().count());
        let first_lower = first.to_lowercase();
        let second_lower = second.to_lowercase();

        let missing_terms: Vec<String> = expected
            .iter()
            .filter(|term| {
                let term = term.to_lowercase();
                !first_lower.contains(&term) && !second_lower.contains(&term)
            })
            .cloned()
            .collect();

        let consistent = length_difference < self.length_tolerance && missing_terms.is_empty();
        ConsistencyReport {
            length_difference,
            missing_terms,
            consistent,
        }
    }

    /// Calculate aggregate statistics for a suite run
    pub fn summarize(&self, results: &[CaseResult]) -> SuiteSummary {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let lengths: Vec<f64> = results
            .iter()
            .map(|r| r.answer.chars().count() as f64)
            .collect();

        let (pass_rate, mean_answer_length, median_answer_length) = if total == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (
                passed as f64 / total as f64,
                self.calculate_mean(&lengths),
                self.calculate_median(&lengths),
            )
        };

        SuiteSummary {
            total,
            passed,
            contains_expected: results.iter().filter(|r| r.contains_expected).count(),
            grounded: results.iter().filter(|r| r.grounded).count(),
            consistent: results.iter().filter(|r| r.consistency.consistent).count(),
            pass_rate,
            mean_answer_length,
            median_answer_length,
        }
    }

    /// Calculate mean of values
    fn calculate_mean(&self, values: &[f64]) -> f64 {
        let sum: f64 = values.iter().sum();
        sum / values.len() as f64
    }

    /// Calculate median of values
    fn calculate_median(&self, values: &[f64]) -> f64 {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }
}

/// Load test cases from a JSON array.
///
/// A missing file is not an error: the suite simply has no cases.
pub fn load_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    if !path.exists() {
        warn!(path = %path.display(), "Test case file not found, running no cases");
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        PipelineError::parse(format!("Invalid test cases in {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn terms(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn case_result(answer: &str, passed: bool, grounded: bool, consistent: bool) -> CaseResult {
        CaseResult {
            question: "q".to_string(),
            description: String::new(),
            expected_terms: vec![],
            answer: answer.to_string(),
            repeat_answer: answer.to_string(),
            context: String::new(),
            contains_expected: passed,
            grounding_overlap: vec![],
            grounded,
            consistency: ConsistencyReport {
                length_difference: 0,
                missing_terms: vec![],
                consistent,
            },
            passed,
        }
    }

    #[test]
    fn test_word_set_lowercases() {
        let words = Evaluator::word_set("Imran  KHAN\nimran");
        assert_eq!(words.len(), 2);
        assert!(words.contains("imran"));
        assert!(words.contains("khan"));
    }

    #[test]
    fn test_grounding_shared_word() {
        let evaluator = Evaluator::new(50);
        let context = "Imran Khan served as Prime Minister of Pakistan";
        assert!(evaluator.check_grounding("He led pakistan", context));
        assert_eq!(
            evaluator.grounding_overlap("He led pakistan", context),
            vec!["pakistan"]
        );
    }

    #[test]
    fn test_grounding_no_overlap() {
        let evaluator = Evaluator::new(50);
        assert!(!evaluator.check_grounding("Cricket legend", "Prime Minister of Pakistan"));
        assert!(!evaluator.check_grounding("anything", ""));
        assert!(!evaluator.check_grounding("", "context words"));
    }

    #[test]
    fn test_grounding_is_whole_word() {
        let evaluator = Evaluator::new(50);
        // Punctuation stays attached to words
        assert!(!evaluator.check_grounding("Pakistan.", "Pakistan"));
    }

    #[test]
    fn test_contains_expected_terms_case_insensitive() {
        let evaluator = Evaluator::new(50);
        let answer = "Imran Khan is a former Prime Minister of Pakistan.";
        assert!(evaluator.contains_expected_terms(answer, &terms(&["pakistan", "Prime Minister"])));
        assert!(!evaluator.contains_expected_terms(answer, &terms(&["Pakistan", "cricket"])));
        assert!(evaluator.contains_expected_terms(answer, &[]));
    }

    #[test]
    fn test_consistency_within_tolerance() {
        let evaluator = Evaluator::new(50);
        let report = evaluator.check_consistency(
            "Imran Khan is from Pakistan.",
            "He was Prime Minister of Pakistan.",
            &terms(&["Pakistan"]),
        );
        assert!(report.consistent);
        assert_eq!(report.length_difference, 6);
        assert!(report.missing_terms.is_empty());
    }

    #[test]
    fn test_consistency_term_in_either_answer() {
        let evaluator = Evaluator::new(50);
        let report =
            evaluator.check_consistency("He played cricket.", "Pakistan.", &terms(&["pakistan"]));
        assert!(report.consistent);
    }

    #[test]
    fn test_consistency_length_boundary() {
        let evaluator = Evaluator::new(50);
        let short = "a";
        let at_limit = "a".repeat(51);
        let below_limit = "a".repeat(50);

        assert!(!evaluator.check_consistency(short, &at_limit, &[]).consistent);
        assert!(evaluator.check_consistency(short, &below_limit, &[]).consistent);
    }

    #[test]
    fn test_consistency_counts_characters() {
        let evaluator = Evaluator::new(2);
        let report = evaluator.check_consistency("çç", "cc", &[]);
        assert_eq!(report.length_difference, 0);
        assert!(report.consistent);
    }

    #[test]
    fn test_consistency_missing_term() {
        let evaluator = Evaluator::new(50);
        let report = evaluator.check_consistency(
            "He is a politician.",
            "He is a politician.",
            &terms(&["Pakistan", "politician"]),
        );
        assert!(!report.consistent);
        assert_eq!(report.missing_terms, vec!["Pakistan"]);
    }

    #[test]
    fn test_summarize() {
        let evaluator = Evaluator::new(50);
        let results = vec![
            case_result("abcd", true, true, true),
            case_result("ab", false, true, false),
            case_result("abcdefghij", false, false, true),
        ];

        let summary = evaluator.summarize(&results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.contains_expected, 1);
        assert_eq!(summary.grounded, 2);
        assert_eq!(summary.consistent, 2);
        assert!((summary.pass_rate - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(summary.mean_answer_length, 16.0 / 3.0);
        assert_eq!(summary.median_answer_length, 4.0);
    }

    #[test]
    fn test_summarize_empty() {
        let evaluator = Evaluator::new(50);
        let summary = evaluator.summarize(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.pass_rate, 0.0);
        assert_eq!(summary.mean_answer_length, 0.0);
    }

    #[test]
    fn test_calculate_median_even() {
        let evaluator = Evaluator::new(50);
        assert_eq!(evaluator.calculate_median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn test_load_test_cases() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"question": "Who is Imran Khan?", "expected_answer_contains": ["Pakistan"], "description": "public figure"}},
                {{"question": "What is RAG?", "expected_answer_contains": []}}
            ]"#
        )
        .unwrap();

        let cases = load_test_cases(file.path()).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].question, "Who is Imran Khan?");
        assert_eq!(cases[1].description, "");
    }

    #[test]
    fn test_load_test_cases_missing_file() {
        let cases = load_test_cases(Path::new("/nonexistent/cases.json")).unwrap();
        assert!(cases.is_empty());
    }

    #[test]
    fn test_load_test_cases_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"[{{"question": 1}}]"#).unwrap();

        let err = load_test_cases(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }
}
