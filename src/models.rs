use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, de};
use uuid::Uuid;

/// A scored unit of text returned by a retriever
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Passage text
    pub text: String,
    /// Relevance score (higher is more relevant)
    pub score: f32,
    /// Optional stable identifier of the passage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Passage {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// One line of a daily query log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Input question
    pub question: String,
    /// Retrieved context chunks, in retrieval order
    pub retrieved_chunks: Vec<String>,
    /// Final prompt sent to the model
    pub prompt: String,
    /// Generated answer
    pub generated_answer: String,
    /// When the record was written. Offset-less timestamps read as local time.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Local>,
    /// Correlates records belonging to one logical run
    pub group_id: Uuid,
    /// Scores of the retrieved chunks
    pub retrieval_scores: Option<Vec<f32>>,
    /// Identifiers of the retrieved chunks
    pub chunk_ids: Option<Vec<String>>,
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Local>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(timestamp.with_timezone(&Local));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .ok_or_else(|| de::Error::custom(format!("invalid timestamp {:?}", raw)))
}

/// Fields supplied by the caller when logging a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryLogEntry {
    pub question: String,
    pub retrieved_chunks: Vec<String>,
    pub prompt: String,
    pub generated_answer: String,
    /// Fresh UUID is generated when absent
    pub group_id: Option<Uuid>,
    pub retrieval_scores: Option<Vec<f32>>,
    pub chunk_ids: Option<Vec<String>>,
}

impl QueryLogEntry {
    pub fn new(
        question: impl Into<String>,
        retrieved_chunks: Vec<String>,
        prompt: impl Into<String>,
        generated_answer: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            retrieved_chunks,
            prompt: prompt.into(),
            generated_answer: generated_answer.into(),
            ..Default::default()
        }
    }

    /// Build an entry from retrieved passages, carrying their scores and,
    /// when every passage has one, their ids.
    pub fn from_passages(
        question: impl Into<String>,
        passages: &[Passage],
        prompt: impl Into<String>,
        generated_answer: impl Into<String>,
    ) -> Self {
        let chunk_ids: Option<Vec<String>> = passages.iter().map(|p| p.id.clone()).collect();
        Self {
            retrieval_scores: Some(passages.iter().map(|p| p.score).collect()),
            chunk_ids: chunk_ids.filter(|ids| !ids.is_empty()),
            ..Self::new(
                question,
                passages.iter().map(|p| p.text.clone()).collect(),
                prompt,
                generated_answer,
            )
        }
    }

    pub fn with_group_id(mut self, group_id: Uuid) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn with_retrieval_scores(mut self, scores: Vec<f32>) -> Self {
        self.retrieval_scores = Some(scores);
        self
    }

    pub fn with_chunk_ids(mut self, chunk_ids: Vec<String>) -> Self {
        self.chunk_ids = Some(chunk_ids);
        self
    }
}

/// A fixed question with the terms its answer should mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Question to ask the pipeline
    pub question: String,
    /// Case-insensitive substrings expected in the answer
    pub expected_answer_contains: Vec<String>,
    /// Human readable description of the case
    #[serde(default)]
    pub description: String,
}

/// Outcome of comparing two generations for the same question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Absolute difference in character length
    pub length_difference: usize,
    /// Expected terms found in neither generation
    pub missing_terms: Vec<String>,
    /// Whether both the length and term checks passed
    pub consistent: bool,
}

/// Complete result for a single test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    /// Question asked
    pub question: String,
    /// Test case description
    pub description: String,
    /// Terms the answer was expected to contain
    pub expected_terms: Vec<String>,
    /// First generated answer
    pub answer: String,
    /// Second generated answer, used for the consistency check
    pub repeat_answer: String,
    /// Context the answer was conditioned on
    pub context: String,
    /// Whether every expected term appears in the first answer
    pub contains_expected: bool,
    /// Words shared by the answer and the context
    pub grounding_overlap: Vec<String>,
    /// Whether the answer reuses vocabulary from the context
    pub grounded: bool,
    /// Consistency between the two generations
    pub consistency: ConsistencyReport,
    /// Whether the case passed every check
    pub passed: bool,
}

/// Aggregates across a suite run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteSummary {
    /// Number of cases run
    pub total: usize,
    /// Number of cases that passed every check
    pub passed: usize,
    /// Cases whose answer contained every expected term
    pub contains_expected: usize,
    /// Cases whose answer was grounded in the context
    pub grounded: usize,
    /// Cases whose two generations were consistent
    pub consistent: usize,
    /// Fraction of cases passed (0.0 to 1.0)
    pub pass_rate: f64,
    /// Mean answer length in characters
    pub mean_answer_length: f64,
    /// Median answer length in characters
    pub median_answer_length: f64,
}

/// Final results of a suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResults {
    /// Group id shared by every log record of the run
    pub group_id: Uuid,
    /// Aggregated statistics
    pub summary: SuiteSummary,
    /// Individual case results
    pub results: Vec<CaseResult>,
}
