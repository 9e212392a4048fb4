//! Append-only JSONL log of pipeline runs.
//!
//! One file per calendar day (`rag_logs_YYYYMMDD.jsonl`), one JSON object per
//! line. Lines are never rewritten, reordered or deleted.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Local, NaiveDate};
use tracing::debug;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::models::{LogRecord, QueryLogEntry};

/// Writes and reads back query records.
///
/// Every record is written with a single `write_all` while holding an
/// exclusive advisory lock on the day's file, so lines from other threads,
/// other loggers or other processes on the same directory never interleave.
/// Readers take a shared lock and never observe a half-written line.
pub struct QueryLogger {
    log_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl QueryLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Path of the log file for `date`
    pub fn log_file_for(&self, date: NaiveDate) -> PathBuf {
        self.log_dir
            .join(format!("rag_logs_{}.jsonl", date.format("%Y%m%d")))
    }

    /// Path of today's log file
    pub fn current_log_file(&self) -> PathBuf {
        self.log_file_for(Local::now().date_naive())
    }

    /// Create the log directory if it does not exist yet
    pub fn ensure_log_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).map_err(|e| PipelineError::io(&self.log_dir, e))
    }

    /// Append one record to today's file and return it.
    pub fn log_query(&self, entry: QueryLogEntry) -> Result<LogRecord> {
        self.ensure_log_dir()?;
        let timestamp = Local::now();
        let path = self.log_file_for(timestamp.date_naive());

        let record = LogRecord {
            question: entry.question,
            retrieved_chunks: entry.retrieved_chunks,
            prompt: entry.prompt,
            generated_answer: entry.generated_answer,
            timestamp,
            group_id: entry.group_id.unwrap_or_else(Uuid::new_v4),
            retrieval_scores: entry.retrieval_scores,
            chunk_ids: entry.chunk_ids,
        };

        let mut line = serde_json::to_string(&record)
            .map_err(|e| PipelineError::parse(format!("Failed to serialize log record: {}", e)))?;
        line.push('\n');

        self.append_line(&path, &line)?;
        debug!(path = %path.display(), group_id = %record.group_id, "Logged query");
        Ok(record)
    }

    /// The last `n` records of today's file, oldest first.
    ///
    /// A missing file yields no records; a malformed line is an error.
    pub fn get_recent_logs(&self, n: usize) -> Result<Vec<LogRecord>> {
        read_recent(&self.current_log_file(), n)
    }

    fn append_line(&self, path: &Path, line: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PipelineError::io(path, e))?;

        file.lock().map_err(|e| PipelineError::io(path, e))?;
        let written = file.write_all(line.as_bytes()).and_then(|()| file.flush());
        let unlocked = file.unlock();
        written.map_err(|e| PipelineError::io(path, e))?;
        unlocked.map_err(|e| PipelineError::io(path, e))
    }
}

/// Read the last `n` records of a log file
pub fn read_recent(path: &Path, n: usize) -> Result<Vec<LogRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = read_locked(path).map_err(|e| PipelineError::io(path, e))?;
    let mut records = parse_log_lines(path, &content)?;
    let skip = records.len().saturating_sub(n);
    Ok(records.split_off(skip))
}

fn read_locked(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    file.lock_shared()?;
    let mut content = String::new();
    let read = file.read_to_string(&mut content);
    file.unlock()?;
    read.map(|_| content)
}

/// Parse every non-empty line of a log file
pub fn parse_log_lines(path: &Path, content: &str) -> Result<Vec<LogRecord>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                PipelineError::parse(format!("{}:{}: {}", path.display(), index + 1, e))
            })
        })
        .collect()
}
