use crate::models::{LogRecord, SuiteResults, SuiteSummary};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print suite results in the specified format
pub fn print_results(results: &SuiteResults, format: OutputFormat) {
    match format {
        OutputFormat::Plain => {
            if let Err(e) = write_plain(&mut io::stdout().lock(), results) {
                eprintln!("Error writing results: {}", e);
            }
        }
        OutputFormat::Json => print_json(results),
    }
}

/// Print log records in the specified format
pub fn print_logs(records: &[LogRecord], format: OutputFormat) {
    match format {
        OutputFormat::Plain => {
            if let Err(e) = write_logs_plain(&mut io::stdout().lock(), records) {
                eprintln!("Error writing log records: {}", e);
            }
        }
        OutputFormat::Json => print_json(records),
    }
}

/// Print a single answer in the specified format
pub fn print_answer(question: &str, answer: &str, format: OutputFormat) {
    match format {
        OutputFormat::Plain => println!("{}", answer),
        OutputFormat::Json => print_json(&serde_json::json!({
            "question": question,
            "answer": answer,
        })),
    }
}

/// Write suite results as plain text
fn write_plain(out: &mut impl Write, results: &SuiteResults) -> io::Result<()> {
    writeln!(out, "=== Test suite {} ===", results.group_id)?;
    writeln!(out)?;

    writeln!(out, "📊 SUMMARY")?;
    writeln!(out, "----------")?;
    write_summary_plain(out, &results.summary)?;
    writeln!(out)?;

    writeln!(out, "📝 DETAILED RESULTS")?;
    writeln!(out, "-------------------")?;
    for (i, case) in results.results.iter().enumerate() {
        let status = if case.passed { "PASS" } else { "FAIL" };
        writeln!(out, "Case #{} [{}]", i + 1, status)?;
        if !case.description.is_empty() {
            writeln!(out, "Description: {}", case.description)?;
        }
        writeln!(out, "Question: {}", case.question)?;
        writeln!(out, "Answer: {}", case.answer)?;
        writeln!(out, "Expected terms: {}", case.expected_terms.join(", "))?;
        writeln!(out, "  • contains expected: {}", case.contains_expected)?;
        writeln!(
            out,
            "  • grounded: {} (overlap: {})",
            case.grounded,
            case.grounding_overlap.join(" ")
        )?;
        writeln!(
            out,
            "  • consistent: {} (length difference: {})",
            case.consistency.consistent, case.consistency.length_difference
        )?;
        if !case.consistency.missing_terms.is_empty() {
            writeln!(
                out,
                "  • missing terms: {}",
                case.consistency.missing_terms.join(", ")
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Write summary statistics as a small table
fn write_summary_plain(out: &mut impl Write, summary: &SuiteSummary) -> io::Result<()> {
    if summary.total == 0 {
        return writeln!(out, "No test cases run.");
    }

    writeln!(out, "{:<20} {:<8}", "Metric", "Value")?;
    writeln!(out, "{}", "-".repeat(30))?;
    writeln!(out, "{:<20} {}/{}", "Passed", summary.passed, summary.total)?;
    writeln!(out, "{:<20} {:<8.3}", "Pass rate", summary.pass_rate)?;
    writeln!(out, "{:<20} {}", "Contains expected", summary.contains_expected)?;
    writeln!(out, "{:<20} {}", "Grounded", summary.grounded)?;
    writeln!(out, "{:<20} {}", "Consistent", summary.consistent)?;
    writeln!(out, "{:<20} {:<8.1}", "Mean length", summary.mean_answer_length)?;
    writeln!(out, "{:<20} {:<8.1}", "Median length", summary.median_answer_length)
}

fn write_logs_plain(out: &mut impl Write, records: &[LogRecord]) -> io::Result<()> {
    if records.is_empty() {
        return writeln!(out, "No log records for today.");
    }
    for record in records {
        writeln!(out, "[{}] {}", record.timestamp.to_rfc3339(), record.group_id)?;
        writeln!(out, "Question: {}", record.question)?;
        writeln!(out, "Answer: {}", record.generated_answer)?;
        writeln!(out, "Chunks: {}", record.retrieved_chunks.len())?;
        writeln!(out)?;
    }
    Ok(())
}

/// Print any serializable value as pretty JSON
fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing results to JSON: {}", e),
    }
}
