//! Retrieval-augmented question answering over a document collection.
//!
//! A [`generator::Generator`] answers questions with a loaded
//! [`model::ModelHandle`] from context supplied by a [`retriever::Retriever`].
//! Every run can be traced to a daily JSONL file with
//! [`logger::QueryLogger`], and [`runner::SuiteRunner`] replays a fixed set of
//! questions through the pipeline to check grounding and consistency.

pub mod config;
pub mod error;
pub mod evaluation;
pub mod generator;
pub mod logger;
pub mod model;
pub mod models;
pub mod output;
pub mod prompt;
pub mod retriever;
pub mod runner;

pub use error::{PipelineError, Result};
