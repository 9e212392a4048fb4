use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use grounded_qa::config::Config;
use grounded_qa::evaluation::load_test_cases;
use grounded_qa::generator::Generator;
use grounded_qa::logger::QueryLogger;
use grounded_qa::model::ModelHandle;
use grounded_qa::models::QueryLogEntry;
use grounded_qa::output::{self, OutputFormat};
use grounded_qa::prompt::build_prompt;
use grounded_qa::retriever::{self, join_passages};
use grounded_qa::runner::SuiteRunner;

/// Grounded QA CLI - answer questions from retrieved context and check the answers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format: plain or json
    #[arg(short, long, global = true, default_value = "plain")]
    output: OutputFormat,

    /// Verbose output - debug diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer a single question
    Ask {
        /// Question to answer
        question: String,

        /// Use this context instead of retrieving one
        #[arg(long)]
        context: Option<String>,

        /// Number of passages to retrieve
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Run the test suite and check every answer
    Eval {
        /// Test case file, overriding the configured one
        #[arg(long)]
        cases: Option<PathBuf>,
    },
    /// Show the most recent query log records for today
    Logs {
        /// Number of records to show
        #[arg(short, default_value_t = 10)]
        n: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    debug!("grounded-qa v{} starting", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Ask {
            question,
            context,
            k,
        } => ask(&config, &question, context, k, args.output).await,
        Command::Eval { cases } => {
            let path = cases.unwrap_or_else(|| config.evaluation.test_cases.clone());
            eval(&config, path, args.output).await
        }
        Command::Logs { n } => {
            let logger = QueryLogger::new(&config.logging.log_dir);
            let records = logger
                .get_recent_logs(n)
                .context("Failed to read query log")?;
            output::print_logs(&records, args.output);
            Ok(())
        }
    }
}

/// Install the stderr diagnostics subscriber
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("grounded_qa=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("grounded_qa=info,warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the model and attach the configured retriever
async fn build_generator(config: &Config) -> Result<Generator> {
    let model = ModelHandle::load(&config.model)
        .await
        .context("Failed to load model")?;
    let mut generator = Generator::new(Arc::new(model), config.decoding.clone());

    if let Some(retriever) =
        retriever::from_config(&config.retrieval).context("Failed to set up retriever")?
    {
        generator = generator.with_retriever(retriever);
    }
    Ok(generator)
}

async fn ask(
    config: &Config,
    question: &str,
    context: Option<String>,
    k: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let logger = QueryLogger::new(&config.logging.log_dir);
    logger
        .ensure_log_dir()
        .context("Failed to set up query log")?;

    let generator = build_generator(config).await?;
    let k = k.unwrap_or(config.retrieval.top_k);

    let (context, passages) = match context {
        Some(context) => (context, None),
        None => {
            let passages = generator
                .retrieve(question, k)
                .await
                .context("Failed to retrieve passages")?;
            (join_passages(&passages), Some(passages))
        }
    };

    let answer = generator
        .generate_answer(question, Some(&context), k)
        .await
        .context("Failed to generate answer")?;

    let prompt = build_prompt(&context, question);
    let entry = match &passages {
        Some(passages) => QueryLogEntry::from_passages(question, passages, prompt, &answer),
        None => QueryLogEntry::new(question, vec![context.clone()], prompt, &answer),
    };
    if let Err(e) = logger.log_query(entry) {
        warn!(error = %e, "Failed to log query");
    }

    output::print_answer(question, &answer, format);
    Ok(())
}

async fn eval(config: &Config, cases_path: PathBuf, format: OutputFormat) -> Result<()> {
    let cases = load_test_cases(&cases_path)
        .with_context(|| format!("Failed to load test cases: {}", cases_path.display()))?;

    let generator = build_generator(config).await?;
    let logger = Arc::new(QueryLogger::new(&config.logging.log_dir));
    logger
        .ensure_log_dir()
        .context("Failed to set up query log")?;

    let runner = SuiteRunner::new(generator, logger, config);
    let results = runner.run_suite(&cases).await?;

    output::print_results(&results, format);
    Ok(())
}
