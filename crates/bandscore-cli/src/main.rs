//! Bandscore CLI
//!
//! The `bandscore` command evaluates essay submissions against the rubric.
//!
//! ## Commands
//!
//! - `evaluate`: score a submission file and print the evaluation record
//! - `check`: validate configuration, rubric data and API credentials
//! - `rubric`: print the rubric excerpt for one criterion

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use bandscore_core::metrics::METRICS;
use bandscore_core::rubric::validate_coverage;
use bandscore_core::{
    Criterion, EngineConfig, EssaySubmission, EssayType, JsonRubricProvider, Orchestrator,
    RubricProvider,
};
use bandscore_llm::{check_models, ChatCompletionsClient, Credentials, HttpClientConfig};

#[derive(Parser)]
#[command(name = "bandscore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rubric-driven essay evaluation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "BANDSCORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a submission and print the record as JSON
    Evaluate {
        /// Submission file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Rubric file overriding the configured one
        #[arg(long)]
        rubric: Option<PathBuf>,

        /// Run the quality auditor
        #[arg(long)]
        audit: bool,
    },

    /// Validate configuration, rubric coverage and credentials
    Check,

    /// Print rubric guidance for one criterion
    Rubric {
        /// Criterion name (task, coherence, lexical, grammar)
        #[arg(long)]
        criterion: String,

        /// Essay type code 1-4
        #[arg(long)]
        essay_type: u8,

        /// Print only the descriptor for this whole band
        #[arg(long)]
        band: Option<u8>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal outside local development.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    bandscore_core::telemetry::init_tracing(cli.json_logs, level);

    let result = match cli.command {
        Commands::Evaluate {
            input,
            rubric,
            audit,
        } => cmd_evaluate(cli.config.as_deref(), &input, rubric, audit).await,
        Commands::Check => cmd_check(cli.config.as_deref()),
        Commands::Rubric {
            criterion,
            essay_type,
            band,
        } => cmd_rubric(cli.config.as_deref(), &criterion, essay_type, band),
    };

    METRICS.flush();
    result
}

/// File settings (or defaults), then environment overrides.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn load_rubric(config: &EngineConfig) -> Result<JsonRubricProvider> {
    let rubric = match &config.rubric_path {
        Some(path) => JsonRubricProvider::from_path(path)?,
        None => JsonRubricProvider::bundled()?,
    };
    Ok(rubric)
}

fn read_submission(path: &Path) -> Result<EssaySubmission> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read submission {}", path.display()))?;
    let submission = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid submission JSON in {}", path.display()))?;
    Ok(submission)
}

async fn cmd_evaluate(
    config_path: Option<&Path>,
    input: &Path,
    rubric: Option<PathBuf>,
    audit: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if rubric.is_some() {
        config.rubric_path = rubric;
    }
    if audit {
        config.audit.enabled = true;
    }

    let credentials = Credentials::from_env();
    check_models(&config.models, &credentials)?;
    let client = Arc::new(ChatCompletionsClient::new(
        HttpClientConfig::default(),
        credentials,
    )?);
    let orchestrator = Orchestrator::builder(config)
        .generator(client.clone())
        .image_to_text(client)
        .build()?;

    let submission = read_submission(input)?;
    info!(track_id = %submission.track_id, "Evaluating submission");
    let record = orchestrator
        .evaluate(submission)
        .await
        .context("Evaluation failed")?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn cmd_check(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;
    let rubric = load_rubric(&config)?;
    validate_coverage(&rubric)?;
    check_models(&config.models, &Credentials::from_env())?;

    println!("ok");
    for (capability, spec) in config.models.entries() {
        println!(
            "  {:<18} {} (temperature {})",
            capability.as_str(),
            spec.model,
            spec.temperature
        );
    }
    Ok(())
}

fn cmd_rubric(
    config_path: Option<&Path>,
    criterion: &str,
    essay_type: u8,
    band: Option<u8>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let rubric = load_rubric(&config)?;
    let criterion: Criterion = criterion.parse()?;
    let essay_type = EssayType::from_code(essay_type)?;

    match band {
        Some(band) => println!(
            "{}",
            rubric.target_band_descriptor(criterion, essay_type, band)
        ),
        None => println!("{}", rubric.describe_criterion(criterion, essay_type)?.render()),
    }
    Ok(())
}
