//! Prompt Format Eval CLI
//!
//! Runs sentiment sweeps, scores repeated runs and builds cross-model reports.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use prompt_format_eval::report::ReportBuilder;
use prompt_format_eval::results::{save_accuracy, save_reproducibility};
use prompt_format_eval::{
    load_prompts, renderer_for, AgreementScorer, AlignedRuns, ExperimentConfig, ExperimentRunner,
    GoldAnswers, HttpCompletionClient, Label, MetricsLayout, MetricsSource, PromptFormat,
    RendererKind, RunTable, ScoringConfig, ShotPool, StatConfig,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prompt-format-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sweep of prompts × shot levels × formats
    Run {
        /// Experiment configuration (YAML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Sentences to classify (CSV with id,prompt)
        #[arg(long)]
        prompts: PathBuf,

        /// Few-shot pool (CSV with input,output)
        #[arg(long)]
        shots: PathBuf,

        /// Run table to write (rewritten after every row)
        #[arg(long)]
        output: PathBuf,

        /// Completion endpoint (overrides config)
        #[arg(long)]
        endpoint: Option<String>,

        /// Model name (overrides config)
        #[arg(long)]
        model: Option<String>,

        /// Pause after each request in milliseconds (overrides config)
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Score repeated runs of one model
    Score {
        /// Model name used in the output layout
        #[arg(long)]
        model: String,

        /// Run tables to score
        #[arg(long, num_args = 1..)]
        runs: Vec<PathBuf>,

        /// Glob pattern selecting run tables
        #[arg(long)]
        runs_glob: Option<String>,

        /// Gold answers (CSV, label in last column)
        #[arg(long)]
        gold: PathBuf,

        /// Root under which results/<model>/... is written
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Experiment configuration providing the override rules
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Build the cross-model statistics report
    Report {
        /// Results directory or zip archive
        #[arg(long)]
        input: PathBuf,

        /// Models to include
        #[arg(long, value_delimiter = ',', required = true)]
        models: Vec<String>,

        /// Output directory
        #[arg(long, default_value = "output")]
        output: PathBuf,

        /// Significance threshold
        #[arg(long, default_value = "0.05")]
        alpha: f64,
    },

    /// Print a rendered prompt
    Render {
        /// Sentence to classify
        #[arg(long)]
        sentence: String,

        /// Few-shot pool (CSV with input,output)
        #[arg(long)]
        shots: Option<PathBuf>,

        /// Number of examples to include
        #[arg(long, default_value = "0")]
        shot: usize,

        /// Prompt format
        #[arg(long, default_value = "text")]
        format: PromptFormat,

        /// Escape values for their format
        #[arg(long)]
        escaped: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let result = match cli.command {
        Commands::Run {
            config,
            prompts,
            shots,
            output,
            endpoint,
            model,
            delay_ms,
        } => run_sweep(
            config.as_deref(),
            &prompts,
            &shots,
            &output,
            endpoint,
            model,
            delay_ms,
        ),
        Commands::Score {
            model,
            runs,
            runs_glob,
            gold,
            out_dir,
            config,
        } => score(
            &model,
            runs,
            runs_glob.as_deref(),
            &gold,
            &out_dir,
            config.as_deref(),
        ),
        Commands::Report {
            input,
            models,
            output,
            alpha,
        } => report(&input, &models, &output, alpha),
        Commands::Render {
            sentence,
            shots,
            shot,
            format,
            escaped,
        } => render(&sentence, shots.as_deref(), shot, format, escaped),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<ExperimentConfig> {
    path.map_or_else(
        || Ok(ExperimentConfig::default()),
        |p| {
            ExperimentConfig::load(p)
                .with_context(|| format!("Failed to load config {}", p.display()))
        },
    )
}

fn run_sweep(
    config: Option<&Path>,
    prompts: &Path,
    shots: &Path,
    output: &Path,
    endpoint: Option<String>,
    model: Option<String>,
    delay_ms: Option<u64>,
) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(endpoint) = endpoint {
        config.completion.endpoint = endpoint;
    }
    if let Some(model) = model {
        config.completion.model = model;
    }
    if let Some(delay) = delay_ms {
        config.sweep.request_delay_ms = delay;
    }
    config.validate()?;

    let prompts = load_prompts(prompts)?;
    let pool = ShotPool::load(shots)?;
    let client = HttpCompletionClient::new(&config.completion)?;
    tracing::info!(
        endpoint = %client.endpoint(),
        model = %config.completion.model,
        "Using completion endpoint"
    );

    let runner = ExperimentRunner::new(&config, client);
    let table = runner.run(&prompts, &pool, output)?;

    println!("Wrote {} rows to {}", table.len(), output.display());
    for label in [
        Label::Positive,
        Label::Negative,
        Label::Neutral,
        Label::Unknown,
    ] {
        let count = table.iter().filter(|r| r.label == label).count();
        println!("  {:<9} {count}", label.as_str());
    }
    Ok(())
}

fn score(
    model: &str,
    mut runs: Vec<PathBuf>,
    runs_glob: Option<&str>,
    gold: &Path,
    out_dir: &Path,
    config: Option<&Path>,
) -> Result<()> {
    if let Some(pattern) = runs_glob {
        let mut matched: Vec<PathBuf> = glob::glob(pattern)
            .with_context(|| format!("Invalid glob pattern {pattern}"))?
            .collect::<Result<_, _>>()?;
        matched.sort();
        runs.extend(matched);
    }
    if runs.is_empty() {
        bail!("No run tables given (use --runs or --runs-glob)");
    }

    let scoring: ScoringConfig = load_config(config)?.scoring;
    let tables = runs
        .iter()
        .map(|p| RunTable::load(p).with_context(|| format!("Failed to load {}", p.display())))
        .collect::<Result<Vec<_>>>()?;
    tracing::info!(model, runs = tables.len(), "Scoring runs");

    let aligned = AlignedRuns::align(&tables)?;
    let gold = GoldAnswers::load(gold)?;
    let scorer = AgreementScorer::from_config(&scoring);
    let accuracy = scorer.score_accuracy(&aligned, &gold)?;
    let reproducibility = scorer.score_reproducibility(&aligned)?;

    let layout = MetricsLayout::new(model);
    let acc_path = out_dir.join(layout.accuracy_path());
    let rep_path = out_dir.join(layout.reproducibility_path());
    save_accuracy(&acc_path, &accuracy)?;
    save_reproducibility(&rep_path, &reproducibility)?;

    let unknown = accuracy
        .iter()
        .filter(|r| r.accuracy.value().is_none())
        .count();
    println!(
        "Scored {} cells across {} runs ({unknown} with unknown accuracy)",
        accuracy.len(),
        aligned.run_count()
    );
    println!("  {}", acc_path.display());
    println!("  {}", rep_path.display());
    Ok(())
}

fn report(input: &Path, models: &[String], output: &Path, alpha: f64) -> Result<()> {
    let source = MetricsSource::detect(input)?;
    let rows = source.load(models)?;
    let report = ReportBuilder::new(rows)
        .with_stat_config(StatConfig {
            alpha,
            ..StatConfig::default()
        })
        .with_source(input.display().to_string())
        .build()?;

    let written = report.write_outputs(output)?;
    println!("Report written to {}", output.display());
    for path in written {
        println!("  {}", path.display());
    }
    Ok(())
}

fn render(
    sentence: &str,
    shots: Option<&Path>,
    shot: usize,
    format: PromptFormat,
    escaped: bool,
) -> Result<()> {
    let pool = match shots {
        Some(path) => ShotPool::load(path)?,
        None if shot == 0 => ShotPool::new(Vec::new()),
        None => bail!("--shots is required when --shot is greater than 0"),
    };
    let kind = if escaped {
        RendererKind::Escaped
    } else {
        RendererKind::Template
    };
    let prompt = renderer_for(kind).render(sentence, pool.take(shot)?, format);
    println!("{prompt}");
    Ok(())
}
