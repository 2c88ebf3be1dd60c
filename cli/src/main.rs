//! pagewise CLI - checkpointed document processing

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use pagewise::pool::{serve_stdio, CommandSpec};
use pagewise::{
    checkpoint_status, Collaborators, Error, ExecutionMode, Pipeline, PipelineConfig,
    PlainTextExtractor, ProcessingStatus, Stage, StageObserver,
};

#[derive(Parser)]
#[command(name = "pagewise")]
#[command(author = "iyulab")]
#[command(version)]
#[command(about = "Checkpointed, resumable page-by-page document processing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a document through every stage
    Run {
        /// Source file (form-feed separated pages) or directory of page files
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// JSON configuration file
        #[arg(short, long, value_name = "FILE", env = "PAGEWISE_CONFIG")]
        config: Option<PathBuf>,

        /// Output directory for checkpoints and unit files
        #[arg(short, long, value_name = "DIR", env = "PAGEWISE_OUTPUT")]
        output: Option<PathBuf>,

        /// Number of extraction workers
        #[arg(short = 'j', long)]
        workers: Option<usize>,

        /// Execution mode for unit extraction
        #[arg(long, value_enum)]
        mode: Option<Mode>,

        /// Cores kept free when sizing the pool
        #[arg(long)]
        reserved_cores: Option<usize>,

        /// Retries per collaborator call
        #[arg(long)]
        max_retries: Option<u32>,

        /// Backoff step between retries, in seconds
        #[arg(long)]
        base_delay: Option<f64>,

        /// Extraction deadline, in seconds
        #[arg(long)]
        unit_timeout: Option<f64>,

        /// Maximum characters per text chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Document id (default: derived from the file name)
        #[arg(long)]
        document_id: Option<String>,

        /// First stage to run (name or number)
        #[arg(long, value_name = "STAGE")]
        from: Option<Stage>,

        /// Print the final schema as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the progress recorded in a checkpoint
    Status {
        /// Checkpoint file
        #[arg(value_name = "CHECKPOINT")]
        checkpoint: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the pipeline stages
    Stages,

    /// Process one unit read from stdin (process-mode child)
    #[command(hide = true)]
    Worker,

    /// Show version information
    Version,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Worker threads (default)
    Thread,
    /// One child process per unit
    Process,
}

impl From<Mode> for ExecutionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Thread => ExecutionMode::Thread,
            Mode::Process => ExecutionMode::Process,
        }
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            source,
            config,
            output,
            workers,
            mode,
            reserved_cores,
            max_retries,
            base_delay,
            unit_timeout,
            chunk_size,
            document_id,
            from,
            json,
        } => build_config(
            config.as_deref(),
            ConfigOverrides {
                output,
                workers,
                mode,
                reserved_cores,
                max_retries,
                base_delay,
                unit_timeout,
                chunk_size,
                document_id,
            },
        )
        .and_then(|config| cmd_run(&source, config, from.unwrap_or(Stage::Populate), json)),
        Commands::Status { checkpoint, json } => cmd_status(&checkpoint, json),
        Commands::Stages => {
            cmd_stages();
            Ok(())
        }
        Commands::Worker => cmd_worker(),
        Commands::Version => {
            cmd_version();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

struct ConfigOverrides {
    output: Option<PathBuf>,
    workers: Option<usize>,
    mode: Option<Mode>,
    reserved_cores: Option<usize>,
    max_retries: Option<u32>,
    base_delay: Option<f64>,
    unit_timeout: Option<f64>,
    chunk_size: Option<usize>,
    document_id: Option<String>,
}

fn build_config(
    file: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match file {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::new(),
    };

    if let Some(dir) = overrides.output {
        config = config.with_output_root(dir);
    }
    if let Some(workers) = overrides.workers {
        config = config.with_max_workers(workers);
    }
    if let Some(mode) = overrides.mode {
        config = config.with_mode(mode.into());
    }
    if let Some(cores) = overrides.reserved_cores {
        config = config.with_reserved_cores(cores);
    }
    if let Some(retries) = overrides.max_retries {
        config = config.with_max_retries(retries);
    }
    if let Some(delay) = overrides.base_delay {
        config = config.with_base_delay_seconds(delay);
    }
    if let Some(timeout) = overrides.unit_timeout {
        config = config.with_unit_timeout_seconds(timeout);
    }
    if let Some(size) = overrides.chunk_size {
        config = config.with_chunk_size(size);
    }
    if let Some(id) = overrides.document_id {
        config = config.with_document_id(id);
    }

    config.validate()?;
    Ok(config)
}

/// Drives a progress bar from stage transitions.
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new() -> Self {
        let bar = ProgressBar::new(Stage::ALL.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl StageObserver for ProgressObserver {
    fn stage_started(&self, stage: Stage) {
        self.bar.set_position(stage.number() as u64 - 1);
        self.bar.set_message(format!("{}...", stage));
    }

    fn stage_skipped(&self, stage: Stage) {
        self.bar.set_position(stage.number() as u64);
        self.bar.set_message(format!("{} (done)", stage));
    }

    fn stage_finished(&self, stage: Stage, status: &ProcessingStatus, error: Option<&Error>) {
        match error {
            Some(_) => self.bar.abandon_with_message(format!("{} failed", stage)),
            None => {
                self.bar.set_position(stage.number() as u64);
                self.bar.set_message(format!(
                    "{} ({:.2}%)",
                    stage, status.completion_percentage
                ));
            }
        }
    }
}

fn cmd_run(
    source: &Path,
    config: PipelineConfig,
    from: Stage,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut extractor = PlainTextExtractor::new();
    if config.mode == ExecutionMode::Process {
        extractor = extractor.with_command(CommandSpec::current_exe(["worker"])?);
    }

    let observer = Arc::new(ProgressObserver::new());
    let pipeline = Pipeline::new(config)
        .with_collaborators(Collaborators::default().with_extractor(Arc::new(extractor)))
        .with_observer(observer.clone());

    let document_id = pipeline.document_id_for(source);
    let checkpoint = pipeline.store().location_for(&document_id);
    let outcome = pipeline.process_file_from(source, from);

    let schema = match outcome {
        Ok(schema) => schema,
        Err(e) => {
            if checkpoint.exists() {
                eprintln!(
                    "{} {}",
                    "Checkpoint saved to".yellow(),
                    checkpoint.display()
                );
            }
            return Err(e.into());
        }
    };
    observer.bar.finish_with_message("Done!");

    if json {
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let summary = &schema.document_summary;
    let failed: Vec<String> = summary.failed_units().map(|u| u.index.to_string()).collect();

    println!("\n{}", "Result".green().bold());
    println!("  {} {}", "├─ Document:".dimmed(), schema.document_id);
    println!("  {} {}", "├─ Units:".dimmed(), summary.page_count);
    if !failed.is_empty() {
        println!(
            "  {} {}",
            "├─ Failed units:".dimmed(),
            failed.join(", ").yellow()
        );
    }
    println!("  {} {}", "├─ Elements:".dimmed(), schema.element_count());
    println!("  {} {}", "├─ Chapters:".dimmed(), schema.chapter_summaries.len());
    println!(
        "  {} {:.2}%",
        "├─ Completion:".dimmed(),
        schema.processing_status.completion_percentage
    );
    println!("  {} {}", "└─ Checkpoint:".dimmed(), checkpoint.display());

    Ok(())
}

fn cmd_status(checkpoint: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let status = checkpoint_status(checkpoint)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Checkpoint Status".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());
    println!("{}: {}", "File".bold(), status.path.display());
    println!("{}: {}", "Document".bold(), status.document_id);
    println!("{}: {}", "Schema".bold(), status.schema_version);
    println!("{}: {}", "Stage".bold(), status.processing_status.current_stage);
    println!(
        "{}: {:.2}%",
        "Completion".bold(),
        status.processing_status.completion_percentage
    );
    println!("{}: {}", "Units".bold(), status.page_count);
    if !status.failed_units.is_empty() {
        let failed: Vec<String> = status.failed_units.iter().map(u32::to_string).collect();
        println!("{}: {}", "Failed units".bold(), failed.join(", ").yellow());
    }
    if let Some(message) = &status.processing_status.error_message {
        println!("{}: {}", "Last error".bold(), message.red());
    }

    println!();
    println!("{}", "Stages".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());
    for progress in &status.stages {
        let mark = if progress.complete {
            "✓".green()
        } else {
            "·".dimmed()
        };
        println!(
            "  {} {}. {:<22} {:>5.1}%",
            mark,
            progress.stage.number(),
            progress.stage.name(),
            progress.fraction * 100.0
        );
    }

    Ok(())
}

fn cmd_stages() {
    println!("{}", "Pipeline Stages".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());
    for stage in Stage::ALL {
        println!("  {}. {}", stage.number(), stage.name());
    }
}

fn cmd_worker() -> Result<(), Box<dyn std::error::Error>> {
    serve_stdio(&PlainTextExtractor::new())?;
    Ok(())
}

fn cmd_version() {
    println!("{} {}", "pagewise".cyan().bold(), env!("CARGO_PKG_VERSION"));
    println!("Checkpointed document processing tool");
    println!();
    println!("Repository: {}", "https://github.com/iyulab/pagewise".dimmed());
    println!("License: MIT");
}
