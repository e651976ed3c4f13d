//! `repcount` command line
//!
//! - `repcount count <VIDEO> --exercise <ID>` - count repetitions in a video
//! - `repcount exercises` - list supported exercise identifiers
//! - `repcount history --exercise <ID>` - show recorded results
//! - `repcount progress log|last|history` - training log (weight, reps, sets)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use repcount::core::database::Database;
use repcount::core::model_store::ModelRegistry;
use repcount::core::rep_service::build_pipeline;
use repcount::core::result_sink::SqliteResultSink;
use repcount::{Config, ProgressionEntry, RepCountService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "repcount")]
#[command(about = "Count exercise repetitions in recorded videos", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: ~/.repcount/config/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count repetitions in a video
    Count {
        #[arg(name = "VIDEO")]
        video: PathBuf,

        /// Exercise identifier (see `repcount exercises`)
        #[arg(long)]
        exercise: String,

        /// Record the result in the history database
        #[arg(long)]
        store: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List supported exercises
    Exercises,

    /// Show recorded results for an exercise, newest first
    History {
        #[arg(long)]
        exercise: String,

        #[arg(long, default_value_t = 10)]
        limit: u32,
    },

    /// Training log: weight, reps and sets per exercise
    Progress {
        #[command(subcommand)]
        action: ProgressCommand,
    },
}

#[derive(Subcommand)]
enum ProgressCommand {
    /// Log a training set
    Log {
        #[arg(long)]
        exercise: String,

        /// Weight lifted in kg
        #[arg(long)]
        weight: f64,

        #[arg(long)]
        reps: u32,

        #[arg(long)]
        sets: u32,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Show the latest logged set for an exercise
    Last {
        #[arg(long)]
        exercise: String,

        #[arg(long)]
        json: bool,
    },

    /// Show logged sets for an exercise, newest first
    History {
        #[arg(long)]
        exercise: String,

        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout carries results; logs go to stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    config.context("Failed to load configuration")
}

async fn open_sink(config: &Config) -> Result<SqliteResultSink> {
    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    Ok(SqliteResultSink::new(db))
}

fn format_millis(millis: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn print_progression(entry: &ProgressionEntry) {
    println!(
        "{}  {:>7.2} kg  {} x {}  {}",
        format_millis(entry.recorded_at),
        entry.weight_kg,
        entry.sets,
        entry.reps,
        entry.notes.as_deref().unwrap_or("")
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Count {
            video,
            exercise,
            store,
            json,
        } => {
            if store {
                let sink = open_sink(&config).await?;
                let service = RepCountService::from_config(config, Arc::new(sink));
                let record = service
                    .count_file(&video, &exercise)
                    .await
                    .with_context(|| format!("Failed to count {}", video.display()))?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                } else {
                    println!("{} repetitions of {} (recorded as {})", record.reps, exercise, record.id);
                }
            } else {
                let pipeline = build_pipeline(&config);
                let exercise_id = exercise.clone();
                let path = video.clone();
                let summary = tokio::task::spawn_blocking(move || pipeline.process_with_summary(&path, &exercise_id))
                    .await?
                    .with_context(|| format!("Failed to count {}", video.display()))?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                } else {
                    println!(
                        "{} repetitions of {} ({} frames, {} without pose)",
                        summary.reps, exercise, summary.frames_total, summary.frames_without_pose
                    );
                }
            }
        }

        Commands::Exercises => {
            for exercise in ModelRegistry::builtin(config.model_dir).supported_exercises() {
                println!("{}", exercise);
            }
        }

        Commands::History { exercise, limit } => {
            let sink = open_sink(&config).await?;
            let records = sink.recent(&exercise, limit).await?;
            if records.is_empty() {
                println!("No results recorded for {}", exercise);
                return Ok(());
            }

            for record in &records {
                println!("{}  {:>4}  {}", format_millis(record.processed_at), record.reps, record.filename);
            }
            println!("Total: {} repetitions", sink.total_reps(&exercise).await?);
        }

        Commands::Progress { action } => {
            let sink = open_sink(&config).await?;
            match action {
                ProgressCommand::Log {
                    exercise,
                    weight,
                    reps,
                    sets,
                    notes,
                } => {
                    let entry = ProgressionEntry::new(&exercise, weight, reps, sets, notes.as_deref());
                    sink.record_progression(&entry)
                        .await
                        .context("Failed to log progression")?;
                    println!("Logged {} kg, {} x {} for {}", entry.weight_kg, entry.sets, entry.reps, exercise);
                }
                ProgressCommand::Last { exercise, json } => match sink.last_progression(&exercise).await? {
                    Some(entry) if json => println!("{}", serde_json::to_string_pretty(&entry)?),
                    Some(entry) => print_progression(&entry),
                    None => println!("No progression entries for {}", exercise),
                },
                ProgressCommand::History { exercise, limit } => {
                    let entries = sink.progression_history(&exercise, limit).await?;
                    if entries.is_empty() {
                        println!("No progression entries for {}", exercise);
                    }
                    for entry in &entries {
                        print_progression(entry);
                    }
                }
            }
        }
    }

    Ok(())
}
