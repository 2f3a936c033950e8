//! hercule CLI: outbreak surveillance to knowledge graph.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;

use hercule::cache::{ArtifactCache, RunDate};
use hercule::config::{DEFAULT_CONFIG_FILE, HerculeConfig};
use hercule::learner::PredictionFile;
use hercule::pipeline::{self, Pipeline, RunContext, RunOptions, RunOutcome};
use hercule::registry::DiseaseRegistry;
use hercule::sync::SyncMode;

#[derive(Parser)]
#[command(
    name = "hercule",
    version,
    about = "Outbreak surveillance to knowledge graph"
)]
struct Cli {
    /// Config file (TOML). Defaults to ./hercule.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root directory of the artifact cache.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Disease registry: a JSON file or a directory of JSON files.
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file with every default filled in.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Extract, fuse and synchronize one run.
    Run {
        /// Run date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        run_date: Option<RunDate>,

        /// Ignore cached triples for the run date.
        #[arg(long)]
        force_refresh: bool,

        /// Stop after fusion without contacting the graph store.
        #[arg(long)]
        dry_run: bool,

        /// Oldest year a record may have to be considered.
        #[arg(long)]
        min_year: Option<i32>,

        /// Upsert on top of the existing graph instead of replacing it.
        #[arg(long)]
        merge: bool,

        /// Predictions file to upload after the sync.
        #[arg(long)]
        predictions: Option<PathBuf>,
    },

    /// Inspect the artifact cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage predicted edges.
    Predictions {
        #[command(subcommand)]
        action: PredictionAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show which artifacts exist for a run date.
    Status {
        /// Run date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        run_date: Option<RunDate>,
    },
}

#[derive(Subcommand)]
enum PredictionAction {
    /// Upload a predictions file (match-only, existing nodes).
    Upload {
        /// JSON array of {subject, object, score}.
        #[arg(long)]
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cli_config = cli.config.clone();

    let mut config = match (&cli.command, cli.config.as_deref()) {
        // `init` may target a file that does not exist yet.
        (Commands::Init { .. }, Some(path)) if !path.exists() => HerculeConfig::default(),
        (_, explicit) => HerculeConfig::resolve(explicit)?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(registry) = cli.registry {
        config.registry = registry;
    }

    match cli.command {
        Commands::Init { force } => {
            let path = cli_config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            if path.exists() && !force {
                miette::bail!(
                    "{} already exists; pass --force to overwrite it",
                    path.display()
                );
            }
            // Credentials from the environment are not written out.
            config.graph.user = None;
            config.graph.password = None;
            config.save(&path)?;
            println!("Wrote {}", path.display());
        }

        Commands::Run {
            run_date,
            force_refresh,
            dry_run,
            min_year,
            merge,
            predictions,
        } => {
            let registry = DiseaseRegistry::load(&config.registry)?;
            let mut pipeline = Pipeline::from_config(&config, registry, dry_run)?;
            if let Some(file) = predictions {
                pipeline = pipeline.with_learner(PredictionFile::new(file));
            }

            let options = RunOptions {
                run_date: run_date.unwrap_or_else(RunDate::today),
                force_refresh,
                dry_run,
                min_year: min_year.unwrap_or(config.min_year),
                sync_mode: if merge {
                    SyncMode::Merge
                } else {
                    config.graph.mode
                },
            };
            let report = pipeline.run(options)?;

            println!("Run {}:", report.run_date);
            println!(
                "  source:       {}",
                if report.from_cache { "cache" } else { "feed" }
            );
            println!("  diseases:     {}", report.diseases_scanned);
            println!("  fetches:      {}", report.feed_fetches);
            println!("  surveillance: {}", report.surveillance_triples);
            println!("  biomedical:   {}", report.biomedical_triples);
            println!("  fused:        {}", report.fused_triples);
            if report.predictions_uploaded > 0 {
                println!("  predictions:  {}", report.predictions_uploaded);
            }
            let outcome = match report.outcome {
                RunOutcome::Synced => "synchronized to graph store",
                RunOutcome::DryRun => "dry run, graph store untouched",
                RunOutcome::NoSurveillance => "no surveillance triples, nothing fused",
            };
            println!("  outcome:      {outcome}");
        }

        Commands::Cache { action } => match action {
            CacheAction::Status { run_date } => {
                let run_date = run_date.unwrap_or_else(RunDate::today);
                let cache = ArtifactCache::new(config.data_dir.clone());
                let status = cache.status(run_date)?;
                println!(
                    "Cache {} at {}: {}",
                    run_date,
                    cache.base_dir().display(),
                    if status.is_complete() {
                        "complete (extraction will be skipped)"
                    } else {
                        "empty"
                    }
                );
                println!("  raw snapshots ({}):", status.raw.len());
                for path in &status.raw {
                    println!("    {}", path.display());
                }
                println!("  triple files ({}):", status.triples.len());
                for path in &status.triples {
                    println!("    {}", path.display());
                }
            }
        },

        Commands::Predictions { action } => match action {
            PredictionAction::Upload { file } => {
                let client = pipeline::sync_client(&config)?;
                let edges = PredictionFile::new(file.clone()).read()?;
                let ctx = RunContext::new(RunDate::today());
                client.upload_predictions(&ctx, &edges)?;
                println!("Uploaded {} predicted edges from {}", edges.len(), file.display());
            }
        },
    }

    Ok(())
}
