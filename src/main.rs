mod db;
mod deck;
mod error;
mod merge;
mod script;
mod settings;
mod source;
mod sync;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::db::{DocumentStore, SqliteStore};
use crate::deck::resolver::{ApiLookup, CardInfoResolver, CardLookup, OfflineLookup};
use crate::deck::DeckList;
use crate::settings::{FunctionMode, Settings};
use crate::source::RepoLocation;

#[derive(Parser)]
#[command(name = "ignis_sync", about = "Project Ignis card scripts → card store")]
struct Cli {
    /// Settings file (default: ./ignis.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Card store path, overrides the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone/pull the scripts repository and upsert every changed card
    Sync {
        /// Git URL or local checkout (default: configured repo)
        #[arg(short, long)]
        repo: Option<String>,
        /// Only keep the conventional effect functions
        #[arg(long)]
        named_functions: bool,
    },
    /// Parse a deck list and show its cards per section
    Deck {
        file: PathBuf,
        /// Do not call the card info API; use stored data only
        #[arg(long)]
        offline: bool,
    },
    /// Print one stored card as JSON
    Show { id: i64 },
    /// Show store counts and recent sync runs
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    // an unreachable store stops the run before any work
    let store = db::connect(&settings.db_path)?;
    store
        .init_schema()
        .with_context(|| format!("Failed to set up schema in {:?}", settings.db_path))?;

    let result = match cli.command {
        Commands::Sync { repo, named_functions } => {
            if let Some(repo) = repo {
                settings.repo = repo;
            }
            if named_functions {
                settings.function_mode = FunctionMode::Named;
            }
            run_sync(&store, &settings)
        }
        Commands::Deck { file, offline } => {
            let bytes =
                std::fs::read(&file).with_context(|| format!("Failed to read deck {:?}", file))?;
            let list = deck::parse_bytes(&bytes);
            if offline {
                show_deck(&store, OfflineLookup, &list).await
            } else {
                let timeout = Duration::from_secs(settings.api_timeout_secs);
                let lookup = ApiLookup::new(&settings.api_base, timeout)
                    .context("Failed to build HTTP client")?;
                show_deck(&store, lookup, &list).await
            }
        }
        Commands::Show { id } => {
            match store.find_card(id)? {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
                None => println!("No card {} in store.", id),
            }
            Ok(())
        }
        Commands::Stats => {
            let s = store.get_stats()?;
            println!("Cards:      {}", s.cards);
            println!("Named:      {}", s.named);
            println!("Functions:  {}", s.functions);
            println!("Enriched:   {}", s.enriched);
            println!("Sync runs:  {}", s.runs);

            let runs = store.recent_runs(5)?;
            if !runs.is_empty() {
                println!("\n--- Recent runs ---");
                for r in &runs {
                    println!(
                        "  {} | +{} ~{} ={} !{} | {}",
                        r.finished_at, r.inserted, r.updated, r.skipped, r.errors, r.source
                    );
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn run_sync(store: &SqliteStore, settings: &Settings) -> anyhow::Result<()> {
    let started = chrono::Utc::now();
    let location = RepoLocation::parse(&settings.repo);
    let root = match source::prepare_repo(&location, &settings.clone_dir) {
        Ok(root) => root,
        Err(e) => {
            // without a checkout the directory check below fails the run
            warn!("{}", e);
            settings.clone_dir.clone()
        }
    };

    let dir = source::scripts_dir(&root, &settings.scripts_subdir)?;
    let files = source::list_scripts(&dir, &settings.script_ext)?;
    if files.is_empty() {
        println!("No .{} scripts found in {:?}.", settings.script_ext, dir);
    } else {
        println!("Found {} scripts in {:?}. Processing...", files.len(), dir);
    }
    let pb = sync::progress_bar(files.len());
    let report = sync::run_batch(
        store,
        &files,
        &settings.function_filter(),
        settings.log_tail,
        &pb,
    );

    report.print();
    println!("\n--- Recent log entries ---");
    for line in report.tail() {
        println!("  {}", line);
    }

    store
        .record_run(&report.to_run_row(started, &dir))
        .context("Failed to record sync run")?;
    Ok(())
}

async fn show_deck<L: CardLookup>(
    store: &SqliteStore,
    lookup: L,
    list: &DeckList,
) -> anyhow::Result<()> {
    let mut resolver = CardInfoResolver::new(store, lookup);
    let infos = resolver.resolve_all(&list.unique_ids()).await;
    for (title, ids) in list.sections() {
        deck::present::print_section(title, ids, infos);
    }
    if resolver.placeholders > 0 {
        println!("\n{} card(s) could not be resolved.", resolver.placeholders);
    }
    Ok(())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
