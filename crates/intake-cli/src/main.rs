//! Intake CLI
//!
//! - `process`: page images / PDFs → validated extraction → change set snapshot
//! - `show`: render a snapshot for review
//! - `apply`: write the approved parts of a reviewed snapshot to the Record Store
//! - `validate`: re-run the rule engine over an extraction JSON file
//! - `types`: list the known document types and their field mappings
//!
//! Review happens between `process` and `apply` by editing the snapshot JSON
//! (approvals, overrides, family actions, history dispositions). Setting
//! `"review": "discard"` makes `apply` a no-op.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use intake_extract::Validator;
use intake_model::persistence::{load_snapshot, save_snapshot};
use intake_model::{Extraction, ReviewDecision, SchemaRegistry};
use intake_reconcile::{ApplyEngine, DiffEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod process;
mod review;

#[derive(Parser)]
#[command(name = "intake")]
#[command(author, version, about = "Intake: document extraction and record reconciliation")]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence when set)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract documents and write one change set snapshot per document.
    Process {
        /// Image files, page-image directories or PDFs
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output directory for snapshots
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        /// Document type key (skips detection), e.g. `passport` or `questionnaire_589`
        #[arg(long = "type")]
        document_type: Option<String>,
        /// Single direct-schema pass, no critique/retry/refinement
        #[arg(long)]
        basic: bool,
        /// Extraction strategy (repeatable): direct, narrative, section
        #[arg(long = "strategy")]
        strategies: Vec<String>,
        /// Documents processed concurrently
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,
        /// Use the in-memory Record Store instead of INTAKE_STORE_URL
        #[arg(long)]
        offline: bool,
        /// JSON store fixture for --offline
        #[arg(long)]
        fixture: Option<PathBuf>,
        /// Identifier cache (overrides INTAKE_IDENTIFIER_CACHE)
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Answer oracle prompts from a replay script instead of a provider
        #[arg(long)]
        replay: Option<PathBuf>,
        /// Also write `<name>.extraction.json`
        #[arg(long)]
        save_extraction: bool,
    },

    /// Render a change set snapshot.
    Show {
        snapshot: PathBuf,
        /// Print the raw JSON instead
        #[arg(long)]
        json: bool,
    },

    /// Apply a reviewed change set snapshot. Without --confirm only the plan is shown.
    Apply {
        snapshot: PathBuf,
        /// Actually write to the Record Store
        #[arg(long)]
        confirm: bool,
        #[arg(long)]
        offline: bool,
        #[arg(long)]
        fixture: Option<PathBuf>,
        /// With --offline --fixture: write the resulting store state back to the fixture
        #[arg(long)]
        save_fixture: bool,
    },

    /// Validate an extraction JSON file. Fails when blocking issues remain.
    Validate {
        extraction: PathBuf,
        /// Reference date for age checks (default: today)
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// List document types.
    Types {
        /// Include each type's fields and Record Store mapping
        #[arg(long)]
        fields: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "debug"
    } else {
        "warn,intake=info,intake_extract=info,intake_reconcile=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let registry = Arc::new(SchemaRegistry::standard());

    match cli.command {
        Commands::Process {
            inputs,
            out,
            document_type,
            basic,
            strategies,
            jobs,
            offline,
            fixture,
            cache,
            replay,
            save_extraction,
        } => {
            if let Some(key) = document_type.as_deref() {
                if registry.document_type(key).is_none() {
                    return Err(anyhow!("unknown document type '{key}' (see `intake types`)"));
                }
            }
            // Everything that can fail on configuration fails here, before any document.
            let oracle = config::oracle(replay.as_deref())?;
            let pipeline_config = config::pipeline_config(basic, &strategies)?;
            let diff_config = config::diff_config()?;
            let cache = config::identifier_cache(cache.as_deref())?;
            let backend = config::StoreBackend::connect(offline, fixture.as_deref()).await?;

            let ctx = process::ProcessContext {
                oracle,
                registry: registry.clone(),
                pipeline_config,
                diff: Arc::new(DiffEngine::new(backend.store(), registry, cache, diff_config)),
                document_type,
                out_dir: out,
                save_extraction,
            };
            process::run(ctx, inputs, jobs).await?;
        }

        Commands::Show { snapshot, json } => {
            let change_set = load_snapshot(&snapshot)?;
            if json {
                println!("{}", intake_model::persistence::to_json(&change_set)?);
            } else {
                print!("{}", review::render_change_set(&change_set));
            }
        }

        Commands::Apply {
            snapshot,
            confirm,
            offline,
            fixture,
            save_fixture,
        } => {
            let mut change_set = load_snapshot(&snapshot)?;
            if change_set.review() == ReviewDecision::Discard {
                eprintln!("{} review discarded; nothing applied", "info:".yellow().bold());
                return Ok(());
            }
            print!("{}", review::render_plan(&change_set));
            if !confirm {
                eprintln!("{} dry run; pass --confirm to write", "info:".yellow().bold());
                return Ok(());
            }

            let backend = config::StoreBackend::connect(offline, fixture.as_deref()).await?;
            let engine = ApplyEngine::new(backend.store(), registry);
            change_set.set_review(ReviewDecision::Proceed);
            let report = engine.apply(&mut change_set).await;
            print!("{}", review::render_report(&report));

            // Created ids go back into the snapshot so a re-run does not duplicate records.
            save_snapshot(&snapshot, &change_set)?;
            if save_fixture {
                if let Some(path) = backend.save_fixture()? {
                    eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
                }
            }
            if !report.success() {
                return Err(anyhow!("apply finished with {} error(s)", report.errors.len()));
            }
        }

        Commands::Validate { extraction, today } => {
            let text = std::fs::read_to_string(&extraction)
                .with_context(|| format!("reading {}", extraction.display()))?;
            let parsed: Extraction =
                serde_json::from_str(&text).with_context(|| format!("parsing {}", extraction.display()))?;
            let pipeline_config = config::pipeline_config(false, &[])?;
            let validator = Validator::new(registry, pipeline_config.confidence_floor);
            let today = today.unwrap_or_else(|| chrono::Local::now().date_naive());
            let report = validator.validate(&parsed, today);

            let mut out = String::new();
            review::render_issues(&mut out, &report.issues);
            print!("{out}");
            println!(
                "{} blocking, {} advisory, {} informational",
                report.blocking_count(),
                report.advisory_count(),
                report.informational_count()
            );
            if !report.is_valid() {
                return Err(anyhow!("{} blocking issue(s)", report.blocking_count()));
            }
            println!("{}", "Valid.".green());
        }

        Commands::Types { fields } => {
            print!("{}", review::render_types(&registry, fields));
        }
    }
    Ok(())
}
