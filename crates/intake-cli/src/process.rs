//! `intake process`: documents → change set snapshots.
//!
//! Documents run concurrently up to `--jobs`; each task owns its pipeline
//! and change set. Nothing is written to the Record Store here.

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use intake_extract::{DocumentLoader, ExtractionOracle, FileLoader, PdfToPpm, Pipeline, PipelineConfig};
use intake_model::persistence::save_snapshot;
use intake_model::{ChangeSet, DocumentProvenance, SchemaRegistry};
use intake_reconcile::DiffEngine;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Shared, read-only inputs for every document task.
pub struct ProcessContext {
    pub oracle: Arc<dyn ExtractionOracle>,
    pub registry: Arc<SchemaRegistry>,
    pub pipeline_config: PipelineConfig,
    pub diff: Arc<DiffEngine>,
    pub document_type: Option<String>,
    pub out_dir: PathBuf,
    pub save_extraction: bool,
}

#[derive(Debug)]
pub struct DocumentSummary {
    pub source: PathBuf,
    pub snapshot: PathBuf,
    pub document_type: String,
    pub changes: usize,
    pub blocking: usize,
    pub notes: usize,
}

fn file_part(source: &Path, stem_only: bool) -> String {
    let part = if stem_only { source.file_stem() } else { source.file_name() };
    part.and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document")
        .to_string()
}

/// One output name per input, unique within the batch.
///
/// The file stem is used when no other input shares it. Shared stems fall
/// back to the full file name (`scan.png`, `scan.pdf`); names still taken
/// get `-2`, `-3`, ... in input order.
pub fn output_names(inputs: &[PathBuf]) -> Vec<String> {
    let mut stems: HashMap<String, usize> = HashMap::new();
    for source in inputs {
        *stems.entry(file_part(source, true)).or_default() += 1;
    }

    let mut taken = HashSet::new();
    inputs
        .iter()
        .map(|source| {
            let stem = file_part(source, true);
            let base = if stems.get(&stem).copied().unwrap_or(0) > 1 {
                file_part(source, false)
            } else {
                stem
            };
            let mut name = base.clone();
            let mut n = 2;
            while !taken.insert(name.clone()) {
                name = format!("{base}-{n}");
                n += 1;
            }
            name
        })
        .collect()
}

/// `scan` → `<out>/scan.changeset.json`.
pub fn snapshot_path(out_dir: &Path, name: &str, suffix: &str) -> PathBuf {
    out_dir.join(format!("{name}.{suffix}.json"))
}

async fn process_document(ctx: Arc<ProcessContext>, source: PathBuf, name: String) -> Result<DocumentSummary> {
    let loader = FileLoader::with_renderer(Arc::new(PdfToPpm::default()));
    let document = loader
        .load(&source)
        .await
        .with_context(|| format!("loading {}", source.display()))?;
    tracing::info!(document = %source.display(), pages = document.pages.len(), "document loaded");

    let pipeline = Pipeline::new(ctx.oracle.clone(), ctx.registry.clone(), ctx.pipeline_config.clone());
    let outcome = pipeline.process(&document.pages, ctx.document_type.as_deref()).await;

    let provenance = DocumentProvenance {
        source: source.display().to_string(),
        document_type: outcome.extraction.document_type.clone(),
        questionnaire_type: outcome.extraction.questionnaire_type.clone(),
        page_count: document.pages.len(),
        sha256: Some(document.sha256.clone()),
    };

    let mut change_set = match &outcome.structural_error {
        Some(message) => {
            let mut builder = ChangeSet::builder(provenance).extraction_confidence(outcome.extraction.confidence);
            builder.push_error(message.clone());
            builder.build()
        }
        None => ctx.diff.diff(&outcome.extraction, provenance).await,
    };
    change_set.attach_validation(outcome.report.issues.clone());
    change_set.attach_metrics(outcome.metrics.clone());

    let snapshot = snapshot_path(&ctx.out_dir, &name, "changeset");
    save_snapshot(&snapshot, &change_set)?;
    if ctx.save_extraction {
        let path = snapshot_path(&ctx.out_dir, &name, "extraction");
        let json = serde_json::to_string_pretty(&outcome.extraction)?;
        std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    }

    Ok(DocumentSummary {
        source,
        snapshot,
        document_type: change_set.provenance().document_type.clone(),
        changes: change_set.total_changes(),
        blocking: outcome.report.blocking_count(),
        notes: change_set.errors().len(),
    })
}

pub async fn run(ctx: ProcessContext, inputs: Vec<PathBuf>, jobs: usize) -> Result<()> {
    std::fs::create_dir_all(&ctx.out_dir).with_context(|| format!("creating {}", ctx.out_dir.display()))?;
    let ctx = Arc::new(ctx);
    let permits = Arc::new(Semaphore::new(jobs.max(1)));
    let total = inputs.len();
    let names = output_names(&inputs);

    let mut tasks = JoinSet::new();
    for (source, name) in inputs.into_iter().zip(names) {
        let ctx = ctx.clone();
        let permits = permits.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|e| anyhow!(e))?;
            let label = source.clone();
            process_document(ctx, source, name).await.map_err(|e| e.context(label.display().to_string()))
        });
    }

    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined.map_err(|e| anyhow!(e)).and_then(|r| r) {
            Ok(summary) => {
                let blocking = if summary.blocking > 0 {
                    format!("{} blocking", summary.blocking).red().bold().to_string()
                } else {
                    "valid".green().to_string()
                };
                println!(
                    "{} {} [{}] {} change(s), {}, {} note(s) → {}",
                    "processed".green().bold(),
                    summary.source.display(),
                    summary.document_type,
                    summary.changes,
                    blocking,
                    summary.notes,
                    summary.snapshot.display().to_string().bold()
                );
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {:#}", "error:".red().bold(), e);
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{failed} of {total} document(s) failed"));
    }
    Ok(())
}
