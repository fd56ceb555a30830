use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::db::{DocumentStore, RunRow};
use crate::error::SyncError;
use crate::merge::{self, Outcome, UpdateSet};
use crate::script::{self, functions::FunctionFilter};
use crate::source::{card_id_from_filename, ScriptFile};

/// Outcome counts for one batch plus a rolling tail of its log lines.
pub struct BatchReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    tail: VecDeque<String>,
    tail_len: usize,
}

impl BatchReport {
    fn new(tail_len: usize) -> Self {
        BatchReport {
            inserted: 0,
            updated: 0,
            skipped: 0,
            errors: 0,
            tail: VecDeque::with_capacity(tail_len),
            tail_len: tail_len.max(1),
        }
    }

    fn log(&mut self, line: String) {
        if self.tail.len() == self.tail_len {
            self.tail.pop_front();
        }
        self.tail.push_back(line);
    }

    pub fn tail(&self) -> impl Iterator<Item = &str> {
        self.tail.iter().map(String::as_str)
    }

    pub fn last_line(&self) -> Option<&str> {
        self.tail.back().map(String::as_str)
    }

    /// All four counts, zeros included.
    pub fn summary(&self) -> String {
        format!(
            "Done: inserted {}, updated {}, skipped {}, errors {}.",
            self.inserted, self.updated, self.skipped, self.errors,
        )
    }

    pub fn print(&self) {
        println!("{}", self.summary());
    }

    pub fn to_run_row(&self, started_at: DateTime<Utc>, source: &Path) -> RunRow {
        RunRow {
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
            source: source.display().to_string(),
            inserted: self.inserted,
            updated: self.updated,
            skipped: self.skipped,
            errors: self.errors,
        }
    }
}

pub fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Process script files one at a time, in the given order. Every per-file
/// failure is counted and logged; nothing aborts the batch.
pub fn run_batch<S: DocumentStore>(
    store: &S,
    files: &[ScriptFile],
    filter: &FunctionFilter,
    tail_len: usize,
    pb: &ProgressBar,
) -> BatchReport {
    let mut report = BatchReport::new(tail_len);

    for file in files {
        match process_file(store, file, filter) {
            Ok((id, Outcome::Skipped, _)) => {
                report.skipped += 1;
                debug!(id, "no changes");
                report.log(format!("SKIPPED (no changes) {}", id));
            }
            Ok((id, outcome, update)) => {
                if outcome == Outcome::Inserted {
                    report.inserted += 1;
                } else {
                    report.updated += 1;
                }
                let fields = update.field_paths();
                info!(id, file = %file.file_name, ?fields, "{}", outcome);
                report.log(format!("{} {} ({}) [{}]", outcome, id, file.file_name, fields.join(", ")));
            }
            Err(e) if e.is_skip() => {
                report.skipped += 1;
                debug!(file = %file.file_name, "no card id in file name");
                report.log(format!("SKIP (no id) {}", file.file_name));
            }
            Err(e) => {
                report.errors += 1;
                warn!(file = %file.file_name, "{}", e);
                report.log(format!("ERROR {}: {}", file.file_name, e));
            }
        }

        if let Some(line) = report.last_line() {
            pb.set_message(line.to_string());
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    report
}

/// Read → extract → compare → write for a single file. At most one upsert.
fn process_file<S: DocumentStore>(
    store: &S,
    file: &ScriptFile,
    filter: &FunctionFilter,
) -> Result<(i64, Outcome, UpdateSet), SyncError> {
    let id = card_id_from_filename(&file.file_name)
        .ok_or_else(|| SyncError::FilenamePattern(file.file_name.clone()))?;

    let lua = std::fs::read_to_string(&file.path).map_err(|source| SyncError::FileRead {
        path: file.path.clone(),
        source,
    })?;

    let script = script::extract(id, &lua, filter);
    debug!(id = script.id, flags = ?script.meta.raised_flags(), functions = script.functions.len(), "extracted");

    let existing = store
        .find_card(script.id)
        .map_err(|source| SyncError::StoreRead { id: script.id, source })?;

    let (outcome, update) = merge::plan(&script, existing.as_ref()).map_err(|e| SyncError::StoreWrite {
        id: script.id,
        source: e.into(),
    })?;

    if outcome != Outcome::Skipped {
        store
            .upsert_fields(script.id, &update)
            .map_err(|source| SyncError::StoreWrite { id: script.id, source })?;
    }
    Ok((script.id, outcome, update))
}
