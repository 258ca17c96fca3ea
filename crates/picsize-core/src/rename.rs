use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::naming::{size_tagged_stem, split_name, NameRegistry};
use crate::record::{HarvestBatch, ImageInfo};
use crate::runlog::RunReport;
use crate::scan;
use crate::ProgressCallback;

/// What happened to one file during a rename run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed { from: String, to: String },
    /// The computed name is the current name
    Unchanged { name: String },
    /// In the batch but no longer on disk
    Missing { name: String },
    Failed { name: String, error: String },
}

impl fmt::Display for RenameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenameOutcome::Renamed { from, to } => write!(f, "renamed: '{}' -> '{}'", from, to),
            RenameOutcome::Unchanged { name } => {
                write!(f, "skipped: '{}' needs no rename", name)
            }
            RenameOutcome::Missing { name } => {
                write!(f, "skipped: '{}' is no longer in the folder", name)
            }
            RenameOutcome::Failed { name, error } => {
                write!(f, "failed: renaming '{}' - {}", name, error)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenameResult {
    /// Per-file outcomes, in batch order
    pub outcomes: Vec<RenameOutcome>,
    /// Files that were candidates for renaming (readable and still present)
    pub eligible: usize,
    pub report: RunReport,
}

impl RenameResult {
    fn count(&self, pred: impl Fn(&RenameOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }

    pub fn renamed(&self) -> usize {
        self.count(|o| matches!(o, RenameOutcome::Renamed { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, RenameOutcome::Unchanged { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RenameOutcome::Failed { .. }))
    }
}

/// Rename every readable image in `dir` after its physical size.
///
/// The folder listing is taken once, here, and guards against a batch that
/// no longer matches the disk.
pub fn rename_batch(
    batch: &HarvestBatch,
    dir: &Path,
    progress: &ProgressCallback<'_>,
) -> anyhow::Result<RenameResult> {
    let live = scan::list_files(dir)?;
    Ok(rename_with_listing(batch, dir, &live, progress))
}

/// Rename pass against an explicit listing of `dir` captured at run start.
///
/// Runs sequentially: each accepted rename updates the registry before the
/// next file is named. A failing file is logged and the run carries on.
pub fn rename_with_listing(
    batch: &HarvestBatch,
    dir: &Path,
    live: &HashSet<String>,
    progress: &ProgressCallback<'_>,
) -> RenameResult {
    let mut outcomes = Vec::new();
    let mut eligible: Vec<(&str, &ImageInfo)> = Vec::new();
    for (name, info) in batch.ready() {
        if live.contains(name) {
            eligible.push((name, info));
        } else {
            warn!(file = name, "file vanished since the last scan");
            outcomes.push(RenameOutcome::Missing {
                name: name.to_string(),
            });
        }
    }

    if eligible.is_empty() {
        let report = RunReport::new(
            "No image files qualify for renaming.",
            outcomes.iter().map(ToString::to_string).collect(),
        );
        return RenameResult {
            outcomes,
            eligible: 0,
            report,
        };
    }

    info!(folder = %dir.display(), files = eligible.len(), "rename started");
    let total = eligible.len();
    let mut registry = NameRegistry::new(live.iter().cloned());

    for (done, (name, info)) in eligible.into_iter().enumerate() {
        let outcome = rename_one(dir, name, info, &mut registry);
        debug!(outcome = %outcome, "rename step");
        outcomes.push(outcome);
        progress((done + 1) as f64 / total as f64 * 100.0);
    }

    let mut result = RenameResult {
        outcomes,
        eligible: total,
        report: RunReport::default(),
    };
    let summary = format!(
        "Batch rename finished: {} renamed, {} unchanged, {} failed.",
        result.renamed(),
        result.unchanged(),
        result.failed()
    );
    info!("{}", summary);
    result.report = RunReport::new(
        summary,
        result.outcomes.iter().map(ToString::to_string).collect(),
    );
    result
}

fn rename_one(
    dir: &Path,
    name: &str,
    info: &ImageInfo,
    registry: &mut NameRegistry,
) -> RenameOutcome {
    let (stem, ext) = split_name(name);
    let (width_cm, height_cm) = info.rounded_size_cm();
    let desired_stem = size_tagged_stem(stem, width_cm, height_cm);
    let ext = ext.to_lowercase();

    // The file's own name never blocks it from keeping that name
    let was_registered = registry.remove(name);
    let new_name = registry.allocate(&desired_stem, &ext);
    if was_registered {
        registry.insert(name);
    }

    if new_name == name {
        return RenameOutcome::Unchanged {
            name: name.to_string(),
        };
    }

    let target = dir.join(&new_name);
    if target.exists() {
        return RenameOutcome::Failed {
            name: name.to_string(),
            error: format!("'{}' appeared in the folder during the run", new_name),
        };
    }

    match fs::rename(dir.join(name), &target) {
        Ok(()) => {
            registry.remove(name);
            registry.insert(new_name.clone());
            RenameOutcome::Renamed {
                from: name.to_string(),
                to: new_name,
            }
        }
        Err(e) => {
            warn!(file = name, error = %e, "rename failed");
            RenameOutcome::Failed {
                name: name.to_string(),
                error: e.to_string(),
            }
        }
    }
}
