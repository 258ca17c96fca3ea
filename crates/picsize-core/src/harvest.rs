use std::path::Path;
use std::sync::mpsc;
use std::time::Instant;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::extract::extract;
use crate::record::{HarvestBatch, ImageRecord};
use crate::scan;
use crate::ProgressCallback;

/// Upper bound on concurrent extractions.
pub const MAX_WORKERS: usize = 8;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvestOptions {
    /// Worker pool size; `None` picks `min(8, cpus + 4)`
    #[serde(default)]
    pub workers: Option<usize>,
}

impl HarvestOptions {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_workers).max(1)
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() + 4).min(MAX_WORKERS))
        .unwrap_or(MAX_WORKERS)
}

/// A finished harvest, ready to be published to the session.
#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub batch: HarvestBatch,
    pub succeeded: usize,
    pub summary: String,
}

/// Scan `dir` for supported images and harvest all of them.
pub fn harvest_folder(
    dir: &Path,
    options: &HarvestOptions,
    progress: &ProgressCallback<'_>,
) -> anyhow::Result<HarvestOutcome> {
    let names = scan::list_images(dir)?;
    harvest_files(dir, &names, options, progress)
}

/// Run the extractor over `names` (relative to `dir`) on a bounded pool.
///
/// Results are gathered on the calling thread in completion order, so the
/// progress callback always runs here and sees non-decreasing values. Every
/// name ends up in the batch exactly once, readable or not.
pub fn harvest_files(
    dir: &Path,
    names: &[String],
    options: &HarvestOptions,
    progress: &ProgressCallback<'_>,
) -> anyhow::Result<HarvestOutcome> {
    let mut names = names.to_vec();
    names.sort();
    names.dedup();
    let total = names.len();

    if total == 0 {
        progress(100.0);
        return Ok(HarvestOutcome {
            batch: HarvestBatch::default(),
            succeeded: 0,
            summary: format!("No supported image files found in {}", dir.display()),
        });
    }

    let started = Instant::now();
    let workers = options.worker_count();
    info!(folder = %dir.display(), files = total, workers, "harvest started");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("harvest-{}", i))
        .build()
        .context("cannot start harvest workers")?;

    let (tx, rx) = mpsc::channel::<(String, ImageRecord)>();
    for name in &names {
        let tx = tx.clone();
        let path = dir.join(name);
        let name = name.clone();
        pool.spawn(move || {
            let record = extract(&path);
            let _ = tx.send((name, record));
        });
    }
    drop(tx);

    let mut collected: Vec<(String, ImageRecord)> = Vec::with_capacity(total);
    for (name, record) in rx {
        collected.push((name, record));
        progress(collected.len() as f64 / total as f64 * 100.0);
    }

    // A worker that vanished without reporting still gets its entry
    if collected.len() < total {
        let seen: std::collections::HashSet<&str> =
            collected.iter().map(|(n, _)| n.as_str()).collect();
        let lost: Vec<String> = names
            .iter()
            .filter(|n| !seen.contains(n.as_str()))
            .cloned()
            .collect();
        for name in lost {
            warn!(file = %name, "no result from harvest worker");
            collected.push((name, ImageRecord::Failed("extraction did not complete".into())));
        }
        progress(100.0);
    }

    let batch: HarvestBatch = collected.into_iter().collect();
    let succeeded = batch.ready_count();
    let failed = total - succeeded;
    info!(
        succeeded,
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "harvest finished"
    );

    let summary = if failed == 0 {
        format!("Loaded information for {} images.", succeeded)
    } else {
        format!(
            "Loaded information for {} images; {} could not be read.",
            succeeded, failed
        )
    };
    Ok(HarvestOutcome {
        batch,
        succeeded,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[test]
    fn test_every_file_accounted_for() {
        let dir = tempdir().unwrap();
        for i in 0..12 {
            testutil::write_rgb_png(&dir.path().join(format!("img{:02}.png", i)), 20, 10);
        }
        std::fs::write(dir.path().join("broken.jpg"), b"garbage").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let reported = Mutex::new(Vec::new());
        let outcome = harvest_folder(dir.path(), &HarvestOptions::default(), &|p| {
            reported.lock().unwrap().push(p)
        })
        .unwrap();

        assert_eq!(outcome.batch.len(), 13);
        assert_eq!(outcome.succeeded, 12);
        assert!(outcome.batch.get("broken.jpg").unwrap().error().is_some());
        assert!(outcome.batch.get("notes.txt").is_none());

        let reported = reported.into_inner().unwrap();
        assert_eq!(reported.len(), 13);
        assert!(reported.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*reported.last().unwrap(), 100.0);
    }

    #[test]
    fn test_single_worker_gives_same_batch() {
        let dir = tempdir().unwrap();
        for name in ["a.png", "b.png", "c.png"] {
            testutil::write_rgb_png(&dir.path().join(name), 8, 8);
        }
        let options = HarvestOptions { workers: Some(1) };
        let one = harvest_folder(dir.path(), &options, &|_| {}).unwrap();
        let many = harvest_folder(dir.path(), &HarvestOptions::default(), &|_| {}).unwrap();
        let keys = |o: &HarvestOutcome| o.batch.iter().map(|(n, _)| n.to_string()).collect::<Vec<_>>();
        assert_eq!(keys(&one), keys(&many));
    }

    #[test]
    fn test_empty_folder_reports_complete() {
        let dir = tempdir().unwrap();
        let reported = Mutex::new(Vec::new());
        let outcome = harvest_folder(dir.path(), &HarvestOptions::default(), &|p| {
            reported.lock().unwrap().push(p)
        })
        .unwrap();
        assert!(outcome.batch.is_empty());
        assert_eq!(outcome.succeeded, 0);
        assert_eq!(reported.into_inner().unwrap(), vec![100.0]);
    }

    #[test]
    fn test_worker_count_bounds() {
        assert!(HarvestOptions::default().worker_count() <= MAX_WORKERS);
        assert_eq!(HarvestOptions { workers: Some(0) }.worker_count(), 1);
    }
}
