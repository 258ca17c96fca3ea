use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

/// Summary line plus the ordered per-file log of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub summary: String,
    pub log: Vec<String>,
}

impl RunReport {
    pub fn new(summary: impl Into<String>, log: Vec<String>) -> Self {
        Self {
            summary: summary.into(),
            log,
        }
    }

    /// First `limit` log lines, with a total marker when some were cut.
    pub fn preview(&self, limit: usize) -> String {
        let mut out = self
            .log
            .iter()
            .take(limit)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        if self.log.len() > limit {
            out.push_str(&format!("\n... {} entries in total.", self.log.len()));
        }
        out
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "picsize-log".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

fn write_report(writer: &mut impl Write, report: &RunReport) -> std::io::Result<()> {
    writeln!(writer, "Result: {}", report.summary)?;
    writeln!(
        writer,
        "Saved: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )?;
    writeln!(writer)?;
    writeln!(writer, "Detailed log:")?;
    for line in &report.log {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()
}

/// Save the complete log of a run as UTF-8 text.
pub fn save_log(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    let temp_path = temp_path_for(path);

    // Write to temp file first, then rename for atomicity
    let file = File::create(&temp_path)
        .with_context(|| format!("cannot create log file {}", temp_path.display()))?;
    let mut writer = BufWriter::new(file);
    let written = write_report(&mut writer, report);
    drop(writer);

    let result = written
        .with_context(|| format!("cannot write log file {}", temp_path.display()))
        .and_then(|()| {
            fs::rename(&temp_path, path)
                .with_context(|| format!("cannot save log file {}", path.display()))
        });
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
