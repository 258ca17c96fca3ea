use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use picsize_core::{
    convert::output_dir_for, convert_batch, export_report, harvest_folder, rename_batch,
    save_log, ColorMode, ConvertOptions, HarvestOptions, ImageRecord, RunReport, Session,
};

/// Log lines shown after a run; the log file always holds all of them.
const PREVIEW_LINES: usize = 10;

#[derive(Parser)]
#[command(
    name = "picsize",
    version,
    about = "Inspect image folders: physical print size, size-based renaming, color mode conversion"
)]
struct Cli {
    /// Log every file as it is processed
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List dimensions, resolution and color mode of every image in a folder
    Scan {
        dir: PathBuf,

        /// Print records as JSON
        #[arg(long)]
        json: bool,

        /// Number of files read in parallel (default: min(8, cpus + 4))
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Rename every readable image to <name>_<W>x<H>_cm.<ext>
    Rename {
        dir: PathBuf,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Save the full per-file log to this file
        #[arg(long)]
        log_file: Option<PathBuf>,

        #[arg(long)]
        workers: Option<usize>,
    },

    /// Write copies converted to another color mode into <dir>/<MODE>_Converted
    Convert {
        dir: PathBuf,

        /// Target mode: RGB, RGBA, L, LA or CMYK
        #[arg(short, long)]
        mode: ColorMode,

        #[arg(short, long)]
        yes: bool,

        #[arg(long)]
        log_file: Option<PathBuf>,

        #[arg(long)]
        workers: Option<usize>,
    },

    /// Export an .xlsx report with one row and a thumbnail per image
    Export {
        dir: PathBuf,

        /// Report file to write
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        workers: Option<usize>,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let mut session = Session::new();

    match cli.command {
        Commands::Scan { dir, json, workers } => {
            load(&mut session, &dir, &HarvestOptions { workers })?;
            print_batch(&session, json)?;
        }
        Commands::Rename {
            dir,
            yes,
            log_file,
            workers,
        } => {
            load(&mut session, &dir, &HarvestOptions { workers })?;
            let (folder, batch) = session.current()?;
            let folder = folder.to_path_buf();
            let eligible = batch.ready_count();
            if eligible == 0 {
                eprintln!("No image files qualify for renaming.");
                return Ok(());
            }
            let prompt = format!(
                "Rename {} files in {} after their physical size?",
                eligible,
                folder.display()
            );
            if !confirm(&prompt, yes)? {
                eprintln!("Cancelled.");
                return Ok(());
            }

            let result = run_in_background(&session, "renaming", move |progress| {
                rename_batch(&batch, &folder, progress)
            })?;
            finish(&result.report, log_file.as_deref())?;
            if result.renamed() > 0 {
                eprintln!("Run `picsize scan` again to see the new names.");
            }
        }
        Commands::Convert {
            dir,
            mode,
            yes,
            log_file,
            workers,
        } => {
            anyhow::ensure!(
                mode.is_conversion_target(),
                "cannot convert to {}; choose one of RGB, RGBA, L, LA, CMYK",
                mode
            );
            load(&mut session, &dir, &HarvestOptions { workers })?;
            let (folder, batch) = session.current()?;
            let folder = folder.to_path_buf();
            let prompt = format!(
                "Write {} copies of {} images into {}?",
                mode,
                batch.ready_count(),
                output_dir_for(&folder, mode).display()
            );
            if !confirm(&prompt, yes)? {
                eprintln!("Cancelled.");
                return Ok(());
            }

            let options = ConvertOptions::new(mode);
            let result = run_in_background(&session, "converting", move |progress| {
                convert_batch(&batch, &folder, &options, progress)
            })?;
            finish(&result.report, log_file.as_deref())?;
            if result.excluded > 0 {
                eprintln!("{} unreadable files were left out.", result.excluded);
            }
            eprintln!("Output folder: {}", result.output_dir.display());
        }
        Commands::Export {
            dir,
            output,
            workers,
        } => {
            load(&mut session, &dir, &HarvestOptions { workers })?;
            let (_, batch) = session.current()?;
            let result = run_in_background(&session, "exporting", move |progress| {
                export_report(&batch, &output, progress)
            })?;
            eprintln!("{}", result.report.summary);
        }
    }

    Ok(())
}

fn progress_bar(label: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!("[{{bar:40}}] {{pos:>3}}% {}", label))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

/// Select `dir` and harvest it into the session.
fn load(session: &mut Session, dir: &Path, options: &HarvestOptions) -> anyhow::Result<()> {
    session.select_folder(dir);
    let pb = progress_bar("reading images");
    let outcome = harvest_folder(dir, options, &|p: f64| pb.set_position(p.round() as u64))?;
    pb.finish_and_clear();
    eprintln!("{}", outcome.summary);
    session.publish(outcome.batch);
    Ok(())
}

/// Run `job` on the session's background thread while drawing its progress.
fn run_in_background<T, F>(session: &Session, label: &str, job: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&picsize_core::ProgressCallback<'_>) -> anyhow::Result<T> + Send + 'static,
{
    let pb = progress_bar(label);
    let bar = pb.clone();
    let handle = session.spawn(move || job(&|p: f64| bar.set_position(p.round() as u64)))?;
    let result = handle.join();
    pb.finish_and_clear();
    result?
}

fn confirm(prompt: &str, yes: bool) -> anyhow::Result<bool> {
    if yes {
        return Ok(true);
    }
    eprint!("{} [y/N] ", prompt);
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn finish(report: &RunReport, log_file: Option<&Path>) -> anyhow::Result<()> {
    eprintln!("{}", report.summary);
    let preview = report.preview(PREVIEW_LINES);
    if !preview.is_empty() {
        eprintln!("{}", preview);
    }
    if let Some(path) = log_file {
        save_log(path, report)?;
        eprintln!("Log saved to {}", path.display());
    }
    Ok(())
}

fn print_batch(session: &Session, json: bool) -> anyhow::Result<()> {
    let (_, batch) = session.current()?;

    if json {
        let entries: Vec<serde_json::Value> = batch
            .iter()
            .map(|(name, record)| match record {
                ImageRecord::Ready(info) => serde_json::json!({ "file": name, "info": info }),
                ImageRecord::Failed(error) => serde_json::json!({ "file": name, "error": error }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for (name, record) in batch.iter() {
        match record {
            ImageRecord::Ready(info) => println!(
                "{}\t{} px\t{} cm\t{} dpi\t{}\t{}\t{}",
                name,
                info.pixel_size_label(),
                info.physical_size_label(),
                info.dpi_label(),
                info.color_mode,
                info.format,
                picsize_core::record::format_file_size(info.file_size)
            ),
            ImageRecord::Failed(error) => println!("{}\terror: {}", name, error),
        }
    }
    Ok(())
}
