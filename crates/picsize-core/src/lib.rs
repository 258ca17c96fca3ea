//! Image folder inspection: harvest pixel and physical dimensions, rename
//! files after their printed size, convert color modes, export a report.

pub mod convert;
pub mod error;
pub mod extract;
pub mod harvest;
pub mod naming;
pub mod probe;
pub mod record;
pub mod rename;
pub mod report;
pub mod runlog;
pub mod scan;
pub mod session;

#[cfg(test)]
mod testutil;

pub use convert::{convert_batch, ConvertOptions, ConvertResult};
pub use error::{ExtractError, SessionError};
pub use extract::extract;
pub use harvest::{harvest_folder, HarvestOptions, HarvestOutcome};
pub use record::{ColorMode, HarvestBatch, ImageInfo, ImageRecord};
pub use rename::{rename_batch, RenameResult};
pub use report::{export_report, ExportResult};
pub use runlog::{save_log, RunReport};
pub use session::{RunHandle, Session};

/// Progress reporting: receives the completed share of a run, 0 to 100.
pub type ProgressCallback<'a> = dyn Fn(f64) + Send + Sync + 'a;
