use std::path::{Path, PathBuf};

use anyhow::Context;
use rust_xlsxwriter::{Format, FormatAlign, Image, Workbook, Worksheet};
use tracing::{info, warn};

use crate::record::{format_file_size, HarvestBatch, ImageInfo};
use crate::runlog::RunReport;
use crate::ProgressCallback;

pub const SHEET_NAME: &str = "Image Info";

const HEADERS: [&str; 7] = [
    "File name",
    "Pixel size (W x H)",
    "Physical width (cm)",
    "Physical height (cm)",
    "DPI (X x Y)",
    "File size",
    "Preview",
];
const PREVIEW_COL: u16 = 6;
const PREVIEW_COL_WIDTH: f64 = 15.0;
const PREVIEW_ROW_HEIGHT: f64 = 65.0;
const MAX_COL_WIDTH: usize = 50;

#[derive(Debug, Clone)]
pub struct ExportResult {
    /// Where the workbook was saved; None when there was nothing to export
    pub path: Option<PathBuf>,
    pub rows: usize,
    /// Rows that carry an embedded thumbnail
    pub previews: usize,
    pub report: RunReport,
}

/// Write one row per readable record, with its thumbnail, to an `.xlsx`
/// workbook at `path`.
pub fn export_report(
    batch: &HarvestBatch,
    path: &Path,
    progress: &ProgressCallback<'_>,
) -> anyhow::Result<ExportResult> {
    let rows: Vec<(&str, &ImageInfo)> = batch.ready().collect();
    if rows.is_empty() {
        progress(100.0);
        return Ok(ExportResult {
            path: None,
            rows: 0,
            previews: 0,
            report: RunReport::new("No readable image information to export.", Vec::new()),
        });
    }

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    let header = Format::new().set_bold();
    for (col, title) in HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &header)?;
    }

    let mut widths: Vec<usize> = HEADERS[..PREVIEW_COL as usize]
        .iter()
        .map(|h| h.chars().count())
        .collect();
    let mut log = Vec::with_capacity(rows.len());
    let mut previews = 0;
    let total = rows.len();

    for (i, (name, info)) in rows.into_iter().enumerate() {
        let row = (i + 1) as u32;
        let cells = [
            name.to_string(),
            info.pixel_size_label(),
            format!("{:.2}", info.physical_width_cm),
            format!("{:.2}", info.physical_height_cm),
            info.dpi_label(),
            format_file_size(info.file_size),
        ];
        for (col, text) in cells.iter().enumerate() {
            widths[col] = widths[col].max(text.chars().count());
        }
        sheet.write_string(row, 0, &cells[0])?;
        sheet.write_string(row, 1, &cells[1])?;
        sheet.write_number(row, 2, info.physical_width_cm)?;
        sheet.write_number(row, 3, info.physical_height_cm)?;
        sheet.write_string(row, 4, &cells[4])?;
        sheet.write_string(row, 5, &cells[5])?;

        let line = match write_preview(sheet, row, info.thumbnail.as_deref()) {
            Ok(true) => {
                previews += 1;
                format!("exported: '{}'", name)
            }
            Ok(false) => format!("exported: '{}' (no preview)", name),
            Err(e) => {
                warn!(file = name, error = %e, "cannot embed preview");
                sheet.write_string(row, PREVIEW_COL, "preview unavailable")?;
                format!("exported: '{}' (preview unavailable)", name)
            }
        };
        log.push(line);
        progress((i + 1) as f64 / total as f64 * 100.0);
    }

    for (col, width) in widths.into_iter().enumerate() {
        sheet.set_column_width(col as u16, (width + 2).min(MAX_COL_WIDTH) as f64)?;
    }
    sheet.set_column_width(PREVIEW_COL, PREVIEW_COL_WIDTH)?;

    workbook
        .save(path)
        .with_context(|| format!("cannot save report {}", path.display()))?;

    let summary = format!(
        "Exported {} images to {} ({} with preview).",
        total,
        path.display(),
        previews
    );
    info!("{}", summary);
    Ok(ExportResult {
        path: Some(path.to_path_buf()),
        rows: total,
        previews,
        report: RunReport::new(summary, log),
    })
}

/// Embed the thumbnail in the preview cell. `Ok(false)` means there was no
/// thumbnail to embed.
fn write_preview(
    sheet: &mut Worksheet,
    row: u32,
    thumbnail: Option<&[u8]>,
) -> anyhow::Result<bool> {
    let Some(bytes) = thumbnail else {
        let centered = Format::new().set_align(FormatAlign::Center);
        sheet.write_string_with_format(row, PREVIEW_COL, "no preview", &centered)?;
        return Ok(false);
    };
    let image = Image::new_from_buffer(bytes)?;
    sheet.set_row_height(row, PREVIEW_ROW_HEIGHT)?;
    sheet.insert_image_fit_to_cell(row, PREVIEW_COL, &image, true)?;
    Ok(true)
}
