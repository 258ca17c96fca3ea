use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Resolution assumed when a file carries none (or a nonsensical one).
pub const DEFAULT_DPI: f64 = 72.0;

const CM_PER_INCH: f64 = 2.54;

/// Pixel layout of an image, named the way imaging tools usually name modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorMode {
    #[serde(rename = "1")]
    Bilevel,
    #[serde(rename = "L")]
    Grayscale,
    #[serde(rename = "LA")]
    GrayscaleAlpha,
    #[serde(rename = "I;16")]
    Gray16,
    #[serde(rename = "P")]
    Palette,
    #[serde(rename = "RGB")]
    Rgb,
    #[serde(rename = "RGBA")]
    Rgba,
    #[serde(rename = "CMYK")]
    Cmyk,
}

impl ColorMode {
    pub fn code(self) -> &'static str {
        match self {
            ColorMode::Bilevel => "1",
            ColorMode::Grayscale => "L",
            ColorMode::GrayscaleAlpha => "LA",
            ColorMode::Gray16 => "I;16",
            ColorMode::Palette => "P",
            ColorMode::Rgb => "RGB",
            ColorMode::Rgba => "RGBA",
            ColorMode::Cmyk => "CMYK",
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, ColorMode::GrayscaleAlpha | ColorMode::Rgba)
    }

    /// Modes the conversion engine can produce.
    pub fn is_conversion_target(self) -> bool {
        matches!(
            self,
            ColorMode::Grayscale
                | ColorMode::GrayscaleAlpha
                | ColorMode::Rgb
                | ColorMode::Rgba
                | ColorMode::Cmyk
        )
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown color mode '{0}'")]
pub struct UnknownColorMode(pub String);

impl FromStr for ColorMode {
    type Err = UnknownColorMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s.trim().to_ascii_uppercase().as_str() {
            "1" | "BILEVEL" => ColorMode::Bilevel,
            "L" | "GRAY" | "GREY" | "GRAYSCALE" | "GREYSCALE" => ColorMode::Grayscale,
            "LA" => ColorMode::GrayscaleAlpha,
            "I;16" => ColorMode::Gray16,
            "P" | "PALETTE" => ColorMode::Palette,
            "RGB" => ColorMode::Rgb,
            "RGBA" => ColorMode::Rgba,
            "CMYK" => ColorMode::Cmyk,
            _ => return Err(UnknownColorMode(s.to_string())),
        };
        Ok(mode)
    }
}

/// Everything harvested from one readable image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub dpi_x: f64,
    pub dpi_y: f64,
    pub physical_width_cm: f64,
    pub physical_height_cm: f64,
    pub color_mode: ColorMode,
    /// Container format detected from content, e.g. `JPEG`
    pub format: String,
    pub file_size: u64,
    /// PNG-encoded preview; None when the preview step failed
    #[serde(skip)]
    pub thumbnail: Option<Vec<u8>>,
}

impl ImageInfo {
    /// Physical size rounded to whole centimeters, as used in size tags.
    /// Ties go to the even neighbour.
    pub fn rounded_size_cm(&self) -> (i64, i64) {
        (
            self.physical_width_cm.round_ties_even() as i64,
            self.physical_height_cm.round_ties_even() as i64,
        )
    }

    pub fn pixel_size_label(&self) -> String {
        format!("{}x{}", self.pixel_width, self.pixel_height)
    }

    pub fn dpi_label(&self) -> String {
        format!("{}x{}", format_dpi(self.dpi_x), format_dpi(self.dpi_y))
    }

    pub fn physical_size_label(&self) -> String {
        format!(
            "{:.2}x{:.2}",
            self.physical_width_cm, self.physical_height_cm
        )
    }
}

/// Outcome of extracting one file. Failed records carry no numeric fields.
#[derive(Debug, Clone)]
pub enum ImageRecord {
    Ready(ImageInfo),
    Failed(String),
}

impl ImageRecord {
    pub fn info(&self) -> Option<&ImageInfo> {
        match self {
            ImageRecord::Ready(info) => Some(info),
            ImageRecord::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ImageRecord::Ready(_) => None,
            ImageRecord::Failed(e) => Some(e),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ImageRecord::Ready(_))
    }
}

/// One folder-wide harvest, keyed and ordered by file name.
///
/// Built once by the harvest coordinator and never mutated afterwards;
/// consumers share it behind an `Arc` and only read from it.
#[derive(Debug, Clone, Default)]
pub struct HarvestBatch {
    records: BTreeMap<String, ImageRecord>,
}

impl HarvestBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, file_name: &str) -> Option<&ImageRecord> {
        self.records.get(file_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ImageRecord)> {
        self.records.iter().map(|(name, r)| (name.as_str(), r))
    }

    /// Readable records only, in name order.
    pub fn ready(&self) -> impl Iterator<Item = (&str, &ImageInfo)> {
        self.records
            .iter()
            .filter_map(|(name, r)| r.info().map(|info| (name.as_str(), info)))
    }

    pub fn ready_count(&self) -> usize {
        self.ready().count()
    }

    pub fn failed_count(&self) -> usize {
        self.len() - self.ready_count()
    }
}

impl FromIterator<(String, ImageRecord)> for HarvestBatch {
    fn from_iter<I: IntoIterator<Item = (String, ImageRecord)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// Substitute the default resolution for missing or non-positive values.
pub fn effective_dpi(declared: Option<f64>) -> f64 {
    match declared {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => DEFAULT_DPI,
    }
}

/// `pixels / dpi * 2.54`, rounded to two decimals (ties to even).
pub fn physical_cm(pixels: u32, dpi: f64) -> f64 {
    round2(pixels as f64 / dpi * CM_PER_INCH)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round_ties_even() / 100.0
}

fn format_dpi(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{:.2}", v)
    }
}

/// Human-readable file size: MB above one mebibyte, KB otherwise.
pub fn format_file_size(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= MIB {
        format!("{:.2} MB", b / MIB)
    } else {
        format!("{:.2} KB", b / 1024.0)
    }
}
