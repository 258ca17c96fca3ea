use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, ensure, Context};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::naming::{split_name, NameRegistry};
use crate::record::{ColorMode, HarvestBatch};
use crate::runlog::RunReport;
use crate::scan;
use crate::ProgressCallback;

/// Quality used for every JPEG the converter writes.
pub const JPEG_QUALITY: u8 = 95;

fn default_quality() -> u8 {
    JPEG_QUALITY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertOptions {
    pub target: ColorMode,
    #[serde(default = "default_quality")]
    pub jpeg_quality: u8,
}

impl ConvertOptions {
    pub fn new(target: ColorMode) -> Self {
        Self {
            target,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

/// `<source>/<MODE>_Converted`
pub fn output_dir_for(source_dir: &Path, target: ColorMode) -> PathBuf {
    source_dir.join(format!("{}_Converted", target.code()))
}

/// Whether a container with this (lower-case, dotted) extension can store
/// `target` as is.
fn container_holds(ext: &str, target: ColorMode) -> bool {
    match ext {
        ".jpg" | ".jpeg" => matches!(target, ColorMode::Grayscale | ColorMode::Rgb),
        ".png" | ".bmp" => true,
        ".tiff" => target != ColorMode::GrayscaleAlpha,
        // GIF stores indexed color only
        _ => false,
    }
}

/// Extension for the converted copy of a file with `original_ext`.
///
/// CMYK always goes to JPEG; targets the original container can't hold go
/// to PNG; everything else keeps the original extension.
pub fn output_extension(target: ColorMode, original_ext: &str) -> String {
    if target == ColorMode::Cmyk {
        return ".jpg".to_string();
    }
    if container_holds(&original_ext.to_ascii_lowercase(), target) {
        original_ext.to_string()
    } else {
        ".png".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertOutcome {
    Converted { from: String, to: String },
    Failed { name: String, error: String },
}

impl fmt::Display for ConvertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertOutcome::Converted { from, to } => {
                write!(f, "converted: '{}' -> '{}'", from, to)
            }
            ConvertOutcome::Failed { name, error } => {
                write!(f, "failed: converting '{}' - {}", name, error)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvertResult {
    pub target: ColorMode,
    pub output_dir: PathBuf,
    pub outcomes: Vec<ConvertOutcome>,
    pub converted: usize,
    /// Readable records already in the target mode
    pub skipped: usize,
    pub failed: usize,
    /// Records that could not be read during harvest
    pub excluded: usize,
    pub report: RunReport,
}

/// Write a `target`-mode copy of every readable image not already in that
/// mode into `<source>/<MODE>_Converted`. Sources are only ever read.
pub fn convert_batch(
    batch: &HarvestBatch,
    source_dir: &Path,
    options: &ConvertOptions,
    progress: &ProgressCallback<'_>,
) -> anyhow::Result<ConvertResult> {
    let target = options.target;
    ensure!(
        target.is_conversion_target(),
        "cannot convert images to color mode {}",
        target
    );

    let output_dir = output_dir_for(source_dir, target);
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("cannot create output folder {}", output_dir.display()))?;
    let mut registry = NameRegistry::new(scan::list_files(&output_dir)?);

    let (todo, already): (Vec<_>, Vec<_>) = batch
        .ready()
        .partition(|(_, info)| info.color_mode != target);
    let skipped = already.len();
    let excluded = batch.failed_count();

    if todo.is_empty() {
        progress(100.0);
        return Ok(ConvertResult {
            target,
            output_dir,
            outcomes: Vec::new(),
            converted: 0,
            skipped,
            failed: 0,
            excluded,
            report: RunReport::new(
                format!("No images need converting to {}.", target),
                Vec::new(),
            ),
        });
    }

    info!(
        folder = %source_dir.display(),
        target = %target,
        files = todo.len(),
        "conversion started"
    );
    let total = todo.len();
    let mut outcomes = Vec::with_capacity(total);

    for (done, (name, info)) in todo.into_iter().enumerate() {
        let (stem, ext) = split_name(name);
        let out_name = registry.allocate(stem, &output_extension(target, ext));
        let dst = output_dir.join(&out_name);

        let outcome = match convert_file(&source_dir.join(name), &dst, info.color_mode, options) {
            Ok(()) => {
                registry.insert(out_name.clone());
                ConvertOutcome::Converted {
                    from: name.to_string(),
                    to: out_name,
                }
            }
            Err(e) => {
                warn!(file = name, error = %e, "conversion failed");
                ConvertOutcome::Failed {
                    name: name.to_string(),
                    error: format!("{:#}", e),
                }
            }
        };
        debug!(outcome = %outcome, "conversion step");
        outcomes.push(outcome);
        progress((done + 1) as f64 / total as f64 * 100.0);
    }

    let failed = outcomes
        .iter()
        .filter(|o| matches!(o, ConvertOutcome::Failed { .. }))
        .count();
    let converted = total - failed;
    let summary = format!(
        "Conversion to {} finished: {} converted, {} skipped (already {}), {} failed.",
        target, converted, skipped, target, failed
    );
    info!("{}", summary);
    let log = outcomes.iter().map(ToString::to_string).collect();

    Ok(ConvertResult {
        target,
        output_dir,
        outcomes,
        converted,
        skipped,
        failed,
        excluded,
        report: RunReport::new(summary, log),
    })
}

fn convert_file(
    src: &Path,
    dst: &Path,
    native: ColorMode,
    options: &ConvertOptions,
) -> anyhow::Result<()> {
    // Format from content, like the extractor; the extension may lie
    let mut img = ImageReader::open(src)
        .and_then(|reader| reader.with_guessed_format())
        .with_context(|| format!("cannot open {}", src.display()))?
        .decode()
        .with_context(|| format!("cannot decode {}", src.display()))?;
    // Indexed color is expanded first so every conversion starts from full color
    if native == ColorMode::Palette {
        img = expand_palette(img);
    }
    match options.target {
        ColorMode::Cmyk => write_cmyk_jpeg(&img, dst, options.jpeg_quality),
        target => write_image(&to_mode(img, target), dst, options.jpeg_quality),
    }
}

fn expand_palette(img: DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}

fn to_mode(img: DynamicImage, target: ColorMode) -> DynamicImage {
    match target {
        ColorMode::Grayscale => DynamicImage::ImageLuma8(img.to_luma8()),
        ColorMode::GrayscaleAlpha => DynamicImage::ImageLumaA8(img.to_luma_alpha8()),
        ColorMode::Rgba => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => DynamicImage::ImageRgb8(img.to_rgb8()),
    }
}

/// Create `dst` (which must not exist yet) and fill it; a half-written
/// file is removed again on failure.
fn write_new<F>(dst: &Path, encode: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> anyhow::Result<()>,
{
    let file =
        File::create_new(dst).with_context(|| format!("cannot create {}", dst.display()))?;
    let mut writer = BufWriter::new(file);
    let result = encode(&mut writer).and_then(|()| writer.flush().map_err(Into::into));
    if result.is_err() {
        drop(writer);
        let _ = fs::remove_file(dst);
    }
    result
}

fn write_image(img: &DynamicImage, dst: &Path, quality: u8) -> anyhow::Result<()> {
    let format = ImageFormat::from_path(dst)?;
    write_new(dst, |writer| {
        if format == ImageFormat::Jpeg {
            img.write_with_encoder(JpegEncoder::new_with_quality(writer, quality))?;
        } else {
            img.write_to(writer, format)?;
        }
        Ok(())
    })
}

/// Naive device CMYK (C = 255 - R, M = 255 - G, Y = 255 - B, K = 0),
/// written as a four-component JPEG.
fn write_cmyk_jpeg(img: &DynamicImage, dst: &Path, quality: u8) -> anyhow::Result<()> {
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    let too_large = || anyhow!("{}x{} exceeds the JPEG size limit", w, h);
    let width = u16::try_from(w).map_err(|_| too_large())?;
    let height = u16::try_from(h).map_err(|_| too_large())?;

    let cmyk: Vec<u8> = rgb
        .pixels()
        .flat_map(|p| {
            let [r, g, b] = p.0;
            [255 - r, 255 - g, 255 - b, 0]
        })
        .collect();

    write_new(dst, |writer| {
        jpeg_encoder::Encoder::new(writer, quality).encode(
            &cmyk,
            width,
            height,
            jpeg_encoder::ColorType::Cmyk,
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;
    use crate::harvest::{harvest_folder, HarvestOptions};
    use crate::probe::probe;
    use crate::testutil;
    use tempfile::tempdir;

    fn harvest(dir: &Path) -> HarvestBatch {
        harvest_folder(dir, &HarvestOptions::default(), &|_| {})
            .unwrap()
            .batch
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = scan::list_files(dir).unwrap().into_iter().collect();
        names.sort();
        names
    }

    #[test]
    fn test_output_extension_policy() {
        assert_eq!(output_extension(ColorMode::Cmyk, ".png"), ".jpg");
        assert_eq!(output_extension(ColorMode::Rgb, ".JPG"), ".JPG");
        assert_eq!(output_extension(ColorMode::Rgba, ".jpeg"), ".png");
        assert_eq!(output_extension(ColorMode::Grayscale, ".gif"), ".png");
        assert_eq!(output_extension(ColorMode::GrayscaleAlpha, ".tiff"), ".png");
        assert_eq!(output_extension(ColorMode::Rgb, ".bmp"), ".bmp");
    }

    #[test]
    fn test_convert_to_cmyk_leaves_source_alone() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.png");
        testutil::write_rgb_png(&src, 40, 30);
        let before = testutil::sha256_file(&src);

        let batch = harvest(dir.path());
        let result =
            convert_batch(&batch, dir.path(), &ConvertOptions::new(ColorMode::Cmyk), &|_| {})
                .unwrap();

        assert_eq!((result.converted, result.skipped, result.failed), (1, 0, 0));
        assert_eq!(result.output_dir, dir.path().join("CMYK_Converted"));
        let out = result.output_dir.join("a.jpg");
        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(probe(&bytes, ImageFormat::Jpeg).mode, Some(ColorMode::Cmyk));
        assert_eq!(extract(&out).info().unwrap().color_mode, ColorMode::Cmyk);

        assert_eq!(testutil::sha256_file(&src), before);
        assert_eq!(files_in(dir.path()), vec!["a.png"]);
    }

    #[test]
    fn test_everything_already_in_target_mode() {
        let dir = tempdir().unwrap();
        testutil::write_rgb_png(&dir.path().join("a.png"), 10, 10);
        testutil::write_jpeg_with_dpi(&dir.path().join("b.jpg"), 10, 10, 96);

        let reported = std::sync::Mutex::new(Vec::new());
        let result = convert_batch(
            &harvest(dir.path()),
            dir.path(),
            &ConvertOptions::new(ColorMode::Rgb),
            &|p| reported.lock().unwrap().push(p),
        )
        .unwrap();

        assert_eq!((result.converted, result.skipped, result.failed), (0, 2, 0));
        assert!(result.output_dir.is_dir());
        assert!(files_in(&result.output_dir).is_empty());
        assert_eq!(reported.into_inner().unwrap(), vec![100.0]);
    }

    #[test]
    fn test_palette_source_is_expanded() {
        let dir = tempdir().unwrap();
        testutil::write_palette_png(&dir.path().join("p.png"), 12, 12);
        testutil::write_rgb_png(&dir.path().join("q.png"), 12, 12);

        let batch = harvest(dir.path());
        let result =
            convert_batch(&batch, dir.path(), &ConvertOptions::new(ColorMode::Rgb), &|_| {})
                .unwrap();

        assert_eq!(result.converted, 1);
        assert_eq!(result.skipped, 1);
        let out = extract(&result.output_dir.join("p.png"));
        assert_eq!(out.info().unwrap().color_mode, ColorMode::Rgb);
        assert_eq!(
            result.converted + result.skipped + result.failed,
            batch.ready_count()
        );
    }

    #[test]
    fn test_grayscale_with_alpha_from_jpeg() {
        let dir = tempdir().unwrap();
        testutil::write_jpeg_with_dpi(&dir.path().join("photo.jpeg"), 16, 16, 72);

        let result = convert_batch(
            &harvest(dir.path()),
            dir.path(),
            &ConvertOptions::new(ColorMode::GrayscaleAlpha),
            &|_| {},
        )
        .unwrap();

        assert_eq!(result.converted, 1);
        let out = extract(&result.output_dir.join("photo.png"));
        assert_eq!(out.info().unwrap().color_mode, ColorMode::GrayscaleAlpha);
    }

    #[test]
    fn test_source_decoded_by_content_not_extension() {
        let dir = tempdir().unwrap();
        let jpeg_bytes = dir.path().join("tmp.jpg");
        testutil::write_jpeg_with_dpi(&jpeg_bytes, 20, 20, 72);
        std::fs::rename(&jpeg_bytes, dir.path().join("photo.png")).unwrap();

        let batch = harvest(dir.path());
        assert_eq!(batch.get("photo.png").unwrap().info().unwrap().format, "JPEG");

        let result =
            convert_batch(&batch, dir.path(), &ConvertOptions::new(ColorMode::Grayscale), &|_| {})
                .unwrap();

        assert_eq!((result.converted, result.failed), (1, 0));
        let out = extract(&result.output_dir.join("photo.png"));
        assert_eq!(out.info().unwrap().color_mode, ColorMode::Grayscale);
    }

    #[test]
    fn test_output_names_never_collide() {
        let dir = tempdir().unwrap();
        testutil::write_rgb_png(&dir.path().join("a.png"), 10, 10);
        testutil::write_jpeg_with_dpi(&dir.path().join("a.jpg"), 10, 10, 72);

        let result = convert_batch(
            &harvest(dir.path()),
            dir.path(),
            &ConvertOptions::new(ColorMode::Cmyk),
            &|_| {},
        )
        .unwrap();

        assert_eq!(result.converted, 2);
        assert_eq!(files_in(&result.output_dir), vec!["a.jpg", "a_1.jpg"]);
    }

    #[test]
    fn test_failures_and_exclusions_are_counted() {
        let dir = tempdir().unwrap();
        testutil::write_rgb_png(&dir.path().join("a.png"), 10, 10);
        testutil::write_rgb_png(&dir.path().join("b.png"), 10, 10);
        std::fs::write(dir.path().join("c.png"), b"broken").unwrap();
        let batch = harvest(dir.path());
        std::fs::remove_file(dir.path().join("a.png")).unwrap();

        let result =
            convert_batch(&batch, dir.path(), &ConvertOptions::new(ColorMode::Grayscale), &|_| {})
                .unwrap();

        assert_eq!((result.converted, result.skipped, result.failed), (1, 0, 1));
        assert_eq!(result.excluded, 1);
        assert!(result.report.log[0].starts_with("failed: converting 'a.png'"));
        assert_eq!(files_in(&result.output_dir), vec!["b.png"]);
        assert_eq!(
            result.converted + result.skipped + result.failed,
            batch.ready_count()
        );
    }

    #[test]
    fn test_unsupported_target_is_rejected() {
        let dir = tempdir().unwrap();
        let err = convert_batch(
            &HarvestBatch::default(),
            dir.path(),
            &ConvertOptions::new(ColorMode::Palette),
            &|_| {},
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot convert"));
        assert!(!dir.path().join("P_Converted").exists());
    }
}
