use std::fs;
use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use image::{ColorType, DynamicImage, ImageFormat, ImageReader};
use tracing::debug;

use crate::error::ExtractError;
use crate::probe;
use crate::record::{effective_dpi, physical_cm, ColorMode, ImageInfo, ImageRecord};

/// Thumbnails fit inside a square of this many pixels.
pub const THUMBNAIL_SIZE: u32 = 128;

/// Harvest one file. Never fails: any problem becomes `ImageRecord::Failed`.
pub fn extract(path: &Path) -> ImageRecord {
    let result = panic::catch_unwind(AssertUnwindSafe(|| read_image_info(path)))
        .unwrap_or(Err(ExtractError::Panicked));
    match result {
        Ok(info) => ImageRecord::Ready(info),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "extraction failed");
            ImageRecord::Failed(e.to_string())
        }
    }
}

fn read_image_info(path: &Path) -> Result<ImageInfo, ExtractError> {
    let bytes = fs::read(path)?;
    let reader = ImageReader::new(Cursor::new(bytes.as_slice())).with_guessed_format()?;
    let format = reader.format().ok_or(ExtractError::UnknownFormat)?;
    let img = reader.decode()?;

    let header = probe::probe(&bytes, format);
    let (declared_x, declared_y) = header.dpi.unzip();
    let dpi_x = effective_dpi(declared_x);
    let dpi_y = effective_dpi(declared_y);
    let (width, height) = (img.width(), img.height());

    // Second tier: a bad preview must not cost us the record
    let thumbnail = match encode_thumbnail(&img) {
        Ok(png) => Some(png),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "thumbnail skipped");
            None
        }
    };

    Ok(ImageInfo {
        pixel_width: width,
        pixel_height: height,
        dpi_x,
        dpi_y,
        physical_width_cm: physical_cm(width, dpi_x),
        physical_height_cm: physical_cm(height, dpi_y),
        color_mode: header.mode.unwrap_or_else(|| decoded_mode(img.color())),
        format: format_name(format),
        file_size: bytes.len() as u64,
        thumbnail,
    })
}

fn encode_thumbnail(img: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let thumb = img.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE);
    let mut buf = Vec::new();
    thumb.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Mode implied by the decoded buffer, for containers whose header we
/// don't inspect more closely.
pub(crate) fn decoded_mode(color: ColorType) -> ColorMode {
    match color {
        ColorType::L8 => ColorMode::Grayscale,
        ColorType::L16 => ColorMode::Gray16,
        ColorType::La8 | ColorType::La16 => ColorMode::GrayscaleAlpha,
        ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => ColorMode::Rgba,
        _ => ColorMode::Rgb,
    }
}

pub fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "JPEG".to_string(),
        ImageFormat::Png => "PNG".to_string(),
        ImageFormat::Bmp => "BMP".to_string(),
        ImageFormat::Gif => "GIF".to_string(),
        ImageFormat::Tiff => "TIFF".to_string(),
        other => format!("{:?}", other).to_uppercase(),
    }
}
