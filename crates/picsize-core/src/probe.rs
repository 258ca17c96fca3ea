//! Container header probing: resolution metadata and native color mode.
//!
//! The decoder normalizes pixels (CMYK JPEGs come back as RGB, palettes are
//! expanded), so anything that describes the file as stored is read here
//! from the raw bytes instead.

use std::io::Cursor;

use exif::{In, Reader, Tag, Value};
use image::ImageFormat;

use crate::record::ColorMode;

const INCH_PER_METER: f64 = 0.0254;
const CM_PER_INCH: f64 = 2.54;

/// What the container header says about the stored image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderProbe {
    /// Declared resolution in dots per inch, if any (may be zero or negative)
    pub dpi: Option<(f64, f64)>,
    /// Stored color layout, when the header is more specific than the decoder
    pub mode: Option<ColorMode>,
}

pub fn probe(bytes: &[u8], format: ImageFormat) -> HeaderProbe {
    match format {
        ImageFormat::Jpeg => probe_jpeg(bytes),
        ImageFormat::Png => probe_png(bytes),
        ImageFormat::Bmp => probe_bmp(bytes),
        ImageFormat::Gif => HeaderProbe {
            dpi: None,
            mode: Some(ColorMode::Palette),
        },
        ImageFormat::Tiff => probe_tiff(bytes),
        _ => HeaderProbe::default(),
    }
}

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes(data.get(at..at + 2)?.try_into().ok()?))
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes(data.get(at..at + 4)?.try_into().ok()?))
}

fn le_u16(data: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes(data.get(at..at + 2)?.try_into().ok()?))
}

fn le_u32(data: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(data.get(at..at + 4)?.try_into().ok()?))
}

fn le_i32(data: &[u8], at: usize) -> Option<i32> {
    Some(i32::from_le_bytes(data.get(at..at + 4)?.try_into().ok()?))
}

// --- JPEG ---

fn probe_jpeg(data: &[u8]) -> HeaderProbe {
    let mut out = HeaderProbe::default();
    if data.get(0..2) != Some([0xFF, 0xD8].as_slice()) {
        return out;
    }

    let mut i = 2;
    while i + 3 < data.len() {
        if data[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = data[i + 1];
        // Fill bytes and standalone markers carry no length
        if marker == 0xFF {
            i += 1;
            continue;
        }
        if marker == 0x01 || (0xD0..=0xD8).contains(&marker) {
            i += 2;
            continue;
        }
        // Start of scan: headers are over
        if marker == 0xDA || marker == 0xD9 {
            break;
        }
        let Some(seg_len) = be_u16(data, i + 2).map(usize::from) else {
            break;
        };
        let seg_end = (i + 2 + seg_len).min(data.len());
        let segment = &data[(i + 4).min(seg_end)..seg_end];

        match marker {
            // APP0 / JFIF density
            0xE0 if segment.starts_with(b"JFIF\0") && out.dpi.is_none() => {
                let unit = segment.get(7).copied();
                if let (Some(x), Some(y)) = (be_u16(segment, 8), be_u16(segment, 10)) {
                    out.dpi = match unit {
                        Some(1) => Some((f64::from(x), f64::from(y))),
                        Some(2) => Some((f64::from(x) * CM_PER_INCH, f64::from(y) * CM_PER_INCH)),
                        _ => None,
                    };
                }
            }
            // SOFn, excluding DHT (C4), JPG (C8) and DAC (CC)
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                out.mode = match segment.get(5).copied() {
                    Some(1) => Some(ColorMode::Grayscale),
                    Some(3) => Some(ColorMode::Rgb),
                    Some(4) => Some(ColorMode::Cmyk),
                    _ => None,
                };
            }
            _ => {}
        }
        i += 2 + seg_len;
    }

    if out.dpi.is_none() {
        out.dpi = exif_resolution(data);
    }
    out
}

// --- PNG ---

fn probe_png(data: &[u8]) -> HeaderProbe {
    let mut out = HeaderProbe::default();
    if data.get(0..8) != Some(b"\x89PNG\r\n\x1a\n".as_slice()) {
        return out;
    }

    let mut i = 8;
    while let (Some(len), Some(kind)) = (be_u32(data, i), data.get(i + 4..i + 8)) {
        let len = len as usize;
        let body = i + 8;
        match kind {
            b"IHDR" => {
                let depth = data.get(body + 8).copied();
                out.mode = match (data.get(body + 9).copied(), depth) {
                    (Some(0), Some(1)) => Some(ColorMode::Bilevel),
                    (Some(0), Some(16)) => Some(ColorMode::Gray16),
                    (Some(0), _) => Some(ColorMode::Grayscale),
                    (Some(2), _) => Some(ColorMode::Rgb),
                    (Some(3), _) => Some(ColorMode::Palette),
                    (Some(4), _) => Some(ColorMode::GrayscaleAlpha),
                    (Some(6), _) => Some(ColorMode::Rgba),
                    _ => None,
                };
            }
            b"pHYs" => {
                // Unit 1 is "meter"; unit 0 only states an aspect ratio
                if let (Some(x), Some(y), Some(1)) =
                    (be_u32(data, body), be_u32(data, body + 4), data.get(body + 8).copied())
                {
                    out.dpi = Some((f64::from(x) * INCH_PER_METER, f64::from(y) * INCH_PER_METER));
                }
            }
            b"IDAT" | b"IEND" => break,
            _ => {}
        }
        // length + type + data + crc
        i = body + len + 4;
    }
    out
}

// --- BMP ---

fn probe_bmp(data: &[u8]) -> HeaderProbe {
    let mut out = HeaderProbe::default();
    if data.get(0..2) != Some(b"BM".as_slice()) {
        return out;
    }
    let Some(header_size) = le_u32(data, 14) else {
        return out;
    };

    // OS/2 core header keeps the bit depth elsewhere and has no resolution
    let bpp = if header_size == 12 {
        le_u16(data, 24)
    } else {
        le_u16(data, 28)
    };
    if matches!(bpp, Some(1 | 2 | 4 | 8)) {
        out.mode = Some(ColorMode::Palette);
    }

    if header_size >= 40 {
        if let (Some(x), Some(y)) = (le_i32(data, 38), le_i32(data, 42)) {
            out.dpi = Some((f64::from(x) * INCH_PER_METER, f64::from(y) * INCH_PER_METER));
        }
    }
    out
}

// --- TIFF ---

fn probe_tiff(data: &[u8]) -> HeaderProbe {
    let Ok(exif) = Reader::new().read_from_container(&mut Cursor::new(data)) else {
        return HeaderProbe::default();
    };
    let mode = exif
        .get_field(Tag::PhotometricInterpretation, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .and_then(|photometric| match photometric {
            3 => Some(ColorMode::Palette),
            5 => Some(ColorMode::Cmyk),
            _ => None,
        });
    HeaderProbe {
        dpi: resolution_from(&exif),
        mode,
    }
}

// --- EXIF ---

fn exif_resolution(data: &[u8]) -> Option<(f64, f64)> {
    let exif = Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()?;
    resolution_from(&exif)
}

/// X/Y resolution in dpi. ResolutionUnit 1 means "no absolute unit".
fn resolution_from(exif: &exif::Exif) -> Option<(f64, f64)> {
    let unit = exif
        .get_field(Tag::ResolutionUnit, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(2);
    if unit == 1 {
        return None;
    }
    let x = rational_field(exif, Tag::XResolution)?;
    let y = rational_field(exif, Tag::YResolution).unwrap_or(x);
    let scale = if unit == 3 { CM_PER_INCH } else { 1.0 };
    Some((x * scale, y * scale))
}

fn rational_field(exif: &exif::Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Rational(values) => values.first().map(|r| r.to_f64()),
        other => other.get_uint(0).map(f64::from),
    }
}
