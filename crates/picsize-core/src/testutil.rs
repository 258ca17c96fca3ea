//! Fixture writers shared by the unit tests.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::{Rgb, RgbImage};
use sha2::{Digest, Sha256};

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

/// RGB PNG with no pHYs chunk.
pub fn write_rgb_png(path: &Path, width: u32, height: u32) {
    gradient(width, height).save(path).unwrap();
}

/// RGB PNG declaring `dpi` through a pHYs chunk (pixels per meter).
pub fn write_png_with_dpi(path: &Path, width: u32, height: u32, dpi: f64) {
    let ppm = (dpi / 0.0254).round() as u32;
    let file = BufWriter::new(File::create(path).unwrap());
    let mut encoder = png::Encoder::new(file, width, height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_pixel_dims(Some(png::PixelDimensions {
        xppu: ppm,
        yppu: ppm,
        unit: png::Unit::Meter,
    }));
    let mut writer = encoder.write_header().unwrap();
    writer
        .write_image_data(gradient(width, height).as_raw())
        .unwrap();
}

/// Indexed-color PNG with a four-entry palette.
pub fn write_palette_png(path: &Path, width: u32, height: u32) {
    let file = BufWriter::new(File::create(path).unwrap());
    let mut encoder = png::Encoder::new(file, width, height);
    encoder.set_color(png::ColorType::Indexed);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_palette(vec![0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255]);
    let mut writer = encoder.write_header().unwrap();
    let data: Vec<u8> = (0..width * height).map(|i| (i % 4) as u8).collect();
    writer.write_image_data(&data).unwrap();
}

pub fn write_jpeg_with_dpi(path: &Path, width: u32, height: u32, dpi: u16) {
    let mut file = BufWriter::new(File::create(path).unwrap());
    let mut encoder = JpegEncoder::new_with_quality(&mut file, 90);
    encoder.set_pixel_density(PixelDensity::dpi(dpi));
    gradient(width, height).write_with_encoder(encoder).unwrap();
}

/// RGB JPEG whose only resolution is an EXIF block: the JFIF header carries
/// an aspect ratio, not a density.
pub fn write_jpeg_with_exif_dpi(path: &Path, width: u32, height: u32, dpi: u32) {
    let mut encoded = Vec::new();
    gradient(width, height)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut encoded, 90))
        .unwrap();
    let mut bytes = encoded[..2].to_vec();
    bytes.extend_from_slice(&exif_app1(dpi));
    bytes.extend_from_slice(&encoded[2..]);
    File::create(path).unwrap().write_all(&bytes).unwrap();
}

/// APP1 segment holding a little-endian TIFF IFD with X/Y resolution in
/// inches.
pub fn exif_app1(dpi: u32) -> Vec<u8> {
    fn entry(ifd: &mut Vec<u8>, tag: u16, kind: u16, value: u32) {
        ifd.extend_from_slice(&tag.to_le_bytes());
        ifd.extend_from_slice(&kind.to_le_bytes());
        ifd.extend_from_slice(&1u32.to_le_bytes());
        ifd.extend_from_slice(&value.to_le_bytes());
    }

    let mut tiff = b"II*\0".to_vec();
    tiff.extend_from_slice(&8u32.to_le_bytes());
    tiff.extend_from_slice(&3u16.to_le_bytes());
    // Rationals follow the IFD: 8 + 2 + 3 * 12 + 4 = 50
    entry(&mut tiff, 0x011A, 5, 50);
    entry(&mut tiff, 0x011B, 5, 58);
    entry(&mut tiff, 0x0128, 3, 2);
    tiff.extend_from_slice(&0u32.to_le_bytes());
    for _ in 0..2 {
        tiff.extend_from_slice(&dpi.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
    }

    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    segment.extend_from_slice(b"Exif\0\0");
    segment.extend_from_slice(&tiff);
    segment
}

pub fn write_gif(path: &Path, width: u32, height: u32) {
    gradient(width, height).save(path).unwrap();
}

/// 24-bit BMP with pixels-per-meter patched in for `dpi`.
pub fn write_bmp_with_dpi(path: &Path, width: u32, height: u32, dpi: f64) {
    gradient(width, height).save(path).unwrap();
    let ppm = ((dpi / 0.0254).round() as i32).to_le_bytes();
    let mut bytes = std::fs::read(path).unwrap();
    bytes[38..42].copy_from_slice(&ppm);
    bytes[42..46].copy_from_slice(&ppm);
    std::fs::write(path, bytes).unwrap();
}

/// RGB TIFF with an explicit resolution and ResolutionUnit.
pub fn write_tiff_with_resolution(
    path: &Path,
    width: u32,
    height: u32,
    unit: tiff::tags::ResolutionUnit,
    value: u32,
) {
    use tiff::encoder::{colortype, Rational, TiffEncoder};

    let mut file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(&mut file).unwrap();
    let mut image = encoder
        .new_image::<colortype::RGB8>(width, height)
        .unwrap();
    image.resolution(unit, Rational { n: value, d: 1 });
    image.write_data(gradient(width, height).as_raw()).unwrap();
}

pub fn sha256_file(path: &Path) -> String {
    let mut bytes = Vec::new();
    File::open(path).unwrap().read_to_end(&mut bytes).unwrap();
    hex::encode(Sha256::digest(&bytes))
}
