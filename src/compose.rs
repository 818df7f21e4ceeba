use crate::grid::GridSpec;
use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};
use mime::Mime;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
}

#[derive(Debug, Clone, Copy)]
pub struct Encoding {
    pub format: OutputFormat,
    pub jpeg_quality: u8,
}

impl OutputFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "webp" => Some(Self::Webp),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    pub fn mime(&self) -> Mime {
        match self {
            Self::Webp => "image/webp".parse().unwrap_or(mime::APPLICATION_OCTET_STREAM),
            Self::Png => mime::IMAGE_PNG,
            Self::Jpeg => mime::IMAGE_JPEG,
        }
    }
}

/// Pastes `tiles` onto a `background` canvas in row-major cell order and
/// encodes the result. Cells with no tile keep the background.
pub fn compose(
    canvas_width: u32,
    canvas_height: u32,
    background: Rgba<u8>,
    grid: &GridSpec,
    tiles: &HashMap<usize, RgbaImage>,
    encoding: Encoding,
) -> Result<Vec<u8>> {
    let canvas = assemble(canvas_width, canvas_height, background, grid, tiles);
    encode_image(&canvas, encoding)
}

pub fn assemble(
    canvas_width: u32,
    canvas_height: u32,
    background: Rgba<u8>,
    grid: &GridSpec,
    tiles: &HashMap<usize, RgbaImage>,
) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(canvas_width, canvas_height, background);
    for index in 0..grid.cells() {
        let Some(tile) = tiles.get(&index) else {
            continue;
        };
        let (x, y) = grid.cell_origin(index);
        image::imageops::replace(&mut canvas, tile, x as i64, y as i64);
    }
    canvas
}

pub fn encode_image(canvas: &RgbaImage, encoding: Encoding) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    match encoding.format {
        OutputFormat::Webp => {
            let encoder = WebPEncoder::new_lossless(&mut bytes);
            encoder.write_image(
                canvas.as_raw(),
                canvas.width(),
                canvas.height(),
                ExtendedColorType::Rgba8,
            )?;
        }
        OutputFormat::Png => {
            let encoder = PngEncoder::new(&mut bytes);
            encoder.write_image(
                canvas.as_raw(),
                canvas.width(),
                canvas.height(),
                ExtendedColorType::Rgba8,
            )?;
        }
        OutputFormat::Jpeg => {
            let rgb = image::DynamicImage::ImageRgba8(canvas.clone()).to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut bytes, encoding.jpeg_quality);
            encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?;
        }
    }
    Ok(bytes)
}
