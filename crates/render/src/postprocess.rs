//! Deterministic post-processing of captured frames.
//!
//! Every frame is decoded, resized to the configured resolution with a
//! Lanczos filter and re-encoded in the configured format. Formats without
//! an alpha channel are flattened onto the background colour first.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage, RgbaImage};
use shotforge_core::error::CoreError;
use shotforge_core::settings::{OutputFormat, OutputSettings, MAX_RESOLUTION};

use crate::error::PostProcessError;

/// Target encoding for captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub quality: u8,
    pub background: [u8; 3],
}

impl FrameFormat {
    pub fn from_settings(output: &OutputSettings) -> Result<Self, CoreError> {
        let (width, height) = output.dimensions()?;
        if width == 0 || height == 0 || width > MAX_RESOLUTION || height > MAX_RESOLUTION {
            return Err(CoreError::Validation(format!(
                "Output resolution {width}x{height} is outside 1-{MAX_RESOLUTION} per side"
            )));
        }
        Ok(Self {
            width,
            height,
            format: output.format,
            quality: output.quality.clamp(1, 100),
            background: output.background_rgb()?,
        })
    }

    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }
}

/// An encoded frame ready to be written.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode, resize and re-encode a captured frame.
///
/// CPU-bound; async callers should go through [`process_frame_blocking`].
pub fn process_frame(raw: &[u8], target: &FrameFormat) -> Result<ProcessedFrame, PostProcessError> {
    let decoded = image::load_from_memory(raw).map_err(PostProcessError::Decode)?;
    let resized: RgbaImage = image::imageops::resize(
        &decoded.to_rgba8(),
        target.width,
        target.height,
        FilterType::Lanczos3,
    );

    let mut out = Cursor::new(Vec::new());
    match target.format {
        OutputFormat::Png => PngEncoder::new(&mut out)
            .write_image(resized.as_raw(), target.width, target.height, ExtendedColorType::Rgba8)
            .map_err(PostProcessError::Encode)?,
        OutputFormat::Webp => WebPEncoder::new_lossless(&mut out)
            .write_image(resized.as_raw(), target.width, target.height, ExtendedColorType::Rgba8)
            .map_err(PostProcessError::Encode)?,
        OutputFormat::Jpeg => {
            let flat = flatten(&resized, target.background);
            JpegEncoder::new_with_quality(&mut out, target.quality)
                .write_image(flat.as_raw(), target.width, target.height, ExtendedColorType::Rgb8)
                .map_err(PostProcessError::Encode)?
        }
    }

    Ok(ProcessedFrame {
        bytes: out.into_inner(),
        width: target.width,
        height: target.height,
    })
}

/// Run [`process_frame`] on the blocking thread pool.
pub async fn process_frame_blocking(
    raw: Vec<u8>,
    target: FrameFormat,
) -> Result<ProcessedFrame, PostProcessError> {
    tokio::task::spawn_blocking(move || process_frame(&raw, &target))
        .await
        .map_err(|e| PostProcessError::Task(e.to_string()))?
}

/// Composite RGBA pixels over an opaque background.
fn flatten(image: &RgbaImage, background: [u8; 3]) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, a] = image.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |fg: u8, bg: u8| {
            ((u16::from(fg) * alpha + u16::from(bg) * (255 - alpha) + 127) / 255) as u8
        };
        Rgb([
            blend(r, background[0]),
            blend(g, background[1]),
            blend(b, background[2]),
        ])
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use image::{GenericImageView, Rgba};

    use super::*;

    fn png(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(pixel));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn target(format: OutputFormat) -> FrameFormat {
        FrameFormat {
            width: 64,
            height: 32,
            format,
            quality: 90,
            background: [255, 255, 255],
        }
    }

    #[test]
    fn oversized_targets_are_refused_before_any_allocation() {
        let output = OutputSettings {
            format: OutputFormat::Png,
            resolution: "100000x100000".into(),
            quality: 90,
            background: "#FFFFFF".into(),
        };
        assert_matches!(FrameFormat::from_settings(&output), Err(CoreError::Validation(_)));
    }

    #[test]
    fn resizes_to_target_resolution() {
        let frame = process_frame(&png(200, 100, [10, 20, 30, 255]), &target(OutputFormat::Png)).unwrap();
        assert_eq!((frame.width, frame.height), (64, 32));
        let decoded = image::load_from_memory(&frame.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (64, 32));
    }

    #[test]
    fn jpeg_is_flattened_onto_background() {
        let frame =
            process_frame(&png(40, 40, [0, 0, 0, 0]), &target(OutputFormat::Jpeg)).unwrap();
        let decoded = image::load_from_memory(&frame.bytes).unwrap().to_rgb8();
        let Rgb([r, g, b]) = *decoded.get_pixel(10, 10);
        assert!(r > 240 && g > 240 && b > 240, "expected white, got {r},{g},{b}");
    }

    #[test]
    fn webp_output_decodes() {
        let frame = process_frame(&png(16, 16, [200, 0, 0, 255]), &target(OutputFormat::Webp)).unwrap();
        assert_eq!(
            image::guess_format(&frame.bytes).unwrap(),
            image::ImageFormat::WebP
        );
    }

    #[test]
    fn same_input_gives_same_output() {
        let raw = png(50, 50, [1, 2, 3, 255]);
        let a = process_frame(&raw, &target(OutputFormat::Png)).unwrap();
        let b = process_frame(&raw, &target(OutputFormat::Png)).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn garbage_input_is_a_decode_error() {
        assert_matches!(
            process_frame(b"not an image", &target(OutputFormat::Png)),
            Err(PostProcessError::Decode(_))
        );
    }
}
