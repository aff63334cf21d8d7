//! PNG and APNG, implemented directly on zlib streams.
//!
//! The engine speaks PNG 1.2 plus the APNG extension chunks
//! (`acTL`/`fcTL`/`fdAT`): chunk-level I/O with CRC-32 verification, all
//! five scanline filters, Adam7 de-interlacing, text/EXIF/ICC/resolution
//! metadata, and the APNG dispose/blend state machine over a persistent
//! previous-frame canvas.

mod chunks;
mod decode;
mod encode;

pub(crate) use decode::PngLoadSession;
pub(crate) use encode::PngSaveSession;

use crate::codec::{Codec, CodecFeatures, CodecInfo, LoadFeatures, LoadSession, SaveFeatures,
                   SaveSession};
use crate::image::Compression;
use crate::io::IoStream;
use crate::options::{LoadOptions, SaveOptions};
use crate::pixel::PixelFormat;
use crate::Result;

pub(crate) const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

// Color types
pub(crate) const COLOR_GRAY: u8 = 0;
pub(crate) const COLOR_RGB: u8 = 2;
pub(crate) const COLOR_PALETTE: u8 = 3;
pub(crate) const COLOR_GRAY_ALPHA: u8 = 4;
pub(crate) const COLOR_RGBA: u8 = 6;

// APNG dispose/blend operators
pub(crate) const DISPOSE_NONE: u8 = 0;
pub(crate) const DISPOSE_BACKGROUND: u8 = 1;
pub(crate) const DISPOSE_PREVIOUS: u8 = 2;
pub(crate) const BLEND_SOURCE: u8 = 0;
pub(crate) const BLEND_OVER: u8 = 1;

/// Native pixel format of a `color_type x bit_depth` combination.
pub(crate) fn native_pixel_format(color_type: u8, bit_depth: u8) -> Option<PixelFormat> {
    use PixelFormat::*;
    match (color_type, bit_depth) {
        (COLOR_GRAY, 1) => Some(Gray1),
        (COLOR_GRAY, 2) => Some(Gray2),
        (COLOR_GRAY, 4) => Some(Gray4),
        (COLOR_GRAY, 8) => Some(Gray8),
        (COLOR_GRAY, 16) => Some(Gray16),
        (COLOR_RGB, 8) => Some(Rgb24),
        (COLOR_RGB, 16) => Some(Rgb48),
        (COLOR_PALETTE, 1) => Some(Indexed1),
        (COLOR_PALETTE, 2) => Some(Indexed2),
        (COLOR_PALETTE, 4) => Some(Indexed4),
        (COLOR_PALETTE, 8) => Some(Indexed8),
        (COLOR_GRAY_ALPHA, 8) => Some(GrayAlpha16),
        (COLOR_GRAY_ALPHA, 16) => Some(GrayAlpha32),
        (COLOR_RGBA, 8) => Some(Rgba32),
        (COLOR_RGBA, 16) => Some(Rgba64),
        _ => None,
    }
}

/// IHDR `(color_type, bit_depth)` for a pixel format to be written.
/// BGR/ARGB orderings are stored in RGB order; the writer swizzles.
pub(crate) fn ihdr_color_type(format: PixelFormat) -> Option<(u8, u8)> {
    use PixelFormat::*;
    match format {
        Indexed1 => Some((COLOR_PALETTE, 1)),
        Indexed2 => Some((COLOR_PALETTE, 2)),
        Indexed4 => Some((COLOR_PALETTE, 4)),
        Indexed8 => Some((COLOR_PALETTE, 8)),
        Gray1 => Some((COLOR_GRAY, 1)),
        Gray2 => Some((COLOR_GRAY, 2)),
        Gray4 => Some((COLOR_GRAY, 4)),
        Gray8 => Some((COLOR_GRAY, 8)),
        Gray16 => Some((COLOR_GRAY, 16)),
        GrayAlpha16 => Some((COLOR_GRAY_ALPHA, 8)),
        GrayAlpha32 => Some((COLOR_GRAY_ALPHA, 16)),
        Rgb24 | Bgr24 => Some((COLOR_RGB, 8)),
        Rgb48 | Bgr48 => Some((COLOR_RGB, 16)),
        Rgba32 | Bgra32 | Argb32 | Abgr32 => Some((COLOR_RGBA, 8)),
        Rgba64 | Bgra64 | Argb64 | Abgr64 => Some((COLOR_RGBA, 16)),
        _ => None,
    }
}

/// Output formats the loader can be asked for besides `Source`.
pub(crate) fn supported_load_output(format: PixelFormat) -> bool {
    use PixelFormat::*;
    matches!(
        format,
        Source | Rgb24 | Bgr24 | Rgba32 | Bgra32 | Argb32 | Abgr32
    )
}

// ── Adam7 interlacing ───────────────────────────────────────────────

/// Per-pass `(x_start, y_start, x_step, y_step)`.
pub(crate) const ADAM7: [(u32, u32, u32, u32); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

/// Dimensions of one reduced image; (0, 0) when the pass is empty.
pub(crate) fn pass_size(pass: usize, width: u32, height: u32) -> (u32, u32) {
    let (x0, y0, dx, dy) = ADAM7[pass];
    let w = (width + dx - 1 - x0) / dx;
    let h = (height + dy - 1 - y0) / dy;
    if width > x0 && height > y0 {
        (w, h)
    } else {
        (0, 0)
    }
}

// ── Codec registration ──────────────────────────────────────────────

static PNG_INFO: CodecInfo = CodecInfo {
    name: "png",
    version: "1.2.0",
    description: "Portable Network Graphics",
    extensions: &["png", "apng"],
    mime_types: &["image/png", "image/apng"],
    magic_numbers: &["89 50 4e 47 0d 0a 1a 0a"],
    load_features: LoadFeatures {
        pixel_formats: &[
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Rgba32,
            PixelFormat::Bgra32,
            PixelFormat::Argb32,
            PixelFormat::Abgr32,
        ],
        features: CodecFeatures::STATIC
            .union(CodecFeatures::ANIMATED)
            .union(CodecFeatures::META_DATA)
            .union(CodecFeatures::ICCP)
            .union(CodecFeatures::INTERLACED),
        tuning_keys: &[],
    },
    save_features: SaveFeatures {
        pixel_formats: &[
            PixelFormat::Indexed1,
            PixelFormat::Indexed2,
            PixelFormat::Indexed4,
            PixelFormat::Indexed8,
            PixelFormat::Gray8,
            PixelFormat::Gray16,
            PixelFormat::GrayAlpha16,
            PixelFormat::GrayAlpha32,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Rgb48,
            PixelFormat::Bgr48,
            PixelFormat::Rgba32,
            PixelFormat::Bgra32,
            PixelFormat::Argb32,
            PixelFormat::Abgr32,
            PixelFormat::Rgba64,
            PixelFormat::Bgra64,
            PixelFormat::Argb64,
            PixelFormat::Abgr64,
        ],
        compressions: &[Compression::Deflate],
        features: CodecFeatures::STATIC
            .union(CodecFeatures::META_DATA)
            .union(CodecFeatures::ICCP)
            .union(CodecFeatures::INTERLACED),
        tuning_keys: &["png-filter", "png-compression-strategy"],
    },
};

/// The PNG/APNG codec.
pub struct PngCodec;

impl Codec for PngCodec {
    fn info(&self) -> &'static CodecInfo {
        &PNG_INFO
    }

    fn load_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &LoadOptions,
    ) -> Result<Box<dyn LoadSession + 'io>> {
        Ok(Box::new(PngLoadSession::open(io, options)?))
    }

    fn save_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &SaveOptions,
    ) -> Result<Box<dyn SaveSession + 'io>> {
        Ok(Box::new(PngSaveSession::open(io, options)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_type_mapping_roundtrips() {
        for format in [
            PixelFormat::Indexed8,
            PixelFormat::Gray8,
            PixelFormat::Gray16,
            PixelFormat::GrayAlpha16,
            PixelFormat::Rgb24,
            PixelFormat::Rgb48,
            PixelFormat::Rgba32,
            PixelFormat::Rgba64,
        ] {
            let (ct, bd) = ihdr_color_type(format).unwrap();
            assert_eq!(native_pixel_format(ct, bd), Some(format));
        }
        assert!(ihdr_color_type(PixelFormat::Cmyk32).is_none());
        assert!(native_pixel_format(COLOR_RGB, 4).is_none());
    }

    #[test]
    fn adam7_pass_sizes_cover_the_image() {
        let (w, h) = (13u32, 7u32);
        let total: u64 = (0..7)
            .map(|p| {
                let (pw, ph) = pass_size(p, w, h);
                u64::from(pw) * u64::from(ph)
            })
            .sum();
        assert_eq!(total, u64::from(w) * u64::from(h));

        // 1x1 image decodes entirely in the first pass
        assert_eq!(pass_size(0, 1, 1), (1, 1));
        for pass in 1..7 {
            let (pw, ph) = pass_size(pass, 1, 1);
            assert_eq!(pw * ph, 0, "pass {pass}");
        }
    }
}
