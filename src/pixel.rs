//! The closed registry of pixel formats.
//!
//! Every format knows its bits per pixel, whether it carries alpha, and
//! whether it needs a palette. `bytes_per_line` is a pure function of
//! width and format; sub-byte formats (1/2/4 bpp) round up to whole bytes.

use std::fmt;
use std::str::FromStr;

/// Pixel format of an [`Image`](crate::Image) buffer.
///
/// Names carry the total bits per pixel and the semantic component order.
/// `GrayAlpha8` packs 4 bits gray + 4 bits alpha; `GrayAlpha16` is 8+8;
/// `GrayAlpha32` is 16+16. The `X` in `Rgbx32` and friends is padding,
/// not alpha.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Pixel format is not known. Never present on a constructed image.
    Unknown,
    /// "Whatever the source yields natively"; valid only in options.
    Source,

    // Indexed (palette required)
    Indexed1,
    Indexed2,
    Indexed4,
    Indexed8,

    // Grayscale
    Gray1,
    Gray2,
    Gray4,
    Gray8,
    Gray16,
    GrayAlpha8,
    GrayAlpha16,
    GrayAlpha32,

    // Packed 16-bit RGB
    Rgb555,
    Bgr555,
    Rgb565,
    Bgr565,

    // RGB
    Rgb24,
    Bgr24,
    Rgb48,
    Bgr48,

    // RGBA
    Rgba32,
    Bgra32,
    Argb32,
    Abgr32,
    Rgba64,
    Bgra64,
    Argb64,
    Abgr64,

    // RGB with a padding byte (fourth channel ignored)
    Rgbx32,
    Bgrx32,
    Xrgb32,
    Xbgr32,

    // YUV (BT.601)
    Yuv24,
    Yuv30,
    Yuv36,
    Yuv48,
    Yuva32,
    Yuva40,
    Yuva48,
    Yuva64,

    // CMYK
    Cmyk32,
    Cmyk64,
    Cmyka40,
    Cmyka80,
}

impl Default for PixelFormat {
    fn default() -> Self {
        PixelFormat::Unknown
    }
}

impl PixelFormat {
    /// Total bits per pixel. 0 for the `Unknown`/`Source` sentinels.
    pub fn bits_per_pixel(self) -> u32 {
        use PixelFormat::*;
        match self {
            Unknown | Source => 0,
            Indexed1 | Gray1 => 1,
            Indexed2 | Gray2 => 2,
            Indexed4 | Gray4 => 4,
            Indexed8 | Gray8 | GrayAlpha8 => 8,
            Gray16 | GrayAlpha16 | Rgb555 | Bgr555 | Rgb565 | Bgr565 => 16,
            Rgb24 | Bgr24 | Yuv24 => 24,
            Yuv30 => 30,
            GrayAlpha32 | Rgba32 | Bgra32 | Argb32 | Abgr32 | Rgbx32 | Bgrx32 | Xrgb32 | Xbgr32
            | Yuva32 | Cmyk32 => 32,
            Yuv36 => 36,
            Yuva40 | Cmyka40 => 40,
            Rgb48 | Bgr48 | Yuv48 | Yuva48 => 48,
            Rgba64 | Bgra64 | Argb64 | Abgr64 | Yuva64 | Cmyk64 => 64,
            Cmyka80 => 80,
        }
    }

    /// Whether pixels carry an alpha channel.
    pub fn has_alpha(self) -> bool {
        use PixelFormat::*;
        matches!(
            self,
            GrayAlpha8
                | GrayAlpha16
                | GrayAlpha32
                | Rgba32
                | Bgra32
                | Argb32
                | Abgr32
                | Rgba64
                | Bgra64
                | Argb64
                | Abgr64
                | Yuva32
                | Yuva40
                | Yuva48
                | Yuva64
                | Cmyka40
                | Cmyka80
        )
    }

    /// Whether pixels are palette indices.
    pub fn is_indexed(self) -> bool {
        use PixelFormat::*;
        matches!(self, Indexed1 | Indexed2 | Indexed4 | Indexed8)
    }

    /// Whether pixels are grayscale (with or without alpha).
    pub fn is_grayscale(self) -> bool {
        use PixelFormat::*;
        matches!(
            self,
            Gray1 | Gray2 | Gray4 | Gray8 | Gray16 | GrayAlpha8 | GrayAlpha16 | GrayAlpha32
        )
    }

    /// Unpadded bytes needed for one scan line of `width` pixels.
    pub fn bytes_per_line(self, width: u32) -> u32 {
        bytes_per_line(width, self)
    }
}

/// Unpadded bytes needed for one scan line of `width` pixels in `format`.
///
/// Sub-byte formats round up: `ceil(width * bpp / 8)`.
pub fn bytes_per_line(width: u32, format: PixelFormat) -> u32 {
    let bits = u64::from(width) * u64::from(format.bits_per_pixel());
    ((bits + 7) / 8) as u32
}

// ── Descriptor names ────────────────────────────────────────────────

const NAMES: &[(PixelFormat, &str)] = &[
    (PixelFormat::Unknown, "unknown"),
    (PixelFormat::Source, "source"),
    (PixelFormat::Indexed1, "bpp1-indexed"),
    (PixelFormat::Indexed2, "bpp2-indexed"),
    (PixelFormat::Indexed4, "bpp4-indexed"),
    (PixelFormat::Indexed8, "bpp8-indexed"),
    (PixelFormat::Gray1, "bpp1-grayscale"),
    (PixelFormat::Gray2, "bpp2-grayscale"),
    (PixelFormat::Gray4, "bpp4-grayscale"),
    (PixelFormat::Gray8, "bpp8-grayscale"),
    (PixelFormat::Gray16, "bpp16-grayscale"),
    (PixelFormat::GrayAlpha8, "bpp8-grayscale-alpha"),
    (PixelFormat::GrayAlpha16, "bpp16-grayscale-alpha"),
    (PixelFormat::GrayAlpha32, "bpp32-grayscale-alpha"),
    (PixelFormat::Rgb555, "bpp16-rgb555"),
    (PixelFormat::Bgr555, "bpp16-bgr555"),
    (PixelFormat::Rgb565, "bpp16-rgb565"),
    (PixelFormat::Bgr565, "bpp16-bgr565"),
    (PixelFormat::Rgb24, "bpp24-rgb"),
    (PixelFormat::Bgr24, "bpp24-bgr"),
    (PixelFormat::Rgb48, "bpp48-rgb"),
    (PixelFormat::Bgr48, "bpp48-bgr"),
    (PixelFormat::Rgba32, "bpp32-rgba"),
    (PixelFormat::Bgra32, "bpp32-bgra"),
    (PixelFormat::Argb32, "bpp32-argb"),
    (PixelFormat::Abgr32, "bpp32-abgr"),
    (PixelFormat::Rgba64, "bpp64-rgba"),
    (PixelFormat::Bgra64, "bpp64-bgra"),
    (PixelFormat::Argb64, "bpp64-argb"),
    (PixelFormat::Abgr64, "bpp64-abgr"),
    (PixelFormat::Rgbx32, "bpp32-rgbx"),
    (PixelFormat::Bgrx32, "bpp32-bgrx"),
    (PixelFormat::Xrgb32, "bpp32-xrgb"),
    (PixelFormat::Xbgr32, "bpp32-xbgr"),
    (PixelFormat::Yuv24, "bpp24-yuv"),
    (PixelFormat::Yuv30, "bpp30-yuv"),
    (PixelFormat::Yuv36, "bpp36-yuv"),
    (PixelFormat::Yuv48, "bpp48-yuv"),
    (PixelFormat::Yuva32, "bpp32-yuva"),
    (PixelFormat::Yuva40, "bpp40-yuva"),
    (PixelFormat::Yuva48, "bpp48-yuva"),
    (PixelFormat::Yuva64, "bpp64-yuva"),
    (PixelFormat::Cmyk32, "bpp32-cmyk"),
    (PixelFormat::Cmyk64, "bpp64-cmyk"),
    (PixelFormat::Cmyka40, "bpp40-cmyka"),
    (PixelFormat::Cmyka80, "bpp80-cmyka"),
];

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = NAMES
            .iter()
            .find(|(pf, _)| pf == self)
            .map(|(_, n)| *n)
            .unwrap_or("unknown");
        f.write_str(name)
    }
}

impl FromStr for PixelFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let lower = s.to_ascii_lowercase();
        NAMES
            .iter()
            .find(|(_, n)| *n == lower)
            .map(|(pf, _)| *pf)
            .ok_or_else(|| crate::Error::UnsupportedFormat(format!("pixel format name '{s}'")))
    }
}
