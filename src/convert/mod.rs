//! The pixel-format conversion engine.
//!
//! Every supported `(source, target)` pair goes through the same two
//! steps: the source scan line is lifted into a canonical RGBA row
//! (8-bit canonical for sources with components up to 8 bits, 16-bit
//! canonical otherwise), then a per-target kernel writes the output row,
//! optionally compositing translucent pixels against a caller-supplied
//! background. Pairs outside the supported set fail with
//! [`Error::UnsupportedConversion`].

mod kernels;

use bitflags::bitflags;
use bytemuck::pod_read_unaligned;

use crate::image::{Image, Palette};
use crate::pixel::PixelFormat;
use crate::pixel::PixelFormat as Pf;
use crate::{Error, Result};

use kernels::*;

bitflags! {
    /// Behavior switches for [`convert_with_options`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ConversionFlags: u32 {
        /// Composite translucent pixels against the background when the
        /// target has no alpha channel.
        const BLEND_ALPHA = 1 << 0;
    }
}

/// Options for pixel-format conversion.
#[derive(Clone, Debug)]
pub struct ConversionOptions {
    pub options: ConversionFlags,
    /// Background for blending into 8-bit-deep targets.
    pub background24: [u8; 3],
    /// Background for blending into 16-bit-deep targets.
    pub background48: [u16; 3],
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            options: ConversionFlags::empty(),
            background24: [0, 0, 0],
            background48: [0, 0, 0],
        }
    }
}

impl ConversionOptions {
    /// Blend against a uniform 8-bit background (widened for 16-bit
    /// targets).
    pub fn blend_with(background: [u8; 3]) -> Self {
        Self {
            options: ConversionFlags::BLEND_ALPHA,
            background24: background,
            background48: [
                widen(background[0]),
                widen(background[1]),
                widen(background[2]),
            ],
        }
    }
}

/// Convert `image` to `target_format` with default options.
pub fn convert(image: &Image, target_format: PixelFormat) -> Result<Image> {
    convert_with_options(image, target_format, &ConversionOptions::default())
}

/// Convert `image` to `target_format`.
///
/// Converting to the image's own format returns a pixel-identical copy.
pub fn convert_with_options(
    image: &Image,
    target_format: PixelFormat,
    options: &ConversionOptions,
) -> Result<Image> {
    image.check_valid()?;

    if target_format == image.pixel_format {
        return Ok(image.clone());
    }

    let depth = source_depth(image.pixel_format).ok_or(Error::UnsupportedConversion(
        image.pixel_format,
        target_format,
    ))?;
    if !target_supported(target_format) {
        return Err(Error::UnsupportedConversion(
            image.pixel_format,
            target_format,
        ));
    }

    let palette_lut = match &image.palette {
        Some(palette) if image.pixel_format.is_indexed() => Some(PaletteLut::build(palette)?),
        None if image.pixel_format.is_indexed() => return Err(Error::MissingPalette),
        _ => None,
    };

    let mut out = Image::new(image.width, image.height, target_format)?;
    out.iccp = image.iccp.clone();
    out.meta_data = image.meta_data.clone();
    out.resolution = image.resolution;
    out.source_image = image.source_image.clone();
    out.delay = image.delay;
    out.orientation = image.orientation;

    let width = image.width as usize;
    match depth {
        Depth::Eight => {
            let mut canon = vec![Rgba32::default(); width];
            for y in 0..image.height {
                lift_row32(image, y, palette_lut.as_ref(), &mut canon)?;
                write_row32(&canon, out.row_mut(y), target_format, options);
            }
        }
        Depth::Sixteen => {
            let mut canon = vec![Rgba64::default(); width];
            for y in 0..image.height {
                lift_row64(image, y, &mut canon);
                write_row64(&canon, out.row_mut(y), target_format, options);
            }
        }
    }

    Ok(out)
}

// ── Support matrix ──────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum Depth {
    Eight,
    Sixteen,
}

/// Canonical depth a source format lifts to; `None` when the engine
/// cannot read the format (the packed 10/12-bit YUV variants).
fn source_depth(format: PixelFormat) -> Option<Depth> {
    match format {
        Pf::Indexed1
        | Pf::Indexed2
        | Pf::Indexed4
        | Pf::Indexed8
        | Pf::Gray1
        | Pf::Gray2
        | Pf::Gray4
        | Pf::Gray8
        | Pf::GrayAlpha8
        | Pf::GrayAlpha16
        | Pf::Rgb555
        | Pf::Bgr555
        | Pf::Rgb565
        | Pf::Bgr565
        | Pf::Rgb24
        | Pf::Bgr24
        | Pf::Rgba32
        | Pf::Bgra32
        | Pf::Argb32
        | Pf::Abgr32
        | Pf::Rgbx32
        | Pf::Bgrx32
        | Pf::Xrgb32
        | Pf::Xbgr32
        | Pf::Yuv24
        | Pf::Yuva32
        | Pf::Cmyk32
        | Pf::Cmyka40 => Some(Depth::Eight),
        Pf::Gray16
        | Pf::GrayAlpha32
        | Pf::Rgb48
        | Pf::Bgr48
        | Pf::Rgba64
        | Pf::Bgra64
        | Pf::Argb64
        | Pf::Abgr64
        | Pf::Yuv48
        | Pf::Yuva64
        | Pf::Cmyk64
        | Pf::Cmyka80 => Some(Depth::Sixteen),
        _ => None,
    }
}

/// Formats the engine can write. Indexed and sub-byte grayscale targets
/// would need quantization and are not computed.
fn target_supported(format: PixelFormat) -> bool {
    matches!(
        format,
        Pf::Gray8
            | Pf::Gray16
            | Pf::GrayAlpha8
            | Pf::GrayAlpha16
            | Pf::GrayAlpha32
            | Pf::Rgb555
            | Pf::Bgr555
            | Pf::Rgb565
            | Pf::Bgr565
            | Pf::Rgb24
            | Pf::Bgr24
            | Pf::Rgb48
            | Pf::Bgr48
            | Pf::Rgba32
            | Pf::Bgra32
            | Pf::Argb32
            | Pf::Abgr32
            | Pf::Rgba64
            | Pf::Bgra64
            | Pf::Argb64
            | Pf::Abgr64
            | Pf::Rgbx32
            | Pf::Bgrx32
            | Pf::Xrgb32
            | Pf::Xbgr32
            | Pf::Yuv24
            | Pf::Yuva32
            | Pf::Yuv48
            | Pf::Yuva64
            | Pf::Cmyk32
            | Pf::Cmyk64
            | Pf::Cmyka40
            | Pf::Cmyka80
    )
}

// ── Palette lookup ──────────────────────────────────────────────────

struct PaletteLut {
    entries: Vec<Rgba32>,
}

impl PaletteLut {
    fn build(palette: &Palette) -> Result<Self> {
        let entry_bytes = Palette::entry_bytes(palette.pixel_format)?;
        let mut entries = Vec::with_capacity(palette.color_count);
        for chunk in palette.data.chunks_exact(entry_bytes) {
            let px = match palette.pixel_format {
                Pf::Rgb24 => Rgba32 {
                    r: chunk[0],
                    g: chunk[1],
                    b: chunk[2],
                    a: 255,
                },
                Pf::Bgr24 => Rgba32 {
                    r: chunk[2],
                    g: chunk[1],
                    b: chunk[0],
                    a: 255,
                },
                Pf::Rgba32 => Rgba32 {
                    r: chunk[0],
                    g: chunk[1],
                    b: chunk[2],
                    a: chunk[3],
                },
                Pf::Bgra32 => Rgba32 {
                    r: chunk[2],
                    g: chunk[1],
                    b: chunk[0],
                    a: chunk[3],
                },
                other => return Err(Error::UnsupportedPixelFormat(other)),
            };
            entries.push(px);
        }
        Ok(Self { entries })
    }

    fn get(&self, index: usize) -> Result<Rgba32> {
        self.entries.get(index).copied().ok_or_else(|| {
            Error::BrokenImage(format!(
                "palette index {index} is out of range [0; {})",
                self.entries.len()
            ))
        })
    }
}

// ── Row lift: source scan line → canonical RGBA ─────────────────────

#[inline]
fn get_u16(bytes: &[u8], offset: usize) -> u16 {
    pod_read_unaligned::<u16>(&bytes[offset..offset + 2])
}

/// Unpack sub-byte samples (MSB first) and scale to 8 bits.
fn lift_packed_row(row: &[u8], bits: u32, width: usize, out: &mut [u8]) {
    let per_byte = 8 / bits as usize;
    let max = (1u16 << bits) - 1;
    for (x, slot) in out.iter_mut().take(width).enumerate() {
        let byte = row[x / per_byte];
        let shift = 8 - bits as usize * (x % per_byte + 1);
        let value = u16::from(byte >> shift) & max;
        *slot = (value * 255 / max) as u8;
    }
}

fn lift_row32(
    image: &Image,
    y: u32,
    palette: Option<&PaletteLut>,
    out: &mut [Rgba32],
) -> Result<()> {
    let row = image.row(y);
    let width = image.width as usize;

    match image.pixel_format {
        Pf::Indexed1 | Pf::Indexed2 | Pf::Indexed4 => {
            let lut = palette.ok_or(Error::MissingPalette)?;
            let bits = image.pixel_format.bits_per_pixel();
            let per_byte = 8 / bits as usize;
            let mask = (1usize << bits) - 1;
            for (x, px) in out.iter_mut().take(width).enumerate() {
                let byte = row[x / per_byte];
                let shift = 8 - bits as usize * (x % per_byte + 1);
                let index = usize::from(byte >> shift) & mask;
                *px = lut.get(index)?;
            }
        }
        Pf::Indexed8 => {
            let lut = palette.ok_or(Error::MissingPalette)?;
            for (x, px) in out.iter_mut().take(width).enumerate() {
                *px = lut.get(usize::from(row[x]))?;
            }
        }
        Pf::Gray1 | Pf::Gray2 | Pf::Gray4 => {
            let mut gray = vec![0u8; width];
            lift_packed_row(row, image.pixel_format.bits_per_pixel(), width, &mut gray);
            for (px, g) in out.iter_mut().zip(&gray) {
                *px = Rgba32 {
                    r: *g,
                    g: *g,
                    b: *g,
                    a: 255,
                };
            }
        }
        Pf::Gray8 => {
            for (px, g) in out.iter_mut().zip(row) {
                *px = Rgba32 {
                    r: *g,
                    g: *g,
                    b: *g,
                    a: 255,
                };
            }
        }
        Pf::GrayAlpha8 => {
            // 4 bits gray + 4 bits alpha
            for (px, byte) in out.iter_mut().zip(row) {
                let g = (byte >> 4) * 17;
                let a = (byte & 0x0F) * 17;
                *px = Rgba32 { r: g, g, b: g, a };
            }
        }
        Pf::GrayAlpha16 => {
            for (px, pair) in out.iter_mut().zip(row.chunks_exact(2)) {
                let g = pair[0];
                *px = Rgba32 {
                    r: g,
                    g,
                    b: g,
                    a: pair[1],
                };
            }
        }
        Pf::Rgb555 | Pf::Bgr555 => {
            let swap = image.pixel_format == Pf::Bgr555;
            for (x, px) in out.iter_mut().take(width).enumerate() {
                let v = get_u16(row, x * 2);
                let (c1, c2, c3) = (expand5(v >> 10 & 31), expand5(v >> 5 & 31), expand5(v & 31));
                let (r, b) = if swap { (c3, c1) } else { (c1, c3) };
                *px = Rgba32 {
                    r,
                    g: c2,
                    b,
                    a: 255,
                };
            }
        }
        Pf::Rgb565 | Pf::Bgr565 => {
            let swap = image.pixel_format == Pf::Bgr565;
            for (x, px) in out.iter_mut().take(width).enumerate() {
                let v = get_u16(row, x * 2);
                let (c1, c2, c3) = (expand5(v >> 11 & 31), expand6(v >> 5 & 63), expand5(v & 31));
                let (r, b) = if swap { (c3, c1) } else { (c1, c3) };
                *px = Rgba32 {
                    r,
                    g: c2,
                    b,
                    a: 255,
                };
            }
        }
        Pf::Rgb24 | Pf::Bgr24 => {
            let swap = image.pixel_format == Pf::Bgr24;
            for (px, chunk) in out.iter_mut().zip(row.chunks_exact(3)) {
                let (r, b) = if swap {
                    (chunk[2], chunk[0])
                } else {
                    (chunk[0], chunk[2])
                };
                *px = Rgba32 {
                    r,
                    g: chunk[1],
                    b,
                    a: 255,
                };
            }
        }
        Pf::Rgba32
        | Pf::Bgra32
        | Pf::Argb32
        | Pf::Abgr32
        | Pf::Rgbx32
        | Pf::Bgrx32
        | Pf::Xrgb32
        | Pf::Xbgr32 => {
            let (ri, gi, bi, ai) = channel_offsets(image.pixel_format);
            let opaque = !image.pixel_format.has_alpha();
            for (px, chunk) in out.iter_mut().zip(row.chunks_exact(4)) {
                *px = Rgba32 {
                    r: chunk[ri],
                    g: chunk[gi],
                    b: chunk[bi],
                    a: if opaque { 255 } else { chunk[ai] },
                };
            }
        }
        Pf::Yuv24 => {
            for (px, chunk) in out.iter_mut().zip(row.chunks_exact(3)) {
                let (r, g, b) = ycbcr_to_rgb8(chunk[0], chunk[1], chunk[2]);
                *px = Rgba32 { r, g, b, a: 255 };
            }
        }
        Pf::Yuva32 => {
            for (px, chunk) in out.iter_mut().zip(row.chunks_exact(4)) {
                let (r, g, b) = ycbcr_to_rgb8(chunk[0], chunk[1], chunk[2]);
                *px = Rgba32 {
                    r,
                    g,
                    b,
                    a: chunk[3],
                };
            }
        }
        Pf::Cmyk32 => {
            for (px, chunk) in out.iter_mut().zip(row.chunks_exact(4)) {
                let (r, g, b) = cmyk8_to_rgb8(chunk[0], chunk[1], chunk[2], chunk[3]);
                *px = Rgba32 { r, g, b, a: 255 };
            }
        }
        Pf::Cmyka40 => {
            for (px, chunk) in out.iter_mut().zip(row.chunks_exact(5)) {
                let (r, g, b) = cmyk8_to_rgb8(chunk[0], chunk[1], chunk[2], chunk[3]);
                *px = Rgba32 {
                    r,
                    g,
                    b,
                    a: chunk[4],
                };
            }
        }
        other => return Err(Error::UnsupportedConversion(other, other)),
    }
    Ok(())
}

fn lift_row64(image: &Image, y: u32, out: &mut [Rgba64]) {
    let row = image.row(y);

    match image.pixel_format {
        Pf::Gray16 => {
            for (x, px) in out.iter_mut().enumerate() {
                let g = get_u16(row, x * 2);
                *px = Rgba64 {
                    r: g,
                    g,
                    b: g,
                    a: 65535,
                };
            }
        }
        Pf::GrayAlpha32 => {
            for (x, px) in out.iter_mut().enumerate() {
                let g = get_u16(row, x * 4);
                let a = get_u16(row, x * 4 + 2);
                *px = Rgba64 { r: g, g, b: g, a };
            }
        }
        Pf::Rgb48 | Pf::Bgr48 => {
            let swap = image.pixel_format == Pf::Bgr48;
            for (x, px) in out.iter_mut().enumerate() {
                let c1 = get_u16(row, x * 6);
                let c2 = get_u16(row, x * 6 + 2);
                let c3 = get_u16(row, x * 6 + 4);
                let (r, b) = if swap { (c3, c1) } else { (c1, c3) };
                *px = Rgba64 {
                    r,
                    g: c2,
                    b,
                    a: 65535,
                };
            }
        }
        Pf::Rgba64 | Pf::Bgra64 | Pf::Argb64 | Pf::Abgr64 => {
            let (ri, gi, bi, ai) = channel_offsets(image.pixel_format);
            for (x, px) in out.iter_mut().enumerate() {
                let base = x * 8;
                *px = Rgba64 {
                    r: get_u16(row, base + ri * 2),
                    g: get_u16(row, base + gi * 2),
                    b: get_u16(row, base + bi * 2),
                    a: get_u16(row, base + ai * 2),
                };
            }
        }
        Pf::Yuv48 => {
            for (x, px) in out.iter_mut().enumerate() {
                let (r, g, b) = ycbcr_to_rgb16(
                    get_u16(row, x * 6),
                    get_u16(row, x * 6 + 2),
                    get_u16(row, x * 6 + 4),
                );
                *px = Rgba64 { r, g, b, a: 65535 };
            }
        }
        Pf::Yuva64 => {
            for (x, px) in out.iter_mut().enumerate() {
                let (r, g, b) = ycbcr_to_rgb16(
                    get_u16(row, x * 8),
                    get_u16(row, x * 8 + 2),
                    get_u16(row, x * 8 + 4),
                );
                *px = Rgba64 {
                    r,
                    g,
                    b,
                    a: get_u16(row, x * 8 + 6),
                };
            }
        }
        Pf::Cmyk64 => {
            for (x, px) in out.iter_mut().enumerate() {
                let (r, g, b) = cmyk16_to_rgb16(
                    get_u16(row, x * 8),
                    get_u16(row, x * 8 + 2),
                    get_u16(row, x * 8 + 4),
                    get_u16(row, x * 8 + 6),
                );
                *px = Rgba64 { r, g, b, a: 65535 };
            }
        }
        Pf::Cmyka80 => {
            for (x, px) in out.iter_mut().enumerate() {
                let (r, g, b) = cmyk16_to_rgb16(
                    get_u16(row, x * 10),
                    get_u16(row, x * 10 + 2),
                    get_u16(row, x * 10 + 4),
                    get_u16(row, x * 10 + 6),
                );
                *px = Rgba64 {
                    r,
                    g,
                    b,
                    a: get_u16(row, x * 10 + 8),
                };
            }
        }
        // source_depth() admits only the formats above
        _ => unreachable!("lift_row64 called for non-16-bit source"),
    }
}

/// Channel indexes of (r, g, b, a/x) within a 4-channel pixel.
fn channel_offsets(format: PixelFormat) -> (usize, usize, usize, usize) {
    match format {
        Pf::Rgba32 | Pf::Rgbx32 | Pf::Rgba64 => (0, 1, 2, 3),
        Pf::Bgra32 | Pf::Bgrx32 | Pf::Bgra64 => (2, 1, 0, 3),
        Pf::Argb32 | Pf::Xrgb32 | Pf::Argb64 => (1, 2, 3, 0),
        Pf::Abgr32 | Pf::Xbgr32 | Pf::Abgr64 => (3, 2, 1, 0),
        _ => unreachable!("channel_offsets on non-4-channel format"),
    }
}

// ── Row write: canonical RGBA → target scan line ────────────────────

fn put_u16(bytes: &mut [u8], offset: usize, v: u16) {
    bytes[offset..offset + 2].copy_from_slice(&v.to_ne_bytes());
}

fn write_row32(canon: &[Rgba32], row: &mut [u8], target: PixelFormat, options: &ConversionOptions) {
    match target {
        Pf::Gray8 => {
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb8(*px, options);
                row[x] = luma8(r, g, b);
            }
        }
        Pf::Gray16 => {
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb16(px.widened(), options);
                put_u16(row, x * 2, luma16(r, g, b));
            }
        }
        Pf::GrayAlpha8 => {
            for (x, px) in canon.iter().enumerate() {
                let gray = luma8(px.r, px.g, px.b);
                row[x] = (gray & 0xF0) | (px.a >> 4);
            }
        }
        Pf::GrayAlpha16 => {
            for (x, px) in canon.iter().enumerate() {
                row[x * 2] = luma8(px.r, px.g, px.b);
                row[x * 2 + 1] = px.a;
            }
        }
        Pf::GrayAlpha32 => {
            for (x, px) in canon.iter().enumerate() {
                let wide = px.widened();
                put_u16(row, x * 4, luma16(wide.r, wide.g, wide.b));
                put_u16(row, x * 4 + 2, wide.a);
            }
        }
        Pf::Rgb555 | Pf::Bgr555 => {
            let (rs, gs, bs) = if target == Pf::Rgb555 {
                (10, 5, 0)
            } else {
                (0, 5, 10)
            };
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb8(*px, options);
                put_u16(row, x * 2, pack555(r, g, b, rs, gs, bs));
            }
        }
        Pf::Rgb565 | Pf::Bgr565 => {
            let (rs, gs, bs) = if target == Pf::Rgb565 {
                (11, 5, 0)
            } else {
                (0, 5, 11)
            };
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb8(*px, options);
                put_u16(row, x * 2, pack565(r, g, b, rs, gs, bs));
            }
        }
        Pf::Rgb24 | Pf::Bgr24 => {
            let swap = target == Pf::Bgr24;
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb8(*px, options);
                let (c1, c3) = if swap { (b, r) } else { (r, b) };
                row[x * 3] = c1;
                row[x * 3 + 1] = g;
                row[x * 3 + 2] = c3;
            }
        }
        Pf::Rgb48 | Pf::Bgr48 => {
            let swap = target == Pf::Bgr48;
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb16(px.widened(), options);
                let (c1, c3) = if swap { (b, r) } else { (r, b) };
                put_u16(row, x * 6, c1);
                put_u16(row, x * 6 + 2, g);
                put_u16(row, x * 6 + 4, c3);
            }
        }
        Pf::Rgba32 | Pf::Bgra32 | Pf::Argb32 | Pf::Abgr32 => {
            let (ri, gi, bi, ai) = channel_offsets(target);
            for (x, px) in canon.iter().enumerate() {
                row[x * 4 + ri] = px.r;
                row[x * 4 + gi] = px.g;
                row[x * 4 + bi] = px.b;
                row[x * 4 + ai] = px.a;
            }
        }
        Pf::Rgbx32 | Pf::Bgrx32 | Pf::Xrgb32 | Pf::Xbgr32 => {
            let (ri, gi, bi, xi) = channel_offsets(target);
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb8(*px, options);
                row[x * 4 + ri] = r;
                row[x * 4 + gi] = g;
                row[x * 4 + bi] = b;
                row[x * 4 + xi] = 255;
            }
        }
        Pf::Rgba64 | Pf::Bgra64 | Pf::Argb64 | Pf::Abgr64 => {
            let (ri, gi, bi, ai) = channel_offsets(target);
            for (x, px) in canon.iter().enumerate() {
                let wide = px.widened();
                put_u16(row, x * 8 + ri * 2, wide.r);
                put_u16(row, x * 8 + gi * 2, wide.g);
                put_u16(row, x * 8 + bi * 2, wide.b);
                put_u16(row, x * 8 + ai * 2, wide.a);
            }
        }
        Pf::Yuv24 => {
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb8(*px, options);
                let (y, cb, cr) = rgb8_to_ycbcr(r, g, b);
                row[x * 3] = y;
                row[x * 3 + 1] = cb;
                row[x * 3 + 2] = cr;
            }
        }
        Pf::Yuva32 => {
            for (x, px) in canon.iter().enumerate() {
                let (y, cb, cr) = rgb8_to_ycbcr(px.r, px.g, px.b);
                row[x * 4] = y;
                row[x * 4 + 1] = cb;
                row[x * 4 + 2] = cr;
                row[x * 4 + 3] = px.a;
            }
        }
        Pf::Yuv48 => {
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb16(px.widened(), options);
                let (y, cb, cr) = rgb16_to_ycbcr(r, g, b);
                put_u16(row, x * 6, y);
                put_u16(row, x * 6 + 2, cb);
                put_u16(row, x * 6 + 4, cr);
            }
        }
        Pf::Yuva64 => {
            for (x, px) in canon.iter().enumerate() {
                let wide = px.widened();
                let (y, cb, cr) = rgb16_to_ycbcr(wide.r, wide.g, wide.b);
                put_u16(row, x * 8, y);
                put_u16(row, x * 8 + 2, cb);
                put_u16(row, x * 8 + 4, cr);
                put_u16(row, x * 8 + 6, wide.a);
            }
        }
        Pf::Cmyk32 => {
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb8(*px, options);
                let (c, m, y, k) = rgb8_to_cmyk32(r, g, b);
                row[x * 4..x * 4 + 4].copy_from_slice(&[c, m, y, k]);
            }
        }
        Pf::Cmyka40 => {
            for (x, px) in canon.iter().enumerate() {
                let (c, m, y, k) = rgb8_to_cmyk32(px.r, px.g, px.b);
                row[x * 5..x * 5 + 5].copy_from_slice(&[c, m, y, k, px.a]);
            }
        }
        Pf::Cmyk64 => {
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb16(px.widened(), options);
                let (c, m, y, k) = rgb16_to_cmyk64(r, g, b);
                put_u16(row, x * 8, c);
                put_u16(row, x * 8 + 2, m);
                put_u16(row, x * 8 + 4, y);
                put_u16(row, x * 8 + 6, k);
            }
        }
        Pf::Cmyka80 => {
            for (x, px) in canon.iter().enumerate() {
                let wide = px.widened();
                let (c, m, y, k) = rgb16_to_cmyk64(wide.r, wide.g, wide.b);
                put_u16(row, x * 10, c);
                put_u16(row, x * 10 + 2, m);
                put_u16(row, x * 10 + 4, y);
                put_u16(row, x * 10 + 6, k);
                put_u16(row, x * 10 + 8, wide.a);
            }
        }
        _ => unreachable!("target_supported() admits only the formats above"),
    }
}

fn write_row64(canon: &[Rgba64], row: &mut [u8], target: PixelFormat, options: &ConversionOptions) {
    match target {
        Pf::Gray8 => {
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb16(*px, options);
                row[x] = luma8(narrow(r), narrow(g), narrow(b));
            }
        }
        Pf::Gray16 => {
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb16(*px, options);
                put_u16(row, x * 2, luma16(r, g, b));
            }
        }
        Pf::GrayAlpha32 => {
            for (x, px) in canon.iter().enumerate() {
                put_u16(row, x * 4, luma16(px.r, px.g, px.b));
                put_u16(row, x * 4 + 2, px.a);
            }
        }
        Pf::Rgb48 | Pf::Bgr48 => {
            let swap = target == Pf::Bgr48;
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb16(*px, options);
                let (c1, c3) = if swap { (b, r) } else { (r, b) };
                put_u16(row, x * 6, c1);
                put_u16(row, x * 6 + 2, g);
                put_u16(row, x * 6 + 4, c3);
            }
        }
        Pf::Rgba64 | Pf::Bgra64 | Pf::Argb64 | Pf::Abgr64 => {
            let (ri, gi, bi, ai) = channel_offsets(target);
            for (x, px) in canon.iter().enumerate() {
                put_u16(row, x * 8 + ri * 2, px.r);
                put_u16(row, x * 8 + gi * 2, px.g);
                put_u16(row, x * 8 + bi * 2, px.b);
                put_u16(row, x * 8 + ai * 2, px.a);
            }
        }
        Pf::Yuv48 => {
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb16(*px, options);
                let (y, cb, cr) = rgb16_to_ycbcr(r, g, b);
                put_u16(row, x * 6, y);
                put_u16(row, x * 6 + 2, cb);
                put_u16(row, x * 6 + 4, cr);
            }
        }
        Pf::Yuva64 => {
            for (x, px) in canon.iter().enumerate() {
                let (y, cb, cr) = rgb16_to_ycbcr(px.r, px.g, px.b);
                put_u16(row, x * 8, y);
                put_u16(row, x * 8 + 2, cb);
                put_u16(row, x * 8 + 4, cr);
                put_u16(row, x * 8 + 6, px.a);
            }
        }
        Pf::Cmyk64 => {
            for (x, px) in canon.iter().enumerate() {
                let (r, g, b) = blend_rgb16(*px, options);
                let (c, m, y, k) = rgb16_to_cmyk64(r, g, b);
                put_u16(row, x * 8, c);
                put_u16(row, x * 8 + 2, m);
                put_u16(row, x * 8 + 4, y);
                put_u16(row, x * 8 + 6, k);
            }
        }
        Pf::Cmyka80 => {
            for (x, px) in canon.iter().enumerate() {
                let (c, m, y, k) = rgb16_to_cmyk64(px.r, px.g, px.b);
                put_u16(row, x * 10, c);
                put_u16(row, x * 10 + 2, m);
                put_u16(row, x * 10 + 4, y);
                put_u16(row, x * 10 + 6, k);
                put_u16(row, x * 10 + 8, px.a);
            }
        }
        Pf::GrayAlpha8 | Pf::GrayAlpha16 | Pf::Rgba32 | Pf::Bgra32 | Pf::Argb32 | Pf::Abgr32
        | Pf::Yuva32 | Pf::Cmyka40 => {
            // alpha-preserving 8-bit-deep targets: narrow, no blending
            let narrowed: Vec<Rgba32> = canon.iter().map(|px| px.narrowed()).collect();
            write_row32(&narrowed, row, target, options);
        }
        Pf::Rgb555 | Pf::Bgr555 | Pf::Rgb565 | Pf::Bgr565 | Pf::Rgb24 | Pf::Bgr24 | Pf::Yuv24
        | Pf::Cmyk32 | Pf::Rgbx32 | Pf::Bgrx32 | Pf::Xrgb32 | Pf::Xbgr32 => {
            // blend at the wider 16-bit depth, then narrow for writing
            let blended: Vec<Rgba32> = canon
                .iter()
                .map(|px| {
                    let (r, g, b) = blend_rgb16(*px, options);
                    Rgba32 {
                        r: narrow(r),
                        g: narrow(g),
                        b: narrow(b),
                        a: 255,
                    }
                })
                .collect();
            write_row32(&blended, row, target, &ConversionOptions::default());
        }
        _ => unreachable!("target_supported() admits only the formats above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_image(pixels: &[u8], width: u32, height: u32) -> Image {
        let mut image = Image::new(width, height, PixelFormat::Rgb24).unwrap();
        image.pixels.copy_from_slice(pixels);
        image
    }

    #[test]
    fn rgb24_to_gray8_uses_bt601() {
        let image = rgb_image(&[100, 150, 200], 1, 1);
        let gray = convert(&image, PixelFormat::Gray8).unwrap();
        assert_eq!(gray.pixels, vec![141]);
    }

    #[test]
    fn conversion_to_same_format_is_identity() {
        let image = rgb_image(&[1, 2, 3, 4, 5, 6], 2, 1);
        let same = convert(&image, PixelFormat::Rgb24).unwrap();
        assert_eq!(same.pixels, image.pixels);
    }

    #[test]
    fn rgba_blend_against_white() {
        let mut image = Image::new(1, 1, PixelFormat::Rgba32).unwrap();
        image.pixels.copy_from_slice(&[255, 0, 0, 128]);
        let options = ConversionOptions::blend_with([255, 255, 255]);
        let rgb = convert_with_options(&image, PixelFormat::Rgb24, &options).unwrap();
        assert_eq!(rgb.pixels, vec![255, 127, 127]);
    }

    #[test]
    fn fully_transparent_blend_is_background() {
        let mut image = Image::new(2, 1, PixelFormat::Rgba32).unwrap();
        image
            .pixels
            .copy_from_slice(&[10, 20, 30, 0, 10, 20, 30, 0]);
        let options = ConversionOptions::blend_with([40, 50, 60]);
        let rgb = convert_with_options(&image, PixelFormat::Rgb24, &options).unwrap();
        assert_eq!(rgb.pixels, vec![40, 50, 60, 40, 50, 60]);
    }

    #[test]
    fn opaque_pixels_ignore_background() {
        let mut image = Image::new(1, 1, PixelFormat::Rgba32).unwrap();
        image.pixels.copy_from_slice(&[9, 8, 7, 255]);
        let options = ConversionOptions::blend_with([255, 255, 255]);
        let rgb = convert_with_options(&image, PixelFormat::Rgb24, &options).unwrap();
        assert_eq!(rgb.pixels, vec![9, 8, 7]);
    }

    #[test]
    fn alpha_expand_fills_opaque() {
        let image = rgb_image(&[1, 2, 3], 1, 1);
        let rgba = convert(&image, PixelFormat::Rgba32).unwrap();
        assert_eq!(rgba.pixels, vec![1, 2, 3, 255]);
        let bgra = convert(&image, PixelFormat::Bgra32).unwrap();
        assert_eq!(bgra.pixels, vec![3, 2, 1, 255]);
    }

    #[test]
    fn width_expansion_replicates_bytes() {
        let image = rgb_image(&[0xAB, 0x00, 0xFF], 1, 1);
        let wide = convert(&image, PixelFormat::Rgb48).unwrap();
        let r = get_u16(&wide.pixels, 0);
        let g = get_u16(&wide.pixels, 2);
        let b = get_u16(&wide.pixels, 4);
        assert_eq!((r, g, b), (0xABAB, 0x0000, 0xFFFF));

        let back = convert(&wide, PixelFormat::Rgb24).unwrap();
        assert_eq!(back.pixels, image.pixels);
    }

    #[test]
    fn indexed_lookup_and_bad_index() {
        let palette =
            Palette::from_data(PixelFormat::Rgb24, 2, vec![10, 20, 30, 40, 50, 60]).unwrap();
        let mut image = Image::new(2, 1, PixelFormat::Indexed8).unwrap();
        image.pixels.copy_from_slice(&[1, 0]);
        image.palette = Some(palette);

        let rgb = convert(&image, PixelFormat::Rgb24).unwrap();
        assert_eq!(rgb.pixels, vec![40, 50, 60, 10, 20, 30]);

        image.pixels[0] = 5;
        match convert(&image, PixelFormat::Rgb24) {
            Err(Error::BrokenImage(_)) => {}
            other => panic!("expected BrokenImage, got {other:?}"),
        }
    }

    #[test]
    fn packed_rgb565_roundtrip() {
        let image = rgb_image(&[255, 0, 0, 0, 255, 0, 0, 0, 255], 3, 1);
        let packed = convert(&image, PixelFormat::Rgb565).unwrap();
        let back = convert(&packed, PixelFormat::Rgb24).unwrap();
        assert_eq!(back.pixels, image.pixels);
    }

    #[test]
    fn unsupported_pairs_are_reported() {
        let image = rgb_image(&[0, 0, 0], 1, 1);
        match convert(&image, PixelFormat::Yuv30) {
            Err(Error::UnsupportedConversion(PixelFormat::Rgb24, PixelFormat::Yuv30)) => {}
            other => panic!("expected UnsupportedConversion, got {other:?}"),
        }
        match convert(&image, PixelFormat::Indexed8) {
            Err(Error::UnsupportedConversion(..)) => {}
            other => panic!("expected UnsupportedConversion, got {other:?}"),
        }
    }

    #[test]
    fn cmyk_roundtrip_for_primaries() {
        let image = rgb_image(&[255, 0, 0, 0, 0, 0, 255, 255, 255], 3, 1);
        let cmyk = convert(&image, PixelFormat::Cmyk32).unwrap();
        let back = convert(&cmyk, PixelFormat::Rgb24).unwrap();
        assert_eq!(back.pixels, image.pixels);
    }
}
