//! Per-pixel kernels shared by the conversion routines: component
//! widening/narrowing, BT.601 luma and YCbCr, CMYK, and alpha blending
//! against a caller-supplied background.
//!
//! Scan-line traversal lives in the parent module; everything here works
//! on one canonical pixel at a time.

use super::{ConversionFlags, ConversionOptions};

/// Canonical 8-bit-per-component pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Rgba32 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Canonical 16-bit-per-component pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Rgba64 {
    pub r: u16,
    pub g: u16,
    pub b: u16,
    pub a: u16,
}

/// Width expansion: `x' = x << 8 | x`.
#[inline]
pub(crate) fn widen(c: u8) -> u16 {
    u16::from(c) << 8 | u16::from(c)
}

/// Width narrowing: high-byte truncation.
#[inline]
pub(crate) fn narrow(c: u16) -> u8 {
    (c >> 8) as u8
}

impl Rgba32 {
    #[inline]
    pub(crate) fn widened(self) -> Rgba64 {
        Rgba64 {
            r: widen(self.r),
            g: widen(self.g),
            b: widen(self.b),
            a: widen(self.a),
        }
    }
}

impl Rgba64 {
    #[inline]
    pub(crate) fn narrowed(self) -> Rgba32 {
        Rgba32 {
            r: narrow(self.r),
            g: narrow(self.g),
            b: narrow(self.b),
            a: narrow(self.a),
        }
    }
}

// ── Alpha blending ──────────────────────────────────────────────────

/// RGB triple after optional compositing against `background24`.
///
/// With BLEND_ALPHA set and a translucent pixel, each component becomes
/// `a*src + (1-a)*background`; otherwise alpha is simply dropped.
#[inline]
pub(crate) fn blend_rgb8(px: Rgba32, options: &ConversionOptions) -> (u8, u8, u8) {
    if px.a < 255 && options.options.contains(ConversionFlags::BLEND_ALPHA) {
        let opacity = f64::from(px.a) / 255.0;
        let [bg_r, bg_g, bg_b] = options.background24;
        (
            (opacity * f64::from(px.r) + (1.0 - opacity) * f64::from(bg_r)) as u8,
            (opacity * f64::from(px.g) + (1.0 - opacity) * f64::from(bg_g)) as u8,
            (opacity * f64::from(px.b) + (1.0 - opacity) * f64::from(bg_b)) as u8,
        )
    } else {
        (px.r, px.g, px.b)
    }
}

/// 16-bit variant of [`blend_rgb8`], compositing against `background48`.
#[inline]
pub(crate) fn blend_rgb16(px: Rgba64, options: &ConversionOptions) -> (u16, u16, u16) {
    if px.a < 65535 && options.options.contains(ConversionFlags::BLEND_ALPHA) {
        let opacity = f64::from(px.a) / 65535.0;
        let [bg_r, bg_g, bg_b] = options.background48;
        (
            (opacity * f64::from(px.r) + (1.0 - opacity) * f64::from(bg_r)) as u16,
            (opacity * f64::from(px.g) + (1.0 - opacity) * f64::from(bg_g)) as u16,
            (opacity * f64::from(px.b) + (1.0 - opacity) * f64::from(bg_b)) as u16,
        )
    } else {
        (px.r, px.g, px.b)
    }
}

// ── Grayscale (BT.601 luma) ─────────────────────────────────────────

pub(crate) const R_TO_GRAY: f64 = 0.299;
pub(crate) const G_TO_GRAY: f64 = 0.587;
pub(crate) const B_TO_GRAY: f64 = 0.114;

/// `round(0.299 R + 0.587 G + 0.114 B)`.
#[inline]
pub(crate) fn luma8(r: u8, g: u8, b: u8) -> u8 {
    let y = R_TO_GRAY * f64::from(r) + G_TO_GRAY * f64::from(g) + B_TO_GRAY * f64::from(b);
    y.round().min(255.0) as u8
}

#[inline]
pub(crate) fn luma16(r: u16, g: u16, b: u16) -> u16 {
    let y = R_TO_GRAY * f64::from(r) + G_TO_GRAY * f64::from(g) + B_TO_GRAY * f64::from(b);
    y.round().min(65535.0) as u16
}

// ── YCbCr (BT.601, full range, Cb/Cr centered) ──────────────────────

#[inline]
pub(crate) fn rgb8_to_ycbcr(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (f64::from(r), f64::from(g), f64::from(b));
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b;
    (
        y.round().clamp(0.0, 255.0) as u8,
        cb.round().clamp(0.0, 255.0) as u8,
        cr.round().clamp(0.0, 255.0) as u8,
    )
}

#[inline]
pub(crate) fn ycbcr_to_rgb8(y: u8, cb: u8, cr: u8) -> (u8, u8, u8) {
    let y = f64::from(y);
    let cb = f64::from(cb) - 128.0;
    let cr = f64::from(cr) - 128.0;
    let r = y + 1.402 * cr;
    let g = y - 0.344136 * cb - 0.714136 * cr;
    let b = y + 1.772 * cb;
    (
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    )
}

#[inline]
pub(crate) fn rgb16_to_ycbcr(r: u16, g: u16, b: u16) -> (u16, u16, u16) {
    let (r, g, b) = (f64::from(r), f64::from(g), f64::from(b));
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 32768.0 - 0.168736 * r - 0.331264 * g + 0.5 * b;
    let cr = 32768.0 + 0.5 * r - 0.418688 * g - 0.081312 * b;
    (
        y.round().clamp(0.0, 65535.0) as u16,
        cb.round().clamp(0.0, 65535.0) as u16,
        cr.round().clamp(0.0, 65535.0) as u16,
    )
}

#[inline]
pub(crate) fn ycbcr_to_rgb16(y: u16, cb: u16, cr: u16) -> (u16, u16, u16) {
    let y = f64::from(y);
    let cb = f64::from(cb) - 32768.0;
    let cr = f64::from(cr) - 32768.0;
    let r = y + 1.402 * cr;
    let g = y - 0.344136 * cb - 0.714136 * cr;
    let b = y + 1.772 * cb;
    (
        r.round().clamp(0.0, 65535.0) as u16,
        g.round().clamp(0.0, 65535.0) as u16,
        b.round().clamp(0.0, 65535.0) as u16,
    )
}

// ── CMYK ────────────────────────────────────────────────────────────

/// ε keeps the C/M/Y division defined at pure black.
const CMYK_EPSILON: f64 = 1e-10;

#[inline]
pub(crate) fn rgb_to_cmyk(r: f64, g: f64, b: f64) -> (f64, f64, f64, f64) {
    let k = 1.0 - r.max(g).max(b);
    let c = (1.0 - r - k) / (1.0 - k + CMYK_EPSILON);
    let m = (1.0 - g - k) / (1.0 - k + CMYK_EPSILON);
    let y = (1.0 - b - k) / (1.0 - k + CMYK_EPSILON);
    (c, m, y, k)
}

#[inline]
pub(crate) fn rgb8_to_cmyk32(r: u8, g: u8, b: u8) -> (u8, u8, u8, u8) {
    let (c, m, y, k) = rgb_to_cmyk(
        f64::from(r) / 255.0,
        f64::from(g) / 255.0,
        f64::from(b) / 255.0,
    );
    (
        (c * 255.0).round() as u8,
        (m * 255.0).round() as u8,
        (y * 255.0).round() as u8,
        (k * 255.0).round() as u8,
    )
}

#[inline]
pub(crate) fn rgb16_to_cmyk64(r: u16, g: u16, b: u16) -> (u16, u16, u16, u16) {
    let (c, m, y, k) = rgb_to_cmyk(
        f64::from(r) / 65535.0,
        f64::from(g) / 65535.0,
        f64::from(b) / 65535.0,
    );
    (
        (c * 65535.0).round() as u16,
        (m * 65535.0).round() as u16,
        (y * 65535.0).round() as u16,
        (k * 65535.0).round() as u16,
    )
}

#[inline]
pub(crate) fn cmyk8_to_rgb8(c: u8, m: u8, y: u8, k: u8) -> (u8, u8, u8) {
    let k = f64::from(k) / 255.0;
    let to = |v: u8| ((1.0 - f64::from(v) / 255.0) * (1.0 - k) * 255.0).round() as u8;
    (to(c), to(m), to(y))
}

#[inline]
pub(crate) fn cmyk16_to_rgb16(c: u16, m: u16, y: u16, k: u16) -> (u16, u16, u16) {
    let k = f64::from(k) / 65535.0;
    let to = |v: u16| ((1.0 - f64::from(v) / 65535.0) * (1.0 - k) * 65535.0).round() as u16;
    (to(c), to(m), to(y))
}

// ── Packed 16-bit RGB ───────────────────────────────────────────────

/// Expand a 5-bit field to 8 bits with bit replication.
#[inline]
pub(crate) fn expand5(c: u16) -> u8 {
    ((c << 3) | (c >> 2)) as u8
}

/// Expand a 6-bit field to 8 bits with bit replication.
#[inline]
pub(crate) fn expand6(c: u16) -> u8 {
    ((c << 2) | (c >> 4)) as u8
}

/// Assemble a 555 word; shifts select the component order.
#[inline]
pub(crate) fn pack555(r: u8, g: u8, b: u8, r_shift: u32, g_shift: u32, b_shift: u32) -> u16 {
    (u16::from(r >> 3) << r_shift) | (u16::from(g >> 3) << g_shift) | (u16::from(b >> 3) << b_shift)
}

/// Assemble a 565 word; shifts select the component order.
#[inline]
pub(crate) fn pack565(r: u8, g: u8, b: u8, r_shift: u32, g_shift: u32, b_shift: u32) -> u16 {
    (u16::from(r >> 3) << r_shift) | (u16::from(g >> 2) << g_shift) | (u16::from(b >> 3) << b_shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widen_and_narrow() {
        assert_eq!(widen(0x00), 0x0000);
        assert_eq!(widen(0xFF), 0xFFFF);
        assert_eq!(widen(0xAB), 0xABAB);
        assert_eq!(narrow(0xABCD), 0xAB);
    }

    #[test]
    fn luma_rounds_to_nearest() {
        // 0.299*100 + 0.587*150 + 0.114*200 = 140.75 -> 141
        assert_eq!(luma8(100, 150, 200), 141);
        assert_eq!(luma8(0, 0, 0), 0);
        assert_eq!(luma8(255, 255, 255), 255);
    }

    #[test]
    fn cmyk_black_does_not_divide_by_zero() {
        let (c, m, y, k) = rgb8_to_cmyk32(0, 0, 0);
        assert_eq!((c, m, y), (0, 0, 0));
        assert_eq!(k, 255);
        assert_eq!(cmyk8_to_rgb8(c, m, y, k), (0, 0, 0));
    }

    #[test]
    fn ycbcr_roundtrip_stays_close() {
        for (r, g, b) in [(255u8, 0u8, 0u8), (12, 200, 99), (128, 128, 128)] {
            let (y, cb, cr) = rgb8_to_ycbcr(r, g, b);
            let (r2, g2, b2) = ycbcr_to_rgb8(y, cb, cr);
            assert!((i32::from(r2) - i32::from(r)).unsigned_abs() <= 2);
            assert!((i32::from(g2) - i32::from(g)).unsigned_abs() <= 2);
            assert!((i32::from(b2) - i32::from(b)).unsigned_abs() <= 2);
        }
    }

    #[test]
    fn packed_field_expansion() {
        assert_eq!(expand5(0b11111), 255);
        assert_eq!(expand5(0), 0);
        assert_eq!(expand6(0b111111), 255);
    }
}
