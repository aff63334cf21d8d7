//! Load and save options, including per-codec tuning knobs.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::image::Compression;
use crate::limits::Limits;
use crate::meta::Variant;
use crate::pixel::PixelFormat;

bitflags! {
    /// What a loader should fetch beyond the pixels.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LoadFlags: u32 {
        const META_DATA = 1 << 0;
        const ICCP = 1 << 1;
        const SOURCE_IMAGE = 1 << 2;
    }
}

bitflags! {
    /// What a saver should write beyond the pixels.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SaveFlags: u32 {
        const META_DATA = 1 << 0;
        const ICCP = 1 << 1;
        const INTERLACED = 1 << 2;
    }
}

/// String-keyed tuning knobs and special properties.
///
/// Insertion by key replaces; iteration order is unspecified.
pub type TuningMap = HashMap<String, Variant>;

/// Options for a load session.
#[derive(Clone, Debug)]
pub struct LoadOptions {
    pub flags: LoadFlags,
    /// Requested output format; [`PixelFormat::Source`] keeps whatever
    /// the stream yields natively.
    pub output_pixel_format: PixelFormat,
    pub limits: Limits,
    /// Codec-specific knobs (`"video-threads"`, ...). Unknown keys are
    /// silently ignored.
    pub tuning: TuningMap,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            flags: LoadFlags::META_DATA | LoadFlags::ICCP | LoadFlags::SOURCE_IMAGE,
            output_pixel_format: PixelFormat::Source,
            limits: Limits::default(),
            tuning: TuningMap::new(),
        }
    }
}

/// Options for a save session.
#[derive(Clone, Debug)]
pub struct SaveOptions {
    pub flags: SaveFlags,
    /// Requested compression; [`Compression::Unknown`] selects the
    /// codec's default. Codecs reject compressions they cannot produce.
    pub compression: Compression,
    /// Codec-interpreted compression level (PNG clamps to `[1, 9]`).
    pub compression_level: i32,
    /// Codec-specific knobs (`"png-filter"`, `"xpm-name"`, ...).
    pub tuning: TuningMap,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            flags: SaveFlags::META_DATA | SaveFlags::ICCP,
            compression: Compression::Unknown,
            compression_level: 6,
            tuning: TuningMap::new(),
        }
    }
}

// ── Tuning access helpers ───────────────────────────────────────────
//
// Unknown keys are ignored silently; a present key with the wrong
// variant type logs a diagnostic and is ignored.

pub(crate) fn tuning_i64(tuning: &TuningMap, key: &str) -> Option<i64> {
    let value = tuning.get(key)?;
    match value.as_i64() {
        Some(v) => Some(v),
        None => {
            log::warn!("tuning key '{key}' has non-integer value {value:?}, ignoring");
            None
        }
    }
}

pub(crate) fn tuning_str<'a>(tuning: &'a TuningMap, key: &str) -> Option<&'a str> {
    let value = tuning.get(key)?;
    match value.as_str() {
        Some(v) => Some(v),
        None => {
            log::warn!("tuning key '{key}' has non-string value {value:?}, ignoring");
            None
        }
    }
}

#[allow(dead_code)]
pub(crate) fn tuning_bool(tuning: &TuningMap, key: &str) -> Option<bool> {
    let value = tuning.get(key)?;
    match value {
        Variant::Bool(v) => Some(*v),
        other => {
            log::warn!("tuning key '{key}' has non-bool value {other:?}, ignoring");
            None
        }
    }
}

#[allow(dead_code)]
pub(crate) fn tuning_f64(tuning: &TuningMap, key: &str) -> Option<f64> {
    let value = tuning.get(key)?;
    match value.as_f64() {
        Some(v) => Some(v),
        None => {
            log::warn!("tuning key '{key}' has non-float value {value:?}, ignoring");
            None
        }
    }
}
