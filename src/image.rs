//! The in-memory image entity and its auxiliary structures.

use std::collections::HashMap;

use crate::meta::{MetaData, Variant};
use crate::pixel::{bytes_per_line, PixelFormat};
use crate::{Error, Result};

/// Resolution unit for [`Resolution`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResolutionUnit {
    #[default]
    Unknown,
    Inch,
    Meter,
    Centimeter,
}

/// Physical resolution of an image.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Resolution {
    pub unit: ResolutionUnit,
    pub x: f64,
    pub y: f64,
}

/// Image orientation as stored by the source.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    Normal,
    Rotated90,
    Rotated180,
    Rotated270,
    MirroredHorizontally,
    MirroredVertically,
    MirroredHorizontallyRotated90,
    MirroredHorizontallyRotated270,
}

/// Compression used by the source or requested for saving.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    Unknown,
    None,
    Rle,
    Deflate,
    Lzw,
    Jpeg,
    Hevc,
    Av1,
}

/// Indexed color table.
///
/// `pixel_format` is the layout of `data` entries, one of the small RGB(A)
/// set; `data.len() == color_count * bytes_per_entry`.
#[derive(Clone, Debug, PartialEq)]
pub struct Palette {
    pub pixel_format: PixelFormat,
    pub color_count: usize,
    pub data: Vec<u8>,
}

impl Palette {
    /// An all-black palette of `color_count` entries.
    pub fn new(pixel_format: PixelFormat, color_count: usize) -> Result<Self> {
        let entry_bytes = Self::entry_bytes(pixel_format)?;
        Ok(Self {
            pixel_format,
            color_count,
            data: vec![0; color_count * entry_bytes],
        })
    }

    /// A palette wrapping existing entry data.
    pub fn from_data(pixel_format: PixelFormat, color_count: usize, data: Vec<u8>) -> Result<Self> {
        let entry_bytes = Self::entry_bytes(pixel_format)?;
        if data.len() != color_count * entry_bytes {
            return Err(Error::InvalidImage(format!(
                "palette data is {} bytes, expected {} for {} {} entries",
                data.len(),
                color_count * entry_bytes,
                color_count,
                pixel_format
            )));
        }
        Ok(Self {
            pixel_format,
            color_count,
            data,
        })
    }

    /// Bytes per palette entry implied by the palette's pixel format.
    pub fn entry_bytes(pixel_format: PixelFormat) -> Result<usize> {
        match pixel_format {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Ok(3),
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => Ok(4),
            other => Err(Error::UnsupportedPixelFormat(other)),
        }
    }
}

/// Properties of the original, pre-decode image.
///
/// Purely informational: nothing here constrains the decoded pixel
/// buffer.
#[derive(Clone, Debug, Default)]
pub struct SourceImage {
    pub pixel_format: PixelFormat,
    pub compression: Compression,
    pub orientation: Orientation,
    pub interlaced: bool,
    /// Number of progressive passes the source stores (1 when not
    /// interlaced, 7 for Adam7).
    pub interlaced_passes: u32,
    /// Format-specific read-only facts (`"video-codec"`,
    /// `"xpm-hotspot-x"`, ...).
    pub special_properties: HashMap<String, Variant>,
}

impl SourceImage {
    pub fn new(pixel_format: PixelFormat) -> Self {
        Self {
            pixel_format,
            interlaced_passes: 1,
            ..Default::default()
        }
    }
}

/// The central in-memory image.
///
/// Scan lines live consecutively in `pixels`, `bytes_per_line` apart.
/// Loaders populate every field from the stream; callers build images
/// field-by-field before saving.
#[derive(Clone, Debug, Default)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Stride in bytes; at least the unpadded minimum for the format.
    pub bytes_per_line: u32,
    /// `height * bytes_per_line` bytes; empty on a shell returned by
    /// `seek_next_frame` until the caller allocates.
    pub pixels: Vec<u8>,
    /// Required iff `pixel_format` is indexed.
    pub palette: Option<Palette>,
    /// Opaque ICC profile blob; carried, never applied.
    pub iccp: Option<Vec<u8>>,
    /// Entries in stream order.
    pub meta_data: Vec<MetaData>,
    pub resolution: Option<Resolution>,
    pub source_image: Option<SourceImage>,
    /// Frame delay in milliseconds: negative = not animated,
    /// 0 = unspecified, positive = per-frame delay.
    pub delay: i32,
    pub orientation: Orientation,
}

impl Image {
    /// A shell with shape but no pixel buffer.
    ///
    /// Codecs return these from `seek_next_frame`; call
    /// [`alloc_pixels`](Image::alloc_pixels) to attach the buffer.
    pub fn shell(width: u32, height: u32, pixel_format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::IncorrectDimensions(format!("{width}x{height}")));
        }
        if pixel_format == PixelFormat::Unknown || pixel_format == PixelFormat::Source {
            return Err(Error::UnsupportedPixelFormat(pixel_format));
        }
        Ok(Self {
            width,
            height,
            pixel_format,
            bytes_per_line: bytes_per_line(width, pixel_format),
            delay: -1,
            ..Default::default()
        })
    }

    /// A fully allocated image with a zeroed pixel buffer.
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Result<Self> {
        let mut image = Self::shell(width, height, pixel_format)?;
        image.alloc_pixels()?;
        Ok(image)
    }

    /// Allocate (or re-allocate) the pixel buffer from the announced
    /// shape, zero-filled.
    pub fn alloc_pixels(&mut self) -> Result<()> {
        let size = self.pixels_size()?;
        self.pixels = vec![0; size];
        Ok(())
    }

    /// Expected size of the pixel buffer in bytes.
    pub fn pixels_size(&self) -> Result<usize> {
        (self.height as usize)
            .checked_mul(self.bytes_per_line as usize)
            .ok_or(Error::DimensionsTooLarge {
                width: self.width,
                height: self.height,
            })
    }

    /// One scan line.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.bytes_per_line as usize;
        &self.pixels[start..start + self.bytes_per_line as usize]
    }

    /// One mutable scan line.
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.bytes_per_line as usize;
        let bpl = self.bytes_per_line as usize;
        &mut self.pixels[start..start + bpl]
    }

    /// Validate the invariants of a well-formed image prior to saving.
    pub fn check_valid(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::IncorrectDimensions(format!(
                "{}x{}",
                self.width, self.height
            )));
        }
        if self.pixel_format == PixelFormat::Unknown || self.pixel_format == PixelFormat::Source {
            return Err(Error::UnsupportedPixelFormat(self.pixel_format));
        }
        let min_bpl = bytes_per_line(self.width, self.pixel_format);
        if self.bytes_per_line < min_bpl {
            return Err(Error::InvalidImage(format!(
                "bytes_per_line {} below unpadded minimum {min_bpl}",
                self.bytes_per_line
            )));
        }
        if self.pixels.len() != self.pixels_size()? {
            return Err(Error::InvalidImage(format!(
                "pixel buffer is {} bytes, expected {}",
                self.pixels.len(),
                self.pixels_size()?
            )));
        }
        if self.pixel_format.is_indexed() && self.palette.is_none() {
            return Err(Error::MissingPalette);
        }
        if let Some(iccp) = &self.iccp {
            if iccp.is_empty() {
                return Err(Error::InvalidImage("empty ICC profile".into()));
            }
        }
        Ok(())
    }

    /// Whether this frame belongs to an animation.
    pub fn is_animated(&self) -> bool {
        self.delay >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_then_alloc() {
        let mut image = Image::shell(10, 4, PixelFormat::Rgb24).unwrap();
        assert_eq!(image.bytes_per_line, 30);
        assert!(image.pixels.is_empty());
        image.alloc_pixels().unwrap();
        assert_eq!(image.pixels.len(), 120);
        image.check_valid().unwrap();
    }

    #[test]
    fn zero_dimensions_rejected() {
        assert!(Image::new(0, 5, PixelFormat::Gray8).is_err());
        assert!(Image::new(5, 0, PixelFormat::Gray8).is_err());
        assert!(Image::new(5, 5, PixelFormat::Unknown).is_err());
    }

    #[test]
    fn indexed_requires_palette() {
        let image = Image::new(4, 4, PixelFormat::Indexed8).unwrap();
        match image.check_valid() {
            Err(Error::MissingPalette) => {}
            other => panic!("expected MissingPalette, got {other:?}"),
        }
    }

    #[test]
    fn palette_entry_size_is_checked() {
        assert!(Palette::from_data(PixelFormat::Rgb24, 2, vec![0; 6]).is_ok());
        assert!(Palette::from_data(PixelFormat::Rgb24, 2, vec![0; 5]).is_err());
        assert!(Palette::from_data(PixelFormat::Gray8, 2, vec![0; 2]).is_err());
    }
}
