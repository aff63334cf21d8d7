//! X Window Dump (XWD) version 7.
//!
//! A 100-byte header of 25 big-endian 32-bit fields, the window name,
//! an optional colormap, then raw ZPixmap scan lines. TrueColor visuals
//! decode through the channel masks, PseudoColor through the colormap.

use crate::codec::{Codec, CodecFeatures, CodecInfo, LoadFeatures, LoadSession, Phase,
                   SaveFeatures, SaveSession};
use crate::image::{Compression, Image, Palette, SourceImage};
use crate::io::IoStream;
use crate::options::{LoadFlags, LoadOptions, SaveOptions};
use crate::pixel::PixelFormat;
use crate::{Error, Result};

const XWD_FILE_VERSION: u32 = 7;
const XWD_HEADER_SIZE: u32 = 100;

// Pixmap formats
const Z_PIXMAP: u32 = 2;

// Visual classes
const STATIC_GRAY: u32 = 0;
const GRAY_SCALE: u32 = 1;
const STATIC_COLOR: u32 = 2;
const PSEUDO_COLOR: u32 = 3;
const TRUE_COLOR: u32 = 4;
const DIRECT_COLOR: u32 = 5;

// Byte order
const LSB_FIRST: u32 = 0;
const MSB_FIRST: u32 = 1;

/// The 25 fixed header fields.
#[derive(Clone, Copy, Debug, Default)]
struct XwdHeader {
    header_size: u32,
    file_version: u32,
    pixmap_format: u32,
    pixmap_depth: u32,
    pixmap_width: u32,
    pixmap_height: u32,
    byte_order: u32,
    bits_per_pixel: u32,
    bytes_per_line: u32,
    visual_class: u32,
    red_mask: u32,
    green_mask: u32,
    blue_mask: u32,
    ncolors: u32,
}

impl XwdHeader {
    fn parse(fields: &[u32; 25]) -> Self {
        Self {
            header_size: fields[0],
            file_version: fields[1],
            pixmap_format: fields[2],
            pixmap_depth: fields[3],
            pixmap_width: fields[4],
            pixmap_height: fields[5],
            byte_order: fields[7],
            bits_per_pixel: fields[11],
            bytes_per_line: fields[12],
            visual_class: fields[13],
            red_mask: fields[14],
            green_mask: fields[15],
            blue_mask: fields[16],
            ncolors: fields[19],
        }
    }

    fn plausible(&self) -> bool {
        self.file_version == XWD_FILE_VERSION && self.header_size >= XWD_HEADER_SIZE
    }
}

/// One colormap entry (12 bytes on disk).
#[derive(Clone, Copy, Debug, Default)]
struct XwdColor {
    red: u16,
    green: u16,
    blue: u16,
}

static XWD_INFO: CodecInfo = CodecInfo {
    name: "xwd",
    version: "7.0.0",
    description: "X Window Dump",
    extensions: &["xwd"],
    mime_types: &["image/x-xwindowdump"],
    // header_size is always small, so its top bytes are zero; the
    // version field pins the match (big- and little-endian headers)
    magic_numbers: &["00 00 ?? ?? 00 00 00 07", "?? ?? 00 00 07 00 00 00"],
    load_features: LoadFeatures {
        pixel_formats: &[
            PixelFormat::Rgb24,
            PixelFormat::Indexed8,
            PixelFormat::Gray8,
        ],
        features: CodecFeatures::STATIC,
        tuning_keys: &[],
    },
    save_features: SaveFeatures {
        pixel_formats: &[
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Indexed8,
            PixelFormat::Gray8,
        ],
        compressions: &[Compression::None],
        features: CodecFeatures::STATIC,
        tuning_keys: &[],
    },
};

/// The XWD codec.
pub struct XwdCodec;

impl Codec for XwdCodec {
    fn info(&self) -> &'static CodecInfo {
        &XWD_INFO
    }

    fn load_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &LoadOptions,
    ) -> Result<Box<dyn LoadSession + 'io>> {
        Ok(Box::new(XwdLoadSession::open(io, options)?))
    }

    fn save_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &SaveOptions,
    ) -> Result<Box<dyn SaveSession + 'io>> {
        Ok(Box::new(XwdSaveSession::open(io, options)?))
    }
}

// ── Loading ─────────────────────────────────────────────────────────

struct XwdLoadSession<'io> {
    io: &'io mut dyn IoStream,
    header: XwdHeader,
    colormap: Vec<XwdColor>,
    output_format: PixelFormat,
    fetch_source_image: bool,
    done: bool,
    phase: Phase,
}

impl<'io> XwdLoadSession<'io> {
    fn open(io: &'io mut dyn IoStream, options: &LoadOptions) -> Result<Self> {
        let mut raw = [0u8; 100];
        io.strict_read(&mut raw)?;

        let mut fields = [0u32; 25];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = u32::from_be_bytes([raw[i * 4], raw[i * 4 + 1], raw[i * 4 + 2], raw[i * 4 + 3]]);
        }
        let mut header = XwdHeader::parse(&fields);
        if !header.plausible() {
            // dumps from little-endian servers store the header swapped
            for field in &mut fields {
                *field = field.swap_bytes();
            }
            header = XwdHeader::parse(&fields);
            if !header.plausible() {
                return Err(Error::InvalidImage("XWD header".into()));
            }
        }

        if header.pixmap_format != Z_PIXMAP {
            return Err(Error::UnsupportedFormat(format!(
                "XWD pixmap format {}",
                header.pixmap_format
            )));
        }
        log::debug!(
            "XWD: {}x{}, depth {}, {} bpp, visual class {}",
            header.pixmap_width,
            header.pixmap_height,
            header.pixmap_depth,
            header.bits_per_pixel,
            header.visual_class
        );
        if header.pixmap_width == 0 || header.pixmap_height == 0 {
            return Err(Error::IncorrectDimensions(format!(
                "{}x{}",
                header.pixmap_width, header.pixmap_height
            )));
        }
        options
            .limits
            .check(header.pixmap_width, header.pixmap_height)?;
        options.limits.check_memory(
            header.pixmap_width as usize * header.pixmap_height as usize * 3,
        )?;

        // Window name and any header padding
        let extra = header.header_size.saturating_sub(XWD_HEADER_SIZE);
        if extra > 0 {
            let mut name = vec![0u8; extra as usize];
            io.strict_read(&mut name)?;
        }

        // colormap entries follow the header's byte order
        let swapped = header.header_size != u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let mut colormap = Vec::new();
        for _ in 0..header.ncolors.min(1 << 16) {
            let mut entry = [0u8; 12];
            io.strict_read(&mut entry)?;
            let read_u16 = |hi: usize| {
                if swapped {
                    u16::from_le_bytes([entry[hi], entry[hi + 1]])
                } else {
                    u16::from_be_bytes([entry[hi], entry[hi + 1]])
                }
            };
            colormap.push(XwdColor {
                red: read_u16(4),
                green: read_u16(6),
                blue: read_u16(8),
            });
        }

        let output_format = match (header.visual_class, header.bits_per_pixel) {
            (TRUE_COLOR | DIRECT_COLOR, 16 | 24 | 32) => PixelFormat::Rgb24,
            (PSEUDO_COLOR | STATIC_COLOR | GRAY_SCALE, 8) => PixelFormat::Indexed8,
            (STATIC_GRAY, 8) => PixelFormat::Gray8,
            (class, bpp) => {
                log::error!("XWD: unsupported visual class {class} at {bpp} bpp");
                return Err(Error::UnsupportedBitDepth(bpp));
            }
        };
        if output_format == PixelFormat::Indexed8 && colormap.is_empty() {
            return Err(Error::MissingPalette);
        }

        Ok(Self {
            io,
            header,
            colormap,
            output_format,
            fetch_source_image: options.flags.contains(LoadFlags::SOURCE_IMAGE),
            done: false,
            phase: Phase::default(),
        })
    }

    fn palette(&self) -> Result<Palette> {
        let mut data = Vec::with_capacity(self.colormap.len() * 3);
        for entry in &self.colormap {
            data.push((entry.red >> 8) as u8);
            data.push((entry.green >> 8) as u8);
            data.push((entry.blue >> 8) as u8);
        }
        Palette::from_data(PixelFormat::Rgb24, self.colormap.len(), data)
    }
}

/// Scale a masked component to 8 bits.
fn component_from_mask(value: u32, mask: u32) -> u8 {
    if mask == 0 {
        return 0;
    }
    let shift = mask.trailing_zeros();
    let field = (value & mask) >> shift;
    let max = mask >> shift;
    if max == 255 {
        field as u8
    } else {
        (field * 255 / max) as u8
    }
}

impl LoadSession for XwdLoadSession<'_> {
    fn seek_next_frame(&mut self) -> Result<Image> {
        self.phase.begin_seek()?;
        if self.done {
            self.phase.finish();
            return Err(Error::NoMoreFrames);
        }

        let mut image = Image::shell(
            self.header.pixmap_width,
            self.header.pixmap_height,
            self.output_format,
        )?;
        if self.output_format == PixelFormat::Indexed8 {
            image.palette = Some(self.palette()?);
        }
        if self.fetch_source_image {
            let mut source = SourceImage::new(self.output_format);
            source.compression = Compression::None;
            image.source_image = Some(source);
        }

        self.done = true;
        Ok(image)
    }

    fn frame(&mut self, image: &mut Image) -> Result<()> {
        self.phase.begin_frame()?;
        if image.pixels.len() != image.pixels_size()? {
            return Err(Error::InvalidImage("pixel buffer not allocated".into()));
        }

        let width = self.header.pixmap_width as usize;
        let in_bpl = self.header.bytes_per_line as usize;
        let px_bytes = (self.header.bits_per_pixel / 8) as usize;
        if in_bpl < width * px_bytes.max(1) {
            return Err(Error::BrokenImage(format!(
                "XWD bytes_per_line {} below {} pixels",
                in_bpl, width
            )));
        }
        let lsb = self.header.byte_order == LSB_FIRST;

        let mut line = vec![0u8; in_bpl];
        for y in 0..self.header.pixmap_height {
            self.io.strict_read(&mut line)?;
            let row = image.row_mut(y);

            match self.output_format {
                PixelFormat::Indexed8 | PixelFormat::Gray8 => {
                    row[..width].copy_from_slice(&line[..width]);
                }
                _ => {
                    for x in 0..width {
                        let raw = &line[x * px_bytes..(x + 1) * px_bytes];
                        let mut value = 0u32;
                        for (i, byte) in raw.iter().enumerate() {
                            let shift = if lsb { i * 8 } else { (px_bytes - 1 - i) * 8 };
                            value |= u32::from(*byte) << shift;
                        }
                        row[x * 3] = component_from_mask(value, self.header.red_mask);
                        row[x * 3 + 1] = component_from_mask(value, self.header.green_mask);
                        row[x * 3 + 2] = component_from_mask(value, self.header.blue_mask);
                    }
                }
            }
        }

        if self.output_format == PixelFormat::Indexed8 {
            let count = self.colormap.len();
            if let Some(bad) = image.pixels.iter().find(|px| usize::from(**px) >= count) {
                return Err(Error::BrokenImage(format!(
                    "colormap index {bad} is out of range [0; {count})"
                )));
            }
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.finish();
        Ok(())
    }
}

// ── Saving ──────────────────────────────────────────────────────────

struct XwdSaveSession<'io> {
    io: &'io mut dyn IoStream,
    frame_written: bool,
    phase: Phase,
}

impl<'io> XwdSaveSession<'io> {
    fn open(io: &'io mut dyn IoStream, options: &SaveOptions) -> Result<Self> {
        match options.compression {
            Compression::Unknown | Compression::None => {}
            other => return Err(Error::UnsupportedCompression(format!("{other:?}"))),
        }
        Ok(Self {
            io,
            frame_written: false,
            phase: Phase::default(),
        })
    }
}

impl SaveSession for XwdSaveSession<'_> {
    fn seek_next_frame(&mut self, image: &Image) -> Result<()> {
        self.phase.begin_seek()?;
        if self.frame_written {
            return Err(Error::NoMoreFrames);
        }
        self.frame_written = true;

        image.check_valid()?;

        let (visual_class, depth, bits_per_pixel, ncolors) = match image.pixel_format {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => (TRUE_COLOR, 24, 32, 0u32),
            PixelFormat::Indexed8 => {
                let palette = image.palette.as_ref().ok_or(Error::MissingPalette)?;
                (PSEUDO_COLOR, 8, 8, palette.color_count as u32)
            }
            PixelFormat::Gray8 => (STATIC_GRAY, 8, 8, 0),
            other => return Err(Error::UnsupportedPixelFormat(other)),
        };

        let px_bytes = bits_per_pixel / 8;
        let out_bpl = image.width * px_bytes;

        let mut fields = [0u32; 25];
        fields[0] = XWD_HEADER_SIZE + 1; // header + empty window name
        fields[1] = XWD_FILE_VERSION;
        fields[2] = Z_PIXMAP;
        fields[3] = depth;
        fields[4] = image.width;
        fields[5] = image.height;
        fields[6] = 0; // x offset
        fields[7] = MSB_FIRST;
        fields[8] = 32; // bitmap unit
        fields[9] = MSB_FIRST; // bit order
        fields[10] = 32; // scanline pad
        fields[11] = bits_per_pixel;
        fields[12] = out_bpl;
        fields[13] = visual_class;
        if visual_class == TRUE_COLOR {
            fields[14] = 0x00FF_0000;
            fields[15] = 0x0000_FF00;
            fields[16] = 0x0000_00FF;
        }
        fields[17] = 8; // bits per rgb
        fields[18] = ncolors; // colormap entries
        fields[19] = ncolors;
        fields[20] = image.width; // window width
        fields[21] = image.height; // window height

        for field in fields {
            self.io.write_u32_be(field)?;
        }
        self.io.write_u8(0)?; // empty window name

        if ncolors > 0 {
            let palette = image.palette.as_ref().ok_or(Error::MissingPalette)?;
            let entry_bytes = Palette::entry_bytes(palette.pixel_format)?;
            if palette.pixel_format != PixelFormat::Rgb24 {
                return Err(Error::UnsupportedPixelFormat(palette.pixel_format));
            }
            for (i, entry) in palette.data.chunks_exact(entry_bytes).enumerate() {
                self.io.write_u32_be(i as u32)?; // pixel
                for component in entry {
                    // replicate to 16 bits
                    self.io
                        .write_u16_be(u16::from(*component) << 8 | u16::from(*component))?;
                }
                self.io.write_u8(7)?; // DoRed | DoGreen | DoBlue
                self.io.write_u8(0)?; // pad
            }
        }

        Ok(())
    }

    fn frame(&mut self, image: &Image) -> Result<()> {
        self.phase.begin_frame()?;

        match image.pixel_format {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
                let swap = image.pixel_format == PixelFormat::Bgr24;
                let width = image.width as usize;
                let mut line = vec![0u8; width * 4];
                for y in 0..image.height {
                    let row = image.row(y);
                    for x in 0..width {
                        let (r, g, b) = if swap {
                            (row[x * 3 + 2], row[x * 3 + 1], row[x * 3])
                        } else {
                            (row[x * 3], row[x * 3 + 1], row[x * 3 + 2])
                        };
                        // MSBFirst x888: pad, r, g, b
                        line[x * 4] = 0;
                        line[x * 4 + 1] = r;
                        line[x * 4 + 2] = g;
                        line[x * 4 + 3] = b;
                    }
                    self.io.strict_write(&line)?;
                }
            }
            PixelFormat::Indexed8 | PixelFormat::Gray8 => {
                let width = image.width as usize;
                for y in 0..image.height {
                    self.io.strict_write(&image.row(y)[..width])?;
                }
            }
            other => return Err(Error::UnsupportedPixelFormat(other)),
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.finish();
        self.io.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryStream;

    fn roundtrip(image: &Image) -> Image {
        let mut io = MemoryStream::new();
        {
            let mut save = XwdSaveSession::open(&mut io, &SaveOptions::default()).unwrap();
            save.seek_next_frame(image).unwrap();
            save.frame(image).unwrap();
            save.finish().unwrap();
        }
        io.seek(std::io::SeekFrom::Start(0)).unwrap();
        let mut load = XwdLoadSession::open(&mut io, &LoadOptions::default()).unwrap();
        let mut out = load.seek_next_frame().unwrap();
        out.alloc_pixels().unwrap();
        load.frame(&mut out).unwrap();
        load.finish().unwrap();
        out
    }

    #[test]
    fn rgb_roundtrip_is_lossless() {
        let mut image = Image::new(3, 2, PixelFormat::Rgb24).unwrap();
        image
            .pixels
            .copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18]);
        let out = roundtrip(&image);
        assert_eq!(out.pixel_format, PixelFormat::Rgb24);
        assert_eq!(out.pixels, image.pixels);
    }

    #[test]
    fn indexed_roundtrip_keeps_palette() {
        let mut image = Image::new(2, 2, PixelFormat::Indexed8).unwrap();
        image.pixels.copy_from_slice(&[0, 1, 1, 0]);
        image.palette =
            Some(Palette::from_data(PixelFormat::Rgb24, 2, vec![10, 20, 30, 40, 50, 60]).unwrap());
        let out = roundtrip(&image);
        assert_eq!(out.pixel_format, PixelFormat::Indexed8);
        assert_eq!(out.pixels, image.pixels);
        assert_eq!(out.palette.unwrap().data, vec![10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn mask_components_scale() {
        assert_eq!(component_from_mask(0x00FF0000, 0x00FF0000), 255);
        assert_eq!(component_from_mask(0b11111 << 11, 0b11111 << 11), 255);
        assert_eq!(component_from_mask(0, 0x00FF0000), 0);
        assert_eq!(component_from_mask(0x12345678, 0), 0);
    }
}
