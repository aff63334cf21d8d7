//! FLIC decoding: the per-frame chunk state machine and the chunk codecs.

use std::io::SeekFrom;

use super::*;
use crate::codec::{LoadSession, Phase};
use crate::image::{Image, Palette, SourceImage};
use crate::io::IoStream;
use crate::options::{LoadFlags, LoadOptions};
use crate::pixel::PixelFormat;
use crate::{Error, Result};

pub(crate) struct FliLoadSession<'io> {
    io: &'io mut dyn IoStream,
    header: FliHeader,
    is_fli: bool,
    fetch_source_image: bool,
    current_palette: Palette,
    prev_frame: Vec<u8>,
    current_frame_index: u32,
    phase: Phase,
}

impl<'io> FliLoadSession<'io> {
    pub(crate) fn open(io: &'io mut dyn IoStream, options: &LoadOptions) -> Result<Self> {
        let header = FliHeader::read(io)?;

        if header.magic != FLI_MAGIC && header.magic != FLC_MAGIC {
            log::error!("FLI: invalid magic number 0x{:04X}", header.magic);
            return Err(Error::InvalidImage(format!(
                "FLIC magic 0x{:04X}",
                header.magic
            )));
        }
        if header.width == 0 || header.height == 0 {
            log::error!("FLI: invalid dimensions {}x{}", header.width, header.height);
            return Err(Error::InvalidImage(format!(
                "FLIC dimensions {}x{}",
                header.width, header.height
            )));
        }
        // FLIC pixels are 8-bit palette indices
        if header.depth != 8 {
            log::error!("FLI: unsupported bit depth {}", header.depth);
            return Err(Error::UnsupportedBitDepth(u32::from(header.depth)));
        }

        options
            .limits
            .check(u32::from(header.width), u32::from(header.height))?;
        let frame_size = usize::from(header.width) * usize::from(header.height);
        options.limits.check_memory(frame_size)?;

        let is_fli = header.magic == FLI_MAGIC;
        log::trace!(
            "FLI: {} format, {}x{}, {} frames, speed={}",
            if is_fli { "FLI" } else { "FLC" },
            header.width,
            header.height,
            header.frames,
            header.speed
        );

        Ok(Self {
            io,
            header,
            is_fli,
            fetch_source_image: options.flags.contains(LoadFlags::SOURCE_IMAGE),
            current_palette: Palette::new(PixelFormat::Rgb24, 256)?,
            prev_frame: vec![0; frame_size],
            current_frame_index: 0,
            phase: Phase::default(),
        })
    }

    fn delay_ms(&self) -> i32 {
        if self.is_fli {
            // FLI: speed is in 1/70 second units
            (f64::from(self.header.speed) * 1000.0 / 70.0) as i32
        } else {
            // FLC: speed is already in milliseconds
            self.header.speed as i32
        }
    }
}

impl LoadSession for FliLoadSession<'_> {
    fn seek_next_frame(&mut self) -> Result<Image> {
        self.phase.begin_seek()?;

        if u32::from(self.header.frames) <= self.current_frame_index {
            self.phase.finish();
            return Err(Error::NoMoreFrames);
        }

        let mut image = Image::shell(
            u32::from(self.header.width),
            u32::from(self.header.height),
            PixelFormat::Indexed8,
        )?;
        image.delay = self.delay_ms();
        image.palette = Some(self.current_palette.clone());

        if self.fetch_source_image {
            let mut source = SourceImage::new(PixelFormat::Indexed8);
            source.compression = crate::image::Compression::Rle;
            image.source_image = Some(source);
        }

        Ok(image)
    }

    fn frame(&mut self, image: &mut Image) -> Result<()> {
        self.phase.begin_frame()?;

        let width = usize::from(self.header.width);
        let height = usize::from(self.header.height);
        if image.width != self.header.width as u32 || image.height != self.header.height as u32 {
            return Err(Error::IncorrectDimensions(format!(
                "frame buffer {}x{}, stream {}x{}",
                image.width, image.height, self.header.width, self.header.height
            )));
        }
        if image.pixels.len() != image.pixels_size()? {
            return Err(Error::InvalidImage("pixel buffer not allocated".into()));
        }

        let frame_start = self.io.tell()?;
        let frame_header = FrameHeader::read(self.io)?;

        log::trace!(
            "FLI: frame {} at 0x{frame_start:X}: size={}, magic=0x{:04X}, chunks={}, delay={}",
            self.current_frame_index,
            frame_header.size,
            frame_header.magic,
            frame_header.chunks,
            frame_header.delay
        );

        if frame_header.magic != FRAME_MAGIC {
            log::error!("FLI: invalid frame magic 0x{:04X}", frame_header.magic);
            return Err(Error::InvalidImage(format!(
                "FLIC frame magic 0x{:04X}",
                frame_header.magic
            )));
        }

        // Start from the previous frame; chunks apply deltas on top.
        let mut pixels = self.prev_frame.clone();

        for i in 0..frame_header.chunks {
            let chunk_start = self.io.tell()?;
            let chunk = ChunkHeader::read(self.io)?;

            match chunk.kind {
                CHUNK_COLOR_256 => decode_color256(self.io, &mut self.current_palette)?,
                CHUNK_COLOR_64 => decode_color64(self.io, &mut self.current_palette)?,
                CHUNK_BLACK => pixels.fill(0),
                CHUNK_BRUN | CHUNK_DTA_BRUN => {
                    decode_brun(self.io, &mut pixels, width, height)?;
                    self.io
                        .seek(SeekFrom::Start(chunk_start + u64::from(chunk.size)))?;
                }
                CHUNK_COPY | CHUNK_DTA_COPY => decode_copy(self.io, &mut pixels)?,
                CHUNK_LC | CHUNK_DTA_LC => {
                    decode_lc(self.io, &mut pixels, width, height)?;
                    self.io
                        .seek(SeekFrom::Start(chunk_start + u64::from(chunk.size)))?;
                }
                CHUNK_SS2 => {
                    decode_ss2(self.io, &mut pixels, width, height)?;
                    self.io
                        .seek(SeekFrom::Start(chunk_start + u64::from(chunk.size)))?;
                }
                CHUNK_PSTAMP => {
                    let skip = chunk.size.saturating_sub(CHUNK_HEADER_SIZE);
                    self.io.seek(SeekFrom::Current(i64::from(skip)))?;
                }
                other => {
                    log::warn!("FLI: unknown chunk type {other}, skipping");
                    let skip = chunk.size.saturating_sub(CHUNK_HEADER_SIZE);
                    self.io.seek(SeekFrom::Current(i64::from(skip)))?;
                }
            }

            // Real-world FLICs pad chunks; resynchronize when needed.
            let current = self.io.tell()?;
            let expected = chunk_start + u64::from(chunk.size);
            if current != expected {
                log::warn!(
                    "FLI: chunk {i} position mismatch: at 0x{current:X}, expected 0x{expected:X}"
                );
                self.io.seek(SeekFrom::Start(expected))?;
            }
        }

        // The frame size in the header is the authoritative next position.
        self.io
            .seek(SeekFrom::Start(frame_start + u64::from(frame_header.size)))?;

        for y in 0..height {
            image.row_mut(y as u32)[..width].copy_from_slice(&pixels[y * width..(y + 1) * width]);
        }
        image.palette = Some(self.current_palette.clone());

        self.prev_frame = pixels;
        self.current_frame_index += 1;

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.finish();
        Ok(())
    }
}

// ── Chunk codecs ────────────────────────────────────────────────────

/// COLOR_256: packets of `{skip, count, count * (r, g, b)}` with 8-bit
/// components. A count of 0 means 256.
pub(crate) fn decode_color256(io: &mut dyn IoStream, palette: &mut Palette) -> Result<()> {
    decode_color_packets(io, palette, false)
}

/// COLOR_64: like COLOR_256 but 6-bit components scaled up to 8.
pub(crate) fn decode_color64(io: &mut dyn IoStream, palette: &mut Palette) -> Result<()> {
    decode_color_packets(io, palette, true)
}

fn decode_color_packets(io: &mut dyn IoStream, palette: &mut Palette, six_bit: bool) -> Result<()> {
    let packets = io.read_u16_le()?;
    let mut index: usize = 0;

    for _ in 0..packets {
        let skip = io.read_u8()?;
        let count = io.read_u8()?;
        index += usize::from(skip);

        let colors_to_read = if count == 0 { 256 } else { usize::from(count) };
        for _ in 0..colors_to_read {
            if index >= 256 {
                break;
            }
            let mut rgb = [0u8; 3];
            io.strict_read(&mut rgb)?;
            if six_bit {
                for c in &mut rgb {
                    *c = (*c << 2) | (*c >> 4);
                }
            }
            palette.data[index * 3..index * 3 + 3].copy_from_slice(&rgb);
            index += 1;
        }
    }
    Ok(())
}

/// BRUN: byte-RLE full frame. Per line: a packet count byte, then signed
/// packets (positive = run of the next byte, negative = literal copy).
pub(crate) fn decode_brun(
    io: &mut dyn IoStream,
    pixels: &mut [u8],
    width: usize,
    height: usize,
) -> Result<()> {
    for y in 0..height {
        let line = &mut pixels[y * width..(y + 1) * width];
        let mut x = 0usize;

        let packet_count = io.read_u8()?;

        for _ in 0..packet_count {
            if x >= width {
                break;
            }
            let packet = io.read_i8()?;
            if packet > 0 {
                let count = (packet as usize).min(width - x);
                let value = io.read_u8()?;
                line[x..x + count].fill(value);
                x += count;
            } else if packet < 0 {
                let count = (-i32::from(packet) as usize).min(width - x);
                io.strict_read(&mut line[x..x + count])?;
                x += count;
            }
        }
    }
    Ok(())
}

/// COPY: uncompressed `width * height` bytes.
pub(crate) fn decode_copy(io: &mut dyn IoStream, pixels: &mut [u8]) -> Result<()> {
    io.strict_read(pixels)
}

/// LC: line-compressed delta. `start_y`, `line_count`, then per line a
/// packet count and `{skip, signed length}` packets (positive = literal
/// copy, negative = run).
pub(crate) fn decode_lc(
    io: &mut dyn IoStream,
    pixels: &mut [u8],
    width: usize,
    height: usize,
) -> Result<()> {
    let start_y = io.read_u16_le()?;
    let line_count = io.read_u16_le()?;

    for i in 0..line_count {
        let y = usize::from(start_y) + usize::from(i);
        if y >= height {
            break;
        }
        let line = &mut pixels[y * width..(y + 1) * width];
        let packets = io.read_u8()?;
        let mut x = 0usize;

        for _ in 0..packets {
            let skip = io.read_u8()?;
            x += usize::from(skip);
            if x > width {
                break;
            }

            let packet = io.read_i8()?;
            if packet >= 0 {
                let count = (packet as usize).min(width - x);
                io.strict_read(&mut line[x..x + count])?;
                x += count;
            } else {
                let count = (-i32::from(packet) as usize).min(width - x);
                let value = io.read_u8()?;
                line[x..x + count].fill(value);
                x += count;
            }
        }
    }
    Ok(())
}

/// SS2: word-aligned delta (FLC). Per line a 16-bit control word: a
/// non-zero high byte skips that many lines, otherwise the low byte is
/// the packet count. Packets carry `{skip, signed length}` in word units.
pub(crate) fn decode_ss2(
    io: &mut dyn IoStream,
    pixels: &mut [u8],
    width: usize,
    height: usize,
) -> Result<()> {
    let line_count = usize::from(io.read_u16_le()?);

    // The line index doubles as the outer counter, so a line skip also
    // consumes iterations.
    let mut y = 0usize;
    while y < line_count && y < height {
        let control = io.read_u16_le()?;
        let skip_lines = (control >> 8) & 0xFF;
        let packets = control & 0xFF;

        if skip_lines > 0 {
            y += usize::from(skip_lines);
            continue;
        }
        if packets == 0 {
            break;
        }

        let line_start = y * width;
        let mut x = 0usize;
        for _ in 0..packets {
            let skip = io.read_u8()?;
            x += usize::from(skip) * 2; // word-aligned
            if x > width {
                break;
            }

            let packet = io.read_i8()?;
            if packet >= 0 {
                let count = (packet as usize * 2).min(width - x);
                io.strict_read(&mut pixels[line_start + x..line_start + x + count])?;
                x += count;
            } else {
                let count = ((-i32::from(packet)) as usize * 2).min(width - x);
                let mut value = [0u8; 2];
                io.strict_read(&mut value)?;
                for k in (0..count).step_by(2) {
                    pixels[line_start + x + k] = value[0];
                    if x + k + 1 < width {
                        pixels[line_start + x + k + 1] = value[1];
                    }
                }
                x += count;
            }
        }

        y += 1;
    }
    Ok(())
}
