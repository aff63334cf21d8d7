//! FLIC encoding: placeholder headers written up front, sizes and frame
//! counts back-patched as the stream grows.

use std::io::SeekFrom;

use super::*;
use crate::codec::{Phase, SaveSession};
use crate::image::{Compression, Image};
use crate::io::IoStream;
use crate::options::SaveOptions;
use crate::pixel::PixelFormat;
use crate::{Error, Result};

pub(crate) struct FliSaveSession<'io> {
    io: &'io mut dyn IoStream,
    header: FliHeader,
    is_fli: bool,
    is_first_frame: bool,
    frames_written: u16,
    phase: Phase,
    finished: bool,
}

impl<'io> FliSaveSession<'io> {
    pub(crate) fn open(io: &'io mut dyn IoStream, options: &SaveOptions) -> Result<Self> {
        match options.compression {
            Compression::Unknown | Compression::Rle => {}
            other => {
                log::error!("FLI: only RLE compression is supported for writing");
                return Err(Error::UnsupportedCompression(format!("{other:?}")));
            }
        }

        Ok(Self {
            io,
            header: FliHeader::default(),
            is_fli: false,
            is_first_frame: true,
            frames_written: 0,
            phase: Phase::default(),
            finished: false,
        })
    }

    /// Write a chunk via `payload`, then back-patch its size field.
    fn write_chunk(
        io: &mut dyn IoStream,
        kind: u16,
        payload: impl FnOnce(&mut dyn IoStream) -> Result<()>,
    ) -> Result<()> {
        let chunk_pos = io.tell()?;
        ChunkHeader { size: 0, kind }.write(io)?;
        payload(io)?;

        let end_pos = io.tell()?;
        io.seek(SeekFrom::Start(chunk_pos))?;
        ChunkHeader {
            size: (end_pos - chunk_pos) as u32,
            kind,
        }
        .write(io)?;
        io.seek(SeekFrom::Start(end_pos))?;
        Ok(())
    }
}

impl SaveSession for FliSaveSession<'_> {
    fn seek_next_frame(&mut self, image: &Image) -> Result<()> {
        self.phase.begin_seek()?;
        image.check_valid()?;

        // FLIC stores 8-bit palette indices, nothing else.
        if image.pixel_format != PixelFormat::Indexed8 {
            log::error!(
                "FLI: only bpp8-indexed is supported for writing, got {}",
                image.pixel_format
            );
            return Err(Error::UnsupportedPixelFormat(image.pixel_format));
        }
        let palette = image.palette.as_ref().ok_or(Error::MissingPalette)?;
        if palette.color_count != 256 {
            log::error!(
                "FLI: palette must have exactly 256 colors, got {}",
                palette.color_count
            );
            return Err(Error::UnsupportedPixelFormat(image.pixel_format));
        }
        if palette.pixel_format != PixelFormat::Rgb24 {
            return Err(Error::UnsupportedPixelFormat(palette.pixel_format));
        }

        if self.is_first_frame {
            self.is_first_frame = false;

            if image.width > u32::from(u16::MAX) || image.height > u32::from(u16::MAX) {
                log::error!(
                    "FLI: image dimensions {}x{} exceed the 16-bit maximum",
                    image.width,
                    image.height
                );
                return Err(Error::InvalidImage(format!(
                    "FLIC dimensions {}x{}",
                    image.width, image.height
                )));
            }

            // Exactly 320x200 is written as classic FLI, anything else as FLC.
            self.is_fli = image.width == 320 && image.height == 200;

            self.header = FliHeader {
                magic: if self.is_fli { FLI_MAGIC } else { FLC_MAGIC },
                width: image.width as u16,
                height: image.height as u16,
                depth: 8,
                speed: if self.is_fli {
                    // milliseconds back to 1/70 second units
                    let speed = (f64::from(image.delay.max(0)) * 70.0 / 1000.0) as u32;
                    if speed == 0 {
                        5
                    } else {
                        speed
                    }
                } else if image.delay > 0 {
                    image.delay as u32
                } else {
                    70
                },
                aspect_x: 6,
                aspect_y: 5,
                ..FliHeader::default()
            };

            self.header.write(self.io)?;
        } else if image.width != u32::from(self.header.width)
            || image.height != u32::from(self.header.height)
        {
            return Err(Error::IncorrectDimensions(format!(
                "frame {}x{} in a {}x{} animation",
                image.width, image.height, self.header.width, self.header.height
            )));
        }

        self.frames_written += 1;
        Ok(())
    }

    fn frame(&mut self, image: &Image) -> Result<()> {
        self.phase.begin_frame()?;

        let frame_pos = self.io.tell()?;
        let mut frame_header = FrameHeader {
            magic: FRAME_MAGIC,
            ..FrameHeader::default()
        };
        frame_header.write(self.io)?;

        let width = image.width as usize;
        let height = image.height as usize;
        let mut packed = vec![0u8; width * height];
        for y in 0..height {
            packed[y * width..(y + 1) * width].copy_from_slice(&image.row(y as u32)[..width]);
        }

        let palette = image.palette.as_ref().ok_or(Error::MissingPalette)?;
        Self::write_chunk(self.io, CHUNK_COLOR_256, |io| {
            encode_color256(io, &palette.data)
        })?;

        // BRUN compresses the first frame well; later frames fall back to
        // COPY (LC/SS2 deltas are a possible refinement).
        if self.frames_written == 1 {
            Self::write_chunk(self.io, CHUNK_BRUN, |io| {
                encode_brun(io, &packed, width, height)
            })?;
        } else {
            Self::write_chunk(self.io, CHUNK_COPY, |io| io.strict_write(&packed))?;
        }

        let end_pos = self.io.tell()?;
        frame_header.size = (end_pos - frame_pos) as u32;
        frame_header.chunks = 2;
        self.io.seek(SeekFrom::Start(frame_pos))?;
        frame_header.write(self.io)?;
        self.io.seek(SeekFrom::Start(end_pos))?;

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.finish();
        if self.finished || self.frames_written == 0 {
            self.finished = true;
            return Ok(());
        }
        self.finished = true;

        let file_size = self.io.tell()?;
        self.header.size = file_size as u32;
        self.header.frames = self.frames_written;

        self.io.seek(SeekFrom::Start(0))?;
        self.header.write(self.io)?;
        self.io.seek(SeekFrom::Start(file_size))?;
        self.io.flush()
    }
}

// ── Chunk encoders ──────────────────────────────────────────────────

/// COLOR_256: a single packet covering all 256 colors.
fn encode_color256(io: &mut dyn IoStream, palette_rgb: &[u8]) -> Result<()> {
    io.write_u16_le(1)?; // packet count
    io.write_u8(0)?; // skip
    io.write_u8(0)?; // count: 0 means 256
    io.strict_write(&palette_rgb[..256 * 3])
}

/// BRUN: per line, a packet count byte then run/literal packets.
/// Runs shorter than 3 bytes ride inside literal packets.
fn encode_brun(io: &mut dyn IoStream, pixels: &[u8], width: usize, height: usize) -> Result<()> {
    for y in 0..height {
        let line = &pixels[y * width..(y + 1) * width];

        let packets = build_brun_packets(line);
        io.write_u8(packets.len().min(255) as u8)?;

        for packet in &packets {
            match packet {
                BrunPacket::Run { length, value } => {
                    io.write_u8(*length as u8)?;
                    io.write_u8(*value)?;
                }
                BrunPacket::Literal { start, length } => {
                    io.write_u8((-(*length as i8)) as u8)?;
                    io.strict_write(&line[*start..*start + *length])?;
                }
            }
        }
    }
    Ok(())
}

enum BrunPacket {
    Run { length: usize, value: u8 },
    Literal { start: usize, length: usize },
}

fn build_brun_packets(line: &[u8]) -> Vec<BrunPacket> {
    let width = line.len();
    let mut packets = Vec::new();
    let mut x = 0usize;

    while x < width {
        let run_len = run_length_at(line, x);

        if run_len >= 3 {
            packets.push(BrunPacket::Run {
                length: run_len,
                value: line[x],
            });
            x += run_len;
        } else {
            // Extend the literal until a run of >= 3 starts or we hit the
            // signed packet limit.
            let mut copy_len = 1usize;
            while x + copy_len < width && copy_len < 127 {
                if run_length_at(line, x + copy_len) >= 3 {
                    break;
                }
                copy_len += 1;
            }
            packets.push(BrunPacket::Literal {
                start: x,
                length: copy_len,
            });
            x += copy_len;
        }
    }
    packets
}

/// Length of the byte run starting at `x`, capped at the signed packet
/// maximum of 127.
fn run_length_at(line: &[u8], x: usize) -> usize {
    let mut len = 1usize;
    while x + len < line.len() && len < 127 && line[x] == line[x + len] {
        len += 1;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fli::decode::decode_brun;
    use crate::io::MemoryStream;

    #[test]
    fn brun_roundtrips_mixed_lines() {
        let width = 16;
        let lines: Vec<u8> = vec![
            7, 7, 7, 7, 7, 7, 7, 7, 1, 2, 3, 4, 5, 6, 7, 8, // runs then noise
            9, 9, 1, 9, 9, 1, 9, 9, 1, 9, 9, 1, 9, 9, 1, 9, // short runs only
        ];
        let mut io = MemoryStream::new();
        encode_brun(&mut io, &lines, width, 2).unwrap();

        let encoded = io.into_inner();
        let mut reader = crate::io::SliceStream::new(&encoded);
        let mut decoded = vec![0u8; width * 2];
        decode_brun(&mut reader, &mut decoded, width, 2).unwrap();
        assert_eq!(decoded, lines);
    }

    #[test]
    fn brun_long_runs_split_at_127() {
        let line = vec![5u8; 300];
        let mut io = MemoryStream::new();
        encode_brun(&mut io, &line, 300, 1).unwrap();

        let encoded = io.into_inner();
        let mut reader = crate::io::SliceStream::new(&encoded);
        let mut decoded = vec![0u8; 300];
        decode_brun(&mut reader, &mut decoded, 300, 1).unwrap();
        assert_eq!(decoded, line);
    }
}
