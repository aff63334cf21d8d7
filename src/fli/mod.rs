//! Autodesk FLIC animations (FLI and FLC).
//!
//! Chunked little-endian binary format: a 128-byte file header, then one
//! 16-byte frame header per frame, each followed by type-tagged chunks.
//! Frames are deltas against the previous frame; the decoder keeps a
//! previous-frame buffer across the whole session.

mod decode;
mod encode;

pub(crate) use decode::FliLoadSession;
pub(crate) use encode::FliSaveSession;

use crate::codec::{Codec, CodecFeatures, CodecInfo, LoadFeatures, LoadSession, SaveFeatures,
                   SaveSession};
use crate::image::Compression;
use crate::io::IoStream;
use crate::options::{LoadOptions, SaveOptions};
use crate::pixel::PixelFormat;
use crate::Result;

pub(crate) const FLI_MAGIC: u16 = 0xAF11;
pub(crate) const FLC_MAGIC: u16 = 0xAF12;
pub(crate) const FRAME_MAGIC: u16 = 0xF1FA;

// Chunk types
pub(crate) const CHUNK_COLOR_256: u16 = 4;
pub(crate) const CHUNK_SS2: u16 = 7;
pub(crate) const CHUNK_COLOR_64: u16 = 11;
pub(crate) const CHUNK_LC: u16 = 12;
pub(crate) const CHUNK_BLACK: u16 = 13;
pub(crate) const CHUNK_BRUN: u16 = 15;
pub(crate) const CHUNK_COPY: u16 = 16;
pub(crate) const CHUNK_PSTAMP: u16 = 18;
pub(crate) const CHUNK_DTA_BRUN: u16 = 25;
pub(crate) const CHUNK_DTA_COPY: u16 = 26;
pub(crate) const CHUNK_DTA_LC: u16 = 27;

/// 128-byte file header. All integers little-endian.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FliHeader {
    pub size: u32,
    pub magic: u16,
    pub frames: u16,
    pub width: u16,
    pub height: u16,
    pub depth: u16,
    pub flags: u16,
    pub speed: u32,
    pub created: u32,
    pub creator: u32,
    pub updated: u32,
    pub updater: u32,
    pub aspect_x: u16,
    pub aspect_y: u16,
    pub oframe1: u32,
    pub oframe2: u32,
}

impl FliHeader {
    pub(crate) fn read(io: &mut dyn IoStream) -> Result<Self> {
        let mut header = Self {
            size: io.read_u32_le()?,
            magic: io.read_u16_le()?,
            frames: io.read_u16_le()?,
            width: io.read_u16_le()?,
            height: io.read_u16_le()?,
            depth: io.read_u16_le()?,
            flags: io.read_u16_le()?,
            speed: io.read_u32_le()?,
            ..Self::default()
        };
        let _reserved1 = io.read_u16_le()?;
        header.created = io.read_u32_le()?;
        header.creator = io.read_u32_le()?;
        header.updated = io.read_u32_le()?;
        header.updater = io.read_u32_le()?;
        header.aspect_x = io.read_u16_le()?;
        header.aspect_y = io.read_u16_le()?;
        let mut reserved2 = [0u8; 38];
        io.strict_read(&mut reserved2)?;
        header.oframe1 = io.read_u32_le()?;
        header.oframe2 = io.read_u32_le()?;
        let mut reserved3 = [0u8; 40];
        io.strict_read(&mut reserved3)?;
        Ok(header)
    }

    pub(crate) fn write(&self, io: &mut dyn IoStream) -> Result<()> {
        io.write_u32_le(self.size)?;
        io.write_u16_le(self.magic)?;
        io.write_u16_le(self.frames)?;
        io.write_u16_le(self.width)?;
        io.write_u16_le(self.height)?;
        io.write_u16_le(self.depth)?;
        io.write_u16_le(self.flags)?;
        io.write_u32_le(self.speed)?;
        io.write_u16_le(0)?; // reserved1
        io.write_u32_le(self.created)?;
        io.write_u32_le(self.creator)?;
        io.write_u32_le(self.updated)?;
        io.write_u32_le(self.updater)?;
        io.write_u16_le(self.aspect_x)?;
        io.write_u16_le(self.aspect_y)?;
        io.strict_write(&[0u8; 38])?; // reserved2
        io.write_u32_le(self.oframe1)?;
        io.write_u32_le(self.oframe2)?;
        io.strict_write(&[0u8; 40]) // reserved3
    }
}

/// 16-byte frame header.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FrameHeader {
    pub size: u32,
    pub magic: u16,
    pub chunks: u16,
    pub delay: u16,
}

impl FrameHeader {
    pub(crate) fn read(io: &mut dyn IoStream) -> Result<Self> {
        let header = Self {
            size: io.read_u32_le()?,
            magic: io.read_u16_le()?,
            chunks: io.read_u16_le()?,
            delay: io.read_u16_le()?,
        };
        let mut reserved = [0u8; 6];
        io.strict_read(&mut reserved)?;
        Ok(header)
    }

    pub(crate) fn write(&self, io: &mut dyn IoStream) -> Result<()> {
        io.write_u32_le(self.size)?;
        io.write_u16_le(self.magic)?;
        io.write_u16_le(self.chunks)?;
        io.write_u16_le(self.delay)?;
        io.strict_write(&[0u8; 6])
    }
}

/// 6-byte chunk header; `size` includes the header itself.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ChunkHeader {
    pub size: u32,
    pub kind: u16,
}

pub(crate) const CHUNK_HEADER_SIZE: u32 = 6;

impl ChunkHeader {
    pub(crate) fn read(io: &mut dyn IoStream) -> Result<Self> {
        Ok(Self {
            size: io.read_u32_le()?,
            kind: io.read_u16_le()?,
        })
    }

    pub(crate) fn write(&self, io: &mut dyn IoStream) -> Result<()> {
        io.write_u32_le(self.size)?;
        io.write_u16_le(self.kind)
    }
}

// ── Codec registration ──────────────────────────────────────────────

static FLI_INFO: CodecInfo = CodecInfo {
    name: "fli",
    version: "1.0.0",
    description: "Autodesk FLIC animation",
    extensions: &["fli", "flc", "flx"],
    mime_types: &["video/x-fli", "video/x-flc", "video/flc"],
    // magic at offset 4, after the 32-bit file size
    magic_numbers: &["?? ?? ?? ?? 11 af", "?? ?? ?? ?? 12 af"],
    load_features: LoadFeatures {
        pixel_formats: &[PixelFormat::Indexed8],
        features: CodecFeatures::ANIMATED.union(CodecFeatures::STATIC),
        tuning_keys: &[],
    },
    save_features: SaveFeatures {
        pixel_formats: &[PixelFormat::Indexed8],
        compressions: &[Compression::Rle],
        features: CodecFeatures::ANIMATED.union(CodecFeatures::STATIC),
        tuning_keys: &[],
    },
};

/// The FLI/FLC codec.
pub struct FliCodec;

impl Codec for FliCodec {
    fn info(&self) -> &'static CodecInfo {
        &FLI_INFO
    }

    fn load_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &LoadOptions,
    ) -> Result<Box<dyn LoadSession + 'io>> {
        Ok(Box::new(FliLoadSession::open(io, options)?))
    }

    fn save_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &SaveOptions,
    ) -> Result<Box<dyn SaveSession + 'io>> {
        Ok(Box::new(FliSaveSession::open(io, options)?))
    }
}
