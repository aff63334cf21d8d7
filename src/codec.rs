//! The codec contract: the interface every format engine satisfies.
//!
//! A codec is a stateless descriptor-plus-factory; `load_init`/`save_init`
//! open a session that borrows the caller's stream and walks the frame
//! state machine:
//!
//! ```text
//! INIT ─load_init─► READY ─seek─► FRAME_META ─frame─► READY ─► … ─finish─► DONE
//! ```
//!
//! Calling operations out of order is a caller error and returns
//! [`Error::StateError`]; `finish` is safe from any state.

use crate::image::{Compression, Image};
use crate::io::IoStream;
use crate::options::{LoadOptions, SaveOptions};
use crate::pixel::PixelFormat;
use crate::{Error, Result};

use bitflags::bitflags;

bitflags! {
    /// Capabilities a codec declares in its descriptor.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CodecFeatures: u32 {
        /// Single still frames.
        const STATIC = 1 << 0;
        /// Frames with delays.
        const ANIMATED = 1 << 1;
        /// Independent pages, no delay.
        const MULTI_PAGED = 1 << 2;
        const META_DATA = 1 << 3;
        const ICCP = 1 << 4;
        const INTERLACED = 1 << 5;
    }
}

/// What a codec can load.
#[derive(Clone, Copy, Debug)]
pub struct LoadFeatures {
    /// Output pixel formats the loader can produce (beyond `Source`).
    pub pixel_formats: &'static [PixelFormat],
    pub features: CodecFeatures,
    /// Tuning keys the loader understands.
    pub tuning_keys: &'static [&'static str],
}

/// What a codec can save.
#[derive(Clone, Copy, Debug)]
pub struct SaveFeatures {
    /// Input pixel formats the saver accepts.
    pub pixel_formats: &'static [PixelFormat],
    pub compressions: &'static [Compression],
    pub features: CodecFeatures,
    /// Tuning keys the saver understands.
    pub tuning_keys: &'static [&'static str],
}

impl SaveFeatures {
    /// A codec with no save side.
    pub const fn none() -> Self {
        Self {
            pixel_formats: &[],
            compressions: &[],
            features: CodecFeatures::empty(),
            tuning_keys: &[],
        }
    }
}

/// Descriptor for one codec: identification, selection data, and
/// capability lists. The dispatcher works entirely off these.
#[derive(Clone, Copy, Debug)]
pub struct CodecInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    /// Lower-case, without the leading dot.
    pub extensions: &'static [&'static str],
    pub mime_types: &'static [&'static str],
    /// Hex byte patterns matched from stream start; `??` is a wildcard
    /// (e.g. `"?? ?? ?? ?? 11 af"` for a little-endian magic at offset 4).
    pub magic_numbers: &'static [&'static str],
    pub load_features: LoadFeatures,
    pub save_features: SaveFeatures,
}

impl CodecInfo {
    /// Longest magic pattern, in bytes.
    pub fn max_magic_len(&self) -> usize {
        self.magic_numbers
            .iter()
            .map(|m| parse_magic(m).len())
            .max()
            .unwrap_or(0)
    }

    /// Whether any magic pattern matches the head of a stream.
    pub fn matches_magic(&self, head: &[u8]) -> bool {
        self.magic_numbers.iter().any(|pattern| {
            let bytes = parse_magic(pattern);
            !bytes.is_empty()
                && head.len() >= bytes.len()
                && bytes
                    .iter()
                    .zip(head)
                    .all(|(want, got)| want.map_or(true, |b| b == *got))
        })
    }

    /// Case-insensitive extension match (no leading dot).
    pub fn matches_extension(&self, extension: &str) -> bool {
        let lower = extension.to_ascii_lowercase();
        self.extensions.iter().any(|e| *e == lower)
    }

    /// Case-insensitive MIME type match.
    pub fn matches_mime_type(&self, mime: &str) -> bool {
        let lower = mime.to_ascii_lowercase();
        self.mime_types.iter().any(|m| *m == lower)
    }
}

/// Parse a magic pattern string into bytes; `None` entries are wildcards.
/// Malformed tokens terminate the pattern early (a warning is logged).
pub(crate) fn parse_magic(pattern: &str) -> Vec<Option<u8>> {
    let mut out = Vec::new();
    for token in pattern.split_ascii_whitespace() {
        if token == "??" {
            out.push(None);
        } else if let Ok(byte) = u8::from_str_radix(token, 16) {
            out.push(Some(byte));
        } else {
            log::warn!("malformed magic token '{token}' in pattern '{pattern}'");
            break;
        }
    }
    out
}

/// A format engine. Implementations are stateless singletons; all
/// per-stream state lives in the sessions they open.
pub trait Codec: Send + Sync {
    fn info(&self) -> &'static CodecInfo;

    /// Parse enough of the header to reject non-matching streams and
    /// open a load session.
    fn load_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &LoadOptions,
    ) -> Result<Box<dyn LoadSession + 'io>>;

    /// Open a save session.
    fn save_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &SaveOptions,
    ) -> Result<Box<dyn SaveSession + 'io>>;
}

/// One decoding session over one stream.
pub trait LoadSession {
    /// Advance to the next frame and return its shell: shape, palette
    /// skeleton, source descriptor, and metadata populated, pixel buffer
    /// empty (the caller allocates it from the announced shape).
    /// Returns [`Error::NoMoreFrames`] past the last frame.
    fn seek_next_frame(&mut self) -> Result<Image>;

    /// Fill the caller-allocated pixel buffer of the current frame.
    fn frame(&mut self, image: &mut Image) -> Result<()>;

    /// Release codec resources. Idempotent; safe from any state.
    fn finish(&mut self) -> Result<()>;
}

/// One encoding session over one stream.
pub trait SaveSession {
    /// Validate the prepared image against codec capabilities before any
    /// pixel bytes are written, and write per-frame headers.
    fn seek_next_frame(&mut self, image: &Image) -> Result<()>;

    /// Write the frame's pixel data.
    fn frame(&mut self, image: &Image) -> Result<()>;

    /// Finalize the stream (trailing chunks, back-patched headers).
    /// Idempotent; safe from any state.
    fn finish(&mut self) -> Result<()>;
}

// ── Shared state-machine bookkeeping ────────────────────────────────

/// Per-session lifecycle phase, shared by every codec's sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum Phase {
    #[default]
    Ready,
    FrameMeta,
    Done,
}

impl Phase {
    /// `seek_next_frame` entry check: READY → FRAME_META.
    pub(crate) fn begin_seek(&mut self) -> Result<()> {
        match self {
            Phase::Ready => {
                *self = Phase::FrameMeta;
                Ok(())
            }
            _ => Err(Error::StateError),
        }
    }

    /// `frame` entry check: FRAME_META → READY.
    pub(crate) fn begin_frame(&mut self) -> Result<()> {
        match self {
            Phase::FrameMeta => {
                *self = Phase::Ready;
                Ok(())
            }
            _ => Err(Error::StateError),
        }
    }

    /// `finish` always succeeds and is terminal.
    pub(crate) fn finish(&mut self) {
        *self = Phase::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_patterns_with_wildcards() {
        let info = CodecInfo {
            name: "test",
            version: "1.0",
            description: "test codec",
            extensions: &["tst"],
            mime_types: &["image/x-test"],
            magic_numbers: &["?? ?? 11 af", "89 50 4e 47"],
            load_features: LoadFeatures {
                pixel_formats: &[],
                features: CodecFeatures::STATIC,
                tuning_keys: &[],
            },
            save_features: SaveFeatures::none(),
        };
        assert!(info.matches_magic(&[0xAA, 0xBB, 0x11, 0xAF, 0x00]));
        assert!(info.matches_magic(&[0x89, 0x50, 0x4E, 0x47]));
        assert!(!info.matches_magic(&[0x89, 0x50, 0x4E]));
        assert!(!info.matches_magic(&[0x00, 0x00, 0x12, 0xAF]));
        assert_eq!(info.max_magic_len(), 4);
        assert!(info.matches_extension("TST"));
        assert!(info.matches_mime_type("IMAGE/X-TEST"));
    }

    #[test]
    fn phase_enforces_ordering() {
        let mut phase = Phase::default();
        assert!(phase.begin_frame().is_err());
        phase.begin_seek().unwrap();
        assert!(phase.begin_seek().is_err());
        phase.begin_frame().unwrap();
        phase.begin_seek().unwrap();
        phase.finish();
        assert!(phase.begin_seek().is_err());
        phase.finish();
    }
}
