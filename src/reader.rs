//! High-level loading: codec probing plus the frame loop.

use std::path::Path;

use crate::codec::{Codec, LoadSession};
use crate::image::Image;
use crate::io::{FileStream, IoStream, SliceStream};
use crate::options::LoadOptions;
use crate::registry::default_registry;
use crate::{Error, Result};

/// A load session bound to a stream, yielding one frame at a time.
///
/// Dropping the reader releases codec resources; call
/// [`finish`](ImageReader::finish) to do so explicitly.
pub struct ImageReader<'io> {
    session: Box<dyn LoadSession + 'io>,
}

impl<'io> ImageReader<'io> {
    /// Probe the stream by magic number against the default registry
    /// and open a load session with default options.
    pub fn new(io: &'io mut dyn IoStream) -> Result<Self> {
        Self::with_options(io, &LoadOptions::default())
    }

    /// Probe the stream by magic number and open a load session.
    pub fn with_options(io: &'io mut dyn IoStream, options: &LoadOptions) -> Result<Self> {
        let codec = default_registry().by_magic(io)?;
        Self::with_codec(codec, io, options)
    }

    /// Open a load session with an explicitly chosen codec.
    pub fn with_codec(
        codec: &dyn Codec,
        io: &'io mut dyn IoStream,
        options: &LoadOptions,
    ) -> Result<Self> {
        log::debug!("loading with the {} codec", codec.info().name);
        Ok(Self {
            session: codec.load_init(io, options)?,
        })
    }

    /// Decode the next frame, or `None` past the last one.
    pub fn next_frame(&mut self) -> Result<Option<Image>> {
        let mut image = match self.session.seek_next_frame() {
            Ok(shell) => shell,
            Err(Error::NoMoreFrames) => return Ok(None),
            Err(error) => return Err(error),
        };
        image.alloc_pixels()?;
        self.session.frame(&mut image)?;
        Ok(Some(image))
    }

    /// Fetch the next frame's shell (shape, palette, metadata) without
    /// decoding pixels. The session cannot be resumed afterwards.
    pub fn probe(mut self) -> Result<Image> {
        self.session.seek_next_frame()
    }

    /// Release codec resources.
    pub fn finish(mut self) -> Result<()> {
        self.session.finish()
    }
}

// ── Convenience entry points ────────────────────────────────────────

/// Load every frame of the file at `path`.
pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<Image>> {
    let mut io = FileStream::open(path)?;
    load_all_from_stream(&mut io)
}

/// Load the first frame of the file at `path`.
pub fn load_first(path: impl AsRef<Path>) -> Result<Image> {
    let mut io = FileStream::open(path)?;
    let mut reader = ImageReader::new(&mut io)?;
    let image = reader.next_frame()?.ok_or(Error::NoMoreFrames);
    reader.finish()?;
    image
}

/// Load every frame from an in-memory encoded image.
pub fn load_all_from_memory(data: &[u8]) -> Result<Vec<Image>> {
    let mut io = SliceStream::new(data);
    load_all_from_stream(&mut io)
}

/// Load every frame from an open stream.
pub fn load_all_from_stream(io: &mut dyn IoStream) -> Result<Vec<Image>> {
    let mut reader = ImageReader::new(io)?;
    let mut frames = Vec::new();
    while let Some(frame) = reader.next_frame()? {
        frames.push(frame);
    }
    reader.finish()?;
    if frames.is_empty() {
        return Err(Error::NoMoreFrames);
    }
    Ok(frames)
}

/// Shape and metadata of the first frame at `path`, without decoding
/// pixel data.
pub fn probe_file(path: impl AsRef<Path>) -> Result<Image> {
    let mut io = FileStream::open(path)?;
    let reader = ImageReader::new(&mut io)?;
    reader.probe()
}
