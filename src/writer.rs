//! High-level saving: codec selection plus the frame loop.

use std::path::Path;

use crate::codec::{Codec, SaveSession};
use crate::image::Image;
use crate::io::{FileStream, IoStream, MemoryStream};
use crate::options::SaveOptions;
use crate::registry::default_registry;
use crate::{Error, Result};

/// A save session bound to a stream.
///
/// Call [`finish`](ImageWriter::finish) when done: some formats
/// back-patch their headers only then.
pub struct ImageWriter<'io> {
    session: Box<dyn SaveSession + 'io>,
}

impl<'io> ImageWriter<'io> {
    /// Open a save session with an explicitly chosen codec.
    pub fn with_codec(
        codec: &dyn Codec,
        io: &'io mut dyn IoStream,
        options: &SaveOptions,
    ) -> Result<Self> {
        log::debug!("saving with the {} codec", codec.info().name);
        Ok(Self {
            session: codec.save_init(io, options)?,
        })
    }

    /// Validate and write one frame.
    pub fn write_frame(&mut self, image: &Image) -> Result<()> {
        self.session.seek_next_frame(image)?;
        self.session.frame(image)
    }

    /// Finalize the stream.
    pub fn finish(mut self) -> Result<()> {
        self.session.finish()
    }
}

// ── Convenience entry points ────────────────────────────────────────

/// Save all `images` to `path`, selecting the codec by extension.
pub fn save_all(path: impl AsRef<Path>, images: &[Image]) -> Result<()> {
    let codec = default_registry().by_path(&path)?;
    let mut io = FileStream::create(path)?;
    save_to_stream(codec, &mut io, images, &SaveOptions::default())
}

/// Save one image to `path`, selecting the codec by extension.
pub fn save(path: impl AsRef<Path>, image: &Image) -> Result<()> {
    save_all(path, std::slice::from_ref(image))
}

/// Encode `images` into memory with the codec registered for
/// `extension`.
pub fn save_to_memory(extension: &str, images: &[Image]) -> Result<Vec<u8>> {
    let codec = default_registry().by_extension(extension)?;
    let mut io = MemoryStream::new();
    save_to_stream(codec, &mut io, images, &SaveOptions::default())?;
    Ok(io.into_inner())
}

/// Save all `images` through an explicit codec and options.
pub fn save_to_stream(
    codec: &dyn Codec,
    io: &mut dyn IoStream,
    images: &[Image],
    options: &SaveOptions,
) -> Result<()> {
    if images.is_empty() {
        return Err(Error::NoMoreFrames);
    }
    let mut writer = ImageWriter::with_codec(codec, io, options)?;
    for image in images {
        writer.write_frame(image)?;
    }
    writer.finish()
}
