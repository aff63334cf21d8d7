//! Codec dispatch: selecting an engine by magic number, extension, or
//! MIME type.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::OnceLock;

use crate::codec::Codec;
use crate::io::IoStream;
use crate::{Error, Result};

/// An ordered collection of codecs. Registration order is priority:
/// the first matching codec wins.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: Vec<Box<dyn Codec>>,
}

impl CodecRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every codec this build carries.
    pub fn with_default_codecs() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "png")]
        registry.register(Box::new(crate::png::PngCodec));
        #[cfg(feature = "fli")]
        registry.register(Box::new(crate::fli::FliCodec));
        #[cfg(feature = "xpm")]
        registry.register(Box::new(crate::xpm::XpmCodec));
        #[cfg(feature = "xwd")]
        registry.register(Box::new(crate::xwd::XwdCodec));
        #[cfg(feature = "heif")]
        registry.register(Box::new(crate::heif::HeifCodec));
        #[cfg(feature = "raw")]
        registry.register(Box::new(crate::raw::RawCodec));
        #[cfg(feature = "video")]
        registry.register(Box::new(crate::video::VideoCodec));
        registry
    }

    pub fn register(&mut self, codec: Box<dyn Codec>) {
        self.codecs.push(codec);
    }

    pub fn codecs(&self) -> impl Iterator<Item = &dyn Codec> {
        self.codecs.iter().map(|c| c.as_ref())
    }

    pub fn by_name(&self, name: &str) -> Option<&dyn Codec> {
        self.codecs()
            .find(|c| c.info().name.eq_ignore_ascii_case(name))
    }

    /// Select by file extension (with or without the leading dot),
    /// case-insensitive.
    pub fn by_extension(&self, extension: &str) -> Result<&dyn Codec> {
        let ext = extension.trim_start_matches('.');
        self.codecs()
            .find(|c| c.info().matches_extension(ext))
            .ok_or(Error::CodecNotFound)
    }

    /// Select by the extension of `path`.
    pub fn by_path(&self, path: impl AsRef<Path>) -> Result<&dyn Codec> {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .ok_or(Error::CodecNotFound)?;
        self.by_extension(ext)
    }

    /// Select by MIME type, case-insensitive exact match.
    pub fn by_mime_type(&self, mime: &str) -> Result<&dyn Codec> {
        self.codecs()
            .find(|c| c.info().matches_mime_type(mime))
            .ok_or(Error::CodecNotFound)
    }

    /// Probe the stream head against every codec's magic patterns.
    ///
    /// Reads at most the longest pattern length, then rewinds to where
    /// the stream was. The stream must be seekable.
    pub fn by_magic(&self, io: &mut dyn IoStream) -> Result<&dyn Codec> {
        let probe_len = self
            .codecs()
            .map(|c| c.info().max_magic_len())
            .max()
            .unwrap_or(0);
        if probe_len == 0 {
            return Err(Error::CodecNotFound);
        }

        let start = io.tell()?;
        let mut head = vec![0u8; probe_len];
        let mut filled = 0;
        while filled < head.len() {
            let n = io.read(&mut head[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        head.truncate(filled);
        io.seek(SeekFrom::Start(start))?;

        self.codecs()
            .find(|c| c.info().matches_magic(&head))
            .ok_or(Error::CodecNotFound)
    }
}

/// The process-wide registry, populated once and read-only afterwards.
pub fn default_registry() -> &'static CodecRegistry {
    static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    REGISTRY.get_or_init(CodecRegistry::with_default_codecs)
}
