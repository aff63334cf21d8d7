use crate::pixel::PixelFormat;

/// Errors from loading, saving, and converting images.
///
/// The taxonomy is closed: every failure a codec or the conversion engine
/// can report maps onto exactly one of these variants.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    // ── I/O ─────────────────────────────────────────────────────────
    #[error("I/O read error: {0}")]
    ReadIo(std::io::Error),

    #[error("I/O write error: {0}")]
    WriteIo(std::io::Error),

    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },

    #[error("stream is not seekable")]
    NotSeekable,

    #[error("unexpected end of stream")]
    UnexpectedEof,

    // ── Format / structural ─────────────────────────────────────────
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("broken image: {0}")]
    BrokenImage(String),

    #[error("incorrect image dimensions: {0}")]
    IncorrectDimensions(String),

    #[error("unsupported format variant: {0}")]
    UnsupportedFormat(String),

    // ── Capability ──────────────────────────────────────────────────
    #[error("unsupported pixel format: {0}")]
    UnsupportedPixelFormat(PixelFormat),

    #[error("unsupported bit depth: {0}")]
    UnsupportedBitDepth(u32),

    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),

    #[error("unsupported image property: {0}")]
    UnsupportedImageProperty(String),

    #[error("unsupported conversion: {0} -> {1}")]
    UnsupportedConversion(PixelFormat, PixelFormat),

    // ── Resource ────────────────────────────────────────────────────
    #[error("dimensions too large: {width}x{height}")]
    DimensionsTooLarge { width: u32, height: u32 },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("indexed image has no palette")]
    MissingPalette,

    #[error("not implemented: {0}")]
    NotImplemented(String),

    // ── Control ─────────────────────────────────────────────────────
    #[error("no more frames")]
    NoMoreFrames,

    #[error("codec operation called out of order")]
    StateError,

    // ── Dispatch ────────────────────────────────────────────────────
    #[error("no codec found for this stream")]
    CodecNotFound,

    // ── Underlying ──────────────────────────────────────────────────
    #[error("underlying codec error: {0}")]
    UnderlyingCodec(String),
}

pub type Result<T> = std::result::Result<T, Error>;
