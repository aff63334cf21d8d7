//! # polyframe
//!
//! Streaming multi-format image codec library: one frame-at-a-time
//! pipeline over heterogeneous formats, each with its own engine.
//!
//! ## Formats
//!
//! - **PNG / APNG** (`png` feature) — full chunk-level engine with
//!   Adam7 interlacing, text/EXIF/ICC/resolution metadata, and the
//!   APNG dispose/blend frame state machine.
//! - **FLIC** (`fli` feature) — Autodesk FLI/FLC animations with the
//!   BRUN/LC/SS2/COLOR delta chunk codecs, reading and writing.
//! - **XPM** (`xpm` feature) — X PixMap text images.
//! - **XWD** (`xwd` feature) — X Window Dump screenshots.
//! - **HEIF / RAW / video** (`heif`, `raw`, `video` features, opt-in) —
//!   adapters over libheif, rawloader, and FFMS2.
//!
//! ## Loading
//!
//! Codecs are selected by magic number (or extension / MIME type) and
//! driven through a uniform session: seek to a frame, get its shape,
//! decode into a caller-allocated buffer.
//!
//! ```no_run
//! let frames = polyframe::load_all("animation.flc")?;
//! for frame in &frames {
//!     println!("{}x{} {} delay {} ms",
//!              frame.width, frame.height, frame.pixel_format, frame.delay);
//! }
//! # Ok::<(), polyframe::Error>(())
//! ```
//!
//! Or frame by frame over any stream:
//!
//! ```no_run
//! use polyframe::{ImageReader, MemoryStream};
//!
//! let mut io = MemoryStream::from_vec(std::fs::read("image.png")?);
//! let mut reader = ImageReader::new(&mut io)?;
//! while let Some(frame) = reader.next_frame()? {
//!     // ...
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Pixel format conversion
//!
//! [`convert`] translates between the supported pixel formats, with
//! optional alpha compositing against a background:
//!
//! ```
//! use polyframe::{convert_with_options, ConversionOptions, Image, PixelFormat};
//!
//! let mut rgba = Image::new(1, 1, PixelFormat::Rgba32)?;
//! rgba.pixels.copy_from_slice(&[255, 0, 0, 128]);
//! let rgb = convert_with_options(
//!     &rgba,
//!     PixelFormat::Rgb24,
//!     &ConversionOptions::blend_with([255, 255, 255]),
//! )?;
//! assert_eq!(rgb.pixels, vec![255, 127, 127]);
//! # Ok::<(), polyframe::Error>(())
//! ```

#![forbid(unsafe_code)]

mod codec;
mod convert;
mod error;
mod image;
mod io;
mod limits;
mod meta;
mod options;
mod pixel;
mod reader;
mod registry;
mod writer;

#[cfg(feature = "fli")]
mod fli;
#[cfg(feature = "heif")]
mod heif;
#[cfg(feature = "png")]
mod png;
#[cfg(feature = "raw")]
mod raw;
#[cfg(feature = "video")]
mod video;
#[cfg(feature = "xpm")]
mod xpm;
#[cfg(feature = "xwd")]
mod xwd;

pub use codec::{
    Codec, CodecFeatures, CodecInfo, LoadFeatures, LoadSession, SaveFeatures, SaveSession,
};
pub use convert::{convert, convert_with_options, ConversionFlags, ConversionOptions};
pub use error::{Error, Result};
pub use image::{
    Compression, Image, Orientation, Palette, Resolution, ResolutionUnit, SourceImage,
};
pub use io::{FileStream, IoStream, MemoryStream, SliceStream, StdStream};
pub use limits::Limits;
pub use meta::{MetaData, MetaDataKey, Variant};
pub use options::{LoadFlags, LoadOptions, SaveFlags, SaveOptions, TuningMap};
pub use pixel::{bytes_per_line, PixelFormat};
pub use reader::{
    load_all, load_all_from_memory, load_all_from_stream, load_first, probe_file, ImageReader,
};
pub use registry::{default_registry, CodecRegistry};
pub use writer::{save, save_all, save_to_memory, save_to_stream, ImageWriter};

#[cfg(feature = "fli")]
pub use fli::FliCodec;
#[cfg(feature = "heif")]
pub use heif::HeifCodec;
#[cfg(feature = "png")]
pub use png::PngCodec;
#[cfg(feature = "raw")]
pub use raw::RawCodec;
#[cfg(feature = "video")]
pub use video::VideoCodec;
#[cfg(feature = "xpm")]
pub use xpm::XpmCodec;
#[cfg(feature = "xwd")]
pub use xwd::XwdCodec;
