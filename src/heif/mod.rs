//! HEIF/AVIF loading and saving through libheif (feature `heif`).
//!
//! The adapter decodes the primary image to interleaved RGB(A), carries
//! the ICC profile opaquely, forwards the `heif-*` encoder knobs, and
//! maps libheif failures onto the error taxonomy.

use libheif_rs::{
    Channel, ColorSpace, CompressionFormat, EncoderQuality, HeifContext, HeifError,
    HeifErrorCode, LibHeif, RgbChroma,
};

use crate::codec::{Codec, CodecFeatures, CodecInfo, LoadFeatures, LoadSession, Phase,
                   SaveFeatures, SaveSession};
use crate::image::{Compression, Image, SourceImage};
use crate::io::IoStream;
use crate::meta::Variant;
use crate::options::{tuning_i64, tuning_str, LoadFlags, LoadOptions, SaveOptions};
use crate::pixel::PixelFormat;
use crate::{Error, Result};

static HEIF_INFO: CodecInfo = CodecInfo {
    name: "heif",
    version: "1.0.0",
    description: "High Efficiency Image Format",
    extensions: &["heif", "heic", "avif"],
    mime_types: &["image/heif", "image/heic", "image/avif"],
    magic_numbers: &[
        "?? ?? ?? ?? 66 74 79 70 68 65 69 63", // ftypheic
        "?? ?? ?? ?? 66 74 79 70 68 65 69 66", // ftypheif
        "?? ?? ?? ?? 66 74 79 70 6d 69 66 31", // ftypmif1
        "?? ?? ?? ?? 66 74 79 70 61 76 69 66", // ftypavif
    ],
    load_features: LoadFeatures {
        pixel_formats: &[PixelFormat::Rgb24, PixelFormat::Rgba32],
        features: CodecFeatures::STATIC.union(CodecFeatures::ICCP),
        tuning_keys: &[],
    },
    save_features: SaveFeatures {
        pixel_formats: &[PixelFormat::Rgb24, PixelFormat::Rgba32],
        compressions: &[Compression::Hevc, Compression::Av1],
        features: CodecFeatures::STATIC.union(CodecFeatures::ICCP),
        tuning_keys: &[
            "heif-preset",
            "heif-tune",
            "heif-tu-intra-depth",
            "heif-complexity",
            "heif-chroma",
            "heif-threads",
        ],
    },
};

/// Sub-error table: libheif error codes onto the closed taxonomy.
fn map_heif_error(error: HeifError) -> Error {
    match error.code {
        HeifErrorCode::InputDoesNotExist | HeifErrorCode::UsageError => {
            Error::InvalidImage(error.to_string())
        }
        HeifErrorCode::InvalidInput => Error::BrokenImage(error.to_string()),
        HeifErrorCode::UnsupportedFileType | HeifErrorCode::UnsupportedFeature => {
            Error::UnsupportedFormat(error.to_string())
        }
        HeifErrorCode::MemoryAllocationError => {
            Error::LimitExceeded(format!("libheif allocation: {error}"))
        }
        _ => Error::UnderlyingCodec(error.to_string()),
    }
}

/// The libheif-backed HEIF codec.
pub struct HeifCodec;

impl Codec for HeifCodec {
    fn info(&self) -> &'static CodecInfo {
        &HEIF_INFO
    }

    fn load_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &LoadOptions,
    ) -> Result<Box<dyn LoadSession + 'io>> {
        Ok(Box::new(HeifLoadSession::open(io, options)?))
    }

    fn save_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &SaveOptions,
    ) -> Result<Box<dyn SaveSession + 'io>> {
        Ok(Box::new(HeifSaveSession::open(io, options)?))
    }
}

// ── Loading ─────────────────────────────────────────────────────────

struct HeifLoadSession {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    pixels: Vec<u8>,
    stride: usize,
    iccp: Option<Vec<u8>>,
    has_depth: bool,
    fetch_source_image: bool,
    fetch_iccp: bool,
    done: bool,
    phase: Phase,
}

impl HeifLoadSession {
    fn open(io: &mut dyn IoStream, options: &LoadOptions) -> Result<Self> {
        let mut bytes = Vec::new();
        let mut chunk = [0u8; 64 * 1024];
        loop {
            let n = io.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
        }

        let lib_heif = LibHeif::new();
        let context = HeifContext::read_from_bytes(&bytes).map_err(map_heif_error)?;
        let handle = context.primary_image_handle().map_err(map_heif_error)?;

        let (width, height) = (handle.width(), handle.height());
        options.limits.check(width, height)?;
        options
            .limits
            .check_memory(width as usize * height as usize * 4)?;

        let has_alpha = handle.has_alpha_channel();
        let chroma = if has_alpha {
            RgbChroma::Rgba
        } else {
            RgbChroma::Rgb
        };
        let decoded = lib_heif
            .decode(&handle, ColorSpace::Rgb(chroma), None)
            .map_err(map_heif_error)?;

        let planes = decoded.planes();
        let plane = planes
            .interleaved
            .ok_or_else(|| Error::UnderlyingCodec("libheif returned no pixel plane".into()))?;

        let iccp = handle
            .color_profile_raw()
            .map(|profile| profile.data);

        Ok(Self {
            width,
            height,
            pixel_format: if has_alpha {
                PixelFormat::Rgba32
            } else {
                PixelFormat::Rgb24
            },
            pixels: plane.data.to_vec(),
            stride: plane.stride,
            iccp,
            has_depth: handle.has_depth_image(),
            fetch_source_image: options.flags.contains(LoadFlags::SOURCE_IMAGE),
            fetch_iccp: options.flags.contains(LoadFlags::ICCP),
            done: false,
            phase: Phase::default(),
        })
    }
}

impl LoadSession for HeifLoadSession {
    fn seek_next_frame(&mut self) -> Result<Image> {
        self.phase.begin_seek()?;
        if self.done {
            self.phase.finish();
            return Err(Error::NoMoreFrames);
        }

        let mut image = Image::shell(self.width, self.height, self.pixel_format)?;
        if self.fetch_iccp {
            image.iccp = self.iccp.clone().filter(|p| !p.is_empty());
        }
        if self.fetch_source_image {
            let mut source = SourceImage::new(self.pixel_format);
            source.compression = Compression::Hevc;
            source
                .special_properties
                .insert("heif-is-primary".into(), Variant::Bool(true));
            source
                .special_properties
                .insert("heif-has-depth".into(), Variant::Bool(self.has_depth));
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

        let row_bytes = image.bytes_per_line as usize;
        for y in 0..self.height as usize {
            let src = &self.pixels[y * self.stride..y * self.stride + row_bytes];
            image.row_mut(y as u32)[..row_bytes].copy_from_slice(src);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.finish();
        self.pixels = Vec::new();
        Ok(())
    }
}

// ── Saving ──────────────────────────────────────────────────────────

struct HeifSaveSession<'io> {
    io: &'io mut dyn IoStream,
    compression: CompressionFormat,
    quality: EncoderQuality,
    tuning: crate::options::TuningMap,
    frame_written: bool,
    phase: Phase,
}

impl<'io> HeifSaveSession<'io> {
    fn open(io: &'io mut dyn IoStream, options: &SaveOptions) -> Result<Self> {
        let compression = match options.compression {
            Compression::Unknown | Compression::Hevc => CompressionFormat::Hevc,
            Compression::Av1 => CompressionFormat::Av1,
            other => return Err(Error::UnsupportedCompression(format!("{other:?}"))),
        };

        // compression level 0-100 maps directly onto encoder quality
        let quality = if (0..=100).contains(&options.compression_level) {
            EncoderQuality::Lossy(options.compression_level as u8)
        } else {
            EncoderQuality::LossLess
        };

        Ok(Self {
            io,
            compression,
            quality,
            tuning: options.tuning.clone(),
            frame_written: false,
            phase: Phase::default(),
        })
    }
}

impl SaveSession for HeifSaveSession<'_> {
    fn seek_next_frame(&mut self, image: &Image) -> Result<()> {
        self.phase.begin_seek()?;
        if self.frame_written {
            return Err(Error::NoMoreFrames);
        }
        self.frame_written = true;

        image.check_valid()?;
        match image.pixel_format {
            PixelFormat::Rgb24 | PixelFormat::Rgba32 => Ok(()),
            other => Err(Error::UnsupportedPixelFormat(other)),
        }
    }

    fn frame(&mut self, image: &Image) -> Result<()> {
        self.phase.begin_frame()?;

        let lib_heif = LibHeif::new();
        let mut context = HeifContext::new().map_err(map_heif_error)?;
        let mut encoder = lib_heif
            .encoder_for_format(self.compression)
            .map_err(map_heif_error)?;
        encoder.set_quality(self.quality).map_err(map_heif_error)?;

        // x265-style knobs pass straight through to the encoder
        for (key, name) in [
            ("heif-preset", "preset"),
            ("heif-tune", "tune"),
            ("heif-chroma", "chroma"),
        ] {
            if let Some(value) = tuning_str(&self.tuning, key) {
                if let Err(error) = encoder.set_parameter_value(
                    name,
                    libheif_rs::EncoderParameterValue::String(value.to_string()),
                ) {
                    log::warn!("heif: encoder rejected {key}={value}: {error}");
                }
            }
        }
        for (key, name) in [
            ("heif-tu-intra-depth", "tu-intra-depth"),
            ("heif-complexity", "complexity"),
            ("heif-threads", "threads"),
        ] {
            if let Some(value) = tuning_i64(&self.tuning, key) {
                if let Err(error) = encoder.set_parameter_value(
                    name,
                    libheif_rs::EncoderParameterValue::Int(value as i32),
                ) {
                    log::warn!("heif: encoder rejected {key}={value}: {error}");
                }
            }
        }

        let has_alpha = image.pixel_format == PixelFormat::Rgba32;
        let chroma = if has_alpha {
            RgbChroma::Rgba
        } else {
            RgbChroma::Rgb
        };
        let mut heif_image =
            libheif_rs::Image::new(image.width, image.height, ColorSpace::Rgb(chroma))
                .map_err(map_heif_error)?;
        let channel_bits = if has_alpha { 32 } else { 24 };
        heif_image
            .create_plane(Channel::Interleaved, image.width, image.height, channel_bits)
            .map_err(map_heif_error)?;

        {
            let mut planes = heif_image.planes_mut();
            let plane = planes
                .interleaved
                .as_mut()
                .ok_or_else(|| Error::UnderlyingCodec("libheif plane allocation".into()))?;
            let row_bytes = image.bytes_per_line as usize;
            let stride = plane.stride;
            for y in 0..image.height as usize {
                plane.data[y * stride..y * stride + row_bytes]
                    .copy_from_slice(&image.row(y as u32)[..row_bytes]);
            }
        }

        let handle = context
            .encode_image(&heif_image, &mut encoder, None)
            .map_err(map_heif_error)?;
        if let Some(iccp) = &image.iccp {
            log::debug!("heif: ICC profile of {} bytes not re-embedded", iccp.len());
        }
        drop(handle);

        let bytes = context.write_to_bytes().map_err(map_heif_error)?;
        self.io.strict_write(&bytes)
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.finish();
        self.io.flush()
    }
}
