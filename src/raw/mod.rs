//! Camera RAW loading through the pure-Rust `rawloader` crate
//! (feature `raw`). Load-only: sensor data is exposed as 16-bit
//! grayscale (CFA mosaics) or 16-bit RGB (pre-composited files), with
//! camera facts deposited as special properties.

use crate::codec::{Codec, CodecFeatures, CodecInfo, LoadFeatures, LoadSession, Phase,
                   SaveFeatures, SaveSession};
use crate::image::{Compression, Image, Orientation, SourceImage};
use crate::io::IoStream;
use crate::meta::Variant;
use crate::options::{LoadFlags, LoadOptions, SaveOptions};
use crate::pixel::PixelFormat;
use crate::{Error, Result};

/// Knobs libraw-style pipelines expose; the rawloader backend decodes
/// sensor data only, so these are validated and recorded, not applied.
const RAW_TUNING_KEYS: &[&str] = &[
    "raw-brightness",
    "raw-highlight",
    "raw-output-color",
    "raw-output-bits-per-sample",
    "raw-demosaic",
    "raw-four-color-rgb",
    "raw-dcb-iterations",
    "raw-dcb-enhance-focal-length",
    "raw-use-camera-white-balance",
    "raw-use-auto-white-balance",
    "raw-user-multiplier",
    "raw-auto-brightness",
    "raw-half-size",
    "raw-use-fuji-rotate",
    "raw-no-interpolation",
    "raw-median-passes",
    "raw-gamma",
];

static RAW_INFO: CodecInfo = CodecInfo {
    name: "raw",
    version: "1.0.0",
    description: "Camera RAW formats",
    extensions: &[
        "cr2", "crw", "nef", "nrw", "arw", "srf", "sr2", "dng", "raf", "orf", "rw2", "pef",
        "srw", "kdc", "dcr", "mrw", "3fr", "erf", "mef", "mos", "iiq",
    ],
    mime_types: &["image/x-raw", "image/x-dcraw"],
    magic_numbers: &[
        "49 49 2a 00",             // TIFF little-endian (CR2/NEF/DNG/...)
        "4d 4d 00 2a",             // TIFF big-endian
        "46 55 4a 49 46 49 4c 4d", // "FUJIFILM" (RAF)
    ],
    load_features: LoadFeatures {
        pixel_formats: &[PixelFormat::Gray16, PixelFormat::Rgb48],
        features: CodecFeatures::STATIC,
        tuning_keys: RAW_TUNING_KEYS,
    },
    save_features: SaveFeatures::none(),
};

/// The camera RAW codec. Load-only.
pub struct RawCodec;

impl Codec for RawCodec {
    fn info(&self) -> &'static CodecInfo {
        &RAW_INFO
    }

    fn load_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &LoadOptions,
    ) -> Result<Box<dyn LoadSession + 'io>> {
        Ok(Box::new(RawLoadSession::open(io, options)?))
    }

    fn save_init<'io>(
        &self,
        _io: &'io mut dyn IoStream,
        _options: &SaveOptions,
    ) -> Result<Box<dyn SaveSession + 'io>> {
        Err(Error::NotImplemented("saving camera RAW".into()))
    }
}

struct RawLoadSession {
    raw: rawloader::RawImage,
    pixel_format: PixelFormat,
    fetch_source_image: bool,
    done: bool,
    phase: Phase,
}

impl RawLoadSession {
    fn open(io: &mut dyn IoStream, options: &LoadOptions) -> Result<Self> {
        // validate the recognized knobs; none are applied by this backend
        for key in RAW_TUNING_KEYS {
            if let Some(value) = options.tuning.get(*key) {
                match value {
                    Variant::Str(_)
                    | Variant::Bool(_)
                    | Variant::I32(_)
                    | Variant::U32(_)
                    | Variant::I64(_)
                    | Variant::F64(_) => {
                        log::debug!("raw: tuning key '{key}' accepted but not applied")
                    }
                    other => log::warn!("raw: tuning key '{key}' has unusable value {other:?}"),
                }
            }
        }

        let mut bytes = Vec::new();
        let mut chunk = [0u8; 64 * 1024];
        loop {
            let n = io.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
        }

        let mut cursor = std::io::Cursor::new(bytes);
        let raw = rawloader::decode(&mut cursor)
            .map_err(|e| Error::UnderlyingCodec(format!("rawloader: {e}")))?;

        let pixel_format = match raw.cpp {
            1 => PixelFormat::Gray16,
            3 => PixelFormat::Rgb48,
            other => {
                return Err(Error::UnsupportedImageProperty(format!(
                    "{other} samples per RAW pixel"
                )))
            }
        };

        let (width, height) = (raw.width as u32, raw.height as u32);
        if width == 0 || height == 0 {
            return Err(Error::IncorrectDimensions(format!("{width}x{height}")));
        }
        options.limits.check(width, height)?;
        options
            .limits
            .check_memory(raw.width * raw.height * raw.cpp * 2)?;

        log::debug!(
            "raw: {} {} ({}x{}, {} sample(s) per pixel)",
            raw.clean_make,
            raw.clean_model,
            raw.width,
            raw.height,
            raw.cpp
        );

        Ok(Self {
            raw,
            pixel_format,
            fetch_source_image: options.flags.contains(LoadFlags::SOURCE_IMAGE),
            done: false,
            phase: Phase::default(),
        })
    }

    fn source_image(&self) -> SourceImage {
        let mut source = SourceImage::new(self.pixel_format);
        source.compression = Compression::Unknown;
        source.orientation = match self.raw.orientation {
            rawloader::Orientation::Normal => Orientation::Normal,
            rawloader::Orientation::Rotate90 => Orientation::Rotated90,
            rawloader::Orientation::Rotate180 => Orientation::Rotated180,
            rawloader::Orientation::Rotate270 => Orientation::Rotated270,
            rawloader::Orientation::HorizontalFlip => Orientation::MirroredHorizontally,
            rawloader::Orientation::VerticalFlip => Orientation::MirroredVertically,
            _ => Orientation::Normal,
        };

        let props = &mut source.special_properties;
        props.insert("raw-make".into(), Variant::Str(self.raw.clean_make.clone()));
        props.insert(
            "raw-model".into(),
            Variant::Str(self.raw.clean_model.clone()),
        );
        props.insert(
            "raw-white-level".into(),
            Variant::U32(u32::from(self.raw.whitelevels[0])),
        );
        props.insert(
            "raw-black-level".into(),
            Variant::U32(u32::from(self.raw.blacklevels[0])),
        );
        props.insert(
            "raw-wb-red".into(),
            Variant::F32(self.raw.wb_coeffs[0]),
        );
        props.insert(
            "raw-wb-green".into(),
            Variant::F32(self.raw.wb_coeffs[1]),
        );
        props.insert(
            "raw-wb-blue".into(),
            Variant::F32(self.raw.wb_coeffs[2]),
        );
        source
    }
}

impl LoadSession for RawLoadSession {
    fn seek_next_frame(&mut self) -> Result<Image> {
        self.phase.begin_seek()?;
        if self.done {
            self.phase.finish();
            return Err(Error::NoMoreFrames);
        }

        let mut image = Image::shell(
            self.raw.width as u32,
            self.raw.height as u32,
            self.pixel_format,
        )?;
        if self.fetch_source_image {
            image.source_image = Some(self.source_image());
        }

        self.done = true;
        Ok(image)
    }

    fn frame(&mut self, image: &mut Image) -> Result<()> {
        self.phase.begin_frame()?;
        if image.pixels.len() != image.pixels_size()? {
            return Err(Error::InvalidImage("pixel buffer not allocated".into()));
        }

        let samples_per_row = self.raw.width * self.raw.cpp;
        match &self.raw.data {
            rawloader::RawImageData::Integer(samples) => {
                for y in 0..self.raw.height {
                    let row = &samples[y * samples_per_row..(y + 1) * samples_per_row];
                    let out = image.row_mut(y as u32);
                    for (i, sample) in row.iter().enumerate() {
                        out[i * 2..i * 2 + 2].copy_from_slice(&sample.to_ne_bytes());
                    }
                }
            }
            rawloader::RawImageData::Float(samples) => {
                // float sensor data is normalized against the white level
                let white = f32::from(self.raw.whitelevels[0].max(1));
                for y in 0..self.raw.height {
                    let row = &samples[y * samples_per_row..(y + 1) * samples_per_row];
                    let out = image.row_mut(y as u32);
                    for (i, sample) in row.iter().enumerate() {
                        let v = (sample / white * 65535.0).clamp(0.0, 65535.0) as u16;
                        out[i * 2..i * 2 + 2].copy_from_slice(&v.to_ne_bytes());
                    }
                }
            }
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.finish();
        Ok(())
    }
}
