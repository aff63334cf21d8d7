//! Video-frame loading through FFMS2 (feature `video`).
//!
//! FFMS2 indexes a media file and then hands out decoded frames by
//! number. The adapter spools the stream to a temporary file (FFMS2
//! works on paths), indexes the first video track, and yields RGBA
//! frames with per-frame delays derived from the track frame rate.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use ffms2::frame::Frame;
use ffms2::index::Indexer;
use ffms2::track::TrackType;
use ffms2::video::{SeekMode, VideoSource};

use crate::codec::{Codec, CodecFeatures, CodecInfo, LoadFeatures, LoadSession, Phase,
                   SaveFeatures, SaveSession};
use crate::image::{Compression, Image, SourceImage};
use crate::io::IoStream;
use crate::meta::Variant;
use crate::options::{tuning_i64, LoadFlags, LoadOptions, SaveOptions};
use crate::pixel::PixelFormat;
use crate::{Error, Result};

static VIDEO_INFO: CodecInfo = CodecInfo {
    name: "video",
    version: "1.0.0",
    description: "Video frames via FFMS2",
    extensions: &["mp4", "mkv", "avi", "webm", "mov", "m4v", "mpg", "mpeg", "ts", "ogv"],
    mime_types: &["video/mp4", "video/x-matroska", "video/webm", "video/avi", "video/quicktime"],
    magic_numbers: &[
        "?? ?? ?? ?? 66 74 79 70", // ISO BMFF 'ftyp'
        "1a 45 df a3",             // Matroska/WebM EBML
        "52 49 46 46",             // RIFF (AVI)
    ],
    load_features: LoadFeatures {
        pixel_formats: &[PixelFormat::Rgba32],
        features: CodecFeatures::ANIMATED,
        tuning_keys: &[
            "video-threads",
            "video-low-resolution",
            "video-skip-frame",
            "video-skip-idct",
            "video-skip-loop-filter",
            "video-error-concealment",
        ],
    },
    save_features: SaveFeatures::none(),
};

/// The FFMS2-backed video frame codec. Load-only.
pub struct VideoCodec;

impl Codec for VideoCodec {
    fn info(&self) -> &'static CodecInfo {
        &VIDEO_INFO
    }

    fn load_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &LoadOptions,
    ) -> Result<Box<dyn LoadSession + 'io>> {
        Ok(Box::new(VideoLoadSession::open(io, options)?))
    }

    fn save_init<'io>(
        &self,
        _io: &'io mut dyn IoStream,
        _options: &SaveOptions,
    ) -> Result<Box<dyn SaveSession + 'io>> {
        Err(Error::NotImplemented("saving video streams".into()))
    }
}

/// Spooled copy of the input stream; removed on drop.
struct SpoolFile {
    path: PathBuf,
}

impl SpoolFile {
    fn create(io: &mut dyn IoStream) -> Result<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let path = std::env::temp_dir().join(format!(
            "polyframe-video-{}-{}.spool",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let mut file = std::fs::File::create(&path).map_err(Error::WriteIo)?;
        let mut chunk = [0u8; 64 * 1024];
        loop {
            let n = io.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            file.write_all(&chunk[..n]).map_err(Error::WriteIo)?;
        }
        Ok(Self { path })
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

struct VideoLoadSession {
    _spool: SpoolFile,
    source: VideoSource,
    width: u32,
    height: u32,
    frame_count: usize,
    delay_ms: i32,
    framerate: f64,
    color_space: i32,
    fetch_source_image: bool,
    current_frame: usize,
    phase: Phase,
}

impl VideoLoadSession {
    fn open(io: &mut dyn IoStream, options: &LoadOptions) -> Result<Self> {
        let spool = SpoolFile::create(io)?;

        let indexer = Indexer::new(&spool.path)
            .map_err(|e| Error::UnderlyingCodec(format!("FFMS2 indexer: {e:?}")))?;
        let index = indexer
            .DoIndexing2(0)
            .map_err(|e| Error::UnderlyingCodec(format!("FFMS2 indexing: {e:?}")))?;

        let track = index
            .FirstTrackOfType(TrackType::TYPE_VIDEO)
            .map_err(|_| Error::InvalidImage("no video track in stream".into()))?;

        let threads = tuning_i64(&options.tuning, "video-threads")
            .filter(|t| (0..=64).contains(t))
            .unwrap_or(1) as usize;
        for key in [
            "video-low-resolution",
            "video-skip-frame",
            "video-skip-idct",
            "video-skip-loop-filter",
            "video-error-concealment",
        ] {
            if tuning_i64(&options.tuning, key).is_some() {
                // per-codec decoder switches are not exposed by FFMS2
                log::debug!("video: tuning key '{key}' accepted but not applied");
            }
        }

        let mut source = VideoSource::new(&spool.path, track, &index, threads, SeekMode::SEEK_NORMAL)
            .map_err(|e| Error::UnderlyingCodec(format!("FFMS2 video source: {e:?}")))?;

        let properties = source.GetVideoProperties();
        let frame_count = properties.NumFrames();
        if frame_count == 0 {
            return Err(Error::NoMoreFrames);
        }

        let first = Frame::GetFrame(&mut source, 0)
            .map_err(|e| Error::UnderlyingCodec(format!("FFMS2 frame: {e:?}")))?;
        let resolution = first.get_encoded_resolution();
        let (width, height) = (resolution.0 as u32, resolution.1 as u32);
        if width == 0 || height == 0 {
            return Err(Error::IncorrectDimensions(format!("{width}x{height}")));
        }
        options.limits.check(width, height)?;
        options
            .limits
            .check_memory(width as usize * height as usize * 4)?;

        // request RGBA output scaled to the encoded resolution
        let rgba = Frame::set_Pixels(&["rgba"])
            .map_err(|e| Error::UnderlyingCodec(format!("FFMS2 pixel format: {e:?}")))?;
        source
            .SetOutputFormatV2(&rgba, width as usize, height as usize, 0)
            .map_err(|e| Error::UnderlyingCodec(format!("FFMS2 output format: {e:?}")))?;

        let framerate = if properties.FPSDenominator() > 0 {
            properties.FPSNumerator() as f64 / properties.FPSDenominator() as f64
        } else {
            0.0
        };
        let delay_ms = if framerate > 0.0 {
            (1000.0 / framerate) as i32
        } else {
            0
        };

        log::debug!(
            "video: {width}x{height}, {frame_count} frames, {framerate:.3} fps"
        );

        Ok(Self {
            _spool: spool,
            source,
            width,
            height,
            frame_count,
            delay_ms,
            framerate,
            color_space: properties.ColorSpace() as i32,
            fetch_source_image: options.flags.contains(LoadFlags::SOURCE_IMAGE),
            current_frame: 0,
            phase: Phase::default(),
        })
    }
}

impl LoadSession for VideoLoadSession {
    fn seek_next_frame(&mut self) -> Result<Image> {
        self.phase.begin_seek()?;
        if self.current_frame >= self.frame_count {
            self.phase.finish();
            return Err(Error::NoMoreFrames);
        }

        let mut image = Image::shell(self.width, self.height, PixelFormat::Rgba32)?;
        image.delay = self.delay_ms;

        if self.fetch_source_image {
            let mut source = SourceImage::new(PixelFormat::Yuv24);
            source.compression = Compression::Unknown;
            source
                .special_properties
                .insert("video-framerate".into(), Variant::F64(self.framerate));
            source.special_properties.insert(
                "video-color-space".into(),
                Variant::I64(i64::from(self.color_space)),
            );
            image.source_image = Some(source);
        }

        Ok(image)
    }

    fn frame(&mut self, image: &mut Image) -> Result<()> {
        self.phase.begin_frame()?;
        if image.pixels.len() != image.pixels_size()? {
            return Err(Error::InvalidImage("pixel buffer not allocated".into()));
        }

        let frame = Frame::GetFrame(&mut self.source, self.current_frame)
            .map_err(|e| Error::UnderlyingCodec(format!("FFMS2 frame: {e:?}")))?;

        let planes = frame.get_pixel_data();
        let data = planes
            .first()
            .and_then(|plane| plane.as_deref())
            .ok_or_else(|| Error::UnderlyingCodec("FFMS2 returned no pixel data".into()))?;

        let row_bytes = self.width as usize * 4;
        if data.len() < row_bytes * self.height as usize {
            return Err(Error::UnderlyingCodec(format!(
                "FFMS2 frame holds {} bytes, expected {}",
                data.len(),
                row_bytes * self.height as usize
            )));
        }
        for y in 0..self.height {
            image.row_mut(y)[..row_bytes]
                .copy_from_slice(&data[y as usize * row_bytes..(y as usize + 1) * row_bytes]);
        }

        self.current_frame += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.finish();
        Ok(())
    }
}
