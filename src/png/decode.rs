//! PNG/APNG decoding: chunk scan, zlib inflate, unfiltering, Adam7
//! de-interlacing, output transformation, and APNG frame composition.

use miniz_oxide::inflate::core::inflate_flags::{
    TINFL_FLAG_IGNORE_ADLER32, TINFL_FLAG_PARSE_ZLIB_HEADER,
    TINFL_FLAG_USING_NON_WRAPPING_OUTPUT_BUF,
};
use miniz_oxide::inflate::core::{decompress, DecompressorOxide};
use miniz_oxide::inflate::TINFLStatus;

use super::chunks::{self, Fctl};
use super::*;
use crate::codec::{LoadSession, Phase};
use crate::convert;
use crate::image::{Compression, Image, Palette, Resolution, ResolutionUnit, SourceImage};
use crate::io::IoStream;
use crate::meta::{MetaData, MetaDataKey, Variant};
use crate::options::{LoadFlags, LoadOptions};
use crate::pixel::{bytes_per_line, PixelFormat};
use crate::{Error, Result};

/// Map a text-chunk keyword onto the metadata key enumeration, keeping
/// the legacy hex-encoded profile keywords special.
pub(crate) fn meta_from_text_chunk(key: &str, text: String) -> MetaData {
    match key {
        "Raw profile type exif" => MetaData::known(MetaDataKey::HexExif, Variant::Str(text)),
        "Raw profile type iptc" => MetaData::known(MetaDataKey::HexIptc, Variant::Str(text)),
        "Raw profile type xmp" => MetaData::known(MetaDataKey::HexXmp, Variant::Str(text)),
        "XML:com.adobe.xmp" => MetaData::known(MetaDataKey::Xmp, Variant::Str(text)),
        other => MetaData::from_key_string(other, Variant::Str(text)),
    }
}

pub(crate) struct PngLoadSession<'io> {
    io: &'io mut dyn IoStream,
    flags: LoadFlags,

    width: u32,
    height: u32,
    bit_depth: u8,
    interlaced: bool,
    native_format: PixelFormat,
    output_format: PixelFormat,

    palette: Option<Palette>,
    trns: Option<Vec<u8>>,
    iccp: Option<Vec<u8>>,
    meta: Vec<MetaData>,
    resolution: Option<Resolution>,

    is_apng: bool,
    /// Frames this session will yield.
    frames: u32,
    current_frame: u32,
    /// Default image carries no fcTL and is skipped.
    hidden_first: bool,
    /// The default image (IDAT) still holds the next frame's data.
    idat_pending: bool,
    next_fctl: Option<Fctl>,
    first_idat: Option<Vec<u8>>,
    /// Full-canvas previous frame in output format (APNG only).
    prev: Vec<u8>,
    out_bpp: usize,

    phase: Phase,
}

impl<'io> PngLoadSession<'io> {
    pub(crate) fn open(io: &'io mut dyn IoStream, options: &LoadOptions) -> Result<Self> {
        if !supported_load_output(options.output_pixel_format) {
            return Err(Error::UnsupportedPixelFormat(options.output_pixel_format));
        }

        chunks::read_signature(io)?;
        let first = chunks::read_chunk(io)?;
        if !first.is(b"IHDR") {
            return Err(Error::InvalidImage("first chunk is not IHDR".into()));
        }
        let ihdr = chunks::parse_ihdr(&first.data)?;

        let native_format = native_pixel_format(ihdr.color_type, ihdr.bit_depth).ok_or_else(|| {
            Error::UnsupportedFormat(format!(
                "PNG color type {} at bit depth {}",
                ihdr.color_type, ihdr.bit_depth
            ))
        })?;
        if ihdr.width == 0 || ihdr.height == 0 {
            return Err(Error::IncorrectDimensions(format!(
                "{}x{}",
                ihdr.width, ihdr.height
            )));
        }
        options.limits.check(ihdr.width, ihdr.height)?;

        let mut session = Self {
            io,
            flags: options.flags,
            width: ihdr.width,
            height: ihdr.height,
            bit_depth: ihdr.bit_depth,
            interlaced: ihdr.interlace == 1,
            native_format,
            output_format: PixelFormat::Unknown,
            palette: None,
            trns: None,
            iccp: None,
            meta: Vec::new(),
            resolution: None,
            is_apng: false,
            frames: 1,
            current_frame: 0,
            hidden_first: false,
            idat_pending: true,
            next_fctl: None,
            first_idat: None,
            prev: Vec::new(),
            out_bpp: 0,
            phase: Phase::default(),
        };

        // Everything up to the first IDAT: palette, transparency,
        // resolution, ICC, text, and the APNG control chunks.
        let mut num_frames = 0u32;
        loop {
            let chunk = chunks::read_chunk(session.io)?;
            match &chunk.kind {
                b"IDAT" => {
                    session.first_idat = Some(chunk.data);
                    break;
                }
                b"IEND" => {
                    return Err(Error::InvalidImage("PNG stream has no image data".into()));
                }
                b"PLTE" => {
                    if chunk.data.len() % 3 != 0 || chunk.data.is_empty() {
                        return Err(Error::BrokenImage("PLTE length".into()));
                    }
                    session.palette = Some(Palette::from_data(
                        PixelFormat::Rgb24,
                        chunk.data.len() / 3,
                        chunk.data,
                    )?);
                }
                b"tRNS" => session.trns = Some(chunk.data),
                b"acTL" => {
                    if let Some((frames, _plays)) = chunks::parse_actl(&chunk.data) {
                        session.is_apng = true;
                        num_frames = frames;
                    }
                }
                b"fcTL" => session.next_fctl = chunks::parse_fctl(&chunk.data),
                _ => session.consume_ancillary(&chunk),
            }
        }

        session.resolve_output_format(options.output_pixel_format);

        let out_bits = session.output_format.bits_per_pixel();
        let out_bpl = bytes_per_line(session.width, session.output_format) as usize;
        options
            .limits
            .check_memory(out_bpl * session.height as usize)?;

        if session.is_apng {
            session.frames = num_frames;
            session.hidden_first = session.next_fctl.is_none();
            if session.frames == 0 {
                return Err(Error::NoMoreFrames);
            }
            if out_bits < 8 {
                // compositing needs whole-byte pixels
                return Err(Error::UnsupportedBitDepth(out_bits));
            }
            session.out_bpp = (out_bits / 8) as usize;
            session.prev = vec![0; out_bpl * session.height as usize];
        }

        log::debug!(
            "PNG: {}x{}, native {}, output {}, {} frame(s), interlaced: {}",
            session.width,
            session.height,
            session.native_format,
            session.output_format,
            session.frames,
            session.interlaced
        );

        Ok(session)
    }

    /// Resolve `Source` to the concrete output format.
    fn resolve_output_format(&mut self, requested: PixelFormat) {
        self.output_format = if requested == PixelFormat::Source {
            match self.native_format {
                // sub-byte grayscale expands to 8 bits
                PixelFormat::Gray1 | PixelFormat::Gray2 | PixelFormat::Gray4 => PixelFormat::Gray8,
                other => other,
            }
        } else {
            requested
        };
    }

    /// Metadata-bearing chunks encountered anywhere in the stream.
    fn consume_ancillary(&mut self, chunk: &chunks::RawChunk) {
        match &chunk.kind {
            b"pHYs" => {
                if let Some((x, y, unit)) = chunks::parse_phys(&chunk.data) {
                    if x != 0 || y != 0 {
                        self.resolution = Some(Resolution {
                            unit: if unit == 1 {
                                ResolutionUnit::Meter
                            } else {
                                ResolutionUnit::Unknown
                            },
                            x: f64::from(x),
                            y: f64::from(y),
                        });
                    }
                }
            }
            b"iCCP" => {
                if self.flags.contains(LoadFlags::ICCP) {
                    if let Some((name, profile)) = chunks::parse_iccp(&chunk.data) {
                        log::debug!("PNG: found ICC profile '{name}', {} bytes", profile.len());
                        self.iccp = Some(profile);
                    }
                }
            }
            b"tEXt" => {
                if self.flags.contains(LoadFlags::META_DATA) {
                    if let Some((key, text)) = chunks::parse_text(&chunk.data) {
                        self.meta.push(meta_from_text_chunk(&key, text));
                    }
                }
            }
            b"zTXt" => {
                if self.flags.contains(LoadFlags::META_DATA) {
                    if let Some((key, text)) = chunks::parse_ztxt(&chunk.data) {
                        self.meta.push(meta_from_text_chunk(&key, text));
                    }
                }
            }
            b"iTXt" => {
                if self.flags.contains(LoadFlags::META_DATA) {
                    if let Some((key, text)) = chunks::parse_itxt(&chunk.data) {
                        self.meta.push(meta_from_text_chunk(&key, text));
                    }
                }
            }
            b"eXIf" => {
                if self.flags.contains(LoadFlags::META_DATA) {
                    self.meta.push(MetaData::known(
                        MetaDataKey::Exif,
                        Variant::Data(chunk.data.clone()),
                    ));
                }
            }
            _ => log::trace!("PNG: skipping {} chunk", chunk.type_name()),
        }
    }

    /// Collect the zlib stream of the pending default image (IDAT run).
    fn collect_idat(&mut self) -> Result<Vec<u8>> {
        let mut compressed = self
            .first_idat
            .take()
            .ok_or_else(|| Error::InvalidImage("PNG stream has no image data".into()))?;
        while chunks::peek_chunk_type(self.io)? == *b"IDAT" {
            let chunk = chunks::read_chunk(self.io)?;
            compressed.extend_from_slice(&chunk.data);
        }
        self.idat_pending = false;
        Ok(compressed)
    }

    /// Collect one frame's fdAT run (stripping sequence numbers).
    fn collect_fdat(&mut self) -> Result<Vec<u8>> {
        let mut compressed = Vec::new();
        while chunks::peek_chunk_type(self.io)? == *b"fdAT" {
            let chunk = chunks::read_chunk(self.io)?;
            if chunk.data.len() < 4 {
                return Err(Error::BrokenImage("fdAT shorter than its sequence".into()));
            }
            compressed.extend_from_slice(&chunk.data[4..]);
        }
        if compressed.is_empty() {
            return Err(Error::BrokenImage("APNG frame without fdAT data".into()));
        }
        Ok(compressed)
    }

    /// Scan forward to the next fcTL, consuming metadata on the way.
    fn scan_to_fctl(&mut self) -> Result<Fctl> {
        loop {
            let kind = chunks::peek_chunk_type(self.io)?;
            if kind == *b"IEND" {
                return Err(Error::NoMoreFrames);
            }
            let chunk = chunks::read_chunk(self.io)?;
            if chunk.is(b"fcTL") {
                return chunks::parse_fctl(&chunk.data)
                    .ok_or_else(|| Error::BrokenImage("fcTL length".into()));
            }
            if chunk.is(b"IDAT") || chunk.is(b"fdAT") {
                // stale data from a frame we skipped
                continue;
            }
            self.consume_ancillary(&chunk);
        }
    }

    fn build_shell(&self, fctl: Option<&Fctl>) -> Result<Image> {
        let mut image = Image::shell(self.width, self.height, self.output_format)?;

        if self.output_format.is_indexed() {
            image.palette = Some(self.indexed_palette()?);
        }
        if self.current_frame == 0 {
            image.iccp = self.iccp.clone();
        }
        image.meta_data = self.meta.clone();
        image.resolution = self.resolution;

        if self.flags.contains(LoadFlags::SOURCE_IMAGE) {
            let mut source = SourceImage::new(self.native_format);
            source.compression = Compression::Deflate;
            source.interlaced = self.interlaced;
            source.interlaced_passes = if self.interlaced { 7 } else { 1 };
            image.source_image = Some(source);
        }

        if let Some(fctl) = fctl {
            let den = if fctl.delay_den == 0 {
                100
            } else {
                fctl.delay_den
            };
            image.delay = (f64::from(fctl.delay_num) / f64::from(den) * 1000.0) as i32;
        }

        Ok(image)
    }

    /// The palette attached to indexed output, with tRNS merged in.
    fn indexed_palette(&self) -> Result<Palette> {
        let palette = self.palette.as_ref().ok_or(Error::MissingPalette)?;
        match &self.trns {
            None => Ok(palette.clone()),
            Some(trns) => {
                let mut data = Vec::with_capacity(palette.color_count * 4);
                for (i, rgb) in palette.data.chunks_exact(3).enumerate() {
                    data.extend_from_slice(rgb);
                    data.push(trns.get(i).copied().unwrap_or(255));
                }
                Palette::from_data(PixelFormat::Rgba32, palette.color_count, data)
            }
        }
    }

    /// Inflate, unfilter, and de-interlace one image's data into native
    /// format rows (16-bit samples already in native byte order).
    fn decode_native(&self, compressed: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        let bits = self.native_format.bits_per_pixel();
        let filter_unit = ((bits + 7) / 8).max(1) as usize;
        let native_bpl = bytes_per_line(width, self.native_format) as usize;

        let mut out = vec![0u8; native_bpl * height as usize];

        if !self.interlaced {
            let expected = (native_bpl + 1) * height as usize;
            let mut filtered = vec![0u8; expected];
            inflate_exact(compressed, &mut filtered)?;
            unfilter_lines(&mut filtered, native_bpl, filter_unit, height as usize)?;
            for y in 0..height as usize {
                let line = &filtered[y * (native_bpl + 1) + 1..(y + 1) * (native_bpl + 1)];
                out[y * native_bpl..y * native_bpl + native_bpl].copy_from_slice(line);
            }
        } else {
            let mut expected = 0usize;
            for pass in 0..7 {
                let (pw, ph) = pass_size(pass, width, height);
                if pw == 0 || ph == 0 {
                    continue;
                }
                let pass_bpl = bytes_per_line(pw, self.native_format) as usize;
                expected += (pass_bpl + 1) * ph as usize;
            }
            let mut filtered = vec![0u8; expected];
            inflate_exact(compressed, &mut filtered)?;

            let mut offset = 0usize;
            for pass in 0..7 {
                let (pw, ph) = pass_size(pass, width, height);
                if pw == 0 || ph == 0 {
                    continue;
                }
                let pass_bpl = bytes_per_line(pw, self.native_format) as usize;
                let segment = &mut filtered[offset..offset + (pass_bpl + 1) * ph as usize];
                unfilter_lines(segment, pass_bpl, filter_unit, ph as usize)?;

                let (x0, y0, dx, dy) = ADAM7[pass];
                for py in 0..ph {
                    let line = &segment[py as usize * (pass_bpl + 1) + 1
                        ..(py as usize + 1) * (pass_bpl + 1)];
                    let target_y = (y0 + py * dy) as usize;
                    for px in 0..pw {
                        let target_x = (x0 + px * dx) as usize;
                        copy_pixel(
                            line,
                            px as usize,
                            &mut out[target_y * native_bpl..(target_y + 1) * native_bpl],
                            target_x,
                            bits,
                        );
                    }
                }
                offset += (pass_bpl + 1) * ph as usize;
            }
        }

        // PNG 16-bit samples are big-endian on the wire
        if self.bit_depth == 16 {
            for pair in out.chunks_exact_mut(2) {
                let v = u16::from_be_bytes([pair[0], pair[1]]);
                pair.copy_from_slice(&v.to_ne_bytes());
            }
        }

        Ok(out)
    }

    /// Native rows → requested output rows (unpadded stride).
    fn transform_to_output(&self, native: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>> {
        // Source output: sub-byte gray expands, everything else passes.
        if self.output_format == self.native_format {
            return Ok(native);
        }
        if self.output_format == PixelFormat::Gray8
            && matches!(
                self.native_format,
                PixelFormat::Gray1 | PixelFormat::Gray2 | PixelFormat::Gray4
            )
        {
            return Ok(expand_gray_to_8(
                &native,
                width,
                height,
                self.native_format.bits_per_pixel(),
            ));
        }

        let mut inter = Image::shell(width, height, self.native_format)?;
        inter.pixels = native;
        if self.native_format.is_indexed() {
            inter.palette = Some(self.indexed_palette()?);
        }

        // Color-key transparency for gray/RGB sources
        let mask = self.trns_mask(&inter);

        let mut out = convert::convert(&inter, self.output_format)?;
        if let (Some(mask), true) = (mask, self.output_format.has_alpha()) {
            let (.., ai) = alpha_layout(self.output_format);
            let bpp = (self.output_format.bits_per_pixel() / 8) as usize;
            for (i, transparent) in mask.iter().enumerate() {
                if *transparent {
                    out.pixels[i * bpp + ai] = 0;
                }
            }
        }
        Ok(out.pixels)
    }

    /// Which pixels a tRNS color key makes fully transparent.
    fn trns_mask(&self, image: &Image) -> Option<Vec<bool>> {
        let trns = self.trns.as_ref()?;
        let width = image.width as usize;
        let height = image.height as usize;

        match self.native_format {
            PixelFormat::Gray8 => {
                let key = *trns.get(1)?;
                Some(image.pixels.iter().map(|px| *px == key).collect())
            }
            PixelFormat::Gray16 => {
                let key = u16::from_be_bytes([*trns.first()?, *trns.get(1)?]);
                let mut mask = Vec::with_capacity(width * height);
                for pair in image.pixels.chunks_exact(2) {
                    mask.push(u16::from_ne_bytes([pair[0], pair[1]]) == key);
                }
                Some(mask)
            }
            PixelFormat::Rgb24 => {
                if trns.len() < 6 {
                    return None;
                }
                let key = [trns[1], trns[3], trns[5]];
                Some(
                    image
                        .pixels
                        .chunks_exact(3)
                        .map(|px| px == key)
                        .collect(),
                )
            }
            PixelFormat::Rgb48 => {
                if trns.len() < 6 {
                    return None;
                }
                let key = [
                    u16::from_be_bytes([trns[0], trns[1]]),
                    u16::from_be_bytes([trns[2], trns[3]]),
                    u16::from_be_bytes([trns[4], trns[5]]),
                ];
                let mut mask = Vec::with_capacity(width * height);
                for px in image.pixels.chunks_exact(6) {
                    let sample = [
                        u16::from_ne_bytes([px[0], px[1]]),
                        u16::from_ne_bytes([px[2], px[3]]),
                        u16::from_ne_bytes([px[4], px[5]]),
                    ];
                    mask.push(sample == key);
                }
                Some(mask)
            }
            _ => None,
        }
    }

    /// Compose a decoded sub-frame onto the canvas and into `image`.
    fn compose_apng_frame(&mut self, image: &mut Image, fctl: &Fctl, sub: &[u8]) -> Result<()> {
        let bpp = self.out_bpp;
        let out_bpl = bytes_per_line(self.width, self.output_format) as usize;
        let sub_bpl = fctl.width as usize * bpp;
        let x0 = fctl.x_offset as usize;
        let first_frame = self.current_frame == 1;

        for row in 0..self.height as usize {
            let canvas_row = &self.prev[row * out_bpl..(row + 1) * out_bpl];
            image.row_mut(row as u32)[..out_bpl].copy_from_slice(canvas_row);

            let in_rect = (row as u32) >= fctl.y_offset
                && (row as u32) < fctl.y_offset + fctl.height;
            if !in_rect {
                continue;
            }

            let sub_row =
                &sub[(row - fctl.y_offset as usize) * sub_bpl..][..sub_bpl];
            let out_row = &mut image.row_mut(row as u32)[x0 * bpp..x0 * bpp + sub_bpl];

            if first_frame || fctl.blend_op == BLEND_SOURCE {
                out_row.copy_from_slice(sub_row);
            } else {
                blend_over_row(out_row, sub_row, self.output_format, bpp);
            }

            let prev_rect = &mut self.prev[row * out_bpl + x0 * bpp..][..sub_bpl];
            match fctl.dispose_op {
                DISPOSE_BACKGROUND => prev_rect.fill(0),
                DISPOSE_NONE => {
                    prev_rect
                        .copy_from_slice(&image.row(row as u32)[x0 * bpp..x0 * bpp + sub_bpl]);
                }
                _ => {} // DISPOSE_PREVIOUS keeps the canvas untouched
            }
        }
        Ok(())
    }
}

impl LoadSession for PngLoadSession<'_> {
    fn seek_next_frame(&mut self) -> Result<Image> {
        self.phase.begin_seek()?;

        if self.current_frame >= self.frames {
            self.phase.finish();
            return Err(Error::NoMoreFrames);
        }

        if !self.is_apng {
            let image = self.build_shell(None)?;
            self.current_frame += 1;
            return Ok(image);
        }

        if self.current_frame == 0 && self.hidden_first {
            // Default image is not part of the animation; discard its
            // compressed data without decoding.
            log::debug!("PNG: skipping hidden frame");
            let _ = self.collect_idat()?;
        }

        let fctl = match self.next_fctl.take() {
            Some(fctl) => fctl,
            None => self.scan_to_fctl()?,
        };

        if fctl.width + fctl.x_offset > self.width || fctl.height + fctl.y_offset > self.height {
            return Err(Error::IncorrectDimensions(format!(
                "APNG frame {}x{}+{}+{} exceeds {}x{}",
                fctl.width, fctl.height, fctl.x_offset, fctl.y_offset, self.width, self.height
            )));
        }

        let image = self.build_shell(Some(&fctl))?;
        self.next_fctl = Some(fctl);
        self.current_frame += 1;
        Ok(image)
    }

    fn frame(&mut self, image: &mut Image) -> Result<()> {
        self.phase.begin_frame()?;

        if image.width != self.width
            || image.height != self.height
            || image.pixels.len() != image.pixels_size()?
        {
            return Err(Error::InvalidImage(
                "frame buffer does not match the announced shape".into(),
            ));
        }

        if !self.is_apng {
            let compressed = self.collect_idat()?;
            let native = self.decode_native(&compressed, self.width, self.height)?;
            let pixels = self.transform_to_output(native, self.width, self.height)?;
            let out_bpl = bytes_per_line(self.width, self.output_format) as usize;
            for y in 0..self.height {
                image.row_mut(y)[..out_bpl]
                    .copy_from_slice(&pixels[y as usize * out_bpl..(y as usize + 1) * out_bpl]);
            }
            return Ok(());
        }

        let fctl = self
            .next_fctl
            .take()
            .ok_or(Error::StateError)?;

        let compressed = if self.idat_pending {
            self.collect_idat()?
        } else {
            self.collect_fdat()?
        };
        let native = self.decode_native(&compressed, fctl.width, fctl.height)?;
        let sub = self.transform_to_output(native, fctl.width, fctl.height)?;
        self.compose_apng_frame(image, &fctl, &sub)
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.finish();
        Ok(())
    }
}

// ── Decompression ───────────────────────────────────────────────────

/// Inflate a complete zlib stream into a preallocated buffer of exactly
/// the expected size.
fn inflate_exact(compressed: &[u8], out: &mut [u8]) -> Result<()> {
    let mut state = DecompressorOxide::new();
    let flags = TINFL_FLAG_PARSE_ZLIB_HEADER
        | TINFL_FLAG_USING_NON_WRAPPING_OUTPUT_BUF
        | TINFL_FLAG_IGNORE_ADLER32;
    let (status, _read, written) = decompress(&mut state, compressed, out, 0, flags);
    match status {
        TINFLStatus::Done | TINFLStatus::Adler32Mismatch => {
            if written < out.len() {
                return Err(Error::BrokenImage(format!(
                    "image data inflated to {written} bytes, expected {}",
                    out.len()
                )));
            }
            Ok(())
        }
        TINFLStatus::HasMoreOutput => Err(Error::BrokenImage(
            "image data inflates past the expected size".into(),
        )),
        other => Err(Error::UnderlyingCodec(format!(
            "zlib inflate failed: {other:?}"
        ))),
    }
}

// ── Unfiltering ─────────────────────────────────────────────────────

fn paeth_predict(a: u8, b: u8, c: u8) -> u8 {
    let (a_, b_, c_) = (i32::from(a), i32::from(b), i32::from(c));
    let p = a_ + b_ - c_;
    let pa = (p - a_).abs();
    let pb = (p - b_).abs();
    let pc = (p - c_).abs();
    // Evaluation order is mandated by the PNG specification.
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Reverse the per-line filters in place. Each line is a filter byte
/// followed by `row_bytes` of data; `bpp` is the filter unit in bytes.
pub(crate) fn unfilter_lines(
    buf: &mut [u8],
    row_bytes: usize,
    bpp: usize,
    rows: usize,
) -> Result<()> {
    let stride = row_bytes + 1;
    for y in 0..rows {
        let (before, current) = buf.split_at_mut(y * stride);
        let prior = if y > 0 {
            Some(&before[(y - 1) * stride + 1..y * stride])
        } else {
            None
        };
        let filter = current[0];
        let line = &mut current[1..row_bytes + 1];

        match filter {
            0 => {}
            1 => {
                for i in bpp..row_bytes {
                    line[i] = line[i].wrapping_add(line[i - bpp]);
                }
            }
            2 => {
                if let Some(prior) = prior {
                    for i in 0..row_bytes {
                        line[i] = line[i].wrapping_add(prior[i]);
                    }
                }
            }
            3 => {
                for i in 0..row_bytes {
                    let left = if i >= bpp { line[i - bpp] } else { 0 };
                    let up = prior.map_or(0, |p| p[i]);
                    line[i] =
                        line[i].wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8);
                }
            }
            4 => {
                for i in 0..row_bytes {
                    let left = if i >= bpp { line[i - bpp] } else { 0 };
                    let up = prior.map_or(0, |p| p[i]);
                    let up_left = if i >= bpp {
                        prior.map_or(0, |p| p[i - bpp])
                    } else {
                        0
                    };
                    line[i] = line[i].wrapping_add(paeth_predict(left, up, up_left));
                }
            }
            other => {
                return Err(Error::BrokenImage(format!("scanline filter type {other}")));
            }
        }
    }
    Ok(())
}

// ── Pixel placement (de-interlacing) ────────────────────────────────

/// Copy pixel `sx` of a source row to pixel `dx` of a destination row.
pub(crate) fn copy_pixel(src: &[u8], sx: usize, dst: &mut [u8], dx: usize, bits: u32) {
    if bits >= 8 {
        let bytes = bits as usize / 8;
        dst[dx * bytes..(dx + 1) * bytes].copy_from_slice(&src[sx * bytes..(sx + 1) * bytes]);
    } else {
        let value = get_bits(src, sx, bits);
        put_bits(dst, dx, bits, value);
    }
}

fn get_bits(row: &[u8], x: usize, bits: u32) -> u8 {
    let per_byte = (8 / bits) as usize;
    let shift = 8 - bits as usize * (x % per_byte + 1);
    (row[x / per_byte] >> shift) & ((1 << bits) - 1) as u8
}

fn put_bits(row: &mut [u8], x: usize, bits: u32, value: u8) {
    let per_byte = (8 / bits) as usize;
    let shift = 8 - bits as usize * (x % per_byte + 1);
    let mask = ((1u16 << bits) - 1) as u8;
    row[x / per_byte] = (row[x / per_byte] & !(mask << shift)) | ((value & mask) << shift);
}

/// Expand packed 1/2/4-bit grayscale to full-range 8-bit samples.
fn expand_gray_to_8(native: &[u8], width: u32, height: u32, bits: u32) -> Vec<u8> {
    let src_bpl = ((width as usize * bits as usize) + 7) / 8;
    let max = (1u16 << bits) - 1;
    let mut out = vec![0u8; width as usize * height as usize];
    for y in 0..height as usize {
        let row = &native[y * src_bpl..(y + 1) * src_bpl];
        for x in 0..width as usize {
            let v = u16::from(get_bits(row, x, bits));
            out[y * width as usize + x] = (v * 255 / max) as u8;
        }
    }
    out
}

// ── APNG blending ───────────────────────────────────────────────────

/// Alpha channel byte offset within a pixel of `format`; pixels without
/// alpha report `usize::MAX`.
fn alpha_layout(format: PixelFormat) -> (usize, usize, usize, usize) {
    use PixelFormat::*;
    match format {
        Rgba32 => (0, 1, 2, 3),
        Bgra32 => (2, 1, 0, 3),
        Argb32 => (1, 2, 3, 0),
        Abgr32 => (3, 2, 1, 0),
        GrayAlpha16 => (0, 0, 0, 1),
        _ => (0, 1, 2, usize::MAX),
    }
}

/// `out = a_src*src + (1-a_src)*a_dst*dst` per channel, alpha
/// accumulated, at 8 or 16 bits per channel.
fn blend_over_row(dst: &mut [u8], src: &[u8], format: PixelFormat, bpp: usize) {
    let has_alpha = format.has_alpha();
    if !has_alpha {
        // without an alpha channel OVER degenerates to SOURCE
        dst.copy_from_slice(src);
        return;
    }

    let sixteen = matches!(
        format,
        PixelFormat::Rgba64 | PixelFormat::Bgra64 | PixelFormat::Argb64 | PixelFormat::Abgr64
            | PixelFormat::GrayAlpha32
    );

    if sixteen {
        let channels = bpp / 2;
        let alpha_ch = channels - 1; // native 16-bit formats keep alpha last
        for (dst_px, src_px) in dst.chunks_exact_mut(bpp).zip(src.chunks_exact(bpp)) {
            let read = |px: &[u8], c: usize| {
                u16::from_ne_bytes([px[c * 2], px[c * 2 + 1]])
            };
            let src_a = f64::from(read(src_px, alpha_ch)) / 65535.0;
            let dst_a = f64::from(read(dst_px, alpha_ch)) / 65535.0;
            for c in 0..channels {
                let value = if c == alpha_ch {
                    (src_a + (1.0 - src_a) * dst_a) * 65535.0
                } else {
                    src_a * f64::from(read(src_px, c))
                        + (1.0 - src_a) * dst_a * f64::from(read(dst_px, c))
                };
                dst_px[c * 2..c * 2 + 2].copy_from_slice(&(value as u16).to_ne_bytes());
            }
        }
    } else {
        let (.., ai) = alpha_layout(format);
        for (dst_px, src_px) in dst.chunks_exact_mut(bpp).zip(src.chunks_exact(bpp)) {
            let src_a = f64::from(src_px[ai]) / 255.0;
            let dst_a = f64::from(dst_px[ai]) / 255.0;
            for c in 0..bpp {
                dst_px[c] = if c == ai {
                    ((src_a + (1.0 - src_a) * dst_a) * 255.0) as u8
                } else {
                    (src_a * f64::from(src_px[c]) + (1.0 - src_a) * dst_a * f64::from(dst_px[c]))
                        as u8
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfilter_sub_and_up() {
        // 2 rows, 3 bytes each, bpp 1: sub then up
        let mut buf = vec![
            1, 10, 5, 5, // sub: 10, 15, 20
            2, 1, 1, 1, // up: 11, 16, 21
        ];
        unfilter_lines(&mut buf, 3, 1, 2).unwrap();
        assert_eq!(&buf[1..4], &[10, 15, 20]);
        assert_eq!(&buf[5..8], &[11, 16, 21]);
    }

    #[test]
    fn unfilter_average_and_paeth() {
        let mut buf = vec![
            3, 10, 10, // avg: 10, 10+10/2=15
            4, 1, 2, // paeth over (left, up, upleft)
        ];
        unfilter_lines(&mut buf, 2, 1, 2).unwrap();
        assert_eq!(&buf[1..3], &[10, 15]);
        // row 2: first byte: paeth(0,10,0)=10 -> 11; second: paeth(11,15,10)
        // p=16, pa=5, pb=1, pc=6 -> b=15 -> 17
        assert_eq!(&buf[4..6], &[11, 17]);
    }

    #[test]
    fn rejects_unknown_filters() {
        let mut buf = vec![9, 0, 0];
        match unfilter_lines(&mut buf, 2, 1, 1) {
            Err(Error::BrokenImage(_)) => {}
            other => panic!("expected BrokenImage, got {other:?}"),
        }
    }

    #[test]
    fn bit_level_pixel_copies() {
        let src = [0b1011_0001u8];
        let mut dst = [0u8; 1];
        copy_pixel(&src, 0, &mut dst, 3, 2); // value 0b10 -> position 3
        assert_eq!(dst[0], 0b0000_0010);

        let mut wide = [0u8; 2];
        put_bits(&mut wide, 9, 1, 1);
        assert_eq!(wide, [0, 0b0100_0000]);
        assert_eq!(get_bits(&wide, 9, 1), 1);
    }

    #[test]
    fn gray_expansion_scales_to_full_range() {
        // 4 pixels at 2 bits: 0, 1, 2, 3
        let native = [0b00_01_10_11u8];
        let out = expand_gray_to_8(&native, 4, 1, 2);
        assert_eq!(out, vec![0, 85, 170, 255]);
    }

    #[test]
    fn blend_over_full_and_zero_alpha() {
        let mut dst = vec![10, 20, 30, 255];
        let src = vec![100, 110, 120, 255];
        blend_over_row(&mut dst, &src, PixelFormat::Rgba32, 4);
        assert_eq!(dst, vec![100, 110, 120, 255]);

        let mut dst = vec![10, 20, 30, 255];
        let src = vec![100, 110, 120, 0];
        blend_over_row(&mut dst, &src, PixelFormat::Rgba32, 4);
        assert_eq!(dst, vec![10, 20, 30, 255]);
    }
}
