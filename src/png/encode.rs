//! PNG encoding: IHDR and ancillary chunks, fixed-filter scan lines,
//! one zlib stream per image.

use super::chunks::write_chunk;
use super::*;
use crate::io::IoStream;
use crate::options::SaveOptions;
use crate::pixel::PixelFormat;
use crate::codec::{Phase, SaveSession};
use crate::image::{Compression, Image, ResolutionUnit};
use crate::meta::{MetaDataKey, Variant};
use crate::options::{tuning_str, SaveFlags};
use crate::pixel::bytes_per_line;
use crate::{Error, Result};

const COMPRESSION_MIN: i32 = 1;
const COMPRESSION_MAX: i32 = 9;
const COMPRESSION_DEFAULT: i32 = 6;

pub(crate) struct PngSaveSession<'io> {
    io: &'io mut dyn IoStream,
    flags: SaveFlags,
    compression_level: u8,
    filter: u8,
    frame_written: bool,
    finished: bool,
    phase: Phase,
}

impl<'io> PngSaveSession<'io> {
    pub(crate) fn open(io: &'io mut dyn IoStream, options: &SaveOptions) -> Result<Self> {
        match options.compression {
            Compression::Unknown | Compression::Deflate => {}
            other => return Err(Error::UnsupportedCompression(format!("{other:?}"))),
        }

        let compression_level = if (COMPRESSION_MIN..=COMPRESSION_MAX)
            .contains(&options.compression_level)
        {
            options.compression_level as u8
        } else {
            COMPRESSION_DEFAULT as u8
        };

        let filter = match tuning_str(&options.tuning, "png-filter") {
            None => 0,
            Some("none") => 0,
            Some("sub") => 1,
            Some("up") => 2,
            Some("average") => 3,
            Some("paeth") => 4,
            Some(other) => {
                log::warn!("PNG: unknown filter '{other}', using none");
                0
            }
        };
        if let Some(strategy) = tuning_str(&options.tuning, "png-compression-strategy") {
            // the deflate backend has no strategy switch
            log::debug!("PNG: compression strategy '{strategy}' ignored");
        }

        Ok(Self {
            io,
            flags: options.flags,
            compression_level,
            filter,
            frame_written: false,
            finished: false,
            phase: Phase::default(),
        })
    }

    fn write_meta_data(&mut self, image: &Image) -> Result<()> {
        for entry in &image.meta_data {
            match &entry.value {
                Variant::Str(text) => {
                    let keyword = match entry.key {
                        MetaDataKey::HexExif => "Raw profile type exif",
                        MetaDataKey::HexIptc => "Raw profile type iptc",
                        MetaDataKey::HexXmp => "Raw profile type xmp",
                        MetaDataKey::Xmp => "XML:com.adobe.xmp",
                        _ => entry.key_string(),
                    };
                    // zTXt: keyword, NUL, method 0, deflated text
                    let mut data = keyword.as_bytes().to_vec();
                    data.push(0);
                    data.push(0);
                    data.extend(miniz_oxide::deflate::compress_to_vec_zlib(
                        text.as_bytes(),
                        self.compression_level,
                    ));
                    write_chunk(self.io, b"zTXt", &data)?;
                }
                Variant::Data(blob) if entry.key == MetaDataKey::Exif => {
                    write_chunk(self.io, b"eXIf", blob)?;
                }
                _ => {
                    log::warn!(
                        "PNG: ignoring unsupported binary key '{}'",
                        entry.key_string()
                    );
                }
            }
        }
        Ok(())
    }
}

impl SaveSession for PngSaveSession<'_> {
    fn seek_next_frame(&mut self, image: &Image) -> Result<()> {
        self.phase.begin_seek()?;
        if self.frame_written {
            return Err(Error::NoMoreFrames);
        }
        self.frame_written = true;

        image.check_valid()?;
        let (color_type, bit_depth) = ihdr_color_type(image.pixel_format)
            .ok_or(Error::UnsupportedPixelFormat(image.pixel_format))?;

        self.io.strict_write(&PNG_SIGNATURE)?;

        let interlaced = self.flags.contains(SaveFlags::INTERLACED);
        let mut ihdr = [0u8; 13];
        ihdr[0..4].copy_from_slice(&image.width.to_be_bytes());
        ihdr[4..8].copy_from_slice(&image.height.to_be_bytes());
        ihdr[8] = bit_depth;
        ihdr[9] = color_type;
        ihdr[12] = u8::from(interlaced);
        write_chunk(self.io, b"IHDR", &ihdr)?;

        // iCCP must precede PLTE and IDAT
        if self.flags.contains(SaveFlags::ICCP) {
            if let Some(iccp) = &image.iccp {
                let mut data = b"ICC profile\0\0".to_vec();
                data.extend(miniz_oxide::deflate::compress_to_vec_zlib(
                    iccp,
                    self.compression_level,
                ));
                write_chunk(self.io, b"iCCP", &data)?;
                log::debug!("PNG: ICC profile has been set");
            }
        }

        if let Some(resolution) = &image.resolution {
            let mut data = [0u8; 9];
            data[0..4].copy_from_slice(&(resolution.x as u32).to_be_bytes());
            data[4..8].copy_from_slice(&(resolution.y as u32).to_be_bytes());
            // PNG knows meters only
            data[8] = u8::from(resolution.unit == ResolutionUnit::Meter);
            write_chunk(self.io, b"pHYs", &data)?;
        }

        if self.flags.contains(SaveFlags::META_DATA) && !image.meta_data.is_empty() {
            log::debug!("PNG: writing meta data");
            self.write_meta_data(image)?;
        }

        if image.pixel_format.is_indexed() {
            let palette = image.palette.as_ref().ok_or(Error::MissingPalette)?;
            if palette.pixel_format != PixelFormat::Rgb24 {
                log::error!("PNG: only bpp24-rgb palettes can be written");
                return Err(Error::UnsupportedPixelFormat(palette.pixel_format));
            }
            write_chunk(self.io, b"PLTE", &palette.data)?;
        }

        Ok(())
    }

    fn frame(&mut self, image: &Image) -> Result<()> {
        self.phase.begin_frame()?;

        let bits = image.pixel_format.bits_per_pixel();
        let wire_bpl = bytes_per_line(image.width, image.pixel_format) as usize;
        let filter_unit = ((bits + 7) / 8).max(1) as usize;
        let interlaced = self.flags.contains(SaveFlags::INTERLACED);

        // Rows in wire representation: RGB(A) channel order, big-endian
        // 16-bit samples.
        let mut wire = vec![0u8; wire_bpl * image.height as usize];
        for y in 0..image.height {
            to_wire_row(
                image.pixel_format,
                &image.row(y)[..wire_bpl],
                &mut wire[y as usize * wire_bpl..(y as usize + 1) * wire_bpl],
            );
        }

        let mut filtered = Vec::new();
        if !interlaced {
            filter_lines(&wire, wire_bpl, image.height as usize, self.filter, filter_unit,
                         &mut filtered);
        } else {
            for pass in 0..7 {
                let (pw, ph) = pass_size(pass, image.width, image.height);
                if pw == 0 || ph == 0 {
                    continue;
                }
                let pass_bpl = bytes_per_line(pw, image.pixel_format) as usize;
                let mut pass_rows = vec![0u8; pass_bpl * ph as usize];
                let (x0, y0, dx, dy) = ADAM7[pass];
                for py in 0..ph {
                    let src_y = (y0 + py * dy) as usize;
                    let src_row = &wire[src_y * wire_bpl..(src_y + 1) * wire_bpl];
                    let dst_row = &mut pass_rows[py as usize * pass_bpl..(py as usize + 1) * pass_bpl];
                    for px in 0..pw {
                        super::decode::copy_pixel(
                            src_row,
                            (x0 + px * dx) as usize,
                            dst_row,
                            px as usize,
                            bits,
                        );
                    }
                }
                filter_lines(&pass_rows, pass_bpl, ph as usize, self.filter, filter_unit,
                             &mut filtered);
            }
        }

        let compressed =
            miniz_oxide::deflate::compress_to_vec_zlib(&filtered, self.compression_level);
        write_chunk(self.io, b"IDAT", &compressed)
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.finish();
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.frame_written {
            write_chunk(self.io, b"IEND", &[])?;
        }
        self.io.flush()
    }
}

// ── Wire representation ─────────────────────────────────────────────

/// Reorder channels into RGB(A) order and make 16-bit samples
/// big-endian.
fn to_wire_row(format: PixelFormat, row: &[u8], out: &mut [u8]) {
    use PixelFormat::*;
    let (perm, sample_bytes): (&[usize], usize) = match format {
        Bgr24 => (&[2, 1, 0], 1),
        Bgr48 => (&[2, 1, 0], 2),
        Bgra32 => (&[2, 1, 0, 3], 1),
        Argb32 => (&[1, 2, 3, 0], 1),
        Abgr32 => (&[3, 2, 1, 0], 1),
        Bgra64 => (&[2, 1, 0, 3], 2),
        Argb64 => (&[1, 2, 3, 0], 2),
        Abgr64 => (&[3, 2, 1, 0], 2),
        Gray16 => (&[0], 2),
        GrayAlpha32 => (&[0, 1], 2),
        Rgb48 => (&[0, 1, 2], 2),
        Rgba64 => (&[0, 1, 2, 3], 2),
        // byte-identical on the wire
        _ => {
            out.copy_from_slice(row);
            return;
        }
    };

    let channels = perm.len();
    let px_bytes = channels * sample_bytes;
    for (src_px, dst_px) in row
        .chunks_exact(px_bytes)
        .zip(out.chunks_exact_mut(px_bytes))
    {
        for (dst_ch, src_ch) in perm.iter().enumerate() {
            if sample_bytes == 1 {
                dst_px[dst_ch] = src_px[*src_ch];
            } else {
                let v = u16::from_ne_bytes([src_px[src_ch * 2], src_px[src_ch * 2 + 1]]);
                dst_px[dst_ch * 2..dst_ch * 2 + 2].copy_from_slice(&v.to_be_bytes());
            }
        }
    }
}

/// Apply one fixed filter to every line, appending `filter byte + data`
/// per line.
fn filter_lines(
    rows: &[u8],
    row_bytes: usize,
    row_count: usize,
    filter: u8,
    bpp: usize,
    out: &mut Vec<u8>,
) {
    for y in 0..row_count {
        let raw = &rows[y * row_bytes..(y + 1) * row_bytes];
        let prior = if y > 0 {
            Some(&rows[(y - 1) * row_bytes..y * row_bytes])
        } else {
            None
        };

        out.push(filter);
        for i in 0..row_bytes {
            let left = if i >= bpp { raw[i - bpp] } else { 0 };
            let up = prior.map_or(0, |p| p[i]);
            let up_left = if i >= bpp {
                prior.map_or(0, |p| p[i - bpp])
            } else {
                0
            };
            let predictor = match filter {
                1 => left,
                2 => up,
                3 => (((u16::from(left)) + u16::from(up)) / 2) as u8,
                4 => paeth(left, up, up_left),
                _ => 0,
            };
            out.push(raw[i].wrapping_sub(predictor));
        }
    }
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let (a_, b_, c_) = (i32::from(a), i32::from(b), i32::from(c));
    let p = a_ + b_ - c_;
    let pa = (p - a_).abs();
    let pb = (p - b_).abs();
    let pc = (p - c_).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::png::decode::unfilter_lines;

    #[test]
    fn wire_row_swizzles_bgr() {
        let row = [10u8, 20, 30, 40, 50, 60];
        let mut out = [0u8; 6];
        to_wire_row(PixelFormat::Bgr24, &row, &mut out);
        assert_eq!(out, [30, 20, 10, 60, 50, 40]);
    }

    #[test]
    fn wire_row_moves_leading_alpha() {
        let row = [200u8, 1, 2, 3];
        let mut out = [0u8; 4];
        to_wire_row(PixelFormat::Argb32, &row, &mut out);
        assert_eq!(out, [1, 2, 3, 200]);
    }

    #[test]
    fn wire_row_is_big_endian_for_16_bit() {
        let v = 0x1234u16;
        let row = v.to_ne_bytes();
        let mut out = [0u8; 2];
        to_wire_row(PixelFormat::Gray16, &row, &mut out);
        assert_eq!(out, [0x12, 0x34]);
    }

    #[test]
    fn filters_invert_unfiltering() {
        let rows = [1u8, 5, 9, 2, 200, 3, 7, 255, 0, 128, 64, 32];
        for filter in 0..=4u8 {
            let mut filtered = Vec::new();
            filter_lines(&rows, 4, 3, filter, 2, &mut filtered);
            assert_eq!(filtered.len(), 3 * 5);

            unfilter_lines(&mut filtered, 4, 2, 3).unwrap();
            let recovered: Vec<u8> = filtered
                .chunks_exact(5)
                .flat_map(|line| line[1..].to_vec())
                .collect();
            assert_eq!(recovered, rows, "filter {filter}");
        }
    }
}
