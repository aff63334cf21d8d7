//! X PixMap (XPM3): a C-source text format of quoted strings.
//!
//! The parser works off the quoted-string skeleton of the file (values
//! line, color table, pixel rows) and ignores the surrounding C. Images
//! with transparent colors decode to RGBA, everything else to RGB.

use crate::codec::{Codec, CodecFeatures, CodecInfo, LoadFeatures, LoadSession, Phase,
                   SaveFeatures, SaveSession};
use crate::image::{Compression, Image, Palette, SourceImage};
use crate::io::IoStream;
use crate::meta::Variant;
use crate::options::{tuning_str, LoadFlags, LoadOptions, SaveOptions};
use crate::pixel::PixelFormat;
use crate::{Error, Result};

use std::collections::HashMap;

/// Standard XPM3 symbol alphabet.
const XPM_CHARS: &[u8] =
    b" .XoO+@#$%&*=-;:>,<1234567890qwertyuipasdfghjklzxcvbnmMNBVCZASDFGHJKLPIUYTREWQ!~^/()_`'[]{}|";

static XPM_INFO: CodecInfo = CodecInfo {
    name: "xpm",
    version: "3.0.0",
    description: "X PixMap",
    extensions: &["xpm"],
    mime_types: &["image/x-xpixmap"],
    magic_numbers: &["2f 2a 20 58 50 4d 20 2a 2f"], // "/* XPM */"
    load_features: LoadFeatures {
        pixel_formats: &[PixelFormat::Rgb24, PixelFormat::Rgba32],
        features: CodecFeatures::STATIC,
        tuning_keys: &[],
    },
    save_features: SaveFeatures {
        pixel_formats: &[
            PixelFormat::Indexed1,
            PixelFormat::Indexed2,
            PixelFormat::Indexed4,
            PixelFormat::Indexed8,
        ],
        compressions: &[Compression::None],
        features: CodecFeatures::STATIC,
        tuning_keys: &["xpm-name"],
    },
};

/// The XPM codec.
pub struct XpmCodec;

impl Codec for XpmCodec {
    fn info(&self) -> &'static CodecInfo {
        &XPM_INFO
    }

    fn load_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &LoadOptions,
    ) -> Result<Box<dyn LoadSession + 'io>> {
        Ok(Box::new(XpmLoadSession::open(io, options)?))
    }

    fn save_init<'io>(
        &self,
        io: &'io mut dyn IoStream,
        options: &SaveOptions,
    ) -> Result<Box<dyn SaveSession + 'io>> {
        Ok(Box::new(XpmSaveSession::open(io, options)?))
    }
}

// ── Color parsing ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct XpmColor {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

/// `#RGB`, `#RRGGBB`, `#RRRRGGGGBBBB`, or one of the basic named colors.
fn parse_color_value(value: &str) -> Result<XpmColor> {
    if let Some(hex) = value.strip_prefix('#') {
        let digits = u64::from_str_radix(hex, 16)
            .map_err(|_| Error::BrokenImage(format!("XPM color '{value}'")))?;
        let (r, g, b) = match hex.len() {
            3 => (
                (((digits >> 8) & 0xF) * 17) as u8,
                (((digits >> 4) & 0xF) * 17) as u8,
                ((digits & 0xF) * 17) as u8,
            ),
            6 => (
                ((digits >> 16) & 0xFF) as u8,
                ((digits >> 8) & 0xFF) as u8,
                (digits & 0xFF) as u8,
            ),
            // 16 bits per component, high bytes win
            12 => (
                ((digits >> 40) & 0xFF) as u8,
                ((digits >> 24) & 0xFF) as u8,
                ((digits >> 8) & 0xFF) as u8,
            ),
            _ => {
                log::error!("XPM: unsupported color format '{value}'");
                return Err(Error::BrokenImage(format!("XPM color '{value}'")));
            }
        };
        return Ok(XpmColor { r, g, b, a: 255 });
    }

    let (r, g, b) = match value.to_ascii_lowercase().as_str() {
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "red" => (255, 0, 0),
        "green" => (0, 255, 0),
        "blue" => (0, 0, 255),
        "yellow" => (255, 255, 0),
        "cyan" => (0, 255, 255),
        "magenta" => (255, 0, 255),
        "gray" | "grey" => (190, 190, 190),
        "darkgray" | "darkgrey" => (169, 169, 169),
        "lightgray" | "lightgrey" => (211, 211, 211),
        other => {
            log::warn!("XPM: unknown color name '{other}', using black");
            (0, 0, 0)
        }
    };
    Ok(XpmColor { r, g, b, a: 255 })
}

// ── Loading ─────────────────────────────────────────────────────────

struct XpmLoadSession {
    width: u32,
    height: u32,
    hotspot: Option<(i64, i64)>,
    has_transparency: bool,
    fetch_source_image: bool,
    /// Per-pixel colors, already resolved through the color table.
    pixels: Vec<XpmColor>,
    done: bool,
    phase: Phase,
}

impl XpmLoadSession {
    fn open(io: &mut dyn IoStream, options: &LoadOptions) -> Result<Self> {
        let text = read_all_text(io)?;
        if !text.starts_with("/* XPM */") {
            return Err(Error::InvalidImage("missing XPM header comment".into()));
        }

        let strings = quoted_strings(&text);
        let values = strings
            .first()
            .ok_or_else(|| Error::BrokenImage("XPM has no values line".into()))?;

        let numbers: Vec<i64> = values
            .split_ascii_whitespace()
            .map_while(|token| token.parse::<i64>().ok())
            .collect();
        if numbers.len() < 4 {
            return Err(Error::BrokenImage(format!("XPM values line '{values}'")));
        }
        let (width, height, ncolors, cpp) = (numbers[0], numbers[1], numbers[2], numbers[3]);
        if width <= 0 || height <= 0 || ncolors <= 0 || cpp <= 0 || cpp > 4 {
            return Err(Error::BrokenImage(format!("XPM values line '{values}'")));
        }
        let (width, height) = (width as u32, height as u32);
        let (ncolors, cpp) = (ncolors as usize, cpp as usize);
        options.limits.check(width, height)?;
        options
            .limits
            .check_memory(width as usize * height as usize * 4)?;

        let hotspot = if numbers.len() >= 6 {
            Some((numbers[4], numbers[5]))
        } else {
            None
        };

        if strings.len() < 1 + ncolors + height as usize {
            return Err(Error::BrokenImage(format!(
                "XPM has {} strings, expected {}",
                strings.len(),
                1 + ncolors + height as usize
            )));
        }

        // Color table: symbol of `cpp` chars, then key/value entries;
        // only the color key ("c") is honored.
        let mut table: HashMap<&str, XpmColor> = HashMap::with_capacity(ncolors);
        let mut has_transparency = false;
        for line in &strings[1..1 + ncolors] {
            // symbols are byte-indexed, which only works for ASCII
            if line.len() < cpp || !line.is_ascii() {
                return Err(Error::BrokenImage(format!("XPM color line '{line}'")));
            }
            let (symbol, rest) = line.split_at(cpp);
            let tokens: Vec<&str> = rest.split_ascii_whitespace().collect();
            let c_value = tokens
                .iter()
                .position(|t| *t == "c")
                .and_then(|i| tokens.get(i + 1))
                .ok_or_else(|| Error::BrokenImage(format!("XPM color line '{line}'")))?;

            let color = if c_value.eq_ignore_ascii_case("none") {
                has_transparency = true;
                XpmColor {
                    r: 0,
                    g: 0,
                    b: 0,
                    a: 0,
                }
            } else {
                parse_color_value(c_value)?
            };
            table.insert(symbol, color);
        }

        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for row in &strings[1 + ncolors..1 + ncolors + height as usize] {
            if row.len() < width as usize * cpp || !row.is_ascii() {
                return Err(Error::BrokenImage(format!(
                    "XPM pixel row is {} chars, expected {}",
                    row.len(),
                    width as usize * cpp
                )));
            }
            for x in 0..width as usize {
                let symbol = &row[x * cpp..(x + 1) * cpp];
                let color = table.get(symbol).copied().ok_or_else(|| {
                    Error::BrokenImage(format!("XPM pixel symbol '{symbol}' is not in the table"))
                })?;
                pixels.push(color);
            }
        }

        Ok(Self {
            width,
            height,
            hotspot,
            has_transparency,
            fetch_source_image: options.flags.contains(LoadFlags::SOURCE_IMAGE),
            pixels,
            done: false,
            phase: Phase::default(),
        })
    }
}

impl LoadSession for XpmLoadSession {
    fn seek_next_frame(&mut self) -> Result<Image> {
        self.phase.begin_seek()?;
        if self.done {
            self.phase.finish();
            return Err(Error::NoMoreFrames);
        }

        let format = if self.has_transparency {
            PixelFormat::Rgba32
        } else {
            PixelFormat::Rgb24
        };
        let mut image = Image::shell(self.width, self.height, format)?;

        if self.fetch_source_image {
            let mut source = SourceImage::new(format);
            source.compression = Compression::None;
            if let Some((x, y)) = self.hotspot {
                source
                    .special_properties
                    .insert("xpm-hotspot-x".into(), Variant::I64(x));
                source
                    .special_properties
                    .insert("xpm-hotspot-y".into(), Variant::I64(y));
            }
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

        let rgba = image.pixel_format == PixelFormat::Rgba32;
        let width = self.width as usize;
        for y in 0..self.height as usize {
            let row = image.row_mut(y as u32);
            for x in 0..width {
                let color = self.pixels[y * width + x];
                if rgba {
                    row[x * 4..x * 4 + 4].copy_from_slice(&[color.r, color.g, color.b, color.a]);
                } else {
                    row[x * 3..x * 3 + 3].copy_from_slice(&[color.r, color.g, color.b]);
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

fn read_all_text(io: &mut dyn IoStream) -> Result<String> {
    let mut bytes = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = io.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..n]);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// All `"..."` literals, in file order.
fn quoted_strings(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find('"') {
        let body = &rest[start + 1..];
        match body.find('"') {
            Some(end) => {
                out.push(&body[..end]);
                rest = &body[end + 1..];
            }
            None => break,
        }
    }
    out
}

// ── Saving ──────────────────────────────────────────────────────────

struct XpmSaveSession<'io> {
    io: &'io mut dyn IoStream,
    name: String,
    frame_written: bool,
    phase: Phase,
}

impl<'io> XpmSaveSession<'io> {
    fn open(io: &'io mut dyn IoStream, options: &SaveOptions) -> Result<Self> {
        match options.compression {
            Compression::Unknown | Compression::None => {}
            other => return Err(Error::UnsupportedCompression(format!("{other:?}"))),
        }

        let name = tuning_str(&options.tuning, "xpm-name")
            .map(sanitize_identifier)
            .unwrap_or_else(|| "image".to_string());

        Ok(Self {
            io,
            name,
            frame_written: false,
            phase: Phase::default(),
        })
    }
}

/// Make a string usable as a C identifier.
fn sanitize_identifier(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.is_empty() || out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

impl SaveSession for XpmSaveSession<'_> {
    fn seek_next_frame(&mut self, image: &Image) -> Result<()> {
        self.phase.begin_seek()?;
        if self.frame_written {
            return Err(Error::NoMoreFrames);
        }
        self.frame_written = true;

        image.check_valid()?;
        if !image.pixel_format.is_indexed() {
            return Err(Error::UnsupportedPixelFormat(image.pixel_format));
        }
        let palette = image.palette.as_ref().ok_or(Error::MissingPalette)?;
        let cpp = if palette.color_count <= XPM_CHARS.len() {
            1
        } else if palette.color_count <= XPM_CHARS.len() * XPM_CHARS.len() {
            2
        } else {
            return Err(Error::UnsupportedImageProperty(format!(
                "XPM palette with {} colors",
                palette.color_count
            )));
        };

        let hotspot = image.source_image.as_ref().and_then(|source| {
            let x = source.special_properties.get("xpm-hotspot-x")?.as_i64()?;
            let y = source.special_properties.get("xpm-hotspot-y")?.as_i64()?;
            Some((x, y))
        });

        let mut header = format!(
            "/* XPM */\nstatic char * {}[] = {{\n",
            self.name
        );
        match hotspot {
            Some((x, y)) => header.push_str(&format!(
                "\"{} {} {} {} {} {}\",\n",
                image.width, image.height, palette.color_count, cpp, x, y
            )),
            None => header.push_str(&format!(
                "\"{} {} {} {}\",\n",
                image.width, image.height, palette.color_count, cpp
            )),
        }
        self.io.strict_write(header.as_bytes())?;

        let entry_bytes = Palette::entry_bytes(palette.pixel_format)?;
        for (i, entry) in palette.data.chunks_exact(entry_bytes).enumerate() {
            let symbol = color_symbol(i, cpp);
            let (r, g, b) = match palette.pixel_format {
                PixelFormat::Rgb24 => (entry[0], entry[1], entry[2]),
                PixelFormat::Bgr24 => (entry[2], entry[1], entry[0]),
                PixelFormat::Rgba32 => {
                    if entry[3] == 0 {
                        let line = format!("\"{symbol} c None\",\n");
                        self.io.strict_write(line.as_bytes())?;
                        continue;
                    }
                    (entry[0], entry[1], entry[2])
                }
                other => return Err(Error::UnsupportedPixelFormat(other)),
            };
            let line = format!("\"{symbol} c #{r:02X}{g:02X}{b:02X}\",\n");
            self.io.strict_write(line.as_bytes())?;
        }

        Ok(())
    }

    fn frame(&mut self, image: &Image) -> Result<()> {
        self.phase.begin_frame()?;

        let palette = image.palette.as_ref().ok_or(Error::MissingPalette)?;
        let cpp = if palette.color_count <= XPM_CHARS.len() {
            1
        } else {
            2
        };
        let bits = image.pixel_format.bits_per_pixel();

        for y in 0..image.height {
            let row = image.row(y);
            let mut line = String::with_capacity(image.width as usize * cpp + 4);
            line.push('"');
            for x in 0..image.width as usize {
                let index = usize::from(index_at(row, x, bits));
                if index >= palette.color_count {
                    return Err(Error::BrokenImage(format!(
                        "palette index {index} is out of range [0; {})",
                        palette.color_count
                    )));
                }
                line.push_str(&color_symbol(index, cpp));
            }
            line.push('"');
            if y + 1 < image.height {
                line.push(',');
            }
            line.push('\n');
            self.io.strict_write(line.as_bytes())?;
        }

        self.io.strict_write(b"};\n")
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.finish();
        self.io.flush()
    }
}

/// Symbol for a palette index, 1 or 2 characters from the XPM alphabet.
fn color_symbol(index: usize, cpp: usize) -> String {
    let n = XPM_CHARS.len();
    if cpp == 1 {
        (XPM_CHARS[index % n] as char).to_string()
    } else {
        let mut s = String::with_capacity(2);
        s.push(XPM_CHARS[index / n] as char);
        s.push(XPM_CHARS[index % n] as char);
        s
    }
}

/// Palette index of pixel `x` in a packed indexed row.
fn index_at(row: &[u8], x: usize, bits: u32) -> u8 {
    if bits == 8 {
        row[x]
    } else {
        let per_byte = (8 / bits) as usize;
        let shift = 8 - bits as usize * (x % per_byte + 1);
        (row[x / per_byte] >> shift) & ((1u16 << bits) - 1) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SliceStream;

    const XPM: &str = r#"/* XPM */
static char * test[] = {
"3 2 3 1 1 0",
"  c None",
". c #FF0000",
"X c blue",
" .X",
"X. ",
};
"#;

    #[test]
    fn parses_colors_and_pixels() {
        let mut io = SliceStream::new(XPM.as_bytes());
        let mut session = XpmLoadSession::open(&mut io, &LoadOptions::default()).unwrap();

        let mut image = session.seek_next_frame().unwrap();
        assert_eq!((image.width, image.height), (3, 2));
        assert_eq!(image.pixel_format, PixelFormat::Rgba32);
        let source = image.source_image.clone().unwrap();
        assert_eq!(
            source.special_properties.get("xpm-hotspot-x"),
            Some(&Variant::I64(1))
        );

        image.alloc_pixels().unwrap();
        session.frame(&mut image).unwrap();
        // row 0: transparent, red, blue
        assert_eq!(image.row(0), &[0, 0, 0, 0, 255, 0, 0, 255, 0, 0, 255, 255]);
        assert_eq!(image.row(1), &[0, 0, 255, 255, 255, 0, 0, 255, 0, 0, 0, 0]);

        match session.seek_next_frame() {
            Err(Error::NoMoreFrames) => {}
            other => panic!("expected NoMoreFrames, got {other:?}"),
        }
    }

    #[test]
    fn color_value_forms() {
        assert_eq!(
            parse_color_value("#FF8000").unwrap(),
            XpmColor {
                r: 255,
                g: 128,
                b: 0,
                a: 255
            }
        );
        assert_eq!(
            parse_color_value("#F00").unwrap(),
            XpmColor {
                r: 255,
                g: 0,
                b: 0,
                a: 255
            }
        );
        assert_eq!(parse_color_value("white").unwrap().r, 255);
        assert!(parse_color_value("#12345").is_err());
    }

    #[test]
    fn opaque_images_decode_to_rgb() {
        let text = "/* XPM */\n\"1 1 1 1\",\n\". c #010203\",\n\".\"\n";
        let mut io = SliceStream::new(text.as_bytes());
        let mut session = XpmLoadSession::open(&mut io, &LoadOptions::default()).unwrap();
        let mut image = session.seek_next_frame().unwrap();
        assert_eq!(image.pixel_format, PixelFormat::Rgb24);
        image.alloc_pixels().unwrap();
        session.frame(&mut image).unwrap();
        assert_eq!(image.pixels, vec![1, 2, 3]);
    }
}
