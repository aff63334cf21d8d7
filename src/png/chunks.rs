//! Chunk-level PNG I/O: length/type/CRC framing and the payload parsers
//! for the ancillary chunks the engine consumes.

use crate::io::IoStream;
use crate::{Error, Result};

// ── CRC-32 ──────────────────────────────────────────────────────────

const CRC_TABLE: [u32; 256] = make_crc_table();

const fn make_crc_table() -> [u32; 256] {
    let mut out = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            if c & 1 != 0 {
                c = 0xEDB8_8320 ^ (c >> 1);
            } else {
                c >>= 1;
            }
            k += 1;
        }
        out[n] = c;
        n += 1;
    }
    out
}

pub(crate) fn png_crc(parts: &[&[u8]]) -> u32 {
    let mut crc = u32::MAX;
    for part in parts {
        for byte in *part {
            let i = ((crc ^ u32::from(*byte)) & 0xFF) as usize;
            crc = CRC_TABLE[i] ^ (crc >> 8);
        }
    }
    crc ^ u32::MAX
}

// ── Chunk framing ───────────────────────────────────────────────────

/// One raw chunk: 4-byte type plus payload, CRC already verified.
#[derive(Debug)]
pub(crate) struct RawChunk {
    pub kind: [u8; 4],
    pub data: Vec<u8>,
}

impl RawChunk {
    pub(crate) fn is(&self, kind: &[u8; 4]) -> bool {
        &self.kind == kind
    }

    fn is_critical(&self) -> bool {
        self.kind[0].is_ascii_uppercase()
    }
}

/// Sanity cap for single-chunk payloads (the format allows 2^31-1).
const MAX_CHUNK_LEN: u32 = 1 << 28;

pub(crate) fn read_signature(io: &mut dyn IoStream) -> Result<()> {
    let mut sig = [0u8; 8];
    io.strict_read(&mut sig)?;
    if sig != super::PNG_SIGNATURE {
        return Err(Error::InvalidImage("not a PNG stream".into()));
    }
    Ok(())
}

/// Read the next chunk in full and verify its CRC. CRC mismatches are
/// fatal for critical chunks and logged for ancillary ones.
pub(crate) fn read_chunk(io: &mut dyn IoStream) -> Result<RawChunk> {
    let length = io.read_u32_be()?;
    if length > MAX_CHUNK_LEN {
        return Err(Error::BrokenImage(format!("chunk length {length}")));
    }

    let mut kind = [0u8; 4];
    io.strict_read(&mut kind)?;

    let mut data = vec![0u8; length as usize];
    io.strict_read(&mut data)?;

    let crc_claim = io.read_u32_be()?;
    let chunk = RawChunk { kind, data };
    let crc_actual = png_crc(&[&chunk.kind, &chunk.data]);
    if crc_claim != crc_actual {
        if chunk.is_critical() {
            return Err(Error::BrokenImage(format!(
                "CRC mismatch in {} chunk",
                chunk.type_name()
            )));
        }
        log::warn!("PNG: CRC mismatch in ancillary {} chunk", chunk.type_name());
    }
    Ok(chunk)
}

/// Peek the type of the next chunk without consuming it.
pub(crate) fn peek_chunk_type(io: &mut dyn IoStream) -> Result<[u8; 4]> {
    let pos = io.tell()?;
    let _length = io.read_u32_be()?;
    let mut kind = [0u8; 4];
    io.strict_read(&mut kind)?;
    io.seek(std::io::SeekFrom::Start(pos))?;
    Ok(kind)
}

pub(crate) fn write_chunk(io: &mut dyn IoStream, kind: &[u8; 4], data: &[u8]) -> Result<()> {
    io.write_u32_be(data.len() as u32)?;
    io.strict_write(kind)?;
    io.strict_write(data)?;
    io.write_u32_be(png_crc(&[kind, data]))
}

impl RawChunk {
    pub(crate) fn type_name(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }
}

// ── Payload parsers ─────────────────────────────────────────────────

pub(crate) struct Ihdr {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub interlace: u8,
}

pub(crate) fn parse_ihdr(data: &[u8]) -> Result<Ihdr> {
    if data.len() != 13 {
        return Err(Error::BrokenImage("IHDR length".into()));
    }
    let ihdr = Ihdr {
        width: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
        height: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        bit_depth: data[8],
        color_type: data[9],
        interlace: data[12],
    };
    if data[10] != 0 {
        return Err(Error::UnsupportedCompression(format!(
            "PNG compression method {}",
            data[10]
        )));
    }
    if data[11] != 0 {
        return Err(Error::UnsupportedFormat(format!(
            "PNG filter method {}",
            data[11]
        )));
    }
    if ihdr.interlace > 1 {
        return Err(Error::UnsupportedFormat(format!(
            "PNG interlace method {}",
            ihdr.interlace
        )));
    }
    Ok(ihdr)
}

/// `tEXt`: keyword, NUL, text (latin-1).
pub(crate) fn parse_text(data: &[u8]) -> Option<(String, String)> {
    let nul = data.iter().position(|b| *b == 0)?;
    Some((
        latin1_to_string(&data[..nul]),
        latin1_to_string(&data[nul + 1..]),
    ))
}

/// `zTXt`: keyword, NUL, compression method, deflated text.
pub(crate) fn parse_ztxt(data: &[u8]) -> Option<(String, String)> {
    let nul = data.iter().position(|b| *b == 0)?;
    let method = *data.get(nul + 1)?;
    if method != 0 {
        return None;
    }
    let inflated =
        miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(&data[nul + 2..], 1 << 24).ok()?;
    Some((latin1_to_string(&data[..nul]), latin1_to_string(&inflated)))
}

/// `iTXt`: keyword, NUL, compression flag, method, language tag, NUL,
/// translated keyword, NUL, UTF-8 text.
pub(crate) fn parse_itxt(data: &[u8]) -> Option<(String, String)> {
    let nul = data.iter().position(|b| *b == 0)?;
    let keyword = latin1_to_string(&data[..nul]);
    let rest = &data[nul + 1..];
    let compressed = *rest.first()? != 0;
    let rest = rest.get(2..)?;
    let lang_end = rest.iter().position(|b| *b == 0)?;
    let rest = &rest[lang_end + 1..];
    let trans_end = rest.iter().position(|b| *b == 0)?;
    let payload = &rest[trans_end + 1..];

    let text = if compressed {
        let inflated =
            miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(payload, 1 << 24).ok()?;
        String::from_utf8_lossy(&inflated).into_owned()
    } else {
        String::from_utf8_lossy(payload).into_owned()
    };
    Some((keyword, text))
}

/// `iCCP`: profile name, NUL, compression method, deflated profile.
pub(crate) fn parse_iccp(data: &[u8]) -> Option<(String, Vec<u8>)> {
    let nul = data.iter().position(|b| *b == 0)?;
    if *data.get(nul + 1)? != 0 {
        return None;
    }
    let profile =
        miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(&data[nul + 2..], 1 << 26).ok()?;
    Some((latin1_to_string(&data[..nul]), profile))
}

/// `pHYs`: x, y pixels per unit, unit specifier (1 = meter).
pub(crate) fn parse_phys(data: &[u8]) -> Option<(u32, u32, u8)> {
    if data.len() != 9 {
        return None;
    }
    Some((
        u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
        u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        data[8],
    ))
}

/// `acTL`: animation frame count and play count.
pub(crate) fn parse_actl(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() != 8 {
        return None;
    }
    Some((
        u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
        u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
    ))
}

/// `fcTL` payload.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Fctl {
    pub width: u32,
    pub height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub delay_num: u16,
    pub delay_den: u16,
    pub dispose_op: u8,
    pub blend_op: u8,
}

pub(crate) fn parse_fctl(data: &[u8]) -> Option<Fctl> {
    if data.len() != 26 {
        return None;
    }
    let be32 = |o: usize| u32::from_be_bytes([data[o], data[o + 1], data[o + 2], data[o + 3]]);
    Some(Fctl {
        width: be32(4),
        height: be32(8),
        x_offset: be32(12),
        y_offset: be32(16),
        delay_num: u16::from_be_bytes([data[20], data[21]]),
        delay_den: u16::from_be_bytes([data[22], data[23]]),
        dispose_op: data[24],
        blend_op: data[25],
    })
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| *b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemoryStream, SliceStream};

    #[test]
    fn crc_matches_the_png_reference_value() {
        // CRC of "IEND" with empty data, a well-known constant
        assert_eq!(png_crc(&[b"IEND", &[]]), 0xAE42_6082);
    }

    #[test]
    fn chunk_roundtrip() {
        let mut io = MemoryStream::new();
        write_chunk(&mut io, b"teSt", &[1, 2, 3]).unwrap();
        let bytes = io.into_inner();

        let mut reader = SliceStream::new(&bytes);
        let chunk = read_chunk(&mut reader).unwrap();
        assert!(chunk.is(b"teSt"));
        assert_eq!(chunk.data, vec![1, 2, 3]);
    }

    #[test]
    fn corrupt_critical_chunk_is_fatal() {
        let mut io = MemoryStream::new();
        write_chunk(&mut io, b"IHDR", &[9; 13]).unwrap();
        let mut bytes = io.into_inner();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let mut reader = SliceStream::new(&bytes);
        match read_chunk(&mut reader) {
            Err(Error::BrokenImage(_)) => {}
            other => panic!("expected BrokenImage, got {other:?}"),
        }
    }

    #[test]
    fn ztxt_roundtrip_through_inflate() {
        let mut payload = b"Comment\0\0".to_vec();
        payload.extend(miniz_oxide::deflate::compress_to_vec_zlib(b"hello", 6));
        let (key, text) = parse_ztxt(&payload).unwrap();
        assert_eq!(key, "Comment");
        assert_eq!(text, "hello");
    }

    #[test]
    fn fctl_fields() {
        let mut data = vec![0u8; 26];
        data[4..8].copy_from_slice(&8u32.to_be_bytes()); // width
        data[8..12].copy_from_slice(&4u32.to_be_bytes()); // height
        data[12..16].copy_from_slice(&2u32.to_be_bytes()); // x
        data[20..22].copy_from_slice(&1u16.to_be_bytes()); // delay_num
        data[22..24].copy_from_slice(&50u16.to_be_bytes()); // delay_den
        data[25] = 1; // blend over
        let fctl = parse_fctl(&data).unwrap();
        assert_eq!((fctl.width, fctl.height, fctl.x_offset), (8, 4, 2));
        assert_eq!((fctl.delay_num, fctl.delay_den), (1, 50));
        assert_eq!(fctl.blend_op, 1);
    }
}
