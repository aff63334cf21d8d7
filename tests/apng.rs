//! APNG frame composition over hand-built streams.

#![cfg(feature = "png")]

use polyframe::*;

// ── Minimal chunk writer ────────────────────────────────────────────

fn crc32(parts: &[&[u8]]) -> u32 {
    let mut table = [0u32; 256];
    for (n, slot) in table.iter_mut().enumerate() {
        let mut c = n as u32;
        for _ in 0..8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
        }
        *slot = c;
    }
    let mut crc = u32::MAX;
    for part in parts {
        for byte in *part {
            crc = table[((crc ^ u32::from(*byte)) & 0xFF) as usize] ^ (crc >> 8);
        }
    }
    crc ^ u32::MAX
}

fn push_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc32(&[kind, data]).to_be_bytes());
}

fn ihdr(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.push(8); // bit depth
    data.push(6); // RGBA
    data.extend_from_slice(&[0, 0, 0]); // compression, filter, interlace
    data
}

fn fctl(
    seq: u32,
    width: u32,
    height: u32,
    x: u32,
    y: u32,
    dispose: u8,
    blend: u8,
) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&seq.to_be_bytes());
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&x.to_be_bytes());
    data.extend_from_slice(&y.to_be_bytes());
    data.extend_from_slice(&1u16.to_be_bytes()); // delay numerator
    data.extend_from_slice(&10u16.to_be_bytes()); // delay denominator
    data.push(dispose);
    data.push(blend);
    data
}

/// Filter-0 rows of solid RGBA pixels, zlib-compressed.
fn rgba_frame_data(width: usize, height: usize, rgba: [u8; 4]) -> Vec<u8> {
    let mut raw = Vec::new();
    for _ in 0..height {
        raw.push(0); // filter none
        for _ in 0..width {
            raw.extend_from_slice(&rgba);
        }
    }
    miniz_oxide::deflate::compress_to_vec_zlib(&raw, 6)
}

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];

fn two_frame_apng(dispose: u8, blend: u8, overlay: [u8; 4]) -> Vec<u8> {
    let mut out = vec![137, 80, 78, 71, 13, 10, 26, 10];
    push_chunk(&mut out, b"IHDR", &ihdr(2, 2));
    let mut actl = Vec::new();
    actl.extend_from_slice(&2u32.to_be_bytes()); // frames
    actl.extend_from_slice(&0u32.to_be_bytes()); // plays
    push_chunk(&mut out, b"acTL", &actl);
    push_chunk(&mut out, b"fcTL", &fctl(0, 2, 2, 0, 0, 0, 0));
    push_chunk(&mut out, b"IDAT", &rgba_frame_data(2, 2, RED));
    push_chunk(&mut out, b"fcTL", &fctl(1, 1, 1, 0, 0, dispose, blend));
    let mut fdat = 2u32.to_be_bytes().to_vec();
    fdat.extend(rgba_frame_data(1, 1, overlay));
    push_chunk(&mut out, b"fdAT", &fdat);
    push_chunk(&mut out, b"IEND", &[]);
    out
}

#[test]
fn source_blend_replaces_the_sub_rectangle() {
    let data = two_frame_apng(0, 0, GREEN);
    let frames = load_all_from_memory(&data).unwrap();
    assert_eq!(frames.len(), 2);

    assert_eq!(frames[0].pixel_format, PixelFormat::Rgba32);
    assert_eq!(frames[0].delay, 100); // 1/10 s
    for px in frames[0].pixels.chunks_exact(4) {
        assert_eq!(px, RED);
    }

    // frame 1: top-left green, everything else carried over as red
    assert_eq!(&frames[1].pixels[0..4], &GREEN);
    for px in frames[1].pixels[4..].chunks_exact(4) {
        assert_eq!(px, RED);
    }
}

#[test]
fn over_blend_with_transparent_source_keeps_the_canvas() {
    let data = two_frame_apng(0, 1, [0, 255, 0, 0]);
    let frames = load_all_from_memory(&data).unwrap();
    for px in frames[1].pixels.chunks_exact(4) {
        assert_eq!(px, RED, "fully transparent OVER leaves pixels alone");
    }
}

#[test]
fn over_blend_composites_partial_alpha() {
    let data = two_frame_apng(0, 1, [0, 255, 0, 128]);
    let frames = load_all_from_memory(&data).unwrap();
    let px = &frames[1].pixels[0..4];
    // out = a*src + (1-a)*dst per channel at full destination alpha
    assert_eq!(px[3], 255);
    assert!(px[0] > 120 && px[0] < 130, "red fades: {}", px[0]);
    assert!(px[1] > 123 && px[1] < 133, "green appears: {}", px[1]);
}

#[test]
fn dispose_background_clears_for_the_next_frame() {
    // three frames: red base, then an overlay with dispose=background,
    // then an empty 1x1 overlay; the cleared rectangle must show through
    let mut out = vec![137, 80, 78, 71, 13, 10, 26, 10];
    push_chunk(&mut out, b"IHDR", &ihdr(2, 1));
    let mut actl = Vec::new();
    actl.extend_from_slice(&3u32.to_be_bytes());
    actl.extend_from_slice(&0u32.to_be_bytes());
    push_chunk(&mut out, b"acTL", &actl);
    push_chunk(&mut out, b"fcTL", &fctl(0, 2, 1, 0, 0, 0, 0));
    push_chunk(&mut out, b"IDAT", &rgba_frame_data(2, 1, RED));
    // frame 1 paints green over pixel 0 and asks for background disposal
    push_chunk(&mut out, b"fcTL", &fctl(1, 1, 1, 0, 0, 1, 0));
    let mut fdat = 2u32.to_be_bytes().to_vec();
    fdat.extend(rgba_frame_data(1, 1, GREEN));
    push_chunk(&mut out, b"fdAT", &fdat);
    // frame 2 touches only pixel 1
    push_chunk(&mut out, b"fcTL", &fctl(3, 1, 1, 1, 0, 0, 0));
    let mut fdat = 4u32.to_be_bytes().to_vec();
    fdat.extend(rgba_frame_data(1, 1, GREEN));
    push_chunk(&mut out, b"fdAT", &fdat);
    push_chunk(&mut out, b"IEND", &[]);

    let frames = load_all_from_memory(&out).unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(&frames[1].pixels[0..4], &GREEN);
    // frame 2: pixel 0 was disposed to transparent black, pixel 1 painted
    assert_eq!(&frames[2].pixels[0..4], &[0, 0, 0, 0]);
    assert_eq!(&frames[2].pixels[4..8], &GREEN);
}

#[test]
fn hidden_default_image_is_skipped() {
    // no fcTL before IDAT: the default image is not an animation frame
    let mut out = vec![137, 80, 78, 71, 13, 10, 26, 10];
    push_chunk(&mut out, b"IHDR", &ihdr(2, 2));
    let mut actl = Vec::new();
    actl.extend_from_slice(&1u32.to_be_bytes());
    actl.extend_from_slice(&0u32.to_be_bytes());
    push_chunk(&mut out, b"acTL", &actl);
    push_chunk(&mut out, b"IDAT", &rgba_frame_data(2, 2, RED));
    push_chunk(&mut out, b"fcTL", &fctl(0, 2, 2, 0, 0, 0, 0));
    let mut fdat = 1u32.to_be_bytes().to_vec();
    fdat.extend(rgba_frame_data(2, 2, GREEN));
    push_chunk(&mut out, b"fdAT", &fdat);
    push_chunk(&mut out, b"IEND", &[]);

    let frames = load_all_from_memory(&out).unwrap();
    assert_eq!(frames.len(), 1);
    for px in frames[0].pixels.chunks_exact(4) {
        assert_eq!(px, GREEN);
    }
}

#[test]
fn out_of_bounds_sub_rectangle_is_rejected() {
    let mut out = vec![137, 80, 78, 71, 13, 10, 26, 10];
    push_chunk(&mut out, b"IHDR", &ihdr(2, 2));
    let mut actl = Vec::new();
    actl.extend_from_slice(&1u32.to_be_bytes());
    actl.extend_from_slice(&0u32.to_be_bytes());
    push_chunk(&mut out, b"acTL", &actl);
    push_chunk(&mut out, b"fcTL", &fctl(0, 2, 2, 1, 0, 0, 0)); // 2 wide at x=1
    push_chunk(&mut out, b"IDAT", &rgba_frame_data(2, 2, RED));
    push_chunk(&mut out, b"IEND", &[]);

    let mut io = SliceStream::new(&out);
    let mut reader = ImageReader::new(&mut io).unwrap();
    match reader.next_frame() {
        Err(Error::IncorrectDimensions(_)) => {}
        other => panic!("expected IncorrectDimensions, got {:?}", other.err()),
    }
}

#[test]
fn replaying_dispose_and_blend_reconstructs_every_frame() {
    // Composition invariant: playing frames 0..N yields frame N exactly
    // as the decoder reports it; decode twice and compare.
    let data = two_frame_apng(2, 1, [0, 255, 0, 77]);
    let first = load_all_from_memory(&data).unwrap();
    let second = load_all_from_memory(&data).unwrap();
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.pixels, b.pixels);
    }
}
