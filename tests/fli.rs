//! FLIC wire-level behavior: hand-built streams and delta semantics.

#![cfg(feature = "fli")]

use polyframe::*;

/// 128-byte FLIC file header.
fn fli_header(magic: u16, frames: u16, width: u16, height: u16, speed: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    out.extend_from_slice(&0u32.to_le_bytes()); // size (patched by nobody; readers ignore)
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(&frames.to_le_bytes());
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&8u16.to_le_bytes()); // depth
    out.extend_from_slice(&0u16.to_le_bytes()); // flags
    out.extend_from_slice(&speed.to_le_bytes());
    out.extend_from_slice(&[0u8; 2]); // reserved1
    out.extend_from_slice(&[0u8; 16]); // created/creator/updated/updater
    out.extend_from_slice(&6u16.to_le_bytes()); // aspect x
    out.extend_from_slice(&5u16.to_le_bytes()); // aspect y
    out.extend_from_slice(&[0u8; 38]); // reserved2
    out.extend_from_slice(&[0u8; 8]); // oframe1/oframe2
    out.extend_from_slice(&[0u8; 40]); // reserved3
    assert_eq!(out.len(), 128);
    out
}

fn frame_with_chunks(chunks: &[Vec<u8>]) -> Vec<u8> {
    let payload: usize = chunks.iter().map(|c| c.len()).sum();
    let mut out = Vec::new();
    out.extend_from_slice(&((16 + payload) as u32).to_le_bytes());
    out.extend_from_slice(&0xF1FAu16.to_le_bytes());
    out.extend_from_slice(&(chunks.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // delay
    out.extend_from_slice(&[0u8; 6]); // reserved
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

fn chunk(kind: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&((6 + payload.len()) as u32).to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

#[test]
fn fli_speed_is_seventieths_of_a_second() {
    let mut data = fli_header(0xAF11, 1, 4, 2, 7);
    data.extend(frame_with_chunks(&[]));

    let frames = load_all_from_memory(&data).unwrap();
    assert_eq!(frames[0].delay, 100); // 7 * 1000 / 70
}

#[test]
fn flc_speed_is_milliseconds() {
    let mut data = fli_header(0xAF12, 1, 4, 2, 40);
    data.extend(frame_with_chunks(&[]));

    let frames = load_all_from_memory(&data).unwrap();
    assert_eq!(frames[0].delay, 40);
}

#[test]
fn brun_packets_fill_a_scan_line() {
    // width 12: run 5*0x41, run 3*0x42, literal 43 44 45 46; second
    // line plain copy via a second packet list
    let mut brun = Vec::new();
    brun.extend_from_slice(&[0x03, 0x05, 0x41, 0x03, 0x42, 0xFC, 0x43, 0x44, 0x45, 0x46]);
    brun.extend_from_slice(&[0x01, 12 as u8, 0x99]); // line 2: run of 12

    let mut data = fli_header(0xAF12, 1, 12, 2, 40);
    data.extend(frame_with_chunks(&[chunk(15, &brun)]));

    let frames = load_all_from_memory(&data).unwrap();
    assert_eq!(
        frames[0].pixels[..12],
        [0x41, 0x41, 0x41, 0x41, 0x41, 0x42, 0x42, 0x42, 0x43, 0x44, 0x45, 0x46]
    );
    assert_eq!(frames[0].pixels[12..], [0x99; 12]);
}

#[test]
fn black_chunk_and_delta_carry_over() {
    // Frame 1: BLACK then LC writing one run on line 1.
    // Frame 2: no chunks at all - pure carry-over of frame 1.
    let lc = vec![
        0x01, 0x00, // start_y = 1
        0x01, 0x00, // line count = 1
        0x01, // 1 packet
        0x02, // skip 2
        0xFE, 0x55, // run of 2 * 0x55
    ];
    let mut data = fli_header(0xAF12, 2, 6, 3, 40);
    data.extend(frame_with_chunks(&[chunk(13, &[]), chunk(12, &lc)]));
    data.extend(frame_with_chunks(&[]));

    let frames = load_all_from_memory(&data).unwrap();
    assert_eq!(frames.len(), 2);

    let mut expected = vec![0u8; 18];
    expected[6 + 2] = 0x55;
    expected[6 + 3] = 0x55;
    assert_eq!(frames[0].pixels, expected);
    // delta consistency: the previous-frame buffer equals frame 1
    assert_eq!(frames[1].pixels, expected);
}

#[test]
fn color_chunks_update_the_palette_mid_stream() {
    // Frame 1 sets palette entry 1 via COLOR_256; frame 2 overrides it
    // via COLOR_64 (6-bit components).
    let color256 = vec![0x01, 0x00, 1, 1, 10, 20, 30];
    let color64 = vec![0x01, 0x00, 1, 1, 63, 0, 32];

    let mut data = fli_header(0xAF12, 2, 2, 2, 40);
    data.extend(frame_with_chunks(&[chunk(4, &color256)]));
    data.extend(frame_with_chunks(&[chunk(11, &color64)]));

    let frames = load_all_from_memory(&data).unwrap();
    let palette1 = frames[0].palette.as_ref().unwrap();
    assert_eq!(&palette1.data[3..6], &[10, 20, 30]);
    let palette2 = frames[1].palette.as_ref().unwrap();
    assert_eq!(&palette2.data[3..6], &[255, 0, 130]);
}

#[test]
fn unknown_chunks_are_skipped() {
    // chunk type 99 with 4 payload bytes, then a BLACK chunk
    let mut data = fli_header(0xAF12, 1, 2, 2, 40);
    data.extend(frame_with_chunks(&[
        chunk(99, &[1, 2, 3, 4]),
        chunk(13, &[]),
    ]));

    let frames = load_all_from_memory(&data).unwrap();
    assert_eq!(frames[0].pixels, vec![0; 4]);
}

#[test]
fn invalid_magic_is_rejected() {
    let mut data = fli_header(0xBEEF, 1, 2, 2, 40);
    data.extend(frame_with_chunks(&[]));

    let mut io = SliceStream::new(&data);
    let codec = FliCodec;
    match Codec::load_init(&codec, &mut io, &LoadOptions::default()) {
        Err(Error::InvalidImage(_)) => {}
        other => panic!("expected InvalidImage, got {:?}", other.err()),
    };
}

#[test]
fn unsupported_depth_is_rejected() {
    let mut data = fli_header(0xAF12, 1, 2, 2, 40);
    data[12] = 16; // depth field
    let mut io = SliceStream::new(&data);
    let codec = FliCodec;
    match Codec::load_init(&codec, &mut io, &LoadOptions::default()) {
        Err(Error::UnsupportedBitDepth(16)) => {}
        other => panic!("expected UnsupportedBitDepth, got {:?}", other.err()),
    };
}

#[test]
fn frames_past_the_header_count_return_no_more_frames() {
    let mut data = fli_header(0xAF12, 1, 2, 2, 40);
    data.extend(frame_with_chunks(&[]));

    let mut io = SliceStream::new(&data);
    let mut reader = ImageReader::new(&mut io).unwrap();
    assert!(reader.next_frame().unwrap().is_some());
    assert!(reader.next_frame().unwrap().is_none());
}
