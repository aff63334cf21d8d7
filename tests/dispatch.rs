//! Codec selection by magic number, extension, and MIME type.

use polyframe::*;

#[cfg(all(feature = "png", feature = "fli"))]
#[test]
fn magic_probe_picks_the_right_codec() {
    let registry = default_registry();

    let png_head = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    let mut io = SliceStream::new(&png_head);
    assert_eq!(registry.by_magic(&mut io).unwrap().info().name, "png");

    // FLIC magic lives at offset 4, after the file size field
    let fli_head = [0x00u8, 0x10, 0x00, 0x00, 0x11, 0xAF, 0x01, 0x00];
    let mut io = SliceStream::new(&fli_head);
    assert_eq!(registry.by_magic(&mut io).unwrap().info().name, "fli");

    let flc_head = [0x00u8, 0x10, 0x00, 0x00, 0x12, 0xAF, 0x01, 0x00];
    let mut io = SliceStream::new(&flc_head);
    assert_eq!(registry.by_magic(&mut io).unwrap().info().name, "fli");
}

#[test]
fn magic_probe_rewinds_the_stream() {
    let data = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    let mut io = SliceStream::new(&data);
    let _ = default_registry().by_magic(&mut io);
    assert_eq!(io.tell().unwrap(), 0);
}

#[test]
fn unknown_streams_report_codec_not_found() {
    let data = [0xDEu8, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0, 0, 0, 0, 0];
    let mut io = SliceStream::new(&data);
    match default_registry().by_magic(&mut io) {
        Err(Error::CodecNotFound) => {}
        other => panic!("expected CodecNotFound, got {:?}", other.map(|c| c.info().name)),
    }
}

#[cfg(feature = "png")]
#[test]
fn extension_and_mime_matches_are_case_insensitive() {
    let registry = default_registry();
    assert_eq!(registry.by_extension("PNG").unwrap().info().name, "png");
    assert_eq!(registry.by_extension(".png").unwrap().info().name, "png");
    assert_eq!(registry.by_path("/tmp/shot.PnG").unwrap().info().name, "png");
    assert_eq!(
        registry.by_mime_type("IMAGE/PNG").unwrap().info().name,
        "png"
    );
    assert!(registry.by_extension("tiff").is_err());
    assert!(registry.by_path("/tmp/noextension").is_err());
}

#[cfg(feature = "fli")]
#[test]
fn registry_exposes_codec_descriptors() {
    let fli = default_registry().by_name("fli").unwrap().info();
    assert!(fli.extensions.contains(&"flc"));
    assert!(fli.load_features.features.contains(CodecFeatures::ANIMATED));
    assert_eq!(
        fli.save_features.compressions,
        &[Compression::Rle]
    );
}

#[cfg(feature = "png")]
#[test]
fn custom_registries_control_priority() {
    let mut registry = CodecRegistry::new();
    registry.register(Box::new(PngCodec));
    let data = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    let mut io = SliceStream::new(&data);
    assert_eq!(registry.by_magic(&mut io).unwrap().info().name, "png");

    let empty = CodecRegistry::new();
    let mut io = SliceStream::new(&data);
    assert!(matches!(
        empty.by_magic(&mut io),
        Err(Error::CodecNotFound)
    ));
}
