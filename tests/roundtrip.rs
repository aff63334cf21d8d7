//! Encode-then-decode across the lossless codecs.

use polyframe::*;

fn gradient_rgb(width: u32, height: u32) -> Image {
    let mut image = Image::new(width, height, PixelFormat::Rgb24).unwrap();
    for y in 0..height {
        for x in 0..width {
            let offset = (y * image.bytes_per_line + x * 3) as usize;
            image.pixels[offset] = (x * 17) as u8;
            image.pixels[offset + 1] = (y * 29) as u8;
            image.pixels[offset + 2] = ((x + y) * 43) as u8;
        }
    }
    image
}

#[cfg(feature = "png")]
#[test]
fn png_rgb24_roundtrip() {
    let image = gradient_rgb(13, 7);
    let encoded = save_to_memory("png", std::slice::from_ref(&image)).unwrap();
    assert_eq!(&encoded[1..4], b"PNG");

    let frames = load_all_from_memory(&encoded).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].pixel_format, PixelFormat::Rgb24);
    assert_eq!(frames[0].pixels, image.pixels);
    assert!(frames[0].delay < 0, "single PNG frames are not animated");
}

#[cfg(feature = "png")]
#[test]
fn png_rgba_and_bgr_orderings_roundtrip() {
    for format in [
        PixelFormat::Rgba32,
        PixelFormat::Bgra32,
        PixelFormat::Argb32,
        PixelFormat::Abgr32,
        PixelFormat::Bgr24,
    ] {
        let rgb = gradient_rgb(5, 4);
        let image = convert(&rgb, format).unwrap();
        let encoded = save_to_memory("png", std::slice::from_ref(&image)).unwrap();
        let frames = load_all_from_memory(&encoded).unwrap();
        // stored in RGB wire order; decoding with default options keeps
        // the source layout of the file, not the original ordering
        let decoded_as_rgb = convert(&frames[0], PixelFormat::Rgb24).unwrap();
        assert_eq!(decoded_as_rgb.pixels, rgb.pixels, "{format}");
    }
}

#[cfg(feature = "png")]
#[test]
fn png_gray_and_16_bit_roundtrip() {
    let rgb = gradient_rgb(6, 3);
    for format in [
        PixelFormat::Gray8,
        PixelFormat::Gray16,
        PixelFormat::GrayAlpha16,
        PixelFormat::GrayAlpha32,
        PixelFormat::Rgb48,
        PixelFormat::Rgba64,
    ] {
        let image = convert(&rgb, format).unwrap();
        let encoded = save_to_memory("png", std::slice::from_ref(&image)).unwrap();
        let frames = load_all_from_memory(&encoded).unwrap();
        assert_eq!(frames[0].pixel_format, format, "{format}");
        assert_eq!(frames[0].pixels, image.pixels, "{format}");
    }
}

#[cfg(feature = "png")]
#[test]
fn png_indexed_roundtrip() {
    let mut image = Image::new(4, 2, PixelFormat::Indexed8).unwrap();
    image.pixels.copy_from_slice(&[0, 1, 2, 1, 2, 0, 1, 2]);
    image.palette = Some(
        Palette::from_data(
            PixelFormat::Rgb24,
            3,
            vec![255, 0, 0, 0, 255, 0, 0, 0, 255],
        )
        .unwrap(),
    );

    let encoded = save_to_memory("png", std::slice::from_ref(&image)).unwrap();
    let frames = load_all_from_memory(&encoded).unwrap();
    assert_eq!(frames[0].pixel_format, PixelFormat::Indexed8);
    assert_eq!(frames[0].pixels, image.pixels);
    assert_eq!(
        frames[0].palette.as_ref().unwrap().data,
        image.palette.as_ref().unwrap().data
    );
}

#[cfg(feature = "png")]
#[test]
fn png_metadata_resolution_and_iccp_survive() {
    let mut image = gradient_rgb(3, 3);
    image.meta_data.push(MetaData::known(
        MetaDataKey::Comment,
        Variant::Str("rounding trip".into()),
    ));
    image
        .meta_data
        .push(MetaData::unknown("X-Custom-Key", Variant::Str("42".into())));
    image.resolution = Some(Resolution {
        unit: ResolutionUnit::Meter,
        x: 2835.0,
        y: 2835.0,
    });
    image.iccp = Some(vec![1, 2, 3, 4, 5]);

    let encoded = save_to_memory("png", std::slice::from_ref(&image)).unwrap();
    let frames = load_all_from_memory(&encoded).unwrap();
    let loaded = &frames[0];

    assert_eq!(loaded.iccp.as_deref(), Some(&[1u8, 2, 3, 4, 5][..]));
    let resolution = loaded.resolution.unwrap();
    assert_eq!(resolution.unit, ResolutionUnit::Meter);
    assert_eq!(resolution.x, 2835.0);

    let comment = loaded
        .meta_data
        .iter()
        .find(|m| m.key == MetaDataKey::Comment)
        .unwrap();
    assert_eq!(comment.value.as_str(), Some("rounding trip"));
    let custom = loaded
        .meta_data
        .iter()
        .find(|m| m.key == MetaDataKey::Unknown)
        .unwrap();
    assert_eq!(custom.key_string(), "X-Custom-Key");
    assert_eq!(custom.value.as_str(), Some("42"));
}

#[cfg(feature = "png")]
#[test]
fn png_filters_and_interlacing_roundtrip() {
    let image = gradient_rgb(9, 9);

    for filter in ["sub", "up", "average", "paeth"] {
        let mut options = SaveOptions::default();
        options
            .tuning
            .insert("png-filter".into(), Variant::Str(filter.into()));
        let mut io = MemoryStream::new();
        save_to_stream(
            default_registry().by_name("png").unwrap(),
            &mut io,
            std::slice::from_ref(&image),
            &options,
        )
        .unwrap();
        let frames = load_all_from_memory(io.as_slice()).unwrap();
        assert_eq!(frames[0].pixels, image.pixels, "filter {filter}");
    }

    let mut options = SaveOptions::default();
    options.flags |= SaveFlags::INTERLACED;
    let mut io = MemoryStream::new();
    save_to_stream(
        default_registry().by_name("png").unwrap(),
        &mut io,
        std::slice::from_ref(&image),
        &options,
    )
    .unwrap();
    let frames = load_all_from_memory(io.as_slice()).unwrap();
    assert_eq!(frames[0].pixels, image.pixels, "adam7");
    let source = frames[0].source_image.as_ref().unwrap();
    assert!(source.interlaced);
    assert_eq!(source.interlaced_passes, 7);
}

#[cfg(feature = "fli")]
#[test]
fn flc_animation_roundtrip() {
    let mut palette_data = vec![0u8; 256 * 3];
    for i in 0..256 {
        palette_data[i * 3] = i as u8;
        palette_data[i * 3 + 1] = (255 - i) as u8;
        palette_data[i * 3 + 2] = (i / 2) as u8;
    }
    let palette = Palette::from_data(PixelFormat::Rgb24, 256, palette_data).unwrap();

    let mut frames = Vec::new();
    for n in 0..3u8 {
        let mut frame = Image::new(16, 8, PixelFormat::Indexed8).unwrap();
        for (i, px) in frame.pixels.iter_mut().enumerate() {
            *px = (i as u8).wrapping_mul(n + 1);
        }
        frame.palette = Some(palette.clone());
        frame.delay = 40;
        frames.push(frame);
    }

    let encoded = save_to_memory("flc", &frames).unwrap();
    // FLC magic at offset 4, little-endian
    assert_eq!(&encoded[4..6], &[0x12, 0xAF]);

    let decoded = load_all_from_memory(&encoded).unwrap();
    assert_eq!(decoded.len(), 3);
    for (original, loaded) in frames.iter().zip(&decoded) {
        assert_eq!(loaded.pixel_format, PixelFormat::Indexed8);
        assert_eq!(loaded.pixels, original.pixels);
        assert_eq!(loaded.palette.as_ref().unwrap().data[..60], palette.data[..60]);
        assert_eq!(loaded.delay, 40);
    }
}

#[cfg(feature = "fli")]
#[test]
fn fli_writer_rejects_unsupported_inputs() {
    let rgb = gradient_rgb(8, 8);
    match save_to_memory("fli", std::slice::from_ref(&rgb)) {
        Err(Error::UnsupportedPixelFormat(PixelFormat::Rgb24)) => {}
        other => panic!("expected UnsupportedPixelFormat, got {other:?}"),
    }

    let mut indexed = Image::new(8, 8, PixelFormat::Indexed8).unwrap();
    indexed.palette =
        Some(Palette::from_data(PixelFormat::Rgb24, 2, vec![0, 0, 0, 255, 255, 255]).unwrap());
    match save_to_memory("fli", std::slice::from_ref(&indexed)) {
        Err(Error::UnsupportedPixelFormat(_)) => {}
        other => panic!("expected UnsupportedPixelFormat for a 2-color palette, got {other:?}"),
    }
}

#[cfg(feature = "xwd")]
#[test]
fn xwd_roundtrip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shot.xwd");

    let image = gradient_rgb(10, 5);
    save(&path, &image).unwrap();

    let loaded = load_first(&path).unwrap();
    assert_eq!(loaded.pixel_format, PixelFormat::Rgb24);
    assert_eq!(loaded.pixels, image.pixels);

    let probed = probe_file(&path).unwrap();
    assert_eq!((probed.width, probed.height), (10, 5));
    assert!(probed.pixels.is_empty(), "probe does not decode pixels");
}

#[cfg(feature = "xpm")]
#[test]
fn xpm_write_then_load_resolves_palette() {
    let mut image = Image::new(3, 2, PixelFormat::Indexed8).unwrap();
    image.pixels.copy_from_slice(&[0, 1, 2, 2, 1, 0]);
    image.palette = Some(
        Palette::from_data(
            PixelFormat::Rgb24,
            3,
            vec![10, 20, 30, 40, 50, 60, 70, 80, 90],
        )
        .unwrap(),
    );

    let mut options = SaveOptions::default();
    options
        .tuning
        .insert("xpm-name".into(), Variant::Str("test icon".into()));
    let mut io = MemoryStream::new();
    save_to_stream(
        default_registry().by_name("xpm").unwrap(),
        &mut io,
        std::slice::from_ref(&image),
        &options,
    )
    .unwrap();

    let text = String::from_utf8(io.as_slice().to_vec()).unwrap();
    assert!(text.starts_with("/* XPM */"));
    assert!(text.contains("test_icon"), "identifier is sanitized");

    let frames = load_all_from_memory(io.as_slice()).unwrap();
    assert_eq!(frames[0].pixel_format, PixelFormat::Rgb24);
    assert_eq!(
        frames[0].pixels,
        vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 70, 80, 90, 40, 50, 60, 10, 20, 30]
    );
}

#[test]
fn abandoned_sessions_release_cleanly() {
    // A reader dropped mid-animation must not poison anything.
    #[cfg(feature = "fli")]
    {
        let mut palette_data = vec![0u8; 768];
        palette_data[3] = 200;
        let palette = Palette::from_data(PixelFormat::Rgb24, 256, palette_data).unwrap();
        let mut frame = Image::new(4, 4, PixelFormat::Indexed8).unwrap();
        frame.palette = Some(palette);
        let frames = vec![frame.clone(), frame];
        let encoded = save_to_memory("flc", &frames).unwrap();

        let mut io = SliceStream::new(&encoded);
        let mut reader = ImageReader::new(&mut io).unwrap();
        let first = reader.next_frame().unwrap().unwrap();
        assert_eq!(first.width, 4);
        drop(reader);

        // the same bytes load fully afterwards
        assert_eq!(load_all_from_memory(&encoded).unwrap().len(), 2);
    }
}
