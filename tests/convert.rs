//! Conversion engine properties across the format matrix.

use polyframe::*;

fn rgba_test_image() -> Image {
    let mut image = Image::new(4, 2, PixelFormat::Rgba32).unwrap();
    image.pixels.copy_from_slice(&[
        255, 0, 0, 255, // opaque red
        0, 255, 0, 128, // translucent green
        0, 0, 255, 0, // invisible blue
        100, 150, 200, 255, // opaque mix
        1, 2, 3, 4, 5, 6, 7, 8, // low values
        250, 249, 248, 247, 9, 8, 7, 6,
    ]);
    image
}

#[test]
fn conversion_is_idempotent_for_every_supported_source() {
    let rgb = convert(&rgba_test_image(), PixelFormat::Rgb24).unwrap();
    for format in [
        PixelFormat::Gray8,
        PixelFormat::Gray16,
        PixelFormat::GrayAlpha16,
        PixelFormat::Rgb555,
        PixelFormat::Rgb565,
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Rgb48,
        PixelFormat::Rgba32,
        PixelFormat::Abgr32,
        PixelFormat::Rgba64,
        PixelFormat::Rgbx32,
        PixelFormat::Yuv24,
        PixelFormat::Yuva32,
        PixelFormat::Cmyk32,
        PixelFormat::Cmyka80,
    ] {
        let image = convert(&rgb, format).unwrap();
        let again = convert(&image, format).unwrap();
        assert_eq!(again.pixels, image.pixels, "{format}");
        assert_eq!(again.bytes_per_line, image.bytes_per_line, "{format}");
    }
}

#[test]
fn zero_alpha_blends_to_solid_background() {
    let mut image = Image::new(3, 1, PixelFormat::Rgba32).unwrap();
    image
        .pixels
        .copy_from_slice(&[10, 20, 30, 0, 90, 90, 90, 0, 200, 100, 50, 0]);

    let options = ConversionOptions::blend_with([17, 34, 51]);
    let rgb = convert_with_options(&image, PixelFormat::Rgb24, &options).unwrap();
    assert_eq!(rgb.pixels, vec![17, 34, 51, 17, 34, 51, 17, 34, 51]);
}

#[test]
fn full_alpha_ignores_background() {
    let mut image = Image::new(1, 1, PixelFormat::Rgba64).unwrap();
    // opaque 16-bit pixel
    for (i, v) in [1000u16, 2000, 3000, 65535].iter().enumerate() {
        image.pixels[i * 2..i * 2 + 2].copy_from_slice(&v.to_ne_bytes());
    }
    let options = ConversionOptions::blend_with([255, 255, 255]);
    let rgb = convert_with_options(&image, PixelFormat::Rgb48, &options).unwrap();
    let r = u16::from_ne_bytes([rgb.pixels[0], rgb.pixels[1]]);
    assert_eq!(r, 1000);
}

#[test]
fn palette_fidelity_through_rgb() {
    // indexed -> RGB -> re-quantize against the same palette recovers
    // the original indices
    let palette_data = vec![10, 20, 30, 200, 100, 0, 0, 0, 0, 77, 88, 99];
    let palette = Palette::from_data(PixelFormat::Rgb24, 4, palette_data.clone()).unwrap();
    let mut image = Image::new(8, 2, PixelFormat::Indexed8).unwrap();
    for (i, px) in image.pixels.iter_mut().enumerate() {
        *px = (i % 4) as u8;
    }
    image.palette = Some(palette);

    let rgb = convert(&image, PixelFormat::Rgb24).unwrap();

    let recovered: Vec<u8> = rgb
        .pixels
        .chunks_exact(3)
        .map(|px| {
            palette_data
                .chunks_exact(3)
                .position(|entry| entry == px)
                .unwrap() as u8
        })
        .collect();
    assert_eq!(recovered, image.pixels);
}

#[test]
fn grayscale_alpha_preserves_coverage() {
    let image = rgba_test_image();
    let ga = convert(&image, PixelFormat::GrayAlpha16).unwrap();
    // alpha channel carries over unchanged
    let alphas: Vec<u8> = ga.pixels.chunks_exact(2).map(|px| px[1]).collect();
    assert_eq!(alphas, vec![255, 128, 0, 255, 4, 8, 247, 6]);
}

#[test]
fn indexed_sub_byte_sources_expand() {
    // 2 bits per pixel, 4 pixels packed into one byte
    let palette = Palette::from_data(
        PixelFormat::Rgb24,
        4,
        vec![0, 0, 0, 85, 85, 85, 170, 170, 170, 255, 255, 255],
    )
    .unwrap();
    let mut image = Image::new(4, 1, PixelFormat::Indexed2).unwrap();
    image.pixels[0] = 0b00_01_10_11;
    image.palette = Some(palette);

    let rgb = convert(&image, PixelFormat::Rgb24).unwrap();
    assert_eq!(
        rgb.pixels,
        vec![0, 0, 0, 85, 85, 85, 170, 170, 170, 255, 255, 255]
    );
}

#[test]
fn packed_16_bit_targets_keep_orderings_distinct() {
    let mut image = Image::new(1, 1, PixelFormat::Rgb24).unwrap();
    image.pixels.copy_from_slice(&[255, 0, 0]);

    let rgb565 = convert(&image, PixelFormat::Rgb565).unwrap();
    let bgr565 = convert(&image, PixelFormat::Bgr565).unwrap();
    assert_ne!(rgb565.pixels, bgr565.pixels);

    let back = convert(&rgb565, PixelFormat::Rgb24).unwrap();
    assert_eq!(back.pixels, vec![255, 0, 0]);
    let back = convert(&bgr565, PixelFormat::Rgb24).unwrap();
    assert_eq!(back.pixels, vec![255, 0, 0]);
}

#[test]
fn metadata_travels_with_conversion() {
    let mut image = rgba_test_image();
    image.delay = 120;
    image.iccp = Some(vec![9, 9, 9]);
    image.meta_data.push(MetaData::known(
        MetaDataKey::Author,
        Variant::Str("someone".into()),
    ));

    let rgb = convert(&image, PixelFormat::Rgb24).unwrap();
    assert_eq!(rgb.delay, 120);
    assert_eq!(rgb.iccp, Some(vec![9, 9, 9]));
    assert_eq!(rgb.meta_data.len(), 1);
}
