use super::*;
use crate::image::format::PixelLayout;

fn z_layout() -> PixelLayout {
    PixelLayout::new(ColorFormat::Rgba8, DepthFormat::F32)
}

fn blend_layout() -> PixelLayout {
    PixelLayout::new(ColorFormat::RgbaF32, DepthFormat::None)
}

/// 4x4 image with a 2x2 block of active pixels at (1,1).
fn block_image() -> Image {
    let mut img = Image::new(z_layout(), 4, 4);
    img.clear(Rgba::TRANSPARENT);
    for y in 1..3 {
        for x in 1..3 {
            let i = y * 4 + x;
            img.depth_mut()[i] = 0.25;
            img.color_bytes_mut()[i * 4..i * 4 + 4].copy_from_slice(&[10, 20, 30, 255]);
        }
    }
    img
}

#[test]
fn background_policy_per_mode() {
    let grey = Rgba::new(0.5, 0.5, 0.5, 1.0);

    let z = Background::for_mode(CompositeMode::ZBuffer, grey, true);
    assert_eq!(z, Background::plain(grey));

    let blend = Background::for_mode(CompositeMode::Blend, grey, true);
    assert_eq!(blend.working, Rgba::TRANSPARENT);
    assert_eq!(blend.true_color, grey);
    assert!(blend.needs_correction);

    assert!(!Background::for_mode(CompositeMode::Blend, grey, false).needs_correction);
    assert!(!Background::for_mode(CompositeMode::Blend, Rgba::TRANSPARENT, true).needs_correction);
}

#[test]
fn compress_counts_only_active_pixels() {
    let sparse = compress_image(&block_image(), CompositeMode::ZBuffer).unwrap();
    assert_eq!((sparse.width(), sparse.height()), (4, 4));
    assert_eq!(sparse.active_pixel_count().unwrap(), 4);
    // rows: 5 inactive + 2 active, 2 inactive + 2 active, 5 inactive
    assert_eq!(sparse.stream_len(), 3 * 8 + 4 * 8);
}

#[test]
fn decompress_fills_background_around_active_pixels() {
    let sparse = compress_image(&block_image(), CompositeMode::ZBuffer).unwrap();
    let bg = Rgba::new(0.0, 0.0, 1.0, 1.0);
    let mut out = Image::new(z_layout(), 1, 1);
    decompress_image(&sparse, &mut out, bg).unwrap();
    assert_eq!((out.width(), out.height()), (4, 4));
    assert_eq!(&out.color_bytes()[0..4], &[0, 0, 255, 255]);
    assert_eq!(out.depth()[0], 1.0);
    assert_eq!(&out.color_bytes()[5 * 4..6 * 4], &[10, 20, 30, 255]);
    assert_eq!(out.depth()[5], 0.25);
}

#[test]
fn blend_mode_tests_alpha() {
    let mut img = Image::new(blend_layout(), 3, 1);
    crate::image::pixel::write_rgba_f32(&mut img.color_bytes_mut()[16..32], [0.1, 0.0, 0.0, 0.5]);
    let sparse = compress_image(&img, CompositeMode::Blend).unwrap();
    assert_eq!(sparse.active_pixel_count().unwrap(), 1);

    let err = compress_image(&img, CompositeMode::ZBuffer).unwrap_err();
    assert!(matches!(err, SortlastError::InvalidOperation(_)));
}

#[test]
fn compress_sub_image_is_one_row() {
    let sparse = compress_sub_image(&block_image(), 4, 8, CompositeMode::ZBuffer).unwrap();
    assert_eq!((sparse.width(), sparse.height()), (8, 1));
    assert_eq!(sparse.active_pixel_count().unwrap(), 4);
    assert!(compress_sub_image(&block_image(), 10, 8, CompositeMode::ZBuffer).is_err());
}

#[test]
fn compress_padded_places_region_at_target() {
    let src = block_image();
    let sparse = compress_padded(
        &src,
        Viewport::new(1, 1, 2, 2),
        Viewport::new(3, 0, 2, 2),
        6,
        3,
        CompositeMode::ZBuffer,
    )
    .unwrap();
    assert_eq!((sparse.width(), sparse.height()), (6, 3));

    let mut out = Image::new(z_layout(), 6, 3);
    decompress_image(&sparse, &mut out, Rgba::TRANSPARENT).unwrap();
    for y in 0..3 {
        for x in 0..6 {
            let inside = (3..5).contains(&x) && y < 2;
            assert_eq!(out.depth()[y * 6 + x] == 0.25, inside, "pixel ({x},{y})");
        }
    }
}

#[test]
fn compress_padded_empty_target_is_blank() {
    let sparse = compress_padded(
        &block_image(),
        Viewport::empty(),
        Viewport::empty(),
        5,
        5,
        CompositeMode::ZBuffer,
    )
    .unwrap();
    assert_eq!(sparse, SparseImage::new(z_layout(), 5, 5));
}

#[test]
fn decompress_rejects_bad_targets() {
    let sparse = compress_image(&block_image(), CompositeMode::ZBuffer).unwrap();

    let mut small = Image::new(z_layout(), 2, 2);
    let err = decompress_sub_image(&sparse, 0, &mut small, Rgba::TRANSPARENT).unwrap_err();
    assert!(err.is_fatal());

    let mut other = Image::new(blend_layout(), 4, 4);
    let err = decompress_sub_image(&sparse, 0, &mut other, Rgba::TRANSPARENT).unwrap_err();
    assert!(matches!(err, SortlastError::InvalidValue(_)));
}

#[test]
fn correct_background_blends_under_true_color() {
    let mut img = Image::new(blend_layout(), 2, 1);
    crate::image::pixel::write_rgba_f32(&mut img.color_bytes_mut()[16..32], [0.0, 0.25, 0.5, 0.5]);
    let sparse = compress_image(&img, CompositeMode::Blend).unwrap();

    let grey = Rgba::new(0.5, 0.5, 0.5, 1.0);
    let bg = Background::for_mode(CompositeMode::Blend, grey, true);
    let mut out = Image::new(blend_layout(), 2, 1);
    decompress_sub_image_correct_background(&sparse, 0, &mut out, &bg).unwrap();
    assert_eq!(out.pixel_rgba(0), Some([0.5, 0.5, 0.5, 1.0]));
    assert_eq!(out.pixel_rgba(1), Some([0.25, 0.5, 0.75, 1.0]));

    let uncorrected = Background::for_mode(CompositeMode::Blend, grey, false);
    decompress_sub_image_correct_background(&sparse, 0, &mut out, &uncorrected).unwrap();
    assert_eq!(out.pixel_rgba(0), Some([0.0; 4]));
    assert_eq!(out.pixel_rgba(1), Some([0.0, 0.25, 0.5, 0.5]));
}
