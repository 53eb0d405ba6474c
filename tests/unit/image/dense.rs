use super::*;

fn layout() -> PixelLayout {
    PixelLayout::new(ColorFormat::Rgba8, DepthFormat::F32)
}

#[test]
fn clear_sets_background_and_far_depth() {
    let mut img = Image::new(layout(), 3, 2);
    img.clear(Rgba::new(1.0, 0.0, 0.0, 1.0));
    assert!(img.depth().iter().all(|d| *d == 1.0));
    assert_eq!(&img.color_bytes()[..4], &[255, 0, 0, 255]);
    assert_eq!(img.pixel_rgba(5), Some([1.0, 0.0, 0.0, 1.0]));
}

#[test]
fn clear_around_region_keeps_inside() {
    let mut img = Image::new(layout(), 4, 4);
    img.depth_mut().fill(0.5);
    img.clear_around_region(Viewport::new(1, 1, 2, 2), Rgba::TRANSPARENT);
    for y in 0..4 {
        for x in 0..4 {
            let inside = (1..3).contains(&x) && (1..3).contains(&y);
            let d = img.depth()[y * 4 + x];
            assert_eq!(d == 0.5, inside, "pixel ({x},{y})");
        }
    }
}

#[test]
fn copy_region_moves_rows() {
    let mut src = Image::new(layout(), 4, 4);
    for (i, d) in src.depth_mut().iter_mut().enumerate() {
        *d = i as f32;
    }
    let mut dst = Image::new(layout(), 2, 2);
    src.copy_region(Viewport::new(2, 1, 2, 2), &mut dst, Viewport::new(0, 0, 2, 2))
        .unwrap();
    assert_eq!(dst.depth(), &[6.0, 7.0, 10.0, 11.0]);
}

#[test]
fn copy_rejects_mismatched_formats() {
    let src = Image::new(layout(), 2, 2);
    let mut dst = Image::new(PixelLayout::new(ColorFormat::RgbaF32, DepthFormat::None), 2, 2);
    let err = src.copy_pixels(0, &mut dst, 0, 4).unwrap_err();
    assert!(matches!(err, SortlastError::InvalidValue(_)));
    assert!(
        src.copy_region(
            Viewport::new(0, 0, 2, 1),
            &mut Image::new(layout(), 2, 2),
            Viewport::new(0, 0, 1, 2)
        )
        .is_err()
    );
}

#[test]
fn adjust_for_output_drops_depth_only_with_color() {
    let mut img = Image::new(layout(), 2, 2);
    img.adjust_for_output(true);
    assert_eq!(img.layout().depth, DepthFormat::None);
    assert!(img.depth().is_empty());

    let depth_only = PixelLayout::new(ColorFormat::None, DepthFormat::F32);
    let mut img = Image::new(depth_only, 2, 2);
    img.adjust_for_output(true);
    assert_eq!(img.layout(), depth_only);
}

#[test]
fn correct_background_blends_under() {
    let float = PixelLayout::new(ColorFormat::RgbaF32, DepthFormat::None);
    let mut img = Image::new(float, 1, 1);
    crate::image::pixel::write_rgba_f32(img.color_bytes_mut(), [0.0, 0.25, 0.5, 0.5]);
    img.correct_background(Rgba::new(0.5, 0.5, 0.5, 1.0));
    assert_eq!(img.pixel_rgba(0), Some([0.25, 0.5, 0.75, 1.0]));
}

#[test]
fn from_parts_validates_planes() {
    assert!(Image::from_parts(layout(), 2, 2, vec![0; 16], vec![1.0; 4]).is_ok());
    assert!(Image::from_parts(layout(), 2, 2, vec![0; 15], vec![1.0; 4]).is_err());
    assert!(Image::from_parts(layout(), 2, 2, vec![0; 16], vec![1.0; 3]).is_err());
}
