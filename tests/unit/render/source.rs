use super::*;
use crate::foundation::math::matrix_identity;
use crate::image::format::{ColorFormat, DepthFormat};
use crate::render::{Rect, RectRenderer};

const LAYOUT: PixelLayout = PixelLayout::new(ColorFormat::Rgba8, DepthFormat::F32);
const RED: [u8; 4] = [255, 0, 0, 255];

fn identity() -> RenderMatrices {
    RenderMatrices {
        projection: matrix_identity(),
        modelview: matrix_identity(),
    }
}

fn red_rect(min_x: f64) -> RectRenderer {
    RectRenderer::new(vec![Rect {
        min: [min_x, -1.0],
        max: [1.0, 1.0],
        depth: 0.0,
        color: Rgba::new(1.0, 0.0, 0.0, 1.0),
    }])
}

fn source<'a>(
    input: FrameInput<'a>,
    layout: &'a TileLayout,
    contained: Viewport,
    floating: bool,
) -> TileSource<'a> {
    let mask = layout
        .tiles()
        .iter()
        .map(|t| !t.viewport.intersect(contained).is_empty())
        .collect();
    TileSource::new(
        input,
        layout,
        LAYOUT,
        CompositeMode::ZBuffer,
        Rgba::TRANSPARENT,
        identity(),
        contained,
        mask,
        false,
        floating,
    )
    .unwrap()
}

fn color(image: &Image, x: usize, y: usize) -> [u8; 4] {
    let i = (y * image.width() + x) * 4;
    let c = &image.color_bytes()[i..i + 4];
    [c[0], c[1], c[2], c[3]]
}

fn two_tiles() -> TileLayout {
    let mut layout = TileLayout::new(2);
    layout.add_tile(Viewport::new(0, 0, 4, 4), 0).unwrap();
    layout.add_tile(Viewport::new(4, 0, 4, 4), 1).unwrap();
    layout
}

#[test]
fn contained_region_inside_tile_is_rendered_once() {
    let layout = TileLayout::single(1, 4, 4).unwrap();
    let mut renderer = red_rect(-1.0);
    let mut scratch = ScratchArena::default();
    let mut src = source(
        FrameInput::Render(&mut renderer),
        &layout,
        Viewport::new(1, 1, 2, 2),
        true,
    );
    let mut out = Image::new(LAYOUT, 1, 1);
    src.tile_image(0, &mut out, &mut scratch).unwrap();
    assert_eq!((out.width(), out.height()), (4, 4));
    assert_eq!(color(&out, 1, 1), RED);
    assert_eq!(color(&out, 2, 2), RED);
    assert_eq!(color(&out, 0, 0), [0; 4]);
    assert_eq!(color(&out, 3, 2), [0; 4]);
    assert_eq!(out.depth()[0], 1.0);

    let sparse = src.compressed_tile_image(0, &mut scratch).unwrap();
    assert_eq!(sparse.active_pixel_count().unwrap(), 4);
    assert_eq!(src.renders(), 1);
    src.recycle(&mut scratch);
}

#[test]
fn uncontained_tile_is_blank_and_not_rendered() {
    let layout = two_tiles();
    let mut renderer = red_rect(-1.0);
    let mut scratch = ScratchArena::default();
    let mut src = source(
        FrameInput::Render(&mut renderer),
        &layout,
        Viewport::new(0, 0, 2, 2),
        true,
    );
    let sparse = src.compressed_tile_image(1, &mut scratch).unwrap();
    assert_eq!(sparse, SparseImage::new(LAYOUT, 4, 4));
    assert_eq!(src.renders(), 0);
}

#[test]
fn floating_viewport_renders_both_tiles_in_one_pass() {
    let layout = two_tiles();
    // Starts at global pixel 2.
    let mut renderer = red_rect(-0.5);
    let mut scratch = ScratchArena::default();
    let mut src = source(
        FrameInput::Render(&mut renderer),
        &layout,
        Viewport::new(2, 0, 4, 4),
        true,
    );
    let mut left = Image::new(LAYOUT, 4, 4);
    let mut right = Image::new(LAYOUT, 4, 4);
    src.tile_image(0, &mut left, &mut scratch).unwrap();
    src.tile_image(1, &mut right, &mut scratch).unwrap();
    assert_eq!(src.renders(), 1);

    assert_eq!(color(&left, 1, 0), [0; 4]);
    assert_eq!(color(&left, 2, 0), RED);
    assert_eq!(color(&left, 3, 3), RED);
    assert_eq!(color(&right, 0, 0), RED);
    assert_eq!(color(&right, 1, 3), RED);
    // Outside the contained region.
    assert_eq!(color(&right, 2, 0), [0; 4]);
}

#[test]
fn without_floating_each_tile_renders() {
    let layout = two_tiles();
    let mut renderer = red_rect(-0.5);
    let mut scratch = ScratchArena::default();
    let mut src = source(
        FrameInput::Render(&mut renderer),
        &layout,
        Viewport::new(2, 0, 4, 4),
        false,
    );
    let mut left = Image::new(LAYOUT, 4, 4);
    let mut right = Image::new(LAYOUT, 4, 4);
    src.tile_image(0, &mut left, &mut scratch).unwrap();
    src.tile_image(1, &mut right, &mut scratch).unwrap();
    assert_eq!(src.renders(), 2);
    assert_eq!(color(&left, 2, 1), RED);
    assert_eq!(color(&right, 1, 1), RED);
    assert_eq!(color(&right, 2, 1), [0; 4]);
}

#[test]
fn prerendered_image_is_cut_into_tiles() {
    let layout = two_tiles();
    let mut global = Image::new(LAYOUT, 8, 4);
    global.clear(Rgba::TRANSPARENT);
    for y in 0..4 {
        for x in 0..8 {
            let i = y * 8 + x;
            global.color_bytes_mut()[i * 4..i * 4 + 4].copy_from_slice(&[x as u8, y as u8, 0, 255]);
            global.depth_mut()[i] = 0.5;
        }
    }
    let mut scratch = ScratchArena::default();
    let mut src = source(
        FrameInput::Prerendered(&global),
        &layout,
        Viewport::new(0, 0, 6, 4),
        true,
    );
    let mut right = Image::new(LAYOUT, 4, 4);
    src.tile_image(1, &mut right, &mut scratch).unwrap();
    assert_eq!(color(&right, 0, 2), [4, 2, 0, 255]);
    assert_eq!(color(&right, 1, 3), [5, 3, 0, 255]);
    assert_eq!(color(&right, 2, 0), [0; 4]);
}

#[test]
fn prerendered_image_must_cover_display() {
    let layout = two_tiles();
    let global = Image::new(LAYOUT, 4, 4);
    let result = TileSource::new(
        FrameInput::Prerendered(&global),
        &layout,
        LAYOUT,
        CompositeMode::ZBuffer,
        Rgba::TRANSPARENT,
        identity(),
        Viewport::new(0, 0, 8, 4),
        vec![true, true],
        false,
        true,
    );
    assert!(result.is_err());
}

#[test]
fn resizing_the_render_buffer_is_rejected() {
    let layout = TileLayout::single(1, 4, 4).unwrap();
    let mut shrink = |_: Viewport, _: &RenderMatrices, _: Rgba, image: &mut Image| -> SortlastResult<()> {
        image.set_dimensions(2, 2);
        Ok(())
    };
    let mut scratch = ScratchArena::default();
    let mut src = source(
        FrameInput::Render(&mut shrink),
        &layout,
        Viewport::new(0, 0, 4, 4),
        true,
    );
    let err = src.compressed_tile_image(0, &mut scratch).unwrap_err();
    assert!(matches!(err, SortlastError::SanityCheck(_)));
}
