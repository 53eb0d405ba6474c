use super::*;
use crate::image::format::{ColorFormat, DepthFormat};

const LAYOUT: PixelLayout = PixelLayout::new(ColorFormat::Rgba8, DepthFormat::F32);

#[test]
fn take_after_put_is_a_hit_with_new_dimensions() {
    let mut arena = ScratchArena::default();
    let img = arena.take_image(ScratchSlot::TileImage, LAYOUT, 8, 8);
    arena.put_image(ScratchSlot::TileImage, img);
    assert_eq!(arena.stats().retained_bytes, 8 * 8 * 8);

    let img = arena.take_image(ScratchSlot::TileImage, LAYOUT, 4, 2);
    assert_eq!((img.width(), img.height()), (4, 2));
    assert_eq!(img.color_bytes().len(), 4 * 2 * 4);

    let st = arena.stats();
    assert_eq!(st.hits, 1);
    assert_eq!(st.misses, 1);
    assert_eq!(st.retained_bytes, 0);
}

#[test]
fn slots_are_independent() {
    let mut arena = ScratchArena::default();
    let img = arena.take_image(ScratchSlot::TileImage, LAYOUT, 2, 2);
    arena.put_image(ScratchSlot::TileImage, img);
    let _ = arena.take_image(ScratchSlot::CollectImage, LAYOUT, 2, 2);
    assert_eq!(arena.stats().misses, 2);
}

#[test]
fn take_image_switches_layout() {
    let mut arena = ScratchArena::default();
    let img = arena.take_image(ScratchSlot::RenderBuffer, LAYOUT, 3, 3);
    arena.put_image(ScratchSlot::RenderBuffer, img);
    let blend = PixelLayout::new(ColorFormat::RgbaF32, DepthFormat::None);
    let img = arena.take_image(ScratchSlot::RenderBuffer, blend, 3, 3);
    assert_eq!(img.layout(), blend);
    assert!(img.depth().is_empty());
    assert_eq!(img.color_bytes().len(), 9 * 16);
}

#[test]
fn byte_cap_drops_returned_buffers() {
    let mut arena = ScratchArena::new(ScratchOpts {
        max_retained_bytes: 16,
    });
    let img = arena.take_image(ScratchSlot::TileImage, LAYOUT, 8, 8);
    arena.put_image(ScratchSlot::TileImage, img);
    let st = arena.stats();
    assert_eq!(st.retained_bytes, 0);
    assert_eq!(st.dropped_on_release, 1);
}

#[test]
fn taken_sparse_is_cleared() {
    let mut arena = ScratchArena::default();
    let s = arena.take_sparse(ScratchSlot::WorkingSparse, LAYOUT, 5, 3);
    assert_eq!(s.active_pixel_count().unwrap(), 0);
    assert_eq!(s.num_pixels(), 15);
    arena.put_sparse(ScratchSlot::WorkingSparse, s);

    let s = arena.take_sparse(ScratchSlot::WorkingSparse, LAYOUT, 2, 2);
    assert_eq!(s.num_pixels(), 4);
    assert_eq!(s, SparseImage::new(LAYOUT, 2, 2));
    assert_eq!(arena.stats().hits, 1);
}
