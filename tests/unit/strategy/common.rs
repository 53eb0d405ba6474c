use super::*;
use crate::comm::Communicator;
use crate::comm::local::LocalFabric;
use crate::foundation::core::{RenderMatrices, Rgba, Viewport};
use crate::foundation::math::matrix_identity;
use crate::image::codec::{Background, compress_sub_image};
use crate::render::{FrameInput, TileSource};
use crate::session::config::FrameConfig;
use crate::session::scratch::ScratchArena;
use crate::tiles::info::TileInfo;
use crate::tiles::layout::TileLayout;

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];

fn painted(width: usize, pixels: &[(usize, [u8; 4], f32)]) -> Image {
    let config = FrameConfig::default();
    let mut image = Image::new(config.pixel_layout(), width, 1);
    image.clear(Rgba::TRANSPARENT);
    for &(i, color, depth) in pixels {
        image.color_bytes_mut()[i * 4..i * 4 + 4].copy_from_slice(&color);
        image.depth_mut()[i] = depth;
    }
    image
}

fn colors(image: &Image) -> Vec<[u8; 4]> {
    image
        .color_bytes()
        .chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect()
}

/// Run `f` on every rank with a one-tile frame whose pixels come from
/// `images[rank]`.
fn with_frames<T, F>(layout: &TileLayout, images: &[Image], f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&mut Frame<'_>) -> SortlastResult<T> + Sync,
{
    LocalFabric::run(images.len(), |comm| {
        let rank = comm.rank();
        let config = FrameConfig::default();
        let info = TileInfo::from_masks(1, vec![true; images.len()]);
        let mut scratch = ScratchArena::default();
        let source = TileSource::new(
            FrameInput::Prerendered(&images[rank]),
            layout,
            config.pixel_layout(),
            config.composite_mode,
            Rgba::TRANSPARENT,
            RenderMatrices {
                projection: matrix_identity(),
                modelview: matrix_identity(),
            },
            layout.global_viewport(),
            vec![true],
            false,
            false,
        )?;
        let mut frame = Frame {
            comm: &comm,
            config: &config,
            layout,
            pixel_layout: config.pixel_layout(),
            order: None,
            background: Background::plain(Rgba::TRANSPARENT),
            info: Some(&info),
            source,
            scratch: &mut scratch,
            valid: None,
        };
        f(&mut frame)
    })
    .unwrap()
}

#[test]
fn lower_rank_is_in_front_without_order() {
    assert!(src_in_front(None, 1, 3));
    assert!(!src_in_front(None, 3, 1));
    let order = CompositeOrder::new(vec![2, 0, 1], 3).unwrap();
    assert!(src_in_front(Some(&order), 2, 0));
    assert!(!src_in_front(Some(&order), 1, 0));
}

#[test]
fn full_images_meet_at_destination() {
    let layout = TileLayout::single(2, 4, 1).unwrap();
    let images = [
        painted(4, &[(0, RED, 0.2), (1, RED, 0.2)]),
        painted(4, &[(1, GREEN, 0.1), (2, GREEN, 0.1)]),
    ];
    let results = with_frames(&layout, &images, |frame| {
        let mut image = Image::new(frame.pixel_layout, 1, 1);
        let received = render_transfer_full_images(frame, &[0], &mut image)?;
        Ok((received, image))
    });
    let (received, image) = &results[0];
    assert_eq!(*received, 2);
    assert_eq!(colors(image), vec![RED, GREEN, GREEN, [0; 4]]);
    assert_eq!(results[1].0, 0);
}

#[test]
fn sparse_images_meet_at_destination() {
    let layout = TileLayout::single(3, 4, 1).unwrap();
    let images = [
        painted(4, &[(3, RED, 0.5)]),
        painted(4, &[(0, GREEN, 0.5), (3, GREEN, 0.4)]),
        painted(4, &[]),
    ];
    let results = with_frames(&layout, &images, |frame| render_transfer_sparse_images(frame, &[2]));
    assert!(results[0].is_none());
    assert!(results[1].is_none());
    let merged = results[2].as_ref().unwrap();
    let mut out = Image::new(FrameConfig::default().pixel_layout(), 4, 1);
    crate::image::codec::decompress_image(merged, &mut out, Rgba::TRANSPARENT).unwrap();
    assert_eq!(colors(&out), vec![GREEN, [0; 4], [0; 4], GREEN]);
}

#[test]
fn collect_assembles_pieces_in_place() {
    let mut layout = TileLayout::new(3);
    layout.add_tile(Viewport::new(0, 0, 6, 1), 1).unwrap();
    let reference = painted(
        6,
        &[(0, RED, 0.1), (1, GREEN, 0.1), (2, RED, 0.1), (4, GREEN, 0.1), (5, RED, 0.1)],
    );
    let images = vec![reference.clone(), reference.clone(), reference.clone()];
    let results = with_frames(&layout, &images, |frame| {
        let rank = frame.rank();
        let piece = compress_sub_image(&reference, rank * 2, 2, frame.config.composite_mode)?;
        if rank == 1 {
            let mut out = Image::new(frame.pixel_layout, 6, 1);
            single_image_collect(frame, Some(&piece), 1, rank * 2, Some(&mut out))?;
            Ok(Some(out))
        } else {
            single_image_collect(frame, Some(&piece), 1, rank * 2, None)?;
            Ok(None)
        }
    });
    let out = results[1].as_ref().unwrap();
    assert_eq!(colors(out), colors(&reference));
    // One-buffer output drops depth once color is present.
    assert!(out.depth().is_empty());
    assert!(results[0].is_none() && results[2].is_none());
}
