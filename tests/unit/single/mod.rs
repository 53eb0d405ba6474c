use super::*;
use crate::comm::local::{LocalFabric, SendMode};
use crate::foundation::core::Rgba;
use crate::image::codec::{compress_image, decompress_sub_image};
use crate::image::dense::Image;
use crate::image::format::{ColorFormat, DepthFormat, PixelLayout};
use crate::image::pixel::encode_color;

const WIDTH: usize = 13;
const HEIGHT: usize = 7;

const ALL: [SingleImageStrategy; 6] = [
    SingleImageStrategy::Radixkr,
    SingleImageStrategy::Radixk,
    SingleImageStrategy::Bswap,
    SingleImageStrategy::BswapFolding,
    SingleImageStrategy::Tree,
    SingleImageStrategy::Direct,
];

fn z_layout() -> PixelLayout {
    PixelLayout::new(ColorFormat::Rgba8, DepthFormat::F32)
}

fn blend_layout() -> PixelLayout {
    PixelLayout::new(ColorFormat::RgbaF32, DepthFormat::None)
}

/// Depths are unique per pixel across ranks, so the nearest fragment is
/// unambiguous.
fn z_image(rank: usize) -> Image {
    let mut img = Image::new(z_layout(), WIDTH, HEIGHT);
    img.clear(Rgba::TRANSPARENT);
    for i in 0..img.num_pixels() {
        if (i + rank) % 3 == 0 {
            continue;
        }
        let depth = (((i * 7 + rank * 3) % 64) * 16 + rank) as f32 / 2048.0;
        img.depth_mut()[i] = depth;
        img.color_bytes_mut()[i * 4..i * 4 + 4].copy_from_slice(&[rank as u8 * 10 + 5, i as u8, 0, 255]);
    }
    img
}

fn blend_image(rank: usize) -> Image {
    let mut img = Image::new(blend_layout(), WIDTH, HEIGHT);
    img.clear(Rgba::TRANSPARENT);
    for i in 0..img.num_pixels() {
        if (i + rank) % 4 == 0 {
            continue;
        }
        let a = 0.25 + 0.05 * (rank % 5) as f32;
        let color = Rgba::new(a * 0.5, a * (i % 3) as f32 / 3.0, a * 0.25, a);
        encode_color(ColorFormat::RgbaF32, color, &mut img.color_bytes_mut()[i * 16..i * 16 + 16]);
    }
    img
}

fn ctx(comm: &dyn Communicator, strategy: SingleImageStrategy, mode: CompositeMode, interlace: bool) -> ComposeCtx<'_> {
    ComposeCtx {
        comm,
        strategy,
        mode,
        magic_k: 2,
        max_image_split: 512,
        interlace,
    }
}

/// Run one compose over `group` and stitch every returned piece back into a
/// full image. Fails if pieces overlap or leave gaps.
fn run_compose(
    send_mode: SendMode,
    size: usize,
    group: &[usize],
    image_dest: usize,
    strategy: SingleImageStrategy,
    mode: CompositeMode,
    interlace: bool,
    make: fn(usize) -> Image,
) -> Image {
    let pieces = LocalFabric::run_with_mode(size, send_mode, |comm| {
        if !group.contains(&comm.rank()) {
            return Ok(None);
        }
        let input = compress_image(&make(comm.rank()), mode)?;
        let (piece, offset) = compose(&ctx(&comm, strategy, mode, interlace), group, image_dest, input)?;
        Ok(Some((piece.package()?, offset)))
    })
    .unwrap();

    let layout = make(0).layout();
    let mut full = Image::new(layout, WIDTH, HEIGHT);
    full.clear(Rgba::TRANSPARENT);
    let mut covered = 0;
    for (bytes, offset) in pieces.into_iter().flatten() {
        let piece = SparseImage::unpackage(&bytes).unwrap();
        if piece.num_pixels() == 0 {
            continue;
        }
        covered += piece.num_pixels();
        let mut one = Image::new(layout, WIDTH, HEIGHT);
        one.clear(Rgba::TRANSPARENT);
        decompress_sub_image(&piece, offset, &mut one, Rgba::TRANSPARENT).unwrap();
        for i in offset..offset + piece.num_pixels() {
            let mut px = [0u8; 20];
            one.read_packed(i, &mut px);
            full.write_packed(i, &px);
        }
    }
    assert_eq!(covered, WIDTH * HEIGHT, "{strategy:?} pieces do not tile the image");
    full
}

fn z_reference(group: &[usize]) -> Image {
    let images: Vec<Image> = group.iter().map(|&r| z_image(r)).collect();
    let mut out = Image::new(z_layout(), WIDTH, HEIGHT);
    out.clear(Rgba::TRANSPARENT);
    for i in 0..out.num_pixels() {
        let nearest = images
            .iter()
            .filter(|img| img.depth()[i] < 1.0)
            .min_by(|a, b| a.depth()[i].total_cmp(&b.depth()[i]));
        if let Some(img) = nearest {
            let mut px = [0u8; 20];
            img.read_packed(i, &mut px);
            out.write_packed(i, &px);
        }
    }
    out
}

fn blend_reference(group: &[usize]) -> Vec<[f32; 4]> {
    let images: Vec<Image> = group.iter().map(|&r| blend_image(r)).collect();
    (0..WIDTH * HEIGHT)
        .map(|i| {
            images.iter().fold([0.0f32; 4], |acc, img| {
                let back = img.pixel_rgba(i).unwrap();
                let t = 1.0 - acc[3];
                [0, 1, 2, 3].map(|c| acc[c] + back[c] * t)
            })
        })
        .collect()
}

#[test]
fn z_buffer_compose_matches_reference_for_every_sub_strategy() {
    for size in [1, 2, 3, 4, 5, 6, 7, 8] {
        let group: Vec<usize> = (0..size).collect();
        let expected = z_reference(&group);
        for strategy in ALL {
            for interlace in [false, true] {
                let got = run_compose(SendMode::Buffered, size, &group, size / 2, strategy, CompositeMode::ZBuffer, interlace, z_image);
                assert_eq!(got.color_bytes(), expected.color_bytes(), "{strategy:?} size={size} interlace={interlace}");
                assert_eq!(got.depth(), expected.depth(), "{strategy:?} size={size} interlace={interlace}");
            }
        }
    }
}

#[test]
fn exchanging_strategies_need_no_send_buffering() {
    for size in [3, 4, 6] {
        let group: Vec<usize> = (0..size).rev().collect();
        let expected = z_reference(&group);
        for strategy in [
            SingleImageStrategy::Radixkr,
            SingleImageStrategy::Radixk,
            SingleImageStrategy::Bswap,
            SingleImageStrategy::BswapFolding,
        ] {
            let got = run_compose(SendMode::Rendezvous, size, &group, 0, strategy, CompositeMode::ZBuffer, true, z_image);
            assert_eq!(got.color_bytes(), expected.color_bytes(), "{strategy:?} size={size}");
            assert_eq!(got.depth(), expected.depth(), "{strategy:?} size={size}");
        }
    }
}

#[test]
fn blending_follows_group_order() {
    let group = [3, 0, 4, 1, 2];
    let expected = blend_reference(&group);
    for strategy in ALL {
        let got = run_compose(SendMode::Buffered, 5, &group, 1, strategy, CompositeMode::Blend, true, blend_image);
        for (i, want) in expected.iter().enumerate() {
            let px = got.pixel_rgba(i).unwrap();
            for c in 0..4 {
                assert!((px[c] - want[c]).abs() < 1e-4, "{strategy:?} pixel {i}: {px:?} != {want:?}");
            }
        }
    }
}

#[test]
fn gathering_strategies_deliver_to_the_destination() {
    for strategy in [SingleImageStrategy::Tree, SingleImageStrategy::Direct] {
        let sizes = LocalFabric::run(5, |comm| {
            let group = [4, 2, 0, 1, 3];
            let input = compress_image(&z_image(comm.rank()), CompositeMode::ZBuffer)?;
            let (piece, offset) = compose(&ctx(&comm, strategy, CompositeMode::ZBuffer, false), &group, 3, input)?;
            Ok((piece.num_pixels(), offset))
        })
        .unwrap();
        for (rank, (pixels, offset)) in sizes.into_iter().enumerate() {
            assert_eq!(offset, 0);
            let want = if rank == 1 { WIDTH * HEIGHT } else { 0 };
            assert_eq!(pixels, want, "{strategy:?} rank {rank}");
        }
    }
}

#[test]
fn single_member_group_returns_input() {
    let out = LocalFabric::run(2, |comm| {
        let input = compress_image(&z_image(comm.rank()), CompositeMode::ZBuffer)?;
        let expected = input.clone();
        let group = [comm.rank()];
        let (piece, offset) = compose(
            &ctx(&comm, SingleImageStrategy::Radixkr, CompositeMode::ZBuffer, true),
            &group,
            0,
            input,
        )?;
        Ok(piece == expected && offset == 0)
    })
    .unwrap();
    assert!(out.into_iter().all(|same| same));
}

#[test]
fn rejects_bad_destination_and_foreign_rank() {
    let results = LocalFabric::run(2, |comm| {
        let input = compress_image(&z_image(0), CompositeMode::ZBuffer)?;
        let c = ctx(&comm, SingleImageStrategy::Tree, CompositeMode::ZBuffer, false);
        let bad_dest = compose(&c, &[0, 1], 2, input.clone()).is_err();
        let foreign = compose(&c, &[5], 0, input).is_err();
        Ok(bad_dest && foreign)
    })
    .unwrap();
    assert_eq!(results, vec![true, true]);
}
