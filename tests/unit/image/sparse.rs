use super::*;
use crate::foundation::core::Rgba;
use crate::image::codec::{compress_image, decompress_image, decompress_sub_image};
use crate::image::dense::Image;
use crate::image::format::CompositeMode;

fn layout() -> PixelLayout {
    PixelLayout::new(ColorFormat::Rgba8, DepthFormat::F32)
}

/// Deterministic image with scattered runs of active pixels.
fn patterned_image(width: usize, height: usize) -> Image {
    let mut img = Image::new(layout(), width, height);
    let n = width * height;
    for i in 0..n {
        let active = (i * 7 + i / 5) % 3 != 0;
        img.depth_mut()[i] = if active { (i as f32) / (n as f32 + 1.0) } else { 1.0 };
        let c = &mut img.color_bytes_mut()[i * 4..i * 4 + 4];
        c.copy_from_slice(&[(i % 251) as u8, (i / 251) as u8, 7, 255]);
    }
    img
}

fn background_normalized(img: &Image) -> Image {
    let mut out = img.clone();
    for i in 0..out.num_pixels() {
        if out.depth()[i] >= 1.0 {
            out.color_bytes_mut()[i * 4..i * 4 + 4].copy_from_slice(&[0, 0, 0, 0]);
        }
    }
    out
}

#[test]
fn new_image_is_one_inactive_run() {
    let img = SparseImage::new(layout(), 5, 3);
    assert_eq!(img.stream_len(), RUN_LENGTH_SIZE);
    assert_eq!(img.active_pixel_count().unwrap(), 0);

    let empty = SparseImage::new(layout(), 0, 0);
    assert_eq!(empty.num_pixels(), 0);
    assert_eq!(empty.active_pixel_count().unwrap(), 0);
}

#[test]
fn package_round_trips_and_validates() {
    let sparse = compress_image(&patterned_image(9, 4), CompositeMode::ZBuffer).unwrap();
    let wire = sparse.package().unwrap();
    assert_eq!(wire.len(), PACKAGE_HEADER_SIZE + sparse.stream_len());
    assert_eq!(SparseImage::unpackage(&wire).unwrap(), sparse);

    let mut bad_magic = wire.clone();
    bad_magic[0] ^= 0xff;
    assert!(matches!(
        SparseImage::unpackage(&bad_magic),
        Err(SortlastError::InvalidValue(_))
    ));
    assert!(SparseImage::unpackage(&wire[..wire.len() - 1]).is_err());
    assert!(SparseImage::unpackage(&wire[..4]).is_err());
}

#[test]
fn unpackage_rejects_dimensions_that_overflow() {
    let sparse = compress_image(&patterned_image(3, 2), CompositeMode::ZBuffer).unwrap();
    let mut wire = sparse.package().unwrap();
    wire[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
    wire[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
    assert!(matches!(
        SparseImage::unpackage(&wire),
        Err(SortlastError::SanityCheck(_))
    ));
}

#[test]
fn copy_pixels_extracts_subrange() {
    let dense = patterned_image(8, 8);
    let sparse = compress_image(&dense, CompositeMode::ZBuffer).unwrap();
    let piece = sparse.copy_pixels(13, 20).unwrap();
    assert_eq!((piece.width(), piece.height()), (20, 1));

    let mut out = Image::new(layout(), 8, 8);
    out.clear(Rgba::TRANSPARENT);
    decompress_sub_image(&piece, 13, &mut out, Rgba::TRANSPARENT).unwrap();
    let expected = background_normalized(&dense);
    assert_eq!(&out.depth()[13..33], &expected.depth()[13..33]);
    assert_eq!(&out.color_bytes()[13 * 4..33 * 4], &expected.color_bytes()[13 * 4..33 * 4]);

    let whole = sparse.copy_pixels(0, 64).unwrap();
    assert_eq!((whole.width(), whole.height()), (8, 8));
    assert!(sparse.copy_pixels(60, 5).is_err());
}

fn assert_split_reconstructs(partitions: usize) {
    let dense = patterned_image(17, 11);
    let sparse = compress_image(&dense, CompositeMode::ZBuffer).unwrap();
    let pieces = sparse.split(0, partitions, partitions).unwrap();
    assert_eq!(pieces.len(), partitions);

    let mut out = Image::new(layout(), 17, 11);
    let mut covered = 0;
    for piece in &pieces {
        assert_eq!(piece.offset, covered);
        covered += piece.image.num_pixels();
        decompress_sub_image(&piece.image, piece.offset, &mut out, Rgba::TRANSPARENT).unwrap();
    }
    assert_eq!(covered, 17 * 11);
    assert_eq!(out, background_normalized(&dense));
}

#[test]
fn split_into_seven_reconstructs() {
    assert_split_reconstructs(7);
}

#[test]
fn split_into_thirteen_reconstructs() {
    assert_split_reconstructs(13);
}

#[test]
fn recursive_splits_match_direct_split() {
    let sparse = compress_image(&patterned_image(13, 7), CompositeMode::ZBuffer).unwrap();
    let direct = sparse.split(0, 4, 4).unwrap();
    let halves = sparse.split(0, 2, 4).unwrap();
    let mut recursive = Vec::new();
    for half in &halves {
        recursive.extend(half.image.split(half.offset, 2, 2).unwrap());
    }
    assert_eq!(direct, recursive);
}

#[test]
fn split_rejects_single_partition() {
    let sparse = SparseImage::new(layout(), 4, 4);
    assert!(matches!(sparse.split(0, 1, 1), Err(SortlastError::InvalidValue(_))));
}

#[test]
fn interlace_then_split_reconstructs_via_offsets() {
    let dense = patterned_image(23, 9);
    let n = dense.num_pixels();
    let sparse = compress_image(&dense, CompositeMode::ZBuffer).unwrap();
    for partitions in [2usize, 3, 8, 13] {
        let interlaced = sparse.interlace(partitions).unwrap();
        assert_eq!(interlaced.num_pixels(), n);
        let pieces = interlaced.split(0, partitions, partitions).unwrap();

        let mut out = Image::new(layout(), 23, 9);
        for (idx, piece) in pieces.iter().enumerate() {
            let offset = SparseImage::interlace_offset(idx, partitions, n).unwrap();
            decompress_sub_image(&piece.image, offset, &mut out, Rgba::TRANSPARENT).unwrap();
        }
        assert_eq!(out, background_normalized(&dense), "partitions = {partitions}");
    }
}

#[test]
fn interlace_offset_rejects_out_of_range() {
    assert!(SparseImage::interlace_offset(4, 4, 100).is_err());
    assert_eq!(SparseImage::interlace_offset(0, 4, 100).unwrap(), 0);
}

#[test]
fn worst_case_alternating_image_fits_capacity() {
    for layout in [
        PixelLayout::new(ColorFormat::Rgba8, DepthFormat::F32),
        PixelLayout::new(ColorFormat::None, DepthFormat::F32),
        PixelLayout::new(ColorFormat::RgbaF32, DepthFormat::F32),
    ] {
        let (w, h) = (31, 17);
        let mut img = Image::new(layout, w, h);
        for (i, d) in img.depth_mut().iter_mut().enumerate() {
            *d = if i % 2 == 0 { 0.5 } else { 1.0 };
        }
        let sparse = compress_image(&img, CompositeMode::ZBuffer).unwrap();
        let pixels = w * h;
        assert!(sparse.stream_len() <= SparseImage::max_stream_len(layout, pixels));
        assert!(sparse.stream_len() >= layout.pixel_size() * (pixels / 2));
        assert!(sparse.package().unwrap().len() <= SparseImage::buffer_size(layout, w, h));

        let mut back = Image::new(layout, 0, 0);
        decompress_image(&sparse, &mut back, Rgba::TRANSPARENT).unwrap();
        assert_eq!(back.depth(), img.depth());
    }
}

#[test]
fn partition_size_bound_covers_pieces() {
    let sparse = compress_image(&patterned_image(10, 10), CompositeMode::ZBuffer).unwrap();
    let bound = SparseImage::split_partition_num_pixels(100, 3, 3);
    for piece in sparse.split(0, 3, 3).unwrap() {
        assert!(piece.image.num_pixels() <= bound);
    }
}
