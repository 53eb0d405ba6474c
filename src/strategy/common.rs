//! Building blocks shared by the strategies: moving rendered tiles to the
//! ranks that composite them and gathering finished pieces at a display.

use std::cell::RefCell;

use crate::comm::{decode_words, encode_words};
use crate::foundation::core::to_u32;
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::image::codec::{decompress_image, decompress_sub_image_correct_background};
use crate::image::composite::{
    compressed_composite, compressed_compressed_composite, compressed_compressed_composite_into,
};
use crate::image::dense::Image;
use crate::image::sparse::SparseImage;
use crate::schedule::large_messages::exchange_large_messages;
use crate::session::config::CompositeOrder;
use crate::session::scratch::ScratchSlot;
use crate::strategy::Frame;

/// Whether `src` is drawn in front of `rank`. Unordered compositing treats
/// lower ranks as nearer; only blending can tell the difference.
pub(crate) fn src_in_front(order: Option<&CompositeOrder>, src: usize, rank: usize) -> bool {
    order.map_or(src < rank, |o| o.in_front(src, rank))
}

/// Render every contained tile and send it to `tile_image_dest[tile]`;
/// whatever arrives here is composited into `image` as a dense tile.
/// Returns the number of images composited.
pub(crate) fn render_transfer_full_images(
    frame: &mut Frame<'_>,
    tile_image_dest: &[usize],
    image: &mut Image,
) -> SortlastResult<usize> {
    let rank = frame.rank();
    let contained = frame.info()?.contained_list(rank);
    let destinations = contained
        .iter()
        .map(|&t| {
            tile_image_dest
                .get(t)
                .copied()
                .ok_or_else(|| SortlastError::sanity(format!("no destination for tile {t}")))
        })
        .collect::<SortlastResult<Vec<usize>>>()?;
    let max_size = SparseImage::buffer_size(
        frame.pixel_layout,
        frame.layout.max_width(),
        frame.layout.max_height(),
    );

    let comm = frame.comm;
    let order = frame.order;
    let mode = frame.config.composite_mode;
    let working_bg = frame.background.working;
    let source = &mut frame.source;
    let scratch = &mut *frame.scratch;
    let image = RefCell::new(image);
    let mut first = true;
    let mut received = 0;

    exchange_large_messages(
        comm,
        &destinations,
        order,
        max_size,
        |id, dest| {
            let tile = contained[id];
            if dest == rank {
                tracing::debug!(tile, "keeping own tile image");
                let mut img = image.borrow_mut();
                source.tile_image(tile, &mut img, scratch)?;
                return Ok(Vec::new());
            }
            tracing::debug!(tile, dest, "sending tile image");
            let sparse = source.compressed_tile_image(tile, scratch)?;
            let packed = sparse.package();
            scratch.put_sparse(ScratchSlot::WorkingSparse, sparse);
            packed
        },
        |data, src| {
            let mut img = image.borrow_mut();
            match data {
                None => {
                    if !first {
                        return Err(SortlastError::sanity(
                            "local tile image must be handled before any received image",
                        ));
                    }
                }
                Some(bytes) => {
                    let incoming = SparseImage::unpackage(&bytes)?;
                    if first {
                        decompress_image(&incoming, &mut img, working_bg)?;
                    } else {
                        let on_top = src_in_front(order, src, rank);
                        compressed_composite(&mut img, &incoming, on_top, mode)?;
                    }
                }
            }
            first = false;
            received += 1;
            Ok(())
        },
    )?;
    Ok(received)
}

/// Like [`render_transfer_full_images`] but keeps everything sparse. Returns
/// `None` when no image was addressed here.
pub(crate) fn render_transfer_sparse_images(
    frame: &mut Frame<'_>,
    tile_image_dest: &[usize],
) -> SortlastResult<Option<SparseImage>> {
    let rank = frame.rank();
    let contained = frame.info()?.contained_list(rank);
    let destinations = contained
        .iter()
        .map(|&t| {
            tile_image_dest
                .get(t)
                .copied()
                .ok_or_else(|| SortlastError::sanity(format!("no destination for tile {t}")))
        })
        .collect::<SortlastResult<Vec<usize>>>()?;
    let max_size = SparseImage::buffer_size(
        frame.pixel_layout,
        frame.layout.max_width(),
        frame.layout.max_height(),
    );

    let comm = frame.comm;
    let order = frame.order;
    let mode = frame.config.composite_mode;
    let layout = frame.pixel_layout;
    let source = &mut frame.source;
    let scratch = &mut *frame.scratch;
    let working: RefCell<Option<SparseImage>> = RefCell::new(None);
    let mut spare = scratch
        .take_sparse(ScratchSlot::SpareSparse, layout, 0, 0)
        .into_stream();

    exchange_large_messages(
        comm,
        &destinations,
        order,
        max_size,
        |id, dest| {
            let tile = contained[id];
            let sparse = source.compressed_tile_image(tile, scratch)?;
            if dest == rank {
                tracing::debug!(tile, "keeping own sparse tile");
                *working.borrow_mut() = Some(sparse);
                return Ok(Vec::new());
            }
            tracing::debug!(tile, dest, "sending sparse tile");
            let packed = sparse.package();
            scratch.put_sparse(ScratchSlot::WorkingSparse, sparse);
            packed
        },
        |data, src| {
            let Some(bytes) = data else {
                return Ok(());
            };
            let incoming = SparseImage::unpackage(&bytes)?;
            let mut slot = working.borrow_mut();
            let merged = match slot.take() {
                None => incoming,
                Some(current) if src_in_front(order, src, rank) => {
                    compressed_compressed_composite(&incoming, &current, mode)?
                }
                Some(mut current) => {
                    compressed_compressed_composite_into(&mut current, &incoming, mode, &mut spare)?;
                    current
                }
            };
            *slot = Some(merged);
            Ok(())
        },
    )?;
    scratch.put_sparse(
        ScratchSlot::SpareSparse,
        SparseImage::from_stream(layout, 0, 0, spare),
    );
    Ok(working.into_inner())
}

/// Gather the pieces of one tile at `dest`. Every rank calls this for the
/// tile, passing its piece (if any) and where the piece starts. On `dest`,
/// `result` must be sized to the tile; it receives final pixels laid out for
/// output.
pub(crate) fn single_image_collect(
    frame: &mut Frame<'_>,
    piece: Option<&SparseImage>,
    dest: usize,
    piece_offset: usize,
    result: Option<&mut Image>,
) -> SortlastResult<()> {
    let comm = frame.comm;
    let rank = comm.rank();
    let piece_size = piece.map_or(0, SparseImage::num_pixels);
    let header = encode_words(&[
        to_u32(piece_offset, "piece offset")?,
        to_u32(piece_size, "piece size")?,
    ]);
    let headers = comm.gather(&header, dest)?;

    let one_buffer = frame.config.composite_one_buffer;
    let mut payload = Vec::new();
    if rank != dest {
        if let Some(piece) = piece.filter(|p| p.num_pixels() > 0) {
            let mut pixels = Image::new(frame.pixel_layout, piece_size, 1);
            decompress_sub_image_correct_background(piece, 0, &mut pixels, &frame.background)?;
            pixels.adjust_for_output(one_buffer);
            payload.extend_from_slice(pixels.color_bytes());
            payload.extend(pixels.depth().iter().flat_map(|d| d.to_le_bytes()));
        }
    }
    let gathered = comm.gatherv(&payload, dest)?;

    if rank != dest {
        return Ok(());
    }
    let (Some(result), Some(headers), Some(gathered)) = (result, headers, gathered) else {
        return Err(SortlastError::sanity("display rank has nothing to collect into"));
    };
    if let Some(piece) = piece.filter(|p| p.num_pixels() > 0) {
        decompress_sub_image_correct_background(piece, piece_offset, result, &frame.background)?;
    }
    result.adjust_for_output(one_buffer);

    let color_size = result.layout().color_size();
    let has_depth = !result.depth().is_empty();
    let depth_size = if has_depth { 4 } else { 0 };
    for (src, (header, bytes)) in headers.iter().zip(&gathered).enumerate() {
        if src == rank {
            continue;
        }
        let words = decode_words(header)?;
        let [offset, size] = words[..] else {
            return Err(SortlastError::sanity("malformed collect header"));
        };
        let (offset, size) = (offset as usize, size as usize);
        if size == 0 {
            continue;
        }
        if offset + size > result.num_pixels() {
            return Err(SortlastError::sanity(format!(
                "piece of rank {src} ({size} pixels at {offset}) exceeds the tile"
            )));
        }
        if bytes.len() != size * (color_size + depth_size) {
            return Err(SortlastError::sanity(format!(
                "piece of rank {src} has {} bytes, expected {}",
                bytes.len(),
                size * (color_size + depth_size)
            )));
        }
        let (color, depth) = bytes.split_at(size * color_size);
        result.color_bytes_mut()[offset * color_size..(offset + size) * color_size]
            .copy_from_slice(color);
        if has_depth {
            for (d, raw) in result.depth_mut()[offset..offset + size]
                .iter_mut()
                .zip(depth.chunks_exact(4))
            {
                *d = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/strategy/common.rs"]
mod tests;
