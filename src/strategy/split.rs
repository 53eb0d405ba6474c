//! Give each tile a contiguous block of ranks and cut the tile into one
//! fragment per rank of its block. Every renderer sends each fragment of
//! its tiles straight to the rank owning it.

use crate::comm::{Request, Tag};
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::image::codec::{compress_sub_image, decompress_image};
use crate::image::composite::compressed_composite;
use crate::image::dense::Image;
use crate::image::sparse::SparseImage;
use crate::session::scratch::ScratchSlot;
use crate::strategy::{Frame, ValidPixels};

const IMAGE_DATA_TAG: Tag = 50;
const COLOR_DATA_TAG: Tag = 51;
const DEPTH_DATA_TAG: Tag = 52;

/// Pixels per fragment when `total` pixels are cut into `pieces`.
pub(crate) fn fragment_size(total: usize, pieces: usize) -> usize {
    total.div_ceil(pieces.max(1))
}

/// `tile_groups[t]..tile_groups[t + 1]` are the ranks assigned to tile `t`.
/// Tiles without contributions get no ranks.
pub(crate) fn tile_groups(counts: &[usize], num_processes: usize) -> SortlastResult<Vec<usize>> {
    let total: usize = counts.iter().sum();
    let mut sizes: Vec<usize> = counts
        .iter()
        .map(|&c| (c * num_processes / total.max(1)).max(usize::from(c > 0)))
        .collect();
    let mut allocated: usize = sizes.iter().sum();
    while allocated < num_processes {
        let mut best: Option<(usize, f32)> = None;
        for (tile, &c) in counts.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let ratio = sizes[tile] as f32 / c as f32;
            if best.is_none_or(|(_, r)| ratio < r) {
                best = Some((tile, ratio));
            }
        }
        let (tile, _) = best.ok_or_else(|| SortlastError::sanity("no tile can take another rank"))?;
        sizes[tile] += 1;
        allocated += 1;
    }
    while allocated > num_processes {
        let mut best: Option<(usize, f32)> = None;
        for (tile, &c) in counts.iter().enumerate() {
            if sizes[tile] <= 1 {
                continue;
            }
            let ratio = sizes[tile] as f32 / c as f32;
            if best.is_none_or(|(_, r)| ratio > r) {
                best = Some((tile, ratio));
            }
        }
        let (tile, _) = best.ok_or_else(|| SortlastError::sanity("no tile can give up a rank"))?;
        sizes[tile] -= 1;
        allocated -= 1;
    }
    let mut groups = Vec::with_capacity(counts.len() + 1);
    groups.push(0);
    for size in &sizes {
        let last = groups.last().copied().unwrap_or(0);
        groups.push(last + size);
    }
    Ok(groups)
}

/// `(offset, count)` of fragment `index` of a tile with `total` pixels cut
/// into `pieces`; the last fragments may be short or empty.
fn fragment(total: usize, pieces: usize, index: usize) -> (usize, usize) {
    let size = fragment_size(total, pieces);
    let offset = (index * size).min(total);
    (offset, size.min(total - offset))
}

#[tracing::instrument(level = "debug", skip_all, fields(rank = frame.rank()))]
pub(crate) fn compose(frame: &mut Frame<'_>) -> SortlastResult<Option<Image>> {
    let rank = frame.rank();
    let num_processes = frame.comm.size();
    let info = frame.info()?;
    let displayed = frame.layout.tile_displayed(rank);

    if info.total_image_count() < 1 {
        tracing::debug!("no images rendered");
        return blank_display(frame, displayed);
    }

    let groups = tile_groups(info.contrib_counts(), num_processes)?;
    let my_tile = (0..info.num_tiles())
        .find(|&t| rank < groups[t + 1])
        .ok_or_else(|| SortlastError::sanity(format!("rank {rank} belongs to no tile group")))?;
    let group_size = groups[my_tile + 1] - groups[my_tile];
    let (w, h) = frame.tile_size(my_tile)?;
    let (my_offset, my_count) = fragment(w * h, group_size, rank - groups[my_tile]);
    tracing::debug!(my_tile, my_offset, my_count, "split assignment");

    let comm = frame.comm;
    let mut receives = (0..num_processes)
        .filter(|&node| info.contains(node, my_tile))
        .map(|node| comm.irecv(node, IMAGE_DATA_TAG))
        .collect::<SortlastResult<Vec<Request>>>()?;

    let mut sends = Vec::new();
    let mut full = frame
        .scratch
        .take_image(ScratchSlot::TileImage, frame.pixel_layout, w, h);
    for tile in info.contained_list(rank) {
        frame.source.tile_image(tile, &mut full, frame.scratch)?;
        let total = full.num_pixels();
        let pieces = groups[tile + 1] - groups[tile];
        for (index, node) in (groups[tile]..groups[tile + 1]).enumerate() {
            let (offset, count) = fragment(total, pieces, index);
            tracing::trace!(tile, node, offset, count, "sending fragment");
            let sparse = compress_sub_image(&full, offset, count, frame.config.composite_mode)?;
            sends.push(comm.isend(node, IMAGE_DATA_TAG, sparse.package()?)?);
        }
    }

    let mut piece = frame
        .scratch
        .take_image(ScratchSlot::CollectImage, frame.pixel_layout, my_count, 1);
    let mut first = true;
    for _ in 0..receives.len() {
        let (_, data) = comm.waitany(&mut receives)?;
        let data = data.ok_or_else(|| SortlastError::communication("fragment receive carried no data"))?;
        let incoming = SparseImage::unpackage(&data)?;
        if first {
            decompress_image(&incoming, &mut piece, frame.background.working)?;
            first = false;
        } else {
            compressed_composite(&mut piece, &incoming, true, frame.config.composite_mode)?;
        }
    }
    comm.waitall(&mut sends)?;

    if frame.config.collect_images {
        let result = collect(frame, &mut piece, my_tile, &groups, displayed, full);
        frame.scratch.put_image(ScratchSlot::CollectImage, piece);
        return result;
    }

    if frame.background.needs_correction {
        piece.correct_background(frame.background.true_color);
    }
    full.set_dimensions(w, h);
    full.clear(frame.background.true_color);
    piece.copy_pixels(0, &mut full, my_offset, my_count)?;
    frame.scratch.put_image(ScratchSlot::CollectImage, piece);
    frame.valid = Some(ValidPixels {
        tile: my_tile,
        offset: my_offset,
        count: my_count,
    });
    Ok(Some(full))
}

fn blank_display(frame: &mut Frame<'_>, displayed: Option<usize>) -> SortlastResult<Option<Image>> {
    let Some(tile) = displayed else {
        return Ok(None);
    };
    let (w, h) = frame.tile_size(tile)?;
    let mut image = frame
        .scratch
        .take_image(ScratchSlot::TileImage, frame.pixel_layout, w, h);
    image.clear(frame.background.true_color);
    Ok(Some(image))
}

/// Ship the finished fragment to the display of `my_tile`; the display
/// assembles its tile from every fragment in rank order.
fn collect(
    frame: &mut Frame<'_>,
    piece: &mut Image,
    my_tile: usize,
    groups: &[usize],
    displayed: Option<usize>,
    mut full: Image,
) -> SortlastResult<Option<Image>> {
    let comm = frame.comm;
    piece.adjust_for_output(frame.config.composite_one_buffer);
    if frame.background.needs_correction {
        piece.correct_background(frame.background.true_color);
    }
    let display = frame.layout.tile(my_tile)?.display_rank;
    let has_color = piece.layout().color_size() > 0;
    let has_depth = !piece.depth().is_empty();
    let mut sends = Vec::with_capacity(2);
    if has_color {
        sends.push(comm.isend(display, COLOR_DATA_TAG, piece.color_bytes().to_vec())?);
    }
    if has_depth {
        let depth = piece.depth().iter().flat_map(|d| d.to_le_bytes()).collect();
        sends.push(comm.isend(display, DEPTH_DATA_TAG, depth)?);
    }

    let result = match displayed {
        None => {
            frame.scratch.put_image(ScratchSlot::TileImage, full);
            None
        }
        Some(tile) => {
            let (w, h) = frame.tile_size(tile)?;
            full.set_layout(piece.layout());
            full.set_dimensions(w, h);
            let pieces = groups[tile + 1] - groups[tile];
            if pieces == 0 {
                full.clear(frame.background.true_color);
            } else {
                let color_size = full.layout().color_size();
                for (index, node) in (groups[tile]..groups[tile + 1]).enumerate() {
                    let (offset, count) = fragment(w * h, pieces, index);
                    if has_color {
                        let bytes = comm.recv(node, COLOR_DATA_TAG)?;
                        if bytes.len() != count * color_size {
                            return Err(SortlastError::sanity(format!(
                                "color fragment from rank {node} has {} bytes, expected {}",
                                bytes.len(),
                                count * color_size
                            )));
                        }
                        full.color_bytes_mut()[offset * color_size..(offset + count) * color_size]
                            .copy_from_slice(&bytes);
                    }
                    if has_depth {
                        let bytes = comm.recv(node, DEPTH_DATA_TAG)?;
                        if bytes.len() != count * 4 {
                            return Err(SortlastError::sanity(format!(
                                "depth fragment from rank {node} has {} bytes, expected {}",
                                bytes.len(),
                                count * 4
                            )));
                        }
                        for (d, raw) in full.depth_mut()[offset..offset + count]
                            .iter_mut()
                            .zip(bytes.chunks_exact(4))
                        {
                            *d = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                        }
                    }
                }
            }
            Some(full)
        }
    };
    comm.waitall(&mut sends)?;
    Ok(result)
}

#[cfg(test)]
#[path = "../../tests/unit/strategy/split.rs"]
mod tests;
