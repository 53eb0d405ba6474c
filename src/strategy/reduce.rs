//! Split the ranks into one group per tile, sized by how many images each
//! tile receives, then composite every tile inside its group.

use crate::foundation::error::{SortlastError, SortlastResult};
use crate::image::codec::decompress_sub_image_correct_background;
use crate::image::dense::Image;
use crate::image::sparse::SparseImage;
use crate::session::config::CompositeOrder;
use crate::session::scratch::ScratchSlot;
use crate::single;
use crate::strategy::common::{render_transfer_sparse_images, single_image_collect};
use crate::strategy::{Frame, ValidPixels};
use crate::tiles::info::TileInfo;

/// Who composites what, as seen from one rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Delegation {
    /// Rank each of this rank's tile images goes to, indexed by tile.
    /// Only entries for contained tiles are meaningful.
    pub(crate) tile_image_dest: Vec<usize>,
    /// Tile this rank helps composite.
    pub(crate) compose_tile: Option<usize>,
    /// Ranks compositing `compose_tile`, in composite order.
    pub(crate) compose_group: Vec<usize>,
    /// Position of the tile's display rank in `compose_group`.
    pub(crate) group_image_dest: usize,
}

/// Ranks per tile: proportional to contributions, at least one for a tile
/// with any image, never more than the tile has images.
fn procs_per_tile(counts: &[usize], num_processes: usize, total: usize) -> Vec<usize> {
    let mut num_proc: Vec<usize> = counts
        .iter()
        .map(|&c| {
            let allocate = c * num_processes / total;
            allocate.max(usize::from(c > 0)).min(c)
        })
        .collect();
    let mut pcount: usize = num_proc.iter().sum();
    let ratio = |t: usize, n: &[usize]| counts[t] as f32 / n[t] as f32;

    while pcount < num_processes {
        let mut max = 0;
        for tile in 1..counts.len() {
            if num_proc[tile] < counts[tile]
                && (num_proc[max] == counts[max] || ratio(max, &num_proc) < ratio(tile, &num_proc))
            {
                max = tile;
            }
        }
        if num_proc[max] < counts[max] {
            num_proc[max] += 1;
            pcount += 1;
        } else {
            break;
        }
    }
    while pcount > num_processes {
        let mut min = 0;
        for tile in 1..counts.len() {
            if num_proc[tile] > 1
                && (num_proc[min] < 2 || ratio(min, &num_proc) > ratio(tile, &num_proc))
            {
                min = tile;
            }
        }
        num_proc[min] -= 1;
        pcount -= 1;
    }
    num_proc
}

/// Assign ranks to tile groups and decide where each rendered tile goes.
pub(crate) fn delegate(
    info: &TileInfo,
    display_nodes: &[usize],
    order: Option<&CompositeOrder>,
    num_processes: usize,
    rank: usize,
) -> SortlastResult<Delegation> {
    let num_tiles = info.num_tiles();
    let total = info.total_image_count();
    if total < 1 {
        tracing::debug!("no rank is drawing");
        return Ok(Delegation {
            tile_image_dest: vec![0; num_tiles],
            ..Delegation::default()
        });
    }
    let counts = info.contrib_counts();
    let num_proc = procs_per_tile(counts, num_processes, total);

    let mut assignment: Vec<Option<usize>> = vec![None; num_processes];
    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); num_tiles];
    let assign = |node: usize, tile: usize, assignment: &mut [Option<usize>], groups: &mut [Vec<usize>]| {
        assignment[node] = Some(tile);
        groups[tile].push(node);
    };

    for (tile, &display) in display_nodes.iter().enumerate() {
        if counts[tile] > 0 {
            assign(display, tile, &mut assignment, &mut groups);
        }
    }
    for node in 0..num_processes {
        if assignment[node].is_some() {
            continue;
        }
        let candidate = (0..num_tiles).find(|&t| info.contains(node, t) && groups[t].len() < num_proc[t]);
        if let Some(tile) = candidate {
            assign(node, tile, &mut assignment, &mut groups);
        }
    }
    let mut node = 0;
    for tile in 0..num_tiles {
        while groups[tile].len() < num_proc[tile] {
            while assignment.get(node).is_some_and(Option::is_some) {
                node += 1;
            }
            if node >= num_processes {
                return Err(SortlastError::sanity("ran out of ranks while assigning tile groups"));
            }
            assign(node, tile, &mut assignment, &mut groups);
        }
    }

    let mut tile_image_dest = vec![0; num_tiles];
    let mut group_image_dest = 0;
    for tile in 0..num_tiles {
        let mine = assignment[rank] == Some(tile);
        if !mine && !info.contains(rank, tile) {
            continue;
        }
        let group = &mut groups[tile];
        match order {
            None => {
                if mine && info.contains(rank, tile) {
                    tile_image_dest[tile] = rank;
                }
                let mut rnode: Option<usize> = None;
                let mut first_loop = true;
                for snode in (0..num_processes).filter(|&s| info.contains(s, tile)) {
                    if assignment[snode] == Some(tile) {
                        continue;
                    }
                    let dest = loop {
                        let next = rnode.map_or(0, |r| r + 1);
                        let next = if next >= group.len() {
                            first_loop = false;
                            0
                        } else {
                            next
                        };
                        rnode = Some(next);
                        let dest = group[next];
                        if !(first_loop && info.contains(dest, tile) && assignment[dest] == Some(tile)) {
                            break dest;
                        }
                    };
                    if snode == rank {
                        tile_image_dest[tile] = dest;
                    }
                }
            }
            Some(order) => {
                let contributors: Vec<usize> = order
                    .ranks()
                    .iter()
                    .copied()
                    .filter(|&s| info.contains(s, tile))
                    .collect();
                if contributors.len() != counts[tile] {
                    return Err(SortlastError::sanity("miscounted tile contributions"));
                }
                let piece_of = |i: usize, g: usize| i * g / contributors.len();
                for (i, &snode) in contributors.iter().enumerate() {
                    if assignment[snode] != Some(tile) {
                        continue;
                    }
                    let piece = piece_of(i, group.len());
                    let j = group
                        .iter()
                        .rposition(|&n| n == snode)
                        .ok_or_else(|| SortlastError::sanity("assignment and tile group disagree"))?;
                    group.swap(j, piece);
                }
                if mine {
                    group_image_dest = group
                        .iter()
                        .position(|&n| n == display_nodes[tile])
                        .ok_or_else(|| SortlastError::sanity("display rank missing from its tile group"))?;
                }
                for (i, &snode) in contributors.iter().enumerate() {
                    if snode == rank {
                        tile_image_dest[tile] = group[piece_of(i, group.len())];
                    }
                }
            }
        }
    }

    let compose_tile = assignment[rank];
    Ok(Delegation {
        tile_image_dest,
        compose_tile,
        compose_group: compose_tile.map(|t| groups[t].clone()).unwrap_or_default(),
        group_image_dest,
    })
}

#[tracing::instrument(level = "debug", skip_all, fields(rank = frame.rank()))]
pub(crate) fn compose(frame: &mut Frame<'_>) -> SortlastResult<Option<Image>> {
    let rank = frame.rank();
    let info = frame.info()?;
    let plan = delegate(info, &frame.layout.display_nodes(), frame.order, frame.comm.size(), rank)?;
    tracing::debug!(compose_tile = ?plan.compose_tile, group = ?plan.compose_group, "delegated");

    let rendered = render_transfer_sparse_images(frame, &plan.tile_image_dest)?;
    let composited = match plan.compose_tile {
        Some(tile) => {
            let input = match rendered {
                Some(image) => image,
                None => {
                    let (w, h) = frame.tile_size(tile)?;
                    SparseImage::new(frame.pixel_layout, w, h)
                }
            };
            let ctx = frame.compose_ctx();
            Some(single::compose(&ctx, &plan.compose_group, plan.group_image_dest, input)?)
        }
        None => None,
    };

    if frame.config.collect_images {
        return collect(frame, plan.compose_tile, composited.as_ref());
    }
    match (plan.compose_tile, composited) {
        (Some(tile), Some((piece, offset))) if piece.num_pixels() > 0 => {
            let (w, h) = frame.tile_size(tile)?;
            let mut image = frame
                .scratch
                .take_image(ScratchSlot::CollectImage, frame.pixel_layout, w, h);
            image.clear(frame.background.true_color);
            decompress_sub_image_correct_background(&piece, offset, &mut image, &frame.background)?;
            frame.valid = Some(ValidPixels {
                tile,
                offset,
                count: piece.num_pixels(),
            });
            Ok(Some(image))
        }
        _ => {
            frame.valid = None;
            Ok(None)
        }
    }
}

/// Every rank takes part in the collect of every tile.
fn collect(
    frame: &mut Frame<'_>,
    compose_tile: Option<usize>,
    composited: Option<&(SparseImage, usize)>,
) -> SortlastResult<Option<Image>> {
    let rank = frame.rank();
    let displayed = frame.layout.tile_displayed(rank);
    let mut result = None;
    for tile in 0..frame.layout.num_tiles() {
        let (piece, offset) = match composited {
            Some((piece, offset)) if compose_tile == Some(tile) => (Some(piece), *offset),
            _ => (None, 0),
        };
        let display = frame.layout.tile(tile)?.display_rank;
        if displayed == Some(tile) {
            let (w, h) = frame.tile_size(tile)?;
            let mut image = frame
                .scratch
                .take_image(ScratchSlot::CollectImage, frame.pixel_layout, w, h);
            single_image_collect(frame, piece, display, offset, Some(&mut image))?;
            result = Some(image);
        } else {
            single_image_collect(frame, piece, display, offset, None)?;
        }
    }
    if let (Some(tile), Some(image)) = (displayed, result.as_mut()) {
        if compose_tile != Some(tile) {
            tracing::debug!(tile, "displayed tile has no images, clearing");
            image.clear(frame.background.true_color);
        }
    }
    Ok(result)
}

#[cfg(test)]
#[path = "../../tests/unit/strategy/reduce.rs"]
mod tests;
