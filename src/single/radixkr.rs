//! Radix-k compositing.
//!
//! The group is factored into rounds `k_0 * k_1 * ...`. In round `i` every
//! rank trades image pieces with `k_i - 1` partners that are `step` positions
//! apart, so after the last round each rank owns one fully composited piece.
//! Radix-kr lets a factor leave a remainder `r`: the last `r` ranks of a
//! round hand their pieces to the final partner set and drop out.

use smallvec::SmallVec;

use crate::comm::{Request, Tag};
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::image::composite::compressed_compressed_composite_into;
use crate::image::format::CompositeMode;
use crate::image::sparse::SparseImage;
use crate::single::{ComposeCtx, empty_like};

const SWAP_IMAGE_TAG_START: Tag = 2200;

/// One round of the factorization as seen by one rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RoundInfo {
    /// Partners per set.
    pub(crate) k: usize,
    /// Extra ranks folded into the last set.
    pub(crate) r: usize,
    /// Distance in group positions between partners.
    pub(crate) step: usize,
    /// Pieces the image is split into this round; 1 gathers whole images.
    pub(crate) split_factor: usize,
    /// Whether this rank keeps a piece after the round.
    pub(crate) has_image: bool,
    /// Whether this rank's partner set also takes the remainder ranks.
    pub(crate) last_partition: bool,
    /// Group position of the first rank of the partner set.
    pub(crate) first_rank: usize,
    /// This rank's index within its partner set.
    pub(crate) partition_index: usize,
}

/// Radix-kr factors `(k, r)`: prefer `magic_k`, otherwise the `k` below it
/// with the smallest remainder.
pub(crate) fn factor_with_remainder(group_size: usize, magic_k: usize) -> Vec<(usize, usize)> {
    let mut factors = Vec::new();
    let mut next_divide = group_size;
    while next_divide > 1 {
        let (mut k, mut r) = if next_divide > magic_k {
            (magic_k, next_divide % magic_k)
        } else {
            (next_divide, 0)
        };
        if r > 0 {
            for try_k in (2..magic_k).rev() {
                let try_r = next_divide % try_k;
                if try_r < r {
                    k = try_k;
                    r = try_r;
                    if r == 0 {
                        break;
                    }
                }
            }
        }
        factors.push((k, r));
        next_divide /= k;
    }
    factors
}

/// Exact factors for radix-k: `magic_k` if it divides, else the divisor
/// nearest to it, else the smallest divisor above `2 * magic_k`, else the
/// remaining size itself.
pub(crate) fn factor_exact(group_size: usize, magic_k: usize) -> Vec<(usize, usize)> {
    let mut factors = Vec::new();
    let mut next_divide = group_size;
    while next_divide > 1 {
        let k = if next_divide % magic_k == 0 {
            magic_k
        } else {
            pivot_order(2, magic_k, 2 * magic_k)
                .find(|&k| next_divide % k == 0)
                .or_else(|| {
                    let max_k = (next_divide as f64).sqrt().floor() as usize;
                    (2 * magic_k..max_k).find(|&k| next_divide % k == 0)
                })
                .unwrap_or(next_divide)
        };
        factors.push((k, 0));
        next_divide /= k;
    }
    factors
}

/// `pivot, pivot - 1, pivot + 1, pivot - 2, ...` restricted to
/// `low..high`.
pub(crate) fn pivot_order(low: usize, pivot: usize, high: usize) -> impl Iterator<Item = usize> {
    let max = 2 * if pivot < (high + low) / 2 {
        high.saturating_sub(pivot)
    } else {
        pivot + 1 - low.min(pivot + 1)
    };
    (1..max).filter_map(move |iter| {
        if iter % 2 == 0 {
            pivot.checked_sub(iter / 2).filter(|&v| v >= low)
        } else {
            Some(pivot + iter / 2).filter(|&v| v < high)
        }
    })
}

/// Per-round placement of `group_rank` for the given factors.
pub(crate) fn partition_rounds(
    factors: &[(usize, usize)],
    group_size: usize,
    group_rank: usize,
    max_image_split: usize,
) -> Vec<RoundInfo> {
    if group_size < 2 {
        return vec![RoundInfo {
            k: 1,
            r: 0,
            step: 1,
            split_factor: 1,
            has_image: true,
            last_partition: true,
            first_rank: 0,
            partition_index: 0,
        }];
    }
    let mut rounds = Vec::with_capacity(factors.len());
    let mut total_partitions = 1;
    let mut step = 1;
    let mut current_group_size = group_size;
    for &(k, r) in factors {
        let next_step = step * k;
        let next_group_size = current_group_size / k;
        let end_of_groups = next_step * next_group_size;
        let mut first_rank = group_rank % step + (group_rank / next_step) * next_step;
        if first_rank >= end_of_groups {
            first_rank -= next_step;
        }
        let split_factor = if max_image_split < 1 || total_partitions * k <= max_image_split {
            k
        } else {
            (max_image_split / total_partitions).max(1)
        };
        total_partitions *= split_factor;
        let partition_index = (group_rank - first_rank) / step;
        let last_partition = first_rank + next_step >= end_of_groups;
        let this_step = step;
        current_group_size = next_group_size;
        step = next_step;
        // Rounding the group size down drops remainder ranks here.
        let has_image = group_rank < step * current_group_size && partition_index < split_factor;
        rounds.push(RoundInfo {
            k,
            r,
            step: this_step,
            split_factor,
            has_image,
            last_partition,
            first_rank,
            partition_index,
        });
    }
    rounds
}

/// Index of the final piece this rank owns, `None` if it drops out.
pub(crate) fn final_partition_index(rounds: &[RoundInfo]) -> Option<usize> {
    rounds.iter().try_fold(0, |index, round| {
        round
            .has_image
            .then(|| index * round.split_factor + round.partition_index)
    })
}

/// Number of pieces the image ends up in.
pub(crate) fn total_partitions(rounds: &[RoundInfo]) -> usize {
    rounds.iter().map(|r| r.split_factor).product()
}

/// Group position owning final piece `partition`; inverse of
/// [`final_partition_index`].
#[cfg(test)]
pub(crate) fn group_rank_for_partition(rounds: &[RoundInfo], partition: usize) -> usize {
    let mut remaining = partition;
    let mut group_rank = 0;
    for round in rounds.iter().rev() {
        group_rank += round.step * (remaining % round.split_factor);
        remaining /= round.split_factor;
    }
    group_rank
}

/// One member of a partner set during a round.
#[derive(Debug)]
struct Partner {
    rank: usize,
    /// Pixel offset of the piece this partner keeps.
    offset: Option<usize>,
    /// Piece received from (or kept for) this partner, waiting to be merged.
    image: Option<SparseImage>,
    /// Height of the merge tree `image` represents.
    level: Option<u32>,
}

/// Merge received pieces pairwise, lower index in front, as soon as both
/// halves of a subtree are present. Returns true once everything has been
/// merged into partner 0. Merges write into `spare` and rotate the replaced
/// stream back into it.
fn try_composite_incoming(
    partners: &mut [Partner],
    incoming: usize,
    mode: CompositeMode,
    spare: &mut Vec<u8>,
) -> SortlastResult<bool> {
    let n = partners.len();
    let mut idx = incoming;
    loop {
        let level = partners[idx]
            .level
            .ok_or_else(|| SortlastError::sanity("merging a piece that never arrived"))?;
        let dist = 1usize << level;
        let subtree = dist << 1;
        let (front, back) = if idx % subtree == 0 {
            let back = idx + dist;
            if back >= n {
                if idx == 0 {
                    break;
                }
                partners[idx].level = Some(level + 1);
                continue;
            }
            (idx, back)
        } else {
            (idx - dist, idx)
        };
        if partners[front].level != partners[back].level {
            break;
        }
        debug_assert!(front < back, "front piece must come from a lower index");
        let (Some(mut f), Some(b)) = (partners[front].image.take(), partners[back].image.take()) else {
            return Err(SortlastError::sanity("merge level set without an image"));
        };
        compressed_compressed_composite_into(&mut f, &b, mode, spare)?;
        partners[front].image = Some(f);
        partners[front].level = Some(level + 1);
        idx = front;
    }
    Ok(partners[0].level.is_some_and(|l| (1usize << l) >= n))
}

/// Radix-kr over `group`.
#[tracing::instrument(level = "debug", skip_all, fields(group = group.len()))]
pub(crate) fn compose(
    ctx: &ComposeCtx<'_>,
    group: &[usize],
    input: SparseImage,
) -> SortlastResult<(SparseImage, usize)> {
    let factors = factor_with_remainder(group.len(), ctx.magic_k);
    run_rounds(ctx, group, &factors, input)
}

/// Radix-k over `group`: exact factors, no remainders.
#[tracing::instrument(level = "debug", skip_all, fields(group = group.len()))]
pub(crate) fn compose_exact(
    ctx: &ComposeCtx<'_>,
    group: &[usize],
    input: SparseImage,
) -> SortlastResult<(SparseImage, usize)> {
    let factors = factor_exact(group.len(), ctx.magic_k);
    run_rounds(ctx, group, &factors, input)
}

fn check_factors(factors: &[(usize, usize)], group_size: usize) -> SortlastResult<()> {
    let product = factors.iter().rev().fold(1, |p, &(k, r)| p * k + r);
    if product != group_size {
        return Err(SortlastError::sanity(format!(
            "factors {factors:?} do not multiply to {group_size} processes"
        )));
    }
    Ok(())
}

fn run_rounds(
    ctx: &ComposeCtx<'_>,
    group: &[usize],
    factors: &[(usize, usize)],
    input: SparseImage,
) -> SortlastResult<(SparseImage, usize)> {
    let group_rank = ctx.group_rank(group)?;
    if group.len() == 1 {
        return Ok((input, 0));
    }
    check_factors(factors, group.len())?;
    let rounds = partition_rounds(factors, group.len(), group_rank, ctx.max_image_split);
    let total = total_partitions(&rounds);
    let use_interlace = ctx.interlace && rounds.len() > 1;
    let original_size = input.num_pixels();
    tracing::debug!(?factors, total, use_interlace, "radix-k rounds");

    let mut working = if use_interlace {
        input.interlace(total)?
    } else {
        input
    };
    let mut my_offset = 0;
    let mut remaining = total;
    let mut spare = Vec::new();
    let comm = ctx.comm;

    for (round_idx, round) in rounds.iter().enumerate() {
        let tag = SWAP_IMAGE_TAG_START + round_idx as Tag;
        let num_partners = round.k + if round.last_partition { round.r } else { 0 };
        let pi = round.partition_index;
        let mut partners: SmallVec<[Partner; 8]> = (0..num_partners)
            .map(|i| {
                let gr = round.first_rank + i * round.step;
                group.get(gr).map(|&rank| Partner {
                    rank,
                    offset: None,
                    image: None,
                    level: None,
                })
            })
            .collect::<Option<_>>()
            .ok_or_else(|| SortlastError::sanity("radix-k partner outside of group"))?;

        let mut receives = vec![Request::NULL; num_partners];
        if round.has_image {
            for (i, p) in partners.iter().enumerate() {
                if i != pi {
                    receives[i] = comm.irecv(p.rank, tag)?;
                }
            }
        }

        let mut sends = Vec::new();
        let layout = working.layout();
        if round.split_factor > 1 {
            let mut pieces = working.split(my_offset, round.split_factor, remaining)?;
            for i in pivot_order(0, pi % round.split_factor, round.split_factor) {
                let piece = std::mem::replace(&mut pieces[i].image, SparseImage::new(layout, 0, 0));
                partners[i].offset = Some(pieces[i].offset);
                if i == pi {
                    partners[i].image = Some(piece);
                    partners[i].level = Some(0);
                } else {
                    sends.push(comm.isend(partners[i].rank, tag, piece.package()?)?);
                }
            }
            working = SparseImage::new(layout, 0, 0);
        } else if round.has_image {
            partners[pi].offset = Some(my_offset);
            partners[pi].image = Some(std::mem::replace(&mut working, SparseImage::new(layout, 0, 0)));
            partners[pi].level = Some(0);
        } else {
            sends.push(comm.isend(partners[0].rank, tag, working.package()?)?);
            if let Some(me) = partners.get_mut(pi) {
                me.offset = Some(0);
            }
        }

        if round.has_image {
            let (width, height) = partners[pi]
                .image
                .as_ref()
                .map(|img| (img.width(), img.height()))
                .ok_or_else(|| SortlastError::sanity("own radix-k piece missing"))?;
            let mut done = try_composite_incoming(&mut partners, pi, ctx.mode, &mut spare)?;
            while !done {
                let (idx, data) = comm.waitany(&mut receives)?;
                let data = data.ok_or_else(|| SortlastError::sanity("radix-k receive carried no data"))?;
                let image = SparseImage::unpackage(&data)?;
                if image.width() != width || image.height() != height {
                    return Err(SortlastError::sanity(format!(
                        "radix-k received a {}x{} piece, expected {width}x{height}",
                        image.width(),
                        image.height()
                    )));
                }
                partners[idx].image = Some(image);
                partners[idx].level = Some(0);
                done = try_composite_incoming(&mut partners, idx, ctx.mode, &mut spare)?;
            }
            working = partners[0]
                .image
                .take()
                .ok_or_else(|| SortlastError::sanity("radix-k round produced no image"))?;
        }

        comm.waitall(&mut sends)?;

        my_offset = partners.get(pi).and_then(|p| p.offset).unwrap_or(0);
        if round.has_image {
            remaining /= round.split_factor;
        } else {
            working = empty_like(&working);
            break;
        }
    }

    let offset = if use_interlace && working.num_pixels() > 0 {
        let index = final_partition_index(&rounds)
            .ok_or_else(|| SortlastError::sanity("rank kept an image without a final partition"))?;
        SparseImage::interlace_offset(index, total, original_size)?
    } else {
        my_offset
    };
    Ok((working, offset))
}

#[cfg(test)]
#[path = "../../tests/unit/single/radixkr.rs"]
mod tests;
