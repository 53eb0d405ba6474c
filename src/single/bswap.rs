//! Binary swap.
//!
//! Ranks pair up across one bit of their group position per round and trade
//! halves of their image. Groups that are not a power of two either
//! telescope (the extra ranks run their own binary swap and then scatter
//! their pieces onto the lower group) or fold (neighbouring pairs merge
//! first so a power of two is left).

use crate::comm::Tag;
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::foundation::math::{bit_reverse, largest_pow2};
use crate::image::composite::compressed_compressed_composite;
use crate::image::sparse::SparseImage;
use crate::single::{ComposeCtx, empty_like};

const SWAP_IMAGES_TAG: Tag = 21;
const TELESCOPE_TAG: Tag = 22;
const FOLD_TAG: Tag = 23;

/// Binary swap over a power-of-two `group`. Pieces are sized as if the
/// image were eventually cut into `largest_group_size` parts.
fn compose_pow2(
    ctx: &ComposeCtx<'_>,
    group: &[usize],
    largest_group_size: usize,
    input: SparseImage,
) -> SortlastResult<(SparseImage, usize)> {
    if group.len() < 2 {
        return Ok((input, 0));
    }
    let group_rank = ctx.group_rank(group)?;
    let mut working = input;
    let mut offset = 0;
    let mut bitmask = 1;
    while bitmask < group.len() {
        let [low, high]: [_; 2] = working
            .split(offset, 2, largest_group_size / bitmask)?
            .try_into()
            .map_err(|_| SortlastError::sanity("binary swap split did not produce two halves"))?;
        let pair = group_rank ^ bitmask;
        let (keep, send, in_on_top) = if group_rank < pair {
            (low, high, false)
        } else {
            (high, low, true)
        };
        offset = keep.offset;
        let data = ctx.comm.sendrecv(
            group[pair],
            SWAP_IMAGES_TAG,
            &send.image.package()?,
            group[pair],
            SWAP_IMAGES_TAG,
        )?;
        let incoming = SparseImage::unpackage(&data)?;
        working = if in_on_top {
            compressed_compressed_composite(&incoming, &keep.image, ctx.mode)?
        } else {
            compressed_compressed_composite(&keep.image, &incoming, ctx.mode)?
        };
        bitmask <<= 1;
    }
    Ok((working, offset))
}

/// Split this upper-group rank's piece and scatter it onto the lower group
/// ranks holding the same region.
fn send_from_upper_group(
    ctx: &ComposeCtx<'_>,
    lower_group: &[usize],
    upper_group: &[usize],
    largest_group_size: usize,
    working: &SparseImage,
) -> SortlastResult<()> {
    let upper_size = upper_group.len();
    let num_pieces = lower_group.len() / upper_size;
    let eventual = largest_group_size / upper_size;
    let upper_rank = ctx.group_rank(upper_group)?;
    // The lower group is always larger, so there are at least two pieces.
    let pieces = working.split(0, num_pieces, eventual)?;
    for (piece, part) in pieces.iter().enumerate() {
        let dest = bit_reverse(piece, num_pieces) * upper_size + upper_rank;
        tracing::trace!(piece, dest, "telescoping piece to lower group");
        ctx.comm
            .send(lower_group[dest], TELESCOPE_TAG, &part.image.package()?)?;
    }
    Ok(())
}

fn compose_telescoping(
    ctx: &ComposeCtx<'_>,
    group: &[usize],
    largest_group_size: Option<usize>,
    input: SparseImage,
) -> SortlastResult<(SparseImage, usize)> {
    let group_rank = ctx.group_rank(group)?;
    let pow2 = largest_pow2(group.len());
    let extra = group.len() - pow2;
    let extra_pow2 = largest_pow2(extra);
    let largest = largest_group_size.unwrap_or(pow2);
    let (lower_group, upper_group) = group.split_at(pow2);

    if group_rank >= pow2 {
        let upper_rank = group_rank - pow2;
        let (piece, _) = compose_telescoping(ctx, upper_group, Some(largest), input)?;
        if upper_rank < extra_pow2 {
            send_from_upper_group(ctx, lower_group, &upper_group[..extra_pow2], largest, &piece)?;
        }
        return Ok((empty_like(&piece), 0));
    }

    let total_pixels = input.num_pixels();
    let use_interlace = largest > 2 && ctx.interlace;
    let working = if use_interlace {
        input.interlace(largest)?
    } else {
        input
    };
    let (mut result, mut offset) = compose_pow2(ctx, lower_group, largest, working)?;

    if extra_pow2 > 0 {
        let src = group_rank & (extra_pow2 - 1);
        tracing::trace!(src, "absorbing telescoped piece");
        let data = ctx.comm.recv(upper_group[src], TELESCOPE_TAG)?;
        let incoming = SparseImage::unpackage(&data)?;
        result = compressed_compressed_composite(&result, &incoming, ctx.mode)?;
    }

    if use_interlace {
        let partition = bit_reverse(group_rank, largest);
        offset = SparseImage::interlace_offset(partition, largest, total_pixels)?;
    }
    Ok((result, offset))
}

/// Telescoping binary swap. The first power-of-two ranks of `group` end up
/// with pieces; the rest return empty images.
#[tracing::instrument(level = "debug", skip_all, fields(group = group.len()))]
pub(crate) fn compose(
    ctx: &ComposeCtx<'_>,
    group: &[usize],
    input: SparseImage,
) -> SortlastResult<(SparseImage, usize)> {
    compose_telescoping(ctx, group, None, input)
}

/// Folding binary swap: positions `2i` absorb `2i + 1` for the first
/// `size - pow2` pairs, then the remaining power of two swaps.
#[tracing::instrument(level = "debug", skip_all, fields(group = group.len()))]
pub(crate) fn compose_folding(
    ctx: &ComposeCtx<'_>,
    group: &[usize],
    input: SparseImage,
) -> SortlastResult<(SparseImage, usize)> {
    let group_rank = ctx.group_rank(group)?;
    if group.len() < 2 {
        return Ok((input, 0));
    }
    let pow2 = largest_pow2(group.len());
    let extra = group.len() - pow2;
    let total_pixels = input.num_pixels();
    let use_interlace = pow2 > 2 && ctx.interlace;
    let mut working = if use_interlace {
        input.interlace(pow2)?
    } else {
        input
    };

    let mut pow2_group = Vec::with_capacity(pow2);
    for fold in 0..extra {
        let whole = 2 * fold;
        pow2_group.push(group[whole]);
        if group_rank == whole {
            let data = ctx.comm.recv(group[whole + 1], FOLD_TAG)?;
            let incoming = SparseImage::unpackage(&data)?;
            working = compressed_compressed_composite(&working, &incoming, ctx.mode)?;
        } else if group_rank == whole + 1 {
            ctx.comm.send(group[whole], FOLD_TAG, &working.package()?)?;
            return Ok((empty_like(&working), 0));
        }
    }
    pow2_group.extend_from_slice(&group[2 * extra..]);
    if pow2_group.len() != pow2 {
        return Err(SortlastError::sanity("miscounted ranks while folding"));
    }

    let (result, mut offset) = compose_pow2(ctx, &pow2_group, pow2, working)?;
    if use_interlace {
        let pow2_rank = ctx.group_rank(&pow2_group)?;
        let partition = bit_reverse(pow2_rank, pow2);
        offset = SparseImage::interlace_offset(partition, pow2, total_pixels)?;
    }
    Ok((result, offset))
}
