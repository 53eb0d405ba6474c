//! Binary-tree reduction to one rank.

use crate::comm::Tag;
use crate::foundation::error::SortlastResult;
use crate::image::composite::compressed_compressed_composite;
use crate::image::sparse::SparseImage;
use crate::single::{ComposeCtx, empty_like};

const TREE_IMAGE_TAG: Tag = 23;

enum Step {
    Idle,
    Send(usize),
    Recv(usize),
}

/// Halve `group` until single ranks remain, then merge back up. At each
/// level the half holding `image_dest` receives; otherwise the image
/// gathers at the lower half's first rank. `image_dest` is relative to
/// `group` and may fall outside it in recursive calls.
fn recurse(
    ctx: &ComposeCtx<'_>,
    group: &[usize],
    group_rank: usize,
    image_dest: i64,
    image: SparseImage,
) -> SortlastResult<SparseImage> {
    let size = group.len();
    if size <= 1 {
        return Ok(image);
    }
    let middle = size / 2;
    let (rank, dest, mid, len) = (group_rank as i64, image_dest, middle as i64, size as i64);

    let (image, step) = if group_rank < middle {
        let image = recurse(ctx, &group[..middle], group_rank, image_dest, image)?;
        let step = if rank == dest {
            Step::Recv(middle)
        } else if group_rank == 0 && (dest < 0 || dest >= mid) {
            if dest >= mid && dest < len {
                Step::Send(dest as usize)
            } else {
                Step::Recv(middle)
            }
        } else {
            Step::Idle
        };
        (image, step)
    } else {
        let image = recurse(ctx, &group[middle..], group_rank - middle, image_dest - mid, image)?;
        let step = if rank == dest {
            Step::Recv(0)
        } else if group_rank == middle && (dest < mid || dest >= len) {
            if (0..mid).contains(&dest) {
                Step::Send(dest as usize)
            } else {
                Step::Send(0)
            }
        } else {
            Step::Idle
        };
        (image, step)
    };

    match step {
        Step::Idle => Ok(image),
        Step::Send(pair) => {
            tracing::trace!(to = group[pair], "sending tree image");
            ctx.comm.send(group[pair], TREE_IMAGE_TAG, &image.package()?)?;
            Ok(image)
        }
        Step::Recv(pair) => {
            tracing::trace!(from = group[pair], "receiving tree image");
            let data = ctx.comm.recv(group[pair], TREE_IMAGE_TAG)?;
            let incoming = SparseImage::unpackage(&data)?;
            if group_rank < pair {
                compressed_compressed_composite(&image, &incoming, ctx.mode)
            } else {
                compressed_compressed_composite(&incoming, &image, ctx.mode)
            }
        }
    }
}

/// Tree reduction of `group` onto position `image_dest`. The destination
/// gets the whole image at offset 0; every other rank an empty one.
#[tracing::instrument(level = "debug", skip_all, fields(group = group.len(), image_dest))]
pub(crate) fn compose(
    ctx: &ComposeCtx<'_>,
    group: &[usize],
    image_dest: usize,
    input: SparseImage,
) -> SortlastResult<(SparseImage, usize)> {
    let group_rank = ctx.group_rank(group)?;
    let result = recurse(ctx, group, group_rank, image_dest as i64, input)?;
    if group_rank == image_dest {
        Ok((result, 0))
    } else {
        Ok((empty_like(&result), 0))
    }
}
