//! Everyone sends to the destination, which merges in group order.

use crate::comm::{Request, Tag};
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::image::composite::compressed_compressed_composite_into;
use crate::image::sparse::SparseImage;
use crate::single::{ComposeCtx, empty_like};

const DIRECT_IMAGE_TAG: Tag = 24;

#[tracing::instrument(level = "debug", skip_all, fields(group = group.len(), image_dest))]
pub(crate) fn compose(
    ctx: &ComposeCtx<'_>,
    group: &[usize],
    image_dest: usize,
    input: SparseImage,
) -> SortlastResult<(SparseImage, usize)> {
    let group_rank = ctx.group_rank(group)?;
    if group_rank != image_dest {
        ctx.comm
            .send(group[image_dest], DIRECT_IMAGE_TAG, &input.package()?)?;
        return Ok((empty_like(&input), 0));
    }

    let mut receives = group
        .iter()
        .enumerate()
        .map(|(pos, &rank)| {
            if pos == group_rank {
                Ok(Request::NULL)
            } else {
                ctx.comm.irecv(rank, DIRECT_IMAGE_TAG)
            }
        })
        .collect::<SortlastResult<Vec<_>>>()?;
    let received = ctx.comm.waitall(&mut receives)?;

    let mut own = Some(input);
    let mut acc: Option<SparseImage> = None;
    let mut spare = Vec::new();
    for (pos, data) in received.into_iter().enumerate() {
        let image = if pos == group_rank {
            own.take()
                .ok_or_else(|| SortlastError::sanity("own image used twice"))?
        } else {
            let data = data.ok_or_else(|| {
                SortlastError::communication(format!("no image from group position {pos}"))
            })?;
            SparseImage::unpackage(&data)?
        };
        match acc.as_mut() {
            None => acc = Some(image),
            Some(front) => compressed_compressed_composite_into(front, &image, ctx.mode, &mut spare)?,
        }
    }
    let result = acc.ok_or_else(|| SortlastError::sanity("direct compose over an empty group"))?;
    Ok((result, 0))
}
