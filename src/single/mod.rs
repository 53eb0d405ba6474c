//! Compositing one image across a group of ranks.
//!
//! Every member of `group` calls [`compose`] with its own sparse image of the
//! same tile. Each returns the piece of the finished image it ends up
//! owning together with the piece's pixel offset; ranks left without a piece
//! get a `0 x 0` image. Group positions double as the composite order: a
//! lower position is always in front.

pub(crate) mod bswap;
pub(crate) mod direct;
pub(crate) mod radixkr;
pub(crate) mod tree;

use crate::comm::Communicator;
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::image::format::CompositeMode;
use crate::image::sparse::SparseImage;
use crate::session::config::SingleImageStrategy;

/// Settings shared by every sub-strategy.
#[derive(Clone, Copy)]
pub(crate) struct ComposeCtx<'a> {
    pub(crate) comm: &'a dyn Communicator,
    pub(crate) strategy: SingleImageStrategy,
    pub(crate) mode: CompositeMode,
    pub(crate) magic_k: usize,
    pub(crate) max_image_split: usize,
    pub(crate) interlace: bool,
}

impl ComposeCtx<'_> {
    /// Position of this rank in `group`.
    pub(crate) fn group_rank(&self, group: &[usize]) -> SortlastResult<usize> {
        let rank = self.comm.rank();
        group
            .iter()
            .position(|&r| r == rank)
            .ok_or_else(|| SortlastError::sanity(format!("rank {rank} is not part of the compose group")))
    }
}

/// An image with no pixels, returned by ranks that end up without a piece.
pub(crate) fn empty_like(image: &SparseImage) -> SparseImage {
    SparseImage::new(image.layout(), 0, 0)
}

/// Composite `input` across `group` with the configured sub-strategy.
/// `image_dest` is the group position that should end up with the image
/// when the sub-strategy gathers to one rank.
pub(crate) fn compose(
    ctx: &ComposeCtx<'_>,
    group: &[usize],
    image_dest: usize,
    input: SparseImage,
) -> SortlastResult<(SparseImage, usize)> {
    if image_dest >= group.len() {
        return Err(SortlastError::invalid_value(format!(
            "image destination {image_dest} outside a group of {}",
            group.len()
        )));
    }
    ctx.group_rank(group)?;
    if group.len() == 1 {
        return Ok((input, 0));
    }
    match ctx.strategy {
        SingleImageStrategy::Automatic | SingleImageStrategy::Radixkr => {
            radixkr::compose(ctx, group, input)
        }
        SingleImageStrategy::Radixk => radixkr::compose_exact(ctx, group, input),
        SingleImageStrategy::Bswap => bswap::compose(ctx, group, input),
        SingleImageStrategy::BswapFolding => bswap::compose_folding(ctx, group, input),
        SingleImageStrategy::Tree => tree::compose(ctx, group, image_dest, input),
        SingleImageStrategy::Direct => direct::compose(ctx, group, image_dest, input),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/single/mod.rs"]
mod tests;
