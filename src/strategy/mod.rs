//! Multi-tile compositing strategies.
//!
//! Each strategy runs on every rank with the same [`Frame`] inputs and
//! returns the finished tile image on display ranks. Strategies that leave
//! only part of a tile valid record it in [`Frame::valid`].

pub(crate) mod common;
pub(crate) mod direct;
pub(crate) mod reduce;
pub(crate) mod sequential;
pub(crate) mod split;
pub(crate) mod vtree;

use serde::{Deserialize, Serialize};

use crate::comm::Communicator;
use crate::foundation::core::to_usize;
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::image::codec::Background;
use crate::image::dense::Image;
use crate::image::format::PixelLayout;
use crate::render::TileSource;
use crate::session::config::{CompositeOrder, FrameConfig, Strategy};
use crate::session::scratch::ScratchArena;
use crate::single::ComposeCtx;
use crate::tiles::info::TileInfo;
use crate::tiles::layout::TileLayout;

/// Pixels of the returned image that hold composited data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidPixels {
    /// Tile the image belongs to.
    pub tile: usize,
    /// First valid pixel.
    pub offset: usize,
    /// Number of valid pixels.
    pub count: usize,
}

/// Everything a strategy needs for one frame on one rank.
pub(crate) struct Frame<'a> {
    pub(crate) comm: &'a dyn Communicator,
    pub(crate) config: &'a FrameConfig,
    pub(crate) layout: &'a TileLayout,
    pub(crate) pixel_layout: PixelLayout,
    /// Present only when compositing is ordered.
    pub(crate) order: Option<&'a CompositeOrder>,
    pub(crate) background: Background,
    /// Absent for strategies that do not gather tile contributions.
    pub(crate) info: Option<&'a TileInfo>,
    pub(crate) source: TileSource<'a>,
    pub(crate) scratch: &'a mut ScratchArena,
    pub(crate) valid: Option<ValidPixels>,
}

impl<'a> Frame<'a> {
    pub(crate) fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub(crate) fn info(&self) -> SortlastResult<&'a TileInfo> {
        self.info
            .ok_or_else(|| SortlastError::sanity("strategy needs tile contributions that were not gathered"))
    }

    /// `(width, height)` of `tile`.
    pub(crate) fn tile_size(&self, tile: usize) -> SortlastResult<(usize, usize)> {
        let v = self.layout.viewport(tile)?;
        Ok((to_usize(v.width, "tile width")?, to_usize(v.height, "tile height")?))
    }

    pub(crate) fn compose_ctx(&self) -> ComposeCtx<'a> {
        ComposeCtx {
            comm: self.comm,
            strategy: self.config.single_image_strategy,
            mode: self.config.composite_mode,
            magic_k: self.config.magic_k,
            max_image_split: self.config.max_image_split,
            interlace: self.config.interlace_images,
        }
    }
}

/// Run the configured strategy.
pub(crate) fn composite(frame: &mut Frame<'_>) -> SortlastResult<Option<Image>> {
    match frame.config.strategy {
        Strategy::Direct => direct::compose(frame),
        Strategy::Sequential => sequential::compose(frame),
        Strategy::Split => split::compose(frame),
        Strategy::Reduce => reduce::compose(frame),
        Strategy::Vtree => vtree::compose(frame),
    }
}
