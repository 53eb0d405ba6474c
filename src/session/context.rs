use serde::{Deserialize, Serialize};

use crate::comm::counted::CountedComm;
use crate::comm::{Communicator, allgather_word};
use crate::foundation::core::{Matrix4, RenderMatrices, Rgba, Viewport};
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::image::codec::Background;
use crate::image::dense::Image;
use crate::image::format::{ColorFormat, CompositeMode, DepthFormat};
use crate::render::{FrameInput, Renderer, TileSource};
use crate::session::config::{FrameConfig, SingleImageStrategy, Strategy};
use crate::session::scratch::{ScratchArena, ScratchStats};
use crate::strategy::{self, Frame, ValidPixels};
use crate::tiles::contained::{Containment, bounding_box};
use crate::tiles::info::TileInfo;
use crate::tiles::layout::TileLayout;

/// Counters of one finished frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStats {
    /// Payload bytes this rank sent during the frame.
    pub bytes_sent: u64,
    /// Messages this rank sent during the frame.
    pub messages_sent: u64,
    /// Frames this context has finished, this one included.
    pub frames_drawn: u64,
    /// Renderer invocations during the frame.
    pub renders: u64,
}

/// Result of a frame on one rank.
#[derive(Debug)]
pub struct FrameOutput {
    /// The displayed tile, or the part of a tile this rank finished when
    /// images are not collected. `None` when this rank has nothing to show.
    pub image: Option<Image>,
    /// Pixels of `image` that hold composited data.
    pub valid_pixels: Option<ValidPixels>,
    /// Traffic and render counters.
    pub stats: FrameStats,
}

/// A compositing session on one rank.
///
/// Owns the communicator, the tile layout, the configuration used for every
/// following frame and the buffers reused between frames. All ranks must
/// drive their contexts through the same sequence of calls with matching
/// arguments.
pub struct Context<C: Communicator> {
    comm: C,
    layout: TileLayout,
    config: FrameConfig,
    scratch: ScratchArena,
    bounds: Vec<[f64; 3]>,
    replication_group: Vec<usize>,
    frames_drawn: u64,
}

impl<C: Communicator> Context<C> {
    /// Session over `comm` with the default configuration.
    pub fn new(comm: C, layout: TileLayout) -> SortlastResult<Self> {
        check_layout(&layout, comm.size())?;
        Ok(Self {
            comm,
            layout,
            config: FrameConfig::default(),
            scratch: ScratchArena::default(),
            bounds: Vec::new(),
            replication_group: Vec::new(),
            frames_drawn: 0,
        })
    }

    /// Rank of this process.
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// The underlying communicator.
    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Current tile layout.
    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    /// Configuration of the next frame.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Frames finished so far.
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Reuse counters of the session's buffers.
    pub fn scratch_stats(&self) -> ScratchStats {
        self.scratch.stats()
    }

    /// Replace the tile layout.
    pub fn set_layout(&mut self, layout: TileLayout) -> SortlastResult<()> {
        check_layout(&layout, self.comm.size())?;
        self.layout = layout;
        Ok(())
    }

    /// Replace the whole configuration.
    pub fn set_config(&mut self, config: FrameConfig) -> SortlastResult<()> {
        config.validate(self.comm.size())?;
        self.config = config;
        Ok(())
    }

    /// Edit the configuration in place. The edit is discarded when the
    /// result does not validate.
    pub fn config_mut(&mut self, edit: impl FnOnce(&mut FrameConfig)) -> SortlastResult<()> {
        let mut config = self.config.clone();
        edit(&mut config);
        self.set_config(config)
    }

    /// Multi-tile strategy.
    pub fn set_strategy(&mut self, strategy: Strategy) -> SortlastResult<()> {
        self.config_mut(|c| c.strategy = strategy)
    }

    /// Strategy compositing one tile within a group.
    pub fn set_single_image_strategy(&mut self, strategy: SingleImageStrategy) -> SortlastResult<()> {
        self.config_mut(|c| c.single_image_strategy = strategy)
    }

    /// Depth test or blending.
    pub fn set_composite_mode(&mut self, mode: CompositeMode) -> SortlastResult<()> {
        self.config_mut(|c| c.composite_mode = mode)
    }

    /// Color and depth formats of rendered images.
    pub fn set_formats(&mut self, color: ColorFormat, depth: DepthFormat) -> SortlastResult<()> {
        self.config_mut(|c| {
            c.color_format = color;
            c.depth_format = depth;
        })
    }

    /// Front-to-back order of ranks; also turns ordered compositing on.
    pub fn set_composite_order(&mut self, order: Vec<usize>) -> SortlastResult<()> {
        self.config_mut(|c| {
            c.composite_order = Some(order);
            c.ordered_composite = true;
        })
    }

    /// Preferred radix of the radix-k family.
    pub fn set_magic_k(&mut self, magic_k: usize) -> SortlastResult<()> {
        self.config_mut(|c| c.magic_k = magic_k)
    }

    /// Upper bound on the pieces one tile is split into.
    pub fn set_max_image_split(&mut self, max_image_split: usize) -> SortlastResult<()> {
        self.config_mut(|c| c.max_image_split = max_image_split)
    }

    /// Declare the local geometry as an axis aligned box.
    pub fn set_bounding_box(&mut self, min: [f64; 3], max: [f64; 3]) {
        self.bounds = bounding_box(min, max);
    }

    /// Declare the local geometry by vertices. An empty list contains every
    /// tile.
    pub fn set_bounding_vertices(&mut self, vertices: Vec<[f64; 3]>) {
        self.bounds = vertices;
    }

    /// Ranks holding the same geometry as this one, this rank included.
    /// An empty or single-rank group disables replication.
    pub fn set_data_replication_group(&mut self, group: Vec<usize>) -> SortlastResult<()> {
        let rank = self.comm.rank();
        let size = self.comm.size();
        if !group.is_empty() && !group.contains(&rank) {
            return Err(SortlastError::invalid_value(
                "local process not part of data replication group",
            ));
        }
        if let Some(&bad) = group.iter().find(|&&r| r >= size) {
            return Err(SortlastError::invalid_value(format!("no rank {bad} to replicate with")));
        }
        self.replication_group = group;
        Ok(())
    }

    /// Collective: ranks passing the same `color` form a replication group.
    pub fn set_data_replication_group_color(&mut self, color: u32) -> SortlastResult<()> {
        let colors = allgather_word(&self.comm, color)?;
        let group = colors
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == color)
            .map(|(rank, _)| rank)
            .collect();
        self.set_data_replication_group(group)
    }

    /// Collective: render the local geometry through `renderer` and
    /// composite it across every rank.
    pub fn draw_frame(
        &mut self,
        renderer: &mut dyn Renderer,
        projection: &Matrix4,
        modelview: &Matrix4,
        background: Rgba,
    ) -> SortlastResult<FrameOutput> {
        let matrices = RenderMatrices {
            projection: *projection,
            modelview: *modelview,
        };
        self.run_frame(FrameInput::Render(renderer), matrices, background, None)
    }

    /// Collective: composite an image the application already rendered over
    /// the whole global viewport. Pixels outside `valid_viewport` (relative
    /// to the global viewport) are ignored.
    pub fn composite_image(
        &mut self,
        image: &Image,
        valid_viewport: Option<Viewport>,
        projection: &Matrix4,
        modelview: &Matrix4,
        background: Rgba,
    ) -> SortlastResult<FrameOutput> {
        let matrices = RenderMatrices {
            projection: *projection,
            modelview: *modelview,
        };
        let global = self.layout.global_viewport();
        let rendered = valid_viewport
            .map(|v| v.relative_to(-global.x, -global.y))
            .unwrap_or(global);
        self.run_frame(FrameInput::Prerendered(image), matrices, background, Some(rendered))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(rank = self.comm.rank(), frame = self.frames_drawn))]
    fn run_frame(
        &mut self,
        input: FrameInput<'_>,
        matrices: RenderMatrices,
        background: Rgba,
        rendered: Option<Viewport>,
    ) -> SortlastResult<FrameOutput> {
        let Self {
            comm,
            layout,
            config,
            scratch,
            bounds,
            replication_group,
            frames_drawn,
        } = self;
        let (comm, layout, config) = (&*comm, &*layout, &*config);
        let (rank, size) = (comm.rank(), comm.size());
        if layout.num_tiles() == 0 {
            return Err(SortlastError::invalid_operation("no tiles defined"));
        }
        config.validate(size)?;
        let order = if config.ordered_composite {
            Some(config.effective_order(size)?)
        } else {
            None
        };
        let background = Background::for_mode(
            config.composite_mode,
            background,
            config.correct_colored_background,
        );
        let pixel_layout = config.pixel_layout();

        let mut contained = Containment::project(layout, bounds, &matrices, rendered);
        contained.adjust_for_data_replication(layout, replication_group, rank)?;
        let mask = contained.mask(layout.num_tiles());

        let counted = CountedComm::new(comm);
        let info = match config.strategy {
            Strategy::Sequential => None,
            _ => Some(TileInfo::gather(&counted, &mask)?),
        };
        let source = TileSource::new(
            input.shorten(),
            layout,
            pixel_layout,
            config.composite_mode,
            background.working,
            matrices,
            contained.viewport,
            mask,
            config.render_empty_images,
            config.floating_viewport,
        )?;
        let displayed = layout.tile_displayed(rank);
        let valid = displayed
            .map(|tile| {
                layout.viewport(tile).map(|v| ValidPixels {
                    tile,
                    offset: 0,
                    count: v.num_pixels(),
                })
            })
            .transpose()?;

        let mut frame = Frame {
            comm: &counted,
            config,
            layout,
            pixel_layout,
            order: order.as_ref(),
            background,
            info: info.as_ref(),
            source,
            scratch,
            valid,
        };
        tracing::debug!(strategy = config.strategy.name(), "compositing");
        let mut image = strategy::composite(&mut frame)?;
        let Frame {
            source,
            scratch,
            valid,
            ..
        } = frame;
        let renders = source.renders();
        source.recycle(scratch);

        if let Some(image) = image.as_mut() {
            image.adjust_for_output(config.composite_one_buffer);
        }
        if config.collect_images {
            check_collected(layout, displayed, image.as_ref(), valid)?;
        }

        *frames_drawn += 1;
        Ok(FrameOutput {
            image,
            valid_pixels: valid,
            stats: FrameStats {
                bytes_sent: counted.bytes_sent(),
                messages_sent: counted.messages_sent(),
                frames_drawn: *frames_drawn,
                renders,
            },
        })
    }
}

fn check_layout(layout: &TileLayout, num_processes: usize) -> SortlastResult<()> {
    if layout.num_processes() != num_processes {
        return Err(SortlastError::invalid_value(format!(
            "tile layout is for {} processes, the communicator has {num_processes}",
            layout.num_processes()
        )));
    }
    Ok(())
}

/// A collected frame hands each display rank its whole tile.
fn check_collected(
    layout: &TileLayout,
    displayed: Option<usize>,
    image: Option<&Image>,
    valid: Option<ValidPixels>,
) -> SortlastResult<()> {
    let Some(tile) = displayed else {
        return Ok(());
    };
    let image = image.ok_or_else(|| SortlastError::sanity(format!("display of tile {tile} got no image")))?;
    if valid.is_some_and(|v| v.tile != tile) {
        return Err(SortlastError::sanity(format!(
            "display of tile {tile} got pixels of another tile"
        )));
    }
    let v = layout.viewport(tile)?;
    if image.width() != v.width as usize || image.height() != v.height as usize {
        return Err(SortlastError::sanity(format!(
            "tile {tile} is {}x{} but the collected image is {}x{}",
            v.width,
            v.height,
            image.width(),
            image.height()
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/session/context.rs"]
mod tests;
