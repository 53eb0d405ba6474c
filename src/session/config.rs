use serde::{Deserialize, Serialize};

use crate::foundation::error::{SortlastError, SortlastResult};
use crate::image::format::{ColorFormat, CompositeMode, DepthFormat, PixelLayout};

/// How tiles are composited across processes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Every process sends each rendered tile straight to its display.
    Direct,
    /// One tile at a time, across all processes.
    Sequential,
    /// Process groups per tile, fragments gathered by screen split.
    Split,
    /// Process groups per tile, proportional to contributors.
    #[default]
    Reduce,
    /// Pairwise tile transfers toward the display ranks.
    Vtree,
}

impl Strategy {
    /// Whether the strategy can honor a composite order.
    pub fn supports_ordering(self) -> bool {
        match self {
            Strategy::Direct | Strategy::Sequential | Strategy::Reduce => true,
            Strategy::Split | Strategy::Vtree => false,
        }
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Strategy::Direct => "Direct",
            Strategy::Sequential => "Sequential",
            Strategy::Split => "Split",
            Strategy::Reduce => "Reduce",
            Strategy::Vtree => "Virtual Tree",
        }
    }
}

/// How one tile is composited within a process group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleImageStrategy {
    /// Radix-kr for groups larger than one.
    #[default]
    Automatic,
    /// Every member sends its whole image to the destination.
    Direct,
    /// Binary swap with telescoping for non power-of-two groups.
    Bswap,
    /// Binary swap after folding into a power-of-two group.
    BswapFolding,
    /// Recursive halving toward the destination.
    Tree,
    /// Radix-k with exact factorization.
    Radixk,
    /// Radix-k with remainders.
    Radixkr,
}

impl SingleImageStrategy {
    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            SingleImageStrategy::Automatic => "Automatic",
            SingleImageStrategy::Direct => "Direct",
            SingleImageStrategy::Bswap => "Binary Swap",
            SingleImageStrategy::BswapFolding => "Folded Binary Swap",
            SingleImageStrategy::Tree => "Binary Tree",
            SingleImageStrategy::Radixk => "Radix-k",
            SingleImageStrategy::Radixkr => "Radix-kr",
        }
    }
}

/// Settings that stay fixed for the duration of one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Depth test or alpha blending.
    pub composite_mode: CompositeMode,
    /// Color channel format.
    pub color_format: ColorFormat,
    /// Depth channel format. Ignored in blend mode.
    pub depth_format: DepthFormat,
    /// Multi-tile strategy.
    pub strategy: Strategy,
    /// Strategy for compositing one tile within a group.
    pub single_image_strategy: SingleImageStrategy,
    /// Preferred radix for the radix-k family.
    pub magic_k: usize,
    /// Upper bound on the partitions a single image is split into.
    pub max_image_split: usize,
    /// Composite following `composite_order`.
    pub ordered_composite: bool,
    /// Interlace images before splitting them.
    pub interlace_images: bool,
    /// Gather the finished tile at its display rank.
    pub collect_images: bool,
    /// Blend the requested background back in after blend compositing.
    pub correct_colored_background: bool,
    /// Drop depth from output images that carry color.
    pub composite_one_buffer: bool,
    /// Render tiles even when no geometry projects onto them.
    pub render_empty_images: bool,
    /// Render the whole contained region once when it spans several tiles.
    pub floating_viewport: bool,
    /// Front-to-back rank permutation; identity when absent.
    pub composite_order: Option<Vec<usize>>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            composite_mode: CompositeMode::ZBuffer,
            color_format: ColorFormat::Rgba8,
            depth_format: DepthFormat::F32,
            strategy: Strategy::Reduce,
            single_image_strategy: SingleImageStrategy::Automatic,
            magic_k: 8,
            max_image_split: 512,
            ordered_composite: false,
            interlace_images: true,
            collect_images: true,
            correct_colored_background: false,
            composite_one_buffer: true,
            render_empty_images: false,
            floating_viewport: true,
            composite_order: None,
        }
    }
}

impl FrameConfig {
    /// Reject settings no strategy can run with on `num_processes` ranks.
    pub fn validate(&self, num_processes: usize) -> SortlastResult<()> {
        if self.magic_k < 2 {
            return Err(SortlastError::invalid_value(format!(
                "magic k must be at least 2, got {}",
                self.magic_k
            )));
        }
        if self.max_image_split < 1 {
            return Err(SortlastError::invalid_value("max image split must be at least 1"));
        }
        if self.composite_mode == CompositeMode::ZBuffer && self.depth_format == DepthFormat::None {
            return Err(SortlastError::invalid_operation(
                "Z buffer compositing requires a depth format",
            ));
        }
        if self.composite_mode == CompositeMode::Blend && self.color_format == ColorFormat::None {
            return Err(SortlastError::invalid_operation("blend compositing requires a color format"));
        }
        if self.ordered_composite && !self.strategy.supports_ordering() {
            return Err(SortlastError::invalid_operation(format!(
                "strategy {} does not support ordered compositing",
                self.strategy.name()
            )));
        }
        if let Some(order) = &self.composite_order {
            CompositeOrder::new(order.clone(), num_processes)?;
        }
        Ok(())
    }

    /// Pixel layout of images while compositing. Blend mode never carries
    /// depth.
    pub fn pixel_layout(&self) -> PixelLayout {
        match self.composite_mode {
            CompositeMode::ZBuffer => PixelLayout::new(self.color_format, self.depth_format),
            CompositeMode::Blend => PixelLayout::new(self.color_format, DepthFormat::None),
        }
    }

    /// Composite order in effect for `num_processes` ranks, identity when
    /// none was set.
    pub fn effective_order(&self, num_processes: usize) -> SortlastResult<CompositeOrder> {
        match &self.composite_order {
            Some(order) => CompositeOrder::new(order.clone(), num_processes),
            None => Ok(CompositeOrder::identity(num_processes)),
        }
    }
}

/// A front-to-back permutation of ranks and its inverse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeOrder {
    ranks: Vec<usize>,
    positions: Vec<usize>,
}

impl CompositeOrder {
    /// Validate `ranks` as a permutation of `0..num_processes`.
    pub fn new(ranks: Vec<usize>, num_processes: usize) -> SortlastResult<Self> {
        if ranks.len() != num_processes {
            return Err(SortlastError::invalid_value(format!(
                "composite order lists {} ranks for {num_processes} processes",
                ranks.len()
            )));
        }
        let mut positions = vec![usize::MAX; num_processes];
        for (pos, &rank) in ranks.iter().enumerate() {
            if rank >= num_processes || positions[rank] != usize::MAX {
                return Err(SortlastError::invalid_value("invalid composite order"));
            }
            positions[rank] = pos;
        }
        Ok(Self { ranks, positions })
    }

    /// Ranks in their own order.
    pub fn identity(num_processes: usize) -> Self {
        Self {
            ranks: (0..num_processes).collect(),
            positions: (0..num_processes).collect(),
        }
    }

    /// Rank drawn at `position` (0 is front-most).
    pub fn rank_at(&self, position: usize) -> usize {
        self.ranks[position]
    }

    /// Position of `rank` in the order.
    pub fn position_of(&self, rank: usize) -> usize {
        self.positions[rank]
    }

    /// Whether `a` is drawn in front of `b`.
    pub fn in_front(&self, a: usize, b: usize) -> bool {
        self.positions[a] < self.positions[b]
    }

    /// Ranks front to back.
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    /// Number of ranks.
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    /// Whether the order is empty.
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/config.rs"]
mod tests;
