use serde::{Deserialize, Serialize};

use crate::foundation::core::Viewport;
use crate::foundation::error::{SortlastError, SortlastResult};

/// One display tile: a rectangle of the global display and the rank that
/// shows it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Region of the global display.
    pub viewport: Viewport,
    /// Rank that displays the finished tile.
    pub display_rank: usize,
}

/// Serialized description of a tiled display.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TileLayoutDesc {
    /// Tiles in tile-index order.
    pub tiles: Vec<Tile>,
    /// Size of the buffer renderers draw into, `(width, height)`. Defaults to
    /// the largest tile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_render_size: Option<(usize, usize)>,
}

/// Tiles of the display and the quantities derived from them.
#[derive(Clone, Debug, PartialEq)]
pub struct TileLayout {
    num_processes: usize,
    tiles: Vec<Tile>,
    global_viewport: Viewport,
    max_width: usize,
    max_height: usize,
    physical_width: usize,
    physical_height: usize,
}

impl TileLayout {
    /// An empty layout for a group of `num_processes` ranks.
    pub fn new(num_processes: usize) -> Self {
        Self {
            num_processes,
            tiles: Vec::new(),
            global_viewport: Viewport::empty(),
            max_width: 0,
            max_height: 0,
            physical_width: 0,
            physical_height: 0,
        }
    }

    /// A single tile covering `width x height`, displayed on rank 0.
    pub fn single(num_processes: usize, width: i32, height: i32) -> SortlastResult<Self> {
        let mut layout = Self::new(num_processes);
        layout.add_tile(Viewport::new(0, 0, width, height), 0)?;
        Ok(layout)
    }

    /// Build from a serialized description.
    pub fn from_desc(desc: &TileLayoutDesc, num_processes: usize) -> SortlastResult<Self> {
        let mut layout = Self::new(num_processes);
        for tile in &desc.tiles {
            layout.add_tile(tile.viewport, tile.display_rank)?;
        }
        if let Some((w, h)) = desc.physical_render_size {
            layout.set_physical_render_size(w, h)?;
        }
        Ok(layout)
    }

    /// Serializable description of this layout.
    pub fn to_desc(&self) -> TileLayoutDesc {
        TileLayoutDesc {
            tiles: self.tiles.clone(),
            physical_render_size: Some((self.physical_width, self.physical_height)),
        }
    }

    /// Drop every tile.
    pub fn reset(&mut self) {
        *self = Self::new(self.num_processes);
    }

    /// Append a tile and return its index.
    pub fn add_tile(&mut self, viewport: Viewport, display_rank: usize) -> SortlastResult<usize> {
        if viewport.width < 1 || viewport.height < 1 {
            return Err(SortlastError::invalid_value(format!(
                "tried to create a tile with no pixels: {}x{}",
                viewport.width, viewport.height
            )));
        }
        if display_rank >= self.num_processes {
            return Err(SortlastError::invalid_value(format!(
                "display rank {display_rank} is not a valid rank for {} processes",
                self.num_processes
            )));
        }
        if self.tiles.iter().any(|t| t.display_rank == display_rank) {
            return Err(SortlastError::invalid_value(format!(
                "rank {display_rank} is already displaying a tile"
            )));
        }

        self.tiles.push(Tile {
            viewport,
            display_rank,
        });
        self.global_viewport = self.global_viewport.union(viewport);
        self.max_width = self.max_width.max(viewport.width as usize);
        self.max_height = self.max_height.max(viewport.height as usize);
        self.physical_width = self.max_width;
        self.physical_height = self.max_height;
        Ok(self.tiles.len() - 1)
    }

    /// Size of the buffer renderers draw into. Smaller than the largest tile
    /// is accepted but renders will be clipped.
    pub fn set_physical_render_size(&mut self, width: usize, height: usize) -> SortlastResult<()> {
        if width < 1 || height < 1 {
            return Err(SortlastError::invalid_value("physical render size must be positive"));
        }
        if width < self.max_width || height < self.max_height {
            tracing::warn!(
                width,
                height,
                max_width = self.max_width,
                max_height = self.max_height,
                "physical render dimensions not large enough to render all tiles"
            );
        }
        self.physical_width = width;
        self.physical_height = height;
        Ok(())
    }

    /// Number of processes the layout was built for.
    pub fn num_processes(&self) -> usize {
        self.num_processes
    }

    /// Number of tiles.
    pub fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// All tiles in index order.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Tile `index`.
    pub fn tile(&self, index: usize) -> SortlastResult<&Tile> {
        self.tiles
            .get(index)
            .ok_or_else(|| SortlastError::invalid_value(format!("no tile {index}")))
    }

    /// Viewport of tile `index`.
    pub fn viewport(&self, index: usize) -> SortlastResult<Viewport> {
        self.tile(index).map(|t| t.viewport)
    }

    /// Display rank of every tile, in tile order.
    pub fn display_nodes(&self) -> Vec<usize> {
        self.tiles.iter().map(|t| t.display_rank).collect()
    }

    /// Tile displayed by `rank`, if any.
    pub fn tile_displayed(&self, rank: usize) -> Option<usize> {
        self.tiles.iter().position(|t| t.display_rank == rank)
    }

    /// Union of all tile viewports.
    pub fn global_viewport(&self) -> Viewport {
        self.global_viewport
    }

    /// Widest tile.
    pub fn max_width(&self) -> usize {
        self.max_width
    }

    /// Tallest tile.
    pub fn max_height(&self) -> usize {
        self.max_height
    }

    /// `(width, height)` renderers are asked to fill.
    pub fn physical_render_size(&self) -> (usize, usize) {
        (self.physical_width, self.physical_height)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/tiles/layout.rs"]
mod tests;
