//! Tile images of the local geometry, rendered on demand and cached for the
//! rest of the frame.

use crate::foundation::core::{Matrix4, RenderMatrices, Rgba, Viewport};
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::foundation::math::matrix_multiply;
use crate::image::codec::compress_padded_into;
use crate::image::dense::Image;
use crate::image::format::{CompositeMode, PixelLayout};
use crate::image::sparse::SparseImage;
use crate::render::Renderer;
use crate::session::scratch::{ScratchArena, ScratchSlot};
use crate::tiles::layout::TileLayout;
use crate::tiles::project::{project_tile, viewport_project};

/// Where the pixels of a frame come from.
pub(crate) enum FrameInput<'a> {
    /// Draw on demand through the application callback.
    Render(&'a mut dyn Renderer),
    /// A finished image covering the global viewport.
    Prerendered(&'a Image),
}

impl<'a> FrameInput<'a> {
    /// The same input, borrowed only for `'b`.
    pub(crate) fn shorten<'b>(self) -> FrameInput<'b>
    where
        'a: 'b,
    {
        match self {
            FrameInput::Render(renderer) => FrameInput::Render(renderer),
            FrameInput::Prerendered(image) => FrameInput::Prerendered(image),
        }
    }
}

/// Which pixels of a source buffer (`screen`) land where in the tile
/// (`target`, tile-local).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Placement {
    screen: Viewport,
    target: Viewport,
}

impl Placement {
    const EMPTY: Placement = Placement {
        screen: Viewport::empty(),
        target: Viewport::empty(),
    };
}

#[derive(Debug)]
enum Pixels {
    /// Nothing to show on this tile.
    Blank,
    /// A buffer rendered for this tile alone.
    Own(Image),
    /// The shared floating-viewport buffer.
    Floating,
    /// The prerendered global image.
    Global,
}

/// Per-frame producer of tile images.
pub(crate) struct TileSource<'a> {
    input: FrameInput<'a>,
    layout: &'a TileLayout,
    pixel_layout: PixelLayout,
    mode: CompositeMode,
    background: Rgba,
    matrices: RenderMatrices,
    contained: Viewport,
    contained_mask: Vec<bool>,
    render_empty: bool,
    floating: bool,
    cache: Vec<Option<(Placement, Pixels)>>,
    floating_buffer: Option<Image>,
    renders: u64,
}

impl<'a> TileSource<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        input: FrameInput<'a>,
        layout: &'a TileLayout,
        pixel_layout: PixelLayout,
        mode: CompositeMode,
        background: Rgba,
        matrices: RenderMatrices,
        contained: Viewport,
        contained_mask: Vec<bool>,
        render_empty: bool,
        floating: bool,
    ) -> SortlastResult<Self> {
        if let FrameInput::Prerendered(image) = &input {
            let global = layout.global_viewport();
            if image.width() != global.width as usize || image.height() != global.height as usize {
                return Err(SortlastError::invalid_value(format!(
                    "prerendered image is {}x{}, the display is {}x{}",
                    image.width(),
                    image.height(),
                    global.width,
                    global.height
                )));
            }
            if image.layout() != pixel_layout {
                return Err(SortlastError::invalid_value(
                    "prerendered image format does not match the frame's pixel format",
                ));
            }
        }
        Ok(Self {
            input,
            layout,
            pixel_layout,
            mode,
            background,
            matrices,
            contained,
            contained_mask,
            render_empty,
            floating,
            cache: (0..layout.num_tiles()).map(|_| None).collect(),
            floating_buffer: None,
            renders: 0,
        })
    }

    /// Renderer invocations so far.
    pub(crate) fn renders(&self) -> u64 {
        self.renders
    }

    /// Write the local image of `tile` into `out`, resized to the tile.
    /// Pixels without local geometry get the working background.
    pub(crate) fn tile_image(
        &mut self,
        tile: usize,
        out: &mut Image,
        scratch: &mut ScratchArena,
    ) -> SortlastResult<()> {
        self.prepare(tile, scratch)?;
        let tv = self.layout.viewport(tile)?;
        out.set_layout(self.pixel_layout);
        out.set_dimensions(tv.width as usize, tv.height as usize);
        match self.pixels(tile)? {
            Some((placement, buffer)) => {
                buffer.copy_region(placement.screen, out, placement.target)?;
                out.clear_around_region(placement.target, self.background);
            }
            None => out.clear(self.background),
        }
        Ok(())
    }

    /// Compressed local image of `tile`, padded to the tile size. The
    /// stream reuses the arena's [`ScratchSlot::WorkingSparse`] buffer.
    pub(crate) fn compressed_tile_image(
        &mut self,
        tile: usize,
        scratch: &mut ScratchArena,
    ) -> SortlastResult<SparseImage> {
        self.prepare(tile, scratch)?;
        let tv = self.layout.viewport(tile)?;
        let (tw, th) = (tv.width as usize, tv.height as usize);
        let working = scratch.take_sparse(ScratchSlot::WorkingSparse, self.pixel_layout, tw, th);
        match self.pixels(tile)? {
            Some((placement, buffer)) => compress_padded_into(
                working.into_stream(),
                buffer,
                placement.screen,
                placement.target,
                tw,
                th,
                self.mode,
            ),
            None => Ok(working),
        }
    }

    /// Return render buffers to the arena.
    pub(crate) fn recycle(self, scratch: &mut ScratchArena) {
        for (_, pixels) in self.cache.into_iter().flatten() {
            if let Pixels::Own(image) = pixels {
                scratch.put_image(ScratchSlot::RenderBuffer, image);
            }
        }
        if let Some(image) = self.floating_buffer {
            scratch.put_image(ScratchSlot::RenderBuffer, image);
        }
    }

    fn pixels(&self, tile: usize) -> SortlastResult<Option<(Placement, &Image)>> {
        let (placement, pixels) = self.cache[tile]
            .as_ref()
            .ok_or_else(|| SortlastError::sanity(format!("tile {tile} was never prepared")))?;
        let buffer = match pixels {
            Pixels::Blank => return Ok(None),
            Pixels::Own(image) => image,
            Pixels::Floating => self
                .floating_buffer
                .as_ref()
                .ok_or_else(|| SortlastError::sanity("floating viewport was never rendered"))?,
            Pixels::Global => match &self.input {
                FrameInput::Prerendered(image) => *image,
                FrameInput::Render(_) => {
                    return Err(SortlastError::sanity("no prerendered image for this frame"));
                }
            },
        };
        if placement.target.is_empty() {
            return Ok(None);
        }
        Ok(Some((*placement, buffer)))
    }

    fn prepare(&mut self, tile: usize, scratch: &mut ScratchArena) -> SortlastResult<()> {
        if tile >= self.cache.len() {
            return Err(SortlastError::invalid_value(format!("no tile {tile}")));
        }
        if self.cache[tile].is_some() {
            return Ok(());
        }
        let entry = if matches!(self.input, FrameInput::Prerendered(_)) {
            self.place_prerendered(tile)?
        } else {
            self.render_tile(tile, scratch)?
        };
        self.cache[tile] = Some(entry);
        Ok(())
    }

    fn place_prerendered(&self, tile: usize) -> SortlastResult<(Placement, Pixels)> {
        let tv = self.layout.viewport(tile)?;
        let global = self.layout.global_viewport();
        let screen_global = tv.intersect(self.contained);
        if !self.contained_mask[tile] || screen_global.is_empty() {
            return Ok((Placement::EMPTY, Pixels::Blank));
        }
        let placement = Placement {
            screen: screen_global.relative_to(global.x, global.y),
            target: screen_global.relative_to(tv.x, tv.y),
        };
        Ok((placement, Pixels::Global))
    }

    fn render_tile(&mut self, tile: usize, scratch: &mut ScratchArena) -> SortlastResult<(Placement, Pixels)> {
        let tv = self.layout.viewport(tile)?;
        let (pw, ph) = self.layout.physical_render_size();
        let buffer_bounds = Viewport::new(0, 0, pw as i32, ph as i32);
        let contained = self.contained;
        let overlap = contained.intersect(tv);

        if !self.contained_mask[tile] || overlap.is_empty() {
            tracing::debug!(tile, "tile not contained");
            if self.render_empty {
                let projection = project_tile(self.layout, tile, &self.matrices.projection)?;
                let image = self.render(projection, buffer_bounds, scratch)?;
                scratch.put_image(ScratchSlot::RenderBuffer, image);
            }
            return Ok((Placement::EMPTY, Pixels::Blank));
        }

        if tv.contains(contained) {
            tracing::debug!(tile, "contained region fits the tile");
            let region = contained.relative_to(tv.x, tv.y).intersect(buffer_bounds);
            return self.render_own(tile, region, scratch);
        }

        if !self.floating || contained.width as usize > pw || contained.height as usize > ph {
            tracing::debug!(tile, "contained region clipped to the tile");
            let region = overlap.relative_to(tv.x, tv.y).intersect(buffer_bounds);
            return self.render_own(tile, region, scratch);
        }

        tracing::debug!(tile, "using floating viewport");
        if self.floating_buffer.is_none() {
            let rendered = Viewport::new(contained.x, contained.y, pw as i32, ph as i32);
            let projection = matrix_multiply(
                &viewport_project(rendered, self.layout.global_viewport())?,
                &self.matrices.projection,
            );
            let readback = Viewport::new(0, 0, contained.width, contained.height);
            let image = self.render(projection, readback, scratch)?;
            self.floating_buffer = Some(image);
        }
        let (sx, tx, width) = float_axis(contained.x, contained.width, tv.x, tv.width);
        let (sy, ty, height) = float_axis(contained.y, contained.height, tv.y, tv.height);
        let placement = Placement {
            screen: Viewport::new(sx, sy, width, height),
            target: Viewport::new(tx, ty, width, height),
        };
        Ok((placement, Pixels::Floating))
    }

    fn render_own(
        &mut self,
        tile: usize,
        region: Viewport,
        scratch: &mut ScratchArena,
    ) -> SortlastResult<(Placement, Pixels)> {
        if region.is_empty() {
            return Ok((Placement::EMPTY, Pixels::Blank));
        }
        let projection = project_tile(self.layout, tile, &self.matrices.projection)?;
        let image = self.render(projection, region, scratch)?;
        let placement = Placement {
            screen: region,
            target: region,
        };
        Ok((placement, Pixels::Own(image)))
    }

    fn render(
        &mut self,
        projection: Matrix4,
        readback: Viewport,
        scratch: &mut ScratchArena,
    ) -> SortlastResult<Image> {
        let FrameInput::Render(renderer) = &mut self.input else {
            return Err(SortlastError::sanity("asked to render a prerendered frame"));
        };
        let (pw, ph) = self.layout.physical_render_size();
        let mut image = scratch.take_image(ScratchSlot::RenderBuffer, self.pixel_layout, pw, ph);
        image.clear(self.background);
        let matrices = RenderMatrices {
            projection,
            modelview: self.matrices.modelview,
        };
        renderer.render(readback, &matrices, self.background, &mut image)?;
        if image.width() != pw || image.height() != ph || image.layout() != self.pixel_layout {
            return Err(SortlastError::sanity(
                "renderer changed the size or format of the render buffer",
            ));
        }
        self.renders += 1;
        Ok(image)
    }
}

/// Map one axis of the floating buffer onto a tile: `(source start, target
/// start, length)`.
fn float_axis(c_start: i32, c_len: i32, t_start: i32, t_len: i32) -> (i32, i32, i32) {
    if c_start < t_start {
        let s = t_start - c_start;
        (s, 0, (c_len - s).min(t_len))
    } else {
        let t = c_start - t_start;
        (0, t, (t_len - t).min(c_len))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/source.rs"]
mod tests;
