//! Producing tile images: the renderer callback, a reference renderer and the
//! per-frame source strategies pull tile images from.

mod rect;
mod source;

pub use rect::{Rect, RectRenderer};
pub(crate) use source::{FrameInput, TileSource};

use crate::foundation::core::{RenderMatrices, Rgba, Viewport};
use crate::foundation::error::SortlastResult;
use crate::image::dense::Image;

/// Application callback that draws the local geometry.
///
/// The engine hands over a buffer of the physical render size in the frame's
/// pixel layout. `readback` is the part of the buffer that will be used; a
/// renderer may restrict drawing to it. Resizing the buffer is an error.
pub trait Renderer {
    /// Draw with `matrices` into `image`, which is already cleared to
    /// `background`.
    fn render(
        &mut self,
        readback: Viewport,
        matrices: &RenderMatrices,
        background: Rgba,
        image: &mut Image,
    ) -> SortlastResult<()>;
}

impl<F> Renderer for F
where
    F: FnMut(Viewport, &RenderMatrices, Rgba, &mut Image) -> SortlastResult<()>,
{
    fn render(
        &mut self,
        readback: Viewport,
        matrices: &RenderMatrices,
        background: Rgba,
        image: &mut Image,
    ) -> SortlastResult<()> {
        self(readback, matrices, background, image)
    }
}
