//! Projection adjustments that make a renderer draw one region of the global
//! display into its own buffer.

use crate::foundation::core::{Matrix4, Viewport};
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::foundation::math::{matrix_multiply, matrix_ortho};
use crate::tiles::layout::TileLayout;

/// Matrix that maps normalized device coordinates of the global display to
/// those of `region`, so the region fills the whole render buffer.
pub fn viewport_project(region: Viewport, global: Viewport) -> SortlastResult<Matrix4> {
    if region.is_empty() {
        return Err(SortlastError::invalid_value("cannot project onto an empty viewport"));
    }
    let (w, h) = (f64::from(region.width), f64::from(region.height));
    let mut m = [0.0; 16];
    m[0] = f64::from(global.width) / w;
    m[5] = f64::from(global.height) / h;
    m[10] = 1.0;
    m[12] = f64::from(global.width + 2 * global.x - 2 * region.x - region.width) / w;
    m[13] = f64::from(global.height + 2 * global.y - 2 * region.y - region.height) / h;
    m[15] = 1.0;
    Ok(m)
}

/// Projection that renders tile `tile` into the lower left corner of the
/// physical render buffer.
pub fn project_tile(layout: &TileLayout, tile: usize, global_projection: &Matrix4) -> SortlastResult<Matrix4> {
    let viewport = layout.viewport(tile)?;
    let tile_proj = viewport_project(viewport, layout.global_viewport())?;
    let (pw, ph) = layout.physical_render_size();
    let (tw, th) = (viewport.width as usize, viewport.height as usize);
    let tile_proj = if pw != tw || ph != th {
        let shrink = matrix_ortho(
            -1.0,
            2.0 * pw as f64 / tw as f64 - 1.0,
            -1.0,
            2.0 * ph as f64 / th as f64 - 1.0,
            1.0,
            -1.0,
        );
        matrix_multiply(&shrink, &tile_proj)
    } else {
        tile_proj
    };
    Ok(matrix_multiply(&tile_proj, global_projection))
}

#[cfg(test)]
#[path = "../../tests/unit/tiles/project.rs"]
mod tests;
