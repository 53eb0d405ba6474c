use serde::{Deserialize, Serialize};

use crate::foundation::core::{RenderMatrices, Rgba, Viewport};
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::foundation::math::{matrix_multiply, matrix_vector_multiply};
use crate::image::dense::Image;
use crate::image::format::{CompositeMode, DepthFormat, MAX_PIXEL_SIZE};
use crate::image::pixel::{composite_packed, encode_color};
use crate::render::Renderer;

/// Flat axis aligned rectangle at one object-space depth.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Lower left corner in object space.
    pub min: [f64; 2],
    /// Upper right corner in object space.
    pub max: [f64; 2],
    /// Object-space z of the whole rectangle.
    pub depth: f64,
    /// Premultiplied color.
    pub color: Rgba,
}

/// Rasterizes [`Rect`]s; used by the simulator binary and the tests.
///
/// With a depth channel the nearest rectangle wins. Without one rectangles
/// are blended far to near.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RectRenderer {
    rects: Vec<Rect>,
}

impl RectRenderer {
    /// Renderer drawing `rects`.
    pub fn new(rects: Vec<Rect>) -> Self {
        Self { rects }
    }

    /// Rectangles drawn.
    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// Corners of every rectangle, suitable as bounding vertices.
    pub fn bounding_vertices(&self) -> Vec<[f64; 3]> {
        self.rects
            .iter()
            .flat_map(|r| {
                [
                    [r.min[0], r.min[1], r.depth],
                    [r.max[0], r.min[1], r.depth],
                    [r.min[0], r.max[1], r.depth],
                    [r.max[0], r.max[1], r.depth],
                ]
            })
            .collect()
    }
}

/// Pixel range `[start, end)` whose centers fall inside `[lo, hi)`.
fn covered(lo: f64, hi: f64, limit: usize) -> (usize, usize) {
    let clamp = |v: f64| v.clamp(0.0, limit as f64) as usize;
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    (clamp((lo - 0.5).ceil()), clamp((hi - 0.5).ceil()))
}

impl Renderer for RectRenderer {
    fn render(
        &mut self,
        readback: Viewport,
        matrices: &RenderMatrices,
        background: Rgba,
        image: &mut Image,
    ) -> SortlastResult<()> {
        image.clear(background);
        let layout = image.layout();
        let (w, h) = (image.width(), image.height());
        let bounds = Viewport::new(0, 0, w as i32, h as i32).intersect(readback);
        if bounds.is_empty() {
            return Ok(());
        }
        let transform = matrix_multiply(&matrices.projection, &matrices.modelview);
        let to_window = |x: f64, y: f64, z: f64| -> SortlastResult<[f64; 3]> {
            let v = matrix_vector_multiply(&transform, &[x, y, z, 1.0]);
            if v[3] <= 0.0 {
                return Err(SortlastError::invalid_value("rectangle behind the eye"));
            }
            Ok([
                (v[0] / v[3] + 1.0) * 0.5 * w as f64,
                (v[1] / v[3] + 1.0) * 0.5 * h as f64,
                (v[2] / v[3] + 1.0) * 0.5,
            ])
        };

        let mut order: Vec<&Rect> = self.rects.iter().collect();
        if layout.depth == DepthFormat::None {
            // Blending needs far to near.
            order.sort_by(|a, b| b.depth.total_cmp(&a.depth));
        }

        let color_size = layout.color_size();
        let mut px = [0u8; MAX_PIXEL_SIZE];
        let mut behind = [0u8; MAX_PIXEL_SIZE];
        let mut out = [0u8; MAX_PIXEL_SIZE];
        for rect in order {
            let lo = to_window(rect.min[0], rect.min[1], rect.depth)?;
            let hi = to_window(rect.max[0], rect.max[1], rect.depth)?;
            let depth = lo[2] as f32;
            if !(0.0..1.0).contains(&depth) {
                continue;
            }
            let (x0, x1) = covered(lo[0], hi[0], w);
            let (y0, y1) = covered(lo[1], hi[1], h);
            let x0 = x0.max(bounds.x as usize);
            let x1 = x1.min(bounds.right() as usize);
            let y0 = y0.max(bounds.y as usize);
            let y1 = y1.min(bounds.top() as usize);
            for y in y0..y1 {
                for x in x0..x1 {
                    let i = y * w + x;
                    match layout.depth {
                        DepthFormat::F32 => {
                            if depth >= image.depth()[i] {
                                continue;
                            }
                            encode_color(layout.color, rect.color, &mut px);
                            px[color_size..color_size + 4].copy_from_slice(&depth.to_le_bytes());
                            image.write_packed(i, &px);
                        }
                        DepthFormat::None => {
                            image.read_packed(i, &mut behind);
                            encode_color(layout.color, rect.color, &mut px);
                            composite_packed(CompositeMode::Blend, layout, &px, &behind, &mut out);
                            image.write_packed(i, &out);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/rect.rs"]
mod tests;
