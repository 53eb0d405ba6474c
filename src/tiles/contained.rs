//! Where the local geometry lands on the display and which tiles it touches.

use crate::foundation::core::{RenderMatrices, Viewport};
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::foundation::math::{matrix_multiply, matrix_vector_multiply};
use crate::tiles::layout::TileLayout;

/// Eight corners of an axis aligned box.
pub fn bounding_box(min: [f64; 3], max: [f64; 3]) -> Vec<[f64; 3]> {
    (0..8)
        .map(|corner| {
            [
                if corner & 1 == 0 { min[0] } else { max[0] },
                if corner & 2 == 0 { min[1] } else { max[1] },
                if corner & 4 == 0 { min[2] } else { max[2] },
            ]
        })
        .collect()
}

/// Screen region and depth range covered by the local geometry, and the
/// tiles it overlaps.
#[derive(Clone, Debug, PartialEq)]
pub struct Containment {
    /// Pixels of the global display the geometry may touch.
    pub viewport: Viewport,
    /// Nearest normalized depth.
    pub znear: f64,
    /// Farthest normalized depth.
    pub zfar: f64,
    /// Indices of overlapped tiles, ascending unless data replication
    /// reassigned them.
    pub tiles: Vec<usize>,
}

impl Containment {
    /// Every tile, used when no bounds were declared.
    pub fn everything(layout: &TileLayout) -> Self {
        let mut c = Self {
            viewport: layout.global_viewport(),
            znear: -1.0,
            zfar: 1.0,
            tiles: Vec::new(),
        };
        c.determine_tiles(layout);
        c
    }

    /// Project `vertices` and find the tiles they overlap. Without vertices
    /// everything is contained. `rendered` restricts the region to pixels a
    /// prerendered image declares valid.
    pub fn project(
        layout: &TileLayout,
        vertices: &[[f64; 3]],
        matrices: &RenderMatrices,
        rendered: Option<Viewport>,
    ) -> Self {
        let mut c = if vertices.is_empty() {
            Self::everything(layout)
        } else {
            let (viewport, znear, zfar) = project_vertices(vertices, matrices, layout.global_viewport());
            Self {
                viewport,
                znear,
                zfar,
                tiles: Vec::new(),
            }
        };
        if let Some(rendered) = rendered {
            c.viewport = c.viewport.intersect(rendered);
        }
        c.determine_tiles(layout);
        tracing::debug!(?c.viewport, c.znear, c.zfar, tiles = ?c.tiles, "contained viewport");
        c
    }

    /// Recompute `tiles` from `viewport` and the depth range.
    fn determine_tiles(&mut self, layout: &TileLayout) {
        let in_depth = self.znear <= 1.0 && self.zfar >= -1.0;
        self.tiles = if in_depth && !self.viewport.is_empty() {
            layout
                .tiles()
                .iter()
                .enumerate()
                .filter(|(_, t)| !self.viewport.intersect(t.viewport).is_empty())
                .map(|(i, _)| i)
                .collect()
        } else {
            Vec::new()
        };
    }

    /// One flag per tile.
    pub fn mask(&self, num_tiles: usize) -> Vec<bool> {
        let mut mask = vec![false; num_tiles];
        for &t in &self.tiles {
            if let Some(m) = mask.get_mut(t) {
                *m = true;
            }
        }
        mask
    }

    /// Shrink the work of `rank` when the ranks of `group` hold identical
    /// geometry. With at least as many ranks as contained tiles the tiles are
    /// dealt out, the displaying rank keeping its own tile; otherwise the
    /// contained region is cut into stripes.
    pub fn adjust_for_data_replication(
        &mut self,
        layout: &TileLayout,
        group: &[usize],
        rank: usize,
    ) -> SortlastResult<()> {
        if group.len() <= 1 {
            return Ok(());
        }
        if !group.contains(&rank) {
            return Err(SortlastError::invalid_value(
                "local process not part of data replication group",
            ));
        }
        if group.len() >= self.tiles.len() {
            self.deal_tiles(layout, group, rank)
        } else {
            self.split_viewport(layout, group, rank);
            Ok(())
        }
    }

    fn deal_tiles(&mut self, layout: &TileLayout, group: &[usize], rank: usize) -> SortlastResult<()> {
        let mut group = group.to_vec();
        let mut tiles = std::mem::take(&mut self.tiles);
        let mut rendering: Option<usize> = None;
        let mut num_rendering = 0usize;
        let mut allocation = 0usize;

        // A group member that displays a contained tile renders it alone.
        for idx in 0..tiles.len() {
            let display = layout.tile(tiles[idx])?.display_rank;
            if let Some(member) = group.iter().position(|&r| r == display) {
                if group[member] == rank {
                    rendering = Some(tiles[idx]);
                    num_rendering = 1;
                    allocation = 0;
                }
                tiles.swap_remove(idx);
                group.swap_remove(member);
                break;
            }
        }

        if !tiles.is_empty() {
            let mut per_tile = 0;
            let mut tile_idx = 0;
            for &member in &group {
                if tile_idx >= tiles.len() {
                    tile_idx = 0;
                    per_tile += 1;
                }
                if member == rank {
                    rendering = Some(tiles[tile_idx]);
                    allocation = per_tile;
                    num_rendering = per_tile + 1;
                } else if rendering == Some(tiles[tile_idx]) {
                    num_rendering += 1;
                }
                tile_idx += 1;
            }
        }

        match rendering {
            Some(tile) => {
                let tv = layout.viewport(tile)?;
                let stripe = tv.width / num_rendering as i32;
                let start = allocation as i32 * stripe;
                let width = if allocation == num_rendering - 1 {
                    tv.width - start
                } else {
                    stripe
                };
                self.viewport = Viewport::new(tv.x + start, tv.y, width, tv.height);
                self.tiles = vec![tile];
            }
            None => {
                self.viewport = Viewport::empty();
                self.tiles = Vec::new();
            }
        }
        Ok(())
    }

    fn split_viewport(&mut self, layout: &TileLayout, group: &[usize], rank: usize) {
        let mut group = group;
        let mut factor = 2;
        while factor <= group.len() {
            while group.len() % factor != 0 {
                factor += 1;
            }
            let vertical = self.viewport.width < self.viewport.height;
            let length = if vertical { self.viewport.height } else { self.viewport.width };
            let new_length = length / factor as i32;
            let group_rank = group.iter().position(|&r| r == rank).unwrap_or(0);
            let sub_size = group.len() / factor;
            let piece = group_rank / sub_size;
            group = &group[piece * sub_size..(piece + 1) * sub_size];
            let piece_length = if piece == factor - 1 {
                length - piece as i32 * new_length
            } else {
                new_length
            };
            if vertical {
                self.viewport.y += piece as i32 * new_length;
                self.viewport.height = piece_length;
            } else {
                self.viewport.x += piece as i32 * new_length;
                self.viewport.width = piece_length;
            }
        }
        // Depth was already checked against the full region.
        self.znear = 0.0;
        self.zfar = 0.0;
        self.determine_tiles(layout);
    }
}

/// Transform `vertices` to display coordinates and reduce them to a bounding
/// viewport and depth range, clipping against the near plane.
fn project_vertices(
    vertices: &[[f64; 3]],
    matrices: &RenderMatrices,
    global: Viewport,
) -> (Viewport, f64, f64) {
    let (gx, gy) = (f64::from(global.x), f64::from(global.y));
    let (gw, gh) = (f64::from(global.width), f64::from(global.height));
    let mut viewport_matrix = [0.0; 16];
    viewport_matrix[0] = gw;
    viewport_matrix[5] = gh;
    viewport_matrix[10] = 2.0;
    viewport_matrix[12] = gw + 2.0 * gx;
    viewport_matrix[13] = gh + 2.0 * gy;
    viewport_matrix[15] = 2.0;
    let transform = matrix_multiply(
        &viewport_matrix,
        &matrix_multiply(&matrices.projection, &matrices.modelview),
    );

    let transformed: Vec<[f64; 4]> = vertices
        .iter()
        .map(|v| matrix_vector_multiply(&transform, &[v[0], v[1], v[2], 1.0]))
        .collect();

    let mut left = gx + gw;
    let mut right = gx;
    let mut bottom = gy + gh;
    let mut top = gy;
    let mut znear: f64 = 1.0;
    let mut zfar: f64 = -1.0;
    let in_front = |v: &[f64; 4]| v[2] + v[3] >= 0.0;

    for v in &transformed {
        if in_front(v) {
            let invw = 1.0 / v[3];
            let (x, y, z) = (v[0] * invw, v[1] * invw, v[2] * invw);
            left = left.min(x);
            right = right.max(x);
            bottom = bottom.min(y);
            top = top.max(y);
            znear = znear.min(z);
            zfar = zfar.max(z);
        } else {
            // Project the crossing of each edge toward a visible vertex.
            for v2 in transformed.iter().filter(|v2| in_front(v2)) {
                let t = (v2[2] + v2[3]) / (v2[2] - v[2] + v2[3] - v[3]);
                let invw = 1.0 / ((v[3] - v2[3]) * t + v2[3]);
                let x = ((v[0] - v2[0]) * t + v2[0]) * invw;
                let y = ((v[1] - v2[1]) * t + v2[1]) * invw;
                left = left.min(x);
                right = right.max(x);
                bottom = bottom.min(y);
                top = top.max(y);
                znear = -1.0;
            }
        }
    }

    let left = left.floor().max(gx);
    let right = right.ceil().min(gx + gw);
    let bottom = bottom.floor().max(gy);
    let top = top.ceil().min(gy + gh);
    let viewport = if right > left && top > bottom {
        Viewport::new(left as i32, bottom as i32, (right - left) as i32, (top - bottom) as i32)
    } else {
        Viewport::empty()
    };
    (viewport, znear.max(-1.0), zfar.min(1.0))
}

#[cfg(test)]
#[path = "../../tests/unit/tiles/contained.rs"]
mod tests;
