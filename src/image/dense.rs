use crate::foundation::core::{Rgba, Viewport};
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::image::format::{ColorFormat, DepthFormat, PixelLayout};
use crate::image::pixel::{blend_under, encode_color, read_f32, read_rgba_f32};

/// Dense width x height buffer with optional color and depth planes.
///
/// Planes are stored separately, row-major from the bottom-left pixel, so a
/// contiguous pixel range of one plane can be shipped without repacking.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    layout: PixelLayout,
    width: usize,
    height: usize,
    color: Vec<u8>,
    depth: Vec<f32>,
}

impl Image {
    /// Zero-filled image (transparent color, zero depth).
    pub fn new(layout: PixelLayout, width: usize, height: usize) -> Self {
        let n = width * height;
        Self {
            layout,
            width,
            height,
            color: vec![0; n * layout.color_size()],
            depth: vec![0.0; if layout.depth == DepthFormat::None { 0 } else { n }],
        }
    }

    /// Wrap existing planes; plane lengths must match the dimensions.
    pub fn from_parts(
        layout: PixelLayout,
        width: usize,
        height: usize,
        color: Vec<u8>,
        depth: Vec<f32>,
    ) -> SortlastResult<Self> {
        let n = width * height;
        if color.len() != n * layout.color_size() {
            return Err(SortlastError::invalid_value(format!(
                "color plane has {} bytes, expected {}",
                color.len(),
                n * layout.color_size()
            )));
        }
        let want_depth = if layout.depth == DepthFormat::None { 0 } else { n };
        if depth.len() != want_depth {
            return Err(SortlastError::invalid_value(format!(
                "depth plane has {} values, expected {want_depth}",
                depth.len()
            )));
        }
        Ok(Self {
            layout,
            width,
            height,
            color,
            depth,
        })
    }

    /// Channel layout.
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// `width * height`.
    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }

    /// Raw color plane.
    pub fn color_bytes(&self) -> &[u8] {
        &self.color
    }

    /// Mutable raw color plane.
    pub fn color_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.color
    }

    /// Depth plane (empty when the layout has no depth).
    pub fn depth(&self) -> &[f32] {
        &self.depth
    }

    /// Mutable depth plane.
    pub fn depth_mut(&mut self) -> &mut [f32] {
        &mut self.depth
    }

    /// Resize the planes. Contents after a resize are unspecified.
    pub fn set_dimensions(&mut self, width: usize, height: usize) {
        let n = width * height;
        self.width = width;
        self.height = height;
        self.color.resize(n * self.layout.color_size(), 0);
        let depth_len = if self.layout.depth == DepthFormat::None { 0 } else { n };
        self.depth.resize(depth_len, 0.0);
    }

    /// Reinterpret with a new layout, keeping the dimensions.
    pub fn set_layout(&mut self, layout: PixelLayout) {
        if self.layout != layout {
            self.layout = layout;
            self.color.clear();
            self.depth.clear();
            self.set_dimensions(self.width, self.height);
        }
    }

    /// Drop the depth plane if this image has color and `composite_one_buffer` is on.
    pub fn adjust_for_output(&mut self, composite_one_buffer: bool) {
        if composite_one_buffer && self.layout.color != ColorFormat::None {
            self.layout.depth = DepthFormat::None;
            self.depth = Vec::new();
        }
    }

    /// Decoded color of pixel `i` as float RGBA, `None` without color.
    pub fn pixel_rgba(&self, i: usize) -> Option<[f32; 4]> {
        match self.layout.color {
            ColorFormat::None => None,
            ColorFormat::Rgba8 => {
                let c = &self.color[i * 4..i * 4 + 4];
                Some([c[0], c[1], c[2], c[3]].map(|v| f32::from(v) / 255.0))
            }
            ColorFormat::RgbaF32 => Some(read_rgba_f32(&self.color[i * 16..i * 16 + 16])),
        }
    }

    /// Color plane converted to 8-bit RGBA, `None` without color.
    pub fn to_rgba8(&self) -> Option<Vec<u8>> {
        match self.layout.color {
            ColorFormat::None => None,
            ColorFormat::Rgba8 => Some(self.color.clone()),
            ColorFormat::RgbaF32 => Some(
                (0..self.num_pixels())
                    .flat_map(|i| Rgba(read_rgba_f32(&self.color[i * 16..i * 16 + 16])).to_rgba8())
                    .collect(),
            ),
        }
    }

    pub(crate) fn read_packed(&self, i: usize, out: &mut [u8]) {
        let cs = self.layout.color_size();
        out[..cs].copy_from_slice(&self.color[i * cs..(i + 1) * cs]);
        if self.layout.depth == DepthFormat::F32 {
            out[cs..cs + 4].copy_from_slice(&self.depth[i].to_le_bytes());
        }
    }

    pub(crate) fn write_packed(&mut self, i: usize, px: &[u8]) {
        let cs = self.layout.color_size();
        self.color[i * cs..(i + 1) * cs].copy_from_slice(&px[..cs]);
        if self.layout.depth == DepthFormat::F32 {
            self.depth[i] = read_f32(px, cs);
        }
    }

    /// Write `count` consecutive background pixels starting at `start`.
    pub(crate) fn fill_background(&mut self, start: usize, count: usize, background: Rgba) {
        let cs = self.layout.color_size();
        if cs > 0 {
            let mut encoded = [0u8; 16];
            encode_color(self.layout.color, background, &mut encoded);
            for px in self.color[start * cs..(start + count) * cs].chunks_exact_mut(cs) {
                px.copy_from_slice(&encoded[..cs]);
            }
        }
        if self.layout.depth == DepthFormat::F32 {
            self.depth[start..start + count].fill(1.0);
        }
    }

    /// Set every pixel to `background` at the far plane.
    pub fn clear(&mut self, background: Rgba) {
        self.fill_background(0, self.num_pixels(), background);
    }

    /// Clear everything outside `region` (image-local coordinates).
    pub fn clear_around_region(&mut self, region: Viewport, background: Rgba) {
        if region.is_empty() {
            self.clear(background);
            return;
        }
        let width = self.width as i32;
        let height = self.height as i32;
        let x0 = region.x.clamp(0, width);
        let x1 = region.right().clamp(0, width);
        let y0 = region.y.clamp(0, height);
        let y1 = region.top().clamp(0, height);
        let w = self.width;
        for y in 0..self.height as i32 {
            let row = y as usize * w;
            if y < y0 || y >= y1 {
                self.fill_background(row, w, background);
            } else {
                self.fill_background(row, x0 as usize, background);
                self.fill_background(row + x1 as usize, w - x1 as usize, background);
            }
        }
    }

    /// Copy `count` pixels from `self[in_offset..]` to `out[out_offset..]`.
    pub fn copy_pixels(
        &self,
        in_offset: usize,
        out: &mut Image,
        out_offset: usize,
        count: usize,
    ) -> SortlastResult<()> {
        if self.layout != out.layout {
            return Err(SortlastError::invalid_value(
                "cannot copy pixels of images with different formats",
            ));
        }
        if in_offset + count > self.num_pixels() || out_offset + count > out.num_pixels() {
            return Err(SortlastError::invalid_value("pixels to copy are outside of image range"));
        }
        let cs = self.layout.color_size();
        out.color[out_offset * cs..(out_offset + count) * cs]
            .copy_from_slice(&self.color[in_offset * cs..(in_offset + count) * cs]);
        if self.layout.depth == DepthFormat::F32 {
            out.depth[out_offset..out_offset + count]
                .copy_from_slice(&self.depth[in_offset..in_offset + count]);
        }
        Ok(())
    }

    /// Copy a rectangle of pixels between images of the same layout.
    pub fn copy_region(
        &self,
        in_viewport: Viewport,
        out: &mut Image,
        out_viewport: Viewport,
    ) -> SortlastResult<()> {
        if self.layout != out.layout {
            return Err(SortlastError::invalid_value(
                "region copy only supports images of the same format",
            ));
        }
        if in_viewport.width != out_viewport.width || in_viewport.height != out_viewport.height {
            return Err(SortlastError::invalid_value(
                "sizes of input and output regions must be the same",
            ));
        }
        if in_viewport.is_empty() {
            return Ok(());
        }
        let in_bounds = Viewport::new(0, 0, self.width as i32, self.height as i32);
        let out_bounds = Viewport::new(0, 0, out.width as i32, out.height as i32);
        if !in_bounds.contains(in_viewport) || !out_bounds.contains(out_viewport) {
            return Err(SortlastError::invalid_value("region lies outside of image"));
        }
        let row = in_viewport.width as usize;
        for y in 0..in_viewport.height as usize {
            let src = (in_viewport.y as usize + y) * self.width + in_viewport.x as usize;
            let dst = (out_viewport.y as usize + y) * out.width + out_viewport.x as usize;
            self.copy_pixels(src, out, dst, row)?;
        }
        Ok(())
    }

    /// Blend every pixel over `true_background`.
    pub fn correct_background(&mut self, true_background: Rgba) {
        let cs = self.layout.color_size();
        if cs == 0 {
            return;
        }
        let format = self.layout.color;
        for px in self.color.chunks_exact_mut(cs) {
            blend_under(format, px, true_background);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/image/dense.rs"]
mod tests;
