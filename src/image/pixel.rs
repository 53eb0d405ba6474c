//! Per-pixel blend and depth math on the packed sparse pixel encoding
//! (color bytes followed by a little-endian `f32` depth).

use crate::foundation::core::Rgba;
use crate::image::format::{ColorFormat, CompositeMode, DepthFormat, PixelLayout};

#[inline]
pub(crate) fn read_f32(bytes: &[u8], at: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    f32::from_le_bytes(raw)
}

#[inline]
pub(crate) fn write_f32(bytes: &mut [u8], at: usize, v: f32) {
    bytes[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

/// `dest = back * (1 - front.a) + front` on 8-bit premultiplied color.
#[inline]
pub(crate) fn blend_rgba8(front: &[u8], back: &[u8], dest: &mut [u8]) {
    let afactor = 255 - u32::from(front[3]);
    for c in 0..4 {
        dest[c] = ((u32::from(back[c]) * afactor) / 255 + u32::from(front[c])) as u8;
    }
}

/// `dest = back * (1 - front.a) + front` on float premultiplied color.
#[inline]
pub(crate) fn blend_f32(front: [f32; 4], back: [f32; 4]) -> [f32; 4] {
    let afactor = 1.0 - front[3];
    [
        back[0] * afactor + front[0],
        back[1] * afactor + front[1],
        back[2] * afactor + front[2],
        back[3] * afactor + front[3],
    ]
}

#[inline]
pub(crate) fn read_rgba_f32(bytes: &[u8]) -> [f32; 4] {
    [
        read_f32(bytes, 0),
        read_f32(bytes, 4),
        read_f32(bytes, 8),
        read_f32(bytes, 12),
    ]
}

#[inline]
pub(crate) fn write_rgba_f32(bytes: &mut [u8], v: [f32; 4]) {
    for (c, value) in v.iter().enumerate() {
        write_f32(bytes, c * 4, *value);
    }
}

/// Encoded color bytes for `color` in the given format.
pub(crate) fn encode_color(format: ColorFormat, color: Rgba, out: &mut [u8]) {
    match format {
        ColorFormat::None => {}
        ColorFormat::Rgba8 => out[..4].copy_from_slice(&color.to_rgba8()),
        ColorFormat::RgbaF32 => write_rgba_f32(out, color.0),
    }
}

/// Blend `front` over an opaque-or-not `under` color, writing encoded bytes
/// back into `color` (the "under" operation used for background correction).
pub(crate) fn blend_under(format: ColorFormat, color: &mut [u8], under: Rgba) {
    match format {
        ColorFormat::None => {}
        ColorFormat::Rgba8 => {
            let back = under.to_rgba8();
            let mut front = [0u8; 4];
            front.copy_from_slice(&color[..4]);
            blend_rgba8(&front, &back, &mut color[..4]);
        }
        ColorFormat::RgbaF32 => {
            let front = read_rgba_f32(color);
            write_rgba_f32(color, blend_f32(front, under.0));
        }
    }
}

/// True when a packed pixel is foreground under `mode`.
#[inline]
pub(crate) fn packed_is_active(mode: CompositeMode, layout: PixelLayout, px: &[u8]) -> bool {
    match mode {
        CompositeMode::ZBuffer => match layout.depth {
            DepthFormat::F32 => read_f32(px, layout.color_size()) < 1.0,
            DepthFormat::None => false,
        },
        CompositeMode::Blend => match layout.color {
            ColorFormat::Rgba8 => px[3] != 0,
            ColorFormat::RgbaF32 => read_f32(px, 12) != 0.0,
            ColorFormat::None => false,
        },
    }
}

/// Composite two packed pixels into `dest`. `front` is nearer in composite
/// order. In Z-buffer mode a depth tie keeps `front`.
#[inline]
pub(crate) fn composite_packed(
    mode: CompositeMode,
    layout: PixelLayout,
    front: &[u8],
    back: &[u8],
    dest: &mut [u8],
) {
    let size = layout.pixel_size();
    match mode {
        CompositeMode::ZBuffer => {
            let at = layout.color_size();
            if read_f32(front, at) <= read_f32(back, at) {
                dest[..size].copy_from_slice(&front[..size]);
            } else {
                dest[..size].copy_from_slice(&back[..size]);
            }
        }
        CompositeMode::Blend => match layout.color {
            ColorFormat::Rgba8 => blend_rgba8(front, back, dest),
            ColorFormat::RgbaF32 => {
                write_rgba_f32(dest, blend_f32(read_rgba_f32(front), read_rgba_f32(back)));
            }
            ColorFormat::None => {}
        },
    }
}

#[cfg(test)]
#[path = "../../tests/unit/image/pixel.rs"]
mod tests;
