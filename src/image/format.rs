use crate::foundation::error::{SortlastError, SortlastResult};

/// Color channel encoding of an image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    /// No color channel.
    None,
    /// Premultiplied RGBA, one byte per channel.
    #[default]
    Rgba8,
    /// Premultiplied RGBA, one `f32` per channel.
    RgbaF32,
}

impl ColorFormat {
    /// Bytes per pixel.
    pub fn pixel_size(self) -> usize {
        match self {
            ColorFormat::None => 0,
            ColorFormat::Rgba8 => 4,
            ColorFormat::RgbaF32 => 16,
        }
    }

    pub(crate) fn wire_id(self) -> u32 {
        match self {
            ColorFormat::None => 0,
            ColorFormat::Rgba8 => 1,
            ColorFormat::RgbaF32 => 2,
        }
    }

    pub(crate) fn from_wire(id: u32) -> SortlastResult<Self> {
        match id {
            0 => Ok(ColorFormat::None),
            1 => Ok(ColorFormat::Rgba8),
            2 => Ok(ColorFormat::RgbaF32),
            other => Err(SortlastError::invalid_enum(format!("unknown color format id {other}"))),
        }
    }
}

/// Depth channel encoding of an image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthFormat {
    /// No depth channel.
    None,
    /// One `f32` per pixel, `1.0` is the far plane.
    #[default]
    F32,
}

impl DepthFormat {
    /// Bytes per pixel.
    pub fn pixel_size(self) -> usize {
        match self {
            DepthFormat::None => 0,
            DepthFormat::F32 => 4,
        }
    }

    pub(crate) fn wire_id(self) -> u32 {
        match self {
            DepthFormat::None => 0,
            DepthFormat::F32 => 1,
        }
    }

    pub(crate) fn from_wire(id: u32) -> SortlastResult<Self> {
        match id {
            0 => Ok(DepthFormat::None),
            1 => Ok(DepthFormat::F32),
            other => Err(SortlastError::invalid_enum(format!("unknown depth format id {other}"))),
        }
    }
}

/// How two overlapping fragments are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeMode {
    /// Nearest depth wins.
    #[default]
    ZBuffer,
    /// Front-over-back alpha blending of premultiplied color.
    Blend,
}

/// Channel layout shared by every image of one compositing session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelLayout {
    /// Color encoding.
    pub color: ColorFormat,
    /// Depth encoding.
    pub depth: DepthFormat,
}

/// Largest possible encoded pixel: float RGBA plus float depth.
pub(crate) const MAX_PIXEL_SIZE: usize = 20;

impl PixelLayout {
    /// Build a layout from both formats.
    pub const fn new(color: ColorFormat, depth: DepthFormat) -> Self {
        Self { color, depth }
    }

    /// Bytes of color per pixel.
    pub fn color_size(self) -> usize {
        self.color.pixel_size()
    }

    /// Bytes of depth per pixel.
    pub fn depth_size(self) -> usize {
        self.depth.pixel_size()
    }

    /// Bytes per encoded sparse pixel (color followed by depth).
    pub fn pixel_size(self) -> usize {
        self.color_size() + self.depth_size()
    }
}
