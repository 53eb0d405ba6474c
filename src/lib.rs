//! Sort-last parallel image compositing.
//!
//! Every process renders its share of the geometry into full tile images;
//! `sortlast` merges those images across processes so that each display rank
//! ends up with its finished tile. The public API is session-oriented:
//!
//! - Describe the display with a [`TileLayout`]
//! - Create a [`Context`] over any [`Communicator`]
//! - Call [`Context::draw_frame`] with a [`Renderer`], or
//!   [`Context::composite_image`] with an image rendered elsewhere
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod comm;
mod foundation;
mod image;
mod render;
mod schedule;
mod session;
mod single;
mod strategy;
mod tiles;

pub use crate::comm::local::{LocalComm, LocalFabric, SendMode};
pub use crate::comm::{Communicator, RESERVED_TAG_BASE, Request, Tag};
pub use crate::foundation::core::{Matrix4, RenderMatrices, Rgba, Viewport};
pub use crate::foundation::error::{SortlastError, SortlastResult};
pub use crate::foundation::math::{matrix_identity, matrix_multiply, matrix_ortho};
pub use crate::image::codec::{compress_image, decompress_image};
pub use crate::image::dense::Image;
pub use crate::image::format::{ColorFormat, CompositeMode, DepthFormat, PixelLayout};
pub use crate::image::sparse::SparseImage;
pub use crate::render::{Rect, RectRenderer, Renderer};
pub use crate::session::config::{CompositeOrder, FrameConfig, SingleImageStrategy, Strategy};
pub use crate::session::context::{Context, FrameOutput, FrameStats};
pub use crate::session::scratch::{ScratchArena, ScratchOpts, ScratchSlot, ScratchStats};
pub use crate::strategy::ValidPixels;
pub use crate::tiles::info::TileInfo;
pub use crate::tiles::layout::{Tile, TileLayout, TileLayoutDesc};
