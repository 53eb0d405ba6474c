//! Display tiles and how local geometry maps onto them.

/// Contained region and data replication.
pub mod contained;
/// Gathered per-rank tile contributions.
pub mod info;
/// Tile layout of the display.
pub mod layout;
/// Tile projection matrices.
pub mod project;
