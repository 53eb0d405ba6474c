//! Dense and run-length sparse images plus the pixel operations shared by
//! every compositing strategy.

pub(crate) mod codec;
pub(crate) mod composite;
pub(crate) mod dense;
pub(crate) mod format;
pub(crate) mod pixel;
pub(crate) mod sparse;
