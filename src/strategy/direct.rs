//! Every rank ships each tile it renders straight to the tile's display.

use crate::foundation::error::SortlastResult;
use crate::image::dense::Image;
use crate::session::scratch::ScratchSlot;
use crate::strategy::Frame;
use crate::strategy::common::render_transfer_full_images;

#[tracing::instrument(level = "debug", skip_all, fields(rank = frame.rank()))]
pub(crate) fn compose(frame: &mut Frame<'_>) -> SortlastResult<Option<Image>> {
    let rank = frame.rank();
    let display_tile = frame.layout.tile_displayed(rank);
    let contributors = match display_tile {
        Some(tile) => frame.info()?.contrib_counts()[tile],
        None => 0,
    };
    let tile_image_dest = frame.layout.display_nodes();

    let (max_w, max_h) = (frame.layout.max_width(), frame.layout.max_height());
    let mut image = frame
        .scratch
        .take_image(ScratchSlot::TileImage, frame.pixel_layout, max_w, max_h);
    render_transfer_full_images(frame, &tile_image_dest, &mut image)?;

    let Some(tile) = display_tile else {
        frame.scratch.put_image(ScratchSlot::TileImage, image);
        return Ok(None);
    };
    if contributors > 0 {
        if frame.background.needs_correction {
            image.correct_background(frame.background.true_color);
        }
    } else {
        tracing::debug!(tile, "returning blank tile");
        let (w, h) = frame.tile_size(tile)?;
        image.set_dimensions(w, h);
        image.clear(frame.background.true_color);
    }
    Ok(Some(image))
}
