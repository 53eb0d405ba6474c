//! Composite the tiles one after another, each across every rank.

use crate::foundation::error::SortlastResult;
use crate::image::codec::decompress_sub_image_correct_background;
use crate::image::dense::Image;
use crate::session::scratch::ScratchSlot;
use crate::single;
use crate::strategy::common::single_image_collect;
use crate::strategy::{Frame, ValidPixels};

#[tracing::instrument(level = "debug", skip_all, fields(rank = frame.rank()))]
pub(crate) fn compose(frame: &mut Frame<'_>) -> SortlastResult<Option<Image>> {
    let rank = frame.rank();
    let num_tiles = frame.layout.num_tiles();
    let mut collect = frame.config.collect_images;
    if !collect && num_tiles > 1 {
        tracing::warn!("sequential strategy must collect images with more than one tile");
        collect = true;
    }

    let group: Vec<usize> = match frame.order {
        Some(order) => order.ranks().to_vec(),
        None => (0..frame.comm.size()).collect(),
    };
    let ctx = frame.compose_ctx();
    let mut result = None;

    for tile in 0..num_tiles {
        let display = frame.layout.tile(tile)?.display_rank;
        let image_dest = match frame.order {
            Some(order) => order.position_of(display),
            None => display,
        };
        let (w, h) = frame.tile_size(tile)?;
        let rendered = frame.source.compressed_tile_image(tile, frame.scratch)?;
        let (piece, offset) = single::compose(&ctx, &group, image_dest, rendered)?;

        if collect {
            if display == rank {
                let mut image = frame
                    .scratch
                    .take_image(ScratchSlot::CollectImage, frame.pixel_layout, w, h);
                single_image_collect(frame, Some(&piece), display, offset, Some(&mut image))?;
                result = Some(image);
            } else {
                single_image_collect(frame, Some(&piece), display, offset, None)?;
            }
        } else if piece.num_pixels() > 0 {
            let mut image = frame
                .scratch
                .take_image(ScratchSlot::CollectImage, frame.pixel_layout, w, h);
            image.clear(frame.background.true_color);
            decompress_sub_image_correct_background(&piece, offset, &mut image, &frame.background)?;
            frame.valid = Some(ValidPixels {
                tile,
                offset,
                count: piece.num_pixels(),
            });
            result = Some(image);
        } else {
            frame.valid = None;
            result = None;
        }
        frame.scratch.put_sparse(ScratchSlot::WorkingSparse, piece);
    }
    Ok(result)
}
