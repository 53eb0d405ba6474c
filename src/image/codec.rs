use crate::foundation::core::{Rgba, Viewport};
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::image::dense::Image;
use crate::image::format::{ColorFormat, CompositeMode, DepthFormat, MAX_PIXEL_SIZE, PixelLayout};
use crate::image::pixel::{blend_under, packed_is_active};
use crate::image::sparse::{RunCursor, RunWriter, SparseImage};

/// Background colors in effect for one frame.
///
/// In blend mode fragments are composited against transparent black and the
/// true background is blended in once at the end.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Background {
    /// Color images are cleared to while compositing.
    pub working: Rgba,
    /// Color requested by the application.
    pub true_color: Rgba,
    /// Whether final pixels must be blended over `true_color`.
    pub needs_correction: bool,
}

impl Background {
    /// Background policy for `mode`: blend mode composites against
    /// transparent black, correcting afterwards only when asked to and the
    /// requested color is not itself transparent black.
    pub fn for_mode(mode: CompositeMode, requested: Rgba, correct_colored_background: bool) -> Self {
        match mode {
            CompositeMode::Blend => Self {
                working: Rgba::TRANSPARENT,
                true_color: requested,
                needs_correction: !requested.is_zero_word() && correct_colored_background,
            },
            CompositeMode::ZBuffer => Self::plain(requested),
        }
    }

    /// No correction: working and true colors agree.
    pub fn plain(color: Rgba) -> Self {
        Self {
            working: color,
            true_color: color,
            needs_correction: false,
        }
    }
}

/// Compositing under `mode` needs the channel that decides activity.
fn check_channels(layout: PixelLayout, mode: CompositeMode) -> SortlastResult<()> {
    match mode {
        CompositeMode::ZBuffer if layout.depth == DepthFormat::None => Err(SortlastError::invalid_operation(
            "Z buffer compositing requires a depth channel",
        )),
        CompositeMode::Blend if layout.color == ColorFormat::None => Err(SortlastError::invalid_operation(
            "blend compositing requires a color channel",
        )),
        _ => Ok(()),
    }
}

struct Compressor<'a> {
    image: &'a Image,
    mode: CompositeMode,
    writer: RunWriter,
    pixel: [u8; MAX_PIXEL_SIZE],
    pixel_size: usize,
}

impl<'a> Compressor<'a> {
    fn new(image: &'a Image, mode: CompositeMode, num_pixels: usize) -> Self {
        let capacity = SparseImage::max_stream_len(image.layout(), num_pixels);
        Self::with_writer(image, mode, RunWriter::with_capacity(capacity))
    }

    fn with_writer(image: &'a Image, mode: CompositeMode, writer: RunWriter) -> Self {
        Self {
            image,
            mode,
            writer,
            pixel: [0; MAX_PIXEL_SIZE],
            pixel_size: image.layout().pixel_size(),
        }
    }

    fn pixels(&mut self, start: usize, count: usize) -> SortlastResult<()> {
        let layout = self.image.layout();
        check_channels(layout, self.mode)?;
        for i in start..start + count {
            self.image.read_packed(i, &mut self.pixel);
            let px = &self.pixel[..self.pixel_size];
            if packed_is_active(self.mode, layout, px) {
                self.writer.push_active(px, 1);
            } else {
                self.writer.push_inactive(1);
            }
        }
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        self.writer.finish()
    }
}

/// Compress a whole image; the result keeps the image dimensions.
pub fn compress_image(image: &Image, mode: CompositeMode) -> SortlastResult<SparseImage> {
    let n = image.num_pixels();
    let mut c = Compressor::new(image, mode, n);
    c.pixels(0, n)?;
    Ok(SparseImage::from_stream(image.layout(), image.width(), image.height(), c.finish()))
}

/// Compress `count` pixels starting at `offset` into a `count x 1` image.
pub fn compress_sub_image(
    image: &Image,
    offset: usize,
    count: usize,
    mode: CompositeMode,
) -> SortlastResult<SparseImage> {
    if offset + count > image.num_pixels() {
        return Err(SortlastError::invalid_value("compress range outside of image"));
    }
    let mut c = Compressor::new(image, mode, count);
    c.pixels(offset, count)?;
    Ok(SparseImage::from_stream(image.layout(), count, 1, c.finish()))
}

/// Compress `region` of `image` into a `width x height` tile image, placing
/// it at `target` (tile-local). Everything around `target` is inactive.
pub fn compress_padded(
    image: &Image,
    region: Viewport,
    target: Viewport,
    width: usize,
    height: usize,
    mode: CompositeMode,
) -> SortlastResult<SparseImage> {
    let reuse = Vec::with_capacity(SparseImage::max_stream_len(image.layout(), width * height));
    compress_padded_into(reuse, image, region, target, width, height, mode)
}

/// [`compress_padded`] writing into the allocation of `reuse`, whose
/// contents are discarded.
pub(crate) fn compress_padded_into(
    reuse: Vec<u8>,
    image: &Image,
    region: Viewport,
    target: Viewport,
    width: usize,
    height: usize,
    mode: CompositeMode,
) -> SortlastResult<SparseImage> {
    let layout = image.layout();
    if target.is_empty() {
        let mut empty = SparseImage::from_stream(layout, width, height, reuse);
        empty.clear();
        return Ok(empty);
    }
    if region.width != target.width || region.height != target.height {
        return Err(SortlastError::sanity("size of input and output to compress do not match"));
    }
    let bounds = Viewport::new(0, 0, image.width() as i32, image.height() as i32);
    let tile = Viewport::new(0, 0, width as i32, height as i32);
    if !bounds.contains(region) || !tile.contains(target) {
        return Err(SortlastError::sanity("size of input incompatible with region"));
    }
    let space_left = target.x as usize;
    let space_bottom = target.y as usize;
    let row = target.width as usize;
    let space_right = width - row - space_left;
    let space_top = height - target.height as usize - space_bottom;

    let mut c = Compressor::with_writer(image, mode, RunWriter::from_vec(reuse));
    c.writer.push_inactive(space_bottom * width);
    for y in 0..target.height as usize {
        c.writer.push_inactive(space_left);
        let start = (region.y as usize + y) * image.width() + region.x as usize;
        c.pixels(start, row)?;
        c.writer.push_inactive(space_right);
    }
    c.writer.push_inactive(space_top * width);
    Ok(SparseImage::from_stream(layout, width, height, c.finish()))
}

/// Decompress into `image`, resizing it to the sparse image's dimensions.
pub fn decompress_image(sparse: &SparseImage, image: &mut Image, background: Rgba) -> SortlastResult<()> {
    image.set_dimensions(sparse.width(), sparse.height());
    decompress_sub_image(sparse, 0, image, background)
}

fn check_decompress_target(sparse: &SparseImage, offset: usize, image: &Image) -> SortlastResult<()> {
    if sparse.layout() != image.layout() {
        return Err(SortlastError::invalid_value("sparse and dense image formats differ"));
    }
    if offset + sparse.num_pixels() > image.num_pixels() {
        return Err(SortlastError::sanity(format!(
            "decompressing {} pixels at offset {offset} into an image of {} pixels",
            sparse.num_pixels(),
            image.num_pixels()
        )));
    }
    Ok(())
}

/// Decompress into `image` starting at pixel `offset`. Inactive pixels get
/// `background` and the far depth.
pub fn decompress_sub_image(
    sparse: &SparseImage,
    offset: usize,
    image: &mut Image,
    background: Rgba,
) -> SortlastResult<()> {
    check_decompress_target(sparse, offset, image)?;
    let pixel_size = sparse.layout().pixel_size();
    let mut cursor = RunCursor::new(sparse);
    let mut pixel = offset;
    let end = offset + sparse.num_pixels();
    while pixel < end {
        let (inactive, active) = cursor.read_run()?;
        if pixel + inactive + active > end {
            return Err(SortlastError::invalid_value("corrupt compressed image: runs overflow"));
        }
        image.fill_background(pixel, inactive, background);
        pixel += inactive;
        cursor.active = active;
        let bytes = cursor.take_active(active)?;
        for k in 0..active {
            image.write_packed(pixel + k, &bytes[k * pixel_size..(k + 1) * pixel_size]);
        }
        pixel += active;
    }
    Ok(())
}

/// Like [`decompress_sub_image`] but produces final pixels: when the
/// background needs correction, inactive pixels get the true background and
/// active pixels are blended over it.
pub fn decompress_sub_image_correct_background(
    sparse: &SparseImage,
    offset: usize,
    image: &mut Image,
    background: &Background,
) -> SortlastResult<()> {
    if !background.needs_correction {
        return decompress_sub_image(sparse, offset, image, background.working);
    }
    check_decompress_target(sparse, offset, image)?;
    let layout = sparse.layout();
    let color_size = layout.color_size();
    let pixel_size = layout.pixel_size();
    let mut corrected = [0u8; MAX_PIXEL_SIZE];
    let mut cursor = RunCursor::new(sparse);
    let mut pixel = offset;
    let end = offset + sparse.num_pixels();
    while pixel < end {
        let (inactive, active) = cursor.read_run()?;
        if pixel + inactive + active > end {
            return Err(SortlastError::invalid_value("corrupt compressed image: runs overflow"));
        }
        image.fill_background(pixel, inactive, background.true_color);
        pixel += inactive;
        cursor.active = active;
        let bytes = cursor.take_active(active)?;
        for k in 0..active {
            corrected[..pixel_size].copy_from_slice(&bytes[k * pixel_size..(k + 1) * pixel_size]);
            blend_under(layout.color, &mut corrected[..color_size], background.true_color);
            image.write_packed(pixel + k, &corrected);
        }
        pixel += active;
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/image/codec.rs"]
mod tests;
