use crate::foundation::error::{SortlastError, SortlastResult};
use crate::image::dense::Image;
use crate::image::format::{CompositeMode, MAX_PIXEL_SIZE};
use crate::image::pixel::composite_packed;
use crate::image::sparse::{RunCursor, RunWriter, SparseImage};

/// Composite `src` into `dest`, treating `src` as the front operand when
/// `src_on_top`.
pub fn compressed_composite(
    dest: &mut Image,
    src: &SparseImage,
    src_on_top: bool,
    mode: CompositeMode,
) -> SortlastResult<()> {
    if dest.num_pixels() != src.num_pixels() {
        return Err(SortlastError::sanity("size of input and output buffers do not agree"));
    }
    compressed_sub_composite(dest, 0, src, src_on_top, mode)
}

/// Composite `src` into `dest[offset..offset + src.num_pixels()]`. Inactive
/// source pixels leave `dest` untouched.
pub fn compressed_sub_composite(
    dest: &mut Image,
    offset: usize,
    src: &SparseImage,
    src_on_top: bool,
    mode: CompositeMode,
) -> SortlastResult<()> {
    let layout = src.layout();
    if layout != dest.layout() {
        return Err(SortlastError::invalid_value("cannot composite images of different formats"));
    }
    if offset + src.num_pixels() > dest.num_pixels() {
        return Err(SortlastError::sanity("sparse image extends past destination"));
    }
    let size = layout.pixel_size();
    let mut dest_px = [0u8; MAX_PIXEL_SIZE];
    let mut out_px = [0u8; MAX_PIXEL_SIZE];
    let mut cursor = RunCursor::new(src);
    let mut pixel = offset;
    let end = offset + src.num_pixels();
    while pixel < end {
        let (inactive, active) = cursor.read_run()?;
        pixel += inactive;
        if pixel + active > end {
            return Err(SortlastError::invalid_value("corrupt compressed image: runs overflow"));
        }
        cursor.active = active;
        let bytes = cursor.take_active(active)?;
        for k in 0..active {
            let src_px = &bytes[k * size..(k + 1) * size];
            dest.read_packed(pixel, &mut dest_px);
            if src_on_top {
                composite_packed(mode, layout, src_px, &dest_px[..size], &mut out_px);
            } else {
                composite_packed(mode, layout, &dest_px[..size], src_px, &mut out_px);
            }
            dest.write_packed(pixel, &out_px);
            pixel += 1;
        }
    }
    if pixel != end {
        return Err(SortlastError::invalid_value("corrupt compressed image: runs overflow"));
    }
    Ok(())
}

/// Merge two sparse images run by run without decompressing either.
/// `front` must be in front of `back` in composite order.
pub fn compressed_compressed_composite(
    front: &SparseImage,
    back: &SparseImage,
    mode: CompositeMode,
) -> SortlastResult<SparseImage> {
    let writer = RunWriter::with_capacity(SparseImage::max_stream_len(front.layout(), front.num_pixels()));
    let stream = merge_runs(front, back, mode, writer)?;
    Ok(SparseImage::from_stream(front.layout(), front.width(), front.height(), stream))
}

/// [`compressed_compressed_composite`] that leaves the result in `front`.
///
/// The merge is written into `spare`, which gets `front`'s previous stream
/// back, so a caller merging repeatedly allocates only two streams.
pub fn compressed_compressed_composite_into(
    front: &mut SparseImage,
    back: &SparseImage,
    mode: CompositeMode,
    spare: &mut Vec<u8>,
) -> SortlastResult<()> {
    let stream = merge_runs(front, back, mode, RunWriter::from_vec(std::mem::take(spare)))?;
    let merged = SparseImage::from_stream(front.layout(), front.width(), front.height(), stream);
    *spare = std::mem::replace(front, merged).into_stream();
    Ok(())
}

fn merge_runs(
    front: &SparseImage,
    back: &SparseImage,
    mode: CompositeMode,
    mut writer: RunWriter,
) -> SortlastResult<Vec<u8>> {
    let layout = front.layout();
    if layout != back.layout() {
        return Err(SortlastError::invalid_value("cannot composite images of different formats"));
    }
    let num_pixels = front.num_pixels();
    if num_pixels != back.num_pixels() {
        return Err(SortlastError::sanity(
            "input buffers do not agree for compressed-compressed composite",
        ));
    }
    let size = layout.pixel_size();
    let mut f = RunCursor::new(front);
    let mut b = RunCursor::new(back);
    let mut out_px = [0u8; MAX_PIXEL_SIZE];
    let mut pixel = 0;

    while pixel < num_pixels {
        while f.active == 0 && f.inactive + pixel < num_pixels {
            f.load_run()?;
        }
        while b.active == 0 && b.inactive + pixel < num_pixels {
            b.load_run()?;
        }

        let both_inactive = f.inactive.min(b.inactive);
        if both_inactive > 0 {
            writer.push_inactive(both_inactive);
            pixel += both_inactive;
            f.inactive -= both_inactive;
            b.inactive -= both_inactive;
        }

        if f.inactive > 0 && b.active > 0 {
            let n = f.inactive.min(b.active);
            f.inactive -= n;
            writer.push_active(b.take_active(n)?, n);
            pixel += n;
        }

        if b.inactive > 0 && f.active > 0 {
            let n = b.inactive.min(f.active);
            b.inactive -= n;
            writer.push_active(f.take_active(n)?, n);
            pixel += n;
        }

        if f.inactive == 0 && b.inactive == 0 {
            let n = f.active.min(b.active);
            for _ in 0..n {
                let fp = f.take_active(1)?;
                let bp = b.take_active(1)?;
                composite_packed(mode, layout, fp, bp, &mut out_px);
                writer.push_active(&out_px[..size], 1);
            }
            pixel += n;
        }
    }

    if pixel != num_pixels {
        return Err(SortlastError::invalid_value("corrupt compressed image"));
    }
    Ok(writer.finish())
}

#[cfg(test)]
#[path = "../../tests/unit/image/composite.rs"]
mod tests;
