//! Run-length sparse images.
//!
//! The pixel stream is a sequence of `(inactive, active)` run-length pairs,
//! each a little-endian `u32`, followed by `active` packed pixels. The runs
//! of an image always sum to exactly `width * height`.

use crate::foundation::core::to_u32;
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::foundation::math::bit_reverse;
use crate::image::format::{ColorFormat, DepthFormat, PixelLayout};

/// Bytes used by one `(inactive, active)` pair.
pub(crate) const RUN_LENGTH_SIZE: usize = 8;

const SPARSE_MAGIC: u32 = 0x5350_4931;
const HEADER_WORDS: usize = 6;

/// Bytes of the wire header written by [`SparseImage::package`].
pub const PACKAGE_HEADER_SIZE: usize = HEADER_WORDS * 4;

#[inline]
fn get_u32(data: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
fn put_u32(data: &mut [u8], at: usize, v: usize) {
    debug_assert!(u32::try_from(v).is_ok(), "run length overflow");
    data[at..at + 4].copy_from_slice(&(v as u32).to_le_bytes());
}

/// Run-length compressed image. See the module docs for the stream layout.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseImage {
    layout: PixelLayout,
    width: usize,
    height: usize,
    data: Vec<u8>,
}

/// One output of [`SparseImage::split`]: a piece and its pixel offset in the
/// image the split started from.
#[derive(Clone, Debug, PartialEq)]
pub struct SparsePiece {
    /// Compressed pixels of this partition.
    pub image: SparseImage,
    /// Offset of the first pixel of `image`.
    pub offset: usize,
}

impl SparseImage {
    /// A cleared (all inactive) sparse image.
    pub fn new(layout: PixelLayout, width: usize, height: usize) -> Self {
        let mut img = Self {
            layout,
            width,
            height,
            data: Vec::with_capacity(RUN_LENGTH_SIZE),
        };
        img.clear();
        img
    }

    pub(crate) fn from_stream(layout: PixelLayout, width: usize, height: usize, data: Vec<u8>) -> Self {
        Self {
            layout,
            width,
            height,
            data,
        }
    }

    /// Largest stream any `num_pixels` image can compress to: every pixel
    /// active plus one run, or alternating single-pixel runs when a run pair
    /// is bigger than a pixel.
    pub fn max_stream_len(layout: PixelLayout, num_pixels: usize) -> usize {
        let pixel_size = layout.pixel_size();
        let mut size = RUN_LENGTH_SIZE + num_pixels * pixel_size;
        if pixel_size < RUN_LENGTH_SIZE {
            size += (RUN_LENGTH_SIZE - pixel_size) * num_pixels.div_ceil(2);
        }
        size
    }

    /// Capacity needed to hold a packaged `width x height` image.
    pub fn buffer_size(layout: PixelLayout, width: usize, height: usize) -> usize {
        PACKAGE_HEADER_SIZE + Self::max_stream_len(layout, width * height)
    }

    /// Channel layout of the packed pixels.
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

    /// Raw run-length stream.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes used by the run-length stream.
    pub fn stream_len(&self) -> usize {
        self.data.len()
    }

    /// Give the stream allocation back for reuse.
    pub(crate) fn into_stream(self) -> Vec<u8> {
        self.data
    }

    /// Resize and clear.
    pub fn set_dimensions(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.clear();
    }

    /// Mark every pixel inactive.
    pub fn clear(&mut self) {
        self.data.clear();
        self.data.resize(RUN_LENGTH_SIZE, 0);
        let n = self.num_pixels();
        put_u32(&mut self.data, 0, n);
    }

    /// Number of active pixels; also validates the run structure.
    pub fn active_pixel_count(&self) -> SortlastResult<usize> {
        let mut cursor = RunCursor::new(self);
        let mut active = 0;
        let mut seen = 0;
        while seen < self.num_pixels() {
            let (inactive, run_active) = cursor.read_run()?;
            cursor.pos += run_active * self.layout.pixel_size();
            if cursor.pos > self.data.len() {
                return Err(SortlastError::invalid_value("corrupt compressed image"));
            }
            seen += inactive + run_active;
            active += run_active;
        }
        if seen != self.num_pixels() {
            return Err(SortlastError::invalid_value("corrupt compressed image"));
        }
        Ok(active)
    }

    /// Serialize with a self-describing header for transfer.
    pub fn package(&self) -> SortlastResult<Vec<u8>> {
        let mut out = Vec::with_capacity(PACKAGE_HEADER_SIZE + self.data.len());
        for word in [
            SPARSE_MAGIC,
            self.layout.color.wire_id(),
            self.layout.depth.wire_id(),
            to_u32(self.width, "sparse image width")?,
            to_u32(self.height, "sparse image height")?,
            to_u32(self.data.len(), "sparse image stream")?,
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    /// Inverse of [`SparseImage::package`].
    pub fn unpackage(buffer: &[u8]) -> SortlastResult<Self> {
        if buffer.len() < PACKAGE_HEADER_SIZE {
            return Err(SortlastError::invalid_value("sparse image buffer shorter than header"));
        }
        if get_u32(buffer, 0) != SPARSE_MAGIC {
            return Err(SortlastError::invalid_value("invalid image buffer: bad magic number"));
        }
        let layout = PixelLayout::new(
            ColorFormat::from_wire(get_u32(buffer, 4))?,
            DepthFormat::from_wire(get_u32(buffer, 8))?,
        );
        let width = get_u32(buffer, 12) as usize;
        let height = get_u32(buffer, 16) as usize;
        let stream_len = get_u32(buffer, 20) as usize;
        if stream_len != buffer.len() - PACKAGE_HEADER_SIZE {
            return Err(SortlastError::invalid_value(format!(
                "sparse image stream is {} bytes but header says {stream_len}",
                buffer.len() - PACKAGE_HEADER_SIZE
            )));
        }
        let num_pixels = width
            .checked_mul(height)
            .filter(|n| {
                n.checked_add(1)
                    .and_then(|n| n.checked_mul(layout.pixel_size() + RUN_LENGTH_SIZE))
                    .is_some()
            })
            .ok_or_else(|| SortlastError::sanity(format!("sparse image of {width}x{height} pixels is too large")))?;
        if stream_len > Self::max_stream_len(layout, num_pixels) {
            return Err(SortlastError::invalid_value(
                "sparse image stream exceeds capacity for its dimensions",
            ));
        }
        Ok(Self::from_stream(
            layout,
            width,
            height,
            buffer[PACKAGE_HEADER_SIZE..].to_vec(),
        ))
    }

    /// `count` pixels starting at `offset` as a `count x 1` image. Copying the
    /// whole image keeps its dimensions.
    pub fn copy_pixels(&self, offset: usize, count: usize) -> SortlastResult<SparseImage> {
        if offset + count > self.num_pixels() {
            return Err(SortlastError::invalid_value("pixels to copy are outside of image range"));
        }
        if offset == 0 && count == self.num_pixels() {
            return Ok(self.clone());
        }
        let mut cursor = RunCursor::new(self);
        cursor.skip(offset)?;
        let mut writer = RunWriter::with_capacity(Self::max_stream_len(self.layout, count));
        cursor.scan(count, Some(&mut writer))?;
        Ok(SparseImage::from_stream(self.layout, count, 1, writer.finish()))
    }

    /// Pixel count of the largest piece `split` can produce.
    pub fn split_partition_num_pixels(
        input_num_pixels: usize,
        num_partitions: usize,
        eventual_num_partitions: usize,
    ) -> usize {
        let sub_partitions = eventual_num_partitions / num_partitions;
        input_num_pixels / num_partitions + sub_partitions
    }

    /// Partition into `num_partitions` pieces whose boundaries only depend on
    /// `eventual_num_partitions` and global position: splitting by 4 gives
    /// the same pieces as splitting by 2 twice.
    pub fn split(
        &self,
        in_offset: usize,
        num_partitions: usize,
        eventual_num_partitions: usize,
    ) -> SortlastResult<Vec<SparsePiece>> {
        if num_partitions < 2 {
            return Err(SortlastError::invalid_value(
                "splitting into less than 2 partitions makes no sense",
            ));
        }
        if eventual_num_partitions % num_partitions != 0 {
            return Err(SortlastError::invalid_value(
                "num_partitions is not a factor of eventual_num_partitions",
            ));
        }
        let total = self.num_pixels();
        let offsets = choose_partitions(num_partitions, eventual_num_partitions, total, in_offset);
        let mut cursor = RunCursor::new(self);
        let mut pieces = Vec::with_capacity(num_partitions);
        for (idx, &offset) in offsets.iter().enumerate() {
            let count = match offsets.get(idx + 1) {
                Some(next) => next - offset,
                None => total + in_offset - offset,
            };
            let mut writer = RunWriter::with_capacity(Self::max_stream_len(self.layout, count));
            cursor.scan(count, Some(&mut writer))?;
            pieces.push(SparsePiece {
                image: SparseImage::from_stream(self.layout, count, 1, writer.finish()),
                offset,
            });
        }
        if !cursor.exhausted() {
            return Err(SortlastError::sanity("counting problem while splitting image"));
        }
        Ok(pieces)
    }

    /// Reorder pixels so each of `eventual_num_partitions` contiguous chunks of
    /// the result samples evenly from across the original image.
    pub fn interlace(&self, eventual_num_partitions: usize) -> SortlastResult<SparseImage> {
        let num_pixels = self.num_pixels();
        if eventual_num_partitions < 2 {
            return self.copy_pixels(0, num_pixels);
        }
        let lower = num_pixels / eventual_num_partitions;
        let remaining = num_pixels % eventual_num_partitions;
        let partition_len = |idx: usize| lower + usize::from(idx < remaining);

        let mut starts: Vec<Option<RunCursor<'_>>> = vec![None; eventual_num_partitions];
        let mut cursor = RunCursor::new(self);
        for original in 0..eventual_num_partitions {
            let interlaced = interlaced_index(original, eventual_num_partitions);
            starts[interlaced] = Some(cursor.clone());
            if original < eventual_num_partitions - 1 {
                cursor.skip(partition_len(interlaced))?;
            }
        }

        let mut writer = RunWriter::with_capacity(self.data.len() + RUN_LENGTH_SIZE * eventual_num_partitions);
        for (interlaced, start) in starts.into_iter().enumerate() {
            let mut cursor = start.ok_or_else(|| SortlastError::sanity("interlace partition not mapped"))?;
            cursor.scan(partition_len(interlaced), Some(&mut writer))?;
        }
        Ok(SparseImage::from_stream(self.layout, self.width, self.height, writer.finish()))
    }

    /// Offset in the un-interlaced image where interlaced partition
    /// `partition_index` begins.
    pub fn interlace_offset(
        partition_index: usize,
        eventual_num_partitions: usize,
        original_image_size: usize,
    ) -> SortlastResult<usize> {
        if partition_index >= eventual_num_partitions {
            return Err(SortlastError::invalid_value("invalid partition for interlace offset"));
        }
        let lower = original_image_size / eventual_num_partitions;
        let remaining = original_image_size % eventual_num_partitions;
        let mut offset = 0;
        for original in 0..eventual_num_partitions {
            let interlaced = interlaced_index(original, eventual_num_partitions);
            if interlaced == partition_index {
                return Ok(offset);
            }
            offset += lower + usize::from(interlaced < remaining);
        }
        Err(SortlastError::sanity("could not find partition index"))
    }
}

fn interlaced_index(original: usize, eventual: usize) -> usize {
    let reversed = bit_reverse(original, eventual);
    if reversed >= eventual { original } else { reversed }
}

fn choose_partitions(
    num_partitions: usize,
    eventual_num_partitions: usize,
    size: usize,
    first_offset: usize,
) -> Vec<usize> {
    let mut remainder = size % eventual_num_partitions;
    let sub_partitions = eventual_num_partitions / num_partitions;
    let lower_size = (size / eventual_num_partitions) * sub_partitions;
    let mut offsets = Vec::with_capacity(num_partitions);
    let mut this_offset = first_offset;
    for _ in 0..num_partitions {
        offsets.push(this_offset);
        this_offset += lower_size;
        if remainder > sub_partitions {
            this_offset += sub_partitions;
            remainder -= sub_partitions;
        } else {
            this_offset += remainder;
            remainder = 0;
        }
    }
    offsets
}

/// Position inside a sparse stream, measured in pixels still owed by the
/// current run.
#[derive(Clone, Debug)]
pub(crate) struct RunCursor<'a> {
    data: &'a [u8],
    pub(crate) pos: usize,
    pub(crate) inactive: usize,
    pub(crate) active: usize,
    pixel_size: usize,
}

impl<'a> RunCursor<'a> {
    pub(crate) fn new(image: &'a SparseImage) -> Self {
        Self {
            data: &image.data,
            pos: 0,
            inactive: 0,
            active: 0,
            pixel_size: image.layout.pixel_size(),
        }
    }

    /// Read the next run-length pair and step past it.
    pub(crate) fn read_run(&mut self) -> SortlastResult<(usize, usize)> {
        if self.pos + RUN_LENGTH_SIZE > self.data.len() {
            return Err(SortlastError::invalid_value("corrupt compressed image: stream ended early"));
        }
        let inactive = get_u32(self.data, self.pos) as usize;
        let active = get_u32(self.data, self.pos + 4) as usize;
        self.pos += RUN_LENGTH_SIZE;
        Ok((inactive, active))
    }

    /// Add the next run to the pixels owed.
    pub(crate) fn load_run(&mut self) -> SortlastResult<()> {
        let (inactive, active) = self.read_run()?;
        self.inactive += inactive;
        self.active = active;
        Ok(())
    }

    /// Packed bytes of the next `count` active pixels; advances the stream.
    pub(crate) fn take_active(&mut self, count: usize) -> SortlastResult<&'a [u8]> {
        let len = count * self.pixel_size;
        if self.pos + len > self.data.len() {
            return Err(SortlastError::invalid_value("corrupt compressed image: pixel data truncated"));
        }
        let data: &'a [u8] = self.data;
        let bytes = &data[self.pos..self.pos + len];
        self.pos += len;
        self.active -= count;
        Ok(bytes)
    }

    pub(crate) fn skip(&mut self, pixels: usize) -> SortlastResult<()> {
        self.scan(pixels, None)
    }

    /// Advance `pixels`, copying them into `out` when given.
    pub(crate) fn scan(&mut self, pixels: usize, mut out: Option<&mut RunWriter>) -> SortlastResult<()> {
        let mut left = pixels;
        while left > 0 {
            if self.inactive == 0 && self.active == 0 {
                self.load_run()?;
            }
            let count = self.inactive.min(left);
            if count > 0 {
                if let Some(w) = out.as_deref_mut() {
                    w.push_inactive(count);
                }
                self.inactive -= count;
                left -= count;
            }
            let count = self.active.min(left);
            if count > 0 {
                let bytes = self.take_active(count)?;
                if let Some(w) = out.as_deref_mut() {
                    w.push_active(bytes, count);
                }
                left -= count;
            }
        }
        Ok(())
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.inactive == 0 && self.active == 0
    }
}

/// Append-only builder of a run-length stream.
#[derive(Debug, Default)]
pub(crate) struct RunWriter {
    data: Vec<u8>,
    last_run: Option<usize>,
}

impl RunWriter {
    pub(crate) fn with_capacity(bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes),
            last_run: None,
        }
    }

    /// Reuse an existing allocation.
    pub(crate) fn from_vec(mut data: Vec<u8>) -> Self {
        data.clear();
        Self {
            data,
            last_run: None,
        }
    }

    fn start_run(&mut self) -> usize {
        let at = self.data.len();
        self.data.resize(at + RUN_LENGTH_SIZE, 0);
        self.last_run = Some(at);
        at
    }

    pub(crate) fn push_inactive(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let at = match self.last_run {
            Some(at) if get_u32(&self.data, at + 4) == 0 => at,
            _ => self.start_run(),
        };
        let inactive = get_u32(&self.data, at) as usize + count;
        put_u32(&mut self.data, at, inactive);
    }

    pub(crate) fn push_active(&mut self, bytes: &[u8], count: usize) {
        if count == 0 {
            return;
        }
        let at = match self.last_run {
            Some(at) => at,
            None => self.start_run(),
        };
        let active = get_u32(&self.data, at + 4) as usize + count;
        put_u32(&mut self.data, at + 4, active);
        self.data.extend_from_slice(bytes);
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        if self.last_run.is_none() {
            self.start_run();
        }
        self.data
    }
}

#[cfg(test)]
#[path = "../../tests/unit/image/sparse.rs"]
mod tests;
