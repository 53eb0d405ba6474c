use crate::image::dense::Image;
use crate::image::format::PixelLayout;
use crate::image::sparse::SparseImage;

/// Named buffers a frame borrows and hands back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScratchSlot {
    /// Dense tile image a strategy composites into.
    TileImage,
    /// Buffer renderers draw into.
    RenderBuffer,
    /// Dense image pieces are collected into at the display rank.
    CollectImage,
    /// Stream of a compressed tile image or composited piece.
    WorkingSparse,
    /// Stream an in-place sparse composite writes its result into.
    SpareSparse,
}

impl ScratchSlot {
    const COUNT: usize = 5;

    fn index(self) -> usize {
        match self {
            ScratchSlot::TileImage => 0,
            ScratchSlot::RenderBuffer => 1,
            ScratchSlot::CollectImage => 2,
            ScratchSlot::WorkingSparse => 3,
            ScratchSlot::SpareSparse => 4,
        }
    }
}

/// Arena configuration.
#[derive(Clone, Copy, Debug)]
pub struct ScratchOpts {
    /// Maximum bytes retained across all slots.
    pub max_retained_bytes: usize,
}

impl Default for ScratchOpts {
    fn default() -> Self {
        Self {
            max_retained_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Counters of arena reuse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScratchStats {
    /// Takes served from a retained buffer.
    pub hits: u64,
    /// Takes that had to allocate.
    pub misses: u64,
    /// Bytes currently held by the arena.
    pub retained_bytes: usize,
    /// Returned buffers dropped because the arena was full.
    pub dropped_on_release: u64,
}

#[derive(Debug, Default)]
struct Slot {
    image: Option<Image>,
    sparse: Option<Vec<u8>>,
}

/// Per-context buffers that survive between frames, one dense and one sparse
/// buffer per [`ScratchSlot`].
///
/// A buffer is owned by whoever took it until it is put back, so two users
/// of the same slot simply miss instead of aliasing.
#[derive(Debug)]
pub struct ScratchArena {
    opts: ScratchOpts,
    stats: ScratchStats,
    slots: [Slot; ScratchSlot::COUNT],
}

impl Default for ScratchArena {
    fn default() -> Self {
        Self::new(ScratchOpts::default())
    }
}

fn image_bytes(image: &Image) -> usize {
    image.color_bytes().len() + image.depth().len() * 4
}

impl ScratchArena {
    /// Empty arena.
    pub fn new(opts: ScratchOpts) -> Self {
        Self {
            opts,
            stats: ScratchStats::default(),
            slots: Default::default(),
        }
    }

    /// Reuse counters so far.
    pub fn stats(&self) -> ScratchStats {
        self.stats.clone()
    }

    fn record(&mut self, retained: Option<usize>) {
        match retained {
            Some(bytes) => {
                self.stats.hits = self.stats.hits.saturating_add(1);
                self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(bytes);
            }
            None => self.stats.misses = self.stats.misses.saturating_add(1),
        }
    }

    fn has_room(&mut self, bytes: usize) -> bool {
        if self.stats.retained_bytes.saturating_add(bytes) > self.opts.max_retained_bytes {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return false;
        }
        true
    }

    /// A dense `width x height` image in `layout`. Contents are unspecified.
    pub fn take_image(
        &mut self,
        slot: ScratchSlot,
        layout: PixelLayout,
        width: usize,
        height: usize,
    ) -> Image {
        let kept = self.slots[slot.index()].image.take();
        self.record(kept.as_ref().map(image_bytes));
        match kept {
            Some(mut image) => {
                image.set_layout(layout);
                image.set_dimensions(width, height);
                image
            }
            None => Image::new(layout, width, height),
        }
    }

    /// Hand a dense image back to `slot`.
    pub fn put_image(&mut self, slot: ScratchSlot, image: Image) {
        let bytes = image_bytes(&image);
        let entry = &self.slots[slot.index()].image;
        if let Some(old) = entry {
            // Keep the larger allocation.
            if image_bytes(old) >= bytes {
                self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
                return;
            }
            let old_bytes = image_bytes(old);
            self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(old_bytes);
        }
        if !self.has_room(bytes) {
            self.slots[slot.index()].image = None;
            return;
        }
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_add(bytes);
        self.slots[slot.index()].image = Some(image);
    }

    /// A cleared sparse `width x height` image in `layout`.
    pub fn take_sparse(
        &mut self,
        slot: ScratchSlot,
        layout: PixelLayout,
        width: usize,
        height: usize,
    ) -> SparseImage {
        let kept = self.slots[slot.index()].sparse.take();
        self.record(kept.as_ref().map(Vec::capacity));
        let mut sparse = SparseImage::from_stream(layout, width, height, kept.unwrap_or_default());
        sparse.clear();
        sparse
    }

    /// Hand a sparse image's stream allocation back to `slot`.
    pub fn put_sparse(&mut self, slot: ScratchSlot, sparse: SparseImage) {
        let stream = sparse.into_stream();
        let bytes = stream.capacity();
        if let Some(old) = &self.slots[slot.index()].sparse {
            if old.capacity() >= bytes {
                self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
                return;
            }
            let old_bytes = old.capacity();
            self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(old_bytes);
        }
        if !self.has_room(bytes) {
            self.slots[slot.index()].sparse = None;
            return;
        }
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_add(bytes);
        self.slots[slot.index()].sparse = Some(stream);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/scratch.rs"]
mod tests;
