use crate::comm::Communicator;
use crate::foundation::error::{SortlastError, SortlastResult};

/// Which rank contributes to which tile, gathered from every rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TileInfo {
    num_tiles: usize,
    /// Row-major `num_processes x num_tiles` contained flags.
    masks: Vec<bool>,
    contrib_counts: Vec<usize>,
    total_image_count: usize,
}

impl TileInfo {
    /// Allgather the local contained mask and derive per-tile counts.
    pub fn gather(comm: &dyn Communicator, local_mask: &[bool]) -> SortlastResult<Self> {
        let num_tiles = local_mask.len();
        tracing::debug!("gathering rendering information");
        let bytes: Vec<u8> = local_mask.iter().map(|&b| u8::from(b)).collect();
        let gathered = comm.allgather(&bytes)?;
        let mut masks = Vec::with_capacity(num_tiles * gathered.len());
        for (rank, m) in gathered.iter().enumerate() {
            if m.len() != num_tiles {
                return Err(SortlastError::sanity(format!(
                    "rank {rank} reported {} tiles, expected {num_tiles}",
                    m.len()
                )));
            }
            masks.extend(m.iter().map(|&b| b != 0));
        }
        Ok(Self::from_masks(num_tiles, masks))
    }

    /// Build from row-major per-rank masks.
    pub fn from_masks(num_tiles: usize, masks: Vec<bool>) -> Self {
        let num_processes = if num_tiles == 0 { 0 } else { masks.len() / num_tiles };
        let contrib_counts: Vec<usize> = (0..num_tiles)
            .map(|t| (0..num_processes).filter(|&p| masks[p * num_tiles + t]).count())
            .collect();
        let total_image_count = contrib_counts.iter().sum();
        Self {
            num_tiles,
            masks,
            contrib_counts,
            total_image_count,
        }
    }

    /// Number of tiles.
    pub fn num_tiles(&self) -> usize {
        self.num_tiles
    }

    /// Whether `rank` has geometry on `tile`.
    pub fn contains(&self, rank: usize, tile: usize) -> bool {
        self.masks
            .get(rank * self.num_tiles + tile)
            .copied()
            .unwrap_or(false)
    }

    /// Contained flags of `rank`.
    pub fn mask_of(&self, rank: usize) -> &[bool] {
        let start = (rank * self.num_tiles).min(self.masks.len());
        let end = (start + self.num_tiles).min(self.masks.len());
        &self.masks[start..end]
    }

    /// Tiles `rank` contributes to, ascending.
    pub fn contained_list(&self, rank: usize) -> Vec<usize> {
        (0..self.num_tiles).filter(|&t| self.contains(rank, t)).collect()
    }

    /// Contributing ranks per tile.
    pub fn contrib_counts(&self) -> &[usize] {
        &self.contrib_counts
    }

    /// Sum of all contributions.
    pub fn total_image_count(&self) -> usize {
        self.total_image_count
    }
}

#[cfg(test)]
#[path = "../../tests/unit/tiles/info.rs"]
mod tests;
