//! Virtual tree: rounds of pairwise tile transfers, planned identically on
//! every rank, that funnel each tile toward its display.

use crate::comm::Tag;
use crate::foundation::error::SortlastResult;
use crate::image::codec::{compress_image, decompress_image};
use crate::image::composite::compressed_composite;
use crate::image::dense::Image;
use crate::image::sparse::SparseImage;
use crate::session::scratch::ScratchSlot;
use crate::strategy::Frame;
use crate::tiles::info::TileInfo;

const VTREE_IMAGE_TAG: Tag = 40;

#[derive(Clone, Copy, Debug)]
struct NodeInfo {
    rank: usize,
    num_contained: usize,
    tile_held: Option<usize>,
    tile_sending: Option<usize>,
    tile_receiving: Option<usize>,
    send_dest: usize,
    recv_src: usize,
}

/// What one rank does in one round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Transfer {
    /// `(tile, destination)` of the image this rank sends.
    pub(crate) send: Option<(usize, usize)>,
    /// `(tile, source)` of the image this rank receives.
    pub(crate) recv: Option<(usize, usize)>,
    /// Whether this rank still has its own rendering of the received tile.
    pub(crate) renders_received: bool,
}

struct Planner<'a> {
    display_nodes: &'a [usize],
    num_tiles: usize,
    /// Row-major contained flags, cleared as contributions are handed off.
    masks: Vec<bool>,
    info: Vec<NodeInfo>,
}

impl Planner<'_> {
    fn contains(&self, node: usize, tile: usize) -> bool {
        self.masks[self.info[node].rank * self.num_tiles + tile]
    }

    fn hand_off(&mut self, sender: usize, recv: usize, tile: usize) {
        let (send_rank, recv_rank) = (self.info[sender].rank, self.info[recv].rank);
        let r = &mut self.info[recv];
        r.tile_held = Some(tile);
        r.tile_receiving = Some(tile);
        r.recv_src = send_rank;
        let s = &mut self.info[sender];
        s.tile_sending = Some(tile);
        s.send_dest = recv_rank;
        if s.tile_held == Some(tile) {
            s.tile_held = None;
        }
        s.num_contained = s.num_contained.saturating_sub(1);
        self.masks[send_rank * self.num_tiles + tile] = false;
    }

    /// Pick a sender of `tile` for `recv`, preferring one already holding a
    /// composited image of it.
    fn find_sender(&mut self, recv: usize, tile: usize) -> bool {
        let display = self.display_nodes[tile];
        let mut sender = None;
        for node in (0..self.info.len()).rev() {
            let n = &self.info[node];
            if n.tile_sending.is_some()
                || !self.contains(node, tile)
                || n.tile_receiving == Some(tile)
                || n.rank == display
                || node == recv
            {
                continue;
            }
            if n.tile_held == Some(tile) {
                sender = Some(node);
                break;
            }
            sender.get_or_insert(node);
        }
        match sender {
            Some(sender) => {
                self.hand_off(sender, recv, tile);
                true
            }
            None => false,
        }
    }

    fn find_receiver(&mut self, sender: usize, tile: usize) -> bool {
        let display = self.display_nodes[tile];
        for node in sender + 1..self.info.len() {
            let n = &self.info[node];
            if n.tile_receiving.is_none()
                && n.tile_held.is_none_or(|t| t == tile)
                && (self.contains(node, tile) || n.rank == display)
            {
                self.hand_off(sender, node, tile);
                return true;
            }
        }
        false
    }

    fn plan_round(&mut self) -> bool {
        let mut transferred = false;
        // Stable, so ties keep their previous order.
        self.info.sort_by_key(|n| n.num_contained);
        for n in &mut self.info {
            n.tile_sending = None;
            n.tile_receiving = None;
        }
        for recv in 0..self.info.len() {
            if self.info[recv].tile_receiving.is_some() {
                continue;
            }
            if let Some(held) = self.info[recv].tile_held {
                if self.find_sender(recv, held) {
                    transferred = true;
                    continue;
                }
                let n = self.info[recv];
                if n.tile_sending.is_none()
                    && n.rank != self.display_nodes[held]
                    && self.find_receiver(recv, held)
                {
                    transferred = true;
                } else {
                    continue;
                }
            }
            for tile in 0..self.num_tiles {
                let n = self.info[recv];
                if (!self.contains(recv, tile) && self.display_nodes[tile] != n.rank)
                    || n.tile_sending == Some(tile)
                {
                    continue;
                }
                if self.find_sender(recv, tile) {
                    transferred = true;
                    break;
                }
            }
        }
        transferred
    }

    fn transfer_of(&self, node: &NodeInfo) -> Transfer {
        Transfer {
            send: node.tile_sending.map(|t| (t, node.send_dest)),
            recv: node.tile_receiving.map(|t| (t, node.recv_src)),
            renders_received: node
                .tile_receiving
                .is_some_and(|t| self.masks[node.rank * self.num_tiles + t]),
        }
    }
}

/// The transfer rounds for every rank, indexed `[round][rank]`, followed by
/// a final round that moves stray tiles onto their displays. Also returns
/// which contained flags survive.
pub(crate) fn plan(
    info: &TileInfo,
    display_nodes: &[usize],
    num_processes: usize,
) -> (Vec<Vec<Transfer>>, Vec<bool>) {
    let num_tiles = info.num_tiles();
    let mut planner = Planner {
        display_nodes,
        num_tiles,
        masks: (0..num_processes)
            .flat_map(|r| (0..num_tiles).map(move |t| (r, t)))
            .map(|(r, t)| info.contains(r, t))
            .collect(),
        info: (0..num_processes)
            .map(|rank| NodeInfo {
                rank,
                num_contained: info.contained_list(rank).len(),
                tile_held: None,
                tile_sending: None,
                tile_receiving: None,
                send_dest: 0,
                recv_src: 0,
            })
            .collect(),
    };

    let mut rounds = Vec::new();
    loop {
        let transferred = planner.plan_round();
        let mut round = vec![Transfer::default(); num_processes];
        for node in &planner.info {
            round[node.rank] = planner.transfer_of(node);
        }
        rounds.push(round);
        if !transferred {
            break;
        }
    }

    let held: Vec<Option<usize>> = {
        let mut held = vec![None; num_processes];
        for node in &planner.info {
            held[node.rank] = node.tile_held;
        }
        held
    };
    let displayed = |rank: usize| display_nodes.iter().position(|&d| d == rank);
    let mut last = vec![Transfer::default(); num_processes];
    for rank in 0..num_processes {
        let mut my_held = held[rank];
        if let Some(tile) = my_held.filter(|&t| Some(t) != displayed(rank)) {
            last[rank].send = Some((tile, display_nodes[tile]));
            my_held = None;
        }
        if let Some(tile) = displayed(rank).filter(|&t| my_held != Some(t)) {
            if let Some(src) = planner.info.iter().find(|n| n.tile_held == Some(tile)).map(|n| n.rank) {
                last[rank].recv = Some((tile, src));
                last[rank].renders_received = planner.masks[rank * num_tiles + tile];
            }
        }
    }
    rounds.push(last);
    (rounds, planner.masks)
}

#[tracing::instrument(level = "debug", skip_all, fields(rank = frame.rank()))]
pub(crate) fn compose(frame: &mut Frame<'_>) -> SortlastResult<Option<Image>> {
    let rank = frame.rank();
    let comm = frame.comm;
    let mode = frame.config.composite_mode;
    let info = frame.info()?;
    let displayed = frame.layout.tile_displayed(rank);
    let (rounds, masks) = plan(info, &frame.layout.display_nodes(), comm.size());
    tracing::debug!(rounds = rounds.len(), "virtual tree planned");

    let (max_w, max_h) = (frame.layout.max_width(), frame.layout.max_height());
    let mut image = frame
        .scratch
        .take_image(ScratchSlot::TileImage, frame.pixel_layout, max_w, max_h);
    let mut tile_held: Option<usize> = None;

    for round in &rounds {
        let step = round[rank];
        let outgoing = match step.send {
            Some((tile, dest)) => {
                let sparse = if tile_held == Some(tile) {
                    tile_held = None;
                    compress_image(&image, mode)?
                } else {
                    frame.source.compressed_tile_image(tile, frame.scratch)?
                };
                let packed = sparse.package()?;
                frame.scratch.put_sparse(ScratchSlot::WorkingSparse, sparse);
                Some((dest, packed))
            }
            None => None,
        };
        match (step.recv, outgoing) {
            (Some((tile, src)), outgoing) => {
                if tile_held != Some(tile) && step.renders_received {
                    frame.source.tile_image(tile, &mut image, frame.scratch)?;
                    tile_held = Some(tile);
                }
                let data = match outgoing {
                    Some((dest, bytes)) => comm.sendrecv(dest, VTREE_IMAGE_TAG, &bytes, src, VTREE_IMAGE_TAG)?,
                    None => comm.recv(src, VTREE_IMAGE_TAG)?,
                };
                let incoming = SparseImage::unpackage(&data)?;
                if tile_held == Some(tile) {
                    compressed_composite(&mut image, &incoming, true, mode)?;
                } else {
                    decompress_image(&incoming, &mut image, frame.background.working)?;
                    tile_held = Some(tile);
                }
            }
            (None, Some((dest, bytes))) => comm.send(dest, VTREE_IMAGE_TAG, &bytes)?,
            (None, None) => {}
        }
    }

    let Some(tile) = displayed else {
        frame.scratch.put_image(ScratchSlot::TileImage, image);
        return Ok(None);
    };
    if tile_held != Some(tile) {
        if masks[rank * info.num_tiles() + tile] {
            tracing::debug!(tile, "rendering displayed tile nobody else drew");
            frame.source.tile_image(tile, &mut image, frame.scratch)?;
            if frame.background.needs_correction {
                image.correct_background(frame.background.true_color);
            }
        } else {
            tracing::debug!(tile, "returning blank tile");
            let (w, h) = frame.tile_size(tile)?;
            image.set_dimensions(w, h);
            image.clear(frame.background.true_color);
        }
    } else if frame.background.needs_correction {
        image.correct_background(frame.background.true_color);
    }
    Ok(Some(image))
}

#[cfg(test)]
#[path = "../../tests/unit/strategy/vtree.rs"]
mod tests;
