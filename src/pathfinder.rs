//! Resumable A* search over the obstacle grid.
//!
//! One `Pathfinder` serves one path request. Search state (the node arena and
//! the open/closed sets) lives in the struct, so a search interrupted by the
//! per-tick iteration budget picks up exactly where it stopped on the next
//! call. The obstacle data is a boolean snapshot bound via [`Pathfinder::update`];
//! rebinding discards any in-flight search.

use std::collections::{HashMap, HashSet};

use crate::grid::{cell_dims, footprint_coords, GridCoord};
use crate::math::Vec2;
use crate::terrain::Terrain;

/// Weight applied to the height difference between adjacent cells when
/// pricing a move, discouraging steep climbs.
const HEIGHT_COST_FACTOR: f32 = 0.01;

/// Neighbor offsets in discovery order. The order is part of the tie-break
/// contract: nodes with equal cost are expanded first-discovered-first, and
/// multiplayer clients must agree on it.
const NEIGHBOR_DIRS: [(f32, f32); 8] = [
    (-1.0, -1.0),
    (0.0, -1.0),
    (1.0, -1.0),
    (-1.0, 0.0),
    (1.0, 0.0),
    (-1.0, 1.0),
    (0.0, 1.0),
    (1.0, 1.0),
];

/// One grid cell visited during a search.
///
/// `parent` is an index into the owning arena, used only to walk the finished
/// path back to the start; nodes are looked up by grid position, never by
/// following parents.
#[derive(Clone, Copy, Debug)]
struct SearchNode {
    pos: Vec2,
    g: f32,
    h: f32,
    height: f32,
    parent: Option<usize>,
}

impl SearchNode {
    fn f(&self) -> f32 {
        self.g + self.h
    }
}

/// How a `find_path` call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The destination (or an acceptable near-miss of it) was reached.
    Found,
    /// The iteration budget ran out first; call again to resume.
    BudgetExhausted,
    /// The open set emptied without reaching the destination. The returned
    /// waypoints lead to the explored cell closest to it.
    Unreachable,
}

/// Outcome plus the best waypoint sequence available at that point.
///
/// Waypoints are terrain-space positions ordered start to destination. For
/// `BudgetExhausted` the sequence is empty; the search is still running.
#[derive(Clone, Debug)]
pub struct SearchResult {
    pub outcome: SearchOutcome,
    pub waypoints: Vec<Vec2>,
}

struct ActiveSearch {
    end: Vec2,
    size: Vec2,
    /// Terrain cells the destination footprint would cover; reaching any of
    /// them counts as arrival when the literal destination is unwalkable.
    end_cells: Vec<GridCoord>,
}

/// A* search engine bound to an obstacle snapshot.
pub struct Pathfinder {
    terrain_width: u32,
    terrain_height: u32,
    bitmap: Vec<bool>,
    ratio: u32,
    cells_wide: u32,

    arena: Vec<SearchNode>,
    open: Vec<usize>,   // insertion order, scanned linearly for the best f
    closed: Vec<usize>,
    open_cells: HashMap<GridCoord, usize>,
    closed_cells: HashSet<GridCoord>,
    active: Option<ActiveSearch>,
}

impl Pathfinder {
    /// Create a pathfinder for a terrain of the given size. No obstacle data
    /// is bound yet; the grid starts fully walkable at ratio 1.
    pub fn new(terrain_width: u32, terrain_height: u32) -> Self {
        let (cells_wide, cells_high) = cell_dims(terrain_width, terrain_height, 1);
        Self {
            terrain_width,
            terrain_height,
            bitmap: vec![false; (cells_wide * cells_high) as usize],
            ratio: 1,
            cells_wide,
            arena: Vec::new(),
            open: Vec::new(),
            closed: Vec::new(),
            open_cells: HashMap::new(),
            closed_cells: HashSet::new(),
            active: None,
        }
    }

    /// Rebind the obstacle snapshot this search reads from.
    ///
    /// The bitmap must be sized for the terrain at `ratio`; anything else is
    /// a caller bug. Any in-flight open/closed state is invalidated, since it
    /// was computed against data that no longer holds.
    pub fn update(&mut self, bitmap: Vec<bool>, ratio: u32) {
        let (cells_wide, cells_high) = cell_dims(self.terrain_width, self.terrain_height, ratio);
        assert_eq!(
            bitmap.len(),
            (cells_wide * cells_high) as usize,
            "obstacle bitmap does not match terrain {}x{} at ratio {}",
            self.terrain_width,
            self.terrain_height,
            ratio
        );

        self.bitmap = bitmap;
        self.ratio = ratio;
        self.cells_wide = cells_wide;
        self.clear_search();
    }

    /// True while a budget-interrupted search is waiting to be resumed.
    pub fn in_flight(&self) -> bool {
        self.active.is_some()
    }

    fn clear_search(&mut self) {
        self.arena.clear();
        self.open.clear();
        self.closed.clear();
        self.open_cells.clear();
        self.closed_cells.clear();
        self.active = None;
    }

    /// Walkability of a candidate position for a footprint of `size`: every
    /// terrain cell the footprint covers must exist and be unobstructed.
    fn is_walkable(&self, pos: Vec2, size: Vec2) -> bool {
        let coords = footprint_coords(pos, size, self.terrain_width, self.terrain_height);
        if coords.is_empty() {
            return false;
        }
        coords.iter().all(|c| {
            let idx = (c.y / self.ratio as i32) as usize * self.cells_wide as usize
                + (c.x / self.ratio as i32) as usize;
            self.bitmap.get(idx).map(|blocked| !blocked).unwrap_or(false)
        })
    }

    fn cell_key(pos: Vec2) -> GridCoord {
        GridCoord::new(pos.x.round() as i32, pos.y.round() as i32)
    }

    fn push_open(&mut self, node: SearchNode) -> usize {
        let idx = self.arena.len();
        self.arena.push(node);
        self.open.push(idx);
        self.open_cells.insert(Self::cell_key(node.pos), idx);
        idx
    }

    fn move_to_closed(&mut self, open_pos: usize) -> usize {
        let idx = self.open.remove(open_pos);
        let key = Self::cell_key(self.arena[idx].pos);
        self.open_cells.remove(&key);
        self.closed.push(idx);
        self.closed_cells.insert(key);
        idx
    }

    /// Index into `open` of the node with the lowest f. Ties go to the node
    /// discovered first; clients must agree on this bit for bit.
    fn best_open(&self) -> usize {
        let mut best = 0;
        let mut best_f = self.arena[self.open[0]].f();
        for (i, &idx) in self.open.iter().enumerate().skip(1) {
            let f = self.arena[idx].f();
            if f < best_f {
                best = i;
                best_f = f;
            }
        }
        best
    }

    /// Run up to `max_iters` node expansions of an A* search from `start` to
    /// `end` for an entity footprint of `size`.
    ///
    /// The first call seeds the search; subsequent calls resume it until a
    /// terminal outcome. Start and end are clamped into the terrain before
    /// use, so out-of-range requests degrade instead of failing.
    pub fn find_path(
        &mut self,
        terrain: &Terrain,
        start: Vec2,
        end: Vec2,
        size: Vec2,
        max_iters: u32,
    ) -> SearchResult {
        let start = terrain.clamp_pos(start);
        let end = terrain.clamp_pos(end);

        if self.active.is_none() {
            log::debug!(
                "pathfinder: new search from ({:.2}, {:.2}) to ({:.2}, {:.2}), size ({}, {})",
                start.x, start.y, end.x, end.y, size.x, size.y
            );
            self.clear_search();
            let end_cells = footprint_coords(end, size, self.terrain_width, self.terrain_height);
            if end_cells.is_empty() {
                log::warn!(
                    "pathfinder: destination footprint lies outside the map, \
                     aiming for the nearest reachable cell"
                );
            }
            self.active = Some(ActiveSearch { end, size, end_cells });
            let seed = SearchNode {
                pos: start,
                g: 0.0,
                h: start.distance(end),
                height: terrain.height_at_pos(start),
                parent: None,
            };
            self.push_open(seed);
        }

        // A resumed call continues towards the goal it was seeded with.
        let (end, size) = self
            .active
            .as_ref()
            .map(|a| (a.end, a.size))
            .unwrap_or((end, size));
        let ratio = self.ratio as f32;
        let end_unwalkable = !self.is_walkable(end, size);

        let mut terminal: Option<usize> = None;
        let mut iters = 0;

        while iters < max_iters && !self.open.is_empty() && terminal.is_none() {
            let best_open = self.best_open();
            let best = self.move_to_closed(best_open);
            let best_pos = self.arena[best].pos;
            iters += 1;

            // Arrived exactly (up to cell rounding).
            if best_pos.round() == end.round() {
                terminal = Some(best);
                break;
            }

            // Within one grid step of the destination: append the exact end
            // point so the entity does not stop a fraction short.
            let delta = (end - best_pos).abs();
            if delta.x < ratio && delta.y < ratio {
                let node = SearchNode {
                    pos: end,
                    g: self.arena[best].g + best_pos.distance(end),
                    h: 0.0,
                    height: terrain.height_at_pos(end),
                    parent: Some(best),
                };
                let idx = self.arena.len();
                self.arena.push(node);
                self.closed.push(idx);
                self.closed_cells.insert(Self::cell_key(end));
                terminal = Some(idx);
                break;
            }

            // The literal destination is blocked, but we stand on a cell its
            // footprint would cover; that is as close as anyone can get.
            if end_unwalkable {
                let key = Self::cell_key(best_pos);
                let hit = self
                    .active
                    .as_ref()
                    .map(|a| a.end_cells.contains(&key))
                    .unwrap_or(false);
                if hit {
                    log::warn!(
                        "pathfinder: destination ({:.2}, {:.2}) is not walkable, \
                         stopping at ({:.2}, {:.2})",
                        end.x, end.y, best_pos.x, best_pos.y
                    );
                    terminal = Some(best);
                    break;
                }
            }

            let (best_g, best_height) = (self.arena[best].g, self.arena[best].height);
            for (dx, dy) in NEIGHBOR_DIRS {
                let npos = best_pos + Vec2::new(dx * ratio, dy * ratio);
                if npos.x < 0.0
                    || npos.y < 0.0
                    || npos.x >= self.terrain_width as f32
                    || npos.y >= self.terrain_height as f32
                {
                    continue;
                }

                let key = Self::cell_key(npos);
                if self.closed_cells.contains(&key) || !self.is_walkable(npos, size) {
                    continue;
                }

                let nheight = terrain.height_at_pos(npos);
                let g = best_g
                    + best_pos.distance(npos)
                    + HEIGHT_COST_FACTOR * (nheight - best_height).abs();
                let h = npos.distance(end);

                if let Some(&existing) = self.open_cells.get(&key) {
                    // A strictly cheaper route to this cell already exists;
                    // otherwise adopt the new parent. Updating in place keeps
                    // the node's discovery order, and with it the tie-break.
                    if self.arena[existing].g < g {
                        continue;
                    }
                    self.arena[existing].g = g;
                    self.arena[existing].h = h;
                    self.arena[existing].height = nheight;
                    self.arena[existing].parent = Some(best);
                } else {
                    self.push_open(SearchNode {
                        pos: npos,
                        g,
                        h,
                        height: nheight,
                        parent: Some(best),
                    });
                }
            }

            log::trace!(
                "pathfinder: ({:03}) open {}, closed {}, best ({:.2}, {:.2})",
                iters,
                self.open.len(),
                self.closed.len(),
                best_pos.x,
                best_pos.y
            );
        }

        if let Some(idx) = terminal {
            let waypoints = self.reconstruct(idx);
            self.clear_search();
            return SearchResult {
                outcome: SearchOutcome::Found,
                waypoints,
            };
        }

        if self.open.is_empty() {
            log::warn!("pathfinder: path is completely blocked, returning the closest approach");
            let waypoints = match self.closest_approach() {
                Some(idx) => self.reconstruct(idx),
                None => vec![start],
            };
            self.clear_search();
            return SearchResult {
                outcome: SearchOutcome::Unreachable,
                waypoints,
            };
        }

        log::info!("pathfinder: iteration budget exhausted, resuming on next call");
        SearchResult {
            outcome: SearchOutcome::BudgetExhausted,
            waypoints: Vec::new(),
        }
    }

    /// Closed node nearest the destination, first found winning ties.
    fn closest_approach(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        let mut best_h = f32::INFINITY;
        for &idx in &self.closed {
            if self.arena[idx].h < best_h {
                best_h = self.arena[idx].h;
                best = Some(idx);
            }
        }
        best
    }

    /// Walk parent indices from a terminal node back to the start and emit
    /// the path start-first. At coarse ratios the gap between consecutive
    /// nodes is interpolated into per-terrain-cell waypoints.
    fn reconstruct(&self, terminal: usize) -> Vec<Vec2> {
        let mut chain = Vec::new();
        let mut cursor = Some(terminal);
        while let Some(idx) = cursor {
            chain.push(self.arena[idx].pos);
            cursor = self.arena[idx].parent;
        }
        chain.reverse();

        let ratio = self.ratio;
        let mut waypoints: Vec<Vec2> = Vec::with_capacity(chain.len());
        for pos in chain {
            match waypoints.last().copied() {
                Some(prev) if ratio > 1 && prev.distance(pos) >= ratio as f32 => {
                    for i in 1..=ratio {
                        waypoints.push(prev.lerp(pos, i as f32 / ratio as f32));
                    }
                }
                _ => waypoints.push(pos),
            }
        }
        waypoints
    }
}
