//! Path manager: one bounded slice of search per tick per moving entity.
//!
//! The manager owns the obstacle grid and keeps it synchronized with the
//! entity registry through the lifecycle event stream, schedules resumable
//! searches under a per-tick iteration budget, walks entities along their
//! finished paths, and retires requests by reference count or age.

use std::collections::{BTreeMap, VecDeque};

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::grid::ObstacleGrid;
use crate::math::Vec2;
use crate::pathfinder::{Pathfinder, SearchOutcome};
use crate::registry::{EntityEvent, EntityId, EntityRegistry};
use crate::terrain::Terrain;

/// Opaque handle to a path request, stable across repathing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PathHandle(u64);

/// Lifecycle state of a path request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathStatus {
    /// Request created, no search work done yet.
    NotStarted,
    /// Searching or traversing.
    InProgress,
    /// A new destination replaced the old one mid-flight; otherwise behaves
    /// like `InProgress`.
    Repathing,
    /// The entity reached its destination.
    Completed,
    /// The search exhausted without reaching the destination; the best
    /// partial path is kept and queryable.
    Unreachable,
    /// The owning entity died; the entity halts where it stands.
    Stopped,
    /// No such request (never created, or already retired).
    Invalid,
}

impl PathStatus {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            PathStatus::Completed | PathStatus::Unreachable | PathStatus::Stopped
        )
    }
}

/// Tunables for the path manager.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PathManagerConfig {
    /// A* node expansions allowed per request per tick.
    pub iters_per_frame: u32,
    /// Obstacle grid resolution: one grid cell per `ratio × ratio` terrain
    /// cells.
    pub ratio: u32,
    /// Ticks a finished request is retained before garbage collection.
    pub retire_after_ticks: u32,
    /// Minimum tick gap between accepted repaths of the same entity.
    pub repath_cooldown_ticks: u32,
    /// Initial reference count of a new request.
    pub default_refcount: u32,
}

impl Default for PathManagerConfig {
    fn default() -> Self {
        Self {
            iters_per_frame: 200,
            ratio: 1,
            retire_after_ticks: 300,
            repath_cooldown_ticks: 10,
            default_refcount: 2,
        }
    }
}

impl PathManagerConfig {
    #[must_use]
    pub fn with_iters_per_frame(mut self, iters: u32) -> Self {
        self.iters_per_frame = iters;
        self
    }

    #[must_use]
    pub fn with_ratio(mut self, ratio: u32) -> Self {
        self.ratio = ratio;
        self
    }

    #[must_use]
    pub fn with_retire_after_ticks(mut self, ticks: u32) -> Self {
        self.retire_after_ticks = ticks;
        self
    }

    #[must_use]
    pub fn with_repath_cooldown_ticks(mut self, ticks: u32) -> Self {
        self.repath_cooldown_ticks = ticks;
        self
    }

    #[must_use]
    pub fn with_default_refcount(mut self, refcount: u32) -> Self {
        self.default_refcount = refcount;
        self
    }
}

/// One entity's pathing operation. At most one exists per entity; repathing
/// mutates it in place so the handle stays stable.
struct PathRequest {
    pathfinder: Pathfinder,
    original_start: Vec2,
    start: Vec2,
    end: Vec2,
    size: Vec2,
    status: PathStatus,
    /// Remaining waypoints; the front is the entity's next step.
    waypoints: VecDeque<Vec2>,
    calculation_done: bool,
    ticks_to_remove: u32,
    refcount: u32,
    /// Ticks until another repath may be accepted.
    repath_cooldown: u32,
    /// Destination received during the cooldown, applied when it expires.
    pending_end: Option<Vec2>,
    /// Lifecycle epoch the in-flight search snapshot was taken at.
    bound_lifecycle: u64,
}

/// Owns per-entity path requests and the shared obstacle grid.
///
/// Single-threaded and tick-driven: [`PathManager::update`] must be called
/// exactly once per simulation tick, after which entity positions and path
/// statuses reflect that tick.
pub struct PathManager {
    terrain: Terrain,
    obstacles: ObstacleGrid,
    events: Receiver<EntityEvent>,
    requests: BTreeMap<EntityId, PathRequest>,
    /// Footprints currently stamped into the obstacle grid, by entity.
    mapped: BTreeMap<EntityId, (Vec2, Vec2)>,
    /// Bumped when a lifecycle event changes the grid; in-flight searches
    /// bound against an older value restart on fresh data.
    lifecycle_epoch: u64,
    config: PathManagerConfig,
    tick: u64,
}

impl PathManager {
    /// Create a manager for `terrain`, subscribed to `registry`'s lifecycle
    /// stream, with default configuration.
    pub fn new(terrain: Terrain, registry: &EntityRegistry) -> Self {
        Self::with_config(terrain, registry, PathManagerConfig::default())
    }

    pub fn with_config(
        terrain: Terrain,
        registry: &EntityRegistry,
        config: PathManagerConfig,
    ) -> Self {
        let (width, height) = terrain.size();
        Self {
            obstacles: ObstacleGrid::new(width, height, config.ratio),
            events: registry.event_receiver(),
            terrain,
            requests: BTreeMap::new(),
            mapped: BTreeMap::new(),
            lifecycle_epoch: 0,
            config,
            tick: 0,
        }
    }

    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    pub fn iters_per_frame(&self) -> u32 {
        self.config.iters_per_frame
    }

    pub fn set_iters_per_frame(&mut self, iters: u32) {
        self.config.iters_per_frame = iters;
    }

    /// Number of live path requests, including finished ones not yet retired.
    pub fn path_count(&self) -> usize {
        self.requests.len()
    }

    fn handle_of(entity: EntityId) -> PathHandle {
        PathHandle(u64::from(entity.to_u32()) * 2)
    }

    /// Start (or redirect) pathing for an entity towards `dest`.
    ///
    /// A second call for the same entity keeps the request and handle and
    /// only replaces the destination: immediately when the repath cooldown
    /// has lapsed, otherwise once it does.
    pub fn start_pathing(
        &mut self,
        registry: &EntityRegistry,
        entity: EntityId,
        dest: Vec2,
    ) -> PathHandle {
        let dest = self.terrain.clamp_pos(dest);
        let handle = Self::handle_of(entity);

        if let Some(req) = self.requests.get_mut(&entity) {
            if req.repath_cooldown > 0 {
                log::debug!(
                    "path-manager: repath of entity {} within cooldown, deferring destination",
                    entity.to_u32()
                );
                req.pending_end = Some(dest);
            } else {
                let start = registry.get(entity).map(|s| s.position).unwrap_or(req.start);
                Self::apply_repath(req, start, dest, &self.config);
                log::debug!(
                    "path-manager: repathing entity {} to ({:.2}, {:.2})",
                    entity.to_u32(),
                    dest.x,
                    dest.y
                );
            }
            return handle;
        }

        let Some(state) = registry.get(entity) else {
            log::warn!(
                "path-manager: ignoring path request for dead entity {}",
                entity.to_u32()
            );
            return handle;
        };

        let (width, height) = self.terrain.size();
        self.requests.insert(
            entity,
            PathRequest {
                pathfinder: Pathfinder::new(width, height),
                original_start: state.position,
                start: state.position,
                end: dest,
                size: state.size,
                status: PathStatus::NotStarted,
                waypoints: VecDeque::new(),
                calculation_done: false,
                ticks_to_remove: self.config.retire_after_ticks,
                refcount: self.config.default_refcount,
                repath_cooldown: self.config.repath_cooldown_ticks,
                pending_end: None,
                bound_lifecycle: 0,
            },
        );
        log::debug!(
            "path-manager: entity {} pathing from ({:.2}, {:.2}) to ({:.2}, {:.2})",
            entity.to_u32(),
            state.position.x,
            state.position.y,
            dest.x,
            dest.y
        );
        handle
    }

    fn apply_repath(req: &mut PathRequest, start: Vec2, dest: Vec2, config: &PathManagerConfig) {
        req.start = start;
        req.end = dest;
        req.waypoints.clear();
        req.calculation_done = false;
        req.status = PathStatus::Repathing;
        req.pending_end = None;
        req.ticks_to_remove = config.retire_after_ticks;
        req.repath_cooldown = config.repath_cooldown_ticks;
        // Force a fresh snapshot bind, which also drops the old open/closed
        // sets.
        req.bound_lifecycle = 0;
    }

    /// Status of a pathing operation by handle.
    pub fn get_path_status(&self, handle: PathHandle) -> PathStatus {
        self.requests
            .iter()
            .find(|(&id, _)| Self::handle_of(id) == handle)
            .map(|(_, req)| req.status)
            .unwrap_or(PathStatus::Invalid)
    }

    /// Status of a pathing operation by entity. Unambiguous because only one
    /// request may exist per entity.
    pub fn entity_path_status(&self, entity: EntityId) -> PathStatus {
        self.requests
            .get(&entity)
            .map(|req| req.status)
            .unwrap_or(PathStatus::Invalid)
    }

    /// The entity's next waypoint, if any remain.
    pub fn next_position(&self, entity: EntityId) -> Option<Vec2> {
        self.requests
            .get(&entity)
            .and_then(|req| req.waypoints.front().copied())
    }

    /// Drop one reference to a request. The request is deleted at the next
    /// retirement sweep after the count reaches zero, never mid-tick.
    pub fn remove_pathing(&mut self, handle: PathHandle) {
        if let Some(req) = self
            .requests
            .iter_mut()
            .find(|(&id, _)| Self::handle_of(id) == handle)
            .map(|(_, req)| req)
        {
            req.refcount = req.refcount.saturating_sub(1);
        }
    }

    /// Advance the subsystem by one simulation tick: reconcile the obstacle
    /// grid with the registry, run one budgeted search slice per pending
    /// request, step entities along finished paths, and sweep retired
    /// requests.
    pub fn update(&mut self, registry: &mut EntityRegistry) {
        self.tick += 1;
        self.poll_entities(registry);

        let ids: Vec<EntityId> = self.requests.keys().copied().collect();
        for id in ids {
            self.update_request(registry, id);
        }

        self.sweep_retired();
    }

    /// Drain lifecycle events and patch the obstacle grid incrementally,
    /// without rescanning the whole registry.
    fn poll_entities(&mut self, registry: &EntityRegistry) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                EntityEvent::Created(id) => {
                    if self.mapped.contains_key(&id) {
                        continue;
                    }
                    // An entity spawned and destroyed between ticks never
                    // reaches the grid.
                    if let Some(state) = registry.get(id) {
                        self.obstacles.stamp(state.position, state.size);
                        self.mapped.insert(id, (state.position, state.size));
                        self.lifecycle_epoch += 1;
                    }
                }
                EntityEvent::Destroyed(id) => {
                    if let Some((pos, size)) = self.mapped.remove(&id) {
                        self.obstacles.unstamp(pos, size);
                        self.lifecycle_epoch += 1;
                    }
                    if let Some(req) = self.requests.get_mut(&id) {
                        if !req.status.is_terminal() {
                            log::debug!(
                                "path-manager: entity {} died, stopping its path",
                                id.to_u32()
                            );
                            req.status = PathStatus::Stopped;
                            req.waypoints.clear();
                            req.calculation_done = true;
                        }
                    }
                }
            }
        }
    }

    fn update_request(&mut self, registry: &mut EntityRegistry, id: EntityId) {
        let req = self.requests.get_mut(&id).expect("request disappeared mid-tick");

        if req.repath_cooldown > 0 {
            req.repath_cooldown -= 1;
            if req.repath_cooldown == 0 {
                if let Some(dest) = req.pending_end.take() {
                    let start = registry.get(id).map(|s| s.position).unwrap_or(req.start);
                    Self::apply_repath(req, start, dest, &self.config);
                    log::debug!(
                        "path-manager: applying deferred repath of entity {} to ({:.2}, {:.2})",
                        id.to_u32(),
                        dest.x,
                        dest.y
                    );
                }
            }
        }

        if req.status.is_terminal() {
            return;
        }

        if !registry.is_alive(id) {
            log::debug!("path-manager: entity {} is gone, stopping", id.to_u32());
            req.status = PathStatus::Stopped;
            req.waypoints.clear();
            req.calculation_done = true;
            return;
        }

        if !req.calculation_done {
            if !req.pathfinder.in_flight() || req.bound_lifecycle != self.lifecycle_epoch {
                let (pos, size) = self
                    .mapped
                    .get(&id)
                    .copied()
                    .unwrap_or_else(|| {
                        let state = registry.get(id).expect("liveness checked above");
                        (state.position, state.size)
                    });
                req.pathfinder
                    .update(self.obstacles.snapshot_excluding(pos, size), self.obstacles.ratio());
                req.bound_lifecycle = self.lifecycle_epoch;
            }

            let result = req.pathfinder.find_path(
                &self.terrain,
                req.start,
                req.end,
                req.size,
                self.config.iters_per_frame,
            );
            match result.outcome {
                SearchOutcome::Found => {
                    req.waypoints = result.waypoints.into();
                    // The front waypoint is where the entity already stands.
                    req.waypoints.pop_front();
                    req.calculation_done = true;
                    if req.status == PathStatus::NotStarted {
                        req.status = PathStatus::InProgress;
                    }
                }
                SearchOutcome::BudgetExhausted => {
                    if req.status == PathStatus::NotStarted {
                        req.status = PathStatus::InProgress;
                    }
                }
                SearchOutcome::Unreachable => {
                    req.waypoints = result.waypoints.into();
                    req.calculation_done = true;
                    req.status = PathStatus::Unreachable;
                    log::debug!(
                        "path-manager: no path for entity {}, keeping closest approach \
                         ({} waypoints)",
                        id.to_u32(),
                        req.waypoints.len()
                    );
                }
            }
            return;
        }

        // Calculation finished earlier; walk one step per tick.
        match req.waypoints.pop_front() {
            Some(next) => {
                if let Some((old_pos, size)) = self.mapped.get(&id).copied() {
                    self.obstacles.unstamp(old_pos, size);
                    self.obstacles.stamp(next, size);
                    self.mapped.insert(id, (next, size));
                }
                registry.set_position(id, next);
                if req.status == PathStatus::Repathing {
                    req.status = PathStatus::InProgress;
                }
                if req.waypoints.is_empty() {
                    log::debug!(
                        "path-manager: entity {} completed its path at ({:.2}, {:.2}), \
                         {:.2} cells from where it began",
                        id.to_u32(),
                        next.x,
                        next.y,
                        req.original_start.distance(next)
                    );
                    req.status = PathStatus::Completed;
                }
            }
            None => {
                req.status = PathStatus::Completed;
            }
        }
    }

    /// Remove requests whose reference count hit zero and age out finished
    /// ones.
    fn sweep_retired(&mut self) {
        self.requests.retain(|id, req| {
            if req.refcount == 0 {
                log::debug!(
                    "path-manager: request for entity {} released, removing",
                    id.to_u32()
                );
                return false;
            }
            if req.status.is_terminal() {
                if req.ticks_to_remove == 0 {
                    log::debug!(
                        "path-manager: request for entity {} aged out, removing",
                        id.to_u32()
                    );
                    return false;
                }
                req.ticks_to_remove -= 1;
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_setup(size: u32) -> (PathManager, EntityRegistry) {
        let registry = EntityRegistry::new();
        let config = PathManagerConfig::default().with_repath_cooldown_ticks(0);
        let manager = PathManager::with_config(Terrain::flat(size, size), &registry, config);
        (manager, registry)
    }

    #[test]
    fn entity_walks_to_destination() {
        let (mut manager, mut registry) = flat_setup(50);
        let entity = registry.spawn(Vec2::new(10.0, 10.0), Vec2::new(2.0, 2.0));

        let handle = manager.start_pathing(&registry, entity, Vec2::new(30.0, 30.0));
        assert_eq!(manager.get_path_status(handle), PathStatus::NotStarted);
        assert_eq!(manager.path_count(), 1);

        // First tick computes the path, the entity does not move yet.
        manager.update(&mut registry);
        assert_eq!(registry.get(entity).unwrap().position, Vec2::new(10.0, 10.0));
        assert_eq!(manager.get_path_status(handle), PathStatus::InProgress);
        assert_eq!(manager.next_position(entity), Some(Vec2::new(11.0, 11.0)));

        manager.update(&mut registry);
        assert_eq!(registry.get(entity).unwrap().position, Vec2::new(11.0, 11.0));

        for _ in 0..40 {
            manager.update(&mut registry);
        }
        assert_eq!(registry.get(entity).unwrap().position, Vec2::new(30.0, 30.0));
        assert_eq!(manager.get_path_status(handle), PathStatus::Completed);
    }

    #[test]
    fn repathing_keeps_the_handle_and_redirects() {
        let (mut manager, mut registry) = flat_setup(50);
        let entity = registry.spawn(Vec2::new(10.0, 10.0), Vec2::ONE);

        let first = manager.start_pathing(&registry, entity, Vec2::new(40.0, 40.0));
        manager.update(&mut registry);
        manager.update(&mut registry);

        let second = manager.start_pathing(&registry, entity, Vec2::new(10.0, 20.0));
        assert_eq!(first, second);
        assert_eq!(manager.path_count(), 1);
        assert_eq!(manager.get_path_status(first), PathStatus::Repathing);

        for _ in 0..30 {
            manager.update(&mut registry);
        }
        assert_eq!(registry.get(entity).unwrap().position, Vec2::new(10.0, 20.0));
        assert_eq!(manager.get_path_status(first), PathStatus::Completed);
    }

    #[test]
    fn repath_cooldown_defers_the_new_destination() {
        let registry_cfg = PathManagerConfig::default().with_repath_cooldown_ticks(5);
        let mut registry = EntityRegistry::new();
        let mut manager =
            PathManager::with_config(Terrain::flat(50, 50), &registry, registry_cfg);
        let entity = registry.spawn(Vec2::new(10.0, 10.0), Vec2::ONE);

        let handle = manager.start_pathing(&registry, entity, Vec2::new(30.0, 10.0));
        manager.update(&mut registry);

        // Within the cooldown the destination is parked, not searched.
        manager.start_pathing(&registry, entity, Vec2::new(10.0, 30.0));
        assert_ne!(manager.get_path_status(handle), PathStatus::Repathing);

        for _ in 0..6 {
            manager.update(&mut registry);
        }
        // After the cooldown lapses the deferred destination takes over.
        for _ in 0..40 {
            manager.update(&mut registry);
        }
        assert_eq!(registry.get(entity).unwrap().position, Vec2::new(10.0, 30.0));
    }

    #[test]
    fn dead_entity_stops_its_path() {
        let (mut manager, mut registry) = flat_setup(50);
        let entity = registry.spawn(Vec2::new(10.0, 10.0), Vec2::ONE);

        let handle = manager.start_pathing(&registry, entity, Vec2::new(40.0, 40.0));
        manager.update(&mut registry);
        manager.update(&mut registry);

        registry.despawn(entity);
        manager.update(&mut registry);

        assert_eq!(manager.get_path_status(handle), PathStatus::Stopped);
        assert_eq!(manager.next_position(entity), None);
    }

    #[test]
    fn refcount_gates_removal() {
        let (mut manager, mut registry) = flat_setup(50);
        let entity = registry.spawn(Vec2::new(10.0, 10.0), Vec2::ONE);

        // Default refcount is 2.
        let handle = manager.start_pathing(&registry, entity, Vec2::new(20.0, 20.0));
        manager.update(&mut registry);

        manager.remove_pathing(handle);
        manager.update(&mut registry);
        assert_ne!(manager.get_path_status(handle), PathStatus::Invalid);

        manager.remove_pathing(handle);
        manager.update(&mut registry);
        assert_eq!(manager.get_path_status(handle), PathStatus::Invalid);
        assert_eq!(manager.path_count(), 0);
    }

    #[test]
    fn destroyed_blocker_unblocks_searches_the_same_tick() {
        let (mut manager, mut registry) = flat_setup(30);
        // A wall of entities across the middle rows, leaving no corridor.
        let mut wall = Vec::new();
        for x in 0..30 {
            wall.push(registry.spawn(Vec2::new(x as f32, 15.0), Vec2::new(1.0, 1.0)));
        }
        let walker = registry.spawn(Vec2::new(10.0, 5.0), Vec2::ONE);

        let handle = manager.start_pathing(&registry, walker, Vec2::new(10.0, 25.0));
        manager.update(&mut registry);
        for _ in 0..5 {
            manager.update(&mut registry);
        }
        assert_eq!(manager.get_path_status(handle), PathStatus::Unreachable);

        // Tear the wall down and repath: reconciliation happens before any
        // search work in the tick, so the search must get through now.
        for id in wall {
            registry.despawn(id);
        }
        manager.start_pathing(&registry, walker, Vec2::new(10.0, 25.0));
        for _ in 0..60 {
            manager.update(&mut registry);
        }
        assert_eq!(manager.get_path_status(handle), PathStatus::Completed);
        assert_eq!(registry.get(walker).unwrap().position, Vec2::new(10.0, 25.0));
    }

    #[test]
    fn unknown_handle_is_invalid() {
        let (manager, _registry) = flat_setup(10);
        assert_eq!(manager.get_path_status(PathHandle(999)), PathStatus::Invalid);
    }

    #[test]
    fn iters_per_frame_is_tunable() {
        let (mut manager, _registry) = flat_setup(10);
        assert_eq!(manager.iters_per_frame(), 200);
        manager.set_iters_per_frame(50);
        assert_eq!(manager.iters_per_frame(), 50);
    }

    #[test]
    fn small_budget_spreads_search_over_ticks() {
        let registry_cfg = PathManagerConfig::default()
            .with_repath_cooldown_ticks(0)
            .with_iters_per_frame(5);
        let mut registry = EntityRegistry::new();
        let mut manager =
            PathManager::with_config(Terrain::flat(60, 60), &registry, registry_cfg);
        let entity = registry.spawn(Vec2::new(1.0, 1.0), Vec2::ONE);

        let handle = manager.start_pathing(&registry, entity, Vec2::new(50.0, 50.0));

        manager.update(&mut registry);
        // Budget of 5 cannot finish a 50-cell-long search in one tick.
        assert_eq!(manager.get_path_status(handle), PathStatus::InProgress);
        assert_eq!(registry.get(entity).unwrap().position, Vec2::new(1.0, 1.0));

        for _ in 0..200 {
            manager.update(&mut registry);
        }
        assert_eq!(manager.get_path_status(handle), PathStatus::Completed);
        assert_eq!(registry.get(entity).unwrap().position, Vec2::new(50.0, 50.0));
    }
}
