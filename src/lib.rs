//! Gridpath - incremental grid pathfinding for tick-based simulations.
//!
//! An A*-based search engine over a shared obstacle grid, orchestrated by a
//! path manager that runs one bounded slice of search per simulation tick for
//! every moving entity. Searches are resumable: work is capped per tick by an
//! iteration budget and the open/closed sets persist between calls, so
//! per-tick cost stays bounded regardless of map size or entity count.

pub mod grid;
pub mod manager;
pub mod math;
pub mod pathfinder;
pub mod registry;
pub mod terrain;

pub use crate::grid::{GridCoord, ObstacleGrid};
pub use crate::manager::{PathHandle, PathManager, PathManagerConfig, PathStatus};
pub use crate::math::Vec2;
pub use crate::pathfinder::{Pathfinder, SearchOutcome, SearchResult};
pub use crate::registry::{EntityEvent, EntityId, EntityRegistry, EntityState};
pub use crate::terrain::{Terrain, TerrainError};
