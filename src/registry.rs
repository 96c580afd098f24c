//! Entity registry: live entities, their positions and footprints, and a
//! lifecycle event stream the path manager polls once per tick.

use std::collections::BTreeMap;

use crossbeam_channel::{Receiver, Sender};

use crate::math::Vec2;

/// Unique identifier for an entity in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u32);

impl EntityId {
    /// Get the underlying integer ID (useful for debugging or serialization).
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

/// Per-entity state the pathfinding subsystem consumes.
#[derive(Clone, Copy, Debug)]
pub struct EntityState {
    /// World-space position of the entity's center.
    pub position: Vec2,
    /// Rectangular footprint size, in terrain cells.
    pub size: Vec2,
}

/// Lifecycle notifications, published on spawn/despawn and drained by the
/// path manager to patch the obstacle grid incrementally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityEvent {
    Created(EntityId),
    Destroyed(EntityId),
}

/// Registry of live entities.
///
/// Iteration order is by entity id, so consumers that walk the registry per
/// tick behave identically across runs.
pub struct EntityRegistry {
    next_id: u32,
    entities: BTreeMap<EntityId, EntityState>,
    event_send: Sender<EntityEvent>,
    event_recv: Receiver<EntityEvent>,
}

impl EntityRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        let (event_send, event_recv) = crossbeam_channel::unbounded();
        Self {
            next_id: 1,
            entities: BTreeMap::new(),
            event_send,
            event_recv,
        }
    }

    /// The receiving end of the lifecycle stream. The path manager takes one
    /// of these and drains it at the start of every tick.
    pub fn event_receiver(&self) -> Receiver<EntityEvent> {
        self.event_recv.clone()
    }

    /// Spawn a new entity and return its `EntityId`.
    pub fn spawn(&mut self, position: Vec2, size: Vec2) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.entities.insert(id, EntityState { position, size });
        let _ = self.event_send.send(EntityEvent::Created(id));
        id
    }

    /// Despawn an entity. Returns `false` if it was not alive.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        if self.entities.remove(&entity).is_none() {
            return false;
        }
        let _ = self.event_send.send(EntityEvent::Destroyed(entity));
        true
    }

    /// Check if an entity is currently alive.
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    pub fn get(&self, entity: EntityId) -> Option<&EntityState> {
        self.entities.get(&entity)
    }

    /// Move an entity. Returns `false` if it was not alive.
    pub fn set_position(&mut self, entity: EntityId, position: Vec2) -> bool {
        match self.entities.get_mut(&entity) {
            Some(state) => {
                state.position = position;
                true
            }
            None => false,
        }
    }

    /// Iterate over all live entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &EntityState)> {
        self.entities.iter().map(|(&id, state)| (id, state))
    }

    /// Number of alive entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if there are no entities in the registry.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
