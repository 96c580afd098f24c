//! End-to-end scenarios exercising the public pathfinding surface.

use anyhow::Result;
use gridpath::{
    EntityRegistry, PathManager, PathManagerConfig, PathStatus, Pathfinder, SearchOutcome,
    Terrain, Vec2,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn open_ten_by_ten_corner_to_corner() {
    init_logging();
    let terrain = Terrain::flat(10, 10);
    let mut pathfinder = Pathfinder::new(10, 10);
    pathfinder.update(vec![false; 100], 1);

    let result = pathfinder.find_path(
        &terrain,
        Vec2::new(0.0, 0.0),
        Vec2::new(9.0, 9.0),
        Vec2::ONE,
        10_000,
    );

    assert_eq!(result.outcome, SearchOutcome::Found);
    assert!(result.waypoints.len() >= 10);
    assert_eq!(*result.waypoints.last().unwrap(), Vec2::new(9.0, 9.0));
}

#[test]
fn two_identical_simulations_stay_in_lockstep() {
    init_logging();

    let run = || {
        let mut registry = EntityRegistry::new();
        let config = PathManagerConfig::default()
            .with_iters_per_frame(20)
            .with_repath_cooldown_ticks(0);
        let mut manager = PathManager::with_config(Terrain::flat(40, 40), &registry, config);

        let blocker = registry.spawn(Vec2::new(20.0, 20.0), Vec2::new(6.0, 6.0));
        let a = registry.spawn(Vec2::new(5.0, 5.0), Vec2::ONE);
        let b = registry.spawn(Vec2::new(35.0, 5.0), Vec2::ONE);

        manager.start_pathing(&registry, a, Vec2::new(35.0, 35.0));
        manager.start_pathing(&registry, b, Vec2::new(5.0, 35.0));

        let mut trace = Vec::new();
        for tick in 0..120 {
            if tick == 60 {
                registry.despawn(blocker);
            }
            manager.update(&mut registry);
            trace.push((
                registry.get(a).map(|s| s.position),
                registry.get(b).map(|s| s.position),
            ));
        }
        trace
    };

    assert_eq!(run(), run());
}

#[test]
fn repathing_never_duplicates_requests() {
    init_logging();
    let mut registry = EntityRegistry::new();
    let mut manager = PathManager::new(Terrain::flat(30, 30), &registry);
    let entity = registry.spawn(Vec2::new(5.0, 5.0), Vec2::ONE);

    let first = manager.start_pathing(&registry, entity, Vec2::new(25.0, 25.0));
    let second = manager.start_pathing(&registry, entity, Vec2::new(25.0, 5.0));
    let third = manager.start_pathing(&registry, entity, Vec2::new(5.0, 25.0));

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(manager.path_count(), 1);

    manager.update(&mut registry);
    assert_eq!(manager.path_count(), 1);
}

#[test]
fn refcounted_teardown_takes_all_holders() -> Result<()> {
    init_logging();
    let mut registry = EntityRegistry::new();
    let config = PathManagerConfig::default().with_default_refcount(3);
    let mut manager = PathManager::with_config(Terrain::flat(20, 20), &registry, config);
    let entity = registry.spawn(Vec2::new(2.0, 2.0), Vec2::ONE);

    let handle = manager.start_pathing(&registry, entity, Vec2::new(15.0, 15.0));
    manager.update(&mut registry);

    for _ in 0..2 {
        manager.remove_pathing(handle);
        manager.update(&mut registry);
        // Intermediate drops leave the request fully queryable.
        assert_ne!(manager.get_path_status(handle), PathStatus::Invalid);
    }

    manager.remove_pathing(handle);
    manager.update(&mut registry);
    assert_eq!(manager.get_path_status(handle), PathStatus::Invalid);
    assert_eq!(manager.path_count(), 0);
    Ok(())
}

#[test]
fn freed_ground_is_usable_immediately_after_despawn() {
    init_logging();
    let mut registry = EntityRegistry::new();
    let config = PathManagerConfig::default().with_repath_cooldown_ticks(0);
    let mut manager = PathManager::with_config(Terrain::flat(20, 20), &registry, config);

    // A building fills the only corridor.
    let building = registry.spawn(Vec2::new(10.0, 10.0), Vec2::new(20.0, 2.0));
    let walker = registry.spawn(Vec2::new(10.0, 4.0), Vec2::ONE);

    let handle = manager.start_pathing(&registry, walker, Vec2::new(10.0, 16.0));
    for _ in 0..10 {
        manager.update(&mut registry);
    }
    assert_eq!(manager.get_path_status(handle), PathStatus::Unreachable);

    // Destroy the building and repath in the same tick the manager next
    // runs: the grid reconciles before any search work.
    registry.despawn(building);
    manager.start_pathing(&registry, walker, Vec2::new(10.0, 16.0));
    for _ in 0..40 {
        manager.update(&mut registry);
    }

    assert_eq!(manager.get_path_status(handle), PathStatus::Completed);
    assert_eq!(
        registry.get(walker).unwrap().position,
        Vec2::new(10.0, 16.0)
    );
}

#[test]
fn statuses_follow_the_request_lifecycle() {
    init_logging();
    let mut registry = EntityRegistry::new();
    let config = PathManagerConfig::default().with_repath_cooldown_ticks(0);
    let mut manager = PathManager::with_config(Terrain::flat(30, 30), &registry, config);
    let entity = registry.spawn(Vec2::new(5.0, 5.0), Vec2::ONE);

    assert_eq!(manager.entity_path_status(entity), PathStatus::Invalid);

    let handle = manager.start_pathing(&registry, entity, Vec2::new(12.0, 5.0));
    assert_eq!(manager.get_path_status(handle), PathStatus::NotStarted);
    assert_eq!(manager.entity_path_status(entity), PathStatus::NotStarted);

    manager.update(&mut registry);
    assert_eq!(manager.entity_path_status(entity), PathStatus::InProgress);

    for _ in 0..10 {
        manager.update(&mut registry);
    }
    assert_eq!(manager.entity_path_status(entity), PathStatus::Completed);
}
