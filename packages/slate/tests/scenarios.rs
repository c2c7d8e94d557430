use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use slate::{CommandBuffer, component, Component, EcsError, EntityID, Schedule, SystemRegistration, World};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position(f32, f32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity(f32, f32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health(i32);

component!(Position, Velocity, Health);

#[test]
fn query_yields_only_full_matches() {
    let world = World::new();
    let e1 = world.create();
    let e2 = world.create();
    let e3 = world.create();
    world.attach(e1, Position(0.0, 0.0)).unwrap();
    world.attach(e1, Velocity(1.0, 0.0)).unwrap();
    world.attach(e2, Position(5.0, 5.0)).unwrap();
    world.attach(e3, Velocity(2.0, 2.0)).unwrap();

    let mut query = world.query::<(&Position, &Velocity)>().unwrap();
    let found: Vec<_> = query.iter()
        .map(|(id, (position, velocity))| (id, *position, *velocity))
        .collect();

    assert_eq!(found, vec![(e1, Position(0.0, 0.0), Velocity(1.0, 0.0))]);
}

#[test]
fn live_until_destroyed() {
    let world = World::new();
    let ids: Vec<_> = (0..16).map(|_| world.create()).collect();
    assert!(ids.iter().all(|id| world.is_live(*id)));

    world.destroy(ids[3]).unwrap();
    for (index, id) in ids.iter().enumerate() {
        assert_eq!(world.is_live(*id), index != 3);
    }

    assert_eq!(world.destroy(ids[3]), Err(EcsError::DuplicateDestroy(ids[3])));
}

#[test]
fn destroyed_entity_rejects_store_operations() {
    let world = World::new();
    let e = world.spawn((Position(1.0, 1.0), Health(3))).unwrap();
    world.destroy(e).unwrap();

    assert_eq!(world.get::<Position>(e).err(), Some(EcsError::DeadEntity(e)));
    assert_eq!(world.attach(e, Health(1)), Err(EcsError::DeadEntity(e)));
    assert_eq!(world.detach::<Health>(e), Err(EcsError::DeadEntity(e)));
    assert_eq!(world.store::<Position>().unwrap().unwrap().len(), 0);
    assert_eq!(world.store::<Health>().unwrap().unwrap().len(), 0);
}

#[test]
fn attach_then_get_and_detach_absent() {
    let world = World::new();
    let e = world.create();
    world.attach(e, Health(42)).unwrap();
    assert_eq!(*world.get::<Health>(e).unwrap().unwrap(), Health(42));

    assert_eq!(world.detach::<Velocity>(e), Ok(None));
    world.attach(e, Velocity(0.0, 0.0)).unwrap();
    let other = world.create();
    assert_eq!(world.detach::<Velocity>(other), Ok(None));
}

#[test]
fn recycled_slot_gets_new_generation() {
    let world = World::new();
    let stale = world.create();
    world.attach(stale, Health(1)).unwrap();
    world.destroy(stale).unwrap();

    let fresh = world.create();
    assert_eq!(fresh.index(), stale.index());
    assert_ne!(fresh, stale);
    assert!(!world.is_live(stale));
    assert!(world.is_live(fresh));
    assert!(!world.has::<Health>(fresh).unwrap());
    assert_eq!(world.attach(stale, Health(2)), Err(EcsError::DeadEntity(stale)));
}

#[test]
fn systems_run_in_priority_order_every_frame() {
    let world = World::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut schedule = Schedule::new();

    for (name, priority) in [("b", 2), ("a", 1)] {
        let log = log.clone();
        schedule.insert(SystemRegistration::from_fn(move |_: &World, _| {
            log.lock().unwrap().push(format!("{} start", name));
            log.lock().unwrap().push(format!("{} end", name));
            Ok(())
        }).priority(priority)).unwrap();
    }

    for _ in 0..5 {
        schedule.run_frame(&world, 1.0).unwrap();
        let steps = std::mem::take(&mut *log.lock().unwrap());
        assert_eq!(steps, vec!["a start", "a end", "b start", "b end"]);
    }
    assert_eq!(schedule.frame(), 5);
}

#[test]
fn attach_inside_system_query_fails() {
    let world = World::new();
    world.spawn((Position(0.0, 0.0), Velocity(1.0, 1.0))).unwrap();

    let mut schedule = Schedule::new();
    schedule.insert(SystemRegistration::from_fn(|world: &World, _| {
        for (id, (_, _)) in world.query::<(&mut Position, &Velocity)>()?.iter() {
            world.attach(id, Position(9.0, 9.0))?;
        }
        Ok(())
    }).named("bad_mover")).unwrap();

    let err = schedule.run_frame(&world, 1.0).unwrap_err();
    assert_eq!(err.system(), "bad_mover");
    assert_eq!(
        err.cause().downcast_ref::<EcsError>(),
        Some(&EcsError::InvalidIterationMutation { component: Position::component_type() }));
    assert_eq!(schedule.frame(), 0);
}

#[test]
fn deferred_changes_apply_after_query() {
    let world = World::new();
    for i in 0..10 {
        world.spawn((Health(i),)).unwrap();
    }

    let mut schedule = Schedule::new();
    schedule.insert(SystemRegistration::from_fn(|world: &World, _| {
        let commands = CommandBuffer::new();
        for (id, health) in world.query::<&mut Health>()?.iter() {
            health.0 -= 5;
            if health.0 < 0 {
                commands.destroy(id);
            }
        }
        commands.apply(world)?;
        Ok(())
    })).unwrap();

    schedule.run_frame(&world, 1.0).unwrap();
    assert_eq!(world.len(), 5);

    let mut query = world.query::<&Health>().unwrap();
    let mut remaining: Vec<_> = query.iter().map(|(_, health)| health.0).collect();
    remaining.sort_unstable();
    assert_eq!(remaining, vec![0, 1, 2, 3, 4]);
}

#[test]
fn query_matches_intersection_after_churn() {
    let mut rng = StdRng::seed_from_u64(7);
    let world = World::new();
    let mut live: Vec<EntityID> = Vec::new();

    for _ in 0..2_000 {
        match rng.gen_range(0..5) {
            0 if !live.is_empty() => {
                let id = live.swap_remove(rng.gen_range(0..live.len()));
                world.destroy(id).unwrap();
            }
            1 if !live.is_empty() => {
                let id = live[rng.gen_range(0..live.len())];
                world.detach::<Velocity>(id).unwrap();
            }
            _ => {
                let id = world.create();
                if rng.gen_bool(0.6) {
                    world.attach(id, Position(0.0, 0.0)).unwrap();
                }
                if rng.gen_bool(0.4) {
                    world.attach(id, Velocity(0.0, 0.0)).unwrap();
                }
                live.push(id);
            }
        }
    }

    let expected: BTreeSet<_> = live.iter()
        .copied()
        .filter(|id| world.has::<Position>(*id).unwrap() && world.has::<Velocity>(*id).unwrap())
        .collect();

    let mut query = world.query::<(&Position, &Velocity)>().unwrap();
    let found: Vec<_> = query.iter().map(|(id, _)| id).collect();
    let unique: BTreeSet<_> = found.iter().copied().collect();

    assert_eq!(found.len(), unique.len());
    assert_eq!(unique, expected);
}

#[test]
fn later_system_sees_earlier_structural_changes() {
    let world = World::new();
    let a = world.spawn((Position(0.0, 0.0), Velocity(1.0, 0.0))).unwrap();
    let b = world.spawn((Position(1.0, 0.0), Velocity(1.0, 0.0))).unwrap();
    let c = world.spawn((Position(2.0, 0.0),)).unwrap();
    let d = world.spawn((Velocity(3.0, 0.0),)).unwrap();
    let e = world.spawn((Position(4.0, 0.0), Velocity(1.0, 0.0))).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut schedule = Schedule::new();
    let reshape = schedule.insert(SystemRegistration::from_fn(move |world: &World, _| {
        world.detach::<Velocity>(a)?;
        world.attach(c, Velocity(2.0, 0.0))?;
        world.attach(d, Position(3.0, 0.0))?;
        world.destroy(e)?;
        // Detach then attach within the same frame leaves b matching once.
        world.detach::<Position>(b)?;
        world.attach(b, Position(1.5, 0.0))?;
        Ok(())
    }).named("reshape")).unwrap();

    let observed = seen.clone();
    schedule.insert(SystemRegistration::from_fn(move |world: &World, _| {
        let mut query = world.query::<(&Position, &Velocity)>()?;
        observed.lock().unwrap().extend(query.iter().map(|(id, (position, _))| (id, position.0)));
        Ok(())
    }).named("observe").after(reshape)).unwrap();

    schedule.run_frame(&world, 1.0).unwrap();

    let found = std::mem::take(&mut *seen.lock().unwrap());
    let unique: BTreeSet<_> = found.iter().map(|(id, _)| *id).collect();
    assert_eq!(found.len(), unique.len());
    assert_eq!(unique, [b, c, d].into_iter().collect::<BTreeSet<_>>());

    let mut positions: Vec<_> = found.into_iter().collect();
    positions.sort_by_key(|(id, _)| *id);
    let mut expected = vec![(b, 1.5), (c, 2.0), (d, 3.0)];
    expected.sort_by_key(|(id, _)| *id);
    assert_eq!(positions, expected);
    assert!(!world.is_live(e));
}
