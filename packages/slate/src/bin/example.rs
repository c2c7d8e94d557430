use slate::{component, World};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position(f32, f32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Velocity(f32, f32);

component!(Position, Velocity);

fn main() -> anyhow::Result<()> {
    let world = World::new();

    let moving = world.create();
    world.attach(moving, Position(0.0, 0.0))?;
    world.attach(moving, Velocity(1.0, 0.0))?;

    let resting = world.create();
    world.attach(resting, Position(5.0, 5.0))?;

    let drifting = world.create();
    world.attach(drifting, Velocity(2.0, 2.0))?;

    println!("world: {:?}", world);

    for (entity, (position, velocity)) in world.query::<(&Position, &Velocity)>()?.iter() {
        println!("{}: {:?} {:?}", entity, position, velocity);
    }

    for entity in [moving, resting, drifting] {
        for component in world.component_types(entity)? {
            println!("{} has {:?}", entity, component);
        }
    }

    Ok(())
}
