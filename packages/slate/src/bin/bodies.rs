use std::collections::HashMap;
use std::io::Write;

use anyhow::Context;
use rayon::iter::ParallelIterator;

use slate::{CommandBuffer, component, EntityID, Schedule, System, SystemRegistration, World};

const G: f32 = 10.0;
const TIME_STEP: f32 = 1.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct Position(f32, f32);

#[derive(Debug, Clone, Copy, Default)]
pub struct Velocity(f32, f32);

#[derive(Debug, Clone, Copy, Default)]
pub struct Mass(f32);

component!(Position, Velocity, Mass);

struct ApplyAcceleration;

impl System for ApplyAcceleration {
    fn run(&mut self, world: &World, dt: f32) -> anyhow::Result<()> {
        let bodies: Vec<(EntityID, Position, f32)> = world.query::<(&Position, &Mass)>()?
            .iter()
            .map(|(id, (position, mass))| (id, *position, mass.0))
            .collect();

        let positions = world.store::<Position>()?.context("no positions")?;
        let masses = world.store::<Mass>()?.context("no masses")?;
        let mut velocities = world.store_mut::<Velocity>()?.context("no velocities")?;
        let collisions = CommandBuffer::new();

        velocities.par_iter_mut().for_each(|(id_a, velocity)| {
            let (Some(&Position(x_a, y_a)), Some(&Mass(m_a))) = (positions.get(id_a), masses.get(id_a)) else {
                return;
            };

            if m_a <= 0.0 {
                return;
            }

            let Velocity(vx_a, vy_a) = velocity;
            *vx_a = 0f32;
            *vy_a = 0f32;

            for &(id_b, Position(x_b, y_b), m_b) in bodies.iter() {
                if id_b == id_a || m_b < 0.00001 {
                    continue;
                }

                let dx = x_b - x_a;
                let dy = y_b - y_a;
                let r2 = dx * dx + dy * dy;

                // Bodies are overlapped!
                if r2 < 0.0005 {
                    collisions.attach(id_a, Mass(0.0));
                    continue;
                }

                let a = (G * m_b) / r2;
                let r = r2.sqrt();
                *vx_a += dt * ((dx * a) / r);
                *vy_a += dt * ((dy * a) / r);
            }
        });

        drop((positions, masses, velocities));
        collisions.apply(world)?;
        Ok(())
    }
}

struct ApplyVelocity;

impl System for ApplyVelocity {
    fn run(&mut self, world: &World, dt: f32) -> anyhow::Result<()> {
        for (_, (Position(x, y), Velocity(vx, vy))) in world.query::<(&mut Position, &Velocity)>()?.iter() {
            *x += dt * vx;
            *y += dt * vy;
        }

        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let world = World::new();

    // Populate world!
    {
        const SQRT_NUM_ENTITIES: usize = 2;
        const SCALE: f32 = 2.0 / ((SQRT_NUM_ENTITIES - 1) as f32);

        for x in 0..SQRT_NUM_ENTITIES {
            for y in 0..SQRT_NUM_ENTITIES {
                let x = ((x as f32) * SCALE) - 1.0;
                let y = ((y as f32) * SCALE) - 1.0;

                let vx = y * 0.003;
                let vy = -x * 0.003;

                world.spawn((Mass(0.00001), Position(x, y), Velocity(vx, vy)))?;
            }
        }
    }

    let mut systems = Schedule::new();

    let accel_sys = systems.insert(
        SystemRegistration::from_system(ApplyAcceleration)
            .named("apply_acceleration")
            .reads::<Position>()
            .reads::<Mass>()
            .writes::<Velocity>())?;
    systems.insert(
        SystemRegistration::from_system(ApplyVelocity)
            .named("apply_velocity")
            .reads::<Velocity>()
            .writes::<Position>()
            .after(accel_sys))?;

    const SIZE: (i32, i32) = (500, 500);
    const OFFSET: (f32, f32) = (250.0, 250.0);
    const SCALE: (f32, f32) = (200.0, 200.0);
    const NUM_ITER: usize = 100;

    let mut dest = std::io::stdout();
    let mut last_positions = HashMap::new();

    writeln!(&mut dest, "<?xml version=\"1.0\" standalone=\"no\"?>")?;
    writeln!(&mut dest, "<!DOCTYPE svg PUBLIC \"-//W3C//DTD SVG 1.0//EN\" \"http://www.w3.org/TR/2001/REC-SVG-20010904/DTD/svg10.dtd\">")?;
    write!(&mut dest, "<svg xmlns=\"http://www.w3.org/2000/svg\" height=\"{}\" width=\"{}\">", SIZE.0, SIZE.1)?;
    write!(&mut dest, "<rect width=\"100%\" height=\"100%\" fill=\"black\"/>")?;

    for _ in 0..NUM_ITER {
        for _ in 0..10usize {
            systems.run_frame(&world, TIME_STEP)?;
        }

        // Render result!
        for (id, (&Position(x, y), &Velocity(vx, vy))) in world.query::<(&Position, &Velocity)>()?.iter() {
            let v2 = (vx * vx + vy * vy).sqrt();
            let a = 1.0 - (v2 / 0.03).max(0.0).min(0.7);

            if let Some((lx, ly)) = last_positions.get(&id) {
                let x1 = lx * SCALE.0 + OFFSET.0;
                let y1 = ly * SCALE.1 + OFFSET.1;
                let x2 = x * SCALE.0 + OFFSET.0;
                let y2 = y * SCALE.1 + OFFSET.1;

                write!(&mut dest,
                       "<line x1=\"{}\" y1=\"{}\" x2=\"{}\" y2=\"{}\" style=\"stroke:rgba(255,0,0,{});stroke-width:1\" />",
                       x1, y1, x2, y2, a)?;
            }

            last_positions.insert(id, (x, y));
        }
    }

    write!(&mut dest, "</svg>")?;
    Ok(())
}
