use slate::{CommandBuffer, component, World};

#[derive(Debug, Clone, Copy, Default)]
pub struct MyComponent(i32);

component!(MyComponent);

fn main() -> anyhow::Result<()> {
    let world = World::new();
    let mut to_delete = Vec::new();

    for _ in 0..8 {
        let command_buffer = CommandBuffer::new();

        for id in to_delete.drain(..) {
            command_buffer.destroy(id);
        }

        for idx in 0..512 {
            let entity_id = world.create();
            command_buffer.attach(entity_id, MyComponent(32));

            if idx % 12 == 11 {
                to_delete.push(entity_id);
            }
        }

        command_buffer.apply(&world)?;
    }

    let max_generation = world.entities().iter()
        .map(|id| id.generation())
        .max()
        .unwrap_or(0);

    println!("world: {:?}", world);
    println!("highest generation: {}", max_generation);
    Ok(())
}
