use std::fmt::{self, Debug};

use crossbeam_queue::SegQueue;

use crate::component::Component;
use crate::entity::EntityID;
use crate::error::Result;
use crate::world::{Bundle, World};

type Deferred = Box<dyn FnOnce(&World) -> Result<()> + Send + 'static>;

enum Command {
    Destroy(EntityID),
    Apply(&'static str, Deferred),
}

impl Command {
    fn run(self, world: &World) -> Result<()> {
        match self {
            Command::Destroy(id) => world.destroy(id),
            Command::Apply(_, f) => f(world),
        }
    }
}

impl Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Destroy(id) => write!(f, "Destroy({:?})", id),
            Command::Apply(what, _) => write!(f, "{}", what),
        }
    }
}

/// A queue of structural changes to apply to a world later.
///
/// Structural changes to a store fail while that store is being iterated.
/// Systems which want to add, remove or destroy while walking a query record
/// the changes here instead and apply them once the query is dropped.
///
/// Recording only needs a shared reference, so one buffer can be filled from
/// several threads at once. Commands are applied in the order they were
/// recorded.
#[derive(Default)]
pub struct CommandBuffer {
    commands: SegQueue<Command>,
}

impl CommandBuffer {
    /// Create a new, empty, command buffer.
    pub fn new() -> CommandBuffer {
        CommandBuffer {
            commands: SegQueue::new(),
        }
    }

    /// Get the number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if there are no queued commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Queue attaching a component to an entity.
    pub fn attach<T: Component>(&self, entity: EntityID, value: T) {
        self.commands.push(Command::Apply("Attach", Box::new(move |world: &World| {
            world.attach(entity, value).map(|_| ())
        })));
    }

    /// Queue detaching a component from an entity.
    pub fn detach<T: Component>(&self, entity: EntityID) {
        self.commands.push(Command::Apply("Detach", Box::new(move |world: &World| {
            world.detach::<T>(entity).map(|_| ())
        })));
    }

    /// Queue destroying an entity.
    pub fn destroy(&self, entity: EntityID) {
        self.commands.push(Command::Destroy(entity));
    }

    /// Queue spawning a new entity with the given components.
    pub fn spawn<B: Bundle>(&self, bundle: B) {
        self.commands.push(Command::Apply("Spawn", Box::new(move |world: &World| {
            world.spawn(bundle).map(|_| ())
        })));
    }

    /// Move every command out of `other` onto the end of this buffer.
    pub fn append(&self, other: &CommandBuffer) {
        while let Some(command) = other.commands.pop() {
            self.commands.push(command);
        }
    }

    /// Discard every queued command.
    pub fn clear(&self) {
        while self.commands.pop().is_some() {}
    }

    /// Apply the queued commands to a world, in order.
    ///
    /// Stops at the first command which fails and returns its error. That
    /// command is dropped; the ones after it stay queued.
    pub fn apply(&self, world: &World) -> Result<()> {
        let mut applied = 0;
        while let Some(command) = self.commands.pop() {
            log::trace!("applying {:?}", command);
            if let Err(err) = command.run(world) {
                log::debug!("command buffer stopped after {} commands: {}", applied, err);
                return Err(err);
            }
            applied += 1;
        }

        Ok(())
    }
}

impl Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("len", &self.commands.len())
            .finish()
    }
}
