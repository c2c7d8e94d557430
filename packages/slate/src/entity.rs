//! Entity identifiers and their allocation.
//!
//! An entity is nothing but a handle: a slot index plus a generation. Slots
//! are recycled once an entity is destroyed, and every recycle bumps the
//! generation so that a handle captured before the destroy can never alias
//! the slot's new occupant.

use std::fmt::{self, Debug, Display, Formatter};

use bit_vec::BitVec;

use crate::error::{EcsError, Result};

/// The ID of a single entity.
///
/// Entity IDs are unique per `World`. They are not unique across worlds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityID {
    index: u32,
    generation: u32,
}

impl EntityID {
    /// Create a new EntityID given the slot index and generation.
    pub(crate) fn new(index: u32, generation: u32) -> EntityID {
        EntityID { index, generation }
    }

    /// Return the slot index of this entity.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Return the generation of the slot at the time this ID was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Pack this ID into a single integer, e.g. for persisting it.
    pub fn to_bits(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Rebuild an ID from `to_bits`.
    pub fn from_bits(bits: u64) -> EntityID {
        EntityID::new(bits as u32, (bits >> 32) as u32)
    }
}

impl Debug for EntityID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "EntityID({}v{})", self.index, self.generation)
    }
}

impl Display for EntityID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Allocates, recycles and tracks the liveness of entity IDs.
#[derive(Clone, Debug, Default)]
pub struct EntityRegistry {
    generations: Vec<u32>,
    alive: BitVec,
    free_list: Vec<u32>,
    len: usize,
}

impl EntityRegistry {
    /// Create a new, empty registry.
    pub fn new() -> EntityRegistry {
        EntityRegistry::default()
    }

    /// Create a new registry with room for `capacity` slots.
    pub fn with_capacity(capacity: usize) -> EntityRegistry {
        EntityRegistry {
            generations: Vec::with_capacity(capacity),
            alive: BitVec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Get the number of live entities.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no entities are live.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the number of slots ever allocated, live or not.
    pub fn capacity(&self) -> usize {
        self.generations.len()
    }

    /// Allocate a fresh or recycled entity ID.
    ///
    /// # Panics
    ///
    /// Panics if every one of the `u32::MAX` slots is live and a new one is
    /// needed.
    pub fn create(&mut self) -> EntityID {
        self.len += 1;

        if let Some(index) = self.free_list.pop() {
            self.alive.set(index as usize, true);
            return EntityID::new(index, self.generations[index as usize]);
        }

        let index = self.generations.len();
        assert!(index < u32::MAX as usize, "entity slots exhausted");
        self.generations.push(0);
        self.alive.push(true);
        EntityID::new(index as u32, 0)
    }

    /// Returns true if `id` refers to a live entity.
    pub fn is_live(&self, id: EntityID) -> bool {
        let index = id.index as usize;
        self.generations.get(index) == Some(&id.generation)
            && self.alive.get(index).unwrap_or(false)
    }

    /// Check that `id` could be destroyed right now, without destroying it.
    pub fn check_destroy(&self, id: EntityID) -> Result<()> {
        let index = id.index as usize;
        let generation = match self.generations.get(index) {
            Some(generation) => *generation,
            None => return Err(EcsError::UnknownEntity(id)),
        };
        let alive = self.alive.get(index).unwrap_or(false);

        if alive && generation == id.generation {
            Ok(())
        } else if id.generation < generation || (id.generation == generation && !alive) {
            Err(EcsError::DuplicateDestroy(id))
        } else {
            Err(EcsError::UnknownEntity(id))
        }
    }

    /// Mark `id` dead and release its slot for reuse.
    ///
    /// Destroying an ID twice is an error rather than a no-op, so that
    /// double-free bugs surface at the call site.
    pub fn destroy(&mut self, id: EntityID) -> Result<()> {
        self.check_destroy(id)?;
        self.release(id.index);
        Ok(())
    }

    /// Destroy every live entity.
    ///
    /// Generations are kept, so handles from before the clear stay stale.
    pub fn clear(&mut self) {
        let live: Vec<u32> = self.iter().map(|id| id.index).collect();
        for index in live {
            self.release(index);
        }
    }

    /// Iterate over all live entity IDs in slot order.
    pub fn iter(&self) -> impl Iterator<Item=EntityID> + '_ {
        self.alive.iter()
            .enumerate()
            .filter(|(_, alive)| *alive)
            .map(move |(index, _)| EntityID::new(index as u32, self.generations[index]))
    }

    fn release(&mut self, index: u32) {
        let slot = index as usize;
        self.alive.set(slot, false);
        self.len -= 1;

        // A slot whose generation cannot advance any further is retired
        // rather than recycled.
        let generation = self.generations[slot];
        if generation < u32::MAX {
            self.generations[slot] = generation + 1;
            self.free_list.push(index);
        }
    }
}
