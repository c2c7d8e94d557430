//! Sparse-set storage for a single component type.
//!
//! Values live in a dense array, paired index-for-index with the IDs of the
//! entities that own them. A sparse array maps an entity's slot index to its
//! position in the dense arrays. This gives O(1) attach, detach and lookup,
//! and iteration walks contiguous memory.

use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::ptr;

use rayon::iter::{
    IndexedParallelIterator,
    IntoParallelRefIterator,
    IntoParallelRefMutIterator,
    ParallelIterator,
};

use crate::entity::EntityID;

const EMPTY: u32 = u32::MAX;

/// The outcome of attaching a component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attached<T> {
    /// The entity did not have a component of this type before.
    Inserted,
    /// The entity's previous component, which has been overwritten.
    Replaced(T),
}

impl<T> Attached<T> {
    /// Returns true if an existing component was overwritten.
    pub fn is_replaced(&self) -> bool {
        matches!(self, Attached::Replaced(_))
    }

    /// Return the overwritten component, if there was one.
    pub fn into_replaced(self) -> Option<T> {
        match self {
            Attached::Inserted => None,
            Attached::Replaced(old) => Some(old),
        }
    }
}

/// A store mapping entities to components of type `T`.
///
/// The set knows nothing about entity liveness: the `World` checks that
/// before touching it, and drops an entity's entries when it is destroyed.
#[derive(Clone)]
pub struct SparseSet<T> {
    sparse: Vec<u32>,
    entities: Vec<EntityID>,
    values: Vec<T>,
}

impl<T> SparseSet<T> {
    /// Create a new, empty set.
    pub fn new() -> SparseSet<T> {
        SparseSet {
            sparse: Vec::new(),
            entities: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Create a new set with room for `capacity` components.
    pub fn with_capacity(capacity: usize) -> SparseSet<T> {
        SparseSet {
            sparse: Vec::new(),
            entities: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Get the number of components in the set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the set holds no components.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get the dense position of an entity's component.
    fn position(&self, entity: EntityID) -> Option<usize> {
        let slot = *self.sparse.get(entity.index() as usize)?;
        if slot == EMPTY {
            return None;
        }

        let position = slot as usize;
        if self.entities[position] == entity {
            Some(position)
        } else {
            None
        }
    }

    /// Returns true if the entity has a component in this set.
    pub fn contains(&self, entity: EntityID) -> bool {
        self.position(entity).is_some()
    }

    /// Attach a component to an entity, overwriting any existing one.
    pub fn attach(&mut self, entity: EntityID, value: T) -> Attached<T> {
        if let Some(position) = self.position(entity) {
            return Attached::Replaced(mem::replace(&mut self.values[position], value));
        }

        let index = entity.index() as usize;
        if self.sparse.len() <= index {
            self.sparse.resize(index + 1, EMPTY);
        }

        // The slot may still point at an earlier occupant of the same index.
        let stale = self.sparse[index];
        if stale != EMPTY {
            self.remove_at(stale as usize);
        }

        self.sparse[index] = self.values.len() as u32;
        self.entities.push(entity);
        self.values.push(value);
        Attached::Inserted
    }

    /// Remove and return an entity's component, if it has one.
    pub fn detach(&mut self, entity: EntityID) -> Option<T> {
        self.position(entity).map(|position| self.remove_at(position))
    }

    fn remove_at(&mut self, position: usize) -> T {
        let entity = self.entities.swap_remove(position);
        let value = self.values.swap_remove(position);
        self.sparse[entity.index() as usize] = EMPTY;

        if let Some(moved) = self.entities.get(position) {
            self.sparse[moved.index() as usize] = position as u32;
        }

        value
    }

    /// Get a reference to an entity's component.
    pub fn get(&self, entity: EntityID) -> Option<&T> {
        self.position(entity).map(|position| &self.values[position])
    }

    /// Get a mutable reference to an entity's component.
    pub fn get_mut(&mut self, entity: EntityID) -> Option<&mut T> {
        self.position(entity).map(move |position| &mut self.values[position])
    }

    /// Find an entity's dense position through a raw pointer to the set.
    ///
    /// Only the sparse and entity arrays are read, so this may run while
    /// references into the values array are live.
    ///
    /// # Safety
    /// `this` must be valid, and nothing may change the set's structure
    /// during the call.
    unsafe fn position_raw(this: *const SparseSet<T>, entity: EntityID) -> Option<usize> {
        let sparse = &*ptr::addr_of!((*this).sparse);
        let entities = &*ptr::addr_of!((*this).entities);

        let slot = *sparse.get(entity.index() as usize)?;
        if slot != EMPTY && entities.get(slot as usize) == Some(&entity) {
            Some(slot as usize)
        } else {
            None
        }
    }

    /// Returns true if the entity has a component, without touching the
    /// values array.
    ///
    /// # Safety
    /// As for `position_raw`.
    pub(crate) unsafe fn contains_raw(this: *const SparseSet<T>, entity: EntityID) -> bool {
        SparseSet::position_raw(this, entity).is_some()
    }

    /// Get a mutable reference to an entity's component through a raw
    /// pointer to the set.
    ///
    /// # Safety
    /// `this` must be valid for the whole of `'a`, nothing may change the
    /// set's structure during `'a`, and no other reference to the same
    /// component may exist during `'a`.
    pub(crate) unsafe fn get_mut_raw<'a>(this: *mut SparseSet<T>, entity: EntityID) -> Option<&'a mut T> {
        let position = SparseSet::position_raw(this, entity)?;
        let values = (*ptr::addr_of_mut!((*this).values)).as_mut_ptr();
        Some(&mut *values.add(position))
    }

    /// Split the set into its entity array and its values array through a
    /// raw pointer.
    ///
    /// # Safety
    /// `this` must be valid for the whole of `'a`, nothing may change the
    /// set's structure during `'a`, and no other reference into the values
    /// array may exist during `'a`.
    pub(crate) unsafe fn split_raw<'a>(this: *mut SparseSet<T>) -> (&'a [EntityID], &'a mut [T]) {
        let entities = &*ptr::addr_of!((*this).entities);
        let values = &mut *ptr::addr_of_mut!((*this).values);
        (entities.as_slice(), values.as_mut_slice())
    }

    /// Get the IDs of all entities in the set, in dense order.
    pub fn entities(&self) -> &[EntityID] {
        &self.entities
    }

    /// Get all components in the set, in dense order.
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Get all components in the set mutably, in dense order.
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Iterate over every `(entity, component)` pair.
    ///
    /// Order is unspecified but stable for as long as the set is not
    /// structurally modified.
    pub fn iter(&self) -> impl Iterator<Item=(EntityID, &T)> + '_ {
        self.entities.iter().copied().zip(self.values.iter())
    }

    /// Iterate mutably over every `(entity, component)` pair.
    pub fn iter_mut(&mut self) -> impl Iterator<Item=(EntityID, &mut T)> + '_ {
        self.entities.iter().copied().zip(self.values.iter_mut())
    }

    /// Remove every component.
    pub fn clear(&mut self) {
        self.sparse.clear();
        self.entities.clear();
        self.values.clear();
    }
}

impl<T: Sync> SparseSet<T> {
    /// Iterate over every `(entity, component)` pair in parallel.
    pub fn par_iter(&self) -> impl IndexedParallelIterator<Item=(EntityID, &T)> + '_ {
        self.entities.par_iter().copied().zip(self.values.par_iter())
    }
}

impl<T: Send> SparseSet<T> {
    /// Iterate mutably over every `(entity, component)` pair in parallel.
    pub fn par_iter_mut(&mut self) -> impl IndexedParallelIterator<Item=(EntityID, &mut T)> + '_ {
        self.entities.par_iter().copied().zip(self.values.par_iter_mut())
    }
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        SparseSet::new()
    }
}

impl<T: Debug> Debug for SparseSet<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn id(index: u32) -> EntityID {
        EntityID::new(index, 0)
    }

    #[test]
    fn test_attach_get() {
        let mut set = SparseSet::new();
        assert_eq!(set.attach(id(3), "three"), Attached::Inserted);
        assert_eq!(set.attach(id(1), "one"), Attached::Inserted);

        assert_eq!(set.get(id(3)), Some(&"three"));
        assert_eq!(set.get(id(1)), Some(&"one"));
        assert_eq!(set.get(id(2)), None);
        assert_eq!(set.get(id(100)), None);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_replace() {
        let mut set = SparseSet::new();
        set.attach(id(0), 1);
        let result = set.attach(id(0), 2);

        assert!(result.is_replaced());
        assert_eq!(result.into_replaced(), Some(1));
        assert_eq!(set.get(id(0)), Some(&2));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_detach_keeps_others() {
        let mut set = SparseSet::new();
        for i in 0..5 {
            set.attach(id(i), i * 10);
        }

        assert_eq!(set.detach(id(1)), Some(10));
        assert_eq!(set.detach(id(1)), None);
        assert_eq!(set.len(), 4);

        for i in [0, 2, 3, 4] {
            assert_eq!(set.get(id(i)), Some(&(i * 10)));
        }

        // The last element was moved into the hole; its index must follow.
        assert_eq!(set.detach(id(4)), Some(40));
        assert_eq!(set.detach(id(0)), Some(0));
        assert_eq!(set.get(id(2)), Some(&20));
        assert_eq!(set.get(id(3)), Some(&30));
    }

    #[test]
    fn test_stale_generation() {
        let mut set = SparseSet::new();
        let old = EntityID::new(4, 0);
        let new = EntityID::new(4, 1);
        set.attach(old, 'a');

        assert_eq!(set.get(new), None);
        assert_eq!(set.detach(new), None);

        assert_eq!(set.attach(new, 'b'), Attached::Inserted);
        assert_eq!(set.get(old), None);
        assert_eq!(set.get(new), Some(&'b'));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_iter_is_restartable() {
        let mut set = SparseSet::new();
        for i in 0..4 {
            set.attach(id(i), i);
        }

        let first: Vec<_> = set.iter().map(|(e, v)| (e, *v)).collect();
        let second: Vec<_> = set.iter().map(|(e, v)| (e, *v)).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);

        for (_, v) in set.iter_mut() {
            *v += 1;
        }
        assert_eq!(set.values().iter().sum::<u32>(), 10);
    }

    #[test]
    fn test_par_iter_mut() {
        let mut set = SparseSet::new();
        for i in 0..1000 {
            set.attach(id(i), i as u64);
        }

        set.par_iter_mut().for_each(|(e, v)| *v += u64::from(e.index()));
        let total: u64 = set.par_iter().map(|(_, v)| *v).sum();
        assert_eq!(total, 2 * (0..1000u64).sum::<u64>());
    }

    #[test]
    fn test_raw_membership() {
        let mut set = SparseSet::new();
        set.attach(id(3), 'c');
        set.attach(EntityID::new(4, 1), 'd');

        let ptr: *mut SparseSet<char> = &mut set;
        unsafe {
            assert!(SparseSet::contains_raw(ptr, id(3)));
            assert!(!SparseSet::contains_raw(ptr, EntityID::new(3, 1)));
            assert!(!SparseSet::contains_raw(ptr, EntityID::new(4, 0)));
            assert!(!SparseSet::contains_raw(ptr, id(900)));
            *SparseSet::get_mut_raw(ptr, EntityID::new(4, 1)).unwrap() = 'e';
        }
        assert_eq!(set.get(EntityID::new(4, 1)), Some(&'e'));
    }
}
