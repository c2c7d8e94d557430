//! Component stores shared out of a `World` with run-time borrow tracking.
//!
//! Each store sits in a `StoreCell` alongside a borrow flag. Guards
//! (`StoreRef`, `StoreMut`, `ComponentRef`, `ComponentMut`) hold the flag
//! for as long as they live. Structural changes need the store exclusively,
//! so attaching to or detaching from a store that a query is walking fails
//! with `InvalidIterationMutation` instead of invalidating the walk.

use std::any::Any;
use std::cell::UnsafeCell;
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering};

use rayon::iter::{
    IndexedParallelIterator,
    IntoParallelRefIterator,
    IntoParallelRefMutIterator,
    ParallelIterator,
};

use crate::component::{Component, ComponentTypeID};
use crate::entity::EntityID;
use crate::error::{EcsError, Result};
use crate::sparse_set::SparseSet;

const EXCLUSIVE: isize = -1;

/// Counts shared borrows, or marks a single exclusive one.
struct BorrowFlag(AtomicIsize);

impl BorrowFlag {
    fn new() -> BorrowFlag {
        BorrowFlag(AtomicIsize::new(0))
    }

    fn try_shared(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current < 0 {
                return false;
            }

            match self.0.compare_exchange_weak(
                current, current + 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn try_exclusive(&self) -> bool {
        self.0.compare_exchange(0, EXCLUSIVE, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn release_shared(&self) {
        self.0.fetch_sub(1, Ordering::Release);
    }

    fn release_exclusive(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// A component store and its borrow flag.
pub(crate) struct StoreCell<T> {
    component: ComponentTypeID,
    flag: BorrowFlag,
    set: UnsafeCell<SparseSet<T>>,
}

// Access to `set` is only ever granted through the borrow flag.
unsafe impl<T: Component> Sync for StoreCell<T> {}

impl<T: Component> StoreCell<T> {
    pub fn new(capacity: usize) -> StoreCell<T> {
        StoreCell {
            component: T::component_type(),
            flag: BorrowFlag::new(),
            set: UnsafeCell::new(SparseSet::with_capacity(capacity)),
        }
    }

    /// Borrow the store for reading.
    pub fn borrow<'w>(self: &Arc<Self>) -> Result<StoreRef<'w, T>> {
        if self.flag.try_shared() {
            Ok(StoreRef { cell: self.clone(), _world: PhantomData })
        } else {
            Err(EcsError::BorrowConflict { component: self.component })
        }
    }

    /// Borrow the store for writing component values in place.
    pub fn borrow_mut<'w>(self: &Arc<Self>) -> Result<StoreMut<'w, T>> {
        if self.flag.try_exclusive() {
            Ok(StoreMut { cell: self.clone(), _world: PhantomData })
        } else {
            Err(EcsError::BorrowConflict { component: self.component })
        }
    }

    /// Borrow the store for a structural change (attach or detach).
    pub fn borrow_structural<'w>(self: &Arc<Self>) -> Result<StoreMut<'w, T>> {
        self.borrow_mut().map_err(|_| EcsError::InvalidIterationMutation {
            component: self.component,
        })
    }
}

/// Type-erased operations the `World` needs on every store.
pub(crate) trait ErasedStore: Send + Sync {
    fn component(&self) -> ComponentTypeID;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn lock(&self, exclusive: bool) -> Option<StoreLock<'_>>;

    fn release(&self, exclusive: bool);

    /// Returns true if the store has a component for `entity`.
    ///
    /// This reads only the store's membership arrays, which change solely
    /// under a structural borrow. Structural borrows never outlive a single
    /// `World` call, so this is answerable even while the values are
    /// borrowed exclusively.
    fn holds(&self, entity: EntityID) -> bool;

    /// # Safety
    /// The caller must hold an exclusive lock on this store.
    unsafe fn remove_unlocked(&self, entity: EntityID) -> bool;

    /// # Safety
    /// The caller must hold an exclusive lock on this store.
    unsafe fn clear_unlocked(&self);
}

impl<T: Component> ErasedStore for StoreCell<T> {
    fn component(&self) -> ComponentTypeID {
        self.component
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn lock(&self, exclusive: bool) -> Option<StoreLock<'_>> {
        let locked = if exclusive {
            self.flag.try_exclusive()
        } else {
            self.flag.try_shared()
        };

        if locked {
            Some(StoreLock { store: self, exclusive })
        } else {
            None
        }
    }

    fn holds(&self, entity: EntityID) -> bool {
        unsafe { SparseSet::contains_raw(self.set.get(), entity) }
    }

    unsafe fn remove_unlocked(&self, entity: EntityID) -> bool {
        (*self.set.get()).detach(entity).is_some()
    }

    unsafe fn clear_unlocked(&self) {
        (*self.set.get()).clear()
    }

    fn release(&self, exclusive: bool) {
        if exclusive {
            self.flag.release_exclusive();
        } else {
            self.flag.release_shared();
        }
    }
}

/// A lock on a type-erased store.
pub(crate) struct StoreLock<'a> {
    store: &'a dyn ErasedStore,
    exclusive: bool,
}

impl<'a> StoreLock<'a> {
    pub fn remove(&mut self, entity: EntityID) -> bool {
        assert!(self.exclusive, "removal requires an exclusive store lock");
        unsafe { self.store.remove_unlocked(entity) }
    }

    pub fn clear(&mut self) {
        assert!(self.exclusive, "clearing requires an exclusive store lock");
        unsafe { self.store.clear_unlocked() }
    }
}

impl<'a> Drop for StoreLock<'a> {
    fn drop(&mut self) {
        self.store.release(self.exclusive)
    }
}

/// A shared borrow of a component store.
///
/// Any number of `StoreRef`s for the same type may exist at once, but no
/// `StoreMut` and no structural change.
pub struct StoreRef<'w, T: Component> {
    cell: Arc<StoreCell<T>>,
    _world: PhantomData<&'w ()>,
}

impl<'w, T: Component> Deref for StoreRef<'w, T> {
    type Target = SparseSet<T>;

    fn deref(&self) -> &SparseSet<T> {
        unsafe { &*self.cell.set.get() }
    }
}

impl<'w, T: Component> Drop for StoreRef<'w, T> {
    fn drop(&mut self) {
        self.cell.flag.release_shared();
    }
}

impl<'w, T: Component + Debug> Debug for StoreRef<'w, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&**self, f)
    }
}

/// An exclusive borrow of a component store.
///
/// Component values can be changed in place, but the set of entities in the
/// store can not: attach and detach go through the `World`.
pub struct StoreMut<'w, T: Component> {
    cell: Arc<StoreCell<T>>,
    _world: PhantomData<&'w mut ()>,
}

impl<'w, T: Component> StoreMut<'w, T> {
    /// Get a raw pointer to the guarded set, valid while this guard lives.
    pub(crate) fn as_ptr(&self) -> *mut SparseSet<T> {
        self.cell.set.get()
    }

    /// Get the whole set for a structural change.
    ///
    /// Only valid on a guard from `StoreCell::borrow_structural`.
    pub(crate) fn structure(&mut self) -> &mut SparseSet<T> {
        unsafe { &mut *self.cell.set.get() }
    }

    fn split(&mut self) -> (&[EntityID], &mut [T]) {
        // The guard is exclusive and `&mut self` keeps the values unaliased.
        unsafe { SparseSet::split_raw(self.as_ptr()) }
    }

    /// Get a mutable reference to an entity's component.
    pub fn get_mut(&mut self, entity: EntityID) -> Option<&mut T> {
        unsafe { SparseSet::get_mut_raw(self.as_ptr(), entity) }
    }

    /// Get all components in the store mutably, in dense order.
    pub fn values_mut(&mut self) -> &mut [T] {
        self.split().1
    }

    /// Iterate mutably over every `(entity, component)` pair.
    pub fn iter_mut(&mut self) -> impl Iterator<Item=(EntityID, &mut T)> + '_ {
        let (entities, values) = self.split();
        entities.iter().copied().zip(values.iter_mut())
    }

    /// Iterate mutably over every `(entity, component)` pair in parallel.
    pub fn par_iter_mut(&mut self) -> impl IndexedParallelIterator<Item=(EntityID, &mut T)> + '_ {
        let (entities, values) = self.split();
        entities.par_iter().copied().zip(values.par_iter_mut())
    }
}

impl<'w, T: Component> Deref for StoreMut<'w, T> {
    type Target = SparseSet<T>;

    fn deref(&self) -> &SparseSet<T> {
        unsafe { &*self.cell.set.get() }
    }
}

impl<'w, T: Component> Drop for StoreMut<'w, T> {
    fn drop(&mut self) {
        self.cell.flag.release_exclusive();
    }
}

impl<'w, T: Component + Debug> Debug for StoreMut<'w, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&**self, f)
    }
}

/// A shared reference to a single component, holding its store borrowed.
pub struct ComponentRef<'w, T: Component> {
    store: StoreRef<'w, T>,
    entity: EntityID,
}

impl<'w, T: Component> ComponentRef<'w, T> {
    pub(crate) fn new(store: StoreRef<'w, T>, entity: EntityID) -> Option<ComponentRef<'w, T>> {
        if store.contains(entity) {
            Some(ComponentRef { store, entity })
        } else {
            None
        }
    }

    /// Get the entity this component belongs to.
    pub fn entity(&self) -> EntityID {
        self.entity
    }
}

impl<'w, T: Component> Deref for ComponentRef<'w, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.store.get(self.entity) {
            Some(value) => value,
            None => unreachable!("component removed while borrowed"),
        }
    }
}

impl<'w, T: Component + Debug> Debug for ComponentRef<'w, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&**self, f)
    }
}

/// A mutable reference to a single component, holding its store borrowed.
pub struct ComponentMut<'w, T: Component> {
    store: StoreMut<'w, T>,
    entity: EntityID,
}

impl<'w, T: Component> ComponentMut<'w, T> {
    pub(crate) fn new(store: StoreMut<'w, T>, entity: EntityID) -> Option<ComponentMut<'w, T>> {
        if store.contains(entity) {
            Some(ComponentMut { store, entity })
        } else {
            None
        }
    }

    /// Get the entity this component belongs to.
    pub fn entity(&self) -> EntityID {
        self.entity
    }
}

impl<'w, T: Component> Deref for ComponentMut<'w, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.store.get(self.entity) {
            Some(value) => value,
            None => unreachable!("component removed while borrowed"),
        }
    }
}

impl<'w, T: Component> DerefMut for ComponentMut<'w, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.store.get_mut(self.entity) {
            Some(value) => value,
            None => unreachable!("component removed while borrowed"),
        }
    }
}

impl<'w, T: Component + Debug> Debug for ComponentMut<'w, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&**self, f)
    }
}
