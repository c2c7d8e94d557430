//! Queries over entities that have every one of a set of components.
//!
//! A query is named by a type: `&T` for read access, `&mut T` for write
//! access, or a tuple of those. Borrowing a query locks each named store for
//! as long as the `QueryBorrow` lives; walking it picks the smallest of those
//! stores as the driver and looks up the others for each of its entities.
//!
//! ```
//! # use slate::{component, World};
//! # #[derive(Debug)] struct Position(f32, f32);
//! # #[derive(Debug)] struct Velocity(f32, f32);
//! # component!(Position, Velocity);
//! # fn main() -> Result<(), slate::EcsError> {
//! let world = World::new();
//! world.spawn((Position(0.0, 0.0), Velocity(1.0, 0.0)))?;
//!
//! let mut query = world.query::<(&mut Position, &Velocity)>()?;
//! for (_entity, (position, velocity)) in query.iter() {
//!     position.0 += velocity.0;
//!     position.1 += velocity.1;
//! }
//! # Ok(())
//! # }
//! ```

use std::marker::PhantomData;

use crate::component::Component;
use crate::entity::EntityID;
use crate::error::Result;
use crate::sparse_set::SparseSet;
use crate::store::{StoreMut, StoreRef};
use crate::world::World;

/// A set of component accesses that can be queried for.
pub trait Query {
    /// The borrows held while the query is alive.
    type State<'w>;

    /// The value yielded for each matching entity.
    type Item<'q>;

    /// Borrow every store this query needs.
    ///
    /// Returns `Ok(None)` if one of the stores does not exist, in which case
    /// no entity can match.
    fn acquire(world: &World) -> Result<Option<Self::State<'_>>>;

    /// Pick the entity list to drive iteration with.
    fn driver<'s>(state: &'s Self::State<'_>) -> &'s [EntityID];

    /// Fetch the item for an entity, if it has every component.
    ///
    /// # Safety
    /// Each entity may be fetched at most once for the lifetime `'q`, and
    /// `state` must outlive `'q`.
    unsafe fn fetch<'q>(state: &Self::State<'_>, entity: EntityID) -> Option<Self::Item<'q>>;
}

impl<'a, T: Component> Query for &'a T {
    type State<'w> = StoreRef<'w, T>;
    type Item<'q> = &'q T;

    fn acquire(world: &World) -> Result<Option<StoreRef<'_, T>>> {
        world.store::<T>()
    }

    fn driver<'s>(state: &'s StoreRef<'_, T>) -> &'s [EntityID] {
        state.entities()
    }

    unsafe fn fetch<'q>(state: &StoreRef<'_, T>, entity: EntityID) -> Option<&'q T> {
        state.get(entity).map(|value| &*(value as *const T))
    }
}

impl<'a, T: Component> Query for &'a mut T {
    type State<'w> = StoreMut<'w, T>;
    type Item<'q> = &'q mut T;

    fn acquire(world: &World) -> Result<Option<StoreMut<'_, T>>> {
        world.store_mut::<T>()
    }

    fn driver<'s>(state: &'s StoreMut<'_, T>) -> &'s [EntityID] {
        state.entities()
    }

    unsafe fn fetch<'q>(state: &StoreMut<'_, T>, entity: EntityID) -> Option<&'q mut T> {
        SparseSet::get_mut_raw(state.as_ptr(), entity)
    }
}

macro_rules! impl_query {
    ($($name:ident),+) => {
        impl<$($name: Query),+> Query for ($($name,)+) {
            type State<'w> = ($($name::State<'w>,)+);
            type Item<'q> = ($($name::Item<'q>,)+);

            #[allow(non_snake_case)]
            fn acquire(world: &World) -> Result<Option<Self::State<'_>>> {
                let ($($name,)+) = ($($name::acquire(world)?,)+);
                match ($($name,)+) {
                    ($(Some($name),)+) => Ok(Some(($($name,)+))),
                    #[allow(unreachable_patterns)]
                    _ => Ok(None),
                }
            }

            #[allow(non_snake_case)]
            fn driver<'s>(state: &'s Self::State<'_>) -> &'s [EntityID] {
                let ($($name,)+) = state;
                let candidates = [$($name::driver($name)),+];
                candidates.into_iter()
                    .min_by_key(|entities| entities.len())
                    .unwrap_or(&[])
            }

            #[allow(non_snake_case)]
            unsafe fn fetch<'q>(state: &Self::State<'_>, entity: EntityID) -> Option<Self::Item<'q>> {
                let ($($name,)+) = state;
                Some(($($name::fetch($name, entity)?,)+))
            }
        }
    };
}

impl_query!(A);
impl_query!(A, B);
impl_query!(A, B, C);
impl_query!(A, B, C, D);
impl_query!(A, B, C, D, E);
impl_query!(A, B, C, D, E, F);
impl_query!(A, B, C, D, E, F, G);
impl_query!(A, B, C, D, E, F, G, H);

/// The borrowed stores of a query.
///
/// Structural changes to any of these stores fail until this is dropped.
/// Results are never cached: each `iter()` reflects the stores as they are.
pub struct QueryBorrow<'w, Q: Query> {
    state: Option<Q::State<'w>>,
}

impl<'w, Q: Query> QueryBorrow<'w, Q> {
    pub(crate) fn new(world: &'w World) -> Result<QueryBorrow<'w, Q>> {
        Ok(QueryBorrow {
            state: Q::acquire(world)?,
        })
    }

    /// Iterate over every entity that has all of the queried components.
    ///
    /// Each matching entity is yielded exactly once.
    pub fn iter(&mut self) -> QueryIter<'_, 'w, Q> {
        let entities = self.state.as_ref().map_or(&[][..], |state| Q::driver(state));
        QueryIter {
            state: self.state.as_ref(),
            entities,
            index: 0,
            _borrow: PhantomData,
        }
    }

    /// Fetch the queried components of a single entity.
    pub fn get(&mut self, entity: EntityID) -> Option<Q::Item<'_>> {
        let state = self.state.as_ref()?;
        // The `&mut self` borrow keeps this the only live item.
        unsafe { Q::fetch(state, entity) }
    }

    /// Returns true if the entity has all of the queried components.
    pub fn contains(&mut self, entity: EntityID) -> bool {
        self.get(entity).is_some()
    }

    /// Count the matching entities.
    pub fn len(&mut self) -> usize {
        self.iter().count()
    }

    /// Returns true if no entity matches.
    pub fn is_empty(&mut self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'q, 'w, Q: Query> IntoIterator for &'q mut QueryBorrow<'w, Q> {
    type Item = (EntityID, Q::Item<'q>);
    type IntoIter = QueryIter<'q, 'w, Q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the entities matching a query.
pub struct QueryIter<'q, 'w, Q: Query> {
    state: Option<&'q Q::State<'w>>,
    entities: &'q [EntityID],
    index: usize,
    _borrow: PhantomData<&'q mut QueryBorrow<'w, Q>>,
}

impl<'q, 'w, Q: Query> Iterator for QueryIter<'q, 'w, Q> {
    type Item = (EntityID, Q::Item<'q>);

    fn next(&mut self) -> Option<Self::Item> {
        let state = self.state?;
        while let Some(entity) = self.entities.get(self.index).copied() {
            self.index += 1;

            // The driver holds each entity once, and the iterator holds the
            // query borrow mutably, so no item is handed out twice.
            if let Some(item) = unsafe { Q::fetch(state, entity) } {
                return Some((entity, item));
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.entities.len() - self.index))
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    use crate::error::EcsError;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct A(u32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct B(u32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct C(u32);

    crate::component!(A, B, C);

    #[test]
    fn test_single() {
        let world = World::new();
        let e = world.spawn((A(1),)).unwrap();
        world.spawn((B(2),)).unwrap();

        let mut query = world.query::<&A>().unwrap();
        let found: Vec<_> = query.iter().map(|(id, a)| (id, *a)).collect();
        assert_eq!(found, vec![(e, A(1))]);
    }

    #[test]
    fn test_intersection() {
        let world = World::new();
        let both = world.spawn((A(1), B(10))).unwrap();
        world.spawn((A(2),)).unwrap();
        world.spawn((B(20),)).unwrap();

        let mut query = world.query::<(&A, &B)>().unwrap();
        let found: Vec<_> = query.iter().map(|(id, (a, b))| (id, *a, *b)).collect();
        assert_eq!(found, vec![(both, A(1), B(10))]);
    }

    #[test]
    fn test_missing_store_is_empty() {
        let world = World::new();
        world.spawn((A(1),)).unwrap();

        let mut query = world.query::<(&A, &C)>().unwrap();
        assert_eq!(query.len(), 0);
        assert!(query.is_empty());
    }

    #[test]
    fn test_mutation_in_place() {
        let world = World::new();
        let e = world.spawn((A(1), B(2))).unwrap();

        for (_, (a, b)) in &mut world.query::<(&mut A, &B)>().unwrap() {
            a.0 += b.0;
        }

        assert_eq!(*world.get::<A>(e).unwrap().unwrap(), A(3));
    }

    #[test]
    fn test_get() {
        let world = World::new();
        let e = world.spawn((A(1), B(2))).unwrap();
        let only_a = world.spawn((A(3),)).unwrap();

        let mut query = world.query::<(&A, &mut B)>().unwrap();
        if let Some((_, b)) = query.get(e) {
            b.0 = 7;
        }
        assert!(query.contains(e));
        assert!(!query.contains(only_a));
        drop(query);

        assert_eq!(*world.get::<B>(e).unwrap().unwrap(), B(7));
    }

    #[test]
    fn test_conflicting_borrows() {
        let world = World::new();
        world.spawn((A(1), B(1))).unwrap();

        assert_eq!(
            world.query::<(&mut A, &A)>().err(),
            Some(EcsError::BorrowConflict { component: A::component_type() }));

        let _reading = world.query::<&A>().unwrap();
        assert!(world.query::<&A>().is_ok());
        assert!(world.query::<&mut A>().is_err());
    }

    #[test]
    fn test_attach_during_iteration_fails() {
        let world = World::new();
        for i in 0..4 {
            world.spawn((A(i), B(i))).unwrap();
        }

        let mut query = world.query::<(&mut A, &B)>().unwrap();
        for (id, _) in query.iter() {
            assert_eq!(
                world.attach(id, A(99)),
                Err(EcsError::InvalidIterationMutation { component: A::component_type() }));
            assert_eq!(
                world.detach::<B>(id),
                Err(EcsError::InvalidIterationMutation { component: B::component_type() }));

            // Stores outside the query can still change.
            assert!(world.attach(id, C(1)).is_ok());
        }
    }

    #[test]
    fn test_driver_is_smallest_store() {
        let world = World::new();
        for i in 0..100 {
            let e = world.spawn((A(i),)).unwrap();
            if i % 25 == 0 {
                world.attach(e, B(i)).unwrap();
            }
        }

        let query = world.query::<(&A, &B)>().unwrap();
        let state = query.state.as_ref().unwrap();
        assert_eq!(<(&A, &B)>::driver(state).len(), 4);
    }

    #[test]
    fn test_matches_intersection() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..20 {
            let world = World::new();
            let mut has_a = BTreeSet::new();
            let mut has_b = BTreeSet::new();
            let mut ids = Vec::new();

            for i in 0..200 {
                let e = world.create();
                ids.push(e);
                if rng.gen_bool(0.5) {
                    world.attach(e, A(i)).unwrap();
                    has_a.insert(e);
                }
                if rng.gen_bool(0.3) {
                    world.attach(e, B(i)).unwrap();
                    has_b.insert(e);
                }
            }

            // Churn a little so the dense arrays get reordered.
            for e in ids.iter().copied() {
                if rng.gen_bool(0.1) {
                    world.destroy(e).unwrap();
                    has_a.remove(&e);
                    has_b.remove(&e);
                } else if rng.gen_bool(0.1) && world.detach::<A>(e).unwrap().is_some() {
                    has_a.remove(&e);
                }
            }

            let expected: BTreeSet<_> = has_a.intersection(&has_b).copied().collect();
            let mut query = world.query::<(&A, &B)>().unwrap();
            let found: Vec<_> = query.iter().map(|(id, _)| id).collect();
            let unique: BTreeSet<_> = found.iter().copied().collect();

            assert_eq!(found.len(), unique.len());
            assert_eq!(unique, expected);
        }
    }
}
