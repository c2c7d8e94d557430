//! A world which can hold entities.

use std::cell::RefCell;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use log::{debug, trace};

pub use bundle::Bundle;
pub use config::WorldConfig;

use crate::component::{Component, ComponentTypeID};
use crate::entity::{EntityID, EntityRegistry};
use crate::error::{EcsError, Result};
use crate::query::{Query, QueryBorrow};
use crate::sparse_set::Attached;
use crate::store::{ComponentMut, ComponentRef, ErasedStore, StoreCell, StoreLock, StoreMut, StoreRef};

mod bundle;
mod config;

/// A World owns every entity, every component store, and nothing else.
///
/// You can create an empty world with `World::new()`. Everything a host or
/// system does goes through a `World` it was handed explicitly; there is no
/// global world state.
///
/// All operations take `&World`, so a system can create or destroy entities
/// and attach or detach components while it holds other borrows of the
/// world. Stores track their own borrows: a structural change to a store
/// that is currently borrowed (for instance by an active query) fails with
/// `EcsError::InvalidIterationMutation` rather than corrupting the walk.
/// Record such changes in a `CommandBuffer` and apply them after the pass.
pub struct World {
    config: WorldConfig,
    entities: RefCell<EntityRegistry>,
    stores: RefCell<Vec<Option<Arc<dyn ErasedStore>>>>,
}

impl World {
    /// Create a new world with the default config.
    pub fn new() -> World {
        World::with_config(WorldConfig::default())
    }

    /// Create a new world with a specific config.
    pub fn with_config(config: WorldConfig) -> World {
        World {
            config,
            entities: RefCell::new(EntityRegistry::with_capacity(config.entity_capacity())),
            stores: RefCell::new(Vec::new()),
        }
    }

    /// Return the config this world was created with.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Get the number of live entities.
    pub fn len(&self) -> usize {
        self.entities.borrow().len()
    }

    /// Returns true if there are no live entities.
    pub fn is_empty(&self) -> bool {
        self.entities.borrow().is_empty()
    }

    /// Collect the IDs of all live entities.
    pub fn entities(&self) -> Vec<EntityID> {
        self.entities.borrow().iter().collect()
    }

    /// Create a new entity with no components.
    ///
    /// # Panics
    ///
    /// Panics if the entity slots are exhausted. See `EntityRegistry::create`.
    pub fn create(&self) -> EntityID {
        let id = self.entities.borrow_mut().create();
        trace!("created entity {}", id);
        id
    }

    /// Create a new entity with every component in `bundle` attached.
    ///
    /// Fails with `InvalidIterationMutation` before creating anything if one
    /// of the bundle's stores is borrowed. If an attach fails anyway, the
    /// components already attached are detached and the entity is released
    /// before the error is returned.
    pub fn spawn<B: Bundle>(&self, bundle: B) -> Result<EntityID> {
        let components = B::component_types();
        for component in components.iter().copied() {
            if let Some(store) = self.erased_store(component) {
                if store.lock(true).is_none() {
                    return Err(EcsError::InvalidIterationMutation { component });
                }
            }
        }

        let id = self.create();
        if let Err(err) = bundle.attach_to(self, id) {
            self.unspawn(id, &components);
            return Err(err);
        }

        Ok(id)
    }

    /// Undo a partial spawn, touching only the stores of the bundle.
    fn unspawn(&self, id: EntityID, components: &[ComponentTypeID]) {
        for component in components.iter().copied() {
            let store = match self.erased_store(component) {
                Some(store) => store,
                None => continue,
            };

            match store.lock(true) {
                Some(mut lock) => { lock.remove(id); }
                None => debug!("could not detach {:?} from half-spawned entity {}", component, id),
            };
        }

        if let Err(err) = self.entities.borrow_mut().destroy(id) {
            debug!("could not release half-spawned entity {}: {}", id, err);
        }
    }

    /// Returns true if `id` refers to a live entity.
    pub fn is_live(&self, id: EntityID) -> bool {
        self.entities.borrow().is_live(id)
    }

    fn ensure_live(&self, id: EntityID) -> Result<()> {
        if self.is_live(id) {
            Ok(())
        } else {
            Err(EcsError::DeadEntity(id))
        }
    }

    /// Destroy an entity, detaching all of its components.
    ///
    /// Fails without changing anything if the entity is not live, or if one
    /// of the stores holding its components is currently borrowed. Borrowed
    /// stores which hold nothing for this entity are no obstacle.
    pub fn destroy(&self, id: EntityID) -> Result<()> {
        self.entities.borrow().check_destroy(id)?;

        let stores = self.all_stores();
        let mut locks: Vec<StoreLock<'_>> = Vec::with_capacity(stores.len());
        for store in stores.iter() {
            if let Some(lock) = store.lock(true) {
                locks.push(lock);
            } else if store.holds(id) {
                return Err(EcsError::InvalidIterationMutation {
                    component: store.component(),
                });
            }
        }

        self.entities.borrow_mut().destroy(id)?;
        for lock in locks.iter_mut() {
            lock.remove(id);
        }

        trace!("destroyed entity {}", id);
        Ok(())
    }

    /// Destroy every entity and component.
    pub fn clear(&mut self) {
        self.entities.get_mut().clear();
        for store in self.stores.get_mut().iter().flatten() {
            // No guard can outlive a `&mut World`, so this always locks.
            if let Some(mut lock) = store.lock(true) {
                lock.clear();
            }
        }

        debug!("cleared world");
    }

    /// Attach a component to a live entity.
    ///
    /// If the entity already has a component of this type it is overwritten
    /// and returned as `Attached::Replaced`.
    pub fn attach<T: Component>(&self, id: EntityID, value: T) -> Result<Attached<T>> {
        self.ensure_live(id)?;
        let cell = self.store_cell_or_insert::<T>();
        let mut store = cell.borrow_structural()?;
        Ok(store.structure().attach(id, value))
    }

    /// Detach a component from a live entity, returning it.
    ///
    /// Returns `Ok(None)` if the entity had no component of this type.
    pub fn detach<T: Component>(&self, id: EntityID) -> Result<Option<T>> {
        self.ensure_live(id)?;
        match self.store_cell::<T>() {
            Some(cell) => Ok(cell.borrow_structural()?.structure().detach(id)),
            None => Ok(None),
        }
    }

    /// Get a reference to a component of a live entity.
    pub fn get<T: Component>(&self, id: EntityID) -> Result<Option<ComponentRef<'_, T>>> {
        self.ensure_live(id)?;
        Ok(self.store::<T>()?.and_then(|store| ComponentRef::new(store, id)))
    }

    /// Get a mutable reference to a component of a live entity.
    pub fn get_mut<T: Component>(&self, id: EntityID) -> Result<Option<ComponentMut<'_, T>>> {
        self.ensure_live(id)?;
        Ok(self.store_mut::<T>()?.and_then(|store| ComponentMut::new(store, id)))
    }

    /// Returns true if a live entity has a component of type `T`.
    pub fn has<T: Component>(&self, id: EntityID) -> Result<bool> {
        self.ensure_live(id)?;
        Ok(self.store::<T>()?.map_or(false, |store| store.contains(id)))
    }

    /// Get the types of all components attached to a live entity.
    ///
    /// This works even while some of those stores are borrowed.
    pub fn component_types(&self, id: EntityID) -> Result<Vec<ComponentTypeID>> {
        self.ensure_live(id)?;

        Ok(self.all_stores().iter()
            .filter(|store| store.holds(id))
            .map(|store| store.component())
            .collect())
    }

    /// Borrow the store for `T` for reading.
    ///
    /// Returns `Ok(None)` if no component of this type was ever attached.
    pub fn store<T: Component>(&self) -> Result<Option<StoreRef<'_, T>>> {
        self.store_cell::<T>().map(|cell| cell.borrow()).transpose()
    }

    /// Borrow the store for `T` for modifying components in place.
    ///
    /// Returns `Ok(None)` if no component of this type was ever attached.
    pub fn store_mut<T: Component>(&self) -> Result<Option<StoreMut<'_, T>>> {
        self.store_cell::<T>().map(|cell| cell.borrow_mut()).transpose()
    }

    /// Borrow every store named by `Q` and prepare to walk the entities
    /// that have all of them.
    pub fn query<Q: Query>(&self) -> Result<QueryBorrow<'_, Q>> {
        QueryBorrow::new(self)
    }

    fn all_stores(&self) -> Vec<Arc<dyn ErasedStore>> {
        self.stores.borrow().iter().flatten().cloned().collect()
    }

    fn erased_store(&self, component: ComponentTypeID) -> Option<Arc<dyn ErasedStore>> {
        self.stores.borrow().get(component.id())?.clone()
    }

    fn store_cell<T: Component>(&self) -> Option<Arc<StoreCell<T>>> {
        let store = self.erased_store(T::component_type())?;
        store.into_any().downcast::<StoreCell<T>>().ok()
    }

    fn store_cell_or_insert<T: Component>(&self) -> Arc<StoreCell<T>> {
        if let Some(cell) = self.store_cell::<T>() {
            return cell;
        }

        let component = T::component_type();
        let cell = Arc::new(StoreCell::<T>::new(self.config.store_capacity()));
        let mut stores = self.stores.borrow_mut();
        if stores.len() <= component.id() {
            stores.resize(component.id() + 1, None);
        }
        stores[component.id()] = Some(cell.clone());

        debug!("registered store for {:?}", component);
        cell
    }
}

impl Default for World {
    fn default() -> Self {
        World::new()
    }
}

impl Debug for World {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let stores: Vec<ComponentTypeID> = self.all_stores().iter()
            .map(|store| store.component())
            .collect();

        f.debug_struct("World")
            .field("entities", &self.len())
            .field("stores", &stores)
            .finish()
    }
}
