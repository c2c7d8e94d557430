use crate::component::{Component, ComponentTypeID};
use crate::entity::EntityID;
use crate::error::Result;
use crate::world::World;

/// A fixed set of components attached together when an entity is spawned.
///
/// Bundles are the closest thing this crate has to archetypes: the set of
/// types is known when the entity is built. Unlike a true archetype, the
/// entity stays fully dynamic afterwards and components can still be
/// attached or detached one at a time.
pub trait Bundle: Send + 'static {
    /// Attach every component in the bundle to `entity`.
    fn attach_to(self, world: &World, entity: EntityID) -> Result<()>;

    /// Return the component types in this bundle, in declaration order.
    fn component_types() -> Vec<ComponentTypeID>;
}

impl Bundle for () {
    fn attach_to(self, _world: &World, _entity: EntityID) -> Result<()> {
        Ok(())
    }

    fn component_types() -> Vec<ComponentTypeID> {
        Vec::new()
    }
}

macro_rules! impl_bundle {
    ($($name:ident),+) => {
        impl<$($name: Component),+> Bundle for ($($name,)+) {
            #[allow(non_snake_case)]
            fn attach_to(self, world: &World, entity: EntityID) -> Result<()> {
                let ($($name,)+) = self;
                $(world.attach(entity, $name)?;)+
                Ok(())
            }

            fn component_types() -> Vec<ComponentTypeID> {
                vec![$($name::component_type()),+]
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);
