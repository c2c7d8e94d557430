//! Base definitions for components.
//!
//! An entity has no intrinsic value: everything about it lives in the
//! components attached to it. This module provides the means of identifying
//! component types at run time so that the `World` can keep one store per
//! type.
//!
//! Each component type is allocated a unique ID the first time it is used.
//! There is a macro (`component`) to help you assign this unique ID.

use std::any::type_name;
use std::fmt::{self, Debug, Formatter};
use std::sync::{PoisonError, RwLock};

use once_cell::sync::{Lazy, OnceCell};

/// A component type ID which is unique for a specific component type.
///
/// IDs are dense, starting at zero, so they double as indices into the
/// per-type store table of a `World`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentTypeID(usize);

/// Type metadata only. No world state is ever kept here.
struct ComponentRegistry {
    names: Vec<&'static str>,
}

static COMPONENT_REGISTRY: Lazy<RwLock<ComponentRegistry>> = Lazy::new(|| {
    RwLock::new(ComponentRegistry {
        names: Vec::new(),
    })
});

impl ComponentTypeID {
    /// Create a new globally unique `ComponentTypeID` for `T`.
    ///
    /// Calling this twice for the same type allocates two IDs; use the
    /// `component!` macro, which calls it exactly once per type.
    pub fn register<T: 'static>() -> ComponentTypeID {
        let mut r = COMPONENT_REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
        let id = ComponentTypeID(r.names.len());
        r.names.push(type_name::<T>());
        id
    }

    /// Return the inner unique ID.
    pub fn id(&self) -> usize {
        self.0
    }

    /// Return the name of the type this ID was registered for.
    pub fn name(&self) -> &'static str {
        let r = COMPONENT_REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
        r.names.get(self.0).copied().unwrap_or("<unregistered>")
    }
}

impl Debug for ComponentTypeID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A struct for lazily assigning unique `ComponentTypeID`s.
pub struct AutoComponentTypeID(OnceCell<ComponentTypeID>);

impl AutoComponentTypeID {
    /// Create a new `AutoComponentTypeID`.
    pub const fn new() -> AutoComponentTypeID {
        AutoComponentTypeID(OnceCell::new())
    }

    /// Get the `ComponentTypeID` this struct wraps.
    pub fn get<T: 'static>(&self) -> ComponentTypeID {
        *self.0.get_or_init(ComponentTypeID::register::<T>)
    }
}

impl Default for AutoComponentTypeID {
    fn default() -> Self {
        AutoComponentTypeID::new()
    }
}

/// The component trait is implemented on all component types.
///
/// Components are plain data. They are moved into a store on attach and
/// handed back on detach; they never hold references to other components,
/// entities or systems.
pub trait Component: Send + Sync + Sized + 'static {
    /// Get the unique type ID of this component.
    fn component_type() -> ComponentTypeID;
}

/// Implement the `Component` trait on one or more types.
///
/// ```
/// # use slate::component;
/// #[derive(Debug, Default)]
/// struct Position(f32, f32);
///
/// #[derive(Debug, Default)]
/// struct Velocity(f32, f32);
///
/// component!(Position, Velocity);
/// ```
#[macro_export]
macro_rules! component {
    ($($i:ty),+ $(,)?) => {
        $(
            const _: () = {
                static INIT_TYPE: $crate::component::AutoComponentTypeID =
                    $crate::component::AutoComponentTypeID::new();

                impl $crate::component::Component for $i {
                    fn component_type() -> $crate::component::ComponentTypeID {
                        INIT_TYPE.get::<$i>()
                    }
                }
            };
        )+
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_uniqueness() {
        struct A;
        struct B;

        component!(A, B);

        assert_ne!(A::component_type(), B::component_type());
        assert_eq!(A::component_type(), A::component_type());
    }

    #[test]
    fn test_name() {
        struct Health(i32);

        component!(Health);

        let id = Health::component_type();
        assert!(id.name().ends_with("Health"));
        assert_eq!(format!("{:?}", id), id.name());
    }

    #[test]
    fn test_unregistered_name() {
        let id = ComponentTypeID(usize::MAX);
        assert_eq!(id.name(), "<unregistered>");
    }
}
