//! Errors raised by the world, its stores and its queries.
//!
//! Absence is never an error: a missing component or an empty query is
//! reported through `Option` or an empty iterator. Everything here points
//! at a lifecycle or borrowing bug in the caller.

use thiserror::Error;

use crate::component::ComponentTypeID;
use crate::entity::EntityID;

/// A structural or lifecycle error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// The ID was never issued by this world.
    #[error("entity {0} is unknown to this world")]
    UnknownEntity(EntityID),

    /// The ID was issued but is no longer live.
    #[error("entity {0} is not live")]
    DeadEntity(EntityID),

    /// The entity has already been destroyed.
    #[error("entity {0} was already destroyed")]
    DuplicateDestroy(EntityID),

    /// A component was attached or detached while its store was borrowed
    /// by an active query or component reference.
    #[error("cannot attach or detach {component:?} while its store is being iterated")]
    InvalidIterationMutation {
        /// The store that was borrowed.
        component: ComponentTypeID,
    },

    /// A store was borrowed in a way that conflicts with an existing borrow.
    #[error("store for {component:?} is already borrowed")]
    BorrowConflict {
        /// The store that was borrowed.
        component: ComponentTypeID,
    },
}

/// Result type for world operations.
pub type Result<T> = std::result::Result<T, EcsError>;
