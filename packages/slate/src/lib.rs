//! An entity component system built on sparse sets.
//!
//! A `World` owns entities and one sparse-set store per component type.
//! Entities are generational IDs: a destroyed entity's slot is recycled with
//! a new generation, so a stale `EntityID` never matches the new occupant.
//!
//! Queries walk the smallest of the stores they name and look up the rest, so
//! a query involving a rare component is cheap however common the others
//! are. A `Schedule` runs a fixed list of systems once each per frame, one at
//! a time, in a declared order.
//!
//! # Structural changes during iteration
//!
//! Attaching or detaching a component of a type whose store is borrowed
//! (by a live query, `store()`, `get()` and so on) fails with
//! `EcsError::InvalidIterationMutation`. This is a hard rule, not a
//! convention: a system that wants to change the shape of the world while
//! walking a query must record the changes in a `CommandBuffer` and apply
//! them once the query is dropped.
//!
//! # Archetypes
//!
//! There are no fixed archetypes. `World::spawn` takes a tuple of components
//! to build an entity in one go, but the result is an ordinary entity which
//! can gain and lose components freely afterwards.

pub use command_buffer::CommandBuffer;
pub use component::{
    Component,
    ComponentTypeID,
};
pub use entity::{EntityID, EntityRegistry};
pub use error::{EcsError, Result};
pub use query::{Query, QueryBorrow, QueryIter};
pub use sparse_set::{Attached, SparseSet};
pub use store::{ComponentMut, ComponentRef, StoreMut, StoreRef};
pub use system::{
    BoxSystem,
    FrameError,
    Schedule,
    ScheduleError,
    System,
    SystemAccess,
    SystemRegistration,
    SystemToken,
};
pub use world::{Bundle, World, WorldConfig};

#[macro_use]
pub mod component;
pub mod entity;
pub mod error;
pub mod sparse_set;
mod store;

pub mod query;
mod command_buffer;

pub mod world;
pub mod system;
