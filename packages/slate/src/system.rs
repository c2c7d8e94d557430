//! Systems and the per-frame schedule which runs them.

use std::any::type_name;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::{self, Debug};

use log::{debug, trace};
use thiserror::Error;

use crate::component::{Component, ComponentTypeID};
use crate::world::World;

/// A unit of per-frame logic.
///
/// A system keeps no entity state of its own: everything it works on lives
/// in the `World` it is handed each frame.
pub trait System {
    /// Run one step of this system.
    ///
    /// Returning an error aborts the rest of the frame.
    fn run(&mut self, world: &World, dt: f32) -> anyhow::Result<()>;

    /// Called once by `Schedule::start`, before the first frame.
    fn start(&mut self, _world: &World) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once by `Schedule::stop`, after the last frame.
    fn stop(&mut self, _world: &World) -> anyhow::Result<()> {
        Ok(())
    }

    /// A name for this system, used in logs and errors.
    fn name(&self) -> &str {
        type_name::<Self>()
    }
}

impl<F> System for F
    where F: FnMut(&World, f32) -> anyhow::Result<()>
{
    fn run(&mut self, world: &World, dt: f32) -> anyhow::Result<()> {
        self(world, dt)
    }
}

/// A boxed system, as held by a `Schedule`.
pub type BoxSystem = Box<dyn System + Send + 'static>;

/// A token which represents a system in a `Schedule`.
///
/// These tokens are not unique between `Schedule`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemToken(usize);

impl SystemToken {
    /// Get the raw value of this token.
    pub fn id(&self) -> usize {
        self.0
    }
}

/// The component types a system says it touches.
///
/// This is not enforced when the system runs. It only feeds `Schedule::batches`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemAccess {
    reads: Vec<ComponentTypeID>,
    writes: Vec<ComponentTypeID>,
}

impl SystemAccess {
    /// Get the component types read.
    pub fn reads(&self) -> &[ComponentTypeID] {
        &self.reads
    }

    /// Get the component types written.
    pub fn writes(&self) -> &[ComponentTypeID] {
        &self.writes
    }

    /// Returns true if two systems with these accesses may not run side by side.
    pub fn conflicts_with(&self, other: &SystemAccess) -> bool {
        let touches = |access: &SystemAccess, component: &ComponentTypeID| {
            access.reads.contains(component) || access.writes.contains(component)
        };

        self.writes.iter().any(|c| touches(other, c))
            || other.writes.iter().any(|c| touches(self, c))
    }

    fn insert(list: &mut Vec<ComponentTypeID>, component: ComponentTypeID) {
        if let Err(insert_idx) = list.binary_search(&component) {
            list.insert(insert_idx, component);
        }
    }
}

/// A registration used for building `Schedule`s.
pub struct SystemRegistration {
    system: BoxSystem,
    name: Option<String>,
    priority: i32,
    before: Vec<SystemToken>,
    after: Vec<SystemToken>,
    access: SystemAccess,
    barrier: bool,
}

impl SystemRegistration {
    fn new(system: BoxSystem) -> SystemRegistration {
        SystemRegistration {
            system,
            name: None,
            priority: 0,
            before: Vec::new(),
            after: Vec::new(),
            access: SystemAccess::default(),
            barrier: false,
        }
    }

    /// Create a new registration from any object implementing `System`.
    pub fn from_system(system: impl System + Send + 'static) -> SystemRegistration {
        let boxed = Box::new(system) as BoxSystem;
        SystemRegistration::new(boxed)
    }

    /// Create a new registration from a closure.
    pub fn from_fn<F>(f: F) -> SystemRegistration
        where F: FnMut(&World, f32) -> anyhow::Result<()> + Send + 'static
    {
        SystemRegistration::from_system(f)
    }

    /// Give the system a name, overriding `System::name`.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the priority of the system.
    ///
    /// Lower priorities run first. Systems with equal priority run in the
    /// order they were inserted. Explicit `before` and `after` constraints
    /// always win over priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Require that this system is updated before the system represented
    /// by the given token.
    pub fn before(mut self, system: SystemToken) -> Self {
        if let Err(insert_idx) = self.before.binary_search(&system) {
            self.before.insert(insert_idx, system);
        }

        self
    }

    /// Require that this system is updated after the system represented
    /// by the given token.
    pub fn after(mut self, system: SystemToken) -> Self {
        if let Err(insert_idx) = self.after.binary_search(&system) {
            self.after.insert(insert_idx, system);
        }

        self
    }

    /// Declare that this system reads the given component type.
    pub fn read_component_type(mut self, component_type: ComponentTypeID) -> Self {
        SystemAccess::insert(&mut self.access.reads, component_type);
        self
    }

    /// Declare that this system reads `T`.
    pub fn reads<T: Component>(self) -> Self {
        self.read_component_type(T::component_type())
    }

    /// Declare that this system writes the given component type.
    pub fn write_component_type(mut self, component_type: ComponentTypeID) -> Self {
        SystemAccess::insert(&mut self.access.writes, component_type);
        self
    }

    /// Declare that this system writes `T`.
    pub fn writes<T: Component>(self) -> Self {
        self.write_component_type(T::component_type())
    }

    /// Require that no other system shares a batch with this one.
    pub fn barrier(mut self) -> Self {
        self.barrier = true;
        self
    }
}

/// The error returned when a system cannot be inserted into a `Schedule`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// An ordering constraint named a system which is not in the schedule.
    #[error("no system with token {0:?} in this schedule")]
    UnknownSystem(SystemToken),
    /// The ordering constraints can not all be satisfied.
    #[error("ordering constraints on `{name}` form a cycle")]
    OrderingCycle { name: String },
}

/// The error returned when a system fails during a frame, or while it is
/// being started or stopped.
///
/// The systems after it in run order did not run.
#[derive(Error, Debug)]
#[error("system `{system}` failed in frame {frame}")]
pub struct FrameError {
    system: String,
    frame: u64,
    #[source]
    source: anyhow::Error,
}

impl FrameError {
    /// Get the name of the system which failed.
    pub fn system(&self) -> &str {
        &self.system
    }

    /// Get the number of the frame which was aborted.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Get the error the system returned.
    pub fn cause(&self) -> &anyhow::Error {
        &self.source
    }

    /// Take the error the system returned.
    pub fn into_cause(self) -> anyhow::Error {
        self.source
    }
}

struct ScheduledSystem {
    token: SystemToken,
    name: String,
    system: BoxSystem,
    priority: i32,
    before: Vec<SystemToken>,
    after: Vec<SystemToken>,
    access: SystemAccess,
    barrier: bool,
}

impl ScheduledSystem {
    fn new(registration: SystemRegistration, token: SystemToken) -> ScheduledSystem {
        let SystemRegistration { system, name, priority, before, after, access, barrier } = registration;
        let name = name.unwrap_or_else(|| system.name().to_owned());

        ScheduledSystem {
            token,
            name,
            system,
            priority,
            before,
            after,
            access,
            barrier,
        }
    }

    fn ordered_against(&self, other: SystemToken) -> bool {
        self.before.binary_search(&other).is_ok() || self.after.binary_search(&other).is_ok()
    }
}

/// The fixed list of systems run once each per frame.
///
/// Systems run one at a time, to completion, in a fixed order: explicit
/// `before`/`after` constraints first, then ascending priority, then
/// insertion order.
pub struct Schedule {
    next_system_id: usize,
    frame: u64,
    // Kept in insertion order, which is also token order.
    systems: Vec<ScheduledSystem>,
    order: Vec<usize>,
}

impl Schedule {
    /// Create a new empty `Schedule`.
    pub fn new() -> Schedule {
        Schedule {
            next_system_id: 0,
            frame: 0,
            systems: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Get the number of systems in the schedule.
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Returns true if there are no systems in the schedule.
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Get the number of frames which have completed.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    fn position(&self, token: SystemToken) -> Option<usize> {
        self.systems.binary_search_by_key(&token, |s| s.token).ok()
    }

    /// Insert a system into the schedule according to its registration
    /// requirements.
    pub fn insert(&mut self, registration: SystemRegistration) -> Result<SystemToken, ScheduleError> {
        let unknown = registration.before.iter()
            .chain(registration.after.iter())
            .find(|token| self.position(**token).is_none());
        if let Some(token) = unknown {
            return Err(ScheduleError::UnknownSystem(*token));
        }

        let token = SystemToken(self.next_system_id);
        let system = ScheduledSystem::new(registration, token);
        self.systems.push(system);

        match self.compute_order() {
            Ok(order) => {
                self.next_system_id += 1;
                self.order = order;

                let system = &self.systems[self.systems.len() - 1];
                debug!("inserted system {} as {:?}", system.name, token);
                Ok(token)
            }
            Err(_) => {
                let name = self.systems.pop()
                    .map(|system| system.name)
                    .unwrap_or_default();
                Err(ScheduleError::OrderingCycle { name })
            }
        }
    }

    /// Remove a system from the schedule.
    ///
    /// Ordering constraints other systems had against it are dropped.
    pub fn remove(&mut self, token: SystemToken) -> Option<BoxSystem> {
        let index = self.position(token)?;
        let removed = self.systems.remove(index);

        for system in self.systems.iter_mut() {
            system.before.retain(|t| *t != token);
            system.after.retain(|t| *t != token);
        }

        // Removing a node can not introduce a cycle.
        self.order = self.compute_order().unwrap_or_default();
        debug!("removed system {}", removed.name);
        Some(removed.system)
    }

    /// Get the names of the systems in the order they run.
    pub fn system_names(&self) -> Vec<&str> {
        self.order.iter()
            .map(|index| self.systems[*index].name.as_str())
            .collect()
    }

    /// Get the tokens of the systems in the order they run.
    pub fn run_order(&self) -> Vec<SystemToken> {
        self.order.iter()
            .map(|index| self.systems[*index].token)
            .collect()
    }

    /// Get the declared component access of a system.
    pub fn access(&self, token: SystemToken) -> Option<&SystemAccess> {
        self.position(token).map(|index| &self.systems[index].access)
    }

    /// Topologically sort the systems, breaking ties by priority and then
    /// insertion order.
    ///
    /// On failure, returns the index of a system caught in a cycle.
    fn compute_order(&self) -> Result<Vec<usize>, usize> {
        let count = self.systems.len();
        let mut blockers = vec![0usize; count];
        let mut unblocks: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (index, system) in self.systems.iter().enumerate() {
            for other in system.after.iter().filter_map(|t| self.position(*t)) {
                unblocks[other].push(index);
                blockers[index] += 1;
            }

            for other in system.before.iter().filter_map(|t| self.position(*t)) {
                unblocks[index].push(other);
                blockers[other] += 1;
            }
        }

        let mut ready: BinaryHeap<_> = blockers.iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(index, _)| Reverse((self.systems[index].priority, index)))
            .collect();
        let mut order = Vec::with_capacity(count);

        while let Some(Reverse((_, index))) = ready.pop() {
            order.push(index);
            for next in unblocks[index].iter().copied() {
                blockers[next] -= 1;
                if blockers[next] == 0 {
                    ready.push(Reverse((self.systems[next].priority, next)));
                }
            }
        }

        if order.len() < count {
            let stuck = blockers.iter().position(|n| *n > 0).unwrap_or(0);
            return Err(stuck);
        }

        Ok(order)
    }

    /// Group the systems, in run order, into batches which could run side
    /// by side.
    ///
    /// Two systems share a batch only if their declared accesses do not
    /// conflict, neither is a barrier, and neither is explicitly ordered
    /// against the other. `run_frame` still runs every system in turn.
    pub fn batches(&self) -> Vec<Vec<SystemToken>> {
        let mut batches: Vec<Vec<usize>> = Vec::new();

        for index in self.order.iter().copied() {
            let system = &self.systems[index];
            let fits = batches.last().map_or(false, |batch| {
                !system.barrier && batch.iter().all(|other| {
                    let other = &self.systems[*other];
                    !other.barrier
                        && !other.access.conflicts_with(&system.access)
                        && !other.ordered_against(system.token)
                        && !system.ordered_against(other.token)
                })
            });

            match batches.last_mut() {
                Some(batch) if fits => batch.push(index),
                _ => batches.push(vec![index]),
            }
        }

        batches.into_iter()
            .map(|batch| batch.into_iter().map(|index| self.systems[index].token).collect())
            .collect()
    }

    /// Run every system once, in order, passing each the same `dt`.
    ///
    /// The first system to fail stops the frame; the systems after it do
    /// not run and the frame counter is not advanced. Nothing is retried.
    pub fn run_frame(&mut self, world: &World, dt: f32) -> Result<(), FrameError> {
        let frame = self.frame;

        for index in self.order.iter().copied() {
            let entry = &mut self.systems[index];
            trace!("frame {}: running {}", frame, entry.name);

            if let Err(source) = entry.system.run(world, dt) {
                debug!("frame {} aborted by {}: {:#}", frame, entry.name, source);
                return Err(FrameError {
                    system: entry.name.clone(),
                    frame,
                    source,
                });
            }
        }

        self.frame += 1;
        Ok(())
    }

    /// Call `System::start` on every system, in run order.
    ///
    /// The first system to fail stops the rest from starting.
    pub fn start(&mut self, world: &World) -> Result<(), FrameError> {
        self.each_system("start", |system| system.start(world))
    }

    /// Call `System::stop` on every system, in run order.
    ///
    /// The first system to fail stops the rest from being stopped.
    pub fn stop(&mut self, world: &World) -> Result<(), FrameError> {
        self.each_system("stop", |system| system.stop(world))
    }

    fn each_system<F>(&mut self, hook: &str, mut f: F) -> Result<(), FrameError>
        where F: FnMut(&mut BoxSystem) -> anyhow::Result<()>
    {
        let frame = self.frame;

        for index in self.order.iter().copied() {
            let entry = &mut self.systems[index];
            trace!("{}: {}", hook, entry.name);

            if let Err(source) = f(&mut entry.system) {
                debug!("{} failed in {}: {:#}", hook, entry.name, source);
                return Err(FrameError {
                    system: entry.name.clone(),
                    frame,
                    source,
                });
            }
        }

        Ok(())
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::new()
    }
}

impl Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("frame", &self.frame)
            .field("systems", &self.system_names())
            .finish()
    }
}
