/// Sizing hints for a `World`.
///
/// None of these are limits: every table grows on demand. They only decide
/// how much is allocated up front.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldConfig {
    entity_capacity: usize,
    store_capacity: usize,
}

impl WorldConfig {
    /// Create a config with the default sizing.
    pub fn new() -> WorldConfig {
        WorldConfig {
            entity_capacity: 1024,
            store_capacity: 256,
        }
    }

    /// Set the number of entity slots to reserve.
    pub fn with_entity_capacity(mut self, entity_capacity: usize) -> WorldConfig {
        self.entity_capacity = entity_capacity;
        self
    }

    /// Set the number of components to reserve in each new store.
    pub fn with_store_capacity(mut self, store_capacity: usize) -> WorldConfig {
        self.store_capacity = store_capacity;
        self
    }

    /// Get the number of entity slots to reserve.
    pub fn entity_capacity(&self) -> usize {
        self.entity_capacity
    }

    /// Get the number of components to reserve in each new store.
    pub fn store_capacity(&self) -> usize {
        self.store_capacity
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig::new()
    }
}
