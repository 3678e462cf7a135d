use std::collections::HashMap;
use std::sync::Arc;

use super::ChainHandler;

/// Owns one live handler per configured chain. Handlers never hold a
/// reference back to the registry.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ChainHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its chain name. Replaces any previous
    /// handler for the same chain.
    pub fn insert(&mut self, handler: Arc<dyn ChainHandler>) {
        self.handlers
            .insert(handler.chain_name().to_string(), handler);
    }

    pub fn get(&self, chain_name: &str) -> Option<Arc<dyn ChainHandler>> {
        self.handlers.get(chain_name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChainHandler>> {
        self.handlers.values()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
