use std::collections::BTreeMap;

use crate::{
    config::RuntimeConfig,
    runtime::context::{Context, ContextId},
};

/// Owns the live execution contexts of a thread, keyed by id.
///
/// Destroying a context through the registry runs its destroy notifiers, which is how
/// bridge closures learn that their callables are gone.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    config: RuntimeConfig,
    contexts: BTreeMap<ContextId, Context>,
}

impl ContextRegistry {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            contexts: BTreeMap::new(),
        }
    }

    pub fn create_context(&mut self) -> Context {
        let context = Context::with_config(self.config.gc.clone());
        self.contexts.insert(context.id(), context.clone());
        context
    }

    pub fn lookup(&self, id: ContextId) -> Option<&Context> {
        self.contexts.get(&id)
    }

    pub fn is_live(&self, id: ContextId) -> bool {
        self.contexts.contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn contexts(&self) -> impl Iterator<Item = &Context> {
        self.contexts.values()
    }

    /// Destroys and forgets a context. Returns `false` if the id is unknown.
    pub fn destroy(&mut self, id: ContextId) -> bool {
        match self.contexts.remove(&id) {
            Some(context) => {
                context.destroy();
                true
            }
            None => false,
        }
    }

    pub fn destroy_all(&mut self) {
        let contexts = std::mem::take(&mut self.contexts);
        for context in contexts.into_values() {
            context.destroy();
        }
    }
}

impl Drop for ContextRegistry {
    fn drop(&mut self) {
        self.destroy_all();
    }
}
