use std::collections::HashMap;

use crate::pipeline::StepDefinition;

/// Lookup table from step-kind key to its definition.
///
/// Built once at startup and immutable afterwards. Registering the same
/// key twice keeps the later definition, including duplicates within a
/// list passed to [`StepRegistry::from_defs`].
#[derive(Debug, Default)]
pub struct StepRegistry {
    defs: HashMap<&'static str, StepDefinition>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_defs(defs: impl IntoIterator<Item = StepDefinition>) -> Self {
        let mut registry = Self::new();
        for def in defs {
            registry.register(def);
        }
        registry
    }

    pub fn register(&mut self, def: StepDefinition) {
        self.defs.insert(def.key, def);
    }

    pub fn try_find(&self, key: &str) -> Option<&StepDefinition> {
        self.defs.get(key)
    }

    /// Every registered definition. Iteration order is not significant;
    /// callers that need a stable order must sort explicitly.
    pub fn all(&self) -> impl Iterator<Item = &StepDefinition> {
        self.defs.values()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
