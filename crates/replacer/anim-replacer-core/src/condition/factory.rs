//! Name → constructor table for predicate types.
//!
//! Built-ins are registered on construction. Extension modules add their own
//! types while the factory is [`FactoryPhase::Open`]; once the host seals it,
//! further registration fails closed.

use super::builtin::{And, CompareBool, CompareValues, HasKeyword, Invalid, IsForm, Or, Random, Xor};
use super::{Condition, Predicate, RequiredPlugin};
use crate::error::{ReplacerError, Result};
use hashbrown::HashMap;
use log::warn;
use std::sync::Arc;

pub type PredicateConstructor = Arc<dyn Fn() -> Box<dyn Predicate> + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FactoryPhase {
    Open,
    Sealed,
}

struct Registration {
    constructor: PredicateConstructor,
    plugin: Option<RequiredPlugin>,
}

pub struct ConditionFactory {
    phase: FactoryPhase,
    registrations: HashMap<String, Registration>,
}

impl ConditionFactory {
    /// Create an open factory with every built-in type registered.
    pub fn new() -> Self {
        let mut factory = Self {
            phase: FactoryPhase::Open,
            registrations: HashMap::new(),
        };
        factory.register_builtin();
        factory
    }

    fn register_builtin(&mut self) {
        self.insert_builtin("IsForm", || Box::new(IsForm::default()));
        self.insert_builtin("HasKeyword", || Box::new(HasKeyword::default()));
        self.insert_builtin("CompareValues", || Box::new(CompareValues::default()));
        self.insert_builtin("CompareBool", || Box::new(CompareBool::default()));
        self.insert_builtin("Random", || Box::new(Random::default()));
        self.insert_builtin("AND", || Box::new(And::default()));
        self.insert_builtin("OR", || Box::new(Or::default()));
        self.insert_builtin("XOR", || Box::new(Xor::default()));
    }

    fn insert_builtin<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn() -> Box<dyn Predicate> + Send + Sync + 'static,
    {
        self.registrations.insert(
            name.to_string(),
            Registration {
                constructor: Arc::new(constructor),
                plugin: None,
            },
        );
    }

    /// Register a predicate type contributed by another module.
    pub fn register<F>(&mut self, name: &str, plugin: Option<RequiredPlugin>, constructor: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Predicate> + Send + Sync + 'static,
    {
        if self.phase == FactoryPhase::Sealed {
            warn!("rejected registration of condition type '{name}': factory sealed");
            return Err(ReplacerError::FactorySealed {
                name: name.to_string(),
            });
        }
        if self.registrations.contains_key(name) {
            return Err(ReplacerError::DuplicateConditionType {
                name: name.to_string(),
            });
        }
        self.registrations.insert(
            name.to_string(),
            Registration {
                constructor: Arc::new(constructor),
                plugin,
            },
        );
        Ok(())
    }

    /// Close the table. Idempotent.
    pub fn seal(&mut self) {
        self.phase = FactoryPhase::Sealed;
    }

    #[inline]
    pub fn phase(&self) -> FactoryPhase {
        self.phase
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registrations.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.registrations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build a default-configured condition of type `name`. Unknown types yield
    /// an inert, invalid condition rather than an error.
    pub fn create(&self, name: &str) -> Condition {
        match self.registrations.get(name) {
            Some(reg) => {
                let condition = Condition::from_boxed((reg.constructor)());
                match &reg.plugin {
                    Some(plugin) => condition.required_plugin(plugin.clone()),
                    None => condition,
                }
            }
            None => {
                warn!("unknown condition type '{name}'; condition will be inert");
                Condition::new(Invalid {
                    type_name: name.to_string(),
                })
            }
        }
    }
}

impl Default for ConditionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConditionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionFactory")
            .field("phase", &self.phase)
            .field("types", &self.names())
            .finish()
    }
}
