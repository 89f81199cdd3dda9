//! Typed building blocks shared by condition predicates.

use crate::state::StateDataScope;
use crate::subject::{FormId, FormRef, FormResolver, Subject};
use serde::{Deserialize, Serialize};

/// A form reference plus its runtime resolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormComponent {
    pub form: FormRef,
    #[serde(skip)]
    resolved: Option<FormId>,
}

impl FormComponent {
    pub fn new(form: FormRef) -> Self {
        Self {
            form,
            resolved: None,
        }
    }

    /// Component that is already resolved, for hosts that skip the resolution pass.
    pub fn resolved(form: FormRef, id: FormId) -> Self {
        Self {
            form,
            resolved: Some(id),
        }
    }

    pub fn resolve(&mut self, resolver: &dyn FormResolver) {
        self.resolved = resolver.resolve(&self.form);
    }

    #[inline]
    pub fn id(&self) -> Option<FormId> {
        self.resolved
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.resolved.is_some()
    }
}

impl Default for FormComponent {
    fn default() -> Self {
        Self::new(FormRef::new("", 0))
    }
}

/// Source of a number read at evaluation time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NumericComponent {
    Static(f32),
    ActorValue(String),
    GraphFloat(String),
    Global(FormComponent),
}

impl NumericComponent {
    pub fn value(&self, subject: &dyn Subject) -> Option<f32> {
        match self {
            Self::Static(v) => Some(*v),
            Self::ActorValue(name) => subject.actor_value(name),
            Self::GraphFloat(name) => subject.graph_float(name),
            Self::Global(form) => form.id().and_then(|id| subject.global_value(id)),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Self::Static(v) => v.is_finite(),
            Self::ActorValue(name) | Self::GraphFloat(name) => !name.is_empty(),
            Self::Global(form) => form.is_valid(),
        }
    }

    pub fn resolve(&mut self, resolver: &dyn FormResolver) {
        if let Self::Global(form) = self {
            form.resolve(resolver);
        }
    }
}

impl Default for NumericComponent {
    fn default() -> Self {
        Self::Static(0.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordComponent(pub String);

impl KeywordComponent {
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextComponent(pub String);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolComponent(pub bool);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    #[default]
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    pub fn apply(self, a: f32, b: f32) -> bool {
        match self {
            Self::Eq => a == b,
            Self::Ne => a != b,
            Self::Gt => a > b,
            Self::Ge => a >= b,
            Self::Lt => a < b,
            Self::Le => a <= b,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

/// Declares that a condition keeps state in the scoped store.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateComponent {
    pub scope: StateDataScope,
    pub reset_on_loop: bool,
    pub reset_on_echo: bool,
}
