//! Host-side view of the in-game subject a clip plays on, plus form references.
//!
//! Conditions never touch the host engine directly; every query goes through
//! [`Subject`]. Default methods answer "unknown", so hosts only implement what
//! their condition types need.

use crate::ids::SubjectId;
use serde::{Deserialize, Serialize};

/// Resolved, runtime identity of a game form.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FormId(pub u32);

/// Authoring-time reference to a form: plugin file plus local id.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FormRef {
    pub plugin: String,
    pub local_id: u32,
}

impl FormRef {
    pub fn new(plugin: impl Into<String>, local_id: u32) -> Self {
        Self {
            plugin: plugin.into(),
            local_id,
        }
    }
}

/// Resolves authoring-time form references into runtime ids.
pub trait FormResolver {
    fn resolve(&self, form: &FormRef) -> Option<FormId>;
}

/// The subject conditions evaluate against.
pub trait Subject: Send + Sync {
    fn id(&self) -> SubjectId;

    /// True if the subject is, or is based on, `form`.
    fn is_form(&self, _form: FormId) -> bool {
        false
    }

    fn has_keyword(&self, _keyword: &str) -> bool {
        false
    }

    fn actor_value(&self, _name: &str) -> Option<f32> {
        None
    }

    fn graph_float(&self, _name: &str) -> Option<f32> {
        None
    }

    fn graph_bool(&self, _name: &str) -> Option<bool> {
        None
    }

    fn global_value(&self, _global: FormId) -> Option<f32> {
        None
    }
}
