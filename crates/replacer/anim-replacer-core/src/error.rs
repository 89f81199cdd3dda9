//! Error types for the editor and extension surfaces.
//!
//! Nothing on the evaluation, selection or clip state-machine path returns these:
//! that path always resolves to some animation decision.

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ReplacerError {
    /// Registration attempted after the factory table was sealed
    #[error("Condition factory is sealed; cannot register '{name}'")]
    FactorySealed { name: String },

    /// A condition type with this name already exists
    #[error("Condition type already registered: {name}")]
    DuplicateConditionType { name: String },

    /// Condition index outside the set
    #[error("Condition index {index} out of range (len {len})")]
    ConditionIndexOutOfRange { index: usize, len: usize },

    /// Variant index outside the group
    #[error("Variant index {index} out of range (len {len})")]
    VariantIndexOutOfRange { index: usize, len: usize },

    /// Replacement has a single clip, not a variant group
    #[error("Replacement {id} has no variants")]
    NotAVariantGroup { id: u32 },

    /// No candidate list registered for this project/slot
    #[error("No replacements for slot {slot} in project '{project}'")]
    UnknownSlot { project: String, slot: u16 },

    /// No rule set with this id is registered
    #[error("Rule set not found: {id}")]
    RuleSetNotFound { id: u32 },

    /// The slot has no candidate with this id
    #[error("Replacement {id} not found in slot {slot}")]
    ReplacementNotFound { id: u32, slot: u16 },
}

impl ReplacerError {
    /// Category name for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::FactorySealed { .. } | Self::DuplicateConditionType { .. } => "registration",
            Self::ConditionIndexOutOfRange { .. }
            | Self::VariantIndexOutOfRange { .. }
            | Self::NotAVariantGroup { .. } => "edit",
            Self::UnknownSlot { .. }
            | Self::RuleSetNotFound { .. }
            | Self::ReplacementNotFound { .. } => "lookup",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplacerError>;
