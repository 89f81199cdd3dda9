//! Animation replacement resolution engine (host-agnostic).
//!
//! Decides, for every playing animation instance, which concrete clip plays in
//! place of the original one. Three tightly coupled parts:
//! - the condition tree ([`condition`]) that rule sets are written in,
//! - variant selection ([`variants`]) with scoped, shared, time-limited state ([`state`]),
//! - the per-instance state machine ([`active_clip`]) driven by host events
//!   through the [`Replacer`] core object.

pub mod active_clip;
pub mod condition;
pub mod config;
pub mod error;
pub mod history;
pub mod ids;
pub mod playback;
pub mod random;
pub mod replacement;
pub mod replacer;
pub mod state;
pub mod subject;
pub mod variants;

// Re-exports for hosts and loaders
pub use active_clip::{
    ActiveClip, BlendSource, ClipEnv, ClipPhase, Decision, DestroyListener, QueuedReplacement,
    Reactivation, Transition, TransitionKind,
};
pub use condition::{
    Condition, ConditionFactory, ConditionSet, EvalContext, FactoryPhase, Predicate,
    RequiredPlugin, SetOwner,
};
pub use config::Config;
pub use error::{ReplacerError, Result};
pub use history::{HistoryEntry, ReplacementHistory};
pub use ids::{
    ClipHandle, ConditionId, ConditionIds, ModId, ReplacementId, RuleSetId, SubjectId, SyncGroupId,
};
pub use playback::{
    ClipFlags, ClipPlayback, OriginalBinding, PlaybackMode, PoseBlender, PoseHandle,
    TriggerAnnotation,
};
pub use random::{RandomKey, RandomMemo, RandomSharing, RandomSource, StdRandom};
pub use replacement::{
    normalize_project_path, AnimationReplacements, BlendOverrides, ClipChoice, ReplacementAnimation,
    ReplacementClip, ReplacementRegistry, RuleSet, RuleSetSettings, TransitionTrigger,
};
pub use replacer::{Replacer, SyncParticipant, WeakClip};
pub use state::{
    ClipRef, ClipToken, ScopeKey, ScopeOwners, ScopedState, ScopedStateStore, StateDataScope,
    StateHandle, StateKey, StateOwner,
};
pub use subject::{FormId, FormRef, FormResolver, Subject};
pub use variants::{Variant, VariantMode, VariantPick, VariantStateData, Variants};
