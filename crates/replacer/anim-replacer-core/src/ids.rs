//! Identifiers for core entities and the condition id allocator.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Native handle of a playing instance, as reported by the host.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClipHandle(pub u64);

/// In-game subject (the actor a clip plays on).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModId(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleSetId(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplacementId(pub u32);

/// Identity of a single condition node. Used as the key of random memos and
/// scoped condition state, so it must stay stable for the condition's lifetime.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConditionId(pub u64);

/// Group of clips that belong to one synchronized multi-actor animation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SyncGroupId(pub u64);

impl ConditionId {
    /// Id of a condition that no registry has adopted yet.
    pub const UNASSIGNED: ConditionId = ConditionId(0);

    #[inline]
    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }
}

/// Hands out condition ids for one registry. Ids are unique per allocator,
/// never across engines.
#[derive(Debug)]
pub struct ConditionIds {
    next: AtomicU64,
}

impl ConditionIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn next(&self) -> ConditionId {
        ConditionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConditionIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocators_are_independent() {
        let a = ConditionIds::new();
        let b = ConditionIds::new();
        let first = a.next();
        assert!(first.is_assigned());
        assert_ne!(first, a.next());
        assert_eq!(b.next(), first);
        assert!(!ConditionId::UNASSIGNED.is_assigned());
    }
}
