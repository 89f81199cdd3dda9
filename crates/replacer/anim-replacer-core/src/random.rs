//! Random draws and the per-epoch memo that keeps them stable.
//!
//! A roll is made at most once per key per epoch. An epoch ends when the owning
//! clip loops or echoes (unless the replacement keeps its results), so every
//! consumer of one random condition inside one evaluation pass sees the same value.

use crate::ids::{ConditionId, ReplacementId, RuleSetId};
use hashbrown::HashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    fn next_f32(&self) -> f32;
}

/// Production source backed by a seedable `StdRng`.
#[derive(Debug)]
pub struct StdRandom {
    rng: Mutex<StdRng>,
}

impl StdRandom {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for StdRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for StdRandom {
    fn next_f32(&self) -> f32 {
        self.rng.lock().gen::<f32>()
    }
}

/// Memo key of one random roll.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RandomKey {
    Condition(ConditionId),
    Variants(ReplacementId),
    RuleSet(RuleSetId),
}

/// How random results are partitioned, chosen per rule set.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RandomSharing {
    /// Every random condition and variant group rolls on its own.
    PerCondition,
    /// Everything random inside the rule set shares one roll per epoch.
    SharedAcrossRuleSet(RuleSetId),
}

impl RandomSharing {
    #[inline]
    pub fn condition_key(&self, id: ConditionId) -> RandomKey {
        match self {
            Self::PerCondition => RandomKey::Condition(id),
            Self::SharedAcrossRuleSet(rs) => RandomKey::RuleSet(*rs),
        }
    }

    #[inline]
    pub fn variants_key(&self, id: ReplacementId) -> RandomKey {
        match self {
            Self::PerCondition => RandomKey::Variants(id),
            Self::SharedAcrossRuleSet(rs) => RandomKey::RuleSet(*rs),
        }
    }
}

/// Already-rolled values for the current epoch.
#[derive(Clone, Debug, Default)]
pub struct RandomMemo {
    values: HashMap<RandomKey, f32>,
}

impl RandomMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the memoized roll for `key`, rolling on first access.
    pub fn get_or_roll(&mut self, key: RandomKey, rng: &dyn RandomSource) -> f32 {
        *self.values.entry(key).or_insert_with(|| rng.next_f32())
    }

    pub fn get(&self, key: RandomKey) -> Option<f32> {
        self.values.get(&key).copied()
    }

    /// End the epoch.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
