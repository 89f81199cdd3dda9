//! Boolean condition tree.
//!
//! A [`Condition`] wraps one [`Predicate`] with the flags every condition shares
//! (negated, disabled, fallback). Predicates are trait objects so that extension
//! modules can contribute their own types through the [`ConditionFactory`].
//!
//! Evaluation order for a single condition:
//! 1. disabled => `true`, predicate not consulted
//! 2. predicate has an invalid reference => configured fallback
//! 3. predicate result, inverted when negated

pub mod builtin;
pub mod components;
pub mod factory;
pub mod set;

pub use builtin::{
    And, CompareBool, CompareValues, HasKeyword, Invalid, IsForm, Or, Random, RandomState, Xor,
};
pub use components::{
    BoolComponent, Comparison, FormComponent, KeywordComponent, NumericComponent,
    StateComponent, TextComponent,
};
pub use factory::{ConditionFactory, FactoryPhase, PredicateConstructor};
pub use set::{ConditionSet, SetOwner};

use crate::ids::{ConditionId, ConditionIds, ModId, RuleSetId};
use crate::random::{RandomKey, RandomMemo, RandomSharing, RandomSource};
use crate::state::{
    ClipRef, ScopeOwners, ScopedState, ScopedStateStore, StateDataScope, StateHandle, StateKey,
    StateOwner,
};
use crate::subject::{FormResolver, Subject};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Native module a condition type was contributed by.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredPlugin {
    pub name: String,
    pub version: u32,
}

/// Everything a predicate may consult while evaluating.
pub struct EvalContext<'a> {
    pub subject: &'a dyn Subject,
    pub states: &'a ScopedStateStore,
    pub rng: &'a dyn RandomSource,
    memo: &'a mut RandomMemo,
    clip: Option<ClipRef>,
    sharing: RandomSharing,
    owners: ScopeOwners,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        subject: &'a dyn Subject,
        states: &'a ScopedStateStore,
        rng: &'a dyn RandomSource,
        memo: &'a mut RandomMemo,
    ) -> Self {
        Self {
            subject,
            states,
            rng,
            memo,
            clip: None,
            sharing: RandomSharing::PerCondition,
            owners: ScopeOwners::default(),
        }
    }

    /// Attach the playing instance this evaluation runs for.
    pub fn with_clip(mut self, clip: ClipRef) -> Self {
        self.owners.clip = Some(clip.handle());
        self.clip = Some(clip);
        self
    }

    /// Switch to the rule set whose conditions are evaluated next. Resolves the
    /// random sharing strategy once for the whole pass over that rule set.
    pub fn enter_rule_set(&mut self, rule_set: RuleSetId, mod_id: ModId, share_random: bool) {
        self.owners.rule_set = Some(rule_set);
        self.owners.mod_id = Some(mod_id);
        self.sharing = if share_random {
            RandomSharing::SharedAcrossRuleSet(rule_set)
        } else {
            RandomSharing::PerCondition
        };
    }

    pub fn leave_rule_set(&mut self) {
        self.owners.rule_set = None;
        self.owners.mod_id = None;
        self.sharing = RandomSharing::PerCondition;
    }

    #[inline]
    pub fn clip(&self) -> Option<&ClipRef> {
        self.clip.as_ref()
    }

    #[inline]
    pub fn owners(&self) -> &ScopeOwners {
        &self.owners
    }

    #[inline]
    pub fn sharing(&self) -> RandomSharing {
        self.sharing
    }

    /// Memoized roll for a random condition. A condition without an id has
    /// nothing to memoize under and rolls afresh unless its rule set shares.
    pub fn random_for(&mut self, id: ConditionId) -> f32 {
        if !id.is_assigned() && self.sharing == RandomSharing::PerCondition {
            return self.rng.next_f32();
        }
        let key = self.sharing.condition_key(id);
        self.memo.get_or_roll(key, self.rng)
    }

    /// Memoized roll for an arbitrary key.
    pub fn random(&mut self, key: RandomKey) -> f32 {
        self.memo.get_or_roll(key, self.rng)
    }

    /// Resolve the store key for `owner` under `scope`, or `None` if the scope
    /// cannot be resolved in this context.
    pub fn state_key(&self, owner: StateOwner, scope: StateDataScope) -> Option<StateKey> {
        let scope = scope.resolve(&self.owners)?;
        Some(StateKey {
            subject: self.subject.id(),
            owner,
            scope,
        })
    }

    /// Fetch, or lazily create, scoped state for `owner`.
    pub fn scoped_state<S, F>(
        &self,
        owner: StateOwner,
        scope: StateDataScope,
        init: F,
    ) -> Option<StateHandle>
    where
        S: ScopedState,
        F: FnOnce() -> S,
    {
        let key = self.state_key(owner, scope)?;
        Some(self.states.access_or_create(key, self.clip.as_ref(), init))
    }
}

impl fmt::Debug for EvalContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("subject", &self.subject.id())
            .field("clip", &self.owners.clip)
            .field("rule_set", &self.owners.rule_set)
            .field("sharing", &self.sharing)
            .finish()
    }
}

/// A condition-specific boolean test.
pub trait Predicate: Send + Sync + fmt::Debug {
    /// Factory name of this predicate type.
    fn name(&self) -> &str;

    fn evaluate(&self, id: ConditionId, ctx: &mut EvalContext<'_>) -> bool;

    /// Whether this predicate's own references resolve. Nested sets are checked
    /// separately by [`Condition::is_valid`].
    fn is_valid(&self) -> bool {
        true
    }

    fn resolve_forms(&mut self, _resolver: &dyn FormResolver) {}

    fn nested(&self) -> Option<&ConditionSet> {
        None
    }

    fn nested_mut(&mut self) -> Option<&mut ConditionSet> {
        None
    }

    /// One-line human readable summary for editors and logs.
    fn describe(&self) -> String {
        self.name().to_string()
    }
}

#[derive(Debug)]
pub struct Condition {
    id: ConditionId,
    negated: bool,
    disabled: bool,
    fallback: bool,
    required_plugin: Option<RequiredPlugin>,
    predicate: Box<dyn Predicate>,
}

impl Condition {
    pub fn new<P: Predicate + 'static>(predicate: P) -> Self {
        Self::from_boxed(Box::new(predicate))
    }

    /// A fresh condition has no id until a registry adopts it; see
    /// [`Condition::assign_ids`].
    pub fn from_boxed(mut predicate: Box<dyn Predicate>) -> Self {
        let id = ConditionId::UNASSIGNED;
        if let Some(nested) = predicate.nested_mut() {
            nested.set_owner(SetOwner::Condition(id));
        }
        Self {
            id,
            negated: false,
            disabled: false,
            fallback: false,
            required_plugin: None,
            predicate,
        }
    }

    pub fn negated(mut self, negated: bool) -> Self {
        self.negated = negated;
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Result used while the predicate is invalid.
    pub fn fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn required_plugin(mut self, plugin: RequiredPlugin) -> Self {
        self.required_plugin = Some(plugin);
        self
    }

    pub fn evaluate(&self, ctx: &mut EvalContext<'_>) -> bool {
        if self.disabled {
            return true;
        }
        if !self.predicate.is_valid() {
            return self.fallback;
        }
        self.predicate.evaluate(self.id, ctx) != self.negated
    }

    /// Recursive validity: this predicate and every nested condition.
    pub fn is_valid(&self) -> bool {
        self.predicate.is_valid() && self.predicate.nested().map_or(true, ConditionSet::is_valid)
    }

    /// Give this condition, and every nested one still unassigned, an id from
    /// `ids`. Already assigned ids are kept so stored state stays reachable.
    pub fn assign_ids(&mut self, ids: &ConditionIds) {
        if !self.id.is_assigned() {
            self.id = ids.next();
        }
        let id = self.id;
        if let Some(nested) = self.predicate.nested_mut() {
            nested.set_owner(SetOwner::Condition(id));
            nested.assign_ids(ids);
        }
    }

    pub fn resolve_forms(&mut self, resolver: &dyn FormResolver) {
        self.predicate.resolve_forms(resolver);
        if let Some(nested) = self.predicate.nested_mut() {
            nested.resolve_forms(resolver);
        }
    }

    #[inline]
    pub fn id(&self) -> ConditionId {
        self.id
    }

    #[inline]
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn fallback_result(&self) -> bool {
        self.fallback
    }

    pub fn plugin(&self) -> Option<&RequiredPlugin> {
        self.required_plugin.as_ref()
    }

    pub fn name(&self) -> &str {
        self.predicate.name()
    }

    pub fn predicate(&self) -> &dyn Predicate {
        self.predicate.as_ref()
    }

    pub fn nested(&self) -> Option<&ConditionSet> {
        self.predicate.nested()
    }

    pub(crate) fn nested_mut(&mut self) -> Option<&mut ConditionSet> {
        self.predicate.nested_mut()
    }

    pub(crate) fn set_negated(&mut self, negated: bool) {
        self.negated = negated;
    }

    pub(crate) fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    pub fn describe(&self) -> String {
        let body = self.predicate.describe();
        match (self.disabled, self.negated) {
            (true, _) => format!("[disabled] {body}"),
            (false, true) => format!("NOT {body}"),
            (false, false) => body,
        }
    }
}
