//! Ordered condition collections.
//!
//! Insertion order matters: [`ConditionSet::evaluate_all`] short-circuits left to
//! right, so cheap or frequently-false conditions placed first save work and,
//! for random conditions, decide which rolls are made at all.
//!
//! Every mutation marks the set dirty. Owners read and clear the flag to know
//! when to revalidate.

use super::{Condition, EvalContext};
use crate::error::{ReplacerError, Result};
use crate::ids::{ConditionId, ConditionIds, ReplacementId, RuleSetId};
use crate::subject::FormResolver;

/// Which entity a set belongs to, used for diagnostics and scope lookups.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SetOwner {
    #[default]
    Detached,
    RuleSet(RuleSetId),
    Replacement(ReplacementId),
    Condition(ConditionId),
}

#[derive(Debug, Default)]
pub struct ConditionSet {
    conditions: Vec<Condition>,
    owner: SetOwner,
    dirty: bool,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_conditions(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            ..Self::default()
        }
    }

    #[inline]
    pub fn owner(&self) -> SetOwner {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: SetOwner) {
        self.owner = owner;
    }

    /// Logical AND, short-circuiting on the first `false`. Empty sets are `true`.
    pub fn evaluate_all(&self, ctx: &mut EvalContext<'_>) -> bool {
        self.conditions.iter().all(|c| c.evaluate(ctx))
    }

    /// Inclusive OR over the enabled members, short-circuiting on the first `true`.
    /// A set without enabled members is inert and evaluates `true`.
    pub fn evaluate_any(&self, ctx: &mut EvalContext<'_>) -> bool {
        let mut any_enabled = false;
        for condition in self.conditions.iter().filter(|c| !c.is_disabled()) {
            any_enabled = true;
            if condition.evaluate(ctx) {
                return true;
            }
        }
        !any_enabled
    }

    /// Exclusive OR: exactly one enabled member is `true`.
    /// A set without enabled members is inert and evaluates `true`.
    pub fn evaluate_one(&self, ctx: &mut EvalContext<'_>) -> bool {
        let mut any_enabled = false;
        let mut hits = 0usize;
        for condition in self.conditions.iter().filter(|c| !c.is_disabled()) {
            any_enabled = true;
            if condition.evaluate(ctx) {
                hits += 1;
                if hits > 1 {
                    return false;
                }
            }
        }
        !any_enabled || hits == 1
    }

    /// True only if every condition, recursively, is valid.
    pub fn is_valid(&self) -> bool {
        self.conditions.iter().all(Condition::is_valid)
    }

    pub fn assign_ids(&mut self, ids: &ConditionIds) {
        for condition in &mut self.conditions {
            condition.assign_ids(ids);
        }
    }

    pub fn resolve_forms(&mut self, resolver: &dyn FormResolver) {
        for condition in &mut self.conditions {
            condition.resolve_forms(resolver);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Condition> {
        self.conditions.get(index)
    }

    pub fn position(&self, id: ConditionId) -> Option<usize> {
        self.conditions.iter().position(|c| c.id() == id)
    }

    /// Depth-first search for a condition anywhere below this set.
    pub fn find(&self, id: ConditionId) -> Option<&Condition> {
        for condition in &self.conditions {
            if condition.id() == id {
                return Some(condition);
            }
            if let Some(found) = condition.nested().and_then(|n| n.find(id)) {
                return Some(found);
            }
        }
        None
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty || self.conditions.iter().any(|c| c.nested().is_some_and(ConditionSet::is_dirty))
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the dirty flag here and in every nested set.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
        for condition in &mut self.conditions {
            if let Some(nested) = condition.nested_mut() {
                nested.clear_dirty();
            }
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.conditions.len() {
            Ok(())
        } else {
            Err(ReplacerError::ConditionIndexOutOfRange {
                index,
                len: self.conditions.len(),
            })
        }
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
        self.dirty = true;
    }

    pub fn insert(&mut self, index: usize, condition: Condition) -> Result<()> {
        if index > self.conditions.len() {
            return Err(ReplacerError::ConditionIndexOutOfRange {
                index,
                len: self.conditions.len(),
            });
        }
        self.conditions.insert(index, condition);
        self.dirty = true;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Condition> {
        self.check_index(index)?;
        self.dirty = true;
        Ok(self.conditions.remove(index))
    }

    /// Move the condition at `from` so that it ends up at index `to`.
    pub fn move_condition(&mut self, from: usize, to: usize) -> Result<()> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from != to {
            let condition = self.conditions.remove(from);
            self.conditions.insert(to, condition);
            self.dirty = true;
        }
        Ok(())
    }

    pub fn replace(&mut self, index: usize, condition: Condition) -> Result<Condition> {
        self.check_index(index)?;
        self.dirty = true;
        Ok(std::mem::replace(&mut self.conditions[index], condition))
    }

    pub fn set_negated(&mut self, index: usize, negated: bool) -> Result<()> {
        self.check_index(index)?;
        self.conditions[index].set_negated(negated);
        self.dirty = true;
        Ok(())
    }

    pub fn set_disabled(&mut self, index: usize, disabled: bool) -> Result<()> {
        self.check_index(index)?;
        self.conditions[index].set_disabled(disabled);
        self.dirty = true;
        Ok(())
    }

    /// Nested set of the combinator at `index`, for editing inside it.
    pub fn nested_mut(&mut self, index: usize) -> Option<&mut ConditionSet> {
        self.conditions.get_mut(index)?.nested_mut()
    }
}
