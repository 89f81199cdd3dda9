//! Sibling clips under one replacement, chosen by weighted roll or in sequence.
//!
//! Derived pools are rebuilt after every mutation, so selection only ever sees
//! a consistent view:
//! - `active`: enabled variants, presentation order
//! - `random_pool` + `cumulative_weights`: random mode, non-play-once variants,
//!   weights normalized so the last entry is 1.0
//! - `sequential`: sequential mode pool, or the play-once queue in random mode
//!
//! Bookkeeping (play-once history, sequence position) is either private to the
//! clip or shared through the scoped store. Shared state is advanced only by the
//! leading clip: the first live entry of a FIFO of weak clip references.

use crate::condition::EvalContext;
use crate::error::{ReplacerError, Result};
use crate::ids::ReplacementId;
use crate::state::{ClipRef, ScopedState, StateDataScope, StateOwner};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Clip binding index this variant plays.
    pub index: u16,
    pub filename: String,
    pub weight: f32,
    /// Presentation order, kept equal to the variant's position.
    pub order: usize,
    pub disabled: bool,
    pub play_once: bool,
}

impl Variant {
    pub fn new(index: u16, filename: impl Into<String>) -> Self {
        Self {
            index,
            filename: filename.into(),
            weight: 1.0,
            order: 0,
            disabled: false,
            play_once: false,
        }
    }

    pub fn weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn play_once(mut self, play_once: bool) -> Self {
        self.play_once = play_once;
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    #[inline]
    fn effective_weight(&self) -> f32 {
        if self.weight.is_finite() {
            self.weight.max(0.0)
        } else {
            0.0
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariantMode {
    #[default]
    Random,
    Sequential,
}

/// Result of a selection: the clip to bind and the chosen variant's position.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VariantPick {
    pub clip_index: u16,
    pub variant: usize,
}

/// Play-once history and sequence position for one variant group.
#[derive(Clone, Debug, Default)]
pub struct VariantStateData {
    played: Vec<bool>,
    next: usize,
    current: Option<usize>,
    leaders: VecDeque<ClipRef>,
    sequential: bool,
}

impl VariantStateData {
    pub fn new(sequential: bool) -> Self {
        Self {
            sequential,
            ..Self::default()
        }
    }

    fn fit(&mut self, len: usize) {
        if self.played.len() != len {
            self.played.resize(len, false);
        }
    }

    pub fn has_played(&self, variant: usize) -> bool {
        self.played.get(variant).copied().unwrap_or(false)
    }

    fn mark_played(&mut self, variant: usize) {
        if let Some(slot) = self.played.get_mut(variant) {
            *slot = true;
        }
    }

    pub fn clear_history(&mut self) {
        self.played.iter_mut().for_each(|p| *p = false);
    }

    /// Variant picked most recently.
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Register `clip` and report whether it is the leader: the first live
    /// entry after pruning expired ones.
    pub fn claim_leadership(&mut self, clip: &ClipRef) -> bool {
        self.leaders.retain(ClipRef::is_alive);
        if !self.leaders.iter().any(|c| c.handle() == clip.handle()) {
            self.leaders.push_back(clip.clone());
        }
        self.leaders
            .front()
            .is_some_and(|leader| leader.handle() == clip.handle())
    }
}

impl ScopedState for VariantStateData {
    fn wants_loop_or_echo(&self, _is_echo: bool) -> bool {
        // Live looping clips will come back to advance the sequence.
        self.sequential
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct Variants {
    mode: VariantMode,
    scope: StateDataScope,
    blend_between_variants: bool,
    variants: Vec<Variant>,

    active: Vec<usize>,
    random_pool: Vec<usize>,
    cumulative_weights: Vec<f32>,
    sequential: Vec<usize>,
}

impl Variants {
    pub fn new(mode: VariantMode, variants: Vec<Variant>) -> Self {
        let mut group = Self {
            mode,
            blend_between_variants: true,
            variants,
            ..Self::default()
        };
        group.recompute();
        group
    }

    pub fn with_scope(mut self, scope: StateDataScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_blend_between_variants(mut self, blend: bool) -> Self {
        self.blend_between_variants = blend;
        self
    }

    fn recompute(&mut self) {
        for (position, variant) in self.variants.iter_mut().enumerate() {
            variant.order = position;
        }
        self.active = (0..self.variants.len())
            .filter(|&i| !self.variants[i].disabled)
            .collect();

        self.random_pool.clear();
        self.cumulative_weights.clear();
        match self.mode {
            VariantMode::Sequential => {
                self.sequential = self.active.clone();
            }
            VariantMode::Random => {
                self.sequential = self
                    .active
                    .iter()
                    .copied()
                    .filter(|&i| self.variants[i].play_once)
                    .collect();
                let pool: Vec<usize> = self
                    .active
                    .iter()
                    .copied()
                    .filter(|&i| !self.variants[i].play_once)
                    .collect();
                let total: f32 = pool.iter().map(|&i| self.variants[i].effective_weight()).sum();
                if total > 0.0 {
                    let mut running = 0.0;
                    for &i in &pool {
                        running += self.variants[i].effective_weight();
                        self.cumulative_weights.push(running / total);
                    }
                    if let Some(last) = self.cumulative_weights.last_mut() {
                        *last = 1.0;
                    }
                    self.random_pool = pool;
                }
            }
        }
    }

    #[inline]
    pub fn mode(&self) -> VariantMode {
        self.mode
    }

    #[inline]
    pub fn scope(&self) -> StateDataScope {
        self.scope
    }

    #[inline]
    pub fn blend_between_variants(&self) -> bool {
        self.blend_between_variants
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn get(&self, variant: usize) -> Option<&Variant> {
        self.variants.get(variant)
    }

    /// Enabled variant positions in presentation order.
    pub fn active(&self) -> &[usize] {
        &self.active
    }

    pub fn cumulative_weights(&self) -> &[f32] {
        &self.cumulative_weights
    }

    pub fn random_pool(&self) -> &[usize] {
        &self.random_pool
    }

    pub fn sequential_pool(&self) -> &[usize] {
        &self.sequential
    }

    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    /// Position of the variant binding `clip_index`, if any.
    pub fn position_of(&self, clip_index: u16) -> Option<usize> {
        self.variants.iter().position(|v| v.index == clip_index)
    }

    fn check(&self, variant: usize) -> Result<()> {
        if variant < self.variants.len() {
            Ok(())
        } else {
            Err(ReplacerError::VariantIndexOutOfRange {
                index: variant,
                len: self.variants.len(),
            })
        }
    }

    pub fn push(&mut self, variant: Variant) {
        self.variants.push(variant);
        self.recompute();
    }

    pub fn set_mode(&mut self, mode: VariantMode) {
        self.mode = mode;
        self.recompute();
    }

    pub fn set_scope(&mut self, scope: StateDataScope) {
        self.scope = scope;
    }

    pub fn set_blend_between_variants(&mut self, blend: bool) {
        self.blend_between_variants = blend;
    }

    pub fn set_disabled(&mut self, variant: usize, disabled: bool) -> Result<()> {
        self.check(variant)?;
        self.variants[variant].disabled = disabled;
        self.recompute();
        Ok(())
    }

    pub fn set_weight(&mut self, variant: usize, weight: f32) -> Result<()> {
        self.check(variant)?;
        self.variants[variant].weight = weight;
        self.recompute();
        Ok(())
    }

    pub fn set_play_once(&mut self, variant: usize, play_once: bool) -> Result<()> {
        self.check(variant)?;
        self.variants[variant].play_once = play_once;
        self.recompute();
        Ok(())
    }

    pub fn move_variant(&mut self, from: usize, to: usize) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        let variant = self.variants.remove(from);
        self.variants.insert(to, variant);
        self.recompute();
        Ok(())
    }

    /// Whether the sequence has been walked to its end since the last wrap.
    pub fn sequence_finished(&self, state: &VariantStateData) -> bool {
        state.next >= self.sequential.len()
    }

    /// Index into the random pool for a roll in `[0, 1)`.
    pub fn random_slot(&self, roll: f32) -> Option<usize> {
        if self.random_pool.is_empty() {
            return None;
        }
        let slot = self.cumulative_weights.partition_point(|&c| c <= roll);
        Some(slot.min(self.random_pool.len() - 1))
    }

    fn pick(&self, variant: usize) -> VariantPick {
        VariantPick {
            clip_index: self.variants[variant].index,
            variant,
        }
    }

    fn eligible(&self, state: &VariantStateData, variant: usize) -> bool {
        !(self.variants[variant].play_once && state.has_played(variant))
    }

    fn take(&self, state: &mut VariantStateData, position: usize) -> usize {
        let variant = self.sequential[position];
        state.next = position + 1;
        if self.variants[variant].play_once {
            state.mark_played(variant);
        }
        variant
    }

    fn next_sequential(&self, state: &mut VariantStateData) -> Option<usize> {
        if self.sequential.is_empty() {
            return None;
        }
        let start = state.next.min(self.sequential.len());
        let found = (start..self.sequential.len())
            .chain(0..start)
            .find(|&pos| self.eligible(state, self.sequential[pos]));
        match found {
            Some(position) => Some(self.take(state, position)),
            None => {
                // Every entry is a play-once that already fired: new cycle.
                state.clear_history();
                Some(self.take(state, 0))
            }
        }
    }

    fn next_random<F>(&self, state: &mut VariantStateData, roll: F) -> Option<usize>
    where
        F: FnOnce() -> f32,
    {
        if let Some(&variant) = self
            .sequential
            .iter()
            .find(|&&v| !state.has_played(v))
        {
            state.mark_played(variant);
            return Some(variant);
        }
        if !self.random_pool.is_empty() {
            if let Some(slot) = self.random_slot(roll()) {
                return Some(self.random_pool[slot]);
            }
        }
        let &first = self.sequential.first()?;
        state.clear_history();
        state.mark_played(first);
        Some(first)
    }

    /// Core selection against explicit state and a lazily drawn roll.
    pub fn select_with<F>(&self, state: &mut VariantStateData, roll: F) -> Option<VariantPick>
    where
        F: FnOnce() -> f32,
    {
        if self.active.is_empty() {
            return None;
        }
        state.fit(self.variants.len());
        let variant = match self.mode {
            VariantMode::Sequential => self.next_sequential(state)?,
            VariantMode::Random => self.next_random(state, roll)?,
        };
        state.current = Some(variant);
        Some(self.pick(variant))
    }

    /// Select a clip for the replacement `owner`.
    ///
    /// `private` is the clip's own bookkeeping, used when the declared scope does
    /// not resolve to a shared store entry. Fails closed with `None` when no
    /// variant is enabled.
    pub fn select(
        &self,
        owner: ReplacementId,
        ctx: &mut EvalContext<'_>,
        private: &mut VariantStateData,
    ) -> Option<VariantPick> {
        if self.active.is_empty() {
            return None;
        }
        let key = ctx.sharing().variants_key(owner);
        let sequential = self.mode == VariantMode::Sequential;
        let shared = ctx.scoped_state(StateOwner::Variants(owner), self.scope, || {
            VariantStateData::new(sequential)
        });

        let Some(handle) = shared else {
            return self.select_with(private, || ctx.random(key));
        };

        let mut guard = handle.lock();
        let Some(state) = guard.as_any_mut().downcast_mut::<VariantStateData>() else {
            return self.select_with(private, || ctx.random(key));
        };
        let leading = match ctx.clip() {
            Some(clip) => state.claim_leadership(clip),
            None => true,
        };
        if !leading {
            if let Some(current) = state.current.filter(|&v| v < self.variants.len()) {
                if !self.variants[current].disabled {
                    return Some(self.pick(current));
                }
            }
        }
        self.select_with(state, || ctx.random(key))
    }

    /// Whether a sequential group still has variants to walk before a full
    /// re-evaluation is due. Uses the same state resolution as [`Self::select`].
    pub fn sequence_pending(
        &self,
        owner: ReplacementId,
        ctx: &EvalContext<'_>,
        private: &VariantStateData,
    ) -> bool {
        if self.mode != VariantMode::Sequential || self.active.is_empty() {
            return false;
        }
        let Some(key) = ctx.state_key(StateOwner::Variants(owner), self.scope) else {
            return !self.sequence_finished(private);
        };
        let Some(handle) = ctx.states.access(&key, ctx.clip()) else {
            return false;
        };
        let guard = handle.lock();
        guard
            .as_any()
            .downcast_ref::<VariantStateData>()
            .is_some_and(|state| !self.sequence_finished(state))
    }
}
