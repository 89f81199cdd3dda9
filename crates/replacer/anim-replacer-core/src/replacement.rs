//! Rule sets, replacement candidates and the per-slot candidate lists.
//!
//! Ownership is a strict tree: a [`RuleSet`] owns its [`ConditionSet`]; each
//! [`ReplacementAnimation`] holds its rule set; [`AnimationReplacements`] holds
//! the candidates for one original slot; [`ReplacementRegistry`] holds the lists
//! per behavior project. Nothing points back up.

use crate::condition::{ConditionSet, EvalContext, SetOwner};
use crate::error::{ReplacerError, Result};
use crate::ids::{ConditionIds, ModId, ReplacementId, RuleSetId};
use crate::subject::FormResolver;
use crate::variants::{VariantStateData, Variants};
use hashbrown::HashMap;
use log::{trace, warn};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Event that caused a transition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    Activate,
    Interrupt,
    Loop,
    Echo,
}

/// Per-event blend time overrides, in seconds.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendOverrides {
    pub interrupt: Option<f32>,
    #[serde(rename = "loop")]
    pub on_loop: Option<f32>,
    pub echo: Option<f32>,
}

impl BlendOverrides {
    pub fn for_trigger(&self, trigger: TransitionTrigger) -> Option<f32> {
        match trigger {
            TransitionTrigger::Activate => None,
            TransitionTrigger::Interrupt => self.interrupt,
            TransitionTrigger::Loop => self.on_loop,
            TransitionTrigger::Echo => self.echo,
        }
    }
}

/// Authoring metadata of a rule set. Replacements inherit all of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSetSettings {
    pub priority: i32,
    pub disabled: bool,
    pub interruptible: bool,
    pub replace_on_loop: bool,
    pub replace_on_echo: bool,
    pub keep_random_results_on_loop: bool,
    pub share_random_results: bool,
    pub blend_times: BlendOverrides,
    pub triggers_from_annotations_only: bool,
    pub ignore_dont_convert_annotations: bool,
}

impl Default for RuleSetSettings {
    fn default() -> Self {
        Self {
            priority: 0,
            disabled: false,
            interruptible: false,
            replace_on_loop: true,
            replace_on_echo: false,
            keep_random_results_on_loop: false,
            share_random_results: false,
            blend_times: BlendOverrides::default(),
            triggers_from_annotations_only: false,
            ignore_dont_convert_annotations: false,
        }
    }
}

#[derive(Debug)]
pub struct RuleSet {
    id: RuleSetId,
    mod_id: ModId,
    name: String,
    settings: RwLock<RuleSetSettings>,
    conditions: RwLock<ConditionSet>,
    valid: AtomicBool,
}

impl RuleSet {
    pub fn new(
        id: RuleSetId,
        mod_id: ModId,
        name: impl Into<String>,
        settings: RuleSetSettings,
        mut conditions: ConditionSet,
    ) -> Arc<Self> {
        conditions.set_owner(SetOwner::RuleSet(id));
        conditions.clear_dirty();
        let valid = conditions.is_valid();
        Arc::new(Self {
            id,
            mod_id,
            name: name.into(),
            settings: RwLock::new(settings),
            conditions: RwLock::new(conditions),
            valid: AtomicBool::new(valid),
        })
    }

    #[inline]
    pub fn id(&self) -> RuleSetId {
        self.id
    }

    #[inline]
    pub fn mod_id(&self) -> ModId {
        self.mod_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> RuleSetSettings {
        self.settings.read().clone()
    }

    pub fn priority(&self) -> i32 {
        self.settings.read().priority
    }

    pub fn is_disabled(&self) -> bool {
        self.settings.read().disabled
    }

    /// Edit settings in place. Callers that change the priority must re-sort the
    /// candidate lists (see `Replacer::update_rule_set`).
    pub fn update_settings<F: FnOnce(&mut RuleSetSettings)>(&self, edit: F) {
        edit(&mut self.settings.write());
    }

    /// Evaluate this rule set's conditions. The context is switched to this rule
    /// set's scope and random sharing strategy first.
    pub fn evaluate(&self, ctx: &mut EvalContext<'_>) -> bool {
        let share_random = self.settings.read().share_random_results;
        ctx.enter_rule_set(self.id, self.mod_id, share_random);
        let conditions = self.conditions.read();
        conditions.evaluate_all(ctx)
    }

    /// Read access for editors and diagnostics.
    pub fn conditions(&self) -> RwLockReadGuard<'_, ConditionSet> {
        self.conditions.read()
    }

    /// Run an edit against the condition set, then mark it dirty and revalidate
    /// this rule set only.
    pub fn edit_conditions<R, F>(&self, edit: F) -> Result<R>
    where
        F: FnOnce(&mut ConditionSet) -> Result<R>,
    {
        let mut conditions = self.conditions.write();
        let result = edit(&mut conditions);
        if result.is_ok() {
            conditions.mark_dirty();
        }
        if conditions.is_dirty() {
            self.revalidate(&mut conditions);
        }
        result
    }

    fn revalidate(&self, conditions: &mut ConditionSet) {
        let valid = conditions.is_valid();
        conditions.clear_dirty();
        if !valid {
            warn!("rule set '{}' ({:?}) has invalid conditions", self.name, self.id);
        }
        self.valid.store(valid, Ordering::Release);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Adopt every condition that has no id yet into `ids`.
    pub fn assign_condition_ids(&self, ids: &ConditionIds) {
        self.conditions.write().assign_ids(ids);
    }

    pub fn resolve_forms(&self, resolver: &dyn FormResolver) {
        let mut conditions = self.conditions.write();
        conditions.resolve_forms(resolver);
        self.revalidate(&mut conditions);
    }
}

/// What a replacement plays.
#[derive(Debug)]
pub enum ReplacementClip {
    Single { index: u16, filename: String },
    Variants(RwLock<Variants>),
}

/// The clip chosen for a replacement: binding index and variant position if any.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClipChoice {
    pub clip_index: u16,
    pub variant: Option<usize>,
}

#[derive(Debug)]
pub struct ReplacementAnimation {
    id: ReplacementId,
    original_slot: u16,
    clip: ReplacementClip,
    rule_set: Arc<RuleSet>,
    disabled: AtomicBool,
}

impl ReplacementAnimation {
    pub fn single(
        id: ReplacementId,
        original_slot: u16,
        index: u16,
        filename: impl Into<String>,
        rule_set: Arc<RuleSet>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            original_slot,
            clip: ReplacementClip::Single {
                index,
                filename: filename.into(),
            },
            rule_set,
            disabled: AtomicBool::new(false),
        })
    }

    pub fn with_variants(
        id: ReplacementId,
        original_slot: u16,
        variants: Variants,
        rule_set: Arc<RuleSet>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            original_slot,
            clip: ReplacementClip::Variants(RwLock::new(variants)),
            rule_set,
            disabled: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn id(&self) -> ReplacementId {
        self.id
    }

    #[inline]
    pub fn original_slot(&self) -> u16 {
        self.original_slot
    }

    pub fn rule_set(&self) -> &Arc<RuleSet> {
        &self.rule_set
    }

    pub fn priority(&self) -> i32 {
        self.rule_set.priority()
    }

    /// Disabled itself, through its rule set, or because no variant is enabled.
    pub fn is_disabled(&self) -> bool {
        if self.disabled.load(Ordering::Acquire) || self.rule_set.is_disabled() {
            return true;
        }
        match &self.clip {
            ReplacementClip::Single { .. } => false,
            ReplacementClip::Variants(variants) => !variants.read().has_active(),
        }
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Release);
    }

    pub fn has_variants(&self) -> bool {
        matches!(self.clip, ReplacementClip::Variants(_))
    }

    pub fn variants(&self) -> Option<RwLockReadGuard<'_, Variants>> {
        match &self.clip {
            ReplacementClip::Variants(variants) => Some(variants.read()),
            ReplacementClip::Single { .. } => None,
        }
    }

    /// Mutate the variant group; derived pools are rebuilt under the same lock.
    pub fn edit_variants<R, F>(&self, edit: F) -> Result<R>
    where
        F: FnOnce(&mut Variants) -> Result<R>,
    {
        match &self.clip {
            ReplacementClip::Variants(variants) => edit(&mut variants.write()),
            ReplacementClip::Single { .. } => Err(ReplacerError::NotAVariantGroup { id: self.id.0 }),
        }
    }

    /// Whether `clip_index` is one of the clips this replacement can play.
    pub fn plays(&self, clip_index: u16) -> bool {
        match &self.clip {
            ReplacementClip::Single { index, .. } => *index == clip_index,
            ReplacementClip::Variants(variants) => variants.read().position_of(clip_index).is_some(),
        }
    }

    /// Choose the clip to bind. `None` when a variant group has nothing to offer.
    pub fn select_clip(&self, ctx: &mut EvalContext<'_>, private: &mut VariantStateData) -> Option<ClipChoice> {
        match &self.clip {
            ReplacementClip::Single { index, .. } => Some(ClipChoice {
                clip_index: *index,
                variant: None,
            }),
            ReplacementClip::Variants(variants) => {
                let share_random = self.rule_set.settings.read().share_random_results;
                ctx.enter_rule_set(self.rule_set.id, self.rule_set.mod_id, share_random);
                let pick = variants.read().select(self.id, ctx, private)?;
                Some(ClipChoice {
                    clip_index: pick.clip_index,
                    variant: Some(pick.variant),
                })
            }
        }
    }

    /// Whether a sequential variant cycle is still in progress for this clip.
    pub fn sequence_pending(&self, ctx: &mut EvalContext<'_>, private: &VariantStateData) -> bool {
        match &self.clip {
            ReplacementClip::Variants(variants) => {
                let share_random = self.rule_set.settings.read().share_random_results;
                ctx.enter_rule_set(self.rule_set.id, self.rule_set.mod_id, share_random);
                variants.read().sequence_pending(self.id, ctx, private)
            }
            ReplacementClip::Single { .. } => false,
        }
    }

    /// Whether switching between two variants of this replacement should blend.
    pub fn blends_between_variants(&self) -> bool {
        match &self.clip {
            ReplacementClip::Variants(variants) => variants.read().blend_between_variants(),
            ReplacementClip::Single { .. } => true,
        }
    }

    pub fn blend_override(&self, trigger: TransitionTrigger) -> Option<f32> {
        self.rule_set.settings.read().blend_times.for_trigger(trigger)
    }

    pub fn interruptible(&self) -> bool {
        self.rule_set.settings.read().interruptible
    }

    pub fn replace_on_loop(&self) -> bool {
        self.rule_set.settings.read().replace_on_loop
    }

    pub fn replace_on_echo(&self) -> bool {
        self.rule_set.settings.read().replace_on_echo
    }

    pub fn keep_random_results_on_loop(&self) -> bool {
        self.rule_set.settings.read().keep_random_results_on_loop
    }

    pub fn triggers_from_annotations_only(&self) -> bool {
        self.rule_set.settings.read().triggers_from_annotations_only
    }

    pub fn ignore_dont_convert_annotations(&self) -> bool {
        self.rule_set.settings.read().ignore_dont_convert_annotations
    }
}

/// A candidate together with the order it entered its list.
#[derive(Clone, Debug)]
struct Ranked {
    seq: u64,
    candidate: Arc<ReplacementAnimation>,
}

/// Candidates for one original slot, highest priority first.
#[derive(Clone, Debug, Default)]
pub struct AnimationReplacements {
    original_slot: u16,
    candidates: Vec<Ranked>,
    next_seq: u64,
}

impl AnimationReplacements {
    pub fn new(original_slot: u16) -> Self {
        Self {
            original_slot,
            ..Self::default()
        }
    }

    pub fn from_candidates(original_slot: u16, candidates: Vec<Arc<ReplacementAnimation>>) -> Self {
        let mut list = Self::new(original_slot);
        for candidate in candidates {
            list.push(candidate);
        }
        list.sort_by_priority();
        list
    }

    #[inline]
    pub fn original_slot(&self) -> u16 {
        self.original_slot
    }

    fn push(&mut self, candidate: Arc<ReplacementAnimation>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.candidates.push(Ranked { seq, candidate });
    }

    pub fn add(&mut self, candidate: Arc<ReplacementAnimation>) {
        self.push(candidate);
        self.sort_by_priority();
    }

    pub fn remove(&mut self, id: ReplacementId) -> Option<Arc<ReplacementAnimation>> {
        let position = self.candidates.iter().position(|r| r.candidate.id() == id)?;
        Some(self.candidates.remove(position).candidate)
    }

    /// Descending priority; ties fall back to insertion order, whatever order
    /// earlier priority edits left the list in.
    pub fn sort_by_priority(&mut self) {
        self.candidates
            .sort_by_key(|r| (Reverse(r.candidate.priority()), r.seq));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ReplacementAnimation>> {
        self.candidates.iter().map(|r| &r.candidate)
    }

    pub fn get(&self, id: ReplacementId) -> Option<&Arc<ReplacementAnimation>> {
        self.iter().find(|c| c.id() == id)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn has_interruptible(&self) -> bool {
        self.iter().any(|c| !c.is_disabled() && c.interruptible())
    }

    /// First enabled candidate, in priority order, whose conditions hold.
    pub fn evaluate(&self, ctx: &mut EvalContext<'_>) -> Option<Arc<ReplacementAnimation>> {
        let winner = self.iter().find(|candidate| {
            if candidate.is_disabled() {
                return false;
            }
            let passed = candidate.rule_set().evaluate(ctx);
            trace!(
                "slot {}: candidate {:?} ({}) -> {}",
                self.original_slot,
                candidate.id(),
                candidate.rule_set().name(),
                passed
            );
            passed
        });
        ctx.leave_rule_set();
        winner.cloned()
    }
}

/// Lower-case, forward-slash form of a behavior project path.
pub fn normalize_project_path(path: &str) -> String {
    path.trim().replace('\\', "/").to_lowercase()
}

type ProjectSlots = HashMap<u16, Arc<AnimationReplacements>>;

/// Candidate lists per project and slot, plus every known rule set.
///
/// Lists are published as immutable snapshots; edits build a new list and swap
/// it in, so readers never observe a half-sorted list. Conditions of every rule
/// set that passes through here get their ids from this registry.
#[derive(Debug, Default)]
pub struct ReplacementRegistry {
    projects: RwLock<HashMap<String, ProjectSlots>>,
    rule_sets: RwLock<HashMap<RuleSetId, Arc<RuleSet>>>,
    condition_ids: ConditionIds,
}

impl ReplacementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the candidate list for a slot, registering its rule sets.
    pub fn install(&self, project: &str, mut replacements: AnimationReplacements) {
        replacements.sort_by_priority();
        {
            let mut rule_sets = self.rule_sets.write();
            for candidate in replacements.iter() {
                candidate.rule_set().assign_condition_ids(&self.condition_ids);
                rule_sets
                    .entry(candidate.rule_set().id())
                    .or_insert_with(|| candidate.rule_set().clone());
            }
        }
        let slot = replacements.original_slot();
        self.projects
            .write()
            .entry(normalize_project_path(project))
            .or_default()
            .insert(slot, Arc::new(replacements));
    }

    pub fn candidates(&self, project: &str, slot: u16) -> Option<Arc<AnimationReplacements>> {
        let key = normalize_project_path(project);
        self.projects.read().get(&key)?.get(&slot).cloned()
    }

    /// Copy-on-write edit of one slot's list. The list is re-sorted afterwards.
    pub fn edit_slot<F>(&self, project: &str, slot: u16, edit: F) -> Result<()>
    where
        F: FnOnce(&mut AnimationReplacements),
    {
        let key = normalize_project_path(project);
        let mut projects = self.projects.write();
        let current = projects
            .get_mut(&key)
            .and_then(|slots| slots.get_mut(&slot))
            .ok_or_else(|| ReplacerError::UnknownSlot {
                project: key.clone(),
                slot,
            })?;
        let mut next = AnimationReplacements::clone(current);
        edit(&mut next);
        next.sort_by_priority();
        *current = Arc::new(next);
        Ok(())
    }

    /// Re-sort every list, e.g. after a priority change.
    pub fn resort_all(&self) {
        let mut projects = self.projects.write();
        for slots in projects.values_mut() {
            for list in slots.values_mut() {
                let mut next = AnimationReplacements::clone(list);
                next.sort_by_priority();
                *list = Arc::new(next);
            }
        }
    }

    pub fn register_rule_set(&self, rule_set: Arc<RuleSet>) {
        rule_set.assign_condition_ids(&self.condition_ids);
        self.rule_sets.write().insert(rule_set.id(), rule_set);
    }

    #[inline]
    pub fn condition_ids(&self) -> &ConditionIds {
        &self.condition_ids
    }

    pub fn rule_set(&self, id: RuleSetId) -> Option<Arc<RuleSet>> {
        self.rule_sets.read().get(&id).cloned()
    }

    pub fn rule_sets(&self) -> Vec<Arc<RuleSet>> {
        let mut all: Vec<Arc<RuleSet>> = self.rule_sets.read().values().cloned().collect();
        all.sort_by_key(|rs| rs.id());
        all
    }

    pub fn clear(&self) {
        self.projects.write().clear();
        self.rule_sets.write().clear();
    }
}
