//! Shared test doubles for anim-replacer crates.
//!
//! - [`MockSubject`]: scripted subject with mutable graph variables
//! - [`SequenceRandom`]: fixed-sequence draw source
//! - [`RecordingBlender`]: pose blender that records every blend weight
//! - [`Constant`] / [`Spy`]: predicates with a fixed or observable result
//! - builders for rule sets, candidates and playback

use anim_replacer_core::condition::EvalContext;
use anim_replacer_core::{
    AnimationReplacements, ClipFlags, ClipPlayback, Condition, ConditionId, ConditionSet, FormId,
    FormRef, FormResolver, ModId, PlaybackMode, PoseBlender, PoseHandle, Predicate, RandomSource,
    ReplacementAnimation, ReplacementId, RuleSet, RuleSetId, RuleSetSettings, Subject, SubjectId,
    TriggerAnnotation, Variant, VariantMode, Variants,
};
use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const PROJECT: &str = "actors/character/defaultmale.hkx";

#[derive(Debug, Default)]
pub struct MockSubject {
    id: u64,
    forms: HashSet<FormId>,
    keywords: HashSet<String>,
    floats: RwLock<HashMap<String, f32>>,
    bools: RwLock<HashMap<String, bool>>,
}

impl MockSubject {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn with_form(mut self, form: FormId) -> Self {
        self.forms.insert(form);
        self
    }

    pub fn with_keyword(mut self, keyword: &str) -> Self {
        self.keywords.insert(keyword.to_string());
        self
    }

    pub fn set_float(&self, name: &str, value: f32) {
        self.floats.write().insert(name.to_string(), value);
    }

    pub fn set_bool(&self, name: &str, value: bool) {
        self.bools.write().insert(name.to_string(), value);
    }
}

impl Subject for MockSubject {
    fn id(&self) -> SubjectId {
        SubjectId(self.id)
    }

    fn is_form(&self, form: FormId) -> bool {
        self.forms.contains(&form)
    }

    fn has_keyword(&self, keyword: &str) -> bool {
        self.keywords.contains(keyword)
    }

    fn actor_value(&self, name: &str) -> Option<f32> {
        self.floats.read().get(name).copied()
    }

    fn graph_float(&self, name: &str) -> Option<f32> {
        self.floats.read().get(name).copied()
    }

    fn graph_bool(&self, name: &str) -> Option<bool> {
        self.bools.read().get(name).copied()
    }
}

/// Cycles through a fixed list of draws.
#[derive(Debug)]
pub struct SequenceRandom {
    values: Vec<f32>,
    cursor: AtomicUsize,
}

impl SequenceRandom {
    pub fn new(values: &[f32]) -> Self {
        Self {
            values: values.to_vec(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Number of draws taken so far.
    pub fn draws(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

impl RandomSource for SequenceRandom {
    fn next_f32(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.values[i % self.values.len()]
    }
}

/// Poses are labelled strings; blends produce `"blend(a,b,t)"`.
#[derive(Debug, Default)]
pub struct RecordingBlender {
    weights: Mutex<Vec<f32>>,
}

impl RecordingBlender {
    pub fn weights(&self) -> Vec<f32> {
        self.weights.lock().clone()
    }
}

pub fn pose(label: &str) -> PoseHandle {
    Arc::new(label.to_string())
}

pub fn pose_label(pose: &PoseHandle) -> String {
    pose.downcast_ref::<String>().cloned().unwrap_or_default()
}

impl PoseBlender for RecordingBlender {
    fn blend_poses(&self, from: &PoseHandle, to: &PoseHandle, t: f32) -> PoseHandle {
        self.weights.lock().push(t);
        Arc::new(format!("blend({},{},{:.2})", pose_label(from), pose_label(to), t))
    }
}

#[derive(Debug, Default)]
pub struct StaticResolver {
    forms: HashMap<FormRef, FormId>,
}

impl StaticResolver {
    pub fn with(mut self, form: FormRef, id: FormId) -> Self {
        self.forms.insert(form, id);
        self
    }
}

impl FormResolver for StaticResolver {
    fn resolve(&self, form: &FormRef) -> Option<FormId> {
        self.forms.get(form).copied()
    }
}

/// Predicate with a fixed result.
#[derive(Clone, Debug, Default)]
pub struct Constant(pub bool);

impl Predicate for Constant {
    fn name(&self) -> &str {
        "Constant"
    }

    fn evaluate(&self, _id: ConditionId, _ctx: &mut EvalContext<'_>) -> bool {
        self.0
    }
}

/// Predicate whose result can be flipped from the outside and which counts calls.
#[derive(Clone, Debug, Default)]
pub struct Spy {
    pub result: Arc<Mutex<bool>>,
    pub calls: Arc<AtomicUsize>,
}

impl Spy {
    pub fn new(result: bool) -> Self {
        Self {
            result: Arc::new(Mutex::new(result)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, result: bool) {
        *self.result.lock() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Predicate for Spy {
    fn name(&self) -> &str {
        "Spy"
    }

    fn evaluate(&self, _id: ConditionId, _ctx: &mut EvalContext<'_>) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.result.lock()
    }
}

pub fn always(value: bool) -> Condition {
    Condition::new(Constant(value))
}

pub fn rule_set(id: u32, priority: i32, conditions: Vec<Condition>) -> Arc<RuleSet> {
    rule_set_with(
        id,
        RuleSetSettings {
            priority,
            ..RuleSetSettings::default()
        },
        conditions,
    )
}

pub fn rule_set_with(id: u32, settings: RuleSetSettings, conditions: Vec<Condition>) -> Arc<RuleSet> {
    RuleSet::new(
        RuleSetId(id),
        ModId(0),
        format!("rule set {id}"),
        settings,
        ConditionSet::from_conditions(conditions),
    )
}

pub fn single(id: u32, slot: u16, clip: u16, rule_set: Arc<RuleSet>) -> Arc<ReplacementAnimation> {
    ReplacementAnimation::single(ReplacementId(id), slot, clip, format!("clip{clip}.hkx"), rule_set)
}

/// Variant group over consecutive clip indices starting at `first_clip`, all weight 1.
pub fn variant_group(mode: VariantMode, first_clip: u16, count: u16) -> Variants {
    let variants = (0..count)
        .map(|i| Variant::new(first_clip + i, format!("variant{i}.hkx")))
        .collect();
    Variants::new(mode, variants)
}

pub fn with_variants(id: u32, slot: u16, variants: Variants, rule_set: Arc<RuleSet>) -> Arc<ReplacementAnimation> {
    ReplacementAnimation::with_variants(ReplacementId(id), slot, variants, rule_set)
}

pub fn slot(original_slot: u16, candidates: Vec<Arc<ReplacementAnimation>>) -> AnimationReplacements {
    AnimationReplacements::from_candidates(original_slot, candidates)
}

/// Playback with distinctive original values, for restore checks.
pub fn playback(original_slot: u16, mode: PlaybackMode) -> ClipPlayback {
    let mut playback = ClipPlayback::new(original_slot, mode, 2.0);
    playback.flags = ClipFlags(ClipFlags::MIRROR | ClipFlags::DONT_CONVERT_ANNOTATIONS_TO_TRIGGERS);
    playback.triggers = Some(vec![TriggerAnnotation {
        time: 0.5,
        event: "SoundPlay.FootLeft".to_string(),
    }]);
    playback
}
