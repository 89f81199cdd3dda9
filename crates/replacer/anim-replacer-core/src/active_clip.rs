//! Per-instance replacement state machine.
//!
//! An [`ActiveClip`] tracks one playing instance from its first activation to
//! its destruction. Every host event funnels into the same three steps: decide
//! (evaluate candidates, select a variant), enqueue (last write wins), apply
//! (swap the binding and report a [`Transition`]).
//!
//! Phases:
//! - `Original`: no replacement bound
//! - `Replaced`: a replacement is bound
//! - `Transitioning`: a transition was applied and the host has not yet
//!   reactivated the clip. A deactivation arriving in this window is the host
//!   tearing down the old source for us, so destruction is deferred until the
//!   next pre-update.
//!
//! Blending is orthogonal: any number of aged pose snapshots may be fading out
//! regardless of phase.

use crate::condition::EvalContext;
use crate::config::Config;
use crate::ids::{ClipHandle, ReplacementId, SubjectId, SyncGroupId};
use crate::playback::{ClipFlags, ClipPlayback, OriginalBinding, PoseBlender, PoseHandle};
use crate::random::{RandomMemo, RandomSource};
use crate::replacement::{AnimationReplacements, ClipChoice, ReplacementAnimation, TransitionTrigger};
use crate::state::{ClipRef, ClipToken, ScopedStateStore};
use crate::subject::Subject;
use crate::variants::{VariantMode, VariantStateData};
use hashbrown::HashMap;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipPhase {
    #[default]
    Original,
    Replaced,
    Transitioning,
}

/// Where the incoming clip starts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// From time zero.
    Restart,
    /// At the outgoing clip's current local time.
    Continue,
    /// Applied just ahead of a loop boundary so the blend ends on the seam.
    LoopSeam,
}

/// What the host must reactivate after the binding swap.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reactivation {
    Clip,
    /// The instance is one participant of a synchronized animation; the
    /// owning wrapper is cycled instead.
    SyncGroup(SyncGroupId),
}

/// An applied replacement, as reported to the host.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub trigger: TransitionTrigger,
    pub kind: TransitionKind,
    pub from: Option<ReplacementId>,
    /// `None` when falling back to the original animation.
    pub to: Option<ReplacementId>,
    pub binding_index: u16,
    pub variant: Option<usize>,
    pub blend_time: f32,
    pub start_time: f32,
    /// `None` for swaps made during activation, which need no cycling.
    pub reactivate: Option<Reactivation>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Keep,
    Replace(Transition),
}

impl Decision {
    pub fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }

    pub fn transition(&self) -> Option<&Transition> {
        match self {
            Self::Keep => None,
            Self::Replace(transition) => Some(transition),
        }
    }
}

/// A pending replacement. Only the latest one survives until it is applied.
#[derive(Clone, Debug)]
pub struct QueuedReplacement {
    pub target: Option<Arc<ReplacementAnimation>>,
    pub choice: ClipChoice,
    pub trigger: TransitionTrigger,
    pub kind: TransitionKind,
    pub blend_time: f32,
}

/// Frozen outgoing pose, faded out over `duration` seconds.
#[derive(Clone)]
pub struct BlendSource {
    pub pose: PoseHandle,
    pub elapsed: f32,
    pub duration: f32,
}

impl BlendSource {
    /// Progress toward the incoming pose, in `[0, 1]`.
    pub fn weight(&self) -> f32 {
        if self.duration <= 0.0 {
            1.0
        } else {
            (self.elapsed / self.duration).clamp(0.0, 1.0)
        }
    }
}

impl fmt::Debug for BlendSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlendSource")
            .field("elapsed", &self.elapsed)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

/// Callback run right before a clip is torn down.
pub type DestroyListener = Box<dyn FnOnce(ClipHandle) + Send>;

/// Collaborators borrowed for the duration of one event.
#[derive(Copy, Clone)]
pub struct ClipEnv<'a> {
    pub config: &'a Config,
    /// Candidates for the clip's original slot, if the project has any.
    pub candidates: Option<&'a AnimationReplacements>,
    pub subject: &'a dyn Subject,
    pub states: &'a ScopedStateStore,
    pub rng: &'a dyn RandomSource,
}

#[derive(Clone, Debug)]
struct CurrentReplacement {
    replacement: Arc<ReplacementAnimation>,
    choice: ClipChoice,
}

pub struct ActiveClip {
    handle: ClipHandle,
    subject: SubjectId,
    project: String,
    token: Arc<ClipToken>,
    phase: ClipPhase,
    current: Option<CurrentReplacement>,
    queued: Option<QueuedReplacement>,
    original: OriginalBinding,
    blend_sources: Vec<BlendSource>,
    memo: RandomMemo,
    variant_states: HashMap<ReplacementId, VariantStateData>,
    loop_precomputed: bool,
    deactivate_deferred: bool,
    destroy_listeners: Vec<DestroyListener>,
}

fn eval_context<'e>(
    memo: &'e mut RandomMemo,
    token: &Arc<ClipToken>,
    env: &ClipEnv<'e>,
) -> EvalContext<'e> {
    EvalContext::new(env.subject, env.states, env.rng, memo).with_clip(ClipRef::new(token))
}

impl ActiveClip {
    /// Start tracking an instance, capturing its binding for the final restore.
    pub fn new(
        handle: ClipHandle,
        subject: SubjectId,
        project: impl Into<String>,
        playback: &ClipPlayback,
    ) -> Self {
        Self {
            handle,
            subject,
            project: project.into(),
            token: ClipToken::new(handle),
            phase: ClipPhase::Original,
            current: None,
            queued: None,
            original: OriginalBinding::capture(playback),
            blend_sources: Vec::new(),
            memo: RandomMemo::new(),
            variant_states: HashMap::new(),
            loop_precomputed: false,
            deactivate_deferred: false,
            destroy_listeners: Vec::new(),
        }
    }

    #[inline]
    pub fn handle(&self) -> ClipHandle {
        self.handle
    }

    #[inline]
    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Slot the instance was originally bound to; candidate lookups use it.
    #[inline]
    pub fn original_slot(&self) -> u16 {
        self.original.binding_index
    }

    pub fn original(&self) -> &OriginalBinding {
        &self.original
    }

    #[inline]
    pub fn phase(&self) -> ClipPhase {
        self.phase
    }

    pub fn is_blending(&self) -> bool {
        !self.blend_sources.is_empty()
    }

    pub fn blend_sources(&self) -> &[BlendSource] {
        &self.blend_sources
    }

    pub fn current_replacement(&self) -> Option<ReplacementId> {
        self.current.as_ref().map(|c| c.replacement.id())
    }

    pub fn current_variant(&self) -> Option<usize> {
        self.current.as_ref().and_then(|c| c.choice.variant)
    }

    pub fn queued(&self) -> Option<&QueuedReplacement> {
        self.queued.as_ref()
    }

    pub fn memo(&self) -> &RandomMemo {
        &self.memo
    }

    pub fn is_deactivate_deferred(&self) -> bool {
        self.deactivate_deferred
    }

    pub fn add_destroy_listener(&mut self, listener: DestroyListener) {
        self.destroy_listeners.push(listener);
    }

    /// Queue a replacement, superseding anything not yet applied.
    pub fn enqueue(&mut self, queued: QueuedReplacement) {
        if let Some(previous) = &self.queued {
            trace!(
                "clip {:?}: queued {:?} superseded by {:?}",
                self.handle,
                previous.target.as_ref().map(|r| r.id()),
                queued.target.as_ref().map(|r| r.id())
            );
        }
        self.queued = Some(queued);
    }

    /// Host (re)activated the instance.
    pub fn activate(&mut self, playback: &mut ClipPlayback, env: &ClipEnv<'_>) -> Decision {
        if self.phase == ClipPhase::Transitioning {
            // Reactivation after our own swap.
            self.settle();
            return Decision::Keep;
        }
        if playback.synchronized.is_some() {
            return Decision::Keep;
        }
        self.activate_now(playback, env)
    }

    /// Activation driven by the owner of a synchronization point.
    pub fn activate_synchronized(&mut self, playback: &mut ClipPlayback, env: &ClipEnv<'_>) -> Decision {
        if self.phase == ClipPhase::Transitioning {
            self.settle();
            return Decision::Keep;
        }
        self.activate_now(playback, env)
    }

    fn activate_now(&mut self, playback: &mut ClipPlayback, env: &ClipEnv<'_>) -> Decision {
        let winner = self.evaluate(env);
        if let Some(queued) = self.decide(winner, false, TransitionTrigger::Activate, env) {
            self.enqueue(queued);
        }
        self.apply_queued(playback, env)
    }

    /// Finish a pending transition. Returns `true` if a deactivation was
    /// deferred during it and the clip must now be destroyed.
    pub fn settle(&mut self) -> bool {
        if self.phase != ClipPhase::Transitioning {
            return false;
        }
        self.phase = self.settled_phase();
        std::mem::take(&mut self.deactivate_deferred)
    }

    /// Host is deactivating the instance. Returns whether it should be destroyed now.
    pub fn deactivate(&mut self) -> bool {
        if self.phase == ClipPhase::Transitioning {
            debug!("clip {:?}: deactivation deferred during transition", self.handle);
            self.deactivate_deferred = true;
            return false;
        }
        true
    }

    /// Pre-update: age blends, check interrupts, pre-compute the loop seam,
    /// then apply whatever is queued.
    pub fn tick(&mut self, playback: &mut ClipPlayback, dt: f32, env: &ClipEnv<'_>) -> Decision {
        self.settle();
        self.expire_blends(dt);

        if self.queued.is_none() && self.wants_interrupt_check(env) {
            self.check_interrupt(env);
        }

        if self.queued.is_none() && !self.loop_precomputed && playback.mode.is_looping() && playback.duration > 0.0 {
            let window = dt + self.resolve_blend_time(None, TransitionTrigger::Loop, env.config);
            let remaining = playback.remaining();
            if remaining <= window {
                self.loop_precomputed = true;
                env.states.on_loop_or_echo(self.subject, self.handle, false);
                self.begin_epoch();
                if let Some(mut queued) = self.reevaluate(TransitionTrigger::Loop, env) {
                    queued.kind = TransitionKind::LoopSeam;
                    if queued.blend_time > 0.0 {
                        queued.blend_time = remaining;
                    }
                    self.enqueue(queued);
                }
            }
        }

        self.apply_queued(playback, env)
    }

    /// A looping instance wrapped around.
    pub fn on_loop(&mut self, playback: &mut ClipPlayback, env: &ClipEnv<'_>) -> Decision {
        if std::mem::take(&mut self.loop_precomputed) {
            // Decided ahead of the seam; states and epoch already rolled over.
            return self.apply_queued(playback, env);
        }
        env.states.on_loop_or_echo(self.subject, self.handle, false);
        self.begin_epoch();
        if let Some(queued) = self.reevaluate(TransitionTrigger::Loop, env) {
            self.enqueue(queued);
        }
        self.apply_queued(playback, env)
    }

    /// A non-looping instance retriggered itself.
    pub fn on_echo(&mut self, playback: &mut ClipPlayback, env: &ClipEnv<'_>) -> Decision {
        env.states.on_loop_or_echo(self.subject, self.handle, true);
        self.loop_precomputed = false;
        self.begin_epoch();
        if let Some(queued) = self.reevaluate(TransitionTrigger::Echo, env) {
            self.enqueue(queued);
        }
        self.apply_queued(playback, env)
    }

    /// Fold the fading sources over `current`, newest source innermost.
    pub fn blend_pose(&self, current: &PoseHandle, blender: &dyn PoseBlender) -> PoseHandle {
        self.blend_sources
            .iter()
            .rev()
            .fold(current.clone(), |pose, source| {
                blender.blend_poses(&source.pose, &pose, source.weight())
            })
    }

    /// Restore the original binding and notify observers. The clip is inert afterwards.
    pub fn destroy(&mut self, playback: &mut ClipPlayback) {
        for listener in self.destroy_listeners.drain(..) {
            listener(self.handle);
        }
        self.original.restore(playback);
        self.current = None;
        self.queued = None;
        self.blend_sources.clear();
        self.phase = ClipPhase::Original;
        debug!("clip {:?}: destroyed, original binding restored", self.handle);
    }

    fn settled_phase(&self) -> ClipPhase {
        if self.current.is_some() {
            ClipPhase::Replaced
        } else {
            ClipPhase::Original
        }
    }

    /// New random epoch unless the bound replacement keeps its results.
    fn begin_epoch(&mut self) {
        let keep = self
            .current
            .as_ref()
            .is_some_and(|c| c.replacement.keep_random_results_on_loop());
        if !keep {
            self.memo.clear();
        }
    }

    fn expire_blends(&mut self, dt: f32) {
        for source in &mut self.blend_sources {
            source.elapsed += dt;
        }
        self.blend_sources.retain(|s| s.elapsed < s.duration);
    }

    fn push_blend_source(&mut self, pose: PoseHandle, duration: f32, max: usize) {
        if max == 0 {
            return;
        }
        self.blend_sources.push(BlendSource {
            pose,
            elapsed: 0.0,
            duration,
        });
        while self.blend_sources.len() > max {
            self.blend_sources.remove(0);
        }
    }

    fn wants_interrupt_check(&self, env: &ClipEnv<'_>) -> bool {
        match &self.current {
            Some(current) => current.replacement.interruptible(),
            None => env.candidates.is_some_and(AnimationReplacements::has_interruptible),
        }
    }

    fn check_interrupt(&mut self, env: &ClipEnv<'_>) {
        let winner = self.evaluate(env);
        if self.current.is_none() && !winner.as_ref().is_some_and(|w| w.interruptible()) {
            return;
        }
        if let Some(queued) = self.decide(winner, false, TransitionTrigger::Interrupt, env) {
            self.enqueue(queued);
        }
    }

    fn gate_open(&self, trigger: TransitionTrigger, config: &Config) -> bool {
        let current = self.current.as_ref().map(|c| &c.replacement);
        match trigger {
            TransitionTrigger::Loop => {
                config.replace_on_loop && current.map_or(true, |r| r.replace_on_loop())
            }
            TransitionTrigger::Echo => {
                config.replace_on_echo && current.map_or(true, |r| r.replace_on_echo())
            }
            TransitionTrigger::Activate | TransitionTrigger::Interrupt => true,
        }
    }

    /// Loop/echo decision: continue a pending sequence, else full evaluation
    /// with a fresh variant roll.
    fn reevaluate(&mut self, trigger: TransitionTrigger, env: &ClipEnv<'_>) -> Option<QueuedReplacement> {
        if !self.gate_open(trigger, env.config) {
            return None;
        }
        if let Some(current) = self.current.clone() {
            let replacement = &current.replacement;
            if !replacement.is_disabled() && self.sequence_pending(replacement, env) {
                let choice = self.choose_clip(replacement, env)?;
                if choice.clip_index == current.choice.clip_index {
                    return None;
                }
                return Some(self.queue_for(Some(current.replacement.clone()), choice, trigger, env.config));
            }
        }
        let winner = self.evaluate(env);
        self.decide(winner, true, trigger, env)
    }

    fn evaluate(&mut self, env: &ClipEnv<'_>) -> Option<Arc<ReplacementAnimation>> {
        let candidates = env.candidates?;
        let mut ctx = eval_context(&mut self.memo, &self.token, env);
        candidates.evaluate(&mut ctx)
    }

    fn choose_clip(&mut self, replacement: &ReplacementAnimation, env: &ClipEnv<'_>) -> Option<ClipChoice> {
        let sequential = replacement
            .variants()
            .is_some_and(|v| v.mode() == VariantMode::Sequential);
        let private = self
            .variant_states
            .entry(replacement.id())
            .or_insert_with(|| VariantStateData::new(sequential));
        let mut ctx = eval_context(&mut self.memo, &self.token, env);
        replacement.select_clip(&mut ctx, private)
    }

    fn sequence_pending(&mut self, replacement: &ReplacementAnimation, env: &ClipEnv<'_>) -> bool {
        let fallback = VariantStateData::default();
        let private = self.variant_states.get(&replacement.id()).unwrap_or(&fallback);
        let mut ctx = eval_context(&mut self.memo, &self.token, env);
        replacement.sequence_pending(&mut ctx, private)
    }

    /// Compare a fresh winner against what is bound. With `consider_variants`,
    /// the same replacement re-rolls its variant and replaces on a new clip.
    fn decide(
        &mut self,
        winner: Option<Arc<ReplacementAnimation>>,
        consider_variants: bool,
        trigger: TransitionTrigger,
        env: &ClipEnv<'_>,
    ) -> Option<QueuedReplacement> {
        let current = self.current.clone();
        match (winner, current) {
            (None, None) => None,
            (None, Some(_)) => Some(self.queue_original(trigger, env.config)),
            (Some(winner), Some(current)) if winner.id() == current.replacement.id() => {
                if !consider_variants || !winner.has_variants() {
                    return None;
                }
                let choice = self.choose_clip(&winner, env)?;
                if choice.clip_index == current.choice.clip_index {
                    return None;
                }
                Some(self.queue_for(Some(winner), choice, trigger, env.config))
            }
            (Some(winner), current) => match self.choose_clip(&winner, env) {
                Some(choice) => Some(self.queue_for(Some(winner), choice, trigger, env.config)),
                // Nothing selectable: the original plays.
                None => current.map(|_| self.queue_original(trigger, env.config)),
            },
        }
    }

    fn queue_original(&self, trigger: TransitionTrigger, config: &Config) -> QueuedReplacement {
        let kind = match trigger {
            TransitionTrigger::Interrupt => TransitionKind::Continue,
            _ => TransitionKind::Restart,
        };
        QueuedReplacement {
            target: None,
            choice: ClipChoice {
                clip_index: self.original.binding_index,
                variant: None,
            },
            trigger,
            kind,
            blend_time: self.resolve_blend_time(None, trigger, config),
        }
    }

    fn queue_for(
        &self,
        target: Option<Arc<ReplacementAnimation>>,
        choice: ClipChoice,
        trigger: TransitionTrigger,
        config: &Config,
    ) -> QueuedReplacement {
        let same_replacement = match (&target, &self.current) {
            (Some(t), Some(c)) => t.id() == c.replacement.id(),
            _ => false,
        };
        let blend_time = if same_replacement && !target.as_ref().is_some_and(|t| t.blends_between_variants()) {
            0.0
        } else {
            self.resolve_blend_time(target.as_deref(), trigger, config)
        };
        QueuedReplacement {
            target,
            choice,
            trigger,
            kind: TransitionKind::Restart,
            blend_time,
        }
    }

    /// Incoming override, else outgoing override, else the global default.
    fn resolve_blend_time(
        &self,
        target: Option<&ReplacementAnimation>,
        trigger: TransitionTrigger,
        config: &Config,
    ) -> f32 {
        if trigger == TransitionTrigger::Activate || !config.blending_enabled {
            return 0.0;
        }
        target
            .and_then(|t| t.blend_override(trigger))
            .or_else(|| {
                self.current
                    .as_ref()
                    .and_then(|c| c.replacement.blend_override(trigger))
            })
            .unwrap_or(match trigger {
                TransitionTrigger::Interrupt => config.interrupt_blend_time,
                TransitionTrigger::Loop => config.loop_blend_time,
                TransitionTrigger::Echo => config.echo_blend_time,
                TransitionTrigger::Activate => 0.0,
            })
            .max(0.0)
    }

    fn bind_replacement(&self, playback: &mut ClipPlayback, replacement: &ReplacementAnimation, choice: ClipChoice) {
        playback.binding_index = choice.clip_index;
        playback.mode = self.original.mode;
        playback.flags = if replacement.ignore_dont_convert_annotations() {
            self.original
                .flags
                .without(ClipFlags::DONT_CONVERT_ANNOTATIONS_TO_TRIGGERS)
        } else {
            self.original.flags
        };
        playback.triggers = if replacement.triggers_from_annotations_only() {
            None
        } else {
            self.original.triggers.clone()
        };
    }

    fn apply_queued(&mut self, playback: &mut ClipPlayback, env: &ClipEnv<'_>) -> Decision {
        let Some(queued) = self.queued.take() else {
            return Decision::Keep;
        };
        let from = self.current_replacement();

        if env.config.blending_enabled && queued.blend_time > 0.0 {
            if let Some(pose) = playback.pose.clone() {
                self.push_blend_source(pose, queued.blend_time, env.config.max_blend_sources);
            }
        }

        match &queued.target {
            Some(replacement) => self.bind_replacement(playback, replacement, queued.choice),
            None => self.original.restore(playback),
        }
        let start_time = match queued.kind {
            TransitionKind::Restart => 0.0,
            TransitionKind::Continue | TransitionKind::LoopSeam => playback.local_time,
        };
        playback.local_time = start_time;

        let reactivate = match queued.trigger {
            TransitionTrigger::Activate => None,
            _ => Some(match playback.synchronized {
                Some(group) => Reactivation::SyncGroup(group),
                None => Reactivation::Clip,
            }),
        };

        let to = queued.target.as_ref().map(|r| r.id());
        self.current = queued.target.map(|replacement| CurrentReplacement {
            replacement,
            choice: queued.choice,
        });
        self.phase = if reactivate.is_some() {
            ClipPhase::Transitioning
        } else {
            self.settled_phase()
        };

        debug!(
            "clip {:?}: {:?} {:?} -> {:?} (clip {}, blend {:.2}s)",
            self.handle, queued.trigger, from, to, queued.choice.clip_index, queued.blend_time
        );

        Decision::Replace(Transition {
            trigger: queued.trigger,
            kind: queued.kind,
            from,
            to,
            binding_index: queued.choice.clip_index,
            variant: queued.choice.variant,
            blend_time: queued.blend_time,
            start_time,
            reactivate,
        })
    }
}

impl fmt::Debug for ActiveClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveClip")
            .field("handle", &self.handle)
            .field("subject", &self.subject)
            .field("phase", &self.phase)
            .field("current", &self.current_replacement())
            .field("variant", &self.current_variant())
            .field("blend_sources", &self.blend_sources.len())
            .finish_non_exhaustive()
    }
}
