//! Replacer: the engine core object and every host, loader, editor and
//! extension entry point.
//!
//! Methods:
//! - new, with_random, config, set_config
//! - loading: install, update_rule_set, edit_conditions, edit_variants, resolve_forms,
//!   invalid_rule_sets
//! - extensions: register_condition, seal_factory, create_condition
//! - host events: on_activate, activate_synchronized, on_pre_update, on_loop, on_echo,
//!   on_deactivate, blend_pose, update_states, clear_subject
//! - dependents: weak_clip, on_clip_destroyed
//! - editor: evaluate_set_for, evaluate_rule_set_for, history, history_json
//!
//! Locks are taken for lookup or insert only. Each clip is driven under its own
//! mutex, so the decide → apply sequence for one instance never interleaves.

use crate::active_clip::{ActiveClip, ClipEnv, Decision, DestroyListener};
use crate::condition::{Condition, ConditionFactory, ConditionSet, EvalContext, FactoryPhase, Predicate, RequiredPlugin};
use crate::config::Config;
use crate::error::{ReplacerError, Result};
use crate::history::{HistoryEntry, ReplacementHistory};
use crate::ids::{ClipHandle, ReplacementId, RuleSetId, SubjectId, SyncGroupId};
use crate::playback::{ClipPlayback, PoseBlender, PoseHandle};
use crate::random::{RandomMemo, RandomSource, StdRandom};
use crate::replacement::{
    normalize_project_path, AnimationReplacements, ReplacementRegistry, RuleSet, RuleSetSettings,
};
use crate::state::ScopedStateStore;
use crate::subject::{FormResolver, Subject};
use crate::variants::Variants;
use hashbrown::HashMap;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};

type ClipCell = Arc<Mutex<ActiveClip>>;

/// Non-owning handle to a tracked clip. Upgrade before every use.
#[derive(Clone, Debug)]
pub struct WeakClip {
    handle: ClipHandle,
    cell: Weak<Mutex<ActiveClip>>,
}

impl WeakClip {
    pub fn handle(&self) -> ClipHandle {
        self.handle
    }

    pub fn upgrade(&self) -> Option<ClipCell> {
        self.cell.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.cell.strong_count() > 0
    }
}

/// One instance of a synchronized multi-actor animation.
pub struct SyncParticipant<'a> {
    pub handle: ClipHandle,
    pub subject: &'a dyn Subject,
    pub playback: &'a mut ClipPlayback,
}

pub struct Replacer {
    config: RwLock<Config>,
    factory: RwLock<ConditionFactory>,
    registry: ReplacementRegistry,
    clips: RwLock<HashMap<ClipHandle, ClipCell>>,
    states: ScopedStateStore,
    rng: Box<dyn RandomSource>,
    history: Mutex<ReplacementHistory>,
}

impl Replacer {
    pub fn new(config: Config) -> Self {
        Self::with_random(config, Box::new(StdRandom::new()))
    }

    /// Construct with an explicit draw source (seeded or scripted).
    pub fn with_random(config: Config, rng: Box<dyn RandomSource>) -> Self {
        Self {
            states: ScopedStateStore::new(config.state_lifetime),
            history: Mutex::new(ReplacementHistory::new(config.history_capacity)),
            config: RwLock::new(config),
            factory: RwLock::new(ConditionFactory::new()),
            registry: ReplacementRegistry::new(),
            clips: RwLock::new(HashMap::new()),
            rng,
        }
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: Config) {
        self.states.set_lifetime(config.state_lifetime);
        self.history.lock().set_capacity(config.history_capacity);
        *self.config.write() = config;
    }

    pub fn registry(&self) -> &ReplacementRegistry {
        &self.registry
    }

    pub fn states(&self) -> &ScopedStateStore {
        &self.states
    }

    // ---- loading and editing ----

    /// Publish a slot's candidate list under `project`.
    pub fn install(&self, project: &str, replacements: AnimationReplacements) {
        self.registry.install(project, replacements);
    }

    fn rule_set(&self, id: RuleSetId) -> Result<Arc<RuleSet>> {
        self.registry
            .rule_set(id)
            .ok_or(ReplacerError::RuleSetNotFound { id: id.0 })
    }

    /// Edit a rule set's settings; candidate lists are re-sorted afterwards.
    pub fn update_rule_set<F>(&self, id: RuleSetId, edit: F) -> Result<()>
    where
        F: FnOnce(&mut RuleSetSettings),
    {
        let rule_set = self.rule_set(id)?;
        let before = rule_set.priority();
        rule_set.update_settings(edit);
        if rule_set.priority() != before {
            self.registry.resort_all();
        }
        Ok(())
    }

    /// Mutate a rule set's conditions. Only that rule set is revalidated.
    pub fn edit_conditions<R, F>(&self, id: RuleSetId, edit: F) -> Result<R>
    where
        F: FnOnce(&mut ConditionSet) -> Result<R>,
    {
        let rule_set = self.rule_set(id)?;
        let result = rule_set.edit_conditions(edit);
        rule_set.assign_condition_ids(self.registry.condition_ids());
        result
    }

    /// Mutate the variant group of one installed replacement.
    pub fn edit_variants<R, F>(&self, project: &str, slot: u16, id: ReplacementId, edit: F) -> Result<R>
    where
        F: FnOnce(&mut Variants) -> Result<R>,
    {
        let list = self
            .registry
            .candidates(project, slot)
            .ok_or_else(|| ReplacerError::UnknownSlot {
                project: normalize_project_path(project),
                slot,
            })?;
        let replacement = list
            .get(id)
            .ok_or(ReplacerError::ReplacementNotFound { id: id.0, slot })?;
        replacement.edit_variants(edit)
    }

    pub fn resolve_forms(&self, resolver: &dyn FormResolver) {
        for rule_set in self.registry.rule_sets() {
            rule_set.resolve_forms(resolver);
        }
    }

    pub fn invalid_rule_sets(&self) -> Vec<RuleSetId> {
        self.registry
            .rule_sets()
            .iter()
            .filter(|rs| !rs.is_valid())
            .map(|rs| rs.id())
            .collect()
    }

    // ---- extensions ----

    pub fn register_condition<F>(&self, name: &str, plugin: Option<RequiredPlugin>, constructor: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Predicate> + Send + Sync + 'static,
    {
        self.factory.write().register(name, plugin, constructor)
    }

    pub fn seal_factory(&self) {
        self.factory.write().seal();
        debug!("condition factory sealed");
    }

    pub fn factory_phase(&self) -> FactoryPhase {
        self.factory.read().phase()
    }

    pub fn create_condition(&self, name: &str) -> Condition {
        self.factory.read().create(name)
    }

    // ---- host events ----

    fn lookup(&self, handle: ClipHandle) -> Option<ClipCell> {
        self.clips.read().get(&handle).cloned()
    }

    /// Idempotent: a double activation reuses the tracked clip.
    fn get_or_create(&self, handle: ClipHandle, subject: SubjectId, project: &str, playback: &ClipPlayback) -> ClipCell {
        if let Some(cell) = self.lookup(handle) {
            return cell;
        }
        self.clips
            .write()
            .entry(handle)
            .or_insert_with(|| {
                debug!("clip {:?}: tracking slot {} on {:?}", handle, playback.binding_index, subject);
                Arc::new(Mutex::new(ActiveClip::new(handle, subject, project, playback)))
            })
            .clone()
    }

    fn drive<F>(&self, clip: &mut ActiveClip, subject: &dyn Subject, run: F) -> Decision
    where
        F: FnOnce(&mut ActiveClip, &ClipEnv<'_>) -> Decision,
    {
        let config = self.config();
        let candidates = self.registry.candidates(clip.project(), clip.original_slot());
        let env = ClipEnv {
            config: &config,
            candidates: candidates.as_deref(),
            subject,
            states: &self.states,
            rng: self.rng.as_ref(),
        };
        let decision = run(clip, &env);
        if let Decision::Replace(transition) = &decision {
            self.history
                .lock()
                .record(clip.handle(), clip.subject(), clip.original_slot(), transition);
        }
        decision
    }

    fn destroy(&self, clip: &mut ActiveClip, playback: &mut ClipPlayback) {
        self.clips.write().remove(&clip.handle());
        clip.destroy(playback);
    }

    pub fn on_activate(
        &self,
        handle: ClipHandle,
        project: &str,
        subject: &dyn Subject,
        playback: &mut ClipPlayback,
    ) -> Decision {
        let cell = self.get_or_create(handle, subject.id(), project, playback);
        let mut clip = cell.lock();
        self.drive(&mut clip, subject, |clip, env| clip.activate(playback, env))
    }

    /// Activate every participant of one synchronized animation, in order.
    pub fn activate_synchronized(
        &self,
        project: &str,
        group: SyncGroupId,
        participants: &mut [SyncParticipant<'_>],
    ) -> Vec<Decision> {
        participants
            .iter_mut()
            .map(|participant| {
                participant.playback.synchronized = Some(group);
                let cell = self.get_or_create(
                    participant.handle,
                    participant.subject.id(),
                    project,
                    participant.playback,
                );
                let mut clip = cell.lock();
                let playback = &mut *participant.playback;
                self.drive(&mut clip, participant.subject, |clip, env| {
                    clip.activate_synchronized(playback, env)
                })
            })
            .collect()
    }

    pub fn on_pre_update(
        &self,
        handle: ClipHandle,
        subject: &dyn Subject,
        playback: &mut ClipPlayback,
        dt: f32,
    ) -> Decision {
        let Some(cell) = self.lookup(handle) else {
            return Decision::Keep;
        };
        let mut clip = cell.lock();
        if clip.settle() {
            self.destroy(&mut clip, playback);
            return Decision::Keep;
        }
        self.drive(&mut clip, subject, |clip, env| clip.tick(playback, dt, env))
    }

    pub fn on_loop(&self, handle: ClipHandle, subject: &dyn Subject, playback: &mut ClipPlayback) -> Decision {
        let Some(cell) = self.lookup(handle) else {
            return Decision::Keep;
        };
        let mut clip = cell.lock();
        self.drive(&mut clip, subject, |clip, env| clip.on_loop(playback, env))
    }

    pub fn on_echo(&self, handle: ClipHandle, subject: &dyn Subject, playback: &mut ClipPlayback) -> Decision {
        let Some(cell) = self.lookup(handle) else {
            return Decision::Keep;
        };
        let mut clip = cell.lock();
        self.drive(&mut clip, subject, |clip, env| clip.on_echo(playback, env))
    }

    /// Returns whether the clip was destroyed (deferred while transitioning).
    pub fn on_deactivate(&self, handle: ClipHandle, playback: &mut ClipPlayback) -> bool {
        let Some(cell) = self.lookup(handle) else {
            return false;
        };
        let mut clip = cell.lock();
        if !clip.deactivate() {
            return false;
        }
        self.destroy(&mut clip, playback);
        true
    }

    /// Fold the clip's fading sources over `current`.
    pub fn blend_pose(&self, handle: ClipHandle, current: &PoseHandle, blender: &dyn PoseBlender) -> PoseHandle {
        match self.lookup(handle) {
            Some(cell) => cell.lock().blend_pose(current, blender),
            None => current.clone(),
        }
    }

    /// Age scoped state. Returns whether any entry is still alive.
    pub fn update_states(&self, dt: f32) -> bool {
        self.states.update(dt)
    }

    pub fn clear_subject(&self, subject: SubjectId) {
        self.states.clear_subject(subject);
    }

    pub fn is_tracked(&self, handle: ClipHandle) -> bool {
        self.clips.read().contains_key(&handle)
    }

    pub fn clip_count(&self) -> usize {
        self.clips.read().len()
    }

    // ---- dependents ----

    pub fn weak_clip(&self, handle: ClipHandle) -> Option<WeakClip> {
        let cell = self.lookup(handle)?;
        Some(WeakClip {
            handle,
            cell: Arc::downgrade(&cell),
        })
    }

    /// Register a callback run right before the clip is destroyed.
    /// Returns `false` if the clip is not tracked.
    pub fn on_clip_destroyed(&self, handle: ClipHandle, listener: DestroyListener) -> bool {
        match self.lookup(handle) {
            Some(cell) => {
                cell.lock().add_destroy_listener(listener);
                true
            }
            None => false,
        }
    }

    // ---- editor ----

    /// Evaluate any set against any subject, outside of a clip.
    pub fn evaluate_set_for(&self, set: &ConditionSet, subject: &dyn Subject) -> bool {
        let mut memo = RandomMemo::new();
        let mut ctx = EvalContext::new(subject, &self.states, self.rng.as_ref(), &mut memo);
        set.evaluate_all(&mut ctx)
    }

    pub fn evaluate_rule_set_for(&self, id: RuleSetId, subject: &dyn Subject) -> Result<bool> {
        let rule_set = self.rule_set(id)?;
        let mut memo = RandomMemo::new();
        let mut ctx = EvalContext::new(subject, &self.states, self.rng.as_ref(), &mut memo);
        Ok(rule_set.evaluate(&mut ctx))
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().entries().cloned().collect()
    }

    pub fn history_json(&self) -> serde_json::Result<String> {
        self.history.lock().to_json()
    }
}

impl Default for Replacer {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl fmt::Debug for Replacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replacer")
            .field("config", &*self.config.read())
            .field("factory", &self.factory.read().phase())
            .field("clips", &self.clip_count())
            .field("states", &self.states.len())
            .finish_non_exhaustive()
    }
}
