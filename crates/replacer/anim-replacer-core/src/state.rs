//! Scoped, lifetime-managed state shared between clips.
//!
//! Conditions and variant groups that need memory beyond a single evaluation
//! keep it here, partitioned by subject and by the scope they declare. Entries
//! are dropped by [`ScopedStateStore::update`] only when all of these hold:
//! - the state reports it is not dirty,
//! - no live clip that touched the entry still wants loop/echo notifications,
//! - the entry has been idle for longer than the configured lifetime.

use crate::ids::{ClipHandle, ConditionId, ModId, ReplacementId, RuleSetId, SubjectId};
use hashbrown::HashMap;
use log::debug;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Declared sharing granularity of a piece of state.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateDataScope {
    /// Not persisted in the store; kept privately by the clip, if at all.
    #[default]
    None,
    /// One entry per playing instance.
    Local,
    /// Shared by every clip evaluating the same rule set.
    RuleSet,
    /// Shared by every rule set of the same mod.
    Mod,
    /// Shared by everything playing on the same subject.
    Subject,
}

/// The owners a scope can be resolved against.
#[derive(Copy, Clone, Debug, Default)]
pub struct ScopeOwners {
    pub clip: Option<ClipHandle>,
    pub rule_set: Option<RuleSetId>,
    pub mod_id: Option<ModId>,
}

impl StateDataScope {
    /// Resolve into a store key component. `None` means "do not use the store".
    pub fn resolve(self, owners: &ScopeOwners) -> Option<ScopeKey> {
        match self {
            Self::None => None,
            Self::Local => owners.clip.map(ScopeKey::Local),
            Self::RuleSet => owners.rule_set.map(ScopeKey::RuleSet),
            Self::Mod => owners.mod_id.map(ScopeKey::Mod),
            Self::Subject => Some(ScopeKey::Subject),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ScopeKey {
    Local(ClipHandle),
    RuleSet(RuleSetId),
    Mod(ModId),
    Subject,
}

/// Which condition or variant group a state belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StateOwner {
    Condition(ConditionId),
    Variants(ReplacementId),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct StateKey {
    pub subject: SubjectId,
    pub owner: StateOwner,
    pub scope: ScopeKey,
}

/// Liveness token owned by exactly one active clip.
#[derive(Debug)]
pub struct ClipToken {
    handle: ClipHandle,
}

impl ClipToken {
    pub fn new(handle: ClipHandle) -> Arc<Self> {
        Arc::new(Self { handle })
    }

    pub fn handle(&self) -> ClipHandle {
        self.handle
    }
}

/// Non-owning reference to an active clip. Dead once the clip is destroyed.
#[derive(Clone, Debug)]
pub struct ClipRef {
    handle: ClipHandle,
    token: Weak<ClipToken>,
}

impl ClipRef {
    pub fn new(token: &Arc<ClipToken>) -> Self {
        Self {
            handle: token.handle,
            token: Arc::downgrade(token),
        }
    }

    #[inline]
    pub fn handle(&self) -> ClipHandle {
        self.handle
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.token.strong_count() > 0
    }
}

/// Opaque state stored on behalf of a condition or variant group.
pub trait ScopedState: Any + Send + fmt::Debug {
    /// A dirty state is never expired.
    fn is_dirty(&self) -> bool {
        false
    }

    /// Whether loop/echo notifications from interested clips should reach this state.
    fn wants_loop_or_echo(&self, _is_echo: bool) -> bool {
        false
    }

    fn on_loop_or_echo(&mut self, _is_echo: bool) {}

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub type StateHandle = Arc<Mutex<dyn ScopedState>>;

#[derive(Debug)]
struct StateEntry {
    state: StateHandle,
    idle: f32,
    clips: Vec<ClipRef>,
}

impl StateEntry {
    fn new(state: StateHandle) -> Self {
        Self {
            state,
            idle: 0.0,
            clips: Vec::new(),
        }
    }

    fn touch(&mut self, clip: Option<&ClipRef>) {
        self.idle = 0.0;
        if let Some(clip) = clip {
            self.clips.retain(ClipRef::is_alive);
            if !self.clips.iter().any(|c| c.handle == clip.handle) {
                self.clips.push(clip.clone());
            }
        }
    }

    fn interested_clip(&self, handle: ClipHandle) -> bool {
        self.clips
            .iter()
            .any(|c| c.handle == handle && c.is_alive())
    }
}

#[derive(Debug)]
pub struct ScopedStateStore {
    entries: RwLock<HashMap<StateKey, StateEntry>>,
    lifetime: RwLock<f32>,
}

impl ScopedStateStore {
    pub fn new(lifetime: f32) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            lifetime: RwLock::new(lifetime),
        }
    }

    pub fn set_lifetime(&self, lifetime: f32) {
        *self.lifetime.write() = lifetime;
    }

    pub fn lifetime(&self) -> f32 {
        *self.lifetime.read()
    }

    /// Look up an entry, resetting its idle timer and remembering `clip` as interested.
    pub fn access(&self, key: &StateKey, clip: Option<&ClipRef>) -> Option<StateHandle> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(key)?;
        entry.touch(clip);
        Some(entry.state.clone())
    }

    /// Insert `state` under `key`, replacing any previous entry.
    pub fn create<S: ScopedState>(
        &self,
        key: StateKey,
        state: S,
        clip: Option<&ClipRef>,
    ) -> StateHandle {
        let handle: StateHandle = Arc::new(Mutex::new(state));
        let mut entry = StateEntry::new(handle.clone());
        entry.touch(clip);
        self.entries.write().insert(key, entry);
        handle
    }

    /// Access the entry, creating it with `init` when absent. Atomic with respect to
    /// other callers racing on the same key.
    pub fn access_or_create<S, F>(&self, key: StateKey, clip: Option<&ClipRef>, init: F) -> StateHandle
    where
        S: ScopedState,
        F: FnOnce() -> S,
    {
        let mut entries = self.entries.write();
        let entry = entries.entry(key).or_insert_with(|| {
            let handle: StateHandle = Arc::new(Mutex::new(init()));
            StateEntry::new(handle)
        });
        entry.touch(clip);
        entry.state.clone()
    }

    /// Age every entry by `dt` and drop the expired ones.
    /// Returns whether any entry is still alive.
    pub fn update(&self, dt: f32) -> bool {
        let lifetime = self.lifetime();
        let mut entries = self.entries.write();
        entries.retain(|key, entry| {
            entry.clips.retain(ClipRef::is_alive);
            entry.idle += dt;

            // In use right now: it is certainly not idle.
            let Some(state) = entry.state.try_lock() else {
                return true;
            };
            if state.is_dirty() {
                return true;
            }
            let interested = !entry.clips.is_empty()
                && (state.wants_loop_or_echo(false) || state.wants_loop_or_echo(true));
            if interested {
                return true;
            }
            let keep = entry.idle <= lifetime;
            if !keep {
                debug!("scoped state expired: {:?} after {:.2}s idle", key, entry.idle);
            }
            keep
        });
        !entries.is_empty()
    }

    /// Route a loop/echo of `clip` to every state on `subject` the clip has touched.
    pub fn on_loop_or_echo(&self, subject: SubjectId, clip: ClipHandle, is_echo: bool) {
        let handles: Vec<StateHandle> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|(key, entry)| key.subject == subject && entry.interested_clip(clip))
                .map(|(_, entry)| entry.state.clone())
                .collect()
        };
        for handle in handles {
            let mut state = handle.lock();
            if state.wants_loop_or_echo(is_echo) {
                state.on_loop_or_echo(is_echo);
            }
        }
    }

    /// Drop everything stored for `subject`.
    pub fn clear_subject(&self, subject: SubjectId) {
        self.entries.write().retain(|key, _| key.subject != subject);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn contains(&self, key: &StateKey) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
