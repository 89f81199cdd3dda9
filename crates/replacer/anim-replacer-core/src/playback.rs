//! Host-owned playback data the core reads and rewrites, and the opaque
//! pose-blend capability.

use crate::ids::SyncGroupId;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackMode {
    #[default]
    SinglePlay,
    Looping,
    UserControlled,
    PingPong,
}

impl PlaybackMode {
    #[inline]
    pub fn is_looping(self) -> bool {
        matches!(self, Self::Looping | Self::PingPong)
    }
}

/// Clip generator flag bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClipFlags(pub u8);

impl ClipFlags {
    pub const CONTINUE_MOTION_AT_END: u8 = 0x1;
    pub const SYNC_HALF_CYCLE_IN_PING_PONG: u8 = 0x2;
    pub const MIRROR: u8 = 0x4;
    pub const FORCE_DENSE_POSE: u8 = 0x8;
    pub const DONT_CONVERT_ANNOTATIONS_TO_TRIGGERS: u8 = 0x10;
    pub const IGNORE_MOTION: u8 = 0x20;

    #[inline]
    pub fn contains(self, bits: u8) -> bool {
        self.0 & bits == bits
    }

    #[inline]
    pub fn with(self, bits: u8) -> Self {
        Self(self.0 | bits)
    }

    #[inline]
    pub fn without(self, bits: u8) -> Self {
        Self(self.0 & !bits)
    }
}

/// One event trigger of a clip (fires `event` at `time` seconds).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerAnnotation {
    pub time: f32,
    pub event: String,
}

/// Opaque snapshot of a pose, produced and consumed only by the host.
pub type PoseHandle = Arc<dyn Any + Send + Sync>;

/// Host blend primitive. `t = 0` yields `from`, `t = 1` yields `to`.
pub trait PoseBlender: Send + Sync {
    fn blend_poses(&self, from: &PoseHandle, to: &PoseHandle, t: f32) -> PoseHandle;
}

/// The host's playing instance, as far as replacement is concerned.
#[derive(Clone, Debug, Default)]
pub struct ClipPlayback {
    /// Index of the clip currently bound in the behavior project.
    pub binding_index: u16,
    pub mode: PlaybackMode,
    pub flags: ClipFlags,
    /// Trigger array; `None` means triggers come from annotations only.
    pub triggers: Option<Vec<TriggerAnnotation>>,
    pub local_time: f32,
    pub duration: f32,
    /// Latest sampled output pose, used as the outgoing blend source.
    pub pose: Option<PoseHandle>,
    /// Set when this instance is one participant of a synchronized animation.
    pub synchronized: Option<SyncGroupId>,
}

impl ClipPlayback {
    pub fn new(binding_index: u16, mode: PlaybackMode, duration: f32) -> Self {
        Self {
            binding_index,
            mode,
            duration,
            ..Self::default()
        }
    }

    /// Seconds left until the clip reaches its end.
    pub fn remaining(&self) -> f32 {
        (self.duration - self.local_time).max(0.0)
    }
}

/// Binding data captured before the first replacement, restored on teardown.
#[derive(Clone, Debug, PartialEq)]
pub struct OriginalBinding {
    pub binding_index: u16,
    pub mode: PlaybackMode,
    pub flags: ClipFlags,
    pub triggers: Option<Vec<TriggerAnnotation>>,
}

impl OriginalBinding {
    pub fn capture(playback: &ClipPlayback) -> Self {
        Self {
            binding_index: playback.binding_index,
            mode: playback.mode,
            flags: playback.flags,
            triggers: playback.triggers.clone(),
        }
    }

    pub fn restore(&self, playback: &mut ClipPlayback) {
        playback.binding_index = self.binding_index;
        playback.mode = self.mode;
        playback.flags = self.flags;
        playback.triggers = self.triggers.clone();
    }
}
