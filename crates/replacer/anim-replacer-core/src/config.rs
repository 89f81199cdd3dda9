//! Core configuration for anim-replacer-core.

use serde::{Deserialize, Serialize};

/// Global defaults consulted when a rule set does not override them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Blend time (seconds) when an interruptible replacement switches mid-clip.
    pub interrupt_blend_time: f32,
    /// Blend time (seconds) when a replacement changes at a loop boundary.
    pub loop_blend_time: f32,
    /// Blend time (seconds) when a replacement changes on echo.
    pub echo_blend_time: f32,

    /// When false, transitions never snapshot the outgoing pose.
    pub blending_enabled: bool,

    /// Re-evaluate candidates when a looping clip wraps around.
    pub replace_on_loop: bool,
    /// Re-evaluate candidates when a clip echoes into itself.
    pub replace_on_echo: bool,

    /// Idle seconds after which an uninteresting scoped-state entry is dropped.
    pub state_lifetime: f32,

    /// Maximum stale pose sources kept per clip; the oldest is dropped first.
    pub max_blend_sources: usize,

    /// Capacity of the replacement history ring buffer (0 disables it).
    pub history_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interrupt_blend_time: 0.3,
            loop_blend_time: 0.3,
            echo_blend_time: 0.1,
            blending_enabled: true,
            replace_on_loop: true,
            replace_on_echo: false,
            state_lifetime: 20.0,
            max_blend_sources: 4,
            history_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: Config = serde_json::from_str(r#"{ "loop_blend_time": 0.5 }"#).unwrap();
        assert_eq!(cfg.loop_blend_time, 0.5);
        assert_eq!(cfg.interrupt_blend_time, Config::default().interrupt_blend_time);
        assert!(cfg.replace_on_loop);
    }
}
