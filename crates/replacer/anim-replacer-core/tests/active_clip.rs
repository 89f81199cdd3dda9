use anim_replacer_core::condition::Random;
use anim_replacer_core::{
    BlendOverrides, ClipFlags, ClipHandle, ClipPhase, Condition, Config, Decision, HistoryEntry,
    PlaybackMode, Reactivation, ReplacementId, Replacer, RuleSetSettings, SyncGroupId,
    SyncParticipant, TransitionKind, TransitionTrigger, VariantMode,
};
use anim_replacer_test_fixtures::{
    playback, pose, pose_label, rule_set, rule_set_with, single, slot, variant_group,
    with_variants, MockSubject, RecordingBlender, SequenceRandom, Spy, PROJECT,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const CLIP: ClipHandle = ClipHandle(77);

fn to(decision: &Decision) -> Option<Option<ReplacementId>> {
    decision.transition().map(|t| t.to)
}

/// it should leave binding, mode, flags and triggers bit-identical after destroy
#[test]
fn destroy_restores_original_binding() {
    let replacer = Replacer::default();
    let settings = RuleSetSettings {
        triggers_from_annotations_only: true,
        ignore_dont_convert_annotations: true,
        ..RuleSetSettings::default()
    };
    replacer.install(PROJECT, slot(5, vec![single(1, 5, 500, rule_set_with(1, settings, vec![]))]));
    let subject = MockSubject::new(1);
    let mut pb = playback(5, PlaybackMode::Looping);
    let before = pb.clone();

    let decision = replacer.on_activate(CLIP, PROJECT, &subject, &mut pb);
    let transition = decision.transition().unwrap();
    assert_eq!(transition.trigger, TransitionTrigger::Activate);
    assert_eq!(transition.blend_time, 0.0, "no blend on first activation");
    assert_eq!(transition.reactivate, None);
    assert_eq!(pb.binding_index, 500);
    assert_eq!(pb.triggers, None);
    assert!(!pb.flags.contains(ClipFlags::DONT_CONVERT_ANNOTATIONS_TO_TRIGGERS));
    assert!(pb.flags.contains(ClipFlags::MIRROR));

    assert!(replacer.on_deactivate(CLIP, &mut pb));
    assert!(!replacer.is_tracked(CLIP));
    assert_eq!(pb.binding_index, before.binding_index);
    assert_eq!(pb.mode, before.mode);
    assert_eq!(pb.flags, before.flags);
    assert_eq!(pb.triggers, before.triggers);
}

/// it should advance a sequential group on loop without a full evaluation until the cycle ends
#[test]
fn looping_sequential_variants_alternate() {
    let replacer = Replacer::default();
    let group = variant_group(VariantMode::Sequential, 200, 2);
    replacer.install(PROJECT, slot(5, vec![with_variants(1, 5, group, rule_set(1, 0, vec![]))]));
    let subject = MockSubject::new(1);
    let mut pb = playback(5, PlaybackMode::Looping);

    let activation = replacer.on_activate(CLIP, PROJECT, &subject, &mut pb);
    assert_eq!(activation.transition().and_then(|t| t.variant), Some(0));

    let mut seen = Vec::new();
    for _ in 0..4 {
        let decision = replacer.on_loop(CLIP, &subject, &mut pb);
        let transition = decision.transition().expect("variant changes every loop");
        assert_eq!(transition.trigger, TransitionTrigger::Loop);
        assert_eq!(transition.to, Some(ReplacementId(1)));
        seen.push(transition.variant.unwrap());
    }
    assert_eq!(seen, vec![1, 0, 1, 0]);
    assert_eq!(pb.binding_index, 200);
}

/// it should switch to a newly winning candidate while the current one is interruptible
#[test]
fn interruptible_replacement_is_reevaluated_on_tick() {
    let replacer = Replacer::default();
    let first = Spy::new(true);
    let second = Spy::new(false);
    let interruptible = RuleSetSettings {
        priority: 10,
        interruptible: true,
        ..RuleSetSettings::default()
    };
    let override_blend = RuleSetSettings {
        priority: 20,
        blend_times: BlendOverrides {
            interrupt: Some(0.5),
            ..BlendOverrides::default()
        },
        ..RuleSetSettings::default()
    };
    replacer.install(
        PROJECT,
        slot(
            5,
            vec![
                single(1, 5, 101, rule_set_with(1, interruptible, vec![Condition::new(first.clone())])),
                single(2, 5, 102, rule_set_with(2, override_blend, vec![Condition::new(second.clone())])),
            ],
        ),
    );
    let subject = MockSubject::new(1);
    let mut pb = playback(5, PlaybackMode::SinglePlay);
    pb.pose = Some(pose("walk"));

    assert_eq!(to(&replacer.on_activate(CLIP, PROJECT, &subject, &mut pb)), Some(Some(ReplacementId(1))));
    assert!(replacer.on_pre_update(CLIP, &subject, &mut pb, 0.016).is_keep());

    second.set(true);
    pb.local_time = 0.7;
    let decision = replacer.on_pre_update(CLIP, &subject, &mut pb, 0.016);
    let transition = decision.transition().unwrap();
    assert_eq!(transition.trigger, TransitionTrigger::Interrupt);
    assert_eq!(transition.kind, TransitionKind::Restart);
    assert_eq!(transition.from, Some(ReplacementId(1)));
    assert_eq!(transition.to, Some(ReplacementId(2)));
    assert_eq!(transition.blend_time, 0.5, "incoming override wins");
    assert_eq!(transition.reactivate, Some(Reactivation::Clip));
    assert_eq!(pb.local_time, 0.0);
    assert_eq!(pb.binding_index, 102);

    // The outgoing pose fades out over the blend window.
    let clip = replacer.weak_clip(CLIP).unwrap();
    assert!(clip.upgrade().unwrap().lock().is_blending());
    let blender = RecordingBlender::default();
    let blended = replacer.blend_pose(CLIP, &pose("run"), &blender);
    assert_eq!(pose_label(&blended), "blend(walk,run,0.00)");

    // Host cycles the clip: deactivate is deferred, reactivation settles.
    assert!(!replacer.on_deactivate(CLIP, &mut pb));
    assert!(replacer.on_activate(CLIP, PROJECT, &subject, &mut pb).is_keep());
    assert!(replacer.is_tracked(CLIP));

    replacer.on_pre_update(CLIP, &subject, &mut pb, 0.25);
    let blended = replacer.blend_pose(CLIP, &pose("run"), &blender);
    assert_eq!(pose_label(&blended), "blend(walk,run,0.50)");
    replacer.on_pre_update(CLIP, &subject, &mut pb, 0.3);
    let blended = replacer.blend_pose(CLIP, &pose("run"), &blender);
    assert_eq!(pose_label(&blended), "run");
    assert_eq!(blender.weights().len(), 2);
    assert!(!clip.upgrade().unwrap().lock().is_blending());
}

/// it should interrupt the original animation when the slot has an interruptible candidate
#[test]
fn original_is_interrupted_by_interruptible_candidate() {
    let replacer = Replacer::default();
    let gate = Spy::new(false);
    let settings = RuleSetSettings {
        interruptible: true,
        ..RuleSetSettings::default()
    };
    replacer.install(
        PROJECT,
        slot(5, vec![single(1, 5, 101, rule_set_with(1, settings, vec![Condition::new(gate.clone())]))]),
    );
    let subject = MockSubject::new(1);
    let mut pb = playback(5, PlaybackMode::SinglePlay);

    assert!(replacer.on_activate(CLIP, PROJECT, &subject, &mut pb).is_keep());
    assert!(replacer.on_pre_update(CLIP, &subject, &mut pb, 0.016).is_keep());

    gate.set(true);
    let decision = replacer.on_pre_update(CLIP, &subject, &mut pb, 0.016);
    assert_eq!(to(&decision), Some(Some(ReplacementId(1))));
    assert_eq!(decision.transition().unwrap().blend_time, Config::default().interrupt_blend_time);

    // Falling back to the original keeps its timeline.
    replacer.on_pre_update(CLIP, &subject, &mut pb, 0.016);
    gate.set(false);
    pb.local_time = 1.2;
    let decision = replacer.on_pre_update(CLIP, &subject, &mut pb, 0.016);
    let transition = decision.transition().unwrap();
    assert_eq!(transition.to, None);
    assert_eq!(transition.kind, TransitionKind::Continue);
    assert_eq!(transition.start_time, 1.2);
    assert_eq!(pb.binding_index, 5);
}

/// it should destroy a clip whose deactivation was deferred once the transition settles
#[test]
fn deferred_deactivation_completes_on_next_tick() {
    let replacer = Replacer::default();
    let gate = Spy::new(true);
    let settings = RuleSetSettings {
        interruptible: true,
        ..RuleSetSettings::default()
    };
    replacer.install(
        PROJECT,
        slot(5, vec![single(1, 5, 101, rule_set_with(1, settings, vec![Condition::new(gate.clone())]))]),
    );
    let subject = MockSubject::new(1);
    let mut pb = playback(5, PlaybackMode::SinglePlay);
    let before = pb.clone();

    replacer.on_activate(CLIP, PROJECT, &subject, &mut pb);
    gate.set(false);
    assert!(!replacer.on_pre_update(CLIP, &subject, &mut pb, 0.016).is_keep());

    let clip = replacer.weak_clip(CLIP).unwrap();
    assert_eq!(clip.upgrade().unwrap().lock().phase(), ClipPhase::Transitioning);
    assert!(!replacer.on_deactivate(CLIP, &mut pb));
    assert!(clip.upgrade().unwrap().lock().is_deactivate_deferred());

    assert!(replacer.on_pre_update(CLIP, &subject, &mut pb, 0.016).is_keep());
    assert!(!replacer.is_tracked(CLIP));
    assert!(!clip.is_alive());
    assert_eq!(pb.binding_index, before.binding_index);
}

/// it should notify destroy observers and expire weak handles
#[test]
fn destroy_observers_run_before_teardown() {
    let replacer = Replacer::default();
    replacer.install(PROJECT, slot(5, vec![single(1, 5, 101, rule_set(1, 0, vec![]))]));
    let subject = MockSubject::new(1);
    let mut pb = playback(5, PlaybackMode::SinglePlay);

    assert!(!replacer.on_clip_destroyed(CLIP, Box::new(|_| {})), "untracked clip");
    replacer.on_activate(CLIP, PROJECT, &subject, &mut pb);
    let weak = replacer.weak_clip(CLIP).unwrap();
    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    assert!(replacer.on_clip_destroyed(
        CLIP,
        Box::new(move |handle| {
            assert_eq!(handle, CLIP);
            flag.store(true, Ordering::SeqCst);
        })
    ));

    assert!(replacer.on_deactivate(CLIP, &mut pb));
    assert!(fired.load(Ordering::SeqCst));
    assert!(weak.upgrade().is_none());
    assert!(replacer.on_loop(CLIP, &subject, &mut pb).is_keep(), "gone means absent");
}

/// it should reuse the tracked clip when activation is reported twice
#[test]
fn double_activation_is_idempotent() {
    let replacer = Replacer::default();
    replacer.install(PROJECT, slot(5, vec![single(1, 5, 101, rule_set(1, 0, vec![]))]));
    let subject = MockSubject::new(1);
    let mut pb = playback(5, PlaybackMode::SinglePlay);

    assert!(!replacer.on_activate(CLIP, PROJECT, &subject, &mut pb).is_keep());
    assert!(replacer.on_activate(CLIP, PROJECT, &subject, &mut pb).is_keep());
    assert_eq!(replacer.clip_count(), 1);
    let clip = replacer.weak_clip(CLIP).unwrap().upgrade().unwrap();
    assert_eq!(clip.lock().original_slot(), 5);
}

/// it should decide the loop ahead of the seam so the blend ends on it
#[test]
fn loop_seam_is_precomputed() {
    let replacer = Replacer::default();
    let late = Spy::new(false);
    replacer.install(
        PROJECT,
        slot(
            5,
            vec![
                single(1, 5, 101, rule_set(1, 10, vec![])),
                single(2, 5, 102, rule_set(2, 20, vec![Condition::new(late.clone())])),
            ],
        ),
    );
    let subject = MockSubject::new(1);
    let mut pb = playback(5, PlaybackMode::Looping);
    pb.pose = Some(pose("a"));

    replacer.on_activate(CLIP, PROJECT, &subject, &mut pb);
    pb.local_time = 1.0;
    assert!(replacer.on_pre_update(CLIP, &subject, &mut pb, 0.016).is_keep());

    late.set(true);
    pb.local_time = 1.8;
    let decision = replacer.on_pre_update(CLIP, &subject, &mut pb, 0.016);
    let transition = decision.transition().unwrap();
    assert_eq!(transition.kind, TransitionKind::LoopSeam);
    assert_eq!(transition.to, Some(ReplacementId(2)));
    assert!((transition.blend_time - 0.2).abs() < 1e-5);
    assert!((transition.start_time - 1.8).abs() < 1e-5);

    // The wrap itself consumes the pre-computed decision.
    let calls = late.calls();
    assert!(replacer.on_loop(CLIP, &subject, &mut pb).is_keep());
    assert_eq!(late.calls(), calls);
}

/// it should only replace on echo when both the config and the rule set allow it
#[test]
fn echo_is_gated() {
    let gate = Spy::new(false);
    let build = |config: Config| {
        let replacer = Replacer::new(config);
        let echo = RuleSetSettings {
            priority: 10,
            replace_on_echo: true,
            ..RuleSetSettings::default()
        };
        replacer.install(
            PROJECT,
            slot(
                5,
                vec![
                    single(1, 5, 101, rule_set_with(1, echo, vec![])),
                    single(2, 5, 102, rule_set(2, 20, vec![Condition::new(gate.clone())])),
                ],
            ),
        );
        replacer
    };
    let subject = MockSubject::new(1);

    gate.set(false);
    let closed = build(Config::default());
    let mut pb = playback(5, PlaybackMode::SinglePlay);
    closed.on_activate(CLIP, PROJECT, &subject, &mut pb);
    gate.set(true);
    assert!(closed.on_echo(CLIP, &subject, &mut pb).is_keep());

    gate.set(false);
    let open = build(Config {
        replace_on_echo: true,
        ..Config::default()
    });
    let mut pb = playback(5, PlaybackMode::SinglePlay);
    open.on_activate(CLIP, PROJECT, &subject, &mut pb);
    gate.set(true);
    let decision = open.on_echo(CLIP, &subject, &mut pb);
    let transition = decision.transition().unwrap();
    assert_eq!(transition.trigger, TransitionTrigger::Echo);
    assert_eq!(transition.to, Some(ReplacementId(2)));
    assert_eq!(transition.blend_time, Config::default().echo_blend_time);
}

/// it should re-roll random conditions on loop unless the replacement keeps results
#[test]
fn loop_starts_new_random_epoch() {
    for keep in [false, true] {
        let replacer = Replacer::with_random(
            Config::default(),
            Box::new(SequenceRandom::new(&[0.2, 0.9])),
        );
        let settings = RuleSetSettings {
            keep_random_results_on_loop: keep,
            ..RuleSetSettings::default()
        };
        replacer.install(
            PROJECT,
            slot(
                5,
                vec![single(1, 5, 101, rule_set_with(1, settings, vec![Condition::new(Random::chance(0.5))]))],
            ),
        );
        let subject = MockSubject::new(1);
        let mut pb = playback(5, PlaybackMode::Looping);

        assert_eq!(to(&replacer.on_activate(CLIP, PROJECT, &subject, &mut pb)), Some(Some(ReplacementId(1))));
        let decision = replacer.on_loop(CLIP, &subject, &mut pb);
        if keep {
            assert!(decision.is_keep());
        } else {
            assert_eq!(to(&decision), Some(None), "roll 0.9 fails the 50% chance");
            assert_eq!(pb.binding_index, 5);
        }
    }
}

/// it should drive synchronized participants through one entry point
#[test]
fn synchronized_activation() {
    let replacer = Replacer::default();
    replacer.install(PROJECT, slot(5, vec![single(1, 5, 101, rule_set(1, 0, vec![]))]));
    let a = MockSubject::new(1);
    let b = MockSubject::new(2);
    let mut pa = playback(5, PlaybackMode::SinglePlay);
    let mut pb = playback(5, PlaybackMode::SinglePlay);
    pb.synchronized = Some(SyncGroupId(3));

    assert!(replacer.on_activate(ClipHandle(2), PROJECT, &b, &mut pb).is_keep());

    let decisions = {
        let mut participants = [
            SyncParticipant {
                handle: ClipHandle(1),
                subject: &a,
                playback: &mut pa,
            },
            SyncParticipant {
                handle: ClipHandle(2),
                subject: &b,
                playback: &mut pb,
            },
        ];
        replacer.activate_synchronized(PROJECT, SyncGroupId(3), &mut participants)
    };
    assert_eq!(decisions.len(), 2);
    assert!(decisions.iter().all(|d| to(d) == Some(Some(ReplacementId(1)))));
    assert_eq!(pa.synchronized, Some(SyncGroupId(3)));
    assert_eq!((pa.binding_index, pb.binding_index), (101, 101));
}

/// it should record applied transitions and export them as JSON
#[test]
fn history_is_exported() {
    let replacer = Replacer::default();
    let group = variant_group(VariantMode::Sequential, 200, 2).with_blend_between_variants(false);
    replacer.install(PROJECT, slot(5, vec![with_variants(1, 5, group, rule_set(1, 0, vec![]))]));
    let subject = MockSubject::new(9);
    let mut pb = playback(5, PlaybackMode::Looping);

    replacer.on_activate(CLIP, PROJECT, &subject, &mut pb);
    replacer.on_loop(CLIP, &subject, &mut pb);

    let history = replacer.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].trigger, TransitionTrigger::Activate);
    assert_eq!(history[1].binding_index, 201);
    assert_eq!(history[1].blend_time, 0.0, "variant switch without blending");

    let parsed: Vec<HistoryEntry> = serde_json::from_str(&replacer.history_json().unwrap()).unwrap();
    assert_eq!(parsed, history);
    assert_eq!(parsed[1].subject.0, 9);
}
