use anim_replacer_core::{
    ClipHandle, ClipRef, ClipToken, EvalContext, PlaybackMode, RandomMemo, ReplacementId,
    Replacer, ScopedStateStore, StateDataScope, Variant, VariantMode, VariantStateData, Variants,
};
use anim_replacer_test_fixtures::{
    playback, rule_set, single, slot, variant_group, with_variants, MockSubject, SequenceRandom,
    PROJECT,
};

const OWNER: ReplacementId = ReplacementId(1);

fn picks(group: &Variants, calls: usize) -> Vec<usize> {
    let subject = MockSubject::new(1);
    let states = ScopedStateStore::new(10.0);
    let rng = SequenceRandom::new(&[0.5]);
    let mut private = VariantStateData::default();
    (0..calls)
        .map(|_| {
            let mut memo = RandomMemo::new();
            let mut ctx = EvalContext::new(&subject, &states, &rng, &mut memo);
            group
                .select(OWNER, &mut ctx, &mut private)
                .map(|p| p.variant)
                .unwrap_or(usize::MAX)
        })
        .collect()
}

/// it should map a fixed draw onto the cumulative weight table
#[test]
fn weighted_roll_is_deterministic() {
    let group = Variants::new(
        VariantMode::Random,
        vec![Variant::new(10, "a.hkx").weight(3.0), Variant::new(11, "b.hkx").weight(1.0)],
    );
    assert_eq!(group.cumulative_weights(), &[0.75, 1.0]);

    let subject = MockSubject::new(1);
    let states = ScopedStateStore::new(10.0);
    for (roll, expected) in [(0.0, 0), (0.5, 0), (0.7499, 0), (0.75, 1), (0.999, 1)] {
        let rng = SequenceRandom::new(&[roll]);
        let mut memo = RandomMemo::new();
        let mut ctx = EvalContext::new(&subject, &states, &rng, &mut memo);
        let mut private = VariantStateData::default();
        let pick = group.select(OWNER, &mut ctx, &mut private).unwrap();
        assert_eq!(pick.variant, expected, "roll {roll}");
        assert_eq!(pick.clip_index, 10 + expected as u16);
    }
}

/// it should walk enabled variants in order and wrap around
#[test]
fn sequential_wraps() {
    let group = variant_group(VariantMode::Sequential, 20, 3);
    assert_eq!(picks(&group, 5), vec![0, 1, 2, 0, 1]);
}

/// it should fire each play-once variant once, then clear history and restart
#[test]
fn play_once_exhaustion_restarts_cycle() {
    for mode in [VariantMode::Random, VariantMode::Sequential] {
        let group = Variants::new(
            mode,
            vec![
                Variant::new(1, "first.hkx").play_once(true),
                Variant::new(2, "second.hkx").play_once(true),
            ],
        );
        assert_eq!(picks(&group, 3), vec![0, 1, 0], "{mode:?}");
    }
}

/// it should prefer an unplayed play-once variant over the weighted roll
#[test]
fn play_once_wins_before_roll() {
    let group = Variants::new(
        VariantMode::Random,
        vec![
            Variant::new(1, "intro.hkx").play_once(true),
            Variant::new(2, "idle_a.hkx"),
            Variant::new(3, "idle_b.hkx"),
        ],
    );
    assert_eq!(group.random_pool(), &[1, 2]);
    assert_eq!(group.sequential_pool(), &[0]);
    // Roll 0.5 lands on the boundary of two equal weights: second pool entry.
    assert_eq!(picks(&group, 3), vec![0, 2, 2]);
}

/// it should fire each play-once variant once, then roll the weighted pool until its history is dropped
#[test]
fn play_once_does_not_recur_while_weighted_pool_has_entries() {
    let group = Variants::new(
        VariantMode::Random,
        vec![
            Variant::new(1, "intro.hkx").play_once(true),
            Variant::new(2, "outro.hkx").play_once(true),
            Variant::new(3, "idle_a.hkx"),
            Variant::new(4, "idle_b.hkx"),
        ],
    );
    assert_eq!(group.sequential_pool(), &[0, 1]);
    assert_eq!(picks(&group, 6), vec![0, 1, 3, 3, 3, 3]);

    // Fresh bookkeeping (an expired shared state) starts a new cycle.
    let subject = MockSubject::new(1);
    let states = ScopedStateStore::new(10.0);
    let rng = SequenceRandom::new(&[0.5]);
    let mut state = VariantStateData::default();
    let pick = |state: &mut VariantStateData| {
        let mut memo = RandomMemo::new();
        let mut ctx = EvalContext::new(&subject, &states, &rng, &mut memo);
        group.select(OWNER, &mut ctx, state).map(|p| p.variant)
    };
    for _ in 0..4 {
        pick(&mut state);
    }
    assert_eq!(pick(&mut state), Some(3));
    state = VariantStateData::default();
    assert_eq!(pick(&mut state), Some(0));
}

/// it should fail closed when nothing is selectable
#[test]
fn empty_groups_fail_closed() {
    let mut group = variant_group(VariantMode::Random, 1, 2);
    group.set_disabled(0, true).unwrap();
    group.set_disabled(1, true).unwrap();
    assert!(!group.has_active());
    assert_eq!(picks(&group, 1), vec![usize::MAX]);

    let zero = Variants::new(
        VariantMode::Random,
        vec![Variant::new(1, "a.hkx").weight(0.0), Variant::new(2, "b.hkx").weight(0.0)],
    );
    assert_eq!(picks(&zero, 1), vec![usize::MAX]);
}

/// it should let only the leading clip advance shared sequential state
#[test]
fn shared_sequence_is_advanced_by_leader_only() {
    let group = variant_group(VariantMode::Sequential, 30, 3).with_scope(StateDataScope::Subject);
    let subject = MockSubject::new(5);
    let states = ScopedStateStore::new(10.0);
    let rng = SequenceRandom::new(&[0.5]);
    let first = ClipToken::new(ClipHandle(1));
    let second = ClipToken::new(ClipHandle(2));

    let select = |token: &std::sync::Arc<ClipToken>| {
        let mut memo = RandomMemo::new();
        let mut private = VariantStateData::default();
        let mut ctx =
            EvalContext::new(&subject, &states, &rng, &mut memo).with_clip(ClipRef::new(token));
        group.select(OWNER, &mut ctx, &mut private).map(|p| p.variant)
    };

    assert_eq!(select(&first), Some(0));
    assert_eq!(select(&second), Some(0), "follower repeats the current pick");
    assert_eq!(select(&first), Some(1));
    assert_eq!(select(&second), Some(1));

    drop(first);
    assert_eq!(select(&second), Some(2), "first live entry takes over");
    assert_eq!(states.len(), 1);
}

/// it should keep private history per clip when no scope is declared
#[test]
fn unscoped_history_is_private() {
    let group = variant_group(VariantMode::Sequential, 30, 2);
    let subject = MockSubject::new(5);
    let states = ScopedStateStore::new(10.0);
    let rng = SequenceRandom::new(&[0.5]);
    let mut a = VariantStateData::new(true);
    let mut b = VariantStateData::new(true);
    let mut memo = RandomMemo::new();
    let mut ctx = EvalContext::new(&subject, &states, &rng, &mut memo);

    assert_eq!(group.select(OWNER, &mut ctx, &mut a).map(|p| p.variant), Some(0));
    assert_eq!(group.select(OWNER, &mut ctx, &mut a).map(|p| p.variant), Some(1));
    assert_eq!(group.select(OWNER, &mut ctx, &mut b).map(|p| p.variant), Some(0));
    assert!(states.is_empty());
}

/// it should let the editor reorder an installed group and see the new order on the next pick
#[test]
fn editor_reorders_installed_variants() {
    let replacer = Replacer::default();
    replacer.install(
        PROJECT,
        slot(
            5,
            vec![
                with_variants(1, 5, variant_group(VariantMode::Sequential, 30, 3), rule_set(1, 10, vec![])),
                single(2, 5, 40, rule_set(2, 0, vec![])),
            ],
        ),
    );
    replacer
        .edit_variants(PROJECT, 5, ReplacementId(1), |group| group.move_variant(2, 0))
        .unwrap();

    let subject = MockSubject::new(1);
    let mut pb = playback(5, PlaybackMode::SinglePlay);
    replacer.on_activate(ClipHandle(1), PROJECT, &subject, &mut pb);
    assert_eq!(pb.binding_index, 32);
    let list = replacer.registry().candidates(PROJECT, 5).unwrap();
    assert!(list.get(ReplacementId(1)).unwrap().plays(32));
    assert!(!list.get(ReplacementId(2)).unwrap().plays(32));

    let err = replacer
        .edit_variants(PROJECT, 5, ReplacementId(2), |group| group.set_disabled(0, true))
        .unwrap_err();
    assert_eq!(err.category(), "edit");
    let err = replacer
        .edit_variants(PROJECT, 5, ReplacementId(9), |_| Ok(()))
        .unwrap_err();
    assert_eq!(err.category(), "lookup");
}
