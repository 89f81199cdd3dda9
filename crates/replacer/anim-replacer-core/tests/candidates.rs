use anim_replacer_core::condition::{FormComponent, IsForm};
use anim_replacer_core::{
    ClipHandle, Condition, Config, EvalContext, FactoryPhase, FormId, FormRef, PlaybackMode,
    RandomMemo, ReplacementId, Replacer, RuleSetId, ScopedStateStore,
};
use anim_replacer_test_fixtures::{
    always, playback, rule_set, single, slot, Constant, MockSubject, SequenceRandom, Spy,
    StaticResolver, PROJECT,
};

fn ids(list: &anim_replacer_core::AnimationReplacements) -> Vec<u32> {
    list.iter().map(|c| c.id().0).collect()
}

/// it should keep candidates sorted by descending priority with inserts landing in place
#[test]
fn priority_sort_places_middle_insert_between() {
    let mut list = slot(
        5,
        vec![
            single(1, 5, 101, rule_set(1, 10, vec![])),
            single(2, 5, 102, rule_set(2, 30, vec![])),
        ],
    );
    assert_eq!(ids(&list), vec![2, 1]);

    list.add(single(3, 5, 103, rule_set(3, 20, vec![])));
    assert_eq!(ids(&list), vec![2, 3, 1]);
    let priorities: Vec<i32> = list.iter().map(|c| c.priority()).collect();
    assert!(priorities.windows(2).all(|w| w[0] >= w[1]));

    assert!(list.remove(ReplacementId(3)).is_some());
    assert_eq!(ids(&list), vec![2, 1]);
}

/// it should pick the first enabled candidate whose conditions hold
#[test]
fn first_passing_candidate_wins() {
    let subject = MockSubject::new(1);
    let states = ScopedStateStore::new(10.0);
    let rng = SequenceRandom::new(&[0.5]);
    let list = slot(
        5,
        vec![
            single(1, 5, 101, rule_set(1, 30, vec![always(true)])),
            single(2, 5, 102, rule_set(2, 20, vec![always(true)])),
        ],
    );
    let mut memo = RandomMemo::new();
    let mut ctx = EvalContext::new(&subject, &states, &rng, &mut memo);
    assert_eq!(list.evaluate(&mut ctx).map(|c| c.id()), Some(ReplacementId(1)));

    list.get(ReplacementId(1)).unwrap().set_disabled(true);
    assert_eq!(list.evaluate(&mut ctx).map(|c| c.id()), Some(ReplacementId(2)));

    list.get(ReplacementId(2))
        .unwrap()
        .rule_set()
        .update_settings(|s| s.disabled = true);
    assert!(list.evaluate(&mut ctx).is_none());
}

/// it should let the priority-20 candidate win only once its condition holds
#[test]
fn slot_five_priority_scenario() {
    let replacer = Replacer::new(Config::default());
    replacer.install(
        "Actors\\Character\\DefaultMale.hkx",
        slot(
            5,
            vec![
                single(10, 5, 110, rule_set(10, 10, vec![always(true)])),
                single(20, 5, 120, rule_set(20, 20, vec![always(false)])),
            ],
        ),
    );
    let subject = MockSubject::new(1);

    let mut first = playback(5, PlaybackMode::SinglePlay);
    let decision = replacer.on_activate(ClipHandle(1), PROJECT, &subject, &mut first);
    assert_eq!(decision.transition().and_then(|t| t.to), Some(ReplacementId(10)));
    assert_eq!(first.binding_index, 110);

    replacer
        .edit_conditions(RuleSetId(20), |set| set.replace(0, always(true)).map(|_| ()))
        .unwrap();

    let mut second = playback(5, PlaybackMode::SinglePlay);
    let decision = replacer.on_activate(ClipHandle(2), PROJECT, &subject, &mut second);
    assert_eq!(decision.transition().and_then(|t| t.to), Some(ReplacementId(20)));
    assert_eq!(second.binding_index, 120);
}

/// it should re-sort candidate lists when a rule set's priority changes
#[test]
fn priority_change_resorts_installed_lists() {
    let replacer = Replacer::default();
    replacer.install(
        PROJECT,
        slot(
            5,
            vec![
                single(1, 5, 101, rule_set(1, 10, vec![])),
                single(2, 5, 102, rule_set(2, 20, vec![])),
            ],
        ),
    );
    let list = replacer.registry().candidates(PROJECT, 5).unwrap();
    assert_eq!(ids(&list), vec![2, 1]);

    replacer.update_rule_set(RuleSetId(1), |s| s.priority = 50).unwrap();
    let list = replacer.registry().candidates(PROJECT, 5).unwrap();
    assert_eq!(ids(&list), vec![1, 2]);

    let err = replacer.update_rule_set(RuleSetId(99), |_| {}).unwrap_err();
    assert_eq!(err.category(), "lookup");
}

/// it should return tied candidates to insertion order once a priority change is undone
#[test]
fn undone_priority_change_restores_tie_order() {
    let replacer = Replacer::default();
    replacer.install(
        PROJECT,
        slot(
            5,
            vec![
                single(1, 5, 101, rule_set(1, 10, vec![])),
                single(2, 5, 102, rule_set(2, 10, vec![])),
            ],
        ),
    );
    let order = || ids(&replacer.registry().candidates(PROJECT, 5).unwrap());
    assert_eq!(order(), vec![1, 2]);

    replacer.update_rule_set(RuleSetId(2), |s| s.priority = 50).unwrap();
    assert_eq!(order(), vec![2, 1]);

    replacer.update_rule_set(RuleSetId(2), |s| s.priority = 10).unwrap();
    assert_eq!(order(), vec![1, 2]);

    replacer
        .registry()
        .edit_slot(PROJECT, 5, |list| list.add(single(3, 5, 103, rule_set(3, 10, vec![]))))
        .unwrap();
    assert_eq!(order(), vec![1, 2, 3]);
}

/// it should revalidate only the edited rule set and list invalid ones
#[test]
fn edits_revalidate_owning_rule_set() {
    let replacer = Replacer::default();
    let form = FormRef::new("Skyrim.esm", 0x13bb0);
    let is_form = || {
        Condition::new(IsForm {
            form: FormComponent::new(form.clone()),
        })
    };
    replacer.install(
        PROJECT,
        slot(
            7,
            vec![
                single(1, 7, 101, rule_set(1, 10, vec![is_form()])),
                single(2, 7, 102, rule_set(2, 5, vec![always(true)])),
            ],
        ),
    );
    assert_eq!(replacer.invalid_rule_sets(), vec![RuleSetId(1)]);

    replacer.resolve_forms(&StaticResolver::default().with(form.clone(), FormId(0x13bb0)));
    assert!(replacer.invalid_rule_sets().is_empty());

    replacer
        .edit_conditions(RuleSetId(2), |set| {
            set.push(replacer.create_condition("NoSuchCondition"));
            Ok(())
        })
        .unwrap();
    assert_eq!(replacer.invalid_rule_sets(), vec![RuleSetId(2)]);

    let err = replacer
        .edit_conditions(RuleSetId(2), |set| set.remove(9).map(|_| ()))
        .unwrap_err();
    assert_eq!(err.category(), "edit");
}

/// it should evaluate any set or rule set against an arbitrary subject
#[test]
fn editor_preview_evaluation() {
    let replacer = Replacer::default();
    replacer.install(PROJECT, slot(3, vec![single(1, 3, 101, rule_set(1, 0, vec![always(false)]))]));
    let subject = MockSubject::new(42).with_keyword("ActorTypeNPC");

    let set = anim_replacer_core::ConditionSet::from_conditions(vec![always(true)]);
    assert!(replacer.evaluate_set_for(&set, &subject));
    assert_eq!(replacer.evaluate_rule_set_for(RuleSetId(1), &subject), Ok(false));
    assert!(replacer.evaluate_rule_set_for(RuleSetId(9), &subject).is_err());

    // Rule sets without installed candidates are still previewable.
    replacer.registry().register_rule_set(rule_set(9, 0, vec![always(true)]));
    assert_eq!(replacer.evaluate_rule_set_for(RuleSetId(9), &subject), Ok(true));
}

/// it should apply editor reorder and negate operations and leave the set clean
#[test]
fn editor_reorders_and_negates() {
    let replacer = Replacer::default();
    let spy = Spy::new(true);
    replacer.install(
        PROJECT,
        slot(3, vec![single(1, 3, 101, rule_set(1, 0, vec![always(false), Condition::new(spy.clone())]))]),
    );
    let subject = MockSubject::new(1);
    assert_eq!(replacer.evaluate_rule_set_for(RuleSetId(1), &subject), Ok(false));
    assert_eq!(spy.calls(), 0);

    replacer
        .edit_conditions(RuleSetId(1), |set| {
            set.move_condition(1, 0)?;
            set.set_negated(1, true)
        })
        .unwrap();
    assert_eq!(replacer.evaluate_rule_set_for(RuleSetId(1), &subject), Ok(true));
    assert_eq!(spy.calls(), 1);

    let rule_set = replacer.registry().rule_set(RuleSetId(1)).unwrap();
    let conditions = rule_set.conditions();
    assert!(conditions.get(1).unwrap().is_negated());
    assert!(!conditions.is_dirty());
}

/// it should accept extension condition types until the factory is sealed
#[test]
fn extension_registration_closes_at_seal() {
    let replacer = Replacer::default();
    assert_eq!(replacer.factory_phase(), FactoryPhase::Open);
    replacer
        .register_condition("IsSwimming", None, || Box::new(Constant(true)))
        .unwrap();
    replacer.seal_factory();
    assert_eq!(replacer.factory_phase(), FactoryPhase::Sealed);

    let err = replacer
        .register_condition("IsFlying", None, || Box::new(Constant(true)))
        .unwrap_err();
    assert_eq!(err.category(), "registration");
    assert!(replacer.create_condition("IsSwimming").is_valid());
    assert!(!replacer.create_condition("IsFlying").is_valid());
}
