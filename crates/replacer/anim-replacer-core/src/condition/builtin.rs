//! Built-in predicate types.

use super::components::{
    BoolComponent, Comparison, FormComponent, KeywordComponent, NumericComponent,
    StateComponent, TextComponent,
};
use super::{ConditionSet, EvalContext, Predicate};
use crate::ids::ConditionId;
use crate::state::{ScopedState, StateOwner};
use crate::subject::FormResolver;
use std::any::Any;

/// Subject is (or is based on) a form.
#[derive(Clone, Debug, Default)]
pub struct IsForm {
    pub form: FormComponent,
}

impl Predicate for IsForm {
    fn name(&self) -> &str {
        "IsForm"
    }

    fn evaluate(&self, _id: ConditionId, ctx: &mut EvalContext<'_>) -> bool {
        self.form.id().is_some_and(|form| ctx.subject.is_form(form))
    }

    fn is_valid(&self) -> bool {
        self.form.is_valid()
    }

    fn resolve_forms(&mut self, resolver: &dyn FormResolver) {
        self.form.resolve(resolver);
    }

    fn describe(&self) -> String {
        format!("IsForm {}|{:#x}", self.form.form.plugin, self.form.form.local_id)
    }
}

#[derive(Clone, Debug, Default)]
pub struct HasKeyword {
    pub keyword: KeywordComponent,
}

impl Predicate for HasKeyword {
    fn name(&self) -> &str {
        "HasKeyword"
    }

    fn evaluate(&self, _id: ConditionId, ctx: &mut EvalContext<'_>) -> bool {
        ctx.subject.has_keyword(&self.keyword.0)
    }

    fn is_valid(&self) -> bool {
        self.keyword.is_valid()
    }

    fn describe(&self) -> String {
        format!("HasKeyword {}", self.keyword.0)
    }
}

/// Compare two numbers. A side that cannot be read makes the comparison false.
#[derive(Clone, Debug, Default)]
pub struct CompareValues {
    pub lhs: NumericComponent,
    pub comparison: Comparison,
    pub rhs: NumericComponent,
}

impl Predicate for CompareValues {
    fn name(&self) -> &str {
        "CompareValues"
    }

    fn evaluate(&self, _id: ConditionId, ctx: &mut EvalContext<'_>) -> bool {
        match (self.lhs.value(ctx.subject), self.rhs.value(ctx.subject)) {
            (Some(a), Some(b)) => self.comparison.apply(a, b),
            _ => false,
        }
    }

    fn is_valid(&self) -> bool {
        self.lhs.is_valid() && self.rhs.is_valid()
    }

    fn resolve_forms(&mut self, resolver: &dyn FormResolver) {
        self.lhs.resolve(resolver);
        self.rhs.resolve(resolver);
    }

    fn describe(&self) -> String {
        format!(
            "CompareValues {:?} {} {:?}",
            self.lhs,
            self.comparison.symbol(),
            self.rhs
        )
    }
}

/// Behavior-graph boolean variable equals a value.
#[derive(Clone, Debug, Default)]
pub struct CompareBool {
    pub variable: TextComponent,
    pub value: BoolComponent,
}

impl Predicate for CompareBool {
    fn name(&self) -> &str {
        "CompareBool"
    }

    fn evaluate(&self, _id: ConditionId, ctx: &mut EvalContext<'_>) -> bool {
        ctx.subject.graph_bool(&self.variable.0) == Some(self.value.0)
    }

    fn is_valid(&self) -> bool {
        !self.variable.0.is_empty()
    }
}

/// Scoped storage for a [`Random`] roll.
#[derive(Clone, Debug, Default)]
pub struct RandomState {
    pub value: Option<f32>,
    pub reset_on_loop: bool,
    pub reset_on_echo: bool,
}

impl ScopedState for RandomState {
    fn wants_loop_or_echo(&self, is_echo: bool) -> bool {
        if is_echo {
            self.reset_on_echo
        } else {
            self.reset_on_loop
        }
    }

    fn on_loop_or_echo(&mut self, _is_echo: bool) {
        self.value = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Roll a value in `[min, max)` and compare it against `threshold`.
///
/// Without a state scope the roll comes from the clip's per-epoch memo. With one,
/// it lives in the scoped store and is only re-rolled when that state resets.
#[derive(Clone, Debug)]
pub struct Random {
    pub min: f32,
    pub max: f32,
    pub comparison: Comparison,
    pub threshold: NumericComponent,
    pub state: StateComponent,
}

impl Default for Random {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            comparison: Comparison::Lt,
            threshold: NumericComponent::Static(0.5),
            state: StateComponent::default(),
        }
    }
}

impl Random {
    /// `true` with probability `chance` (given a uniform source).
    pub fn chance(chance: f32) -> Self {
        Self {
            threshold: NumericComponent::Static(chance),
            ..Self::default()
        }
    }

    fn draw(&self, id: ConditionId, ctx: &mut EvalContext<'_>) -> f32 {
        if !id.is_assigned() {
            return ctx.random_for(id);
        }
        let scoped = ctx.scoped_state(StateOwner::Condition(id), self.state.scope, || {
            RandomState {
                value: None,
                reset_on_loop: self.state.reset_on_loop,
                reset_on_echo: self.state.reset_on_echo,
            }
        });
        let Some(handle) = scoped else {
            return ctx.random_for(id);
        };
        let mut guard = handle.lock();
        if let Some(state) = guard.as_any_mut().downcast_mut::<RandomState>() {
            return *state.value.get_or_insert_with(|| ctx.rng.next_f32());
        }
        // Foreign state under our key; fall back to the memo.
        ctx.random_for(id)
    }
}

impl Predicate for Random {
    fn name(&self) -> &str {
        "Random"
    }

    fn evaluate(&self, id: ConditionId, ctx: &mut EvalContext<'_>) -> bool {
        let Some(threshold) = self.threshold.value(ctx.subject) else {
            return false;
        };
        let roll = self.draw(id, ctx);
        let value = self.min + roll * (self.max - self.min);
        self.comparison.apply(value, threshold)
    }

    fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.threshold.is_valid()
    }

    fn resolve_forms(&mut self, resolver: &dyn FormResolver) {
        self.threshold.resolve(resolver);
    }

    fn describe(&self) -> String {
        format!(
            "Random [{}, {}) {} {:?}",
            self.min,
            self.max,
            self.comparison.symbol(),
            self.threshold
        )
    }
}

macro_rules! combinator {
    ($(#[$doc:meta])* $name:ident, $label:literal, $eval:ident) => {
        $(#[$doc])*
        #[derive(Debug, Default)]
        pub struct $name {
            pub conditions: ConditionSet,
        }

        impl $name {
            pub fn new(conditions: ConditionSet) -> Self {
                Self { conditions }
            }
        }

        impl Predicate for $name {
            fn name(&self) -> &str {
                $label
            }

            fn evaluate(&self, _id: ConditionId, ctx: &mut EvalContext<'_>) -> bool {
                self.conditions.$eval(ctx)
            }

            fn nested(&self) -> Option<&ConditionSet> {
                Some(&self.conditions)
            }

            fn nested_mut(&mut self) -> Option<&mut ConditionSet> {
                Some(&mut self.conditions)
            }

            fn describe(&self) -> String {
                format!("{} ({} conditions)", $label, self.conditions.len())
            }
        }
    };
}

combinator!(
    /// All nested conditions hold.
    And,
    "AND",
    evaluate_all
);
combinator!(
    /// At least one enabled nested condition holds.
    Or,
    "OR",
    evaluate_any
);
combinator!(
    /// Exactly one enabled nested condition holds.
    Xor,
    "XOR",
    evaluate_one
);

/// Placeholder for a condition type the factory does not know.
#[derive(Clone, Debug, Default)]
pub struct Invalid {
    pub type_name: String,
}

impl Predicate for Invalid {
    fn name(&self) -> &str {
        "Invalid"
    }

    fn evaluate(&self, _id: ConditionId, _ctx: &mut EvalContext<'_>) -> bool {
        false
    }

    fn is_valid(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("Invalid condition type '{}'", self.type_name)
    }
}
