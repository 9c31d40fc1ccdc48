//! Evaluation of condition trees against a record.
//!
//! Evaluation is pure: the same condition tree against the same record
//! always yields the same [`Ternary`], and nothing is mutated, so one
//! parsed condition can serve any number of concurrent validations.

use dicom_core::Tag;

use super::{
    Condition, ConditionalRequirement, Comparison, Otherwise, RequirementMeaning,
    RequirementStatus,
};
use crate::access::{DataValue, RecordAccessor};
use crate::ternary::Ternary;

/// Answers whether a functional group macro is in use by the record.
/// Implemented by the functional-group resolver; conditions referring to
/// macros evaluate to `False` without one.
pub trait MacroLookup {
    /// Whether the named macro's governing sequence is present in either
    /// functional group.
    fn macro_present(&self, name: &str) -> bool;
}

/// The lookup environment of one evaluation: a chain of records from the
/// innermost sequence item out to the data set root, plus an optional
/// functional-group view.
///
/// Conditions attached to attributes inside sequence items may refer to
/// attributes of the item itself or of the enclosing data set; the first
/// record in the chain which carries the tag answers for it.
pub struct EvalScope<'a, A> {
    chain: Vec<&'a A>,
    macros: Option<&'a dyn MacroLookup>,
}

impl<A> std::fmt::Debug for EvalScope<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalScope")
            .field("depth", &self.chain.len())
            .field("has_macros", &self.macros.is_some())
            .finish()
    }
}

impl<'a, A: RecordAccessor> EvalScope<'a, A> {
    /// A scope looking at the data set root only.
    pub fn root(record: &'a A) -> Self {
        EvalScope {
            chain: vec![record],
            macros: None,
        }
    }

    /// A root scope with a functional-group view for macro conditions.
    pub fn with_macros(record: &'a A, macros: &'a dyn MacroLookup) -> Self {
        EvalScope {
            chain: vec![record],
            macros: Some(macros),
        }
    }

    /// The scope of a sequence item nested in this scope.
    pub fn nested(&self, item: &'a A) -> Self {
        let mut chain = Vec::with_capacity(self.chain.len() + 1);
        chain.push(item);
        chain.extend_from_slice(&self.chain);
        EvalScope {
            chain,
            macros: self.macros,
        }
    }

    /// The innermost record of the chain.
    pub fn innermost(&self) -> &'a A {
        self.chain[0]
    }

    fn holder_of(&self, tag: Tag) -> Option<&'a A> {
        self.chain.iter().copied().find(|record| record.has_tag(tag))
    }

    fn has_tag(&self, tag: Tag) -> bool {
        self.holder_of(tag).is_some()
    }

    fn value_at(&self, tag: Tag, index: u32) -> Option<DataValue> {
        self.holder_of(tag).and_then(|record| record.value_at(tag, index))
    }

    fn not_empty(&self, tag: Tag) -> bool {
        self.holder_of(tag)
            .map(|record| record.multiplicity(tag) > 0)
            .unwrap_or(false)
    }

    fn macro_present(&self, name: &str) -> bool {
        self.macros.map(|m| m.macro_present(name)).unwrap_or(false)
    }
}

impl Condition {
    /// Evaluate this condition in the given scope.
    ///
    /// Leaves never evaluate to `Unknown`: an absent attribute makes
    /// value conditions `False`, since absence is informative. `Unknown`
    /// enters only through [`Condition::Unparseable`], which `And`
    /// ignores while `Or` degrades to `Unknown` unless another branch
    /// already holds. The asymmetry errs towards not reporting.
    pub fn evaluate<A: RecordAccessor>(&self, scope: &EvalScope<'_, A>) -> Ternary {
        match self {
            Condition::TagPresent { tag } => scope.has_tag(*tag).into(),
            Condition::TagAbsent { tag } => (!scope.has_tag(*tag)).into(),
            Condition::TagNotEmpty { tag } => scope.not_empty(*tag).into(),
            Condition::ValueEquals { tag, index, values } => match scope.value_at(*tag, *index) {
                Some(actual) => values.iter().any(|v| actual.matches(v)).into(),
                // "is zero-length" holds for a present, empty attribute
                None => (values.iter().any(String::is_empty)
                    && scope.has_tag(*tag)
                    && !scope.not_empty(*tag))
                .into(),
            },
            Condition::ValueNotEquals { tag, index, values } => {
                match scope.value_at(*tag, *index) {
                    Some(actual) => (!values.iter().any(|v| actual.matches(v))).into(),
                    None => Ternary::False,
                }
            }
            Condition::ValueCompare {
                tag,
                index,
                ordering,
                value,
            } => match scope.value_at(*tag, *index).and_then(|v| v.as_number()) {
                Some(actual) => match ordering {
                    Comparison::Greater => (actual > *value).into(),
                    Comparison::Less => (actual < *value).into(),
                    Comparison::GreaterOrEqual => (actual >= *value).into(),
                    Comparison::LessOrEqual => (actual <= *value).into(),
                },
                None => Ternary::False,
            },
            Condition::PointsTo { tag, target } => match scope.value_at(*tag, 0) {
                Some(DataValue::TagPointer(actual)) => (actual == *target).into(),
                Some(other) => other
                    .as_number()
                    .map(|n| n == f64::from(*target))
                    .unwrap_or(false)
                    .into(),
                None => Ternary::False,
            },
            Condition::MacroPresent { name } => scope.macro_present(name).into(),
            Condition::MacroAbsent { name } => (!scope.macro_present(name)).into(),
            Condition::And(inner) => {
                let mut verdict = Ternary::True;
                let mut considered = 0;
                for condition in inner {
                    // unparseable members of a conjunction are ignored
                    if matches!(condition, Condition::Unparseable(_)) {
                        continue;
                    }
                    considered += 1;
                    match condition.evaluate(scope) {
                        Ternary::False => return Ternary::False,
                        other => verdict = verdict.and(other),
                    }
                }
                if considered == 0 {
                    Ternary::Unknown
                } else {
                    verdict
                }
            }
            Condition::Or(inner) => inner
                .iter()
                .map(|condition| condition.evaluate(scope))
                .fold(Ternary::False, Ternary::or),
            Condition::Unparseable(_) => Ternary::Unknown,
        }
    }
}

impl ConditionalRequirement {
    /// Resolve the requirement against a record: is the object required,
    /// merely allowed, or not allowed.
    ///
    /// An undecidable primary condition resolves to `Optional`: a
    /// requirement that cannot be decided must neither demand nor forbid.
    pub fn resolve<A: RecordAccessor>(&self, scope: &EvalScope<'_, A>) -> RequirementStatus {
        match self.meaning {
            RequirementMeaning::PresentIf => match self.condition.evaluate(scope) {
                Ternary::True => RequirementStatus::Required,
                Ternary::Unknown => RequirementStatus::Optional,
                Ternary::False => match &self.otherwise {
                    Otherwise::Allowed => RequirementStatus::Optional,
                    Otherwise::NotAllowed => RequirementStatus::NotAllowed,
                    Otherwise::If(condition) => match condition.evaluate(scope) {
                        Ternary::False => RequirementStatus::NotAllowed,
                        _ => RequirementStatus::Optional,
                    },
                },
            },
            RequirementMeaning::AbsentIf => match self.condition.evaluate(scope) {
                Ternary::True => RequirementStatus::NotAllowed,
                _ => RequirementStatus::Optional,
            },
        }
    }
}
