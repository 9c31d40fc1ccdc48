//! Conditions for the presence of conditional modules and attributes.
//!
//! The standard describes when a conditional module or a type 1C/2C
//! attribute is required in semi-structured English ("Required if Image
//! Type (0008,0008) Value 1 is ORIGINAL ..."). This module defines the
//! [`Condition`] tree such a description is reduced to, the surrounding
//! [`ConditionalRequirement`] (what the condition being met *means*, and
//! what is allowed otherwise), and the parser and evaluator for them.
//!
//! Parsing never fails: text which cannot be reduced to a condition tree
//! becomes [`Condition::Unparseable`], which evaluates to
//! [`Unknown`](crate::ternary::Ternary::Unknown) and makes the related
//! requirement undecidable (and therefore never reported as violated).

use dicom_core::Tag;

use crate::model::TagDictionary;

mod cache;
mod eval;
mod parser;

pub use cache::ConditionCache;
pub use eval::{EvalScope, MacroLookup};
pub use parser::ConditionParser;

/// A condition over the contents of a data set, reconstructed from the
/// standard's prose.
///
/// Value indices are zero based; `index` 0 addresses the first value of a
/// possibly multi-valued attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The attribute is present in the data set.
    TagPresent {
        /// attribute tag
        tag: Tag,
    },
    /// The attribute is not present in the data set.
    TagAbsent {
        /// attribute tag
        tag: Tag,
    },
    /// The attribute is present and carries a value.
    TagNotEmpty {
        /// attribute tag
        tag: Tag,
    },
    /// The value at `index` equals one of the given literals.
    ValueEquals {
        /// attribute tag
        tag: Tag,
        /// zero-based value index
        index: u32,
        /// accepted literals
        values: Vec<String>,
    },
    /// The value at `index` equals none of the given literals.
    ValueNotEquals {
        /// attribute tag
        tag: Tag,
        /// zero-based value index
        index: u32,
        /// rejected literals
        values: Vec<String>,
    },
    /// The value at `index` compares against a number.
    ValueCompare {
        /// attribute tag
        tag: Tag,
        /// zero-based value index
        index: u32,
        /// comparison to apply, value on the left
        ordering: Comparison,
        /// number on the right-hand side
        value: f64,
    },
    /// The attribute-tag value points to the given tag
    /// (e.g. Frame Increment Pointer).
    PointsTo {
        /// attribute tag
        tag: Tag,
        /// pointed-to tag as a single 32-bit word
        target: u32,
    },
    /// The named functional group macro is present in the data set.
    MacroPresent {
        /// macro name as written, without the "Functional Group" suffix
        name: String,
    },
    /// The named functional group macro is not present in the data set.
    MacroAbsent {
        /// macro name as written, without the "Functional Group" suffix
        name: String,
    },
    /// All of the nested conditions hold.
    And(Vec<Condition>),
    /// At least one of the nested conditions holds.
    Or(Vec<Condition>),
    /// The condition text could not be reduced to any of the above.
    /// The original text is kept for diagnostics.
    Unparseable(String),
}

/// Numeric comparison operators in [`Condition::ValueCompare`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Comparison {
    /// strictly greater than
    Greater,
    /// strictly less than
    Less,
    /// greater than or equal to
    GreaterOrEqual,
    /// less than or equal to
    LessOrEqual,
}

/// What fulfillment of the primary condition means for the object
/// it is attached to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RequirementMeaning {
    /// "Required if ...": the object is mandatory when the condition holds.
    PresentIf,
    /// "Shall not be present if ...": the object is forbidden when the
    /// condition holds.
    AbsentIf,
}

/// The fallback clause of a conditional requirement: whether the object
/// may be present although the primary condition does not hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Otherwise {
    /// No allowance clause: the object shall not be present otherwise.
    NotAllowed,
    /// "May be present otherwise."
    Allowed,
    /// "May be present otherwise if ...".
    If(Condition),
}

/// The requirement attached to a conditional module or a type 1C/2C
/// attribute: a primary condition, its meaning, and the fallback clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalRequirement {
    /// what the primary condition being met means
    pub meaning: RequirementMeaning,
    /// the primary condition
    pub condition: Condition,
    /// whether presence is allowed when the primary condition is not met
    pub otherwise: Otherwise,
}

/// The outcome of resolving a [`ConditionalRequirement`] against a
/// data set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RequirementStatus {
    /// The object must be present.
    Required,
    /// The object may be present.
    Optional,
    /// The object must not be present.
    NotAllowed,
}

impl ConditionalRequirement {
    /// A requirement whose text could not be parsed: never requires and
    /// never forbids anything.
    pub fn unparseable(text: impl Into<String>) -> Self {
        ConditionalRequirement {
            meaning: RequirementMeaning::PresentIf,
            condition: Condition::Unparseable(text.into()),
            otherwise: Otherwise::Allowed,
        }
    }

    /// Whether no part of the requirement could be parsed.
    pub fn is_unparseable(&self) -> bool {
        matches!(self.condition, Condition::Unparseable(_))
    }
}

impl Condition {
    /// Render the condition as a readable sentence fragment, resolving
    /// tag names through the given dictionary.
    ///
    /// Conditions in the grammar's canonical phrasing parse back to the
    /// same tree.
    pub fn to_text(&self, dict: &TagDictionary) -> String {
        match self {
            Condition::And(inner) => itertools::join(inner.iter().map(|c| c.to_text(dict)), " and "),
            Condition::Or(inner) => itertools::join(inner.iter().map(|c| c.to_text(dict)), " or "),
            Condition::TagPresent { tag } => format!("{} is present", tag_text(*tag, 0, dict)),
            Condition::TagAbsent { tag } => format!("{} is not present", tag_text(*tag, 0, dict)),
            Condition::TagNotEmpty { tag } => {
                format!("{} is present and has a value", tag_text(*tag, 0, dict))
            }
            Condition::ValueEquals { tag, index, values } => format!(
                "{} is equal to {}",
                tag_text(*tag, *index, dict),
                value_list_text(values, "or"),
            ),
            Condition::ValueNotEquals { tag, index, values } => format!(
                "{} is not equal to {}",
                tag_text(*tag, *index, dict),
                value_list_text(values, "and"),
            ),
            Condition::ValueCompare {
                tag,
                index,
                ordering,
                value,
            } => {
                let op = match ordering {
                    Comparison::Greater => "is greater than",
                    Comparison::Less => "is less than",
                    Comparison::GreaterOrEqual => "is greater than or equal to",
                    Comparison::LessOrEqual => "is less than or equal to",
                };
                format!("{} {} {}", tag_text(*tag, *index, dict), op, number_text(*value))
            }
            Condition::PointsTo { tag, target } => {
                let target = Tag((target >> 16) as u16, (target & 0xFFFF) as u16);
                let name = dict
                    .name_of(target)
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| target.to_string());
                format!("{} points to {}", tag_text(*tag, 0, dict), name)
            }
            Condition::MacroPresent { name } => {
                format!("{} Functional Group Macro is present", name)
            }
            Condition::MacroAbsent { name } => {
                format!("{} Functional Group Macro is not present", name)
            }
            // the original text is the best description there is
            Condition::Unparseable(text) => text.clone(),
        }
    }
}

fn tag_text(tag: Tag, index: u32, dict: &TagDictionary) -> String {
    let name = dict
        .name_of(tag)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| tag.to_string());
    if index > 0 {
        format!("Value {} of {}", index + 1, name)
    } else {
        name
    }
}

fn value_list_text(values: &[String], last_sep: &str) -> String {
    let quoted: Vec<String> = values.iter().map(|v| format!("\"{}\"", v)).collect();
    match quoted.len() {
        0 => String::new(),
        1 => quoted.into_iter().next().unwrap_or_default(),
        n => format!("{} {} {}", quoted[..n - 1].join(", "), last_sep, quoted[n - 1]),
    }
}

fn number_text(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
