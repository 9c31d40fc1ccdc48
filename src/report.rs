//! The validation error taxonomy and the per-record result.
//!
//! Findings are data: nothing in the validator raises on a conformance
//! violation. A [`ValidationResult`] is created when validation of a
//! record starts, filled while the modules are walked, and handed to the
//! caller once complete.

use dicom_core::Tag;
use itertools::Itertools;

/// The kind of conformance violation found for a tag.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// a required attribute is missing
    TagMissing,
    /// a type 1/1C attribute is present without a value
    TagEmpty,
    /// the attribute belongs to no module of the IOD
    TagUnexpected,
    /// the attribute is present although its condition forbids it
    TagNotAllowed,
    /// the value is outside the attribute's enumerated values
    EnumValueNotAllowed,
    /// the value does not conform to the value representation
    InvalidValue,
    /// the attribute belongs to a module that is not allowed
    ModuleNotAllowed,
}

/// Where in a multi-frame record the violation was located.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum ErrorScope {
    /// the data set itself
    #[default]
    General,
    /// the shared functional group
    SharedGroup,
    /// the per-frame functional groups
    PerFrameGroup,
    /// both functional groups
    BothGroups,
}

/// Extra information for value-level findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetail {
    /// the offending value and the allowed enumerated values
    EnumValue {
        /// value found in the record
        value: String,
        /// values the standard allows
        allowed: Vec<String>,
    },
    /// the offending value and the value representation it violates
    InvalidValue {
        /// value found in the record
        value: String,
        /// value representation code
        vr: String,
    },
}

/// A single conformance finding for one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagError {
    /// the tag the finding is about
    pub tag: Tag,
    /// enclosing sequence tags, outermost first
    pub parents: Vec<Tag>,
    /// what is wrong
    pub kind: ErrorKind,
    /// functional-group location
    pub scope: ErrorScope,
    /// the condition prose that caused the finding, when one did
    pub condition: Option<String>,
    /// value-level details
    pub detail: Option<ErrorDetail>,
}

impl TagError {
    /// A finding with no parents, general scope and no details.
    pub fn new(tag: Tag, kind: ErrorKind) -> Self {
        TagError {
            tag,
            parents: Vec::new(),
            kind,
            scope: ErrorScope::General,
            condition: None,
            detail: None,
        }
    }

    /// Attach the sequence path leading to the tag.
    pub fn in_parents(mut self, parents: Vec<Tag>) -> Self {
        self.parents = parents;
        self
    }

    /// Attach the functional-group scope.
    pub fn in_scope(mut self, scope: ErrorScope) -> Self {
        self.scope = scope;
        self
    }

    /// Attach the condition text which decided the finding.
    pub fn due_to(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Attach value-level details.
    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    fn scope_text(&self) -> &'static str {
        match self.scope {
            ErrorScope::General => "",
            ErrorScope::SharedGroup => " in Shared Group",
            ErrorScope::PerFrameGroup => " in Per-Frame Group",
            ErrorScope::BothGroups => " in both Shared and Per-Frame Groups",
        }
    }
}

impl std::fmt::Display for TagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for parent in &self.parents {
            write!(f, "{} / ", parent)?;
        }
        write!(f, "Tag {}", self.tag)?;
        match self.kind {
            ErrorKind::TagMissing => write!(f, " is missing{}", self.scope_text())?,
            ErrorKind::TagEmpty => write!(f, " is empty{}", self.scope_text())?,
            ErrorKind::TagUnexpected => write!(f, " is unexpected{}", self.scope_text())?,
            ErrorKind::TagNotAllowed | ErrorKind::ModuleNotAllowed => {
                write!(f, " is not allowed{}", self.scope_text())?
            }
            ErrorKind::EnumValueNotAllowed => {
                if let Some(ErrorDetail::EnumValue { value, allowed }) = &self.detail {
                    write!(
                        f,
                        " - enum value '{}' not allowed, allowed values: {}",
                        value,
                        allowed.iter().join(", ")
                    )?;
                } else {
                    write!(f, " has a value outside its enumerated values")?;
                }
            }
            ErrorKind::InvalidValue => {
                if let Some(ErrorDetail::InvalidValue { value, vr }) = &self.detail {
                    write!(f, " has invalid value '{}' for VR {}", value, vr)?;
                } else {
                    write!(f, " has an invalid value")?;
                }
            }
        }
        if let Some(condition) = &self.condition {
            write!(f, " by condition: {}", condition)?;
        }
        Ok(())
    }
}

/// The result state after validating one record.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Status {
    /// no findings
    Passed,
    /// at least one finding
    Failed,
    /// the record does not declare a SOP class
    MissingSopClassUid,
    /// the declared SOP class is not in the reference model
    UnknownSopClassUid,
}

impl Status {
    /// Whether validation could not even start for the record.
    pub fn is_fatal(self) -> bool {
        matches!(self, Status::MissingSopClassUid | Status::UnknownSopClassUid)
    }
}

/// The findings of one module, in detection order.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleErrors {
    /// module name (or "General" for the unexpected-tag sweep)
    pub name: String,
    /// findings for this module
    pub errors: Vec<TagError>,
}

/// The complete validation result for one record.
///
/// Filled incrementally during validation; read-only for the consumer.
/// Validating the same record against the same reference model twice
/// yields identical results, order included.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// the SOP class UID the record declared, possibly empty
    pub sop_class_uid: String,
    status: Status,
    modules: Vec<ModuleErrors>,
}

impl ValidationResult {
    pub(crate) fn new(sop_class_uid: impl Into<String>) -> Self {
        ValidationResult {
            sop_class_uid: sop_class_uid.into(),
            status: Status::Passed,
            modules: Vec::new(),
        }
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Record a finding under the given module name, keeping one copy of
    /// identical findings (the same violation seen in several frames is
    /// one finding).
    pub(crate) fn add(&mut self, module: &str, error: TagError) {
        let index = match self.modules.iter().position(|m| m.name == module) {
            Some(index) => index,
            None => {
                self.modules.push(ModuleErrors {
                    name: module.to_string(),
                    errors: Vec::new(),
                });
                self.modules.len() - 1
            }
        };
        let entry = &mut self.modules[index];
        let duplicate = entry.errors.iter().any(|e| {
            e.tag == error.tag
                && e.parents == error.parents
                && e.kind == error.kind
                && e.scope == error.scope
        });
        if !duplicate {
            entry.errors.push(error);
            if self.status == Status::Passed {
                self.status = Status::Failed;
            }
        }
    }

    /// The result state.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether the record passed without findings.
    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }

    /// Findings per module, in validation order.
    pub fn modules(&self) -> &[ModuleErrors] {
        &self.modules
    }

    /// The findings recorded for a module, empty if none.
    pub fn errors_for(&self, module: &str) -> &[TagError] {
        self.modules
            .iter()
            .find(|m| m.name == module)
            .map(|m| m.errors.as_slice())
            .unwrap_or(&[])
    }

    /// Whether a finding of this kind was recorded for the tag in the
    /// module.
    pub fn has_error(&self, module: &str, tag: Tag, kind: ErrorKind) -> bool {
        self.errors_for(module)
            .iter()
            .any(|e| e.tag == tag && e.kind == kind)
    }

    /// Total number of findings; a fatal status counts as one.
    pub fn error_count(&self) -> usize {
        let findings: usize = self.modules.iter().map(|m| m.errors.len()).sum();
        if self.status.is_fatal() {
            findings + 1
        } else {
            findings
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_findings() {
        let error = TagError::new(Tag(0x0010, 0x0040), ErrorKind::TagMissing);
        assert_eq!(error.to_string(), "Tag (0010,0040) is missing");

        let error = TagError::new(Tag(0x0020, 0x9111), ErrorKind::TagNotAllowed)
            .in_parents(vec![Tag(0x5200, 0x9229)])
            .in_scope(ErrorScope::SharedGroup);
        assert_eq!(
            error.to_string(),
            "(5200,9229) / Tag (0020,9111) is not allowed in Shared Group"
        );

        let error = TagError::new(Tag(0x0028, 0x0101), ErrorKind::EnumValueNotAllowed)
            .with_detail(ErrorDetail::EnumValue {
                value: "1".into(),
                allowed: vec!["8".into(), "16".into()],
            });
        assert_eq!(
            error.to_string(),
            "Tag (0028,0101) - enum value '1' not allowed, allowed values: 8, 16"
        );

        let error = TagError::new(Tag(0x0010, 0x0022), ErrorKind::InvalidValue).with_detail(
            ErrorDetail::InvalidValue {
                value: "lowercase".into(),
                vr: "CS".into(),
            },
        );
        assert_eq!(
            error.to_string(),
            "Tag (0010,0022) has invalid value 'lowercase' for VR CS"
        );
    }

    #[test]
    fn result_accumulates_and_dedupes() {
        let mut result = ValidationResult::new("1.2.3");
        assert!(result.passed());
        assert_eq!(result.error_count(), 0);

        let error = TagError::new(Tag(0x0010, 0x0040), ErrorKind::TagMissing);
        result.add("Patient", error.clone());
        result.add("Patient", error);
        result.add(
            "Patient",
            TagError::new(Tag(0x0010, 0x0040), ErrorKind::TagEmpty),
        );

        assert_eq!(result.status(), Status::Failed);
        assert_eq!(result.error_count(), 2);
        assert!(result.has_error("Patient", Tag(0x0010, 0x0040), ErrorKind::TagMissing));
        assert!(result.has_error("Patient", Tag(0x0010, 0x0040), ErrorKind::TagEmpty));
        assert!(!result.has_error("General", Tag(0x0010, 0x0040), ErrorKind::TagMissing));
    }

    #[test]
    fn fatal_status_counts_as_one_error() {
        let mut result = ValidationResult::new("");
        result.set_status(Status::MissingSopClassUid);
        assert_eq!(result.error_count(), 1);
        assert!(result.status().is_fatal());
        assert!(!result.passed());
    }
}
