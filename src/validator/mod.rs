//! IOD validation: walking the module tables of the record's SOP class
//! and checking the record's attributes against them.
//!
//! The validator never raises on a conformance violation; every finding
//! is accumulated into the [`ValidationResult`]. Only a missing or
//! unknown SOP class stops validation of a record, with a single fatal
//! status.

pub mod func_groups;

use std::collections::BTreeSet;

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use tracing::debug;

use crate::access::{DataValue, RecordAccessor};
use crate::condition::{EvalScope, RequirementStatus};
use crate::model::{
    AttributeEntry, AttributeType, DicomInfo, EnumValue, IodInfo, ModuleEntry, ModuleSpec, Usage,
};
use crate::report::{ErrorDetail, ErrorKind, ErrorScope, Status, TagError, ValidationResult};

use self::func_groups::{
    placement_of, FunctionalGroups, GroupPlacement, MacroIndex, PER_FRAME_GROUPS, SHARED_GROUPS,
};

/// Pixel Data and everything above it is not read by the accessor.
const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

/// Configuration recognized by the validator.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub struct ValidationOptions {
    /// skip the value representation conformance check
    pub suppress_vr_checks: bool,
}

impl ValidationOptions {
    /// Default options: all checks enabled.
    pub fn new() -> Self {
        ValidationOptions::default()
    }

    /// Set whether value representation checks are skipped.
    pub fn suppress_vr_checks(&mut self, suppress: bool) -> &mut Self {
        self.suppress_vr_checks = suppress;
        self
    }
}

/// Validates one record against the reference model.
///
/// The validator borrows the record and the model; neither is mutated,
/// and any number of validators may run concurrently against the same
/// [`DicomInfo`].
#[derive(Debug)]
pub struct IodValidator<'a, A> {
    record: &'a A,
    info: &'a DicomInfo,
    options: ValidationOptions,
}

impl<'a, A: RecordAccessor> IodValidator<'a, A> {
    /// Create a validator with default options.
    pub fn new(record: &'a A, info: &'a DicomInfo) -> Self {
        IodValidator {
            record,
            info,
            options: ValidationOptions::default(),
        }
    }

    /// Create a validator with the given options.
    pub fn with_options(record: &'a A, info: &'a DicomInfo, options: ValidationOptions) -> Self {
        IodValidator {
            record,
            info,
            options,
        }
    }

    /// Validate the record and return all findings.
    pub fn validate(&self) -> ValidationResult {
        let sop_class_uid = match self.record.value_at(tags::SOP_CLASS_UID, 0) {
            Some(DataValue::Str(uid)) if !uid.is_empty() => uid,
            _ => {
                debug!("missing SOP Class UID, aborting");
                let mut result = ValidationResult::new("");
                result.set_status(Status::MissingSopClassUid);
                return result;
            }
        };
        let iod = match self.info.iod(&sop_class_uid) {
            Some(iod) => iod,
            None => {
                debug!(sop_class_uid = %sop_class_uid, "unknown SOP Class UID, aborting");
                let mut result = ValidationResult::new(sop_class_uid);
                result.set_status(Status::UnknownSopClassUid);
                return result;
            }
        };
        debug!(sop_class_uid = %sop_class_uid, title = %iod.title, "validating record");

        let mut result = ValidationResult::new(sop_class_uid);
        let groups = FunctionalGroups::capture(self.record);
        let macros = MacroIndex::new(&groups, iod, self.info);
        for entry in &iod.modules {
            self.validate_module(entry, &groups, &macros, &mut result);
        }
        for entry in &iod.group_macros {
            self.validate_macro(entry, &groups, &macros, &mut result);
        }
        self.check_unexpected_tags(iod, &mut result);
        result
    }

    /// Resolve what a usage kind plus condition text demand right now.
    /// Returns the status and the condition text for diagnostics (absent
    /// when there is no readable condition).
    fn requirement_of<'s>(
        &self,
        usage: Usage,
        condition: Option<&str>,
        scope: &EvalScope<'s, A>,
    ) -> (RequirementStatus, Option<String>) {
        match usage {
            Usage::Mandatory => (RequirementStatus::Required, None),
            Usage::UserOptional => (RequirementStatus::Optional, None),
            Usage::Conditional => match condition {
                Some(text) => {
                    let requirement = self.info.requirement(text);
                    let status = requirement.resolve(scope);
                    let display = (!requirement.is_unparseable()).then(|| text.to_string());
                    (status, display)
                }
                None => (RequirementStatus::Optional, None),
            },
        }
    }

    fn validate_module<'s>(
        &'s self,
        entry: &ModuleEntry,
        groups: &'s FunctionalGroups<'s, A>,
        macros: &'s MacroIndex<'s, A>,
        result: &mut ValidationResult,
    ) {
        let spec = match self.info.module(&entry.module_ref) {
            Some(spec) => spec,
            None => {
                debug!(module = %entry.name, reference = %entry.module_ref, "module reference has no table, skipping");
                return;
            }
        };
        let scope = EvalScope::with_macros(self.record, macros);
        let (status, condition) = self.requirement_of(entry.usage, entry.condition.as_deref(), &scope);
        let present = self.module_present(spec, groups);
        debug!(module = %entry.name, ?status, present, "module requirement");

        match status {
            RequirementStatus::NotAllowed => {
                if present {
                    for attr in &spec.attributes {
                        let tag = match attr.tag_id() {
                            Some(tag) => tag,
                            None => continue,
                        };
                        if attr.attr_type == AttributeType::Type3 || !self.record.has_tag(tag) {
                            continue;
                        }
                        let mut error = TagError::new(tag, ErrorKind::ModuleNotAllowed);
                        if let Some(text) = &condition {
                            error = error.due_to(text.clone());
                        }
                        result.add(&entry.name, error);
                    }
                }
            }
            RequirementStatus::Optional if !present => {}
            _ => {
                self.validate_attributes(
                    &entry.name,
                    &spec.attributes,
                    &scope,
                    &[],
                    ErrorScope::General,
                    None,
                    result,
                );
            }
        }
    }

    /// A module counts as present when any of its non-type-3 attributes
    /// is in the record, at the data set root or in a functional group.
    fn module_present<'s>(&self, spec: &ModuleSpec, groups: &FunctionalGroups<'s, A>) -> bool {
        spec.attributes
            .iter()
            .filter(|attr| attr.attr_type != AttributeType::Type3)
            .filter_map(AttributeEntry::tag_id)
            .any(|tag| self.record.has_tag(tag) || groups.any_has_tag(tag))
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_attributes<'s>(
        &self,
        module: &str,
        attrs: &[AttributeEntry],
        scope: &EvalScope<'s, A>,
        parents: &[Tag],
        err_scope: ErrorScope,
        fallback: Option<&'s A>,
        result: &mut ValidationResult,
    ) {
        for attr in attrs {
            let tag = match attr.tag_id() {
                Some(tag) => tag,
                None => continue,
            };
            if tag >= PIXEL_DATA {
                continue;
            }
            self.validate_attribute(module, attr, tag, scope, parents, err_scope, fallback, result);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_attribute<'s>(
        &self,
        module: &str,
        attr: &AttributeEntry,
        tag: Tag,
        scope: &EvalScope<'s, A>,
        parents: &[Tag],
        err_scope: ErrorScope,
        fallback: Option<&'s A>,
        result: &mut ValidationResult,
    ) {
        let record = scope.innermost();
        let has = record.has_tag(tag);
        let (status, condition) = match attr.attr_type {
            AttributeType::Type1 | AttributeType::Type2 => (RequirementStatus::Required, None),
            AttributeType::Type1C | AttributeType::Type2C => {
                self.requirement_of(Usage::Conditional, attr.condition.as_deref(), scope)
            }
            AttributeType::Type3 => (RequirementStatus::Optional, None),
        };

        if !has {
            let in_fallback = fallback.map(|shared| shared.has_tag(tag)).unwrap_or(false);
            if status == RequirementStatus::Required && !in_fallback {
                let mut error = TagError::new(tag, ErrorKind::TagMissing)
                    .in_parents(parents.to_vec())
                    .in_scope(err_scope);
                if let Some(text) = &condition {
                    error = error.due_to(text.clone());
                }
                result.add(module, error);
            }
            return;
        }

        let empty = record.is_empty_value(tag);
        let must_have_value = attr.attr_type == AttributeType::Type1
            || (attr.attr_type == AttributeType::Type1C && status == RequirementStatus::Required);
        if empty && must_have_value {
            result.add(
                module,
                TagError::new(tag, ErrorKind::TagEmpty)
                    .in_parents(parents.to_vec())
                    .in_scope(err_scope),
            );
        } else if status == RequirementStatus::NotAllowed {
            let mut error = TagError::new(tag, ErrorKind::TagNotAllowed)
                .in_parents(parents.to_vec())
                .in_scope(err_scope);
            if let Some(text) = &condition {
                error = error.due_to(text.clone());
            }
            result.add(module, error);
        }

        if !empty {
            if let Some(detail) = self.enum_violation(attr, record, tag) {
                result.add(
                    module,
                    TagError::new(tag, ErrorKind::EnumValueNotAllowed)
                        .in_parents(parents.to_vec())
                        .in_scope(err_scope)
                        .with_detail(detail),
                );
            }
            if !self.options.suppress_vr_checks {
                if let Some(violation) = record.check_value(tag) {
                    result.add(
                        module,
                        TagError::new(tag, ErrorKind::InvalidValue)
                            .in_parents(parents.to_vec())
                            .in_scope(err_scope)
                            .with_detail(ErrorDetail::InvalidValue {
                                value: violation.value,
                                vr: violation.vr,
                            }),
                    );
                }
            }
        }

        // walk into sequence items with a defined shape
        if let (Some(item_attrs), Some(count)) = (&attr.items, record.item_count(tag)) {
            let mut child_parents = parents.to_vec();
            child_parents.push(tag);
            for index in 0..count {
                if let Some(item) = record.item(tag, index) {
                    let item_scope = scope.nested(item);
                    self.validate_attributes(
                        module,
                        item_attrs,
                        &item_scope,
                        &child_parents,
                        err_scope,
                        None,
                        result,
                    );
                }
            }
        }
    }

    fn enum_violation(&self, attr: &AttributeEntry, record: &A, tag: Tag) -> Option<ErrorDetail> {
        for set in &attr.enums {
            match set.index {
                None => {
                    for position in 0..record.multiplicity(tag) {
                        if let Some(value) = record.value_at(tag, position) {
                            if !value_in_enum(&value, &set.values) {
                                return Some(enum_detail(&value, &set.values));
                            }
                        }
                    }
                }
                Some(position) if position >= 1 => {
                    if let Some(value) = record.value_at(tag, position - 1) {
                        if !value_in_enum(&value, &set.values) {
                            return Some(enum_detail(&value, &set.values));
                        }
                    }
                }
                Some(_) => {}
            }
        }
        None
    }

    fn validate_macro<'s>(
        &'s self,
        entry: &ModuleEntry,
        groups: &'s FunctionalGroups<'s, A>,
        macros: &'s MacroIndex<'s, A>,
        result: &mut ValidationResult,
    ) {
        let spec = match self.info.module(&entry.module_ref) {
            Some(spec) => spec,
            None => return,
        };
        let governing = match spec.attributes.first().and_then(AttributeEntry::tag_id) {
            Some(tag) => tag,
            None => return,
        };
        let scope = EvalScope::with_macros(self.record, macros);
        let (status, condition) = self.requirement_of(entry.usage, entry.condition.as_deref(), &scope);
        let placement = placement_of(entry.condition.as_deref());
        let in_shared = groups.in_shared(governing);
        let in_frames = groups.in_any_frame(governing);
        debug!(name = %entry.name, ?status, in_shared, in_frames, "functional group macro");

        if in_shared && in_frames {
            result.add(
                &entry.name,
                TagError::new(governing, ErrorKind::TagNotAllowed)
                    .in_parents(vec![PER_FRAME_GROUPS])
                    .in_scope(ErrorScope::BothGroups),
            );
        } else if in_shared && placement == GroupPlacement::PerFrameOnly {
            result.add(
                &entry.name,
                TagError::new(governing, ErrorKind::TagNotAllowed)
                    .in_parents(vec![SHARED_GROUPS])
                    .in_scope(ErrorScope::SharedGroup),
            );
        } else if in_frames && placement == GroupPlacement::SharedOnly {
            result.add(
                &entry.name,
                TagError::new(governing, ErrorKind::TagNotAllowed)
                    .in_parents(vec![PER_FRAME_GROUPS])
                    .in_scope(ErrorScope::PerFrameGroup),
            );
        }

        match status {
            RequirementStatus::NotAllowed => {
                if in_shared || in_frames {
                    let (parent, scope_kind) = if in_shared {
                        (SHARED_GROUPS, ErrorScope::SharedGroup)
                    } else {
                        (PER_FRAME_GROUPS, ErrorScope::PerFrameGroup)
                    };
                    let mut error = TagError::new(governing, ErrorKind::ModuleNotAllowed)
                        .in_parents(vec![parent])
                        .in_scope(scope_kind);
                    if let Some(text) = &condition {
                        error = error.due_to(text.clone());
                    }
                    result.add(&entry.name, error);
                }
                return;
            }
            RequirementStatus::Required if !in_shared && !in_frames => {
                let mut error = TagError::new(governing, ErrorKind::TagMissing)
                    .in_parents(vec![PER_FRAME_GROUPS])
                    .in_scope(ErrorScope::PerFrameGroup);
                if let Some(text) = &condition {
                    error = error.due_to(text.clone());
                }
                result.add(&entry.name, error);
                return;
            }
            RequirementStatus::Optional if !in_shared && !in_frames => return,
            _ => {}
        }

        if in_shared {
            if let Some(shared) = groups.shared() {
                let shared_scope = scope.nested(shared);
                self.validate_attributes(
                    &entry.name,
                    &spec.attributes,
                    &shared_scope,
                    &[SHARED_GROUPS],
                    ErrorScope::SharedGroup,
                    None,
                    result,
                );
            }
        }
        if in_frames {
            for &frame in groups.frames() {
                let frame_scope = scope.nested(frame);
                self.validate_attributes(
                    &entry.name,
                    &spec.attributes,
                    &frame_scope,
                    &[PER_FRAME_GROUPS],
                    ErrorScope::PerFrameGroup,
                    groups.shared(),
                    result,
                );
            }
        }
    }

    /// Report record attributes covered by no module of the IOD. Private
    /// and group-length tags are not the standard's business.
    fn check_unexpected_tags(&self, iod: &IodInfo, result: &mut ValidationResult) {
        let mut known: BTreeSet<Tag> = BTreeSet::new();
        for entry in &iod.modules {
            if let Some(spec) = self.info.module(&entry.module_ref) {
                known.extend(spec.attributes.iter().filter_map(AttributeEntry::tag_id));
            }
        }
        for tag in self.record.tags() {
            if tag.group() % 2 == 1 {
                continue;
            }
            if tag.element() == 0x0000 || tag.group() == 0x0002 {
                continue;
            }
            if known.contains(&tag) {
                continue;
            }
            result.add("General", TagError::new(tag, ErrorKind::TagUnexpected));
        }
    }
}

fn value_in_enum(value: &DataValue, allowed: &[EnumValue]) -> bool {
    allowed.iter().any(|candidate| match candidate {
        EnumValue::Str(text) => value.matches(text),
        EnumValue::Int(number) => value.matches(&number.to_string()),
    })
}

fn enum_detail(value: &DataValue, allowed: &[EnumValue]) -> ErrorDetail {
    ErrorDetail::EnumValue {
        value: value_text(value),
        allowed: allowed.iter().map(ToString::to_string).collect(),
    }
}

fn value_text(value: &DataValue) -> String {
    match value {
        DataValue::Str(text) => text.clone(),
        DataValue::Number(number) => {
            if number.fract() == 0.0 && number.abs() < 1e15 {
                format!("{}", *number as i64)
            } else {
                format!("{}", number)
            }
        }
        DataValue::TagPointer(word) => {
            Tag((word >> 16) as u16, (word & 0xFFFF) as u16).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::value::DataSetSequence;
    use dicom_core::{Length, PrimitiveValue, VR};
    use dicom_object::mem::{InMemDicomObject, InMemElement};
    use pretty_assertions::assert_eq;

    const CT_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
    const SR_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.88.33";
    const EXA_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.12.1.1";

    fn fixture() -> DicomInfo {
        DicomInfo::from_json(
            r#"{
            "iods": {
                "1.2.840.10008.5.1.4.1.1.2": {
                    "title": "CT Image Storage",
                    "modules": [
                        {"name": "Patient", "ref": "C.7.1.1", "usage": "M"},
                        {"name": "Clinical Trial Subject", "ref": "C.7.1.3", "usage": "U"},
                        {"name": "General Series", "ref": "C.7.3.1", "usage": "M"},
                        {"name": "Frame of Reference", "ref": "C.7.4.1", "usage": "U"},
                        {"name": "Synchronization", "ref": "C.7.4.2", "usage": "C",
                         "condition": "Required if Frame of Reference UID is present."},
                        {"name": "Specimen", "ref": "C.7.6.22", "usage": "C",
                         "condition": "Required if Modality is equal to \"SM\"."},
                        {"name": "CT Image", "ref": "C.8.2.1", "usage": "M"},
                        {"name": "SOP Common", "ref": "C.12.1", "usage": "M"}
                    ]
                },
                "1.2.840.10008.5.1.4.1.1.88.33": {
                    "title": "Comprehensive SR Storage",
                    "modules": [
                        {"name": "Patient", "ref": "C.7.1.1", "usage": "M"},
                        {"name": "SR Document Content", "ref": "C.17.3", "usage": "M"},
                        {"name": "SOP Common", "ref": "C.12.1", "usage": "M"}
                    ]
                },
                "1.2.840.10008.5.1.4.1.1.12.1.1": {
                    "title": "Enhanced XA Image Storage",
                    "modules": [
                        {"name": "Patient", "ref": "C.7.1.1", "usage": "M"},
                        {"name": "Enhanced XA Image", "ref": "C.8.19.2", "usage": "M"},
                        {"name": "Mask", "ref": "C.7.6.10", "usage": "U"},
                        {"name": "Multi-frame Functional Groups", "ref": "C.7.6.16", "usage": "M"},
                        {"name": "SOP Common", "ref": "C.12.1", "usage": "M"}
                    ],
                    "group_macros": [
                        {"name": "Frame Content", "ref": "C.7.6.16.2.2", "usage": "M",
                         "condition": "May not be used as a Shared Functional Group."},
                        {"name": "Frame Anatomy", "ref": "C.7.6.16.2.8", "usage": "C",
                         "condition": "Required if Image Type Value 1 is ORIGINAL. May be present otherwise."},
                        {"name": "Pixel Measures", "ref": "C.7.6.16.2.1", "usage": "C",
                         "condition": "Required if Frame Anatomy Functional Group Macro is present."},
                        {"name": "Derivation Image", "ref": "C.7.6.16.2.6", "usage": "U"},
                        {"name": "Irradiation Event Identification", "ref": "C.7.6.16.2.18", "usage": "M"}
                    ]
                }
            },
            "modules": {
                "C.7.1.1": {"attributes": [
                    {"tag": "(0010,0010)", "name": "Patient's Name", "type": "2"},
                    {"tag": "(0010,0020)", "name": "Patient ID", "type": "2"},
                    {"tag": "(0010,0040)", "name": "Patient's Sex", "type": "2",
                     "enums": [{"values": ["M", "F", "O"]}]},
                    {"tag": "(0010,2292)", "name": "Patient Breed Description", "type": "2C",
                     "condition": "Required if the patient is a veterinary animal."},
                    {"tag": "(0010,0022)", "name": "Type of Patient ID", "type": "3"}
                ]},
                "C.7.1.3": {"attributes": [
                    {"tag": "(0012,0010)", "name": "Clinical Trial Sponsor Name", "type": "1"}
                ]},
                "C.7.3.1": {"attributes": [
                    {"tag": "(0008,0060)", "name": "Modality", "type": "1"}
                ]},
                "C.7.4.1": {"attributes": [
                    {"tag": "(0020,0052)", "name": "Frame of Reference UID", "type": "1"},
                    {"tag": "(0020,1040)", "name": "Position Reference Indicator", "type": "2"}
                ]},
                "C.7.4.2": {"attributes": [
                    {"tag": "(0018,106A)", "name": "Synchronization Trigger", "type": "1"}
                ]},
                "C.7.6.22": {"attributes": [
                    {"tag": "(0040,0512)", "name": "Container Identifier", "type": "1"}
                ]},
                "C.8.2.1": {"attributes": [
                    {"tag": "(0008,0008)", "name": "Image Type", "type": "1",
                     "enums": [{"values": ["ORIGINAL", "DERIVED"], "index": 1},
                               {"values": ["PRIMARY", "SECONDARY"], "index": 2}]},
                    {"tag": "(0028,0002)", "name": "Samples per Pixel", "type": "1"},
                    {"tag": "(0028,0006)", "name": "Planar Configuration", "type": "1C",
                     "condition": "Required if Samples per Pixel is greater than 1."},
                    {"tag": "(0018,9360)", "name": "CT Additional X-Ray Source Sequence", "type": "1C",
                     "condition": "Required if Multi-energy CT Acquisition is equal to \"YES\"."},
                    {"tag": "(0018,9361)", "name": "Multi-energy CT Acquisition", "type": "3"},
                    {"tag": "(2050,0020)", "name": "Presentation LUT Shape", "type": "3",
                     "enums": [{"values": ["IDENTITY", "INVERSE"]}]},
                    {"tag": "(0028,0101)", "name": "Bits Stored", "type": "1",
                     "enums": [{"values": [8, 9, 10, 11, 12, 13, 14, 15, 16]}]}
                ]},
                "C.12.1": {"attributes": [
                    {"tag": "(0008,0016)", "name": "SOP Class UID", "type": "1"},
                    {"tag": "(0008,0018)", "name": "SOP Instance UID", "type": "1"}
                ]},
                "C.17.3": {"attributes": [
                    {"tag": "(0040,A040)", "name": "Value Type", "type": "1",
                     "enums": [{"values": ["TEXT", "NUM", "CONTAINER"]}]},
                    {"tag": "(0040,A043)", "name": "Concept Name Code Sequence", "type": "1C",
                     "condition": "Required if Value Type is equal to TEXT."},
                    {"tag": "(0040,A300)", "name": "Measured Value Sequence", "type": "1C",
                     "condition": "Required if Value Type is equal to NUM."}
                ]},
                "C.7.6.10": {"attributes": [
                    {"tag": "(0028,6100)", "name": "Mask Subtraction Sequence", "type": "1",
                     "items": [
                        {"tag": "(0028,6101)", "name": "Mask Operation", "type": "1"},
                        {"tag": "(0028,6110)", "name": "Mask Frame Numbers", "type": "1C",
                         "condition": "Required if Mask Operation is equal to AVG_SUB."}
                     ]}
                ]},
                "C.8.19.2": {"attributes": [
                    {"tag": "(0008,0008)", "name": "Image Type", "type": "1"}
                ]},
                "C.7.6.16": {"attributes": [
                    {"tag": "(5200,9229)", "name": "Shared Functional Groups Sequence", "type": "1"},
                    {"tag": "(5200,9230)", "name": "Per-Frame Functional Groups Sequence", "type": "1"}
                ]},
                "C.7.6.16.2.1": {"attributes": [
                    {"tag": "(0028,9110)", "name": "Pixel Measures Sequence", "type": "1"}
                ]},
                "C.7.6.16.2.2": {"attributes": [
                    {"tag": "(0020,9111)", "name": "Frame Content Sequence", "type": "1"}
                ]},
                "C.7.6.16.2.6": {"attributes": [
                    {"tag": "(0008,9124)", "name": "Derivation Image Sequence", "type": "1"},
                    {"tag": "(0008,2112)", "name": "Source Image Sequence", "type": "2"}
                ]},
                "C.7.6.16.2.8": {"attributes": [
                    {"tag": "(0020,9071)", "name": "Frame Anatomy Sequence", "type": "1",
                     "items": [
                        {"tag": "(0020,9072)", "name": "Frame Laterality", "type": "1",
                         "enums": [{"values": ["R", "L", "U", "B"]}]}
                     ]}
                ]},
                "C.7.6.16.2.18": {"attributes": [
                    {"tag": "(0018,9477)", "name": "Irradiation Event Identification Sequence", "type": "1"}
                ]}
            },
            "dictionary": {
                "(0008,0008)": {"name": "Image Type", "vr": "CS"},
                "(0008,0016)": {"name": "SOP Class UID", "vr": "UI"},
                "(0008,0060)": {"name": "Modality", "vr": "CS"},
                "(0010,0040)": {"name": "Patient's Sex", "vr": "CS"},
                "(0018,106A)": {"name": "Synchronization Trigger", "vr": "CS"},
                "(0018,9361)": {"name": "Multi-energy CT Acquisition", "vr": "CS"},
                "(0020,0052)": {"name": "Frame of Reference UID", "vr": "UI"},
                "(0028,0002)": {"name": "Samples per Pixel", "vr": "US"},
                "(0028,0101)": {"name": "Bits Stored", "vr": "US"},
                "(0028,6101)": {"name": "Mask Operation", "vr": "CS"},
                "(0040,0512)": {"name": "Container Identifier", "vr": "LO"},
                "(0040,A040)": {"name": "Value Type", "vr": "CS"},
                "(2050,0020)": {"name": "Presentation LUT Shape", "vr": "CS"}
            }
        }"#,
        )
        .unwrap()
    }

    fn str_el(tag: Tag, vr: VR, value: &str) -> InMemElement {
        InMemElement::new(tag, vr, PrimitiveValue::from(value))
    }

    fn empty_el(tag: Tag, vr: VR) -> InMemElement {
        InMemElement::new(tag, vr, PrimitiveValue::Empty)
    }

    fn us_el(tag: Tag, value: u16) -> InMemElement {
        InMemElement::new(tag, VR::US, PrimitiveValue::from(value))
    }

    fn multi_el(tag: Tag, vr: VR, values: &[&str]) -> InMemElement {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        InMemElement::new(tag, vr, PrimitiveValue::Strs(values.into()))
    }

    fn seq_el(tag: Tag, items: Vec<InMemDicomObject>) -> InMemElement {
        InMemElement::new(tag, VR::SQ, DataSetSequence::new(items, Length::UNDEFINED))
    }

    fn ct_record() -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            str_el(Tag(0x0008, 0x0016), VR::UI, CT_STORAGE),
            str_el(Tag(0x0008, 0x0018), VR::UI, "1.2.3.4"),
            str_el(Tag(0x0010, 0x0010), VR::PN, "Doe^John"),
            str_el(Tag(0x0010, 0x0020), VR::LO, "ID1"),
            str_el(Tag(0x0010, 0x0040), VR::CS, "M"),
            str_el(Tag(0x0008, 0x0060), VR::CS, "CT"),
            multi_el(Tag(0x0008, 0x0008), VR::CS, &["ORIGINAL", "PRIMARY"]),
            us_el(Tag(0x0028, 0x0002), 1),
            us_el(Tag(0x0028, 0x0101), 12),
        ])
    }

    fn with_elements(
        mut record: InMemDicomObject,
        elements: impl IntoIterator<Item = InMemElement>,
    ) -> InMemDicomObject {
        for element in elements {
            record.put(element);
        }
        record
    }

    fn validate(record: &InMemDicomObject, info: &DicomInfo) -> ValidationResult {
        IodValidator::new(record, info).validate()
    }

    #[test]
    fn missing_sop_class_is_fatal() {
        let info = fixture();
        let record = InMemDicomObject::from_element_iter([str_el(
            Tag(0x0010, 0x0010),
            VR::PN,
            "Doe^John",
        )]);
        let result = validate(&record, &info);
        assert_eq!(result.status(), Status::MissingSopClassUid);
        assert_eq!(result.error_count(), 1);
        assert!(result.modules().is_empty());
    }

    #[test]
    fn unknown_sop_class_is_fatal() {
        let info = fixture();
        let record = InMemDicomObject::from_element_iter([str_el(
            Tag(0x0008, 0x0016),
            VR::UI,
            "1.2.3",
        )]);
        let result = validate(&record, &info);
        assert_eq!(result.status(), Status::UnknownSopClassUid);
        assert_eq!(result.sop_class_uid, "1.2.3");
        assert_eq!(result.error_count(), 1);
    }

    #[test]
    fn clean_record_passes() {
        let info = fixture();
        let result = validate(&ct_record(), &info);
        assert!(result.passed(), "unexpected findings: {:?}", result.modules());
    }

    #[test]
    fn missing_required_tags_are_reported() {
        let info = fixture();
        let mut record = ct_record();
        record.remove_element(Tag(0x0010, 0x0040));
        record.remove_element(Tag(0x0008, 0x0060));
        let result = validate(&record, &info);

        assert!(result.has_error("Patient", Tag(0x0010, 0x0040), ErrorKind::TagMissing));
        assert!(result.has_error("General Series", Tag(0x0008, 0x0060), ErrorKind::TagMissing));
        // optional module is absent: its type 1 attribute is not demanded
        assert!(!result.has_error(
            "Clinical Trial Subject",
            Tag(0x0012, 0x0010),
            ErrorKind::TagMissing
        ));
        // 2C attribute with an unreadable condition is not demanded
        assert!(!result.has_error("Patient", Tag(0x0010, 0x2292), ErrorKind::TagMissing));
    }

    #[test]
    fn empty_type1_is_empty_not_missing() {
        let info = fixture();
        let record = with_elements(
            ct_record(),
            [
                empty_el(Tag(0x0008, 0x0008), VR::CS),
                empty_el(Tag(0x0010, 0x0010), VR::PN),
            ],
        );
        let result = validate(&record, &info);

        assert!(result.has_error("CT Image", Tag(0x0008, 0x0008), ErrorKind::TagEmpty));
        assert!(!result.has_error("CT Image", Tag(0x0008, 0x0008), ErrorKind::TagMissing));
        assert!(!result.has_error("CT Image", Tag(0x0008, 0x0008), ErrorKind::EnumValueNotAllowed));
        // type 2 may be empty
        assert!(!result.has_error("Patient", Tag(0x0010, 0x0010), ErrorKind::TagEmpty));
    }

    #[test]
    fn conditional_attribute_required_when_condition_met() {
        let info = fixture();
        let record = with_elements(ct_record(), [us_el(Tag(0x0028, 0x0002), 3)]);
        let result = validate(&record, &info);
        let errors = result.errors_for("CT Image");
        let missing = errors
            .iter()
            .find(|e| e.tag == Tag(0x0028, 0x0006) && e.kind == ErrorKind::TagMissing)
            .expect("planar configuration should be missing");
        assert_eq!(
            missing.condition.as_deref(),
            Some("Required if Samples per Pixel is greater than 1.")
        );

        // condition not met, attribute absent: nothing to report
        let result = validate(&ct_record(), &info);
        assert!(!result.has_error("CT Image", Tag(0x0028, 0x0006), ErrorKind::TagMissing));
    }

    #[test]
    fn conditional_attribute_not_allowed_when_condition_unmet() {
        let info = fixture();
        let record = with_elements(
            ct_record(),
            [seq_el(Tag(0x0018, 0x9360), vec![InMemDicomObject::new_empty()])],
        );
        let result = validate(&record, &info);
        assert!(result.has_error("CT Image", Tag(0x0018, 0x9360), ErrorKind::TagNotAllowed));

        // with the trigger value the attribute is required and welcome
        let record = with_elements(
            record,
            [str_el(Tag(0x0018, 0x9361), VR::CS, "YES")],
        );
        let result = validate(&record, &info);
        assert!(!result.has_error("CT Image", Tag(0x0018, 0x9360), ErrorKind::TagNotAllowed));
    }

    #[test]
    fn sr_content_scenarios() {
        let info = fixture();
        let base = InMemDicomObject::from_element_iter([
            str_el(Tag(0x0008, 0x0016), VR::UI, SR_STORAGE),
            str_el(Tag(0x0008, 0x0018), VR::UI, "1.2.3.4"),
            str_el(Tag(0x0010, 0x0010), VR::PN, "Doe^John"),
            str_el(Tag(0x0010, 0x0020), VR::LO, "ID1"),
            str_el(Tag(0x0010, 0x0040), VR::CS, "F"),
        ]);

        // value type TEXT requires the concept name code sequence
        let record = with_elements(
            base.clone(),
            [str_el(Tag(0x0040, 0xA040), VR::CS, "TEXT")],
        );
        let result = validate(&record, &info);
        assert!(result.has_error(
            "SR Document Content",
            Tag(0x0040, 0xA043),
            ErrorKind::TagMissing
        ));
        assert!(!result.has_error(
            "SR Document Content",
            Tag(0x0040, 0xA300),
            ErrorKind::TagMissing
        ));

        // condition unmet and no allowance: presence is an error
        let record = with_elements(
            base,
            [
                str_el(Tag(0x0040, 0xA040), VR::CS, "CONTAINER"),
                seq_el(Tag(0x0040, 0xA043), vec![InMemDicomObject::new_empty()]),
            ],
        );
        let result = validate(&record, &info);
        assert!(result.has_error(
            "SR Document Content",
            Tag(0x0040, 0xA043),
            ErrorKind::TagNotAllowed
        ));
        assert!(!result.has_error(
            "SR Document Content",
            Tag(0x0040, 0xA043),
            ErrorKind::TagMissing
        ));
    }

    #[test]
    fn enum_values_are_checked() {
        let info = fixture();
        let record = with_elements(
            ct_record(),
            [
                str_el(Tag(0x2050, 0x0020), VR::CS, "INVALID"),
                us_el(Tag(0x0028, 0x0101), 1),
            ],
        );
        let result = validate(&record, &info);

        let errors = result.errors_for("CT Image");
        let shape = errors
            .iter()
            .find(|e| e.tag == Tag(0x2050, 0x0020))
            .expect("presentation LUT shape finding");
        assert_eq!(shape.kind, ErrorKind::EnumValueNotAllowed);
        assert_eq!(
            shape.detail,
            Some(ErrorDetail::EnumValue {
                value: "INVALID".into(),
                allowed: vec!["IDENTITY".into(), "INVERSE".into()],
            })
        );

        let bits = errors
            .iter()
            .find(|e| e.tag == Tag(0x0028, 0x0101))
            .expect("bits stored finding");
        assert_eq!(
            bits.detail,
            Some(ErrorDetail::EnumValue {
                value: "1".into(),
                allowed: vec![
                    "8".into(),
                    "9".into(),
                    "10".into(),
                    "11".into(),
                    "12".into(),
                    "13".into(),
                    "14".into(),
                    "15".into(),
                    "16".into()
                ],
            })
        );
    }

    #[test]
    fn indexed_enums_apply_to_their_position() {
        let info = fixture();
        // correct values, wrong order
        let record = with_elements(
            ct_record(),
            [multi_el(Tag(0x0008, 0x0008), VR::CS, &["PRIMARY", "ORIGINAL"])],
        );
        let result = validate(&record, &info);
        assert!(result.has_error("CT Image", Tag(0x0008, 0x0008), ErrorKind::EnumValueNotAllowed));

        // correct order passes
        let result = validate(&ct_record(), &info);
        assert!(!result.has_error("CT Image", Tag(0x0008, 0x0008), ErrorKind::EnumValueNotAllowed));
    }

    #[test]
    fn empty_enum_attribute_is_not_checked() {
        let info = fixture();
        let record = with_elements(ct_record(), [empty_el(Tag(0x0010, 0x0040), VR::CS)]);
        let result = validate(&record, &info);
        assert!(!result.has_error("Patient", Tag(0x0010, 0x0040), ErrorKind::EnumValueNotAllowed));
        assert!(!result.has_error("Patient", Tag(0x0010, 0x0040), ErrorKind::TagEmpty));
    }

    #[test]
    fn vr_violations_are_reported_and_suppressible() {
        let info = fixture();
        let record = with_elements(
            ct_record(),
            [str_el(Tag(0x0010, 0x0022), VR::CS, "lowercase")],
        );
        let result = validate(&record, &info);
        let errors = result.errors_for("Patient");
        let invalid = errors
            .iter()
            .find(|e| e.tag == Tag(0x0010, 0x0022))
            .expect("type of patient id finding");
        assert_eq!(invalid.kind, ErrorKind::InvalidValue);
        assert_eq!(
            invalid.detail,
            Some(ErrorDetail::InvalidValue {
                value: "lowercase".into(),
                vr: "CS".into(),
            })
        );

        let mut options = ValidationOptions::new();
        options.suppress_vr_checks(true);
        let result = IodValidator::with_options(&record, &info, options).validate();
        assert!(!result.has_error("Patient", Tag(0x0010, 0x0022), ErrorKind::InvalidValue));
    }

    #[test]
    fn unexpected_tags_swept_to_general() {
        let info = fixture();
        let record = with_elements(
            ct_record(),
            [
                str_el(Tag(0x0018, 0x1063), VR::DS, "33.0"),
                str_el(Tag(0x0019, 0x1001), VR::LO, "private"),
                InMemElement::new(Tag(0x0008, 0x0000), VR::UL, PrimitiveValue::from(128_u32)),
            ],
        );
        let result = validate(&record, &info);
        assert!(result.has_error("General", Tag(0x0018, 0x1063), ErrorKind::TagUnexpected));
        assert!(!result.has_error("General", Tag(0x0019, 0x1001), ErrorKind::TagUnexpected));
        assert!(!result.has_error("General", Tag(0x0008, 0x0000), ErrorKind::TagUnexpected));
        assert_eq!(result.errors_for("General").len(), 1);
    }

    #[test]
    fn module_not_allowed_when_condition_forbids() {
        let info = fixture();
        let record = with_elements(
            ct_record(),
            [str_el(Tag(0x0040, 0x0512), VR::LO, "CONTAINER-1")],
        );
        let result = validate(&record, &info);
        let errors = result.errors_for("Specimen");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].tag, Tag(0x0040, 0x0512));
        assert_eq!(errors[0].kind, ErrorKind::ModuleNotAllowed);
        assert_eq!(
            errors[0].condition.as_deref(),
            Some("Required if Modality is equal to \"SM\".")
        );
    }

    #[test]
    fn conditional_module_required_when_condition_met() {
        let info = fixture();
        let record = with_elements(
            ct_record(),
            [str_el(Tag(0x0020, 0x0052), VR::UI, "1.2.3.4.5")],
        );
        let result = validate(&record, &info);
        assert!(result.has_error("Synchronization", Tag(0x0018, 0x106A), ErrorKind::TagMissing));

        let result = validate(&ct_record(), &info);
        assert!(!result.has_error("Synchronization", Tag(0x0018, 0x106A), ErrorKind::TagMissing));
    }

    #[test]
    fn validation_is_idempotent() {
        let info = fixture();
        let record = with_elements(
            ct_record(),
            [
                us_el(Tag(0x0028, 0x0002), 3),
                str_el(Tag(0x2050, 0x0020), VR::CS, "INVALID"),
                str_el(Tag(0x0018, 0x1063), VR::DS, "33.0"),
            ],
        );
        let first = validate(&record, &info);
        let second = validate(&record, &info);
        assert_eq!(first, second);
        assert!(!first.passed());
    }

    #[test]
    fn nested_sequence_conditions_use_item_scope() {
        let info = fixture();
        let item = InMemDicomObject::from_element_iter([str_el(
            Tag(0x0028, 0x6101),
            VR::CS,
            "AVG_SUB",
        )]);
        let record = with_elements(
            exa_record(None, vec![frame_content_item()]),
            [seq_el(Tag(0x0028, 0x6100), vec![item])],
        );
        let result = validate(&record, &info);
        let errors = result.errors_for("Mask");
        let missing = errors
            .iter()
            .find(|e| e.tag == Tag(0x0028, 0x6110))
            .expect("mask frame numbers should be missing");
        assert_eq!(missing.kind, ErrorKind::TagMissing);
        assert_eq!(missing.parents, vec![Tag(0x0028, 0x6100)]);

        // a different mask operation does not demand the attribute
        let item = InMemDicomObject::from_element_iter([str_el(
            Tag(0x0028, 0x6101),
            VR::CS,
            "NONE",
        )]);
        let record = with_elements(
            exa_record(None, vec![frame_content_item()]),
            [seq_el(Tag(0x0028, 0x6100), vec![item])],
        );
        let result = validate(&record, &info);
        assert!(!result.has_error("Mask", Tag(0x0028, 0x6110), ErrorKind::TagMissing));
    }

    // ---- functional groups ----

    fn frame_content_item() -> InMemDicomObject {
        InMemDicomObject::from_element_iter([seq_el(
            Tag(0x0020, 0x9111),
            vec![InMemDicomObject::new_empty()],
        )])
    }

    fn frame_anatomy_content() -> InMemElement {
        seq_el(
            Tag(0x0020, 0x9071),
            vec![InMemDicomObject::from_element_iter([str_el(
                Tag(0x0020, 0x9072),
                VR::CS,
                "R",
            )])],
        )
    }

    /// An Enhanced XA record with the given shared item and frame items.
    fn exa_record(
        shared: Option<InMemDicomObject>,
        frames: Vec<InMemDicomObject>,
    ) -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            str_el(Tag(0x0008, 0x0016), VR::UI, EXA_STORAGE),
            str_el(Tag(0x0008, 0x0018), VR::UI, "1.2.3.4"),
            str_el(Tag(0x0010, 0x0010), VR::PN, "Doe^John"),
            str_el(Tag(0x0010, 0x0020), VR::LO, "ID1"),
            str_el(Tag(0x0010, 0x0040), VR::CS, "O"),
            multi_el(Tag(0x0008, 0x0008), VR::CS, &["ORIGINAL", "PRIMARY"]),
            seq_el(Tag(0x5200, 0x9229), shared.into_iter().collect()),
            seq_el(Tag(0x5200, 0x9230), frames),
        ])
    }

    #[test]
    fn missing_functional_group_sequences() {
        let info = fixture();
        let mut record = exa_record(None, vec![]);
        record.remove_element(Tag(0x5200, 0x9229));
        record.remove_element(Tag(0x5200, 0x9230));
        let result = validate(&record, &info);
        assert!(result.has_error(
            "Multi-frame Functional Groups",
            Tag(0x5200, 0x9229),
            ErrorKind::TagMissing
        ));
        assert!(result.has_error(
            "Multi-frame Functional Groups",
            Tag(0x5200, 0x9230),
            ErrorKind::TagMissing
        ));
    }

    #[test]
    fn empty_functional_group_sequences() {
        let info = fixture();
        let record = exa_record(None, vec![]);
        let result = validate(&record, &info);
        assert!(result.has_error(
            "Multi-frame Functional Groups",
            Tag(0x5200, 0x9229),
            ErrorKind::TagEmpty
        ));
        assert!(result.has_error(
            "Multi-frame Functional Groups",
            Tag(0x5200, 0x9230),
            ErrorKind::TagEmpty
        ));
    }

    #[test]
    fn macros_resolve_across_both_groups() {
        let info = fixture();
        let shared = InMemDicomObject::from_element_iter([frame_anatomy_content()]);
        let record = exa_record(Some(shared), vec![frame_content_item(), frame_content_item()]);
        let result = validate(&record, &info);

        // frame anatomy lives in the shared group: present, no findings
        assert!(result.errors_for("Frame Anatomy").is_empty());
        // frame content lives per-frame where it belongs
        assert!(result.errors_for("Frame Content").is_empty());

        // pixel measures is required by the macro-presence condition
        let errors = result.errors_for("Pixel Measures");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].tag, Tag(0x0028, 0x9110));
        assert_eq!(errors[0].kind, ErrorKind::TagMissing);
        assert_eq!(errors[0].parents, vec![Tag(0x5200, 0x9230)]);
        assert_eq!(errors[0].scope, ErrorScope::PerFrameGroup);

        // mandatory macro missing from both groups
        let errors = result.errors_for("Irradiation Event Identification");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].tag, Tag(0x0018, 0x9477));
        assert_eq!(errors[0].kind, ErrorKind::TagMissing);
        assert_eq!(errors[0].scope, ErrorScope::PerFrameGroup);
    }

    #[test]
    fn macro_in_both_groups_is_flagged() {
        let info = fixture();
        let shared = frame_content_item();
        let record = exa_record(Some(shared), vec![frame_content_item()]);
        let result = validate(&record, &info);
        let errors = result.errors_for("Frame Content");
        let both = errors
            .iter()
            .find(|e| e.scope == ErrorScope::BothGroups)
            .expect("duplicated macro finding");
        assert_eq!(both.tag, Tag(0x0020, 0x9111));
        assert_eq!(both.kind, ErrorKind::TagNotAllowed);
        assert_eq!(both.parents, vec![Tag(0x5200, 0x9230)]);
    }

    #[test]
    fn per_frame_macro_in_shared_group_is_flagged() {
        let info = fixture();
        let record = exa_record(Some(frame_content_item()), vec![]);
        let result = validate(&record, &info);
        let errors = result.errors_for("Frame Content");
        let misplaced = errors
            .iter()
            .find(|e| e.kind == ErrorKind::TagNotAllowed)
            .expect("misplaced macro finding");
        assert_eq!(misplaced.tag, Tag(0x0020, 0x9111));
        assert_eq!(misplaced.scope, ErrorScope::SharedGroup);
        assert_eq!(misplaced.parents, vec![Tag(0x5200, 0x9229)]);
    }

    #[test]
    fn shared_group_backs_up_missing_frame_attributes() {
        let info = fixture();
        // derivation image macro: governing sequence per frame, the
        // type 2 companion attribute only in the shared group
        let frame = InMemDicomObject::from_element_iter([
            seq_el(Tag(0x0008, 0x9124), vec![InMemDicomObject::new_empty()]),
            seq_el(Tag(0x0020, 0x9111), vec![InMemDicomObject::new_empty()]),
        ]);
        let shared = InMemDicomObject::from_element_iter([seq_el(
            Tag(0x0008, 0x2112),
            vec![InMemDicomObject::new_empty()],
        )]);
        let record = exa_record(Some(shared), vec![frame]);
        let result = validate(&record, &info);
        assert!(!result.has_error(
            "Derivation Image",
            Tag(0x0008, 0x2112),
            ErrorKind::TagMissing
        ));

        // missing from both groups: one finding, per-frame path
        let frame = InMemDicomObject::from_element_iter([
            seq_el(Tag(0x0008, 0x9124), vec![InMemDicomObject::new_empty()]),
            seq_el(Tag(0x0020, 0x9111), vec![InMemDicomObject::new_empty()]),
        ]);
        let record = exa_record(None, vec![frame.clone(), frame]);
        let result = validate(&record, &info);
        let errors: Vec<_> = result
            .errors_for("Derivation Image")
            .iter()
            .filter(|e| e.tag == Tag(0x0008, 0x2112))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::TagMissing);
        assert_eq!(errors[0].parents, vec![Tag(0x5200, 0x9230)]);
        assert_eq!(errors[0].scope, ErrorScope::PerFrameGroup);
    }
}
