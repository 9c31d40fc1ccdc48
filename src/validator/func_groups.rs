//! Resolution of shared and per-frame functional groups.
//!
//! Multi-frame records store per-frame attributes inside the Per-Frame
//! Functional Groups Sequence (5200,9230) and attributes common to all
//! frames inside the Shared Functional Groups Sequence (5200,9229). A
//! macro expected per-frame may legitimately sit in the shared group
//! instead, so required-attribute lookups fall back from each frame item
//! to the shared item before declaring anything missing. The reverse
//! placement (per-frame where shared is expected) is tolerated as well,
//! as it is commonly produced in the wild; explicit placement
//! restrictions in the standard text are enforced.

use dicom_core::Tag;
use dicom_dictionary_std::tags;

use crate::access::RecordAccessor;
use crate::condition::MacroLookup;
use crate::model::{DicomInfo, IodInfo};

/// Shared Functional Groups Sequence.
pub const SHARED_GROUPS: Tag = tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE;
/// Per-Frame Functional Groups Sequence.
pub const PER_FRAME_GROUPS: Tag = tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE;

/// Where a functional group macro is allowed to live.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GroupPlacement {
    /// either group
    Any,
    /// shared group only
    SharedOnly,
    /// per-frame groups only
    PerFrameOnly,
}

/// Read a placement restriction out of a macro's usage prose.
pub fn placement_of(condition: Option<&str>) -> GroupPlacement {
    let text = match condition {
        Some(text) => text.to_lowercase(),
        None => return GroupPlacement::Any,
    };
    if text.contains("not be used as a shared functional group") {
        GroupPlacement::PerFrameOnly
    } else if text.contains("not be used as a per-frame functional group")
        || text.contains("shall be used as a shared functional group")
    {
        GroupPlacement::SharedOnly
    } else {
        GroupPlacement::Any
    }
}

/// The functional group items of one record.
#[derive(Debug)]
pub struct FunctionalGroups<'a, A> {
    shared: Option<&'a A>,
    frames: Vec<&'a A>,
}

impl<'a, A: RecordAccessor> FunctionalGroups<'a, A> {
    /// Capture the shared item and all per-frame items of the record.
    pub fn capture(record: &'a A) -> Self {
        let shared = record.item(SHARED_GROUPS, 0);
        let frame_count = record.item_count(PER_FRAME_GROUPS).unwrap_or(0);
        let frames = (0..frame_count)
            .filter_map(|index| record.item(PER_FRAME_GROUPS, index))
            .collect();
        FunctionalGroups { shared, frames }
    }

    /// The single item of the shared group, if any.
    pub fn shared(&self) -> Option<&'a A> {
        self.shared
    }

    /// The per-frame items, one per frame.
    pub fn frames(&self) -> &[&'a A] {
        &self.frames
    }

    /// Whether the shared item carries the tag.
    pub fn in_shared(&self, tag: Tag) -> bool {
        self.shared.map(|item| item.has_tag(tag)).unwrap_or(false)
    }

    /// Whether any per-frame item carries the tag.
    pub fn in_any_frame(&self, tag: Tag) -> bool {
        self.frames.iter().any(|item| item.has_tag(tag))
    }

    /// Whether the tag is anywhere in either group.
    pub fn any_has_tag(&self, tag: Tag) -> bool {
        self.in_shared(tag) || self.in_any_frame(tag)
    }
}

/// Macro-presence lookup for condition evaluation: maps macro names from
/// condition prose to their governing sequences and checks both groups.
#[derive(Debug)]
pub struct MacroIndex<'a, A> {
    groups: &'a FunctionalGroups<'a, A>,
    macros: Vec<(String, Tag)>,
}

impl<'a, A: RecordAccessor> MacroIndex<'a, A> {
    /// Index the governing sequence of every macro the IOD uses.
    pub fn new(groups: &'a FunctionalGroups<'a, A>, iod: &IodInfo, info: &DicomInfo) -> Self {
        let macros = iod
            .group_macros
            .iter()
            .filter_map(|entry| {
                let spec = info.module(&entry.module_ref)?;
                let governing = spec.attributes.first()?.tag_id()?;
                Some((entry.name.clone(), governing))
            })
            .collect();
        MacroIndex { groups, macros }
    }
}

impl<A: RecordAccessor> MacroLookup for MacroIndex<'_, A> {
    fn macro_present(&self, name: &str) -> bool {
        self.macros.iter().any(|(macro_name, governing)| {
            names_match(macro_name, name) && self.groups.any_has_tag(*governing)
        })
    }
}

/// Condition prose rarely names a macro exactly as the IOD table does;
/// a prefix either way is close enough.
fn names_match(defined: &str, written: &str) -> bool {
    let defined = defined.to_ascii_lowercase();
    let written = written.to_ascii_lowercase();
    defined == written || defined.starts_with(&written) || written.starts_with(&defined)
}
