//! Read-only access to the record under validation.
//!
//! The validator and the condition evaluator never read a data set
//! directly: they go through [`RecordAccessor`], the minimal capability
//! they need. The trait is implemented here for
//! [`InMemDicomObject`], which keeps this the only module aware of how
//! values are physically stored.

use dicom_core::dictionary::DataDictionary;
use dicom_core::header::Header;
use dicom_core::value::{PrimitiveValue, Value as DicomValue};
use dicom_core::{Tag, VR};
use dicom_object::mem::InMemDicomObject;

/// A single attribute value as seen by the condition evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// a textual value, trailing padding removed
    Str(String),
    /// a numeric value
    Number(f64),
    /// an attribute-tag value, as a single 32-bit word
    TagPointer(u32),
}

impl DataValue {
    /// The numeric reading of this value, if there is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            DataValue::Number(n) => Some(*n),
            DataValue::Str(s) => s.trim().parse().ok(),
            DataValue::TagPointer(t) => Some(*t as f64),
        }
    }

    /// Compare against a literal from a condition, coercing the literal
    /// into this value's domain: numeric comparison for numeric values,
    /// exact string comparison otherwise.
    pub fn matches(&self, literal: &str) -> bool {
        match self {
            DataValue::Str(s) => s == literal.trim(),
            DataValue::Number(n) => literal.trim().parse::<f64>().map(|l| l == *n).unwrap_or(false),
            DataValue::TagPointer(t) => literal
                .trim()
                .parse::<u64>()
                .map(|l| l == u64::from(*t))
                .unwrap_or(false),
        }
    }
}

/// A value which does not conform to its value representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueViolation {
    /// the offending value
    pub value: String,
    /// the value representation code it violates
    pub vr: String,
}

/// The read capability the validator requires from a record.
///
/// All value indices are zero based. Implementations must be pure reads:
/// calling any of these methods repeatedly yields the same answers.
pub trait RecordAccessor {
    /// Whether the attribute is present, empty or not.
    fn has_tag(&self, tag: Tag) -> bool;

    /// Number of values (or sequence items) of the attribute;
    /// 0 when absent or empty.
    fn multiplicity(&self, tag: Tag) -> u32;

    /// The value at the given index, if the attribute is present and has
    /// that many values.
    fn value_at(&self, tag: Tag, index: u32) -> Option<DataValue>;

    /// The value representation the attribute was read with.
    fn vr_of(&self, tag: Tag) -> Option<VR>;

    /// Whether the attribute is present without a value.
    fn is_empty_value(&self, tag: Tag) -> bool {
        self.has_tag(tag) && self.multiplicity(tag) == 0
    }

    /// Number of items of a sequence attribute; `None` for non-sequences.
    fn item_count(&self, tag: Tag) -> Option<usize>;

    /// A sequence item, as a nested record.
    fn item(&self, tag: Tag, index: usize) -> Option<&Self>;

    /// All attribute tags present in the record, in ascending order.
    fn tags(&self) -> Vec<Tag>;

    /// Check the attribute's values against its value representation.
    /// `None` means conformant (or not checkable).
    fn check_value(&self, tag: Tag) -> Option<ValueViolation>;
}

impl<D> RecordAccessor for InMemDicomObject<D>
where
    D: DataDictionary + Clone,
{
    fn has_tag(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }

    fn multiplicity(&self, tag: Tag) -> u32 {
        self.element(tag).map(|e| e.value().multiplicity()).unwrap_or(0)
    }

    fn value_at(&self, tag: Tag, index: u32) -> Option<DataValue> {
        let index = index as usize;
        let primitive = self.element(tag).ok()?.value().primitive()?;
        match primitive {
            PrimitiveValue::Empty => None,
            PrimitiveValue::Tags(tags) => tags
                .get(index)
                .map(|t| DataValue::TagPointer((u32::from(t.group()) << 16) | u32::from(t.element()))),
            PrimitiveValue::U8(xs) => xs.get(index).map(|v| DataValue::Number(f64::from(*v))),
            PrimitiveValue::I16(xs) => xs.get(index).map(|v| DataValue::Number(f64::from(*v))),
            PrimitiveValue::U16(xs) => xs.get(index).map(|v| DataValue::Number(f64::from(*v))),
            PrimitiveValue::I32(xs) => xs.get(index).map(|v| DataValue::Number(f64::from(*v))),
            PrimitiveValue::U32(xs) => xs.get(index).map(|v| DataValue::Number(f64::from(*v))),
            PrimitiveValue::I64(xs) => xs.get(index).map(|v| DataValue::Number(*v as f64)),
            PrimitiveValue::U64(xs) => xs.get(index).map(|v| DataValue::Number(*v as f64)),
            PrimitiveValue::F32(xs) => xs.get(index).map(|v| DataValue::Number(f64::from(*v))),
            PrimitiveValue::F64(xs) => xs.get(index).map(|v| DataValue::Number(*v)),
            _ => {
                let strings = primitive.to_multi_str();
                strings
                    .get(index)
                    .map(|s| DataValue::Str(s.trim_end_matches(['\0', ' ']).to_string()))
            }
        }
    }

    fn vr_of(&self, tag: Tag) -> Option<VR> {
        self.element(tag).ok().map(|e| e.vr())
    }

    fn item_count(&self, tag: Tag) -> Option<usize> {
        self.element(tag).ok().and_then(|e| e.value().items()).map(<[_]>::len)
    }

    fn item(&self, tag: Tag, index: usize) -> Option<&Self> {
        self.element(tag).ok().and_then(|e| e.value().items()).and_then(|items| items.get(index))
    }

    fn tags(&self) -> Vec<Tag> {
        self.into_iter().map(|e| e.tag()).collect()
    }

    fn check_value(&self, tag: Tag) -> Option<ValueViolation> {
        let element = self.element(tag).ok()?;
        let vr = element.vr();
        let primitive = match element.value() {
            DicomValue::Primitive(v) => v,
            _ => return None,
        };
        // values read into dedicated date/time/number types were already
        // validated during decoding; only stored strings can deviate
        match primitive {
            PrimitiveValue::Str(_) | PrimitiveValue::Strs(_) => {}
            _ => return None,
        }
        for value in primitive.to_multi_str().iter() {
            let value = value.trim_end_matches(['\0', ' ']);
            if value.is_empty() {
                continue;
            }
            if !conforms_to_vr(value, vr) {
                return Some(ValueViolation {
                    value: value.to_string(),
                    vr: vr.to_string().to_owned(),
                });
            }
        }
        None
    }
}

/// Character-level conformance of a stored string against its VR.
///
/// The decoding library validates values it parses into dedicated types;
/// string-kept values are checked here for the representations with a
/// constrained character repertoire.
fn conforms_to_vr(value: &str, vr: VR) -> bool {
    match vr {
        VR::CS => value
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == ' ' || c == '_'),
        VR::DA => value.len() == 8 && value.chars().all(|c| c.is_ascii_digit()),
        VR::TM => {
            let (whole, frac) = value.split_once('.').unwrap_or((value, ""));
            (2..=6).contains(&whole.len())
                && whole.len() % 2 == 0
                && whole.chars().all(|c| c.is_ascii_digit())
                && frac.chars().all(|c| c.is_ascii_digit())
        }
        VR::DT => value.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-')),
        VR::IS => value.trim().parse::<i64>().is_ok(),
        VR::DS => value.trim().parse::<f64>().is_ok(),
        VR::UI => value.len() <= 64 && value.chars().all(|c| c.is_ascii_digit() || c == '.'),
        VR::AS => {
            value.len() == 4
                && value[..3].chars().all(|c| c.is_ascii_digit())
                && matches!(value.as_bytes()[3], b'D' | b'W' | b'M' | b'Y')
        }
        _ => true,
    }
}
