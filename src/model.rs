//! The reference model: IOD, module and attribute tables for one edition
//! of the standard, plus the flat tag dictionary.
//!
//! The tables are produced offline by extracting the standard text and are
//! consumed here as JSON. A loaded [`DicomInfo`] is immutable and can be
//! shared freely between concurrent validations; condition texts inside it
//! are parsed lazily through a per-model [`ConditionCache`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dicom_core::Tag;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::condition::{ConditionCache, ConditionParser, ConditionalRequirement};

/// An error loading the reference model tables.
#[derive(Debug, Snafu)]
pub enum LoadError {
    /// Could not read the reference model file.
    #[snafu(display("Could not read reference model from {}: {}", path.display(), source))]
    ReadFile {
        /// file being read
        path: PathBuf,
        /// underlying I/O error
        source: std::io::Error,
    },
    /// The reference model data is not valid JSON for the expected tables.
    #[snafu(display("Could not decode reference model tables: {}", source))]
    DecodeTables {
        /// underlying decoding error
        source: serde_json::Error,
    },
}

/// Parse a tag identifier in the form `(gggg,eeee)` (hexadecimal).
///
/// The `xx` digits used by the standard for repeating groups are read
/// as zeroes.
pub fn parse_tag_id(id: &str) -> Option<Tag> {
    let inner = id.strip_prefix('(')?.strip_suffix(')')?;
    let (group, element) = inner.split_once(',')?;
    let group = group.trim().replace(['x', 'X'], "0");
    let element = element.trim().replace(['x', 'X'], "0");
    let group = u16::from_str_radix(&group, 16).ok()?;
    let element = u16::from_str_radix(&element, 16).ok()?;
    Some(Tag(group, element))
}

/// One entry of the flat tag dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagDictEntry {
    /// attribute name as written in the standard
    pub name: String,
    /// value representation code
    pub vr: String,
    /// value multiplicity as written in the standard (e.g. "1", "1-n")
    #[serde(default)]
    pub vm: Option<String>,
}

/// The flat tag dictionary of the standard: tag to name, VR and
/// multiplicity. Used to resolve attribute names in condition prose and
/// for diagnostics.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HashMap<String, TagDictEntry>")]
pub struct TagDictionary {
    entries: HashMap<Tag, TagDictEntry>,
    by_name: HashMap<String, Tag>,
    // "Frame of Reference UID" is also resolvable as "Frame of Reference"
    by_uid_stripped_name: HashMap<String, Tag>,
}

impl From<HashMap<String, TagDictEntry>> for TagDictionary {
    fn from(raw: HashMap<String, TagDictEntry>) -> Self {
        let mut dict = TagDictionary::default();
        for (id, entry) in raw {
            if let Some(tag) = parse_tag_id(&id) {
                dict.insert(tag, entry);
            }
        }
        dict
    }
}

impl TagDictionary {
    /// Build a dictionary from `(tag id, name, vr)` triples.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>) -> Self {
        let mut dict = TagDictionary::default();
        for (id, name, vr) in entries {
            if let Some(tag) = parse_tag_id(id) {
                dict.insert(
                    tag,
                    TagDictEntry {
                        name: name.to_string(),
                        vr: vr.to_string(),
                        vm: None,
                    },
                );
            }
        }
        dict
    }

    fn insert(&mut self, tag: Tag, entry: TagDictEntry) {
        self.by_name.insert(entry.name.clone(), tag);
        if let Some(stripped) = entry.name.strip_suffix(" UID") {
            self.by_uid_stripped_name.insert(stripped.to_string(), tag);
        }
        self.entries.insert(tag, entry);
    }

    /// Fetch the full entry for a tag.
    pub fn entry(&self, tag: Tag) -> Option<&TagDictEntry> {
        self.entries.get(&tag)
    }

    /// The attribute name for a tag, if known.
    pub fn name_of(&self, tag: Tag) -> Option<&str> {
        self.entries.get(&tag).map(|e| e.name.as_str())
    }

    /// The value representation code for a tag, if known.
    pub fn vr_of(&self, tag: Tag) -> Option<&str> {
        self.entries.get(&tag).map(|e| e.vr.as_str())
    }

    /// Resolve an attribute name to its tag, accepting "... UID" names
    /// written without the suffix.
    pub fn tag_by_name(&self, name: &str) -> Option<Tag> {
        self.by_name
            .get(name)
            .or_else(|| self.by_uid_stripped_name.get(name))
            .copied()
    }

    /// Whether the dictionary knows this tag.
    pub fn contains(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a module is used by an IOD.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize)]
pub enum Usage {
    /// The module is mandatory.
    #[serde(rename = "M")]
    Mandatory,
    /// The module is mandatory under a condition.
    #[serde(rename = "C")]
    Conditional,
    /// The module is optional.
    #[serde(rename = "U")]
    UserOptional,
}

/// One module reference inside an IOD definition.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleEntry {
    /// module name, as listed in the IOD table
    pub name: String,
    /// key of the module's attribute table in [`DicomInfo::modules`]
    #[serde(rename = "ref")]
    pub module_ref: String,
    /// usage kind
    pub usage: Usage,
    /// condition prose, for conditional modules
    #[serde(default)]
    pub condition: Option<String>,
}

/// The definition of an IOD: the modules a data set of this SOP class
/// is made of.
#[derive(Debug, Clone, Deserialize)]
pub struct IodInfo {
    /// IOD title, for diagnostics
    pub title: String,
    /// module list in standard order
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
    /// functional group macros, for multi-frame IODs (empty otherwise)
    #[serde(default)]
    pub group_macros: Vec<ModuleEntry>,
}

/// The attribute type of a module attribute.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize)]
pub enum AttributeType {
    /// required, must have a value
    #[serde(rename = "1")]
    Type1,
    /// required under a condition, must have a value when present
    #[serde(rename = "1C")]
    Type1C,
    /// required, may be empty
    #[serde(rename = "2")]
    Type2,
    /// required under a condition, may be empty
    #[serde(rename = "2C")]
    Type2C,
    /// optional
    #[serde(rename = "3")]
    Type3,
}

impl AttributeType {
    /// Whether a present attribute of this type must carry a value.
    pub fn requires_value(self) -> bool {
        matches!(self, AttributeType::Type1 | AttributeType::Type1C)
    }

    /// Whether the requirement depends on a condition.
    pub fn is_conditional(self) -> bool {
        matches!(self, AttributeType::Type1C | AttributeType::Type2C)
    }
}

/// A set of enumerated values accepted for an attribute, optionally
/// restricted to one 1-based value position.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnumValues {
    /// accepted values
    pub values: Vec<EnumValue>,
    /// 1-based value position the set applies to; `None` applies to all
    #[serde(default)]
    pub index: Option<u32>,
}

/// A single enumerated value, as extracted from the standard.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EnumValue {
    /// integer value, for attributes with an integer VR
    Int(i64),
    /// textual value
    Str(String),
}

impl std::fmt::Display for EnumValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnumValue::Int(i) => write!(f, "{}", i),
            EnumValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// One attribute row of a module table.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeEntry {
    /// tag identifier in the form `(gggg,eeee)`
    pub tag: String,
    /// attribute name, for diagnostics
    #[serde(default)]
    pub name: Option<String>,
    /// attribute type
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// condition prose, for type 1C/2C attributes
    #[serde(default)]
    pub condition: Option<String>,
    /// value representation code, when it deviates from the dictionary
    #[serde(default)]
    pub vr: Option<String>,
    /// enumerated value sets
    #[serde(default)]
    pub enums: Vec<EnumValues>,
    /// content of sequence items, for SQ attributes with a defined shape
    #[serde(default)]
    pub items: Option<Vec<AttributeEntry>>,
}

impl AttributeEntry {
    /// The numeric tag of this attribute.
    pub fn tag_id(&self) -> Option<Tag> {
        parse_tag_id(&self.tag)
    }
}

/// A module's attribute table.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleSpec {
    /// attribute rows in standard order
    #[serde(default)]
    pub attributes: Vec<AttributeEntry>,
}

/// The complete reference model for one edition of the standard.
#[derive(Debug, Deserialize)]
pub struct DicomInfo {
    /// SOP class UID to IOD definition
    pub iods: HashMap<String, IodInfo>,
    /// module reference to attribute table
    pub modules: HashMap<String, ModuleSpec>,
    /// flat tag dictionary
    pub dictionary: TagDictionary,
    #[serde(skip)]
    cache: ConditionCache,
}

impl DicomInfo {
    /// Load the reference model from a JSON reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, LoadError> {
        serde_json::from_reader(BufReader::new(reader)).context(DecodeTablesSnafu)
    }

    /// Load the reference model from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let file = File::open(path).context(ReadFileSnafu { path })?;
        Self::from_reader(file)
    }

    /// Load the reference model from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        serde_json::from_str(json).context(DecodeTablesSnafu)
    }

    /// The IOD definition for a SOP class UID.
    pub fn iod(&self, sop_class_uid: &str) -> Option<&IodInfo> {
        self.iods.get(sop_class_uid.trim_end_matches(['\0', ' ']))
    }

    /// The attribute table for a module reference.
    pub fn module(&self, module_ref: &str) -> Option<&ModuleSpec> {
        self.modules.get(module_ref)
    }

    /// Parse a condition text into a requirement, going through this
    /// model's condition cache.
    pub fn requirement(&self, text: &str) -> Arc<ConditionalRequirement> {
        let parser = ConditionParser::new(&self.dictionary);
        self.cache.get_or_parse(&parser, text)
    }
}
