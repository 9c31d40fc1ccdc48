#![deny(trivial_numeric_casts, unsafe_code, unstable_features)]
#![warn(missing_debug_implementations, unused_qualifications, unused_import_braces)]
//! This crate provides IOD conformance validation for DICOM data sets:
//! given a data set and the module/attribute tables of a standard edition,
//! it checks that the attributes required for the data set's SOP class
//! are present, non-empty and allowed, and reports every violation found.
//!
//! The current structure of this crate is as follows:
//!
//! - [`model`] holds the reference model: the IOD, module and attribute
//!   tables of a standard edition, loaded from JSON produced by an
//!   offline extraction of the standard text.
//! - [`condition`] contains the condition tree data model, the parser
//!   which builds condition trees out of the standard's prose
//!   ("Required if ..."), and their evaluation against a data set.
//! - [`ternary`] defines the three-valued logic that condition
//!   evaluation works in.
//! - [`access`] defines the read-only capability which the validator
//!   requires from a data set, implemented for
//!   [`InMemDicomObject`](dicom_object::InMemDicomObject).
//! - [`validator`] walks the module tables for the data set's SOP class
//!   and produces a [`ValidationResult`](report::ValidationResult).
//! - [`report`] defines the error taxonomy and the validation result.
//!
//! # Example
//!
//! ```no_run
//! use dicom_object::open_file;
//! use dicom_validator::{DicomInfo, IodValidator};
//!
//! let info = DicomInfo::from_file("dicom-standard.json")?;
//! let obj = open_file("image.dcm")?;
//! let result = IodValidator::new(&*obj, &info).validate();
//! for module in result.modules() {
//!     for error in &module.errors {
//!         eprintln!("{}: {}", module.name, error);
//!     }
//! }
//! # Result::<(), Box<dyn std::error::Error>>::Ok(())
//! ```

pub mod access;
pub mod condition;
pub mod model;
pub mod report;
pub mod ternary;
pub mod validator;

pub use access::{DataValue, RecordAccessor};
pub use condition::{Condition, ConditionParser, ConditionalRequirement, Otherwise};
pub use model::{DicomInfo, TagDictionary};
pub use report::{ErrorKind, ErrorScope, Status, TagError, ValidationResult};
pub use ternary::Ternary;
pub use validator::{IodValidator, ValidationOptions};
