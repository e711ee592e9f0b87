//! Validation rules for stored records and inbound payloads.
//!
//! Every check records its violation instead of returning early, so a caller
//! always sees the complete list of problems for a value.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

pub mod generation;
pub mod pagination;
pub mod records;

pub use generation::{CreateGenerationInput, Resolution, ValidGeneration, VideoSettings};
pub use pagination::Pagination;

/// A single violated rule, tagged with the dotted path of the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub rule: &'static str,
    pub message: String,
}

/// All violations found while validating one value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("validation failed on {} field(s)", .fields.len())]
pub struct ValidationErrors {
    pub fields: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<String>, rule: &'static str, message: impl Into<String>) {
        self.fields.push(FieldError {
            path: path.into(),
            rule,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when at least one violation targets `path`.
    pub fn has(&self, path: &str) -> bool {
        self.fields.iter().any(|f| f.path == path)
    }

    pub fn for_path<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a FieldError> + 'a {
        self.fields.iter().filter(move |f| f.path == path)
    }

    /// `Ok(value)` when nothing was recorded, otherwise `Err(self)`.
    pub fn finish<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

/// Shape validation for a record that already has a Rust type.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors>;
}

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub(crate) fn check_email(errs: &mut ValidationErrors, path: &str, value: &str) {
    if !is_valid_email(value) {
        errs.add(path, "email", "Invalid email");
    }
}

/// Absolute URL check; relative references are rejected.
pub(crate) fn check_url(errs: &mut ValidationErrors, path: &str, value: &str) {
    if url::Url::parse(value).is_err() {
        errs.add(path, "url", "Invalid url");
    }
}

/// Length in characters, not bytes.
pub(crate) fn check_len(
    errs: &mut ValidationErrors,
    path: &str,
    value: &str,
    min: usize,
    max: usize,
) {
    let len = value.chars().count();
    if len < min {
        errs.add(
            path,
            "min_length",
            format!("Must contain at least {min} character(s)"),
        );
    } else if len > max {
        errs.add(
            path,
            "max_length",
            format!("Must contain at most {max} character(s)"),
        );
    }
}

pub(crate) fn check_range(errs: &mut ValidationErrors, path: &str, value: i64, min: i64, max: i64) {
    if value < min {
        errs.add(path, "min", format!("Must be greater than or equal to {min}"));
    } else if value > max {
        errs.add(path, "max", format!("Must be less than or equal to {max}"));
    }
}
