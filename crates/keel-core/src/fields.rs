//! The dynamic per-issue field bag.
//!
//! Workflow templates can declare arbitrary extension fields (text, enums,
//! numbers, dates, lists, booleans). Issues carry them as a JSON object with
//! shallow-merge update semantics: patch keys replace matching keys, absent
//! keys are preserved, and an empty-string scalar deletes its key. Nested
//! maps are replaced wholesale, never merged recursively.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single field value. Untagged so the bag round-trips as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, FieldValue>),
}

/// The field bag attached to every issue.
pub type FieldMap = BTreeMap<String, FieldValue>;

impl FieldValue {
    /// Returns `true` if this value counts as "empty" for required-field
    /// gates: empty string, empty list, or empty map. Numbers and booleans
    /// are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::List(v) => v.is_empty(),
            Self::Map(m) => m.is_empty(),
            Self::Bool(_) | Self::Number(_) => false,
        }
    }

    /// Returns the text content if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric content if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Applies a shallow merge of `patch` into `base`.
///
/// Keys present in `patch` replace keys in `base`; an empty-string text
/// value deletes its key. Keys absent from the patch are untouched.
pub fn merge_fields(base: &mut FieldMap, patch: &FieldMap) {
    for (key, value) in patch {
        if matches!(value, FieldValue::Text(s) if s.is_empty()) {
            base.remove(key);
        } else {
            base.insert(key.clone(), value.clone());
        }
    }
}

/// Converts a raw JSON object into a patch map, dropping `null` entries
/// (null means "leave this key alone", which shallow merge expresses by
/// omission).
///
/// Returns `None` when the value is not a JSON object or contains a value
/// that does not fit the field model (e.g. a list of non-strings).
pub fn patch_from_json(value: &serde_json::Value) -> Option<FieldMap> {
    let obj = value.as_object()?;
    let mut patch = FieldMap::new();
    for (key, val) in obj {
        if val.is_null() {
            continue;
        }
        patch.insert(key.clone(), serde_json::from_value(val.clone()).ok()?);
    }
    Some(patch)
}
