//! Workflow pack and type template data types.
//!
//! Packs are data, not code: a pack is a JSON document bundling related type
//! templates, a narrative guide, and inter-type relationship declarations.
//! Nothing outside the built-in pack files may hard-code type names.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use keel_core::enums::{Category, Enforcement, FieldKind};
use keel_core::fields::FieldValue;

/// Status reserved for issues moved out of the active set by
/// `archive_closed`. Templates may not declare it.
pub const ARCHIVED_STATE: &str = "archived";

/// Errors raised while loading or validating pack documents.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("failed to read pack file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse pack {name}: {source}")]
    Parse {
        name: String,
        source: serde_json::Error,
    },

    #[error("pack {pack}, type {type_name}: {reason}")]
    InvalidTemplate {
        pack: String,
        type_name: String,
        reason: String,
    },
}

/// A bundle of type templates with shared narrative guidance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pack {
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub description: String,

    /// Names of packs this pack builds on.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Markdown guidance describing how agents should use these types.
    #[serde(default)]
    pub guide: String,

    /// Declared relationships between types (advisory; used by guides).
    #[serde(default)]
    pub relationships: Vec<Relationship>,

    #[serde(default)]
    pub types: Vec<TypeTemplate>,
}

/// A declared relationship between two types in a pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    /// Relationship kind, e.g. `parent` or `blocks`.
    pub kind: String,
}

/// The workflow template for one issue type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeTemplate {
    pub name: String,

    #[serde(default)]
    pub display_name: String,

    /// Set by the registry when the template is loaded; identifies which
    /// pack (or project override) supplied it.
    #[serde(default)]
    pub pack: String,

    /// Ordered state definitions. Names are unique within a type.
    pub states: Vec<StateDef>,

    pub initial_state: String,

    #[serde(default)]
    pub transitions: Vec<Transition>,

    #[serde(default)]
    pub fields: Vec<FieldSchema>,

    #[serde(default)]
    pub suggested_children: Vec<String>,

    #[serde(default)]
    pub suggested_labels: Vec<String>,
}

/// One workflow state and its universal category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDef {
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub description: String,
}

/// A declared (from, to) edge in the type's state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,

    #[serde(default)]
    pub enforcement: Enforcement,

    /// Fields that must be populated for this transition to pass its gate.
    #[serde(default)]
    pub requires_fields: Vec<String>,
}

/// Schema of one template-declared extension field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,

    #[serde(default)]
    pub kind: FieldKind,

    /// Allowed values when `kind` is `enum`.
    #[serde(default)]
    pub options: Vec<String>,

    #[serde(default)]
    pub default: Option<FieldValue>,

    /// States in which this field must be populated.
    #[serde(default)]
    pub required_at: Vec<String>,

    #[serde(default)]
    pub description: String,
}

impl TypeTemplate {
    /// Looks up a state definition by name.
    pub fn state(&self, name: &str) -> Option<&StateDef> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Returns the first declared state of the given category, if any.
    pub fn first_state_of(&self, category: Category) -> Option<&StateDef> {
        self.states.iter().find(|s| s.category == category)
    }

    /// Looks up a declared transition.
    pub fn transition(&self, from: &str, to: &str) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.to == to)
    }

    /// Validates the template's structural invariants.
    pub fn validate(&self, pack: &str) -> Result<(), PackError> {
        let fail = |reason: String| PackError::InvalidTemplate {
            pack: pack.to_owned(),
            type_name: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(fail("type name is empty".into()));
        }
        if self.states.is_empty() {
            return Err(fail("no states declared".into()));
        }

        let mut seen = BTreeSet::new();
        for state in &self.states {
            if state.name == ARCHIVED_STATE {
                return Err(fail(format!("state name {ARCHIVED_STATE:?} is reserved")));
            }
            if !seen.insert(state.name.as_str()) {
                return Err(fail(format!("duplicate state {:?}", state.name)));
            }
        }

        if self.state(&self.initial_state).is_none() {
            return Err(fail(format!(
                "initial state {:?} is not declared",
                self.initial_state
            )));
        }

        let mut edges = BTreeSet::new();
        for t in &self.transitions {
            if self.state(&t.from).is_none() {
                return Err(fail(format!("transition from undeclared state {:?}", t.from)));
            }
            if self.state(&t.to).is_none() {
                return Err(fail(format!("transition to undeclared state {:?}", t.to)));
            }
            if !edges.insert((t.from.as_str(), t.to.as_str())) {
                return Err(fail(format!(
                    "duplicate transition {:?} -> {:?}",
                    t.from, t.to
                )));
            }
        }

        for field in &self.fields {
            if field.name.is_empty() {
                return Err(fail("field with empty name".into()));
            }
            for state in &field.required_at {
                if self.state(state).is_none() {
                    return Err(fail(format!(
                        "field {:?} required_at undeclared state {:?}",
                        field.name, state
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Pack {
    /// Parses a pack document and validates every template in it.
    pub fn parse(name_hint: &str, data: &str) -> Result<Self, PackError> {
        let mut pack: Self = serde_json::from_str(data).map_err(|source| PackError::Parse {
            name: name_hint.to_owned(),
            source,
        })?;
        for template in &mut pack.types {
            template.pack = pack.name.clone();
            template.validate(&pack.name)?;
        }
        Ok(pack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pack(types_json: &str) -> String {
        format!(
            r#"{{"name": "test", "version": "0.1", "types": [{types_json}]}}"#
        )
    }

    #[test]
    fn parse_minimal() {
        let json = minimal_pack(
            r#"{
                "name": "widget",
                "states": [
                    {"name": "open", "category": "open"},
                    {"name": "done", "category": "done"}
                ],
                "initial_state": "open",
                "transitions": [{"from": "open", "to": "done"}]
            }"#,
        );
        let pack = Pack::parse("test", &json).unwrap();
        assert_eq!(pack.types.len(), 1);
        let t = &pack.types[0];
        assert_eq!(t.pack, "test");
        assert_eq!(t.transition("open", "done").unwrap().enforcement, Enforcement::Soft);
    }

    #[test]
    fn duplicate_state_rejected() {
        let json = minimal_pack(
            r#"{
                "name": "widget",
                "states": [
                    {"name": "open", "category": "open"},
                    {"name": "open", "category": "done"}
                ],
                "initial_state": "open"
            }"#,
        );
        assert!(matches!(
            Pack::parse("test", &json),
            Err(PackError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn missing_initial_state_rejected() {
        let json = minimal_pack(
            r#"{
                "name": "widget",
                "states": [{"name": "open", "category": "open"}],
                "initial_state": "nope"
            }"#,
        );
        assert!(Pack::parse("test", &json).is_err());
    }

    #[test]
    fn dangling_transition_rejected() {
        let json = minimal_pack(
            r#"{
                "name": "widget",
                "states": [{"name": "open", "category": "open"}],
                "initial_state": "open",
                "transitions": [{"from": "open", "to": "gone"}]
            }"#,
        );
        assert!(Pack::parse("test", &json).is_err());
    }

    #[test]
    fn reserved_state_rejected() {
        let json = minimal_pack(
            r#"{
                "name": "widget",
                "states": [
                    {"name": "open", "category": "open"},
                    {"name": "archived", "category": "done"}
                ],
                "initial_state": "open"
            }"#,
        );
        assert!(Pack::parse("test", &json).is_err());
    }

    #[test]
    fn required_at_must_reference_declared_state() {
        let json = minimal_pack(
            r#"{
                "name": "widget",
                "states": [{"name": "open", "category": "open"}],
                "initial_state": "open",
                "fields": [{"name": "x", "required_at": ["missing"]}]
            }"#,
        );
        assert!(Pack::parse("test", &json).is_err());
    }
}
