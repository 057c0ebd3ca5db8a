//! Enum types shared across the keel system.
//!
//! Statuses and issue types are deliberately *not* enums: both are data
//! supplied by workflow templates (see `keel-templates`). The enums here are
//! the closed vocabularies of the engine itself: state categories,
//! enforcement levels, journal event types, dependency link types, and field
//! schema kinds.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Macro: defines an enum with known string variants + a Custom(String)
// fallback, serialized as its snake_case string.
// ---------------------------------------------------------------------------
macro_rules! define_string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident, custom_variant = $custom_variant:ident,
        variants: [
            $( ($variant:ident, $str:expr) ),+ $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
            $custom_variant(String),
        }

        impl $name {
            /// Returns the string representation.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $str, )+
                    Self::$custom_variant(s) => s.as_str(),
                }
            }

            /// Returns `true` if this is a built-in (non-custom) variant.
            pub fn is_builtin(&self) -> bool {
                !matches!(self, Self::$custom_variant(_))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $str => Self::$variant, )+
                    other => Self::$custom_variant(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                // Check known variants first to avoid allocation in the common case.
                match s.as_str() {
                    $( $str => Self::$variant, )+
                    _ => Self::$custom_variant(s),
                }
            }
        }
    };
}

// ===========================================================================
// Category
// ===========================================================================

/// Universal state category. Every workflow state maps to exactly one;
/// cross-type queries (ready, blocked, stats) operate on categories rather
/// than literal state names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Open,
    Wip,
    Done,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Wip => "wip",
            Self::Done => "done",
        }
    }

    /// Parses a category name; unknown names are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "wip" => Some(Self::Wip),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ===========================================================================
// Enforcement
// ===========================================================================

/// How a transition gate is enforced when its requirements are not met.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    /// Allow the transition, recording a warning event.
    #[default]
    Soft,
    /// Reject the transition.
    Hard,
}

impl Enforcement {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for Enforcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ===========================================================================
// EventType
// ===========================================================================

define_string_enum! {
    /// The kind of an append-only journal entry.
    ///
    /// Description and notes edits are intentionally unjournalled; everything
    /// else that mutates an issue records exactly one event.
    EventType, default = Created, custom_variant = Custom,
    variants: [
        (Created, "created"),
        (TitleChanged, "title_changed"),
        (StatusChanged, "status_changed"),
        (PriorityChanged, "priority_changed"),
        (AssigneeChanged, "assignee_changed"),
        (ParentChanged, "parent_changed"),
        (FieldsChanged, "fields_changed"),
        (DependencyAdded, "dependency_added"),
        (DependencyRemoved, "dependency_removed"),
        (LabelAdded, "label_added"),
        (LabelRemoved, "label_removed"),
        (CommentAdded, "comment_added"),
        (Claimed, "claimed"),
        (Released, "released"),
        (Archived, "archived"),
        (TransitionWarning, "transition_warning"),
    ]
}

impl EventType {
    /// Returns `true` if `undo_last` can reverse an event of this type.
    ///
    /// Only scalar field changes are reversible; structural events (created,
    /// archived, labels, dependencies, comments, claims) are skipped by
    /// policy.
    pub fn is_reversible(&self) -> bool {
        matches!(
            self,
            Self::TitleChanged
                | Self::StatusChanged
                | Self::PriorityChanged
                | Self::AssigneeChanged
                | Self::ParentChanged
                | Self::FieldsChanged
        )
    }
}

// ===========================================================================
// LinkType
// ===========================================================================

define_string_enum! {
    /// The type of a dependency edge. Cycle detection is scoped per link
    /// type; only `blocks` edges participate in ready/blocked computations.
    LinkType, default = Blocks, custom_variant = Custom,
    variants: [
        (Blocks, "blocks"),
        (Relates, "relates"),
        (Duplicates, "duplicates"),
    ]
}

// ===========================================================================
// FieldKind
// ===========================================================================

/// Value kind declared by a template field schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Enum,
    Number,
    Date,
    List,
    Boolean,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Enum => "enum",
            Self::Number => "number",
            Self::Date => "date",
            Self::List => "list",
            Self::Boolean => "boolean",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_roundtrip() {
        let et = EventType::from("status_changed");
        assert_eq!(et, EventType::StatusChanged);
        assert_eq!(et.as_str(), "status_changed");
    }

    #[test]
    fn event_type_custom_fallback() {
        let et = EventType::from("sync_marker");
        assert!(!et.is_builtin());
        assert_eq!(et.as_str(), "sync_marker");
    }

    #[test]
    fn reversible_policy() {
        assert!(EventType::TitleChanged.is_reversible());
        assert!(EventType::FieldsChanged.is_reversible());
        assert!(!EventType::Created.is_reversible());
        assert!(!EventType::LabelAdded.is_reversible());
        assert!(!EventType::DependencyAdded.is_reversible());
        assert!(!EventType::Archived.is_reversible());
    }

    #[test]
    fn link_type_default_is_blocks() {
        assert_eq!(LinkType::default(), LinkType::Blocks);
        assert_eq!(LinkType::from("blocks"), LinkType::Blocks);
    }

    #[test]
    fn category_parse() {
        assert_eq!(Category::parse("wip"), Some(Category::Wip));
        assert_eq!(Category::parse("nope"), None);
    }

    #[test]
    fn enums_serialize_as_strings() {
        assert_eq!(
            serde_json::to_string(&EventType::DependencyAdded).unwrap(),
            "\"dependency_added\""
        );
        assert_eq!(serde_json::to_string(&Category::Done).unwrap(), "\"done\"");
        assert_eq!(
            serde_json::to_string(&Enforcement::Hard).unwrap(),
            "\"hard\""
        );
    }
}
