//! Core domain model for the keel issue tracker.
//!
//! This crate defines the entities shared by every other keel crate: issues,
//! dependency edges, events, comments, labels, the dynamic field bag, and id
//! generation. It has no knowledge of persistence; the storage engine lives
//! in `keel-storage`.

pub mod comment;
pub mod dependency;
pub mod enums;
pub mod fields;
pub mod filter;
pub mod idgen;
pub mod issue;
pub mod validation;

pub use comment::{Comment, Event, Label};
pub use dependency::{Dependency, DependencyRef};
pub use enums::{Category, Enforcement, EventType, FieldKind, LinkType};
pub use fields::{FieldMap, FieldValue};
pub use issue::Issue;
