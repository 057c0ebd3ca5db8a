//! Workflow templates for the keel tracker.
//!
//! Types, states, transitions, and field schemas are data loaded from
//! layered "packs" (built-in, installed, project overrides). The
//! [`TemplateRegistry`] merges the layers and answers the engine's
//! validation queries: initial states, state categories, transition gates.

pub mod builtin;
pub mod pack;
pub mod registry;

pub use pack::{FieldSchema, Pack, PackError, StateDef, Transition, TypeTemplate, ARCHIVED_STATE};
pub use registry::{
    fallback_category, PackInfo, TemplateRegistry, TransitionCheck, TransitionOption,
};
