//! Built-in workflow packs compiled into the crate.
//!
//! These are plain pack documents; the registry treats them exactly like
//! installed pack files, so projects can shadow any built-in type with a
//! pack or a project-local override.

/// Pack documents shipped with keel, in load order.
pub const BUILTIN_PACKS: &[&str] = &[
    include_str!("../packs/core.json"),
    include_str!("../packs/planning.json"),
];
