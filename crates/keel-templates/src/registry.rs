//! The template registry: loads workflow packs in layers and answers
//! transition-validation queries for the engine.
//!
//! Layering (last wins per type name):
//! 1. built-in packs compiled into this crate,
//! 2. pack files installed under `{keel_dir}/packs/`,
//! 3. project-local single-type overrides under `{keel_dir}/templates/`.
//!
//! The `enabled_packs` config filter restricts which packs from layers 1-2
//! contribute types; project overrides always apply.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use keel_config::ProjectConfig;
use keel_core::enums::{Category, Enforcement};
use keel_core::fields::FieldMap;

use crate::builtin;
use crate::pack::{Pack, PackError, TypeTemplate, ARCHIVED_STATE};

/// Summary of one loaded pack, for `list_packs`.
#[derive(Debug, Clone, Serialize)]
pub struct PackInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// `builtin` or `installed`.
    pub source: String,
    pub enabled: bool,
    pub types: Vec<String>,
    #[serde(skip)]
    pub guide: String,
}

/// Result of validating a single status transition.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionCheck {
    pub allowed: bool,
    pub enforcement: Enforcement,
    pub missing_fields: Vec<String>,
    pub warnings: Vec<String>,
}

impl TransitionCheck {
    fn pass() -> Self {
        Self {
            allowed: true,
            enforcement: Enforcement::Soft,
            missing_fields: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// One currently-valid transition out of a state, with its gate status.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOption {
    pub to: String,
    pub enforcement: Enforcement,
    pub requires_fields: Vec<String>,
    /// Gate fields currently missing or empty.
    pub missing_fields: Vec<String>,
}

/// Loaded, merged view over all template layers.
#[derive(Debug)]
pub struct TemplateRegistry {
    types: BTreeMap<String, TypeTemplate>,
    packs: Vec<PackInfo>,
    enabled_packs: Vec<String>,
    default_states: Vec<String>,
    packs_dir: Option<PathBuf>,
    templates_dir: Option<PathBuf>,
}

impl TemplateRegistry {
    /// Loads all three layers for a project.
    ///
    /// `keel_dir` is the project's `.keel/` directory; pass `None` for a
    /// registry with built-in packs only (tests, in-memory stores).
    pub fn load(config: &ProjectConfig, keel_dir: Option<&Path>) -> Result<Self, PackError> {
        let mut registry = Self {
            types: BTreeMap::new(),
            packs: Vec::new(),
            enabled_packs: config.enabled_packs.clone(),
            default_states: config.workflow_states.clone(),
            packs_dir: keel_dir.map(|d| d.join(keel_config::keel_dir::PACKS_DIR_NAME)),
            templates_dir: keel_dir.map(|d| d.join(keel_config::keel_dir::TEMPLATES_DIR_NAME)),
        };
        registry.reload()?;
        Ok(registry)
    }

    /// Re-scans all layers without touching the store.
    pub fn reload(&mut self) -> Result<(), PackError> {
        self.types.clear();
        self.packs.clear();

        // Layer 1: built-in packs.
        for data in builtin::BUILTIN_PACKS {
            let pack = Pack::parse("builtin", data)?;
            self.absorb_pack(pack, "builtin");
        }

        // Layer 2: installed pack files.
        if let Some(dir) = self.packs_dir.clone() {
            for path in json_files(&dir) {
                let data = std::fs::read_to_string(&path).map_err(|source| PackError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                let pack = Pack::parse(&path.display().to_string(), &data)?;
                self.absorb_pack(pack, "installed");
            }
        }

        // Layer 3: project-local type overrides (always enabled).
        if let Some(dir) = self.templates_dir.clone() {
            for path in json_files(&dir) {
                let data = std::fs::read_to_string(&path).map_err(|source| PackError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                let name_hint = path.display().to_string();
                let mut template: TypeTemplate =
                    serde_json::from_str(&data).map_err(|source| PackError::Parse {
                        name: name_hint.clone(),
                        source,
                    })?;
                template.pack = "project".to_owned();
                template.validate("project")?;
                debug!(type_name = %template.name, "project template override");
                self.types.insert(template.name.clone(), template);
            }
        }

        debug!(
            types = self.types.len(),
            packs = self.packs.len(),
            "template registry loaded"
        );
        Ok(())
    }

    fn absorb_pack(&mut self, pack: Pack, source: &str) {
        let enabled = self.enabled_packs.iter().any(|p| p == &pack.name);
        for dep in &pack.depends_on {
            if !self.packs.iter().any(|p| &p.name == dep) {
                warn!(pack = %pack.name, missing = %dep, "pack dependency not loaded first");
            }
        }
        self.packs.push(PackInfo {
            name: pack.name.clone(),
            version: pack.version.clone(),
            description: pack.description.clone(),
            source: source.to_owned(),
            enabled,
            types: pack.types.iter().map(|t| t.name.clone()).collect(),
            guide: pack.guide.clone(),
        });
        if enabled {
            for template in pack.types {
                self.types.insert(template.name.clone(), template);
            }
        }
    }

    // -- Lookup --------------------------------------------------------------

    /// Returns the template for a type, if one is exposed.
    pub fn get_type(&self, name: &str) -> Option<&TypeTemplate> {
        self.types.get(name)
    }

    /// All exposed type templates, sorted by name.
    pub fn list_types(&self) -> Vec<&TypeTemplate> {
        self.types.values().collect()
    }

    /// All discovered packs (enabled or not).
    pub fn list_packs(&self) -> &[PackInfo] {
        &self.packs
    }

    /// The state a newly created issue of this type starts in.
    pub fn initial_state(&self, issue_type: &str) -> String {
        match self.types.get(issue_type) {
            Some(t) => t.initial_state.clone(),
            None => self
                .default_states
                .first()
                .cloned()
                .unwrap_or_else(|| "open".to_owned()),
        }
    }

    /// Maps a (type, state) pair to its universal category.
    ///
    /// `archived` is globally terminal. Template-less types fall back to a
    /// well-known-name heuristic over the configured default state list.
    pub fn category(&self, issue_type: &str, state: &str) -> Category {
        if state == ARCHIVED_STATE {
            return Category::Done;
        }
        if let Some(template) = self.types.get(issue_type) {
            if let Some(def) = template.state(state) {
                return def.category;
            }
        }
        fallback_category(state)
    }

    /// Returns `true` if `state` is a legal status for the type: declared by
    /// its template, or (for template-less types) present in the configured
    /// default state list. `archived` is always legal.
    pub fn is_known_state(&self, issue_type: &str, state: &str) -> bool {
        if state == ARCHIVED_STATE {
            return true;
        }
        match self.types.get(issue_type) {
            Some(template) => template.state(state).is_some(),
            None => self.default_states.iter().any(|s| s == state),
        }
    }

    /// The first `done`-category state for a type, used by `close`.
    pub fn first_done_state(&self, issue_type: &str) -> String {
        if let Some(template) = self.types.get(issue_type) {
            if let Some(def) = template.first_state_of(Category::Done) {
                return def.name.clone();
            }
        }
        self.default_states
            .iter()
            .find(|s| fallback_category(s) == Category::Done)
            .cloned()
            .unwrap_or_else(|| "closed".to_owned())
    }

    /// Every known `(type, state, category)` triple, used to parameterize
    /// SQL category joins. Types without templates are not listed; queries
    /// fall back to the well-known-name heuristic for them.
    pub fn category_triples(&self) -> Vec<(String, String, Category)> {
        let mut out = Vec::new();
        for template in self.types.values() {
            for state in &template.states {
                out.push((template.name.clone(), state.name.clone(), state.category));
            }
        }
        out
    }

    // -- Transition validation ----------------------------------------------

    /// Validates a status change under the type's template.
    pub fn validate_transition(
        &self,
        issue_type: &str,
        from: &str,
        to: &str,
        fields: &FieldMap,
    ) -> TransitionCheck {
        let Some(template) = self.types.get(issue_type) else {
            // No template: every transition passes (soft fallback).
            return TransitionCheck::pass();
        };

        if from == to {
            return TransitionCheck::pass();
        }

        let Some(transition) = template.transition(from, to) else {
            // Declared state machine, undeclared edge: hard reject.
            return TransitionCheck {
                allowed: false,
                enforcement: Enforcement::Hard,
                missing_fields: Vec::new(),
                warnings: vec![format!(
                    "transition {from:?} -> {to:?} is not declared for type {issue_type:?}"
                )],
            };
        };

        let missing = self.missing_gate_fields(template, transition, to, fields);
        if missing.is_empty() {
            return TransitionCheck {
                allowed: true,
                enforcement: transition.enforcement,
                missing_fields: Vec::new(),
                warnings: Vec::new(),
            };
        }

        match transition.enforcement {
            Enforcement::Hard => TransitionCheck {
                allowed: false,
                enforcement: Enforcement::Hard,
                warnings: vec![format!(
                    "transition to {to:?} requires fields: {}",
                    missing.join(", ")
                )],
                missing_fields: missing,
            },
            Enforcement::Soft => TransitionCheck {
                allowed: true,
                enforcement: Enforcement::Soft,
                warnings: missing
                    .iter()
                    .map(|f| format!("field {f:?} should be set before entering {to:?}"))
                    .collect(),
                missing_fields: missing,
            },
        }
    }

    /// Lists transitions available from `from`, with gate status computed
    /// against the given fields.
    pub fn valid_transitions(
        &self,
        issue_type: &str,
        from: &str,
        fields: &FieldMap,
    ) -> Vec<TransitionOption> {
        let Some(template) = self.types.get(issue_type) else {
            return Vec::new();
        };
        template
            .transitions
            .iter()
            .filter(|t| t.from == from)
            .map(|t| TransitionOption {
                to: t.to.clone(),
                enforcement: t.enforcement,
                requires_fields: t.requires_fields.clone(),
                missing_fields: self.missing_gate_fields(template, t, &t.to, fields),
            })
            .collect()
    }

    /// Fields required when an issue *enters* `state` (its `required_at`
    /// set), that are missing or empty. Used with hard enforcement at
    /// creation time for the initial state.
    pub fn missing_required_at(
        &self,
        issue_type: &str,
        state: &str,
        fields: &FieldMap,
    ) -> Vec<String> {
        let Some(template) = self.types.get(issue_type) else {
            return Vec::new();
        };
        template
            .fields
            .iter()
            .filter(|f| f.required_at.iter().any(|s| s == state))
            .filter(|f| fields.get(&f.name).is_none_or(|v| v.is_empty()))
            .map(|f| f.name.clone())
            .collect()
    }

    fn missing_gate_fields(
        &self,
        template: &TypeTemplate,
        transition: &crate::pack::Transition,
        to: &str,
        fields: &FieldMap,
    ) -> Vec<String> {
        let mut missing: Vec<String> = transition
            .requires_fields
            .iter()
            .filter(|name| fields.get(*name).is_none_or(|v| v.is_empty()))
            .cloned()
            .collect();

        for field in &template.fields {
            if field.required_at.iter().any(|s| s == to)
                && fields.get(&field.name).is_none_or(|v| v.is_empty())
                && !missing.contains(&field.name)
            {
                missing.push(field.name.clone());
            }
        }

        missing
    }

    // -- Guides --------------------------------------------------------------

    /// Returns the narrative guide of the named pack, or the concatenated
    /// guides of all enabled packs when `pack` is `None`.
    pub fn workflow_guide(&self, pack: Option<&str>) -> Option<String> {
        match pack {
            Some(name) => self
                .packs
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.guide.clone()),
            None => {
                let guides: Vec<&str> = self
                    .packs
                    .iter()
                    .filter(|p| p.enabled && !p.guide.is_empty())
                    .map(|p| p.guide.as_str())
                    .collect();
                if guides.is_empty() {
                    None
                } else {
                    Some(guides.join("\n\n"))
                }
            }
        }
    }

    /// Human-readable description of one state of one type.
    pub fn explain_state(&self, issue_type: &str, state: &str) -> Option<String> {
        let template = self.types.get(issue_type)?;
        let def = template.state(state)?;
        let outgoing: Vec<String> = template
            .transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| {
                if t.requires_fields.is_empty() {
                    t.to.clone()
                } else {
                    format!("{} (requires {})", t.to, t.requires_fields.join(", "))
                }
            })
            .collect();

        let mut text = format!(
            "{}.{} - category {}",
            template.name, def.name, def.category
        );
        if !def.description.is_empty() {
            text.push_str(&format!(": {}", def.description));
        }
        if outgoing.is_empty() {
            text.push_str("\nTerminal state; no outgoing transitions.");
        } else {
            text.push_str(&format!("\nTransitions to: {}", outgoing.join(", ")));
        }
        Some(text)
    }
}

/// Category heuristic for states not declared by any template.
pub fn fallback_category(state: &str) -> Category {
    match state {
        "closed" | "done" | ARCHIVED_STATE => Category::Done,
        "in_progress" | "wip" => Category::Wip,
        _ => Category::Open,
    }
}

fn json_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::fields::FieldValue;
    use pretty_assertions::assert_eq;

    fn registry() -> TemplateRegistry {
        TemplateRegistry::load(&ProjectConfig::default(), None).unwrap()
    }

    #[test]
    fn builtin_types_loaded() {
        let reg = registry();
        assert!(reg.get_type("task").is_some());
        assert!(reg.get_type("bug").is_some());
        assert!(reg.get_type("milestone").is_some());
        assert_eq!(reg.initial_state("bug"), "open");
    }

    #[test]
    fn disabled_pack_hides_types() {
        let mut config = ProjectConfig::default();
        config.enabled_packs = vec!["core".into()];
        let reg = TemplateRegistry::load(&config, None).unwrap();
        assert!(reg.get_type("task").is_some());
        assert!(reg.get_type("milestone").is_none());
        // The pack is still listed, just disabled.
        assert!(reg
            .list_packs()
            .iter()
            .any(|p| p.name == "planning" && !p.enabled));
    }

    #[test]
    fn categories() {
        let reg = registry();
        assert_eq!(reg.category("bug", "verifying"), Category::Wip);
        assert_eq!(reg.category("bug", "closed"), Category::Done);
        // Reserved terminal state, any type.
        assert_eq!(reg.category("task", "archived"), Category::Done);
        // Unknown type falls back to the heuristic.
        assert_eq!(reg.category("mystery", "in_progress"), Category::Wip);
        assert_eq!(reg.category("mystery", "triage"), Category::Open);
    }

    #[test]
    fn no_template_passes_everything() {
        let reg = registry();
        let check = reg.validate_transition("mystery", "triage", "anything", &FieldMap::new());
        assert!(check.allowed);
        assert!(check.missing_fields.is_empty());
    }

    #[test]
    fn undeclared_edge_hard_rejected() {
        let reg = registry();
        let check = reg.validate_transition("bug", "open", "verifying", &FieldMap::new());
        assert!(!check.allowed);
        assert_eq!(check.enforcement, Enforcement::Hard);
    }

    #[test]
    fn hard_gate_blocks_until_field_set() {
        let reg = registry();
        let check = reg.validate_transition("bug", "verifying", "closed", &FieldMap::new());
        assert!(!check.allowed);
        assert_eq!(check.missing_fields, vec!["fix_verification".to_owned()]);

        let mut fields = FieldMap::new();
        fields.insert(
            "fix_verification".into(),
            FieldValue::Text("regression test added".into()),
        );
        let check = reg.validate_transition("bug", "verifying", "closed", &fields);
        assert!(check.allowed);
        assert!(check.missing_fields.is_empty());
    }

    #[test]
    fn soft_gate_warns_but_allows() {
        let reg = registry();
        let check = reg.validate_transition("feature", "in_progress", "review", &FieldMap::new());
        assert!(check.allowed);
        assert_eq!(check.enforcement, Enforcement::Soft);
        assert_eq!(
            check.missing_fields,
            vec!["acceptance_criteria".to_owned()]
        );
        assert!(!check.warnings.is_empty());
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let reg = registry();
        let mut fields = FieldMap::new();
        fields.insert("fix_verification".into(), FieldValue::Text(String::new()));
        let check = reg.validate_transition("bug", "verifying", "closed", &fields);
        assert!(!check.allowed);
    }

    #[test]
    fn valid_transitions_from_state() {
        let reg = registry();
        let options = reg.valid_transitions("bug", "verifying", &FieldMap::new());
        let targets: Vec<&str> = options.iter().map(|o| o.to.as_str()).collect();
        assert_eq!(targets, vec!["in_progress", "closed"]);
        let closed = options.iter().find(|o| o.to == "closed").unwrap();
        assert_eq!(closed.missing_fields, vec!["fix_verification".to_owned()]);
    }

    #[test]
    fn project_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let keel = keel_config::keel_dir::ensure_keel_dir(dir.path()).unwrap();
        std::fs::write(
            keel.join("templates/task.json"),
            r#"{
                "name": "task",
                "states": [
                    {"name": "todo", "category": "open"},
                    {"name": "doing", "category": "wip"},
                    {"name": "done", "category": "done"}
                ],
                "initial_state": "todo",
                "transitions": [
                    {"from": "todo", "to": "doing"},
                    {"from": "doing", "to": "done"}
                ]
            }"#,
        )
        .unwrap();

        let reg = TemplateRegistry::load(&ProjectConfig::default(), Some(&keel)).unwrap();
        assert_eq!(reg.initial_state("task"), "todo");
        assert_eq!(reg.category("task", "doing"), Category::Wip);
        assert_eq!(reg.get_type("task").unwrap().pack, "project");
    }

    #[test]
    fn installed_pack_layer() {
        let dir = tempfile::tempdir().unwrap();
        let keel = keel_config::keel_dir::ensure_keel_dir(dir.path()).unwrap();
        std::fs::write(
            keel.join("packs/ops.json"),
            r#"{
                "name": "ops",
                "version": "0.1.0",
                "types": [{
                    "name": "incident",
                    "states": [
                        {"name": "open", "category": "open"},
                        {"name": "mitigated", "category": "wip"},
                        {"name": "resolved", "category": "done"}
                    ],
                    "initial_state": "open",
                    "transitions": [
                        {"from": "open", "to": "mitigated"},
                        {"from": "mitigated", "to": "resolved"}
                    ]
                }]
            }"#,
        )
        .unwrap();

        let mut config = ProjectConfig::default();
        config.enabled_packs.push("ops".into());
        let reg = TemplateRegistry::load(&config, Some(&keel)).unwrap();
        assert!(reg.get_type("incident").is_some());
        assert_eq!(reg.first_done_state("incident"), "resolved");
    }

    #[test]
    fn explain_and_guide() {
        let reg = registry();
        let text = reg.explain_state("bug", "verifying").unwrap();
        assert!(text.contains("category wip"));
        assert!(text.contains("closed"));
        assert!(reg.workflow_guide(Some("core")).is_some());
        assert!(reg.workflow_guide(None).unwrap().contains("Planning"));
    }

    #[test]
    fn category_triples_cover_all_states() {
        let reg = registry();
        let triples = reg.category_triples();
        assert!(triples
            .iter()
            .any(|(t, s, c)| t == "bug" && s == "verifying" && *c == Category::Wip));
        // No template ever declares the reserved archived state.
        assert!(!triples.iter().any(|(_, s, _)| s == ARCHIVED_STATE));
    }
}
