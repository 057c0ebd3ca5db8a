//! The keel coordination and persistence engine.
//!
//! One [`Store`] instance owns one connection to one SQLite file and
//! composes the tracker's responsibility areas: schema migrations, the
//! issue engine, the planning engine, the append-only event journal,
//! analytics, and JSONL export/import. Collaborator surfaces (CLI, tool
//! servers, dashboards) call the public operations here and never touch
//! the file directly.

mod categories;
pub mod comments;
pub mod dependencies;
pub mod error;
pub mod events;
pub mod issues;
pub mod jsonl;
pub mod labels;
pub mod meta;
pub mod planning;
pub mod schema;
pub mod store;
pub mod types;

pub use error::{EngineError, Result, StructuredError};
pub use jsonl::Record;
pub use store::Store;
pub use types::{
    BatchFailure, BatchOutcome, CloseOutcome, CriticalPath, FlowMetrics, ImportMode,
    ImportReport, IssueUpdates, NewIssue, PhaseSpec, PhaseView, PlanNode, PlanSpec, PlanView,
    Stats, StepSpec, TypeFlow, UndoOutcome, ValidationReport,
};
