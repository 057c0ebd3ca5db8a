//! Command-line interface definition.

use clap::{Args, Parser, Subcommand};

/// keel -- agent-native issue tracker.
#[derive(Debug, Parser)]
#[command(name = "keel", version, about, max_term_width = 100)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Flags shared by every subcommand.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Emit machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Identity recorded in the event journal.
    #[arg(long, global = true, env = "KEEL_ACTOR", default_value = "cli")]
    pub actor: String,

    /// Log engine internals to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize a .keel/ directory in the current project.
    Init(InitArgs),
    /// Create an issue.
    Create(CreateArgs),
    /// Show one issue in full.
    Show(ShowArgs),
    /// List issues with filters.
    List(ListArgs),
    /// Full-text search over titles and descriptions.
    Search(SearchArgs),
    /// Update fields of an issue.
    Update(UpdateArgs),
    /// Close one or more issues.
    Close(CloseArgs),
    /// Reopen a closed issue.
    Reopen(IdArg),
    /// Permanently delete an issue (maintenance; archive instead).
    Delete(DeleteArgs),
    /// Claim an issue for an assignee.
    Claim(ClaimArgs),
    /// Release a claimed issue.
    Release(IdArg),
    /// Claim the highest-priority ready issue.
    Next(NextArgs),
    /// Manage dependency edges.
    #[command(subcommand)]
    Dep(DepCommands),
    /// Issues ready to work on.
    Ready,
    /// Issues waiting on open blockers.
    Blocked,
    /// Longest chain through the open blocking graph.
    Path,
    /// Manage plans (milestone > phase > step).
    #[command(subcommand)]
    Plan(PlanCommands),
    /// Add a comment to an issue.
    Comment(CommentArgs),
    /// List an issue's comments.
    Comments(IdArg),
    /// Manage labels.
    #[command(subcommand)]
    Label(LabelCommands),
    /// Show the event journal.
    Events(EventsArgs),
    /// Undo the most recent reversible change to an issue.
    Undo(IdArg),
    /// Check an issue against its workflow template.
    Validate(IdArg),
    /// Project statistics.
    Stats,
    /// Flow metrics over a trailing window.
    Flow(FlowArgs),
    /// Move old closed issues to the archived state.
    Archive(ArchiveArgs),
    /// Drop surplus journal entries of archived issues.
    Compact(CompactArgs),
    /// Rebuild the store file.
    Vacuum,
    /// Refresh query-planner statistics.
    Analyze,
    /// Export the store as JSONL.
    Export(ExportArgs),
    /// Import a JSONL stream.
    Import(ImportArgs),
    /// Regenerate the markdown summary.
    Summary(SummaryArgs),
    /// List or inspect workflow types.
    #[command(subcommand)]
    Types(TypesCommands),
    /// List workflow packs.
    Packs,
    /// Print pack guidance for agents.
    Guide(GuideArgs),
    /// Explain a workflow state.
    Explain(ExplainArgs),
    /// Re-scan template packs and overrides.
    Reload,
    /// Generate shell completions.
    Completion(CompletionArgs),
}

#[derive(Debug, Args)]
pub struct IdArg {
    /// Issue id.
    pub id: String,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Issue id prefix for this project.
    #[arg(long, default_value = "kl")]
    pub prefix: String,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Issue title.
    pub title: String,

    /// Issue type (template-driven).
    #[arg(long = "type", value_name = "TYPE")]
    pub issue_type: Option<String>,

    /// Priority 0-4 (0 = critical).
    #[arg(short, long)]
    pub priority: Option<i64>,

    #[arg(long)]
    pub parent: Option<String>,

    #[arg(long)]
    pub assignee: Option<String>,

    #[arg(short, long, default_value = "")]
    pub description: String,

    #[arg(long, default_value = "")]
    pub notes: String,

    /// Label; repeatable.
    #[arg(short, long = "label")]
    pub labels: Vec<String>,

    /// Blocker id; repeatable.
    #[arg(long = "dep")]
    pub deps: Vec<String>,

    /// Extension field as name=value; repeatable.
    #[arg(short, long = "field")]
    pub fields: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    pub id: String,
    /// Also list child issues.
    #[arg(long)]
    pub children: bool,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long = "type")]
    pub issue_type: Option<String>,
    #[arg(short, long)]
    pub priority: Option<i64>,
    #[arg(long)]
    pub assignee: Option<String>,
    #[arg(short, long)]
    pub label: Option<String>,
    #[arg(long)]
    pub parent: Option<String>,
    #[arg(long)]
    pub include_archived: bool,
    #[arg(long, default_value_t = 100)]
    pub limit: i64,
    #[arg(long, default_value_t = 0)]
    pub offset: i64,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    pub query: String,
    #[arg(long, default_value_t = 50)]
    pub limit: i64,
    #[arg(long, default_value_t = 0)]
    pub offset: i64,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,
    #[arg(short, long)]
    pub description: Option<String>,
    #[arg(long)]
    pub notes: Option<String>,
    #[arg(short, long)]
    pub status: Option<String>,
    #[arg(short, long)]
    pub priority: Option<i64>,
    /// New assignee; pass an empty string to unassign.
    #[arg(long)]
    pub assignee: Option<String>,
    #[arg(long, conflicts_with = "no_parent")]
    pub parent: Option<String>,
    /// Clear the parent reference.
    #[arg(long)]
    pub no_parent: bool,
    /// Extension field as name=value; an empty value deletes the field.
    #[arg(short, long = "field")]
    pub fields: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CloseArgs {
    /// One or more issue ids.
    #[arg(required = true)]
    pub ids: Vec<String>,
    #[arg(short, long)]
    pub reason: Option<String>,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    pub id: String,
    /// Confirm the permanent deletion.
    #[arg(long)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct ClaimArgs {
    pub id: String,
    /// Defaults to --actor.
    #[arg(long)]
    pub assignee: Option<String>,
}

#[derive(Debug, Args)]
pub struct NextArgs {
    #[arg(long = "type")]
    pub issue_type: Option<String>,
    #[arg(long)]
    pub min_priority: Option<i64>,
    #[arg(long)]
    pub max_priority: Option<i64>,
    /// Defaults to --actor.
    #[arg(long)]
    pub assignee: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum DepCommands {
    /// Add an edge: FROM depends on TO.
    Add(DepEdgeArgs),
    /// Remove an edge.
    Remove(DepEdgeArgs),
    /// List every edge in the store.
    List,
}

#[derive(Debug, Args)]
pub struct DepEdgeArgs {
    pub from: String,
    pub to: String,
    #[arg(long = "type")]
    pub link_type: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum PlanCommands {
    /// Create a plan from a JSON spec file (or stdin with "-").
    Create(PlanCreateArgs),
    /// Show a plan rooted at a milestone.
    Show(IdArg),
}

#[derive(Debug, Args)]
pub struct PlanCreateArgs {
    /// Path to the plan spec, or "-" for stdin.
    pub spec: String,
}

#[derive(Debug, Args)]
pub struct CommentArgs {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Subcommand)]
pub enum LabelCommands {
    Add(LabelArgs),
    Remove(LabelArgs),
}

#[derive(Debug, Args)]
pub struct LabelArgs {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Args)]
pub struct EventsArgs {
    /// Restrict to one issue.
    #[arg(long)]
    pub issue: Option<String>,
    /// Events with id greater than this cursor.
    #[arg(long)]
    pub since: Option<i64>,
    #[arg(long, default_value_t = 20)]
    pub limit: i64,
}

#[derive(Debug, Args)]
pub struct FlowArgs {
    #[arg(long, default_value_t = 30)]
    pub days: i64,
}

#[derive(Debug, Args)]
pub struct ArchiveArgs {
    /// Archive issues closed at least this many days ago.
    #[arg(long, default_value_t = 30)]
    pub days: i64,
}

#[derive(Debug, Args)]
pub struct CompactArgs {
    /// Journal entries to keep per archived issue.
    #[arg(long, default_value_t = 5)]
    pub keep: i64,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Output path; stdout when omitted.
    #[arg(short, long)]
    pub output: Option<String>,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Input path, or "-" for stdin.
    pub input: String,
    #[arg(long, value_enum, default_value_t = ImportModeArg::Merge)]
    pub mode: ImportModeArg,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ImportModeArg {
    Merge,
    Abort,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    /// Target path; defaults to .keel/context.md.
    #[arg(short, long)]
    pub output: Option<String>,
    /// Print to stdout instead of publishing to a file.
    #[arg(long)]
    pub stdout: bool,
}

#[derive(Debug, Subcommand)]
pub enum TypesCommands {
    /// List exposed issue types.
    List,
    /// Show one type's states, transitions, and fields.
    Show(TypeNameArg),
    /// Show transitions currently available for an issue.
    Transitions(IdArg),
}

#[derive(Debug, Args)]
pub struct TypeNameArg {
    pub name: String,
}

#[derive(Debug, Args)]
pub struct GuideArgs {
    /// Pack name; all enabled packs when omitted.
    pub pack: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExplainArgs {
    pub issue_type: String,
    pub state: String,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    /// Target shell.
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
