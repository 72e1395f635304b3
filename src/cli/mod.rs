//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for list and report commands.
#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table (default)
    #[default]
    Table,
    /// JSON (same as --json)
    Json,
}

pub mod commands;

/// hubsync - push a local issue store to GitHub or ClickUp
#[derive(Parser, Debug)]
#[command(name = "hubsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.hubsync/data/hubsync.db)
    #[arg(long, global = true, env = "HUBSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, alias = "robot", global = true)]
    pub json: bool,

    /// Output format (table, json)
    #[arg(long, value_enum, global = true, default_value_t)]
    pub format: OutputFormat,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the local issue database
    Init {
        /// Recreate the database file even if it exists
        #[arg(long)]
        force: bool,
    },

    /// Print version information
    Version,

    /// Local issue management
    Issue {
        #[command(subcommand)]
        command: IssueCommands,
    },

    /// Push issues to the configured remote service
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

// ============================================================================
// Issue Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum IssueCommands {
    /// Create a new issue
    Create(IssueCreateArgs),

    /// List issues
    List(IssueListArgs),

    /// Show issue details
    Show {
        /// Issue ID
        id: String,
    },

    /// Update an issue
    Update(IssueUpdateArgs),

    /// Manage blocking dependencies
    Dep {
        #[command(subcommand)]
        command: IssueDepCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum IssueDepCommands {
    /// Record that `blocker` blocks `id`
    Add {
        /// Blocked issue ID
        id: String,

        /// ID of the issue that blocks it
        #[arg(long)]
        blocked_by: String,
    },

    /// Remove a blocking dependency
    Remove {
        /// Blocked issue ID
        id: String,

        /// ID of the issue that no longer blocks it
        #[arg(long)]
        blocked_by: String,
    },
}

#[derive(Args, Debug)]
pub struct IssueCreateArgs {
    /// Issue title
    pub title: String,

    /// Issue body (markdown)
    #[arg(short, long)]
    pub body: Option<String>,

    /// Issue type (task, bug, feature, epic, chore, milestone)
    #[arg(short = 't', long, default_value = "task")]
    pub issue_type: String,

    /// Initial status
    #[arg(short, long, default_value = "open")]
    pub status: String,

    /// Parent issue ID
    #[arg(long)]
    pub parent: Option<String>,

    /// Tags (-l bug -l security or -l bug,security)
    #[arg(short = 'l', long = "tag", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Issues that block this one
    #[arg(long, value_delimiter = ',')]
    pub blocked_by: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct IssueListArgs {
    /// Filter by status (backlog, open, ready, in_progress, blocked, closed, deferred, all)
    #[arg(short, long)]
    pub status: Option<String>,

    /// Filter by type
    #[arg(short = 't', long)]
    pub issue_type: Option<String>,

    /// Include closed issues
    #[arg(long)]
    pub all: bool,

    /// Maximum issues to return
    #[arg(long)]
    pub limit: Option<u32>,
}

#[derive(Args, Debug)]
pub struct IssueUpdateArgs {
    /// Issue ID
    pub id: String,

    /// New title
    #[arg(long)]
    pub title: Option<String>,

    /// New body
    #[arg(short, long)]
    pub body: Option<String>,

    /// New status
    #[arg(short, long)]
    pub status: Option<String>,

    /// New type
    #[arg(short = 't', long)]
    pub issue_type: Option<String>,

    /// New parent issue ID
    #[arg(long, conflicts_with = "no_parent")]
    pub parent: Option<String>,

    /// Remove the parent
    #[arg(long)]
    pub no_parent: bool,

    /// Tags to add
    #[arg(long = "add-tag", value_delimiter = ',')]
    pub add_tags: Vec<String>,

    /// Tags to remove
    #[arg(long = "remove-tag", value_delimiter = ',')]
    pub remove_tags: Vec<String>,
}

// ============================================================================
// Sync Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Push local issues to the remote service
    Push(SyncPushArgs),

    /// Show each local issue with its sync record
    Status,

    /// Link a local issue to an existing remote item
    Link {
        /// Local issue ID
        id: String,

        /// Remote reference (`12`, `#12`, an issue URL, or a ClickUp task ID)
        remote: String,
    },

    /// Forget the remote counterpart of a local issue
    Unlink {
        /// Local issue ID
        id: String,
    },

    /// Verify credentials, target access and recorded identifiers
    Check,
}

#[derive(Args, Debug, Default)]
pub struct SyncPushArgs {
    /// Issue IDs to push (default: every issue)
    pub ids: Vec<String>,

    /// Report what would change without touching the remote
    #[arg(long)]
    pub dry_run: bool,

    /// Fetch and diff even issues not edited since their last sync
    #[arg(long)]
    pub force: bool,

    /// Skip parent and blocking relationship reconciliation
    #[arg(long)]
    pub no_relationships: bool,

    /// Exit non-zero when any issue failed
    #[arg(long)]
    pub strict: bool,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Set a value in the config file
    Set {
        /// Dotted key, e.g. `github.repo` or `retry.max_attempts`
        key: String,

        /// New value
        value: String,
    },
}
