use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use session_store::Role;
use tierlog::config::{ENV_CONFIG, ENV_SESSIONS_DIR};
use tierlog::CompactionMode;

#[derive(Debug, Parser)]
#[command(name = "tierlog")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect, compact and feed agent session logs", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file
    #[arg(long, global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Directory holding the session logs and sessions.json
    #[arg(long, global = true, env = ENV_SESSIONS_DIR)]
    pub sessions_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List sessions known to the session index
    List,

    /// Show the memory tiers and token count of a session
    Show {
        /// Session id, id prefix or substring
        session: String,
    },

    /// Print the most recent messages
    History {
        session: String,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only show messages of this role
        #[arg(long, value_enum)]
        role: Option<RoleArg>,
    },

    /// Record counts, skipped lines and parent-link health
    Stats { session: String },

    /// Copy the session log into the backup directory
    Backup { session: String },

    /// Summarize old dialogue into tier records
    Compact {
        session: String,

        /// Override the configured compression mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Apply the automatic-compaction gate first
        #[arg(long)]
        check: bool,

        /// Summarizer provider (moonshot, kimicode, mock)
        #[arg(long)]
        provider: Option<String>,
    },

    /// Import every line of an external text file
    Ingest {
        session: String,

        /// Source file (defaults to the configured ingest source)
        #[arg(long)]
        source: Option<PathBuf>,
    },

    /// Delete 1-based line numbers
    DeleteLines {
        session: String,

        #[arg(required = true, num_args = 1..)]
        lines: Vec<usize>,
    },

    /// Delete lines from the start, keeping the short-term tail
    DeleteFirst { session: String, count: usize },

    /// Delete lines from the end
    DeleteLast { session: String, count: usize },

    /// Keep only the first lines
    Truncate { session: String, keep: usize },

    /// Follow a session: refresh, ingest and compact on timers
    Watch {
        session: String,

        /// Enable automatic compaction regardless of the configuration
        #[arg(long)]
        auto: bool,

        /// External source to ingest (defaults to the configured one)
        #[arg(long)]
        ingest: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Summarizer provider (moonshot, kimicode, mock)
        #[arg(long)]
        provider: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    User,
    Assistant,
    ToolResult,
    System,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::User => Role::User,
            RoleArg::Assistant => Role::Assistant,
            RoleArg::ToolResult => Role::ToolResult,
            RoleArg::System => Role::System,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    LongTerm,
    MidTerm,
    ShortTerm,
    Annotation,
}

impl From<ModeArg> for CompactionMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::LongTerm => CompactionMode::LongTerm,
            ModeArg::MidTerm => CompactionMode::MidTerm,
            ModeArg::ShortTerm => CompactionMode::ShortTerm,
            ModeArg::Annotation => CompactionMode::Annotation,
        }
    }
}
