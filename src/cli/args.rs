use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meetbridge")]
#[command(about = "Turn meeting transcripts into human-approved board tasks", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the webhook server and the scheduled approval poller (default)
    Serve,
    /// Process a meeting now, unless it was already processed
    Process(ProcessCliArgs),
    /// Resolve approvals and commit approved tasks
    Poll(PollCliArgs),
    /// Inspect approval sessions
    Sessions(SessionsCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct ProcessCliArgs {
    /// Meeting (transcript) identifier
    pub meeting_id: String,
    /// Meeting title; defaults to the transcript's title
    #[arg(long)]
    pub title: Option<String>,
    /// Read the transcript from this file instead of fetching it
    #[arg(long)]
    pub transcript_file: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct PollCliArgs {
    /// Session to poll (default: the latest session)
    #[arg(short, long, conflicts_with = "all")]
    pub session: Option<String>,
    /// Poll every session that still has uncommitted tasks
    #[arg(long)]
    pub all: bool,
}

#[derive(ClapArgs, Debug)]
pub struct SessionsCliArgs {
    #[command(subcommand)]
    pub command: SessionsCommand,
}

#[derive(Subcommand, Debug)]
pub enum SessionsCommand {
    /// List sessions, newest first
    List {
        /// Maximum number of results to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show one session with its tasks
    Show {
        session_id: String,
    },
    /// Show the most recent session
    Latest,
}
