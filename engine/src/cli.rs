//! CLI interface for Coursive
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for the course engine binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Coursive Course Engine
///
/// A course progression engine: branching lessons, quizzes, AI dialogs and
/// deferred continuations, backed by an append-only conversation log.
#[derive(Parser, Debug)]
#[command(name = "coursive")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the waiting-queue scheduler until interrupted
    Serve,

    /// Lint a course script: traversal, targets, durations, answer flags
    Validate {
        /// Path to the course YAML file
        path: PathBuf,
    },

    /// Print the outline of a cataloged course
    Show {
        /// Course id from the catalog
        course_id: String,
    },
}
