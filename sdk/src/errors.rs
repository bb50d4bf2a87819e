//! Error types and handling
//!
//! This module provides the error types used throughout the Coursive engine.
//! All errors implement the `EngineErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.
//!
//! # Safety of messages
//!
//! Error messages are written to be shown to course authors and operators:
//! they name element and course identifiers but never include API keys or
//! learner-submitted text.

use thiserror::Error;

/// Trait for Coursive error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait EngineErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around by the caller.
    /// Non-recoverable errors typically require fixing the course script or
    /// the deployment.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// Every terminal failure carrying one of these variants leaves the
/// conversation log and run state exactly as they were before the failing
/// operation.
///
/// # Error Categories
///
/// - **Definition**: malformed or missing course/element; nothing was mutated
/// - **NotFound**: run, record or element absent
/// - **Validation**: malformed answer payload; stored progress unchanged
/// - **Generation**: upstream LLM failure; the learner's already-logged turn
///   is preserved and the caller decides on retry/backoff
/// - **Conflict**: a stale snapshot version was observed during one of the
///   two sanctioned in-place updates
/// - **Config / Database / Io**: ambient operational failures
#[derive(Debug, Error)]
pub enum EngineError {
    // Course definition errors
    #[error("Course definition error: {0}")]
    Definition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Answer validation errors
    #[error("Invalid submission: {0}")]
    Validation(String),

    // Upstream LLM errors
    #[error("Generation failed: {0}")]
    Generation(String),

    // Optimistic concurrency errors
    #[error("Snapshot version conflict for record {0}")]
    Conflict(i64),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Definition(_) => "Check the course script for missing or malformed elements",
            Self::NotFound(_) => "The requested run, element or record does not exist",
            Self::Validation(_) => "The submitted answer does not match what this element expects",
            Self::Generation(_) => "The AI tutor is unavailable right now. Try again",
            Self::Conflict(_) => "Another request updated this run at the same time. Try again",
            Self::Unsupported(_) => "This operation is not supported for this course storage",
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Database operation failed. Check the data directory",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Fixing these requires editing the course or the deployment
            Self::Definition(_) | Self::Unsupported(_) | Self::Config(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
