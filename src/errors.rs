//! Error types for the courtnotes application.
//!
//! This module defines the error categories that can surface from the note
//! vault, the collaborators, and the scheduler. Recoverable conditions
//! (collaborator outages, empty lookups, remote sync failures) are handled
//! where they occur and never reach this type.

use std::{io, path::PathBuf};

use chrono::NaiveDate;
use thiserror::Error;

use crate::Scene;

/// The main error type for the courtnotes application.
#[derive(Error, Debug)]
pub enum JournalError {
    /// Errors related to file I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors related to JSON serialization (config files, model output).
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Errors related to the YAML metadata header of a note.
    #[error("Metadata header error: {0}")]
    Header(#[from] serde_yaml::Error),

    /// Errors raised by the vault watcher.
    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// A note for this date and scene already exists; the caller should have
    /// appended instead.
    #[error("Note already exists for {date} ({scene}): {path}")]
    NoteAlreadyExists {
        date: NaiveDate,
        scene: Scene,
        path: PathBuf,
    },

    /// Note file disappeared between lookup and mutation.
    #[error("Note not found: {path}")]
    NoteNotFound { path: PathBuf },

    /// Invalid note format or content.
    #[error("Invalid note format in {path}: {message}")]
    InvalidFormat { path: PathBuf, message: String },

    /// Attachment exceeds the configured size limit.
    #[error("Attachment too large: {size} bytes (limit {limit})")]
    AttachmentTooLarge { size: usize, limit: usize },

    /// Errors related to configuration.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Directory creation or access failed.
    #[error("Failed to create or access directory: {path}")]
    DirectoryError { path: PathBuf },

    /// Remote sync command failed.
    #[error("Sync failed: {message}")]
    SyncFailed { message: String },

    /// Scheduler could not be started, stopped or commanded.
    #[error("Scheduler error: {message}")]
    SchedulerError { message: String },

    /// An external collaborator failed and there was no local fallback.
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] crate::CollaboratorError),

    /// Generic application error with a custom message.
    #[error("{message}")]
    ApplicationError { message: String },
}
