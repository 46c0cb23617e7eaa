//! Tennis practice journal library
//!
//! This library turns chat messages posted in themed channels into dated
//! Markdown notes with a YAML metadata header, stores them in a note vault,
//! searches them, mirrors the vault to a git remote and runs the scheduled
//! digest and reminder jobs.

mod cli;
mod collaborators;
mod config;
mod date_hint;
mod errors;
mod handler;
mod helper;
mod jobs;
mod markdown;
mod note;
mod record;
mod scene;
mod scheduler;
mod storage;
mod structuring;
mod sync;
mod types;
mod writer;

// Re-export key components
pub use cli::*;
pub use collaborators::*;
pub use config::*;
pub use date_hint::*;
pub use errors::*;
pub use handler::*;
pub use helper::*;
pub use jobs::*;
pub use markdown::*;
pub use note::*;
pub use record::*;
pub use scene::*;
pub use scheduler::*;
pub use storage::*;
pub use structuring::*;
pub use sync::*;
pub use types::*;
pub use writer::*;
