//! # Marko Link
//!
//! Linked server/client build orchestration for `.marko` templates.
//!
//! A linked build runs the host bundler twice: once for the server bundle and
//! once for the browser bundle. The two invocations never talk to each other
//! except through a small record on disk. This crate provides the pieces that
//! make that work:
//!
//! - [`identity`]: purpose tags that give one source file several module ids
//! - [`plugin::virtual_files`]: in-memory modules, with pending placeholders
//!   while their owner recompiles
//! - [`entry_id`]: stable short ids for page entries
//! - [`store`]: the server → client handoff record
//! - [`manifest`]: per-entry asset manifests scanned from rendered documents
//! - [`plugin`]: the hook-driven orchestrator tying it all together
//!
//! The template compiler and the bundler itself are external collaborators,
//! consumed through the contracts in [`hooks`].

pub mod entry_id;
pub mod hooks;
pub mod identity;
pub mod manifest;
pub mod options;
pub mod plugin;
pub mod store;
pub mod utils;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use entry_id::to_entry_id;
pub use hooks::{AssetCodeProvider, HostContext, Plugin, TemplateCompiler};
pub use identity::{attach_purpose, is_source_file, strip_purpose, ModuleIdentity, Purpose};
pub use manifest::{generate_doc_manifest, generate_input_doc, BrowserManifest, DocManifest};
pub use options::{PendingPolicy, PluginOptions, ResolvedConfig};
pub use plugin::{BuildState, LinkContext, MarkoPlugin};
pub use store::{HandoffStore, ServerManifest};

// ---------------------------------------------------------------------------
// Build Mode
// ---------------------------------------------------------------------------

/// Whether the host is serving interactively or producing a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Interactive dev server; modules are recompiled on file changes.
    Dev,
    /// One-shot production build.
    Build,
}

/// Which half of a linked build the current invocation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildHalf {
    /// The SSR invocation. Runs first and writes the handoff record.
    Server,
    /// The browser invocation. Reads the handoff record.
    Client,
}

// ---------------------------------------------------------------------------
// LinkError
// ---------------------------------------------------------------------------

/// Every fatal condition the orchestrator can report.
///
/// Hooks return these wrapped in [`anyhow::Error`]; hosts can recover the
/// typed value with `downcast_ref::<LinkError>()`.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("You must run the server build before the browser build (no handoff record at {location})")]
    ServerBuildMissing { location: String },

    #[error("No Marko entry files were found in the server build; nothing to compile for the browser")]
    NoEntries,

    #[error("Marko entry `{entry}` has no HTML output in the browser bundle (expected `{file}`)")]
    MissingEntryDocument { entry: String, file: String },

    #[error("Marko entry `{entry}` had unexpected output from the bundler: `{file}` is not an asset")]
    UnexpectedEntryOutput { entry: String, file: String },

    #[error("Linked builds must write the server bundle to disk; the server build ran without write, so the browser build has nothing to link against")]
    ServerBundleNotWritten,

    #[error("Conflicting options: {0}")]
    ConflictingOptions(String),

    #[error("Invalid plugin options: {0}")]
    InvalidOptions(#[from] serde_json::Error),

    #[error("Entry id `{entry_id}` is shared by `{existing}` and `{incoming}`")]
    EntryIdCollision {
        entry_id: String,
        existing: String,
        incoming: String,
    },

    #[error("Handoff record at {location} is corrupt: {message}")]
    HandoffCorrupt { location: String, message: String },

    #[error("Timed out waiting for virtual module `{id}` to be recompiled")]
    PendingTimeout { id: String },

    #[error("Virtual module `{id}` was abandoned before it was recompiled")]
    PendingAbandoned { id: String },

    #[error("Failed to compile `{id}`: {message}")]
    Compile { id: String, message: String },

    #[error("Hook `{hook}` ran before the configuration was resolved")]
    NotConfigured { hook: &'static str },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
