//! Module identity codec.
//!
//! A single `.marko` file is requested for several purposes in one build: as a
//! server page entry, as a browser hydration entry, as a client module in dev,
//! or as the owner of compiler-generated virtual files. Each purpose gets its
//! own module id by appending a query-style suffix to the disk path:
//!
//! ```text
//! <diskPath>?marko-<purpose>[&id=<base64url>]
//! ```
//!
//! The suffix always strips back to the original disk path.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::BuildMode;

/// Extension of template source files.
pub const SOURCE_EXT: &str = ".marko";

const QUERY_PREFIX: &str = "?marko-";
const VIRTUAL_ID_PARAM: &str = "&id=";

pub const SERVER_ENTRY_QUERY: &str = "?marko-server-entry";
pub const BROWSER_ENTRY_QUERY: &str = "?marko-browser-entry";
pub const BROWSER_QUERY: &str = "?marko-browser";
pub const VIRTUAL_QUERY: &str = "?marko-virtual";

/// Prefix used by bundlers for ids that must never touch the filesystem.
pub const SYNTHETIC_PREFIX: char = '\0';

// ---------------------------------------------------------------------------
// Purpose
// ---------------------------------------------------------------------------

/// Why a module was requested. Exactly one purpose per module id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Plain request, no suffix.
    #[default]
    None,
    /// Page entry imported by server code during SSR.
    ServerEntry,
    /// Hydration entry imported by an entry document in the browser build.
    BrowserEntry,
    /// Client-side request in dev, kept apart from the SSR module.
    Browser,
    /// Compiler-generated file owned by the disk path; carries the logical
    /// virtual path (e.g. `./button.marko.css`).
    Virtual(String),
}

impl Purpose {
    /// The `<purpose>` segment of the suffix grammar.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            Purpose::None => None,
            Purpose::ServerEntry => Some("server-entry"),
            Purpose::BrowserEntry => Some("browser-entry"),
            Purpose::Browser => Some("browser"),
            Purpose::Virtual(_) => Some("virtual"),
        }
    }

    /// Server or browser page entry.
    pub fn is_entry(&self) -> bool {
        matches!(self, Purpose::ServerEntry | Purpose::BrowserEntry)
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, Purpose::Virtual(_))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Purpose::None)
    }
}

// ---------------------------------------------------------------------------
// ModuleIdentity
// ---------------------------------------------------------------------------

/// A disk path plus the purpose it was requested for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleIdentity {
    pub path: String,
    pub purpose: Purpose,
}

impl ModuleIdentity {
    pub fn new(path: impl Into<String>, purpose: Purpose) -> Self {
        Self {
            path: path.into(),
            purpose,
        }
    }

    /// Encode back to a module id.
    pub fn to_id(&self) -> String {
        attach_purpose(&self.path, &self.purpose)
    }

    /// Synthetic ids (`\0`-prefixed or virtual) never come from disk.
    pub fn is_synthetic(&self) -> bool {
        self.path.starts_with(SYNTHETIC_PREFIX) || self.purpose.is_virtual()
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_id())
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Append the suffix for `purpose` to `path`.
///
/// `path` must be a bare disk path; attaching to an already tagged id yields
/// an id that no longer strips losslessly.
pub fn attach_purpose(path: &str, purpose: &Purpose) -> String {
    match purpose {
        Purpose::None => path.to_string(),
        Purpose::Virtual(virtual_path) => format!(
            "{path}{VIRTUAL_QUERY}{VIRTUAL_ID_PARAM}{}{}",
            URL_SAFE_NO_PAD.encode(virtual_path),
            extension_of(virtual_path)
        ),
        tagged => match tagged.tag() {
            Some(tag) => format!("{path}{QUERY_PREFIX}{tag}"),
            None => path.to_string(),
        },
    }
}

/// Split a module id into its disk path and purpose.
pub fn strip_purpose(id: &str) -> ModuleIdentity {
    let Some(index) = id.find(QUERY_PREFIX) else {
        return ModuleIdentity::new(id, Purpose::None);
    };

    let path = &id[..index];
    let query = &id[index..];

    let purpose = match query {
        SERVER_ENTRY_QUERY => Some(Purpose::ServerEntry),
        BROWSER_ENTRY_QUERY => Some(Purpose::BrowserEntry),
        BROWSER_QUERY => Some(Purpose::Browser),
        _ => query
            .strip_prefix(VIRTUAL_QUERY)
            .and_then(|rest| rest.strip_prefix(VIRTUAL_ID_PARAM))
            .and_then(decode_virtual_param)
            .map(Purpose::Virtual),
    };

    match purpose {
        Some(purpose) => ModuleIdentity::new(path, purpose),
        None => ModuleIdentity::new(id, Purpose::None),
    }
}

/// `&id=` payload: base64url of the virtual path followed by its extension.
fn decode_virtual_param(param: &str) -> Option<String> {
    let encoded_len = param
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(param.len());
    let (encoded, ext) = param.split_at(encoded_len);

    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    let virtual_path = String::from_utf8(bytes).ok()?;

    (extension_of(&virtual_path) == ext).then_some(virtual_path)
}

/// Extension of the last path segment, including the dot.
fn extension_of(path: &str) -> &str {
    let file = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match file.rfind('.') {
        Some(0) | None => "",
        Some(dot) => &file[dot..],
    }
}

/// Whether `path` names a template source file.
pub fn is_source_file(path: &str) -> bool {
    path.ends_with(SOURCE_EXT)
}

// ---------------------------------------------------------------------------
// Purpose selection
// ---------------------------------------------------------------------------

/// Everything the resolver knows about a request when deciding its purpose.
#[derive(Debug, Clone, Copy)]
pub struct PurposeQuery<'a> {
    /// Requested specifier, without any purpose suffix.
    pub importee: &'a str,
    pub importer: Option<&'a str>,
    /// Resolving for server-side rendering.
    pub ssr: bool,
    pub linked: bool,
    pub mode: BuildMode,
    /// The importer is an entry of the current bundle.
    pub importer_is_entry: bool,
    /// The importer lives only in memory (e.g. a virtual module).
    pub importer_is_synthetic: bool,
}

/// Pick the purpose tag for a resolution request. First matching rule wins.
pub fn select_purpose(query: &PurposeQuery<'_>) -> Purpose {
    if !is_source_file(query.importee) {
        return Purpose::None;
    }

    let importer = query.importer.map(strip_purpose);

    // A template imported from non-template server code is a page entry.
    if let Some(importer) = &importer {
        if query.ssr
            && query.linked
            && !query.importer_is_synthetic
            && !importer.is_synthetic()
            && !is_source_file(&importer.path)
        {
            return Purpose::ServerEntry;
        }
    }

    if !query.ssr
        && query.mode == BuildMode::Build
        && importer.is_some()
        && query.importer_is_entry
    {
        return Purpose::BrowserEntry;
    }

    if query.mode == BuildMode::Dev && query.linked && !query.ssr {
        return Purpose::Browser;
    }

    Purpose::None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
