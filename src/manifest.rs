//! Asset manifests for entry documents.
//!
//! The browser build emits one HTML document per entry. After the host has
//! rewritten it (hashed file names, injected preloads, base path), the
//! document lists exactly the assets the page needs. Scanning it gives the
//! [`DocManifest`] the server uses to render those tags itself.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::utils::escape_html_attr;

/// Global that server chunks read the browser manifest from.
pub const MANIFEST_GLOBAL: &str = "__MARKO_MANIFEST__";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Assets one entry document needs, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocManifest {
    pub scripts: Vec<String>,
    pub styles: Vec<String>,
    /// Dev only; production manifests never carry it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preload: Option<Vec<String>>,
}

impl DocManifest {
    /// Drop preload hints, as production output does.
    pub fn without_preload(mut self) -> Self {
        self.preload = None;
        self
    }
}

/// Entry id → assets.
pub type BrowserManifest = BTreeMap<String, DocManifest>;

// ---------------------------------------------------------------------------
// Document scanning
// ---------------------------------------------------------------------------

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<(script|link)\b([^>]*)>").expect("tag pattern"))
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
            .expect("attribute pattern")
    })
}

/// Attribute lookup on a raw tag body. Names are case-insensitive.
fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    attr_re().captures_iter(attrs).find_map(|cap| {
        let key = cap.get(1)?.as_str();
        if !key.eq_ignore_ascii_case(name) {
            return None;
        }
        Some(
            cap.get(2)
                .or(cap.get(3))
                .or(cap.get(4))
                .map_or("", |m| m.as_str()),
        )
    })
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn is_external(url: &str) -> bool {
    url.starts_with("//") || url.starts_with("data:") || url.contains("://")
}

/// Make `url` relative to `base_path` when it lives under it.
fn relative_to_base(base_path: &str, url: &str) -> String {
    if is_external(url) {
        return url.to_string();
    }

    let base = if base_path.ends_with('/') {
        base_path.to_string()
    } else {
        format!("{base_path}/")
    };

    url.strip_prefix(base.as_str()).unwrap_or(url).to_string()
}

/// Scan a rendered document for the scripts, styles and preloads it loads.
///
/// Inline scripts and styles are ignored; only referenced URLs are collected.
/// URLs under `base_path` are made relative to it so the server can prefix a
/// runtime base at render time.
pub fn generate_doc_manifest(base_path: &str, html: &str) -> DocManifest {
    let html = comment_re().replace_all(html, "");
    let mut manifest = DocManifest::default();
    let mut preload = Vec::new();

    for cap in tag_re().captures_iter(&html) {
        let (Some(tag), Some(attrs)) = (cap.get(1), cap.get(2)) else {
            continue;
        };
        let attrs = attrs.as_str();

        if tag.as_str().eq_ignore_ascii_case("script") {
            if let Some(src) = attribute(attrs, "src").filter(|s| !s.is_empty()) {
                manifest
                    .scripts
                    .push(relative_to_base(base_path, &decode_entities(src)));
            }
            continue;
        }

        let (Some(rel), Some(href)) = (attribute(attrs, "rel"), attribute(attrs, "href")) else {
            continue;
        };
        if href.is_empty() {
            continue;
        }
        let href = relative_to_base(base_path, &decode_entities(href));

        for kind in rel.split_ascii_whitespace() {
            if kind.eq_ignore_ascii_case("stylesheet") {
                manifest.styles.push(href);
                break;
            }
            if kind.eq_ignore_ascii_case("modulepreload") || kind.eq_ignore_ascii_case("preload") {
                preload.push(href);
                break;
            }
        }
    }

    if !preload.is_empty() {
        manifest.preload = Some(preload);
    }
    manifest
}

/// A minimal document whose only job is to load `entry_url` as a module.
pub fn generate_input_doc(entry_url: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><script async type=\"module\" src=\"{}\"></script></head><body></body></html>",
        escape_html_attr(entry_url)
    )
}

// ---------------------------------------------------------------------------
// Manifest global
// ---------------------------------------------------------------------------

/// Name of the manifest global, namespaced by runtime id when set.
pub fn manifest_global(runtime_id: Option<&str>) -> String {
    match runtime_id {
        Some(id) => {
            let safe: String = id
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            format!("__MARKO_MANIFEST_{safe}__")
        }
        None => MANIFEST_GLOBAL.to_string(),
    }
}

/// The statement appended to server chunks: `;var <global>=<json>;\n`.
pub fn manifest_statement(
    global: &str,
    manifest: &BrowserManifest,
) -> Result<String, serde_json::Error> {
    Ok(format!(";var {global}={};\n", serde_json::to_string(manifest)?))
}
