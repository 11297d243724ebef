//! Utility functions shared by the orchestrator.
//!
//! - JS / HTML string escaping (injection-safe)
//! - Posix-style path helpers for module ids

use std::path::{Path, PathBuf};

use sugar_path::SugarPath;

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

/// Escape a string for safe embedding inside a JS double-quoted string literal.
pub fn escape_js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}

/// Quote `s` as a JS string literal.
pub fn js_string(s: &str) -> String {
    format!("\"{}\"", escape_js_string(s))
}

/// Escape a string for a double-quoted HTML attribute value.
pub fn escape_html_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Module ids always use forward slashes.
pub fn normalize_path(path: impl AsRef<Path>) -> String {
    path.as_ref().to_string_lossy().replace('\\', "/")
}

/// `file` relative to `root`, posix-style. Files outside `root` keep their
/// full path.
pub fn relative_path(root: &Path, file: &str) -> String {
    let file_path = Path::new(file);
    match file_path.strip_prefix(root) {
        Ok(rel) => normalize_path(rel),
        Err(_) => normalize_path(file_path),
    }
}

/// Absolute path of a root-relative entry path.
pub fn absolute_path(root: &Path, relative: &str) -> String {
    normalize_path(root.join(relative).normalize())
}

/// Resolve a `./` or `../` specifier against the directory of `importer`.
pub fn join_relative(importer: &str, specifier: &str) -> String {
    let dir = Path::new(importer)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    normalize_path(dir.join(specifier).normalize())
}

/// Relative specifiers start with `./` or `../`.
pub fn is_relative_specifier(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

/// Last segment of a posix or windows path.
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// URL the dev server serves `file` under.
pub fn dev_url(root: &Path, file: &str) -> String {
    match Path::new(file).strip_prefix(root) {
        Ok(rel) => format!("/{}", normalize_path(rel)),
        Err(_) => format!("/@fs/{}", normalize_path(file).trim_start_matches('/')),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_js_string() {
        assert_eq!(escape_js_string(r#"he said "hi""#), r#"he said \"hi\""#);
        assert_eq!(escape_js_string("line1\nline2"), "line1\\nline2");
        assert_eq!(js_string("a\\b"), "\"a\\\\b\"");
    }

    #[test]
    fn test_escape_html_attr() {
        assert_eq!(escape_html_attr("/a?x=1&y=\"2\""), "/a?x=1&amp;y=&quot;2&quot;");
    }

    #[test]
    fn test_relative_path() {
        let root = Path::new("/project");
        assert_eq!(relative_path(root, "/project/src/a.marko"), "src/a.marko");
        assert_eq!(relative_path(root, "/elsewhere/a.marko"), "/elsewhere/a.marko");
    }

    #[test]
    fn test_join_relative() {
        assert_eq!(
            join_relative("/project/src/page.marko", "./page.marko?marko-virtual&id=abc.css"),
            "/project/src/page.marko?marko-virtual&id=abc.css"
        );
        assert_eq!(
            join_relative("/project/src/pages/page.marko", "../shared/x.js"),
            "/project/src/shared/x.js"
        );
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/project/src/page.marko"), "page.marko");
        assert_eq!(basename("page.marko"), "page.marko");
    }

    #[test]
    fn test_dev_url() {
        let root = Path::new("/project");
        assert_eq!(dev_url(root, "/project/src/page.marko"), "/src/page.marko");
        assert_eq!(dev_url(root, "/lib/page.marko"), "/@fs/lib/page.marko");
    }
}
