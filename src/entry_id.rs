//! Entry id generation.
//!
//! The client build only ever learns about entries by id, so ids must come
//! out identical in both phases for the same relative path.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// File names that say nothing about the page; the parent folder names it.
const PLACEHOLDER_NAMES: [&str; 2] = ["index", "template"];

const SUFFIX_LEN: usize = 4;

/// Derive `name_suffix` from a path relative to the project root.
///
/// `name` is the file name up to its first `.`, or the parent folder for
/// placeholder names. `suffix` is the first four filename-safe characters of
/// the base64 SHA-1 of the whole path. Suffixes are short, so two paths can
/// still collide; callers must check.
pub fn to_entry_id(relative_path: &str) -> String {
    let normalized = relative_path.replace('\\', "/");

    let (dir, file) = match normalized.rfind('/') {
        Some(sep) => (&normalized[..sep], &normalized[sep + 1..]),
        None => ("", normalized.as_str()),
    };

    let mut name = file.split('.').next().unwrap_or(file);
    if PLACEHOLDER_NAMES.contains(&name) {
        if let Some(parent) = dir.rsplit('/').next().filter(|s| !s.is_empty()) {
            name = parent;
        }
    }

    format!("{name}_{}", hash_suffix(&normalized))
}

fn hash_suffix(path: &str) -> String {
    let digest = Sha1::digest(path.as_bytes());
    STANDARD
        .encode(digest)
        .chars()
        .filter(|c| *c != '/' && *c != '+')
        .take(SUFFIX_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suffix_of(id: &str) -> &str {
        id.rsplit('_').next().unwrap()
    }

    #[test]
    fn name_from_file() {
        let id = to_entry_id("src/pages/about.marko");
        assert!(id.starts_with("about_"), "{id}");
        assert_eq!(suffix_of(&id).len(), 4);
    }

    #[test]
    fn index_promotes_parent_folder() {
        assert!(to_entry_id("b/index.marko").starts_with("b_"));
        assert!(to_entry_id("src/routes/blog/template.marko").starts_with("blog_"));
    }

    #[test]
    fn root_index_keeps_its_name() {
        assert!(to_entry_id("index.marko").starts_with("index_"));
    }

    #[test]
    fn name_stops_at_first_dot() {
        assert!(to_entry_id("pages/home.page.marko").starts_with("home_"));
    }

    #[test]
    fn deterministic() {
        assert_eq!(to_entry_id("a.marko"), to_entry_id("a.marko"));
        assert_eq!(to_entry_id("b\\index.marko"), to_entry_id("b/index.marko"));
    }

    #[test]
    fn same_name_different_path_differs() {
        let a = to_entry_id("one/page.marko");
        let b = to_entry_id("two/page.marko");
        assert_ne!(a, b);
        assert_ne!(suffix_of(&a), suffix_of(&b));
    }

    #[test]
    fn suffix_is_filename_safe() {
        for path in ["a.marko", "b/index.marko", "x/y/z.marko", "deep/nested/index.marko"] {
            let id = to_entry_id(path);
            assert!(!suffix_of(&id).contains(['/', '+', '=']), "{id}");
        }
    }
}
