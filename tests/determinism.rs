use std::sync::Arc;

use marko_link::hooks::{HookResolveIdArgs, HookTransformArgs};
use marko_link::plugin::entry_template::{render_assets_runtime, RuntimeOptions};
use marko_link::{to_entry_id, HandoffStore, MarkoPlugin, Plugin, PluginOptions, ResolvedConfig};
use sha1::{Digest, Sha1};

mod common;

use common::{abs, context, FakeHost};

fn sha1(s: &str) -> String {
    hex::encode(Sha1::digest(s.as_bytes()))
}

/// Server-half transform of one page, through a fresh plugin.
async fn server_entry_code(root: &std::path::Path, page: &str) -> String {
    let (_, ctx) = context();
    let plugin = MarkoPlugin::new(
        PluginOptions::default(),
        ctx.with_store(Arc::new(HandoffStore::memory())),
    );
    plugin
        .config_resolved(ResolvedConfig::build(root).with_ssr_build(true))
        .await
        .unwrap();
    plugin.build_start(&mut Vec::new()).await.unwrap();

    let host = FakeHost::default();
    let server_js = abs(root, "server.js");
    let id = plugin
        .resolve_id(
            &host,
            &HookResolveIdArgs {
                specifier: page,
                importer: Some(&server_js),
                ssr: true,
            },
        )
        .await
        .unwrap()
        .unwrap()
        .id;
    plugin
        .transform(
            &host,
            &HookTransformArgs {
                id: &id,
                code: "<h1/>",
                ssr: true,
            },
        )
        .await
        .unwrap()
        .unwrap()
        .code
}

// ============================================================================
// Entry ids
// ============================================================================

#[test]
fn entry_ids_are_stable_across_calls() {
    for path in ["a.marko", "b/index.marko", "src/routes/shop/template.marko"] {
        assert_eq!(to_entry_id(path), to_entry_id(path));
    }
}

#[test]
fn same_basename_different_suffix() {
    let one = to_entry_id("one/page.marko");
    let two = to_entry_id("two/page.marko");
    assert_ne!(one, two);
    assert!(one.starts_with("page_") && two.starts_with("page_"));
}

#[test]
fn windows_separators_hash_like_posix() {
    assert_eq!(to_entry_id("b\\index.marko"), to_entry_id("b/index.marko"));
}

// ============================================================================
// Generated code
// ============================================================================

#[test]
fn runtime_output_is_identical_per_options() {
    let opts = RuntimeOptions {
        is_build: true,
        base: "/static/",
        base_path_var: None,
        runtime_id: Some("shop"),
    };
    assert_eq!(
        sha1(&render_assets_runtime(&opts)),
        sha1(&render_assets_runtime(&opts))
    );
}

#[tokio::test]
async fn entry_loader_is_identical_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let first = server_entry_code(dir.path(), "./pages/home.marko").await;
    let second = server_entry_code(dir.path(), "./pages/home.marko").await;
    assert_eq!(sha1(&first), sha1(&second));
    assert!(first.contains(&to_entry_id("pages/home.marko")));
}
