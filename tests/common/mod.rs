//! Shared fakes for the integration tests: a deterministic template
//! compiler and a host that resolves by joining paths.

#![allow(dead_code)]

use std::collections::HashSet;
use std::future::{ready, Future};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use marko_link::hooks::{
    CompileConfig, CompileOutput, HookResolveIdOutput, HookResult, HostContext, ModuleAst,
    TemplateCompiler, TopLevel, VirtualDependency, VirtualDependencyRegistrar,
};
use marko_link::utils::{basename, join_relative, js_string, normalize_path};
use marko_link::{strip_purpose, LinkContext};

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Compiles a template to `export default "<source>"`.
///
/// - `<style>…</style>` becomes a virtual `.css` dependency
/// - `<fail/>` makes the compile fail
/// - a `$ watch <path>` line adds a watch file
#[derive(Debug, Default)]
pub struct FakeCompiler {
    pub tag_transform_registrations: AtomicUsize,
    pub cache_clears: AtomicUsize,
    pub compiles: Mutex<Vec<(String, CompileConfig)>>,
}

impl FakeCompiler {
    pub fn compiled(&self) -> Vec<(String, CompileConfig)> {
        self.compiles.lock().unwrap().clone()
    }
}

impl TemplateCompiler for FakeCompiler {
    fn compile(
        &self,
        source: &str,
        id: &str,
        config: &CompileConfig,
        deps: &dyn VirtualDependencyRegistrar,
    ) -> anyhow::Result<CompileOutput> {
        if source.contains("<fail/>") {
            anyhow::bail!("Unknown tag <fail>");
        }
        self.compiles
            .lock()
            .unwrap()
            .push((id.to_string(), config.clone()));

        let mut code = format!("// {:?} {id}\n", config.target);
        if let (Some(start), Some(end)) = (source.find("<style>"), source.find("</style>")) {
            let css = &source[start + "<style>".len()..end];
            let owner = strip_purpose(id).path;
            let specifier = deps.register_virtual_dependency(
                id,
                VirtualDependency {
                    virtual_path: format!("./{}.css", basename(&owner)),
                    code: css.to_string(),
                    map: None,
                },
            );
            code.push_str(&format!("import {};\n", js_string(&specifier)));
        }
        code.push_str(&format!("export default {};\n", js_string(source)));

        let watch_files = source
            .lines()
            .filter_map(|line| line.trim().strip_prefix("$ watch "))
            .map(str::to_string)
            .collect();

        Ok(CompileOutput {
            code,
            source_map: config.source_maps.then(|| r#"{"version":3}"#.to_string()),
            ast: config.ast_only.then(|| ModuleAst {
                body: vec![
                    TopLevel::ExportDeclaration {
                        names: vec!["meta".into()],
                    },
                    TopLevel::ExportDefault,
                ],
            }),
            analyzed_tag_ids: Vec::new(),
            watch_files,
        })
    }

    fn register_tag_transforms(&self) {
        self.tag_transform_registrations
            .fetch_add(1, Ordering::SeqCst);
    }

    fn clear_caches(&self) {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn context() -> (Arc<FakeCompiler>, LinkContext) {
    let compiler = Arc::new(FakeCompiler::default());
    let ctx = LinkContext::new(compiler.clone());
    (compiler, ctx)
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeHost {
    entries: Mutex<HashSet<String>>,
    /// Preload href the HTML transform injects, like a dev server would.
    pub inject_preload: Option<String>,
}

impl FakeHost {
    pub fn with_preload(href: &str) -> Self {
        Self {
            inject_preload: Some(href.to_string()),
            ..Self::default()
        }
    }

    pub fn add_entry(&self, id: &str) {
        self.entries.lock().unwrap().insert(id.to_string());
    }
}

impl HostContext for FakeHost {
    fn resolve(
        &self,
        specifier: &str,
        importer: Option<&str>,
        _ssr: bool,
    ) -> impl Future<Output = HookResult<Option<HookResolveIdOutput>>> + Send {
        let resolved = if specifier.starts_with('/') {
            Some(specifier.to_string())
        } else {
            importer.map(|importer| join_relative(importer, specifier))
        };
        ready(Ok(resolved.map(HookResolveIdOutput::new)))
    }

    fn is_entry(&self, id: &str) -> bool {
        self.entries.lock().unwrap().contains(id)
    }

    fn transform_index_html(
        &self,
        _url: &str,
        html: &str,
    ) -> impl Future<Output = HookResult<String>> + Send {
        let html = match &self.inject_preload {
            Some(href) => html.replace(
                "</head>",
                &format!("<link rel=\"modulepreload\" href=\"{href}\"></head>"),
            ),
            None => html.to_string(),
        };
        ready(Ok(html))
    }
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// Write `files` (root-relative path, contents) under `root`.
pub fn write_project(root: &Path, files: &[(&str, &str)]) {
    for (relative, contents) in files {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}

pub fn abs(root: &Path, relative: &str) -> String {
    normalize_path(root.join(relative))
}
