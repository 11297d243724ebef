//! CommonJS interop for templates shipped in CommonJS packages.
//!
//! During SSR such a template is loaded by Node through `require`, so the
//! bundle must not inline a second ESM copy of it. Instead the compiler is
//! asked for the AST only and the module is replaced by a facade that
//! re-exports whatever the CommonJS build exports.

use std::path::{Path, PathBuf};

use dashmap::DashMap;

use crate::hooks::{ModuleAst, TopLevel};
use crate::utils::js_string;

/// Cached per-package CommonJS detection.
#[derive(Debug, Default)]
pub struct CjsDetector {
    /// Package directory → is CommonJS.
    packages: DashMap<PathBuf, bool>,
}

impl CjsDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A template is CommonJS when it lives under `node_modules` and its
    /// nearest `package.json` does not declare `"type": "module"`.
    pub async fn is_cjs_module(&self, file: &str) -> bool {
        let path = Path::new(file);
        if !path.components().any(|c| c.as_os_str() == "node_modules") {
            return false;
        }

        for dir in path.ancestors().skip(1) {
            if let Some(cached) = self.packages.get(dir) {
                return *cached;
            }

            let manifest = dir.join("package.json");
            let Ok(text) = tokio::fs::read_to_string(&manifest).await else {
                continue;
            };

            let is_cjs = match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(pkg) => pkg.get("type").and_then(|t| t.as_str()) != Some("module"),
                Err(e) => {
                    tracing::warn!(path = %manifest.display(), error = %e, "unreadable package.json, assuming ESM");
                    false
                }
            };
            self.packages.insert(dir.to_path_buf(), is_cjs);
            return is_cjs;
        }

        false
    }

    pub fn clear(&self) {
        self.packages.clear();
    }
}

/// ESM facade re-exporting the CommonJS build of `id`.
pub fn interop_facade(id: &str, ast: &ModuleAst) -> String {
    let mut named: Vec<&str> = Vec::new();
    let mut has_default = false;
    let mut reexports = String::new();

    for item in &ast.body {
        match item {
            TopLevel::ExportAll { source } => {
                reexports.push_str(&format!("export * from {};\n", js_string(source)));
            }
            TopLevel::ExportNamed {
                exported,
                source: Some(source),
            } => {
                reexports.push_str(&format!(
                    "export {{ {} }} from {};\n",
                    exported.join(", "),
                    js_string(source)
                ));
            }
            TopLevel::ExportNamed {
                exported,
                source: None,
            }
            | TopLevel::ExportDeclaration { names: exported } => {
                for name in exported {
                    if name == "default" {
                        has_default = true;
                    } else if !named.contains(&name.as_str()) {
                        named.push(name);
                    }
                }
            }
            TopLevel::ExportDefault => has_default = true,
            TopLevel::Other => {}
        }
    }

    let mut code = format!(
        "import {{ createRequire }} from \"module\";\nconst require = createRequire(import.meta.url);\nconst __marko_cjs__ = require({});\n",
        js_string(id)
    );
    if has_default {
        code.push_str("export default __marko_cjs__.default;\n");
    }
    if !named.is_empty() {
        code.push_str(&format!("export const {{ {} }} = __marko_cjs__;\n", named.join(", ")));
    }
    code.push_str(&reexports);
    code
}
