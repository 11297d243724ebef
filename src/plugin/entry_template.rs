//! Synthesized entry loaders and the asset-rendering runtime.
//!
//! A server entry (`page.marko?marko-server-entry`) compiles to a tiny
//! template that renders the real page and registers the page's assets with
//! the runtime, which writes the `<link>`/`<script>` tags around the HTML.

use crate::manifest::manifest_global;
use crate::utils::{escape_js_string, js_string};

/// Module id of the asset-rendering runtime.
pub const RENDER_ASSETS_RUNTIME_ID: &str = "\0marko-render-assets.mjs";

/// Inputs for [`server_entry_source`].
#[derive(Debug, Clone)]
pub struct EntryTemplateOptions<'a> {
    /// File name of the real template, imported relative to the loader.
    pub file_name: &'a str,
    /// JS expressions, one per asset source: an inline manifest object in dev,
    /// a quoted entry id in build, plus sibling-provided code.
    pub entry_data: &'a [String],
    /// Set in build: entry ids are looked up in this global at render time.
    pub manifest_global: Option<&'a str>,
}

/// Template source of the entry loader.
pub fn server_entry_source(opts: &EntryTemplateOptions<'_>) -> String {
    let file = js_string(&format!("./{}", opts.file_name));
    let runtime = js_string(RENDER_ASSETS_RUNTIME_ID);
    let assets = opts.entry_data.join(",");

    // The manifest global is appended to this chunk after the browser build,
    // so it must only be read at render time.
    let lookup = match opts.manifest_global {
        Some(global) => format!(
            "static function lookup(entryId) {{\n  return typeof {global} === \"undefined\" ? undefined : {global}[entryId];\n}}\n"
        ),
        None => "static const lookup = undefined;\n".to_string(),
    };

    format!(
        r#"import template from {file};
export * from {file};
import {{ addAssets, getPrepend, getAppend }} from {runtime};
static function flush($global, html) {{
  return getPrepend($global) + html + getAppend($global);
}}
static function setFlush($global) {{
  $global.__flush__ = flush;
}}
{lookup}static const assets = [{assets}];
<if(addAssets($global, assets, lookup))>
  $ setFlush($global);
</if>
<${{template}} ...input/>
"#
    )
}

/// Inputs for [`render_assets_runtime`].
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions<'a> {
    pub is_build: bool,
    /// Public base path baked in when no runtime variable is configured.
    pub base: &'a str,
    pub base_path_var: Option<&'a str>,
    pub runtime_id: Option<&'a str>,
}

/// JS of the runtime that turns registered manifests into tags.
pub fn render_assets_runtime(opts: &RuntimeOptions<'_>) -> String {
    let base = match opts.base_path_var {
        Some(var) => format!("($global.{var} || \"\")"),
        None => js_string(opts.base),
    };
    let assets_key = match opts.runtime_id {
        Some(id) => format!("___markoLinkAssets_{}", sanitize(id)),
        None => "___markoLinkAssets".to_string(),
    };
    let preload = if opts.is_build {
        String::new()
    } else {
        "    for (const href of entry.preload || []) html += `<link rel=\"modulepreload\" href=\"${base}${href}\">`;\n".to_string()
    };

    format!(
        r#"// generated by marko-link
const seen = Symbol("{key}");
function entries($global) {{
  return $global["{key}"] || [];
}}
export function addAssets($global, assets, lookup) {{
  const list = $global["{key}"] || ($global["{key}"] = []);
  for (const asset of assets) {{
    const entry = typeof asset === "string" && lookup ? lookup(asset) : asset;
    if (entry && !list.includes(entry)) list.push(entry);
  }}
  if ($global[seen]) return false;
  $global[seen] = true;
  return true;
}}
export function getPrepend($global) {{
  const base = {base};
  let html = "";
  for (const entry of entries($global)) {{
    for (const href of entry.styles || []) html += `<link rel="stylesheet" href="${{base}}${{href}}">`;
{preload}  }}
  return html;
}}
export function getAppend($global) {{
  const base = {base};
  let html = "";
  for (const entry of entries($global)) {{
    for (const src of entry.scripts || []) html += `<script async type="module" src="${{base}}${{src}}"></script>`;
  }}
  return html;
}}
export const manifestGlobal = "{global}";
"#,
        key = escape_js_string(&assets_key),
        global = manifest_global(opts.runtime_id),
    )
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_loader_references_entry_id() {
        let data = vec![js_string("page_abcd")];
        let source = server_entry_source(&EntryTemplateOptions {
            file_name: "page.marko",
            entry_data: &data,
            manifest_global: Some("__MARKO_MANIFEST__"),
        });
        assert!(source.starts_with("import template from \"./page.marko\";\n"));
        assert!(source.contains("export * from \"./page.marko\";"));
        assert!(source.contains("static const assets = [\"page_abcd\"];"));
        assert!(source.contains("__MARKO_MANIFEST__[entryId]"));
        assert!(source.contains(RENDER_ASSETS_RUNTIME_ID));
    }

    #[test]
    fn dev_loader_inlines_manifest() {
        let data = vec![r#"{"scripts":["src/page.marko?marko-browser-entry"],"styles":[]}"#.to_string()];
        let source = server_entry_source(&EntryTemplateOptions {
            file_name: "page.marko",
            entry_data: &data,
            manifest_global: None,
        });
        assert!(source.contains(r#"static const assets = [{"scripts":["src/page.marko?marko-browser-entry"],"styles":[]}];"#));
        assert!(source.contains("static const lookup = undefined;"));
    }

    #[test]
    fn sibling_code_is_appended() {
        let data = vec![js_string("page_abcd"), "{ scripts: [\"extra.js\"] }".to_string()];
        let source = server_entry_source(&EntryTemplateOptions {
            file_name: "page.marko",
            entry_data: &data,
            manifest_global: Some("__MARKO_MANIFEST__"),
        });
        assert!(source.contains(r#"["page_abcd",{ scripts: ["extra.js"] }]"#));
    }

    #[test]
    fn runtime_uses_base_path_var() {
        let js = render_assets_runtime(&RuntimeOptions {
            is_build: true,
            base: "/",
            base_path_var: Some("assetsBase"),
            runtime_id: None,
        });
        assert!(js.contains("const base = ($global.assetsBase || \"\");"));
        assert!(!js.contains("modulepreload"));
    }

    #[test]
    fn dev_runtime_renders_preloads() {
        let js = render_assets_runtime(&RuntimeOptions {
            is_build: false,
            base: "/",
            base_path_var: None,
            runtime_id: Some("app"),
        });
        assert!(js.contains("const base = \"/\";"));
        assert!(js.contains("modulepreload"));
        assert!(js.contains("___markoLinkAssets_app"));
        assert!(js.contains("__MARKO_MANIFEST_app__"));
    }
}
