//! Contracts with the outside world.
//!
//! The host bundler calls the [`Plugin`] hooks and provides a
//! [`HostContext`] for the few things only it can do (resolving through its
//! own resolver, knowing which modules are entries, running its HTML
//! transforms). The template compiler is a [`TemplateCompiler`]. Sibling
//! plugins may contribute per-entry runtime code through
//! [`AssetCodeProvider`].
//!
//! Argument and output types follow the Rolldown plugin API shape.

use std::future::Future;

use arcstr::ArcStr;

use crate::options::{ConfigEnv, ConfigPatch, ResolvedConfig};

/// Return type of every hook.
pub type HookResult<T> = anyhow::Result<T>;

// ---------------------------------------------------------------------------
// Hook arguments / outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct HookResolveIdArgs<'a> {
    pub specifier: &'a str,
    pub importer: Option<&'a str>,
    /// Resolving for server-side rendering.
    pub ssr: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResolveIdOutput {
    pub id: ArcStr,
    pub external: bool,
}

impl HookResolveIdOutput {
    pub fn new(id: impl Into<ArcStr>) -> Self {
        Self {
            id: id.into(),
            external: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HookLoadArgs<'a> {
    pub id: &'a str,
    pub ssr: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookLoadOutput {
    pub code: ArcStr,
    pub map: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct HookTransformArgs<'a> {
    pub id: &'a str,
    pub code: &'a str,
    pub ssr: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookTransformOutput {
    pub code: String,
    pub map: Option<String>,
}

/// A bundle input, as in Rolldown's `InputItem`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputItem {
    pub name: Option<String>,
    pub import: String,
}

impl InputItem {
    pub fn new(name: impl Into<String>, import: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            import: import.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrOrBytes {
    Str(String),
    Bytes(Vec<u8>),
}

impl StrOrBytes {
    pub fn to_text(&self) -> String {
        match self {
            StrOrBytes::Str(s) => s.clone(),
            StrOrBytes::Bytes(b) => String::from_utf8_lossy(b).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Path relative to the output directory.
    pub filename: String,
    pub code: String,
    /// Ids of every module rendered into this chunk.
    pub module_ids: Vec<String>,
    pub is_entry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputAsset {
    /// Path relative to the output directory.
    pub filename: String,
    pub source: StrOrBytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Chunk(OutputChunk),
    Asset(OutputAsset),
}

impl Output {
    pub fn filename(&self) -> &str {
        match self {
            Output::Chunk(c) => &c.filename,
            Output::Asset(a) => &a.filename,
        }
    }
}

pub struct HookGenerateBundleArgs<'a> {
    pub bundle: &'a mut Vec<Output>,
    /// Whether the bundle is about to be written to disk.
    pub is_write: bool,
}

/// File-watcher notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEvent {
    Create,
    Update,
    Delete,
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Services the host bundler provides to hooks.
pub trait HostContext: Send + Sync {
    /// Resolve through the host's own resolver, skipping this plugin.
    fn resolve(
        &self,
        specifier: &str,
        importer: Option<&str>,
        ssr: bool,
    ) -> impl Future<Output = HookResult<Option<HookResolveIdOutput>>> + Send;

    /// Whether `id` is an entry of the current bundle.
    fn is_entry(&self, id: &str) -> bool;

    /// Run the host's HTML transforms on a document served at `url`.
    fn transform_index_html(
        &self,
        url: &str,
        html: &str,
    ) -> impl Future<Output = HookResult<String>> + Send;
}

/// The hooks a host bundler drives, in call order.
#[allow(async_fn_in_trait)]
pub trait Plugin {
    fn name(&self) -> &'static str;

    /// Contribute to the user configuration before it is resolved.
    async fn config(&self, env: &ConfigEnv) -> HookResult<ConfigPatch>;

    /// Receive the final configuration.
    async fn config_resolved(&self, config: ResolvedConfig) -> HookResult<()>;

    /// The dev server is up.
    async fn configure_server(&self) -> HookResult<()> {
        Ok(())
    }

    /// A watched file changed. Returns module ids the host must invalidate.
    async fn watch_change(&self, _path: &str, _event: WatchEvent) -> HookResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn build_start(&self, _input: &mut Vec<InputItem>) -> HookResult<()> {
        Ok(())
    }

    async fn resolve_id<C: HostContext>(
        &self,
        _ctx: &C,
        _args: &HookResolveIdArgs<'_>,
    ) -> HookResult<Option<HookResolveIdOutput>> {
        Ok(None)
    }

    async fn load(&self, _args: &HookLoadArgs<'_>) -> HookResult<Option<HookLoadOutput>> {
        Ok(None)
    }

    async fn transform<C: HostContext>(
        &self,
        _ctx: &C,
        _args: &HookTransformArgs<'_>,
    ) -> HookResult<Option<HookTransformOutput>> {
        Ok(None)
    }

    async fn generate_bundle(&self, _args: &mut HookGenerateBundleArgs<'_>) -> HookResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sibling plugins
// ---------------------------------------------------------------------------

/// Capability other plugins may register to inject per-entry runtime data
/// into the synthesized entry loader.
pub trait AssetCodeProvider: Send + Sync {
    /// JS expression appended to the entry's asset list, or `None`.
    fn get_asset_code_for_entry(&self, disk_path: &str) -> Option<String>;
}

impl<F> AssetCodeProvider for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn get_asset_code_for_entry(&self, disk_path: &str) -> Option<String> {
        self(disk_path)
    }
}

// ---------------------------------------------------------------------------
// Template compiler
// ---------------------------------------------------------------------------

/// What the compiled code renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileTarget {
    /// Server-side HTML streaming.
    Html,
    /// Client-side initial DOM rendering.
    Dom,
    /// Client-side hydration of server-rendered markup.
    Hydrate,
}

/// Module system of the compiled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleSystem {
    Esm,
    /// Template lives in a CommonJS package; only the AST is requested.
    CjsInterop,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompileConfig {
    pub target: CompileTarget,
    pub module_system: ModuleSystem,
    pub source_maps: bool,
    /// Produce the AST only, skip code generation.
    pub ast_only: bool,
    pub optimize: bool,
}

impl CompileConfig {
    pub fn new(target: CompileTarget) -> Self {
        Self {
            target,
            module_system: ModuleSystem::Esm,
            source_maps: false,
            ast_only: false,
            optimize: false,
        }
    }

    pub fn with_source_maps(mut self, source_maps: bool) -> Self {
        self.source_maps = source_maps;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// AST-only compile used to build the CommonJS interop facade.
    pub fn cjs_interop(mut self) -> Self {
        self.module_system = ModuleSystem::CjsInterop;
        self.ast_only = true;
        self.source_maps = false;
        self
    }
}

/// Top-level statements of a compiled module, as far as exports go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopLevel {
    /// `export * from "source"`
    ExportAll { source: String },
    /// `export { a, b as c }`, optionally `from "source"`; holds exported names.
    ExportNamed {
        exported: Vec<String>,
        source: Option<String>,
    },
    /// `export const x = …` / `export function f() {}`; holds declared names.
    ExportDeclaration { names: Vec<String> },
    /// `export default …`
    ExportDefault,
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleAst {
    pub body: Vec<TopLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutput {
    pub code: String,
    pub source_map: Option<String>,
    /// Present when [`CompileConfig::ast_only`] was requested.
    pub ast: Option<ModuleAst>,
    pub analyzed_tag_ids: Vec<String>,
    /// Extra files whose changes must recompile this module.
    pub watch_files: Vec<String>,
}

/// A file the compiler wants to exist without writing it to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDependency {
    /// Logical path relative to the owning file, e.g. `./page.marko.css`.
    pub virtual_path: String,
    pub code: String,
    pub map: Option<String>,
}

/// Handed to the compiler so it can materialize virtual dependencies.
pub trait VirtualDependencyRegistrar {
    /// Register `dep` as owned by module `from`; returns the specifier the
    /// compiled code should import it by.
    fn register_virtual_dependency(&self, from: &str, dep: VirtualDependency) -> String;
}

/// Black-box template compiler.
pub trait TemplateCompiler: Send + Sync {
    fn compile(
        &self,
        source: &str,
        id: &str,
        config: &CompileConfig,
        deps: &dyn VirtualDependencyRegistrar,
    ) -> anyhow::Result<CompileOutput>;

    /// Install the compiler's tag transforms. Called once per process.
    fn register_tag_transforms(&self) {}

    /// Drop every internal cache (tag lookups, parsed taglibs).
    fn clear_caches(&self) {}
}
