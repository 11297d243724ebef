//! MarkoPlugin - hook-driven orchestrator for linked `.marko` builds
//!
//! Implements the [`Plugin`] hooks to:
//! 1. Tag template requests with their purpose in `resolve_id`
//! 2. Serve virtual modules and cached entry sources in `load`
//! 3. Compile templates and synthesize entry loaders in `transform`
//! 4. Hand entries from the server build to the client build, and the
//!    browser manifest back to the server chunks, in `generate_bundle`

pub mod cjs_interop;
pub mod dev_state;
pub mod entry_template;
pub mod virtual_files;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;

use crate::entry_id::to_entry_id;
use crate::hooks::{
    AssetCodeProvider, CompileConfig, CompileTarget, HookGenerateBundleArgs, HookLoadArgs,
    HookLoadOutput, HookResolveIdArgs, HookResolveIdOutput, HookResult, HookTransformArgs,
    HookTransformOutput, HostContext, InputItem, Output, Plugin, TemplateCompiler,
    VirtualDependency, VirtualDependencyRegistrar, WatchEvent,
};
use crate::identity::{
    attach_purpose, is_source_file, select_purpose, strip_purpose, Purpose, PurposeQuery,
    BROWSER_ENTRY_QUERY,
};
use crate::manifest::{
    generate_doc_manifest, generate_input_doc, manifest_global, manifest_statement,
    BrowserManifest,
};
use crate::options::{ConfigEnv, ConfigPatch, PendingPolicy, PluginOptions, ResolvedConfig};
use crate::store::{HandoffStore, ServerManifest};
use crate::utils::{
    absolute_path, basename, dev_url, is_relative_specifier, join_relative, js_string,
    normalize_path, relative_path,
};
use crate::{BuildHalf, BuildMode, LinkError};

use self::cjs_interop::{interop_facade, CjsDetector};
use self::dev_state::DevState;
use self::entry_template::{
    render_assets_runtime, server_entry_source, EntryTemplateOptions, RuntimeOptions,
    RENDER_ASSETS_RUNTIME_ID,
};
use self::virtual_files::{VirtualEntry, VirtualFile, VirtualModuleTable};

const TAGLIB_FILE: &str = "marko.json";

// ---------------------------------------------------------------------------
// LinkContext
// ---------------------------------------------------------------------------

/// Process-wide state shared by every plugin instance.
///
/// Hosts that run both halves of a linked build (or several dev servers) in
/// one process clone a single context into each [`MarkoPlugin`].
#[derive(Clone)]
pub struct LinkContext {
    compiler: Arc<dyn TemplateCompiler>,
    virtual_files: VirtualModuleTable,
    cjs: Arc<CjsDetector>,
    /// Overrides the per-project handoff file.
    store: Option<Arc<HandoffStore>>,
    tag_transforms_registered: Arc<AtomicBool>,
}

impl fmt::Debug for LinkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkContext")
            .field("virtual_files", &self.virtual_files.len())
            .field("store", &self.store)
            .field(
                "tag_transforms_registered",
                &self.tag_transforms_registered.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl LinkContext {
    pub fn new(compiler: Arc<dyn TemplateCompiler>) -> Self {
        Self {
            compiler,
            virtual_files: VirtualModuleTable::new(),
            cjs: Arc::new(CjsDetector::new()),
            store: None,
            tag_transforms_registered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_store(mut self, store: Arc<HandoffStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn virtual_files(&self) -> &VirtualModuleTable {
        &self.virtual_files
    }

    fn register_tag_transforms(&self) {
        if !self.tag_transforms_registered.swap(true, Ordering::SeqCst) {
            self.compiler.register_tag_transforms();
            tracing::debug!("registered tag transforms");
        }
    }

    /// Drop compiler and package caches.
    fn clear_caches(&self) {
        self.compiler.clear_caches();
        self.cjs.clear();
    }
}

// ---------------------------------------------------------------------------
// BuildState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildState {
    #[default]
    Idle,
    Configuring,
    ServerBuild,
    ClientBuild,
    Dev,
    Finalizing,
    Done,
}

/// What `config_resolved` decided.
struct Settings {
    root: PathBuf,
    base: String,
    out_dir: PathBuf,
    mode: BuildMode,
    half: Option<BuildHalf>,
    providers: Vec<Arc<dyn AssetCodeProvider>>,
    store: Arc<HandoffStore>,
    source_maps: bool,
    /// Served for [`RENDER_ASSETS_RUNTIME_ID`]; each plugin has its own.
    runtime_code: String,
}

// ---------------------------------------------------------------------------
// MarkoPlugin
// ---------------------------------------------------------------------------

/// The orchestrator. One instance per host invocation.
pub struct MarkoPlugin {
    options: PluginOptions,
    ctx: LinkContext,
    state: RwLock<BuildState>,
    settings: RwLock<Option<Arc<Settings>>>,
    /// Server half: entries compiled so far. Client half: the record read
    /// from the store.
    server_manifest: Mutex<ServerManifest>,
    /// Absolute path → template source, from the handoff record.
    entry_sources: DashMap<String, String>,
    dev: DevState,
}

impl fmt::Debug for MarkoPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkoPlugin")
            .field("options", &self.options)
            .field("state", &self.state())
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl MarkoPlugin {
    pub fn new(options: PluginOptions, ctx: LinkContext) -> Self {
        Self {
            options,
            ctx,
            state: RwLock::new(BuildState::Idle),
            settings: RwLock::new(None),
            server_manifest: Mutex::new(ServerManifest::default()),
            entry_sources: DashMap::new(),
            dev: DevState::new(),
        }
    }

    pub fn options(&self) -> &PluginOptions {
        &self.options
    }

    pub fn context(&self) -> &LinkContext {
        &self.ctx
    }

    pub fn state(&self) -> BuildState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last source map the dev server produced for `module`.
    pub fn dev_source_map(&self, module: &str) -> Option<String> {
        self.dev.source_map(module)
    }

    fn set_state(&self, next: BuildState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "build state");
            *state = next;
        }
    }

    fn settings(&self, hook: &'static str) -> Result<Arc<Settings>, LinkError> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(LinkError::NotConfigured { hook })
    }

    fn pending_policy(&self) -> PendingPolicy {
        self.options.pending_policy()
    }

    fn runtime_code(&self, mode: BuildMode, base: &str) -> String {
        match &self.options.render_assets_runtime_code {
            Some(code) => code.clone(),
            None => render_assets_runtime(&RuntimeOptions {
                is_build: mode == BuildMode::Build,
                base,
                base_path_var: self.options.base_path_var.as_deref(),
                runtime_id: self.options.runtime_id.as_deref(),
            }),
        }
    }
}

impl Plugin for MarkoPlugin {
    fn name(&self) -> &'static str {
        "marko-link"
    }

    async fn config(&self, env: &ConfigEnv) -> HookResult<ConfigPatch> {
        self.set_state(BuildState::Configuring);
        self.options.validate()?;

        let mut patch = ConfigPatch {
            resolve_extensions: vec![".marko".into()],
            optimize_deps_extensions: vec![".marko".into()],
            ssr_no_external: vec![r"\.marko$".into()],
            empty_out_dir: None,
        };
        // The client half appends to server output; it must not wipe it.
        if env.mode == BuildMode::Build && self.options.linked && !env.ssr_build {
            patch.empty_out_dir = Some(false);
        }
        Ok(patch)
    }

    async fn config_resolved(&self, config: ResolvedConfig) -> HookResult<()> {
        let half = config.build_half(self.options.linked);
        let store = match &self.ctx.store {
            Some(store) => Arc::clone(store),
            None => Arc::new(HandoffStore::for_project(
                &self.options.store_dir(),
                &config.root,
                self.options.runtime_id.as_deref(),
            )),
        };
        let runtime_code = self.runtime_code(config.mode, &config.base);
        let settings = Arc::new(Settings {
            root: config.root,
            base: config.base,
            out_dir: config.out_dir,
            mode: config.mode,
            half,
            providers: config.asset_code_providers,
            store,
            source_maps: self
                .options
                .source_maps
                .unwrap_or(config.mode == BuildMode::Dev),
            runtime_code,
        });

        self.ctx.register_tag_transforms();

        tracing::debug!(
            root = %settings.root.display(),
            mode = ?settings.mode,
            half = ?settings.half,
            "configuration resolved"
        );

        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Some(settings.clone());
        self.set_state(match (settings.mode, half) {
            (BuildMode::Dev, _) => BuildState::Dev,
            (_, Some(BuildHalf::Client)) => BuildState::ClientBuild,
            (_, Some(BuildHalf::Server)) => BuildState::ServerBuild,
            (BuildMode::Build, None) if config.ssr_build => BuildState::ServerBuild,
            (BuildMode::Build, None) => BuildState::ClientBuild,
        });
        Ok(())
    }

    async fn configure_server(&self) -> HookResult<()> {
        self.settings("configure_server")?;
        self.set_state(BuildState::Dev);
        Ok(())
    }

    async fn watch_change(&self, path: &str, event: WatchEvent) -> HookResult<Vec<String>> {
        let path = normalize_path(path);

        if basename(&path) == TAGLIB_FILE {
            self.ctx.clear_caches();
            tracing::debug!(%path, ?event, "tag library changed, caches cleared");

            if event != WatchEvent::Update {
                // Tag lookups may resolve differently everywhere now.
                let mut affected = self.dev.all_modules();
                self.dev.clear();
                affected.extend(self.ctx.virtual_files.invalidate_all_owned());
                return Ok(affected);
            }
        }

        let mut affected = self.dev.modules_watching(&path);
        match event {
            WatchEvent::Update => affected.extend(self.ctx.virtual_files.invalidate_owner(&path)),
            WatchEvent::Delete => {
                let abandoned = self.ctx.virtual_files.abandon_owner(&path);
                if !abandoned.is_empty() {
                    tracing::debug!(%path, count = abandoned.len(), "abandoned virtual modules");
                }
                affected.extend(abandoned);
                self.dev.forget(&path);
            }
            WatchEvent::Create => {}
        }
        tracing::trace!(%path, ?event, ?affected, "watch change");
        Ok(affected)
    }

    async fn build_start(&self, input: &mut Vec<InputItem>) -> HookResult<()> {
        let settings = self.settings("build_start")?;

        match settings.half {
            Some(BuildHalf::Server) => {
                *self
                    .server_manifest
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = ServerManifest::default();
            }
            Some(BuildHalf::Client) => {
                let manifest = settings.store.read().await?;
                if manifest.is_empty() {
                    return Err(LinkError::NoEntries.into());
                }

                self.entry_sources.clear();
                for (entry_id, relative) in &manifest.entries {
                    let file = absolute_path(&settings.root, relative);
                    let doc_id = format!("{file}.html");
                    self.ctx
                        .virtual_files
                        .register(&doc_id, VirtualFile::new(generate_input_doc(&file)));
                    input.push(InputItem::new(entry_id.as_str(), doc_id));

                    if let Some(source) = manifest.entry_sources.get(relative) {
                        self.entry_sources.insert(file, source.clone());
                    }
                }
                tracing::debug!(entries = manifest.entries.len(), "seeded browser inputs");

                *self
                    .server_manifest
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = manifest;
            }
            None => {}
        }
        Ok(())
    }

    async fn resolve_id<C: HostContext>(
        &self,
        ctx: &C,
        args: &HookResolveIdArgs<'_>,
    ) -> HookResult<Option<HookResolveIdOutput>> {
        let settings = self.settings("resolve_id")?;
        let table = &self.ctx.virtual_files;

        if args.specifier == RENDER_ASSETS_RUNTIME_ID || table.contains(args.specifier) {
            return Ok(Some(HookResolveIdOutput::new(args.specifier)));
        }

        let importer = args.importer.map(strip_purpose);
        let importer_path = importer.as_ref().map(|i| i.path.as_str());

        if let Some(importer_path) = importer_path {
            if is_relative_specifier(args.specifier) {
                let joined = join_relative(importer_path, args.specifier);
                if table.contains(&joined) {
                    return Ok(Some(HookResolveIdOutput::new(joined)));
                }
            }
        }

        // Already tagged: resolve the disk path and keep the tag.
        let requested = strip_purpose(args.specifier);
        if !requested.purpose.is_none() {
            let resolved = ctx.resolve(&requested.path, importer_path, args.ssr).await?;
            return Ok(resolved.map(|r| {
                HookResolveIdOutput::new(attach_purpose(&r.id, &requested.purpose))
            }));
        }

        let purpose = select_purpose(&PurposeQuery {
            importee: args.specifier,
            importer: args.importer,
            ssr: args.ssr,
            linked: self.options.linked,
            mode: settings.mode,
            importer_is_entry: args.importer.is_some_and(|i| ctx.is_entry(i)),
            importer_is_synthetic: args.importer.is_some_and(|i| table.contains(i)),
        });

        if !purpose.is_none() {
            let Some(resolved) = ctx.resolve(args.specifier, importer_path, args.ssr).await? else {
                return Ok(None);
            };
            let id = attach_purpose(&resolved.id, &purpose);
            tracing::trace!(specifier = args.specifier, %id, "tagged template request");
            return Ok(Some(HookResolveIdOutput::new(id)));
        }

        // Tagged importers are not real files; resolve against the disk path.
        if importer.as_ref().is_some_and(|i| !i.purpose.is_none()) {
            return ctx.resolve(args.specifier, importer_path, args.ssr).await;
        }

        Ok(None)
    }

    async fn load(&self, args: &HookLoadArgs<'_>) -> HookResult<Option<HookLoadOutput>> {
        if args.id == RENDER_ASSETS_RUNTIME_ID {
            let settings = self.settings("load")?;
            return Ok(Some(HookLoadOutput {
                code: settings.runtime_code.as_str().into(),
                map: None,
            }));
        }

        match self.ctx.virtual_files.get(args.id) {
            Some(VirtualEntry::Ready(file)) => {
                return Ok(Some(HookLoadOutput {
                    code: file.code.into(),
                    map: file.map,
                }));
            }
            Some(VirtualEntry::Pending(pending)) => {
                tracing::trace!(id = args.id, "waiting for pending virtual module");
                let file = match pending.wait(self.pending_policy()).await {
                    Ok(file) => file,
                    Err(e) => {
                        tracing::warn!(id = args.id, error = %e, "pending virtual module not recompiled");
                        return Err(e.into());
                    }
                };
                return Ok(Some(HookLoadOutput {
                    code: file.code.into(),
                    map: file.map,
                }));
            }
            None => {}
        }

        let identity = strip_purpose(args.id);
        if identity.purpose.is_entry() {
            if let Some(source) = self.entry_sources.get(&identity.path) {
                tracing::trace!(id = args.id, "serving cached entry source");
                return Ok(Some(HookLoadOutput {
                    code: source.value().as_str().into(),
                    map: None,
                }));
            }
        }

        Ok(None)
    }

    async fn transform<C: HostContext>(
        &self,
        ctx: &C,
        args: &HookTransformArgs<'_>,
    ) -> HookResult<Option<HookTransformOutput>> {
        let identity = strip_purpose(args.id);
        if identity.purpose.is_virtual() || !is_source_file(&identity.path) {
            return Ok(None);
        }
        let settings = self.settings("transform")?;

        let is_cjs = args.ssr
            && identity.purpose.is_none()
            && self.ctx.cjs.is_cjs_module(&identity.path).await;

        let output = match &identity.purpose {
            Purpose::ServerEntry => {
                let loader = self
                    .entry_loader(ctx, &settings, &identity.path, args.code)
                    .await?;
                self.compile(&settings, &loader, args.id, CompileTarget::Html)?
            }
            Purpose::BrowserEntry => {
                self.compile(&settings, args.code, args.id, CompileTarget::Hydrate)?
            }
            Purpose::Browser => self.compile(&settings, args.code, args.id, CompileTarget::Dom)?,
            _ if is_cjs => {
                self.compile_cjs_facade(&identity.path, args.code, args.id)?
            }
            _ if args.ssr => self.compile(&settings, args.code, args.id, CompileTarget::Html)?,
            _ => self.compile(&settings, args.code, args.id, CompileTarget::Dom)?,
        };

        if settings.mode == BuildMode::Dev {
            self.dev.record(
                &identity.path,
                output.watch_files,
                optional_taglibs(&settings.root, &identity.path),
                output.map.clone(),
            );
        }

        Ok(Some(HookTransformOutput {
            code: output.code,
            map: output.map,
        }))
    }

    async fn generate_bundle(&self, args: &mut HookGenerateBundleArgs<'_>) -> HookResult<()> {
        let settings = self.settings("generate_bundle")?;

        match settings.half {
            Some(BuildHalf::Server) => {
                if !args.is_write {
                    return Err(LinkError::ServerBundleNotWritten.into());
                }
                self.set_state(BuildState::Finalizing);
                self.finalize_server(&settings, args).await?;
            }
            Some(BuildHalf::Client) => {
                self.set_state(BuildState::Finalizing);
                self.finalize_client(&settings, args).await?;
            }
            None => return Ok(()),
        }

        self.set_state(BuildState::Done);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transform helpers
// ---------------------------------------------------------------------------

struct Compiled {
    code: String,
    map: Option<String>,
    watch_files: Vec<String>,
}

/// Registers the compiler's virtual dependencies under their owner's path,
/// remembering which ids one compile produced.
struct Registrar<'a> {
    table: &'a VirtualModuleTable,
    registered: Mutex<BTreeSet<String>>,
}

impl<'a> Registrar<'a> {
    fn new(table: &'a VirtualModuleTable) -> Self {
        Self {
            table,
            registered: Mutex::new(BTreeSet::new()),
        }
    }

    /// Abandon ids `owner` left pending because this compile no longer
    /// produced them.
    fn retire_stale(self, owner: &str) {
        let registered = self
            .registered
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let retired = self.table.retire_pending(owner, &registered);
        if !retired.is_empty() {
            tracing::debug!(owner, ?retired, "virtual modules no longer produced");
        }
    }
}

impl VirtualDependencyRegistrar for Registrar<'_> {
    fn register_virtual_dependency(&self, from: &str, dep: VirtualDependency) -> String {
        let owner = strip_purpose(from).path;
        let purpose = Purpose::Virtual(dep.virtual_path);
        let id = attach_purpose(&owner, &purpose);
        let outcome = self
            .table
            .register_owned(&owner, &id, VirtualFile::new(dep.code).with_map(dep.map));
        tracing::trace!(%id, ?outcome, "registered virtual dependency");
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        format!("./{}", attach_purpose(basename(&owner), &purpose))
    }
}

impl MarkoPlugin {
    /// Source of the loader template for a server entry.
    async fn entry_loader<C: HostContext>(
        &self,
        ctx: &C,
        settings: &Settings,
        file: &str,
        source: &str,
    ) -> HookResult<String> {
        let mut entry_data = Vec::with_capacity(settings.providers.len() + 1);
        let mut global = None;

        if settings.mode == BuildMode::Build {
            let relative = relative_path(&settings.root, file);
            let entry_id = to_entry_id(&relative);
            if settings.half == Some(BuildHalf::Server) {
                let mut manifest = self
                    .server_manifest
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = manifest.add_entry(&entry_id, &relative, source) {
                    tracing::warn!(error = %e, "entry id collision");
                    return Err(e.into());
                }
            }
            tracing::trace!(%entry_id, %relative, "server entry");
            entry_data.push(js_string(&entry_id));
            global = Some(manifest_global(self.options.runtime_id.as_deref()));
        } else {
            let url = format!("{}{BROWSER_ENTRY_QUERY}", dev_url(&settings.root, file));
            let html = ctx
                .transform_index_html(&url, &generate_input_doc(&url))
                .await?;
            let manifest = generate_doc_manifest(&settings.base, &html);
            entry_data.push(serde_json::to_string(&manifest)?);
        }

        entry_data.extend(
            settings
                .providers
                .iter()
                .filter_map(|p| p.get_asset_code_for_entry(file)),
        );

        Ok(server_entry_source(&EntryTemplateOptions {
            file_name: basename(file),
            entry_data: &entry_data,
            manifest_global: global.as_deref(),
        }))
    }

    fn compile(
        &self,
        settings: &Settings,
        source: &str,
        id: &str,
        target: CompileTarget,
    ) -> Result<Compiled, LinkError> {
        let config = CompileConfig::new(target)
            .with_source_maps(settings.source_maps)
            .with_optimize(settings.mode == BuildMode::Build);
        let registrar = Registrar::new(&self.ctx.virtual_files);

        let output = self
            .ctx
            .compiler
            .compile(source, id, &config, &registrar)
            .map_err(|e| LinkError::Compile {
                id: id.to_string(),
                message: format!("{e:#}"),
            })?;
        // An entry loader compiles a wrapper, not the template itself.
        let identity = strip_purpose(id);
        if identity.purpose != Purpose::ServerEntry {
            registrar.retire_stale(&identity.path);
        }

        tracing::trace!(
            id,
            ?target,
            tags = output.analyzed_tag_ids.len(),
            "compiled template"
        );
        Ok(Compiled {
            code: output.code,
            map: output.source_map,
            watch_files: output.watch_files,
        })
    }

    /// Re-export the CommonJS build of a template instead of bundling it.
    fn compile_cjs_facade(&self, file: &str, source: &str, id: &str) -> Result<Compiled, LinkError> {
        let config = CompileConfig::new(CompileTarget::Html).cjs_interop();
        let registrar = Registrar::new(&self.ctx.virtual_files);
        let output = self
            .ctx
            .compiler
            .compile(source, id, &config, &registrar)
            .map_err(|e| LinkError::Compile {
                id: id.to_string(),
                message: format!("{e:#}"),
            })?;
        let ast = output.ast.ok_or_else(|| LinkError::Compile {
            id: id.to_string(),
            message: "compiler returned no AST for an AST-only compile".into(),
        })?;

        tracing::trace!(id, "commonjs interop facade");
        Ok(Compiled {
            code: interop_facade(file, &ast),
            map: None,
            watch_files: output.watch_files,
        })
    }

    async fn finalize_server(
        &self,
        settings: &Settings,
        args: &HookGenerateBundleArgs<'_>,
    ) -> Result<(), LinkError> {
        let mut manifest = self
            .server_manifest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for output in args.bundle.iter() {
            let Output::Chunk(chunk) = output else {
                continue;
            };
            let has_entry = chunk
                .module_ids
                .iter()
                .any(|id| strip_purpose(id).purpose == Purpose::ServerEntry);
            if has_entry {
                manifest.add_chunk_needing_assets(normalize_path(settings.out_dir.join(&chunk.filename)));
            }
        }

        if manifest.is_empty() {
            tracing::warn!("server build compiled no Marko entries");
        }
        settings.store.write(&manifest).await
    }

    async fn finalize_client(
        &self,
        settings: &Settings,
        args: &mut HookGenerateBundleArgs<'_>,
    ) -> HookResult<()> {
        let manifest = self
            .server_manifest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut browser = BrowserManifest::new();
        for (entry_id, relative) in &manifest.entries {
            let file = format!("{relative}.html");
            let index = args
                .bundle
                .iter()
                .position(|output| output.filename() == file)
                .ok_or_else(|| LinkError::MissingEntryDocument {
                    entry: relative.clone(),
                    file: file.clone(),
                })?;
            let Output::Asset(asset) = &args.bundle[index] else {
                return Err(LinkError::UnexpectedEntryOutput {
                    entry: relative.clone(),
                    file,
                }
                .into());
            };

            let doc = generate_doc_manifest(&settings.base, &asset.source.to_text());
            browser.insert(entry_id.clone(), doc.without_preload());
            args.bundle.remove(index);
        }

        let global = manifest_global(self.options.runtime_id.as_deref());
        let statement = manifest_statement(&global, &browser)?;

        for chunk in &manifest.chunks_needing_assets {
            append_to_file(Path::new(chunk), &statement).await?;
        }

        tracing::info!(
            entries = browser.len(),
            chunks = manifest.chunks_needing_assets.len(),
            "linked browser manifest into server chunks"
        );
        Ok(())
    }
}

/// `marko.json` files between the template's directory and the root. Any of
/// them appearing later changes how the template's tags resolve.
fn optional_taglibs(root: &Path, file: &str) -> Vec<String> {
    Path::new(file)
        .ancestors()
        .skip(1)
        .take_while(|dir| dir.starts_with(root))
        .map(|dir| normalize_path(dir.join(TAGLIB_FILE)))
        .collect()
}

async fn append_to_file(path: &Path, text: &str) -> Result<(), LinkError> {
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .await
        .map_err(|e| LinkError::io(path, e))?;
    file.write_all(text.as_bytes())
        .await
        .map_err(|e| LinkError::io(path, e))?;
    file.flush().await.map_err(|e| LinkError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taglib_chain_stops_at_root() {
        let chain = optional_taglibs(Path::new("/app"), "/app/src/pages/page.marko");
        assert_eq!(
            chain,
            vec![
                "/app/src/pages/marko.json".to_string(),
                "/app/src/marko.json".to_string(),
                "/app/marko.json".to_string(),
            ]
        );
        assert!(optional_taglibs(Path::new("/app"), "/elsewhere/page.marko").is_empty());
    }

    #[test]
    fn registrar_returns_relative_specifier() {
        let table = VirtualModuleTable::new();
        let registrar = Registrar::new(&table);
        let specifier = registrar.register_virtual_dependency(
            "/app/page.marko?marko-browser",
            VirtualDependency {
                virtual_path: "./page.marko.css".into(),
                code: ".a{}".into(),
                map: None,
            },
        );
        assert_eq!(
            specifier,
            "./page.marko?marko-virtual&id=Li9wYWdlLm1hcmtvLmNzcw.css"
        );
        assert!(table.contains("/app/page.marko?marko-virtual&id=Li9wYWdlLm1hcmtvLmNzcw.css"));
        assert_eq!(table.owned_by("/app/page.marko").len(), 1);
    }
}
