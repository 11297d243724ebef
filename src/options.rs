//! Plugin options and the configuration the host resolves.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hooks::AssetCodeProvider;
use crate::{BuildHalf, BuildMode, LinkError};

// ---------------------------------------------------------------------------
// PluginOptions
// ---------------------------------------------------------------------------

/// User-facing options, deserializable from the host's JSON config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PluginOptions {
    /// Link the server and browser builds (default: true).
    pub linked: bool,
    /// Namespaces the handoff record and the manifest global.
    pub runtime_id: Option<String>,
    /// Runtime global holding the asset base path.
    pub base_path_var: Option<String>,
    /// Replacement for the generated asset-rendering runtime.
    pub render_assets_runtime_code: Option<String>,
    /// Where the handoff record lives (default: `<tmp>/marko-link`).
    pub store_dir: Option<PathBuf>,
    /// Give up waiting on a pending virtual module after this long.
    pub pending_timeout_ms: Option<u64>,
    /// Emit source maps (default: dev only).
    pub source_maps: Option<bool>,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            linked: true,
            runtime_id: None,
            base_path_var: None,
            render_assets_runtime_code: None,
            store_dir: None,
            pending_timeout_ms: None,
            source_maps: None,
        }
    }
}

impl PluginOptions {
    pub fn from_json(json: &str) -> Result<Self, LinkError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Reject option combinations that cannot work together.
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.base_path_var.is_some() && self.render_assets_runtime_code.is_some() {
            return Err(LinkError::ConflictingOptions(
                "`basePathVar` cannot be combined with `renderAssetsRuntimeCode`; \
                 a custom asset renderer must apply the base path itself"
                    .into(),
            ));
        }
        if let Some(var) = &self.base_path_var {
            let valid_ident = var
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
                && var
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
            if !valid_ident {
                return Err(LinkError::ConflictingOptions(format!(
                    "`basePathVar` must be a JS identifier, got `{var}`"
                )));
            }
        }
        Ok(())
    }

    pub fn with_linked(mut self, linked: bool) -> Self {
        self.linked = linked;
        self
    }

    pub fn with_runtime_id(mut self, id: impl Into<String>) -> Self {
        self.runtime_id = Some(id.into());
        self
    }

    pub fn with_base_path_var(mut self, var: impl Into<String>) -> Self {
        self.base_path_var = Some(var.into());
        self
    }

    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    pub fn pending_policy(&self) -> PendingPolicy {
        match self.pending_timeout_ms {
            Some(ms) => PendingPolicy::Timeout(Duration::from_millis(ms)),
            None => PendingPolicy::WaitForever,
        }
    }

    pub fn store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("marko-link"))
    }
}

/// How long a load waits for a pending virtual module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingPolicy {
    #[default]
    WaitForever,
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// Host configuration
// ---------------------------------------------------------------------------

/// What the host is about to do, as seen by the config-merge hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigEnv {
    pub mode: BuildMode,
    /// The host is building the SSR bundle.
    pub ssr_build: bool,
}

impl ConfigEnv {
    pub fn serve() -> Self {
        Self {
            mode: BuildMode::Dev,
            ssr_build: false,
        }
    }

    pub fn build(ssr_build: bool) -> Self {
        Self {
            mode: BuildMode::Build,
            ssr_build,
        }
    }
}

/// Configuration contributed by the config-merge hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub resolve_extensions: Vec<String>,
    pub optimize_deps_extensions: Vec<String>,
    /// Patterns of packages the SSR build must bundle rather than externalize.
    pub ssr_no_external: Vec<String>,
    pub empty_out_dir: Option<bool>,
}

/// Final configuration handed to the orchestrator.
#[derive(Clone)]
pub struct ResolvedConfig {
    pub root: PathBuf,
    /// Public base path assets are served under.
    pub base: String,
    pub out_dir: PathBuf,
    pub mode: BuildMode,
    pub ssr_build: bool,
    /// Sibling capabilities, in registration order.
    pub asset_code_providers: Vec<Arc<dyn AssetCodeProvider>>,
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("root", &self.root)
            .field("base", &self.base)
            .field("out_dir", &self.out_dir)
            .field("mode", &self.mode)
            .field("ssr_build", &self.ssr_build)
            .field("asset_code_providers", &self.asset_code_providers.len())
            .finish()
    }
}

impl ResolvedConfig {
    fn new(root: impl Into<PathBuf>, mode: BuildMode) -> Self {
        let root = root.into();
        Self {
            out_dir: root.join("dist"),
            root,
            base: "/".into(),
            mode,
            ssr_build: false,
            asset_code_providers: Vec::new(),
        }
    }

    pub fn serve(root: impl Into<PathBuf>) -> Self {
        Self::new(root, BuildMode::Dev)
    }

    pub fn build(root: impl Into<PathBuf>) -> Self {
        Self::new(root, BuildMode::Build)
    }

    pub fn with_ssr_build(mut self, ssr_build: bool) -> Self {
        self.ssr_build = ssr_build;
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = out_dir.into();
        self
    }

    pub fn with_asset_code_provider(mut self, provider: Arc<dyn AssetCodeProvider>) -> Self {
        self.asset_code_providers.push(provider);
        self
    }

    /// The half of a linked build this invocation runs, if any.
    pub fn build_half(&self, linked: bool) -> Option<BuildHalf> {
        match (self.mode, linked) {
            (BuildMode::Build, true) if self.ssr_build => Some(BuildHalf::Server),
            (BuildMode::Build, true) => Some(BuildHalf::Client),
            _ => None,
        }
    }
}
