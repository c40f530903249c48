//! Plugin Registry (C5) — the fixed, process-global roster of plugins,
//! each owning a disjoint path subtree.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::cancel::CancelSignal;
use crate::error::{ProvmanError, ProvmanResult};
use crate::path;
use crate::schema::Schema;

/// What a plugin hands back on a successful sync-in: its current
/// settings and its own view of its metadata (merged into the cache
/// alongside the persisted metadata store — spec §4.4 lifecycle).
#[derive(Debug, Default, Clone)]
pub struct SyncInResult {
    pub settings: HashMap<String, String>,
}

/// The capability set every plugin exposes (spec §4.5, §9 "Polymorphism").
/// Represented as a trait object (`Arc<dyn Plugin>`) rather than an
/// inheritance hierarchy, mirroring the teacher's `async-trait` based
/// `Runner` abstraction.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable identifier, used to name its metadata file.
    fn name(&self) -> &str;

    /// Path ending in `/`, uniquely identifying the owned subtree.
    fn root(&self) -> &str;

    /// The plugin's schema tree, validating every write/delete under its root.
    fn schema(&self) -> &Schema;

    /// Loads the plugin's current settings. `sim_id` is the value from
    /// `Start`, verbatim (possibly empty). Cancellable via `cancel`.
    async fn sync_in(&self, sim_id: &str, cancel: CancelSignal) -> ProvmanResult<SyncInResult>;

    /// Pushes the cache's committed view of this plugin's subtree back to
    /// the middleware. Cancellable via `cancel`.
    async fn sync_out(
        &self,
        settings: HashMap<String, String>,
        cancel: CancelSignal,
    ) -> ProvmanResult<()>;

    /// Called on `Abort` so the plugin may drop any per-session state.
    /// Infallible and fire-and-forget by contract (spec §4.6.1).
    async fn abort(&self) {}

    /// The plugin's own canonical SIM id, reported after a successful
    /// sync-in, used to namespace its metadata file. `None` means "use
    /// whatever `Start` was given verbatim".
    fn sim_id(&self) -> Option<String> {
        None
    }
}

/// The immutable, process-global plugin roster.
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// Builds the registry, running the startup consistency check (spec
    /// §4.5): every root validates as a path, and no two roots are
    /// prefixes of each other (including equality). Fails fatally with
    /// `Corrupt` — the caller is expected to treat this as an
    /// unrecoverable startup error (spec §6 "Process behaviour").
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> ProvmanResult<Self> {
        for p in &plugins {
            path::validate(p.root())?;
            if p.root() == "/" || !p.root().ends_with('/') {
                return Err(ProvmanError::Corrupt(format!(
                    "plugin {:?} root must end with '/' and not be '/': {:?}",
                    p.name(),
                    p.root()
                )));
            }
        }
        for i in 0..plugins.len() {
            for j in (i + 1)..plugins.len() {
                let (a, b) = (plugins[i].root(), plugins[j].root());
                if a.starts_with(b) || b.starts_with(a) {
                    return Err(ProvmanError::Corrupt(format!(
                        "overlapping plugin roots: {a:?} and {b:?}"
                    )));
                }
            }
        }
        Ok(Self { plugins })
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// The unique plugin whose root is a prefix of `path + '/'`.
    pub fn owner_of(&self, target: &str) -> Option<Arc<dyn Plugin>> {
        let target_slash = format!("{}/", path::normalize(target));
        self.plugins
            .iter()
            .find(|p| target_slash.starts_with(p.root()))
            .cloned()
    }

    /// All plugins with `prefix` as a prefix of their root.
    pub fn descendant_plugins(&self, prefix: &str) -> Vec<Arc<dyn Plugin>> {
        let prefix = path::normalize(prefix);
        let prefix_slash = if prefix == "/" {
            "/".to_string()
        } else {
            format!("{prefix}/")
        };
        self.plugins
            .iter()
            .filter(|p| p.root().starts_with(&prefix_slash) || p.root() == prefix_slash)
            .cloned()
            .collect()
    }

    /// All plugin roots with `prefix` as a prefix.
    pub fn descendant_roots(&self, prefix: &str) -> Vec<&str> {
        let prefix = path::normalize(prefix);
        let prefix_slash = if prefix == "/" {
            "/".to_string()
        } else {
            format!("{prefix}/")
        };
        self.plugins
            .iter()
            .map(|p| p.root())
            .filter(|root| root.starts_with(&prefix_slash) || *root == prefix_slash)
            .collect()
    }

    /// The distinct first segment of each descendant root beyond `prefix`.
    pub fn direct_children(&self, prefix: &str) -> Vec<String> {
        let prefix = path::normalize(prefix);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for root in self.descendant_roots(prefix) {
            let rest = if prefix == "/" {
                root.trim_start_matches('/')
            } else {
                root.trim_start_matches(prefix).trim_start_matches('/')
            };
            if let Some(first) = rest.split('/').next() {
                if !first.is_empty() && seen.insert(first.to_string()) {
                    out.push(first.to_string());
                }
            }
        }
        out
    }

    /// True when `path` is a prefix of any plugin root — lets the engine
    /// report `/`, `/applications`, etc. as existing directories even
    /// though they store nothing themselves.
    pub fn exists_inferred(&self, target: &str) -> bool {
        let target = path::normalize(target);
        let target_slash = if target == "/" {
            "/".to_string()
        } else {
            format!("{target}/")
        };
        self.plugins
            .iter()
            .any(|p| p.root().starts_with(&target_slash) || p.root() == target_slash)
    }
}
