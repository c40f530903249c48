//! Plugin Manager (C6) — the session state machine, lazy sync-in,
//! sync-out, and every operation in the `Settings` surface (§4.6.4).
//! Owned exclusively by the single task dispatching requests out of the
//! Gate (§5); never shared behind a lock taken from multiple call sites.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::cancel::CancelSignal;
use crate::error::{ProvmanError, ProvmanResult};
use crate::metadata_store::{MetadataSnapshot, MetadataStore};
use crate::path;
use crate::registry::{Plugin, PluginRegistry};
use crate::schema::SchemaNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Active,
}

/// Placeholder notation (§6): an unnamed schema child is a wildcard
/// position, reported to callers as the literal segment `<X>` rather
/// than the empty string it's keyed by internally.
fn wildcard_name(name: &str) -> String {
    if name.is_empty() {
        "<X>".to_string()
    } else {
        name.to_string()
    }
}

pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    data_dir: PathBuf,
    state: SessionState,
    imsi: String,
    cache: Cache,
    synced: HashSet<String>,
    failed: HashSet<String>,
    metadata_stores: HashMap<String, MetadataStore>,
}

impl PluginManager {
    pub fn new(registry: Arc<PluginRegistry>, data_dir: PathBuf) -> Self {
        Self {
            registry,
            data_dir,
            state: SessionState::Idle,
            imsi: String::new(),
            cache: Cache::new(),
            synced: HashSet::new(),
            failed: HashSet::new(),
            metadata_stores: HashMap::new(),
        }
    }

    /// Captures the imsi and moves to `Active`. Sync-in is lazy — no
    /// plugin is contacted until an operation touches its subtree
    /// (§4.6.2).
    pub fn start(&mut self, imsi: impl Into<String>) {
        self.imsi = imsi.into();
        self.cache = Cache::new();
        self.synced.clear();
        self.failed.clear();
        self.metadata_stores.clear();
        self.state = SessionState::Active;
        info!(imsi = %self.imsi, "session started");
    }

    fn require_active(&self) -> ProvmanResult<()> {
        if self.state == SessionState::Active {
            Ok(())
        } else {
            Err(ProvmanError::Unexpected("no active session".to_string()))
        }
    }

    fn reset_to_idle(&mut self) {
        self.cache = Cache::new();
        self.imsi.clear();
        self.synced.clear();
        self.failed.clear();
        self.metadata_stores.clear();
        self.state = SessionState::Idle;
    }

    async fn ensure_plugin_synced(
        &mut self,
        plugin: &Arc<dyn Plugin>,
        cancel: &CancelSignal,
    ) -> ProvmanResult<()> {
        let name = plugin.name().to_string();
        if self.synced.contains(&name) || self.failed.contains(&name) {
            return Ok(());
        }
        match plugin.sync_in(&self.imsi, cancel.clone()).await {
            Ok(result) => {
                self.cache.merge_settings(result.settings);
                // A plugin with its own canonical SIM id namespaces its
                // metadata file by that id rather than the session's imsi,
                // e.g. a plugin rooted outside any SIM's subtree has no
                // session imsi to key off of.
                let meta_id = plugin.sim_id().unwrap_or_else(|| self.imsi.clone());
                let store = MetadataStore::open(&self.data_dir, &name, &meta_id);
                let snapshot = store.snapshot();
                self.cache.merge_meta(snapshot.into_iter().flat_map(|(path, props)| {
                    props.into_iter().map(move |(prop, value)| (path.clone(), prop, value))
                }));
                self.metadata_stores.insert(name.clone(), store);
                self.synced.insert(name);
                Ok(())
            }
            Err(ProvmanError::Cancelled) => {
                warn!(plugin = %name, "sync-in cancelled, session cache cleared");
                self.cache = Cache::new();
                Err(ProvmanError::Cancelled)
            }
            Err(e) => {
                warn!(plugin = %name, error = %e, "plugin sync-in failed, keys unavailable this session");
                self.failed.insert(name);
                Ok(())
            }
        }
    }

    /// Syncs whichever plugin owns `path` outright, or every plugin
    /// rooted under `path` when `path` is an unowned interior node.
    async fn ensure_synced(&mut self, path: &str, cancel: &CancelSignal) -> ProvmanResult<()> {
        if let Some(plugin) = self.registry.owner_of(path) {
            self.ensure_plugin_synced(&plugin, cancel).await
        } else {
            for plugin in self.registry.descendant_plugins(path) {
                self.ensure_plugin_synced(&plugin, cancel).await?;
            }
            Ok(())
        }
    }

    fn failed_owner(&self, path: &str) -> Option<Arc<dyn Plugin>> {
        self.registry
            .owner_of(path)
            .filter(|p| self.failed.contains(p.name()))
    }

    pub async fn set(&mut self, key: &str, value: &str, cancel: CancelSignal) -> ProvmanResult<()> {
        self.require_active()?;
        path::validate(key)?;
        self.ensure_synced(key, &cancel).await?;
        if self.failed_owner(key).is_some() {
            return Err(ProvmanError::Unknown(format!("plugin for {key:?} failed to sync")));
        }
        let owner = self
            .registry
            .owner_of(key)
            .ok_or_else(|| ProvmanError::NotFound(format!("no plugin owns {key:?}")))?;
        let node = owner.schema().locate(key)?;
        crate::schema::Schema::check(node, value)?;
        self.cache.set(key, value.to_string())?;
        debug!(path = %key, "set");
        Ok(())
    }

    pub async fn set_multiple(
        &mut self,
        entries: Vec<(String, String)>,
        cancel: CancelSignal,
    ) -> ProvmanResult<Vec<String>> {
        self.require_active()?;
        let mut failed = Vec::new();
        for (key, value) in entries {
            match self.set(&key, &value, cancel.clone()).await {
                Ok(()) => {}
                Err(ProvmanError::Cancelled) => return Err(ProvmanError::Cancelled),
                Err(_) => failed.push(key),
            }
        }
        Ok(failed)
    }

    pub async fn get(&mut self, key: &str, cancel: CancelSignal) -> ProvmanResult<String> {
        self.require_active()?;
        path::validate(key)?;
        self.ensure_synced(key, &cancel).await?;
        let owner = self.registry.owner_of(key);
        let schema_order: Option<Vec<String>> = match &owner {
            Some(o) => o
                .schema()
                .locate(key)
                .ok()
                .and_then(|node| node.dir_order().map(|o| o.to_vec())),
            None => None,
        };
        match self.cache.get_ordered(key, schema_order.as_deref()) {
            Ok(v) => Ok(v),
            Err(ProvmanError::NotFound(_)) => {
                if let Some(owner) = &owner {
                    match owner.schema().locate(key) {
                        Ok(node) if node.is_dir() => Ok(String::new()),
                        Ok(_) => Err(ProvmanError::NotFound(format!("no such key: {key}"))),
                        Err(e) => Err(e),
                    }
                } else if self.registry.exists_inferred(key) {
                    Ok(String::new())
                } else {
                    Err(ProvmanError::NotFound(format!("no such path: {key}")))
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_multiple(
        &mut self,
        keys: Vec<String>,
        cancel: CancelSignal,
    ) -> ProvmanResult<HashMap<String, String>> {
        self.require_active()?;
        let mut out = HashMap::new();
        for key in keys {
            match self.get(&key, cancel.clone()).await {
                Ok(v) => {
                    out.insert(key, v);
                }
                Err(ProvmanError::Cancelled) => return Err(ProvmanError::Cancelled),
                Err(_) => {}
            }
        }
        Ok(out)
    }

    pub async fn get_all(&mut self, prefix: &str, cancel: CancelSignal) -> ProvmanResult<HashMap<String, String>> {
        self.require_active()?;
        path::validate(prefix)?;
        self.ensure_synced(prefix, &cancel).await?;
        match self.cache.get_all(prefix) {
            Ok(map) => Ok(map),
            Err(ProvmanError::NotFound(_)) => {
                if self.registry.owner_of(prefix).is_some() || self.registry.exists_inferred(prefix) {
                    Ok(HashMap::new())
                } else {
                    Err(ProvmanError::NotFound(format!("no such path: {prefix}")))
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&mut self, key: &str, cancel: CancelSignal) -> ProvmanResult<()> {
        self.require_active()?;
        path::validate(key)?;
        self.ensure_synced(key, &cancel).await?;
        if self.failed_owner(key).is_some() {
            return Err(ProvmanError::Unknown(format!("plugin for {key:?} failed to sync")));
        }
        let owner = self
            .registry
            .owner_of(key)
            .ok_or_else(|| ProvmanError::NotFound(format!("no plugin owns {key:?}")))?;
        let node = owner.schema().locate(key)?;
        if !node.can_delete() {
            return Err(ProvmanError::Denied(format!("{key:?} cannot be deleted")));
        }
        self.cache.remove(key)?;
        debug!(path = %key, "delete");
        Ok(())
    }

    /// Processes strictly in input order, never deduplicating — deleting
    /// `/a` then `/a/b` legitimately fails the second entry.
    pub async fn delete_multiple(
        &mut self,
        keys: Vec<String>,
        cancel: CancelSignal,
    ) -> ProvmanResult<Vec<String>> {
        self.require_active()?;
        let mut failed = Vec::new();
        for key in keys {
            match self.delete(&key, cancel.clone()).await {
                Ok(()) => {}
                Err(ProvmanError::Cancelled) => return Err(ProvmanError::Cancelled),
                Err(_) => failed.push(key),
            }
        }
        Ok(failed)
    }

    pub async fn set_meta(
        &mut self,
        key: &str,
        prop: &str,
        value: &str,
        cancel: CancelSignal,
    ) -> ProvmanResult<()> {
        self.require_active()?;
        path::validate(key)?;
        self.ensure_synced(key, &cancel).await?;
        self.registry
            .owner_of(key)
            .ok_or_else(|| ProvmanError::NotFound(format!("no plugin owns {key:?}")))?;
        self.cache.set_meta(key, prop, value.to_string())
    }

    pub async fn get_meta(&mut self, key: &str, prop: &str, cancel: CancelSignal) -> ProvmanResult<String> {
        self.require_active()?;
        path::validate(key)?;
        self.ensure_synced(key, &cancel).await?;
        self.cache.get_meta(key, prop)
    }

    pub async fn set_multiple_meta(
        &mut self,
        entries: Vec<(String, String, String)>,
        cancel: CancelSignal,
    ) -> ProvmanResult<Vec<(String, String)>> {
        self.require_active()?;
        let mut failed = Vec::new();
        for (key, prop, value) in entries {
            match self.set_meta(&key, &prop, &value, cancel.clone()).await {
                Ok(()) => {}
                Err(ProvmanError::Cancelled) => return Err(ProvmanError::Cancelled),
                Err(_) => failed.push((key, prop)),
            }
        }
        Ok(failed)
    }

    pub async fn get_all_meta(
        &mut self,
        prefix: &str,
        cancel: CancelSignal,
    ) -> ProvmanResult<Vec<(String, String, String)>> {
        self.require_active()?;
        path::validate(prefix)?;
        self.ensure_synced(prefix, &cancel).await?;
        match self.cache.get_all_meta(prefix) {
            Ok(v) => Ok(v),
            Err(ProvmanError::NotFound(_)) => {
                if self.registry.owner_of(prefix).is_some() || self.registry.exists_inferred(prefix) {
                    Ok(Vec::new())
                } else {
                    Err(ProvmanError::NotFound(format!("no such path: {prefix}")))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Always legal, even outside a session (§4.6.1).
    pub fn get_type_info(&self, key: &str) -> ProvmanResult<String> {
        path::validate(key)?;
        if let Some(owner) = self.registry.owner_of(key) {
            let node = owner.schema().locate(key)?;
            Ok(node.describe())
        } else if self.registry.exists_inferred(key) {
            Ok("dir".to_string())
        } else {
            Err(ProvmanError::NotFound(format!("no such path: {key}")))
        }
    }

    /// Always legal, even outside a session (§4.6.1).
    pub fn get_children_type_info(&self, key: &str) -> ProvmanResult<HashMap<String, String>> {
        path::validate(key)?;
        if let Some(owner) = self.registry.owner_of(key) {
            let node = owner.schema().locate(key)?;
            match node {
                SchemaNode::Dir { children, .. } => Ok(children
                    .values()
                    .map(|child| (wildcard_name(child.name()), child.describe()))
                    .collect()),
                SchemaNode::Key { .. } => {
                    Err(ProvmanError::BadArgs(format!("{key} is a key, not a directory")))
                }
            }
        } else {
            let children = self.registry.direct_children(key);
            if children.is_empty() {
                Err(ProvmanError::NotFound(format!("no such directory: {key}")))
            } else {
                Ok(children.into_iter().map(|name| (name, "dir".to_string())).collect())
            }
        }
    }

    /// Always legal, even outside a session (§4.6.1).
    pub fn get_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Syncs out every touched plugin in registry order, writing its
    /// metadata through the metadata store, then returns to `Idle`. A
    /// sync-out error is logged and skipped; `End` still succeeds as a
    /// whole unless cancelled.
    pub async fn end(&mut self, cancel: CancelSignal) -> ProvmanResult<()> {
        self.require_active()?;
        for plugin in self.registry.plugins().to_vec() {
            let name = plugin.name().to_string();
            if !self.synced.contains(&name) {
                continue;
            }
            if cancel.is_cancelled() {
                self.reset_to_idle();
                return Err(ProvmanError::Cancelled);
            }
            let settings = self.cache.get_all(plugin.root()).unwrap_or_default();
            match plugin.sync_out(settings, cancel.clone()).await {
                Ok(()) => {}
                Err(ProvmanError::Cancelled) => {
                    self.reset_to_idle();
                    return Err(ProvmanError::Cancelled);
                }
                Err(e) => {
                    warn!(plugin = %name, error = %e, "sync-out failed, skipping");
                }
            }
            let meta = self.cache.get_all_meta(plugin.root()).unwrap_or_default();
            if let Some(store) = self.metadata_stores.get_mut(&name) {
                let mut snapshot: MetadataSnapshot = HashMap::new();
                for (path, prop, value) in meta {
                    snapshot.entry(path).or_default().insert(prop, value);
                }
                store.update(snapshot);
            }
        }
        info!(imsi = %self.imsi, "session ended");
        self.reset_to_idle();
        Ok(())
    }

    /// Infallible from the caller's perspective: discards the cache,
    /// calls each synced plugin's `abort` hook, and always returns to
    /// `Idle`.
    pub async fn abort(&mut self) {
        for name in self.synced.clone() {
            if let Some(plugin) = self.registry.plugins().iter().find(|p| p.name() == name) {
                plugin.abort().await;
            }
        }
        info!(imsi = %self.imsi, "session aborted");
        self.reset_to_idle();
    }
}
