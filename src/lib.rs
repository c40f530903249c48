//! Provman — a session-coordinated settings broker that mediates
//! between device-management clients and heterogeneous OS configuration
//! stores via plugins.
//!
//! [`SettingsEngine`] is the crate's public, transport-agnostic surface:
//! one async method per row of the `Settings` interface, gated by a
//! [`ClientId`] the embedder supplies to identify the connection issuing
//! each request.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod gate;
pub mod manager;
pub mod metadata_store;
pub mod path;
pub mod plugins;
pub mod registry;
pub mod schema;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

pub use cancel::CancelSignal;
pub use config::{ProvmanConfig, Scope};
pub use error::{ProvmanError, ProvmanResult};
pub use gate::ClientId;
pub use registry::{Plugin, PluginRegistry, SyncInResult};

use gate::Gate;
use manager::PluginManager;

pub struct SettingsEngine {
    gate: Gate,
    manager: Mutex<PluginManager>,
}

impl SettingsEngine {
    pub fn new(registry: PluginRegistry, data_dir: PathBuf, idle_timeout: Duration) -> Self {
        Self {
            gate: Gate::new(idle_timeout),
            manager: Mutex::new(PluginManager::new(Arc::new(registry), data_dir)),
        }
    }

    // ─── Always legal, no session required (§4.6.1) ──────────────────

    pub async fn get_version(&self) -> &'static str {
        self.manager.lock().await.get_version()
    }

    pub async fn get_type_info(&self, key: &str) -> ProvmanResult<String> {
        self.manager.lock().await.get_type_info(key)
    }

    pub async fn get_children_type_info(&self, key: &str) -> ProvmanResult<HashMap<String, String>> {
        self.manager.lock().await.get_children_type_info(key)
    }

    // ─── Session lifecycle ────────────────────────────────────────────

    pub async fn start(&self, client: ClientId, imsi: impl Into<String>) -> ProvmanResult<()> {
        self.gate.start(client).await?;
        self.manager.lock().await.start(imsi);
        Ok(())
    }

    pub async fn end(&self, client: ClientId, cancel: CancelSignal) -> ProvmanResult<()> {
        self.gate.require_holder(&client).await?;
        let result = self.manager.lock().await.end(cancel).await;
        self.gate.release(&client).await;
        result
    }

    pub async fn abort(&self, client: ClientId) -> ProvmanResult<()> {
        self.gate.require_holder(&client).await?;
        self.manager.lock().await.abort().await;
        self.gate.release(&client).await;
        Ok(())
    }

    /// Synthesises an `End`-equivalent sync-out when a client's
    /// transport connection disappears mid-session (§4.7.2). Errors are
    /// swallowed; the gate is always released so the next waiter, if
    /// any, is admitted.
    pub async fn client_died(&self, client: ClientId) {
        if self.gate.require_holder(&client).await.is_ok() {
            if let Err(e) = self.manager.lock().await.end(CancelSignal::new()).await {
                warn!(client = %client, error = %e, "sync-out on client death failed, discarding session");
                self.manager.lock().await.abort().await;
            }
            self.gate.release(&client).await;
        }
    }

    pub async fn wait_for_idle_shutdown(&self) {
        self.gate.wait_for_idle_shutdown().await;
    }

    // ─── Settings operations — require an active session ──────────────

    pub async fn set(&self, client: ClientId, key: &str, value: &str, cancel: CancelSignal) -> ProvmanResult<()> {
        self.gate.require_holder(&client).await?;
        self.manager.lock().await.set(key, value, cancel).await
    }

    pub async fn set_multiple(
        &self,
        client: ClientId,
        entries: Vec<(String, String)>,
        cancel: CancelSignal,
    ) -> ProvmanResult<Vec<String>> {
        self.gate.require_holder(&client).await?;
        self.manager.lock().await.set_multiple(entries, cancel).await
    }

    pub async fn get(&self, client: ClientId, key: &str, cancel: CancelSignal) -> ProvmanResult<String> {
        self.gate.require_holder(&client).await?;
        self.manager.lock().await.get(key, cancel).await
    }

    pub async fn get_multiple(
        &self,
        client: ClientId,
        keys: Vec<String>,
        cancel: CancelSignal,
    ) -> ProvmanResult<HashMap<String, String>> {
        self.gate.require_holder(&client).await?;
        self.manager.lock().await.get_multiple(keys, cancel).await
    }

    pub async fn get_all(&self, client: ClientId, prefix: &str, cancel: CancelSignal) -> ProvmanResult<HashMap<String, String>> {
        self.gate.require_holder(&client).await?;
        self.manager.lock().await.get_all(prefix, cancel).await
    }

    pub async fn delete(&self, client: ClientId, key: &str, cancel: CancelSignal) -> ProvmanResult<()> {
        self.gate.require_holder(&client).await?;
        self.manager.lock().await.delete(key, cancel).await
    }

    pub async fn delete_multiple(
        &self,
        client: ClientId,
        keys: Vec<String>,
        cancel: CancelSignal,
    ) -> ProvmanResult<Vec<String>> {
        self.gate.require_holder(&client).await?;
        self.manager.lock().await.delete_multiple(keys, cancel).await
    }

    pub async fn set_meta(
        &self,
        client: ClientId,
        key: &str,
        prop: &str,
        value: &str,
        cancel: CancelSignal,
    ) -> ProvmanResult<()> {
        self.gate.require_holder(&client).await?;
        self.manager.lock().await.set_meta(key, prop, value, cancel).await
    }

    pub async fn get_meta(&self, client: ClientId, key: &str, prop: &str, cancel: CancelSignal) -> ProvmanResult<String> {
        self.gate.require_holder(&client).await?;
        self.manager.lock().await.get_meta(key, prop, cancel).await
    }

    pub async fn set_multiple_meta(
        &self,
        client: ClientId,
        entries: Vec<(String, String, String)>,
        cancel: CancelSignal,
    ) -> ProvmanResult<Vec<(String, String)>> {
        self.gate.require_holder(&client).await?;
        self.manager.lock().await.set_multiple_meta(entries, cancel).await
    }

    pub async fn get_all_meta(
        &self,
        client: ClientId,
        prefix: &str,
        cancel: CancelSignal,
    ) -> ProvmanResult<Vec<(String, String, String)>> {
        self.gate.require_holder(&client).await?;
        self.manager.lock().await.get_all_meta(prefix, cancel).await
    }
}
