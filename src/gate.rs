//! Task Queue / Session Gate (C7) — single holder, FIFO waiters, and the
//! idle-shutdown timer. Serialises admission into an active session;
//! serialising the plugin operations *within* a session is a property of
//! the single task that owns the `PluginManager` (§5), not of the gate.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tracing::info;

use crate::error::{ProvmanError, ProvmanResult};

/// Identifies the transport connection issuing requests, for session
/// gating purposes only — this crate is transport-agnostic about what a
/// "client" actually is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Waiter {
    client: ClientId,
    admit: oneshot::Sender<()>,
}

#[derive(Default)]
struct GateState {
    holder: Option<ClientId>,
    waiters: VecDeque<Waiter>,
}

impl GateState {
    fn is_idle(&self) -> bool {
        self.holder.is_none() && self.waiters.is_empty()
    }
}

pub struct Gate {
    state: Mutex<GateState>,
    idle_timeout: Duration,
}

impl Gate {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            idle_timeout,
        }
    }

    /// Admits `client` as the session holder, or queues it FIFO behind
    /// the current holder. Resolves once this client becomes holder.
    pub async fn start(&self, client: ClientId) -> ProvmanResult<()> {
        let pending = {
            let mut state = self.state.lock().await;
            if state.holder.as_ref() == Some(&client)
                || state.waiters.iter().any(|w| w.client == client)
            {
                return Err(ProvmanError::Unexpected(format!(
                    "{client} already has an active or queued session"
                )));
            }
            if state.holder.is_none() {
                state.holder = Some(client.clone());
                info!(client = %client, "session holder acquired");
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(Waiter {
                    client: client.clone(),
                    admit: tx,
                });
                info!(client = %client, queue_len = state.waiters.len(), "session queued");
                Some(rx)
            }
        };
        if let Some(rx) = pending {
            rx.await.map_err(|_| ProvmanError::Died)?;
        }
        Ok(())
    }

    /// Fails with `Unexpected` unless `client` currently holds the gate.
    pub async fn require_holder(&self, client: &ClientId) -> ProvmanResult<()> {
        let state = self.state.lock().await;
        if state.holder.as_ref() == Some(client) {
            Ok(())
        } else {
            Err(ProvmanError::Unexpected(
                "no active session for this client".to_string(),
            ))
        }
    }

    /// Releases the gate on `End`/`Abort`/client-death, admitting the
    /// next FIFO waiter if any. A no-op if `client` is not the holder.
    pub async fn release(&self, client: &ClientId) {
        let mut state = self.state.lock().await;
        if state.holder.as_ref() != Some(client) {
            return;
        }
        state.holder = None;
        if let Some(next) = state.waiters.pop_front() {
            info!(client = %next.client, "admitting queued session");
            state.holder = Some(next.client);
            let _ = next.admit.send(());
        }
    }

    pub async fn is_idle(&self) -> bool {
        self.state.lock().await.is_idle()
    }

    /// Resolves once the gate has had no holder and no waiters for a
    /// continuous `idle_timeout` window. Intended to be raced via
    /// `tokio::select!` against the request loop so any activity in
    /// between simply causes another full wait.
    pub async fn wait_for_idle_shutdown(&self) {
        loop {
            tokio::time::sleep(self.idle_timeout).await;
            if self.is_idle().await {
                return;
            }
        }
    }
}
