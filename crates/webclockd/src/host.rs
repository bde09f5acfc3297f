//! The host (browser) as seen by the tracker.
//!
//! The tracker never trusts event payloads for target metadata; it asks
//! the [`Host`] at the moment it processes a signal. In the daemon the
//! host is a [`HostMirror`]: a copy of the latest state reported by the
//! browser bridge over the socket.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use webclock_core::settings::DEFAULT_IDLE_TIMEOUT_SECS;
use webclock_core::{TargetId, WindowId};

/// Buffer size of the directive channel.
const DIRECTIVE_BUFFER: usize = 16;

/// Metadata of one target as last reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub id: TargetId,
    pub window_id: Option<WindowId>,
    /// Loaded resource; `None` while the host has not reported one
    pub resource: Option<String>,
}

/// Lookups and reconfiguration the tracker needs from the host.
#[async_trait]
pub trait Host: Send + Sync {
    /// Metadata for a target, if it still exists.
    async fn target(&self, id: &TargetId) -> Option<TargetInfo>;

    /// The active target of a window.
    async fn active_target(&self, window: &WindowId) -> Option<TargetInfo>;

    /// The active target of the focused window.
    async fn focused_target(&self) -> Option<TargetInfo>;

    /// Reconfigures the host's idle detector.
    async fn set_idle_threshold(&self, seconds: u64);
}

/// Instructions pushed to connected host bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostDirective {
    SetIdleThreshold { seconds: u64 },
}

#[derive(Debug)]
struct MirrorState {
    targets: HashMap<TargetId, TargetInfo>,
    active_by_window: HashMap<WindowId, TargetId>,
    focused_window: Option<WindowId>,
    idle_threshold: u64,
}

/// Last reported host state, shared between connections and the tracker.
pub struct HostMirror {
    state: RwLock<MirrorState>,
    directives: broadcast::Sender<HostDirective>,
}

impl Default for HostMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMirror {
    pub fn new() -> Self {
        let (directives, _) = broadcast::channel(DIRECTIVE_BUFFER);
        Self {
            state: RwLock::new(MirrorState {
                targets: HashMap::new(),
                active_by_window: HashMap::new(),
                focused_window: None,
                idle_threshold: DEFAULT_IDLE_TIMEOUT_SECS,
            }),
            directives,
        }
    }

    /// Subscribes to directives for host bridges.
    pub fn subscribe(&self) -> broadcast::Receiver<HostDirective> {
        self.directives.subscribe()
    }

    /// The idle threshold most recently requested by the tracker.
    pub async fn idle_threshold(&self) -> u64 {
        self.state.read().await.idle_threshold
    }

    /// A target became active in a window, and that window has focus.
    ///
    /// A missing `resource` keeps whatever was reported before.
    pub async fn target_focused(
        &self,
        target_id: TargetId,
        window_id: WindowId,
        resource: Option<String>,
    ) {
        let mut state = self.state.write().await;
        let entry = state
            .targets
            .entry(target_id.clone())
            .or_insert_with(|| TargetInfo {
                id: target_id.clone(),
                window_id: None,
                resource: None,
            });
        entry.window_id = Some(window_id.clone());
        if resource.is_some() {
            entry.resource = resource;
        }
        state.active_by_window.insert(window_id.clone(), target_id);
        state.focused_window = Some(window_id);
    }

    /// A target navigated.
    pub async fn target_updated(&self, target_id: TargetId, resource: String) {
        let mut state = self.state.write().await;
        state
            .targets
            .entry(target_id.clone())
            .and_modify(|t| t.resource = Some(resource.clone()))
            .or_insert_with(|| TargetInfo {
                id: target_id,
                window_id: None,
                resource: Some(resource),
            });
    }

    /// A target was closed.
    pub async fn target_removed(&self, target_id: &TargetId) {
        let mut state = self.state.write().await;
        state.targets.remove(target_id);
        state.active_by_window.retain(|_, active| active != target_id);
    }

    /// Window focus moved, or left the host entirely.
    pub async fn window_focus_changed(&self, window_id: Option<WindowId>) {
        self.state.write().await.focused_window = window_id;
    }
}

#[async_trait]
impl Host for HostMirror {
    async fn target(&self, id: &TargetId) -> Option<TargetInfo> {
        self.state.read().await.targets.get(id).cloned()
    }

    async fn active_target(&self, window: &WindowId) -> Option<TargetInfo> {
        let state = self.state.read().await;
        state
            .active_by_window
            .get(window)
            .and_then(|id| state.targets.get(id))
            .cloned()
    }

    async fn focused_target(&self) -> Option<TargetInfo> {
        let state = self.state.read().await;
        state
            .focused_window
            .as_ref()
            .and_then(|w| state.active_by_window.get(w))
            .and_then(|id| state.targets.get(id))
            .cloned()
    }

    async fn set_idle_threshold(&self, seconds: u64) {
        self.state.write().await.idle_threshold = seconds;
        // No receivers just means no bridge is connected yet.
        if self
            .directives
            .send(HostDirective::SetIdleThreshold { seconds })
            .is_err()
        {
            debug!(seconds, "No host bridge subscribed for idle threshold");
        }
    }
}
