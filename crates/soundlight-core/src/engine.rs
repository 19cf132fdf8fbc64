// ── Engine facade ──
//
// Bundles the session manager and the device registry for hosts that want
// one handle. Cheap to clone.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::registry::{DeviceRegistry, SyncReport};
use crate::session::{SessionManager, TokenStore};

#[derive(Debug, Clone)]
pub struct Engine {
    session: SessionManager,
    registry: DeviceRegistry,
}

impl Engine {
    /// Build the engine. Nothing connects until a session exists and
    /// [`start`](Self::start) is called.
    pub fn new(config: EngineConfig, store: Arc<dyn TokenStore>) -> Result<Self, CoreError> {
        let session = SessionManager::new(&config, store)?;
        Ok(Self::from_parts(session, config))
    }

    /// Use an existing session manager (e.g. one pointed at a test server).
    pub fn from_parts(session: SessionManager, config: EngineConfig) -> Self {
        let registry = DeviceRegistry::new(session.clone(), config);
        Self { session, registry }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Discover devices, connect to them, and start periodic re-sync.
    pub async fn start(&self) -> Result<SyncReport, CoreError> {
        let report = self.registry.sync_devices().await?;
        self.registry.spawn_device_poll();
        Ok(report)
    }

    /// Tear down every device connection. The session stays as it is.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
