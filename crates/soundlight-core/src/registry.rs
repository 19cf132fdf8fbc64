// ── Device registry ──
//
// One entry per Sound + Light unit on the account. Each entry owns a
// transport task and a reconciler task under a shared cancellation token;
// removing the entry cancels both. DashMap guards are never held across an
// await: handles are cloned out first.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use dashmap::DashMap;
use soundlight_api::websocket::device_endpoint;
use soundlight_api::{Codec, ConnectionState, ControlIntent, DeviceConnection, DeviceInfo};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{CommandError, CoreError};
use crate::event::{DeviceEvent, DeviceEventKind, Subscription};
use crate::model::{DeviceId, DeviceSnapshot, DeviceState};
use crate::reconciler::{
    PendingCommand, Reconciler, ReconcilerRequest, ReconcilerSettings, ReconcilerTask,
};
use crate::session::SessionManager;

const COMMAND_CHANNEL_SIZE: usize = 32;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Devices added and removed by one `sync_devices` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<DeviceId>,
    pub removed: Vec<DeviceId>,
    pub total: usize,
}

struct DeviceEntry {
    info: DeviceInfo,
    connection: DeviceConnection,
    requests: mpsc::Sender<ReconcilerRequest>,
    state: watch::Receiver<Arc<DeviceState>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl DeviceEntry {
    fn snapshot(&self, id: &DeviceId) -> DeviceSnapshot {
        DeviceSnapshot {
            id: id.clone(),
            info: self.info.clone(),
            connection: self.connection.state(),
            state: self.state.borrow().clone(),
        }
    }
}

struct RegistryInner {
    session: SessionManager,
    tokens: Arc<SessionManager>,
    config: EngineConfig,
    devices: DashMap<DeviceId, DeviceEntry>,
    events: broadcast::Sender<Arc<DeviceEvent>>,
    cancel: CancellationToken,
    sync_lock: tokio::sync::Mutex<()>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to the set of account devices.
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl DeviceRegistry {
    pub fn new(session: SessionManager, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(RegistryInner {
                tokens: Arc::new(session.clone()),
                session,
                config,
                devices: DashMap::new(),
                events,
                cancel: CancellationToken::new(),
                sync_lock: tokio::sync::Mutex::new(()),
                poll_task: Mutex::new(None),
            }),
        }
    }

    // ── Discovery ────────────────────────────────────────────────────

    /// Reconcile the device set with the account's device list.
    pub async fn sync_devices(&self) -> Result<SyncReport, CoreError> {
        let _guard = self.inner.sync_lock.lock().await;
        let listed = self.inner.session.list_devices().await?;
        let listed_ids: HashSet<DeviceId> = listed.iter().map(DeviceId::from).collect();

        let mut report = SyncReport::default();

        let stale: Vec<DeviceId> = self
            .inner
            .devices
            .iter()
            .filter(|e| !listed_ids.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();
        for id in stale {
            self.remove_device(&id);
            report.removed.push(id);
        }

        for info in listed {
            let id = DeviceId::from(&info);
            if let Some(mut entry) = self.inner.devices.get_mut(&id) {
                entry.info = info;
                continue;
            }
            let entry = self.spawn_device(&id, info)?;
            self.inner.devices.insert(id.clone(), entry);
            report.added.push(id);
        }

        report.total = self.inner.devices.len();
        info!(
            total = report.total,
            added = report.added.len(),
            removed = report.removed.len(),
            "device list synchronized"
        );
        Ok(report)
    }

    /// Re-sync the device list every `device_poll_interval_secs`. No-op
    /// when the interval is 0 or a poll task is already running.
    pub fn spawn_device_poll(&self) {
        let secs = self.inner.config.device_poll_interval_secs;
        if secs == 0 {
            return;
        }
        let mut slot = self
            .inner
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();
        let every = Duration::from_secs(secs);
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let registry = DeviceRegistry { inner };
                if let Err(e) = registry.sync_devices().await {
                    warn!(error = %e, "periodic device sync failed");
                }
            }
            debug!("device poll task exiting");
        }));
    }

    fn spawn_device(&self, id: &DeviceId, info: DeviceInfo) -> Result<DeviceEntry, CoreError> {
        let config = &self.inner.config;
        let cancel = self.inner.cancel.child_token();
        let endpoint = device_endpoint(&config.ws_base, id.as_str())?;
        let codec = Codec::new();

        let (transport_tx, transport_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (connection, connection_task) = DeviceConnection::spawn(
            id.to_string(),
            endpoint,
            config.connection.clone(),
            Arc::clone(&self.inner.tokens),
            codec.clone(),
            transport_tx,
            cancel.clone(),
        )?;

        let (requests_tx, requests_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (state_tx, state_rx) = watch::channel(Arc::new(DeviceState::default()));
        let task = ReconcilerTask {
            device_id: id.clone(),
            reconciler: Reconciler::new(
                codec,
                ReconcilerSettings {
                    command_timeout: config.command_timeout,
                    queue_depth: config.command_queue_depth,
                },
            ),
            sink: connection.clone(),
            requests: requests_rx,
            transport: transport_rx,
            state: state_tx,
            events: self.inner.events.clone(),
            poll_interval: config.state_poll_interval,
            cancel: cancel.clone(),
        };
        let reconciler_task = tokio::spawn(task.run());

        info!(device_id = %id, name = %info.speaker_name, "device added");
        Ok(DeviceEntry {
            info,
            connection,
            requests: requests_tx,
            state: state_rx,
            cancel,
            tasks: vec![connection_task, reconciler_task],
        })
    }

    fn remove_device(&self, id: &DeviceId) {
        let Some((_, entry)) = self.inner.devices.remove(id) else {
            return;
        };
        info!(device_id = %id, "device removed");
        entry.cancel.cancel();
        let _ = self.inner.events.send(Arc::new(DeviceEvent {
            device_id: id.clone(),
            kind: DeviceEventKind::Connectivity(ConnectionState::Disconnected),
        }));
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Hand `intent` to the device's reconciler. Returns once it has been
    /// applied optimistically and sent or queued.
    pub async fn issue_command(
        &self,
        id: &DeviceId,
        intent: ControlIntent,
    ) -> Result<PendingCommand, CoreError> {
        let requests = self.with_entry(id, |e| e.requests.clone())?;
        let (reply, response) = oneshot::channel();
        requests
            .send(ReconcilerRequest::Issue { intent, reply })
            .await
            .map_err(|_| CommandError::Cancelled)?;
        let command = response.await.map_err(|_| CommandError::Cancelled)??;
        Ok(command)
    }

    /// Commands not yet acknowledged: in flight first, then queued.
    pub async fn pending_commands(&self, id: &DeviceId) -> Result<Vec<PendingCommand>, CoreError> {
        let requests = self.with_entry(id, |e| e.requests.clone())?;
        let (reply, response) = oneshot::channel();
        requests
            .send(ReconcilerRequest::Pending { reply })
            .await
            .map_err(|_| CommandError::Cancelled)?;
        Ok(response.await.map_err(|_| CommandError::Cancelled)?)
    }

    /// Ask the device for a full state report. Returns the poll's request id.
    pub fn request_state(&self, id: &DeviceId) -> Result<u32, CoreError> {
        let connection = self.with_entry(id, |e| e.connection.clone())?;
        Ok(connection.request_state()?)
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Events for one device.
    pub fn subscribe(&self, id: &DeviceId) -> Result<Subscription, CoreError> {
        self.with_entry(id, |_| ())?;
        Ok(Subscription::new(
            Some(id.clone()),
            self.inner.events.subscribe(),
        ))
    }

    /// Events for every device, including ones added later.
    pub fn subscribe_all(&self) -> Subscription {
        Subscription::new(None, self.inner.events.subscribe())
    }

    /// All devices, ordered by name.
    pub fn devices(&self) -> Vec<DeviceSnapshot> {
        let mut all: Vec<DeviceSnapshot> = self
            .inner
            .devices
            .iter()
            .map(|e| e.value().snapshot(e.key()))
            .collect();
        all.sort_by(|a, b| {
            a.info
                .speaker_name
                .cmp(&b.info.speaker_name)
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    pub fn device(&self, id: &DeviceId) -> Option<DeviceSnapshot> {
        self.inner.devices.get(id).map(|e| e.snapshot(id))
    }

    pub fn device_state(&self, id: &DeviceId) -> Option<Arc<DeviceState>> {
        self.inner.devices.get(id).map(|e| e.state.borrow().clone())
    }

    /// Watch of a device's canonical state.
    pub fn watch_state(&self, id: &DeviceId) -> Option<watch::Receiver<Arc<DeviceState>>> {
        self.inner.devices.get(id).map(|e| e.state.clone())
    }

    pub fn connection_state(&self, id: &DeviceId) -> Option<ConnectionState> {
        self.inner.devices.get(id).map(|e| e.connection.state())
    }

    /// Watch of a device's connection state.
    pub fn watch_connection(&self, id: &DeviceId) -> Option<watch::Receiver<ConnectionState>> {
        self.inner.devices.get(id).map(|e| e.connection.watch_state())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn len(&self) -> usize {
        self.inner.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.devices.is_empty()
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Tear down every device and wait briefly for the tasks to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let poll = self
            .inner
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let ids: Vec<DeviceId> = self.inner.devices.iter().map(|e| e.key().clone()).collect();
        let mut handles: Vec<JoinHandle<()>> = poll.into_iter().collect();
        for id in ids {
            if let Some((_, entry)) = self.inner.devices.remove(&id) {
                entry.cancel.cancel();
                handles.extend(entry.tasks);
            }
        }

        let joined = tokio::time::timeout(
            SHUTDOWN_GRACE,
            futures_util::future::join_all(handles),
        )
        .await;
        if joined.is_err() {
            warn!("device tasks did not stop in time");
        }
        info!("device registry shut down");
    }

    fn with_entry<R>(
        &self,
        id: &DeviceId,
        f: impl FnOnce(&DeviceEntry) -> R,
    ) -> Result<R, CoreError> {
        self.inner
            .devices
            .get(id)
            .map(|e| f(e.value()))
            .ok_or_else(|| CoreError::DeviceNotFound {
                device_id: id.to_string(),
            })
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.inner.devices.len())
            .finish_non_exhaustive()
    }
}
