// ── Per-device reconciler actor ──
//
// Serializes everything that touches one device's state: transport events,
// host intents, command deadlines, and the periodic state poll.

use std::sync::Arc;
use std::time::Duration;

use soundlight_api::{ConnectionState, ControlIntent, TransportEvent};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{FrameSink, PendingCommand, Reconciler};
use crate::error::CodecError;
use crate::event::{DeviceEvent, DeviceEventKind};
use crate::model::{DeviceId, DeviceState};

/// Requests from the registry to a reconciler actor.
pub(crate) enum ReconcilerRequest {
    Issue {
        intent: ControlIntent,
        reply: oneshot::Sender<Result<PendingCommand, CodecError>>,
    },
    Pending {
        reply: oneshot::Sender<Vec<PendingCommand>>,
    },
}

pub(crate) struct ReconcilerTask<S> {
    pub device_id: DeviceId,
    pub reconciler: Reconciler,
    pub sink: S,
    pub requests: mpsc::Receiver<ReconcilerRequest>,
    pub transport: mpsc::Receiver<TransportEvent>,
    pub state: watch::Sender<Arc<DeviceState>>,
    pub events: broadcast::Sender<Arc<DeviceEvent>>,
    pub poll_interval: Option<Duration>,
    pub cancel: CancellationToken,
}

/// Something the sink can poll the device with.
pub(crate) trait StatePoll {
    fn poll_state(&self);
}

impl StatePoll for soundlight_api::DeviceConnection {
    fn poll_state(&self) {
        if let Err(e) = self.request_state() {
            debug!(device_id = %self.device_id(), error = %e, "state poll skipped");
        }
    }
}

impl<S: FrameSink + StatePoll + Send + 'static> ReconcilerTask<S> {
    pub async fn run(mut self) {
        let mut poll = self.poll_interval.map(|every| {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            let deadline = self.reconciler.next_deadline();
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                event = self.transport.recv() => match event {
                    Some(event) => self.on_transport(event),
                    None => break,
                },
                request = self.requests.recv() => match request {
                    Some(request) => self.on_request(request),
                    None => break,
                },
                () = sleep_until(deadline) => {
                    let events = self.reconciler.check_timeouts(Instant::now(), &self.sink);
                    self.publish(events);
                }
                () = tick(poll.as_mut()) => {
                    if self.reconciler.is_connected() {
                        self.sink.poll_state();
                    }
                }
            }
        }

        let events = self.reconciler.cancel_all();
        self.publish(events);
        debug!(device_id = %self.device_id, "reconciler task exiting");
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => {
                match state {
                    ConnectionState::Connected => {
                        info!(device_id = %self.device_id, "device connected");
                        self.reconciler.on_connected(&self.sink, Instant::now());
                    }
                    _ if self.reconciler.is_connected() => {
                        let events = self.reconciler.on_disconnected();
                        self.publish(events);
                    }
                    _ => {}
                }
                self.publish(vec![DeviceEventKind::Connectivity(state)]);
            }
            TransportEvent::Frame(fragment) => {
                if !fragment.unknown_tracks.is_empty() {
                    debug!(
                        device_id = %self.device_id,
                        tracks = ?fragment.unknown_tracks,
                        "device reported unknown sound tracks"
                    );
                }
                let events = self.reconciler.apply_fragment(&fragment);
                self.publish(events);
            }
        }
    }

    fn on_request(&mut self, request: ReconcilerRequest) {
        match request {
            ReconcilerRequest::Issue { intent, reply } => {
                let result = self
                    .reconciler
                    .apply_local_intent(intent, &self.sink, Instant::now())
                    .map(|(command, events)| {
                        self.publish(events);
                        command
                    });
                // Caller may have given up waiting.
                let _ = reply.send(result);
            }
            ReconcilerRequest::Pending { reply } => {
                let _ = reply.send(self.reconciler.pending().cloned().collect());
            }
        }
    }

    fn publish(&self, events: Vec<DeviceEventKind>) {
        if events
            .iter()
            .any(|e| !matches!(e, DeviceEventKind::Connectivity(_)))
        {
            self.state.send_if_modified(|current| {
                if **current == *self.reconciler.state() {
                    false
                } else {
                    *current = Arc::new(self.reconciler.state().clone());
                    true
                }
            });
        }
        for kind in events {
            // No subscribers is fine.
            let _ = self.events.send(Arc::new(DeviceEvent {
                device_id: self.device_id.clone(),
                kind,
            }));
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
