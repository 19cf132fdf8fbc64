// ── Device change notifications ──
//
// Every reconciler publishes into one registry-wide broadcast channel.
// Subscriptions filter by device and skip over lag instead of failing.

use std::sync::Arc;

use soundlight_api::ConnectionState;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use crate::error::CommandError;
use crate::model::{DeviceId, StateChanges};

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEventKind {
    /// Fields whose value changed. `None` means the field became unknown.
    StateChanged(StateChanges),
    /// A tracked command failed; `reverted` lists the fields rolled back.
    CommandFailed {
        correlation_id: u32,
        error: CommandError,
        reverted: StateChanges,
    },
    Connectivity(ConnectionState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub device_id: DeviceId,
    pub kind: DeviceEventKind,
}

/// Live feed of device events. Dropping it unsubscribes.
pub struct Subscription {
    device: Option<DeviceId>,
    receiver: broadcast::Receiver<Arc<DeviceEvent>>,
}

impl Subscription {
    pub(crate) fn new(
        device: Option<DeviceId>,
        receiver: broadcast::Receiver<Arc<DeviceEvent>>,
    ) -> Self {
        Self { device, receiver }
    }

    /// The device this subscription is limited to, if any.
    pub fn device(&self) -> Option<&DeviceId> {
        self.device.as_ref()
    }

    /// Next matching event. `None` once the registry is gone.
    pub async fn recv(&mut self) -> Option<Arc<DeviceEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "device event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> impl Stream<Item = Arc<DeviceEvent>> + Send + Unpin {
        let device = self.device;
        BroadcastStream::new(self.receiver).filter_map(move |item| match item {
            Ok(event) if device.as_ref().is_none_or(|d| *d == event.device_id) => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "device event stream lagged");
                None
            }
        })
    }

    fn wants(&self, event: &DeviceEvent) -> bool {
        self.device.as_ref().is_none_or(|d| *d == event.device_id)
    }
}
