// ── State reconciler ──
//
// Owns the canonical state of one device. Local intents are applied
// optimistically and tracked until the device acknowledges them by
// correlation id; reports from the device merge field by field in receipt
// order. The `Reconciler` itself does no I/O and never sleeps: the actor in
// `task` feeds it transport events, intents, and the clock.

mod task;

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use soundlight_api::codec::{Codec, ControlIntent, StateFragment};
use soundlight_api::DeviceConnection;
use tokio::time::Instant;

use crate::error::{CodecError, CommandError, TransportError};
use crate::event::DeviceEventKind;
use crate::model::state::fragment_fields;
use crate::model::{DeviceState, Field, FieldValue, StateChanges};

pub(crate) use task::{ReconcilerRequest, ReconcilerTask};

// ── Outbound seam ────────────────────────────────────────────────────

/// Where encoded command frames go.
pub trait FrameSink {
    fn send_frame(&self, frame: Bytes) -> Result<(), TransportError>;
}

impl FrameSink for DeviceConnection {
    fn send_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        self.send(frame).map_err(|e| match e {
            soundlight_api::Error::NotConnected => TransportError::NotConnected,
            other => TransportError::SendFailed(other.to_string()),
        })
    }
}

// ── Pending commands ─────────────────────────────────────────────────

/// A control intent that has not been acknowledged yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    /// Request id of the first transmission. Stable across resends.
    pub correlation_id: u32,
    pub intent: ControlIntent,
    /// Target fields and the values the intent asks for.
    pub desired: Vec<(Field, FieldValue)>,
    pub issued_at: Instant,
    pub retries: u32,
}

impl PendingCommand {
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.desired.iter().map(|(f, _)| *f)
    }

    fn desired(&self, field: Field) -> Option<&FieldValue> {
        self.desired
            .iter()
            .find_map(|(f, v)| (*f == field).then_some(v))
    }
}

#[derive(Debug)]
struct Tracked {
    /// Issue order.
    seq: u64,
    command: PendingCommand,
    /// Every request id this command went out under.
    wire_ids: Vec<u32>,
    bytes: Bytes,
    deadline: Instant,
}

impl Tracked {
    fn answers_to(&self, id: u32) -> bool {
        self.wire_ids.contains(&id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerSettings {
    pub command_timeout: Duration,
    pub queue_depth: usize,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
            queue_depth: 16,
        }
    }
}

// ── Reconciler ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Reconciler {
    codec: Codec,
    settings: ReconcilerSettings,
    /// Last values the device reported or acknowledged.
    confirmed: DeviceState,
    /// `confirmed` overlaid with optimistic values.
    state: DeviceState,
    /// Sent, awaiting acknowledgement. Issue order.
    inflight: VecDeque<Tracked>,
    /// Not sent yet (disconnected). Issue order.
    queued: VecDeque<Tracked>,
    connected: bool,
    next_seq: u64,
}

impl Reconciler {
    pub fn new(codec: Codec, settings: ReconcilerSettings) -> Self {
        Self {
            codec,
            settings,
            confirmed: DeviceState::default(),
            state: DeviceState::default(),
            inflight: VecDeque::new(),
            queued: VecDeque::new(),
            connected: false,
            next_seq: 0,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn confirmed(&self) -> &DeviceState {
        &self.confirmed
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Pending commands, sent ones first, each group in issue order.
    pub fn pending(&self) -> impl Iterator<Item = &PendingCommand> {
        self.inflight.iter().chain(&self.queued).map(|t| &t.command)
    }

    /// Earliest command deadline, if anything is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inflight
            .iter()
            .chain(&self.queued)
            .map(|t| t.deadline)
            .min()
    }

    /// Encode `intent`, apply it optimistically, and send or queue it.
    pub fn apply_local_intent<S: FrameSink>(
        &mut self,
        intent: ControlIntent,
        sink: &S,
        now: Instant,
    ) -> Result<(PendingCommand, Vec<DeviceEventKind>), CodecError> {
        let encoded = self.codec.encode(&intent)?;
        let desired = fragment_fields(&intent.expected_state());

        let mut events = Vec::new();
        let mut changes = StateChanges::default();
        for (field, value) in &desired {
            self.state.apply(*field, Some(value.clone()), &mut changes);
        }
        if !changes.is_empty() {
            events.push(DeviceEventKind::StateChanged(changes));
        }

        let command = PendingCommand {
            correlation_id: encoded.correlation_id,
            intent,
            desired,
            issued_at: now,
            retries: 0,
        };
        let tracked = Tracked {
            seq: self.next_seq,
            command: command.clone(),
            wire_ids: vec![encoded.correlation_id],
            bytes: encoded.bytes,
            deadline: now + self.settings.command_timeout,
        };
        self.next_seq += 1;

        tracing::debug!(
            correlation_id = command.correlation_id,
            intent = intent.name(),
            connected = self.connected,
            "issuing command"
        );

        // Earlier queued commands go first.
        let sent = self.connected
            && self.queued.is_empty()
            && match sink.send_frame(tracked.bytes.clone()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(error = %e, "send failed, queueing command");
                    false
                }
            };
        if sent {
            self.inflight.push_back(tracked);
        } else {
            events.extend(self.enqueue(tracked));
        }
        Ok((command, events))
    }

    /// Merge a decoded fragment.
    pub fn apply_fragment(&mut self, fragment: &StateFragment) -> Vec<DeviceEventKind> {
        let fields = fragment_fields(fragment);
        let acked = fragment.correlation_id.and_then(|id| self.take_tracked(id));

        let mut events = Vec::new();
        let mut changes = StateChanges::default();

        match acked {
            Some(tracked) if fragment.rejection.is_some() => {
                self.merge_report(&fields, &mut changes);
                if !changes.is_empty() {
                    events.push(DeviceEventKind::StateChanged(std::mem::take(&mut changes)));
                }
                let (status_code, message) = fragment
                    .rejection
                    .as_ref()
                    .map(|r| (r.status_code, r.message.clone()))
                    .unwrap_or_default();
                tracing::warn!(
                    correlation_id = tracked.command.correlation_id,
                    status_code,
                    "device rejected command"
                );
                events.extend(self.fail(
                    tracked,
                    CommandError::Rejected {
                        status_code,
                        message,
                    },
                ));
                return events;
            }
            Some(tracked) => {
                tracing::debug!(
                    correlation_id = tracked.command.correlation_id,
                    "command acknowledged"
                );
                self.merge_ack(&tracked, &fields, &mut changes);
            }
            None => {
                if let Some(rejection) = &fragment.rejection {
                    tracing::debug!(
                        correlation_id = ?fragment.correlation_id,
                        status_code = rejection.status_code,
                        "rejection for an unknown request"
                    );
                }
                self.merge_report(&fields, &mut changes);
            }
        }

        if !changes.is_empty() {
            events.push(DeviceEventKind::StateChanged(changes));
        }
        events
    }

    /// Resend or fail commands whose deadline has passed.
    pub fn check_timeouts<S: FrameSink>(&mut self, now: Instant, sink: &S) -> Vec<DeviceEventKind> {
        let mut exhausted = Vec::new();

        let (expired, waiting): (Vec<_>, Vec<_>) =
            self.inflight.drain(..).partition(|t| t.deadline <= now);
        self.inflight = waiting.into();
        for mut tracked in expired {
            if tracked.command.retries > 0 {
                exhausted.push(tracked);
                continue;
            }
            tracked.command.retries += 1;
            tracked.deadline = now + self.settings.command_timeout;
            match self.codec.encode(&tracked.command.intent) {
                Ok(encoded) => {
                    tracked.wire_ids.push(encoded.correlation_id);
                    tracked.bytes = encoded.bytes;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "re-encode failed, resending original frame");
                }
            }
            tracing::debug!(
                correlation_id = tracked.command.correlation_id,
                "command timed out, resending once"
            );
            let resent = self.connected && sink.send_frame(tracked.bytes.clone()).is_ok();
            if resent {
                insert_ordered(&mut self.inflight, tracked);
            } else {
                insert_ordered(&mut self.queued, tracked);
            }
        }

        let (expired, waiting): (Vec<_>, Vec<_>) =
            self.queued.drain(..).partition(|t| t.deadline <= now);
        self.queued = waiting.into();
        for mut tracked in expired {
            if tracked.command.retries > 0 {
                exhausted.push(tracked);
            } else {
                tracked.command.retries += 1;
                tracked.deadline = now + self.settings.command_timeout;
                insert_ordered(&mut self.queued, tracked);
            }
        }

        // Survivors are back in place, so rollbacks see their values.
        exhausted.sort_by_key(|t| t.seq);
        exhausted
            .into_iter()
            .flat_map(|t| self.fail(t, CommandError::Timeout))
            .collect()
    }

    /// Connection (re)established: replay queued commands in issue order.
    pub fn on_connected<S: FrameSink>(&mut self, sink: &S, now: Instant) {
        self.connected = true;
        let mut replayed = 0usize;
        while let Some(mut tracked) = self.queued.pop_front() {
            if let Err(e) = sink.send_frame(tracked.bytes.clone()) {
                tracing::debug!(error = %e, "replay interrupted");
                self.queued.push_front(tracked);
                break;
            }
            tracked.deadline = now + self.settings.command_timeout;
            self.inflight.push_back(tracked);
            replayed += 1;
        }
        if replayed > 0 {
            tracing::info!(replayed, "replayed queued commands");
        }
    }

    /// Connection lost: unacknowledged commands go back to the queue, which
    /// stays within its depth.
    pub fn on_disconnected(&mut self) -> Vec<DeviceEventKind> {
        self.connected = false;
        while let Some(tracked) = self.inflight.pop_back() {
            insert_ordered(&mut self.queued, tracked);
        }
        self.trim_queue()
    }

    /// Teardown: fail everything with `Cancelled`.
    pub fn cancel_all(&mut self) -> Vec<DeviceEventKind> {
        let mut all: Vec<Tracked> = self.inflight.drain(..).chain(self.queued.drain(..)).collect();
        all.sort_by_key(|t| t.seq);
        let mut events = Vec::new();
        for tracked in all {
            events.extend(self.fail(tracked, CommandError::Cancelled));
        }
        events
    }

    // ── Internals ────────────────────────────────────────────────────

    fn enqueue(&mut self, tracked: Tracked) -> Vec<DeviceEventKind> {
        // Insert first so a rollback of the dropped command sees the new value.
        insert_ordered(&mut self.queued, tracked);
        self.trim_queue()
    }

    /// Drop the oldest queued commands beyond the configured depth.
    fn trim_queue(&mut self) -> Vec<DeviceEventKind> {
        let mut events = Vec::new();
        while self.queued.len() > self.settings.queue_depth.max(1) {
            let Some(oldest) = self.queued.pop_front() else {
                break;
            };
            tracing::warn!(
                correlation_id = oldest.command.correlation_id,
                "command queue full, dropping oldest"
            );
            events.extend(self.fail(oldest, CommandError::QueueOverflow));
        }
        events
    }

    fn take_tracked(&mut self, id: u32) -> Option<Tracked> {
        if let Some(pos) = self.inflight.iter().position(|t| t.answers_to(id)) {
            return self.inflight.remove(pos);
        }
        let pos = self.queued.iter().position(|t| t.answers_to(id))?;
        self.queued.remove(pos)
    }

    /// Device-reported values: last writer wins.
    fn merge_report(&mut self, fields: &[(Field, FieldValue)], changes: &mut StateChanges) {
        let mut ignored = StateChanges::default();
        for (field, value) in fields {
            self.confirmed.apply(*field, Some(value.clone()), &mut ignored);
            self.state.apply(*field, Some(value.clone()), changes);
        }
    }

    /// The acknowledged command's values become confirmed. A newer pending
    /// command on the same field keeps its optimistic value.
    fn merge_ack(
        &mut self,
        tracked: &Tracked,
        fields: &[(Field, FieldValue)],
        changes: &mut StateChanges,
    ) {
        let mut ignored = StateChanges::default();
        for (field, value) in fields {
            self.confirmed.apply(*field, Some(value.clone()), &mut ignored);
            if self.newest_pending(*field).is_none() {
                self.state.apply(*field, Some(value.clone()), changes);
            }
        }
        for (field, value) in &tracked.command.desired {
            if fields.iter().any(|(f, _)| f == field) {
                continue;
            }
            self.confirmed.apply(*field, Some(value.clone()), &mut ignored);
            // A report may have landed between send and ack.
            if self.newest_pending(*field).is_none() {
                self.state.apply(*field, Some(value.clone()), changes);
            }
        }
    }

    /// Newest still-pending desired value for `field`.
    fn newest_pending(&self, field: Field) -> Option<FieldValue> {
        self.inflight
            .iter()
            .chain(&self.queued)
            .filter_map(|t| t.command.desired(field).map(|v| (t.seq, v)))
            .max_by_key(|(seq, _)| *seq)
            .map(|(_, v)| v.clone())
    }

    /// Drop `tracked` and roll its fields back.
    fn fail(&mut self, tracked: Tracked, error: CommandError) -> Vec<DeviceEventKind> {
        let mut reverted = StateChanges::default();
        for field in tracked.command.fields() {
            let value = self
                .newest_pending(field)
                .or_else(|| self.confirmed.get(field));
            self.state.apply(field, value, &mut reverted);
        }
        tracing::debug!(
            correlation_id = tracked.command.correlation_id,
            %error,
            reverted = reverted.len(),
            "command failed"
        );

        let mut events = vec![DeviceEventKind::CommandFailed {
            correlation_id: tracked.command.correlation_id,
            error,
            reverted: reverted.clone(),
        }];
        if !reverted.is_empty() {
            events.push(DeviceEventKind::StateChanged(reverted));
        }
        events
    }
}

/// Insert keeping issue order.
fn insert_ordered(queue: &mut VecDeque<Tracked>, tracked: Tracked) {
    let pos = queue.partition_point(|t| t.seq < tracked.seq);
    queue.insert(pos, tracked);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::cell::{Cell, RefCell};

    use pretty_assertions::assert_eq;
    use soundlight_api::codec::{Decoded, Rejection};
    use soundlight_api::{Hsb, Sound};

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        frames: RefCell<Vec<Bytes>>,
        down: Cell<bool>,
    }

    impl FrameSink for RecordingSink {
        fn send_frame(&self, frame: Bytes) -> Result<(), TransportError> {
            if self.down.get() {
                return Err(TransportError::NotConnected);
            }
            self.frames.borrow_mut().push(frame);
            Ok(())
        }
    }

    impl RecordingSink {
        fn sent(&self) -> Vec<StateFragment> {
            self.frames
                .borrow()
                .iter()
                .map(|b| match Codec::decode(b).unwrap() {
                    Decoded::Fragment(f) => f,
                    Decoded::Unrecognized(u) => panic!("unexpected {u:?}"),
                })
                .collect()
        }
    }

    fn connected() -> (Reconciler, RecordingSink) {
        let mut r = Reconciler::new(Codec::new(), ReconcilerSettings::default());
        let sink = RecordingSink::default();
        r.on_connected(&sink, Instant::now());
        (r, sink)
    }

    fn report(f: impl FnOnce(&mut StateFragment)) -> StateFragment {
        let mut fragment = StateFragment::default();
        f(&mut fragment);
        fragment
    }

    fn ack(id: u32) -> StateFragment {
        StateFragment {
            correlation_id: Some(id),
            ..StateFragment::default()
        }
    }

    fn changed(events: &[DeviceEventKind]) -> Vec<Field> {
        events
            .iter()
            .filter_map(|e| match e {
                DeviceEventKind::StateChanged(c) => Some(c.iter().map(|(f, _)| f).collect::<Vec<_>>()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn failures(events: &[DeviceEventKind]) -> Vec<CommandError> {
        events
            .iter()
            .filter_map(|e| match e {
                DeviceEventKind::CommandFailed { error, .. } => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn volume_command_is_optimistic_and_ack_is_silent() {
        let (mut r, sink) = connected();
        let (cmd, events) = r
            .apply_local_intent(ControlIntent::SetVolume(0.65), &sink, Instant::now())
            .unwrap();

        assert_eq!(changed(&events), vec![Field::Volume]);
        assert_eq!(r.state().volume, Some(0.65));
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!((sent[0].volume.unwrap() - 0.65).abs() < 1e-4);

        let events = r.apply_fragment(&StateFragment {
            volume: Some(0.650_01),
            ..ack(cmd.correlation_id)
        });
        assert!(events.is_empty());
        assert_eq!(r.pending().count(), 0);
        assert!((r.confirmed().volume.unwrap() - 0.65).abs() < 1e-4);
    }

    #[tokio::test]
    async fn ack_without_fields_confirms_commanded_value() {
        let (mut r, sink) = connected();
        let (cmd, _) = r
            .apply_local_intent(ControlIntent::SetPower(true), &sink, Instant::now())
            .unwrap();
        assert_eq!(r.confirmed().power, None);
        let events = r.apply_fragment(&ack(cmd.correlation_id));
        assert!(events.is_empty());
        assert_eq!(r.confirmed().power, Some(true));
    }

    #[tokio::test]
    async fn bare_ack_after_interleaved_report_restores_commanded_value() {
        let (mut r, sink) = connected();
        let (cmd, _) = r
            .apply_local_intent(ControlIntent::SetVolume(0.65), &sink, Instant::now())
            .unwrap();

        // The device reports an older value before it gets to the command.
        let events = r.apply_fragment(&report(|f| f.volume = Some(0.3)));
        assert_eq!(changed(&events), vec![Field::Volume]);
        assert_eq!(r.state().volume, Some(0.3));

        let events = r.apply_fragment(&ack(cmd.correlation_id));
        assert_eq!(changed(&events), vec![Field::Volume]);
        assert_eq!(r.pending().count(), 0);
        assert_eq!(r.state().volume, r.confirmed().volume);
        assert!((r.state().volume.unwrap() - 0.65).abs() < 1e-4);
    }

    #[tokio::test]
    async fn applying_the_same_fragment_twice_is_idempotent() {
        let (mut r, _) = connected();
        let fragment = report(|f| {
            f.power = Some(true);
            f.sound = Some(Sound::Rain);
            f.temperature = Some(21.5);
        });
        let first = r.apply_fragment(&fragment);
        assert_eq!(
            changed(&first),
            vec![Field::Power, Field::Sound, Field::Temperature]
        );
        assert!(r.apply_fragment(&fragment).is_empty());
    }

    #[tokio::test]
    async fn disjoint_fragments_commute() {
        let a = report(|f| {
            f.volume = Some(0.2);
            f.power = Some(true);
        });
        let b = report(|f| {
            f.humidity = Some(40.0);
            f.sound = Some(Sound::Waves);
        });

        let (mut ab, _) = connected();
        ab.apply_fragment(&a);
        ab.apply_fragment(&b);
        let (mut ba, _) = connected();
        ba.apply_fragment(&b);
        ba.apply_fragment(&a);
        assert_eq!(ab.state(), ba.state());
    }

    #[tokio::test]
    async fn device_report_wins_over_optimistic_value() {
        let (mut r, sink) = connected();
        r.apply_local_intent(ControlIntent::SetVolume(0.4), &sink, Instant::now())
            .unwrap();
        let events = r.apply_fragment(&report(|f| f.volume = Some(0.9)));
        assert_eq!(changed(&events), vec![Field::Volume]);
        assert_eq!(r.state().volume, Some(0.9));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_command_times_out_and_rolls_back_once() {
        let mut r = Reconciler::new(Codec::new(), ReconcilerSettings::default());
        let sink = RecordingSink::default();
        r.apply_fragment(&report(|f| f.volume = Some(0.3)));

        let start = Instant::now();
        let (cmd, _) = r
            .apply_local_intent(ControlIntent::SetVolume(0.8), &sink, start)
            .unwrap();
        assert_eq!(r.state().volume, Some(0.8));
        assert!(sink.frames.borrow().is_empty());

        // first deadline: stays queued
        let events = r.check_timeouts(start + Duration::from_secs(5), &sink);
        assert!(events.is_empty());
        assert_eq!(r.pending().next().unwrap().retries, 1);

        let events = r.check_timeouts(start + Duration::from_secs(10), &sink);
        assert_eq!(failures(&events), vec![CommandError::Timeout]);
        let DeviceEventKind::CommandFailed {
            correlation_id,
            reverted,
            ..
        } = &events[0]
        else {
            panic!("expected failure first");
        };
        assert_eq!(*correlation_id, cmd.correlation_id);
        assert_eq!(reverted.get(Field::Volume), Some(&Some(FieldValue::Float(0.3))));
        assert_eq!(r.state().volume, Some(0.3));
        assert_eq!(r.next_deadline(), None);
        assert!(r.check_timeouts(start + Duration::from_secs(30), &sink).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn inflight_timeout_resends_once_with_a_new_id() {
        let (mut r, sink) = connected();
        let start = Instant::now();
        let (cmd, _) = r
            .apply_local_intent(ControlIntent::SetSound(Sound::Fan), &sink, start)
            .unwrap();

        let events = r.check_timeouts(start + Duration::from_secs(5), &sink);
        assert!(events.is_empty());
        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].sound, Some(Sound::Fan));

        // a late ack of the first transmission still counts
        let events = r.apply_fragment(&ack(cmd.correlation_id));
        assert!(events.is_empty());
        assert_eq!(r.pending().count(), 0);
    }

    #[tokio::test]
    async fn rollback_prefers_newer_pending_value() {
        let (mut r, sink) = connected();
        r.apply_fragment(&report(|f| f.volume = Some(0.1)));
        let (first, _) = r
            .apply_local_intent(ControlIntent::SetVolume(0.5), &sink, Instant::now())
            .unwrap();
        r.apply_local_intent(ControlIntent::SetVolume(0.7), &sink, Instant::now())
            .unwrap();

        let events = r.apply_fragment(&StateFragment {
            rejection: Some(Rejection {
                status_code: 400,
                message: None,
            }),
            ..ack(first.correlation_id)
        });
        assert_eq!(
            failures(&events),
            vec![CommandError::Rejected {
                status_code: 400,
                message: None
            }]
        );
        assert_eq!(r.state().volume, Some(0.7));
    }

    #[tokio::test]
    async fn rejection_restores_confirmed_value() {
        let (mut r, sink) = connected();
        r.apply_fragment(&report(|f| f.power = Some(false)));
        let (cmd, _) = r
            .apply_local_intent(ControlIntent::SetPower(true), &sink, Instant::now())
            .unwrap();
        let events = r.apply_fragment(&StateFragment {
            rejection: Some(Rejection {
                status_code: 500,
                message: Some("busy".into()),
            }),
            ..ack(cmd.correlation_id)
        });
        assert_eq!(events.len(), 2);
        assert_eq!(changed(&events), vec![Field::Power]);
        assert_eq!(r.state().power, Some(false));
    }

    #[tokio::test]
    async fn queue_overflow_drops_oldest() {
        let mut r = Reconciler::new(
            Codec::new(),
            ReconcilerSettings {
                queue_depth: 2,
                ..ReconcilerSettings::default()
            },
        );
        let sink = RecordingSink::default();
        let (oldest, _) = r
            .apply_local_intent(ControlIntent::SetPower(true), &sink, Instant::now())
            .unwrap();
        r.apply_local_intent(ControlIntent::SetVolume(0.2), &sink, Instant::now())
            .unwrap();
        let (_, events) = r
            .apply_local_intent(ControlIntent::SetLight(false), &sink, Instant::now())
            .unwrap();

        assert_eq!(failures(&events), vec![CommandError::QueueOverflow]);
        assert!(matches!(
            events.iter().find(|e| matches!(e, DeviceEventKind::CommandFailed { .. })),
            Some(DeviceEventKind::CommandFailed { correlation_id, .. }) if *correlation_id == oldest.correlation_id
        ));
        assert_eq!(r.state().power, None);
        assert_eq!(r.pending().count(), 2);
    }

    #[tokio::test]
    async fn queued_commands_replay_in_issue_order() {
        let mut r = Reconciler::new(Codec::new(), ReconcilerSettings::default());
        let sink = RecordingSink::default();
        r.apply_local_intent(ControlIntent::SetPower(true), &sink, Instant::now())
            .unwrap();
        r.apply_local_intent(ControlIntent::SetVolume(0.4), &sink, Instant::now())
            .unwrap();
        assert!(sink.frames.borrow().is_empty());

        r.on_connected(&sink, Instant::now());
        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].power, Some(true));
        assert!(sent[1].volume.is_some());
    }

    #[tokio::test]
    async fn disconnect_requeues_inflight_ahead_of_queued() {
        let (mut r, sink) = connected();
        r.apply_local_intent(ControlIntent::SetPower(true), &sink, Instant::now())
            .unwrap();
        assert!(r.on_disconnected().is_empty());
        r.apply_local_intent(ControlIntent::SetVolume(0.4), &sink, Instant::now())
            .unwrap();

        sink.frames.borrow_mut().clear();
        r.on_connected(&sink, Instant::now());
        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].power, Some(true));
        assert!(sent[1].volume.is_some());
    }

    #[tokio::test]
    async fn disconnect_keeps_queue_within_depth() {
        let mut r = Reconciler::new(
            Codec::new(),
            ReconcilerSettings {
                queue_depth: 2,
                ..ReconcilerSettings::default()
            },
        );
        let sink = RecordingSink::default();
        r.on_connected(&sink, Instant::now());
        let mut issued = Vec::new();
        for level in [0.1, 0.2, 0.3, 0.4] {
            let (cmd, _) = r
                .apply_local_intent(ControlIntent::SetVolume(level), &sink, Instant::now())
                .unwrap();
            issued.push(cmd.correlation_id);
        }
        assert_eq!(r.pending().count(), 4);

        let events = r.on_disconnected();
        assert_eq!(
            failures(&events),
            vec![CommandError::QueueOverflow, CommandError::QueueOverflow]
        );
        let survivors: Vec<u32> = r.pending().map(|c| c.correlation_id).collect();
        assert_eq!(survivors, issued[2..].to_vec());
        // The newest command still owns the optimistic value.
        assert!((r.state().volume.unwrap() - 0.4).abs() < 1e-4);
    }

    #[tokio::test]
    async fn send_failure_while_connected_queues() {
        let (mut r, sink) = connected();
        sink.down.set(true);
        r.apply_local_intent(ControlIntent::SetPower(true), &sink, Instant::now())
            .unwrap();
        assert_eq!(r.pending().count(), 1);
        sink.down.set(false);
        r.on_connected(&sink, Instant::now());
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn color_command_targets_all_components() {
        let (mut r, sink) = connected();
        let (cmd, events) = r
            .apply_local_intent(
                ControlIntent::SetColor(Hsb {
                    hue: 200.0,
                    saturation: 0.5,
                    brightness: 0.6,
                }),
                &sink,
                Instant::now(),
            )
            .unwrap();
        assert_eq!(
            cmd.fields().collect::<Vec<_>>(),
            vec![
                Field::Brightness,
                Field::Hue,
                Field::Saturation,
                Field::LightEnabled
            ]
        );
        assert_eq!(changed(&events).len(), 4);
    }

    #[tokio::test]
    async fn invalid_intent_changes_nothing() {
        let (mut r, sink) = connected();
        let err = r
            .apply_local_intent(ControlIntent::SetVolume(2.0), &sink, Instant::now())
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidValue { field: "volume", .. }));
        assert_eq!(r.state(), &DeviceState::default());
        assert!(sink.frames.borrow().is_empty());
    }

    #[tokio::test]
    async fn cancel_all_fails_everything() {
        let (mut r, sink) = connected();
        r.apply_local_intent(ControlIntent::SetPower(true), &sink, Instant::now())
            .unwrap();
        let _ = r.on_disconnected();
        r.apply_local_intent(ControlIntent::SetVolume(0.3), &sink, Instant::now())
            .unwrap();
        let events = r.cancel_all();
        assert_eq!(
            failures(&events),
            vec![CommandError::Cancelled, CommandError::Cancelled]
        );
        assert_eq!(r.state(), &DeviceState::default());
        assert_eq!(r.next_deadline(), None);
    }
}
