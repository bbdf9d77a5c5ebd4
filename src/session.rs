//! Stream ingestion session
//!
//! Drives one response from request to fully-rendered: a producer task reads
//! the source and feeds a bounded channel, the consumer decodes and folds.
//! The consumer blocks on `recv().await`, never polls.
//!
//! Cancellation is cooperative: the producer stops reading the moment the
//! token fires, the consumer drains whatever is already queued, and a
//! synthetic `stop { user_cancelled }` is folded if the server never sent one.
//! Pacing only delays display updates; folding is never gated on it.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RivuletError;
use crate::packet::{decode_line, Packet, PacketPayload, StopReason, StreamAck, WireFrame};
use crate::processor::ProcessorState;
use crate::source::{ChatRequest, PacketSource};

// ─────────────────────────────────────────────────────────────────────────────
// Phases and outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No request in flight
    Idle,
    /// Request sent, no frame received yet
    Loading,
    /// Frames arriving
    Streaming,
    /// Tool groups are accumulating and no answer text has started
    ToolBuilding,
    /// Stream stopped, ready for the next user message
    Input,
}

/// How the session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    /// Transport failure after the stream opened. Everything folded before
    /// the failure stays visible.
    Failed(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Pacing
// ─────────────────────────────────────────────────────────────────────────────

/// Display reveal cadence. `off` means every fold triggers an update
/// immediately; otherwise updates fire on a timer while folds continue at
/// wire speed underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    delay: Duration,
}

impl PacingConfig {
    pub fn off() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    pub fn every(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn enabled(&self) -> bool {
        !self.delay.is_zero()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self::off()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response gate
// ─────────────────────────────────────────────────────────────────────────────

/// Tracks when a response is fully rendered, which needs both the wire-side
/// stop and the presentation layer's own done signal. The tools-displayed
/// override lets a UI reveal trailing answer text before slow tool
/// animations finish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseGate {
    stream_stopped: bool,
    presentation_done: bool,
    tools_displayed: bool,
}

impl ResponseGate {
    pub fn note_stream_stopped(&mut self) {
        self.stream_stopped = true;
    }

    pub fn note_presentation_done(&mut self) {
        self.presentation_done = true;
    }

    pub fn mark_all_tools_displayed(&mut self) {
        self.tools_displayed = true;
    }

    pub fn stream_stopped(&self) -> bool {
        self.stream_stopped
    }

    pub fn fully_rendered(&self) -> bool {
        self.stream_stopped && self.presentation_done
    }

    /// May the final answer text be shown yet?
    pub fn reveal_message(&self) -> bool {
        self.presentation_done || self.tools_displayed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// What the producer hands the consumer, one item per wire line
enum Feed {
    Line(String),
    TransportError(String),
}

/// One chat exchange: owns the packet history, the processor state and the
/// cancellation token for the in-flight response.
pub struct ChatSession {
    state: ProcessorState,
    packets: Vec<Packet>,
    ack: Option<StreamAck>,
    cancel: CancellationToken,
    pacing: PacingConfig,
    gate: ResponseGate,
    started: bool,
    finished: bool,
    runs: u64,
}

impl ChatSession {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            state: ProcessorState::new(node_id),
            packets: Vec::new(),
            ack: None,
            cancel: CancellationToken::new(),
            pacing: PacingConfig::off(),
            gate: ResponseGate::default(),
            started: false,
            finished: false,
            runs: 0,
        }
    }

    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    /// Token to cancel the in-flight response from another task
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> &ProcessorState {
        &self.state
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub fn ack(&self) -> Option<&StreamAck> {
        self.ack.as_ref()
    }

    pub fn gate(&self) -> &ResponseGate {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut ResponseGate {
        &mut self.gate
    }

    pub fn phase(&self) -> SessionPhase {
        if !self.started {
            return SessionPhase::Idle;
        }
        // A finished run always lands in Input, including failed runs: the
        // user sees the partial content plus an error banner and may resubmit
        if self.finished || self.state.stream_stopped() {
            return SessionPhase::Input;
        }
        if self.packets.is_empty() && self.ack.is_none() {
            return SessionPhase::Loading;
        }
        let answer_started = self
            .state
            .groups()
            .iter()
            .any(|g| g.contains_tag("message_start"));
        if self.state.has_tool_packets() && !answer_started {
            return SessionPhase::ToolBuilding;
        }
        SessionPhase::Streaming
    }

    /// Run one response to completion. `on_update` fires after each fold
    /// (or on the pacing timer when pacing is enabled) and once more at the
    /// very end, after any synthetic stop has been folded.
    pub async fn run<F>(
        &mut self,
        source: &dyn PacketSource,
        request: &ChatRequest,
        mut on_update: F,
    ) -> SessionOutcome
    where
        F: FnMut(&ProcessorState, SessionPhase),
    {
        self.started = true;
        self.finished = false;

        // Each run is a new logical response on the same node
        self.runs += 1;
        self.state.begin_generation(self.runs);
        self.packets.clear();
        self.ack = None;
        self.gate = ResponseGate::default();

        on_update(&self.state, self.phase());

        let mut stream = match source.open(request, self.cancel.clone()).await {
            Ok(stream) => stream,
            Err(e) => return self.finish(SessionOutcome::Failed(e.to_string())),
        };

        let (tx, mut rx) = mpsc::channel::<Feed>(64);
        let cancel = self.cancel.clone();
        let producer = tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = stream.next() => item,
                };
                match item {
                    Some(Ok(line)) => {
                        if tx.send(Feed::Line(line)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Feed::TransportError(e.to_string())).await;
                        break;
                    }
                    None => break,
                }
            }
            // tx drops here; a closed channel is the completion signal
        });

        let mut transport_error: Option<String> = None;
        let mut ticker =
            tokio::time::interval(self.pacing.delay().max(Duration::from_millis(1)));

        loop {
            let next = if self.pacing.enabled() {
                tokio::select! {
                    next = rx.recv() => Some(next),
                    _ = ticker.tick() => None,
                }
            } else {
                Some(rx.recv().await)
            };

            match next {
                // Pacing tick: reveal whatever has been folded so far
                None => on_update(&self.state, self.phase()),
                Some(None) => break,
                Some(Some(Feed::Line(line))) => {
                    self.ingest_line(&line);
                    if !self.pacing.enabled() {
                        on_update(&self.state, self.phase());
                    }
                }
                Some(Some(Feed::TransportError(e))) => {
                    warn!(error = %e, "transport failed mid-stream");
                    transport_error = Some(e);
                }
            }
        }

        let _ = producer.await;

        if self.cancel.is_cancelled() && !self.state.stream_stopped() {
            self.fold_synthetic_stop();
        }
        if self.state.stream_stopped() {
            self.gate.note_stream_stopped();
        }

        let outcome = if let Some(e) = transport_error {
            SessionOutcome::Failed(e)
        } else if self.state.cancelled() {
            SessionOutcome::Cancelled
        } else {
            SessionOutcome::Completed
        };
        let outcome = self.finish(outcome);
        on_update(&self.state, self.phase());
        outcome
    }

    fn finish(&mut self, outcome: SessionOutcome) -> SessionOutcome {
        self.finished = true;
        outcome
    }

    fn ingest_line(&mut self, line: &str) {
        match decode_line(line) {
            Ok(Some(WireFrame::Packet(packet))) => {
                self.packets.push(packet);
                self.state.fold(&self.packets);
            }
            Ok(Some(WireFrame::Ack(ack))) => {
                debug!(
                    user_message_id = ack.user_message_id,
                    assistant_message_id = ack.reserved_assistant_message_id,
                    "stream acknowledged"
                );
                self.ack = Some(ack);
            }
            Ok(None) => {}
            Err(RivuletError::Decode { details, .. }) => {
                self.state.record_decode_failure(line, details);
            }
            Err(other) => {
                self.state.record_decode_failure(line, other.to_string());
            }
        }
    }

    /// Close out a cancelled response the server never terminated. The
    /// synthetic stop reuses the last seen `ind` so the trailing group is
    /// marked complete as well.
    fn fold_synthetic_stop(&mut self) {
        let ind = self.packets.last().map(|p| p.ind).unwrap_or(0);
        debug!(ind, "folding synthetic user_cancelled stop");
        self.packets.push(Packet::new(
            ind,
            PacketPayload::Stop {
                stop_reason: Some(StopReason::UserCancelled),
            },
        ));
        self.state.fold(&self.packets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::packet::Placement;
    use crate::source::{LineStream, MockSource};

    fn json_line(packet: &Packet) -> String {
        serde_json::to_string(packet).unwrap()
    }

    fn message_lines() -> Vec<String> {
        vec![
            json_line(&Packet::placed(
                0,
                Placement::new(0, 0),
                PacketPayload::MessageStart {
                    content: String::new(),
                    final_documents: None,
                },
            )),
            json_line(&Packet::new(
                0,
                PacketPayload::MessageDelta {
                    content: "Hello".to_string(),
                },
            )),
        ]
    }

    #[tokio::test]
    async fn demo_stream_runs_to_completion() {
        let source = MockSource::new().with_delay(Duration::ZERO);
        let mut session = ChatSession::new("node-1");

        let outcome = session
            .run(&source, &ChatRequest::new("what is a stream?"), |_, _| {})
            .await;

        assert_eq!(outcome, SessionOutcome::Completed);
        assert!(session.state().stream_stopped());
        assert!(!session.state().cancelled());
        assert!(session.ack().is_some());
        assert!(session.gate().stream_stopped());
        assert_eq!(session.phase(), SessionPhase::Input);

        let answer = session
            .state()
            .groups()
            .iter()
            .find(|g| g.contains_tag("message_start"))
            .map(|g| g.message_text())
            .unwrap_or_default();
        assert!(answer.contains("Stream"));
    }

    #[tokio::test]
    async fn cancellation_folds_exactly_one_synthetic_stop() {
        // A script that never sends its own stop
        let mut lines = message_lines();
        lines.extend(std::iter::repeat(json_line(&Packet::new(
            0,
            PacketPayload::MessageDelta {
                content: ".".to_string(),
            },
        ))).take(50));

        let source = MockSource::new()
            .with_delay(Duration::from_millis(5))
            .with_script(lines);
        let mut session = ChatSession::new("node-1");
        let cancel = session.cancel_token();

        let mut folds = 0;
        let outcome = session
            .run(&source, &ChatRequest::new("hi"), |_, _| {
                folds += 1;
                if folds == 3 {
                    cancel.cancel();
                }
            })
            .await;

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert!(session.state().cancelled());
        assert_eq!(
            session.state().stop_reason(),
            Some(&StopReason::UserCancelled)
        );

        let stops = session
            .packets()
            .iter()
            .filter(|p| matches!(p.obj, PacketPayload::Stop { .. }))
            .count();
        assert_eq!(stops, 1);

        // The synthetic stop shares the last ind, so the trailing group closes
        assert!(session.state().groups()[0].is_complete());
    }

    struct FlakySource {
        lines: Vec<String>,
    }

    #[async_trait]
    impl PacketSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn open(
            &self,
            _request: &ChatRequest,
            _cancel: CancellationToken,
        ) -> Result<LineStream, RivuletError> {
            let mut items: Vec<Result<String, RivuletError>> =
                self.lines.iter().cloned().map(Ok).collect();
            items.push(Err(RivuletError::Transport("connection reset".to_string())));
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    #[tokio::test]
    async fn transport_error_fails_but_keeps_folded_content() {
        let source = FlakySource {
            lines: message_lines(),
        };
        let mut session = ChatSession::new("node-1");

        let outcome = session
            .run(&source, &ChatRequest::new("hi"), |_, _| {})
            .await;

        match outcome {
            SessionOutcome::Failed(e) => assert!(e.contains("connection reset")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(session.state().groups()[0].message_text(), "Hello");
        assert!(!session.state().stream_stopped());

        // The failed run still ends in Input: partial content plus an error
        // banner, ready for a resubmit
        assert_eq!(session.phase(), SessionPhase::Input);
    }

    #[tokio::test]
    async fn failed_open_also_lands_in_input() {
        let source = crate::source::NdjsonSource::new("/nonexistent/capture.ndjson");
        let mut session = ChatSession::new("node-1");

        let outcome = session
            .run(&source, &ChatRequest::new("hi"), |_, _| {})
            .await;

        assert!(matches!(outcome, SessionOutcome::Failed(_)));
        assert_eq!(session.phase(), SessionPhase::Input);
    }

    #[tokio::test]
    async fn malformed_lines_are_recorded_not_fatal() {
        let mut lines = message_lines();
        lines.insert(1, "{not json".to_string());
        lines.push(json_line(&Packet::new(
            0,
            PacketPayload::Stop {
                stop_reason: Some(StopReason::Finished),
            },
        )));

        let source = MockSource::new()
            .with_delay(Duration::ZERO)
            .with_script(lines);
        let mut session = ChatSession::new("node-1");

        let outcome = session
            .run(&source, &ChatRequest::new("hi"), |_, _| {})
            .await;

        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(session.state().decode_failures().len(), 1);
        assert_eq!(session.state().groups()[0].message_text(), "Hello");
    }

    #[tokio::test]
    async fn phases_progress_to_input() {
        let source = MockSource::new().with_delay(Duration::ZERO);
        let mut session = ChatSession::new("node-1");
        assert_eq!(session.phase(), SessionPhase::Idle);

        let mut seen: Vec<SessionPhase> = Vec::new();
        session
            .run(&source, &ChatRequest::new("hi"), |_, phase| {
                if seen.last() != Some(&phase) {
                    seen.push(phase);
                }
            })
            .await;

        assert_eq!(seen.first(), Some(&SessionPhase::Loading));
        assert_eq!(seen.last(), Some(&SessionPhase::Input));
        assert!(seen.contains(&SessionPhase::ToolBuilding));
    }

    #[test]
    fn gate_requires_both_signals() {
        let mut gate = ResponseGate::default();
        assert!(!gate.fully_rendered());

        gate.note_stream_stopped();
        assert!(!gate.fully_rendered());
        assert!(!gate.reveal_message());

        gate.note_presentation_done();
        assert!(gate.fully_rendered());
        assert!(gate.reveal_message());
    }

    #[test]
    fn gate_tools_override_reveals_message_early() {
        let mut gate = ResponseGate::default();
        gate.mark_all_tools_displayed();
        assert!(gate.reveal_message());
        assert!(!gate.fully_rendered());
    }

    #[test]
    fn pacing_off_by_default() {
        assert!(!PacingConfig::default().enabled());
        assert!(PacingConfig::every(Duration::from_millis(40)).enabled());
    }
}
