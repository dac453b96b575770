//! Session handle shared between an adapter's receive loop and the
//! orchestrator.
//!
//! A `Session` represents one provider connection attempt. It owns the
//! partial-result channel (single producer: the receive loop; single
//! consumer: the orchestrator), a one-shot readiness signal resolved exactly
//! once by either `confirm` or `fail_confirmation`, the running final
//! transcript published through a watch channel, and the outbound transport.
//! All mutable state is serialized through the session's own locks; no field
//! is touched directly by external code.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

use murmur_foundation::TranscriptionError;

use crate::transport::Transport;
use crate::types::TranscriptionChunk;
use crate::next_session_id;

/// Items on the partial-result channel. Errors are delivered in-band so the
/// consumer can never miss a terminal failure.
pub type PartialResult = Result<TranscriptionChunk, TranscriptionError>;

/// Partial channel capacity: one in-flight item of consumer backpressure.
const PARTIAL_CHANNEL_CAPACITY: usize = 1;

/// Bound on in-band delivery of a terminal error to a slow consumer.
const PARTIAL_SEND_TIMEOUT: Duration = Duration::from_secs(5);

struct SessionState {
    active: bool,
    confirmed: bool,
    reconnecting: bool,
    ready_tx: Option<oneshot::Sender<Result<(), TranscriptionError>>>,
    ready_rx: Option<oneshot::Receiver<Result<(), TranscriptionError>>>,
    partial_tx: Option<mpsc::Sender<PartialResult>>,
    partial_rx: Option<mpsc::Receiver<PartialResult>>,
}

struct SessionInner {
    state: Mutex<SessionState>,
    transcript_tx: watch::Sender<String>,
    transport: AsyncMutex<Option<Box<dyn Transport>>>,
}

/// Cheap-clone handle to one provider session.
#[derive(Clone)]
pub struct Session {
    id: u64,
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("active", &state.active)
            .field("confirmed", &state.confirmed)
            .field("reconnecting", &state.reconnecting)
            .finish()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (partial_tx, partial_rx) = mpsc::channel(PARTIAL_CHANNEL_CAPACITY);
        let (transcript_tx, _) = watch::channel(String::new());
        Self {
            id: next_session_id(),
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState {
                    active: true,
                    confirmed: false,
                    reconnecting: false,
                    ready_tx: Some(ready_tx),
                    ready_rx: Some(ready_rx),
                    partial_tx: Some(partial_tx),
                    partial_rx: Some(partial_rx),
                }),
                transcript_tx,
                transport: AsyncMutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn set_inactive(&self) {
        self.inner.state.lock().active = false;
    }

    pub fn is_confirmed(&self) -> bool {
        self.inner.state.lock().confirmed
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.state.lock().reconnecting
    }

    pub fn set_reconnecting(&self, reconnecting: bool) {
        self.inner.state.lock().reconnecting = reconnecting;
    }

    /// Mark the session ready. Idempotent; resolves the readiness signal at
    /// most once, and only if `fail_confirmation` has not resolved it first.
    pub fn confirm(&self) {
        let ready_tx = {
            let mut state = self.inner.state.lock();
            if state.confirmed {
                return;
            }
            state.confirmed = true;
            state.ready_tx.take()
        };
        if let Some(tx) = ready_tx {
            let _ = tx.send(Ok(()));
            debug!(target: "stt", session_id = self.id, "Session confirmed");
        }
    }

    /// Resolve a pending readiness wait with a failure. No effect after
    /// confirmation.
    pub fn fail_confirmation(&self, error: TranscriptionError) {
        let ready_tx = {
            let mut state = self.inner.state.lock();
            if state.confirmed {
                return;
            }
            state.ready_tx.take()
        };
        if let Some(tx) = ready_tx {
            warn!(target: "stt", session_id = self.id, "Session confirmation failed: {}", error);
            let _ = tx.send(Err(error));
        }
    }

    /// Wait for the session to become ready.
    ///
    /// Resolved by exactly one of `confirm` / `fail_confirmation`. May be
    /// awaited once; a second wait is a session error.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), TranscriptionError> {
        let ready_rx = self.inner.state.lock().ready_rx.take();
        let Some(rx) = ready_rx else {
            return Err(TranscriptionError::Session(
                "session readiness already awaited".into(),
            ));
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TranscriptionError::Session(
                "session closed before confirmation".into(),
            )),
            Err(_) => Err(TranscriptionError::Session(
                "timed out waiting for session confirmation".into(),
            )),
        }
    }

    /// Append a chunk to the partial-result sequence.
    ///
    /// Bounded by one in-flight item of consumer backpressure; if the
    /// consumer is gone the chunk is dropped.
    pub async fn yield_partial(&self, chunk: TranscriptionChunk) {
        let tx = self.inner.state.lock().partial_tx.clone();
        if let Some(tx) = tx {
            if tx.send(Ok(chunk)).await.is_err() {
                debug!(target: "stt", session_id = self.id, "Partial channel closed by consumer");
            }
        }
    }

    /// Terminate the partial-result sequence cleanly. Exactly-once: later
    /// calls are no-ops.
    pub fn finish_partials(&self) {
        let taken = self.inner.state.lock().partial_tx.take();
        if taken.is_some() {
            debug!(target: "stt", session_id = self.id, "Partial stream finished");
        }
    }

    /// Terminate the partial-result sequence with an error. The error is
    /// delivered in-band so the consumer cannot miss it.
    pub async fn finish_partials_with_error(&self, error: TranscriptionError) {
        let taken = self.inner.state.lock().partial_tx.take();
        if let Some(tx) = taken {
            match tokio::time::timeout(PARTIAL_SEND_TIMEOUT, tx.send(Err(error))).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    debug!(target: "stt", session_id = self.id, "Partial channel already closed")
                }
                Err(_) => {
                    warn!(target: "stt", session_id = self.id, "Timed out delivering terminal error to partial consumer")
                }
            }
        }
    }

    /// Take the single consumer end of the partial-result sequence.
    pub fn take_partials(&self) -> Option<mpsc::Receiver<PartialResult>> {
        self.inner.state.lock().partial_rx.take()
    }

    /// Append a finalized segment to the running final transcript,
    /// normalizing whitespace: segments are trimmed and single-space joined,
    /// empty segments are skipped.
    pub fn append_final_segment(&self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        self.inner.transcript_tx.send_modify(|current| {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(trimmed);
        });
    }

    /// Replace the running final transcript wholesale (providers that emit a
    /// single completed transcript).
    pub fn set_final_transcript(&self, text: &str) {
        let _ = self.inner.transcript_tx.send_replace(text.trim().to_string());
    }

    pub fn final_transcript(&self) -> String {
        self.inner.transcript_tx.borrow().clone()
    }

    /// Observe final-transcript updates. This is the completion signal the
    /// adapters' finish paths await instead of polling.
    pub fn subscribe_transcript(&self) -> watch::Receiver<String> {
        self.inner.transcript_tx.subscribe()
    }

    /// Install (or replace, on reconnect) the outbound transport. Any
    /// previous transport is closed first; the handle is never aliased.
    pub async fn set_transport(&self, transport: Box<dyn Transport>) {
        let mut slot = self.inner.transport.lock().await;
        if let Some(mut old) = slot.replace(transport) {
            let _ = old.close().await;
        }
    }

    /// Send a text control frame over the current transport.
    pub async fn send_text(&self, text: &str) -> Result<(), TranscriptionError> {
        let mut slot = self.inner.transport.lock().await;
        match slot.as_mut() {
            Some(transport) => transport.send_text(text).await,
            None => Err(TranscriptionError::Session("no active connection".into())),
        }
    }

    /// Send a binary frame over the current transport.
    pub async fn send_binary(&self, bytes: &[u8]) -> Result<(), TranscriptionError> {
        let mut slot = self.inner.transport.lock().await;
        match slot.as_mut() {
            Some(transport) => transport.send_binary(bytes).await,
            None => Err(TranscriptionError::Session("no active connection".into())),
        }
    }

    /// Tear the session down: close the transport and both ends of the
    /// partial channel, mark inactive. Safe to call multiple times.
    ///
    /// Dropping the un-taken receiver matters when no consumer ever ran: it
    /// errors out any producer parked in a bounded partial send.
    pub async fn cleanup(&self) {
        self.set_inactive();
        self.finish_partials();
        let _ = self.inner.state.lock().partial_rx.take();
        let taken = self.inner.transport.lock().await.take();
        if let Some(mut transport) = taken {
            if let Err(e) = transport.close().await {
                debug!(target: "stt", session_id = self.id, "Transport close failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn confirm_resolves_ready_once() {
        let session = Session::new();
        session.confirm();
        session.confirm();
        assert!(session.is_confirmed());
        assert!(session.wait_ready(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn fail_confirmation_resolves_ready_with_error() {
        let session = Session::new();
        session.fail_confirmation(TranscriptionError::Session("handshake rejected".into()));
        let err = session.wait_ready(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::Session(_)));
    }

    #[tokio::test]
    async fn fail_after_confirm_has_no_effect() {
        let session = Session::new();
        session.confirm();
        session.fail_confirmation(TranscriptionError::Session("too late".into()));
        assert!(session.wait_ready(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn second_ready_wait_is_an_error() {
        let session = Session::new();
        session.confirm();
        session.wait_ready(Duration::from_millis(50)).await.unwrap();
        assert!(session.wait_ready(Duration::from_millis(50)).await.is_err());
    }

    #[tokio::test]
    async fn partials_terminate_exactly_once() {
        let session = Session::new();
        let mut rx = session.take_partials().unwrap();

        session.yield_partial(TranscriptionChunk::partial("hello")).await;
        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.text, "hello");
        assert!(!chunk.is_final);

        session.finish_partials();
        session.finish_partials();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn terminal_error_arrives_in_band() {
        let session = Session::new();
        let mut rx = session.take_partials().unwrap();
        session
            .finish_partials_with_error(TranscriptionError::Network("connection lost".into()))
            .await;
        let err = rx.recv().await.unwrap().unwrap_err();
        assert!(matches!(err, TranscriptionError::Network(_)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn final_segments_join_with_single_spaces() {
        let session = Session::new();
        session.append_final_segment("  ");
        session.append_final_segment(" hello ");
        session.append_final_segment("");
        session.append_final_segment("world  ");
        assert_eq!(session.final_transcript(), "hello world");
    }

    #[tokio::test]
    async fn cleanup_unblocks_a_producer_parked_on_a_full_partial_channel() {
        let session = Session::new();
        // No consumer ever takes the receiver; the second send fills the
        // bounded channel and parks.
        let producer = {
            let session = session.clone();
            tokio::spawn(async move {
                session.yield_partial(TranscriptionChunk::partial("one")).await;
                session.yield_partial(TranscriptionChunk::partial("two")).await;
            })
        };
        tokio::task::yield_now().await;

        session.cleanup().await;
        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer still parked after cleanup")
            .unwrap();
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let session = Session::new();
        let mut rx = session.take_partials().unwrap();
        session.cleanup().await;
        session.cleanup().await;
        assert!(!session.is_active());
        assert!(rx.recv().await.is_none());
        assert!(session.send_binary(&[0u8; 4]).await.is_err());
    }
}
