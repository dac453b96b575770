//! Ordered audio-delivery queue.
//!
//! A single-writer, FIFO, gate-controlled relay between the capture pipeline
//! and a provider adapter. Chunks can arrive before the session is ready;
//! they are held in arrival order and released only once the session is
//! confirmed. The critical property is that no audio is reordered or lost
//! across the confirmation boundary, and that at most one drain task runs at
//! a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::adapter::StreamingAdapter;
use crate::session::Session;

#[derive(Clone)]
struct Binding {
    adapter: Arc<dyn StreamingAdapter>,
    session: Session,
}

struct QueueState {
    pending: VecDeque<Vec<u8>>,
    confirmed: bool,
    draining: bool,
    seq: u64,
    binding: Option<Binding>,
}

struct QueueInner {
    state: Mutex<QueueState>,
}

/// Gate-controlled FIFO relay for audio chunks.
///
/// Internal state is exclusive to this type; external code interacts only
/// through `configure` / `enqueue` / `confirm_session` / `reset`.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<QueueInner>,
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    confirmed: false,
                    draining: false,
                    seq: 0,
                    binding: None,
                }),
            }),
        }
    }

    /// Bind the queue to one adapter/session pair. Called once per session.
    pub fn configure(&self, adapter: Arc<dyn StreamingAdapter>, session: Session) {
        let mut state = self.inner.state.lock();
        state.binding = Some(Binding { adapter, session });
    }

    /// Append a chunk at the tail and start a drain if one is due.
    pub fn enqueue(&self, chunk: Vec<u8>) {
        let mut state = self.inner.state.lock();
        state.pending.push_back(chunk);
        state.seq += 1;
        self.arm_drain(&mut state);
    }

    /// Open the gate: mark the session confirmed and drain anything pending.
    pub fn confirm_session(&self) {
        let mut state = self.inner.state.lock();
        if !state.confirmed {
            debug!(target: "stt", "Delivery queue confirmed with {} pending chunk(s)", state.pending.len());
        }
        state.confirmed = true;
        self.arm_drain(&mut state);
    }

    /// Clear all pending state for reuse across sessions.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.pending.clear();
        state.confirmed = false;
        state.seq = 0;
        state.binding = None;
    }

    /// Number of chunks accepted so far (monotonic until `reset`).
    pub fn sequence(&self) -> u64 {
        self.inner.state.lock().seq
    }

    /// True when nothing is pending and no drain task is running.
    pub fn is_drained(&self) -> bool {
        let state = self.inner.state.lock();
        state.pending.is_empty() && !state.draining
    }

    /// Start a drain task if the gate is open, work is pending, and none is
    /// already running. Caller holds the state lock, so the flag check and
    /// set are atomic: at most one drain task exists at any time.
    fn arm_drain(&self, state: &mut QueueState) {
        if state.confirmed && !state.draining && !state.pending.is_empty() && state.binding.is_some()
        {
            state.draining = true;
            let inner = Arc::clone(&self.inner);
            tokio::spawn(drain(inner));
        }
    }
}

/// How long delivery pauses while the bound session is mid-reconnect.
const RECONNECT_HOLD: Duration = Duration::from_millis(50);

/// The single drain loop: pop from the front and deliver while the gate is
/// open. Per-chunk delivery failures are logged and the next chunk is
/// attempted; delivery order is never disturbed.
///
/// A session mid-reconnect refuses delivery, so the loop holds instead of
/// popping (and puts back a chunk whose send raced the window opening):
/// audio buffered during the reconnect is delivered intact once the window
/// closes.
///
/// The stop decision and the clearing of the `draining` flag happen under
/// the same lock acquisition, so there is no window between "decided to
/// stop" and "actually stopped": a concurrent `enqueue` or
/// `confirm_session` either observes `draining == true` and leaves the work
/// to this loop's next iteration, or observes `draining == false` and arms a
/// fresh drain itself.
async fn drain(inner: Arc<QueueInner>) {
    loop {
        let (chunk, binding) = {
            let mut state = inner.state.lock();
            if !state.confirmed || state.pending.is_empty() || state.binding.is_none() {
                state.draining = false;
                return;
            }
            let binding = state.binding.clone().expect("binding checked under lock");
            if binding.session.is_reconnecting() && binding.session.is_active() {
                (None, binding)
            } else {
                let chunk = state
                    .pending
                    .pop_front()
                    .expect("pending checked non-empty under lock");
                (Some(chunk), binding)
            }
        };
        let Some(chunk) = chunk else {
            tokio::time::sleep(RECONNECT_HOLD).await;
            continue;
        };

        if let Err(e) = binding.adapter.push_audio(&binding.session, &chunk).await {
            if binding.session.is_reconnecting() && binding.session.is_active() {
                inner.state.lock().pending.push_front(chunk);
                tokio::time::sleep(RECONNECT_HOLD).await;
                continue;
            }
            warn!(target: "stt", "Audio chunk delivery failed, continuing with next: {}", e);
        }
    }
}
