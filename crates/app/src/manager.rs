//! Per-recording orchestrator.
//!
//! `TranscriptionManager` drives one streaming session at a time through
//! `Idle -> Establishing -> Streaming -> Finalizing -> {Completed | Failed}`.
//! It owns the delivery queue, the partial consumer feeding the stabilizer,
//! the optional inactivity monitor, and the completion callback. A failed
//! session is never retried here; the caller starts a fresh transcription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_foundation::{real_clock, ConnectionState, ConnectionStateHub, SharedClock, TranscriptionError};
use murmur_stt::adapter::CONNECT_TIMEOUT;
use murmur_stt::{DeliveryQueue, ProviderConfig, Session, StreamingAdapter, TranscriptStabilizer};

use crate::collab::{AudioChunkStream, AudioLevelSource, TextInjector};
use crate::inactivity::{InactivityConfig, InactivityMonitor};

/// PCM16 mono at 24 kHz: 48 bytes of audio per millisecond.
const PCM16_BYTES_PER_MS: u64 = 48;

/// How long end-of-audio waits for queued chunks to flush.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionPhase {
    Idle,
    Establishing,
    Streaming,
    Finalizing,
    Completed,
    Failed(TranscriptionError),
}

/// Delivered to the completion callback when a recording ends, success or
/// not.
#[derive(Debug, Clone)]
pub struct CompletionSummary {
    pub provider: &'static str,
    pub model: String,
    pub success: bool,
    pub audio_duration_ms: u64,
    pub processing_time_ms: u64,
}

type CompletionCallback = Box<dyn Fn(CompletionSummary) + Send + Sync>;

pub struct TranscriptionManagerBuilder {
    adapter: Arc<dyn StreamingAdapter>,
    injector: Arc<dyn TextInjector>,
    levels: Option<Arc<dyn AudioLevelSource>>,
    inactivity: InactivityConfig,
    clock: SharedClock,
    hub: Option<ConnectionStateHub>,
    completion: Option<CompletionCallback>,
}

impl TranscriptionManagerBuilder {
    /// Overlay mode: final text is held until `finalize_transcription` and
    /// the inactivity monitor runs against this level source.
    pub fn overlay(mut self, levels: Arc<dyn AudioLevelSource>) -> Self {
        self.levels = Some(levels);
        self
    }

    pub fn inactivity(mut self, config: InactivityConfig) -> Self {
        self.inactivity = config;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Share a connection-state hub with other publishers (an adapter's
    /// reconnect reporting, say) so every transition lands on the same
    /// subscribers.
    pub fn connection_hub(mut self, hub: ConnectionStateHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn on_completion(
        mut self,
        callback: impl Fn(CompletionSummary) + Send + Sync + 'static,
    ) -> Self {
        self.completion = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> TranscriptionManager {
        let (_, progress_rx) = watch::channel(0.0);
        TranscriptionManager {
            inner: Arc::new(ManagerInner {
                adapter: self.adapter,
                injector: self.injector,
                levels: self.levels,
                inactivity: self.inactivity,
                clock: self.clock,
                completion: self.completion,
                hub: self.hub.unwrap_or_default(),
                queue: DeliveryQueue::new(),
                phase: Mutex::new(TranscriptionPhase::Idle),
                stabilizer: Mutex::new(TranscriptStabilizer::new()),
                last_transcription: Mutex::new(None),
                session: Mutex::new(None),
                stop_tx: Mutex::new(None),
                pending_failure: Mutex::new(None),
                audio_bytes: AtomicU64::new(0),
                progress_rx: Mutex::new(progress_rx),
            }),
        }
    }
}

struct ManagerInner {
    adapter: Arc<dyn StreamingAdapter>,
    injector: Arc<dyn TextInjector>,
    levels: Option<Arc<dyn AudioLevelSource>>,
    inactivity: InactivityConfig,
    clock: SharedClock,
    completion: Option<CompletionCallback>,
    hub: ConnectionStateHub,
    queue: DeliveryQueue,
    phase: Mutex<TranscriptionPhase>,
    stabilizer: Mutex<TranscriptStabilizer>,
    last_transcription: Mutex<Option<String>>,
    session: Mutex<Option<Session>>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    pending_failure: Mutex<Option<TranscriptionError>>,
    audio_bytes: AtomicU64,
    progress_rx: Mutex<watch::Receiver<f32>>,
}

/// Cheap-clone handle to the orchestrator.
#[derive(Clone)]
pub struct TranscriptionManager {
    inner: Arc<ManagerInner>,
}

impl TranscriptionManager {
    pub fn builder(
        adapter: Arc<dyn StreamingAdapter>,
        injector: Arc<dyn TextInjector>,
    ) -> TranscriptionManagerBuilder {
        TranscriptionManagerBuilder {
            adapter,
            injector,
            levels: None,
            inactivity: InactivityConfig::default(),
            clock: real_clock(),
            hub: None,
            completion: None,
        }
    }

    pub fn new(
        adapter: Arc<dyn StreamingAdapter>,
        injector: Arc<dyn TextInjector>,
    ) -> Self {
        Self::builder(adapter, injector).build()
    }

    pub fn phase(&self) -> TranscriptionPhase {
        self.inner.phase.lock().clone()
    }

    pub fn is_transcribing(&self) -> bool {
        matches!(
            *self.inner.phase.lock(),
            TranscriptionPhase::Establishing
                | TranscriptionPhase::Streaming
                | TranscriptionPhase::Finalizing
        )
    }

    /// Stabilized display text: finalized segments plus the safe partial.
    pub fn current_text(&self) -> String {
        self.inner.stabilizer.lock().complete_transcription()
    }

    pub fn last_transcription(&self) -> Option<String> {
        self.inner.last_transcription.lock().clone()
    }

    pub fn connection_states(&self) -> ConnectionStateHub {
        self.inner.hub.clone()
    }

    /// Inactivity countdown progress of the current recording, `[0.0, 1.0]`.
    pub fn inactivity_progress(&self) -> f32 {
        *self.inner.progress_rx.lock().borrow()
    }

    /// Establish a session and start streaming the capture sequence.
    ///
    /// Returns once the session is confirmed and audio is flowing; the rest
    /// of the recording runs in background tasks until the stream ends,
    /// `stop_transcription` is called, or the inactivity monitor fires.
    pub async fn start_transcription(
        &self,
        audio: Box<dyn AudioChunkStream>,
        config: ProviderConfig,
    ) -> Result<(), TranscriptionError> {
        let inner = &self.inner;
        {
            let mut phase = inner.phase.lock();
            if matches!(
                *phase,
                TranscriptionPhase::Establishing
                    | TranscriptionPhase::Streaming
                    | TranscriptionPhase::Finalizing
            ) {
                return Err(TranscriptionError::Session(
                    "a transcription is already running".into(),
                ));
            }
            *phase = TranscriptionPhase::Establishing;
        }
        inner.stabilizer.lock().reset();
        *inner.last_transcription.lock() = None;
        *inner.pending_failure.lock() = None;
        inner.audio_bytes.store(0, Ordering::Relaxed);
        inner.queue.reset();
        inner.hub.publish(ConnectionState::Connecting);
        let started = inner.clock.now();

        if let Err(e) = inner.adapter.validate_config(&config) {
            return Err(self.establishment_failed(e));
        }
        let session = match inner.adapter.start_session(&config).await {
            Ok(session) => session,
            Err(e) => return Err(self.establishment_failed(e)),
        };
        if let Err(e) = session.wait_ready(CONNECT_TIMEOUT).await {
            session.cleanup().await;
            return Err(self.establishment_failed(e));
        }
        info!(target: "stt", session_id = session.id(), provider = inner.adapter.provider_name(), "Session ready, streaming");
        inner.hub.publish(ConnectionState::Connected);

        inner.queue.configure(Arc::clone(&inner.adapter), session.clone());
        inner.queue.confirm_session();
        *inner.session.lock() = Some(session.clone());

        let (stop_tx, stop_rx) = watch::channel(false);
        *inner.stop_tx.lock() = Some(stop_tx.clone());

        let monitor = inner.levels.clone().map(|levels| {
            let monitor = Arc::new(InactivityMonitor::new(inner.inactivity.clone()));
            *inner.progress_rx.lock() = monitor.progress();
            let handle = {
                let monitor = Arc::clone(&monitor);
                tokio::spawn(async move {
                    monitor.run(levels).await;
                    info!(target: "stt", "Inactivity auto-stop");
                    let _ = stop_tx.send(true);
                })
            };
            (monitor, handle)
        });
        let (monitor, monitor_handle) = match monitor {
            Some((m, h)) => (Some(m), Some(h)),
            None => (None, None),
        };

        tokio::spawn(consume_partials(
            Arc::clone(inner),
            session.clone(),
            monitor,
        ));
        *inner.phase.lock() = TranscriptionPhase::Streaming;
        tokio::spawn(run_pipeline(
            Arc::clone(inner),
            audio,
            session,
            config,
            started,
            stop_rx,
            monitor_handle,
        ));
        Ok(())
    }

    /// Stop feeding audio and finalize the current recording. No effect when
    /// idle.
    pub fn stop_transcription(&self) {
        if let Some(stop_tx) = self.inner.stop_tx.lock().as_ref() {
            let _ = stop_tx.send(true);
        }
    }

    /// The finished transcript; in overlay mode this is also the deferred
    /// injection point.
    pub async fn finalize_transcription(&self) -> Result<String, TranscriptionError> {
        let text = self
            .inner
            .last_transcription
            .lock()
            .clone()
            .unwrap_or_else(|| self.inner.stabilizer.lock().complete_transcription());
        if self.inner.levels.is_some() && !text.is_empty() {
            self.inner.injector.inject(&text).await?;
        }
        Ok(text)
    }

    fn establishment_failed(&self, error: TranscriptionError) -> TranscriptionError {
        fail(&self.inner, error.clone());
        error
    }
}

fn fail(inner: &ManagerInner, error: TranscriptionError) {
    warn!(target: "stt", "Transcription failed: {}", error);
    inner.hub.publish(ConnectionState::Error(error.to_string()));
    *inner.phase.lock() = TranscriptionPhase::Failed(error);
}

/// Record a mid-stream failure and trigger the stop path. The terminal
/// `Failed` phase is applied by the pipeline after its teardown, so
/// `is_transcribing` stays true until the recording's state is fully
/// released.
fn record_failure(inner: &ManagerInner, error: TranscriptionError) {
    warn!(target: "stt", "Streaming failure: {}", error);
    inner.hub.publish(ConnectionState::Error(error.to_string()));
    let mut pending = inner.pending_failure.lock();
    if pending.is_none() {
        *pending = Some(error);
    }
}

/// Single consumer of the session's partial-result sequence.
///
/// Feeds the stabilizer, pings the inactivity monitor, and (without an
/// overlay) injects each final chunk as it arrives. In-band errors record a
/// pending failure and trigger the stop path; the pipeline turns that into
/// the terminal `Failed` phase once teardown is done.
async fn consume_partials(
    inner: Arc<ManagerInner>,
    session: Session,
    monitor: Option<Arc<InactivityMonitor>>,
) {
    let Some(mut partials) = session.take_partials() else {
        warn!(target: "stt", session_id = session.id(), "Partial stream already consumed");
        return;
    };
    while let Some(item) = partials.recv().await {
        match item {
            Ok(chunk) => {
                inner.stabilizer.lock().observe(&chunk);
                if !chunk.text.trim().is_empty() {
                    if let Some(monitor) = &monitor {
                        monitor.record_activity();
                    }
                }
                if chunk.is_final && inner.levels.is_none() {
                    if let Err(e) = inner.injector.inject(&chunk.text).await {
                        record_failure(&inner, e);
                        request_stop(&inner);
                        return;
                    }
                }
            }
            Err(e) => {
                record_failure(&inner, e);
                request_stop(&inner);
                return;
            }
        }
    }
    debug!(target: "stt", session_id = session.id(), "Partial stream ended");
}

fn request_stop(inner: &ManagerInner) {
    if let Some(stop_tx) = inner.stop_tx.lock().as_ref() {
        let _ = stop_tx.send(true);
    }
}

/// Feed the capture stream into the delivery queue, then finish the session
/// and tear everything down without blocking the caller.
async fn run_pipeline(
    inner: Arc<ManagerInner>,
    mut audio: Box<dyn AudioChunkStream>,
    session: Session,
    config: ProviderConfig,
    started: Instant,
    mut stop_rx: watch::Receiver<bool>,
    monitor_handle: Option<JoinHandle<()>>,
) {
    loop {
        tokio::select! {
            stopped = stop_rx.wait_for(|&s| s) => {
                if stopped.is_ok() {
                    debug!(target: "stt", session_id = session.id(), "Stop requested");
                }
                break;
            }
            chunk = audio.next_chunk() => match chunk {
                Some(chunk) => {
                    inner.audio_bytes.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    inner.queue.enqueue(chunk);
                }
                None => {
                    debug!(target: "stt", session_id = session.id(), "Capture stream ended");
                    break;
                }
            }
        }
    }

    // Let queued audio flush before signaling end-of-audio.
    let flush_deadline = tokio::time::Instant::now() + FLUSH_TIMEOUT;
    while !inner.queue.is_drained() && tokio::time::Instant::now() < flush_deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let pending_failure = inner.pending_failure.lock().take();
    let outcome = match pending_failure {
        Some(e) => Err(e),
        None => {
            *inner.phase.lock() = TranscriptionPhase::Finalizing;
            inner.adapter.finish(&session).await
        }
    };
    if outcome.is_err() {
        session.cleanup().await;
    }

    // Tear down before publishing the terminal phase: once `is_transcribing`
    // turns false a caller may start a fresh recording, and that recording's
    // queue, session slot, and stop channel must not be clobbered here.
    if let Some(handle) = monitor_handle {
        handle.abort();
    }
    inner.queue.reset();
    *inner.session.lock() = None;
    *inner.stop_tx.lock() = None;

    let success = match outcome {
        Ok(transcript) => {
            info!(target: "stt", session_id = session.id(), chars = transcript.len(), "Transcription completed");
            *inner.last_transcription.lock() = Some(transcript);
            *inner.phase.lock() = TranscriptionPhase::Completed;
            inner.hub.publish(ConnectionState::Idle);
            true
        }
        Err(e) => {
            fail(&inner, e);
            false
        }
    };

    if let Some(callback) = &inner.completion {
        let audio_duration_ms = inner.audio_bytes.load(Ordering::Relaxed) / PCM16_BYTES_PER_MS;
        let processing_time_ms = inner
            .clock
            .now()
            .saturating_duration_since(started)
            .as_millis() as u64;
        callback(CompletionSummary {
            provider: inner.adapter.provider_name(),
            model: config.model.clone(),
            success,
            audio_duration_ms,
            processing_time_ms,
        });
    }
}
