//! Delivery-queue ordering properties.
//!
//! The queue must deliver buffers to the adapter in enqueue order, exactly
//! once, for any interleaving of `enqueue` calls and a later
//! `confirm_session` — and per-chunk delivery failures must not disturb the
//! order of the remaining chunks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use murmur_foundation::TranscriptionError;
use murmur_stt::{DeliveryQueue, ProviderConfig, Session, StreamingAdapter};

/// Adapter double that records every delivered buffer.
#[derive(Default)]
struct RecordingAdapter {
    delivered: Mutex<Vec<Vec<u8>>>,
    /// 1-based indices of deliveries that should fail.
    fail_on: Mutex<Vec<usize>>,
    calls: Mutex<usize>,
}

impl RecordingAdapter {
    fn delivered(&self) -> Vec<Vec<u8>> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl StreamingAdapter for RecordingAdapter {
    fn provider_name(&self) -> &'static str {
        "recording"
    }

    fn validate_config(&self, _config: &ProviderConfig) -> Result<(), TranscriptionError> {
        Ok(())
    }

    async fn start_session(
        &self,
        _config: &ProviderConfig,
    ) -> Result<Session, TranscriptionError> {
        Ok(Session::new())
    }

    async fn push_audio(
        &self,
        _session: &Session,
        audio: &[u8],
    ) -> Result<(), TranscriptionError> {
        // Yield so concurrent enqueues can interleave with the drain loop.
        tokio::task::yield_now().await;
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };
        if self.fail_on.lock().contains(&call) {
            return Err(TranscriptionError::Network("simulated send failure".into()));
        }
        self.delivered.lock().push(audio.to_vec());
        Ok(())
    }

    async fn finish(&self, _session: &Session) -> Result<String, TranscriptionError> {
        Ok(String::new())
    }
}

async fn wait_drained(queue: &DeliveryQueue) {
    for _ in 0..200 {
        if queue.is_drained() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("queue never drained");
}

fn chunk(i: usize) -> Vec<u8> {
    vec![i as u8; 4]
}

#[tokio::test]
async fn fifo_preserved_across_confirmation_boundary() {
    let adapter = Arc::new(RecordingAdapter::default());
    let queue = DeliveryQueue::new();
    queue.configure(adapter.clone(), Session::new());

    // Chunks arrive before the session is ready.
    for i in 0..5 {
        queue.enqueue(chunk(i));
    }
    assert!(adapter.delivered().is_empty());
    assert_eq!(queue.sequence(), 5);

    queue.confirm_session();
    wait_drained(&queue).await;

    let expected: Vec<Vec<u8>> = (0..5).map(chunk).collect();
    assert_eq!(adapter.delivered(), expected);
}

#[tokio::test]
async fn chunks_enqueued_during_drain_are_not_lost_or_reordered() {
    let adapter = Arc::new(RecordingAdapter::default());
    let queue = DeliveryQueue::new();
    queue.configure(adapter.clone(), Session::new());

    queue.confirm_session();

    // Single writer, interleaving with the running drain loop.
    for i in 0..100 {
        queue.enqueue(chunk(i));
        if i % 7 == 0 {
            tokio::task::yield_now().await;
        }
    }

    wait_drained(&queue).await;

    let expected: Vec<Vec<u8>> = (0..100).map(chunk).collect();
    assert_eq!(adapter.delivered(), expected);
}

#[tokio::test]
async fn late_confirmation_races_with_enqueue_without_duplicates() {
    let adapter = Arc::new(RecordingAdapter::default());
    let queue = DeliveryQueue::new();
    queue.configure(adapter.clone(), Session::new());

    let writer_queue = queue.clone();
    let writer = tokio::spawn(async move {
        for i in 0..50 {
            writer_queue.enqueue(chunk(i));
            tokio::task::yield_now().await;
        }
    });

    // Confirm while the writer is mid-stream.
    tokio::task::yield_now().await;
    queue.confirm_session();

    writer.await.unwrap();
    wait_drained(&queue).await;

    let expected: Vec<Vec<u8>> = (0..50).map(chunk).collect();
    assert_eq!(adapter.delivered(), expected);
}

#[tokio::test]
async fn delivery_error_skips_chunk_but_continues() {
    let adapter = Arc::new(RecordingAdapter::default());
    adapter.fail_on.lock().push(2);
    let queue = DeliveryQueue::new();
    queue.configure(adapter.clone(), Session::new());

    for i in 0..3 {
        queue.enqueue(chunk(i));
    }
    queue.confirm_session();
    wait_drained(&queue).await;

    // Chunk 1 (second delivery) failed; 0 and 2 still arrive in order.
    assert_eq!(adapter.delivered(), vec![chunk(0), chunk(2)]);
}

#[tokio::test]
async fn reconnect_window_holds_chunks_until_it_closes() {
    let adapter = Arc::new(RecordingAdapter::default());
    let queue = DeliveryQueue::new();
    let session = Session::new();
    queue.configure(adapter.clone(), session.clone());
    queue.confirm_session();

    // Audio keeps arriving while the session is mid-reconnect.
    session.set_reconnecting(true);
    for i in 0..5 {
        queue.enqueue(chunk(i));
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(adapter.delivered().is_empty());
    assert!(!queue.is_drained());

    // Window closes: everything buffered drains in order, nothing lost.
    session.set_reconnecting(false);
    queue.enqueue(chunk(9));
    wait_drained(&queue).await;

    let expected: Vec<Vec<u8>> = (0..5).chain(std::iter::once(9)).map(chunk).collect();
    assert_eq!(adapter.delivered(), expected);
}

#[tokio::test]
async fn reset_clears_gate_and_pending_state() {
    let adapter = Arc::new(RecordingAdapter::default());
    let queue = DeliveryQueue::new();
    queue.configure(adapter.clone(), Session::new());

    queue.enqueue(chunk(0));
    queue.reset();
    queue.configure(adapter.clone(), Session::new());
    queue.confirm_session();
    queue.enqueue(chunk(1));
    wait_drained(&queue).await;

    assert_eq!(adapter.delivered(), vec![chunk(1)]);
    assert_eq!(queue.sequence(), 1);
}
