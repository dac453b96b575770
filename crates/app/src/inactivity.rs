//! Inactivity countdown with an audio-aware grace period.
//!
//! While the overlay is up, a countdown runs from the last text update. When
//! it expires the monitor does not stop immediately: someone may still be
//! speaking even though no new text has arrived yet, so it polls the input
//! level and only stops after a continuous quiet window. Any level spike
//! resets the quiet counter; any text activity restarts the countdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::collab::AudioLevelSource;

/// Tunables for the countdown and the grace period.
#[derive(Debug, Clone)]
pub struct InactivityConfig {
    /// Countdown restarted on every non-empty text update.
    pub timeout: Duration,
    /// Input level sampling interval during the grace period.
    pub poll_interval: Duration,
    /// Continuous quiet required before the auto-stop fires.
    pub quiet_window: Duration,
    /// Levels below this count as quiet.
    pub level_threshold: f32,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
            quiet_window: Duration::from_millis(800),
            level_threshold: 0.015,
        }
    }
}

/// Drives the inactivity countdown for one recording.
///
/// `run` resolves when the auto-stop should fire; the caller owns what
/// happens next. Progress is observable in `[0.0, 1.0]` for the overlay's
/// countdown ring.
pub struct InactivityMonitor {
    config: InactivityConfig,
    activity_tx: watch::Sender<u64>,
    progress_tx: watch::Sender<f32>,
}

impl InactivityMonitor {
    pub fn new(config: InactivityConfig) -> Self {
        let (activity_tx, _) = watch::channel(0);
        let (progress_tx, _) = watch::channel(0.0);
        Self {
            config,
            activity_tx,
            progress_tx,
        }
    }

    /// Restart the countdown (called on every non-empty text update).
    pub fn record_activity(&self) {
        self.activity_tx.send_modify(|n| *n += 1);
    }

    /// Countdown progress, 0.0 (fresh activity) to 1.0 (expired).
    pub fn progress(&self) -> watch::Receiver<f32> {
        self.progress_tx.subscribe()
    }

    /// Run until an auto-stop is due.
    pub async fn run(&self, levels: Arc<dyn AudioLevelSource>) {
        let mut activity_rx = self.activity_tx.subscribe();
        'countdown: loop {
            let started = tokio::time::Instant::now();
            let deadline = started + self.config.timeout;
            loop {
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    break;
                }
                let fraction =
                    (now - started).as_secs_f32() / self.config.timeout.as_secs_f32();
                let _ = self.progress_tx.send(fraction.clamp(0.0, 1.0));
                let next_tick = deadline.min(now + self.config.poll_interval);
                tokio::select! {
                    changed = activity_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue 'countdown;
                    }
                    _ = tokio::time::sleep_until(next_tick) => {}
                }
            }

            let _ = self.progress_tx.send(1.0);
            debug!(target: "stt", "Inactivity countdown expired, entering grace period");
            let mut quiet = Duration::ZERO;
            loop {
                tokio::select! {
                    changed = activity_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue 'countdown;
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {
                        if levels.level() < self.config.level_threshold {
                            quiet += self.config.poll_interval;
                            if quiet >= self.config.quiet_window {
                                debug!(target: "stt", "Grace period quiet, auto-stop due");
                                return;
                            }
                        } else {
                            quiet = Duration::ZERO;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct StubLevel(Mutex<f32>);

    impl StubLevel {
        fn set(&self, level: f32) {
            *self.0.lock() = level;
        }
    }

    impl AudioLevelSource for StubLevel {
        fn level(&self) -> f32 {
            *self.0.lock()
        }
    }

    fn fast_forward_config() -> InactivityConfig {
        InactivityConfig::default()
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_expiry_stops_after_the_grace_window() {
        let monitor = Arc::new(InactivityMonitor::new(fast_forward_config()));
        let level = Arc::new(StubLevel(Mutex::new(0.0)));
        let handle = {
            let monitor = Arc::clone(&monitor);
            let level: Arc<dyn AudioLevelSource> = level;
            tokio::spawn(async move { monitor.run(level).await })
        };
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_millis(29_900)).await;
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        // 30 s expiry plus 800 ms continuous quiet.
        tokio::time::advance(Duration::from_millis(1_000)).await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("auto-stop never fired")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn spike_during_grace_postpones_the_stop() {
        let monitor = Arc::new(InactivityMonitor::new(fast_forward_config()));
        let level = Arc::new(StubLevel(Mutex::new(0.0)));
        let handle = {
            let monitor = Arc::clone(&monitor);
            let source: Arc<dyn AudioLevelSource> = level.clone();
            tokio::spawn(async move { monitor.run(source).await })
        };
        tokio::task::yield_now().await;

        // Countdown expires at 30 s; 150 ms of quiet accumulates.
        tokio::time::advance(Duration::from_millis(30_150)).await;
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        // Spike at ~30.2 s resets the quiet counter.
        level.set(0.8);
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        level.set(0.0);

        // 700 ms of quiet: still below the window.
        tokio::time::advance(Duration::from_millis(700)).await;
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("auto-stop never fired after quiet window")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn activity_restarts_the_countdown() {
        let monitor = Arc::new(InactivityMonitor::new(fast_forward_config()));
        let level = Arc::new(StubLevel(Mutex::new(0.0)));
        let handle = {
            let monitor = Arc::clone(&monitor);
            let level: Arc<dyn AudioLevelSource> = level;
            tokio::spawn(async move { monitor.run(level).await })
        };

        tokio::time::advance(Duration::from_millis(29_000)).await;
        tokio::task::yield_now().await;
        monitor.record_activity();
        tokio::task::yield_now().await;

        // The old deadline passes without effect.
        tokio::time::advance(Duration::from_millis(5_000)).await;
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        tokio::time::advance(Duration::from_millis(26_000)).await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("auto-stop never fired")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn progress_reaches_one_at_expiry() {
        let monitor = Arc::new(InactivityMonitor::new(fast_forward_config()));
        let level = Arc::new(StubLevel(Mutex::new(1.0)));
        let mut progress = monitor.progress();
        let handle = {
            let monitor = Arc::clone(&monitor);
            let level: Arc<dyn AudioLevelSource> = level;
            tokio::spawn(async move { monitor.run(level).await })
        };
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_millis(15_000)).await;
        tokio::task::yield_now().await;
        let halfway = *progress.borrow_and_update();
        assert!((0.4..0.6).contains(&halfway), "progress at 15s: {}", halfway);

        tokio::time::advance(Duration::from_millis(15_100)).await;
        tokio::task::yield_now().await;
        assert_eq!(*progress.borrow_and_update(), 1.0);

        // Loud level keeps the grace period alive indefinitely.
        tokio::time::advance(Duration::from_millis(5_000)).await;
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
