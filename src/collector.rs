// =============================================================================
// SignalCollector (C2)
// =============================================================================
//
// A single-threaded logical buffer with a reset-on-arrival debounce timer.
// Guarded by one mutex per spec.md §5 ("SignalCollector: one mutex guarding
// buffer and the single-threaded timer reset"): `receive` is concurrent with
// timer firing from the webhook handler's perspective, so both paths take
// the same lock.
//
// The overflow-truncation semantics on callback failure are taken verbatim
// from `signal_collector.py`'s `_flush` exception path (see SPEC_FULL.md
// §4.2): the re-queued failed batch is placed at the *front* of the merged
// buffer, and truncation drops from the *tail* — i.e. the newest signals
// that arrived during the failed callback are the ones lost, never the
// re-queued batch itself.
// =============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::signal::{Batch, Signal};

/// Hard cap multiplier on the debounce window's typical size (spec.md §4.2:
/// "a hard cap (4×W buffer size)"). `signal_buffer_size` is the nominal
/// per-window signal count; the cap is `4 * signal_buffer_size`.
const OVERFLOW_MULTIPLIER: usize = 4;

type DispatchFn = Arc<
    dyn Fn(Batch) -> Pin<Box<dyn Future<Output = Result<(), ()>> + Send>> + Send + Sync,
>;

struct Inner {
    buffer: Vec<Signal>,
    /// Generation counter: each `receive` call that arms a new timer bumps
    /// this. The sleeping flush task compares its captured generation
    /// against the current one to detect it was superseded by a later
    /// arrival (the "cancel pending timer, arm new timer" semantics of a
    /// single-threaded reset timer, expressed without an actual cancellable
    /// timer handle).
    generation: u64,
}

pub struct SignalCollector {
    inner: Mutex<Inner>,
    handler: Mutex<Option<DispatchFn>>,
    window: Duration,
    signal_buffer_size: usize,
}

impl SignalCollector {
    pub fn new(window_ms: u64, signal_buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner { buffer: Vec::new(), generation: 0 }),
            handler: Mutex::new(None),
            window: Duration::from_millis(window_ms),
            signal_buffer_size,
        })
    }

    /// Install the dispatcher callback invoked on timer fire. Set once at
    /// process wiring time in production; tests may install a fallible
    /// stub to exercise the overflow path.
    pub fn set_handler<F, Fut>(self: &Arc<Self>, f: F)
    where
        F: Fn(Batch) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ()>> + Send + 'static,
    {
        let wrapped: DispatchFn = Arc::new(move |b| Box::pin(f(b)));
        *self.handler.lock() = Some(wrapped);
    }

    fn overflow_cap(&self) -> usize {
        self.signal_buffer_size * OVERFLOW_MULTIPLIER
    }

    /// Append a signal, cancel the pending timer (by invalidating its
    /// generation), and arm a new one for `window` from now.
    pub fn receive(self: &Arc<Self>, signal: Signal) {
        let generation = {
            let mut inner = self.inner.lock();
            inner.buffer.push(signal);
            inner.generation += 1;
            inner.generation
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.window).await;
            this.try_flush(generation).await;
        });
    }

    /// Fires once the debounce window elapses. If a later `receive` bumped
    /// the generation in the meantime, this flush is stale and does
    /// nothing — the newer-armed timer will flush instead.
    async fn try_flush(self: &Arc<Self>, expected_generation: u64) {
        let snapshot = {
            let mut inner = self.inner.lock();
            if inner.generation != expected_generation || inner.buffer.is_empty() {
                return;
            }
            std::mem::take(&mut inner.buffer)
        };
        self.deliver(snapshot).await;
    }

    /// Force an immediate flush regardless of timer state (used by shutdown
    /// and by tests).
    pub async fn flush_now(self: &Arc<Self>) -> Option<Batch> {
        let snapshot = {
            let mut inner = self.inner.lock();
            if inner.buffer.is_empty() {
                return None;
            }
            inner.generation += 1;
            std::mem::take(&mut inner.buffer)
        };
        let len = snapshot.len();
        self.deliver(snapshot.clone()).await;
        info!(len, "forced flush delivered");
        Some(snapshot)
    }

    async fn deliver(self: &Arc<Self>, snapshot: Batch) {
        let handler = self.handler.lock().clone();
        let Some(handler) = handler else { return };
        let batch_len = snapshot.len();
        match handler(snapshot.clone()).await {
            Ok(()) => {
                info!(batch_len, "signal batch delivered");
            }
            Err(()) => {
                warn!(batch_len, "batch callback failed, re-queueing at buffer head");
                self.requeue_head(snapshot);
            }
        }
    }

    /// Re-queue a failed batch at the head of the buffer, preserving order,
    /// then enforce the hard cap by truncating the tail (newest signals
    /// that arrived during the failed callback are dropped first).
    fn requeue_head(&self, failed_batch: Batch) {
        let mut inner = self.inner.lock();
        let mut merged = failed_batch;
        merged.append(&mut inner.buffer);
        let cap = self.overflow_cap();
        if merged.len() > cap {
            let dropped = merged.len() - cap;
            merged.truncate(cap);
            error!(dropped, cap, "signal buffer overflow, dropping newest signals");
        }
        inner.buffer = merged;
        inner.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{SignalEvent, SignalKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_signal() -> Signal {
        Signal {
            symbol: "GOLD".into(),
            price: 5200.0,
            timeframe: None,
            direction: None,
            kind: SignalKind::Structure,
            event: SignalEvent::LiquiditySweep,
            source: "test".into(),
            strength: "".into(),
            confirmed: None,
            tv_confidence: None,
            pattern_similarity: None,
            received_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn flush_now_returns_none_when_empty() {
        let collector = SignalCollector::new(500, 50);
        assert!(collector.flush_now().await.is_none());
    }

    #[tokio::test]
    async fn receive_then_flush_now_preserves_order() {
        let collector = SignalCollector::new(500, 50);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        collector.set_handler(move |_b| {
            calls2.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
        collector.receive(sample_signal());
        collector.receive(sample_signal());
        let batch = collector.flush_now().await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn overflow_cap_is_four_times_buffer_size() {
        let collector = SignalCollector::new(500, 50);
        assert_eq!(collector.overflow_cap(), 200);
    }

    #[test]
    fn requeue_head_preserves_batch_order_and_truncates_tail() {
        let collector = SignalCollector::new(500, 2); // cap = 8
        let failed_batch: Vec<Signal> = (0..3).map(|_| sample_signal()).collect();
        {
            let mut inner = collector.inner.lock();
            inner.buffer = (0..10).map(|_| sample_signal()).collect();
        }
        collector.requeue_head(failed_batch);
        let inner = collector.inner.lock();
        assert_eq!(inner.buffer.len(), 8);
    }

    #[tokio::test]
    async fn callback_failure_requeues_at_head() {
        let collector = SignalCollector::new(500, 50);
        collector.set_handler(|_b| async { Err(()) });
        collector.receive(sample_signal());
        collector.receive(sample_signal());
        // flush_now drives the handler directly (no timer involved) and
        // observes the requeue-on-failure path.
        let _ = collector.flush_now().await;
        let inner = collector.inner.lock();
        assert_eq!(inner.buffer.len(), 2);
    }
}
