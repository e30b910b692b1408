use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// A callback scheduled on the runtime. Dropping it cancels the callback.
#[derive(Debug)]
pub struct DeferredAction {
    handle: JoinHandle<()>,
}

impl DeferredAction {
    /// Run `f` once after `delay`.
    pub fn once<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            f();
        });
        Self { handle }
    }

    /// Run `f` every `period`, first after one full period.
    pub fn repeating<F>(period: Duration, mut f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                f();
            }
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {}
}

impl Drop for DeferredAction {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn advance(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn once_fires_after_delay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let action = DeferredAction::once(Duration::from_millis(100), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        advance(99).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        advance(2).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(action.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_cancels() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let action = DeferredAction::once(Duration::from_millis(100), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        advance(50).await;
        action.cancel();
        advance(200).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_fires_each_period_until_dropped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let action = DeferredAction::repeating(Duration::from_secs(1), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        advance(500).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        advance(3_000).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        drop(action);
        advance(5_000).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
