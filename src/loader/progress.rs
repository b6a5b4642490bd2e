//! Load progress
//!
//! `ProgressCounter` is the running total of records acknowledged by the
//! sink. It is handed to the loader explicitly so every test can own its own
//! counter. `ProgressDisplay` renders a counter on the terminal.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared, thread-safe count of records submitted to the sink
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter {
    records: Arc<AtomicU64>,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, records: u64) {
        self.records.fetch_add(records, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }
}

/// Terminal spinner that periodically shows a `ProgressCounter`
pub struct ProgressDisplay {
    bar: ProgressBar,
    stop: watch::Sender<bool>,
    ticker: JoinHandle<()>,
}

impl ProgressDisplay {
    /// Start refreshing `counter` every `update_interval`
    pub fn start(counter: ProgressCounter, update_interval: Duration) -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {pos} records inserted ({per_sec}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);

        let (stop, mut stopped) = watch::channel(false);
        let refreshed = bar.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(update_interval.max(Duration::from_millis(10)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        refreshed.set_position(counter.get());
                        refreshed.tick();
                    }
                    _ = stopped.changed() => break,
                }
            }
        });

        Self { bar, stop, ticker }
    }

    /// Stop refreshing and leave the final count on screen
    pub async fn finish(self, counter: &ProgressCounter) {
        let bar = self.stop_ticker().await;
        bar.set_position(counter.get());
        bar.finish_with_message("done");
    }

    /// Stop refreshing after a failure; the count stays where it was
    pub async fn abandon(self, reason: &str) {
        let bar = self.stop_ticker().await;
        bar.abandon_with_message(format!("failed: {}", reason));
    }

    async fn stop_ticker(self) -> ProgressBar {
        let _ = self.stop.send(true);
        let _ = self.ticker.await;
        self.bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_shared_between_clones() {
        let counter = ProgressCounter::new();
        let clone = counter.clone();
        clone.add(3);
        counter.add(2);
        assert_eq!(counter.get(), 5);
        assert_eq!(clone.get(), 5);
    }

    #[tokio::test]
    async fn test_counter_concurrent_increments() {
        let counter = ProgressCounter::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                tokio::spawn(async move {
                    for _ in 0..1000 {
                        counter.add(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.get(), 8000);
    }

    #[tokio::test]
    async fn test_display_stops_on_finish() {
        let counter = ProgressCounter::new();
        let display = ProgressDisplay::start(counter.clone(), Duration::from_millis(10));
        counter.add(42);
        tokio::time::sleep(Duration::from_millis(30)).await;
        display.finish(&counter).await;
    }
}
