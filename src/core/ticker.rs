//! Periodic background ticker: a named thread driven by `crossbeam_channel::tick`
//! with a stop channel for prompt shutdown.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, TryRecvError, bounded, select, tick};

use crate::core::errors::{Result, TelemetryError};
use crate::core::subscribers::panic_message;

/// Handle to a running ticker thread. Stops on drop.
pub struct Ticker {
    name: String,
    period: Duration,
    stop_tx: Option<Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl Ticker {
    /// Spawn a thread that calls `on_tick` every `period` until stopped.
    ///
    /// The first call happens one full period after spawning. A panicking tick
    /// is logged and the ticker keeps running.
    pub fn spawn<F>(name: &str, period: Duration, mut on_tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticks = tick(period.max(Duration::from_millis(1)));
        let thread_name = name.to_string();

        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticks) -> _ => {
                            // select! picks randomly among ready arms; a pending stop wins.
                            if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                                break;
                            }
                            if let Err(payload) = catch_unwind(AssertUnwindSafe(&mut on_tick)) {
                                tracing::error!(
                                    ticker = %thread_name,
                                    panic = %panic_message(payload.as_ref()),
                                    "tick panicked"
                                );
                            }
                        }
                    }
                }
                tracing::debug!(ticker = %thread_name, "ticker stopped");
            })
            .map_err(|source| TelemetryError::Runtime {
                details: format!("failed to spawn {name} thread: {source}"),
            })?;

        tracing::debug!(ticker = name, period_ms = period.as_millis(), "ticker started");
        Ok(Self {
            name: name.to_string(),
            period,
            stop_tx: Some(stop_tx),
            join: Some(join),
        })
    }

    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the thread and wait for it, unless called from the ticker thread itself.
    pub fn stop(&mut self) {
        // Disconnecting the channel wakes the select even if a stop message is already queued.
        self.stop_tx.take();
        if let Some(join) = self.join.take() {
            if join.thread().id() == thread::current().id() {
                return;
            }
            if join.join().is_err() {
                tracing::warn!(ticker = %self.name, "ticker thread terminated abnormally");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticker")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("running", &self.join.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Ticker;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut ticker = Ticker::spawn("tlm-test-ticker", Duration::from_millis(5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .expect("spawn ticker");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        ticker.stop();
        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 3, "expected at least 3 ticks, got {after_stop}");

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut ticker =
            Ticker::spawn("tlm-test-idem", Duration::from_secs(60), || {}).expect("spawn ticker");
        ticker.stop();
        ticker.stop();
        assert_eq!(ticker.period(), Duration::from_secs(60));
    }

    #[test]
    fn panicking_tick_keeps_ticker_alive() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut ticker = Ticker::spawn("tlm-test-panic", Duration::from_millis(5), move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            assert!(n != 0, "first tick fails");
        })
        .expect("spawn ticker");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        ticker.stop();
        assert!(count.load(Ordering::SeqCst) >= 3);
    }
}
