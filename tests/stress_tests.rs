//! Concurrency stress: many reporters, a live collector and lifecycle churn
//! against one pipeline.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use session_telemetry::core::config::Config;
use session_telemetry::platform::events::PlatformEvent;
use session_telemetry::platform::pal::Platform;

use common::{Stack, quiet_config};

#[test]
fn stress_parallel_reporters_with_live_collector() {
    let mut config = Config::default();
    config.monitor.memory_sample_interval_ms = 5;
    config.dashboard.refresh_interval_ms = 5;
    config.tracker.max_errors = 10_000;
    let stack = Arc::new(Stack::started(&config));
    stack.platform.set_heap_used_mb(40);

    let updates = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&updates);
    let _sub = stack.dashboard.on_metrics_update(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    let workers: Vec<_> = (0..4)
        .map(|w| {
            let stack = Arc::clone(&stack);
            thread::spawn(move || {
                for i in 0..100 {
                    if i % 10 == 0 {
                        stack.platform.emit(PlatformEvent::Click {
                            target: format!("button#w{w}"),
                        });
                    }
                    stack.tracker.report_error(format!("worker {w} failure {i}"), None);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }
    thread::sleep(Duration::from_millis(50));

    assert_eq!(stack.tracker.get_session_errors().len(), 400);
    assert!(updates.load(Ordering::Relaxed) > 0, "collector never ran");
    let metrics = stack.dashboard.collect_current_metrics();
    assert_eq!(metrics.errors.total, 400);

    stack.dashboard.stop_monitoring();
    stack.tracker.stop_tracking();
    stack.monitor.stop_monitoring();
    assert_eq!(stack.platform.events().listener_count(), 0);
}

#[test]
fn stress_lifecycle_churn_while_events_flow() {
    let stack = Arc::new(Stack::started(&quiet_config()));
    let emitter = {
        let stack = Arc::clone(&stack);
        thread::spawn(move || {
            for i in 0..500 {
                stack.platform.emit(PlatformEvent::LayoutShift {
                    value: 0.001,
                    had_recent_input: false,
                });
                if i % 50 == 0 {
                    stack.platform.emit(PlatformEvent::KeyDown {
                        key: "Enter".to_string(),
                    });
                }
            }
        })
    };
    for _ in 0..50 {
        stack.dashboard.stop_monitoring();
        stack.tracker.stop_tracking();
        stack.tracker.start_tracking();
        stack.dashboard.start_monitoring().expect("restart");
    }
    emitter.join().expect("emitter panicked");

    assert_eq!(stack.platform.events().listener_count(), 2);
    assert!(stack.dashboard.is_monitoring());
    assert!(stack.tracker.is_tracking());
}

#[test]
fn stress_ticker_stop_from_inside_callback() {
    let mut config = Config::default();
    config.dashboard.refresh_interval_ms = 2;
    let stack = Arc::new(Stack::started(&config));
    let fired = Arc::new(AtomicUsize::new(0));
    let weak = Arc::downgrade(&stack);
    let counter = Arc::clone(&fired);
    let _sub = stack.dashboard.on_metrics_update(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(stack) = weak.upgrade() {
            stack.dashboard.stop_monitoring();
        }
    });

    thread::sleep(Duration::from_millis(100));
    assert!(!stack.dashboard.is_monitoring());
    let after_stop = fired.load(Ordering::SeqCst);
    assert!(after_stop >= 1);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(fired.load(Ordering::SeqCst), after_stop);
}
