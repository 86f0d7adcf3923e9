use super::*;
use crate::error::BridgeError;
use crate::host::{HostException, HostFunction, HostRuntime, HostValue};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Builds an echo bridge whose callable records every request it sees, in order.
fn recording_bridge(
    rt: &HostRuntime,
    capacity: usize,
) -> (ThreadSafeCallbackBridge<String, String>, Rc<RefCell<Vec<String>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let bridge = ThreadSafeCallbackBridge::new(rt, "echo", capacity, move |tag: String| {
        log.borrow_mut().push(tag.clone());
        Ok(format!("echo-{}", tag))
    });
    (bridge, seen)
}

/// Pumps the host loop until `workers` threads have bumped `done`.
fn pump_until(rt: &HostRuntime, done: &AtomicUsize, workers: usize) {
    while done.load(Ordering::SeqCst) < workers {
        rt.run_pending();
        thread::yield_now();
    }
    rt.run_pending();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_thread_invoke_runs_inline() {
        let rt = HostRuntime::new("inline");
        let (bridge, seen) = recording_bridge(&rt, 0);

        // No pumping: a queued call would never complete.
        assert_eq!(bridge.invoke("a".to_string()).unwrap(), "echo-a");
        assert_eq!(bridge.calls_serviced(), 0);
        assert_eq!(seen.borrow().as_slice(), ["a"]);
    }

    #[test]
    fn test_worker_invoke_is_serviced_by_host_turn() {
        let rt = HostRuntime::new("worker");
        let (bridge, seen) = recording_bridge(&rt, 0);
        let bridge = Arc::new(bridge);

        let remote = Arc::clone(&bridge);
        let reply = rt
            .run_worker("caller", move || remote.invoke("w".to_string()))
            .unwrap()
            .unwrap();

        assert_eq!(reply, "echo-w");
        assert_eq!(bridge.calls_serviced(), 1);
        assert_eq!(seen.borrow().as_slice(), ["w"]);
    }

    #[test]
    fn test_host_exception_reaches_the_worker() {
        let rt = HostRuntime::new("boom");
        let feed = HostFunction::new(|_| Err(HostException::new("boom")));
        let bridge = Arc::new(ThreadSafeCallbackBridge::new(&rt, "feed", 0, move |()| {
            let value: HostValue = feed.call(&[])?;
            Ok(value.to_display_string())
        }));

        let remote = Arc::clone(&bridge);
        let err = rt
            .run_worker("caller", move || remote.invoke(()))
            .unwrap()
            .unwrap_err();

        assert_eq!(
            err,
            BridgeError::HostException {
                bridge: "feed".into(),
                message: "boom".into()
            }
        );
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_host_panic_is_caught_and_forwarded() {
        let rt = HostRuntime::new("panic");
        let bridge = Arc::new(ThreadSafeCallbackBridge::new(&rt, "fragile", 0, |n: u32| {
            if n == 0 {
                panic!("division by zero requested");
            }
            Ok(100 / n)
        }));

        let remote = Arc::clone(&bridge);
        let (bad, good) = rt
            .run_worker("caller", move || (remote.invoke(0), remote.invoke(4)))
            .unwrap();
        assert!(matches!(bad, Err(BridgeError::HostException { .. })));
        assert_eq!(good.unwrap(), 25);
    }

    #[test]
    fn test_contended_calls_each_get_their_own_reply_in_order() {
        const WORKERS: usize = 8;
        const CALLS: usize = 25;

        let rt = HostRuntime::new("contention");
        let (bridge, seen) = recording_bridge(&rt, 0);
        let done = AtomicUsize::new(0);

        thread::scope(|s| {
            for w in 0..WORKERS {
                let bridge = &bridge;
                let done = &done;
                s.spawn(move || {
                    for c in 0..CALLS {
                        let tag = format!("{}:{}", w, c);
                        let reply = bridge.invoke(tag.clone()).unwrap();
                        assert_eq!(reply, format!("echo-{}", tag));
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                });
            }
            pump_until(&rt, &done, WORKERS);
        });

        let seen = seen.borrow();
        assert_eq!(seen.len(), WORKERS * CALLS);
        // Each worker's calls reached the host in the order it made them.
        for w in 0..WORKERS {
            let prefix = format!("{}:", w);
            let order: Vec<usize> = seen
                .iter()
                .filter_map(|t| t.strip_prefix(&prefix))
                .map(|c| c.parse().unwrap())
                .collect();
            assert_eq!(order, (0..CALLS).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_bounded_queue_never_exceeds_capacity() {
        const WORKERS: usize = 4;

        let rt = HostRuntime::new("bounded");
        let (bridge, seen) = recording_bridge(&rt, 1);
        let done = AtomicUsize::new(0);

        thread::scope(|s| {
            for w in 0..WORKERS {
                let bridge = &bridge;
                let done = &done;
                s.spawn(move || {
                    for c in 0..5 {
                        bridge.invoke(format!("{}:{}", w, c)).unwrap();
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                });
            }
            while done.load(Ordering::SeqCst) < WORKERS {
                assert!(rt.handle().pending() <= 1);
                rt.run_pending();
                thread::yield_now();
            }
        });

        assert_eq!(seen.borrow().len(), WORKERS * 5);
    }

    #[test]
    fn test_shutdown_unblocks_waiting_worker() {
        let rt = HostRuntime::new("teardown");
        let (bridge, seen) = recording_bridge(&rt, 0);

        let outcome = thread::scope(|s| {
            let caller = s.spawn(|| bridge.invoke("late".to_string()));
            while rt.handle().pending() == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            rt.shutdown();
            caller.join().unwrap()
        });

        assert_eq!(outcome, Err(BridgeError::RuntimeUnavailable("echo".into())));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_panicking_host_task_does_not_strand_queued_calls() {
        let rt = HostRuntime::new("stranded");
        let (bridge, seen) = recording_bridge(&rt, 0);
        rt.handle()
            .schedule(Box::new(|_| panic!("unrelated host task failed")));

        let outcome = thread::scope(|s| {
            let caller = s.spawn(|| bridge.invoke("7".to_string()));
            while rt.handle().pending() < 2 {
                thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(rt.run_pending(), 2);
            caller.join().unwrap()
        });

        assert_eq!(outcome.unwrap(), "echo-7");
        assert_eq!(seen.borrow().as_slice(), ["7"]);
        assert_eq!(bridge.calls_serviced(), 1);
    }

    #[test]
    fn test_callable_dropped_on_host_thread_after_remote_release() {
        let rt = HostRuntime::new("release");
        let drops = Rc::new(Cell::new(0u32));

        struct DropCounter(Rc<Cell<u32>>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let counter = DropCounter(drops.clone());
        let bridge = ThreadSafeCallbackBridge::new(&rt, "counted", 0, move |()| {
            let _keep = &counter;
            Ok(())
        });

        thread::spawn(move || drop(bridge)).join().unwrap();
        assert_eq!(drops.get(), 0);
        rt.run_pending();
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_from_config_uses_name_and_capacity() {
        let rt = HostRuntime::new("config");
        let config = crate::config::BridgeConfig {
            queue_capacity: 3,
            name: "configured".into(),
        };
        let bridge: ThreadSafeCallbackBridge<(), ()> =
            ThreadSafeCallbackBridge::from_config(&rt, &config, |()| Ok(()));
        assert_eq!(bridge.name(), "configured");
        assert_eq!(bridge.capacity(), 3);
        assert!(bridge.guard().is_host_thread());
    }
}
