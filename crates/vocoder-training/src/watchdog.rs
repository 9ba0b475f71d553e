//! Deadline timer that turns a stalled training iteration into a visible failure.
//!
//! A monitor thread waits on a condition variable for the single outstanding
//! deadline. Arming replaces any previous deadline; disarming clears it. When
//! a deadline passes the expiry callback runs on the monitor thread. The
//! default callback ([`Watchdog::fatal`]) terminates the process.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Called with the timeout that was exceeded.
pub type ExpiryHandler = Arc<dyn Fn(Duration) + Send + Sync>;

#[derive(Default)]
struct State {
    deadline: Option<(Instant, Duration)>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Watchdog {
    shared: Arc<Shared>,
    monitor: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn new(on_expire: ExpiryHandler) -> Self {
        let shared = Arc::new(Shared { state: Mutex::new(State::default()), wake: Condvar::new() });
        let monitor = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("vocoder-watchdog".to_string())
                .spawn(move || monitor(&shared, &on_expire))
                .ok()
        };
        if monitor.is_none() {
            tracing::warn!("failed to spawn watchdog thread; iteration deadlines are not enforced");
        }
        Self { shared, monitor }
    }

    /// Watchdog whose expiry exits the process with status 1.
    pub fn fatal() -> Self {
        Self::new(Arc::new(|timeout: Duration| {
            tracing::error!(timeout_secs = timeout.as_secs_f64(), "iteration took too long");
            eprintln!("Iteration took too long! (deadline {:.1}s)", timeout.as_secs_f64());
            std::process::exit(1);
        }))
    }

    /// Schedule expiry after `timeout`, replacing any pending deadline.
    pub fn arm(&self, timeout: Duration) {
        let mut state = self.shared.lock();
        state.deadline = Some((Instant::now() + timeout, timeout));
        self.shared.wake.notify_all();
    }

    pub fn disarm(&self) {
        let mut state = self.shared.lock();
        state.deadline = None;
        self.shared.wake.notify_all();
    }

    pub fn is_armed(&self) -> bool {
        self.shared.lock().deadline.is_some()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.monitor.take() {
            let _ = handle.join();
        }
    }
}

fn monitor(shared: &Shared, on_expire: &ExpiryHandler) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return;
        }
        match state.deadline {
            None => {
                state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            Some((at, timeout)) => {
                let now = Instant::now();
                if now >= at {
                    state.deadline = None;
                    drop(state);
                    on_expire(timeout);
                    state = shared.lock();
                } else {
                    state = shared
                        .wake
                        .wait_timeout(state, at - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0);
                }
            }
        }
    }
}
