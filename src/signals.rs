//! Scoped forwarding of termination signals to the supervised child
//!
//! The forwarder is installed before spawn and removed when dropped, so a
//! long-lived host can supervise repeatedly without accumulating handlers.
//! While installed, the supervisor itself does not die on these signals; it
//! relays them and keeps waiting for the child. Once the last forwarder is
//! gone the signals take their default action again.

#[cfg(unix)]
mod imp {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;

    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::flag;
    use signal_hook::iterator::{Handle, Signals};

    use crate::error::{Error, Result};

    /// Signals relayed to the child
    pub const FORWARDED_SIGNALS: &[i32] = &[SIGINT, SIGTERM, SIGQUIT, SIGHUP];

    /// Process-wide default-action fallback shared by every forwarder
    ///
    /// signal-hook keeps its process handler registered for good, so with no
    /// forwarder left the signals would be swallowed. The fallback runs the
    /// default action whenever `idle` is set.
    struct Fallback {
        idle: Arc<AtomicBool>,
        active: usize,
    }

    static FALLBACK: Mutex<Option<Fallback>> = Mutex::new(None);

    fn acquire_fallback() -> Result<()> {
        let mut guard = FALLBACK
            .lock()
            .map_err(|_| Error::Unexpected("signal fallback lock poisoned".to_string()))?;
        if guard.is_none() {
            let idle = Arc::new(AtomicBool::new(true));
            for &signal in FORWARDED_SIGNALS {
                flag::register_conditional_default(signal, Arc::clone(&idle)).map_err(|e| {
                    Error::LaunchFailure(format!("failed to register default signal action: {e}"))
                })?;
            }
            *guard = Some(Fallback { idle, active: 0 });
        }
        if let Some(fallback) = guard.as_mut() {
            fallback.active += 1;
            fallback.idle.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn release_fallback() {
        let Ok(mut guard) = FALLBACK.lock() else {
            return;
        };
        if let Some(fallback) = guard.as_mut() {
            fallback.active = fallback.active.saturating_sub(1);
            if fallback.active == 0 {
                fallback.idle.store(true, Ordering::SeqCst);
            }
        }
    }

    #[derive(Debug, Default)]
    struct Target {
        pid: Option<i32>,
        pending: Vec<i32>,
    }

    pub struct SignalForwarder {
        handle: Handle,
        thread: Option<JoinHandle<()>>,
        target: Arc<Mutex<Target>>,
    }

    impl SignalForwarder {
        pub fn install() -> Result<Self> {
            acquire_fallback()?;
            let mut signals = match Signals::new(FORWARDED_SIGNALS) {
                Ok(signals) => signals,
                Err(e) => {
                    release_fallback();
                    return Err(Error::LaunchFailure(format!(
                        "failed to register signal handlers: {e}"
                    )));
                }
            };
            let handle = signals.handle();
            let target = Arc::new(Mutex::new(Target::default()));

            let thread = {
                let target = Arc::clone(&target);
                std::thread::spawn(move || {
                    for signal in signals.forever() {
                        deliver(&target, signal);
                    }
                })
            };

            tracing::debug!(signals = ?FORWARDED_SIGNALS, "signals: forwarding installed");

            Ok(Self {
                handle,
                thread: Some(thread),
                target,
            })
        }

        /// Start forwarding to `pid`, flushing signals that arrived before spawn
        pub fn attach(&self, pid: u32) {
            let Ok(pid) = i32::try_from(pid) else {
                return;
            };
            if let Ok(mut target) = self.target.lock() {
                target.pid = Some(pid);
                for signal in std::mem::take(&mut target.pending) {
                    send(pid, signal);
                }
            }
        }

        /// Stop forwarding; the child has been reaped and its pid may be reused
        pub fn detach(&self) {
            if let Ok(mut target) = self.target.lock() {
                target.pid = None;
                if !target.pending.is_empty() {
                    tracing::debug!(pending = ?target.pending, "signals: dropping signals received after child exit");
                    target.pending.clear();
                }
            }
        }
    }

    impl Drop for SignalForwarder {
        fn drop(&mut self) {
            self.detach();
            self.handle.close();
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
            release_fallback();
            tracing::debug!("signals: forwarding removed");
        }
    }

    fn deliver(target: &Mutex<Target>, signal: i32) {
        if let Ok(mut target) = target.lock() {
            match target.pid {
                Some(pid) => send(pid, signal),
                None => {
                    tracing::debug!(signal = signal, "signals: queued until child starts");
                    target.pending.push(signal);
                }
            }
        }
    }

    fn send(pid: i32, signal: i32) {
        tracing::debug!(pid = pid, signal = signal, "signals: forwarding to child");
        // SAFETY: kill has no memory-safety preconditions
        if unsafe { libc::kill(pid, signal) } == -1 {
            tracing::warn!(
                pid = pid,
                signal = signal,
                error = %std::io::Error::last_os_error(),
                "signals: failed to forward"
            );
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use crate::error::Result;

    pub const FORWARDED_SIGNALS: &[i32] = &[];

    /// Console control events reach the child directly on this platform
    pub struct SignalForwarder;

    impl SignalForwarder {
        pub fn install() -> Result<Self> {
            Ok(Self)
        }

        pub fn attach(&self, _pid: u32) {}

        pub fn detach(&self) {}
    }
}

pub use imp::{FORWARDED_SIGNALS, SignalForwarder};
