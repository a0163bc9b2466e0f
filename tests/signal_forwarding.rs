//! SIGINT delivered to the supervisor must reach the child exactly once.
//!
//! Kept in its own test binary: the signal goes to the whole test process,
//! which must not be shared with other supervised runs.

#![cfg(unix)]

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use muzzle::{Cause, Command, Environment, Sink, Supervisor};

/// Collects stdout and interrupts the supervisor once the child is ready
#[derive(Clone, Default)]
struct InterruptOnReady {
    data: Arc<Mutex<Vec<u8>>>,
    sent: Arc<AtomicBool>,
}

impl InterruptOnReady {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.data.lock().unwrap()).to_string()
    }
}

impl Write for InterruptOnReady {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let ready = {
            let mut data = self.data.lock().unwrap();
            data.extend_from_slice(buf);
            String::from_utf8_lossy(&data).contains("ready")
        };
        if ready && !self.sent.swap(true, Ordering::SeqCst) {
            // SAFETY: signalling our own process
            unsafe { libc::kill(libc::getpid(), libc::SIGINT) };
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn sigint_reaches_child_once_and_supervisor_waits() {
    let stdout = InterruptOnReady::default();
    let command = Command::new("/bin/sh").args([
        "-c",
        r#"trap 'echo got-int; exit 3' INT; echo ready; while :; do sleep 0.1; done"#,
    ]);

    let outcome = Supervisor::new(Environment::inherit())
        .stdout(Sink::writer(stdout.clone()))
        .stderr(Sink::Null)
        .run(&command)
        .await;

    assert_eq!(outcome.cause(), Cause::Normal);
    assert_eq!(outcome.code(), 3);

    let output = stdout.contents();
    assert_eq!(output.matches("got-int").count(), 1, "output: {output:?}");
}
