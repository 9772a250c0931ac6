//! Background heartbeat for a held lock.
//!
//! The manager only exposes single-shot heartbeats; this task owns the
//! recurring timer on the caller's side.

use super::manager::TaskLockManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct HeartbeatState {
    beats: AtomicU64,
    lost: AtomicBool,
}

/// Refreshes a lock's heartbeat on a fixed interval until stopped.
///
/// The task ends on its own the first time a heartbeat is refused, which
/// means the lock was released or reclaimed by someone else. Dropping the
/// task stops it.
#[derive(Debug)]
pub struct HeartbeatTask {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    state: Arc<HeartbeatState>,
}

impl HeartbeatTask {
    /// Start heartbeating `issue_number` as `session_id` every `interval`.
    pub fn spawn(
        manager: Arc<TaskLockManager>,
        issue_number: u64,
        session_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let session_id = session_id.into();
        let state = Arc::new(HeartbeatState::default());
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_state = Arc::clone(&state);
        let handle = thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if manager.heartbeat(issue_number, &session_id) {
                            thread_state.beats.fetch_add(1, Ordering::SeqCst);
                        } else {
                            warn!(
                                issue = issue_number,
                                session = %session_id,
                                "heartbeat refused; lock is no longer held by this session"
                            );
                            thread_state.lost.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(issue = issue_number, "heartbeat stopped");
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            state,
        }
    }

    /// Number of successful heartbeats so far.
    pub fn beats(&self) -> u64 {
        self.state.beats.load(Ordering::SeqCst)
    }

    /// Whether a heartbeat was refused.
    pub fn is_lost(&self) -> bool {
        self.state.lost.load(Ordering::SeqCst)
    }

    /// Stop heartbeating and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}
