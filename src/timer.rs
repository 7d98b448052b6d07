//! Cancellable acknowledgment timer.
//!
//! The retransmission loop needs to block until either the dispatch thread
//! reports an acknowledgment or a timeout elapses. The original driver
//! delivered the timeout as an asynchronous signal that had to be masked on
//! every thread but its owner; here the retry loop waits on the timer
//! directly, so there is no masking discipline to get wrong.
//!
//! Wake-up correctness:
//! - An acknowledgment recorded between [`AckTimer::arm`] and
//!   [`AckTimer::wait`] is observed by the wait (no lost wake-up).
//! - Completing the same sequence twice is idempotent (no duplicated
//!   wake-up), and completing a non-armed sequence is ignored.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of waiting for an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The armed sequence was acknowledged before the deadline.
    Acked,
    /// The deadline elapsed without an acknowledgment.
    TimedOut,
}

#[derive(Default)]
struct State {
    /// Sequence number the sender is currently waiting on.
    armed: Option<u8>,
    /// Whether the armed sequence has been acknowledged.
    acked: bool,
}

/// One-shot acknowledgment timer shared between the sending task and the
/// dispatch task.
///
/// Only one sequence can be armed at a time; the single-writer discipline of
/// the mode task guarantees there is never more than one outstanding send.
#[derive(Default)]
pub struct AckTimer {
    state: Mutex<State>,
    cond: Condvar,
}

impl AckTimer {
    /// Creates a disarmed timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer for `seq`, clearing any previous acknowledgment.
    pub fn arm(&self, seq: u8) {
        let mut state = self.state.lock().expect("ack timer poisoned");
        state.armed = Some(seq);
        state.acked = false;
    }

    /// Records an acknowledgment for `seq`.
    ///
    /// Returns `true` if `seq` matched the armed sequence. Called from the
    /// dispatch task when an ACK frame is delivered.
    pub fn complete(&self, seq: u8) -> bool {
        let mut state = self.state.lock().expect("ack timer poisoned");
        if state.armed != Some(seq) {
            return false;
        }
        state.acked = true;
        self.cond.notify_one();
        true
    }

    /// Blocks until the armed sequence is acknowledged or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("ack timer poisoned");
        loop {
            if state.acked {
                return WaitOutcome::Acked;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (next, _) = self
                .cond
                .wait_timeout(state, deadline - now)
                .expect("ack timer poisoned");
            state = next;
        }
    }

    /// Disarms the timer. Late acknowledgments are ignored afterwards.
    pub fn disarm(&self) {
        let mut state = self.state.lock().expect("ack timer poisoned");
        state.armed = None;
        state.acked = false;
    }
}
