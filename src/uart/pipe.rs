//! In-memory byte link.
//!
//! A [`pipe`] gives two connected ends; bytes written to one end through
//! [`Platform::uart_send`] appear on the other end's [`ByteSource`]. The
//! test suite uses one end as the host side and drives the other as the
//! far-end modem, so the whole two-thread runtime can run without hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::engine::Platform;
use crate::uart::{ByteSource, LinkError};

/// How long a read waits for data before handing control back.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Default)]
struct Queue {
    bytes: Mutex<VecDeque<u8>>,
    cond: Condvar,
}

impl Queue {
    fn push(&self, buf: &[u8]) {
        let mut bytes = self.bytes.lock().expect("pipe lock poisoned");
        bytes.extend(buf.iter().copied());
        self.cond.notify_one();
    }

    fn pop_into(&self, buf: &mut [u8], timeout: Duration) -> usize {
        let mut bytes = self.bytes.lock().expect("pipe lock poisoned");
        if bytes.is_empty() {
            let (next, _) = self
                .cond
                .wait_timeout(bytes, timeout)
                .expect("pipe lock poisoned");
            bytes = next;
        }
        let n = bytes.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = bytes.pop_front().expect("length checked above");
        }
        n
    }
}

/// One end of an in-memory duplex byte link.
///
/// Cloning yields another handle to the same end, which is how the engine's
/// sink and the reader's source share one side of the link.
#[derive(Clone)]
pub struct PipeEnd {
    rx: Arc<Queue>,
    tx: Arc<Queue>,
}

/// Creates a connected pair of pipe ends.
#[must_use]
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let a_to_b = Arc::new(Queue::default());
    let b_to_a = Arc::new(Queue::default());

    let a = PipeEnd {
        rx: Arc::clone(&b_to_a),
        tx: Arc::clone(&a_to_b),
    };
    let b = PipeEnd {
        rx: a_to_b,
        tx: b_to_a,
    };
    (a, b)
}

impl ByteSource for PipeEnd {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        Ok(self.rx.pop_into(buf, POLL_INTERVAL))
    }
}

impl Platform for PipeEnd {
    fn uart_send(&self, buf: &[u8]) -> Result<(), LinkError> {
        self.tx.push(buf);
        Ok(())
    }

    // Keep bench initialization fast: there is no modem to settle.
    fn usleep(&self, _micros: u64) {}
}
