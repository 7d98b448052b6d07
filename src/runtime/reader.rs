//! Reader thread: UART byte pump.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

use crate::engine::{ByteOutcome, Engine};
use crate::trace::{trace, warn};
use crate::uart::{ByteSource, LinkError};

/// Wake-up token for the dispatch thread: one per completed frame.
pub(super) struct FrameReady;

/// Owns the UART input path: reads byte chunks, feeds the engine's
/// reassembler and hands completed frames off to the dispatcher.
///
/// The hand-off is the only place this loop blocks besides the I/O wait
/// itself; frame processing always happens on the dispatch thread.
pub(super) struct Reader<S> {
    source: S,
    engine: Arc<dyn Engine>,
    tokens: SyncSender<FrameReady>,
    shutdown: Arc<AtomicBool>,
}

impl<S: ByteSource> Reader<S> {
    pub(super) fn new(
        source: S,
        engine: Arc<dyn Engine>,
        tokens: SyncSender<FrameReady>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            engine,
            tokens,
            shutdown,
        }
    }

    /// Runs the read loop until shutdown or an unrecoverable link error.
    pub(super) fn run(mut self) -> Result<(), LinkError> {
        let mut buf = [0u8; 256];

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(());
            }

            let n = self.source.read_chunk(&mut buf)?;
            if n == 0 {
                continue;
            }
            trace!(len = n, "read chunk");

            for &byte in &buf[..n] {
                match self.engine.notify_byte(byte) {
                    Ok(ByteOutcome::Consumed) => {}
                    Ok(ByteOutcome::FrameReady) => {
                        // The dispatcher only goes away at shutdown.
                        if self.tokens.send(FrameReady).is_err() {
                            return Ok(());
                        }
                    }
                    Err(_e) => {
                        warn!(error = %_e, "engine rejected byte, stopping reader");
                        return Ok(());
                    }
                }
            }
        }
    }
}
