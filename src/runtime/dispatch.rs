//! Dispatch thread: serialized frame delivery.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::engine::Engine;
use crate::trace::{debug, warn};

use super::reader::FrameReady;

/// Consumes frame-ready tokens and delivers one frame per token.
///
/// Being the sole caller of [`Engine::dispatch_frame`] is what upholds the
/// contract's no-reentrancy requirement: a second dispatch can never start
/// before the previous one returns.
pub(super) struct Dispatcher {
    engine: Arc<dyn Engine>,
    tokens: Receiver<FrameReady>,
}

impl Dispatcher {
    pub(super) fn new(engine: Arc<dyn Engine>, tokens: Receiver<FrameReady>) -> Self {
        Self { engine, tokens }
    }

    /// Runs until the token channel disconnects (reader gone).
    pub(super) fn run(self) {
        while let Ok(FrameReady) = self.tokens.recv() {
            debug!("dispatching frame");
            if let Err(_e) = self.engine.dispatch_frame() {
                // A failed dispatch (e.g. the ACK reply could not be
                // written) does not stop delivery of later frames.
                warn!(error = %_e, "frame dispatch failed");
            }
        }
    }
}
