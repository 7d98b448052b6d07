//! I/O thread orchestration.
//!
//! [`run`] spawns the three threads that make up a driver session and ties
//! their lifetimes together:
//!
//! - `g3link-rx` (reader): drains bytes from the UART source, feeds the
//!   engine's reassembler and hands completed frames off as dispatch tokens.
//! - `g3link-dispatch` (dispatcher): consumes tokens from a bounded channel
//!   and calls [`Engine::dispatch_frame`]. Being the sole consumer is what
//!   makes frame delivery non-reentrant by construction.
//! - `g3link-mode` (writer): runs the active mode's program; all frame
//!   sends are confined here.
//!
//! The orchestration waits only on the mode thread. Once it finishes, the
//! shutdown flag retires the reader (within one read timeout) and the
//! dispatcher drains and exits when the token channel disconnects. Failure
//! to spawn any thread is fatal.

mod dispatch;
mod reader;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use thiserror::Error;

use crate::context::Context;
use crate::engine::Engine;
use crate::mode::{Mode, ModeError};
use crate::trace::info;
use crate::uart::{ByteSource, LinkError};

use dispatch::Dispatcher;
use reader::Reader;

/// Capacity of the frame-ready token channel between reader and dispatcher.
///
/// The engine's single-slot hand-off already serializes frames; the channel
/// only carries wake-up tokens, so a small bound suffices.
const DISPATCH_QUEUE_CAPACITY: usize = 8;

/// Fatal orchestration errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A worker thread could not be spawned.
    #[error("cannot spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
    /// The mode task panicked.
    #[error("mode task panicked")]
    ModePanicked,
    /// The mode program failed.
    #[error(transparent)]
    Mode(#[from] ModeError),
    /// The reader hit an unrecoverable I/O error on the byte source.
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Runs one driver session: spawns the I/O threads, executes the mode's
/// program and tears the session down again.
///
/// The engine must already be initialized. The caller still owns the mode
/// afterwards and is responsible for calling its `destroy`, which therefore
/// runs after both I/O tasks have terminated even on error paths.
///
/// # Errors
///
/// Returns a [`RuntimeError`] when a thread cannot be spawned, the byte
/// source fails, or the mode program fails. A send that exhausted its retry
/// budget is not an error.
pub fn run<S>(
    mode: &mut dyn Mode,
    ctx: &Context,
    engine: &Arc<dyn Engine>,
    source: S,
) -> Result<(), RuntimeError>
where
    S: ByteSource,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let reader_failure: Mutex<Option<LinkError>> = Mutex::new(None);

    let mode_result = thread::scope(|scope| {
        let result = (|| -> Result<Result<(), ModeError>, RuntimeError> {
            let (token_tx, token_rx) = mpsc::sync_channel(DISPATCH_QUEUE_CAPACITY);

            let reader = Reader::new(source, Arc::clone(engine), token_tx, Arc::clone(&shutdown));
            let reader_failure = &reader_failure;
            thread::Builder::new()
                .name("g3link-rx".into())
                .spawn_scoped(scope, move || {
                    if let Err(e) = reader.run() {
                        *reader_failure.lock().expect("reader failure slot poisoned") = Some(e);
                    }
                })
                .map_err(|source| RuntimeError::Spawn {
                    name: "reader",
                    source,
                })?;

            let dispatcher = Dispatcher::new(Arc::clone(engine), token_rx);
            thread::Builder::new()
                .name("g3link-dispatch".into())
                .spawn_scoped(scope, move || dispatcher.run())
                .map_err(|source| RuntimeError::Spawn {
                    name: "dispatch",
                    source,
                })?;

            let engine = Arc::clone(engine);
            let mode_handle = thread::Builder::new()
                .name("g3link-mode".into())
                .spawn_scoped(scope, move || mode.start(ctx, engine.as_ref()))
                .map_err(|source| RuntimeError::Spawn {
                    name: "mode",
                    source,
                })?;

            info!("I/O threads started");
            mode_handle.join().map_err(|_| RuntimeError::ModePanicked)
        })();

        // Retire the I/O threads on every exit path; the scope joins them.
        shutdown.store(true, Ordering::Relaxed);
        info!("mode finished, retiring I/O threads");
        result
    });

    // A broken byte source is the root cause; report it over whatever the
    // mode observed downstream.
    if let Some(e) = reader_failure
        .lock()
        .expect("reader failure slot poisoned")
        .take()
    {
        return Err(RuntimeError::Link(e));
    }

    mode_result??;
    Ok(())
}
