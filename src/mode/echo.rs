//! Echo mode: answer every received frame with its own payload.
//!
//! Replies are forwarded over a channel to the mode task instead of being
//! sent from the receive callback: `send` blocks until the dispatch task
//! delivers the matching ACK, so a send issued from the dispatch path would
//! deadlock the receive pipeline.

use std::sync::mpsc::{self, Receiver};
use std::sync::Mutex;

use crate::cli::ConfigError;
use crate::context::Context;
use crate::engine::{Engine, EngineConfig, RecvStatus};
use crate::mode::{Mode, ModeDescriptor, ModeError, OptSpec};

static DESCRIPTOR: ModeDescriptor = ModeDescriptor {
    name: "echo",
    description: "Echo received frames back to their sender",
    options: &[OptSpec {
        short: Some('c'),
        long: "count",
        takes_value: true,
        help: "Stop after echoing this many frames (default: run forever)",
    }],
};

struct EchoFrame {
    src: u16,
    payload: Vec<u8>,
}

/// Continuously re-sends each valid received payload to its source.
pub struct EchoMode {
    limit: Option<u32>,
    frames: Option<Receiver<EchoFrame>>,
}

impl EchoMode {
    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: None,
            frames: None,
        }
    }
}

impl Default for EchoMode {
    fn default() -> Self {
        Self::new()
    }
}

impl Mode for EchoMode {
    fn descriptor(&self) -> &'static ModeDescriptor {
        &DESCRIPTOR
    }

    fn configure(&mut self, opt: &str, value: Option<&str>) -> Result<bool, ConfigError> {
        match opt {
            "count" => {
                let raw = value.ok_or_else(|| ConfigError::MissingValue("count".to_string()))?;
                let count = raw.parse().map_err(|_| ConfigError::InvalidValue {
                    option: "count".to_string(),
                    value: raw.to_string(),
                })?;
                self.limit = Some(count);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn init(&mut self, _ctx: &Context, config: &mut EngineConfig) {
        let (tx, rx) = mpsc::channel();
        self.frames = Some(rx);

        let tx = Mutex::new(tx);
        config.on_receive = Some(Box::new(move |frame| {
            // Frames that failed validation are observed but not echoed.
            if frame.status != RecvStatus::Ok {
                return;
            }
            let _ = tx.lock().expect("echo sender poisoned").send(EchoFrame {
                src: frame.src,
                payload: frame.payload.to_vec(),
            });
        }));
    }

    fn start(&mut self, ctx: &Context, engine: &dyn Engine) -> Result<(), ModeError> {
        let frames = self.frames.take().ok_or(ModeError::NotInitialized)?;

        let mut echoed: u32 = 0;
        loop {
            if let Some(limit) = self.limit {
                if echoed >= limit {
                    return Ok(());
                }
            }

            let frame = match frames.recv() {
                Ok(frame) => frame,
                // All senders gone: the engine is being torn down.
                Err(_) => return Ok(()),
            };

            let report = engine.send(frame.src, &frame.payload)?;
            echoed += 1;
            if ctx.verbose {
                println!(
                    "ECHO {} bytes to {:04X}: {} ({} attempt{})",
                    frame.payload.len(),
                    frame.src,
                    report.status,
                    report.attempts,
                    if report.attempts == 1 { "" } else { "s" }
                );
            }
        }
    }
}
