//! Host-side driver harness for G3-PLC power-line modems.
//!
//! The modem is attached over a half-duplex UART (plus an optional GPIO
//! reset line). This crate owns the concurrent I/O orchestration around that
//! single shared channel:
//!
//! - A **reader thread** continuously drains bytes from the UART and feeds
//!   them to the protocol engine's incremental reassembler. Completed frames
//!   are handed off through a bounded channel to a dedicated **dispatch
//!   thread**, so frame delivery never runs on the byte-feed path and at
//!   most one dispatch is ever in flight.
//! - A **mode thread** runs the selected interface mode's program. All
//!   frame-level sends are confined to this thread; with acknowledgments
//!   enabled, a send blocks through up to `retrans` attempts, each awaiting
//!   an ACK on a cancellable timer.
//!
//! ```text
//!  UART rx ──> reader ──> [bounded channel] ──> dispatch ──> recv callback
//!  UART tx <── engine.send() <────────────────────────────── mode program
//! ```
//!
//! The G3-PLC MAC/PHY engine itself is external: it is consumed through the
//! [`engine::Engine`] trait and supplied with host services through
//! [`engine::Platform`]. The `mock` feature provides a deterministic bench
//! engine and an in-memory link so the whole runtime can be exercised
//! without hardware.

pub mod cli;
pub mod context;
pub mod engine;
pub mod gpio;
pub mod mode;
pub mod runtime;
pub mod timer;
pub mod uart;

mod trace;

pub use trace::init_tracing;
