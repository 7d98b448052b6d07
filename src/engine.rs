//! Driver contract between the orchestration layer and the protocol engine.
//!
//! The G3-PLC MAC/PHY engine is an external collaborator: this module pins
//! down the seam. The orchestration layer calls into the engine through
//! [`Engine`] and supplies host services through [`Platform`]. Both real
//! hardware engines and deterministic test doubles implement [`Engine`], so
//! the whole runtime can be exercised without a physical UART.
//!
//! # Call discipline
//!
//! - [`Engine::init`] runs exactly once, after the mode has installed its
//!   receive callback into the [`EngineConfig`] and before any send/receive
//!   activity.
//! - [`Engine::send`] is confined to the mode task. With acknowledgments
//!   enabled it blocks through up to `retrans` attempts.
//! - [`Engine::notify_byte`] runs on the byte-feed path and must return
//!   quickly; it reports [`ByteOutcome::FrameReady`] when a complete frame
//!   awaits dispatch.
//! - [`Engine::dispatch_frame`] is **not reentrant**: internal reassembly
//!   state is unprotected, so the caller must not issue a second dispatch
//!   until the previous one returns. The runtime enforces this by routing
//!   all dispatches through a single thread.

#[cfg(feature = "mock")]
pub mod mock;

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;
use thiserror::Error;

use crate::uart::LinkError;

bitflags! {
    /// Protocol behavior flags, ORed into the configuration from the
    /// command line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EngineFlags: u32 {
        /// Do not answer nor expect acknowledgments.
        const NO_ACK = 0x1;
        /// Deliver frames that fail validation instead of filtering them.
        const ACCEPT_INVALID = 0x2;
    }
}

impl EngineFlags {
    /// Human-readable name of a single flag, for the configuration summary.
    #[must_use]
    pub fn describe(self) -> &'static str {
        if self == Self::NO_ACK {
            "no-ack"
        } else if self == Self::ACCEPT_INVALID {
            "accept-invalid"
        } else {
            "unknown"
        }
    }
}

/// Validation status attached to a delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    /// The frame passed validation.
    Ok,
    /// The frame checksum did not match; delivered only when
    /// [`EngineFlags::ACCEPT_INVALID`] is set.
    CrcMismatch,
}

/// One validated inbound frame, as handed to the receive callback.
///
/// The payload borrow is only valid for the duration of the callback; copy
/// it out if it must outlive the dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Received<'a> {
    /// Short address of the sending node.
    pub src: u16,
    /// Short address the frame was sent to (ours, or broadcast).
    pub dst: u16,
    /// Application payload.
    pub payload: &'a [u8],
    /// Validation status.
    pub status: RecvStatus,
}

/// Receive callback installed by the active mode.
///
/// Fires at most once per validated inbound frame and never concurrently
/// with itself. Runs on the dispatch task: it must not block indefinitely or
/// it stalls frame delivery.
pub type RecvCallback = Box<dyn Fn(Received<'_>) + Send + Sync>;

/// Engine configuration, built incrementally before [`Engine::init`]:
/// defaults first, then command-line parsing ORs flags and values in, then
/// the mode's `init` installs the receive callback.
///
/// Treated as read-only once the engine is constructed.
pub struct EngineConfig {
    /// PAN identifier of the power-line network.
    pub pan_id: u16,
    /// Our device short address.
    pub mac_address: u16,
    /// Maximum number of transmissions per send (>= 1).
    pub retrans: u32,
    /// How long to wait for an acknowledgment after each transmission.
    pub ack_timeout: Duration,
    /// Protocol behavior flags.
    pub flags: EngineFlags,
    /// Receive callback; installed by the mode before engine init.
    pub on_receive: Option<RecvCallback>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pan_id: 0xAAAA,
            mac_address: 0,
            retrans: 5,
            ack_timeout: Duration::from_micros(1_000_000),
            flags: EngineFlags::empty(),
            on_receive: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("pan_id", &self.pan_id)
            .field("mac_address", &self.mac_address)
            .field("retrans", &self.retrans)
            .field("ack_timeout", &self.ack_timeout)
            .field("flags", &self.flags)
            .field("on_receive", &self.on_receive.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// Host services the engine consumes.
pub trait Platform: Send + Sync {
    /// Writes one encoded frame to the device UART.
    ///
    /// # Errors
    ///
    /// Returns a [`LinkError`] on unrecoverable I/O failure.
    fn uart_send(&self, buf: &[u8]) -> Result<(), LinkError>;

    /// Sleeps for at least `micros` microseconds.
    fn usleep(&self, micros: u64) {
        std::thread::sleep(Duration::from_micros(micros));
    }

    /// Drives the modem reset line low. No-op when no reset line is wired.
    fn reset_assert(&self) {}

    /// Releases the modem reset line. No-op when no reset line is wired.
    fn reset_release(&self) {}
}

/// Outcome of feeding one byte to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOutcome {
    /// The byte was absorbed by the reassembler.
    Consumed,
    /// A complete frame is ready; the caller must schedule one dispatch.
    FrameReady,
}

/// Final status of a send operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The destination acknowledged the frame.
    Acked,
    /// The frame was transmitted; no acknowledgment was requested.
    Sent,
    /// The retransmission budget was exhausted without an acknowledgment.
    ///
    /// This is a reported outcome, not a process failure: the run still
    /// completed.
    RetryExhausted,
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Acked => "acknowledged",
            Self::Sent => "sent, no ACK requested",
            Self::RetryExhausted => "retry budget exhausted",
        };
        f.write_str(s)
    }
}

/// Report returned by [`Engine::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Final transmission status.
    pub status: SendStatus,
    /// Number of transmissions performed (1..=retrans).
    pub attempts: u32,
}

/// Fatal engine initialization errors.
#[derive(Debug, Error)]
pub enum InitError {
    /// No receive callback was installed; the mode's `init` must run first.
    #[error("no receive callback installed")]
    MissingCallback,
    /// The retransmission limit must be at least 1.
    #[error("invalid retransmission limit {0} (must be >= 1)")]
    InvalidRetransLimit(u32),
    /// The modem did not answer the initialization handshake.
    #[error("modem handshake failed: {0}")]
    Handshake(&'static str),
    /// `init` was called twice; the contract allows exactly one call.
    #[error("engine already initialized")]
    AlreadyInitialized,
}

/// Errors surfaced by [`Engine::send`].
#[derive(Debug, Error)]
pub enum SendError {
    /// `send` was called before `init`.
    #[error("engine not initialized")]
    NotInitialized,
    /// The payload does not fit in one frame.
    #[error("payload of {size} bytes exceeds the {max} byte frame limit")]
    Oversize { size: usize, max: usize },
    /// Unrecoverable I/O error on the byte sink.
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Errors surfaced by the receive-path operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation was called before `init`.
    #[error("engine not initialized")]
    NotInitialized,
    /// `dispatch_frame` was called with no frame pending.
    #[error("no frame pending dispatch")]
    NoPendingFrame,
    /// Unrecoverable I/O error on the byte sink.
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// The protocol engine contract.
///
/// All methods take `&self`: the engine is shared between the reader,
/// dispatch and mode threads. Single-writer discipline for [`Engine::send`]
/// and single-dispatcher discipline for [`Engine::dispatch_frame`] are
/// provided by the orchestration layer, not by locks at this seam.
pub trait Engine: Send + Sync {
    /// One-time engine setup and modem handshake.
    ///
    /// # Errors
    ///
    /// Returns an [`InitError`] when the configuration is incomplete or the
    /// hardware handshake fails. Both are fatal to the process.
    fn init(&self) -> Result<(), InitError>;

    /// Assembles and transmits one frame to `dst`.
    ///
    /// With acknowledgments enabled this blocks until the frame is
    /// acknowledged or the retransmission budget is exhausted; the report
    /// carries the number of transmissions performed.
    ///
    /// # Errors
    ///
    /// Returns a [`SendError`] on contract misuse or unrecoverable I/O
    /// failure. Retry exhaustion is **not** an error; it is reported through
    /// [`SendStatus::RetryExhausted`].
    fn send(&self, dst: u16, payload: &[u8]) -> Result<SendReport, SendError>;

    /// Feeds one raw byte received from the device UART.
    ///
    /// May block briefly while handing off a completed frame, but never
    /// while a frame is being processed by the application.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when called before `init`.
    fn notify_byte(&self, byte: u8) -> Result<ByteOutcome, EngineError>;

    /// Validates and delivers one reassembled frame to the receive callback.
    ///
    /// Not reentrant: the previous invocation must return before the next
    /// one starts.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] on contract misuse or unrecoverable I/O
    /// failure while answering the frame.
    fn dispatch_frame(&self) -> Result<(), EngineError>;
}
