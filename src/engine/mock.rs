//! Deterministic bench engine.
//!
//! Implements the full [`Engine`] contract (blocking ACK/retransmission
//! semantics, incremental reassembly, single-slot dispatch hand-off) over a
//! deliberately simple frame format. It is **not** the G3-PLC MAC/PHY wire
//! protocol; it exists so the runtime and the test suite can talk to a
//! loopback or bench link without hardware, and so vendor engines have a
//! reference for the contract's corner cases.
//!
//! # Frame format
//!
//! ```text
//! SOF(1) kind(1) seq(1) src(2 BE) dst(2 BE) len(1) payload(len) crc16(2 BE)
//! ```
//!
//! The CRC-16/CCITT covers everything between the SOF marker and the CRC
//! itself. The reassembler hunts for SOF while idle, so line noise between
//! frames is discarded; payload bytes are length-counted and may contain
//! the SOF value.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::context::BROADCAST_ADDR;
use crate::engine::{
    ByteOutcome, Engine, EngineConfig, EngineError, EngineFlags, InitError, Platform, Received,
    RecvStatus, SendError, SendReport, SendStatus,
};
use crate::timer::{AckTimer, WaitOutcome};
use crate::trace::{debug, trace, warn};

/// Start-of-frame marker.
pub const SOF: u8 = 0x7E;
/// Maximum payload size; the length field is a single byte.
pub const MAX_PAYLOAD: usize = 255;

/// Header bytes following SOF: kind, seq, src, dst, len.
const HEADER_LEN: usize = 7;
const CRC_LEN: usize = 2;

/// Duration of the reset pulse driven during the init handshake.
const RESET_PULSE_US: u64 = 10_000;
/// Settle time after releasing reset before the link is usable.
const RESET_SETTLE_US: u64 = 10_000;

const KIND_DATA: u8 = 0x01;
const KIND_ACK: u8 = 0x02;

/// CRC-16/CCITT, polynomial 0x1021, init 0xFFFF, non-reflected.
fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn encode(kind: u8, seq: u8, src: u16, dst: u16, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD);

    let mut buf = Vec::with_capacity(1 + HEADER_LEN + payload.len() + CRC_LEN);
    buf.push(SOF);
    buf.push(kind);
    buf.push(seq);
    buf.extend_from_slice(&src.to_be_bytes());
    buf.extend_from_slice(&dst.to_be_bytes());
    buf.push(payload.len() as u8);
    buf.extend_from_slice(payload);
    let crc = crc16_ccitt(&buf[1..]);
    buf.extend_from_slice(&crc.to_be_bytes());
    buf
}

/// Encodes one data frame. Exposed so tests and bench harnesses can craft
/// valid byte streams.
#[must_use]
pub fn encode_data_frame(seq: u8, src: u16, dst: u16, payload: &[u8]) -> Vec<u8> {
    encode(KIND_DATA, seq, src, dst, payload)
}

/// Encodes one acknowledgment frame for `seq`.
#[must_use]
pub fn encode_ack_frame(seq: u8, src: u16, dst: u16) -> Vec<u8> {
    encode(KIND_ACK, seq, src, dst, &[])
}

/// A reassembled frame, pre-validation.
struct RawFrame {
    kind: u8,
    seq: u8,
    src: u16,
    dst: u16,
    payload: Vec<u8>,
    crc_ok: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ReassemblyState {
    /// Hunting for the SOF marker.
    Idle,
    /// Accumulating the fixed-size header.
    Header,
    /// Accumulating `len` payload bytes plus the CRC.
    Body,
}

/// Incremental frame reassembler driven one byte at a time.
struct Reassembler {
    state: ReassemblyState,
    header: [u8; HEADER_LEN],
    filled: usize,
    body: Vec<u8>,
    need: usize,
}

impl Reassembler {
    fn new() -> Self {
        Self {
            state: ReassemblyState::Idle,
            header: [0; HEADER_LEN],
            filled: 0,
            body: Vec::new(),
            need: 0,
        }
    }

    /// Feeds one byte; returns a complete frame when one is assembled.
    fn feed(&mut self, byte: u8) -> Option<RawFrame> {
        match self.state {
            ReassemblyState::Idle => {
                if byte == SOF {
                    self.filled = 0;
                    self.state = ReassemblyState::Header;
                }
                None
            }
            ReassemblyState::Header => {
                self.header[self.filled] = byte;
                self.filled += 1;
                if self.filled == HEADER_LEN {
                    self.need = usize::from(self.header[6]) + CRC_LEN;
                    self.body.clear();
                    self.state = ReassemblyState::Body;
                }
                None
            }
            ReassemblyState::Body => {
                self.body.push(byte);
                if self.body.len() < self.need {
                    return None;
                }
                self.state = ReassemblyState::Idle;
                Some(self.finish())
            }
        }
    }

    fn finish(&mut self) -> RawFrame {
        let payload_len = self.need - CRC_LEN;
        let payload = self.body[..payload_len].to_vec();
        let received_crc =
            u16::from_be_bytes([self.body[payload_len], self.body[payload_len + 1]]);

        let mut covered = Vec::with_capacity(HEADER_LEN + payload_len);
        covered.extend_from_slice(&self.header);
        covered.extend_from_slice(&payload);
        let crc_ok = crc16_ccitt(&covered) == received_crc;

        RawFrame {
            kind: self.header[0],
            seq: self.header[1],
            src: u16::from_be_bytes([self.header[2], self.header[3]]),
            dst: u16::from_be_bytes([self.header[4], self.header[5]]),
            payload,
            crc_ok,
        }
    }
}

/// Bench implementation of the [`Engine`] contract.
///
/// Shared across the reader, dispatch and mode threads; the orchestration
/// layer confines `send` to the mode task and `dispatch_frame` to the
/// dispatch task.
pub struct MockEngine {
    config: EngineConfig,
    platform: Arc<dyn Platform>,
    initialized: AtomicBool,
    next_seq: AtomicU8,
    timer: AckTimer,
    reassembler: Mutex<Reassembler>,
    /// Single-slot hand-off between the byte-feed path and the dispatcher.
    /// Holding at most one frame here is what guarantees there is never more
    /// than one frame ready without an intervening dispatch.
    ready: Mutex<Option<RawFrame>>,
    ready_taken: Condvar,
    fail_handshake: Option<&'static str>,
}

impl MockEngine {
    /// Creates an engine over the given platform services.
    #[must_use]
    pub fn new(config: EngineConfig, platform: Arc<dyn Platform>) -> Self {
        Self {
            config,
            platform,
            initialized: AtomicBool::new(false),
            next_seq: AtomicU8::new(0),
            timer: AckTimer::new(),
            reassembler: Mutex::new(Reassembler::new()),
            ready: Mutex::new(None),
            ready_taken: Condvar::new(),
            fail_handshake: None,
        }
    }

    /// Makes the next `init` fail its handshake with the given diagnostic.
    /// Test hook.
    #[must_use]
    pub fn with_handshake_failure(mut self, reason: &'static str) -> Self {
        self.fail_handshake = Some(reason);
        self
    }

    fn ensure_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn deliver(&self, frame: &RawFrame) -> Result<(), EngineError> {
        match frame.kind {
            KIND_ACK => {
                // A corrupt ACK cannot be trusted to carry the right
                // sequence number, so it never completes the timer.
                if frame.crc_ok && !self.timer.complete(frame.seq) {
                    trace!(seq = frame.seq, "stale or unexpected ACK");
                }
                Ok(())
            }
            KIND_DATA => {
                // Answer unicast data with an ACK, unless ACKs are disabled.
                if frame.crc_ok
                    && !self.config.flags.contains(EngineFlags::NO_ACK)
                    && frame.dst == self.config.mac_address
                {
                    let ack = encode_ack_frame(frame.seq, self.config.mac_address, frame.src);
                    self.platform.uart_send(&ack)?;
                }

                let status = if frame.crc_ok {
                    RecvStatus::Ok
                } else {
                    RecvStatus::CrcMismatch
                };
                if let Some(cb) = &self.config.on_receive {
                    cb(Received {
                        src: frame.src,
                        dst: frame.dst,
                        payload: &frame.payload,
                        status,
                    });
                }
                Ok(())
            }
            _other => {
                warn!(kind = _other, "dropping frame of unknown kind");
                Ok(())
            }
        }
    }
}

impl Engine for MockEngine {
    fn init(&self) -> Result<(), InitError> {
        if self.ensure_initialized() {
            return Err(InitError::AlreadyInitialized);
        }
        if self.config.on_receive.is_none() {
            return Err(InitError::MissingCallback);
        }
        if self.config.retrans < 1 {
            return Err(InitError::InvalidRetransLimit(self.config.retrans));
        }
        if let Some(reason) = self.fail_handshake {
            return Err(InitError::Handshake(reason));
        }

        // Pulse the reset line and give the modem time to settle.
        self.platform.reset_assert();
        self.platform.usleep(RESET_PULSE_US);
        self.platform.reset_release();
        self.platform.usleep(RESET_SETTLE_US);

        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn send(&self, dst: u16, payload: &[u8]) -> Result<SendReport, SendError> {
        if !self.ensure_initialized() {
            return Err(SendError::NotInitialized);
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(SendError::Oversize {
                size: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let frame = encode_data_frame(seq, self.config.mac_address, dst, payload);

        if self.config.flags.contains(EngineFlags::NO_ACK) {
            self.platform.uart_send(&frame)?;
            debug!(seq, dst, len = payload.len(), "sent without ACK");
            return Ok(SendReport {
                status: SendStatus::Sent,
                attempts: 1,
            });
        }

        self.timer.arm(seq);
        let mut attempts = 0;
        let status = loop {
            attempts += 1;
            debug!(seq, dst, attempts, "transmitting");
            if let Err(e) = self.platform.uart_send(&frame) {
                self.timer.disarm();
                return Err(e.into());
            }
            match self.timer.wait(self.config.ack_timeout) {
                WaitOutcome::Acked => break SendStatus::Acked,
                WaitOutcome::TimedOut if attempts >= self.config.retrans => {
                    break SendStatus::RetryExhausted
                }
                WaitOutcome::TimedOut => {}
            }
        };
        self.timer.disarm();

        Ok(SendReport { status, attempts })
    }

    fn notify_byte(&self, byte: u8) -> Result<ByteOutcome, EngineError> {
        if !self.ensure_initialized() {
            return Err(EngineError::NotInitialized);
        }

        let frame = {
            let mut reassembler = self.reassembler.lock().expect("reassembler poisoned");
            reassembler.feed(byte)
        };

        let Some(frame) = frame else {
            return Ok(ByteOutcome::Consumed);
        };

        // Hand off the completed frame. This may wait for the previous
        // frame to be taken, but never for the application to process it.
        let mut slot = self.ready.lock().expect("ready slot poisoned");
        while slot.is_some() {
            slot = self
                .ready_taken
                .wait(slot)
                .expect("ready slot poisoned");
        }
        *slot = Some(frame);
        Ok(ByteOutcome::FrameReady)
    }

    fn dispatch_frame(&self) -> Result<(), EngineError> {
        if !self.ensure_initialized() {
            return Err(EngineError::NotInitialized);
        }

        let frame = {
            let mut slot = self.ready.lock().expect("ready slot poisoned");
            slot.take()
        };
        self.ready_taken.notify_one();

        let frame = frame.ok_or(EngineError::NoPendingFrame)?;

        if !frame.crc_ok && !self.config.flags.contains(EngineFlags::ACCEPT_INVALID) {
            trace!(src = frame.src, "dropping frame with bad CRC");
            return Ok(());
        }
        if frame.dst != self.config.mac_address && frame.dst != BROADCAST_ADDR {
            trace!(dst = frame.dst, "dropping frame for another node");
            return Ok(());
        }

        self.deliver(&frame)
    }
}
