//! End-to-end driver sessions over an in-memory link.
//!
//! Each test wires the full three-thread runtime (reader, dispatcher, mode)
//! to one end of a byte pipe and plays the far-end modem on the other end.

#![cfg(feature = "mock")]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use g3link::cli::{self, CliOutcome, ConfigError};
use g3link::context::Context;
use g3link::engine::mock::{encode_ack_frame, encode_data_frame, MockEngine};
use g3link::engine::{Engine, EngineConfig, EngineFlags, Platform};
use g3link::mode::send::SendMode;
use g3link::mode::{Mode, ModeDescriptor, ModeError};
use g3link::runtime;
use g3link::uart::pipe::{pipe, PipeEnd};
use g3link::uart::ByteSource;

const HOST_MAC: u16 = 0x0001;
const PEER_MAC: u16 = 0x1234;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Builds an initialized engine on the host end of the pipe.
fn host_engine(host: &PipeEnd, mut config: EngineConfig, mode: &mut dyn Mode) -> Arc<dyn Engine> {
    let ctx = Context::default();
    mode.init(&ctx, &mut config);
    let engine = MockEngine::new(config, Arc::new(host.clone()) as Arc<dyn Platform>);
    engine.init().expect("engine init");
    Arc::new(engine)
}

/// Reads exactly `len` bytes from the far end of the pipe.
fn read_from_far(far: &mut PipeEnd, len: usize) -> Vec<u8> {
    let mut collected = Vec::with_capacity(len);
    let mut buf = [0u8; 256];
    let deadline = Instant::now() + Duration::from_secs(5);
    while collected.len() < len {
        assert!(Instant::now() < deadline, "timed out reading from far end");
        let n = far.read_chunk(&mut buf).expect("pipe read");
        collected.extend_from_slice(&buf[..n]);
    }
    assert_eq!(collected.len(), len, "read past the expected frame boundary");
    collected
}

/// Drains the far end of the pipe until it stays quiet, returning all bytes.
fn drain_far_end(far: &mut PipeEnd, quiet_for: Duration) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 256];
    let mut last_data = Instant::now();
    loop {
        let n = far.read_chunk(&mut buf).expect("pipe read");
        if n > 0 {
            collected.extend_from_slice(&buf[..n]);
            last_data = Instant::now();
        } else if last_data.elapsed() >= quiet_for {
            return collected;
        }
    }
}

#[test]
fn no_ack_send_reaches_the_wire_in_one_attempt() {
    // Scenario: -a -r 3, destination 0x1234, payload "Hello World!".
    let mut mode = SendMode::new();
    let parsed = cli::parse(
        &args(&[
            "-a",
            "-r",
            "3",
            "-d",
            "1234",
            "-m",
            "Hello World!",
            "0001",
            "/dev/ttyUSB0",
        ]),
        &mut mode,
    )
    .expect("parse");
    let invocation = match parsed {
        CliOutcome::Run(invocation) => invocation,
        _ => panic!("expected a run outcome"),
    };

    let (host, mut far) = pipe();
    let engine = host_engine(&host, invocation.engine, &mut mode);

    let begin = Instant::now();
    runtime::run(&mut mode, &invocation.context, &engine, host.clone()).expect("run");
    mode.destroy(&invocation.context);

    // No ACK wait happened.
    assert!(begin.elapsed() < Duration::from_millis(500));

    // Exactly one transmission of the exact frame.
    let wire = drain_far_end(&mut far, Duration::from_millis(100));
    assert_eq!(
        wire,
        encode_data_frame(0, HOST_MAC, PEER_MAC, b"Hello World!")
    );
}

#[test]
fn silent_link_exhausts_five_retransmissions_and_still_succeeds() {
    // Scenario: ACKs enabled, retransmissions 5, the link never answers.
    let retrans = 5;
    let timeout = Duration::from_millis(50);

    let mut mode = SendMode::new();
    let config = EngineConfig {
        mac_address: HOST_MAC,
        retrans,
        ack_timeout: timeout,
        ..EngineConfig::default()
    };

    let (host, mut far) = pipe();
    let engine = host_engine(&host, config, &mut mode);

    let ctx = Context {
        dst_mac: PEER_MAC,
        ..Context::default()
    };

    let begin = Instant::now();
    // A completed run: retry exhaustion is reported, not an error.
    runtime::run(&mut mode, &ctx, &engine, host.clone()).expect("run");
    let elapsed = begin.elapsed();
    mode.destroy(&ctx);

    assert!(elapsed >= timeout * retrans);
    assert!(elapsed < timeout * retrans + Duration::from_millis(500));

    let frame = encode_data_frame(0, HOST_MAC, PEER_MAC, b"Hello World!");
    let wire = drain_far_end(&mut far, Duration::from_millis(100));
    assert_eq!(wire.len(), frame.len() * retrans as usize);
    for chunk in wire.chunks(frame.len()) {
        assert_eq!(chunk, &frame[..]);
    }
}

#[test]
fn acknowledged_send_stops_retransmitting() {
    let mut mode = SendMode::new();
    let config = EngineConfig {
        mac_address: HOST_MAC,
        retrans: 5,
        ack_timeout: Duration::from_millis(200),
        ..EngineConfig::default()
    };

    let (host, far) = pipe();
    let engine = host_engine(&host, config, &mut mode);

    // Far-end modem: ACK the first frame.
    let responder = {
        let mut far = far.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 256];
            loop {
                let n = far.read_chunk(&mut buf).expect("pipe read");
                if n > 0 {
                    far.uart_send(&encode_ack_frame(0, PEER_MAC, HOST_MAC))
                        .expect("ack send");
                    return;
                }
            }
        })
    };

    let ctx = Context {
        dst_mac: PEER_MAC,
        ..Context::default()
    };

    let begin = Instant::now();
    runtime::run(&mut mode, &ctx, &engine, host.clone()).expect("run");
    mode.destroy(&ctx);
    responder.join().unwrap();

    // One attempt, not five timeouts.
    assert!(begin.elapsed() < Duration::from_millis(500));
}

/// Mode that waits for a number of inbound frames, recording them.
struct CollectMode {
    expected: usize,
    seen: Arc<AtomicUsize>,
    payloads: Arc<Mutex<Vec<Vec<u8>>>>,
    in_dispatch: Arc<AtomicBool>,
    overlap: Arc<AtomicBool>,
}

impl CollectMode {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            seen: Arc::new(AtomicUsize::new(0)),
            payloads: Arc::new(Mutex::new(Vec::new())),
            in_dispatch: Arc::new(AtomicBool::new(false)),
            overlap: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Mode for CollectMode {
    fn descriptor(&self) -> &'static ModeDescriptor {
        static DESCRIPTOR: ModeDescriptor = ModeDescriptor {
            name: "collect",
            description: "test mode",
            options: &[],
        };
        &DESCRIPTOR
    }

    fn configure(&mut self, _opt: &str, _value: Option<&str>) -> Result<bool, ConfigError> {
        Ok(false)
    }

    fn init(&mut self, _ctx: &Context, config: &mut EngineConfig) {
        let seen = Arc::clone(&self.seen);
        let payloads = Arc::clone(&self.payloads);
        let in_dispatch = Arc::clone(&self.in_dispatch);
        let overlap = Arc::clone(&self.overlap);

        config.on_receive = Some(Box::new(move |frame| {
            // Detect any concurrent callback invocation.
            if in_dispatch.swap(true, Ordering::SeqCst) {
                overlap.store(true, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(1));
            payloads.lock().unwrap().push(frame.payload.to_vec());
            seen.fetch_add(1, Ordering::SeqCst);
            in_dispatch.store(false, Ordering::SeqCst);
        }));
    }

    fn start(&mut self, _ctx: &Context, _engine: &dyn Engine) -> Result<(), ModeError> {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.seen.load(Ordering::SeqCst) < self.expected {
            assert!(Instant::now() < deadline, "timed out waiting for frames");
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

#[test]
fn interleaved_partial_frames_dispatch_serially() {
    const FRAMES: usize = 32;

    let mut mode = CollectMode::new(FRAMES);
    let config = EngineConfig {
        mac_address: HOST_MAC,
        flags: EngineFlags::NO_ACK,
        ..EngineConfig::default()
    };

    let (host, far) = pipe();
    let engine = host_engine(&host, config, &mut mode);

    // Far-end modem: stream frames in deliberately awkward chunks.
    let feeder = thread::spawn(move || {
        for i in 0..FRAMES {
            let payload = format!("frame {i:02}");
            let wire = encode_data_frame(i as u8, PEER_MAC, HOST_MAC, payload.as_bytes());
            for chunk in wire.chunks(3) {
                far.uart_send(chunk).expect("feed");
                if i % 5 == 0 {
                    thread::sleep(Duration::from_micros(200));
                }
            }
        }
    });

    let ctx = Context::default();
    runtime::run(&mut mode, &ctx, &engine, host.clone()).expect("run");
    feeder.join().unwrap();

    assert!(
        !mode.overlap.load(Ordering::SeqCst),
        "receive callback ran concurrently with itself"
    );
    let payloads = mode.payloads.lock().unwrap();
    assert_eq!(payloads.len(), FRAMES);
    for (i, payload) in payloads.iter().enumerate() {
        assert_eq!(payload, format!("frame {i:02}").as_bytes());
    }
}

#[test]
fn echo_mode_answers_with_ack_and_payload() {
    use g3link::mode::echo::EchoMode;

    let mut mode = EchoMode::new();
    assert!(mode.configure("count", Some("1")).expect("configure"));

    let config = EngineConfig {
        mac_address: HOST_MAC,
        retrans: 3,
        ack_timeout: Duration::from_millis(500),
        ..EngineConfig::default()
    };

    let (host, far) = pipe();
    let engine = host_engine(&host, config, &mut mode);

    // Far-end modem: send one data frame, then ACK whatever comes back.
    let responder = {
        let mut far = far.clone();
        thread::spawn(move || {
            far.uart_send(&encode_data_frame(4, PEER_MAC, HOST_MAC, b"marco"))
                .expect("send");

            // First the ACK for our data frame, then the echoed payload.
            // Answer promptly, before the echo's retransmission timer fires.
            let expected_ack = encode_ack_frame(4, HOST_MAC, PEER_MAC);
            let expected_echo = encode_data_frame(0, HOST_MAC, PEER_MAC, b"marco");
            let wire = read_from_far(&mut far, expected_ack.len() + expected_echo.len());
            assert_eq!(&wire[..expected_ack.len()], &expected_ack[..]);
            assert_eq!(&wire[expected_ack.len()..], &expected_echo[..]);

            far.uart_send(&encode_ack_frame(0, PEER_MAC, HOST_MAC))
                .expect("ack echo");
        })
    };

    let ctx = Context::default();
    runtime::run(&mut mode, &ctx, &engine, host.clone()).expect("run");
    mode.destroy(&ctx);
    responder.join().unwrap();
}

#[test]
fn invalid_reset_gpio_fails_before_any_initialization() {
    // Scenario: a bad --reset value must be rejected during parsing, before
    // any UART or engine initialization could run.
    let mut mode = SendMode::new();
    let err = cli::parse(
        &args(&["--reset", "99", "0001", "/dev/ttyUSB0"]),
        &mut mode,
    )
    .unwrap_err();

    assert!(matches!(err, ConfigError::InvalidResetPin(99)));
}
