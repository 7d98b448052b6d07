//! Command-line surface.
//!
//! Two positional arguments are mandatory: the device's own short address
//! (hex) and the UART device path. Common options cover verbosity, ACK
//! suppression, invalid-frame tolerance, timing, baud rate, destination and
//! the optional reset GPIO line; the active mode contributes its own
//! options, which are matched first (see [`crate::mode`] on shadowing).
//!
//! Configuration errors are fatal and reported before any hardware I/O
//! happens.

use std::time::Duration;

use thiserror::Error;

use crate::context::Context;
use crate::engine::{EngineConfig, EngineFlags};
use crate::gpio;
use crate::mode::{Mode, OptSpec};

/// Default baud rate of the modem UART.
pub const DEFAULT_BAUD: u32 = 9600;

/// Common options understood by every mode.
const COMMON_OPTS: &[OptSpec] = &[
    OptSpec {
        short: Some('h'),
        long: "help",
        takes_value: false,
        help: "Show this help message",
    },
    OptSpec {
        short: Some('V'),
        long: "version",
        takes_value: false,
        help: "Show version information",
    },
    OptSpec {
        short: Some('v'),
        long: "verbose",
        takes_value: false,
        help: "Enable verbose mode",
    },
    OptSpec {
        short: Some('i'),
        long: "invalid",
        takes_value: false,
        help: "Do not filter invalid frames (frame header, CRC)",
    },
    OptSpec {
        short: Some('a'),
        long: "no-ack",
        takes_value: false,
        help: "Do not answer nor expect ACKs",
    },
    OptSpec {
        short: Some('t'),
        long: "timeout",
        takes_value: true,
        help: "ACK timeout in microseconds (default 1s)",
    },
    OptSpec {
        short: Some('r'),
        long: "retransmissions",
        takes_value: true,
        help: "Maximum number of transmissions (default 5)",
    },
    OptSpec {
        short: Some('B'),
        long: "baud",
        takes_value: true,
        help: "Specify the baud rate (default 9600)",
    },
    OptSpec {
        short: Some('d'),
        long: "destination",
        takes_value: true,
        help: "Destination MAC (hex short address, default broadcast)",
    },
    OptSpec {
        short: None,
        long: "reset",
        takes_value: true,
        help: "RESET GPIO line",
    },
];

/// Fatal configuration errors, reported before any hardware I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown option `{0}`")]
    UnknownOption(String),
    #[error("option `--{0}` requires a value")]
    MissingValue(String),
    #[error("cannot parse value `{value}` for option `--{option}`")]
    InvalidValue { option: String, value: String },
    #[error("invalid number of retransmissions {0} (must be >= 1)")]
    InvalidRetransLimit(u32),
    #[error("invalid RESET GPIO number {0}")]
    InvalidResetPin(u32),
    #[error("cannot parse source address `{0}` (expected a hex short address)")]
    InvalidSourceAddress(String),
    #[error("expected exactly two positional arguments: <source> <device>")]
    BadPositionals,
}

/// A fully parsed invocation, ready to be wired up and run.
#[derive(Debug)]
pub struct Invocation {
    pub context: Context,
    pub engine: EngineConfig,
    pub device: String,
    pub baud: u32,
}

/// Result of parsing the command line.
#[derive(Debug)]
pub enum CliOutcome {
    /// Run the driver with the given configuration.
    Run(Invocation),
    /// Print the merged help text and exit successfully.
    Help,
    /// Print the version banner and exit successfully.
    Version,
}

fn find_spec(opts: &'static [OptSpec], long: Option<&str>, short: Option<char>) -> Option<&'static OptSpec> {
    opts.iter()
        .find(|spec| match (long, short) {
            (Some(name), _) => spec.long == name,
            (None, Some(c)) => spec.short == Some(c),
            (None, None) => false,
        })
}

/// Parses `args` (without the program name) against the common grammar
/// merged with the active mode's options.
///
/// Mode options take precedence: every recognized option is offered to the
/// mode before the common handling runs.
///
/// # Errors
///
/// Returns a [`ConfigError`] for unknown options, malformed values, invalid
/// GPIO numbers or missing positionals. All are fatal.
pub fn parse(args: &[String], mode: &mut dyn Mode) -> Result<CliOutcome, ConfigError> {
    let mode_opts = mode.descriptor().options;
    let mut context = Context::default();
    let mut engine = EngineConfig::default();
    let mut baud = DEFAULT_BAUD;
    let mut positionals: Vec<&str> = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let spec = if let Some(long) = arg.strip_prefix("--") {
            find_spec(mode_opts, Some(long), None)
                .or_else(|| find_spec(COMMON_OPTS, Some(long), None))
                .ok_or_else(|| ConfigError::UnknownOption(arg.clone()))?
        } else if arg.len() == 2 && arg.starts_with('-') && arg != "-" {
            let short = arg.chars().nth(1).expect("length checked above");
            find_spec(mode_opts, None, Some(short))
                .or_else(|| find_spec(COMMON_OPTS, None, Some(short)))
                .ok_or_else(|| ConfigError::UnknownOption(arg.clone()))?
        } else if arg.starts_with('-') && arg != "-" {
            return Err(ConfigError::UnknownOption(arg.clone()));
        } else {
            positionals.push(arg);
            continue;
        };

        let value = if spec.takes_value {
            Some(
                iter.next()
                    .ok_or_else(|| ConfigError::MissingValue(spec.long.to_string()))?
                    .as_str(),
            )
        } else {
            None
        };

        // Mode options first; a mode may shadow a common option.
        if mode.configure(spec.long, value)? {
            continue;
        }

        match spec.long {
            "help" => return Ok(CliOutcome::Help),
            "version" => return Ok(CliOutcome::Version),
            "verbose" => context.verbose = true,
            "invalid" => engine.flags |= EngineFlags::ACCEPT_INVALID,
            "no-ack" => engine.flags |= EngineFlags::NO_ACK,
            "timeout" => {
                engine.ack_timeout = Duration::from_micros(parse_value(spec, value)?);
            }
            "retransmissions" => {
                let retrans: u32 = parse_value(spec, value)?;
                if retrans < 1 {
                    return Err(ConfigError::InvalidRetransLimit(retrans));
                }
                engine.retrans = retrans;
            }
            "baud" => baud = parse_value(spec, value)?,
            "destination" => context.dst_mac = parse_hex(spec, value)?,
            "reset" => {
                let pin: u32 = parse_value(spec, value)?;
                if !gpio::is_valid_pin(pin) {
                    return Err(ConfigError::InvalidResetPin(pin));
                }
                context.reset_pin = Some(pin);
            }
            other => return Err(ConfigError::UnknownOption(other.to_string())),
        }
    }

    if positionals.len() != 2 {
        return Err(ConfigError::BadPositionals);
    }
    engine.mac_address = u16::from_str_radix(positionals[0], 16)
        .map_err(|_| ConfigError::InvalidSourceAddress(positionals[0].to_string()))?;
    let device = positionals[1].to_string();

    Ok(CliOutcome::Run(Invocation {
        context,
        engine,
        device,
        baud,
    }))
}

fn parse_value<T: std::str::FromStr>(
    spec: &OptSpec,
    value: Option<&str>,
) -> Result<T, ConfigError> {
    let raw = value.ok_or_else(|| ConfigError::MissingValue(spec.long.to_string()))?;
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        option: spec.long.to_string(),
        value: raw.to_string(),
    })
}

fn parse_hex(spec: &OptSpec, value: Option<&str>) -> Result<u16, ConfigError> {
    let raw = value.ok_or_else(|| ConfigError::MissingValue(spec.long.to_string()))?;
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    u16::from_str_radix(digits, 16).map_err(|_| ConfigError::InvalidValue {
        option: spec.long.to_string(),
        value: raw.to_string(),
    })
}

fn render_opts(opts: &[OptSpec]) {
    for spec in opts {
        let mut name = String::from(spec.long);
        if spec.takes_value {
            name.push_str(" <value>");
        }
        match spec.short {
            Some(c) => eprintln!("    -{c}, --{name:<24}{}", spec.help),
            None => eprintln!("        --{name:<24}{}", spec.help),
        }
    }
}

/// Prints the merged help text for the common grammar and the active mode.
pub fn print_help(mode: &dyn Mode) {
    let descriptor = mode.descriptor();

    eprintln!("g3link - G3-PLC modem driver");
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    g3link [OPTIONS] <source> <device>");
    eprintln!();
    eprintln!("ARGS:");
    eprintln!("    <source>    Device short address (hex)");
    eprintln!("    <device>    UART device path");
    eprintln!();
    eprintln!("OPTIONS:");
    render_opts(COMMON_OPTS);

    if !descriptor.options.is_empty() {
        eprintln!();
        eprintln!("Extra options for {} mode:", descriptor.name);
        render_opts(descriptor.options);
    }
}

/// Prints the version banner.
pub fn print_version() {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
}

/// Prints a summary of the link configuration. Verbose mode only.
pub fn print_summary(invocation: &Invocation, mode_name: &str) {
    let Invocation {
        context,
        engine,
        device,
        baud,
    } = invocation;

    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("Using {mode_name} mode on {device} @{baud} bauds.");
    if let Some(pin) = context.reset_pin {
        println!("GPIO configured on:");
        println!("  - RESET: {pin}");
    }
    println!(" iface (source) MAC address: {:04X}", engine.mac_address);
    println!(" destination MAC address   : {:04X}", context.dst_mac);
    println!(" CMD timeout               : {} us", engine.ack_timeout.as_micros());
    println!(" Max. retransmissions      : {} tries", engine.retrans);
    println!(" flags                     : 0x{:08x}", engine.flags.bits());
    for flag in engine.flags.iter() {
        println!("  - {}", flag.describe());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::send::SendMode;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn parse_run(list: &[&str]) -> Result<Invocation, ConfigError> {
        let mut mode = SendMode::new();
        match parse(&args(list), &mut mode)? {
            CliOutcome::Run(invocation) => Ok(invocation),
            _ => panic!("expected a run outcome"),
        }
    }

    #[test]
    fn positionals_and_defaults() {
        let invocation = parse_run(&["cafe", "/dev/ttyUSB0"]).unwrap();

        assert_eq!(invocation.engine.mac_address, 0xCAFE);
        assert_eq!(invocation.device, "/dev/ttyUSB0");
        assert_eq!(invocation.baud, DEFAULT_BAUD);
        assert_eq!(invocation.engine.retrans, 5);
        assert_eq!(invocation.engine.ack_timeout, Duration::from_secs(1));
        assert_eq!(invocation.context.dst_mac, crate::context::BROADCAST_ADDR);
        assert!(invocation.engine.flags.is_empty());
        assert!(!invocation.context.verbose);
    }

    #[test]
    fn flags_and_values_are_applied() {
        let invocation = parse_run(&[
            "-a", "-i", "-v", "-r", "3", "-t", "250000", "-B", "115200", "-d", "1234", "0001",
            "/dev/ttyACM1",
        ])
        .unwrap();

        assert!(invocation.engine.flags.contains(EngineFlags::NO_ACK));
        assert!(invocation
            .engine
            .flags
            .contains(EngineFlags::ACCEPT_INVALID));
        assert!(invocation.context.verbose);
        assert_eq!(invocation.engine.retrans, 3);
        assert_eq!(invocation.engine.ack_timeout, Duration::from_micros(250_000));
        assert_eq!(invocation.baud, 115_200);
        assert_eq!(invocation.context.dst_mac, 0x1234);
    }

    #[test]
    fn long_options_work_too() {
        let invocation = parse_run(&[
            "--no-ack",
            "--destination",
            "0x1234",
            "--retransmissions",
            "7",
            "cafe",
            "/dev/ttyUSB0",
        ])
        .unwrap();

        assert!(invocation.engine.flags.contains(EngineFlags::NO_ACK));
        assert_eq!(invocation.context.dst_mac, 0x1234);
        assert_eq!(invocation.engine.retrans, 7);
    }

    #[test]
    fn mode_options_are_routed_to_the_mode() {
        let mut mode = SendMode::new();
        let outcome = parse(
            &args(&["-m", "custom payload", "-T", "cafe", "/dev/ttyUSB0"]),
            &mut mode,
        )
        .unwrap();

        assert!(matches!(outcome, CliOutcome::Run(_)));
        // The common parser never saw -m / -T.
        assert!(mode.configure("message", Some("check")).unwrap());
    }

    #[test]
    fn invalid_reset_pin_is_fatal_before_any_io() {
        let err = parse_run(&["--reset", "99", "cafe", "/dev/ttyUSB0"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidResetPin(99)));
    }

    #[test]
    fn valid_reset_pin_is_recorded() {
        let invocation = parse_run(&["--reset", "17", "cafe", "/dev/ttyUSB0"]).unwrap();
        assert_eq!(invocation.context.reset_pin, Some(17));
    }

    #[test]
    fn zero_retransmissions_are_rejected() {
        let err = parse_run(&["-r", "0", "cafe", "/dev/ttyUSB0"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRetransLimit(0)));
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = parse_run(&["--frobnicate", "cafe", "/dev/ttyUSB0"]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOption(_)));
    }

    #[test]
    fn missing_value_is_rejected() {
        let err = parse_run(&["cafe", "/dev/ttyUSB0", "-t"]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue(_)));
    }

    #[test]
    fn missing_positionals_are_rejected() {
        let err = parse_run(&["cafe"]).unwrap_err();
        assert!(matches!(err, ConfigError::BadPositionals));

        let err = parse_run(&["cafe", "/dev/ttyUSB0", "extra"]).unwrap_err();
        assert!(matches!(err, ConfigError::BadPositionals));
    }

    #[test]
    fn malformed_source_address_is_rejected() {
        let err = parse_run(&["zzzz", "/dev/ttyUSB0"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSourceAddress(_)));
    }

    #[test]
    fn help_and_version_short_circuit() {
        let mut mode = SendMode::new();
        assert!(matches!(
            parse(&args(&["-h"]), &mut mode).unwrap(),
            CliOutcome::Help
        ));
        assert!(matches!(
            parse(&args(&["-V"]), &mut mode).unwrap(),
            CliOutcome::Version
        ));
    }
}
