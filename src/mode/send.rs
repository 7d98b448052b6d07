//! Single-shot send mode: transmit one message and report how it went.

use std::time::Duration;

use minstant::Instant;

use crate::cli::ConfigError;
use crate::context::Context;
use crate::engine::{Engine, EngineConfig};
use crate::mode::{Mode, ModeDescriptor, ModeError, OptSpec};

static DESCRIPTOR: ModeDescriptor = ModeDescriptor {
    name: "send",
    description: "Send a single frame",
    options: &[
        OptSpec {
            short: Some('T'),
            long: "time",
            takes_value: false,
            help: "Display the time necessary to send the message (including retransmissions)",
        },
        OptSpec {
            short: Some('m'),
            long: "message",
            takes_value: true,
            help: "Message to be sent (default: \"Hello World!\")",
        },
    ],
};

/// Sends one frame to the configured destination and prints the final
/// transmission status, optionally with the elapsed wall-clock time.
pub struct SendMode {
    display_time: bool,
    message: String,
}

impl SendMode {
    #[must_use]
    pub fn new() -> Self {
        Self {
            display_time: false,
            message: "Hello World!".to_string(),
        }
    }
}

impl Default for SendMode {
    fn default() -> Self {
        Self::new()
    }
}

impl Mode for SendMode {
    fn descriptor(&self) -> &'static ModeDescriptor {
        &DESCRIPTOR
    }

    fn configure(&mut self, opt: &str, value: Option<&str>) -> Result<bool, ConfigError> {
        match opt {
            "time" => {
                self.display_time = true;
                Ok(true)
            }
            "message" => {
                self.message = value
                    .ok_or_else(|| ConfigError::MissingValue("message".to_string()))?
                    .to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn init(&mut self, _ctx: &Context, config: &mut EngineConfig) {
        // This mode only sends; received frames are ignored.
        config.on_receive = Some(Box::new(|_| {}));
    }

    fn start(&mut self, ctx: &Context, engine: &dyn Engine) -> Result<(), ModeError> {
        let begin = Instant::now();
        let report = engine.send(ctx.dst_mac, self.message.as_bytes())?;
        let elapsed = begin.elapsed();

        println!();
        if self.display_time {
            println!("TIME     : {}", scale_time(elapsed));
        }
        println!(
            "TX STATUS: {} ({} attempt{})",
            report.status,
            report.attempts,
            if report.attempts == 1 { "" } else { "s" }
        );
        Ok(())
    }
}

/// Renders a duration with a unit fitting its magnitude.
fn scale_time(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos < 1_000 {
        format!("{nanos} ns")
    } else if nanos < 1_000_000 {
        format!("{:.2} us", nanos as f64 / 1_000.0)
    } else if nanos < 1_000_000_000 {
        format!("{:.2} ms", nanos as f64 / 1_000_000.0)
    } else {
        format!("{:.2} s", nanos as f64 / 1_000_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_its_own_options() {
        let mut mode = SendMode::new();

        assert!(mode.configure("time", None).unwrap());
        assert!(mode.display_time);

        assert!(mode.configure("message", Some("ping")).unwrap());
        assert_eq!(mode.message, "ping");
    }

    #[test]
    fn ignores_common_options() {
        let mut mode = SendMode::new();
        assert!(!mode.configure("verbose", None).unwrap());
        assert!(!mode.configure("no-ack", None).unwrap());
    }

    #[test]
    fn default_message_matches_the_driver_tradition() {
        assert_eq!(SendMode::new().message, "Hello World!");
    }

    #[test]
    fn init_installs_a_receive_callback() {
        let mut mode = SendMode::new();
        let ctx = Context::default();
        let mut config = EngineConfig::default();

        mode.init(&ctx, &mut config);

        assert!(config.on_receive.is_some());
    }

    #[test]
    fn scale_time_picks_fitting_units() {
        assert_eq!(scale_time(Duration::from_nanos(10)), "10 ns");
        assert_eq!(scale_time(Duration::from_micros(15)), "15.00 us");
        assert_eq!(scale_time(Duration::from_millis(250)), "250.00 ms");
        assert_eq!(scale_time(Duration::from_secs(2)), "2.00 s");
    }
}
