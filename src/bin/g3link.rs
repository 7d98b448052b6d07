//! G3-PLC modem driver.
//!
//! Configures the modem over UART/GPIO, then runs the interface mode linked
//! into this build (see the `mode-*` cargo features).
//!
//! # Usage
//!
//! ```sh
//! g3link -d 1234 -r 3 0001 /dev/ttyUSB0
//! ```
//!
//! # Exit status
//!
//! Zero after a completed run, including a send whose retry budget was
//! exhausted: that is reported, but it is a valid outcome. Non-zero for
//! configuration, initialization and unrecoverable I/O errors.

use std::env;
use std::process;
use std::sync::Arc;

use thiserror::Error;

use g3link::cli::{self, CliOutcome, ConfigError};
use g3link::engine::mock::MockEngine;
use g3link::engine::{Engine, InitError};
use g3link::gpio::{GpioError, ResetPin};
use g3link::mode::{self, Mode};
use g3link::runtime::{self, RuntimeError};
use g3link::uart::{HostPlatform, LinkError, SerialLink};

#[cfg(not(any(feature = "mode-send", feature = "mode-echo")))]
compile_error!("the g3link binary needs an interface mode: enable `mode-send` or `mode-echo`");

#[derive(Debug, Error)]
enum FatalError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gpio(#[from] GpioError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("cannot initialize G3-PLC layer: {0}")]
    Init(#[from] InitError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn main() {
    g3link::init_tracing();

    if let Err(e) = run() {
        eprintln!("g3link: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), FatalError> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut mode = mode::active();

    let invocation = match cli::parse(&args, &mut mode)? {
        CliOutcome::Help => {
            cli::print_help(&mode);
            return Ok(());
        }
        CliOutcome::Version => {
            cli::print_version();
            return Ok(());
        }
        CliOutcome::Run(invocation) => invocation,
    };

    if invocation.context.verbose {
        cli::print_summary(&invocation, mode.descriptor().name);
    }

    let link = SerialLink::open(&invocation.device, invocation.baud)?;
    if invocation.context.verbose {
        println!("Serial initialized!");
    }

    let reset = invocation
        .context
        .reset_pin
        .map(ResetPin::export)
        .transpose()?;
    let platform = HostPlatform::new(link.clone(), reset);

    let cli::Invocation {
        context,
        engine: mut config,
        ..
    } = invocation;

    let result = (|| -> Result<(), FatalError> {
        // The mode configures the engine before the layer is brought up;
        // that is why the engine initializes after the mode.
        mode.init(&context, &mut config);
        let engine: Arc<dyn Engine> = Arc::new(MockEngine::new(config, Arc::new(platform)));
        engine.init()?;

        runtime::run(&mut mode, &context, &engine, link)?;
        Ok(())
    })();

    // No I/O task is running anymore; release mode resources on every path,
    // including the ones where the mode's program never ran.
    mode.destroy(&context);

    result
}
