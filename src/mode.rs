//! Interface modes.
//!
//! A mode is the program the driver runs once the link is up: it decides
//! what to send and how to react to replies. Exactly one mode is linked into
//! the binary, selected at build time through the `mode-send` / `mode-echo`
//! cargo features.
//!
//! # Option precedence
//!
//! The command-line parser offers every option to the active mode first and
//! only falls back to the common options when the mode does not recognize
//! it. A mode option that reuses a common option's letter therefore shadows
//! it. This mirrors the historical driver behavior; it is a known design
//! smell, not a feature, so modes should pick letters that stay clear of the
//! common set.

pub mod echo;
pub mod send;

use thiserror::Error;

use crate::cli::ConfigError;
use crate::context::Context;
use crate::engine::{Engine, EngineConfig, SendError};

#[cfg(all(feature = "mode-send", feature = "mode-echo"))]
compile_error!(
    "features `mode-send` and `mode-echo` are mutually exclusive; enable exactly one interface mode"
);

/// One command-line option understood by a mode or by the common parser.
#[derive(Debug, Clone, Copy)]
pub struct OptSpec {
    /// Short option letter, if any.
    pub short: Option<char>,
    /// Long option name, without the leading dashes.
    pub long: &'static str,
    /// Whether the option consumes the following argument as its value.
    pub takes_value: bool,
    /// Help text.
    pub help: &'static str,
}

/// Static description of a mode: its name and option grammar.
#[derive(Debug)]
pub struct ModeDescriptor {
    /// Short mode name, shown in help and the configuration summary.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Mode-specific options, merged into the common grammar.
    pub options: &'static [OptSpec],
}

/// Errors surfaced by a mode's program.
#[derive(Debug, Error)]
pub enum ModeError {
    /// `start` was called before `init`.
    #[error("mode not initialized")]
    NotInitialized,
    /// A send failed with an unrecoverable error. Retry exhaustion is not
    /// an error; modes report it and return success.
    #[error(transparent)]
    Send(#[from] SendError),
}

/// The mode plugin contract.
///
/// Lifecycle: `configure` is called once per recognized option during
/// parsing, `init` installs the receive callback into the engine
/// configuration before engine init, `start` runs on the mode task, and
/// `destroy` always runs after both I/O tasks have terminated, including
/// early-exit paths where `start` never ran to completion.
pub trait Mode: Send {
    /// The mode's static descriptor.
    fn descriptor(&self) -> &'static ModeDescriptor;

    /// Offers one parsed option to the mode.
    ///
    /// `opt` is the option's long name; `value` is present iff the matched
    /// spec takes a value. Returns whether the mode recognized the option.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a recognized option has a malformed
    /// value.
    fn configure(&mut self, opt: &str, value: Option<&str>) -> Result<bool, ConfigError>;

    /// Installs the mode's receive callback into the engine configuration.
    ///
    /// Must run before the engine's `init`.
    fn init(&mut self, ctx: &Context, config: &mut EngineConfig);

    /// The mode's main program. Runs entirely on the mode task; all frame
    /// sends happen here.
    ///
    /// # Errors
    ///
    /// Returns a [`ModeError`] on unrecoverable failure.
    fn start(&mut self, ctx: &Context, engine: &dyn Engine) -> Result<(), ModeError>;

    /// Releases mode-local resources. Must tolerate `start` never having
    /// run to completion.
    fn destroy(&mut self, _ctx: &Context) {}
}

/// The mode linked into this build.
#[cfg(feature = "mode-send")]
#[must_use]
pub fn active() -> send::SendMode {
    send::SendMode::new()
}

/// The mode linked into this build.
#[cfg(all(feature = "mode-echo", not(feature = "mode-send")))]
#[must_use]
pub fn active() -> echo::EchoMode {
    echo::EchoMode::new()
}
