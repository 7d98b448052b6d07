//! Per-run driver context.

/// Broadcast short address: frames sent here are accepted by every node.
pub const BROADCAST_ADDR: u16 = 0xFFFF;

/// Immutable per-run state shared by the mode and the orchestration layer.
///
/// Built once from the parsed command line and never mutated afterwards, so
/// it can be freely shared across the I/O threads by reference.
#[derive(Debug, Clone)]
pub struct Context {
    /// Print progress and a configuration summary on stdout.
    pub verbose: bool,
    /// Destination short MAC address for outgoing frames.
    pub dst_mac: u16,
    /// GPIO line wired to the modem's reset pin, if any.
    pub reset_pin: Option<u32>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            verbose: false,
            dst_mac: BROADCAST_ADDR,
            reset_pin: None,
        }
    }
}
