//! Session configuration.
//!
//! The original implementation this crate is modeled on (`cantp.py`) keeps
//! its timing and threshold values as module-level globals shared by every
//! transfer. Here they live in a `Config` record passed into
//! [`crate::Session::new`], so two sessions on the same process can run
//! different timing budgets.

use std::time::Duration;

/// Tunables for one [`crate::Session`].
///
/// All fields have the defaults from spec §6 / `cantp.py`'s module
/// constants; override only the ones a particular link profile needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Byte-fill short frames up to the next permitted frame size.
    pub padding: bool,
    /// Select the 64-byte FD frame regime and the FD-specific SF escape form.
    pub is_fd: bool,
    /// Block size this session advertises in `FC(Continue)`. `0` means
    /// "send all remaining Consecutive Frames without further Flow Control".
    pub block_size: u8,
    /// Separation time this session advertises in `FC(Continue)`.
    ///
    /// Stored as a `Duration` for convenience; only the millisecond range
    /// (0..=127 ms) is representable on the advertising side, per the
    /// simplification spec §4.1 explicitly permits. Decoding a peer's
    /// `STmin` still honors the full millisecond/microsecond wire encoding.
    pub st_min: Duration,
    /// Deadline for a bus-send to complete on the sender.
    pub n_as: Duration,
    /// Deadline for a bus-send (a Flow Control) to complete on the receiver.
    pub n_ar: Duration,
    /// Deadline for the sender to receive a Flow Control.
    pub n_bs: Duration,
    /// Deadline for the receiver to emit a Flow Control.
    pub n_br: Duration,
    /// Deadline for the sender to emit its next Consecutive Frame.
    pub n_cs: Duration,
    /// Deadline for the receiver to receive the next Consecutive Frame.
    pub n_cr: Duration,
    /// Overflow threshold for an incoming transfer.
    pub max_buffer: u32,
    /// Buffered-length watermark above which `FC(Wait)` frames precede the
    /// next `FC(Continue)`. Doubles every time it is crossed.
    pub wait_watermark: u32,
    /// Maximum number of consecutive `FC(Wait)` frames emitted (receiver)
    /// or tolerated (sender) before giving up.
    pub n_wftmax: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            padding: false,
            is_fd: false,
            block_size: 15,
            st_min: Duration::from_millis(10),
            n_as: Duration::from_secs(1),
            n_ar: Duration::from_secs(1),
            n_bs: Duration::from_secs(1),
            n_br: Duration::from_secs(1),
            n_cs: Duration::from_secs(1),
            n_cr: Duration::from_secs(1),
            max_buffer: 10_000,
            wait_watermark: 1_000,
            n_wftmax: 2,
        }
    }
}
