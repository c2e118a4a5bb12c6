//! Defines the error type for this library.

/* ========== Includes ========== */
use thiserror::Error;

/* ========== Enums ========== */

/// Error type for ISO-TP library.
///
/// Every variant terminates the transfer in progress; there is no
/// transparent retry at this layer (see spec §7 Propagation).
#[derive(Error, Debug)]
pub enum Error {
    /// No Flow Control arrived before `N_Bs` elapsed while the sender was
    /// waiting after a First Frame or a completed block.
    #[error("timed out waiting for flow control (N_Bs)")]
    NBsTimeout,

    /// The receiver failed to issue a Flow Control within `N_Br` of a
    /// First Frame or a completed block.
    #[error("timed out waiting to issue flow control (N_Br)")]
    NBrTimeout,

    /// The sender failed to emit the next Consecutive Frame within `N_Cs`
    /// of being cleared to send.
    #[error("timed out before the next consecutive frame could be sent (N_Cs)")]
    NCsTimeout,

    /// No Consecutive Frame arrived within `N_Cr` of the previous one.
    #[error("timed out waiting for the next consecutive frame (N_Cr)")]
    NCrTimeout,

    /// A bus send on the sender side did not complete within `N_As`.
    #[error("bus send did not complete within N_As")]
    NAsTimeout(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A bus send on the receiver side (a Flow Control) did not complete
    /// within `N_Ar`.
    #[error("bus send did not complete within N_Ar")]
    NArTimeout(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The peer answered with `FS = Overflow`.
    #[error("peer signaled overflow, aborting transfer")]
    PeerOverflow,

    /// An incoming transfer would exceed the configured buffer; a Flow
    /// Control `Overflow` has already been emitted.
    #[error("incoming transfer of `{len}` bytes exceeds local buffer of `{max}` bytes")]
    LocalOverflow { len: u32, max: u32 },

    /// A Consecutive Frame arrived with a sequence number other than the
    /// one expected.
    #[error("wrong sequence number: expected `{expected}`, received `{actual}`")]
    WrongSequenceNumber { expected: u8, actual: u8 },

    /// A frame kind was received that is illegal in the current state.
    #[error("unexpected frame for the current state")]
    UnexpectedFrame,

    /// The frame's Protocol Control Information could not be decoded.
    #[error("malformed PCI: {0}")]
    MalformedPci(&'static str),

    /// The sender received more consecutive `FC(Wait)` frames than
    /// `n_wftmax` allows.
    #[error("exceeded the maximum number of consecutive wait flow controls")]
    WaitLimitExceeded,

    /// An SDU is too large to ever be encoded, even with segmentation
    /// (exceeds the First Frame escape form's 32-bit length field, or the
    /// Single Frame FD long form when segmentation is not warranted).
    #[error("payload of `{len}` bytes exceeds the maximum of `{max}` bytes")]
    PayloadTooLarge { len: usize, max: usize },

    /// A bus error surfaced outside of a named deadline (e.g. while idly
    /// polling for the start of an inbound transfer).
    #[error(transparent)]
    Bus(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Result type for ISO-TP library.
pub type Result<T> = std::result::Result<T, Error>;
