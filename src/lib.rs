//! ISO 15765-2 ("ISO-TP") transport-layer protocol engine.
//!
//! Segments an arbitrary-length service data unit (SDU) into a preamble
//! frame plus a sequence of continuation frames over a datagram link whose
//! frames carry at most 8 bytes (classic) or 64 bytes (flexible data-rate),
//! and reassembles them on the peer while honoring a receiver-driven
//! flow-control handshake.
//!
//! The underlying frame transport (a bus that sends and receives single
//! frames identified by an arbitration ID) is external; implement the
//! [`Bus`] trait against your adapter and hand it to [`Session::new`].

/* ========== Exports ========== */
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::frame::{FlowStatus, ParsedFrame, RawFrame};
pub use crate::session::{Bus, BusFrame, Session};

/* ========== Modules ========== */
pub mod config;
pub mod error;
pub mod frame;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod timing;
