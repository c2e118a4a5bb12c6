//! Sender state machine (spec §4.3).
//!
//! Per spec §9's redesign note, the machine is a pure `step`-style object:
//! it never touches the bus or a clock. It hands the driver in
//! [`crate::Session::send`] a [`SenderAction`] describing the one thing to
//! do next (emit a frame, wait for a Flow Control, sleep `STmin`, or stop),
//! and the driver feeds the outcome back through `on_*`. This lets tests
//! drive the whole handshake — including Wait floods and the block-size
//! boundary — without a bus.

use std::time::Duration;

use crate::config::Config;
use crate::error::Error;
use crate::frame::{self, FlowStatus, RawFrame};

/// States from spec §4.3, split at each suspension point so the driver
/// knows exactly what confirmation it owes the machine next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenderState {
    SendingSf,
    SendingFf,
    AwaitingFc,
    SendingCf,
    InterFrameDelay,
    Done,
    Failed,
}

/// The one thing the driver must do before calling back into the machine.
#[derive(Debug)]
pub enum SenderAction {
    /// Hand `frame` to the bus with deadline `deadline`, then call
    /// [`SenderMachine::on_frame_sent`].
    Send { frame: RawFrame, deadline: Duration },
    /// Wait up to `deadline` for a Flow Control on the session's
    /// arbitration ID, then call [`SenderMachine::on_flow_control`] or, on
    /// expiry, [`SenderMachine::on_wait_timeout`].
    AwaitFlowControl { deadline: Duration },
    /// Sleep `duration` (the advertised `STmin`), then call
    /// [`SenderMachine::on_delay_elapsed`].
    Delay { duration: Duration },
    /// The transfer completed successfully.
    Done,
    /// The transfer failed; no further frames are sent.
    Fail(Error),
}

/// Drives one SDU's worth of sending.
pub struct SenderMachine {
    is_fd: bool,
    padding: bool,
    n_as: Duration,
    n_bs: Duration,
    n_wftmax: u32,
    state: SenderState,
    remaining: Vec<u8>,
    sn: u8,
    block_size: u8,
    st_min: Duration,
    frames_in_block: u32,
    wait_count: u32,
}

impl SenderMachine {
    pub fn new(config: &Config) -> Self {
        Self {
            is_fd: config.is_fd,
            padding: config.padding,
            n_as: config.n_as,
            n_bs: config.n_bs,
            n_wftmax: config.n_wftmax,
            state: SenderState::SendingSf,
            remaining: Vec::new(),
            sn: 1,
            block_size: 0,
            st_min: Duration::ZERO,
            frames_in_block: 0,
            wait_count: 0,
        }
    }

    /// Begin sending `sdu`. Returns the first action the driver must take.
    pub fn start(&mut self, sdu: &[u8]) -> Result<SenderAction, Error> {
        let sf_max = if self.is_fd {
            frame::SF_FD_LONG_MAX
        } else {
            frame::SF_SHORT_MAX
        };
        if sdu.len() <= sf_max {
            let raw = frame::encode_single(sdu, self.is_fd)?;
            let raw = frame::apply_padding(&raw, self.padding);
            self.state = SenderState::SendingSf;
            Ok(SenderAction::Send {
                frame: raw,
                deadline: self.n_as,
            })
        } else {
            let ff_dl = sdu.len() as u32;
            let (raw, consumed) = frame::encode_first(sdu, ff_dl, self.is_fd)?;
            let raw = frame::apply_padding(&raw, self.padding);
            self.remaining = sdu[consumed..].to_vec();
            self.sn = 1;
            self.state = SenderState::SendingFf;
            Ok(SenderAction::Send {
                frame: raw,
                deadline: self.n_as,
            })
        }
    }

    /// The previously-returned `Send` frame made it onto the bus.
    pub fn on_frame_sent(&mut self) -> SenderAction {
        match self.state {
            SenderState::SendingSf => {
                self.state = SenderState::Done;
                SenderAction::Done
            }
            SenderState::SendingFf => {
                self.state = SenderState::AwaitingFc;
                self.wait_count = 0;
                SenderAction::AwaitFlowControl { deadline: self.n_bs }
            }
            SenderState::SendingCf => {
                if self.remaining.is_empty() {
                    self.state = SenderState::Done;
                    SenderAction::Done
                } else if self.block_size != 0 && self.frames_in_block == self.block_size as u32 {
                    self.state = SenderState::AwaitingFc;
                    self.wait_count = 0;
                    SenderAction::AwaitFlowControl { deadline: self.n_bs }
                } else {
                    self.state = SenderState::InterFrameDelay;
                    SenderAction::Delay { duration: self.st_min }
                }
            }
            _ => SenderAction::Fail(Error::UnexpectedFrame),
        }
    }

    /// A Flow Control arrived while `AwaitFlowControl` was outstanding.
    pub fn on_flow_control(&mut self, fs: FlowStatus, bs: u8, st_min_raw: u8) -> SenderAction {
        if self.state != SenderState::AwaitingFc {
            return SenderAction::Fail(Error::UnexpectedFrame);
        }
        match fs {
            FlowStatus::Overflow => {
                self.state = SenderState::Failed;
                SenderAction::Fail(Error::PeerOverflow)
            }
            FlowStatus::Wait => {
                self.wait_count += 1;
                if self.wait_count > self.n_wftmax {
                    self.state = SenderState::Failed;
                    return SenderAction::Fail(Error::WaitLimitExceeded);
                }
                SenderAction::AwaitFlowControl { deadline: self.n_bs }
            }
            FlowStatus::Continue => {
                self.block_size = bs;
                self.st_min = frame::decode_st_min(st_min_raw);
                self.frames_in_block = 0;
                self.emit_next_cf()
            }
        }
    }

    /// `N_Bs` expired while waiting for a Flow Control.
    pub fn on_wait_timeout(&mut self) -> SenderAction {
        self.state = SenderState::Failed;
        SenderAction::Fail(Error::NBsTimeout)
    }

    /// The `STmin` inter-frame delay elapsed.
    pub fn on_delay_elapsed(&mut self) -> SenderAction {
        if self.state != SenderState::InterFrameDelay {
            return SenderAction::Fail(Error::UnexpectedFrame);
        }
        self.emit_next_cf()
    }

    fn emit_next_cf(&mut self) -> SenderAction {
        let max_cf = if self.is_fd { frame::CF_CHUNK_FD } else { frame::CF_CHUNK_CLASSIC };
        let take = max_cf.min(self.remaining.len());
        let chunk: Vec<u8> = self.remaining.drain(..take).collect();
        let raw = frame::encode_consecutive(&chunk, self.sn, self.is_fd);
        let raw = frame::apply_padding(&raw, self.padding);
        self.sn = (self.sn + 1) & 0x0F;
        self.frames_in_block += 1;
        self.state = SenderState::SendingCf;
        SenderAction::Send {
            frame: raw,
            deadline: self.n_as,
        }
    }
}
