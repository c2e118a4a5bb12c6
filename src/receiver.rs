//! Receiver state machine (spec §4.4).
//!
//! Mirrors [`crate::sender::SenderMachine`]'s pure `step`-style shape: no
//! bus, no clock, just frames and timeouts in, [`ReceiverAction`]s out.

use std::time::Duration;

use crate::config::Config;
use crate::error::Error;
use crate::frame::{self, FlowStatus, ParsedFrame, RawFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiverState {
    Idle,
    PendingFc,
    AwaitingCf,
    Done,
    Failed,
}

/// The one thing the driver must do before calling back into the machine.
#[derive(Debug)]
pub enum ReceiverAction {
    /// Wait up to `deadline` for the next frame on the session's
    /// arbitration ID, then call [`ReceiverMachine::on_frame`] or, on
    /// expiry, [`ReceiverMachine::on_timeout`].
    WaitFrame { deadline: Duration },
    /// Send `frame` (a Flow Control) with deadline `deadline`, then call
    /// [`ReceiverMachine::on_fc_sent`].
    SendFc { frame: RawFrame, deadline: Duration },
    /// Send `frame` (an `FC(Overflow)`), then fail with `error` without
    /// waiting for anything further.
    SendFcThenFail { frame: RawFrame, deadline: Duration, error: Error },
    /// The reassembled (or single-frame) SDU is ready.
    Deliver(Vec<u8>),
    /// The transfer failed.
    Fail(Error),
}

/// Reassembles one inbound transfer.
pub struct ReceiverMachine {
    padding: bool,
    bs_cfg: u8,
    st_min_cfg: u8,
    n_ar: Duration,
    n_cr: Duration,
    max_buffer: u32,
    wait_watermark: u32,
    n_wftmax: u32,
    state: ReceiverState,
    buffer: Vec<u8>,
    expected: u32,
    sn_expected: u8,
    frames_in_block: u32,
    waits_remaining: u32,
    just_sent_continue: bool,
}

impl ReceiverMachine {
    pub fn new(config: &Config) -> Self {
        Self {
            padding: config.padding,
            bs_cfg: config.block_size,
            st_min_cfg: frame::encode_st_min(config.st_min),
            n_ar: config.n_ar,
            n_cr: config.n_cr,
            max_buffer: config.max_buffer,
            wait_watermark: config.wait_watermark,
            n_wftmax: config.n_wftmax,
            state: ReceiverState::Idle,
            buffer: Vec::new(),
            expected: 0,
            sn_expected: 1,
            frames_in_block: 0,
            waits_remaining: 0,
            just_sent_continue: false,
        }
    }

    /// Handle a frame decoded off the bus.
    pub fn on_frame(&mut self, parsed: ParsedFrame) -> ReceiverAction {
        match self.state {
            ReceiverState::Idle => self.on_frame_idle(parsed),
            ReceiverState::AwaitingCf => self.on_frame_awaiting_cf(parsed),
            _ => ReceiverAction::Fail(Error::UnexpectedFrame),
        }
    }

    fn on_frame_idle(&mut self, parsed: ParsedFrame) -> ReceiverAction {
        match parsed {
            ParsedFrame::Single { sdu } => {
                if sdu.len() as u32 >= self.max_buffer {
                    self.state = ReceiverState::Failed;
                    return self.overflow_action(sdu.len() as u32);
                }
                self.state = ReceiverState::Done;
                ReceiverAction::Deliver(sdu)
            }
            ParsedFrame::First { ff_dl, mut initial_chunk } => {
                if ff_dl >= self.max_buffer {
                    self.state = ReceiverState::Failed;
                    return self.overflow_action(ff_dl);
                }
                if initial_chunk.len() as u32 > ff_dl {
                    initial_chunk.truncate(ff_dl as usize);
                }
                self.buffer = initial_chunk;
                self.expected = ff_dl;
                self.sn_expected = 1;
                self.frames_in_block = 0;
                self.begin_pending_fc()
            }
            ParsedFrame::Consecutive { .. } | ParsedFrame::FlowControl { .. } => {
                tracing::warn!("ignoring unsolicited frame while idle");
                ReceiverAction::WaitFrame { deadline: Duration::MAX }
            }
        }
    }

    fn on_frame_awaiting_cf(&mut self, parsed: ParsedFrame) -> ReceiverAction {
        match parsed {
            ParsedFrame::Consecutive { sn, chunk } => self.on_cf(sn, chunk),
            _ => {
                self.state = ReceiverState::Failed;
                ReceiverAction::Fail(Error::UnexpectedFrame)
            }
        }
    }

    fn on_cf(&mut self, sn: u8, chunk: Vec<u8>) -> ReceiverAction {
        if sn != self.sn_expected {
            self.state = ReceiverState::Failed;
            return ReceiverAction::Fail(Error::WrongSequenceNumber {
                expected: self.sn_expected,
                actual: sn,
            });
        }
        let remaining = (self.expected as usize).saturating_sub(self.buffer.len());
        let take = chunk.len().min(remaining);
        self.buffer.extend_from_slice(&chunk[..take]);
        self.sn_expected = (self.sn_expected + 1) & 0x0F;
        self.frames_in_block += 1;

        if self.buffer.len() as u32 >= self.expected {
            self.state = ReceiverState::Done;
            return ReceiverAction::Deliver(std::mem::take(&mut self.buffer));
        }
        if self.bs_cfg != 0 && self.frames_in_block == self.bs_cfg as u32 {
            self.begin_pending_fc()
        } else {
            ReceiverAction::WaitFrame { deadline: self.n_cr }
        }
    }

    /// Enter `PendingFc`, deciding whether a flood of `FC(Wait)` precedes
    /// the `FC(Continue)` that actually clears the peer.
    fn begin_pending_fc(&mut self) -> ReceiverAction {
        self.state = ReceiverState::PendingFc;
        if self.buffer.len() as u32 >= self.wait_watermark {
            self.waits_remaining = self.n_wftmax;
            self.wait_watermark = self.wait_watermark.saturating_mul(2);
        } else {
            self.waits_remaining = 0;
        }
        self.next_fc_action()
    }

    fn next_fc_action(&mut self) -> ReceiverAction {
        let (fs, frame_deadline) = if self.waits_remaining > 0 {
            self.waits_remaining -= 1;
            self.just_sent_continue = false;
            (FlowStatus::Wait, self.n_ar)
        } else {
            self.just_sent_continue = true;
            (FlowStatus::Continue, self.n_ar)
        };
        let raw = frame::encode_flow_control(fs, self.bs_cfg, self.st_min_cfg);
        let raw = frame::apply_padding(&raw, self.padding);
        ReceiverAction::SendFc { frame: raw, deadline: frame_deadline }
    }

    /// A Flow Control the machine asked to send made it onto the bus.
    pub fn on_fc_sent(&mut self) -> ReceiverAction {
        if self.state != ReceiverState::PendingFc {
            return ReceiverAction::Fail(Error::UnexpectedFrame);
        }
        if self.just_sent_continue {
            self.state = ReceiverState::AwaitingCf;
            self.frames_in_block = 0;
            ReceiverAction::WaitFrame { deadline: self.n_cr }
        } else {
            self.next_fc_action()
        }
    }

    /// The deadline armed by the last `WaitFrame` action expired.
    pub fn on_timeout(&mut self) -> ReceiverAction {
        match self.state {
            ReceiverState::PendingFc => {
                self.state = ReceiverState::Failed;
                ReceiverAction::Fail(Error::NBrTimeout)
            }
            ReceiverState::AwaitingCf => {
                self.state = ReceiverState::Failed;
                ReceiverAction::Fail(Error::NCrTimeout)
            }
            _ => ReceiverAction::Fail(Error::UnexpectedFrame),
        }
    }

    fn overflow_action(&mut self, len: u32) -> ReceiverAction {
        let raw = frame::encode_flow_control(FlowStatus::Overflow, self.bs_cfg, self.st_min_cfg);
        let raw = frame::apply_padding(&raw, self.padding);
        ReceiverAction::SendFcThenFail {
            frame: raw,
            deadline: self.n_ar,
            error: Error::LocalOverflow { len, max: self.max_buffer },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_delivers_immediately() {
        let config = Config::default();
        let mut m = ReceiverMachine::new(&config);
        match m.on_frame(ParsedFrame::Single { sdu: vec![0x48, 0x49] }) {
            ReceiverAction::Deliver(sdu) => assert_eq!(sdu, vec![0x48, 0x49]),
            other => panic!("expected Deliver, got {other:?}"),
        }
    }

    #[test]
    fn segmented_transfer_reassembles_in_order() {
        let config = Config::default();
        let mut m = ReceiverMachine::new(&config);
        let action = m.on_frame(ParsedFrame::First {
            ff_dl: 20,
            initial_chunk: (0..6u8).collect(),
        });
        match action {
            ReceiverAction::SendFc { frame, .. } => {
                assert_eq!(frame.as_slice(), &[0x30, 0x0F, 0x0A, 0xFF, 0xFF, 0xFF]);
            }
            other => panic!("expected SendFc, got {other:?}"),
        }
        match m.on_fc_sent() {
            ReceiverAction::WaitFrame { .. } => {}
            other => panic!("expected WaitFrame, got {other:?}"),
        }
        m.on_frame(ParsedFrame::Consecutive { sn: 1, chunk: (6..13u8).collect() });
        match m.on_frame(ParsedFrame::Consecutive { sn: 2, chunk: (13..20u8).collect() }) {
            ReceiverAction::Deliver(sdu) => assert_eq!(sdu, (0..20u8).collect::<Vec<_>>()),
            other => panic!("expected Deliver, got {other:?}"),
        }
    }

    #[test]
    fn wrong_sequence_number_fails() {
        let config = Config::default();
        let mut m = ReceiverMachine::new(&config);
        m.on_frame(ParsedFrame::First { ff_dl: 20, initial_chunk: (0..6u8).collect() });
        m.on_fc_sent();
        match m.on_frame(ParsedFrame::Consecutive { sn: 5, chunk: vec![0; 7] }) {
            ReceiverAction::Fail(Error::WrongSequenceNumber { expected: 1, actual: 5 }) => {}
            other => panic!("expected WrongSequenceNumber, got {other:?}"),
        }
    }

    #[test]
    fn overflow_emits_fc_and_fails() {
        let mut config = Config::default();
        config.max_buffer = 32;
        let mut m = ReceiverMachine::new(&config);
        match m.on_frame(ParsedFrame::First { ff_dl: 100, initial_chunk: vec![] }) {
            ReceiverAction::SendFcThenFail { frame, error: Error::LocalOverflow { len: 100, max: 32 }, .. } => {
                assert_eq!(frame.as_slice()[0] & 0x0F, u8::from(FlowStatus::Overflow));
            }
            other => panic!("expected SendFcThenFail/LocalOverflow, got {other:?}"),
        }
    }

    #[test]
    fn block_size_boundary_rearms_flow_control() {
        let mut config = Config::default();
        config.block_size = 1;
        let mut m = ReceiverMachine::new(&config);
        m.on_frame(ParsedFrame::First { ff_dl: 20, initial_chunk: (0..6u8).collect() });
        m.on_fc_sent();
        // BS = 1: a single CF must trigger another Flow Control round.
        match m.on_frame(ParsedFrame::Consecutive { sn: 1, chunk: (6..13u8).collect() }) {
            ReceiverAction::SendFc { .. } => {}
            other => panic!("expected SendFc at BS boundary, got {other:?}"),
        }
    }

    #[test]
    fn wait_watermark_precedes_continue() {
        let mut config = Config::default();
        config.wait_watermark = 1;
        config.n_wftmax = 2;
        let mut m = ReceiverMachine::new(&config);
        // First Frame alone already crosses the watermark of 1 byte.
        let action = m.on_frame(ParsedFrame::First { ff_dl: 20, initial_chunk: (0..6u8).collect() });
        match action {
            ReceiverAction::SendFc { frame, .. } => {
                assert_eq!(frame.as_slice()[0] & 0x0F, u8::from(FlowStatus::Wait));
            }
            other => panic!("expected Wait FC first, got {other:?}"),
        }
        let action = m.on_fc_sent();
        match action {
            ReceiverAction::SendFc { frame, .. } => {
                assert_eq!(frame.as_slice()[0] & 0x0F, u8::from(FlowStatus::Wait));
            }
            other => panic!("expected second Wait FC, got {other:?}"),
        }
        let action = m.on_fc_sent();
        match action {
            ReceiverAction::SendFc { frame, .. } => {
                assert_eq!(frame.as_slice()[0] & 0x0F, u8::from(FlowStatus::Continue));
            }
            other => panic!("expected Continue FC after waits, got {other:?}"),
        }
    }
}
