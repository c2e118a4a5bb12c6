//! The Session Facade (spec §4.5): the only public entry point most callers
//! need. Owns the bus handle, the arbitration ID, and the [`Config`]; drives
//! the sender and receiver state machines' actions against the bus.

use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::frame::{self, ParsedFrame, RawFrame};
use crate::receiver::{ReceiverAction, ReceiverMachine};
use crate::sender::{SenderAction, SenderMachine};

/// A single frame as read off the bus.
#[derive(Debug, Clone)]
pub struct BusFrame {
    pub arbitration_id: u16,
    pub payload: RawFrame,
    pub is_fd: bool,
}

/// The external frame transport this crate consumes but does not implement
/// (spec §1's "out of scope" bus driver). `send`/`recv` each carry their own
/// deadline; exceeding it is the implementor's responsibility to surface as
/// an error.
pub trait Bus {
    type Error: std::error::Error + Send + Sync + 'static;

    fn send(&mut self, arbitration_id: u16, payload: &[u8], is_fd: bool, deadline: Duration) -> std::result::Result<(), Self::Error>;

    fn recv(&mut self, deadline: Duration) -> std::result::Result<Option<BusFrame>, Self::Error>;
}

/// Owns one half-duplex exchange over a single arbitration ID.
///
/// Not thread-safe across simultaneous transfers on the same ID — the
/// underlying link is half-duplex for that ID (spec §4.5/§5).
pub struct Session<B: Bus> {
    bus: B,
    arbitration_id: u16,
    config: Config,
}

impl<B: Bus> Session<B> {
    pub fn new(bus: B, arbitration_id: u16, config: Config) -> Self {
        Self { bus, arbitration_id, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Send one SDU, blocking until it is fully delivered or the transfer
    /// fails.
    pub fn send(&mut self, sdu: &[u8]) -> Result<()> {
        let mut machine = SenderMachine::new(&self.config);
        let mut action = machine.start(sdu)?;
        loop {
            action = match action {
                SenderAction::Send { frame, deadline } => {
                    tracing::debug!(arbitration_id = self.arbitration_id, len = frame.len(), "sending frame");
                    self.bus
                        .send(self.arbitration_id, frame.as_slice(), self.config.is_fd, deadline)
                        .map_err(|e| Error::NAsTimeout(Box::new(e)))?;
                    machine.on_frame_sent()
                }
                SenderAction::AwaitFlowControl { deadline } => self.await_flow_control(&mut machine, deadline)?,
                SenderAction::Delay { duration } => {
                    tracing::debug!(?duration, "inter-frame delay");
                    std::thread::sleep(duration);
                    machine.on_delay_elapsed()
                }
                SenderAction::Done => {
                    tracing::debug!(arbitration_id = self.arbitration_id, "send complete");
                    return Ok(());
                }
                SenderAction::Fail(e) => {
                    tracing::error!(arbitration_id = self.arbitration_id, error = %e, "send failed");
                    return Err(e);
                }
            };
        }
    }

    fn await_flow_control(&mut self, machine: &mut SenderMachine, deadline: Duration) -> Result<SenderAction> {
        let until = crate::timing::Deadline::after(deadline);
        loop {
            let remaining = until.remaining();
            if until.has_expired() {
                return Ok(machine.on_wait_timeout());
            }
            match self.bus.recv(remaining).map_err(|e| Error::Bus(Box::new(e)))? {
                Some(bus_frame) if bus_frame.arbitration_id == self.arbitration_id => {
                    match frame::decode(bus_frame.payload.as_slice(), self.config.is_fd)? {
                        ParsedFrame::FlowControl { fs, bs, st_min } => {
                            return Ok(machine.on_flow_control(fs, bs, st_min));
                        }
                        _ => {
                            tracing::warn!("ignoring non-flow-control frame while awaiting one");
                            continue;
                        }
                    }
                }
                _ => continue,
            }
        }
    }

    /// Poll for the next frame on this session's arbitration ID, ignoring
    /// frames addressed elsewhere without resetting `deadline`'s clock.
    fn wait_for_frame(&mut self, machine: &mut ReceiverMachine, deadline: Duration) -> Result<ReceiverAction> {
        if deadline == Duration::MAX {
            loop {
                match self.bus.recv(deadline).map_err(|e| Error::Bus(Box::new(e)))? {
                    Some(bus_frame) if bus_frame.arbitration_id == self.arbitration_id => {
                        return Ok(machine.on_frame(frame::decode(bus_frame.payload.as_slice(), self.config.is_fd)?));
                    }
                    _ => continue,
                }
            }
        }
        let until = crate::timing::Deadline::after(deadline);
        loop {
            let remaining = until.remaining();
            if until.has_expired() {
                return Ok(machine.on_timeout());
            }
            match self.bus.recv(remaining).map_err(|e| Error::Bus(Box::new(e)))? {
                Some(bus_frame) if bus_frame.arbitration_id == self.arbitration_id => {
                    return Ok(machine.on_frame(frame::decode(bus_frame.payload.as_slice(), self.config.is_fd)?));
                }
                _ => continue,
            }
        }
    }

    /// Receive one SDU, blocking until it is fully reassembled or the
    /// transfer fails.
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        let mut machine = ReceiverMachine::new(&self.config);
        let mut action = ReceiverAction::WaitFrame { deadline: Duration::MAX };
        loop {
            action = match action {
                ReceiverAction::WaitFrame { deadline } => self.wait_for_frame(&mut machine, deadline)?,
                ReceiverAction::SendFc { frame, deadline } => {
                    tracing::debug!(arbitration_id = self.arbitration_id, "sending flow control");
                    self.bus
                        .send(self.arbitration_id, frame.as_slice(), self.config.is_fd, deadline)
                        .map_err(|e| Error::NArTimeout(Box::new(e)))?;
                    machine.on_fc_sent()
                }
                ReceiverAction::SendFcThenFail { frame, deadline, error } => {
                    self.bus
                        .send(self.arbitration_id, frame.as_slice(), self.config.is_fd, deadline)
                        .map_err(|e| Error::NArTimeout(Box::new(e)))?;
                    tracing::error!(error = %error, "receive failed");
                    return Err(error);
                }
                ReceiverAction::Deliver(sdu) => {
                    tracing::debug!(arbitration_id = self.arbitration_id, len = sdu.len(), "receive complete");
                    return Ok(sdu);
                }
                ReceiverAction::Fail(e) => {
                    tracing::error!(arbitration_id = self.arbitration_id, error = %e, "receive failed");
                    return Err(e);
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};

    /// An in-memory loopback bus for exercising `Session` end-to-end
    /// without a real CAN adapter. Test-only infrastructure, not a shipped
    /// virtual-bus simulator (spec §1 keeps those out of scope).
    pub struct ChannelBus {
        tx: Sender<BusFrame>,
        rx: Receiver<BusFrame>,
    }

    impl ChannelBus {
        pub fn pair() -> (ChannelBus, ChannelBus) {
            let (tx_a, rx_a) = std::sync::mpsc::channel();
            let (tx_b, rx_b) = std::sync::mpsc::channel();
            (
                ChannelBus { tx: tx_a, rx: rx_b },
                ChannelBus { tx: tx_b, rx: rx_a },
            )
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("loopback bus channel closed")]
    pub struct ChannelBusError;

    impl Bus for ChannelBus {
        type Error = ChannelBusError;

        fn send(&mut self, arbitration_id: u16, payload: &[u8], is_fd: bool, _deadline: Duration) -> std::result::Result<(), Self::Error> {
            let raw = RawFrame::from_bytes(payload);
            self.tx
                .send(BusFrame { arbitration_id, payload: raw, is_fd })
                .map_err(|_| ChannelBusError)
        }

        fn recv(&mut self, deadline: Duration) -> std::result::Result<Option<BusFrame>, Self::Error> {
            if deadline == Duration::MAX {
                return match self.rx.recv() {
                    Ok(frame) => Ok(Some(frame)),
                    Err(_) => Err(ChannelBusError),
                };
            }
            match self.rx.recv_timeout(deadline) {
                Ok(frame) => Ok(Some(frame)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(ChannelBusError),
            }
        }
    }

    /// Installs a `tracing` subscriber driven by `RUST_LOG`, so running
    /// these tests with `RUST_LOG=iso_tp=debug cargo test -- --nocapture`
    /// surfaces every frame and state transition. Safe to call from every
    /// test; only the first call takes effect.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn sf_round_trip_over_loopback() {
        init_tracing();
        let (bus_a, bus_b) = ChannelBus::pair();
        let mut sender = Session::new(bus_a, 0x123, Config::default());
        let mut receiver = Session::new(bus_b, 0x123, Config::default());

        let handle = std::thread::spawn(move || receiver.receive());
        sender.send(b"HI").unwrap();
        let received = handle.join().unwrap().unwrap();
        assert_eq!(received, b"HI");
    }

    #[test]
    fn segmented_round_trip_over_loopback() {
        init_tracing();
        let (bus_a, bus_b) = ChannelBus::pair();
        let mut sender = Session::new(bus_a, 0x123, Config::default());
        let mut receiver = Session::new(bus_b, 0x123, Config::default());

        let sdu: Vec<u8> = (0..200u8).cycle().take(300).collect();
        let expected = sdu.clone();
        let handle = std::thread::spawn(move || receiver.receive());
        sender.send(&sdu).unwrap();
        let received = handle.join().unwrap().unwrap();
        assert_eq!(received, expected);
    }

    #[test]
    fn small_block_size_forces_multiple_flow_control_rounds_over_loopback() {
        init_tracing();
        let (bus_a, bus_b) = ChannelBus::pair();
        let mut sender_cfg = Config::default();
        sender_cfg.block_size = 15; // only the receiver's advertised BS matters
        let mut receiver_cfg = Config::default();
        receiver_cfg.block_size = 2; // force a Flow Control every 2 CFs
        let mut sender = Session::new(bus_a, 0x321, sender_cfg);
        let mut receiver = Session::new(bus_b, 0x321, receiver_cfg);

        let sdu: Vec<u8> = (0..50u8).collect();
        let expected = sdu.clone();
        let handle = std::thread::spawn(move || receiver.receive());
        sender.send(&sdu).unwrap();
        let received = handle.join().unwrap().unwrap();
        assert_eq!(received, expected);
    }

    #[test]
    fn fd_segmented_round_trip_over_loopback() {
        init_tracing();
        let (bus_a, bus_b) = ChannelBus::pair();
        let mut config = Config::default();
        config.is_fd = true;
        config.padding = true;
        let mut sender = Session::new(bus_a, 0x456, config.clone());
        let mut receiver = Session::new(bus_b, 0x456, config);

        let sdu: Vec<u8> = (0..120u8).cycle().take(150).collect();
        let expected = sdu.clone();
        let handle = std::thread::spawn(move || receiver.receive());
        sender.send(&sdu).unwrap();
        let received = handle.join().unwrap().unwrap();
        assert_eq!(received, expected);
    }

    #[test]
    fn local_overflow_emits_fc_overflow_and_fails_receiver() {
        init_tracing();
        let (bus_a, bus_b) = ChannelBus::pair();
        let sender_cfg = Config::default();
        let mut receiver_cfg = Config::default();
        receiver_cfg.max_buffer = 32;
        let mut sender = Session::new(bus_a, 0x789, sender_cfg);
        let mut receiver = Session::new(bus_b, 0x789, receiver_cfg);

        let sdu = vec![0u8; 100];
        let handle = std::thread::spawn(move || receiver.receive());
        // The sender doesn't know about the receiver's buffer cap; its own
        // send proceeds (and will itself eventually time out waiting for a
        // Flow Control that never clears it), so only assert on the
        // receiver side here.
        let _ = std::thread::spawn(move || sender.send(&sdu));
        match handle.join().unwrap() {
            Err(Error::LocalOverflow { len: 100, max: 32 }) => {}
            other => panic!("expected LocalOverflow, got {other:?}"),
        }
    }

    #[test]
    fn n_bs_timeout_when_no_flow_control_arrives() {
        init_tracing();
        let (bus_a, _bus_b) = ChannelBus::pair();
        let mut config = Config::default();
        config.n_bs = Duration::from_millis(20);
        let mut sender = Session::new(bus_a, 0x123, config);
        let sdu = vec![0u8; 20];
        match sender.send(&sdu) {
            Err(Error::NBsTimeout) => {}
            other => panic!("expected NBsTimeout, got {other:?}"),
        }
    }
}
