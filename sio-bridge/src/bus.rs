//! Host-facing bus state machine.
//!
//! The bus master drives this with `command_line`, `put_byte` and
//! `get_byte`. Every transaction ends with exactly one status byte
//! (`'C'`, `'E'` or `'N'`) and returns to `Idle`:
//!
//! ```text
//! read:   frame -> 'A' data.. chk 'C'
//! write:  frame -> 'A' <- data.. chk -> 'A' 'C'
//! status: frame -> 'A' 'C'            (peer answered without data)
//! nak:    frame -> 'N'
//! ```

use std::time::{Duration, Instant};

use sio_wire::{Message, Transport};
use tracing::{debug, trace, warn};

use crate::bridge::Bridge;
use crate::clock::Clock;
use crate::command::{checksum, command, CommandFrame, Direction, FRAME_LEN};
use crate::error::{BusError, RelayError, StorageError};
use crate::relay::{AckStatus, RelayOutcome};
use crate::router::{route, Route};
use crate::storage::LocalStorage;

pub const ACK: u8 = b'A';
pub const NAK: u8 = b'N';
pub const COMPLETE: u8 = b'C';
pub const ERROR: u8 = b'E';

const MIN_POLL_INTERVAL: Duration = Duration::from_micros(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    CommandFrame,
    WaitAck,
    DataToRemote,
    DataToBus,
    Completion,
    Error,
}

/// What the bus master can expect after a `tick`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No transaction running
    Idle,
    /// Transaction running, nothing to read yet
    Waiting,
    /// `get_byte` has a byte
    Ready,
}

#[derive(Debug, Clone, Copy)]
enum WriteTarget {
    Relay(CommandFrame),
    Local { unit: u8, sector: u16 },
}

pub struct Bus<T: Transport, S: LocalStorage, C: Clock> {
    bridge: Bridge<T>,
    storage: S,
    clock: C,
    phase: Phase,
    frame: [u8; FRAME_LEN],
    frame_len: usize,
    /// Status byte owed to the bus before anything else
    lead: Option<u8>,
    response: Vec<u8>,
    read_pos: usize,
    outbound: Vec<u8>,
    expected_out: usize,
    write_target: Option<WriteTarget>,
    waiting_sync: Option<u8>,
    last_error: Option<BusError>,
}

impl<T: Transport, S: LocalStorage, C: Clock> Bus<T, S, C> {
    pub fn new(bridge: Bridge<T>, storage: S, clock: C) -> Self {
        Bus {
            bridge,
            storage,
            clock,
            phase: Phase::Idle,
            frame: [0; FRAME_LEN],
            frame_len: 0,
            lead: None,
            response: Vec::new(),
            read_pos: 0,
            outbound: Vec::new(),
            expected_out: 0,
            write_target: None,
            waiting_sync: None,
            last_error: None,
        }
    }

    /// Command line asserted (start of a frame) or released.
    pub fn command_line(&mut self, asserted: bool) {
        if asserted {
            if self.phase == Phase::WaitAck {
                if let Some(pending) = self.bridge.abandon() {
                    debug!("bus: new command frame, dropping sync {}", pending.sync);
                }
            }
            self.reset_transfer();
            self.phase = Phase::CommandFrame;
        } else if self.phase == Phase::CommandFrame {
            debug!("bus: command line released after {} bytes", self.frame_len);
            self.phase = Phase::Idle;
        }
    }

    pub fn put_byte(&mut self, byte: u8) {
        match self.phase {
            Phase::CommandFrame => {
                self.frame[self.frame_len] = byte;
                self.frame_len += 1;
                if self.frame_len == FRAME_LEN {
                    self.process_frame();
                }
            }
            Phase::DataToRemote => {
                self.outbound.push(byte);
                if self.outbound.len() == self.expected_out + 1 {
                    self.finish_outbound();
                }
            }
            phase => trace!("bus: ignoring {:02X} in {:?}", byte, phase),
        }
    }

    /// Next byte for the bus master. Blocks (bounded) while the peer is
    /// working on a transaction.
    pub fn get_byte(&mut self) -> Option<u8> {
        if let Some(byte) = self.lead.take() {
            return Some(byte);
        }
        match self.phase {
            Phase::WaitAck => {
                self.wait_for_peer();
                self.lead.take()
            }
            Phase::DataToBus => {
                let byte = self.response.get(self.read_pos).copied();
                self.read_pos += 1;
                if self.read_pos >= self.response.len() {
                    self.phase = Phase::Completion;
                }
                byte
            }
            Phase::Completion => {
                self.phase = Phase::Idle;
                Some(COMPLETE)
            }
            Phase::Error => {
                self.phase = Phase::Idle;
                Some(ERROR)
            }
            _ => None,
        }
    }

    /// Make progress without blocking.
    pub fn tick(&mut self) -> Tick {
        let now = self.clock.now();
        if self.phase == Phase::WaitAck {
            self.advance_wait(now);
        } else {
            self.bridge.pump(now);
        }

        if self.lead.is_some()
            || matches!(
                self.phase,
                Phase::DataToBus | Phase::Completion | Phase::Error
            )
        {
            Tick::Ready
        } else if self.phase == Phase::Idle {
            Tick::Idle
        } else {
            Tick::Waiting
        }
    }

    pub fn set_motor(&mut self, on: bool) {
        let msg = if on {
            Message::MotorOn
        } else {
            Message::MotorOff
        };
        self.notify(msg);
    }

    pub fn set_speed(&mut self, baud: u32) {
        self.notify(Message::SpeedChange { baud });
    }

    pub fn warm_reset(&mut self) {
        self.notify(Message::WarmReset);
    }

    pub fn cold_reset(&mut self) {
        self.notify(Message::ColdReset);
    }

    fn notify(&mut self, msg: Message) {
        let now = self.clock.now();
        if self.bridge.notify(&msg, now).is_err() {
            debug!("bus: {} not delivered", msg.name());
        }
    }

    fn reset_transfer(&mut self) {
        self.frame_len = 0;
        self.lead = None;
        self.response.clear();
        self.read_pos = 0;
        self.outbound.clear();
        self.expected_out = 0;
        self.write_target = None;
        self.waiting_sync = None;
    }

    fn process_frame(&mut self) {
        let now = self.clock.now();
        let frame = match CommandFrame::parse(&self.frame) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("bus: {}", e);
                self.fail(e);
                return;
            }
        };

        // Apply handshake traffic that arrived since the last transaction
        self.bridge.pump(now);

        let connected = self.bridge.session().is_connected();
        let storage = &self.storage;
        let target = route(
            frame.device,
            &self.bridge.config().router,
            connected,
            |unit| storage.has_unit(unit),
        );
        debug!(
            "bus: device {:02X} command {:02X} aux {:02X} {:02X} -> {:?}",
            frame.device, frame.command, frame.aux1, frame.aux2, target
        );

        match target {
            Route::Unhandled => self.nak(BusError::Unhandled(frame.device)),
            Route::LocalStorage(unit) => self.dispatch_local(unit, frame),
            Route::Relay => self.dispatch_relay(frame, now),
        }
    }

    fn dispatch_relay(&mut self, frame: CommandFrame, now: Instant) {
        let direction = Direction::of(frame.command, self.bridge.config().relay_sector_size);
        if let Direction::Write(len) = direction {
            // The burst waits for the data frame
            if !self.bridge.session().is_connected() {
                return self.nak(RelayError::NotConnected.into());
            }
            if self.bridge.relay().is_pending() {
                return self.nak(RelayError::Busy.into());
            }
            self.expect_outbound(len, WriteTarget::Relay(frame));
            return;
        }
        self.start_relay(frame, None, direction, now);
    }

    fn start_relay(
        &mut self,
        frame: CommandFrame,
        outbound: Option<Vec<u8>>,
        direction: Direction,
        now: Instant,
    ) {
        match self.bridge.begin(&frame, outbound, direction, now) {
            Ok(sync) => {
                self.waiting_sync = Some(sync);
                self.phase = Phase::WaitAck;
            }
            Err(e) => {
                debug!("bus: relay refused: {}", e);
                self.nak(e.into());
            }
        }
    }

    fn dispatch_local(&mut self, unit: u8, frame: CommandFrame) {
        let sector = frame.sector();
        match frame.command {
            command::STATUS => match self.storage.status(unit) {
                Ok(status) => self.load_response(status.to_vec()),
                Err(e) => self.local_error(e),
            },
            command::READ => match self.storage.read(unit, sector) {
                Ok(data) => self.load_response(data),
                Err(e) => self.local_error(e),
            },
            command::WRITE | command::PUT => {
                if self.storage.is_write_protected(unit) {
                    return self.nak(StorageError::WriteProtected(unit).into());
                }
                let len = self.storage.sector_size(unit, sector);
                self.expect_outbound(len, WriteTarget::Local { unit, sector });
            }
            other => self.nak(BusError::Unsupported {
                unit,
                command: other,
            }),
        }
    }

    fn expect_outbound(&mut self, len: usize, target: WriteTarget) {
        self.lead = Some(ACK);
        self.outbound.clear();
        self.expected_out = len;
        self.write_target = Some(target);
        self.phase = Phase::DataToRemote;
    }

    fn finish_outbound(&mut self) {
        let Some(chk) = self.outbound.pop() else {
            return;
        };
        let data = std::mem::take(&mut self.outbound);
        let target = self.write_target.take();

        let expected = checksum(&data);
        if expected != chk {
            warn!("bus: data frame checksum {:02X}, expected {:02X}", chk, expected);
            return self.nak(BusError::DataChecksumMismatch {
                expected,
                actual: chk,
            });
        }

        match target {
            Some(WriteTarget::Relay(frame)) => {
                let now = self.clock.now();
                // Pick up a disconnect that arrived while the data frame was
                // coming in; nothing is pending, so there is no outcome to lose
                self.bridge.pump(now);
                let direction = Direction::Write(data.len());
                self.start_relay(frame, Some(data), direction, now);
            }
            Some(WriteTarget::Local { unit, sector }) => {
                match self.storage.write(unit, sector, &data) {
                    Ok(()) => {
                        self.lead = Some(ACK);
                        self.phase = Phase::Completion;
                    }
                    Err(e) => self.local_error(e),
                }
            }
            None => self.phase = Phase::Idle,
        }
    }

    fn load_response(&mut self, mut data: Vec<u8>) {
        let chk = checksum(&data);
        data.push(chk);
        self.response = data;
        self.read_pos = 0;
        self.lead = Some(ACK);
        self.phase = Phase::DataToBus;
    }

    fn wait_for_peer(&mut self) {
        let config = self.bridge.config();
        let interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        let budget = config.ack_timeout.max(config.data_timeout) + interval;
        let deadline = self.clock.now() + budget;

        while self.phase == Phase::WaitAck {
            let now = self.clock.now();
            self.advance_wait(now);
            if self.phase != Phase::WaitAck {
                break;
            }
            if now > deadline {
                let sync = self.bridge.abandon().map_or(0, |pending| pending.sync);
                warn!("bus: gave up waiting for sync {}", sync);
                self.nak(RelayError::Timeout(sync).into());
                break;
            }
            self.clock.sleep(interval);
        }
    }

    fn advance_wait(&mut self, now: Instant) {
        let report = self.bridge.pump(now);
        let sync = self.waiting_sync.unwrap_or_default();

        if let Some(outcome) = report.outcome {
            self.resolve(outcome);
        } else if report.transport_failed {
            self.lost(RelayError::TransportLost(sync));
        } else if report.disconnected {
            self.lost(RelayError::Disconnected(sync));
        } else if let Some(sync) = self.bridge.poll_timeout(now) {
            self.nak(RelayError::Timeout(sync).into());
        } else if !self.bridge.relay().is_pending() {
            self.lost(RelayError::Disconnected(sync));
        }
    }

    fn resolve(&mut self, outcome: RelayOutcome) {
        match outcome {
            RelayOutcome::Ack(AckStatus::Complete) => {
                self.lead = Some(ACK);
                self.phase = Phase::Completion;
            }
            RelayOutcome::Ack(AckStatus::Rejected) => self.nak(BusError::Rejected),
            RelayOutcome::Ack(AckStatus::Error(code)) => {
                self.last_error = Some(BusError::RemoteError(code));
                self.lead = Some(ACK);
                self.phase = Phase::Error;
            }
            RelayOutcome::Data(data) => self.load_response(data),
            RelayOutcome::NotForUs | RelayOutcome::StillWaiting => {}
        }
    }

    fn nak(&mut self, e: BusError) {
        debug!("bus: NAK ({})", e);
        self.last_error = Some(e);
        self.lead = Some(NAK);
        self.phase = Phase::Idle;
    }

    /// Error status with no preceding ACK
    fn fail(&mut self, e: BusError) {
        self.last_error = Some(e);
        self.lead = None;
        self.phase = Phase::Error;
    }

    fn local_error(&mut self, e: StorageError) {
        warn!("bus: local storage: {}", e);
        self.last_error = Some(e.into());
        self.lead = Some(ACK);
        self.phase = Phase::Error;
    }

    /// Peer went away mid-transaction
    fn lost(&mut self, e: RelayError) {
        warn!("bus: {}", e);
        self.last_error = Some(e.into());
        self.lead = Some(ERROR);
        self.phase = Phase::Idle;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Why the last transaction did not complete
    pub fn last_error(&self) -> Option<&BusError> {
        self.last_error.as_ref()
    }

    pub fn bridge(&self) -> &Bridge<T> {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut Bridge<T> {
        &mut self.bridge
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
