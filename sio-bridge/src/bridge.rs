//! The bus side's single connection to the remote peer: link, session and
//! relay engine owned together.

use std::time::Instant;

use sio_wire::{Message, Transport, TransportError};
use tracing::{debug, info, warn};

use crate::command::{CommandFrame, Direction};
use crate::config::BridgeConfig;
use crate::error::RelayError;
use crate::link::Link;
use crate::relay::{PendingTransaction, Relay, RelayOutcome};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Warm,
    Cold,
}

/// Bus lines driven by the peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSignals {
    proceed: bool,
    interrupt: bool,
    reset: Option<ResetKind>,
    speed: Option<u32>,
}

impl HostSignals {
    pub fn proceed(&self) -> bool {
        self.proceed
    }

    pub fn interrupt(&self) -> bool {
        self.interrupt
    }

    /// Baud rate last requested by the peer
    pub fn speed(&self) -> Option<u32> {
        self.speed
    }

    /// Take a reset the peer asked for, if any
    pub fn take_reset(&mut self) -> Option<ResetKind> {
        self.reset.take()
    }

    fn apply(&mut self, msg: &Message) -> bool {
        match msg {
            Message::ProceedOn => self.proceed = true,
            Message::ProceedOff => self.proceed = false,
            Message::InterruptOn => self.interrupt = true,
            Message::InterruptOff => self.interrupt = false,
            Message::WarmReset => self.reset = Some(ResetKind::Warm),
            Message::ColdReset => self.reset = Some(ResetKind::Cold),
            Message::SpeedChange { baud } => self.speed = Some(*baud),
            _ => return false,
        }
        true
    }
}

/// What one `pump` call saw
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Resolution of the pending transaction (`Ack` or `Data`)
    pub outcome: Option<RelayOutcome>,
    /// The peer went away (disconnect or idle timeout)
    pub disconnected: bool,
    pub transport_failed: bool,
}

pub struct Bridge<T: Transport> {
    link: Link<T>,
    session: Session,
    relay: Relay,
    signals: HostSignals,
    config: BridgeConfig,
    /// The peer closed a connected transport; nothing more will arrive
    closed: bool,
}

impl<T: Transport> Bridge<T> {
    pub fn new(transport: T, config: BridgeConfig) -> Self {
        Bridge {
            link: Link::new(transport),
            session: Session::new(config.credit_grant),
            relay: Relay::new(config.ack_timeout, config.data_timeout),
            signals: HostSignals::default(),
            config,
            closed: false,
        }
    }

    /// Drain inbound traffic: answer handshake and credit requests, record
    /// host signals and stop at the first message that resolves the pending
    /// transaction.
    pub fn pump(&mut self, now: Instant) -> PumpReport {
        let mut report = PumpReport::default();
        if self.closed {
            report.transport_failed = true;
            return report;
        }

        loop {
            let (msg, from) = match self.link.recv() {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    self.fail_transport(&e);
                    report.transport_failed = true;
                    return report;
                }
            };

            if let Some(reply) = self.session.handle_inbound(&msg, &from, now) {
                if matches!(msg, Message::PingRequest) {
                    self.link.set_peer(&from);
                }
                if let Err(e) = self.link.send(&reply, now) {
                    self.fail_transport(&e);
                    report.transport_failed = true;
                    return report;
                }
            }
            if !self.session.is_peer(&from) {
                continue;
            }

            match msg {
                Message::DeviceConnect => self.link.set_peer(&from),
                Message::DeviceDisconnect => {
                    if let Some(pending) = self.relay.abandon() {
                        warn!("bridge: peer disconnected with sync {} outstanding", pending.sync);
                    }
                    report.disconnected = true;
                    continue;
                }
                _ => {}
            }

            if self.signals.apply(&msg) {
                debug!("bridge: host signal {}", msg.name());
                continue;
            }

            match self.relay.admit_response(&msg) {
                outcome @ (RelayOutcome::Ack(_) | RelayOutcome::Data(_)) => {
                    report.outcome = Some(outcome);
                    return report;
                }
                RelayOutcome::NotForUs | RelayOutcome::StillWaiting => {}
            }
        }

        if let Some(limit) = self.config.peer_idle_timeout {
            if self.session.is_idle(now, limit) {
                info!("bridge: peer silent for more than {:?}, dropping it", limit);
                self.session.shutdown();
                self.relay.abandon();
                report.disconnected = true;
            }
        }
        report
    }

    /// Start relaying `frame`; the burst is on the wire when this returns Ok.
    pub fn begin(
        &mut self,
        frame: &CommandFrame,
        outbound: Option<Vec<u8>>,
        direction: Direction,
        now: Instant,
    ) -> Result<u8, RelayError> {
        let tx = self
            .relay
            .begin_transaction(&mut self.session, frame, outbound, direction, now)?;
        for msg in &tx.messages {
            if let Err(e) = self.link.send(msg, now) {
                self.relay.abandon();
                self.send_failed(&e);
                return Err(e.into());
            }
        }
        Ok(tx.sync)
    }

    /// Expire the pending transaction; returns its sync number if it timed out.
    pub fn poll_timeout(&mut self, now: Instant) -> Option<u8> {
        let sync = self.relay.pending()?.sync;
        if self.relay.poll_timeout(now) {
            warn!("bridge: sync {} timed out", sync);
            return Some(sync);
        }
        None
    }

    /// Give up on the pending transaction without an answer
    pub fn abandon(&mut self) -> Option<PendingTransaction> {
        self.relay.abandon()
    }

    /// Forward a host-side line change to the peer, if one is known.
    pub fn notify(&mut self, msg: &Message, now: Instant) -> Result<(), TransportError> {
        if self.session.peer().is_none() {
            return Ok(());
        }
        self.link.send(msg, now).inspect_err(|e| self.send_failed(e))
    }

    /// An unencodable message is our own fault; the transport is still fine.
    fn send_failed(&mut self, e: &TransportError) {
        match e {
            TransportError::Encode(_) => warn!("bridge: {}", e),
            _ => self.fail_transport(e),
        }
    }

    fn fail_transport(&mut self, e: &TransportError) {
        if matches!(e, TransportError::ConnectionClosed) {
            if !self.closed {
                warn!("bridge: peer closed the connection");
            }
            self.closed = true;
        } else {
            warn!("bridge: transport error: {}", e);
        }
        self.session.transport_failed();
        self.relay.abandon();
    }

    /// Whether the transport has been closed for good
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn signals(&self) -> &HostSignals {
        &self.signals
    }

    pub fn signals_mut(&mut self) -> &mut HostSignals {
        &mut self.signals
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn link(&self) -> &Link<T> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link<T> {
        &mut self.link
    }
}
