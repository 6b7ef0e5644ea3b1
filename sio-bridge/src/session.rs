//! Handshake and credit state of the single remote peer.
//!
//! The session never performs I/O. `handle_inbound` returns the reply the
//! caller should send, if any.

use std::time::{Duration, Instant};

use sio_wire::{Message, PeerAddr};
use tracing::{debug, info, warn};

use crate::error::NoCreditsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unconnected,
    Connected,
}

#[derive(Debug)]
pub struct Session {
    peer: Option<PeerAddr>,
    state: HandshakeState,
    /// Signed so an accounting bug shows up as a negative number
    credits: i32,
    last_activity: Option<Instant>,
    credit_grant: u8,
}

impl Session {
    pub fn new(credit_grant: u8) -> Self {
        Session {
            peer: None,
            state: HandshakeState::Unconnected,
            credits: 0,
            last_activity: None,
            credit_grant,
        }
    }

    /// Apply one inbound message and return the reply to send, if any.
    pub fn handle_inbound(
        &mut self,
        msg: &Message,
        from: &PeerAddr,
        now: Instant,
    ) -> Option<Message> {
        match msg {
            Message::PingRequest => {
                self.adopt_peer(from);
                self.state = HandshakeState::Connected;
                self.credits = self.credit_grant as i32;
                self.last_activity = Some(now);
                info!("session: ping from {}, granted {} credits", from, self.credit_grant);
                return Some(Message::PingResponse {
                    credits: self.credit_grant,
                });
            }
            Message::DeviceConnect => {
                self.adopt_peer(from);
                self.state = HandshakeState::Connected;
                self.last_activity = Some(now);
                info!("session: peer {} connected", from);
                return None;
            }
            _ => {}
        }

        if !self.is_peer(from) {
            debug!("session: ignoring {} from unknown address {}", msg.name(), from);
            return None;
        }
        self.last_activity = Some(now);

        match msg {
            Message::DeviceDisconnect => {
                info!("session: peer {} disconnected", from);
                self.shutdown();
                None
            }
            Message::CreditStatus { credits } => {
                self.credits = self.credits.saturating_add(self.credit_grant as i32);
                debug!(
                    "session: peer reports {} credits, now {} available",
                    credits, self.credits
                );
                Some(Message::CreditUpdate {
                    credits: self.credit_grant,
                })
            }
            Message::AliveRequest => Some(Message::AliveResponse),
            _ => None,
        }
    }

    fn adopt_peer(&mut self, from: &PeerAddr) {
        if self.peer.as_ref() != Some(from) {
            if let Some(old) = &self.peer {
                info!("session: peer moved from {} to {}", old, from);
            }
            self.peer = Some(from.clone());
        }
    }

    /// Handshake done and credits left
    pub fn is_connected(&self) -> bool {
        self.state == HandshakeState::Connected && self.credits > 0
    }

    pub fn consume_credit(&mut self) -> Result<(), NoCreditsError> {
        if self.credits <= 0 {
            return Err(NoCreditsError);
        }
        self.credits -= 1;
        Ok(())
    }

    /// Drop the connection but remember the peer's address.
    pub fn shutdown(&mut self) {
        self.credits = 0;
        self.state = HandshakeState::Unconnected;
    }

    /// Forget the peer entirely.
    pub fn reset(&mut self) {
        self.shutdown();
        self.peer = None;
        self.last_activity = None;
    }

    pub fn transport_failed(&mut self) {
        if self.state == HandshakeState::Connected {
            warn!("session: transport failed, peer marked unconnected");
        }
        self.shutdown();
    }

    /// Connected but silent for longer than `limit`
    pub fn is_idle(&self, now: Instant, limit: Duration) -> bool {
        match (self.state, self.last_activity) {
            (HandshakeState::Connected, Some(last)) => now.saturating_duration_since(last) > limit,
            _ => false,
        }
    }

    pub fn is_peer(&self, addr: &PeerAddr) -> bool {
        self.peer.as_ref() == Some(addr)
    }

    pub fn peer(&self) -> Option<&PeerAddr> {
        self.peer.as_ref()
    }

    pub fn credits(&self) -> i32 {
        self.credits
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }
}
