//! Relay engine: turns one bus transaction into an assert / data / deassert
//! burst and matches the peer's answer against the outstanding sync number.

use std::time::{Duration, Instant};

use sio_wire::{fmt_hex, EncodeError, Message, MAX_PAYLOAD};
use tracing::debug;

use crate::command::{CommandFrame, Direction};
use crate::error::RelayError;
use crate::session::Session;

/// The one transaction that may be in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub sync: u8,
    pub issued_at: Instant,
    pub device_id: u8,
    pub command: u8,
    pub expects_response_data: bool,
    pub expected_data_length: usize,
}

/// Messages to transmit for a newly started transaction, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub sync: u8,
    pub messages: [Message; 3],
}

/// Peer verdict carried by a sync response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Complete,
    Rejected,
    Error(u8),
}

impl AckStatus {
    pub fn from_ack_type(ack_type: u8) -> AckStatus {
        match ack_type {
            b'C' => AckStatus::Complete,
            b'N' | 0 => AckStatus::Rejected,
            other => AckStatus::Error(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Not addressed to the pending transaction (or nothing is pending)
    NotForUs,
    Ack(AckStatus),
    Data(Vec<u8>),
    StillWaiting,
}

#[derive(Debug)]
pub struct Relay {
    next_sync: u8,
    pending: Option<PendingTransaction>,
    ack_timeout: Duration,
    data_timeout: Duration,
}

impl Relay {
    pub fn new(ack_timeout: Duration, data_timeout: Duration) -> Self {
        Relay {
            next_sync: 0,
            pending: None,
            ack_timeout,
            data_timeout,
        }
    }

    /// Start a transaction for `frame`, spending one credit.
    pub fn begin_transaction(
        &mut self,
        session: &mut Session,
        frame: &CommandFrame,
        outbound: Option<Vec<u8>>,
        direction: Direction,
        now: Instant,
    ) -> Result<Transaction, RelayError> {
        if !session.is_connected() {
            return Err(RelayError::NotConnected);
        }
        if self.pending.is_some() {
            return Err(RelayError::Busy);
        }

        let mut data = vec![frame.command, frame.aux1, frame.aux2];
        if let Some(outbound) = outbound {
            data.extend_from_slice(&outbound);
        }
        if data.len() > MAX_PAYLOAD {
            return Err(EncodeError::PayloadTooLarge(data.len()).into());
        }
        session.consume_credit()?;

        let sync = self.next_sync;
        self.next_sync = self.next_sync.wrapping_add(1);

        self.pending = Some(PendingTransaction {
            sync,
            issued_at: now,
            device_id: frame.device,
            command: frame.command,
            expects_response_data: direction.expects_data(),
            expected_data_length: if direction.expects_data() {
                direction.data_len()
            } else {
                0
            },
        });
        debug!(
            "relay: sync {} device {:02X} command {:02X} ({} data bytes)",
            sync,
            frame.device,
            frame.command,
            data.len() - 3
        );

        Ok(Transaction {
            sync,
            messages: [
                Message::CommandOn {
                    device: frame.device,
                },
                Message::DataBlock { sync: None, data },
                Message::CommandOffSync { sync },
            ],
        })
    }

    /// Match an inbound message against the pending transaction.
    pub fn admit_response(&mut self, msg: &Message) -> RelayOutcome {
        let Some(pending) = &self.pending else {
            return RelayOutcome::NotForUs;
        };
        let expected = pending.sync;

        let outcome = match msg {
            Message::SyncResponse {
                sync,
                ack_type,
                ack_byte,
                write_size,
            } => {
                if *sync != expected {
                    debug!("relay: sync response {} while waiting for {}", sync, expected);
                    return RelayOutcome::NotForUs;
                }
                debug!(
                    "relay: sync {} acked {:02X} byte {:02X} write size {}",
                    sync, ack_type, ack_byte, write_size
                );
                RelayOutcome::Ack(AckStatus::from_ack_type(*ack_type))
            }
            Message::DataBlock {
                sync: Some(sync),
                data,
            } => {
                if *sync != expected {
                    debug!("relay: data block for sync {} while waiting for {}", sync, expected);
                    return RelayOutcome::NotForUs;
                }
                debug!("relay: sync {} data {}", sync, fmt_hex(data));
                RelayOutcome::Data(data.clone())
            }
            Message::DataByteSync { byte, sync } => {
                if *sync != expected {
                    debug!("relay: data byte for sync {} while waiting for {}", sync, expected);
                    return RelayOutcome::NotForUs;
                }
                RelayOutcome::Data(vec![*byte])
            }
            _ => return RelayOutcome::StillWaiting,
        };

        self.pending = None;
        outcome
    }

    /// Clear the pending transaction once it has outlived its budget.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        let Some(pending) = &self.pending else {
            return false;
        };
        let budget = if pending.expects_response_data {
            self.data_timeout
        } else {
            self.ack_timeout
        };
        if now.saturating_duration_since(pending.issued_at) > budget {
            self.pending = None;
            return true;
        }
        false
    }

    /// Drop the pending transaction without an answer
    pub fn abandon(&mut self) -> Option<PendingTransaction> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<&PendingTransaction> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::command;
    use sio_wire::PeerAddr;

    fn connected_session() -> Session {
        let mut session = Session::new(200);
        session.handle_inbound(
            &Message::PingRequest,
            &PeerAddr::Local("peer".to_string()),
            Instant::now(),
        );
        session
    }

    fn relay() -> Relay {
        Relay::new(Duration::from_millis(1000), Duration::from_millis(2000))
    }

    fn status_frame() -> CommandFrame {
        CommandFrame::new(0x31, command::STATUS, 0, 0)
    }

    fn ack(sync: u8, ack_type: u8) -> Message {
        Message::SyncResponse {
            sync,
            ack_type,
            ack_byte: 0,
            write_size: 0,
        }
    }

    #[test]
    fn test_burst_order() {
        let mut session = connected_session();
        let mut relay = relay();
        let tx = relay
            .begin_transaction(
                &mut session,
                &status_frame(),
                None,
                Direction::Read(4),
                Instant::now(),
            )
            .unwrap();
        assert_eq!(
            tx.messages,
            [
                Message::CommandOn { device: 0x31 },
                Message::DataBlock {
                    sync: None,
                    data: vec![0x53, 0x00, 0x00]
                },
                Message::CommandOffSync { sync: tx.sync },
            ]
        );
        assert_eq!(session.credits(), 199);
        let pending = relay.pending().unwrap();
        assert!(pending.expects_response_data);
        assert_eq!(pending.expected_data_length, 4);
    }

    #[test]
    fn test_outbound_appended() {
        let mut session = connected_session();
        let mut relay = relay();
        let frame = CommandFrame::with_sector(0x70, command::WRITE, 1);
        let tx = relay
            .begin_transaction(
                &mut session,
                &frame,
                Some(vec![0xAA, 0xBB]),
                Direction::Write(2),
                Instant::now(),
            )
            .unwrap();
        assert_eq!(
            tx.messages[1],
            Message::DataBlock {
                sync: None,
                data: vec![0x57, 0x01, 0x00, 0xAA, 0xBB]
            }
        );
        assert!(!relay.pending().unwrap().expects_response_data);
    }

    #[test]
    fn test_busy() {
        let mut session = connected_session();
        let mut relay = relay();
        let now = Instant::now();
        relay
            .begin_transaction(&mut session, &status_frame(), None, Direction::Read(4), now)
            .unwrap();
        let err = relay
            .begin_transaction(&mut session, &status_frame(), None, Direction::Read(4), now)
            .unwrap_err();
        assert!(matches!(err, RelayError::Busy));
        assert_eq!(session.credits(), 199);
    }

    #[test]
    fn test_oversized_burst_spends_nothing() {
        let mut session = connected_session();
        let mut relay = relay();
        let frame = CommandFrame::with_sector(0x70, command::WRITE, 1);
        let err = relay
            .begin_transaction(
                &mut session,
                &frame,
                Some(vec![0; MAX_PAYLOAD - 2]),
                Direction::Write(MAX_PAYLOAD - 2),
                Instant::now(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RelayError::Encode(EncodeError::PayloadTooLarge(n)) if n == MAX_PAYLOAD + 1
        ));
        assert_eq!(session.credits(), 200);
        assert!(!relay.is_pending());

        // three header bytes plus the data must fit exactly
        relay
            .begin_transaction(
                &mut session,
                &frame,
                Some(vec![0; MAX_PAYLOAD - 3]),
                Direction::Write(MAX_PAYLOAD - 3),
                Instant::now(),
            )
            .unwrap();
    }

    #[test]
    fn test_not_connected() {
        let mut session = Session::new(200);
        let mut relay = relay();
        let err = relay
            .begin_transaction(
                &mut session,
                &status_frame(),
                None,
                Direction::Read(4),
                Instant::now(),
            )
            .unwrap_err();
        assert!(matches!(err, RelayError::NotConnected));
        assert!(!relay.is_pending());
    }

    #[test]
    fn test_sync_wraps() {
        let mut session = connected_session();
        let mut relay = relay();
        let now = Instant::now();
        relay.next_sync = 255;
        let tx = relay
            .begin_transaction(&mut session, &status_frame(), None, Direction::Read(4), now)
            .unwrap();
        assert_eq!(tx.sync, 255);
        relay.abandon();
        let tx = relay
            .begin_transaction(&mut session, &status_frame(), None, Direction::Read(4), now)
            .unwrap();
        assert_eq!(tx.sync, 0);
    }

    #[test]
    fn test_mismatched_sync_stays_pending() {
        let mut session = connected_session();
        let mut relay = relay();
        let tx = relay
            .begin_transaction(
                &mut session,
                &status_frame(),
                None,
                Direction::Read(4),
                Instant::now(),
            )
            .unwrap();
        let stale = tx.sync.wrapping_sub(1);

        assert_eq!(relay.admit_response(&ack(stale, b'C')), RelayOutcome::NotForUs);
        assert_eq!(
            relay.admit_response(&Message::DataBlock {
                sync: Some(stale),
                data: vec![1, 2, 3, 4]
            }),
            RelayOutcome::NotForUs
        );
        assert!(relay.is_pending());

        assert_eq!(relay.admit_response(&Message::ProceedOn), RelayOutcome::StillWaiting);
        assert_eq!(
            relay.admit_response(&ack(tx.sync, b'C')),
            RelayOutcome::Ack(AckStatus::Complete)
        );
        assert!(!relay.is_pending());
        assert_eq!(relay.admit_response(&ack(tx.sync, b'C')), RelayOutcome::NotForUs);
    }

    #[test]
    fn test_data_resolves() {
        let mut session = connected_session();
        let mut relay = relay();
        let tx = relay
            .begin_transaction(
                &mut session,
                &status_frame(),
                None,
                Direction::Read(4),
                Instant::now(),
            )
            .unwrap();
        let outcome = relay.admit_response(&Message::DataBlock {
            sync: Some(tx.sync),
            data: vec![0x10, 0xFF, 0xE0, 0x00],
        });
        assert_eq!(outcome, RelayOutcome::Data(vec![0x10, 0xFF, 0xE0, 0x00]));
        assert!(!relay.is_pending());
    }

    #[test]
    fn test_ack_status() {
        assert_eq!(AckStatus::from_ack_type(b'C'), AckStatus::Complete);
        assert_eq!(AckStatus::from_ack_type(b'N'), AckStatus::Rejected);
        assert_eq!(AckStatus::from_ack_type(0), AckStatus::Rejected);
        assert_eq!(AckStatus::from_ack_type(b'E'), AckStatus::Error(b'E'));
    }

    #[test]
    fn test_timeout_budgets() {
        let mut session = connected_session();
        let mut relay = relay();
        let t0 = Instant::now();

        let frame = CommandFrame::with_sector(0x70, command::WRITE, 1);
        relay
            .begin_transaction(&mut session, &frame, Some(vec![0; 128]), Direction::Write(128), t0)
            .unwrap();
        assert!(!relay.poll_timeout(t0 + Duration::from_millis(1000)));
        assert!(relay.poll_timeout(t0 + Duration::from_millis(1001)));
        assert!(!relay.is_pending());

        relay
            .begin_transaction(&mut session, &status_frame(), None, Direction::Read(4), t0)
            .unwrap();
        assert!(!relay.poll_timeout(t0 + Duration::from_millis(1500)));
        assert!(relay.poll_timeout(t0 + Duration::from_millis(2001)));
        assert!(!relay.poll_timeout(t0 + Duration::from_millis(3000)));
    }
}
