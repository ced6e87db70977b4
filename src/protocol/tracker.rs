//! Round-indexed message bookkeeping shared by every scheme state machine.
//!
//! The tracker enforces the per-round delivery rules: messages ahead of the
//! current round are buffered (bounded), messages for past rounds are
//! discarded with a warn-level observation, duplicates with identical
//! `(from, round, sequence)` are discarded, and divergent duplicates (same
//! key, different payload) name the sender as malicious.

use std::collections::{BTreeMap, HashMap};

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{AbortKind, ProtocolAbort};
use crate::metrics::{inc, METRICS};
use crate::types::PartyIndex;

/// A message as seen by a scheme state machine.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub from: PartyIndex,
    pub round: u32,
    pub sequence: u32,
    pub payload: Vec<u8>,
}

/// Disposition of an inbound message.
#[derive(Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The message belongs to the current round; process it now.
    Deliver,
    /// The message was buffered for a future round.
    Buffered,
    /// Past-round or duplicate message; dropped.
    Discarded,
}

#[derive(Debug)]
pub struct RoundTracker {
    current_round: u32,
    total_rounds: u32,
    /// Digest per accepted (from, round, sequence), for divergence checks.
    seen: HashMap<(u16, u32, u32), [u8; 32]>,
    /// Messages buffered for rounds ahead of the current one.
    pending: BTreeMap<u32, Vec<Inbound>>,
    max_pending: usize,
}

impl RoundTracker {
    pub fn new(total_rounds: u32, max_pending: usize) -> Self {
        RoundTracker {
            current_round: 1,
            total_rounds,
            seen: HashMap::new(),
            pending: BTreeMap::new(),
            max_pending,
        }
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    /// Classify an inbound message.
    pub fn accept(&mut self, msg: &Inbound) -> Result<Disposition, ProtocolAbort> {
        if msg.round == 0 || msg.round > self.total_rounds {
            return Err(ProtocolAbort::blaming(AbortKind::WrongRound, msg.from));
        }

        let key = (msg.from.0, msg.round, msg.sequence);
        let digest: [u8; 32] = Sha256::digest(&msg.payload).into();
        if let Some(prior) = self.seen.get(&key) {
            if *prior == digest {
                inc(&METRICS.messages_deduplicated);
                return Ok(Disposition::Discarded);
            }
            // Same key, different payload: provable equivocation.
            return Err(ProtocolAbort::blaming(AbortKind::MaliciousPeer, msg.from));
        }

        if msg.round < self.current_round {
            warn!(
                from = msg.from.0,
                round = msg.round,
                current = self.current_round,
                "discarding past-round message"
            );
            inc(&METRICS.messages_discarded_past_round);
            return Ok(Disposition::Discarded);
        }

        self.seen.insert(key, digest);

        if msg.round > self.current_round {
            let buffered: usize = self.pending.values().map(Vec::len).sum();
            if buffered >= self.max_pending {
                return Err(ProtocolAbort::blaming(AbortKind::PeerMisbehaving, msg.from));
            }
            self.pending.entry(msg.round).or_default().push(msg.clone());
            return Ok(Disposition::Buffered);
        }

        Ok(Disposition::Deliver)
    }

    /// Advance to the next round and drain any messages buffered for it.
    pub fn advance(&mut self) -> Vec<Inbound> {
        self.current_round += 1;
        self.pending.remove(&self.current_round).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: u16, round: u32, sequence: u32, payload: &[u8]) -> Inbound {
        Inbound { from: PartyIndex(from), round, sequence, payload: payload.to_vec() }
    }

    #[test]
    fn duplicates_are_discarded_once() {
        let mut tracker = RoundTracker::new(3, 8);
        let m = msg(2, 1, 0, b"hello");
        assert_eq!(tracker.accept(&m).unwrap(), Disposition::Deliver);
        assert_eq!(tracker.accept(&m).unwrap(), Disposition::Discarded);
    }

    #[test]
    fn divergent_duplicate_is_malicious() {
        let mut tracker = RoundTracker::new(3, 8);
        assert_eq!(tracker.accept(&msg(2, 1, 0, b"one")).unwrap(), Disposition::Deliver);
        let err = tracker.accept(&msg(2, 1, 0, b"two")).unwrap_err();
        assert_eq!(err.kind, AbortKind::MaliciousPeer);
        assert_eq!(err.offender, Some(PartyIndex(2)));
    }

    #[test]
    fn future_rounds_buffer_and_drain() {
        let mut tracker = RoundTracker::new(3, 8);
        assert_eq!(tracker.accept(&msg(3, 2, 1, b"early")).unwrap(), Disposition::Buffered);
        let drained = tracker.advance();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].from, PartyIndex(3));
    }

    #[test]
    fn past_rounds_are_dropped() {
        let mut tracker = RoundTracker::new(3, 8);
        tracker.advance();
        assert_eq!(tracker.accept(&msg(1, 1, 0, b"late")).unwrap(), Disposition::Discarded);
    }

    #[test]
    fn rounds_beyond_total_are_rejected() {
        let mut tracker = RoundTracker::new(2, 8);
        let err = tracker.accept(&msg(1, 3, 0, b"beyond")).unwrap_err();
        assert_eq!(err.kind, AbortKind::WrongRound);
    }

    #[test]
    fn buffer_bound_names_the_flooder() {
        let mut tracker = RoundTracker::new(4, 2);
        assert!(tracker.accept(&msg(1, 3, 0, b"a")).is_ok());
        assert!(tracker.accept(&msg(1, 3, 1, b"b")).is_ok());
        let err = tracker.accept(&msg(1, 3, 2, b"c")).unwrap_err();
        assert_eq!(err.kind, AbortKind::PeerMisbehaving);
    }
}
