//! Fragment reassembly
//!
//! One reassembler belongs to one session, so buffers are keyed by payload
//! kind alone. A buffer either completes and decodes as a whole or is thrown
//! away; nothing partial is ever handed upwards.

use core::time::Duration;
use std::collections::HashMap;

use tracing::debug;

use super::chunk::Chunk;
use super::{Payload, PayloadKind};
use crate::errors::PayloadError;
use crate::types::Timestamp;

/// A payload whose fragments are still arriving
#[derive(Debug)]
struct PartialPayload {
    count: u8,
    fragments: Vec<Option<Vec<u8>>>,
    received: usize,
    started_at: Timestamp,
}

impl PartialPayload {
    fn new(count: u8, started_at: Timestamp) -> Self {
        Self {
            count,
            fragments: vec![None; count as usize],
            received: 0,
            started_at,
        }
    }

    fn holds(&self, index: u8) -> bool {
        self.fragments
            .get(index as usize)
            .map_or(false, Option::is_some)
    }

    fn insert(&mut self, index: u8, data: Vec<u8>) {
        if let Some(slot) = self.fragments.get_mut(index as usize) {
            if slot.replace(data).is_none() {
                self.received += 1;
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.count as usize
    }

    fn assemble(self) -> Vec<u8> {
        self.fragments.into_iter().flatten().flatten().collect()
    }
}

/// Per-session reassembly buffers, keyed by payload kind
#[derive(Debug)]
pub struct Reassembler {
    buffers: HashMap<PayloadKind, PartialPayload>,
    timeout: Duration,
    max_buffers: usize,
}

impl Reassembler {
    pub fn new(timeout: Duration, max_buffers: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            timeout,
            max_buffers: max_buffers.max(1),
        }
    }

    /// Feed one chunk; returns the payload once its last fragment arrives
    ///
    /// Fragments may arrive in any order. A repeated index or a changed
    /// fragment count means the sender started over, so the old buffer is
    /// replaced. Decode errors drop the buffer.
    pub fn accept(&mut self, chunk: Chunk, now: Timestamp) -> Result<Option<Payload>, PayloadError> {
        chunk.header.validate()?;
        let kind = chunk.header.kind;

        if chunk.header.is_single() {
            if self.buffers.remove(&kind).is_some() {
                debug!(%kind, "single-chunk payload superseded partial buffer");
            }
            return Payload::decode_body(kind, &chunk.data).map(Some);
        }

        self.expire_kind(kind, now);

        let restart = match self.buffers.get(&kind) {
            Some(partial) => {
                partial.count != chunk.header.count || partial.holds(chunk.header.index)
            }
            None => false,
        };
        if restart {
            debug!(%kind, "fragment sequence restarted by sender");
            self.buffers.remove(&kind);
        }

        if !self.buffers.contains_key(&kind) {
            while self.buffers.len() >= self.max_buffers {
                if !self.evict_oldest() {
                    break;
                }
            }
            self.buffers
                .insert(kind, PartialPayload::new(chunk.header.count, now));
        }

        let complete = match self.buffers.get_mut(&kind) {
            Some(partial) => {
                partial.insert(chunk.header.index, chunk.data);
                partial.is_complete()
            }
            None => false,
        };
        if !complete {
            return Ok(None);
        }

        match self.buffers.remove(&kind) {
            Some(partial) => Payload::decode_body(kind, &partial.assemble()).map(Some),
            None => Ok(None),
        }
    }

    /// Drop every buffer older than the timeout, returning the kinds discarded
    pub fn expire(&mut self, now: Timestamp) -> Vec<PayloadError> {
        let timeout_ms = self.timeout.as_millis() as u64;
        let expired: Vec<PayloadKind> = self
            .buffers
            .iter()
            .filter(|(_, partial)| now.since(partial.started_at) >= timeout_ms)
            .map(|(kind, _)| *kind)
            .collect();

        expired
            .into_iter()
            .filter_map(|kind| {
                self.buffers.remove(&kind).map(|partial| PayloadError::ReassemblyTimeout {
                    kind: kind.to_string(),
                    elapsed_ms: now.since(partial.started_at),
                })
            })
            .collect()
    }

    /// When the oldest pending buffer times out
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.buffers
            .values()
            .map(|partial| partial.started_at + self.timeout)
            .min()
    }

    pub fn pending(&self) -> usize {
        self.buffers.len()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    fn expire_kind(&mut self, kind: PayloadKind, now: Timestamp) {
        let timeout_ms = self.timeout.as_millis() as u64;
        let stale = self
            .buffers
            .get(&kind)
            .map_or(false, |partial| now.since(partial.started_at) >= timeout_ms);
        if stale {
            self.buffers.remove(&kind);
            debug!(%kind, "stale reassembly buffer discarded");
        }
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .buffers
            .iter()
            .min_by_key(|(_, partial)| partial.started_at)
            .map(|(kind, _)| *kind);
        match oldest {
            Some(kind) => self.buffers.remove(&kind).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::chunk::PayloadFragmenter;

    fn chunks_for(text: &str, size: usize) -> Vec<Chunk> {
        PayloadFragmenter::fragment(&Payload::Message { text: text.into() }, size).unwrap()
    }

    #[test]
    fn test_in_order_reassembly() {
        let mut reassembler = Reassembler::new(Duration::from_secs(3), 3);
        let chunks = chunks_for("hello from across the room", 8);
        assert!(chunks.len() > 2);

        let now = Timestamp::new(1_000);
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let result = reassembler.accept(chunk, now).unwrap();
            if i < last {
                assert!(result.is_none());
            } else {
                assert_eq!(
                    result,
                    Some(Payload::Message {
                        text: "hello from across the room".into()
                    })
                );
            }
        }
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_reverse_order_reassembly() {
        let mut reassembler = Reassembler::new(Duration::from_secs(3), 3);
        let mut chunks = chunks_for("out of order but complete", 6);
        chunks.reverse();

        let mut decoded = None;
        for chunk in chunks {
            decoded = reassembler.accept(chunk, Timestamp::new(0)).unwrap();
        }
        assert_eq!(
            decoded,
            Some(Payload::Message {
                text: "out of order but complete".into()
            })
        );
    }

    #[test]
    fn test_missing_fragment_times_out() {
        let mut reassembler = Reassembler::new(Duration::from_secs(3), 3);
        let mut chunks = chunks_for("this one never finishes", 6);
        chunks.remove(1);

        for chunk in chunks {
            assert!(reassembler.accept(chunk, Timestamp::new(0)).unwrap().is_none());
        }
        assert_eq!(reassembler.pending(), 1);
        assert_eq!(reassembler.next_deadline(), Some(Timestamp::new(3_000)));

        assert!(reassembler.expire(Timestamp::new(2_999)).is_empty());
        let expired = reassembler.expire(Timestamp::new(3_000));
        assert_eq!(expired.len(), 1);
        assert!(matches!(
            expired[0],
            PayloadError::ReassemblyTimeout { .. }
        ));
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_retransmission_restarts_buffer() {
        let mut reassembler = Reassembler::new(Duration::from_secs(3), 3);
        let chunks = chunks_for("sent twice", 6);
        assert!(chunks.len() >= 2);

        // first attempt loses its tail
        reassembler.accept(chunks[0].clone(), Timestamp::new(0)).unwrap();

        let mut decoded = None;
        for chunk in chunks {
            decoded = reassembler.accept(chunk, Timestamp::new(10)).unwrap();
        }
        assert_eq!(
            decoded,
            Some(Payload::Message {
                text: "sent twice".into()
            })
        );
    }

    #[test]
    fn test_late_fragment_after_timeout_does_not_complete() {
        let mut reassembler = Reassembler::new(Duration::from_millis(500), 3);
        let chunks = chunks_for("slow", 4);
        let (first, rest) = chunks.split_first().unwrap();

        reassembler.accept(first.clone(), Timestamp::new(0)).unwrap();
        for chunk in rest {
            assert!(reassembler
                .accept(chunk.clone(), Timestamp::new(600))
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn test_malformed_body_drops_buffer() {
        let mut reassembler = Reassembler::new(Duration::from_secs(3), 3);
        let first = Chunk::from_bytes(&[0x03, 0, 2, 50, 0]).unwrap();
        let second = Chunk::from_bytes(&[0x03, 1, 2, b'x']).unwrap();

        assert!(reassembler.accept(first, Timestamp::new(0)).unwrap().is_none());
        assert!(reassembler.accept(second, Timestamp::new(0)).is_err());
        assert_eq!(reassembler.pending(), 0);
    }
}
