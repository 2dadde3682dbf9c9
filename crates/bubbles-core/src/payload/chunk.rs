//! Attribute chunk framing
//!
//! `[kind:1][frag_index:1][frag_count:1][bytes...]`

use core::cmp;

use super::{Payload, PayloadKind};
use crate::errors::PayloadError;

/// Bytes of framing in front of every chunk's data
pub const CHUNK_HEADER_SIZE: usize = 3;

/// Most fragments one payload may span
pub const MAX_FRAGMENTS: usize = u8::MAX as usize;

// ----------------------------------------------------------------------------
// Chunk Header
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub kind: PayloadKind,
    /// Zero-based position of this fragment
    pub index: u8,
    /// Total fragments of the payload, at least one
    pub count: u8,
}

impl ChunkHeader {
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.count == 0 || self.index >= self.count {
            return Err(PayloadError::InvalidFragment {
                index: self.index,
                count: self.count,
            });
        }
        Ok(())
    }

    pub fn is_single(&self) -> bool {
        self.count == 1
    }
}

// ----------------------------------------------------------------------------
// Chunk
// ----------------------------------------------------------------------------

/// One attribute write worth of payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(CHUNK_HEADER_SIZE + self.data.len());
        bytes.push(self.header.kind.as_u8());
        bytes.push(self.header.index);
        bytes.push(self.header.count);
        bytes.extend_from_slice(&self.data);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() < CHUNK_HEADER_SIZE {
            return Err(PayloadError::MalformedPayload {
                reason: format!("chunk of {} bytes is shorter than its header", bytes.len()),
            });
        }
        let header = ChunkHeader {
            kind: PayloadKind::try_from(bytes[0])?,
            index: bytes[1],
            count: bytes[2],
        };
        header.validate()?;
        Ok(Self {
            header,
            data: bytes[CHUNK_HEADER_SIZE..].to_vec(),
        })
    }
}

// ----------------------------------------------------------------------------
// Payload Fragmenter
// ----------------------------------------------------------------------------

/// Splits payload bodies into chunks no larger than the attribute capacity
pub struct PayloadFragmenter;

impl PayloadFragmenter {
    /// Largest body that fits within `MAX_FRAGMENTS` chunks of `max_chunk_size`
    pub fn capacity(max_chunk_size: usize) -> usize {
        max_chunk_size.saturating_sub(CHUNK_HEADER_SIZE) * MAX_FRAGMENTS
    }

    pub fn fragment(payload: &Payload, max_chunk_size: usize) -> Result<Vec<Chunk>, PayloadError> {
        let body = payload.encode_body()?;
        Self::fragment_body(payload.kind(), &body, max_chunk_size)
    }

    /// Chunk a body and return each chunk's wire bytes
    pub fn encode(payload: &Payload, max_chunk_size: usize) -> Result<Vec<Vec<u8>>, PayloadError> {
        Ok(Self::fragment(payload, max_chunk_size)?
            .iter()
            .map(Chunk::to_bytes)
            .collect())
    }

    pub fn fragment_body(
        kind: PayloadKind,
        body: &[u8],
        max_chunk_size: usize,
    ) -> Result<Vec<Chunk>, PayloadError> {
        let per_chunk = max_chunk_size.saturating_sub(CHUNK_HEADER_SIZE);
        if per_chunk == 0 {
            return Err(PayloadError::PayloadTooLarge {
                size: body.len(),
                limit: 0,
            });
        }

        let count = cmp::max(1, body.len().div_ceil(per_chunk));
        if count > MAX_FRAGMENTS {
            return Err(PayloadError::PayloadTooLarge {
                size: body.len(),
                limit: Self::capacity(max_chunk_size),
            });
        }

        let mut chunks = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * per_chunk;
            let end = cmp::min(start + per_chunk, body.len());
            chunks.push(Chunk {
                header: ChunkHeader {
                    kind,
                    index: index as u8,
                    count: count as u8,
                },
                data: body[start..end].to_vec(),
            });
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinates, Location, Timestamp};

    #[test]
    fn test_location_spans_two_default_chunks() {
        let payload = Payload::Location(Location::new(
            Coordinates::new(47.6, -122.3),
            Timestamp::new(1_700_000_000_000),
        ));
        let chunks = PayloadFragmenter::encode(&payload, 20).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(&chunks[0][..3], &[0x02, 0, 2]);
        assert_eq!(chunks[0].len(), 20);
        assert_eq!(&chunks[1][..3], &[0x02, 1, 2]);
        assert_eq!(chunks[1].len(), 3 + 24 - 17);
    }

    #[test]
    fn test_empty_body_still_yields_one_chunk() {
        let chunks = PayloadFragmenter::fragment_body(PayloadKind::Message, &[], 20).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].to_bytes(), vec![0x03, 0, 1]);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let text = "x".repeat(PayloadFragmenter::capacity(20));
        let result = PayloadFragmenter::fragment(&Payload::Message { text }, 20);
        assert!(matches!(result, Err(PayloadError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_header_validation() {
        assert!(Chunk::from_bytes(&[0x01, 0, 0]).is_err());
        assert!(Chunk::from_bytes(&[0x01, 2, 2, 0xaa]).is_err());
        assert!(Chunk::from_bytes(&[0x01, 0]).is_err());
        assert_eq!(
            Chunk::from_bytes(&[0x7f, 0, 1]),
            Err(PayloadError::UnknownKind { tag: 0x7f })
        );

        let chunk = Chunk::from_bytes(&[0x03, 1, 3, 0xaa, 0xbb]).unwrap();
        assert_eq!(chunk.header.index, 1);
        assert_eq!(chunk.header.count, 3);
        assert_eq!(chunk.data, vec![0xaa, 0xbb]);
    }
}
