//! Payload Codec
//!
//! Application payloads and their byte bodies. Bodies are cut into attribute
//! sized chunks by [`chunk`] and put back together by [`reassembly`].
//!
//! Body layouts (all integers little-endian):
//!
//! ```text
//! Presence  [len:u16][identity UTF-8] ([len:u16][name UTF-8])?
//! Location  [latitude:f64][longitude:f64][timestamp_ms:u64]
//! Message   [len:u16][text UTF-8]
//! ```

pub mod chunk;
pub mod reassembly;

pub use chunk::{Chunk, ChunkHeader, PayloadFragmenter, CHUNK_HEADER_SIZE};
pub use reassembly::Reassembler;

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::PayloadError;
use crate::types::{Coordinates, Location, PeerIdentity, Timestamp};

const LOCATION_BODY_SIZE: usize = 24;

// ----------------------------------------------------------------------------
// Payload Kind
// ----------------------------------------------------------------------------

/// Wire tag carried in the first byte of every chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PayloadKind {
    Presence = 0x01,
    Location = 0x02,
    Message = 0x03,
}

impl PayloadKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PayloadKind {
    type Error = PayloadError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x01 => Ok(PayloadKind::Presence),
            0x02 => Ok(PayloadKind::Location),
            0x03 => Ok(PayloadKind::Message),
            tag => Err(PayloadError::UnknownKind { tag }),
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadKind::Presence => "presence",
            PayloadKind::Location => "location",
            PayloadKind::Message => "message",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Payload
// ----------------------------------------------------------------------------

/// One logical application update exchanged over a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Presence {
        identity: PeerIdentity,
        name: Option<String>,
    },
    Location(Location),
    Message {
        text: String,
    },
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Presence { .. } => PayloadKind::Presence,
            Payload::Location(_) => PayloadKind::Location,
            Payload::Message { .. } => PayloadKind::Message,
        }
    }

    /// Serialize the body, without any chunk framing
    pub fn encode_body(&self) -> Result<Vec<u8>, PayloadError> {
        let mut body = Vec::new();
        match self {
            Payload::Presence { identity, name } => {
                put_str(&mut body, identity.as_str())?;
                if let Some(name) = name {
                    put_str(&mut body, name)?;
                }
            }
            Payload::Location(location) => {
                body.reserve(LOCATION_BODY_SIZE);
                body.extend_from_slice(&location.coordinates.latitude.to_le_bytes());
                body.extend_from_slice(&location.coordinates.longitude.to_le_bytes());
                body.extend_from_slice(&location.timestamp.as_millis().to_le_bytes());
            }
            Payload::Message { text } => put_str(&mut body, text)?,
        }
        Ok(body)
    }

    /// Parse a complete body of the given kind
    pub fn decode_body(kind: PayloadKind, body: &[u8]) -> Result<Self, PayloadError> {
        match kind {
            PayloadKind::Presence => Self::decode_presence(body),
            PayloadKind::Location => {
                if body.len() != LOCATION_BODY_SIZE {
                    return Err(PayloadError::MalformedPayload {
                        reason: format!(
                            "location body is {} bytes, expected {}",
                            body.len(),
                            LOCATION_BODY_SIZE
                        ),
                    });
                }
                let latitude = f64::from_le_bytes(read_array(&body[0..8])?);
                let longitude = f64::from_le_bytes(read_array(&body[8..16])?);
                let timestamp = u64::from_le_bytes(read_array(&body[16..24])?);
                let coordinates = Coordinates::new(latitude, longitude);
                if !coordinates.is_valid() {
                    return Err(PayloadError::MalformedPayload {
                        reason: format!("coordinates out of range: {}", coordinates),
                    });
                }
                Ok(Payload::Location(Location::new(
                    coordinates,
                    Timestamp::new(timestamp),
                )))
            }
            PayloadKind::Message => {
                let mut cursor = body;
                let text = take_str(&mut cursor)?;
                if !cursor.is_empty() {
                    return Err(trailing(cursor.len()));
                }
                Ok(Payload::Message { text })
            }
        }
    }

    /// Parse a presence body, as found in chunks and advertisements
    pub fn decode_presence(body: &[u8]) -> Result<Self, PayloadError> {
        let mut cursor = body;
        let identity = take_str(&mut cursor)?;
        let identity = PeerIdentity::new(identity).map_err(|e| PayloadError::MalformedPayload {
            reason: e.to_string(),
        })?;
        let name = if cursor.is_empty() {
            None
        } else {
            Some(take_str(&mut cursor)?)
        };
        if !cursor.is_empty() {
            return Err(trailing(cursor.len()));
        }
        Ok(Payload::Presence { identity, name })
    }
}

fn put_str(out: &mut Vec<u8>, value: &str) -> Result<(), PayloadError> {
    let len = u16::try_from(value.len()).map_err(|_| PayloadError::PayloadTooLarge {
        size: value.len(),
        limit: u16::MAX as usize,
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn take_str(cursor: &mut &[u8]) -> Result<String, PayloadError> {
    if cursor.len() < 2 {
        return Err(PayloadError::MalformedPayload {
            reason: "missing length prefix".into(),
        });
    }
    let len = u16::from_le_bytes([cursor[0], cursor[1]]) as usize;
    let rest = &cursor[2..];
    if rest.len() < len {
        return Err(PayloadError::MalformedPayload {
            reason: format!("length prefix {} exceeds remaining {} bytes", len, rest.len()),
        });
    }
    let value = core::str::from_utf8(&rest[..len])
        .map_err(|_| PayloadError::InvalidUtf8)?
        .to_owned();
    *cursor = &rest[len..];
    Ok(value)
}

fn read_array(bytes: &[u8]) -> Result<[u8; 8], PayloadError> {
    bytes
        .try_into()
        .map_err(|_| PayloadError::MalformedPayload {
            reason: "short numeric field".into(),
        })
}

fn trailing(extra: usize) -> PayloadError {
    PayloadError::MalformedPayload {
        reason: format!("{} trailing bytes after body", extra),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(s: &str) -> PeerIdentity {
        PeerIdentity::new(s).unwrap()
    }

    #[test]
    fn test_location_body_layout() {
        let payload = Payload::Location(Location::new(
            Coordinates::new(1.5, -2.25),
            Timestamp::new(0x0102_0304_0506_0708),
        ));
        let body = payload.encode_body().unwrap();

        assert_eq!(body.len(), 24);
        assert_eq!(&body[0..8], &1.5f64.to_le_bytes());
        assert_eq!(&body[8..16], &(-2.25f64).to_le_bytes());
        assert_eq!(&body[16..24], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(
            Payload::decode_body(PayloadKind::Location, &body).unwrap(),
            payload
        );
    }

    #[test]
    fn test_presence_name_is_optional() {
        let bare = Payload::Presence {
            identity: identity("alice"),
            name: None,
        };
        let body = bare.encode_body().unwrap();
        assert_eq!(body, [5, 0, b'a', b'l', b'i', b'c', b'e']);
        assert_eq!(Payload::decode_presence(&body).unwrap(), bare);

        let named = Payload::Presence {
            identity: identity("alice"),
            name: Some("Alice".into()),
        };
        let body = named.encode_body().unwrap();
        assert_eq!(Payload::decode_presence(&body).unwrap(), named);
    }

    #[test]
    fn test_malformed_bodies_rejected() {
        // length prefix longer than the body
        assert!(matches!(
            Payload::decode_body(PayloadKind::Message, &[9, 0, b'h', b'i']),
            Err(PayloadError::MalformedPayload { .. })
        ));
        // invalid UTF-8
        assert_eq!(
            Payload::decode_body(PayloadKind::Message, &[2, 0, 0xff, 0xfe]),
            Err(PayloadError::InvalidUtf8)
        );
        // empty identity
        assert!(Payload::decode_presence(&[0, 0]).is_err());
        // short location
        assert!(Payload::decode_body(PayloadKind::Location, &[0; 16]).is_err());
        // trailing garbage after a message
        assert!(Payload::decode_body(PayloadKind::Message, &[1, 0, b'x', 0]).is_err());
    }

    #[test]
    fn test_out_of_range_coordinates_rejected() {
        let mut body = Vec::new();
        body.extend_from_slice(&120.0f64.to_le_bytes());
        body.extend_from_slice(&0.0f64.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());
        assert!(Payload::decode_body(PayloadKind::Location, &body).is_err());
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(PayloadKind::try_from(0x02), Ok(PayloadKind::Location));
        assert_eq!(
            PayloadKind::try_from(0x09),
            Err(PayloadError::UnknownKind { tag: 0x09 })
        );
    }
}
