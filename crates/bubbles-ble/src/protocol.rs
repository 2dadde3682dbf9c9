//! BLE protocol constants and advertisement framing

use std::collections::HashMap;

use bubbles_core::Payload;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// BLE Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// Bubbles GATT service UUID
pub const BUBBLES_SERVICE_UUID: Uuid = Uuid::from_u128(0x8C6A0001_4E52_4F5A_9B0B_5A1C3E7D0B00);

/// Characteristic the remote central writes chunks into
pub const BUBBLES_INBOUND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x8C6A0002_4E52_4F5A_9B0B_5A1C3E7D0B00);

/// Characteristic this peripheral notifies chunks through
pub const BUBBLES_OUTBOUND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x8C6A0003_4E52_4F5A_9B0B_5A1C3E7D0B00);

// ----------------------------------------------------------------------------
// Advertisement Layout
// ----------------------------------------------------------------------------

/// Bluetooth SIG company identifier reserved for testing
pub const DEFAULT_COMPANY_ID: u16 = 0xFFFF;

/// Default ATT MTU of 23 less the 3 byte write header
pub const MIN_ATTRIBUTE_SIZE: usize = 20;

/// Leads the manufacturer data of every bubbles advertisement
pub const ADVERTISEMENT_MAGIC: [u8; 2] = *b"BU";

/// Manufacturer data bytes left in a legacy 31 byte advertisement after the
/// flags field and the manufacturer data header
pub const MAX_MANUFACTURER_DATA: usize = 31 - 3 - 4;

/// Manufacturer data for a presence body
///
/// The body is carried whole when it fits, then without the display name,
/// and otherwise left out so scanners still recognise the device.
pub fn advertisement_data(presence: &[u8]) -> Vec<u8> {
    let budget = MAX_MANUFACTURER_DATA - ADVERTISEMENT_MAGIC.len();
    let body = if presence.len() <= budget {
        Some(presence.to_vec())
    } else {
        without_name(presence).filter(|body| body.len() <= budget)
    };

    let mut data = ADVERTISEMENT_MAGIC.to_vec();
    if let Some(body) = body {
        data.extend_from_slice(&body);
    }
    data
}

fn without_name(presence: &[u8]) -> Option<Vec<u8>> {
    match Payload::decode_presence(presence).ok()? {
        Payload::Presence { identity, .. } => Payload::Presence {
            identity,
            name: None,
        }
        .encode_body()
        .ok(),
        _ => None,
    }
}

/// Recognise a bubbles advertisement among a device's manufacturer data.
///
/// Returns `None` for foreign devices, `Some(None)` for a bubbles device that
/// did not fit its presence body, and `Some(Some(body))` otherwise.
pub fn parse_advertisement(
    manufacturer_data: &HashMap<u16, Vec<u8>>,
    company_id: u16,
) -> Option<Option<Vec<u8>>> {
    let data = manufacturer_data.get(&company_id)?;
    let body = data.strip_prefix(&ADVERTISEMENT_MAGIC[..])?;
    if body.is_empty() {
        Some(None)
    } else {
        Some(Some(body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bubbles_core::PeerIdentity;

    fn presence(identity: &str, name: Option<&str>) -> Vec<u8> {
        Payload::Presence {
            identity: PeerIdentity::new(identity).unwrap(),
            name: name.map(str::to_string),
        }
        .encode_body()
        .unwrap()
    }

    #[test]
    fn test_short_presence_is_carried_whole() {
        let body = presence("ana", Some("Ana"));
        let data = advertisement_data(&body);
        assert_eq!(&data[..2], b"BU");
        assert_eq!(&data[2..], &body[..]);
        assert!(data.len() <= MAX_MANUFACTURER_DATA);
    }

    #[test]
    fn test_long_name_is_dropped_before_identity() {
        let body = presence("device-0042", Some("A rather long display name"));
        let data = advertisement_data(&body);
        assert!(data.len() <= MAX_MANUFACTURER_DATA);
        assert_eq!(&data[2..], &presence("device-0042", None)[..]);
    }

    #[test]
    fn test_oversized_identity_advertises_bare() {
        let body = presence("an-identity-far-too-long-for-legacy-advertising", None);
        assert_eq!(advertisement_data(&body), ADVERTISEMENT_MAGIC.to_vec());
    }

    #[test]
    fn test_parse_recognises_only_bubbles_devices() {
        let mut data = HashMap::new();
        assert_eq!(parse_advertisement(&data, DEFAULT_COMPANY_ID), None);

        data.insert(DEFAULT_COMPANY_ID, vec![0x01, 0x02, 0x03]);
        assert_eq!(parse_advertisement(&data, DEFAULT_COMPANY_ID), None);

        data.insert(DEFAULT_COMPANY_ID, ADVERTISEMENT_MAGIC.to_vec());
        assert_eq!(parse_advertisement(&data, DEFAULT_COMPANY_ID), Some(None));

        let body = presence("bo", None);
        data.insert(DEFAULT_COMPANY_ID, advertisement_data(&body));
        assert_eq!(
            parse_advertisement(&data, DEFAULT_COMPANY_ID),
            Some(Some(body))
        );
        assert_eq!(parse_advertisement(&data, 0x004C), None);
    }
}
