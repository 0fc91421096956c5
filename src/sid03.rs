//! Service $03/$07 (emission-related Diagnostic Trouble Codes) decoding

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::response::{DecodeContext, Payload};

/// A single Diagnostic Trouble Code.
///
/// The top two bits select the system letter (P/C/B/U); the remaining
/// 14 bits print as four hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dtc(pub u16);

impl Dtc {
    pub fn letter(&self) -> char {
        match (self.0 >> 14) & 0x03 {
            0 => 'P', // Powertrain
            1 => 'C', // Chassis
            2 => 'B', // Body
            _ => 'U', // Network
        }
    }

    pub fn code(&self) -> String {
        format!("{}{:04X}", self.letter(), self.0 & 0x3FFF)
    }
}

impl std::fmt::Display for Dtc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Decode a DTC response: 2-byte pairs, zero-valued pairs discarded.
///
/// On ISO 15765 a leading item-count byte precedes the pairs; on legacy
/// protocols the count is inferred from the message length.
pub(crate) fn decode_dtcs(ctx: &DecodeContext) -> Result<Payload> {
    let payload = ctx.payload();
    let items = if ctx.protocol.is_can() {
        let count = *payload.first().ok_or_else(|| {
            Error::Data("DTC response missing item-count byte".to_string())
        })? as usize;
        payload
            .get(1..1 + count * 2)
            .ok_or_else(|| Error::Data(format!("DTC response truncated: {:02X?}", payload)))?
    } else {
        &payload[..payload.len() - payload.len() % 2]
    };

    let dtcs = items
        .chunks_exact(2)
        .map(|pair| Dtc(((pair[0] as u16) << 8) | pair[1] as u16))
        .filter(|dtc| dtc.0 != 0)
        .collect();
    Ok(Payload::Dtcs(dtcs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Protocol;

    fn decode(protocol: Protocol, bytes: &[u8]) -> Vec<Dtc> {
        let ctx = DecodeContext {
            protocol,
            bytes,
            offset: 1,
            sid: bytes[0] & 0xBF,
            pid: None,
        };
        match decode_dtcs(&ctx).unwrap() {
            Payload::Dtcs(dtcs) => dtcs,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_dtc_letters() {
        assert_eq!(Dtc(0x0143).code(), "P0143");
        assert_eq!(Dtc(0x4196).code(), "C0196");
        assert_eq!(Dtc(0x8123).code(), "B0123");
        assert_eq!(Dtc(0xC001).code(), "U0001");
    }

    #[test]
    fn test_decode_with_zero_pairs_filtered() {
        // CAN: leading count byte, zero pairs dropped
        let dtcs = decode(
            Protocol::iso15765_4(),
            &[0x43, 0x04, 0x01, 0x43, 0x00, 0x00, 0x41, 0x96, 0x00, 0x00],
        );
        assert_eq!(dtcs.len(), 2);
        assert_eq!(dtcs[0].code(), "P0143");
        assert_eq!(dtcs[1].code(), "C0196");
    }

    #[test]
    fn test_decode_legacy_inferred_count() {
        let dtcs = decode(
            Protocol::Iso9141_2,
            &[0x43, 0x01, 0x43, 0x00, 0x00, 0x41, 0x96],
        );
        assert_eq!(dtcs.len(), 2);
        assert_eq!(dtcs[0].code(), "P0143");
    }

    #[test]
    fn test_decode_no_codes() {
        let dtcs = decode(Protocol::iso15765_4(), &[0x43, 0x00]);
        assert!(dtcs.is_empty());
    }
}
