//! OBD bus protocol descriptors and header parsing
//!
//! Each supported lower-layer protocol is a variant of [`Protocol`].
//! Instances are compared structurally, so two descriptors specify the
//! same protocol exactly when they are equal.  The descriptor knows its
//! baud rate, header size, and how to extract transmitter/receiver IDs
//! from raw header bytes.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Initialization variant for ISO 14230-4 (KWP2000)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KwpInit {
    Fast,
    FiveBaud,
}

/// A supported OBD bus protocol.
///
/// SAE J1939 can be specified (e.g. when talking to an interface that
/// supports it) but its framing is not implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    J1850Pwm,
    J1850Vpw,
    Iso9141_2,
    Iso14230_4(KwpInit),
    Iso15765_4 { id_bits: u8, baud: u32 },
    SaeJ1939 { id_bits: u8, baud: u32 },
}

impl Protocol {
    /// ISO 15765-4 with the most common parameters (29-bit IDs, 500 kbaud)
    pub fn iso15765_4() -> Self {
        Protocol::Iso15765_4 {
            id_bits: 29,
            baud: 500_000,
        }
    }

    /// Human-readable protocol name
    pub fn name(&self) -> String {
        match self {
            Protocol::J1850Pwm => "SAE J1850 PWM (41.6 Kbaud)".to_string(),
            Protocol::J1850Vpw => "SAE J1850 VPW (10.4 Kbaud)".to_string(),
            Protocol::Iso9141_2 => "ISO 9141-2 (5 baud init, 10.4 Kbaud)".to_string(),
            Protocol::Iso14230_4(KwpInit::Fast) => {
                "ISO 14230-4 KWP (fast init, 10.4 Kbaud)".to_string()
            }
            Protocol::Iso14230_4(KwpInit::FiveBaud) => {
                "ISO 14230-4 KWP (5 baud init, 10.4 Kbaud)".to_string()
            }
            Protocol::Iso15765_4 { id_bits, baud } => {
                format!("ISO 15765-4 CAN ({} bit ID, {} Kbaud)", id_bits, baud / 1000)
            }
            Protocol::SaeJ1939 { id_bits, baud } => {
                format!("SAE J1939 CAN ({} bit ID, {} Kbaud)", id_bits, baud / 1000)
            }
        }
    }

    /// Baud rate used on the vehicle bus
    pub fn baud(&self) -> u32 {
        match self {
            Protocol::J1850Pwm => 41_600,
            Protocol::J1850Vpw | Protocol::Iso9141_2 | Protocol::Iso14230_4(_) => 10_400,
            Protocol::Iso15765_4 { baud, .. } | Protocol::SaeJ1939 { baud, .. } => *baud,
        }
    }

    /// Number of header bytes in each frame.
    ///
    /// 11-bit CAN headers are logically 3 nibbles but are always padded
    /// left with zeros to 32 bits, so all CAN header buffers are 4 bytes.
    pub fn header_size(&self) -> usize {
        if self.is_can() {
            4
        } else {
            3
        }
    }

    pub fn is_can(&self) -> bool {
        matches!(
            self,
            Protocol::Iso15765_4 { .. } | Protocol::SaeJ1939 { .. }
        )
    }

    /// Parse the protocol-specific header at the front of a raw frame.
    pub fn parse_header(&self, raw: &[u8]) -> Result<Header> {
        let size = self.header_size();
        if raw.len() < size {
            return Err(Error::Data(format!(
                "frame shorter than {}-byte {} header: {:02X?}",
                size,
                self.name(),
                raw
            )));
        }
        let bytes = &raw[..size];
        let header = match self {
            Protocol::J1850Pwm | Protocol::J1850Vpw | Protocol::Iso9141_2 => Header {
                raw: bytes.to_vec(),
                priority: Some(bytes[0]),
                addr_mode: Some(bytes[1]),
                tx_id: Some(bytes[2]),
                rx_id: None,
            },
            Protocol::Iso14230_4(_) => Header {
                // byte 0 = 0xC0 | data length, byte 1 = 0x33
                raw: bytes.to_vec(),
                priority: None,
                addr_mode: None,
                tx_id: Some(bytes[2]),
                rx_id: None,
            },
            Protocol::Iso15765_4 { id_bits: 11, .. } => Self::parse_can_11bit(bytes),
            Protocol::Iso15765_4 { .. } => Header {
                raw: bytes.to_vec(),
                priority: Some(bytes[0]),
                // 0xDB = functional, 0xDA = physical
                addr_mode: Some(bytes[1]),
                // 0x33 = broadcast (functional)
                rx_id: Some(bytes[2]),
                // 0xF1 = tester ID
                tx_id: Some(bytes[3]),
            },
            Protocol::SaeJ1939 { .. } => {
                return Err(Error::Protocol(
                    "SAE J1939 header parsing is not implemented".to_string(),
                ))
            }
        };
        Ok(header)
    }

    fn parse_can_11bit(bytes: &[u8]) -> Header {
        let priority = bytes[2] & 0x0F; // always 7
        let addr_mode = bytes[3] & 0xF0; // 0xD0 = functional, 0xE0 = physical
        let (tx_id, rx_id) = if addr_mode == 0xD0 {
            // functional request from the tester; tx_id made up to
            // mimic the other protocols
            (0xF1, bytes[3] & 0x0F)
        } else if bytes[3] & 0x08 != 0 {
            (bytes[3] & 0x07, 0xF1)
        } else {
            (0xF1, bytes[3] & 0x07)
        };
        Header {
            raw: bytes.to_vec(),
            priority: Some(priority),
            addr_mode: Some(addr_mode),
            tx_id: Some(tx_id),
            rx_id: Some(rx_id),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Parsed message header.
///
/// Carries the raw header bytes plus the fields that could be derived for
/// the protocol in question; fields that a protocol does not encode are
/// `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub raw: Vec<u8>,
    pub tx_id: Option<u8>,
    pub rx_id: Option<u8>,
    pub addr_mode: Option<u8>,
    pub priority: Option<u8>,
}

impl std::fmt::Display for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.raw {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        assert_eq!(Protocol::iso15765_4(), Protocol::Iso15765_4 { id_bits: 29, baud: 500_000 });
        assert_ne!(
            Protocol::Iso15765_4 { id_bits: 29, baud: 500_000 },
            Protocol::Iso15765_4 { id_bits: 11, baud: 500_000 }
        );
        assert_ne!(
            Protocol::Iso14230_4(KwpInit::Fast),
            Protocol::Iso14230_4(KwpInit::FiveBaud)
        );
    }

    #[test]
    fn test_descriptor_parameters() {
        assert_eq!(Protocol::J1850Pwm.baud(), 41_600);
        assert_eq!(Protocol::J1850Vpw.baud(), 10_400);
        assert_eq!(Protocol::J1850Vpw.header_size(), 3);
        assert_eq!(Protocol::iso15765_4().header_size(), 4);
        assert!(Protocol::iso15765_4().is_can());
        assert!(!Protocol::Iso9141_2.is_can());
    }

    #[test]
    fn test_legacy_header() {
        let header = Protocol::Iso9141_2
            .parse_header(&[0x48, 0x6B, 0x10, 0x41, 0x00])
            .unwrap();
        assert_eq!(header.raw, vec![0x48, 0x6B, 0x10]);
        assert_eq!(header.priority, Some(0x48));
        assert_eq!(header.addr_mode, Some(0x6B));
        assert_eq!(header.tx_id, Some(0x10));
        assert_eq!(header.rx_id, None);
    }

    #[test]
    fn test_can_29bit_header() {
        let proto = Protocol::iso15765_4();
        let header = proto
            .parse_header(&[0x18, 0xDA, 0xF1, 0x10, 0x06, 0x41, 0x00])
            .unwrap();
        assert_eq!(header.priority, Some(0x18));
        assert_eq!(header.addr_mode, Some(0xDA));
        assert_eq!(header.rx_id, Some(0xF1));
        assert_eq!(header.tx_id, Some(0x10));
    }

    #[test]
    fn test_can_11bit_physical_from_ecu() {
        // 7E8 left-padded to 4 bytes: ECU #1 responding to the tester
        let proto = Protocol::Iso15765_4 { id_bits: 11, baud: 500_000 };
        let header = proto.parse_header(&[0x00, 0x00, 0x07, 0xE8]).unwrap();
        assert_eq!(header.priority, Some(0x07));
        assert_eq!(header.addr_mode, Some(0xE0));
        assert_eq!(header.tx_id, Some(0x00));
        assert_eq!(header.rx_id, Some(0xF1));
    }

    #[test]
    fn test_can_11bit_functional_from_tester() {
        let proto = Protocol::Iso15765_4 { id_bits: 11, baud: 500_000 };
        let header = proto.parse_header(&[0x00, 0x00, 0x07, 0xDF]).unwrap();
        assert_eq!(header.addr_mode, Some(0xD0));
        assert_eq!(header.tx_id, Some(0xF1));
        assert_eq!(header.rx_id, Some(0x0F));
    }

    #[test]
    fn test_can_11bit_physical_to_ecu() {
        // 7E0: tester addressing ECU #0 physically (bit 3 clear)
        let proto = Protocol::Iso15765_4 { id_bits: 11, baud: 500_000 };
        let header = proto.parse_header(&[0x00, 0x00, 0x07, 0xE0]).unwrap();
        assert_eq!(header.tx_id, Some(0xF1));
        assert_eq!(header.rx_id, Some(0x00));
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(Protocol::iso15765_4().parse_header(&[0x18, 0xDA]).is_err());
    }
}
