//! Frame model and bus messages
//!
//! On ISO 15765 buses there is a clear distinction between frames
//! (individual packets on the bus) and messages (reassembled from the
//! frames).  Legacy buses technically have no frames, but SID $03 and $09
//! responses consist of multiple individual messages interpreted
//! collectively; those messages function as frames.  We consistently call
//! the individual packets "frames" and the reassembled, complete response
//! a "message".

use crate::error::{Error, Result};
use crate::protocol::{Header, Protocol};

/// Bit 6 of the SID distinguishes responses from requests
pub const OBD_RESPONSE_BIT: u8 = 0x40;

// ISO 15765 PCI frame types (high nibble of the first data byte)
const ISO15765_SF: u8 = 0x00; // single frame
const ISO15765_FF: u8 = 0x10; // first frame of a multi-frame message
const ISO15765_CF: u8 = 0x20; // consecutive frame

// Byte positions within legacy frame data
const SID: usize = 0;
const PID: usize = 1; // SID $09: INFTYP
const MC: usize = 2; // SID $09: MessageCount

/// SID $09 infotypes that carry a 1-based MessageCount byte used as the
/// frame sequence number.  VIN/IPT/ECUNAME have fixed frame counts; the
/// counts for CALID and CVN vary by vehicle.
fn sid09_fixed_count(infotype: u8) -> Option<usize> {
    match infotype {
        crate::sid09::infotype::VIN => Some(5),
        crate::sid09::infotype::IPT => Some(8),
        crate::sid09::infotype::ECUNAME => Some(5),
        _ => None,
    }
}

fn sid09_sequenced(infotype: u8) -> bool {
    use crate::sid09::infotype;
    matches!(
        infotype,
        infotype::VIN | infotype::CALID | infotype::CVN | infotype::IPT | infotype::ECUNAME
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    /// No reassembly; used by interfaces that reassemble internally
    Raw,
    Legacy,
    LegacySid03,
    LegacySid09,
    Iso15765,
}

/// A single frame parsed from the raw bytes emitted by the interface.
///
/// `data` excludes the header and, for legacy protocols, the trailing
/// checksum byte (which is retained separately).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub protocol: Protocol,
    pub header: Header,
    pub data: Vec<u8>,
    pub checksum: Option<u8>,
    kind: FrameKind,
}

impl Frame {
    /// Parse a raw frame under the given protocol, selecting the
    /// appropriate reassembly behavior.
    pub fn parse(protocol: Protocol, raw: &[u8]) -> Result<Frame> {
        let header = protocol.parse_header(raw)?;
        let body = &raw[header.raw.len()..];
        match protocol {
            Protocol::Iso15765_4 { .. } => {
                if body.is_empty() {
                    return Err(Error::Data(format!("empty ISO 15765 frame: {:02X?}", raw)));
                }
                if body[0] & 0xF0 == ISO15765_SF && body[0] & 0x0F > 7 {
                    return Err(Error::Data(format!(
                        "ISO 15765 single frame length > 7: {:02X?}",
                        raw
                    )));
                }
                Ok(Frame {
                    protocol,
                    header,
                    data: body.to_vec(),
                    checksum: None,
                    kind: FrameKind::Iso15765,
                })
            }
            Protocol::SaeJ1939 { .. } => Err(Error::Protocol(
                "SAE J1939 framing is not implemented".to_string(),
            )),
            _ => {
                // with headers on, the last byte of legacy frames is the
                // checksum
                if body.len() < 2 {
                    return Err(Error::Data(format!("legacy frame too short: {:02X?}", raw)));
                }
                let checksum = body[body.len() - 1];
                let data = body[..body.len() - 1].to_vec();
                let kind = match data[SID] & !OBD_RESPONSE_BIT {
                    0x03 | 0x07 => FrameKind::LegacySid03,
                    0x09 => {
                        if data.len() < 3 {
                            return Err(Error::Data(format!(
                                "SID $09 frame too short: {:02X?}",
                                raw
                            )));
                        }
                        FrameKind::LegacySid09
                    }
                    _ => FrameKind::Legacy,
                };
                Ok(Frame {
                    protocol,
                    header,
                    data,
                    checksum: Some(checksum),
                    kind,
                })
            }
        }
    }

    /// Encapsulate raw bytes in a frame that skips reassembly entirely.
    ///
    /// Interfaces that reassemble multi-frame messages themselves should
    /// use this instead of [`Frame::parse`].
    pub fn passthrough(protocol: Protocol, raw: &[u8]) -> Result<Frame> {
        let header = protocol.parse_header(raw)?;
        let data = raw[header.raw.len()..].to_vec();
        Ok(Frame {
            protocol,
            header,
            data,
            checksum: None,
            kind: FrameKind::Raw,
        })
    }

    /// Identify the logical message this frame belongs to.  The interface
    /// may receive interleaved frames belonging to different sequences.
    pub fn sequence_key(&self) -> Vec<u8> {
        let mut key = self.header.raw.clone();
        match self.kind {
            FrameKind::Raw | FrameKind::Iso15765 | FrameKind::Legacy => {}
            FrameKind::LegacySid03 => {
                // header + SID, so that independent responses from the
                // same ECU do not collide
                key.push(self.data[SID]);
            }
            FrameKind::LegacySid09 => {
                key.push(self.data[SID]);
                key.push(self.data[PID]);
            }
        }
        key
    }

    /// The 0-based position of this frame within its sequence, or `None`
    /// if there is no specified ordering.
    ///
    /// `last_sn` is the most recently seen sequence number; ISO 15765 only
    /// encodes 4 bits, so messages longer than 16 frames need it to
    /// resolve the wraparound.
    pub fn sequence_number(&self, last_sn: usize) -> Option<usize> {
        match self.kind {
            FrameKind::Raw | FrameKind::Legacy | FrameKind::LegacySid03 => None,
            FrameKind::Iso15765 => match self.data[0] & 0xF0 {
                ISO15765_SF | ISO15765_FF => Some(0),
                ISO15765_CF => {
                    // high order bits from last_sn, low order bits from
                    // the 4-bit PCI counter
                    let mut seq = (last_sn & !0x0F) + (self.data[0] & 0x0F) as usize;
                    // more than 7 behind means the counter wrapped
                    if seq + 7 < last_sn {
                        seq += 0x10;
                    }
                    Some(seq)
                }
                _ => None, // flow control and unknown PCI types
            },
            FrameKind::LegacySid09 => {
                if sid09_sequenced(self.data[PID]) {
                    // the MessageCount byte is a 1-based sequence number
                    (self.data[MC] as usize).checked_sub(1)
                } else {
                    None
                }
            }
        }
    }

    /// Expected total frame count for the sequence, or `None` when not
    /// statically known.
    pub fn sequence_length(&self) -> Option<usize> {
        match self.kind {
            FrameKind::Raw | FrameKind::Legacy => Some(1),
            FrameKind::LegacySid03 => None,
            FrameKind::LegacySid09 => {
                let infotype = self.data[PID];
                if let Some(count) = sid09_fixed_count(infotype) {
                    Some(count)
                } else if sid09_sequenced(infotype) {
                    None // CALID/CVN: variable number of frames
                } else {
                    Some(1) // MessageCount and support replies
                }
            }
            FrameKind::Iso15765 => {
                let total = self.data_length()?;
                if total <= 7 {
                    Some(1) // a single frame holds up to 7 bytes
                } else {
                    // 6 bytes in the first frame, 7 in consecutive frames
                    Some(total / 7 + 1)
                }
            }
        }
    }

    /// Number of data bytes in the complete, reassembled sequence, or
    /// `None` if this frame carries no such information.
    pub fn data_length(&self) -> Option<usize> {
        match self.kind {
            FrameKind::Raw | FrameKind::Legacy => Some(self.data.len()),
            FrameKind::LegacySid03 => None,
            FrameKind::LegacySid09 => {
                let infotype = self.data[PID];
                if let Some(frames) = sid09_fixed_count(infotype) {
                    // 4 data bytes per frame + SID/PID for the message
                    Some(frames * 4 + 2)
                } else if sid09_sequenced(infotype) {
                    None
                } else if infotype == crate::sid09::infotype::SUPPORT {
                    Some(6) // SID + PID + the 4-byte support bitmap
                } else {
                    Some(3) // SID + PID + MessageCount byte
                }
            }
            FrameKind::Iso15765 => {
                let pci = self.data[0];
                match pci & 0xF0 {
                    ISO15765_SF => Some((pci & 0x0F) as usize),
                    ISO15765_FF => self
                        .data
                        .get(1)
                        .map(|&b| (((pci & 0x0F) as usize) << 8) + b as usize),
                    _ => None,
                }
            }
        }
    }

    /// True for ISO 15765 Flow Control frames and other PCI types that
    /// take no part in reassembly.
    pub fn is_flow_control(&self) -> bool {
        self.kind == FrameKind::Iso15765 && self.data[0] & 0xF0 > ISO15765_CF
    }

    /// Concatenate the payload of an ordered frame sequence.
    ///
    /// The message-level prefix (SID, or SID+PID for SID $09) appears
    /// once; per-frame framing bytes are stripped; a missing frame
    /// contributes one placeholder per missing byte.
    pub fn assemble_message(&self, frames: &[Option<Frame>]) -> Vec<Option<u8>> {
        match self.kind {
            FrameKind::Raw | FrameKind::Legacy => {
                self.data.iter().map(|&b| Some(b)).collect()
            }
            FrameKind::Iso15765 => {
                let mut result = Vec::new();
                for (i, slot) in frames.iter().enumerate() {
                    // skip the PCI byte in SF/CF frames, both in a FF frame
                    let skip = if i == 0 && frames.len() > 1 { 2 } else { 1 };
                    match slot {
                        Some(frame) => result.extend(
                            frame.data.get(skip..).unwrap_or(&[]).iter().map(|&b| Some(b)),
                        ),
                        None => {
                            let missing = self.data.len().saturating_sub(skip);
                            result.extend(std::iter::repeat(None).take(missing));
                        }
                    }
                }
                result
            }
            FrameKind::LegacySid03 => {
                // the SID appears only once, at the front
                let mut result = vec![Some(self.data[SID])];
                for slot in frames {
                    match slot {
                        Some(frame) => result
                            .extend(frame.data.get(SID + 1..).unwrap_or(&[]).iter().map(|&b| Some(b))),
                        None => {
                            let missing = self.data.len().saturating_sub(SID + 1);
                            result.extend(std::iter::repeat(None).take(missing));
                        }
                    }
                }
                result
            }
            FrameKind::LegacySid09 => {
                if sid09_sequenced(self.data[PID]) {
                    // SID and PID appear only once; each frame then skips
                    // its SID/PID/MessageCount bytes
                    let mut result = vec![Some(self.data[SID]), Some(self.data[PID])];
                    for slot in frames {
                        match slot {
                            Some(frame) => result.extend(
                                frame.data.get(MC + 1..).unwrap_or(&[]).iter().map(|&b| Some(b)),
                            ),
                            None => {
                                let missing = self.data.len().saturating_sub(MC + 1);
                                result.extend(std::iter::repeat(None).take(missing));
                            }
                        }
                    }
                    result
                } else {
                    // MessageCount replies are single frames with no
                    // sequence number to strip
                    debug_assert_eq!(frames.len(), 1);
                    self.data.iter().map(|&b| Some(b)).collect()
                }
            }
        }
    }
}

/// A complete, reassembled message from the OBD bus.
///
/// `data` may contain `None` placeholders where frames were lost;
/// `incomplete` is set in that case.  A single ISO 15765 bus message may
/// carry multiple logical messages (see [`crate::response`]).
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub header: Header,
    pub data: Vec<Option<u8>>,
    pub frames: Vec<Option<Frame>>,
    pub protocol: Protocol,
    pub incomplete: bool,
}

impl BusMessage {
    pub fn new(
        header: Header,
        data: Vec<Option<u8>>,
        frames: Vec<Option<Frame>>,
        protocol: Protocol,
    ) -> Self {
        let incomplete = data.iter().any(Option::is_none);
        BusMessage {
            header,
            data,
            frames,
            protocol,
            incomplete,
        }
    }

    /// The SID, with the response bit masked off.
    pub fn sid(&self) -> Option<u8> {
        self.data.first().copied().flatten().map(|b| b & !OBD_RESPONSE_BIT)
    }

    /// Whether this message is an OBD response (as opposed to a request).
    pub fn is_response(&self) -> bool {
        matches!(self.data.first(), Some(Some(b)) if b & OBD_RESPONSE_BIT != 0)
    }

    /// The complete data bytes, or `None` if any placeholder is present.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.data.iter().copied().collect()
    }
}

impl std::fmt::Display for BusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.header)?;
        for b in &self.data {
            match b {
                Some(b) => write!(f, " {:02X}", b)?,
                None => write!(f, " --")?,
            }
        }
        Ok(())
    }
}
