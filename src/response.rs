//! Response decoder registry and factory
//!
//! A two-level index maps the SID to either a PID-keyed table or a plain
//! request/response decoder pair.  Registration is explicit; overriding
//! a built-in decoder requires an explicit opt-in.  Dispatch is through
//! plain function pointers.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::frame::BusMessage;
use crate::protocol::Protocol;
use crate::sid01::{self, MonitorReport, PidSupport};
use crate::sid03::{self, Dtc};
use crate::sid09;
use crate::value::Value;

/// Context handed to a decoder: the complete bus message bytes and the
/// position at which the logical payload begins (after SID, and PID
/// when the service uses one).
pub struct DecodeContext<'a> {
    pub protocol: Protocol,
    pub bytes: &'a [u8],
    pub offset: usize,
    pub sid: u8,
    pub pid: Option<u8>,
}

impl<'a> DecodeContext<'a> {
    /// The logical payload: everything after the SID/PID prefix.
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[self.offset.min(self.bytes.len())..]
    }
}

/// Decoder function registered for a (SID, PID, direction) triple
pub type DecodeFn = fn(&DecodeContext) -> Result<Payload>;

/// The decoded content of a logical OBD message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Payload {
    PidSupport(PidSupport),
    MonitorStatus(MonitorReport),
    Values(Vec<Value>),
    Dtcs(Vec<Dtc>),
    Vin(String),
    CalibrationIds(Vec<String>),
    /// Calibration verification numbers, rendered as 8 hex digits
    CalibrationVerification(Vec<u32>),
    EcuName {
        ecu: String,
        name: String,
    },
    MessageCount {
        label: String,
        count: u8,
    },
    /// In-use performance tracking counters
    Ipt(Vec<Value>),
    /// No decoder registered; the raw logical payload
    Raw(Vec<u8>),
}

/// One decoded logical message carved from a bus message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub sid: u8,
    pub pid: Option<u8>,
    /// Data bytes following the SID/PID prefix
    pub data: Vec<u8>,
    pub payload: Payload,
}

impl Response {
    pub fn length(&self) -> usize {
        self.data.len()
    }
}

// Either a plain [request, response] pair or a PID-keyed table; mixing
// the two styles for one SID is a registration error.
enum SidTable {
    Plain([Option<DecodeFn>; 2]),
    ByPid(HashMap<u8, [Option<DecodeFn>; 2]>),
}

/// Maps (SID, PID, direction) to the decoder for that message kind.
pub struct Registry {
    tables: HashMap<u8, SidTable>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_standard_services()
    }
}

impl Registry {
    /// An empty registry with no decoders.
    pub fn new() -> Self {
        Registry {
            tables: HashMap::new(),
        }
    }

    /// A registry with decoders for the standard SID $01/$03/$07/$09
    /// services.
    pub fn with_standard_services() -> Self {
        let mut registry = Registry::new();
        registry
            .register_builtins()
            .expect("builtin decoder registration is conflict-free");
        registry
    }

    fn register_builtins(&mut self) -> Result<()> {
        for base in (0x00u8..=0xE0).step_by(0x20) {
            self.register(0x01, Some(base), true, sid01::decode_pid_support, false)?;
        }
        self.register(0x01, Some(0x01), true, sid01::decode_monitor_status, false)?;
        for pid in sid01::scalar_pids() {
            self.register(0x01, Some(pid), true, sid01::decode_scalar, false)?;
        }

        self.register(0x03, None, true, sid03::decode_dtcs, false)?;
        self.register(0x07, None, true, sid03::decode_dtcs, false)?;

        self.register(0x09, Some(sid09::infotype::SUPPORT), true, sid01::decode_pid_support, false)?;
        for mc in [
            sid09::infotype::MC_VIN,
            sid09::infotype::MC_CALID,
            sid09::infotype::MC_CVN,
            sid09::infotype::MC_IPT,
            sid09::infotype::MC_ECUNAME,
        ] {
            self.register(0x09, Some(mc), true, sid09::decode_message_count, false)?;
        }
        self.register(0x09, Some(sid09::infotype::VIN), true, sid09::decode_vin, false)?;
        self.register(0x09, Some(sid09::infotype::CALID), true, sid09::decode_calid, false)?;
        self.register(0x09, Some(sid09::infotype::CVN), true, sid09::decode_cvn, false)?;
        self.register(0x09, Some(sid09::infotype::IPT), true, sid09::decode_ipt, false)?;
        self.register(0x09, Some(sid09::infotype::ECUNAME), true, sid09::decode_ecu_name, false)?;
        self.register(0x09, Some(sid09::infotype::IPT2), true, sid09::decode_diesel_ipt, false)?;
        Ok(())
    }

    /// Register a decoder for messages of the given SID and PID.
    ///
    /// `response` selects the direction (request or response).  Set
    /// `override_existing` to intentionally replace a registered
    /// decoder; without it, replacing is an error so that accidental
    /// overrides are caught.
    pub fn register(
        &mut self,
        sid: u8,
        pid: Option<u8>,
        response: bool,
        decode: DecodeFn,
        override_existing: bool,
    ) -> Result<()> {
        let table = self.tables.entry(sid).or_insert_with(|| match pid {
            Some(_) => SidTable::ByPid(HashMap::new()),
            None => SidTable::Plain([None, None]),
        });
        let slot = match (table, pid) {
            (SidTable::Plain(pair), None) => &mut pair[response as usize],
            (SidTable::ByPid(map), Some(pid)) => {
                &mut map.entry(pid).or_insert([None, None])[response as usize]
            }
            (SidTable::Plain(_), Some(_)) => {
                return Err(Error::Registration(format!(
                    "SID ${:02X} is registered without PIDs",
                    sid
                )))
            }
            (SidTable::ByPid(_), None) => {
                return Err(Error::Registration(format!(
                    "SID ${:02X} is registered with PIDs",
                    sid
                )))
            }
        };
        if slot.is_some() && !override_existing {
            return Err(Error::Registration(format!(
                "decoder already registered for SID ${:02X} PID {:?}",
                sid, pid
            )));
        }
        *slot = Some(decode);
        Ok(())
    }

    /// Build the typed response for a complete bus message.
    pub fn create(&self, bus_message: &BusMessage) -> Result<Response> {
        self.create_at(bus_message, 1)
    }

    /// Build a typed response for the logical message starting at
    /// `offset` (the PID position).  ISO 15765 permits several logical
    /// messages in one bus message; callers carving them out invoke
    /// this with increasing offsets.
    pub fn create_at(&self, bus_message: &BusMessage, offset: usize) -> Result<Response> {
        let bytes = bus_message.bytes().ok_or_else(|| {
            Error::Data(format!("incomplete bus message: {}", bus_message))
        })?;
        if bytes.is_empty() {
            return Err(Error::Data("empty bus message".to_string()));
        }
        let sid = bytes[0] & !crate::frame::OBD_RESPONSE_BIT;
        let is_response = bytes[0] & crate::frame::OBD_RESPONSE_BIT != 0;
        let mut offset = offset;
        let mut pid = None;

        let decode = match self.tables.get(&sid) {
            Some(SidTable::Plain(pair)) => pair[is_response as usize],
            Some(SidTable::ByPid(map)) => {
                // for PID-keyed services the byte at the offset is the PID
                let p = *bytes.get(offset).ok_or_else(|| {
                    Error::Data(format!("message too short for SID ${:02X} PID", sid))
                })?;
                offset += 1;
                pid = Some(p);
                map.get(&p).and_then(|pair| pair[is_response as usize])
            }
            None => None,
        };

        let ctx = DecodeContext {
            protocol: bus_message.protocol,
            bytes: &bytes,
            offset,
            sid,
            pid,
        };
        let payload = match decode {
            Some(decode) => decode(&ctx)?,
            None => Payload::Raw(ctx.payload().to_vec()),
        };
        Ok(Response {
            sid,
            pid,
            data: ctx.payload().to_vec(),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    fn bus_message(bytes: &[u8]) -> BusMessage {
        let protocol = Protocol::iso15765_4();
        let mut raw = vec![0x18, 0xDA, 0xF1, 0x10];
        raw.extend_from_slice(bytes);
        let frame = Frame::passthrough(protocol, &raw).unwrap();
        let data = frame.assemble_message(std::slice::from_ref(&Some(frame.clone())));
        BusMessage::new(frame.header.clone(), data, vec![Some(frame)], protocol)
    }

    #[test]
    fn test_dispatch_by_sid_and_pid() {
        let registry = Registry::with_standard_services();
        let response = registry.create(&bus_message(&[0x41, 0x0D, 0x63])).unwrap();
        assert_eq!(response.sid, 0x01);
        assert_eq!(response.pid, Some(0x0D));
        assert!(matches!(response.payload, Payload::Values(_)));
        assert_eq!(response.data, vec![0x63]);
    }

    #[test]
    fn test_dispatch_sid_without_pid() {
        let registry = Registry::with_standard_services();
        let response = registry
            .create(&bus_message(&[0x43, 0x01, 0x01, 0x43]))
            .unwrap();
        assert_eq!(response.sid, 0x03);
        assert_eq!(response.pid, None);
        match response.payload {
            Payload::Dtcs(dtcs) => assert_eq!(dtcs[0].code(), "P0143"),
            other => panic!("expected DTCs, got {:?}", other),
        }
    }

    #[test]
    fn test_unregistered_yields_raw() {
        let registry = Registry::with_standard_services();
        // SID $3F is not a standard service
        let response = registry.create(&bus_message(&[0x7F, 0x12, 0x34])).unwrap();
        assert!(matches!(response.payload, Payload::Raw(_)));
        // unregistered PID within a registered SID
        let response = registry.create(&bus_message(&[0x41, 0x7E, 0x00])).unwrap();
        assert_eq!(response.pid, Some(0x7E));
        assert_eq!(response.payload, Payload::Raw(vec![0x00]));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = Registry::with_standard_services();
        let err = registry
            .register(0x01, Some(0x0C), true, sid01::decode_scalar, false)
            .unwrap_err();
        assert!(matches!(err, Error::Registration(_)));
        // explicit override is allowed
        registry
            .register(0x01, Some(0x0C), true, sid01::decode_scalar, true)
            .unwrap();
    }

    #[test]
    fn test_registration_style_mismatch_rejected() {
        let mut registry = Registry::with_standard_services();
        assert!(registry
            .register(0x03, Some(0x01), true, sid03::decode_dtcs, false)
            .is_err());
        assert!(registry
            .register(0x01, None, true, sid03::decode_dtcs, false)
            .is_err());
    }

    #[test]
    fn test_incomplete_message_rejected() {
        let registry = Registry::with_standard_services();
        let mut msg = bus_message(&[0x41, 0x0D, 0x63]);
        msg.data[2] = None;
        msg.incomplete = true;
        assert!(matches!(registry.create(&msg), Err(Error::Data(_))));
    }

    #[test]
    fn test_multiple_logical_messages() {
        // two logical responses in one ISO 15765 bus message
        let registry = Registry::with_standard_services();
        let msg = bus_message(&[0x41, 0x0D, 0x63, 0x05, 0x7B]);
        let first = registry.create(&msg).unwrap();
        assert_eq!(first.pid, Some(0x0D));
        let second = registry.create_at(&msg, 3).unwrap();
        assert_eq!(second.pid, Some(0x05));
        match second.payload {
            Payload::Values(values) => {
                assert_eq!(values[0].label, "ECT");
                assert_eq!(values[0].quantity.as_f64(), Some(83.0));
            }
            other => panic!("expected values, got {:?}", other),
        }
    }
}
