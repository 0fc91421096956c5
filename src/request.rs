//! Requests sent to the vehicle via [`crate::interface::Interface`]

use serde::{Deserialize, Serialize};

/// A request to transmit on the OBD bus.
///
/// `Obd` requests address a service (and optionally one or more PIDs);
/// `Raw` requests pass arbitrary bytes through unchanged.  Per-protocol
/// framing is the interface's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Obd { sid: u8, pids: Vec<u8> },
    Raw(Vec<u8>),
}

impl Request {
    /// An OBD request with no PID (e.g. SID $03)
    pub fn sid(sid: u8) -> Self {
        Request::Obd { sid, pids: Vec::new() }
    }

    /// An OBD request with a single PID
    pub fn pid(sid: u8, pid: u8) -> Self {
        Request::Obd { sid, pids: vec![pid] }
    }

    /// An OBD request carrying several PIDs (ISO 15765 permits up to six)
    pub fn pids(sid: u8, pids: Vec<u8>) -> Self {
        Request::Obd { sid, pids }
    }

    pub fn raw(data: Vec<u8>) -> Self {
        Request::Raw(data)
    }

    /// The wire bytes for this request
    pub fn message(&self) -> Vec<u8> {
        match self {
            Request::Obd { sid, pids } => {
                let mut bytes = Vec::with_capacity(1 + pids.len());
                bytes.push(*sid);
                bytes.extend_from_slice(pids);
                bytes
            }
            Request::Raw(data) => data.clone(),
        }
    }
}
