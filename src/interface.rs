//! Public interface façade
//!
//! Ties the ELM driver, the reassembler, and the decoder registry into
//! the request/response cycle:
//!
//! ```no_run
//! use obdscan::{Interface, Request};
//!
//! # fn main() -> obdscan::Result<()> {
//! let mut interface = Interface::new("/dev/ttyUSB0")?;
//! interface.open()?;
//! interface.set_protocol(None)?;
//! interface.connect()?;
//! let responses = interface.send_request(&Request::pid(0x01, 0x0C))?;
//! interface.disconnect()?;
//! interface.close()?;
//! # Ok(())
//! # }
//! ```

use std::thread;
use std::time::Duration;

use crate::elm::{Elm327, StatusCallback};
use crate::error::{Error, Result};
use crate::frame::{BusMessage, Frame};
use crate::protocol::{KwpInit, Protocol};
use crate::reassembly::Reassembler;
use crate::request::Request;
use crate::response::{Registry, Response};

/// Two-phase confirmation guard for Service $04 (clear DTCs).
///
/// The first transmission attempt fails with a freshly generated token;
/// retrying with exactly that token consumes it and lets the request
/// through.  Tokens are single-use and do not survive a restart.
#[derive(Debug, Default)]
pub struct ResetGuard {
    token: Option<u32>,
}

impl ResetGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the caller's token against the outstanding one.  On any
    /// mismatch (including no outstanding token) a new token is issued
    /// via [`Error::ResetRequiresConfirmation`].
    pub fn verify(&mut self, token: Option<u32>) -> Result<()> {
        match (token, self.token) {
            (Some(given), Some(expected)) if given == expected => {
                self.token = None;
                Ok(())
            }
            _ => {
                let token = rand::random::<u32>();
                self.token = Some(token);
                Err(Error::ResetRequiresConfirmation { token })
            }
        }
    }

    pub fn clear(&mut self) {
        self.token = None;
    }
}

// (protocol, delay after a failed attempt) in robust-search order
const SEARCH_ORDER: [(Protocol, Duration); 9] = [
    (Protocol::J1850Pwm, Duration::from_millis(1_000)),
    (Protocol::J1850Vpw, Duration::ZERO),
    (Protocol::Iso9141_2, Duration::from_millis(5_000)),
    (Protocol::Iso14230_4(KwpInit::FiveBaud), Duration::from_millis(5_000)),
    (Protocol::Iso14230_4(KwpInit::Fast), Duration::ZERO),
    (Protocol::Iso15765_4 { id_bits: 11, baud: 500_000 }, Duration::ZERO),
    (Protocol::Iso15765_4 { id_bits: 29, baud: 500_000 }, Duration::ZERO),
    (Protocol::Iso15765_4 { id_bits: 11, baud: 250_000 }, Duration::ZERO),
    (Protocol::Iso15765_4 { id_bits: 29, baud: 250_000 }, Duration::ZERO),
];

/// An OBD-II interface attached through an ELM327-compatible scan tool.
///
/// Lifecycle: `new` → [`open`](Interface::open) →
/// [`set_protocol`](Interface::set_protocol) →
/// [`connect`](Interface::connect) → `send_request*` →
/// [`disconnect`](Interface::disconnect) → [`close`](Interface::close).
pub struct Interface {
    elm: Elm327,
    reassembler: Reassembler,
    registry: Registry,
    reset_guard: ResetGuard,
}

impl Interface {
    /// Attach to the scan tool on the named serial port.
    pub fn new(port_name: &str) -> Result<Self> {
        Ok(Interface {
            elm: Elm327::open_port(port_name)?,
            reassembler: Reassembler::new(),
            registry: Registry::with_standard_services(),
            reset_guard: ResetGuard::new(),
        })
    }

    /// Configure the scan tool for use (idempotent).
    pub fn open(&mut self) -> Result<()> {
        self.elm.open()
    }

    /// Release the scan tool.  In-flight reassembly state and any
    /// outstanding reset token are discarded.
    pub fn close(&mut self) -> Result<()> {
        self.reassembler.clear();
        self.reset_guard.clear();
        self.elm.close()
    }

    pub fn set_status_callback(&mut self, callback: Option<StatusCallback>) {
        self.elm.set_status_callback(callback);
    }

    /// Select the bus protocol for the next connect (`None` lets the
    /// scan tool search automatically).
    pub fn set_protocol(&mut self, protocol: Option<Protocol>) -> Result<()> {
        self.elm.set_protocol(protocol)
    }

    /// The protocol currently in use with the vehicle.
    pub fn protocol(&mut self) -> Result<Protocol> {
        self.elm.query_protocol()
    }

    /// Initiate the communication session and return the negotiated
    /// protocol.
    pub fn connect(&mut self) -> Result<Protocol> {
        let raw_frames = self.elm.connect_to_vehicle()?;
        // run the 0100 response through reassembly to catch bad data
        self.process_frames(&raw_frames)?;
        self.elm
            .protocol()
            .ok_or_else(|| Error::Interface("no protocol negotiated".to_string()))
    }

    /// Terminate the communication session with the vehicle.
    pub fn disconnect(&mut self) -> Result<()> {
        self.elm.disconnect_from_vehicle()
    }

    /// Try each protocol in the robust search order until the vehicle
    /// answers, sleeping the protocol-specific delay after each failed
    /// attempt.
    pub fn search_for_protocol(&mut self) -> Result<Protocol> {
        for (protocol, delay) in SEARCH_ORDER {
            self.elm
                .report_status(&format!("Trying {} protocol...", protocol));
            self.set_protocol(Some(protocol))?;
            match self.connect() {
                Ok(_) => return self.protocol(),
                Err(Error::Connection(message)) => {
                    log::debug!("{} ({}), delaying {:?}", message, protocol, delay);
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Protocol(
            "unable to determine vehicle protocol".to_string(),
        ))
    }

    // ------------------------------------------------------------------
    // Request transmission at the four result granularities
    // ------------------------------------------------------------------

    /// Send a request and return the decoded OBD responses (the default
    /// granularity).  Raises a data error if any response is incomplete.
    pub fn send_request(&mut self, request: &Request) -> Result<Vec<Response>> {
        self.send_request_confirmed(request, None)
    }

    /// Like [`send_request`](Interface::send_request), but carrying the
    /// confirmation token required by Service $04.
    pub fn send_request_confirmed(
        &mut self,
        request: &Request,
        token: Option<u32>,
    ) -> Result<Vec<Response>> {
        let raw_frames = self.transmit(request, token)?;
        let messages = self.process_frames(&raw_frames)?;
        let mut responses = Vec::with_capacity(messages.len());
        for message in &messages {
            if message.incomplete {
                return Err(Error::Data(format!("incomplete response: {}", message)));
            }
            responses.push(self.registry.create(message)?);
        }
        Ok(responses)
    }

    /// Send a request and return the reassembled bus messages.
    pub fn send_request_messages(&mut self, request: &Request) -> Result<Vec<BusMessage>> {
        let raw_frames = self.transmit(request, None)?;
        let messages = self.process_frames(&raw_frames)?;
        for message in &messages {
            if message.incomplete {
                return Err(Error::Data(format!("incomplete response: {}", message)));
            }
        }
        Ok(messages)
    }

    /// Send a request and return each received frame as raw bytes,
    /// skipping reassembly.
    pub fn send_request_raw(&mut self, request: &Request) -> Result<Vec<Vec<u8>>> {
        self.transmit(request, None)
    }

    /// Send a request and hand the raw frames to a caller-supplied
    /// transform.
    pub fn send_request_with<T>(
        &mut self,
        request: &Request,
        transform: impl FnOnce(&[Vec<u8>]) -> T,
    ) -> Result<T> {
        let raw_frames = self.transmit(request, None)?;
        Ok(transform(&raw_frames))
    }

    fn transmit(&mut self, request: &Request, token: Option<u32>) -> Result<Vec<Vec<u8>>> {
        let message = request.message();
        // the token check sits immediately before the bytes go on the
        // wire, so nothing can clear DTCs by accident
        if message.first() == Some(&0x04) {
            self.reset_guard.verify(token)?;
        }
        self.elm.send_obd(&message)
    }

    fn process_frames(&mut self, raw_frames: &[Vec<u8>]) -> Result<Vec<BusMessage>> {
        let protocol = self
            .elm
            .protocol()
            .ok_or_else(|| Error::Interface("no protocol negotiated".to_string()))?;
        for raw in raw_frames {
            self.reassembler.accept(Frame::parse(protocol, raw)?);
        }
        self.reassembler.flush();
        Ok(self.reassembler.drain())
    }

    /// The decoder registry, for registering custom response classes.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Direct access to the underlying scan tool driver (AT commands,
    /// baud rate negotiation).
    pub fn scan_tool_mut(&mut self) -> &mut Elm327 {
        &mut self.elm
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface").field("elm", &self.elm).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_guard_two_phase() {
        let mut guard = ResetGuard::new();
        let token = match guard.verify(None) {
            Err(Error::ResetRequiresConfirmation { token }) => token,
            other => panic!("expected confirmation request, got {:?}", other),
        };
        // the matching token is accepted exactly once
        guard.verify(Some(token)).unwrap();
        assert!(matches!(
            guard.verify(Some(token)),
            Err(Error::ResetRequiresConfirmation { .. })
        ));
    }

    #[test]
    fn test_reset_guard_rejects_wrong_token() {
        let mut guard = ResetGuard::new();
        let first = match guard.verify(None) {
            Err(Error::ResetRequiresConfirmation { token }) => token,
            other => panic!("expected confirmation request, got {:?}", other),
        };
        let second = match guard.verify(Some(first.wrapping_add(1))) {
            Err(Error::ResetRequiresConfirmation { token }) => token,
            other => panic!("expected confirmation request, got {:?}", other),
        };
        // a fresh token is issued on each failed attempt
        assert_ne!(first, second);
        // the superseded token no longer matches
        assert!(guard.verify(Some(first)).is_err());
        guard.verify(Some(second)).unwrap_err(); // second was replaced too
    }

    #[test]
    fn test_reset_guard_clear_forgets_token() {
        let mut guard = ResetGuard::new();
        let token = match guard.verify(None) {
            Err(Error::ResetRequiresConfirmation { token }) => token,
            other => panic!("expected confirmation request, got {:?}", other),
        };
        guard.clear();
        assert!(matches!(
            guard.verify(Some(token)),
            Err(Error::ResetRequiresConfirmation { .. })
        ));
    }
}
