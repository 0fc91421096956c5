//! ELM327 driver
//!
//! Speaks the ELM ASCII dialect over a serial link: AT commands, baud
//! rate detection, the vehicle connect sequence with its mixed
//! status/data lines, and conversion of response lines into raw byte
//! frames.

use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{KwpInit, Protocol};
use crate::serial::SerialLink;

/// The ELM command prompt
pub const PROMPT: &str = ">";

/// Overall budget for one OBD request/response cycle
pub const OBD_REQUEST_TIMEOUT: Duration = Duration::from_millis(9_900);

const OBD_POLL_INTERVAL: Duration = Duration::from_secs(3);
const AT_TIMEOUT: Duration = Duration::from_millis(130);
const ATZ_SETTLE: Duration = Duration::from_millis(1_500);
const BAUD_DETECT_TIMEOUT: Duration = Duration::from_millis(30);
const BAUD_CONFIRM_TIMEOUT: Duration = Duration::from_millis(100);

// The two boot bauds first, then fastest to slowest: anyone running a
// slow rate is less picky about how long detection takes.
const BAUD_CANDIDATES: [u32; 6] = [38_400, 9_600, 230_400, 115_200, 57_600, 19_200];

/// Called with human-readable progress messages during long operations
pub type StatusCallback = Box<dyn FnMut(&str) + Send>;

/// Driver for an ELM327-compatible scan tool.
pub struct Elm327 {
    port: SerialLink,
    identifier: String,
    status_callback: Option<StatusCallback>,
    current_status: Option<String>,
    interface_configured: bool,
    connected_to_vehicle: bool,
    vehicle_protocol: Option<Protocol>,
    // cached ATDPN reply, used to detect a silent protocol change
    protocol_response: Option<String>,
}

impl Elm327 {
    /// Open the serial port, lock onto the interface's baud rate, and
    /// verify that an ELM327-compatible chip is answering.
    pub fn open_port(port_name: &str) -> Result<Self> {
        let mut port = SerialLink::open(port_name)?;
        let baud = Self::detect_baudrate(&mut port)?.ok_or_else(|| {
            Error::Interface("unable to connect to ELM; does it have power?".to_string())
        })?;

        let mut identifier = Self::static_at_cmd(&mut port, "ATI", None)?;
        // echo may still be on at this point
        if let Some(rest) = identifier.strip_prefix("ATI\r") {
            identifier = rest.to_string();
        }
        // interfaces with the extended ST command set identify there
        let mut extended = Self::static_at_cmd(&mut port, "STI", None)?;
        if let Some(rest) = extended.strip_prefix("STI\r") {
            extended = rest.to_string();
        }
        if extended != "?" {
            identifier = extended;
        } else if !identifier.starts_with("ELM327") {
            if identifier.starts_with("ELM32") {
                return Err(Error::Interface(format!(
                    "only ELM327-compatible interfaces are supported, found {:?}",
                    identifier
                )));
            }
            return Err(Error::Interface(format!(
                "unknown response to ATI: {:?}",
                identifier
            )));
        }

        log::debug!("{} detected on {} at {} baud", identifier, port.name(), baud);
        Ok(Elm327 {
            port,
            identifier,
            status_callback: None,
            current_status: None,
            interface_configured: false,
            connected_to_vehicle: false,
            vehicle_protocol: None,
            protocol_response: None,
        })
    }

    /// Detect, select, and return the baud rate at which the attached
    /// interface is operating, or `None` if no rate answered.
    pub fn detect_baudrate(port: &mut SerialLink) -> Result<Option<u32>> {
        for &baud in &BAUD_CANDIDATES {
            port.set_baud_rate(baud)?;
            port.clear_rx()?;
            port.clear_tx()?;

            // A nonsense command elicits a prompt (an empty command
            // would repeat the previous, possibly dangerous, command).
            // The first character may be eaten if the interface was
            // busy, so send a second one.
            port.write(b"\x7F\x7F\r")?;
            port.set_timeout(BAUD_DETECT_TIMEOUT, None)?;
            match port.read_until(PROMPT) {
                Ok(response) if response.ends_with("\r\r>") => {
                    log::debug!("{} baud detected", baud);
                    return Ok(Some(baud));
                }
                Ok(_) => continue,
                Err(e) if e.is_timeout() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The protocol negotiated with the vehicle, once connected
    pub fn protocol(&self) -> Option<Protocol> {
        self.vehicle_protocol
    }

    pub fn is_connected(&self) -> bool {
        self.connected_to_vehicle
    }

    pub fn set_status_callback(&mut self, callback: Option<StatusCallback>) {
        self.status_callback = callback;
    }

    pub(crate) fn report_status(&mut self, message: &str) {
        self.status(message);
    }

    fn status(&mut self, message: &str) {
        // suppress duplicate updates
        if self.current_status.as_deref() == Some(message) {
            return;
        }
        self.current_status = Some(message.to_string());
        log::info!("status: {}", message);
        if let Some(callback) = self.status_callback.as_mut() {
            callback(message);
        }
    }

    // ------------------------------------------------------------------
    // AT command plumbing
    // ------------------------------------------------------------------

    fn static_at_cmd(
        port: &mut SerialLink,
        cmd: &str,
        timeout: Option<Duration>,
    ) -> Result<String> {
        port.write(format!("{}\r", cmd).as_bytes())?;
        port.set_timeout(timeout.unwrap_or(AT_TIMEOUT), None)?;
        Self::read_until_prompt(port)
    }

    /// Send an AT (or ST) command and return the stripped response.
    pub fn at_cmd(&mut self, cmd: &str) -> Result<String> {
        self.at_cmd_with_timeout(cmd, None)
    }

    pub fn at_cmd_with_timeout(
        &mut self,
        cmd: &str,
        timeout: Option<Duration>,
    ) -> Result<String> {
        debug_assert!(self.interface_configured);
        Self::static_at_cmd(&mut self.port, cmd, timeout)
    }

    fn read_until_prompt(port: &mut SerialLink) -> Result<String> {
        let mut response = port.read_until(PROMPT)?;
        if response.ends_with(PROMPT) {
            response.truncate(response.len() - PROMPT.len());
        }
        let response = response.trim_matches('\r').to_string();
        // a STOPPED banner means we interrupted the previous operation
        if response.starts_with("STOPPED") {
            return Err(Error::InterfaceBusy(response));
        }
        Ok(response)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Configure the scan tool for use.
    ///
    /// This does not touch the vehicle; see
    /// [`Elm327::connect_to_vehicle`].  Idempotent; a partial failure
    /// leaves the interface unconfigured so the call can be retried.
    pub fn open(&mut self) -> Result<()> {
        if self.interface_configured {
            return Ok(());
        }
        // set optimistically so at_cmd is usable during setup
        self.interface_configured = true;
        let result = self.configure();
        self.interface_configured = result.is_ok();
        result
    }

    fn configure(&mut self) -> Result<()> {
        self.reset(true)?;
        self.at_cmd("ATE0")?; // echo off
        self.at_cmd("ATL0")?; // linefeeds off
        self.at_cmd("ATH1")?; // headers on
        Ok(())
    }

    /// Reset the scan tool: warm (`quick`) via ATWS, or a full ATZ with
    /// a settle delay and baud re-probe (the rate may change).
    pub fn reset(&mut self, quick: bool) -> Result<()> {
        if quick {
            self.at_cmd("ATWS")?;
        } else {
            self.port.write(b"ATZ\r")?;
            thread::sleep(ATZ_SETTLE);
            // ignore any garbage received at the wrong baud rate
            self.port.clear_rx()?;
            let baud = Self::detect_baudrate(&mut self.port)?;
            log::debug!("baud after reset = {:?}", baud);
        }
        Ok(())
    }

    /// Release the scan tool.  Resets it fully so the next user finds
    /// it in its boot state; the serial port closes on drop.
    pub fn close(&mut self) -> Result<()> {
        if !self.interface_configured {
            return Ok(());
        }
        self.reset(false)?;
        self.interface_configured = false;
        self.connected_to_vehicle = false;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Vehicle session
    // ------------------------------------------------------------------

    /// Initiate a communication session with the vehicle and return the
    /// raw frames of the initial 0100 response.
    ///
    /// This may take several seconds, particularly during automatic
    /// protocol detection; progress is reported through the status
    /// callback.
    pub fn connect_to_vehicle(&mut self) -> Result<Vec<Vec<u8>>> {
        self.current_status = None;
        self.open()?;
        if self.connected_to_vehicle {
            return Err(Error::CommandNotSupported(
                "already connected to vehicle".to_string(),
            ));
        }
        self.protocol_response = None;

        self.status("Connecting to vehicle...");
        // Service $01 PID $00 is mandatory on every OBD-II vehicle
        self.port.write(b"0100\r")?;
        self.port.set_timeout(OBD_REQUEST_TIMEOUT, None)?;

        // Read one complete line, surfacing transient status prefixes
        let mut line = String::new();
        let mut status_line = false;
        while !line.ends_with('\r') {
            match self.port.read_until("") {
                Ok(chunk) => line.push_str(&chunk),
                Err(Error::ReadTimeout { partial }) => {
                    return Err(Error::Interface(format!(
                        "vehicle connect timed out: {:?}",
                        format!("{}{}", line, partial)
                    )))
                }
                Err(e) => return Err(e),
            }
            if !status_line {
                if line.starts_with("SEARCHING...") {
                    status_line = true;
                    self.status("Searching for protocol...");
                } else if line.starts_with("BUS INIT: ") {
                    status_line = true;
                    self.status("Initializing bus...");
                }
            }
            if status_line && line == "SEARCHING...\r" {
                // the next line carries the error or the OBD response
                status_line = false;
                line.clear();
            }
        }

        // Terminal connection failures; drain to the prompt first
        let trimmed = line.trim_end_matches('\r');
        let failure = if trimmed.starts_with("STOPPED") {
            Some(Error::InterfaceBusy(trimmed.to_string()))
        } else if trimmed.ends_with("UNABLE TO CONNECT") || trimmed.ends_with("ERROR") {
            Some(Error::Connection(trimmed.to_string()))
        } else if trimmed.starts_with("BUS INIT: ") && !trimmed.ends_with("OK") {
            Some(Error::Connection(trimmed.to_string()))
        } else if trimmed == "NO DATA" {
            // probably not SAE J1850
            Some(Error::Connection(trimmed.to_string()))
        } else {
            None
        };
        if let Some(error) = failure {
            let _ = Self::read_until_prompt(&mut self.port);
            return Err(error);
        }

        // Read the actual OBD response, swallowing any status line
        let previous = if status_line { String::new() } else { line };
        let lines = self.read_response(&previous)?;
        log::debug!("connect result: {:?}", lines);

        self.connected_to_vehicle = true;
        let protocol = self.query_protocol()?;
        self.vehicle_protocol = Some(protocol);

        message_bytes_from_ascii(&lines)
    }

    /// Terminate the communication session with the vehicle.
    pub fn disconnect_from_vehicle(&mut self) -> Result<()> {
        if !self.connected_to_vehicle {
            return Err(Error::CommandNotSupported(
                "already disconnected from vehicle".to_string(),
            ));
        }
        self.at_cmd("ATPC")?;
        self.connected_to_vehicle = false;
        Ok(())
    }

    /// Select the protocol to try on the next connect, or `None` for
    /// the interface's automatic search.  Disconnects any session in
    /// progress.
    pub fn set_protocol(&mut self, protocol: Option<Protocol>) -> Result<()> {
        self.open()?;
        if self.connected_to_vehicle {
            self.disconnect_from_vehicle()?;
        }
        let code = code_for_protocol(protocol)
            .ok_or_else(|| Error::Protocol(format!("unsupported protocol: {:?}", protocol)))?;
        self.at_cmd(&format!("ATTP {}", code))?;
        Ok(())
    }

    /// Ask the interface which protocol is in use and verify it has not
    /// changed out from under us.
    pub fn query_protocol(&mut self) -> Result<Protocol> {
        if !self.connected_to_vehicle {
            return Err(Error::CommandNotSupported(
                "not connected to vehicle".to_string(),
            ));
        }
        let mut response = self.at_cmd("ATDPN")?;
        // suppress the "automatic" prefix
        if response.len() > 1 && response.starts_with('A') {
            response.remove(0);
        }
        let protocol = protocol_for_code(&response)
            .ok_or_else(|| Error::Interface(format!("unknown protocol {:?}", response)))?;
        let protocol = protocol.ok_or_else(|| {
            Error::Interface("protocol not negotiated by interface".to_string())
        })?;
        match &self.protocol_response {
            None => self.protocol_response = Some(response),
            Some(cached) if *cached != response => {
                log::warn!(
                    "protocol changed unexpectedly ({:?} -> {:?})",
                    cached,
                    response
                );
                return Err(Error::Interface("protocol changed unexpectedly".to_string()));
            }
            Some(_) => {}
        }
        Ok(protocol)
    }

    /// Transmit an OBD message and return the raw byte frames of the
    /// response.
    pub fn send_obd(&mut self, message: &[u8]) -> Result<Vec<Vec<u8>>> {
        debug_assert!(self.interface_configured);
        debug_assert!(self.connected_to_vehicle);
        let hex: Vec<String> = message.iter().map(|b| format!("{:02X}", b)).collect();
        self.port.write(format!("{}\r", hex.join(" ")).as_bytes())?;
        self.port
            .set_timeout(OBD_REQUEST_TIMEOUT, Some(OBD_POLL_INTERVAL))?;
        let lines = self.read_response("")?;
        message_bytes_from_ascii(&lines)
    }

    fn read_response(&mut self, previous: &str) -> Result<Vec<String>> {
        let rest = Self::read_until_prompt(&mut self.port)?;
        parse_response_lines(&format!("{}{}", previous, rest))
    }

    // ------------------------------------------------------------------
    // Baud rate negotiation (ATBRD)
    // ------------------------------------------------------------------

    /// Change the baud rate between computer and scan tool.
    ///
    /// Reverts to the old rate if the interface fails any step of the
    /// ATBRD handshake.
    pub fn set_baudrate(&mut self, new_baud: u32) -> Result<()> {
        self.open()?;
        let old_baud = self.port.baud_rate()?;

        let divisor = (4_000_000.0 / new_baud as f64).round() as i64;
        if !(8..=255).contains(&divisor) {
            // limits specified on p.46 of the ELM327 datasheet
            return Err(Error::Interface(format!(
                "baud rate {} out of range for ELM",
                new_baud
            )));
        }

        // BRD echoes the ATI string to confirm the new rate works
        let identifier = self.at_cmd("ATI")?;

        self.port
            .write(format!("ATBRD {:02X}\r", divisor).as_bytes())?;
        self.port.set_timeout(AT_TIMEOUT, None)?;
        let response = match self.port.read_until("OK\r") {
            Ok(response) => response,
            Err(e) if e.is_timeout() => e.partial_response().unwrap_or_default().to_string(),
            Err(e) => return Err(e),
        };
        if !response.ends_with("OK\r") {
            return Err(Error::CommandNotSupported(format!(
                "scan tool does not support ATBRD; staying at {}",
                old_baud
            )));
        }

        match self.confirm_baudrate(new_baud, &identifier) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.port.set_baud_rate(old_baud)?;
                Err(Error::Interface(format!("{}; reverted to {}", e, old_baud)))
            }
        }
    }

    fn confirm_baudrate(&mut self, new_baud: u32, identifier: &str) -> Result<()> {
        self.port.set_baud_rate(new_baud)?;

        // the interface retransmits its identity at the new rate
        self.port.set_timeout(BAUD_CONFIRM_TIMEOUT, None)?;
        let response = self.port.read_until("\r")?;
        if response.trim_end_matches('\r') != identifier {
            return Err(Error::Interface(format!("test of {} baud failed", new_baud)));
        }

        // a CR within the window makes the change stick
        self.port.write(b"\r")?;
        self.port.set_timeout(BAUD_CONFIRM_TIMEOUT, None)?;
        let response = self.port.read_until(PROMPT)?;
        if !response.ends_with("OK\r\r>") {
            return Err(Error::Interface(format!(
                "scan tool failed to confirm {} baud",
                new_baud
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Elm327 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Elm327")
            .field("identifier", &self.identifier)
            .field("port", &self.port)
            .field("configured", &self.interface_configured)
            .field("connected", &self.connected_to_vehicle)
            .finish()
    }
}

// ----------------------------------------------------------------------
// Response line handling
// ----------------------------------------------------------------------

/// Split a raw ELM response into its non-empty lines, raising the
/// appropriate error for any failure line.
pub fn parse_response_lines(response: &str) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in response.trim_matches('\r').split('\r') {
        check_line(line)?;
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}

fn check_line(line: &str) -> Result<()> {
    if line == "?" {
        return Err(Error::CommandNotSupported("?".to_string()));
    }
    if line == "NO DATA" {
        return Err(Error::Data(line.to_string()));
    }
    if line.ends_with("BUS BUSY") || line.ends_with("DATA ERROR") {
        return Err(Error::Data(line.to_string()));
    }
    if line.ends_with("BUS ERROR") || line.ends_with("FB ERROR") || line.ends_with("LV RESET") {
        return Err(Error::Bus(line.to_string()));
    }
    if line.ends_with("CAN ERROR") || line.ends_with("RX ERROR") {
        return Err(Error::Protocol(line.to_string()));
    }
    if line.ends_with("BUFFER FULL") {
        return Err(Error::BufferOverflow);
    }
    if line.contains("<DATA ERROR") {
        return Err(Error::Data(line.to_string()));
    }
    if let Some(code) = find_elm_error(line) {
        if code == "ERR94" {
            // ERR94 is a fatal CAN error per p.52-53 of the datasheet
            return Err(Error::Bus(line.to_string()));
        }
        return Err(Error::Elm { code });
    }
    Ok(())
}

// Scan for an "ERRnn" internal error code
fn find_elm_error(line: &str) -> Option<String> {
    let bytes = line.as_bytes();
    for i in 0..bytes.len().saturating_sub(4) {
        if &bytes[i..i + 3] == b"ERR"
            && bytes[i + 3].is_ascii_digit()
            && bytes[i + 4].is_ascii_digit()
        {
            return Some(line[i..i + 5].to_string());
        }
    }
    None
}

/// Convert ASCII response lines into raw byte frames.
///
/// Odd-length lines are left-padded with five zero nibbles, which pads
/// 3-nibble 11-bit CAN headers out to the 4-byte form (the ELM already
/// does this for 29-bit headers).
pub fn message_bytes_from_ascii(lines: &[String]) -> Result<Vec<Vec<u8>>> {
    let mut messages = Vec::with_capacity(lines.len());
    for line in lines {
        let hex: String = line.chars().filter(|&c| c != ' ').collect();
        if hex.is_empty() {
            continue;
        }
        let hex = if hex.len() % 2 == 1 {
            format!("00000{}", hex)
        } else {
            hex
        };
        let mut raw = Vec::with_capacity(hex.len() / 2);
        for i in (0..hex.len()).step_by(2) {
            let byte = u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| Error::Data(format!("unparseable response line: {:?}", line)))?;
            raw.push(byte);
        }
        messages.push(raw);
    }
    Ok(messages)
}

// ----------------------------------------------------------------------
// ELM protocol numbering (ATTP / ATDPN)
// ----------------------------------------------------------------------

/// Map an ELM protocol code to its descriptor.
///
/// Returns `None` for unknown codes; `Some(None)` is the interface's
/// automatic search.
pub fn protocol_for_code(code: &str) -> Option<Option<Protocol>> {
    let protocol = match code {
        "0" => None, // automatic search; fast but not universal
        "1" => Some(Protocol::J1850Pwm),
        "2" => Some(Protocol::J1850Vpw),
        "3" => Some(Protocol::Iso9141_2),
        "4" => Some(Protocol::Iso14230_4(KwpInit::FiveBaud)),
        "5" => Some(Protocol::Iso14230_4(KwpInit::Fast)),
        "6" => Some(Protocol::Iso15765_4 { id_bits: 11, baud: 500_000 }),
        "7" => Some(Protocol::Iso15765_4 { id_bits: 29, baud: 500_000 }),
        "8" => Some(Protocol::Iso15765_4 { id_bits: 11, baud: 250_000 }),
        "9" => Some(Protocol::Iso15765_4 { id_bits: 29, baud: 250_000 }),
        "A" => Some(Protocol::SaeJ1939 { id_bits: 29, baud: 250_000 }),
        _ => return None,
    };
    Some(protocol)
}

/// The ELM code for a protocol (`None` = automatic search).
pub fn code_for_protocol(protocol: Option<Protocol>) -> Option<&'static str> {
    let code = match protocol {
        None => "0",
        Some(Protocol::J1850Pwm) => "1",
        Some(Protocol::J1850Vpw) => "2",
        Some(Protocol::Iso9141_2) => "3",
        Some(Protocol::Iso14230_4(KwpInit::FiveBaud)) => "4",
        Some(Protocol::Iso14230_4(KwpInit::Fast)) => "5",
        Some(Protocol::Iso15765_4 { id_bits: 11, baud: 500_000 }) => "6",
        Some(Protocol::Iso15765_4 { id_bits: 29, baud: 500_000 }) => "7",
        Some(Protocol::Iso15765_4 { id_bits: 11, baud: 250_000 }) => "8",
        Some(Protocol::Iso15765_4 { id_bits: 29, baud: 250_000 }) => "9",
        Some(Protocol::SaeJ1939 { id_bits: 29, baud: 250_000 }) => "A",
        _ => return None,
    };
    Some(code)
}

/// All protocols this driver can ask the interface for.
pub fn supported_protocols() -> Vec<Option<Protocol>> {
    ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "A"]
        .iter()
        .filter_map(|code| protocol_for_code(code))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_lines_splits_and_trims() {
        let lines = parse_response_lines("\r41 00 BE 1F B8 10\r41 00 80 00 00 01\r").unwrap();
        assert_eq!(lines, vec!["41 00 BE 1F B8 10", "41 00 80 00 00 01"]);
        assert!(parse_response_lines("").unwrap().is_empty());
    }

    #[test]
    fn test_error_line_taxonomy() {
        assert!(matches!(
            parse_response_lines("?"),
            Err(Error::CommandNotSupported(_))
        ));
        assert!(matches!(parse_response_lines("NO DATA"), Err(Error::Data(_))));
        assert!(matches!(parse_response_lines("BUS BUSY"), Err(Error::Data(_))));
        assert!(matches!(
            parse_response_lines("41 00 <DATA ERROR"),
            Err(Error::Data(_))
        ));
        assert!(matches!(parse_response_lines("BUS ERROR"), Err(Error::Bus(_))));
        assert!(matches!(parse_response_lines("FB ERROR"), Err(Error::Bus(_))));
        assert!(matches!(parse_response_lines("LV RESET"), Err(Error::Bus(_))));
        assert!(matches!(
            parse_response_lines("CAN ERROR"),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            parse_response_lines("RX ERROR"),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            parse_response_lines("BUFFER FULL"),
            Err(Error::BufferOverflow)
        ));
    }

    #[test]
    fn test_internal_elm_errors() {
        match parse_response_lines("ERR42") {
            Err(Error::Elm { code }) => assert_eq!(code, "ERR42"),
            other => panic!("expected ELM error, got {:?}", other),
        }
        // ERR94 is specifically a fatal CAN bus error
        assert!(matches!(parse_response_lines("ERR94"), Err(Error::Bus(_))));
        // a data line is not an error
        assert!(parse_response_lines("41 0C 1A F8").is_ok());
    }

    #[test]
    fn test_message_bytes_even_line() {
        let frames =
            message_bytes_from_ascii(&["48 6B 10 41 00 BE 1F B8 10 C9".to_string()]).unwrap();
        assert_eq!(
            frames,
            vec![vec![0x48, 0x6B, 0x10, 0x41, 0x00, 0xBE, 0x1F, 0xB8, 0x10, 0xC9]]
        );
    }

    #[test]
    fn test_message_bytes_pads_11bit_headers() {
        // 3-nibble header: odd digit count gets five zero nibbles
        let frames = message_bytes_from_ascii(&["7E8 06 41 00 BE 1F B8 10".to_string()]).unwrap();
        assert_eq!(
            frames,
            vec![vec![0x00, 0x00, 0x07, 0xE8, 0x06, 0x41, 0x00, 0xBE, 0x1F, 0xB8, 0x10]]
        );
        // the high five nibbles are zero
        assert_eq!(frames[0][0], 0x00);
        assert_eq!(frames[0][1], 0x00);
        assert_eq!(frames[0][2] & 0xF0, 0x00);
    }

    #[test]
    fn test_message_bytes_bad_hex() {
        assert!(matches!(
            message_bytes_from_ascii(&["SEARCHING...".to_string()]),
            Err(Error::Data(_))
        ));
    }

    #[test]
    fn test_protocol_code_round_trip() {
        for code in ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "A"] {
            let protocol = protocol_for_code(code).unwrap();
            assert_eq!(code_for_protocol(protocol), Some(code));
        }
        assert_eq!(protocol_for_code("Z"), None);
        assert_eq!(
            code_for_protocol(Some(Protocol::Iso15765_4 { id_bits: 29, baud: 125_000 })),
            None
        );
    }

    #[test]
    fn test_find_elm_error_scanning() {
        assert_eq!(find_elm_error("FOO ERR23 BAR"), Some("ERR23".to_string()));
        assert_eq!(find_elm_error("ERRXX"), None);
        assert_eq!(find_elm_error("ERR9"), None);
        assert_eq!(find_elm_error(""), None);
    }
}
