//! Error types for scan tool and vehicle communication
//!
//! Errors fall into three groups: interface errors (between the computer
//! and the scan tool, generally retriable), vehicle errors (between the
//! scan tool and the ECU), and timeouts (which carry whatever partial
//! response accumulated).

use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // ------------------------------------------------------------------
    // Interface errors: computer <-> scan tool
    // ------------------------------------------------------------------
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error communicating with scan tool: {0}")]
    Interface(String),

    #[error("command not supported by scan tool: {0}")]
    CommandNotSupported(String),

    #[error("no scan tool found")]
    InterfaceNotFound,

    /// The previous interface command was interrupted ("STOPPED")
    #[error("scan tool was processing a previous command: {0}")]
    InterfaceBusy(String),

    /// Internal ELM error code, e.g. "ERR42"
    #[error("internal ELM error {code}; contact interface vendor")]
    Elm { code: String },

    #[error("decoder registration conflict: {0}")]
    Registration(String),

    // ------------------------------------------------------------------
    // Timeouts
    // ------------------------------------------------------------------
    /// A polling interval passed without receiving any data
    #[error("no data within polling interval (partial response: {partial:?})")]
    IntervalTimeout { partial: String },

    /// The overall read deadline expired
    #[error("read deadline exceeded (partial response: {partial:?})")]
    ReadTimeout { partial: String },

    // ------------------------------------------------------------------
    // Reset confirmation (not a failure; the expected first step of a
    // two-phase Service $04 reset)
    // ------------------------------------------------------------------
    #[error("clearing DTCs requires confirmation token {token:#010X}")]
    ResetRequiresConfirmation { token: u32 },

    // ------------------------------------------------------------------
    // Vehicle errors: scan tool <-> ECU
    // ------------------------------------------------------------------
    #[error("unable to establish a connection with the vehicle: {0}")]
    Connection(String),

    /// Errors on the OBD bus usually caused by wiring problems
    #[error("probable wiring error: {0}")]
    Bus(String),

    /// Errors on the OBD bus usually caused by configuration problems
    #[error("bus protocol error: {0}")]
    Protocol(String),

    /// Generally transient data errors
    #[error("data error in vehicle response: {0}")]
    Data(String),

    /// The vehicle transmits faster than the scan tool can forward
    #[error("scan tool receive buffer overflow")]
    BufferOverflow,

    /// OBD responses that fail J1699 conformance tests
    #[error("response failed J1699 conformance: {0}")]
    J1699(String),
}

impl Error {
    /// True for faults between the computer and the scan tool.
    pub fn is_interface_error(&self) -> bool {
        matches!(
            self,
            Error::Serial(_)
                | Error::Io(_)
                | Error::Interface(_)
                | Error::CommandNotSupported(_)
                | Error::InterfaceNotFound
                | Error::InterfaceBusy(_)
                | Error::Elm { .. }
        )
    }

    /// True for faults between the scan tool and the vehicle.
    pub fn is_vehicle_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Bus(_)
                | Error::Protocol(_)
                | Error::Data(_)
                | Error::BufferOverflow
                | Error::J1699(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::IntervalTimeout { .. } | Error::ReadTimeout { .. }
        )
    }

    /// The partial response captured by a timeout, if any.
    pub fn partial_response(&self) -> Option<&str> {
        match self {
            Error::IntervalTimeout { partial } | Error::ReadTimeout { partial } => {
                Some(partial.as_str())
            }
            _ => None,
        }
    }
}
