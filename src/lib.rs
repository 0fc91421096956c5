//! OBD-II diagnostics over ELM327-compatible scan tools
//!
//! This library drives an ELM327-family scan tool attached via a serial
//! port: it selects one of the supported vehicle bus protocols, runs the
//! request/response cycle with the vehicle's ECUs, reassembles the
//! interleaved multi-frame bus traffic, and decodes the payloads into
//! structured diagnostic values (readiness monitors, DTCs, VIN, scalar
//! PIDs with engineering units).
//!
//! ```no_run
//! use obdscan::{Interface, Payload, Request};
//!
//! # fn main() -> obdscan::Result<()> {
//! let mut interface = Interface::new("/dev/ttyUSB0")?;
//! interface.open()?;
//! interface.set_protocol(None)?;
//! let protocol = interface.connect()?;
//! println!("connected via {}", protocol);
//!
//! for response in interface.send_request(&Request::pid(0x01, 0x01))? {
//!     if let Payload::MonitorStatus(report) = response.payload {
//!         print!("{}", report.emissions_status());
//!     }
//! }
//!
//! interface.disconnect()?;
//! interface.close()?;
//! # Ok(())
//! # }
//! ```

pub mod elm;
pub mod error;
pub mod frame;
pub mod interface;
pub mod protocol;
pub mod reassembly;
pub mod request;
pub mod response;
pub mod serial;
pub mod sid01;
pub mod sid03;
pub mod sid09;
pub mod value;

#[cfg(test)]
mod integration_tests;

pub use elm::Elm327;
pub use error::{Error, Result};
pub use frame::{BusMessage, Frame};
pub use interface::{Interface, ResetGuard};
pub use protocol::{Header, KwpInit, Protocol};
pub use reassembly::Reassembler;
pub use request::Request;
pub use response::{Payload, Registry, Response};
pub use sid01::{MonitorReport, MonitorStatus, PidSupport};
pub use sid03::Dtc;
pub use value::{Quantity, Value};
