//! Engineering values extracted from OBD responses
//!
//! Every decoded quantity is a labelled [`Value`].  The [`Quantity`]
//! variants carry the metric figure; display rendering derives the
//! common imperial forms (deg F, mph, miles, PSI) where drivers expect
//! them.

use serde::Serialize;

/// A labelled engineering value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Value {
    pub label: String,
    pub quantity: Quantity,
}

impl Value {
    pub fn new(label: impl Into<String>, quantity: Quantity) -> Self {
        Value {
            label: label.into(),
            quantity,
        }
    }
}

/// The decoded quantity and its units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Quantity {
    /// Dimensionless or odd-unit scalars (lambda, MAF g/s, ...)
    Scalar {
        value: f64,
        units: Option<&'static str>,
    },
    /// Stored as a fraction; displayed as a percentage
    Percentage(f64),
    /// Degrees Celsius
    Temperature(f64),
    /// km/h
    Velocity(f64),
    /// 1/min
    Rpm(f64),
    /// kPa
    Pressure(f64),
    /// Seconds
    Duration(f64),
    /// Kilometres
    Distance(f64),
    /// Volts
    Voltage(f64),
    /// Milliamps
    Current(f64),
    /// Degrees (ignition timing)
    Timing(f64),
    /// NO/YES
    Boolean(bool),
    /// OFF/ON
    OnOff(bool),
    /// Named flags plus any bits that matched no known flag
    Bitfield {
        flags: Vec<&'static str>,
        residue: u8,
    },
    /// Mapped to text when known, falling back to the raw integer
    Enumeration {
        text: Option<&'static str>,
        raw: u8,
    },
    Text(String),
    /// e.g. calibration IDs
    TextList(Vec<String>),
    /// Rendered as 8 uppercase hex digits (CVNs)
    HexList(Vec<u32>),
    /// Monitoring counters
    Count(u32),
}

impl Quantity {
    pub fn units(&self) -> Option<&'static str> {
        match self {
            Quantity::Scalar { units, .. } => *units,
            Quantity::Percentage(_) => Some("%"),
            Quantity::Temperature(_) => Some("deg C"),
            Quantity::Velocity(_) => Some("km/h"),
            Quantity::Rpm(_) => Some("1/min"),
            Quantity::Pressure(_) => Some("kPa"),
            Quantity::Duration(_) => Some("sec"),
            Quantity::Distance(_) => Some("km"),
            Quantity::Voltage(_) => Some("V"),
            Quantity::Current(_) => Some("mA"),
            Quantity::Timing(_) => Some("deg"),
            Quantity::Count(_) => Some("counts"),
            _ => None,
        }
    }

    /// The numeric figure, where one exists.  Percentages are returned
    /// as fractions.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Quantity::Scalar { value, .. }
            | Quantity::Percentage(value)
            | Quantity::Temperature(value)
            | Quantity::Velocity(value)
            | Quantity::Rpm(value)
            | Quantity::Pressure(value)
            | Quantity::Duration(value)
            | Quantity::Distance(value)
            | Quantity::Voltage(value)
            | Quantity::Current(value)
            | Quantity::Timing(value) => Some(*value),
            Quantity::Count(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Percentages scaled to 0..100
    pub fn percent(&self) -> Option<f64> {
        match self {
            Quantity::Percentage(fraction) => Some(fraction * 100.0),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Quantity::Boolean(b) | Quantity::OnOff(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Quantity::Text(s) => Some(s),
            Quantity::Enumeration { text: Some(s), .. } => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.quantity {
            Quantity::Scalar { value, units } => {
                write!(f, "{}={}", self.label, value)?;
                if let Some(units) = units {
                    write!(f, " {}", units)?;
                }
                Ok(())
            }
            Quantity::Percentage(fraction) => {
                write!(f, "{}={:.1}%", self.label, fraction * 100.0)
            }
            Quantity::Temperature(celsius) => write!(
                f,
                "{}={:.0} deg C ({:.0} deg F)",
                self.label,
                celsius,
                celsius * 1.8 + 32.0
            ),
            Quantity::Velocity(kmh) => write!(
                f,
                "{}={:.0} km/h ({:.0} mph)",
                self.label,
                kmh,
                kmh / 1.609344
            ),
            Quantity::Rpm(rpm) => write!(f, "{}={:.0} 1/min", self.label, rpm),
            Quantity::Pressure(kpa) => write!(
                f,
                "{}={:.1} kPa ({:.1} PSI)",
                self.label,
                kpa,
                kpa * 0.145_037_7
            ),
            Quantity::Duration(sec) => write!(f, "{}={:.0} sec", self.label, sec),
            Quantity::Distance(km) => write!(
                f,
                "{}={:.0} km ({:.0} miles)",
                self.label,
                km,
                km / 1.609344
            ),
            Quantity::Voltage(volts) => write!(f, "{}={:.2} V", self.label, volts),
            Quantity::Current(ma) => write!(f, "{}={:.2} mA", self.label, ma),
            Quantity::Timing(deg) => write!(f, "{}={:.1} deg", self.label, deg),
            Quantity::Boolean(b) => {
                write!(f, "{}={}", self.label, if *b { "YES" } else { "NO" })
            }
            Quantity::OnOff(b) => {
                write!(f, "{}={}", self.label, if *b { "ON" } else { "OFF" })
            }
            Quantity::Bitfield { flags, residue } => {
                write!(f, "{}={}", self.label, flags.join(","))?;
                if *residue != 0 {
                    if !flags.is_empty() {
                        write!(f, ",")?;
                    }
                    write!(f, "{:#04X}", residue)?;
                }
                Ok(())
            }
            Quantity::Enumeration { text, raw } => match text {
                Some(text) => write!(f, "{}={}", self.label, text),
                None => write!(f, "{}={}", self.label, raw),
            },
            Quantity::Text(s) => write!(f, "{}={}", self.label, s),
            Quantity::TextList(items) => write!(f, "{}={}", self.label, items.join(",")),
            Quantity::HexList(items) => {
                let rendered: Vec<String> =
                    items.iter().map(|v| format!("{:08X}", v)).collect();
                write!(f, "{}={}", self.label, rendered.join(","))
            }
            Quantity::Count(n) => write!(f, "{}={} counts", self.label, n),
        }
    }
}

/// Convert response bytes to ASCII, dropping NUL padding.
pub fn decode_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

/// Big-endian integer from up to four response bytes.
pub fn decode_integer(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

/// Decode a raw byte against a mask table into named flags plus the
/// residue of unknown bits.
pub fn decode_bitfield(raw: u8, fields: &[(u8, &'static str)]) -> Quantity {
    let mut flags = Vec::new();
    let mut residue = raw;
    for &(mask, name) in fields {
        if residue & mask == mask {
            flags.push(name);
            residue &= !mask;
        }
    }
    Quantity::Bitfield { flags, residue }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_string_strips_nuls() {
        assert_eq!(decode_string(&[0x00, 0x00, 0x41, 0x42, 0x00]), "AB");
        assert_eq!(decode_string(b"1G1JC5444R7252367"), "1G1JC5444R7252367");
    }

    #[test]
    fn test_decode_integer_big_endian() {
        assert_eq!(decode_integer(&[0x12]), 0x12);
        assert_eq!(decode_integer(&[0x1A, 0xF8]), 0x1AF8);
        assert_eq!(decode_integer(&[0xDE, 0xAD, 0xBE, 0xEF]), 0xDEAD_BEEF);
    }

    #[test]
    fn test_decode_bitfield() {
        const FIELDS: &[(u8, &str)] = &[(0x01, "OL"), (0x02, "CL"), (0x04, "OL-Drive")];
        match decode_bitfield(0x05, FIELDS) {
            Quantity::Bitfield { flags, residue } => {
                assert_eq!(flags, vec!["OL", "OL-Drive"]);
                assert_eq!(residue, 0);
            }
            _ => unreachable!(),
        }
        match decode_bitfield(0x81, FIELDS) {
            Quantity::Bitfield { flags, residue } => {
                assert_eq!(flags, vec!["OL"]);
                assert_eq!(residue, 0x80);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_display_formats() {
        let v = Value::new("ECT", Quantity::Temperature(-40.0));
        assert_eq!(v.to_string(), "ECT=-40 deg C (-40 deg F)");
        let v = Value::new("VSS", Quantity::Velocity(255.0));
        assert_eq!(v.to_string(), "VSS=255 km/h (158 mph)");
        let v = Value::new("LOAD_PCT", Quantity::Percentage(1.0));
        assert_eq!(v.to_string(), "LOAD_PCT=100.0%");
        let v = Value::new("MIL", Quantity::OnOff(false));
        assert_eq!(v.to_string(), "MIL=OFF");
    }
}
