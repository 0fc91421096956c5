//! Service $01 (Request Current Powertrain Diagnostic Data) decoding
//!
//! Covers the PID-supported bitmaps, the readiness monitor status report
//! (PID $01), and the scalar PIDs with their engineering-unit formulas.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::response::{DecodeContext, Payload};
use crate::value::{decode_bitfield, decode_integer, Quantity, Value};

// ---------------------------------------------------------------------
// PID $00, $20, $40, $60, $80, $A0, $C0, $E0 (and SID $09 INFTYP $00)
// ---------------------------------------------------------------------

/// Which PIDs in the window `base+1 ..= base+0x20` the ECU supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PidSupport {
    pub base: u8,
    pub supported: Vec<u8>,
}

impl PidSupport {
    pub fn is_supported(&self, pid: u8) -> bool {
        self.supported.contains(&pid)
    }
}

pub(crate) fn decode_pid_support(ctx: &DecodeContext) -> Result<Payload> {
    let base = ctx
        .pid
        .ok_or_else(|| Error::Data("PID-support response without a PID".to_string()))?;
    if base & 0x1F != 0 {
        return Err(Error::Data(format!(
            "PID-support request on non-window PID ${:02X}",
            base
        )));
    }
    let payload = ctx.payload();
    if payload.len() < 4 {
        return Err(Error::Data(format!(
            "PID-support response shorter than 4 bytes: {:02X?}",
            payload
        )));
    }
    let bits = decode_integer(&payload[..4]);
    let mut supported = Vec::new();
    for pid_bit in 1u8..=32 {
        // bit (32 - k) announces PID base + k
        if bits & (1 << (32 - pid_bit as u32)) != 0 {
            supported.push(base + pid_bit);
        }
    }
    Ok(Payload::PidSupport(PidSupport { base, supported }))
}

// ---------------------------------------------------------------------
// PID $01: monitor status since DTCs cleared
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorStatus {
    NotSupported,
    Ready,
    NotReady,
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MonitorStatus::NotSupported => "Not Supported",
            MonitorStatus::Ready => "Ready",
            MonitorStatus::NotReady => "Not Ready",
        };
        write!(f, "{}", s)
    }
}

/// One system monitor self-test.
///
/// `ready` only applies when the test is supported by the vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorTest {
    pub key: &'static str,
    pub name: &'static str,
    pub supported: bool,
    pub ready: bool,
}

impl MonitorTest {
    pub fn status(&self) -> MonitorStatus {
        if !self.supported {
            MonitorStatus::NotSupported
        } else if self.ready {
            MonitorStatus::Ready
        } else {
            MonitorStatus::NotReady
        }
    }
}

// (key, name, support bit, ready bit); support/ready bits index into
// bytes B (continuous) or C/D (non-continuous).  The ready bits are
// inverted on the wire: 0 = ready.
const CONTINUOUS_MONITORS: &[(&str, &str, u8, u8)] = &[
    ("misfire", "Misfire", 0, 4),
    ("fuel_system", "Fuel System", 1, 5),
    ("components", "Components", 2, 6),
];

const SPARK_MONITORS: &[(&str, &str, u8, u8)] = &[
    ("catalyst", "Catalyst", 0, 0),
    ("catalyst_heater", "Catalyst Heater", 1, 1),
    ("evap", "Evaporative System", 2, 2),
    ("secondary_air", "Secondary Air System", 3, 3),
    ("ac", "A/C System", 4, 4),
    ("o2", "O2 Sensor", 5, 5),
    ("o2_heater", "O2 Sensor Heater", 6, 6),
    ("egr", "Exhaust Gas Recirculation (EGR)", 7, 7),
];

const DIESEL_MONITORS: &[(&str, &str, u8, u8)] = &[
    ("nmhc_catalyst", "NMHC Catalyst", 0, 0),
    ("nox", "NOx Aftertreatment", 1, 1),
    ("egs", "Exhaust Gas Sensor", 5, 5),
    ("pm_filter", "PM Filter", 6, 6),
    ("egr", "Exhaust Gas Recirculation (EGR)", 7, 7),
];

// Spark-ignition flag labels for bytes C (support) and D (ready)
const SPARK_FLAGS: &[(&str, &str, u8)] = &[
    ("CAT_SUP", "CAT_RDY", 0),
    ("HCAT_SUP", "HCAT_RDY", 1),
    ("EVAP_SUP", "EVAP_RDY", 2),
    ("AIR_SUP", "AIR_RDY", 3),
    ("ACRF_SUP", "ACRF_RDY", 4),
    ("O2S_SUP", "O2S_RDY", 5),
    ("HTR_SUP", "HTR_RDY", 6),
    ("EGR_SUP", "EGR_RDY", 7),
];

// Compression-ignition labels; bits 2 and 4 are reserved
const DIESEL_FLAGS: &[(&str, &str, u8)] = &[
    ("HCCATSUP", "HCCATRDY", 0),
    ("NCAT_SUP", "NCAT_RDY", 1),
    ("BP_SUP", "BP_RDY", 3),
    ("EGS_SUP", "EGS_RDY", 5),
    ("PM_SUP", "PM_RDY", 6),
    ("EGR_SUP", "EGR_RDY", 7),
];

/// Decoded response to a Service $01 PID $01 request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    /// Whether the Malfunction Indicator Light is commanded on
    pub mil: bool,
    /// Number of stored Diagnostic Trouble Codes
    pub dtc_count: u8,
    /// Compression-ignition monitor definitions in effect (bit B3)
    pub diesel: bool,
    pub monitors: Vec<MonitorTest>,
    /// The raw flag values, labelled as in SAE J1979
    pub values: Vec<Value>,
}

impl MonitorReport {
    pub fn monitor(&self, key: &str) -> Option<&MonitorTest> {
        self.monitors.iter().find(|m| m.key == key)
    }

    /// A string approximating state inspection readiness results: the
    /// status of each non-continuous monitor, one per line.
    pub fn emissions_status(&self) -> String {
        let mut out = String::new();
        for monitor in &self.monitors {
            if CONTINUOUS_MONITORS.iter().any(|&(key, ..)| key == monitor.key) {
                continue;
            }
            out.push_str(&format!(
                "{:<40} {}\n",
                format!("{} Monitor", monitor.name),
                monitor.status()
            ));
        }
        out
    }

    /// Keys of the monitors the vehicle supports.
    pub fn supported_monitors(&self) -> Vec<&'static str> {
        self.monitors
            .iter()
            .filter(|m| m.status() != MonitorStatus::NotSupported)
            .map(|m| m.key)
            .collect()
    }

    /// Keys of the supported monitors that have not completed.
    pub fn incomplete_monitors(&self) -> Vec<&'static str> {
        self.monitors
            .iter()
            .filter(|m| m.status() == MonitorStatus::NotReady)
            .map(|m| m.key)
            .collect()
    }
}

pub(crate) fn decode_monitor_status(ctx: &DecodeContext) -> Result<Payload> {
    let payload = ctx.payload();
    if payload.len() < 4 {
        return Err(Error::Data(format!(
            "monitor status response shorter than 4 bytes: {:02X?}",
            payload
        )));
    }
    let (a, b, c, d) = (payload[0], payload[1], payload[2], payload[3]);

    let dtc_count = a & 0x7F;
    let mil = a & 0x80 != 0;
    // bit B3 selects spark vs. compression ignition (diesel) monitors
    let diesel = b & 0x08 != 0;

    let mut values = vec![
        Value::new("DTC_CNT", Quantity::Scalar { value: dtc_count as f64, units: None }),
        Value::new("MIL", Quantity::OnOff(mil)),
    ];
    let mut monitors = Vec::new();

    for &(key, name, sup_bit, rdy_bit) in CONTINUOUS_MONITORS {
        let supported = b & (1 << sup_bit) != 0;
        let ready = b & (1 << rdy_bit) == 0; // 0 = ready
        monitors.push(MonitorTest { key, name, supported, ready });
    }
    values.push(Value::new("MIS_SUP", Quantity::Boolean(b & 0x01 != 0)));
    values.push(Value::new("FUEL_SUP", Quantity::Boolean(b & 0x02 != 0)));
    values.push(Value::new("CCM_SUP", Quantity::Boolean(b & 0x04 != 0)));
    values.push(Value::new("MIS_RDY", Quantity::Boolean(b & 0x10 == 0)));
    values.push(Value::new("FUEL_RDY", Quantity::Boolean(b & 0x20 == 0)));
    values.push(Value::new("CCM_RDY", Quantity::Boolean(b & 0x40 == 0)));

    let (monitor_defs, flag_defs) = if diesel {
        (DIESEL_MONITORS, DIESEL_FLAGS)
    } else {
        (SPARK_MONITORS, SPARK_FLAGS)
    };
    for &(key, name, sup_bit, rdy_bit) in monitor_defs {
        let supported = c & (1 << sup_bit) != 0;
        let ready = d & (1 << rdy_bit) == 0;
        monitors.push(MonitorTest { key, name, supported, ready });
    }
    for &(sup_label, _, bit) in flag_defs {
        values.push(Value::new(sup_label, Quantity::Boolean(c & (1 << bit) != 0)));
    }
    for &(_, rdy_label, bit) in flag_defs {
        values.push(Value::new(rdy_label, Quantity::Boolean(d & (1 << bit) == 0)));
    }

    Ok(Payload::MonitorStatus(MonitorReport {
        mil,
        dtc_count,
        diesel,
        monitors,
        values,
    }))
}

// ---------------------------------------------------------------------
// Scalar PIDs
// ---------------------------------------------------------------------

/// Where a factory reads its raw integer from within the payload
#[derive(Debug, Clone, Copy)]
enum Field {
    Byte(usize),
    /// Big-endian 16-bit word starting at the index
    Word(usize),
}

struct ValueFactory {
    label: String,
    field: Field,
    build: fn(u32) -> Quantity,
}

fn byte(label: impl Into<String>, index: usize, build: fn(u32) -> Quantity) -> ValueFactory {
    ValueFactory { label: label.into(), field: Field::Byte(index), build }
}

fn word(label: impl Into<String>, index: usize, build: fn(u32) -> Quantity) -> ValueFactory {
    ValueFactory { label: label.into(), field: Field::Word(index), build }
}

struct ScalarSpec {
    /// Fixed payload length, or `None` when derived from the data
    length: Option<usize>,
    factories: Vec<ValueFactory>,
}

// Conversion formulas, SAE J1979 Appendix B

fn positive_percentage(raw: u32) -> Quantity {
    Quantity::Percentage(raw as f64 / 255.0)
}

fn fuel_trim(raw: u32) -> Quantity {
    Quantity::Percentage(raw as f64 / 128.0 - 1.0)
}

fn low_temperature(raw: u32) -> Quantity {
    Quantity::Temperature(raw as f64 - 40.0)
}

fn engine_rpm(raw: u32) -> Quantity {
    Quantity::Rpm(raw as f64 / 4.0)
}

fn vehicle_speed(raw: u32) -> Quantity {
    Quantity::Velocity(raw as f64)
}

fn ignition_timing(raw: u32) -> Quantity {
    Quantity::Timing((raw as f64 - 128.0) * 0.5)
}

fn air_flow(raw: u32) -> Quantity {
    Quantity::Scalar { value: raw as f64 / 100.0, units: Some("g/s") }
}

fn pressure(raw: u32) -> Quantity {
    Quantity::Pressure(raw as f64)
}

fn pressure_x3(raw: u32) -> Quantity {
    Quantity::Pressure(raw as f64 * 3.0)
}

fn pressure_x10(raw: u32) -> Quantity {
    Quantity::Pressure(raw as f64 * 10.0)
}

fn pressure_x0_079(raw: u32) -> Quantity {
    Quantity::Pressure(raw as f64 * 0.079)
}

fn o2_voltage(raw: u32) -> Quantity {
    Quantity::Voltage(raw as f64 * 0.005)
}

fn o2_lambda(raw: u32) -> Quantity {
    Quantity::Scalar { value: raw as f64 * 0.000_030_5, units: None }
}

fn o2_wide_voltage(raw: u32) -> Quantity {
    Quantity::Voltage(raw as f64 * 8.0 / 65535.0)
}

fn o2_current(raw: u32) -> Quantity {
    Quantity::Current(raw as f64 * 128.0 / 32768.0 - 128.0)
}

fn module_voltage(raw: u32) -> Quantity {
    Quantity::Voltage(raw as f64 / 1000.0)
}

fn runtime(raw: u32) -> Quantity {
    Quantity::Duration(raw as f64)
}

fn mil_distance(raw: u32) -> Quantity {
    Quantity::Distance(raw as f64)
}

const FUEL_SYSTEM_FIELDS: &[(u8, &str)] = &[
    (0x01, "OL"),
    (0x02, "CL"),
    (0x04, "OL-Drive"),
    (0x08, "OL-Fault"),
    (0x10, "CL-Fault"),
];

fn fuel_system_status(raw: u32) -> Quantity {
    decode_bitfield(raw as u8, FUEL_SYSTEM_FIELDS)
}

const O2S_LOCATION_2BANK: &[(u8, &str)] = &[
    (0x01, "O2S11"),
    (0x02, "O2S12"),
    (0x04, "O2S13"),
    (0x08, "O2S14"),
    (0x10, "O2S21"),
    (0x20, "O2S22"),
    (0x40, "O2S23"),
    (0x80, "O2S24"),
];

fn o2s_location_2bank(raw: u32) -> Quantity {
    decode_bitfield(raw as u8, O2S_LOCATION_2BANK)
}

const O2S_LOCATION_4BANK: &[(u8, &str)] = &[
    (0x01, "O2S11"),
    (0x02, "O2S12"),
    (0x04, "O2S21"),
    (0x08, "O2S22"),
    (0x10, "O2S31"),
    (0x20, "O2S32"),
    (0x40, "O2S41"),
    (0x80, "O2S42"),
];

fn o2s_location_4bank(raw: u32) -> Quantity {
    decode_bitfield(raw as u8, O2S_LOCATION_4BANK)
}

fn obd_support(raw: u32) -> Quantity {
    let text = match raw {
        0x01 => Some("OBD II"),
        0x02 => Some("OBD"),
        0x03 => Some("OBD and OBD II"),
        0x04 => Some("OBD I"),
        0x05 => Some("NO OBD"),
        0x06 => Some("EOBD"),
        0x07 => Some("EOBD and OBD II"),
        0x08 => Some("EOBD and OBD"),
        0x09 => Some("EOBD, OBD, and OBD II"),
        0x0A => Some("JOBD"),
        0x0B => Some("JOBD and OBD II"),
        0x0C => Some("JOBD and EOBD"),
        0x0D => Some("JOBD, EOBD, and OBD II"),
        0x11 => Some("EMD"),
        0x12 => Some("EMD+"),
        0x13 => Some("HD OBD-C"),
        0x14 => Some("HD OBD"),
        0x15 => Some("WWH OBD"),
        0x17 => Some("HD EOBD-I"),
        0x18 => Some("HD EOBD-I N"),
        0x19 => Some("HD EOBD-II"),
        0x1A => Some("HD EOBD-II N"),
        0x1C => Some("OBDBr-1"),
        0x1D => Some("OBDBr-2"),
        _ => None,
    };
    Quantity::Enumeration { text, raw: raw as u8 }
}

// Fuel trim label pairs; the second label only applies when the vehicle
// reports two banks in one response
fn fuel_trim_labels(pid: u8) -> Option<(&'static str, &'static str)> {
    match pid {
        0x06 => Some(("SHRTFT1", "SHRTFT3")),
        0x07 => Some(("LONGFT1", "LONGFT3")),
        0x08 => Some(("SHRTFT2", "SHRTFT4")),
        0x09 => Some(("LONGFT2", "LONGFT4")),
        0x55 => Some(("STSO2FT1", "STSO2FT3")),
        0x56 => Some(("LGSO2FT1", "LGSO2FT3")),
        0x57 => Some(("STSO2FT2", "STSO2FT4")),
        0x58 => Some(("LGSO2FT2", "LGSO2FT4")),
        _ => None,
    }
}

// Bank/sensor suffixes per O2 sensor PID offset within its group
fn o2_suffixes(offset: u8) -> &'static [&'static str] {
    match offset {
        0 => &["11"],
        1 => &["12"],
        2 => &["13", "21"],
        3 => &["14", "22"],
        4 => &["21", "31"],
        5 => &["22", "32"],
        6 => &["23", "41"],
        _ => &["24", "42"],
    }
}

fn scalar_spec(pid: u8) -> Option<ScalarSpec> {
    if let Some((label1, label2)) = fuel_trim_labels(pid) {
        // 1 or 2 bytes depending on how many sensor banks are fitted
        return Some(ScalarSpec {
            length: None,
            factories: vec![byte(label1, 0, fuel_trim), byte(label2, 1, fuel_trim)],
        });
    }
    let spec = match pid {
        0x03 => ScalarSpec {
            length: Some(2),
            factories: vec![
                byte("FUELSYS1", 0, fuel_system_status),
                byte("FUELSYS2", 1, fuel_system_status),
            ],
        },
        0x04 => ScalarSpec {
            length: Some(1),
            factories: vec![byte("LOAD_PCT", 0, positive_percentage)],
        },
        0x05 => ScalarSpec {
            length: Some(1),
            factories: vec![byte("ECT", 0, low_temperature)],
        },
        0x0A => ScalarSpec {
            length: Some(1),
            factories: vec![byte("FRP", 0, pressure_x3)],
        },
        0x0B => ScalarSpec {
            length: Some(1),
            factories: vec![byte("MAP", 0, pressure)],
        },
        0x0C => ScalarSpec {
            length: Some(2),
            factories: vec![word("RPM", 0, engine_rpm)],
        },
        0x0D => ScalarSpec {
            length: Some(1),
            factories: vec![byte("VSS", 0, vehicle_speed)],
        },
        0x0E => ScalarSpec {
            length: Some(1),
            factories: vec![byte("SPARKADV", 0, ignition_timing)],
        },
        0x0F => ScalarSpec {
            length: Some(1),
            factories: vec![byte("IAT", 0, low_temperature)],
        },
        0x10 => ScalarSpec {
            length: Some(2),
            factories: vec![word("MAF", 0, air_flow)],
        },
        0x11 => ScalarSpec {
            length: Some(1),
            factories: vec![byte("TP", 0, positive_percentage)],
        },
        0x13 => ScalarSpec {
            length: Some(1),
            factories: vec![byte("O2SLOC", 0, o2s_location_2bank)],
        },
        0x14..=0x1B => {
            let mut factories = Vec::new();
            for suffix in o2_suffixes(pid - 0x14) {
                factories.push(byte(format!("O2S{}", suffix), 0, o2_voltage));
                factories.push(byte(format!("SHRTFT{}", suffix), 1, fuel_trim));
            }
            ScalarSpec { length: Some(2), factories }
        }
        0x1C => ScalarSpec {
            length: Some(1),
            factories: vec![byte("OBDSUP", 0, obd_support)],
        },
        0x1D => ScalarSpec {
            length: Some(1),
            factories: vec![byte("O2SLOC", 0, o2s_location_4bank)],
        },
        0x1F => ScalarSpec {
            length: Some(2),
            factories: vec![word("RUNTM", 0, runtime)],
        },
        0x21 => ScalarSpec {
            length: Some(2),
            factories: vec![word("MIL_DIST", 0, mil_distance)],
        },
        0x22 => ScalarSpec {
            length: Some(2),
            factories: vec![word("FRP", 0, pressure_x0_079)],
        },
        0x23 => ScalarSpec {
            length: Some(2),
            factories: vec![word("FRP", 0, pressure_x10)],
        },
        0x24..=0x2B => {
            let mut factories = Vec::new();
            for suffix in o2_suffixes(pid - 0x24) {
                factories.push(word(format!("LAMBDA{}", suffix), 0, o2_lambda));
                factories.push(word(format!("O2S{}", suffix), 2, o2_wide_voltage));
            }
            ScalarSpec { length: Some(4), factories }
        }
        0x2F => ScalarSpec {
            length: Some(1),
            factories: vec![byte("FLI", 0, positive_percentage)],
        },
        0x33 => ScalarSpec {
            length: Some(1),
            factories: vec![byte("BARO", 0, pressure)],
        },
        0x34..=0x3B => {
            let mut factories = Vec::new();
            for suffix in o2_suffixes(pid - 0x34) {
                factories.push(word(format!("LAMBDA{}", suffix), 0, o2_lambda));
                factories.push(word(format!("O2S{}", suffix), 2, o2_current));
            }
            ScalarSpec { length: Some(4), factories }
        }
        0x42 => ScalarSpec {
            length: Some(2),
            factories: vec![word("VPWR", 0, module_voltage)],
        },
        0x45 => ScalarSpec {
            length: Some(1),
            factories: vec![byte("TP_R", 0, positive_percentage)],
        },
        0x46 => ScalarSpec {
            length: Some(1),
            factories: vec![byte("AAT", 0, low_temperature)],
        },
        0x59 => ScalarSpec {
            length: Some(2),
            factories: vec![word("FRP", 0, pressure_x10)],
        },
        _ => return None,
    };
    Some(spec)
}

/// The SID $01 PIDs with registered scalar decoders.
pub(crate) fn scalar_pids() -> Vec<u8> {
    (0x00..=0xFF).filter(|&pid| scalar_spec(pid).is_some()).collect()
}

pub(crate) fn decode_scalar(ctx: &DecodeContext) -> Result<Payload> {
    let pid = ctx
        .pid
        .ok_or_else(|| Error::Data("scalar response without a PID".to_string()))?;
    let spec = scalar_spec(pid)
        .ok_or_else(|| Error::Data(format!("no decoder for SID $01 PID ${:02X}", pid)))?;
    let payload = ctx.payload();
    let data = match spec.length {
        Some(n) if payload.len() >= n => &payload[..n],
        _ => payload,
    };

    let mut values = Vec::new();
    for factory in spec.factories {
        // skip values the (shorter) response does not contain
        let raw = match factory.field {
            Field::Byte(i) => match data.get(i) {
                Some(&b) => b as u32,
                None => continue,
            },
            Field::Word(i) => match data.get(i..i + 2) {
                Some(bytes) => decode_integer(bytes),
                None => continue,
            },
        };
        values.push(Value::new(factory.label, (factory.build)(raw)));
    }
    Ok(Payload::Values(values))
}
