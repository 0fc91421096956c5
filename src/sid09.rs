//! Service $09 (Request Vehicle Information) decoding
//!
//! Covers VIN, calibration IDs, calibration verification numbers, in-use
//! performance tracking counters, ECU name, and the legacy MessageCount
//! replies.

use crate::error::{Error, Result};
use crate::response::{DecodeContext, Payload};
use crate::value::{decode_integer, decode_string, Quantity, Value};

/// Service $09 INFOTYPEs.  The MC_* types exist on legacy protocols only.
pub mod infotype {
    pub const SUPPORT: u8 = 0x00;
    pub const MC_VIN: u8 = 0x01;
    pub const VIN: u8 = 0x02;
    pub const MC_CALID: u8 = 0x03;
    pub const CALID: u8 = 0x04;
    pub const MC_CVN: u8 = 0x05;
    pub const CVN: u8 = 0x06;
    pub const MC_IPT: u8 = 0x07;
    pub const IPT: u8 = 0x08;
    pub const MC_ECUNAME: u8 = 0x09;
    pub const ECUNAME: u8 = 0x0A;
    /// Compression ignition engines MY 2010 and later (CAN only)
    pub const IPT2: u8 = 0x0B;
}

/// Split a variable-length response into fixed-size items.
///
/// ISO 15765 responses carry a leading number-of-items byte (needed
/// because one CAN message may contain several responses); legacy
/// protocols omit it and the item count is inferred from the payload
/// length.  `legacy_pad` skips leading padding bytes on legacy
/// protocols (the VIN response pads with three NULs).
fn split_items<'a>(
    ctx: &DecodeContext<'a>,
    item_length: usize,
    legacy_pad: usize,
) -> Result<Vec<&'a [u8]>> {
    let payload = ctx.payload();
    let (count, items_start) = if ctx.protocol.is_can() {
        let count = *payload.first().ok_or_else(|| {
            Error::Data("variable-length response missing item count".to_string())
        })? as usize;
        (count, 1)
    } else {
        let usable = payload.len().saturating_sub(legacy_pad);
        (usable / item_length, legacy_pad)
    };

    let mut items = Vec::with_capacity(count);
    let mut offset = items_start;
    for _ in 0..count {
        let item = payload.get(offset..offset + item_length).ok_or_else(|| {
            Error::Data(format!(
                "variable-length response truncated: {:02X?}",
                payload
            ))
        })?;
        items.push(item);
        offset += item_length;
    }
    Ok(items)
}

pub(crate) fn decode_vin(ctx: &DecodeContext) -> Result<Payload> {
    let items = split_items(ctx, 17, 3)?;
    if items.len() != 1 {
        return Err(Error::J1699(format!("VIN NODI != 1 ({})", items.len())));
    }
    Ok(Payload::Vin(decode_string(items[0])))
}

pub(crate) fn decode_calid(ctx: &DecodeContext) -> Result<Payload> {
    let items = split_items(ctx, 16, 0)?;
    Ok(Payload::CalibrationIds(
        items.iter().map(|item| decode_string(item)).collect(),
    ))
}

pub(crate) fn decode_cvn(ctx: &DecodeContext) -> Result<Payload> {
    let items = split_items(ctx, 4, 0)?;
    Ok(Payload::CalibrationVerification(
        items.iter().map(|item| decode_integer(item)).collect(),
    ))
}

// In-use performance tracking labels, SAE J1979 (spark ignition)
const IPT_LABELS: [&str; 20] = [
    "OBDCOND",   // OBD monitoring conditions
    "IGNCNTR",   // Ignition counter
    "CATCOMP1",  // Catalyst monitor bank 1
    "CATCOND1",
    "CATCOMP2",  // Catalyst monitor bank 2
    "CATCOND2",
    "O2SCOMP1",  // O2 sensor monitor bank 1
    "O2SCOND1",
    "O2SCOMP2",  // O2 sensor monitor bank 2
    "O2SCOND2",
    "EGRCOMP",   // EGR or VVT monitor
    "EGRCOND",
    "AIRCOMP",   // Air monitor
    "AIRCOND",
    "EVAPCOMP",  // EVAP monitor
    "EVAPCOND",
    "SO2SCOMP1", // Secondary O2 sensor bank 1
    "SO2SCOND1",
    "SO2SCOMP2", // Secondary O2 sensor bank 2
    "SO2SCOND2",
];

// Compression-ignition label set (INFTYP $0B)
const DIESEL_IPT_LABELS: [&str; 16] = [
    "OBDCOND",   // OBD monitoring conditions
    "IGNCNTR",   // Ignition counter
    "HCCATCOMP", // NMHC catalyst monitor
    "HCCATCOND",
    "NCATCOMP",  // NOx catalyst monitor
    "NCATCOND",
    "NADSCOMP",  // NOx absorber monitor
    "NADSCOND",
    "PMCOMP",    // PM filter
    "PMCOND",
    "EGSCOMP",   // Exhaust gas sensor
    "EGSCOND",
    "EGRCOMP",   // EGR or VVT monitor
    "EGRCOND",
    "BPCOMP",    // Boost pressure monitor
    "BPCOND",
];

fn counters(items: &[&[u8]], labels: &[&'static str]) -> Vec<Value> {
    items
        .iter()
        .zip(labels)
        .map(|(item, &label)| Value::new(label, Quantity::Count(decode_integer(item))))
        .collect()
}

pub(crate) fn decode_ipt(ctx: &DecodeContext) -> Result<Payload> {
    let items = split_items(ctx, 2, 0)?;
    if items.len() != 16 && items.len() != 20 {
        return Err(Error::J1699(format!(
            "IPT NODI != 16 or 20 ({})",
            items.len()
        )));
    }
    Ok(Payload::Ipt(counters(&items, &IPT_LABELS)))
}

pub(crate) fn decode_diesel_ipt(ctx: &DecodeContext) -> Result<Payload> {
    let items = split_items(ctx, 2, 0)?;
    if items.len() != 16 {
        return Err(Error::J1699(format!("IPT NODI != 16 ({})", items.len())));
    }
    Ok(Payload::Ipt(counters(&items, &DIESEL_IPT_LABELS)))
}

pub(crate) fn decode_ecu_name(ctx: &DecodeContext) -> Result<Payload> {
    let items = split_items(ctx, 20, 0)?;
    if items.len() != 1 {
        return Err(Error::J1699(format!(
            "ECUNAME NODI != 1 ({})",
            items.len()
        )));
    }
    // one 20-byte field with a dash delimiter after the short ECU id
    let item = items[0];
    const DELIM: usize = 4;
    Ok(Payload::EcuName {
        ecu: decode_string(&item[..DELIM]),
        name: decode_string(&item[DELIM + 1..]),
    })
}

pub(crate) fn decode_message_count(ctx: &DecodeContext) -> Result<Payload> {
    let label = match ctx.pid {
        Some(infotype::MC_VIN) => "MC_VIN",
        Some(infotype::MC_CALID) => "MC_CALID",
        Some(infotype::MC_CVN) => "MC_CVN",
        Some(infotype::MC_IPT) => "MC_IPT",
        Some(infotype::MC_ECUNAME) => "MC_ECUNM",
        other => {
            return Err(Error::Data(format!(
                "not a MessageCount infotype: {:?}",
                other
            )))
        }
    };
    let count = *ctx.payload().first().ok_or_else(|| {
        Error::Data("MessageCount response without a count byte".to_string())
    })?;
    Ok(Payload::MessageCount {
        label: label.to_string(),
        count,
    })
}
