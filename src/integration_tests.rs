//! Integration tests with realistic scan data
//!
//! These tests run captured response bytes through the full
//! frame/reassembly/decode pipeline, the way they would arrive from an
//! ELM327 during a live session.

use crate::elm::message_bytes_from_ascii;
use crate::frame::{BusMessage, Frame};
use crate::protocol::Protocol;
use crate::reassembly::Reassembler;
use crate::response::{Payload, Registry, Response};
use crate::sid01::MonitorStatus;

const CAN29: Protocol = Protocol::Iso15765_4 {
    id_bits: 29,
    baud: 500_000,
};

const CAN11: Protocol = Protocol::Iso15765_4 {
    id_bits: 11,
    baud: 500_000,
};

fn bytes_from_ascii(ascii: &str) -> Vec<u8> {
    ascii
        .split_whitespace()
        .map(|pair| u8::from_str_radix(pair, 16).unwrap())
        .collect()
}

/// Build a decoded response from an already-assembled ISO 15765 payload,
/// addressed as ECU #1 answering the tester.
fn response_from_ascii(ascii: &str) -> Response {
    let mut raw = vec![0x18, 0xDA, 0xF1, 0x10];
    raw.extend(bytes_from_ascii(ascii));
    let frame = Frame::passthrough(CAN29, &raw).unwrap();
    let data = frame.assemble_message(std::slice::from_ref(&Some(frame.clone())));
    let message = BusMessage::new(frame.header.clone(), data, vec![Some(frame)], CAN29);
    Registry::with_standard_services()
        .create(&message)
        .unwrap()
}

/// Run raw ELM response lines through one full reassembly cycle.
fn cycle(protocol: Protocol, lines: &[&str]) -> Vec<BusMessage> {
    let lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
    let raw_frames = message_bytes_from_ascii(&lines).unwrap();
    let mut reassembler = Reassembler::new();
    for raw in &raw_frames {
        reassembler.accept(Frame::parse(protocol, raw).unwrap());
    }
    reassembler.flush();
    reassembler.drain()
}

#[test]
fn test_vin_decode_single_segment() {
    let response = response_from_ascii(
        "49 02 01 31 47 31 4A 43 35 34 34 34 52 37 32 35 32 33 36 37",
    );
    assert_eq!(response.sid, 0x09);
    assert_eq!(response.pid, Some(0x02));
    assert_eq!(response.payload, Payload::Vin("1G1JC5444R7252367".to_string()));
}

#[test]
fn test_vin_decode_from_elm_lines() {
    // the same VIN as the ELM actually delivers it: FF + two CFs
    let messages = cycle(
        CAN29,
        &[
            "18 DA F1 10 10 14 49 02 01 31 47 31",
            "18 DA F1 10 21 4A 43 35 34 34 34 52",
            "18 DA F1 10 22 37 32 35 32 33 36 37",
        ],
    );
    assert_eq!(messages.len(), 1);
    let response = Registry::with_standard_services()
        .create(&messages[0])
        .unwrap();
    assert_eq!(response.payload, Payload::Vin("1G1JC5444R7252367".to_string()));
}

#[test]
fn test_vin_reassembly_in_any_arrival_order() {
    let lines = [
        "18 DA F1 10 10 14 49 02 01 31 47 31",
        "18 DA F1 10 21 4A 43 35 34 34 34 52",
        "18 DA F1 10 22 37 32 35 32 33 36 37",
    ];
    let expected = cycle(CAN29, &lines)[0].clone();
    let orders: [[usize; 3]; 5] = [[0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    for order in orders {
        let permuted: Vec<&str> = order.iter().map(|&i| lines[i]).collect();
        let messages = cycle(CAN29, &permuted);
        assert_eq!(messages.len(), 1, "order {:?}", order);
        assert_eq!(messages[0].bytes(), expected.bytes(), "order {:?}", order);
        assert_eq!(messages[0].header, expected.header, "order {:?}", order);
    }
}

#[test]
fn test_readiness_pass() {
    let response = response_from_ascii("41 01 00 07 65 00");
    let report = match response.payload {
        Payload::MonitorStatus(report) => report,
        other => panic!("expected monitor status, got {:?}", other),
    };
    assert_eq!(report.dtc_count, 0);
    assert!(!report.mil);
    for key in ["catalyst", "evap", "o2", "o2_heater"] {
        assert_eq!(report.monitor(key).unwrap().status(), MonitorStatus::Ready, "{}", key);
    }
    for key in ["catalyst_heater", "secondary_air", "ac", "egr"] {
        assert_eq!(
            report.monitor(key).unwrap().status(),
            MonitorStatus::NotSupported,
            "{}",
            key
        );
    }
}

#[test]
fn test_readiness_fail() {
    let response = response_from_ascii("41 01 00 07 65 25");
    let report = match response.payload {
        Payload::MonitorStatus(report) => report,
        other => panic!("expected monitor status, got {:?}", other),
    };
    assert_eq!(report.monitor("catalyst").unwrap().status(), MonitorStatus::NotReady);
    assert_eq!(report.monitor("evap").unwrap().status(), MonitorStatus::NotReady);
    assert_eq!(report.monitor("o2").unwrap().status(), MonitorStatus::NotReady);
    assert_eq!(report.monitor("o2_heater").unwrap().status(), MonitorStatus::Ready);
    assert_eq!(report.incomplete_monitors().len(), 3);
}

#[test]
fn test_mil_set_with_41_dtcs() {
    let response = response_from_ascii("41 01 A9 00 00 00");
    match response.payload {
        Payload::MonitorStatus(report) => {
            assert_eq!(report.dtc_count, 41);
            assert!(report.mil);
        }
        other => panic!("expected monitor status, got {:?}", other),
    }
}

#[test]
fn test_o2_wide_sensor_lambda_at_max() {
    let response = response_from_ascii("41 24 FF FF 00 00");
    let values = match response.payload {
        Payload::Values(values) => values,
        other => panic!("expected values, got {:?}", other),
    };
    let lambda = values.iter().find(|v| v.label == "LAMBDA11").unwrap();
    assert!((lambda.quantity.as_f64().unwrap() - 1.999).abs() < 1e-3);
    let voltage = values.iter().find(|v| v.label == "O2S11").unwrap();
    assert_eq!(voltage.quantity.as_f64(), Some(0.0));
}

#[test]
fn test_dtc_decode_filters_zero_pairs() {
    // legacy-protocol DTC payload: four pairs, two of them zero
    let protocol = Protocol::Iso9141_2;
    let header = protocol.parse_header(&[0x48, 0x6B, 0x10]).unwrap();
    let data = bytes_from_ascii("43 01 43 00 00 41 96 00 00")
        .into_iter()
        .map(Some)
        .collect();
    let message = BusMessage::new(header, data, vec![], protocol);
    let response = Registry::with_standard_services().create(&message).unwrap();
    match response.payload {
        Payload::Dtcs(dtcs) => {
            let codes: Vec<String> = dtcs.iter().map(|d| d.code()).collect();
            assert_eq!(codes, vec!["P0143", "C0196"]);
        }
        other => panic!("expected DTCs, got {:?}", other),
    }
}

#[test]
fn test_legacy_dtc_two_frame_response() {
    // SID $03 over ISO 9141-2: two frames, three DTC pairs each
    let messages = cycle(
        Protocol::Iso9141_2,
        &[
            "48 6B 10 43 01 43 00 00 41 96 C9",
            "48 6B 10 43 00 00 00 00 00 00 C9",
        ],
    );
    assert_eq!(messages.len(), 1);
    let response = Registry::with_standard_services()
        .create(&messages[0])
        .unwrap();
    match response.payload {
        Payload::Dtcs(dtcs) => {
            let codes: Vec<String> = dtcs.iter().map(|d| d.code()).collect();
            assert_eq!(codes, vec!["P0143", "C0196"]);
        }
        other => panic!("expected DTCs, got {:?}", other),
    }
}

#[test]
fn test_11bit_header_padding_end_to_end() {
    // 3-nibble 11-bit CAN header arrives as an odd-length hex line
    let messages = cycle(CAN11, &["7E8 06 41 00 BE 1F B8 10"]);
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.header.raw, vec![0x00, 0x00, 0x07, 0xE8]);
    assert_eq!(message.header.rx_id, Some(0xF1));

    let response = Registry::with_standard_services().create(message).unwrap();
    match response.payload {
        Payload::PidSupport(support) => {
            assert!(support.is_supported(0x01));
            assert!(support.is_supported(0x0C));
            assert!(!support.is_supported(0x02));
        }
        other => panic!("expected PID support, got {:?}", other),
    }
}

#[test]
fn test_pid_support_completeness() {
    match response_from_ascii("41 00 00 00 00 00").payload {
        Payload::PidSupport(support) => assert!(support.supported.is_empty()),
        other => panic!("expected PID support, got {:?}", other),
    }
    match response_from_ascii("41 00 FF FF FF FF").payload {
        Payload::PidSupport(support) => {
            assert_eq!(support.supported, (0x01..=0x20).collect::<Vec<u8>>());
        }
        other => panic!("expected PID support, got {:?}", other),
    }
}

#[test]
fn test_multiple_ecus_answering_0100() {
    // a 0100 broadcast typically draws one frame from each ECU
    let messages = cycle(
        CAN29,
        &[
            "18 DA F1 10 06 41 00 BE 1F B8 10",
            "18 DA F1 18 06 41 00 80 00 80 00",
            "18 DA F1 28 06 41 00 80 00 00 01",
        ],
    );
    assert_eq!(messages.len(), 3);
    let tx_ids: Vec<Option<u8>> = messages.iter().map(|m| m.header.tx_id).collect();
    assert_eq!(tx_ids, vec![Some(0x10), Some(0x18), Some(0x28)]);
    let registry = Registry::with_standard_services();
    for message in &messages {
        let response = registry.create(message).unwrap();
        assert_eq!(response.sid, 0x01);
        assert!(matches!(response.payload, Payload::PidSupport(_)));
    }
}

#[test]
fn test_dropped_frame_leaves_incomplete_message() {
    let messages = cycle(
        CAN29,
        &[
            "18 DA F1 10 10 14 49 02 01 31 47 31",
            "18 DA F1 10 22 37 32 35 32 33 36 37",
        ],
    );
    assert_eq!(messages.len(), 1);
    assert!(messages[0].incomplete);
    assert_eq!(messages[0].data.len(), 20);
    assert_eq!(messages[0].data.iter().filter(|b| b.is_none()).count(), 7);
    // decoding an incomplete message is a data error
    assert!(Registry::with_standard_services().create(&messages[0]).is_err());
}

#[test]
fn test_calibration_id_decode() {
    let response = response_from_ascii(
        "49 04 01 4A 4D 42 2A 33 36 37 36 31 35 30 30 00 00 00 00",
    );
    assert_eq!(
        response.payload,
        Payload::CalibrationIds(vec!["JMB*36761500".to_string()])
    );
}

#[test]
fn test_cvn_decode() {
    let response = response_from_ascii("49 06 01 17 91 BC 82");
    assert_eq!(response.payload, Payload::CalibrationVerification(vec![0x1791_BC82]));
}
