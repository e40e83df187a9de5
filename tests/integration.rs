//! Black-box tests over `mouthpad_bridge`'s host-testable surface:
//! classification, the link registry's cardinality invariants, HID
//! report shaping, the CDC framing codec, command-line parsing, and
//! the glasses protocol engine's queue/heartbeat behaviour. None of
//! this touches the `embedded` feature, so it runs under plain
//! `cargo test`.

use mouthpad_bridge::ble::classifier::{classify, parse_adv_record, DeviceKind, DEFAULT_CLASSIFIER_CONFIG};
use mouthpad_bridge::ble::registry::{LinkRecord, Registry};
use mouthpad_bridge::crc::{crc16_ccitt_false, crc32_xz};
use mouthpad_bridge::glasses::engine::GlassesEngine;
use mouthpad_bridge::hid::{RawHidReport, REPORT_ID_BUTTONS_WHEEL, REPORT_ID_XY};
use mouthpad_bridge::host::commands::{local_reply, parse_command, CdcCommand};
use mouthpad_bridge::host::framing::{encode, FeedResult, FrameDecoder};

/// Builds a minimal AD-structure byte stream: an optional
/// CompleteLocalName (0x09), an optional 16-bit service UUID list
/// (0x03) and/or 128-bit service UUID list (0x07).
fn build_adv(name: &str, hid_uuid: Option<u16>, uart_uuid_128: Option<[u8; 16]>) -> heapless::Vec<u8, 64> {
    let mut data: heapless::Vec<u8, 64> = heapless::Vec::new();
    data.push((name.len() + 1) as u8).unwrap();
    data.push(0x09).unwrap();
    for b in name.as_bytes() {
        data.push(*b).unwrap();
    }
    if let Some(uuid) = hid_uuid {
        data.push(3).unwrap();
        data.push(0x03).unwrap();
        let le = uuid.to_le_bytes();
        data.push(le[0]).unwrap();
        data.push(le[1]).unwrap();
    }
    if let Some(uuid128) = uart_uuid_128 {
        data.push(17).unwrap();
        data.push(0x07).unwrap();
        for b in uuid128 {
            data.push(b).unwrap();
        }
    }
    data
}

const NUS_UUID: [u8; 16] = mouthpad_bridge::ble::classifier::NUS_SERVICE_UUID_128;

#[test]
fn classifier_recognises_wearable_by_hid_plus_uart_service() {
    let adv_bytes = build_adv("MouthPad", Some(0x1812), Some(NUS_UUID));
    let record = parse_adv_record(&adv_bytes, &DEFAULT_CLASSIFIER_CONFIG);
    assert_eq!(classify(&record, &DEFAULT_CLASSIFIER_CONFIG), DeviceKind::Wearable);
}

#[test]
fn classifier_recognises_glasses_arms_by_name_token() {
    let left_bytes = build_adv("Frame_L_01", None, Some(NUS_UUID));
    let right_bytes = build_adv("Frame_R_01", None, Some(NUS_UUID));
    let left = parse_adv_record(&left_bytes, &DEFAULT_CLASSIFIER_CONFIG);
    let right = parse_adv_record(&right_bytes, &DEFAULT_CLASSIFIER_CONFIG);
    assert_eq!(classify(&left, &DEFAULT_CLASSIFIER_CONFIG), DeviceKind::GlassesLeft);
    assert_eq!(classify(&right, &DEFAULT_CLASSIFIER_CONFIG), DeviceKind::GlassesRight);
}

#[test]
fn classifier_uart_only_without_arm_token_is_generic_uart() {
    let bytes = build_adv("SomeUartGadget", None, Some(NUS_UUID));
    let record = parse_adv_record(&bytes, &DEFAULT_CLASSIFIER_CONFIG);
    assert_eq!(classify(&record, &DEFAULT_CLASSIFIER_CONFIG), DeviceKind::GenericUart);
}

#[test]
fn classifier_falls_back_to_unknown_with_no_services() {
    let bytes = build_adv("RandomGadget", None, None);
    let record = parse_adv_record(&bytes, &DEFAULT_CLASSIFIER_CONFIG);
    assert_eq!(classify(&record, &DEFAULT_CLASSIFIER_CONFIG), DeviceKind::Unknown);
}

#[test]
fn registry_enforces_one_link_per_kind() {
    let mut registry = Registry::new();
    let wearable = LinkRecord::new(1, DeviceKind::Wearable, [1, 2, 3, 4, 5, 6], "Wearable");
    let duplicate = LinkRecord::new(2, DeviceKind::Wearable, [9, 9, 9, 9, 9, 9], "Wearable-2");

    assert!(registry.insert(wearable).is_ok());
    assert!(registry.insert(duplicate).is_err());
    assert!(!registry.fully_populated());

    let left = LinkRecord::new(2, DeviceKind::GlassesLeft, [1, 1, 1, 1, 1, 1], "Left");
    let right = LinkRecord::new(3, DeviceKind::GlassesRight, [2, 2, 2, 2, 2, 2], "Right");
    assert!(registry.insert(left).is_ok());
    assert!(registry.insert(right).is_ok());
    assert!(registry.fully_populated());
    assert!(!registry.need_glasses_pair());
}

#[test]
fn hid_report_round_trips_through_serialize() {
    let report = RawHidReport::from_notification(&[REPORT_ID_XY, 5, 0xFB]).unwrap();
    let mut buf = [0u8; 8];
    let bytes = report.serialize(&mut buf).unwrap();
    assert_eq!(bytes, &[REPORT_ID_XY, 5, 0xFB]);

    let neutral = RawHidReport::neutral(REPORT_ID_BUTTONS_WHEEL);
    let mut buf2 = [0u8; 8];
    let neutral_bytes = neutral.serialize(&mut buf2).unwrap();
    assert!(neutral_bytes.iter().all(|&b| b == 0));
}

#[test]
fn framing_encode_decode_round_trip() {
    let payload = [0xDE, 0xAD, 0xBE, 0xEF];
    let encoded = encode(&payload).expect("payload within capacity");

    let mut decoder = FrameDecoder::new();
    let mut frame = None;
    for &b in encoded.iter() {
        if let FeedResult::Frame(f) = decoder.feed(b) {
            frame = Some(f);
        }
    }
    assert_eq!(frame.expect("a frame should have decoded").as_slice(), &payload);
}

#[test]
fn framing_decoder_discards_bad_crc() {
    let mut encoded = encode(&[1, 2, 3]).unwrap();
    let last = encoded.len() - 1;
    encoded[last] ^= 0xFF; // corrupt the CRC low byte

    let mut decoder = FrameDecoder::new();
    let mut saw_discard = false;
    for &b in encoded.iter() {
        if let FeedResult::Discarded = decoder.feed(b) {
            saw_discard = true;
        }
    }
    assert!(saw_discard);
}

#[test]
fn crc_functions_match_known_vectors() {
    // CRC-16/CCITT-FALSE "check" value for ASCII "123456789".
    assert_eq!(crc16_ccitt_false(b"123456789"), 0x29B1);
    // CRC-32/XZ "check" value for the same vector.
    assert_eq!(crc32_xz(b"123456789"), 0xCBF4_3926);
}

#[test]
fn cdc_commands_parse_known_and_reject_unknown() {
    assert_eq!(parse_command("disconnect"), Some(CdcCommand::Disconnect));
    assert_eq!(parse_command("reset"), Some(CdcCommand::Reset));
    assert_eq!(parse_command("not-a-command"), None);
}

#[test]
fn cdc_local_replies_answer_without_touching_the_command_queue() {
    let reply = local_reply("serial").expect("serial should be answered locally");
    assert!(reply.contains(mouthpad_bridge::config::USB_SERIAL_NUMBER));
    assert!(local_reply("disconnect").is_none());
}

#[test]
fn glasses_engine_queues_text_and_flushes_via_poll() {
    let mut engine = GlassesEngine::new();
    assert!(engine.enqueue_text(b"hello", 0));

    let job = engine.poll(10).expect("queued text should produce a send job");
    assert!(!job.bytes.is_empty());
    engine.on_send_result(true);
}

#[test]
fn glasses_engine_emits_heartbeat_after_inactivity() {
    let mut engine = GlassesEngine::new();
    assert!(!engine.heartbeat_due(0));
    assert!(engine.heartbeat_due(mouthpad_bridge::config::HEARTBEAT_ACTIVITY_THRESHOLD_SECS + 1));
    let packet = engine.build_heartbeat();
    assert!(!packet.is_empty());
}
