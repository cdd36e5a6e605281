mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::{read_reply, write_multiple_values, MockTransport};
use nichirin::dsp::BandIntensity;
use nichirin::error::{ProtocolError, TransportError};
use nichirin::link::{chunk_spectrum, payload_ceiling, Feed, Link, LinkEvent, LinkSettings, WriteMode};
use nichirin::protocol::crc::{append_crc, verify};
use nichirin::protocol::frame::write_multiple_registers;
use nichirin::protocol::registers::{LampConfig, BAND_BASE, BAND_COUNT};
use proptest::prelude::*;

fn link_with(transport: Arc<MockTransport>, timeout_ms: u64) -> Link {
    Link::new(
        transport,
        LinkSettings {
            address: 1,
            response_timeout: Duration::from_millis(timeout_ms),
        },
    )
}

fn bands(seed: u8) -> BandIntensity {
    BandIntensity(std::array::from_fn(|i| seed.wrapping_add(i as u8 * 3)))
}

fn events(link: &Link) -> Vec<LinkEvent> {
    link.events().try_iter().collect()
}

/// Collect band register values from a set of write-multiple frames.
fn reassemble(frames: &[Vec<u8>]) -> BTreeMap<u16, u16> {
    let mut regs = BTreeMap::new();
    for frame in frames {
        let (start, values) = write_multiple_values(frame);
        for (i, v) in values.into_iter().enumerate() {
            let prev = regs.insert(start + i as u16, v);
            assert!(prev.is_none(), "register {:#06x} written twice", start + i as u16);
        }
    }
    regs
}

proptest! {
    #[test]
    fn prop_chunks_cover_every_band_once(
        ceiling in 20usize..=247,
        offset in 0usize..BAND_COUNT,
        values in proptest::array::uniform12(any::<u8>()),
    ) {
        let mut off = offset;
        let frames: Vec<Vec<u8>> = chunk_spectrum(1, &values, ceiling, &mut off)
            .into_iter()
            .map(|f| f.into_bytes())
            .collect();
        for f in &frames {
            prop_assert!(f.len() <= ceiling);
            prop_assert!(verify(f));
        }
        let regs = reassemble(&frames);
        let expected: BTreeMap<u16, u16> = (0..BAND_COUNT)
            .map(|i| (BAND_BASE + i as u16, values[i] as u16))
            .collect();
        prop_assert_eq!(regs, expected);
    }

    #[test]
    fn prop_queue_delivers_whole_update(mtu in 0usize..=260, seed in any::<u8>()) {
        let transport = MockTransport::auto(mtu);
        let link = link_with(Arc::clone(&transport), 400);
        link.queue().submit_spectrum(1, &bands(seed));

        let writes = transport.writes();
        let ceiling = payload_ceiling(mtu);
        prop_assert!(writes.iter().all(|w| w.len() <= ceiling));
        let regs = reassemble(&writes);
        prop_assert_eq!(regs.len(), BAND_COUNT);
        for (i, (&reg, &v)) in regs.iter().enumerate() {
            prop_assert_eq!(reg, BAND_BASE + i as u16);
            prop_assert_eq!(v, bands(seed).0[i] as u16);
        }
    }
}

#[test]
fn one_write_outstanding() {
    let transport = MockTransport::holding(23);
    let link = link_with(Arc::clone(&transport), 10_000);

    assert_eq!(link.queue().submit_spectrum(1, &bands(0)), 3);
    assert_eq!(transport.write_count(), 1);
    assert!(link.queue().write_outstanding());
    assert_eq!(link.queue().pending(), 2);

    link.queue().poll();
    assert_eq!(transport.write_count(), 1);

    assert!(transport.complete_next(Ok(())));
    assert_eq!(transport.write_count(), 2);
    assert!(transport.complete_next(Ok(())));
    assert_eq!(transport.write_count(), 3);
    assert!(transport.complete_next(Ok(())));
    assert_eq!(transport.write_count(), 3);
    assert!(!link.queue().write_outstanding());
}

#[test]
fn lost_completion_times_out() {
    let transport = MockTransport::holding(23);
    let link = link_with(Arc::clone(&transport), 100);

    link.queue().submit_spectrum(1, &bands(1));
    assert_eq!(transport.write_count(), 1);

    std::thread::sleep(Duration::from_millis(10));
    link.queue().poll();
    assert_eq!(transport.write_count(), 1);

    std::thread::sleep(Duration::from_millis(120));
    link.queue().poll();
    assert_eq!(transport.write_count(), 2);
    assert!(events(&link).contains(&LinkEvent::TransportFailed(TransportError::Timeout(100))));

    // The late completion of the first write must not release the second.
    assert!(transport.complete_next(Ok(())));
    assert_eq!(transport.write_count(), 2);
    assert!(link.queue().write_outstanding());
}

#[test]
fn failure_discards_queue() {
    let transport = MockTransport::holding(23);
    let link = link_with(Arc::clone(&transport), 10_000);

    link.queue().submit_spectrum(1, &bands(2));
    link.request_config().unwrap();
    assert_eq!(link.queue().pending(), 3);

    let err = TransportError::WriteRejected("gatt busy".into());
    assert!(transport.complete_next(Err(err.clone())));
    assert_eq!(link.queue().pending(), 0);
    assert!(!link.queue().write_outstanding());
    assert_eq!(transport.write_count(), 1);
    assert_eq!(events(&link), vec![LinkEvent::TransportFailed(err)]);

    // The queue is usable again afterwards.
    link.queue().submit_spectrum(1, &bands(3));
    assert_eq!(transport.write_count(), 2);
}

#[test]
fn new_update_replaces_pending_bands_only() {
    let transport = MockTransport::holding(23);
    let link = link_with(Arc::clone(&transport), 10_000);

    link.queue().submit_spectrum(1, &bands(4));
    link.request_config().unwrap();
    assert_eq!(link.queue().pending(), 3);

    link.queue().submit_spectrum(1, &bands(5));
    // Read request plus three fresh band chunks.
    assert_eq!(link.queue().pending(), 4);

    assert!(transport.complete_next(Ok(())));
    let writes = transport.writes();
    assert_eq!(writes[1][1], 0x03, "read request goes out before newer bands");
}

#[test]
fn read_waits_for_previous_reply() {
    let transport = MockTransport::holding(23);
    let link = link_with(Arc::clone(&transport), 10_000);

    link.request_config().unwrap();
    link.request_config().unwrap();
    assert_eq!(transport.write_count(), 1);

    assert!(transport.complete_next(Ok(())));
    assert!(link.queue().awaiting_response());
    assert_eq!(transport.write_count(), 1);

    link.on_notify(&read_reply(1, &[2, 120, 200, 255, 7]));
    assert_eq!(transport.write_count(), 2);
    assert_eq!(
        events(&link),
        vec![LinkEvent::Config(LampConfig {
            mode: 2,
            hue: 120,
            saturation: 200,
            value: 255,
            param: 7,
        })]
    );
}

#[test]
fn missing_reply_times_out() {
    let transport = MockTransport::holding(23);
    let link = link_with(Arc::clone(&transport), 30);

    link.request_config().unwrap();
    link.request_config().unwrap();
    assert!(transport.complete_next(Ok(())));
    assert_eq!(transport.write_count(), 1);

    std::thread::sleep(Duration::from_millis(50));
    link.queue().poll();
    assert_eq!(transport.write_count(), 2);
}

#[test]
fn reply_reassembled_from_fragments() {
    let transport = MockTransport::auto(23);
    let link = link_with(transport, 400);

    let reply = read_reply(1, &[0x0102, 0x0304, 0x0506]);
    link.on_notify(&reply[..2]);
    link.on_notify(&reply[2..6]);
    assert!(events(&link).is_empty());
    link.on_notify(&reply[6..]);
    assert_eq!(
        events(&link),
        vec![LinkEvent::Registers(vec![0x0102, 0x0304, 0x0506])]
    );
}

#[test]
fn exception_and_bad_crc_replies() {
    let transport = MockTransport::auto(23);
    let link = link_with(transport, 400);

    let mut exception = vec![0x01, 0x83, 0x02];
    append_crc(&mut exception);
    link.on_notify(&exception);

    let mut corrupt = read_reply(1, &[1, 2, 3, 4, 5]);
    corrupt[4] ^= 0xFF;
    link.on_notify(&corrupt);

    let got = events(&link);
    assert_eq!(
        got[0],
        LinkEvent::DeviceError(ProtocolError::Exception {
            function: 0x03,
            code: 0x02
        })
    );
    assert!(matches!(
        got[1],
        LinkEvent::Discarded(ProtocolError::CrcMismatch { .. })
    ));
}

#[test]
fn reply_after_false_header_is_recovered() {
    let transport = MockTransport::auto(23);
    let link = link_with(transport, 400);

    let mut noisy = vec![0x01, 0x03];
    noisy.extend_from_slice(&read_reply(1, &[5, 300]));
    link.on_notify(&noisy);
    assert_eq!(events(&link), vec![LinkEvent::Registers(vec![5, 300])]);
}

#[test]
fn corrupt_write_echo_keeps_read_waiting() {
    let transport = MockTransport::holding(23);
    let link = link_with(Arc::clone(&transport), 10_000);

    link.request_config().unwrap();
    link.request_config().unwrap();
    assert!(transport.complete_next(Ok(())));
    assert!(link.queue().awaiting_response());

    let mut echo = vec![0x01, 0x10, 0x01, 0x00, 0x00, 0x0C];
    append_crc(&mut echo);
    echo[5] ^= 0xFF;
    link.on_notify(&echo);
    assert!(matches!(
        events(&link)[..],
        [LinkEvent::Discarded(ProtocolError::CrcMismatch { .. })]
    ));
    assert!(link.queue().awaiting_response());
    assert_eq!(transport.write_count(), 1);

    let mut corrupt = read_reply(1, &[1, 2, 3, 4, 5]);
    corrupt[4] ^= 0xFF;
    link.on_notify(&corrupt);
    assert!(!link.queue().awaiting_response());
    assert_eq!(transport.write_count(), 2);
}

#[test]
fn chunk_offset_rotates_and_resets() {
    let transport = MockTransport::auto(23);
    let link = link_with(Arc::clone(&transport), 400);

    link.queue().submit_spectrum(1, &bands(6));
    link.queue().submit_spectrum(1, &bands(6));
    let writes = transport.writes();
    assert_eq!(write_multiple_values(&writes[0]).0, BAND_BASE);
    assert_eq!(write_multiple_values(&writes[3]).0, BAND_BASE + 5);
    assert_eq!(link.queue().chunk_offset(), 10);

    transport.set_mtu(64);
    assert_eq!(link.queue().submit_spectrum(1, &bands(6)), 1);
    assert_eq!(link.queue().chunk_offset(), 0);
    assert_eq!(transport.writes().last().map(Vec::len), Some(33));
}

#[test]
fn write_mode_follows_transport() {
    let transport = MockTransport::auto_without_response(64);
    let link = link_with(Arc::clone(&transport), 400);
    link.queue().submit_spectrum(1, &bands(7));
    link.request_config().unwrap();
    assert_eq!(
        transport.modes(),
        vec![WriteMode::WithoutResponse, WriteMode::WithResponse]
    );

    let transport = MockTransport::auto(64);
    let link = link_with(Arc::clone(&transport), 400);
    link.queue().submit_spectrum(1, &bands(7));
    assert_eq!(transport.modes(), vec![WriteMode::WithResponse]);
}

#[test]
fn control_frame_too_large() {
    let transport = MockTransport::auto(23);
    let link = link_with(Arc::clone(&transport), 400);
    let frame = write_multiple_registers(1, 0, &[0u16; 20]).unwrap();
    assert_eq!(
        link.queue().submit(frame),
        Err(TransportError::MtuTooSmall {
            frame: 49,
            ceiling: 20
        })
    );
    assert_eq!(transport.write_count(), 0);
}

#[test]
fn write_lamp_config() {
    let lamp = LampConfig {
        mode: 3,
        hue: 300,
        saturation: 128,
        value: 64,
        param: 9,
    };

    let transport = MockTransport::auto(23);
    let link = link_with(Arc::clone(&transport), 400);
    link.write_config(&lamp, false).unwrap();
    let writes = transport.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(write_multiple_values(&writes[0]), (0, vec![3, 300, 128, 64, 9]));

    let transport = MockTransport::auto(23);
    let link = link_with(Arc::clone(&transport), 400);
    link.write_config(&lamp, true).unwrap();
    let writes = transport.writes();
    assert_eq!(writes.len(), 5);
    assert_eq!(&writes[1][..6], &[0x01, 0x06, 0x00, 0x01, 0x01, 0x2C]);

    let bad = LampConfig { hue: 360, ..lamp };
    assert!(link.write_config(&bad, false).is_err());
}

#[test]
fn reset_drops_everything() {
    let transport = MockTransport::holding(23);
    let link = link_with(Arc::clone(&transport), 10_000);
    link.queue().submit_spectrum(1, &bands(8));
    link.on_notify(&[0x01, 0x03]);
    link.reset();
    assert_eq!(link.queue().pending(), 0);
    assert!(!link.queue().write_outstanding());
    assert_eq!(link.queue().chunk_offset(), 0);

    // A completion for the dropped write is ignored.
    assert!(transport.complete_next(Ok(())));
    assert_eq!(transport.write_count(), 1);
}

#[test]
fn sender_ticks_until_stopped() {
    let transport = MockTransport::auto(64);
    let link = link_with(Arc::clone(&transport), 400);
    let mut sender = link.start_sender(Feed::saw(), 200.0).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    sender.stop();

    let sent = transport.write_count();
    assert!(sent >= 5, "only {} frames in 100 ms at 200 Hz", sent);
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(transport.write_count(), sent);

    let writes = transport.writes();
    let (_, first) = write_multiple_values(&writes[0]);
    let (_, second) = write_multiple_values(&writes[1]);
    assert_eq!(first[0], 0);
    assert_eq!(second[0], 10);
    assert_eq!(first[11], 220);
}
