//! Integration tests for the sub-device lifecycle.
//!
//! These drive `DeviceConnection` and the sub-device factories through the
//! public API against the scriptable mock node backend, so every open,
//! grab, write and close can be counted without real hardware.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use hidconn::kernel::ioctl::{EV_KEY, EV_SYN};
use hidconn::kernel::mock::{MockNodeSpec, MockOpener, Syscall};
use hidconn::kernel::InputEvent;
use hidconn::{
    DeviceConnection, DeviceEvent, DeviceFlags, DeviceId, EventConnection, HidrawConnection,
    Reactor, SubDeviceCandidate, SubDeviceConnection, VirtualOutput,
};

const ID: DeviceId = DeviceId::new(0x046d, 0xc53e);
const EVENT_A: &str = "/dev/input/event20";
const EVENT_B: &str = "/dev/input/event21";
const HIDRAW: &str = "/dev/hidraw6";

#[derive(Default)]
struct Sink {
    events: RefCell<Vec<InputEvent>>,
}

impl VirtualOutput for Sink {
    fn emit(&self, events: &[InputEvent]) -> io::Result<()> {
        self.events.borrow_mut().extend_from_slice(events);
        Ok(())
    }
}

fn opener() -> MockOpener {
    let opener = MockOpener::new();
    opener.add(EVENT_A, MockNodeSpec::event(0x046d, 0xc53e));
    opener.add(EVENT_B, MockNodeSpec::pointer(0x046d, 0xc53e));
    opener.add(HIDRAW, MockNodeSpec::hidraw(0x046d, 0xc53e));
    opener
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

// ── add / remove bookkeeping ──

#[test]
fn add_remove_sequence_tracks_last_operation() {
    let opener = opener();
    let reactor = Reactor::new();
    let mut device = DeviceConnection::new(ID, "Spotlight", None);

    let event = SubDeviceCandidate::event(EVENT_A);
    for _ in 0..3 {
        assert!(device.connect_candidate(&event, &opener, &reactor));
        assert!(device.has_sub_device(EVENT_A));
        assert_eq!(device.sub_device_count(), 1);
    }
    assert!(device.remove_sub_device(EVENT_A));
    assert!(!device.has_sub_device(EVENT_A));
    assert!(!device.remove_sub_device(EVENT_A));

    // Every replaced or removed connection closed its node exactly once
    assert_eq!(opener.log().opens(EVENT_A), 3);
    assert_eq!(opener.log().closes(EVENT_A), 3);
    assert_eq!(reactor.registered(), 0);
}

#[test]
fn disconnected_entry_counts_as_absent() {
    let opener = opener();
    let reactor = Reactor::new();
    let mut device = DeviceConnection::new(ID, "Spotlight", None);
    device.connect_candidate(&SubDeviceCandidate::event(EVENT_A), &opener, &reactor);
    device.connect_candidate(&SubDeviceCandidate::hidraw(HIDRAW), &opener, &reactor);

    // Paused reading: still owned, not connected
    let hidraw = Rc::clone(device.sub_device(HIDRAW).unwrap());
    hidraw.set_read_notifier_enabled(false);
    assert!(!device.has_sub_device(HIDRAW));
    hidraw.set_read_notifier_enabled(true);
    assert!(device.has_sub_device(HIDRAW));

    // Disconnected behind the device's back: still owned, not connected
    let event = Rc::clone(device.sub_device(EVENT_A).unwrap());
    event.disconnect();
    assert!(!device.has_sub_device(EVENT_A));
    assert!(device.has_sub_device(HIDRAW));
    assert_eq!(device.sub_device_count(), 2);

    assert!(device.remove_sub_device(EVENT_A));
    assert_eq!(device.sub_device_count(), 1);
    assert_eq!(opener.log().closes(EVENT_A), 1);
}

#[test]
fn directly_added_connections_share_the_mapper() {
    let opener = opener();
    let reactor = Reactor::new();
    let mut device = DeviceConnection::new(ID, "Spotlight", Some(Rc::new(Sink::default())));

    let event =
        EventConnection::create(&SubDeviceCandidate::event(EVENT_A), &device, &opener, &reactor)
            .unwrap();
    let hidraw =
        HidrawConnection::create(&SubDeviceCandidate::hidraw(HIDRAW), ID, &opener, &reactor)
            .unwrap();
    device.add_sub_device(Some(event.clone()));
    device.add_sub_device(Some(hidraw.clone()));

    for sub in [&*event as &dyn SubDeviceConnection, &*hidraw] {
        assert!(Rc::ptr_eq(sub.input_mapper().unwrap(), device.input_mapper()));
    }
}

#[test]
fn readding_disconnected_connection_is_ignored() {
    let opener = opener();
    let reactor = Reactor::new();
    let mut device = DeviceConnection::new(ID, "Spotlight", None);
    device.connect_candidate(&SubDeviceCandidate::hidraw(HIDRAW), &opener, &reactor);
    let sub = Rc::clone(device.sub_device(HIDRAW).unwrap());
    assert!(device.remove_sub_device(HIDRAW));

    let mut rx = device.subscribe();
    device.add_sub_device(Some(sub));
    assert_eq!(device.sub_device_count(), 0);
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn readding_same_connection_keeps_it_connected() {
    let opener = opener();
    let reactor = Reactor::new();
    let mut device = DeviceConnection::new(ID, "Spotlight", None);

    let conn = HidrawConnection::create(&SubDeviceCandidate::hidraw(HIDRAW), ID, &opener, &reactor)
        .unwrap();
    device.add_sub_device(Some(conn.clone()));
    device.add_sub_device(Some(conn.clone()));

    assert_eq!(device.sub_device_count(), 1);
    assert!(conn.is_connected());
    assert_eq!(opener.log().closes(HIDRAW), 0);
}

#[test]
fn replaced_sub_device_is_ungrabbed_before_close() {
    let opener = opener();
    let reactor = Reactor::new();
    let mut device = DeviceConnection::new(ID, "Spotlight", Some(Rc::new(Sink::default())));

    let candidate = SubDeviceCandidate::event(EVENT_A);
    assert!(device.connect_candidate(&candidate, &opener, &reactor));
    let first = Rc::clone(device.sub_device(EVENT_A).unwrap());
    assert!(first.is_grabbed());

    assert!(device.connect_candidate(&candidate, &opener, &reactor));
    assert!(!first.is_connected());
    assert!(device.has_sub_device(EVENT_A));

    let calls = opener.log().calls();
    let ungrab = calls
        .iter()
        .position(|c| matches!(c, Syscall::Grab { grab: false, .. }))
        .unwrap();
    let close = calls
        .iter()
        .position(|c| matches!(c, Syscall::Close { .. }))
        .unwrap();
    assert!(ungrab < close);
    assert_eq!(opener.log().closes(EVENT_A), 1);
}

// ── teardown ──

#[test]
fn dropping_device_closes_every_node_once() {
    let opener = opener();
    let reactor = Reactor::new();
    let mut device = DeviceConnection::new(ID, "Spotlight", Some(Rc::new(Sink::default())));
    for candidate in [
        SubDeviceCandidate::event(EVENT_A),
        SubDeviceCandidate::event(EVENT_B),
        SubDeviceCandidate::hidraw(HIDRAW),
    ] {
        assert!(device.connect_candidate(&candidate, &opener, &reactor));
    }
    assert_eq!(reactor.registered(), 4);

    drop(device);

    let log = opener.log();
    for path in [EVENT_A, EVENT_B, HIDRAW] {
        assert_eq!(log.closes(path), 1, "{path}");
    }
    assert_eq!(log.grabs(EVENT_A, false), 1);
    assert_eq!(log.grabs(EVENT_B, false), 1);
    assert_eq!(log.grabs(HIDRAW, true), 0);
    assert_eq!(reactor.registered(), 0);
}

#[test]
fn disconnect_twice_is_disconnect_once() {
    let opener = opener();
    let reactor = Reactor::new();
    let mut device = DeviceConnection::new(ID, "Spotlight", Some(Rc::new(Sink::default())));
    device.connect_candidate(&SubDeviceCandidate::event(EVENT_A), &opener, &reactor);
    let sub = Rc::clone(device.sub_device(EVENT_A).unwrap());

    sub.disconnect();
    let after_first = opener.log().calls();
    sub.disconnect();
    drop(device);

    assert_eq!(opener.log().calls(), after_first);
    assert_eq!(opener.log().grabs(EVENT_A, false), 1);
    assert_eq!(opener.log().closes(EVENT_A), 1);
}

#[test]
fn bad_candidate_does_not_affect_others() {
    let opener = opener();
    opener.add("/dev/input/event30", MockNodeSpec::event(0x17ef, 0x6019));
    let reactor = Reactor::new();
    let mut device = DeviceConnection::new(ID, "Spotlight", None);

    let results: Vec<bool> = [
        SubDeviceCandidate::event(EVENT_A),
        SubDeviceCandidate::event("/dev/input/event30"),
        SubDeviceCandidate::event("/dev/input/event99"),
        SubDeviceCandidate::hidraw(HIDRAW),
    ]
    .iter()
    .map(|c| device.connect_candidate(c, &opener, &reactor))
    .collect();

    assert_eq!(results, vec![true, false, false, true]);
    assert_eq!(device.sub_device_count(), 2);
    assert_eq!(opener.log().closes("/dev/input/event30"), 1);
}

// ── events ──

#[test]
fn device_events_are_tagged_with_path() {
    let opener = opener();
    let reactor = Reactor::new();
    let mut device = DeviceConnection::new(ID, "Spotlight", None);
    let mut rx = device.subscribe();

    let conn = EventConnection::create(&SubDeviceCandidate::event(EVENT_B), &device, &opener, &reactor)
        .unwrap();
    device.add_sub_device(Some(conn.clone()));

    conn.set_flags(DeviceFlags::REPORT_BATTERY, true);
    opener.queue_read_error(EVENT_B, libc::ENODEV);
    conn.on_readable(0);
    device.remove_sub_device(EVENT_B);

    let path = EVENT_B.to_string();
    assert_eq!(
        drain(&mut rx),
        vec![
            DeviceEvent::SubDeviceConnected {
                id: ID,
                path: path.clone()
            },
            DeviceEvent::SubDeviceFlagsChanged {
                id: ID,
                path: path.clone(),
                flags: conn.flags(),
            },
            DeviceEvent::SubDeviceReadError {
                id: ID,
                path: path.clone(),
                errno: libc::ENODEV,
            },
            DeviceEvent::SubDeviceDisconnected { id: ID, path },
        ]
    );

    // Unsubscribed on removal
    conn.set_flags(DeviceFlags::REPORT_BATTERY, false);
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn grabbed_input_reaches_virtual_device() {
    let opener = opener();
    let reactor = Reactor::new();
    let sink = Rc::new(Sink::default());
    let mut device = DeviceConnection::new(ID, "Spotlight", Some(sink.clone()));

    let conn = EventConnection::create(&SubDeviceCandidate::event(EVENT_A), &device, &opener, &reactor)
        .unwrap();
    device.add_sub_device(Some(conn.clone()));
    assert!(conn.has_flags(DeviceFlags::GRABBED | DeviceFlags::NON_BLOCKING));

    let mut records = InputEvent::new(EV_KEY, 0x1c, 1).to_record();
    records.extend(InputEvent::new(EV_SYN, 0, 0).to_record());
    opener.queue_read(EVENT_A, records);
    conn.on_readable(0);

    assert_eq!(sink.events.borrow().len(), 2);
    assert_eq!(device.input_mapper().forwarded(), 2);
}
