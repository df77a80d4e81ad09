//! Full-pipeline tests over the mock backends.
//!
//! Every test builds an engine whose virtual bus is linked to the native
//! mock (a connecting pad occupies a native slot, like ViGEm pads do in
//! the real XInput stack) and drives it cycle by cycle with
//! `Engine::step`, so nothing here depends on timing.

use std::sync::{Arc, Mutex};

use padforge::backends::mock::{
    MockBus, MockBusControl, MockDeviceControl, MockJoystickBackend, MockNative, MockNativeControl,
};
use padforge::backends::{Backends, HAT_UP};
use padforge::gamepad::buttons;
use padforge::prelude::*;

struct Rig {
    engine: Engine,
    native: MockNativeControl,
    bus: MockBusControl,
}

fn rig(joystick: MockJoystickBackend, opts: EngineOptions) -> Rig {
    let (native, native_control) = MockNative::new();
    let (bus, bus_control) = MockBus::new();
    let bus = bus.with_native(native_control.clone());
    let engine = Engine::new(
        Backends {
            joystick: Box::new(joystick),
            native: Box::new(native),
            bus: Some(Box::new(bus)),
        },
        opts,
    );
    Rig {
        engine,
        native: native_control,
        bus: bus_control,
    }
}

/// One mock gamepad assigned to `slot` with the given mapping.
fn single_pad_rig(slot: usize, mapping: MappingConfig) -> (Rig, MockDeviceControl) {
    let mut joystick = MockJoystickBackend::new();
    let control = joystick.add_gamepad("Test Pad", 0x046d, 0xc216);
    let mut r = rig(joystick, EngineOptions::default());

    // First cycle discovers the device; then we can assign it.
    r.engine.step().unwrap();
    let shared = r.engine.shared();
    let device = shared.devices.snapshot()[0].id.clone();
    shared
        .assignments
        .install(vec![SlotAssignment::new(device, slot, Arc::new(mapping))]);
    (r, control)
}

fn button_to_a_mapping(button: u8) -> MappingConfig {
    let mut mapping = MappingConfig::new();
    mapping[TargetOutput::A] = Binding::source(SourceKind::Button, button);
    mapping
}

#[test]
fn button_passthrough_to_combined_and_pad() {
    let (mut r, control) = single_pad_rig(0, button_to_a_mapping(0));
    let shared = r.engine.shared();

    r.engine.step().unwrap();
    assert_eq!(shared.combined(0).buttons, 0);

    control.set_button(0, true);
    r.engine.step().unwrap();
    let combined = shared.combined(0);
    assert_eq!(combined.buttons, buttons::A);
    assert_eq!(
        XboxGamepad {
            buttons: 0,
            ..combined
        },
        XboxGamepad::NEUTRAL
    );

    // The same report reached the virtual pad.
    let pads = r.bus.pads();
    assert_eq!(pads.len(), 1);
    assert!(pads[0].is_connected());
    assert_eq!(pads[0].last_report().buttons, buttons::A);
}

#[test]
fn combined_is_a_pure_function_of_inputs() {
    let (mut r, control) = single_pad_rig(0, button_to_a_mapping(3));
    let shared = r.engine.shared();

    control.set_button(3, true);
    control.set_axis(0, 12_345);
    r.engine.step().unwrap();
    let first = shared.combined(0);
    for _ in 0..5 {
        r.engine.step().unwrap();
        assert_eq!(shared.combined(0), first);
    }
}

#[test]
fn multi_device_combine_max_trigger_single_a_bit() {
    let mut joystick = MockJoystickBackend::new();
    let a = joystick.add_gamepad("Pad A", 0x046d, 0xc216);
    let b = joystick.add_gamepad("Pad B", 0x045f, 0xc21d);
    let mut r = rig(joystick, EngineOptions::default());

    r.engine.step().unwrap();
    let shared = r.engine.shared();
    let devices = shared.devices.snapshot();
    assert_eq!(devices.len(), 2);

    // Both feed slot 1: axis 0 → left trigger, button 0 → A.
    let mut mapping = MappingConfig::new();
    mapping[TargetOutput::LeftTrigger] = Binding::source(SourceKind::Axis, 0);
    mapping[TargetOutput::A] = Binding::source(SourceKind::Button, 0);
    let mapping = Arc::new(mapping);

    let mut first = SlotAssignment::new(devices[0].id.clone(), 1, mapping.clone());
    first.sort_order = 0;
    let mut second = SlotAssignment::new(devices[1].id.clone(), 1, mapping);
    second.sort_order = 1;
    shared.assignments.install(vec![first, second]);

    // LT=200 from A, LT=100 from B (trigger byte = unsigned / 257).
    a.set_axis(0, ((200i32 * 257) - 0x8000) as i16);
    b.set_axis(0, ((100i32 * 257) - 0x8000) as i16);
    a.set_button(0, true);
    b.set_button(0, true);

    r.engine.step().unwrap();
    let combined = shared.combined(1);
    assert_eq!(combined.left_trigger, 200);
    assert_eq!(combined.buttons, buttons::A);
    assert_eq!(combined.buttons.count_ones(), 1);
}

#[test]
fn loopback_slot_is_never_enumerated_as_a_source() {
    let (mut r, _control) = single_pad_rig(0, button_to_a_mapping(0));
    let shared = r.engine.shared();

    // Attach happens this cycle; the linked bus parks the pad on native
    // slot 0.
    r.engine.step().unwrap();
    assert_eq!(r.bus.pads().len(), 1);

    // A real controller appears on slot 1 at the same time.
    r.native.connect_slot(1);

    r.engine.step().unwrap();
    let ids: Vec<String> = shared
        .devices
        .snapshot()
        .iter()
        .map(|d| d.id.to_string())
        .collect();
    assert!(
        ids.iter().any(|id| id == "XINPUT1"),
        "real native controller enumerated: {ids:?}"
    );
    assert!(
        !ids.iter().any(|id| id == "XINPUT0"),
        "own virtual pad re-enumerated: {ids:?}"
    );
}

#[test]
fn native_controller_feeds_the_pipeline() {
    let joystick = MockJoystickBackend::new();
    let mut r = rig(joystick, EngineOptions::default());
    let shared = r.engine.shared();

    r.native.connect_slot(2);
    r.native.set_state(
        2,
        XboxGamepad {
            buttons: buttons::A | buttons::DPAD_UP,
            left_trigger: 255,
            thumb_lx: i16::MAX,
            ..XboxGamepad::NEUTRAL
        },
    );

    r.engine.step().unwrap();
    let devices = shared.devices.snapshot();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id.as_str(), "XINPUT2");

    shared.assignments.install(vec![SlotAssignment::new(
        devices[0].id.clone(),
        0,
        Arc::new(MappingConfig::xinput_passthrough()),
    )]);
    r.engine.step().unwrap();

    let combined = shared.combined(0);
    assert_eq!(combined.buttons & buttons::A, buttons::A);
    assert_eq!(combined.buttons & buttons::DPAD_UP, buttons::DPAD_UP);
    assert_eq!(combined.left_trigger, 255);
    assert_eq!(combined.thumb_lx, i16::MAX);
}

#[test]
fn rumble_change_suppression_end_to_end() {
    let (mut r, control) = single_pad_rig(0, button_to_a_mapping(0));

    // Attach the pad.
    r.engine.step().unwrap();
    let pad = r.bus.pads().remove(0);

    // The game holds a constant rumble for ten cycles.
    pad.send_feedback(100, 0);
    for _ in 0..10 {
        r.engine.step().unwrap();
    }
    assert_eq!(control.rumble_log(), vec![(100 * 257, 0, 0)]);

    // A new value goes through once.
    pad.send_feedback(100, 50);
    for _ in 0..5 {
        r.engine.step().unwrap();
    }
    assert_eq!(control.rumble_log().len(), 2);
    assert_eq!(control.rumble_log()[1], (100 * 257, 50 * 257, 0));

    // Zero is a stop, exactly one.
    pad.send_feedback(0, 0);
    for _ in 0..5 {
        r.engine.step().unwrap();
    }
    assert_eq!(control.rumble_log().len(), 2);
    assert_eq!(control.stop_count(), 1);
}

#[test]
fn grace_period_counts_exact_cycles() {
    let mut joystick = MockJoystickBackend::new();
    let _control = joystick.add_gamepad("Pad", 0x046d, 0xc216);
    let mut r = rig(
        joystick,
        EngineOptions {
            grace_cycles: 4,
            ..EngineOptions::default()
        },
    );

    r.engine.step().unwrap();
    let shared = r.engine.shared();
    let device = shared.devices.snapshot()[0].id.clone();
    shared.assignments.install(vec![SlotAssignment::new(
        device.clone(),
        0,
        Arc::new(button_to_a_mapping(0)),
    )]);
    r.engine.step().unwrap();
    let pad = r.bus.pads().remove(0);
    assert!(pad.is_connected());

    // Slot goes inactive.
    shared.assignments.install(Vec::new());

    // The cycle that went inactive plus grace_cycles − 1 more: still
    // attached throughout.
    for _ in 0..4 {
        r.engine.step().unwrap();
        assert!(pad.is_connected());
    }
    // One further inactive cycle destroys it.
    r.engine.step().unwrap();
    assert!(!pad.is_connected());

    // Vibration for the slot was cleared on the way out.
    assert_eq!(shared.vibration(0), Vibration::STOP);

    // Reactivating builds a fresh pad on the freed native slot.
    shared.assignments.install(vec![SlotAssignment::new(
        device,
        0,
        Arc::new(button_to_a_mapping(0)),
    )]);
    r.engine.step().unwrap();
    let pads = r.bus.pads();
    assert_eq!(pads.len(), 2);
    assert!(pads[1].is_connected());
}

#[test]
fn boundary_oscillation_never_recreates_the_pad() {
    let (mut r, _control) = single_pad_rig(0, button_to_a_mapping(0));
    let shared = r.engine.shared();
    r.engine.step().unwrap();
    assert_eq!(r.bus.pads().len(), 1);

    let device = shared.devices.snapshot()[0].id.clone();
    for i in 0..50 {
        if i % 2 == 0 {
            shared.assignments.install(Vec::new());
        } else {
            shared.assignments.install(vec![SlotAssignment::new(
                device.clone(),
                0,
                Arc::new(button_to_a_mapping(0)),
            )]);
        }
        r.engine.step().unwrap();
    }
    assert_eq!(r.bus.pads().len(), 1);
    assert!(r.bus.pads()[0].is_connected());
}

#[test]
fn unplug_marks_offline_and_keeps_the_record() {
    let (mut r, control) = single_pad_rig(0, button_to_a_mapping(0));
    let shared = r.engine.shared();

    let events = Arc::new(Mutex::new(0usize));
    let sink = events.clone();
    shared.events.add_listener(
        move |e: &EngineEvent| {
            if matches!(e, EngineEvent::DevicesChanged) {
                *sink.lock().unwrap() += 1;
            }
        },
        EventFilter::DevicesOnly,
    );

    control.set_button(0, true);
    r.engine.step().unwrap();
    assert_eq!(shared.combined(0).buttons, buttons::A);

    control.detach();
    r.engine.step().unwrap();

    let devices = shared.devices.snapshot();
    assert_eq!(devices.len(), 1, "record must survive the unplug");
    assert!(!devices[0].is_online());
    // No contributor left: the slot combines to neutral.
    assert_eq!(shared.combined(0), XboxGamepad::NEUTRAL);
    assert_eq!(*events.lock().unwrap(), 1);

    // Replug: same id comes back online, no duplicate record.
    control.attach();
    r.engine.step().unwrap();
    let devices = shared.devices.snapshot();
    assert_eq!(devices.len(), 1);
    assert!(devices[0].is_online());
}

#[test]
fn state_changed_events_track_raw_changes() {
    let (mut r, control) = single_pad_rig(0, button_to_a_mapping(0));
    let shared = r.engine.shared();

    let count = Arc::new(Mutex::new(0usize));
    let sink = count.clone();
    shared.events.add_listener(
        move |e: &EngineEvent| {
            if matches!(e, EngineEvent::StateChanged { .. }) {
                *sink.lock().unwrap() += 1;
            }
        },
        EventFilter::StateOnly,
    );

    // Nothing moves: no events.
    r.engine.step().unwrap();
    r.engine.step().unwrap();
    assert_eq!(*count.lock().unwrap(), 0);

    control.set_axis(1, 9_000);
    r.engine.step().unwrap();
    r.engine.step().unwrap(); // unchanged again
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn hat_drives_dpad_through_the_stack() {
    let mut mapping = MappingConfig::new();
    mapping[TargetOutput::DPadUp] = Binding::pov(0, PovDirection::Up);
    let (mut r, control) = single_pad_rig(0, mapping);
    let shared = r.engine.shared();

    control.set_hat(0, HAT_UP);
    r.engine.step().unwrap();
    assert_eq!(shared.combined(0).buttons, buttons::DPAD_UP);

    control.set_hat(0, 0);
    r.engine.step().unwrap();
    assert_eq!(shared.combined(0).buttons, 0);
}

#[test]
fn missing_bus_disables_output_but_engine_runs() {
    let mut joystick = MockJoystickBackend::new();
    let control = joystick.add_gamepad("Pad", 0x046d, 0xc216);
    let (native, _native_control) = MockNative::new();
    let mut engine = Engine::new(
        Backends {
            joystick: Box::new(joystick),
            native: Box::new(native),
            bus: None,
        },
        EngineOptions::default(),
    );
    let shared = engine.shared();
    assert!(!shared.bus_available());

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    shared.events.add_listener(
        move |e: &EngineEvent| {
            if let EngineEvent::Error { message, .. } = e {
                sink.lock().unwrap().push(message.clone());
            }
        },
        EventFilter::ErrorsOnly,
    );

    engine.step().unwrap();
    let device = shared.devices.snapshot()[0].id.clone();
    shared.assignments.install(vec![SlotAssignment::new(
        device,
        0,
        Arc::new(button_to_a_mapping(0)),
    )]);

    control.set_button(0, true);
    for _ in 0..3 {
        engine.step().unwrap();
    }

    // Mapping and combining still run; only Stage 5 is out.
    assert_eq!(shared.combined(0).buttons, buttons::A);
    // And the degraded mode was reported exactly once.
    let errors = errors.lock().unwrap();
    assert_eq!(
        errors
            .iter()
            .filter(|m| m.contains("bus unavailable"))
            .count(),
        1
    );
}

#[test]
fn transient_sample_failure_skips_only_that_device() {
    let mut joystick = MockJoystickBackend::new();
    let bad = joystick.add_gamepad("Flaky", 0x046d, 0xc216);
    let good = joystick.add_gamepad("Solid", 0x046d, 0xc21d);
    let mut r = rig(joystick, EngineOptions::default());

    r.engine.step().unwrap();
    let shared = r.engine.shared();
    let devices = shared.devices.snapshot();

    let mapping = Arc::new(button_to_a_mapping(0));
    let mut a0 = SlotAssignment::new(devices[0].id.clone(), 0, mapping.clone());
    a0.sort_order = 0;
    let a1 = SlotAssignment::new(devices[1].id.clone(), 1, mapping);
    shared.assignments.install(vec![a0, a1]);

    bad.fail_sampling(true);
    bad.set_button(0, true);
    good.set_button(0, true);
    r.engine.step().unwrap();

    // The healthy device still flows; the flaky one contributes its
    // last-known (neutral) state.
    assert_eq!(shared.combined(1).buttons, buttons::A);
    assert_eq!(shared.combined(0).buttons, 0);

    bad.fail_sampling(false);
    r.engine.step().unwrap();
    assert_eq!(shared.combined(0).buttons, buttons::A);
}

#[test]
fn threaded_run_measures_frequency_and_stops_cleanly() {
    let mut joystick = MockJoystickBackend::new();
    let _control = joystick.add_gamepad("Pad", 0x046d, 0xc216);
    // Small frequency window so a short run produces a measurement.
    let mut r = rig(
        joystick,
        EngineOptions {
            frequency_window: 20,
            ..EngineOptions::default()
        },
    );
    let shared = r.engine.shared();

    let updates = Arc::new(Mutex::new(0usize));
    let sink = updates.clone();
    shared.events.add_listener(
        move |e: &EngineEvent| {
            if matches!(e, EngineEvent::FrequencyUpdated(_)) {
                *sink.lock().unwrap() += 1;
            }
        },
        EventFilter::All,
    );

    r.engine.start().unwrap();
    assert!(shared.is_running());
    assert!(r.engine.step().is_err(), "stepping a running engine");
    std::thread::sleep(std::time::Duration::from_millis(200));
    r.engine.stop();
    assert!(!shared.is_running());

    assert!(shared.measured_frequency() > 0.0);
    assert!(*updates.lock().unwrap() >= 1);

    // The context came back: stepping works again.
    r.engine.step().unwrap();
}
