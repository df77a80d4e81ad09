//! End-to-end forwarding walkthrough on mock hardware.
//!
//! One fake gamepad, assigned to slot 0 with a simple mapping; the engine
//! runs on its own thread while this binary scripts input, watches the
//! combined output land on the virtual pad, and bounces rumble back the
//! other way. Run with `cargo run --example forward`.

use std::sync::Arc;
use std::time::Duration;

use padforge::backends::mock::{MockBus, MockJoystickBackend, MockNative};
use padforge::backends::Backends;
use padforge::prelude::*;

fn main() {
    env_logger::init();

    let mut joystick = MockJoystickBackend::new();
    let pad = joystick.add_gamepad("Demo Pad", 0x046d, 0xc216);

    let (native, native_control) = MockNative::new();
    let (bus, bus_control) = MockBus::new();
    let mut engine = Engine::new(
        Backends {
            joystick: Box::new(joystick),
            native: Box::new(native),
            bus: Some(Box::new(bus.with_native(native_control))),
        },
        EngineOptions::default(),
    );
    let shared = engine.shared();

    // Listen for trouble.
    shared.events.add_listener(
        |event: &EngineEvent| {
            if let EngineEvent::Error {
                stage, message, ..
            } = event
            {
                eprintln!("[{stage}] {message}");
            }
        },
        EventFilter::ErrorsOnly,
    );

    engine.start().expect("start pipeline");
    std::thread::sleep(Duration::from_millis(10));

    // Bind the pad to slot 0: button 0 → A, axes 0/1 → left stick with a
    // 10% dead zone, axis 4 → left trigger.
    let mut mapping = MappingConfig::new();
    mapping[TargetOutput::A] = Binding::source(SourceKind::Button, 0);
    mapping[TargetOutput::LeftStickX] = Binding::source(SourceKind::Axis, 0);
    mapping[TargetOutput::LeftStickY] = Binding::source(SourceKind::Axis, 1);
    mapping[TargetOutput::LeftTrigger] = Binding::source(SourceKind::Axis, 4);
    mapping.left_stick.dead_zone = 10;

    let device = shared.devices.snapshot()[0].id.clone();
    shared
        .assignments
        .install(vec![SlotAssignment::new(device, 0, Arc::new(mapping))]);

    // Drive the stick in a square-ish sweep and press A now and then.
    for step in 0..40u32 {
        pad.set_axis(0, ((step % 20) as i32 * 3_000 - 30_000) as i16);
        pad.set_axis(1, 8_000);
        pad.set_axis(4, (step as i32 * 1_500 - 32_768).clamp(-32_768, 32_767) as i16);
        pad.set_button(0, step % 8 < 4);
        std::thread::sleep(Duration::from_millis(25));

        let combined = shared.combined(0);
        println!(
            "combined[0]: buttons={:#06x} LT={:3} LX={:6} LY={:6}",
            combined.buttons, combined.left_trigger, combined.thumb_lx, combined.thumb_ly
        );

        // Halfway through, the "game" starts rumbling the pad.
        if step == 20 {
            if let Some(vpad) = bus_control.pads().first() {
                vpad.send_feedback(180, 40);
                println!("game rumble sent (180, 40)");
            }
        }
    }

    engine.stop();

    println!(
        "virtual pad saw {} reports; physical pad rumble commands: {:?}",
        bus_control
            .pads()
            .first()
            .map(|p| p.submissions().len())
            .unwrap_or(0),
        pad.rumble_log()
    );
}
