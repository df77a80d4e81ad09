//! Hardware-free device poll walkthrough.
//!
//! Builds an engine over the mock backends, scripts some motion on a
//! fake gamepad, and dumps each device's raw display state at a UI-ish
//! cadence. Run with `cargo run --example poll`.

use std::time::{Duration, Instant};

use padforge::backends::mock::{MockBus, MockJoystickBackend, MockNative};
use padforge::backends::{Backends, HAT_UP};
use padforge::prelude::*;

fn main() {
    env_logger::init();

    let mut joystick = MockJoystickBackend::new();
    let pad = joystick.add_gamepad("Demo Pad", 0x046d, 0xc216);
    let stick = joystick.add_device(
        "Demo Stick",
        0x231d,
        0x0121,
        DeviceClass::Joystick,
        padforge::DeviceCaps {
            axes: 4,
            sliders: 1,
            hats: 1,
            buttons: 24,
            rumble: false,
            haptics: None,
            sensors: false,
        },
    );

    let (native, native_control) = MockNative::new();
    let (bus, _bus_control) = MockBus::new();
    let mut engine = Engine::new(
        Backends {
            joystick: Box::new(joystick),
            native: Box::new(native),
            bus: Some(Box::new(bus.with_native(native_control))),
        },
        EngineOptions::default(),
    );
    let shared = engine.shared();
    engine.start().expect("start pipeline");

    println!("Discovered devices:");
    std::thread::sleep(Duration::from_millis(10));
    for device in shared.devices.snapshot() {
        let caps = device.caps();
        println!(
            "  {} ({}) class={:?} axes={} sliders={} hats={} buttons={}",
            device.name(),
            device.id,
            device.class,
            caps.axes,
            caps.sliders,
            caps.hats,
            caps.buttons
        );
    }

    // Script some motion and watch the raw display copies track it.
    let start = Instant::now();
    let mut tick = 0u32;
    while start.elapsed() < Duration::from_secs(2) {
        tick += 1;
        let wave = ((tick as f32 / 10.0).sin() * 30_000.0) as i16;
        pad.set_axis(0, wave);
        pad.set_button(0, tick % 20 < 10);
        stick.set_axis(1, -wave);
        stick.set_hat(0, if tick % 30 < 15 { HAT_UP } else { 0 });

        std::thread::sleep(Duration::from_millis(40));

        for device in shared.devices.snapshot() {
            let raw = device.raw.load();
            println!(
                "{}: X={:#06x} Y={:#06x} hat={} b0={}",
                device.name(),
                raw.axis(0),
                raw.axis(1),
                raw.hat(0),
                raw.button(0)
            );
        }
    }

    engine.stop();
    println!("measured frequency: {:.1} Hz", shared.measured_frequency());
}
