//! Scriptable in-memory backends.
//!
//! These implement all three platform contracts against plain shared
//! state, so tests and demos can run the full pipeline without hardware:
//! script a device's raw state, step the engine, and inspect what reached
//! the virtual bus or the rumble motors.
//!
//! Each mock hands out a `*Control` handle that owns the scripting side:
//! the pipeline sees only the trait object, the test keeps the control.
//! The bus can be linked to the native mock so a connecting virtual pad
//! shows up in the native slot mask, the way a real virtual controller
//! appears in the OS XInput stack (which is what loopback prevention and
//! the attach wait poll for).

use std::sync::{Arc, Mutex};

use crate::backends::{
    DiscoveredDevice, FeedbackHandler, HapticEffect, JoystickBackend, JoystickHandle, NativeSlots,
    NativeState, RawSample, VirtualBus, VirtualPad, MAX_RAW_AXES,
};
use crate::device::{DeviceCaps, DeviceClass, HapticKind};
use crate::gamepad::XboxGamepad;
use crate::state::{MAX_BUTTONS, MAX_HATS};
use crate::{Error, Result};

/* =========================
   Joystick backend
========================= */

#[derive(Debug)]
struct MockDeviceState {
    info: DiscoveredDevice,
    caps: DeviceCaps,
    attached: bool,
    fail_open: bool,
    fail_sample: bool,
    sample: RawSample,
    rumble_log: Vec<(u16, u16, u32)>,
    stop_count: usize,
    next_effect_id: u32,
    active_effects: Vec<(u32, HapticEffect)>,
    effect_log: Vec<String>,
}

/// Scripting handle for one mock joystick.
#[derive(Clone, Debug)]
pub struct MockDeviceControl {
    state: Arc<Mutex<MockDeviceState>>,
}

impl MockDeviceControl {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockDeviceState> {
        self.state.lock().expect("mock device lock")
    }

    /// Replace the whole raw sample.
    pub fn set_sample(&self, sample: RawSample) {
        self.lock().sample = sample;
    }

    /// Set one signed axis value.
    pub fn set_axis(&self, index: usize, value: i16) {
        assert!(index < MAX_RAW_AXES);
        self.lock().sample.axes[index] = value;
    }

    /// Set one button.
    pub fn set_button(&self, index: usize, pressed: bool) {
        assert!(index < MAX_BUTTONS);
        self.lock().sample.buttons[index] = pressed;
    }

    /// Set a hat direction mask (`HAT_*` bits).
    pub fn set_hat(&self, index: usize, mask: u8) {
        assert!(index < MAX_HATS);
        self.lock().sample.hats[index] = mask;
    }

    /// Unplug the device: it disappears from enumeration and the open
    /// handle reports not-attached.
    pub fn detach(&self) {
        self.lock().attached = false;
    }

    /// Plug the device back in.
    pub fn attach(&self) {
        self.lock().attached = true;
    }

    /// Make the next `sample` calls fail (transient device error).
    pub fn fail_sampling(&self, fail: bool) {
        self.lock().fail_sample = fail;
    }

    /// Make `open` fail while the device stays enumerable.
    pub fn fail_opening(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    /// Rumble commands seen so far, as `(left, right, duration_ms)`.
    pub fn rumble_log(&self) -> Vec<(u16, u16, u32)> {
        self.lock().rumble_log.clone()
    }

    /// Number of explicit rumble stops.
    pub fn stop_count(&self) -> usize {
        self.lock().stop_count
    }

    /// Haptic lifecycle log (`create`/`update`/`destroy` entries).
    pub fn effect_log(&self) -> Vec<String> {
        self.lock().effect_log.clone()
    }

    /// Currently running haptic effects.
    pub fn active_effects(&self) -> Vec<(u32, HapticEffect)> {
        self.lock().active_effects.clone()
    }
}

/// Joystick backend over a scriptable device list.
#[derive(Default)]
pub struct MockJoystickBackend {
    devices: Vec<MockDeviceControl>,
}

impl MockJoystickBackend {
    pub fn new() -> MockJoystickBackend {
        MockJoystickBackend::default()
    }

    /// Add a device and return its scripting control.
    pub fn add_device(
        &mut self,
        name: &str,
        vid: u16,
        pid: u16,
        class: DeviceClass,
        caps: DeviceCaps,
    ) -> MockDeviceControl {
        let index = self.devices.len();
        let control = MockDeviceControl {
            state: Arc::new(Mutex::new(MockDeviceState {
                info: DiscoveredDevice {
                    path: Some(format!("mock/{vid:04x}:{pid:04x}/{index}")),
                    vid,
                    pid,
                    name: name.to_string(),
                    class,
                },
                caps,
                attached: true,
                fail_open: false,
                fail_sample: false,
                sample: RawSample::default(),
                rumble_log: Vec::new(),
                stop_count: 0,
                next_effect_id: 1,
                active_effects: Vec::new(),
                effect_log: Vec::new(),
            })),
        };
        self.devices.push(control.clone());
        control
    }

    /// Convenience: a rumble-capable 6-axis gamepad.
    pub fn add_gamepad(&mut self, name: &str, vid: u16, pid: u16) -> MockDeviceControl {
        self.add_device(
            name,
            vid,
            pid,
            DeviceClass::Gamepad,
            DeviceCaps {
                axes: 6,
                sliders: 0,
                hats: 1,
                buttons: 16,
                rumble: true,
                haptics: None,
                sensors: false,
            },
        )
    }

    /// Convenience: a haptic-effect device (no plain rumble).
    pub fn add_haptic_device(
        &mut self,
        name: &str,
        vid: u16,
        pid: u16,
        kind: HapticKind,
    ) -> MockDeviceControl {
        self.add_device(
            name,
            vid,
            pid,
            DeviceClass::Wheel,
            DeviceCaps {
                axes: 3,
                sliders: 0,
                hats: 0,
                buttons: 12,
                rumble: false,
                haptics: Some(kind),
                sensors: false,
            },
        )
    }

    fn attached(&self) -> Vec<&MockDeviceControl> {
        self.devices.iter().filter(|d| d.lock().attached).collect()
    }
}

impl JoystickBackend for MockJoystickBackend {
    fn device_count(&mut self) -> usize {
        self.attached().len()
    }

    fn device_info(&mut self, index: usize) -> Option<DiscoveredDevice> {
        self.attached().get(index).map(|d| d.lock().info.clone())
    }

    fn open(&mut self, index: usize) -> Result<Box<dyn JoystickHandle>> {
        let control = match self.attached().get(index) {
            Some(control) => (*control).clone(),
            None => return Err(Error::Backend("stale enumeration index".into())),
        };
        if control.lock().fail_open {
            return Err(Error::Backend("mock open failure".into()));
        }
        Ok(Box::new(MockHandle { control }))
    }
}

struct MockHandle {
    control: MockDeviceControl,
}

impl JoystickHandle for MockHandle {
    fn is_attached(&self) -> bool {
        self.control.lock().attached
    }

    fn caps(&self) -> DeviceCaps {
        self.control.lock().caps
    }

    fn sample(&mut self) -> Result<RawSample> {
        let state = self.control.lock();
        if state.fail_sample {
            return Err(Error::Backend("mock sample failure".into()));
        }
        if !state.attached {
            return Err(Error::Backend("device detached".into()));
        }
        Ok(state.sample)
    }

    fn rumble(&mut self, left: u16, right: u16, duration_ms: u32) -> Result<()> {
        self.control.lock().rumble_log.push((left, right, duration_ms));
        Ok(())
    }

    fn stop_rumble(&mut self) -> Result<()> {
        self.control.lock().stop_count += 1;
        Ok(())
    }

    fn haptic_create(&mut self, effect: HapticEffect) -> Result<u32> {
        let mut state = self.control.lock();
        if state.caps.haptics.is_none() {
            return Err(Error::Unsupported("haptic effects"));
        }
        let id = state.next_effect_id;
        state.next_effect_id += 1;
        state.active_effects.push((id, effect));
        state.effect_log.push(format!("create {id} {effect:?}"));
        Ok(id)
    }

    fn haptic_update(&mut self, id: u32, effect: HapticEffect) -> Result<()> {
        let mut state = self.control.lock();
        match state.active_effects.iter_mut().find(|(eid, _)| *eid == id) {
            Some((_, slot)) => *slot = effect,
            None => return Err(Error::Backend("unknown effect id".into())),
        }
        state.effect_log.push(format!("update {id} {effect:?}"));
        Ok(())
    }

    fn haptic_destroy(&mut self, id: u32) -> Result<()> {
        let mut state = self.control.lock();
        state.active_effects.retain(|(eid, _)| *eid != id);
        state.effect_log.push(format!("destroy {id}"));
        Ok(())
    }
}

/* =========================
   Native slots
========================= */

#[derive(Debug, Default)]
struct NativeSlotState {
    connected: bool,
    state: NativeState,
    vibration_log: Vec<(u16, u16)>,
}

#[derive(Debug, Default)]
struct MockNativeState {
    slots: [NativeSlotState; 4],
}

/// Scripting handle for the native slot mock.
#[derive(Clone, Debug, Default)]
pub struct MockNativeControl {
    state: Arc<Mutex<MockNativeState>>,
}

impl MockNativeControl {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockNativeState> {
        self.state.lock().expect("mock native lock")
    }

    /// Plug a native controller into a slot.
    pub fn connect_slot(&self, slot: usize) {
        self.lock().slots[slot].connected = true;
    }

    /// Unplug a slot.
    pub fn disconnect_slot(&self, slot: usize) {
        let mut state = self.lock();
        state.slots[slot].connected = false;
        state.slots[slot].state = NativeState::default();
    }

    /// Script the state a slot reads back; bumps the packet number.
    pub fn set_state(&self, slot: usize, gamepad: XboxGamepad) {
        let mut state = self.lock();
        let entry = &mut state.slots[slot];
        entry.state.gamepad = gamepad;
        entry.state.packet = entry.state.packet.wrapping_add(1);
    }

    /// Vibration commands a slot has received.
    pub fn vibration_log(&self, slot: usize) -> Vec<(u16, u16)> {
        self.lock().slots[slot].vibration_log.clone()
    }
}

/// Native-slot mock; share the control with a [`MockBus`] to let virtual
/// pads occupy native slots on connect.
pub struct MockNative {
    control: MockNativeControl,
}

impl MockNative {
    pub fn new() -> (MockNative, MockNativeControl) {
        let control = MockNativeControl::default();
        (
            MockNative {
                control: control.clone(),
            },
            control,
        )
    }
}

impl NativeSlots for MockNative {
    fn probe(&mut self, slot: usize) -> bool {
        slot < 4 && self.control.lock().slots[slot].connected
    }

    fn read(&mut self, slot: usize) -> Result<NativeState> {
        let state = self.control.lock();
        let entry = state
            .slots
            .get(slot)
            .filter(|s| s.connected)
            .ok_or(Error::Backend("native slot not connected".into()))?;
        Ok(entry.state)
    }

    fn set_vibration(&mut self, slot: usize, left: u16, right: u16) -> Result<()> {
        let mut state = self.control.lock();
        let entry = state
            .slots
            .get_mut(slot)
            .ok_or(Error::Backend("native slot out of range".into()))?;
        entry.vibration_log.push((left, right));
        Ok(())
    }
}

/* =========================
   Virtual bus
========================= */

#[derive(Default)]
struct MockPadState {
    connected: bool,
    os_slot: Option<usize>,
    submissions: Vec<XboxGamepad>,
    feedback: Option<FeedbackHandler>,
}

/// Scripting handle for one created virtual pad.
#[derive(Clone)]
pub struct MockPadControl {
    state: Arc<Mutex<MockPadState>>,
}

impl MockPadControl {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockPadState> {
        self.state.lock().expect("mock pad lock")
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Reports submitted so far.
    pub fn submissions(&self) -> Vec<XboxGamepad> {
        self.lock().submissions.clone()
    }

    /// Last submitted report, neutral before the first submission.
    pub fn last_report(&self) -> XboxGamepad {
        self.lock().submissions.last().copied().unwrap_or_default()
    }

    /// Fire the inbound vibration callback the way the bus driver would.
    pub fn send_feedback(&self, large: u8, small: u8) {
        let mut state = self.lock();
        if let Some(handler) = state.feedback.as_mut() {
            handler(large, small);
        }
    }
}

#[derive(Default)]
struct MockBusState {
    pads: Vec<MockPadControl>,
    native: Option<MockNativeControl>,
}

/// Scripting handle for the bus itself.
#[derive(Clone, Default)]
pub struct MockBusControl {
    state: Arc<Mutex<MockBusState>>,
}

impl MockBusControl {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockBusState> {
        self.state.lock().expect("mock bus lock")
    }

    /// Pads created so far, in creation order.
    pub fn pads(&self) -> Vec<MockPadControl> {
        self.lock().pads.clone()
    }
}

/// Virtual bus mock.
pub struct MockBus {
    control: MockBusControl,
}

impl MockBus {
    pub fn new() -> (MockBus, MockBusControl) {
        let control = MockBusControl::default();
        (
            MockBus {
                control: control.clone(),
            },
            control,
        )
    }

    /// Link to a native mock: connecting pads will occupy the first free
    /// native slot, mirroring how a real virtual controller appears in
    /// the OS XInput stack.
    pub fn with_native(mut self, native: MockNativeControl) -> MockBus {
        self.control.lock().native = Some(native);
        self
    }
}

impl VirtualBus for MockBus {
    fn create(&mut self) -> Result<Box<dyn VirtualPad>> {
        let pad = MockPadControl {
            state: Arc::new(Mutex::new(MockPadState::default())),
        };
        let mut bus = self.control.lock();
        bus.pads.push(pad.clone());
        let native = bus.native.clone();
        drop(bus);
        Ok(Box::new(MockPad { pad, native }))
    }
}

struct MockPad {
    pad: MockPadControl,
    native: Option<MockNativeControl>,
}

impl VirtualPad for MockPad {
    fn connect(&mut self) -> Result<()> {
        let mut state = self.pad.lock();
        state.connected = true;
        if let Some(native) = &self.native {
            let mut slots = native.lock();
            if let Some(free) = slots.slots.iter().position(|s| !s.connected) {
                slots.slots[free].connected = true;
                state.os_slot = Some(free);
            }
        } else {
            state.os_slot = Some(0);
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let mut state = self.pad.lock();
        state.connected = false;
        if let (Some(native), Some(slot)) = (&self.native, state.os_slot.take()) {
            let mut slots = native.lock();
            slots.slots[slot].connected = false;
            slots.slots[slot].state = NativeState::default();
        }
        Ok(())
    }

    fn submit(&mut self, report: &XboxGamepad) -> Result<()> {
        let mut state = self.pad.lock();
        if !state.connected {
            return Err(Error::Backend("pad not connected".into()));
        }
        state.submissions.push(*report);
        Ok(())
    }

    fn slot_index(&self) -> Option<usize> {
        self.pad.lock().os_slot
    }

    fn set_feedback_handler(&mut self, handler: FeedbackHandler) -> Result<()> {
        self.pad.lock().feedback = Some(handler);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_hides_device_from_enumeration() {
        let mut backend = MockJoystickBackend::new();
        let a = backend.add_gamepad("Pad A", 0x046d, 0xc216);
        let _b = backend.add_gamepad("Pad B", 0x046d, 0xc21d);

        assert_eq!(backend.device_count(), 2);
        a.detach();
        assert_eq!(backend.device_count(), 1);
        assert_eq!(backend.device_info(0).map(|i| i.name), Some("Pad B".into()));
    }

    #[test]
    fn linked_bus_occupies_native_slots() {
        let (mut native, native_control) = MockNative::new();
        native_control.connect_slot(0); // a real controller already there
        let (mut bus, _bus_control) = {
            let (bus, control) = MockBus::new();
            (bus.with_native(native_control.clone()), control)
        };

        let mut pad = bus.create().unwrap();
        pad.connect().unwrap();
        assert_eq!(pad.slot_index(), Some(1));
        assert_eq!(native.connected_mask(), 0b0011);

        pad.disconnect().unwrap();
        assert_eq!(native.connected_mask(), 0b0001);
    }

    #[test]
    fn pad_records_submissions_and_feedback() {
        let (mut bus, control) = MockBus::new();
        let mut pad = bus.create().unwrap();
        pad.connect().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        pad.set_feedback_handler(Box::new(move |l, s| {
            sink.lock().expect("feedback sink").push((l, s));
        }))
        .unwrap();

        let report = XboxGamepad {
            buttons: crate::gamepad::buttons::A,
            ..XboxGamepad::NEUTRAL
        };
        pad.submit(&report).unwrap();

        let pads = control.pads();
        assert_eq!(pads.len(), 1);
        assert_eq!(pads[0].last_report(), report);

        pads[0].send_feedback(200, 10);
        assert_eq!(received.lock().expect("feedback sink").as_slice(), &[(200, 10)]);
    }
}
