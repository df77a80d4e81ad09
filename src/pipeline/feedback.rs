//! Force-feedback routing.
//!
//! Each FF-capable device assigned to a slot receives that slot's inbound
//! vibration, scaled through its mapping's gains. The router's one hard
//! rule is **change suppression**: re-submitting a bit-identical command
//! restarts the hardware effect and produces audible gaps, so an
//! unchanged pair is never sent twice. Combined with driver-retained
//! (infinite-duration) rumble there is no 100 ms cliff if the pipeline
//! stalls.
//!
//! Haptic-only devices get the vibration translated into their preferred
//! effect family, created on the first non-zero pair, updated in place
//! while running, and destroyed on return to rest.

use crate::backends::{HapticEffect, NativeSlots};
use crate::device::{DeviceCaps, HapticKind};
use crate::gamepad::Vibration;
use crate::mapping::ForceParams;
use crate::pipeline::DriverHandle;
use crate::Result;

/// Per-device force-feedback runtime state, owned by the pipeline.
#[derive(Debug, Default)]
pub struct FFState {
    /// Last pair actually submitted to the driver.
    last_sent: Option<(u16, u16)>,
    /// Mapping parameters at last submission, for change detection: a
    /// gain or effect-type edit must punch through the suppression even
    /// when the final pair happens to match.
    last_params: Option<ForceParams>,
    /// Running haptic effect, if any.
    effect: Option<u32>,
    active: bool,
}

impl FFState {
    pub fn new() -> FFState {
        FFState::default()
    }

    /// Whether the device is currently being driven.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The last pair submitted to the driver.
    pub fn last_sent(&self) -> Option<(u16, u16)> {
        self.last_sent
    }

    /// Forget everything (device went offline; the handle is gone, so any
    /// running effect died with it).
    pub fn clear(&mut self) {
        *self = FFState::default();
    }
}

/// Gain-scale one motor: `clip16(raw · gain/100 · overall/100)`.
fn scale(raw: u16, gain: u8, overall: u8) -> u16 {
    let scaled = raw as u32 * gain.min(100) as u32 * overall.min(100) as u32 / 10_000;
    scaled.min(u16::MAX as u32) as u16
}

/// Translate a motor pair into the device's preferred effect family.
///
/// The sine period is derived from the light (high-frequency) motor:
/// a stronger small motor shortens the period towards 40 ms, idling at
/// 120 ms, which tracks how dual-motor rumble feels on effect hardware.
fn translate(kind: HapticKind, left: u16, right: u16) -> HapticEffect {
    match kind {
        HapticKind::LeftRight => HapticEffect::LeftRight { left, right },
        HapticKind::SinePeriodic => HapticEffect::Sine {
            magnitude: left.max(right),
            period_ms: (120 - right as u32 * 80 / u16::MAX as u32) as u16,
        },
        HapticKind::ConstantForce => HapticEffect::Constant {
            magnitude: left.max(right),
        },
    }
}

/// Route one slot's vibration to one device.
///
/// Returns `Ok(true)` when a driver command was issued, `Ok(false)` when
/// suppression skipped it. On a driver error the last-sent pair is left
/// untouched so the next cycle retries.
pub fn apply(
    state: &mut FFState,
    driver: &mut DriverHandle,
    native: &mut dyn NativeSlots,
    caps: DeviceCaps,
    raw: Vibration,
    force: &ForceParams,
) -> Result<bool> {
    let mut left = scale(raw.left, force.left_gain, force.overall_gain);
    let mut right = scale(raw.right, force.right_gain, force.overall_gain);
    if force.swap_motors {
        std::mem::swap(&mut left, &mut right);
    }

    if state.last_sent == Some((left, right)) && state.last_params.as_ref() == Some(force) {
        return Ok(false);
    }

    // A device that has never been driven needs no stop command; record
    // the rest state and wait for the first real pair.
    if state.last_sent.is_none() && left == 0 && right == 0 {
        state.last_sent = Some((0, 0));
        state.last_params = Some(*force);
        return Ok(false);
    }

    match driver {
        DriverHandle::Native { slot } => {
            native.set_vibration(*slot, left, right)?;
            state.active = left != 0 || right != 0;
        }
        DriverHandle::Joystick(handle) => {
            if caps.rumble {
                if left == 0 && right == 0 {
                    handle.stop_rumble()?;
                    state.active = false;
                } else {
                    // Duration 0 = driver-retained; suppression above is
                    // what keeps this from being re-issued every cycle.
                    handle.rumble(left, right, 0)?;
                    state.active = true;
                }
            } else if let Some(kind) = caps.haptics {
                if left == 0 && right == 0 {
                    if let Some(id) = state.effect.take() {
                        handle.haptic_destroy(id)?;
                    }
                    state.active = false;
                } else {
                    let effect = translate(kind, left, right);
                    match state.effect {
                        Some(id) => handle.haptic_update(id, effect)?,
                        None => state.effect = Some(handle.haptic_create(effect)?),
                    }
                    state.active = true;
                }
            } else {
                // Caller filters on has_feedback(); reaching here means a
                // capability bookkeeping bug upstream.
                return Err(crate::Error::Unsupported("force feedback"));
            }
        }
    }

    state.last_sent = Some((left, right));
    state.last_params = Some(*force);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockJoystickBackend, MockNative};
    use crate::backends::JoystickBackend;

    fn rumble_target() -> (
        crate::backends::mock::MockDeviceControl,
        DriverHandle,
        MockNative,
    ) {
        let mut backend = MockJoystickBackend::new();
        let control = backend.add_gamepad("Pad", 0x046d, 0xc216);
        let handle = backend.open(0).unwrap();
        let (native, _) = MockNative::new();
        (control, DriverHandle::Joystick(handle), native)
    }

    #[test]
    fn identical_pairs_submit_once() {
        let (control, mut driver, mut native) = rumble_target();
        let caps = DeviceCaps {
            rumble: true,
            ..DeviceCaps::default()
        };
        let mut state = FFState::new();
        let force = ForceParams::default();
        let raw = Vibration {
            left: 500,
            right: 0,
        };

        for _ in 0..10 {
            apply(&mut state, &mut driver, &mut native, caps, raw, &force).unwrap();
        }
        assert_eq!(control.rumble_log().len(), 1);
        assert_eq!(state.last_sent(), Some((500, 0)));

        // A different pair goes through.
        apply(
            &mut state,
            &mut driver,
            &mut native,
            caps,
            Vibration {
                left: 500,
                right: 200,
            },
            &force,
        )
        .unwrap();
        assert_eq!(control.rumble_log().len(), 2);

        // Return to rest is a stop, not a zero rumble.
        apply(
            &mut state,
            &mut driver,
            &mut native,
            caps,
            Vibration::STOP,
            &force,
        )
        .unwrap();
        assert_eq!(control.rumble_log().len(), 2);
        assert_eq!(control.stop_count(), 1);
        assert!(!state.is_active());
    }

    #[test]
    fn gain_change_punches_through_suppression() {
        let (control, mut driver, mut native) = rumble_target();
        let caps = DeviceCaps {
            rumble: true,
            ..DeviceCaps::default()
        };
        let mut state = FFState::new();
        let raw = Vibration {
            left: 40_000,
            right: 0,
        };

        let full = ForceParams::default();
        apply(&mut state, &mut driver, &mut native, caps, raw, &full).unwrap();
        assert_eq!(control.rumble_log(), vec![(40_000, 0, 0)]);

        let half = ForceParams {
            overall_gain: 50,
            ..ForceParams::default()
        };
        apply(&mut state, &mut driver, &mut native, caps, raw, &half).unwrap();
        assert_eq!(control.rumble_log().last(), Some(&(20_000, 0, 0)));
    }

    #[test]
    fn swap_exchanges_motors() {
        let (control, mut driver, mut native) = rumble_target();
        let caps = DeviceCaps {
            rumble: true,
            ..DeviceCaps::default()
        };
        let mut state = FFState::new();
        let force = ForceParams {
            swap_motors: true,
            ..ForceParams::default()
        };
        apply(
            &mut state,
            &mut driver,
            &mut native,
            caps,
            Vibration {
                left: 100,
                right: 200,
            },
            &force,
        )
        .unwrap();
        assert_eq!(control.rumble_log(), vec![(200, 100, 0)]);
    }

    #[test]
    fn haptic_lifecycle_create_update_destroy() {
        let mut backend = MockJoystickBackend::new();
        let control =
            backend.add_haptic_device("Wheel", 0x046d, 0xc262, HapticKind::ConstantForce);
        let mut driver = DriverHandle::Joystick(backend.open(0).unwrap());
        let (mut native, _) = MockNative::new();
        let caps = DeviceCaps {
            axes: 3,
            sliders: 0,
            hats: 0,
            buttons: 12,
            rumble: false,
            haptics: Some(HapticKind::ConstantForce),
            sensors: false,
        };
        let mut state = FFState::new();
        let force = ForceParams::default();

        apply(
            &mut state,
            &mut driver,
            &mut native,
            caps,
            Vibration {
                left: 1000,
                right: 0,
            },
            &force,
        )
        .unwrap();
        apply(
            &mut state,
            &mut driver,
            &mut native,
            caps,
            Vibration {
                left: 2000,
                right: 0,
            },
            &force,
        )
        .unwrap();
        apply(
            &mut state,
            &mut driver,
            &mut native,
            caps,
            Vibration::STOP,
            &force,
        )
        .unwrap();

        let log = control.effect_log();
        assert!(log[0].starts_with("create 1"));
        assert!(log[1].starts_with("update 1"));
        assert_eq!(log[2], "destroy 1");
        assert!(control.active_effects().is_empty());
    }

    #[test]
    fn native_targets_route_through_set_vibration() {
        let (mut native, native_control) = MockNative::new();
        native_control.connect_slot(1);
        let mut driver = DriverHandle::Native { slot: 1 };
        let mut state = FFState::new();

        apply(
            &mut state,
            &mut driver,
            &mut native,
            DeviceCaps::XINPUT,
            Vibration {
                left: 300,
                right: 400,
            },
            &ForceParams::default(),
        )
        .unwrap();
        assert_eq!(native_control.vibration_log(1), vec![(300, 400)]);
    }
}
