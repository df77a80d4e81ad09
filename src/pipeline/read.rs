//! Stage 2: raw state sampling.
//!
//! Samples every online device into its pipeline-owned [`RawInputState`],
//! publishes the display copy, and applies any queued slot vibration
//! through the feedback router. One device failing must never disturb the
//! others: every per-device step is caught and reported.
//!
//! Encoding rules (driver → internal):
//! - axes: signed 16-bit centred 0 → unsigned, `u = s − INT16_MIN`
//! - sliders: driver axis slots 8 and 9, same conversion
//! - hats: four-bit direction mask → centidegrees via the eight-direction
//!   table; an empty or opposing mask reads centred (−1)
//! - native triggers: `0..255` stretched to `0..65535` (`× 257`)
//! - native d-pad: button bits → hat 0; 16 buttons placed by bit index

use crate::backends::{NativeState, RawSample, HAT_DOWN, HAT_LEFT, HAT_RIGHT, HAT_UP};
use crate::device::DeviceCaps;
use crate::events::{EngineEvent, Stage};
use crate::gamepad::buttons;
use crate::pipeline::{feedback, DriverHandle, PipelineCtx};
use crate::state::{RawInputState, MAX_AXES, MAX_BUTTONS, MAX_HATS, MAX_SLIDERS};

/// Signed driver axis to the unsigned internal encoding.
#[inline]
fn to_unsigned(value: i16) -> u16 {
    (value as i32 - i16::MIN as i32) as u16
}

/// Eight-direction hat mask to centidegrees; everything else (empty mask,
/// opposing bits) is centred.
pub(crate) fn hat_to_centidegrees(mask: u8) -> i32 {
    match mask & 0x0f {
        m if m == HAT_UP => 0,
        m if m == HAT_UP | HAT_RIGHT => 4_500,
        m if m == HAT_RIGHT => 9_000,
        m if m == HAT_RIGHT | HAT_DOWN => 13_500,
        m if m == HAT_DOWN => 18_000,
        m if m == HAT_DOWN | HAT_LEFT => 22_500,
        m if m == HAT_LEFT => 27_000,
        m if m == HAT_LEFT | HAT_UP => 31_500,
        _ => -1,
    }
}

/// Convert a joystick-class sample, honouring the declared counts; slots
/// beyond them stay neutral.
pub(crate) fn convert_sample(sample: &RawSample, caps: DeviceCaps) -> RawInputState {
    let mut raw = RawInputState::NEUTRAL;
    for i in 0..(caps.axes as usize).min(MAX_AXES) {
        raw.axes[i] = to_unsigned(sample.axes[i]);
    }
    for i in 0..(caps.sliders as usize).min(MAX_SLIDERS) {
        raw.sliders[i] = to_unsigned(sample.axes[MAX_AXES + i]);
    }
    for i in 0..(caps.hats as usize).min(MAX_HATS) {
        raw.hats[i] = hat_to_centidegrees(sample.hats[i]);
    }
    for i in 0..(caps.buttons as usize).min(MAX_BUTTONS) {
        raw.buttons[i] = sample.buttons[i];
    }
    raw
}

/// Convert a native XInput state into the canonical 6-axis / 1-hat /
/// 16-button layout.
pub(crate) fn convert_native(state: &NativeState) -> RawInputState {
    let pad = &state.gamepad;
    let mut raw = RawInputState::NEUTRAL;

    raw.axes[0] = to_unsigned(pad.thumb_lx);
    raw.axes[1] = to_unsigned(pad.thumb_ly);
    raw.axes[2] = to_unsigned(pad.thumb_rx);
    raw.axes[3] = to_unsigned(pad.thumb_ry);
    // Proportional stretch: 255 → 65535 exactly.
    raw.axes[4] = pad.left_trigger as u16 * 257;
    raw.axes[5] = pad.right_trigger as u16 * 257;

    let mut mask = 0u8;
    if pad.is_pressed(buttons::DPAD_UP) {
        mask |= HAT_UP;
    }
    if pad.is_pressed(buttons::DPAD_DOWN) {
        mask |= HAT_DOWN;
    }
    if pad.is_pressed(buttons::DPAD_LEFT) {
        mask |= HAT_LEFT;
    }
    if pad.is_pressed(buttons::DPAD_RIGHT) {
        mask |= HAT_RIGHT;
    }
    raw.hats[0] = hat_to_centidegrees(mask);

    for bit in 0..16 {
        raw.buttons[bit] = pad.buttons & (1 << bit) != 0;
    }

    raw
}

pub(crate) fn run(ctx: &mut PipelineCtx) {
    let PipelineCtx {
        shared,
        native,
        runtimes,
        assignments,
        ..
    } = ctx;

    for (id, rt) in runtimes.iter_mut() {
        // Sample.
        let sampled = match &mut rt.driver {
            DriverHandle::Joystick(handle) => {
                handle.sample().map(|s| convert_sample(&s, rt.caps))
            }
            DriverHandle::Native { slot } => native.read(*slot).map(|s| convert_native(&s)),
        };
        match sampled {
            Ok(raw) => {
                if raw != rt.raw {
                    rt.raw = raw;
                    rt.record.raw.store(&raw);
                    shared.events.emit(&EngineEvent::StateChanged { device: id.clone() });
                }
            }
            Err(e) => {
                // Transient: keep last state, skip the device this cycle.
                shared
                    .events
                    .report_error(Stage::Read, format!("sample failed: {e}"), Some(id.clone()));
                continue;
            }
        }

        // Route queued vibration. The slot is the device's first enabled
        // assignment; devices without feedback hardware or assignments
        // are left alone.
        if !rt.caps.has_feedback() || !rt.record.is_enabled() {
            continue;
        }
        let Some(assignment) = assignments.iter().find(|a| a.enabled && &a.device == id) else {
            continue;
        };
        let vibration = shared.vibration(assignment.slot);
        if let Err(e) = feedback::apply(
            &mut rt.ff,
            &mut rt.driver,
            native.as_mut(),
            rt.caps,
            vibration,
            &assignment.mapping.force,
        ) {
            shared
                .events
                .report_error(Stage::Read, format!("feedback failed: {e}"), Some(id.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamepad::XboxGamepad;

    #[test]
    fn axis_conversion_is_offset_not_scale() {
        assert_eq!(to_unsigned(i16::MIN), 0x0000);
        assert_eq!(to_unsigned(0), 0x8000);
        assert_eq!(to_unsigned(i16::MAX), 0xFFFF);
    }

    #[test]
    fn hat_table_covers_eight_directions() {
        assert_eq!(hat_to_centidegrees(HAT_UP), 0);
        assert_eq!(hat_to_centidegrees(HAT_UP | HAT_RIGHT), 4_500);
        assert_eq!(hat_to_centidegrees(HAT_RIGHT), 9_000);
        assert_eq!(hat_to_centidegrees(HAT_RIGHT | HAT_DOWN), 13_500);
        assert_eq!(hat_to_centidegrees(HAT_DOWN), 18_000);
        assert_eq!(hat_to_centidegrees(HAT_DOWN | HAT_LEFT), 22_500);
        assert_eq!(hat_to_centidegrees(HAT_LEFT), 27_000);
        assert_eq!(hat_to_centidegrees(HAT_LEFT | HAT_UP), 31_500);
    }

    #[test]
    fn opposing_hat_bits_read_centred() {
        assert_eq!(hat_to_centidegrees(0), -1);
        assert_eq!(hat_to_centidegrees(HAT_UP | HAT_DOWN), -1);
        assert_eq!(hat_to_centidegrees(HAT_LEFT | HAT_RIGHT), -1);
        assert_eq!(hat_to_centidegrees(HAT_UP | HAT_DOWN | HAT_LEFT), -1);
    }

    #[test]
    fn caps_clip_sample_conversion() {
        let mut sample = RawSample::default();
        sample.axes = [i16::MAX; crate::backends::MAX_RAW_AXES];
        sample.buttons = [true; MAX_BUTTONS];
        sample.hats = [HAT_UP; MAX_HATS];

        let caps = DeviceCaps {
            axes: 2,
            sliders: 1,
            hats: 1,
            buttons: 3,
            ..DeviceCaps::default()
        };
        let raw = convert_sample(&sample, caps);

        assert_eq!(raw.axes[1], 0xFFFF);
        assert_eq!(raw.axes[2], 0x8000); // beyond caps: neutral
        assert_eq!(raw.sliders[0], 0xFFFF);
        assert_eq!(raw.sliders[1], 0x8000);
        assert_eq!(raw.hats[0], 0);
        assert_eq!(raw.hats[1], -1);
        assert!(raw.buttons[2]);
        assert!(!raw.buttons[3]);
    }

    #[test]
    fn native_conversion_stretches_triggers_and_places_buttons() {
        let state = NativeState {
            gamepad: XboxGamepad {
                buttons: buttons::A | buttons::DPAD_UP | buttons::DPAD_RIGHT,
                left_trigger: 255,
                right_trigger: 128,
                thumb_lx: i16::MAX,
                thumb_ly: 0,
                thumb_rx: i16::MIN,
                thumb_ry: -1,
            },
            packet: 7,
        };
        let raw = convert_native(&state);

        assert_eq!(raw.axes[0], 0xFFFF);
        assert_eq!(raw.axes[1], 0x8000);
        assert_eq!(raw.axes[2], 0x0000);
        assert_eq!(raw.axes[4], 65_535);
        assert_eq!(raw.axes[5], 128 * 257);
        assert_eq!(raw.hats[0], 4_500);
        // A sits at bit 12 of the XUSB mask.
        assert!(raw.buttons[12]);
        assert!(raw.buttons[0]); // dpad-up bit is also a button by index
        assert!(!raw.buttons[13]);
    }
}
