//! Stage 3: raw state → per-assignment Xbox output.
//!
//! For every enabled assignment whose device is online and enabled, run
//! the 21 bindings of its mapping config against the device's raw state
//! and store the result in the assignment's staging buffer. Mapping is a
//! pure function of `(RawInputState, MappingConfig)`; all policy
//! (thresholds, trigger scaling, dead zones) lives here and in
//! [`crate::mapping`].

use crate::gamepad::XboxGamepad;
use crate::mapping::{MappingConfig, TargetOutput};
use crate::pipeline::PipelineCtx;
use crate::state::RawInputState;

/// Digital outputs fire at half travel and above.
pub const BUTTON_THRESHOLD: u16 = 0x8000;

/// Centre an unsigned source value onto the signed thumb range.
#[inline]
fn to_signed(value: u16) -> i16 {
    (value as i32 - 0x8000) as i16
}

/// Map one device's raw state through one config.
pub fn map_assignment(raw: &RawInputState, mapping: &MappingConfig) -> XboxGamepad {
    let mut pad = XboxGamepad::NEUTRAL;

    for output in TargetOutput::ALL {
        let binding = &mapping[output];
        if !binding.is_bound() {
            continue;
        }
        let value = binding.read(raw);

        if let Some(mask) = output.button_mask() {
            if value >= BUTTON_THRESHOLD {
                pad.buttons |= mask;
            }
            continue;
        }
        match output {
            // 65535 / 257 = 255: integer scaling is exact at both ends.
            TargetOutput::LeftTrigger => pad.left_trigger = (value / 257) as u8,
            TargetOutput::RightTrigger => pad.right_trigger = (value / 257) as u8,
            TargetOutput::LeftStickX => pad.thumb_lx = to_signed(value),
            TargetOutput::LeftStickY => pad.thumb_ly = to_signed(value),
            TargetOutput::RightStickX => pad.thumb_rx = to_signed(value),
            TargetOutput::RightStickY => pad.thumb_ry = to_signed(value),
            _ => unreachable!("digital outputs handled via button_mask"),
        }
    }

    let (lx, ly) = mapping.left_stick.apply(pad.thumb_lx, pad.thumb_ly);
    pad.thumb_lx = lx;
    pad.thumb_ly = ly;
    let (rx, ry) = mapping.right_stick.apply(pad.thumb_rx, pad.thumb_ry);
    pad.thumb_rx = rx;
    pad.thumb_ry = ry;

    pad
}

pub(crate) fn run(ctx: &mut PipelineCtx) {
    let PipelineCtx {
        runtimes,
        assignments,
        staging,
        ..
    } = ctx;

    for (assignment, entry) in assignments.iter().zip(staging.iter_mut()) {
        *entry = (XboxGamepad::NEUTRAL, false);
        if !assignment.enabled {
            continue;
        }
        // A runtime exists exactly for online devices.
        let Some(rt) = runtimes.get(&assignment.device) else {
            continue;
        };
        if !rt.record.is_enabled() {
            continue;
        }
        *entry = (map_assignment(&rt.raw, &assignment.mapping), true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Binding, PovDirection, SourceKind};
    use crate::gamepad::buttons;
    use crate::mapping::StickZones;

    #[test]
    fn button_passthrough_sets_one_bit() {
        let mut mapping = MappingConfig::new();
        mapping[TargetOutput::A] = Binding::source(SourceKind::Button, 0);

        let mut raw = RawInputState::NEUTRAL;
        assert_eq!(map_assignment(&raw, &mapping), XboxGamepad::NEUTRAL);

        raw.buttons[0] = true;
        let pad = map_assignment(&raw, &mapping);
        assert_eq!(pad.buttons, buttons::A);
        assert_eq!(
            XboxGamepad {
                buttons: 0,
                ..pad
            },
            XboxGamepad::NEUTRAL
        );
    }

    #[test]
    fn axis_to_trigger_scales_exactly() {
        let mut mapping = MappingConfig::new();
        mapping[TargetOutput::LeftTrigger] = Binding::source(SourceKind::Axis, 0);

        let mut raw = RawInputState::NEUTRAL;
        raw.axes[0] = 0;
        assert_eq!(map_assignment(&raw, &mapping).left_trigger, 0);
        raw.axes[0] = 65_535;
        assert_eq!(map_assignment(&raw, &mapping).left_trigger, 255);
        raw.axes[0] = 0x8000;
        assert_eq!(map_assignment(&raw, &mapping).left_trigger, 127);
    }

    #[test]
    fn axis_to_button_uses_threshold() {
        let mut mapping = MappingConfig::new();
        mapping[TargetOutput::RightShoulder] = Binding::source(SourceKind::Axis, 2);

        let mut raw = RawInputState::NEUTRAL;
        raw.axes[2] = BUTTON_THRESHOLD - 1;
        assert_eq!(map_assignment(&raw, &mapping).buttons, 0);
        raw.axes[2] = BUTTON_THRESHOLD;
        assert_eq!(
            map_assignment(&raw, &mapping).buttons,
            buttons::RIGHT_SHOULDER
        );
    }

    #[test]
    fn pov_feeds_dpad_bits() {
        let mut mapping = MappingConfig::new();
        mapping[TargetOutput::DPadUp] = Binding::pov(0, PovDirection::Up);
        mapping[TargetOutput::DPadRight] = Binding::pov(0, PovDirection::Right);

        let mut raw = RawInputState::NEUTRAL;
        raw.hats[0] = 4_500;
        let pad = map_assignment(&raw, &mapping);
        assert_eq!(pad.buttons, buttons::DPAD_UP | buttons::DPAD_RIGHT);
    }

    #[test]
    fn stick_dead_zone_scenario() {
        // left-DZ = 20%, ADZ = 0; a small deflection dies, full scale
        // survives exactly.
        let mut mapping = MappingConfig::new();
        mapping[TargetOutput::LeftStickX] = Binding::source(SourceKind::Axis, 0);
        mapping[TargetOutput::LeftStickY] = Binding::source(SourceKind::Axis, 1);
        mapping.left_stick = StickZones {
            dead_zone: 20,
            anti_dead_zone: 0,
        };

        let mut raw = RawInputState::NEUTRAL;
        raw.axes[0] = 0x8800;
        raw.axes[1] = 0x8000;
        let pad = map_assignment(&raw, &mapping);
        assert_eq!((pad.thumb_lx, pad.thumb_ly), (0, 0));

        raw.axes[0] = 0xFFFF;
        let pad = map_assignment(&raw, &mapping);
        assert_eq!(pad.thumb_lx, i16::MAX);
        assert_eq!(pad.thumb_ly, 0);
    }

    #[test]
    fn axis_extremes_survive_invert_and_half() {
        let mut mapping = MappingConfig::new();
        mapping[TargetOutput::LeftStickX] = "IH Axis 0".parse().unwrap();

        let mut raw = RawInputState::NEUTRAL;
        raw.axes[0] = 0;
        let low = map_assignment(&raw, &mapping).thumb_lx;
        raw.axes[0] = 65_535;
        let high = map_assignment(&raw, &mapping).thumb_lx;
        // H collapses the lower half, I flips: 0 → 65535 → +max; full → 0 → −max.
        assert_eq!(low, i16::MAX);
        assert_eq!(high, i16::MIN);
    }

    #[test]
    fn unbound_outputs_stay_neutral() {
        let mut raw = RawInputState::NEUTRAL;
        raw.axes = [0xFFFF; crate::state::MAX_AXES];
        raw.buttons = [true; crate::state::MAX_BUTTONS];
        assert_eq!(
            map_assignment(&raw, &MappingConfig::new()),
            XboxGamepad::NEUTRAL
        );
    }
}
