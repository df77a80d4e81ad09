//! Mapping configurations.
//!
//! A [`MappingConfig`] tells the mapper how one physical device fills one
//! Xbox-shaped output: 21 bindings (one per [`TargetOutput`]), the
//! per-stick dead-zone parameters, and the force-feedback gains. Configs
//! are identified by a stable checksum over their contents and shared by
//! `Arc` when identical, so the same profile bound to several devices is
//! stored once.
//!
//! The output set is a static table ([`TargetOutput::ALL`] plus
//! [`TargetOutput::label`]); persistence and UIs walk the table instead of
//! naming fields one by one.

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::descriptor::{Binding, PovDirection, SourceKind};
use crate::device::fnv1a64;
use crate::gamepad::buttons;

/// Full positive travel of a thumb axis.
pub const STICK_MAX: f64 = i16::MAX as f64;

/// The 21 Xbox outputs a mapping can feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetOutput {
    A,
    B,
    X,
    Y,
    LeftShoulder,
    RightShoulder,
    Back,
    Start,
    Guide,
    LeftThumb,
    RightThumb,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    LeftTrigger,
    RightTrigger,
    LeftStickX,
    LeftStickY,
    RightStickX,
    RightStickY,
}

impl TargetOutput {
    /// Every output, in table order. Indexes into a config's binding array.
    pub const ALL: [TargetOutput; 21] = [
        TargetOutput::A,
        TargetOutput::B,
        TargetOutput::X,
        TargetOutput::Y,
        TargetOutput::LeftShoulder,
        TargetOutput::RightShoulder,
        TargetOutput::Back,
        TargetOutput::Start,
        TargetOutput::Guide,
        TargetOutput::LeftThumb,
        TargetOutput::RightThumb,
        TargetOutput::DPadUp,
        TargetOutput::DPadDown,
        TargetOutput::DPadLeft,
        TargetOutput::DPadRight,
        TargetOutput::LeftTrigger,
        TargetOutput::RightTrigger,
        TargetOutput::LeftStickX,
        TargetOutput::LeftStickY,
        TargetOutput::RightStickX,
        TargetOutput::RightStickY,
    ];

    /// Stable label used by persistence and display.
    pub fn label(self) -> &'static str {
        match self {
            TargetOutput::A => "ButtonA",
            TargetOutput::B => "ButtonB",
            TargetOutput::X => "ButtonX",
            TargetOutput::Y => "ButtonY",
            TargetOutput::LeftShoulder => "LeftShoulder",
            TargetOutput::RightShoulder => "RightShoulder",
            TargetOutput::Back => "ButtonBack",
            TargetOutput::Start => "ButtonStart",
            TargetOutput::Guide => "ButtonGuide",
            TargetOutput::LeftThumb => "LeftThumb",
            TargetOutput::RightThumb => "RightThumb",
            TargetOutput::DPadUp => "DPadUp",
            TargetOutput::DPadDown => "DPadDown",
            TargetOutput::DPadLeft => "DPadLeft",
            TargetOutput::DPadRight => "DPadRight",
            TargetOutput::LeftTrigger => "LeftTrigger",
            TargetOutput::RightTrigger => "RightTrigger",
            TargetOutput::LeftStickX => "LeftThumbX",
            TargetOutput::LeftStickY => "LeftThumbY",
            TargetOutput::RightStickX => "RightThumbX",
            TargetOutput::RightStickY => "RightThumbY",
        }
    }

    /// XUSB bit for digital outputs (`None` for triggers and stick axes).
    pub fn button_mask(self) -> Option<u16> {
        Some(match self {
            TargetOutput::A => buttons::A,
            TargetOutput::B => buttons::B,
            TargetOutput::X => buttons::X,
            TargetOutput::Y => buttons::Y,
            TargetOutput::LeftShoulder => buttons::LEFT_SHOULDER,
            TargetOutput::RightShoulder => buttons::RIGHT_SHOULDER,
            TargetOutput::Back => buttons::BACK,
            TargetOutput::Start => buttons::START,
            TargetOutput::Guide => buttons::GUIDE,
            TargetOutput::LeftThumb => buttons::LEFT_THUMB,
            TargetOutput::RightThumb => buttons::RIGHT_THUMB,
            TargetOutput::DPadUp => buttons::DPAD_UP,
            TargetOutput::DPadDown => buttons::DPAD_DOWN,
            TargetOutput::DPadLeft => buttons::DPAD_LEFT,
            TargetOutput::DPadRight => buttons::DPAD_RIGHT,
            _ => return None,
        })
    }

    /// Index into a config's binding array; declaration order matches
    /// [`TargetOutput::ALL`].
    #[inline]
    fn position(self) -> usize {
        self as usize
    }
}

fn default_gain() -> u8 {
    100
}

/// Radial dead-zone parameters for one stick, in percent of full travel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickZones {
    /// Inner radius below which the stick reads centred, `0..=100`.
    #[serde(default)]
    pub dead_zone: u8,
    /// Outer shift that stretches the live annulus over the full range,
    /// `0..=100`.
    #[serde(default)]
    pub anti_dead_zone: u8,
}

impl StickZones {
    /// Apply the radial dead-zone / anti-dead-zone to a signed stick pair.
    ///
    /// Uses the L2 magnitude of the pair: inside the dead radius the stick
    /// reads `(0, 0)`; outside it the remaining annulus is stretched across
    /// `[anti_dead_zone·max, max]`, preserving direction. Components clamp
    /// to the `i16` range, so the `(-32768, y)` corner cannot overflow.
    pub fn apply(&self, x: i16, y: i16) -> (i16, i16) {
        if self.dead_zone == 0 && self.anti_dead_zone == 0 {
            return (x, y);
        }

        let fx = x as f64;
        let fy = y as f64;
        let magnitude = (fx * fx + fy * fy).sqrt();
        let dead = self.dead_zone.min(100) as f64 / 100.0 * STICK_MAX;
        if magnitude < dead || magnitude == 0.0 {
            return (0, 0);
        }

        let anti = self.anti_dead_zone.min(100) as f64 / 100.0 * STICK_MAX;
        let stretched = anti + (magnitude - dead) / (STICK_MAX - dead) * (STICK_MAX - anti);
        let scale = stretched / magnitude;
        (
            (fx * scale).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16,
            (fy * scale).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16,
        )
    }
}

/// Force-feedback routing parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceParams {
    /// Master gain, `0..=100`.
    #[serde(default = "default_gain")]
    pub overall_gain: u8,
    /// Heavy-motor gain, `0..=100`.
    #[serde(default = "default_gain")]
    pub left_gain: u8,
    /// Light-motor gain, `0..=100`.
    #[serde(default = "default_gain")]
    pub right_gain: u8,
    /// Exchange the motors after gain scaling.
    #[serde(default)]
    pub swap_motors: bool,
    /// Effect-type index for haptic-capable devices.
    #[serde(default)]
    pub effect_type: u8,
}

impl Default for ForceParams {
    fn default() -> Self {
        ForceParams {
            overall_gain: 100,
            left_gain: 100,
            right_gain: 100,
            swap_motors: false,
            effect_type: 0,
        }
    }
}

/// One device-to-Xbox translation profile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MappingConfig {
    bindings: [Binding; 21],
    /// Left-stick dead-zone parameters (shared by X and Y).
    pub left_stick: StickZones,
    /// Right-stick dead-zone parameters.
    pub right_stick: StickZones,
    /// Force-feedback parameters.
    pub force: ForceParams,
}

impl Index<TargetOutput> for MappingConfig {
    type Output = Binding;

    fn index(&self, output: TargetOutput) -> &Binding {
        &self.bindings[output.position()]
    }
}

impl IndexMut<TargetOutput> for MappingConfig {
    fn index_mut(&mut self, output: TargetOutput) -> &mut Binding {
        &mut self.bindings[output.position()]
    }
}

impl MappingConfig {
    /// An all-unbound config with default gains.
    pub fn new() -> MappingConfig {
        MappingConfig::default()
    }

    /// The canonical passthrough profile for an XInput-shaped source
    /// (6 axes, 1 hat, 16 buttons placed by XUSB bit index, the way the
    /// native back-end reads them). Used by demos and as a sane starting
    /// point for new assignments.
    pub fn xinput_passthrough() -> MappingConfig {
        let mut config = MappingConfig::new();
        config[TargetOutput::A] = Binding::source(SourceKind::Button, 12);
        config[TargetOutput::B] = Binding::source(SourceKind::Button, 13);
        config[TargetOutput::X] = Binding::source(SourceKind::Button, 14);
        config[TargetOutput::Y] = Binding::source(SourceKind::Button, 15);
        config[TargetOutput::LeftShoulder] = Binding::source(SourceKind::Button, 8);
        config[TargetOutput::RightShoulder] = Binding::source(SourceKind::Button, 9);
        config[TargetOutput::Back] = Binding::source(SourceKind::Button, 5);
        config[TargetOutput::Start] = Binding::source(SourceKind::Button, 4);
        config[TargetOutput::LeftThumb] = Binding::source(SourceKind::Button, 6);
        config[TargetOutput::RightThumb] = Binding::source(SourceKind::Button, 7);
        config[TargetOutput::Guide] = Binding::source(SourceKind::Button, 10);
        config[TargetOutput::DPadUp] = Binding::pov(0, PovDirection::Up);
        config[TargetOutput::DPadDown] = Binding::pov(0, PovDirection::Down);
        config[TargetOutput::DPadLeft] = Binding::pov(0, PovDirection::Left);
        config[TargetOutput::DPadRight] = Binding::pov(0, PovDirection::Right);
        config[TargetOutput::LeftStickX] = Binding::source(SourceKind::Axis, 0);
        config[TargetOutput::LeftStickY] = Binding::source(SourceKind::Axis, 1);
        config[TargetOutput::RightStickX] = Binding::source(SourceKind::Axis, 2);
        config[TargetOutput::RightStickY] = Binding::source(SourceKind::Axis, 3);
        config[TargetOutput::LeftTrigger] = Binding::source(SourceKind::Axis, 4);
        config[TargetOutput::RightTrigger] = Binding::source(SourceKind::Axis, 5);
        config
    }

    /// Stable checksum over the canonical field serialisation.
    ///
    /// The canonical form walks the output table in order, so two configs
    /// with the same contents always agree, independent of how they were
    /// built or which file they came from.
    pub fn checksum(&self) -> String {
        let mut canon = String::new();
        for output in TargetOutput::ALL {
            canon.push_str(output.label());
            canon.push('=');
            canon.push_str(&self[output].to_string());
            canon.push('\n');
        }
        canon.push_str(&format!(
            "zones={},{},{},{}\n",
            self.left_stick.dead_zone,
            self.left_stick.anti_dead_zone,
            self.right_stick.dead_zone,
            self.right_stick.anti_dead_zone,
        ));
        canon.push_str(&format!(
            "force={},{},{},{},{}\n",
            self.force.overall_gain,
            self.force.left_gain,
            self.force.right_gain,
            self.force.swap_motors as u8,
            self.force.effect_type,
        ));
        format!("{:016x}", fnv1a64(canon.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_table_is_complete_and_unique() {
        assert_eq!(TargetOutput::ALL.len(), 21);
        let mut labels: Vec<&str> = TargetOutput::ALL.iter().map(|o| o.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), 21);
        // 15 digital outputs carry a button bit, 6 analog ones don't.
        let digital = TargetOutput::ALL
            .iter()
            .filter(|o| o.button_mask().is_some())
            .count();
        assert_eq!(digital, 15);
    }

    #[test]
    fn checksum_tracks_content() {
        let a = MappingConfig::xinput_passthrough();
        let mut b = MappingConfig::xinput_passthrough();
        assert_eq!(a.checksum(), b.checksum());

        b[TargetOutput::A] = Binding::source(SourceKind::Button, 1);
        assert_ne!(a.checksum(), b.checksum());

        let mut c = MappingConfig::xinput_passthrough();
        c.force.swap_motors = true;
        assert_ne!(a.checksum(), c.checksum());
    }

    #[test]
    fn dead_zone_swallows_small_deflections() {
        let zones = StickZones {
            dead_zone: 20,
            anti_dead_zone: 0,
        };
        // 0x8800 raw is 0x0800 signed: well inside a 20% dead radius.
        assert_eq!(zones.apply(0x0800, 0), (0, 0));
        // Full deflection survives at exactly full scale.
        assert_eq!(zones.apply(i16::MAX, 0), (i16::MAX, 0));
    }

    #[test]
    fn anti_dead_zone_lifts_the_floor() {
        let zones = StickZones {
            dead_zone: 0,
            anti_dead_zone: 25,
        };
        let (x, _) = zones.apply(1000, 0);
        let floor = (0.25 * STICK_MAX) as i16;
        assert!(x > floor, "{x} should clear the {floor} anti-dead floor");
        assert_eq!(zones.apply(0, 0), (0, 0));
    }

    #[test]
    fn extreme_corners_do_not_overflow() {
        let zones = StickZones {
            dead_zone: 10,
            anti_dead_zone: 10,
        };
        for (x, y) in [
            (i16::MIN, i16::MIN),
            (i16::MIN, i16::MAX),
            (i16::MAX, i16::MAX),
            (i16::MIN, 0),
        ] {
            let (ox, oy) = zones.apply(x, y);
            // Direction is preserved, magnitude stays in range.
            assert_eq!(ox.signum(), x.signum());
            assert_eq!(oy.signum(), y.signum());
        }
    }

    #[test]
    fn zero_zones_are_identity() {
        let zones = StickZones::default();
        assert_eq!(zones.apply(-1234, 4321), (-1234, 4321));
        assert_eq!(zones.apply(i16::MIN, i16::MAX), (i16::MIN, i16::MAX));
    }
}
