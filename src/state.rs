//! Raw per-device input state.
//!
//! [`RawInputState`] is the fixed-size snapshot Stage 2 fills for every
//! online device and Stage 3 maps from. Array sizes are compile-time
//! constants; entries beyond a device's declared capability counts always
//! read as the neutral value, so consumers never need to range-check
//! against capabilities.
//!
//! [`SharedRawState`] is the display copy: a per-field atomic mirror the
//! pipeline stores into after each read so UI/telemetry readers can sample
//! it from any thread. Readers may observe values from two different
//! cycles (a torn tuple); that is acceptable because the shared copy is
//! only ever used for display, never for mapping.

use std::sync::atomic::{AtomicI32, AtomicU16, AtomicU64, Ordering};

/// Maximum axes carried per device.
pub const MAX_AXES: usize = 8;
/// Maximum sliders carried per device.
pub const MAX_SLIDERS: usize = 2;
/// Maximum hats carried per device.
pub const MAX_HATS: usize = 4;
/// Maximum buttons carried per device.
pub const MAX_BUTTONS: usize = 128;

/// Neutral (centred) value for axes and sliders.
pub const AXIS_NEUTRAL: u16 = 0x8000;
/// Neutral value for hats (no direction pressed).
pub const HAT_NEUTRAL: i32 = -1;

/// Snapshot of one device's inputs.
///
/// Axes and sliders are unsigned 16-bit with centre `0x8000`. Hats are in
/// centidegrees `0..36000` (up = 0, clockwise) or `-1` for centred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawInputState {
    /// Axis values, `0x0000..=0xFFFF`, centre `0x8000`.
    pub axes: [u16; MAX_AXES],
    /// Slider values, same encoding as axes.
    pub sliders: [u16; MAX_SLIDERS],
    /// Hat values in centidegrees, `-1` = centred.
    pub hats: [i32; MAX_HATS],
    /// Button states.
    pub buttons: [bool; MAX_BUTTONS],
}

impl Default for RawInputState {
    fn default() -> Self {
        RawInputState::NEUTRAL
    }
}

impl RawInputState {
    /// All entries at their neutral value.
    pub const NEUTRAL: RawInputState = RawInputState {
        axes: [AXIS_NEUTRAL; MAX_AXES],
        sliders: [AXIS_NEUTRAL; MAX_SLIDERS],
        hats: [HAT_NEUTRAL; MAX_HATS],
        buttons: [false; MAX_BUTTONS],
    };

    /// Axis value at `index`, neutral when out of range.
    #[inline]
    pub fn axis(&self, index: usize) -> u16 {
        self.axes.get(index).copied().unwrap_or(AXIS_NEUTRAL)
    }

    /// Slider value at `index`, neutral when out of range.
    #[inline]
    pub fn slider(&self, index: usize) -> u16 {
        self.sliders.get(index).copied().unwrap_or(AXIS_NEUTRAL)
    }

    /// Hat value at `index` in centidegrees, `-1` when out of range.
    #[inline]
    pub fn hat(&self, index: usize) -> i32 {
        self.hats.get(index).copied().unwrap_or(HAT_NEUTRAL)
    }

    /// Button state at `index`, released when out of range.
    #[inline]
    pub fn button(&self, index: usize) -> bool {
        self.buttons.get(index).copied().unwrap_or(false)
    }
}

/// Pack the 128 button booleans into two words (bit `i` of word `i / 64`).
fn pack_buttons(buttons: &[bool; MAX_BUTTONS]) -> [u64; 2] {
    let mut words = [0u64; 2];
    for (i, &pressed) in buttons.iter().enumerate() {
        if pressed {
            words[i / 64] |= 1u64 << (i % 64);
        }
    }
    words
}

fn unpack_buttons(words: [u64; 2]) -> [bool; MAX_BUTTONS] {
    let mut buttons = [false; MAX_BUTTONS];
    for (i, slot) in buttons.iter_mut().enumerate() {
        *slot = words[i / 64] >> (i % 64) & 1 != 0;
    }
    buttons
}

/// Per-field atomic mirror of a [`RawInputState`], for display readers.
///
/// Single writer (the pipeline thread), any number of readers. All
/// accesses are `Relaxed`; the struct makes no cross-field coherence
/// promise.
#[derive(Debug, Default)]
pub struct SharedRawState {
    axes: [AtomicU16; MAX_AXES],
    sliders: [AtomicU16; MAX_SLIDERS],
    hats: [AtomicI32; MAX_HATS],
    buttons: [AtomicU64; 2],
}

impl SharedRawState {
    /// Publish a freshly-read state.
    pub fn store(&self, state: &RawInputState) {
        for (slot, &v) in self.axes.iter().zip(state.axes.iter()) {
            slot.store(v, Ordering::Relaxed);
        }
        for (slot, &v) in self.sliders.iter().zip(state.sliders.iter()) {
            slot.store(v, Ordering::Relaxed);
        }
        for (slot, &v) in self.hats.iter().zip(state.hats.iter()) {
            slot.store(v, Ordering::Relaxed);
        }
        for (slot, &w) in self.buttons.iter().zip(pack_buttons(&state.buttons).iter()) {
            slot.store(w, Ordering::Relaxed);
        }
    }

    /// Reset every field to neutral (device went offline).
    pub fn clear(&self) {
        self.store(&RawInputState::NEUTRAL);
    }

    /// Sample the current values into an owned snapshot.
    pub fn load(&self) -> RawInputState {
        let mut state = RawInputState::NEUTRAL;
        for (slot, v) in self.axes.iter().zip(state.axes.iter_mut()) {
            *v = slot.load(Ordering::Relaxed);
        }
        for (slot, v) in self.sliders.iter().zip(state.sliders.iter_mut()) {
            *v = slot.load(Ordering::Relaxed);
        }
        for (slot, v) in self.hats.iter().zip(state.hats.iter_mut()) {
            *v = slot.load(Ordering::Relaxed);
        }
        state.buttons = unpack_buttons([
            self.buttons[0].load(Ordering::Relaxed),
            self.buttons[1].load(Ordering::Relaxed),
        ]);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_reads_are_neutral() {
        let state = RawInputState::NEUTRAL;
        assert_eq!(state.axis(MAX_AXES), AXIS_NEUTRAL);
        assert_eq!(state.slider(MAX_SLIDERS + 3), AXIS_NEUTRAL);
        assert_eq!(state.hat(MAX_HATS), HAT_NEUTRAL);
        assert!(!state.button(MAX_BUTTONS * 2));
    }

    #[test]
    fn shared_state_round_trips() {
        let mut state = RawInputState::NEUTRAL;
        state.axes[0] = 0xFFFF;
        state.axes[7] = 0;
        state.sliders[1] = 0x1234;
        state.hats[2] = 31500;
        state.buttons[0] = true;
        state.buttons[63] = true;
        state.buttons[64] = true;
        state.buttons[127] = true;

        let shared = SharedRawState::default();
        shared.store(&state);
        assert_eq!(shared.load(), state);

        shared.clear();
        assert_eq!(shared.load(), RawInputState::NEUTRAL);
    }
}
