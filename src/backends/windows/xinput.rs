//! Native XInput slot access.
//!
//! Thin [`NativeSlots`] implementation over `XInputGetState` /
//! `XInputSetState`. The XInput button word already uses the XUSB bit
//! layout, so state passes through without remapping; vibration is the
//! driver-retained kind the feedback router expects.

use windows_sys::Win32::UI::Input::XboxController::{
    XInputGetState, XInputSetState, XINPUT_STATE, XINPUT_VIBRATION,
};

use crate::backends::{NativeSlots, NativeState};
use crate::gamepad::XboxGamepad;
use crate::{Error, Result};

/// `XInputGetState` success code (`ERROR_SUCCESS`).
const SUCCESS: u32 = 0;

/// The native controller API and its four fixed slots.
#[derive(Debug, Default)]
pub struct XInputSlots;

impl XInputSlots {
    pub fn new() -> XInputSlots {
        XInputSlots
    }
}

impl NativeSlots for XInputSlots {
    fn probe(&mut self, slot: usize) -> bool {
        if slot >= 4 {
            return false;
        }
        // FFI struct: must be manually zeroed.
        let mut state: XINPUT_STATE = unsafe { std::mem::zeroed() };
        unsafe { XInputGetState(slot as u32, &mut state) == SUCCESS }
    }

    fn read(&mut self, slot: usize) -> Result<NativeState> {
        if slot >= 4 {
            return Err(Error::Backend("XInput slot out of range".into()));
        }
        let mut state: XINPUT_STATE = unsafe { std::mem::zeroed() };
        let res = unsafe { XInputGetState(slot as u32, &mut state) };
        if res != SUCCESS {
            return Err(Error::Backend(format!(
                "XInputGetState({slot}) failed: {res}"
            )));
        }

        let pad = state.Gamepad;
        Ok(NativeState {
            gamepad: XboxGamepad {
                buttons: pad.wButtons,
                left_trigger: pad.bLeftTrigger,
                right_trigger: pad.bRightTrigger,
                thumb_lx: pad.sThumbLX,
                thumb_ly: pad.sThumbLY,
                thumb_rx: pad.sThumbRX,
                thumb_ry: pad.sThumbRY,
            },
            packet: state.dwPacketNumber,
        })
    }

    fn set_vibration(&mut self, slot: usize, left: u16, right: u16) -> Result<()> {
        if slot >= 4 {
            return Err(Error::Backend("XInput slot out of range".into()));
        }
        let mut vibration = XINPUT_VIBRATION {
            wLeftMotorSpeed: left,
            wRightMotorSpeed: right,
        };
        let res = unsafe { XInputSetState(slot as u32, &mut vibration) };
        if res != SUCCESS {
            return Err(Error::Backend(format!(
                "XInputSetState({slot}) failed: {res}"
            )));
        }
        Ok(())
    }
}
