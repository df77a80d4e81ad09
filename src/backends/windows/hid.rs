//! Joystick-class devices via `hidapi`, decoded with the Windows HID
//! parser (HIDP).
//!
//! Enumeration filters the `hidapi` device list down to game controls:
//! Generic Desktop joysticks/gamepads/multi-axis, Simulation Controls,
//! Physical Interface, and vendor-defined pages. Plain mouse/keyboard
//! endpoints are rejected, as are the `IG_` HID-compat endpoints of
//! XInput controllers (those are owned by the native back-end; opening
//! them here would double-count the device).
//!
//! Each opened device pairs a non-blocking `hidapi` handle (report bytes)
//! with HIDP preparsed data from the same path (report layout). Sampling
//! drains a bounded number of reports and folds them into an absolute
//! [`RawSample`]: axis values rescaled from their logical range onto the
//! signed 16-bit convention, hats standardised to four-bit direction
//! masks, buttons indexed in stable descriptor order.
//!
//! Plain HID exposes no portable rumble surface, so these handles report
//! no feedback capability; force feedback is served by the native and
//! virtual back-ends.

use core::mem::MaybeUninit;
use std::collections::HashMap;
use std::ffi::{CString, OsStr};
use std::os::windows::ffi::OsStrExt;

use hidapi::{HidApi, HidDevice};
use windows_sys::Win32::Devices::HumanInterfaceDevice::{
    HidD_FreePreparsedData, HidD_GetPreparsedData, HidP_GetButtonCaps, HidP_GetCaps,
    HidP_GetUsageValue, HidP_GetUsages, HidP_GetValueCaps, HidP_Input, HIDP_BUTTON_CAPS,
    HIDP_CAPS, HIDP_REPORT_TYPE, HIDP_STATUS_BUFFER_TOO_SMALL, HIDP_STATUS_SUCCESS,
    HIDP_VALUE_CAPS, PHIDP_PREPARSED_DATA,
};
use windows_sys::Win32::Foundation::{
    CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE, NTSTATUS,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};

use crate::backends::{
    DiscoveredDevice, JoystickBackend, JoystickHandle, RawSample, HAT_DOWN, HAT_LEFT, HAT_RIGHT,
    HAT_UP, MAX_RAW_AXES,
};
use crate::device::{DeviceCaps, DeviceClass};
use crate::state::{MAX_BUTTONS, MAX_HATS};
use crate::{Error, Result};

const STATUS_SUCCESS: NTSTATUS = HIDP_STATUS_SUCCESS;
const STATUS_BUFFER_TOO_SMALL: NTSTATUS = HIDP_STATUS_BUFFER_TOO_SMALL;

/// Reports folded into the state per `sample` call; keeps one noisy
/// device from starving the cycle.
const MAX_REPORTS_PER_SAMPLE: usize = 32;

/// Decide whether a `hidapi` entry is a joystick-class game control.
fn accept_device(info: &hidapi::DeviceInfo) -> bool {
    let page = info.usage_page();
    let usage = info.usage();

    let is_generic_desktop = page == 0x01;
    let is_simulation = page == 0x02;
    let is_physical_iface = page == 0x0F;
    let is_vendor_defined = (page & 0xFF00) == 0xFF00;
    if !(is_generic_desktop || is_simulation || is_physical_iface || is_vendor_defined) {
        return false;
    }

    // Plain mouse (0x02) / keyboard (0x06) on Generic Desktop.
    if is_generic_desktop && matches!(usage, 0x02 | 0x06) {
        return false;
    }

    // XInput HID-compat endpoint: the native back-end owns it.
    let path = info.path().to_string_lossy();
    if is_generic_desktop && usage == 0x05 && path.contains("IG_") {
        return false;
    }

    true
}

fn classify(page: u16, usage: u16) -> DeviceClass {
    match (page, usage) {
        (0x01, 0x04) => DeviceClass::Joystick,
        (0x01, 0x05) => DeviceClass::Gamepad,
        (0x02, 0xC8) => DeviceClass::Wheel,
        (0x02, _) => DeviceClass::Flight,
        _ => DeviceClass::Supplemental,
    }
}

struct Entry {
    path: CString,
    vid: u16,
    pid: u16,
    name: String,
    class: DeviceClass,
}

/// The OS input library, hidapi flavour.
pub struct HidJoystickBackend {
    api: HidApi,
    entries: Vec<Entry>,
}

impl HidJoystickBackend {
    pub fn new() -> Result<HidJoystickBackend> {
        let api = HidApi::new().map_err(|e| Error::Backend(format!("hidapi init: {e}")))?;
        Ok(HidJoystickBackend {
            api,
            entries: Vec::new(),
        })
    }

    fn refresh(&mut self) {
        if let Err(e) = self.api.refresh_devices() {
            log::warn!("hidapi refresh failed: {e}");
        }
        self.entries.clear();
        for info in self.api.device_list() {
            if !accept_device(info) {
                continue;
            }
            self.entries.push(Entry {
                path: info.path().to_owned(),
                vid: info.vendor_id(),
                pid: info.product_id(),
                name: info.product_string().unwrap_or("Unknown").to_string(),
                class: classify(info.usage_page(), info.usage()),
            });
        }
    }
}

impl JoystickBackend for HidJoystickBackend {
    fn device_count(&mut self) -> usize {
        self.refresh();
        self.entries.len()
    }

    fn device_info(&mut self, index: usize) -> Option<DiscoveredDevice> {
        let entry = self.entries.get(index)?;
        Some(DiscoveredDevice {
            path: Some(entry.path.to_string_lossy().into_owned()),
            vid: entry.vid,
            pid: entry.pid,
            name: entry.name.clone(),
            class: entry.class,
        })
    }

    fn open(&mut self, index: usize) -> Result<Box<dyn JoystickHandle>> {
        let entry = self
            .entries
            .get(index)
            .ok_or(Error::Backend("stale enumeration index".into()))?;
        let device = self
            .api
            .open_path(&entry.path)
            .map_err(|e| Error::Backend(format!("open {}: {e}", entry.path.to_string_lossy())))?;
        // Sampling runs in a host-controlled loop; reads must not block it.
        let _ = device.set_blocking_mode(false);

        let decoder = HidpDecoder::new(&entry.path.to_string_lossy())
            .ok_or(Error::Backend("HIDP descriptor unavailable".into()))?;
        let caps = decoder.caps();

        Ok(Box::new(HidJoystick {
            device,
            buf: vec![0u8; decoder.report_len.max(1) as usize],
            decoder,
            caps,
            state: RawSample::default(),
            attached: true,
        }))
    }
}

struct HidJoystick {
    device: HidDevice,
    buf: Vec<u8>,
    decoder: HidpDecoder,
    caps: DeviceCaps,
    /// Absolute state folded from the reports seen so far.
    state: RawSample,
    attached: bool,
}

impl JoystickHandle for HidJoystick {
    fn is_attached(&self) -> bool {
        self.attached
    }

    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn sample(&mut self) -> Result<RawSample> {
        for _ in 0..MAX_REPORTS_PER_SAMPLE {
            match self.device.read(&mut self.buf) {
                Ok(0) => break, // nothing pending this cycle
                Ok(n) => {
                    // Windows delivers `[report_id][payload...]` unless the
                    // descriptor uses only report 0.
                    let data = &self.buf[..n];
                    let (report_id, payload) = if self.decoder.only_rid0 {
                        (0u8, data)
                    } else if data.is_empty() {
                        (0u8, data)
                    } else {
                        (data[0], &data[1..])
                    };
                    self.decoder.decode(report_id, payload, &mut self.state);
                }
                Err(e) => {
                    self.attached = false;
                    return Err(Error::Backend(format!("read failed: {e}")));
                }
            }
        }
        Ok(self.state)
    }

    fn rumble(&mut self, _left: u16, _right: u16, _duration_ms: u32) -> Result<()> {
        Err(Error::Unsupported("HID rumble"))
    }

    fn stop_rumble(&mut self) -> Result<()> {
        Err(Error::Unsupported("HID rumble"))
    }
}

/* =========================
   HIDP decoding
========================= */

#[derive(Clone, Debug)]
struct ValueField {
    report_id: u8,
    usage_page: u16,
    usage: u16,
    link_collection: u16,
    logical_min: i32,
    logical_max: i32,
    /// Hat whose logical range encodes degrees rather than eight slots.
    hat_is_degrees: bool,
}

#[derive(Clone, Debug)]
struct ButtonField {
    report_id: u8,
    usage_page: u16,
    link_collection: u16,
    usages: Vec<u16>,
}

/// Descriptor tables plus the OS handles HIDP needs to decode reports.
struct HidpDecoder {
    handle: HANDLE,
    ppd: PHIDP_PREPARSED_DATA,
    report_len: u16,
    only_rid0: bool,
    axes: Vec<ValueField>,
    hats: Vec<ValueField>,
    buttons: Vec<ButtonField>,
    /// `(report_id, usage_page, usage, link_collection)` → button index.
    button_index: HashMap<(u8, u16, u16, u16), usize>,
    button_count: usize,
}

impl Drop for HidpDecoder {
    fn drop(&mut self) {
        unsafe {
            if self.ppd != 0 {
                HidD_FreePreparsedData(self.ppd);
            }
            if !self.handle.is_null() && self.handle != INVALID_HANDLE_VALUE {
                CloseHandle(self.handle);
            }
        }
    }
}

// The decoder lives and dies with one device handle on the pipeline
// thread; the raw OS handles are opaque and unshared.
unsafe impl Send for HidpDecoder {}

impl HidpDecoder {
    fn new(path: &str) -> Option<HidpDecoder> {
        let handle = open_device_handle(path)?;

        let mut ppd: PHIDP_PREPARSED_DATA = 0;
        if unsafe { HidD_GetPreparsedData(handle, &mut ppd) } == 0 || ppd == 0 {
            unsafe { CloseHandle(handle) };
            return None;
        }

        let mut caps = MaybeUninit::<HIDP_CAPS>::uninit();
        if unsafe { HidP_GetCaps(ppd, caps.as_mut_ptr()) } != STATUS_SUCCESS {
            unsafe {
                HidD_FreePreparsedData(ppd);
                CloseHandle(handle);
            }
            return None;
        }
        let caps = unsafe { caps.assume_init() };

        let button_caps = enumerate_button_caps(ppd, HidP_Input).unwrap_or_default();
        let value_caps = enumerate_value_caps(ppd, HidP_Input).unwrap_or_default();
        if button_caps.is_empty() && value_caps.is_empty() {
            unsafe {
                HidD_FreePreparsedData(ppd);
                CloseHandle(handle);
            }
            return None;
        }

        let mut only_rid0 = true;
        let mut axes = Vec::new();
        let mut hats = Vec::new();
        for c in &value_caps {
            if c.ReportID != 0 {
                only_rid0 = false;
            }
            expand_value_caps(c, &mut axes, &mut hats);
        }

        let mut buttons = Vec::new();
        let mut button_index = HashMap::new();
        let mut button_count = 0usize;
        for c in &button_caps {
            if c.ReportID != 0 {
                only_rid0 = false;
            }
            let field = expand_button_caps(c);
            for &usage in &field.usages {
                let key = (field.report_id, field.usage_page, usage, field.link_collection);
                button_index.insert(key, button_count);
                button_count += 1;
            }
            buttons.push(field);
        }

        Some(HidpDecoder {
            handle,
            ppd,
            report_len: caps.InputReportByteLength,
            only_rid0,
            axes,
            hats,
            buttons,
            button_index,
            button_count,
        })
    }

    /// Capability counts under the engine's fixed-array convention: the
    /// first eight value fields are axes, the next two spill into the
    /// slider lanes, the rest are dropped.
    fn caps(&self) -> DeviceCaps {
        let total_axes = self.axes.len();
        DeviceCaps {
            axes: total_axes.min(8) as u8,
            sliders: total_axes.saturating_sub(8).min(2) as u8,
            hats: self.hats.len().min(MAX_HATS) as u8,
            buttons: self.button_count.min(MAX_BUTTONS) as u8,
            rumble: false,
            haptics: None,
            sensors: false,
        }
    }

    /// Fold one report into the absolute state.
    fn decode(&mut self, report_id: u8, payload: &[u8], state: &mut RawSample) {
        // HIDP wants a full-length buffer: [report_id][payload..padding].
        let mut report = vec![0u8; (self.report_len as usize).max(1)];
        report[0] = report_id;
        let n = payload.len().min(report.len().saturating_sub(1));
        report[1..1 + n].copy_from_slice(&payload[..n]);
        let report_len = report.len() as u32;

        // Buttons: per field, reset this report's usages and re-set the
        // pressed ones. Fields on other report ids keep their state.
        for field in &self.buttons {
            if field.report_id != 0 && field.report_id != report_id {
                continue;
            }
            for &usage in &field.usages {
                let key = (field.report_id, field.usage_page, usage, field.link_collection);
                if let Some(&idx) = self.button_index.get(&key) {
                    if idx < MAX_BUTTONS {
                        state.buttons[idx] = false;
                    }
                }
            }

            let mut usage_buf = [0u16; 128];
            let mut usage_len: u32 = usage_buf.len() as u32;
            let status = unsafe {
                HidP_GetUsages(
                    HidP_Input,
                    field.usage_page,
                    field.link_collection,
                    usage_buf.as_mut_ptr(),
                    &mut usage_len,
                    self.ppd,
                    report.as_mut_ptr(),
                    report_len,
                )
            };
            if status != STATUS_SUCCESS {
                continue;
            }
            for &usage in &usage_buf[..usage_len as usize] {
                let key = (field.report_id, field.usage_page, usage, field.link_collection);
                if let Some(&idx) = self.button_index.get(&key) {
                    if idx < MAX_BUTTONS {
                        state.buttons[idx] = true;
                    }
                }
            }
        }

        // Axes.
        for (i, field) in self.axes.iter().enumerate().take(MAX_RAW_AXES) {
            if field.report_id != 0 && field.report_id != report_id {
                continue;
            }
            if let Some(value) = self.read_value(field, &mut report, report_len) {
                state.axes[i] = scale_logical(value, field.logical_min, field.logical_max);
            }
        }

        // Hats.
        for (i, field) in self.hats.iter().enumerate().take(MAX_HATS) {
            if field.report_id != 0 && field.report_id != report_id {
                continue;
            }
            if let Some(value) = self.read_value(field, &mut report, report_len) {
                let slot = hat_value_to_slot(
                    value,
                    field.logical_min,
                    field.logical_max,
                    field.hat_is_degrees,
                );
                state.hats[i] = slot_to_mask(slot);
            }
        }
    }

    fn read_value(&self, field: &ValueField, report: &mut [u8], report_len: u32) -> Option<i32> {
        let mut value: u32 = 0;
        let status = unsafe {
            HidP_GetUsageValue(
                HidP_Input,
                field.usage_page,
                field.link_collection,
                field.usage,
                &mut value,
                self.ppd,
                report.as_mut_ptr(),
                report_len,
            )
        };
        (status == STATUS_SUCCESS).then_some(value as i32)
    }
}

fn expand_button_caps(c: &HIDP_BUTTON_CAPS) -> ButtonField {
    let mut usages = Vec::new();
    unsafe {
        if c.IsRange != 0 {
            let range = c.Anonymous.Range;
            if range.UsageMin <= range.UsageMax {
                usages.extend(range.UsageMin..=range.UsageMax);
            }
        } else {
            usages.push(c.Anonymous.NotRange.Usage);
        }
    }
    ButtonField {
        report_id: c.ReportID,
        usage_page: c.UsagePage,
        link_collection: c.LinkCollection,
        usages,
    }
}

fn expand_value_caps(c: &HIDP_VALUE_CAPS, axes: &mut Vec<ValueField>, hats: &mut Vec<ValueField>) {
    if c.UsagePage == 0 {
        return;
    }
    let logical_min = c.LogicalMin;
    let logical_max = c.LogicalMax;

    let mut push = |usage: u16| {
        // Generic Desktop 0x39 = Hat Switch. Eight-position ranges are
        // slots; anything wider is treated as degrees.
        let is_hat = c.UsagePage == 0x01 && usage == 0x39;
        let field = ValueField {
            report_id: c.ReportID,
            usage_page: c.UsagePage,
            usage,
            link_collection: c.LinkCollection,
            logical_min,
            logical_max,
            hat_is_degrees: is_hat
                && !((logical_min == 0 && logical_max == 7)
                    || (logical_min == 1 && logical_max == 8)),
        };
        if is_hat {
            hats.push(field);
        } else {
            axes.push(field);
        }
    };

    unsafe {
        if c.IsRange != 0 {
            let range = c.Anonymous.Range;
            for usage in range.UsageMin..=range.UsageMax {
                push(usage);
            }
        } else {
            push(c.Anonymous.NotRange.Usage);
        }
    }
}

fn enumerate_button_caps(
    ppd: PHIDP_PREPARSED_DATA,
    report_type: HIDP_REPORT_TYPE,
) -> Option<Vec<HIDP_BUTTON_CAPS>> {
    unsafe {
        let mut len: u16 = 64;
        let mut caps: Vec<HIDP_BUTTON_CAPS> = vec![core::mem::zeroed(); len as usize];
        let mut needed: u16 = len;
        let mut status = HidP_GetButtonCaps(report_type, caps.as_mut_ptr(), &mut needed, ppd);
        if status == STATUS_SUCCESS {
            caps.truncate(needed as usize);
            return Some(caps);
        }
        if status == STATUS_BUFFER_TOO_SMALL && needed > 0 {
            len = needed;
            let mut caps: Vec<HIDP_BUTTON_CAPS> = vec![core::mem::zeroed(); len as usize];
            let mut needed = len;
            status = HidP_GetButtonCaps(report_type, caps.as_mut_ptr(), &mut needed, ppd);
            if status == STATUS_SUCCESS {
                caps.truncate(needed as usize);
                return Some(caps);
            }
        }
        None
    }
}

fn enumerate_value_caps(
    ppd: PHIDP_PREPARSED_DATA,
    report_type: HIDP_REPORT_TYPE,
) -> Option<Vec<HIDP_VALUE_CAPS>> {
    unsafe {
        let mut len: u16 = 64;
        let mut caps: Vec<HIDP_VALUE_CAPS> = vec![core::mem::zeroed(); len as usize];
        let mut needed: u16 = len;
        let mut status = HidP_GetValueCaps(report_type, caps.as_mut_ptr(), &mut needed, ppd);
        if status == STATUS_SUCCESS {
            caps.truncate(needed as usize);
            return Some(caps);
        }
        if status == STATUS_BUFFER_TOO_SMALL && needed > 0 {
            len = needed;
            let mut caps: Vec<HIDP_VALUE_CAPS> = vec![core::mem::zeroed(); len as usize];
            let mut needed = len;
            status = HidP_GetValueCaps(report_type, caps.as_mut_ptr(), &mut needed, ppd);
            if status == STATUS_SUCCESS {
                caps.truncate(needed as usize);
                return Some(caps);
            }
        }
        None
    }
}

/// Rescale a logical value onto the signed 16-bit axis convention.
fn scale_logical(value: i32, lo: i32, hi: i32) -> i16 {
    if hi <= lo {
        return 0;
    }
    let t = (value.clamp(lo, hi) - lo) as i64;
    let span = (hi - lo) as i64;
    (t * 65_535 / span - 32_768) as i16
}

/// Raw hat value to a slot (`-1` neutral, `0..7` clockwise from up).
fn hat_value_to_slot(raw: i32, lo: i32, hi: i32, is_degrees: bool) -> i8 {
    if raw < lo || raw > hi || matches!(raw, -1 | 8 | 15 | 255 | 0xFFFF) {
        return -1;
    }
    if !is_degrees {
        let slot = raw - lo;
        if (0..8).contains(&slot) {
            return slot as i8;
        }
        return -1;
    }
    let mut slot = ((raw as f32 + 22.5) / 45.0).floor() as i32 % 8;
    if slot < 0 {
        slot += 8;
    }
    slot as i8
}

/// Slot to the four-bit direction mask the read stage consumes.
fn slot_to_mask(slot: i8) -> u8 {
    match slot {
        0 => HAT_UP,
        1 => HAT_UP | HAT_RIGHT,
        2 => HAT_RIGHT,
        3 => HAT_RIGHT | HAT_DOWN,
        4 => HAT_DOWN,
        5 => HAT_DOWN | HAT_LEFT,
        6 => HAT_LEFT,
        7 => HAT_LEFT | HAT_UP,
        _ => 0,
    }
}

/// Open a Windows file handle for a HID interface path. Falls back to
/// read-only access when the exclusive open is denied.
fn open_device_handle(path: &str) -> Option<HANDLE> {
    let wide: Vec<u16> = OsStr::new(path)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let try_open = |access: u32| unsafe {
        CreateFileW(
            wide.as_ptr(),
            access,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            std::ptr::null(),
            OPEN_EXISTING,
            FILE_ATTRIBUTE_NORMAL,
            std::ptr::null_mut(),
        )
    };

    let mut handle = try_open(GENERIC_READ | GENERIC_WRITE);
    if handle == INVALID_HANDLE_VALUE {
        handle = try_open(GENERIC_READ);
    }
    (handle != INVALID_HANDLE_VALUE).then_some(handle)
}
