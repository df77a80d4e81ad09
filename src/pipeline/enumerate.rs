//! Stage 1: device enumeration.
//!
//! Keeps the runtime set in line with what the OS reports: opens newly
//! visible joystick devices, probes the four native XInput slots, and
//! sweeps runtimes whose hardware went away. Records survive offline;
//! only their driver handle, raw copy, and FF state are torn down.
//!
//! Native Xbox-style controllers are deliberately *not* opened through
//! the joystick backend: they are recognised by vid/pid and handled
//! exclusively through the native sub-stage, which also skips any OS slot
//! occupied by one of our own virtual pads (loopback prevention).

use std::sync::Arc;

use crate::device::{DeviceClass, DeviceId, PhysicalDevice};
use crate::events::{EngineEvent, Stage};
use crate::pipeline::{DeviceRuntime, DriverHandle, PipelineCtx};
use crate::state::RawInputState;

/// Microsoft's vendor id.
const XBOX_VID: u16 = 0x045e;

/// Product ids the native XInput stack owns. A device matching one of
/// these is closed to the joystick backend and surfaces only as an
/// `XINPUT<slot>` record.
const XBOX_PIDS: &[u16] = &[
    0x028e, // Xbox 360 wired
    0x028f, // Xbox 360 wireless (charging)
    0x0719, // Xbox 360 wireless receiver
    0x02a1, // Xbox 360 wireless
    0x02d1, // Xbox One
    0x02dd, // Xbox One (2015 firmware)
    0x02e3, // Xbox One Elite
    0x02ea, // Xbox One S
    0x02fd, // Xbox One S (Bluetooth)
    0x0b12, // Xbox Series X|S
    0x0b13, // Xbox Series X|S (Bluetooth)
];

fn is_native_xbox(vid: u16, pid: u16) -> bool {
    vid == XBOX_VID && XBOX_PIDS.contains(&pid)
}

pub(crate) fn run(ctx: &mut PipelineCtx) {
    let mut changed = false;

    for rt in ctx.runtimes.values_mut() {
        rt.seen = false;
    }

    enumerate_joysticks(ctx, &mut changed);
    enumerate_native(ctx, &mut changed);
    sweep_offline(ctx, &mut changed);

    if changed {
        ctx.shared.events.emit(&EngineEvent::DevicesChanged);
    }
}

/// Joystick-class devices by enumeration index.
fn enumerate_joysticks(ctx: &mut PipelineCtx, changed: &mut bool) {
    let count = ctx.joystick.device_count();
    for index in 0..count {
        let Some(info) = ctx.joystick.device_info(index) else {
            // Index went stale between count and info; next cycle catches up.
            continue;
        };
        if is_native_xbox(info.vid, info.pid) {
            continue;
        }

        let id = match info.path.as_deref() {
            Some(path) => DeviceId::from_path(path),
            None => DeviceId::from_triple(info.vid, info.pid, index),
        };

        // Already online with a live handle: nothing to do.
        if let Some(rt) = ctx.runtimes.get_mut(&id) {
            let alive = match &rt.driver {
                DriverHandle::Joystick(handle) => handle.is_attached(),
                DriverHandle::Native { .. } => true,
            };
            if alive {
                rt.seen = true;
                continue;
            }
            // Stale handle; fall through and reopen below.
        }

        let handle = match ctx.joystick.open(index) {
            Ok(handle) => handle,
            Err(e) => {
                ctx.shared
                    .events
                    .report_error(Stage::Enumerate, format!("open failed: {e}"), Some(id));
                continue;
            }
        };
        let caps = handle.caps();

        let record = match ctx.shared.devices.get(&id) {
            Some(record) => record,
            None => {
                let record = Arc::new(PhysicalDevice::new(
                    id.clone(),
                    info.name.clone(),
                    info.vid,
                    info.pid,
                    info.class,
                ));
                ctx.shared.devices.insert(record.clone());
                *changed = true;
                record
            }
        };
        record.set_name(info.name);
        record.set_caps(caps);
        if !record.is_online() {
            record.set_online(true);
            *changed = true;
        }

        log::debug!(
            "opened {} ({}) axes={} sliders={} hats={} buttons={}",
            record.name(),
            id,
            caps.axes,
            caps.sliders,
            caps.hats,
            caps.buttons
        );

        ctx.runtimes.insert(
            id,
            DeviceRuntime {
                record,
                driver: DriverHandle::Joystick(handle),
                caps,
                raw: RawInputState::NEUTRAL,
                ff: super::feedback::FFState::new(),
                seen: true,
            },
        );
    }
}

/// Sub-stage 1b: the four native XInput slots.
fn enumerate_native(ctx: &mut PipelineCtx, changed: &mut bool) {
    let loopback = ctx.shared.loopback_mask();
    for slot in 0..4 {
        if loopback & (1 << slot) != 0 {
            // Our own virtual pad occupies this slot; enumerating it would
            // feed the engine its own output.
            continue;
        }
        if !ctx.native.probe(slot) {
            continue;
        }

        let id = DeviceId::xinput(slot);
        if let Some(rt) = ctx.runtimes.get_mut(&id) {
            rt.seen = true;
            continue;
        }

        let record = match ctx.shared.devices.get(&id) {
            Some(record) => record,
            None => {
                let record = Arc::new(PhysicalDevice::new(
                    id.clone(),
                    format!("XInput Controller {slot}"),
                    XBOX_VID,
                    0x028e,
                    DeviceClass::Gamepad,
                ));
                ctx.shared.devices.insert(record.clone());
                *changed = true;
                record
            }
        };
        record.set_caps(crate::device::DeviceCaps::XINPUT);
        if !record.is_online() {
            record.set_online(true);
            *changed = true;
        }

        log::debug!("native controller connected on slot {slot}");

        ctx.runtimes.insert(
            id,
            DeviceRuntime {
                record,
                driver: DriverHandle::Native { slot },
                caps: crate::device::DeviceCaps::XINPUT,
                raw: RawInputState::NEUTRAL,
                ff: super::feedback::FFState::new(),
                seen: true,
            },
        );
    }
}

/// Close runtimes whose device disappeared or whose handle reports
/// not-attached. The shared record flips offline and its display state
/// resets; the record itself survives.
fn sweep_offline(ctx: &mut PipelineCtx, changed: &mut bool) {
    ctx.runtimes.retain(|id, rt| {
        let alive = rt.seen
            && match &rt.driver {
                DriverHandle::Joystick(handle) => handle.is_attached(),
                DriverHandle::Native { .. } => true,
            };
        if !alive {
            log::debug!("device {} went offline", id);
            rt.record.set_online(false);
            rt.record.raw.clear();
            rt.ff.clear();
            *changed = true;
        }
        alive
    });
}
