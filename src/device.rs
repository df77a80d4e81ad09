//! Physical device identity and records.
//!
//! ## Design goals
//! - **Stable device identity:** instance ids must survive reconnects and
//!   USB-port shuffles where the platform gives us anything stable to hang
//!   them on. The derivation prefers a hardware path and falls back to
//!   `(vid, pid, enumeration index)`.
//! - **Records outlive hardware:** a [`PhysicalDevice`] is created the
//!   first time a device is seen and persists when it unplugs; only an
//!   explicit user action removes it. The driver handle and live raw state
//!   are owned by the pipeline thread and are not part of this record.
//! - **Shared, lightly-locked:** records are shared with UI consumers.
//!   Flags are atomics; the registry hands out snapshots under a short
//!   lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::state::SharedRawState;

/// 64-bit FNV-1a. Used for instance ids and mapping checksums, which must
/// be stable across runs, platforms, and compiler versions (ruling out the
/// std hasher).
pub(crate) fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Stable instance identifier for a physical device.
///
/// Derivation priority:
/// 1. hash of the OS hardware path, when the platform reports one
/// 2. hash of `vid:pid#index` as a last resort (identical devices on the
///    same index collide across ports, which matches how little the
///    platform told us)
/// 3. the literal `XINPUT<slot>` for native controllers
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Id from a stable hardware path.
    pub fn from_path(path: &str) -> DeviceId {
        DeviceId(format!("{:016x}", fnv1a64(path.as_bytes())))
    }

    /// Fallback id from `(vid, pid, enumeration index)`.
    pub fn from_triple(vid: u16, pid: u16, index: usize) -> DeviceId {
        let key = format!("{vid:04x}:{pid:04x}#{index}");
        DeviceId(format!("{:016x}", fnv1a64(key.as_bytes())))
    }

    /// Id for a native XInput slot (`XINPUT0`..`XINPUT3`).
    pub fn xinput(slot: usize) -> DeviceId {
        DeviceId(format!("XINPUT{slot}"))
    }

    /// Wrap a previously persisted id verbatim.
    pub fn from_key(key: impl Into<String>) -> DeviceId {
        DeviceId(key.into())
    }

    /// The id as a string key.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Product identifier shared by all units of one device model.
pub fn product_key(vid: u16, pid: u16) -> String {
    format!("{vid:04x}:{pid:04x}")
}

/// 16-byte product GUID: `[vid_lo, vid_hi, pid_lo, pid_hi, 0 × 12]`.
pub fn product_guid(vid: u16, pid: u16) -> [u8; 16] {
    let mut guid = [0u8; 16];
    guid[0] = vid as u8;
    guid[1] = (vid >> 8) as u8;
    guid[2] = pid as u8;
    guid[3] = (pid >> 8) as u8;
    guid
}

/// Coarse device classification used for filtering and display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    #[default]
    Joystick,
    Gamepad,
    Wheel,
    Flight,
    Keyboard,
    Mouse,
    /// Anything input-bearing that doesn't fit the above (pedal boxes,
    /// button panels, vendor oddities).
    Supplemental,
}

/// Effect family a haptic-capable device prefers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HapticKind {
    /// Dual-magnitude left/right effect; motors map directly.
    LeftRight,
    /// Sine periodic; period derived from the motor magnitudes.
    SinePeriodic,
    /// Single constant-force effect fed by the stronger motor.
    ConstantForce,
}

/// Declared capability counts and feature flags for a device.
///
/// Counts are what the driver reports, clamped to the fixed array sizes in
/// [`crate::state`]. Values beyond the counts stay neutral in every
/// snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCaps {
    /// Number of axes (`0..=8`).
    pub axes: u8,
    /// Number of sliders (`0..=2`).
    pub sliders: u8,
    /// Number of hats (`0..=4`).
    pub hats: u8,
    /// Number of buttons (`0..=128`).
    pub buttons: u8,
    /// Plain dual-motor rumble support.
    #[serde(default)]
    pub rumble: bool,
    /// Haptic-effect support and the preferred effect family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub haptics: Option<HapticKind>,
    /// Motion-sensor support (reported, not consumed by the pipeline).
    #[serde(default)]
    pub sensors: bool,
}

impl DeviceCaps {
    /// Canonical capabilities of a native XInput controller.
    pub const XINPUT: DeviceCaps = DeviceCaps {
        axes: 6,
        sliders: 0,
        hats: 1,
        buttons: 16,
        rumble: true,
        haptics: None,
        sensors: false,
    };

    /// True when the device can receive any kind of force feedback.
    #[inline]
    pub fn has_feedback(&self) -> bool {
        self.rumble || self.haptics.is_some()
    }
}

/// Shared record for one real input source, past or present.
///
/// Everything mutable here is either atomic or behind its own short-lived
/// lock, so UI threads can inspect records while the pipeline runs.
#[derive(Debug)]
pub struct PhysicalDevice {
    /// Stable instance id.
    pub id: DeviceId,
    /// Product identifier (`vid:pid`).
    pub product: String,
    /// Product GUID bytes.
    pub product_guid: [u8; 16],
    /// USB vendor id.
    pub vid: u16,
    /// USB product id.
    pub pid: u16,
    /// Classification at discovery time.
    pub class: DeviceClass,
    name: Mutex<String>,
    caps: Mutex<DeviceCaps>,
    online: AtomicBool,
    hidden: AtomicBool,
    enabled: AtomicBool,
    /// Display copy of the live raw state (see [`SharedRawState`]).
    pub raw: SharedRawState,
}

impl PhysicalDevice {
    /// Create a record for a newly discovered device. Records start
    /// enabled, visible, and offline; Stage 1 flips them online once the
    /// driver handle is open.
    pub fn new(
        id: DeviceId,
        name: impl Into<String>,
        vid: u16,
        pid: u16,
        class: DeviceClass,
    ) -> PhysicalDevice {
        PhysicalDevice {
            id,
            product: product_key(vid, pid),
            product_guid: product_guid(vid, pid),
            vid,
            pid,
            class,
            name: Mutex::new(name.into()),
            caps: Mutex::new(DeviceCaps::default()),
            online: AtomicBool::new(false),
            hidden: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            raw: SharedRawState::default(),
        }
    }

    /// Human-readable display name.
    pub fn name(&self) -> String {
        self.name.lock().expect("device name lock").clone()
    }

    /// Update the display name (a reopened device may report a better one).
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock().expect("device name lock") = name.into();
    }

    /// Declared capabilities.
    pub fn caps(&self) -> DeviceCaps {
        *self.caps.lock().expect("device caps lock")
    }

    /// Replace the declared capabilities (set when the handle opens).
    pub fn set_caps(&self, caps: DeviceCaps) {
        *self.caps.lock().expect("device caps lock") = caps;
    }

    /// Whether the device currently has an open driver handle.
    #[inline]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    /// User-controlled visibility flag (hidden devices stay in the list
    /// but UIs are expected to collapse them).
    #[inline]
    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::Relaxed)
    }

    pub fn set_hidden(&self, hidden: bool) {
        self.hidden.store(hidden, Ordering::Relaxed);
    }

    /// User-controlled participation flag; disabled devices are skipped by
    /// every pipeline stage.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

/// The shared collection of device records.
///
/// Producer is Stage 1; consumers are the later stages and the UI. All
/// iteration happens over a snapshot taken under the lock, so the lock is
/// never held across per-device work.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<Vec<Arc<PhysicalDevice>>>,
}

impl DeviceRegistry {
    pub fn new() -> DeviceRegistry {
        DeviceRegistry::default()
    }

    /// Snapshot of all records (order of first discovery).
    pub fn snapshot(&self) -> Vec<Arc<PhysicalDevice>> {
        self.devices.lock().expect("device registry lock").clone()
    }

    /// Look up a record by instance id.
    pub fn get(&self, id: &DeviceId) -> Option<Arc<PhysicalDevice>> {
        self.devices
            .lock()
            .expect("device registry lock")
            .iter()
            .find(|d| &d.id == id)
            .cloned()
    }

    /// Insert a record; returns `false` (and drops `device`) when the id
    /// is already present. Two records never share an id.
    pub fn insert(&self, device: Arc<PhysicalDevice>) -> bool {
        let mut devices = self.devices.lock().expect("device registry lock");
        if devices.iter().any(|d| d.id == device.id) {
            return false;
        }
        devices.push(device);
        true
    }

    /// Remove a record entirely (explicit user action only).
    pub fn remove(&self, id: &DeviceId) -> Option<Arc<PhysicalDevice>> {
        let mut devices = self.devices.lock().expect("device registry lock");
        let pos = devices.iter().position(|d| &d.id == id)?;
        Some(devices.remove(pos))
    }

    /// Number of records, online or not.
    pub fn len(&self) -> usize {
        self.devices.lock().expect("device registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_deterministic() {
        let a = DeviceId::from_path("\\\\?\\HID#VID_046D&PID_C216#7&2d9f1a&0&0000");
        let b = DeviceId::from_path("\\\\?\\HID#VID_046D&PID_C216#7&2d9f1a&0&0000");
        assert_eq!(a, b);
        assert_ne!(a, DeviceId::from_path("some other path"));

        assert_eq!(
            DeviceId::from_triple(0x046d, 0xc216, 0),
            DeviceId::from_triple(0x046d, 0xc216, 0)
        );
        assert_ne!(
            DeviceId::from_triple(0x046d, 0xc216, 0),
            DeviceId::from_triple(0x046d, 0xc216, 1)
        );

        assert_eq!(DeviceId::xinput(2).as_str(), "XINPUT2");
    }

    #[test]
    fn product_guid_layout() {
        let guid = product_guid(0x045e, 0x028e);
        assert_eq!(&guid[..4], &[0x5e, 0x04, 0x8e, 0x02]);
        assert!(guid[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn registry_rejects_duplicate_ids() {
        let reg = DeviceRegistry::new();
        let id = DeviceId::from_triple(1, 2, 3);
        assert!(reg.insert(Arc::new(PhysicalDevice::new(
            id.clone(),
            "pad",
            1,
            2,
            DeviceClass::Gamepad,
        ))));
        assert!(!reg.insert(Arc::new(PhysicalDevice::new(
            id.clone(),
            "pad again",
            1,
            2,
            DeviceClass::Gamepad,
        ))));
        assert_eq!(reg.len(), 1);
        assert!(reg.remove(&id).is_some());
        assert!(reg.is_empty());
    }
}
