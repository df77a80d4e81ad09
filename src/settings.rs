//! Settings persistence.
//!
//! One XML document, `PadForge.xml` (falling back to a legacy
//! `Settings.xml` when the primary is absent), sitting next to the
//! executable. Root element `PadForgeSettings` with four children in
//! fixed order:
//!
//! - `Devices` -- known [`PhysicalDevice`] identities, capabilities and
//!   the user's hidden/enabled flags
//! - `UserSettings` -- one entry per slot assignment, linked to its
//!   mapping by checksum
//! - `PadSettings` -- the unique mapping configs
//! - `AppSettings` -- opaque name/value options preserved across
//!   load/save for the app layer; the core never interprets them
//!
//! Descriptors persist as their textual grammar. An unparseable persisted
//! descriptor degrades to an unbound output (with a logged warning)
//! instead of failing the whole document. Mapping configs are
//! deduplicated by checksum on load and shared by `Arc`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::assignment::SlotAssignment;
use crate::descriptor::Binding;
use crate::device::{DeviceCaps, DeviceClass, DeviceId, PhysicalDevice};
use crate::mapping::{ForceParams, MappingConfig, StickZones, TargetOutput};
use crate::{Error, Result};

/// Primary settings file name.
pub const PRIMARY_FILE: &str = "PadForge.xml";
/// Legacy fallback, read when the primary is absent.
pub const LEGACY_FILE: &str = "Settings.xml";

fn default_gain() -> u8 {
    100
}

/// Serialised identity and flags of one known device.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    #[serde(rename = "InstanceId")]
    pub instance: String,
    #[serde(rename = "Product")]
    pub product: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "VendorId")]
    pub vid: u16,
    #[serde(rename = "ProductId")]
    pub pid: u16,
    #[serde(rename = "Class", default)]
    pub class: DeviceClass,
    #[serde(rename = "Capabilities", default)]
    pub caps: DeviceCaps,
    #[serde(rename = "Hidden", default)]
    pub hidden: bool,
    #[serde(rename = "Enabled", default)]
    pub enabled: bool,
}

impl DeviceEntry {
    /// Capture a shared record.
    pub fn from_record(record: &PhysicalDevice) -> DeviceEntry {
        DeviceEntry {
            instance: record.id.as_str().to_string(),
            product: record.product.clone(),
            name: record.name(),
            vid: record.vid,
            pid: record.pid,
            class: record.class,
            caps: record.caps(),
            hidden: record.is_hidden(),
            enabled: record.is_enabled(),
        }
    }

    /// Rebuild an offline record (driver state is discovered live).
    pub fn to_record(&self) -> PhysicalDevice {
        let record = PhysicalDevice::new(
            DeviceId::from_key(self.instance.clone()),
            self.name.clone(),
            self.vid,
            self.pid,
            self.class,
        );
        record.set_caps(self.caps);
        record.set_hidden(self.hidden);
        record.set_enabled(self.enabled);
        record
    }
}

/// One persisted slot assignment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSettingEntry {
    #[serde(rename = "InstanceId")]
    pub instance: String,
    #[serde(rename = "Product", default)]
    pub product: String,
    #[serde(rename = "Slot")]
    pub slot: usize,
    #[serde(rename = "MapChecksum")]
    pub checksum: String,
    #[serde(rename = "Enabled", default)]
    pub enabled: bool,
    #[serde(rename = "SortOrder", default)]
    pub sort_order: u32,
    /// RFC 3339 timestamps maintained by the caller; the core only
    /// carries them through.
    #[serde(rename = "Created", default)]
    pub created: String,
    #[serde(rename = "Modified", default)]
    pub modified: String,
}

/// One persisted mapping config, labelled per output.
///
/// The 21 binding fields are accessed through the output table (see
/// [`TargetOutput::ALL`] and [`PadSettingEntry::binding_mut`]); nothing
/// outside this struct names them individually.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PadSettingEntry {
    #[serde(rename = "Checksum", default)]
    pub checksum: String,
    #[serde(rename = "ButtonA", default)]
    button_a: String,
    #[serde(rename = "ButtonB", default)]
    button_b: String,
    #[serde(rename = "ButtonX", default)]
    button_x: String,
    #[serde(rename = "ButtonY", default)]
    button_y: String,
    #[serde(rename = "LeftShoulder", default)]
    left_shoulder: String,
    #[serde(rename = "RightShoulder", default)]
    right_shoulder: String,
    #[serde(rename = "ButtonBack", default)]
    button_back: String,
    #[serde(rename = "ButtonStart", default)]
    button_start: String,
    #[serde(rename = "ButtonGuide", default)]
    button_guide: String,
    #[serde(rename = "LeftThumb", default)]
    left_thumb: String,
    #[serde(rename = "RightThumb", default)]
    right_thumb: String,
    #[serde(rename = "DPadUp", default)]
    dpad_up: String,
    #[serde(rename = "DPadDown", default)]
    dpad_down: String,
    #[serde(rename = "DPadLeft", default)]
    dpad_left: String,
    #[serde(rename = "DPadRight", default)]
    dpad_right: String,
    #[serde(rename = "LeftTrigger", default)]
    left_trigger: String,
    #[serde(rename = "RightTrigger", default)]
    right_trigger: String,
    #[serde(rename = "LeftThumbX", default)]
    left_thumb_x: String,
    #[serde(rename = "LeftThumbY", default)]
    left_thumb_y: String,
    #[serde(rename = "RightThumbX", default)]
    right_thumb_x: String,
    #[serde(rename = "RightThumbY", default)]
    right_thumb_y: String,
    #[serde(rename = "LeftDeadZone", default)]
    left_dead_zone: u8,
    #[serde(rename = "LeftAntiDeadZone", default)]
    left_anti_dead_zone: u8,
    #[serde(rename = "RightDeadZone", default)]
    right_dead_zone: u8,
    #[serde(rename = "RightAntiDeadZone", default)]
    right_anti_dead_zone: u8,
    #[serde(rename = "OverallGain", default = "default_gain")]
    overall_gain: u8,
    #[serde(rename = "LeftMotorGain", default = "default_gain")]
    left_motor_gain: u8,
    #[serde(rename = "RightMotorGain", default = "default_gain")]
    right_motor_gain: u8,
    #[serde(rename = "SwapMotors", default)]
    swap_motors: bool,
    #[serde(rename = "EffectType", default)]
    effect_type: u8,
}

impl PadSettingEntry {
    /// The field carrying `output`'s descriptor text. This match *is* the
    /// field-accessor half of the output table.
    fn binding_mut(&mut self, output: TargetOutput) -> &mut String {
        match output {
            TargetOutput::A => &mut self.button_a,
            TargetOutput::B => &mut self.button_b,
            TargetOutput::X => &mut self.button_x,
            TargetOutput::Y => &mut self.button_y,
            TargetOutput::LeftShoulder => &mut self.left_shoulder,
            TargetOutput::RightShoulder => &mut self.right_shoulder,
            TargetOutput::Back => &mut self.button_back,
            TargetOutput::Start => &mut self.button_start,
            TargetOutput::Guide => &mut self.button_guide,
            TargetOutput::LeftThumb => &mut self.left_thumb,
            TargetOutput::RightThumb => &mut self.right_thumb,
            TargetOutput::DPadUp => &mut self.dpad_up,
            TargetOutput::DPadDown => &mut self.dpad_down,
            TargetOutput::DPadLeft => &mut self.dpad_left,
            TargetOutput::DPadRight => &mut self.dpad_right,
            TargetOutput::LeftTrigger => &mut self.left_trigger,
            TargetOutput::RightTrigger => &mut self.right_trigger,
            TargetOutput::LeftStickX => &mut self.left_thumb_x,
            TargetOutput::LeftStickY => &mut self.left_thumb_y,
            TargetOutput::RightStickX => &mut self.right_thumb_x,
            TargetOutput::RightStickY => &mut self.right_thumb_y,
        }
    }

    fn binding(&self, output: TargetOutput) -> &String {
        match output {
            TargetOutput::A => &self.button_a,
            TargetOutput::B => &self.button_b,
            TargetOutput::X => &self.button_x,
            TargetOutput::Y => &self.button_y,
            TargetOutput::LeftShoulder => &self.left_shoulder,
            TargetOutput::RightShoulder => &self.right_shoulder,
            TargetOutput::Back => &self.button_back,
            TargetOutput::Start => &self.button_start,
            TargetOutput::Guide => &self.button_guide,
            TargetOutput::LeftThumb => &self.left_thumb,
            TargetOutput::RightThumb => &self.right_thumb,
            TargetOutput::DPadUp => &self.dpad_up,
            TargetOutput::DPadDown => &self.dpad_down,
            TargetOutput::DPadLeft => &self.dpad_left,
            TargetOutput::DPadRight => &self.dpad_right,
            TargetOutput::LeftTrigger => &self.left_trigger,
            TargetOutput::RightTrigger => &self.right_trigger,
            TargetOutput::LeftStickX => &self.left_thumb_x,
            TargetOutput::LeftStickY => &self.left_thumb_y,
            TargetOutput::RightStickX => &self.right_thumb_x,
            TargetOutput::RightStickY => &self.right_thumb_y,
        }
    }

    /// Serialise a config, stamping its checksum.
    pub fn from_config(config: &MappingConfig) -> PadSettingEntry {
        let mut entry = PadSettingEntry {
            checksum: config.checksum(),
            left_dead_zone: config.left_stick.dead_zone,
            left_anti_dead_zone: config.left_stick.anti_dead_zone,
            right_dead_zone: config.right_stick.dead_zone,
            right_anti_dead_zone: config.right_stick.anti_dead_zone,
            overall_gain: config.force.overall_gain,
            left_motor_gain: config.force.left_gain,
            right_motor_gain: config.force.right_gain,
            swap_motors: config.force.swap_motors,
            effect_type: config.force.effect_type,
            ..PadSettingEntry::default()
        };
        for output in TargetOutput::ALL {
            *entry.binding_mut(output) = config[output].to_string();
        }
        entry
    }

    /// Rebuild the config. Bad descriptor text degrades to unbound.
    pub fn to_config(&self) -> MappingConfig {
        let mut config = MappingConfig::new();
        for output in TargetOutput::ALL {
            let text = self.binding(output);
            config[output] = match text.parse::<Binding>() {
                Ok(binding) => binding,
                Err(e) => {
                    log::warn!(
                        "bad descriptor for {}: {e} (`{text}`), leaving unbound",
                        output.label()
                    );
                    Binding::NONE
                }
            };
        }
        config.left_stick = StickZones {
            dead_zone: self.left_dead_zone,
            anti_dead_zone: self.left_anti_dead_zone,
        };
        config.right_stick = StickZones {
            dead_zone: self.right_dead_zone,
            anti_dead_zone: self.right_anti_dead_zone,
        };
        config.force = ForceParams {
            overall_gain: self.overall_gain,
            left_gain: self.left_motor_gain,
            right_gain: self.right_motor_gain,
            swap_motors: self.swap_motors,
            effect_type: self.effect_type,
        };
        config
    }
}

/// Opaque app-layer option.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppOption {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceList {
    #[serde(rename = "Device", default)]
    pub items: Vec<DeviceEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSettingList {
    #[serde(rename = "Setting", default)]
    pub items: Vec<UserSettingEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PadSettingList {
    #[serde(rename = "PadSetting", default)]
    pub items: Vec<PadSettingEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(rename = "Option", default)]
    pub options: Vec<AppOption>,
}

/// The whole document. Child order is fixed by field order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "PadForgeSettings")]
pub struct SettingsDocument {
    #[serde(rename = "Devices", default)]
    pub devices: DeviceList,
    #[serde(rename = "UserSettings", default)]
    pub user_settings: UserSettingList,
    #[serde(rename = "PadSettings", default)]
    pub pad_settings: PadSettingList,
    #[serde(rename = "AppSettings", default)]
    pub app_settings: AppSettings,
}

impl SettingsDocument {
    /// Serialise to XML text (with declaration).
    pub fn to_xml(&self) -> Result<String> {
        let body = quick_xml::se::to_string(self)
            .map_err(|e| Error::Settings(format!("serialise: {e}")))?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n{body}"))
    }

    /// Parse from XML text.
    pub fn from_xml(text: &str) -> Result<SettingsDocument> {
        quick_xml::de::from_str(text).map_err(|e| Error::Settings(format!("parse: {e}")))
    }

    /// Capture the current engine state: device records, assignments, and
    /// the deduplicated mapping configs they reference.
    pub fn snapshot(
        devices: &[Arc<PhysicalDevice>],
        assignments: &[SlotAssignment],
    ) -> SettingsDocument {
        let mut doc = SettingsDocument::default();

        for record in devices {
            doc.devices.items.push(DeviceEntry::from_record(record));
        }

        let mut seen: HashMap<String, ()> = HashMap::new();
        for assignment in assignments {
            let checksum = assignment.mapping.checksum();
            doc.user_settings.items.push(UserSettingEntry {
                instance: assignment.device.as_str().to_string(),
                product: devices
                    .iter()
                    .find(|d| d.id == assignment.device)
                    .map(|d| d.product.clone())
                    .unwrap_or_default(),
                slot: assignment.slot,
                checksum: checksum.clone(),
                enabled: assignment.enabled,
                sort_order: assignment.sort_order,
                created: String::new(),
                modified: String::new(),
            });
            if seen.insert(checksum, ()).is_none() {
                doc.pad_settings
                    .items
                    .push(PadSettingEntry::from_config(&assignment.mapping));
            }
        }

        doc
    }

    /// Resolve the persisted graph back into live assignments.
    ///
    /// Configs are deduplicated by checksum and shared; a user setting
    /// whose checksum matches no pad setting is dropped with a warning
    /// (its descriptor source is gone, there is nothing to map with).
    pub fn resolve_assignments(&self) -> Vec<SlotAssignment> {
        let mut configs: HashMap<String, Arc<MappingConfig>> = HashMap::new();
        for entry in &self.pad_settings.items {
            configs.insert(entry.checksum(), Arc::new(entry.to_config()));
        }

        let mut assignments = Vec::new();
        for setting in &self.user_settings.items {
            let Some(mapping) = configs.get(&setting.checksum) else {
                log::warn!(
                    "user setting for {} references unknown mapping {}",
                    setting.instance,
                    setting.checksum
                );
                continue;
            };
            let mut assignment = SlotAssignment::new(
                DeviceId::from_key(setting.instance.clone()),
                setting.slot,
                mapping.clone(),
            );
            assignment.enabled = setting.enabled;
            assignment.sort_order = setting.sort_order;
            assignments.push(assignment);
        }
        assignments
    }
}

impl PadSettingEntry {
    /// The checksum binding this entry to its user settings. Falls back
    /// to recomputing from content when the stored stamp is empty.
    pub fn checksum(&self) -> String {
        if self.checksum.is_empty() {
            self.to_config().checksum()
        } else {
            self.checksum.clone()
        }
    }
}

/// Resolve which settings file to read in `dir`, if any.
pub fn settings_path(dir: &Path) -> Option<PathBuf> {
    let primary = dir.join(PRIMARY_FILE);
    if primary.exists() {
        return Some(primary);
    }
    let legacy = dir.join(LEGACY_FILE);
    legacy.exists().then_some(legacy)
}

/// Load from `dir`; a missing file yields the empty document.
pub fn load(dir: &Path) -> Result<SettingsDocument> {
    match settings_path(dir) {
        Some(path) => {
            let text = fs::read_to_string(&path)
                .map_err(|e| Error::Settings(format!("read {}: {e}", path.display())))?;
            SettingsDocument::from_xml(&text)
        }
        None => Ok(SettingsDocument::default()),
    }
}

/// Save to `dir/PadForge.xml`.
pub fn save(dir: &Path, doc: &SettingsDocument) -> Result<()> {
    let path = dir.join(PRIMARY_FILE);
    fs::write(&path, doc.to_xml()?)
        .map_err(|e| Error::Settings(format!("write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SourceKind;

    fn sample_doc() -> SettingsDocument {
        let mapping = Arc::new(MappingConfig::xinput_passthrough());
        let mut other = MappingConfig::xinput_passthrough();
        other[TargetOutput::A] = Binding::source(SourceKind::Button, 3);
        other.force.swap_motors = true;
        let other = Arc::new(other);

        let record = PhysicalDevice::new(
            DeviceId::from_triple(0x046d, 0xc216, 0),
            "Dual Action",
            0x046d,
            0xc216,
            DeviceClass::Gamepad,
        );
        record.set_caps(DeviceCaps {
            axes: 4,
            sliders: 0,
            hats: 1,
            buttons: 12,
            rumble: true,
            haptics: None,
            sensors: false,
        });
        let devices = vec![Arc::new(record)];

        let mut a = SlotAssignment::new(devices[0].id.clone(), 0, mapping.clone());
        a.sort_order = 1;
        let mut b = SlotAssignment::new(devices[0].id.clone(), 1, other);
        b.enabled = false;
        // Third assignment shares the first mapping: must not duplicate
        // the pad setting.
        let c = SlotAssignment::new(devices[0].id.clone(), 2, mapping);

        SettingsDocument::snapshot(&devices, &[a, b, c])
    }

    #[test]
    fn snapshot_dedupes_mappings_by_checksum() {
        let doc = sample_doc();
        assert_eq!(doc.user_settings.items.len(), 3);
        assert_eq!(doc.pad_settings.items.len(), 2);
        assert_eq!(
            doc.user_settings.items[0].checksum,
            doc.user_settings.items[2].checksum
        );
    }

    #[test]
    fn xml_round_trip_preserves_the_graph() {
        let doc = sample_doc();
        let xml = doc.to_xml().unwrap();
        assert!(xml.contains("<PadForgeSettings>"));
        assert!(xml.contains("<Devices>"));

        let parsed = SettingsDocument::from_xml(&xml).unwrap();
        assert_eq!(parsed, doc);

        // Resolved assignments reproduce the original configs by checksum
        // and share deduplicated Arcs.
        let assignments = parsed.resolve_assignments();
        assert_eq!(assignments.len(), 3);
        assert_eq!(
            assignments[0].mapping.checksum(),
            doc.pad_settings.items[0].checksum
        );
        assert!(Arc::ptr_eq(&assignments[0].mapping, &assignments[2].mapping));
        assert!(!assignments[1].enabled);
    }

    #[test]
    fn bad_descriptor_degrades_to_unbound() {
        let mut entry = PadSettingEntry::from_config(&MappingConfig::xinput_passthrough());
        *entry.binding_mut(TargetOutput::A) = "Bogus 7".into();
        let config = entry.to_config();
        assert!(!config[TargetOutput::A].is_bound());
        // Everything else survives.
        assert!(config[TargetOutput::B].is_bound());
    }

    #[test]
    fn unknown_checksum_reference_is_dropped() {
        let mut doc = sample_doc();
        doc.user_settings.items[0].checksum = "feedfacefeedface".into();
        let assignments = doc.resolve_assignments();
        assert_eq!(assignments.len(), 2);
    }

    #[test]
    fn load_save_round_trip_on_disk() {
        let dir = std::env::temp_dir().join(format!("padforge-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        // Missing file loads as empty.
        let empty = load(&dir).unwrap();
        assert_eq!(empty, SettingsDocument::default());

        let doc = sample_doc();
        save(&dir, &doc).unwrap();
        assert_eq!(settings_path(&dir), Some(dir.join(PRIMARY_FILE)));
        let loaded = load(&dir).unwrap();
        assert_eq!(loaded, doc);

        // Legacy fallback engages only without the primary.
        fs::rename(dir.join(PRIMARY_FILE), dir.join(LEGACY_FILE)).unwrap();
        assert_eq!(settings_path(&dir), Some(dir.join(LEGACY_FILE)));
        let legacy = load(&dir).unwrap();
        assert_eq!(legacy, doc);

        fs::remove_dir_all(&dir).unwrap();
    }
}
