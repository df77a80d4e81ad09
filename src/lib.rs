#![cfg_attr(docsrs, feature(doc_cfg))]
//! `padforge`: an input translation engine.
//!
//! PadForge polls heterogeneous physical input devices (joysticks,
//! gamepads, wheels, native XInput controllers) at ~1 kHz, translates
//! each one's raw state into an Xbox-360-shaped report through a
//! per-device mapping, combines everything assigned to the same virtual
//! slot, emits the result to up to four virtual Xbox 360 controllers,
//! and routes the games' rumble back out to the right physical motors.
//!
//! # Quick start
//! ```no_run
//! use padforge::{Engine, EngineOptions};
//! use padforge::backends::Backends;
//!
//! # #[cfg(target_os = "windows")]
//! # fn main() -> padforge::Result<()> {
//! let mut engine = Engine::new(Backends::windows()?, EngineOptions::default());
//! let shared = engine.shared();
//! engine.start()?;
//!
//! // Install assignments, inspect devices, read combined output...
//! for device in shared.devices.snapshot() {
//!     println!("{}: {}", device.id, device.name());
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(target_os = "windows"))]
//! # fn main() {}
//! ```
//!
//! # Modules
//! - [`pipeline`] — the six-stage polling engine and its shared state
//! - [`device`] — device identity, capabilities, shared records
//! - [`descriptor`] / [`mapping`] — the mapping language and configs
//! - [`assignment`] — device-to-slot links
//! - [`gamepad`] / [`state`] — the output and input value shapes
//! - [`settings`] — `PadForge.xml` persistence
//! - [`events`] — the engine's observability streams
//! - [`backends`] — platform contracts, Windows implementations, mocks
//!
//! # Threading
//! One dedicated pipeline thread owns all driver handles. Everything the
//! engine shares ([`EngineShared`]) is safe to touch from any thread;
//! event listeners run on the pipeline (or a driver callback) thread and
//! must marshal themselves if they need their own.
//!
//! # Feature flags
//! - **`mock`** (default) — scriptable in-memory backends, used by the
//!   tests and the demo binaries. Disable for a hardware-only build.

pub mod assignment;
pub mod backends;
pub mod descriptor;
pub mod device;
pub mod events;
pub mod gamepad;
pub mod mapping;
pub mod pipeline;
pub mod settings;
pub mod state;

/// Error and Result types for the crate.
pub mod error {
    //! Most fallible library calls return [`Result`]. Inside the running
    //! pipeline, errors do not surface through return values at all:
    //! every stage catches per-entity failures and reports them on the
    //! [`error stream`](crate::events::EngineEvent::Error) instead, so
    //! one bad device never takes a cycle down.

    use crate::descriptor::DescriptorParseError;

    /// Crate-wide error type.
    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        /// The virtual controller bus driver is not installed or refused
        /// the connection.
        #[error("virtual controller bus unavailable: {0}")]
        BusUnavailable(String),

        /// A platform backend reported a failure.
        #[error("{0}")]
        Backend(String),

        /// The operation needs hardware support the device lacks.
        #[error("unsupported: {0}")]
        Unsupported(&'static str),

        /// A mapping descriptor failed to parse.
        #[error(transparent)]
        Descriptor(#[from] DescriptorParseError),

        /// Settings document could not be read, parsed, or written.
        #[error("settings: {0}")]
        Settings(String),

        /// Engine lifecycle misuse (stepping a running engine, starting
        /// twice).
        #[error("engine: {0}")]
        Engine(String),
    }

    /// Convenient crate-wide result alias.
    pub type Result<T> = core::result::Result<T, Error>;
}

pub use error::{Error, Result};

// ---- Re-exports (convenience) ----
pub use assignment::{AssignmentSet, SlotAssignment, SLOT_COUNT};
pub use descriptor::{Binding, Descriptor, PovDirection, SourceKind};
pub use device::{DeviceCaps, DeviceClass, DeviceId, DeviceRegistry, PhysicalDevice};
pub use events::{EngineEvent, EngineEventBus, EngineListener, EventFilter, Stage};
pub use gamepad::{Vibration, XboxGamepad};
pub use mapping::{ForceParams, MappingConfig, StickZones, TargetOutput};
pub use pipeline::{Engine, EngineOptions, EngineShared};
pub use settings::SettingsDocument;
pub use state::RawInputState;

// A tiny prelude for downstreams.
pub mod prelude {
    pub use crate::assignment::{SlotAssignment, SLOT_COUNT};
    pub use crate::backends::Backends;
    pub use crate::descriptor::{Binding, PovDirection, SourceKind};
    pub use crate::device::{DeviceClass, DeviceId};
    pub use crate::events::{EngineEvent, EventFilter};
    pub use crate::gamepad::{Vibration, XboxGamepad};
    pub use crate::mapping::{MappingConfig, TargetOutput};
    pub use crate::pipeline::{Engine, EngineOptions};
    pub use crate::settings::SettingsDocument;
}
