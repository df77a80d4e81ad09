//! The six-stage polling pipeline.
//!
//! One dedicated thread runs Enumerate → Read → Map → Combine → Output →
//! Readback once per cycle (1 ms by default). Each stage is a module with
//! a `run(&mut PipelineCtx)` entry point owning its private state inside
//! the context; everything consumers may touch concurrently lives in
//! [`EngineShared`] under the discipline documented per field.
//!
//! [`Engine`] is the public handle: construct it over a set of backends,
//! then either `start()` the pipeline thread or `step()` cycles
//! synchronously (which is how the tests drive it, timing-free).

pub mod combine;
pub mod enumerate;
pub mod feedback;
pub mod map;
pub mod output;
pub mod read;
pub mod readback;
pub mod scheduler;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::assignment::{AssignmentSet, SlotAssignment, SLOT_COUNT};
use crate::backends::{Backends, JoystickBackend, JoystickHandle, NativeSlots, VirtualBus, VirtualPad};
use crate::device::{DeviceCaps, DeviceRegistry, PhysicalDevice};
use crate::events::{EngineEventBus, Stage};
use crate::gamepad::{Vibration, XboxGamepad};
use crate::state::RawInputState;
use crate::{Error, Result};

use readback::CombinedSlot;

/// Tunables for the pipeline.
#[derive(Clone, Copy, Debug)]
pub struct EngineOptions {
    /// Cycle period; 1 ms targets 1 kHz.
    pub period: Duration,
    /// Consecutive inactive cycles a virtual pad survives before being
    /// destroyed (≈10 s at 1 kHz by default).
    pub grace_cycles: u32,
    /// Ceiling on the bounded wait for a freshly connected virtual pad to
    /// surface in the native slot mask.
    pub attach_wait: Duration,
    /// Cycles per measured-frequency window (and frequency event cadence).
    pub frequency_window: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            period: Duration::from_millis(1),
            grace_cycles: 10_000,
            attach_wait: Duration::from_millis(50),
            frequency_window: 1_000,
        }
    }
}

/// State shared between the pipeline thread and its consumers.
pub struct EngineShared {
    /// Device records (Stage 1 writes, everyone reads).
    pub devices: DeviceRegistry,
    /// Double-buffered assignment list (UI writes, pipeline reads).
    pub assignments: AssignmentSet,
    /// Observability streams.
    pub events: EngineEventBus,
    combined: [CombinedSlot; SLOT_COUNT],
    vibration: [AtomicU32; SLOT_COUNT],
    loopback: Mutex<u8>,
    frequency_bits: AtomicU64,
    bus_available: AtomicBool,
    running: AtomicBool,
}

impl EngineShared {
    fn new(bus_available: bool) -> EngineShared {
        EngineShared {
            devices: DeviceRegistry::new(),
            assignments: AssignmentSet::new(),
            events: EngineEventBus::new(),
            combined: Default::default(),
            vibration: Default::default(),
            loopback: Mutex::new(0),
            frequency_bits: AtomicU64::new(0f64.to_bits()),
            bus_available: AtomicBool::new(bus_available),
            running: AtomicBool::new(false),
        }
    }

    /// Latest combined output for a slot (display cadence; relaxed reads).
    pub fn combined(&self, slot: usize) -> XboxGamepad {
        self.combined[slot].load()
    }

    /// Pending inbound vibration for a slot.
    pub fn vibration(&self, slot: usize) -> Vibration {
        Vibration::unpack(self.vibration[slot].load(Ordering::Relaxed))
    }

    pub(crate) fn store_vibration(&self, slot: usize, vibration: Vibration) {
        self.vibration[slot].store(vibration.pack(), Ordering::Relaxed);
    }

    /// Measured pipeline frequency in Hz (0 until the first window).
    pub fn measured_frequency(&self) -> f64 {
        f64::from_bits(self.frequency_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn store_frequency(&self, hz: f64) {
        self.frequency_bits.store(hz.to_bits(), Ordering::Relaxed);
    }

    /// Whether the virtual controller bus driver was found. When false the
    /// engine still polls and maps, but Stage 5 is disabled.
    pub fn bus_available(&self) -> bool {
        self.bus_available.load(Ordering::Relaxed)
    }

    /// Whether the pipeline thread is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub(crate) fn request_stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// OS slots currently occupied by our own virtual pads (bit per slot).
    /// Stage 1 consults this to avoid re-enumerating our own output.
    pub(crate) fn loopback_mask(&self) -> u8 {
        *self.loopback.lock().expect("loopback lock")
    }

    pub(crate) fn loopback_claim(&self, slot: usize) {
        *self.loopback.lock().expect("loopback lock") |= 1 << slot;
    }

    pub(crate) fn loopback_release(&self, slot: usize) {
        *self.loopback.lock().expect("loopback lock") &= !(1 << slot);
    }
}

/// How the pipeline talks to one online device.
pub(crate) enum DriverHandle {
    /// Joystick-class device with an open OS handle.
    Joystick(Box<dyn JoystickHandle>),
    /// Native XInput controller addressed by slot.
    Native { slot: usize },
}

/// Pipeline-private runtime for one online device.
pub(crate) struct DeviceRuntime {
    /// The shared record this runtime belongs to.
    pub record: Arc<PhysicalDevice>,
    pub driver: DriverHandle,
    /// Capability copy for the hot loop (no lock per cycle).
    pub caps: DeviceCaps,
    /// Raw state as read this cycle; the mapper's input.
    pub raw: RawInputState,
    pub ff: feedback::FFState,
    /// Enumeration mark for the per-cycle sweep.
    pub seen: bool,
}

/// Stage 5 per-slot lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SlotState {
    Detached,
    Attached,
    Grace,
}

pub(crate) struct SlotRuntime {
    pub state: SlotState,
    pub pad: Option<Box<dyn VirtualPad>>,
    /// OS XInput slot our pad occupies, once discovered.
    pub os_slot: Option<usize>,
    /// Inactive cycles left before a grace teardown.
    pub grace_left: u32,
}

impl Default for SlotRuntime {
    fn default() -> Self {
        SlotRuntime {
            state: SlotState::Detached,
            pad: None,
            os_slot: None,
            grace_left: 0,
        }
    }
}

/// Everything the pipeline thread owns, plus its view of the shared state.
pub struct PipelineCtx {
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) opts: EngineOptions,
    pub(crate) joystick: Box<dyn JoystickBackend>,
    pub(crate) native: Box<dyn NativeSlots>,
    pub(crate) bus: Option<Box<dyn VirtualBus>>,
    /// Online device runtimes keyed by instance id.
    pub(crate) runtimes: HashMap<crate::device::DeviceId, DeviceRuntime>,
    /// Assignment list as of this cycle (Arc swap at cycle start).
    pub(crate) assignments: Arc<Vec<SlotAssignment>>,
    pub(crate) assignment_gen: u64,
    /// Per-assignment staging buffers: mapped output + contributing flag.
    pub(crate) staging: Vec<(XboxGamepad, bool)>,
    /// Stage 4 output, consumed by Stages 5 and 6.
    pub(crate) combined: [XboxGamepad; SLOT_COUNT],
    pub(crate) slots: [SlotRuntime; SLOT_COUNT],
    /// One-shot flag so a missing bus is reported exactly once.
    pub(crate) bus_warned: bool,
    /// Stage currently executing, for fatal-error attribution.
    pub(crate) current_stage: Stage,
    pub(crate) cycles: u64,
}

impl PipelineCtx {
    fn new(shared: Arc<EngineShared>, backends: Backends, opts: EngineOptions) -> PipelineCtx {
        PipelineCtx {
            shared,
            opts,
            joystick: backends.joystick,
            native: backends.native,
            bus: backends.bus,
            runtimes: HashMap::new(),
            assignments: Arc::new(Vec::new()),
            assignment_gen: 0,
            staging: Vec::new(),
            combined: [XboxGamepad::NEUTRAL; SLOT_COUNT],
            slots: Default::default(),
            bus_warned: false,
            current_stage: Stage::Enumerate,
            cycles: 0,
        }
    }

    /// Pick up the latest assignment list; rebuild staging buffers when
    /// the generation moved.
    fn refresh_assignments(&mut self) {
        let (list, generation) = self.shared.assignments.snapshot();
        if generation != self.assignment_gen || self.staging.len() != list.len() {
            self.staging = vec![(XboxGamepad::NEUTRAL, false); list.len()];
            self.assignments = list;
            self.assignment_gen = generation;
        }
    }

    /// Run one full cycle, stages 1 through 6.
    pub fn cycle(&mut self) {
        self.refresh_assignments();
        self.current_stage = Stage::Enumerate;
        enumerate::run(self);
        self.current_stage = Stage::Read;
        read::run(self);
        self.current_stage = Stage::Map;
        map::run(self);
        self.current_stage = Stage::Combine;
        combine::run(self);
        self.current_stage = Stage::Output;
        output::run(self);
        self.current_stage = Stage::Readback;
        readback::run(self);
        self.cycles = self.cycles.wrapping_add(1);
    }

    /// Tear down all virtual pads (shutdown path; also used when the
    /// scheduler exits).
    pub(crate) fn detach_all(&mut self) {
        for slot in 0..SLOT_COUNT {
            output::detach(self, slot);
        }
    }

    /// Cycles executed so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

/// The engine: pipeline state plus thread lifecycle.
///
/// Dropping a running engine stops it.
pub struct Engine {
    shared: Arc<EngineShared>,
    ctx: Option<PipelineCtx>,
    worker: Option<thread::JoinHandle<PipelineCtx>>,
}

impl Engine {
    /// Build an engine over a set of backends. A missing virtual bus is
    /// not fatal: the engine runs with Stage 5 disabled and says so via
    /// [`EngineShared::bus_available`] and a one-time error event.
    pub fn new(backends: Backends, opts: EngineOptions) -> Engine {
        let shared = Arc::new(EngineShared::new(backends.bus.is_some()));
        let ctx = PipelineCtx::new(shared.clone(), backends, opts);
        Engine {
            shared,
            ctx: Some(ctx),
            worker: None,
        }
    }

    /// Handle to the shared state (registry, assignments, events,
    /// readback). Cheap to clone, valid for the engine's lifetime.
    pub fn shared(&self) -> Arc<EngineShared> {
        self.shared.clone()
    }

    /// Run exactly one cycle synchronously. Only valid while the pipeline
    /// thread is not running; tests and tooling use this to drive the
    /// engine deterministically.
    pub fn step(&mut self) -> Result<()> {
        match self.ctx.as_mut() {
            Some(ctx) => {
                ctx.cycle();
                Ok(())
            }
            None => Err(Error::Engine("pipeline thread is running".into())),
        }
    }

    /// Spawn the pipeline thread.
    pub fn start(&mut self) -> Result<()> {
        let ctx = self
            .ctx
            .take()
            .ok_or(Error::Engine("engine already started".into()))?;
        self.shared.running.store(true, Ordering::Relaxed);
        let worker = thread::Builder::new()
            .name("padforge-pipeline".into())
            .spawn(move || scheduler::run(ctx))
            .map_err(|e| {
                self.shared.request_stop();
                Error::Engine(format!("failed to spawn pipeline thread: {e}"))
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Request shutdown and join the pipeline thread. The context comes
    /// back, so `step()` works again afterwards.
    pub fn stop(&mut self) {
        self.shared.request_stop();
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(ctx) => self.ctx = Some(ctx),
                Err(_) => {
                    // Pipeline thread panicked; the fatal path already
                    // emitted an event before unwinding.
                    log::error!("pipeline thread terminated abnormally");
                }
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
