//! Engine event streams.
//!
//! The core publishes four streams: *devices-changed*, *frequency-updated*,
//! *error-occurred*, and per-device *state-changed*. Events are emitted
//! synchronously from the pipeline thread (or a feedback callback thread);
//! listeners that need their own thread must marshal themselves.
//!
//! Every caught pipeline error flows through here -- nothing is swallowed
//! silently -- and errors are additionally mirrored to the `log` facade so
//! a headless run still leaves a trace.

use std::fmt;
use std::sync::Mutex;

use crate::device::DeviceId;

/// Pipeline stage identifiers carried by error events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Enumerate,
    Read,
    Map,
    Combine,
    Output,
    Readback,
}

impl Stage {
    /// Stage number, 1-based, matching the pipeline order.
    pub fn number(self) -> u8 {
        match self {
            Stage::Enumerate => 1,
            Stage::Read => 2,
            Stage::Map => 3,
            Stage::Combine => 4,
            Stage::Output => 5,
            Stage::Readback => 6,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Enumerate => "enumerate",
            Stage::Read => "read",
            Stage::Map => "map",
            Stage::Combine => "combine",
            Stage::Output => "output",
            Stage::Readback => "readback",
        };
        f.write_str(name)
    }
}

/// One event on the engine's observability streams.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    /// A device appeared, disappeared, or changed state in Stage 1.
    DevicesChanged,
    /// Fresh measured pipeline frequency, in Hz.
    FrequencyUpdated(f64),
    /// A caught error; the pipeline continued.
    Error {
        stage: Stage,
        message: String,
        device: Option<DeviceId>,
    },
    /// A device's raw state changed this cycle (recorder support).
    StateChanged { device: DeviceId },
}

/// Trait for reacting to engine events.
pub trait EngineListener: Send {
    fn on_event(&mut self, event: &EngineEvent);
}

/// Blanket adapter so closures can listen directly.
impl<F: FnMut(&EngineEvent) + Send> EngineListener for F {
    fn on_event(&mut self, event: &EngineEvent) {
        self(event)
    }
}

/// Determines which events a listener wants to receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventFilter {
    All,
    DevicesOnly,
    ErrorsOnly,
    StateOnly,
    Custom(fn(&EngineEvent) -> bool),
}

impl EventFilter {
    fn passes(&self, event: &EngineEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::DevicesOnly => matches!(event, EngineEvent::DevicesChanged),
            EventFilter::ErrorsOnly => matches!(event, EngineEvent::Error { .. }),
            EventFilter::StateOnly => matches!(event, EngineEvent::StateChanged { .. }),
            EventFilter::Custom(f) => f(event),
        }
    }
}

/// Metadata-wrapped listener with filter and mute flag.
struct ListenerEntry {
    listener: Box<dyn EngineListener>,
    enabled: bool,
    filter: EventFilter,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, ListenerEntry)>,
}

/// Listener registry shared between the engine and its consumers.
///
/// Emission takes the registry lock, so listener callbacks should be
/// quick; anything slow belongs on the listener's own thread.
#[derive(Default)]
pub struct EngineEventBus {
    registry: Mutex<Registry>,
}

impl EngineEventBus {
    pub fn new() -> EngineEventBus {
        EngineEventBus::default()
    }

    /// Register a listener; the returned id can mute or remove it later.
    pub fn add_listener(
        &self,
        listener: impl EngineListener + 'static,
        filter: EventFilter,
    ) -> u64 {
        let mut registry = self.registry.lock().expect("event registry lock");
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((
            id,
            ListenerEntry {
                listener: Box::new(listener),
                enabled: true,
                filter,
            },
        ));
        id
    }

    /// Re-enable a muted listener.
    pub fn enable(&self, id: u64) {
        self.set_enabled(id, true);
    }

    /// Mute a listener without removing it.
    pub fn disable(&self, id: u64) {
        self.set_enabled(id, false);
    }

    fn set_enabled(&self, id: u64, enabled: bool) {
        let mut registry = self.registry.lock().expect("event registry lock");
        if let Some((_, entry)) = registry.listeners.iter_mut().find(|(lid, _)| *lid == id) {
            entry.enabled = enabled;
        }
    }

    /// Unregister a listener entirely.
    pub fn remove_listener(&self, id: u64) {
        let mut registry = self.registry.lock().expect("event registry lock");
        registry.listeners.retain(|(lid, _)| *lid != id);
    }

    /// Emit one event to all active, matching listeners.
    pub fn emit(&self, event: &EngineEvent) {
        let mut registry = self.registry.lock().expect("event registry lock");
        for (_, entry) in registry.listeners.iter_mut() {
            if entry.enabled && entry.filter.passes(event) {
                entry.listener.on_event(event);
            }
        }
    }

    /// Report a caught error: logs it and emits an [`EngineEvent::Error`].
    pub fn report_error(&self, stage: Stage, message: impl Into<String>, device: Option<DeviceId>) {
        let message = message.into();
        match &device {
            Some(id) => log::warn!("stage {stage}: {message} (device {id})"),
            None => log::warn!("stage {stage}: {message}"),
        }
        self.emit(&EngineEvent::Error {
            stage,
            message,
            device,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn filters_and_mute_flags_apply() {
        let bus = EngineEventBus::new();
        let (tx_all, rx_all) = mpsc::channel();
        let (tx_err, rx_err) = mpsc::channel();

        let all_id = bus.add_listener(
            move |e: &EngineEvent| {
                let _ = tx_all.send(e.clone());
            },
            EventFilter::All,
        );
        bus.add_listener(
            move |e: &EngineEvent| {
                let _ = tx_err.send(e.clone());
            },
            EventFilter::ErrorsOnly,
        );

        bus.emit(&EngineEvent::DevicesChanged);
        bus.report_error(Stage::Read, "sample failed", None);

        assert_eq!(rx_all.try_iter().count(), 2);
        assert_eq!(rx_err.try_iter().count(), 1);

        bus.disable(all_id);
        bus.emit(&EngineEvent::DevicesChanged);
        assert_eq!(rx_all.try_iter().count(), 0);

        bus.enable(all_id);
        bus.emit(&EngineEvent::FrequencyUpdated(998.5));
        assert_eq!(rx_all.try_iter().count(), 1);

        bus.remove_listener(all_id);
        bus.emit(&EngineEvent::DevicesChanged);
        assert_eq!(rx_all.try_iter().count(), 0);
    }

    #[test]
    fn stage_numbers_follow_pipeline_order() {
        assert_eq!(Stage::Enumerate.number(), 1);
        assert_eq!(Stage::Readback.number(), 6);
    }
}
