//! Virtual Xbox 360 pads on the ViGEmBus driver.
//!
//! Each created pad owns its own bus connection and an `Xbox360Wired`
//! target. Inbound vibration arrives through the driver's notification
//! channel on its own thread; the handler registered before `connect` is
//! moved onto that thread once the target is ready.
//!
//! ViGEm does not report which OS XInput slot a target landed on, so
//! `slot_index` is always `None` here and the engine discovers the slot
//! by diffing the XInput connection mask during the bounded attach wait.

use vigem_client::{Client, TargetId, XButtons, XGamepad, Xbox360Wired};

use crate::backends::{FeedbackHandler, VirtualBus, VirtualPad};
use crate::gamepad::XboxGamepad;
use crate::{Error, Result};

/// Bus factory. Construction probes the driver once so a missing
/// installation is detected up front.
pub struct ViGEmBus;

impl ViGEmBus {
    /// Probe for the ViGEmBus driver.
    pub fn connect() -> Result<ViGEmBus> {
        Client::connect()
            .map(|_| ViGEmBus)
            .map_err(|e| Error::BusUnavailable(format!("{e:?}")))
    }
}

impl VirtualBus for ViGEmBus {
    fn create(&mut self) -> Result<Box<dyn VirtualPad>> {
        let client = Client::connect().map_err(|e| Error::BusUnavailable(format!("{e:?}")))?;
        let target = Xbox360Wired::new(client, TargetId::XBOX360_WIRED);
        Ok(Box::new(ViGEmPad {
            target,
            pending_handler: None,
            notification_thread: None,
            connected: false,
        }))
    }
}

struct ViGEmPad {
    target: Xbox360Wired<Client>,
    /// Handler registered before `connect`; moved onto the notification
    /// thread once the target is plugged in.
    pending_handler: Option<FeedbackHandler>,
    notification_thread: Option<std::thread::JoinHandle<()>>,
    connected: bool,
}

impl VirtualPad for ViGEmPad {
    fn connect(&mut self) -> Result<()> {
        self.target
            .plugin()
            .map_err(|e| Error::Backend(format!("plugin failed: {e:?}")))?;
        self.target
            .wait_ready()
            .map_err(|e| Error::Backend(format!("target not ready: {e:?}")))?;
        self.connected = true;

        if let Some(mut handler) = self.pending_handler.take() {
            match self.target.request_notification() {
                Ok(request) => {
                    let thread = request.spawn_thread(move |_, data| {
                        handler(data.large_motor, data.small_motor);
                    });
                    self.notification_thread = Some(thread);
                }
                Err(e) => {
                    log::warn!("vibration notifications unavailable: {e:?}");
                }
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        self.target
            .unplug()
            .map_err(|e| Error::Backend(format!("unplug failed: {e:?}")))?;
        // The notification thread ends when the target goes away.
        if let Some(thread) = self.notification_thread.take() {
            let _ = thread.join();
        }
        Ok(())
    }

    fn submit(&mut self, report: &XboxGamepad) -> Result<()> {
        if !self.connected {
            return Err(Error::Backend("pad not connected".into()));
        }
        let gamepad = XGamepad {
            buttons: XButtons {
                raw: report.buttons,
            },
            left_trigger: report.left_trigger,
            right_trigger: report.right_trigger,
            thumb_lx: report.thumb_lx,
            thumb_ly: report.thumb_ly,
            thumb_rx: report.thumb_rx,
            thumb_ry: report.thumb_ry,
        };
        self.target
            .update(&gamepad)
            .map_err(|e| Error::Backend(format!("report update failed: {e:?}")))
    }

    fn slot_index(&self) -> Option<usize> {
        None
    }

    fn set_feedback_handler(&mut self, handler: FeedbackHandler) -> Result<()> {
        self.pending_handler = Some(handler);
        Ok(())
    }
}
