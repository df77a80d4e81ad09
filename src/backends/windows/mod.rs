//! Windows backends.
//!
//! The three platform contracts implemented against the real stack:
//! - **hid** -- joystick-class enumeration and sampling via `hidapi`, with
//!   HIDP descriptor-driven report decoding
//! - **xinput** -- the native controller slots via the XInput API
//! - **vigem** -- virtual Xbox 360 pads on the ViGEmBus driver
//!
//! Nothing here is called directly in normal use; build the bundle with
//! [`Backends::windows`](crate::backends::Backends::windows) and hand it to
//! [`Engine::new`](crate::pipeline::Engine::new).

pub mod hid;
pub mod vigem;
pub mod xinput;
