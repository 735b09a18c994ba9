//! Applet lifecycle orchestration.
//!
//! This module owns runtime acquisition, readiness detection, (re)injection, command
//! dispatch, size synchronization and document save. Host UIs call into it through
//! [`ControllerHandle`] and observe readiness through its watch channel.

mod controller;
mod readiness;
mod sizing;

pub use controller::{spawn_controller, ControllerHandle};
